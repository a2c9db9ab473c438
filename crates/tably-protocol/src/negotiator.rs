//! Client side of the want/have negotiation.
//!
//! The negotiator offers local commits newest first, a bounded batch per
//! round. After each ACK response it drops everything the server already
//! holds from the walk, so later rounds only probe unknown history. Once
//! the walk is exhausted or the total haves cap is reached it sends
//! `done`, which forces the server to answer with a packfile.

use crate::packfile::PackfileReader;
use crate::protocol::UploadPackRequest;
use crate::{CommitsQueue, ProtocolError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tably_storage::{ObjectStore, ObjectType, Sum};

/// Haves offered per round.
pub const HAVES_PER_ROUND: usize = 32;
/// Total haves offered before giving up and sending `done`.
pub const MAX_HAVES: usize = 256;

/// A server response to an upload-pack request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPackReply {
    /// Common sums acknowledged by the server; negotiation continues.
    Acks(Vec<Sum>),
    /// One packfile chunk; `more` is set when further chunks remain.
    Packfile { data: Vec<u8>, more: bool },
}

/// Carries upload-pack requests to a server, keeping session state
/// between calls.
#[async_trait]
pub trait UploadPackTransport: Send {
    /// Sends one request body and returns the server's reply.
    async fn upload_pack(&mut self, body: Vec<u8>) -> Result<UploadPackReply>;
}

/// Destination for objects decoded from a packfile.
pub trait ObjectSink: Send {
    /// Accepts one object.
    fn receive(&mut self, object_type: ObjectType, data: Vec<u8>) -> Result<()>;
}

/// Sink that saves objects into a store, recomputing their sums.
pub struct StoreSink {
    objects: Arc<dyn ObjectStore>,
    count: usize,
}

impl StoreSink {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects, count: 0 }
    }

    /// Objects saved so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

impl ObjectSink for StoreSink {
    fn receive(&mut self, object_type: ObjectType, data: Vec<u8>) -> Result<()> {
        self.objects.save_raw(object_type, Bytes::from(data))?;
        self.count += 1;
        Ok(())
    }
}

/// Summary of a finished negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationStats {
    /// Want/have rounds sent.
    pub rounds: usize,
    /// Haves offered in total.
    pub haves: usize,
    /// Packfile chunks received.
    pub chunks: usize,
    /// Objects decoded from the packfile.
    pub objects: usize,
}

/// Drives a fetch negotiation against one server.
pub struct Negotiator {
    wants: Vec<Sum>,
    haves: CommitsQueue,
    haves_per_round: usize,
    max_haves: usize,
    sent_haves: usize,
    done: bool,
    stats: NegotiationStats,
}

impl Negotiator {
    /// Creates a negotiator for `wants`, offering haves from the ancestry
    /// of `local_tips`.
    pub fn new(objects: Arc<dyn ObjectStore>, wants: Vec<Sum>, local_tips: &[Sum]) -> Result<Self> {
        let mut haves = CommitsQueue::new(objects);
        haves.seed(local_tips)?;
        Ok(Self {
            wants,
            haves,
            haves_per_round: HAVES_PER_ROUND,
            max_haves: MAX_HAVES,
            sent_haves: 0,
            done: false,
            stats: NegotiationStats::default(),
        })
    }

    /// Overrides the per-round and total haves limits.
    pub fn with_limits(mut self, haves_per_round: usize, max_haves: usize) -> Self {
        self.haves_per_round = haves_per_round.max(1);
        self.max_haves = max_haves;
        self
    }

    fn next_haves(&mut self) -> Result<Vec<Sum>> {
        let mut haves = Vec::new();
        while !self.done && haves.len() < self.haves_per_round {
            if self.sent_haves >= self.max_haves {
                self.done = true;
                break;
            }
            match self.haves.pop_insert_parents()? {
                Some((sum, _)) => {
                    haves.push(sum);
                    self.sent_haves += 1;
                }
                None => self.done = true,
            }
        }
        if self.haves.is_empty() || self.sent_haves >= self.max_haves {
            self.done = true;
        }
        Ok(haves)
    }

    /// Runs the negotiation to completion, feeding received objects to `sink`.
    pub async fn start<T, S>(mut self, transport: &mut T, sink: &mut S) -> Result<NegotiationStats>
    where
        T: UploadPackTransport + ?Sized,
        S: ObjectSink + ?Sized,
    {
        if self.wants.is_empty() {
            return Ok(self.stats);
        }

        loop {
            let haves = self.next_haves()?;
            let request = UploadPackRequest {
                wants: std::mem::take(&mut self.wants),
                haves,
                done: self.done,
            };
            self.stats.rounds += 1;
            self.stats.haves += request.haves.len();
            tracing::debug!(
                round = self.stats.rounds,
                wants = request.wants.len(),
                haves = request.haves.len(),
                done = request.done,
                "Sending negotiation round"
            );

            match transport.upload_pack(request.to_bytes()?).await? {
                UploadPackReply::Acks(acks) => {
                    if request.done {
                        return Err(ProtocolError::Protocol(
                            "server acknowledged after done".to_string(),
                        ));
                    }
                    self.haves.remove_ancestors(&acks)?;
                }
                UploadPackReply::Packfile { data, more } => {
                    self.receive_chunks(transport, sink, data, more).await?;
                    tracing::info!(
                        rounds = self.stats.rounds,
                        chunks = self.stats.chunks,
                        objects = self.stats.objects,
                        "Negotiation complete"
                    );
                    return Ok(self.stats);
                }
            }
        }
    }

    async fn receive_chunks<T, S>(
        &mut self,
        transport: &mut T,
        sink: &mut S,
        mut data: Vec<u8>,
        mut more: bool,
    ) -> Result<()>
    where
        T: UploadPackTransport + ?Sized,
        S: ObjectSink + ?Sized,
    {
        loop {
            let mut reader = PackfileReader::new(data.as_slice())?;
            while let Some((object_type, object)) = reader.read_object()? {
                sink.receive(object_type, object)?;
                self.stats.objects += 1;
            }
            self.stats.chunks += 1;
            if !more {
                return Ok(());
            }
            match transport.upload_pack(Vec::new()).await? {
                UploadPackReply::Packfile {
                    data: next,
                    more: next_more,
                } => {
                    data = next;
                    more = next_more;
                }
                UploadPackReply::Acks(_) => {
                    return Err(ProtocolError::Protocol(
                        "expected packfile chunk".to_string(),
                    ))
                }
            }
        }
    }
}

//! The upload-pack (fetch) session.

use crate::packfile::{frame_len, PackfileWriter, HEADER_LEN};
use crate::protocol::{write_acks, UploadPackRequest};
use crate::{ClosedSetsFinder, FinderOutcome, ProtocolError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tably_storage::{ObjectStore, ObjectType, RefStore, Sum};

/// Where an upload-pack session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPackState {
    /// Waiting for the first want/have request.
    Greet,
    /// ACKs were sent; waiting for more haves.
    Negotiate,
    /// Streaming packfile chunks.
    SendPackfile,
    /// Everything was sent.
    Done,
}

/// What to send back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPackResponse {
    /// An encoded ACK/NAK block.
    Acks(Vec<u8>),
    /// One self-contained packfile chunk.
    Packfile { data: Vec<u8>, more: bool },
}

/// State of one fetch, kept across requests.
pub struct UploadPackSession {
    objects: Arc<dyn ObjectStore>,
    finder: ClosedSetsFinder,
    state: UploadPackState,
    plan: VecDeque<(ObjectType, Sum)>,
    max_packfile_size: usize,
    rounds: usize,
    chunks_sent: usize,
    objects_sent: usize,
}

impl UploadPackSession {
    /// Creates a session in the greeting state.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
        max_packfile_size: usize,
    ) -> Self {
        Self {
            finder: ClosedSetsFinder::new(objects.clone(), refs),
            objects,
            state: UploadPackState::Greet,
            plan: VecDeque::new(),
            max_packfile_size,
            rounds: 0,
            chunks_sent: 0,
            objects_sent: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> UploadPackState {
        self.state
    }

    /// Returns true once the session has nothing left to send.
    pub fn is_terminal(&self) -> bool {
        self.state == UploadPackState::Done
    }

    /// Want/have requests processed so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Packfile chunks sent so far.
    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    /// Objects sent so far.
    pub fn objects_sent(&self) -> usize {
        self.objects_sent
    }

    /// Advances the session with one request body.
    ///
    /// On error the state is left unchanged.
    pub fn handle(&mut self, body: &[u8]) -> Result<UploadPackResponse> {
        let (next, response) = match self.state {
            UploadPackState::Greet => {
                let request = UploadPackRequest::parse(body)?;
                if request.wants.is_empty() {
                    return Err(ProtocolError::BadRequest("empty wants list".to_string()));
                }
                self.negotiate(request)?
            }
            UploadPackState::Negotiate => self.negotiate(UploadPackRequest::parse(body)?)?,
            UploadPackState::SendPackfile => {
                if !body.is_empty() {
                    return Err(ProtocolError::BadRequest(
                        "unexpected body while sending packfile".to_string(),
                    ));
                }
                self.next_chunk()?
            }
            UploadPackState::Done => {
                return Err(ProtocolError::Protocol(
                    "upload-pack session already finished".to_string(),
                ))
            }
        };
        tracing::debug!(from = ?self.state, to = ?next, "Upload-pack transition");
        self.state = next;
        Ok(response)
    }

    fn negotiate(
        &mut self,
        request: UploadPackRequest,
    ) -> Result<(UploadPackState, UploadPackResponse)> {
        let outcome = self
            .finder
            .process(&request.wants, &request.haves, request.done)?;
        self.rounds += 1;
        match outcome {
            FinderOutcome::Acks(acks) => {
                let mut out = Vec::new();
                write_acks(&mut out, &acks)?;
                Ok((UploadPackState::Negotiate, UploadPackResponse::Acks(out)))
            }
            FinderOutcome::Ready => {
                self.plan = self.finder.object_plan()?;
                tracing::info!(objects = self.plan.len(), "Negotiation finished, sending packfile");
                self.next_chunk()
            }
        }
    }

    /// Writes as many planned objects as fit in one chunk, at least one.
    fn next_chunk(&mut self) -> Result<(UploadPackState, UploadPackResponse)> {
        let mut writer = PackfileWriter::new(Vec::new())?;
        let mut count = 0usize;
        while let Some((object_type, sum)) = self.plan.front().copied() {
            let data = self.objects.get(object_type, &sum)?.ok_or_else(|| {
                tably_storage::StorageError::NotFound {
                    kind: object_type.as_str(),
                    sum: sum.to_hex(),
                }
            })?;
            if writer.bytes_written() > HEADER_LEN
                && writer.bytes_written() + frame_len(data.len()) > self.max_packfile_size
            {
                break;
            }
            writer.write_object(object_type, &data)?;
            self.plan.pop_front();
            count += 1;
        }

        let data = writer.finish()?;
        let more = !self.plan.is_empty();
        self.chunks_sent += 1;
        self.objects_sent += count;
        tracing::debug!(
            chunk = self.chunks_sent,
            objects = count,
            bytes = data.len(),
            remaining = self.plan.len(),
            "Sending packfile chunk"
        );

        let next = if more {
            UploadPackState::SendPackfile
        } else {
            UploadPackState::Done
        };
        Ok((next, UploadPackResponse::Packfile { data, more }))
    }
}

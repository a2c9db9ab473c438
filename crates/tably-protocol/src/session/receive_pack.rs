//! The receive-pack (push) session.

use crate::pktline::PktLineReader;
use crate::protocol::{parse_updates, write_continue, write_report};
use crate::{ObjectReceiver, ProtocolError, RefUpdater, Result, Update};
use std::sync::Arc;
use tably_storage::ObjectStore;

/// Where a receive-pack session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePackState {
    /// Waiting for the update lines.
    Greet,
    /// Waiting for more packfile data.
    ReceiveObjects,
    /// The status report was sent.
    Done,
}

/// What to send back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivePackResponse {
    /// More objects are needed; the body is `unpack ok` / `continue`.
    Continue(Vec<u8>),
    /// The final status report and the updates it describes.
    Report { body: Vec<u8>, updates: Vec<Update> },
}

/// State of one push, kept across requests.
pub struct ReceivePackSession {
    objects: Arc<dyn ObjectStore>,
    updater: RefUpdater,
    state: ReceivePackState,
    updates: Vec<Update>,
    receiver: Option<ObjectReceiver>,
}

impl ReceivePackSession {
    /// Creates a session in the greeting state.
    pub fn new(objects: Arc<dyn ObjectStore>, updater: RefUpdater) -> Self {
        Self {
            objects,
            updater,
            state: ReceivePackState::Greet,
            updates: Vec::new(),
            receiver: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReceivePackState {
        self.state
    }

    /// Returns true once the status report was sent.
    pub fn is_terminal(&self) -> bool {
        self.state == ReceivePackState::Done
    }

    /// Objects stored by this session so far.
    pub fn objects_received(&self) -> usize {
        self.receiver.as_ref().map_or(0, ObjectReceiver::received)
    }

    /// Advances the session with one request body.
    ///
    /// A follow-up request with an empty body ends the upload and forces
    /// the status report, even if objects are still missing.
    pub fn handle(&mut self, body: &[u8]) -> Result<ReceivePackResponse> {
        let (next, response) = match self.state {
            ReceivePackState::Greet => self.greet(body)?,
            ReceivePackState::ReceiveObjects => {
                if body.is_empty() {
                    self.report()?
                } else {
                    self.receive(body)?
                }
            }
            ReceivePackState::Done => {
                return Err(ProtocolError::Protocol(
                    "receive-pack session already finished".to_string(),
                ))
            }
        };
        tracing::debug!(from = ?self.state, to = ?next, "Receive-pack transition");
        self.state = next;
        Ok(response)
    }

    fn greet(&mut self, body: &[u8]) -> Result<(ReceivePackState, ReceivePackResponse)> {
        let mut reader = PktLineReader::new(body);
        let updates = parse_updates(&mut reader)?;
        if updates.is_empty() {
            return Err(ProtocolError::BadRequest("no ref updates".to_string()));
        }
        let packfile = reader.into_inner();

        let wanted: Vec<_> = updates.iter().filter_map(|u| u.sum).collect();
        let mut receiver = ObjectReceiver::new(self.objects.clone(), wanted)?;
        if !packfile.is_empty() {
            receiver.receive_packfile(packfile)?;
        }
        tracing::info!(
            updates = updates.len(),
            received = receiver.received(),
            pending = receiver.pending(),
            "Receive-pack greeting"
        );
        self.updates = updates;
        let complete = receiver.is_complete();
        self.receiver = Some(receiver);

        if complete {
            self.report()
        } else {
            Self::ask_for_more()
        }
    }

    fn receive(&mut self, body: &[u8]) -> Result<(ReceivePackState, ReceivePackResponse)> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(ProtocolError::Protocol("no pending push".to_string()));
        };
        receiver.receive_packfile(body)?;
        if receiver.is_complete() {
            self.report()
        } else {
            Self::ask_for_more()
        }
    }

    fn ask_for_more() -> Result<(ReceivePackState, ReceivePackResponse)> {
        let mut out = Vec::new();
        write_continue(&mut out)?;
        Ok((
            ReceivePackState::ReceiveObjects,
            ReceivePackResponse::Continue(out),
        ))
    }

    fn report(&mut self) -> Result<(ReceivePackState, ReceivePackResponse)> {
        let mut updates = std::mem::take(&mut self.updates);
        self.updater.apply_all(&mut updates)?;
        let mut body = Vec::new();
        write_report(&mut body, &updates)?;

        let rejected = updates.iter().filter(|u| !u.is_ok()).count();
        tracing::info!(
            updates = updates.len(),
            rejected,
            objects = self.objects_received(),
            "Receive-pack finished"
        );
        Ok((
            ReceivePackState::Done,
            ReceivePackResponse::Report { body, updates },
        ))
    }
}

//! Transfer protocol for Tably repositories.
//!
//! This crate holds the transport-agnostic half of fetch and push: the
//! pkt-line and packfile codecs, the want/have negotiation on both sides,
//! the upload-pack and receive-pack session state machines, and the rules
//! for applying pushed ref updates. HTTP plumbing lives in `tably-node`
//! (server) and `tably-client` (client).

mod error;
mod finder;
mod negotiator;
pub mod packfile;
pub mod pktline;
pub mod protocol;
mod receiver;
mod refspec;
mod refupdate;
pub mod session;
mod sumset;
mod walker;

#[cfg(test)]
mod testutil;

pub use error::ProtocolError;
pub use finder::{ClosedSetsFinder, FinderOutcome};
pub use negotiator::{
    NegotiationStats, Negotiator, ObjectSink, StoreSink, UploadPackReply, UploadPackTransport,
    HAVES_PER_ROUND, MAX_HAVES,
};
pub use packfile::{PackfileReader, PackfileWriter};
pub use pktline::{PktLine, PktLineReader, PktLineWriter};
pub use receiver::ObjectReceiver;
pub use refspec::Refspec;
pub use refupdate::{reason, RefUpdatePolicy, RefUpdater, Update, RECEIVE_PACK_ACTION};
pub use session::{
    ReceivePackResponse, ReceivePackSession, ReceivePackState, UploadPackResponse,
    UploadPackSession, UploadPackState,
};
pub use sumset::SumSet;
pub use walker::{is_ancestor_of, CommitsQueue};

/// Result type for transfer protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

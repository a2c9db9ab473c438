//! Server-side transfer sessions.
//!
//! A fetch or push can span several HTTP requests. Each session is a
//! closed set of states driven by [`UploadPackSession::handle`] or
//! [`ReceivePackSession::handle`], one call per request body. The caller
//! keeps the session alive between requests and drops it once
//! `is_terminal` reports true.

mod receive_pack;
mod upload_pack;

pub use receive_pack::{ReceivePackResponse, ReceivePackSession, ReceivePackState};
pub use upload_pack::{UploadPackResponse, UploadPackSession, UploadPackState};

/// Default upper bound on one packfile chunk, in bytes.
pub const DEFAULT_MAX_PACKFILE_SIZE: usize = 16 * 1024 * 1024;

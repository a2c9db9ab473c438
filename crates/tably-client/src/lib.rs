//! HTTP client for Tably nodes.
//!
//! [`fetch`] pulls history from a node into local stores and moves local
//! tracking refs; [`push`] sends local history and asks the node to move
//! its refs. Both speak the smart HTTP protocol implemented by
//! `tably-node`, threading session cookies across requests.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tably_client::{fetch, ClientConfig, RemoteClient};
//! use tably_storage::{MemoryRefStore, MemoryStore};
//!
//! # async fn run() -> tably_client::Result<()> {
//! let remote = RemoteClient::new("http://127.0.0.1:8080", ClientConfig::default())?;
//! let outcome = fetch(
//!     &remote,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryRefStore::new()),
//!     "origin",
//!     &[],
//! )
//! .await?;
//! println!("{} refs updated", outcome.updates.len());
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod fetch;
mod push;
mod remote;

#[cfg(test)]
mod testutil;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use fetch::{apply_fetch, fetch, plan_fetch, FetchOutcome, FETCH_ACTION, NON_FAST_FORWARD};
pub use push::{apply_statuses, next_chunk, plan_push, push, push_updates, NO_STATUS};
pub use remote::{session_cookie, HttpUploadPack, RemoteClient};

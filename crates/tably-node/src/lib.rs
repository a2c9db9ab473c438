//! # Tably Node
//!
//! Server side of the Tably transfer protocol. A node holds one
//! repository of versioned tables and lets clients fetch from it and push
//! to it over smart HTTP.
//!
//! ```text
//!   GET  /info/refs/     ref advertisement
//!   POST /upload-pack/   want/have negotiation, then packfile chunks
//!   POST /receive-pack/  ref updates and packfile data, then status report
//!   GET  /health         liveness
//!   GET  /metrics        Prometheus text
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Router, handlers and cookie threading
//! - [`sessions`] - Registry of in-flight upload-pack/receive-pack sessions
//! - [`config`] - Node configuration
//! - [`observability`] - Structured logging, metrics, and request tracing
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tably_node::api::{create_router, AppState};
//! use tably_node::config::NodeConfig;
//! use tably_storage::{MemoryRefStore, MemoryStore};
//!
//! let config = NodeConfig::default();
//! let state = AppState::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryRefStore::new()),
//!     &config.transfer,
//!     config.reflog.actor(),
//! );
//! let app = create_router(state);
//! ```

pub mod api;
pub mod config;
pub mod observability;
pub mod sessions;

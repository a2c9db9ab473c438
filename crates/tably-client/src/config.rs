//! Client configuration.

use std::time::Duration;
use tably_protocol::session::DEFAULT_MAX_PACKFILE_SIZE;
use tably_storage::Actor;

/// Settings for a [`RemoteClient`](crate::RemoteClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on one pushed packfile chunk, in bytes.
    pub max_packfile_size: usize,
    /// Timeout for each HTTP request.
    pub timeout: Duration,
    /// Identity recorded in local reflog entries written by fetch.
    pub actor: Actor,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_packfile_size: DEFAULT_MAX_PACKFILE_SIZE,
            timeout: Duration::from_secs(30),
            actor: Actor::new("tably", "tably@localhost"),
            user_agent: format!("tably-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

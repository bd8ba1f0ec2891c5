//! strongbox-core - Shared functionality for the strongbox tools
//!
//! Well-known paths, the persisted configuration, process liveness checks
//! and the single-instance lifecycle of the detached API server.

pub mod config;
pub mod daemon;
pub mod paths;
pub mod process;

pub use config::Config;
pub use daemon::{Daemon, DaemonError, DaemonStatus};
pub use paths::Paths;

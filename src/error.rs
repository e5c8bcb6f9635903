//! Unified error handling for svsd.
//!
//! User mistakes never become `Err` values: command handlers reply with a
//! localized notice and return a flood cost. Recoverable infrastructure
//! errors are retried at their own layer. Anything reaching `main`
//! through [`FatalError`] broadcasts, closes the database and exits 1.

use thiserror::Error;

/// Errors from the uplink link layer.
///
/// All of these put the link back into DISCONNECTED and arm the
/// reconnect timer; none of them terminate the process.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("protocol error: {0}")]
    Proto(#[from] svs_proto::ProtoError),

    #[error("no data from uplink within ping window")]
    PingTimeout,

    #[error("uplink closed the connection")]
    Eof,
}

/// Fatal conditions: broadcast, close the database, exit 1.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("services fight: nick collision at TS<=1 on {0}")]
    ServicesFight(String),

    #[error("database failure: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
}

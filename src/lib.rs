pub mod activity;
pub mod archive;
mod commands;
pub mod config;
mod db;
pub mod error;
pub mod membership;
pub mod models;
mod notifications;
pub mod position;
mod store;

pub use activity::{EventSink, NewActivity, NewNotification, SqliteEventSink};
pub use commands::order::ScopeRef;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use membership::{Capability, Target};
pub use position::{OrderReport, SiblingOrder};
pub use store::Store;

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "trellis=info,trellis_lib=info";

/// Installs the global `tracing` subscriber. `filter` wins over `RUST_LOG`.
pub fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

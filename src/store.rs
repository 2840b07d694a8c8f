use rusqlite::Connection;
use tracing::info;

use crate::activity::{EventSink, SqliteEventSink};
use crate::config::Config;
use crate::db;
use crate::error::Result;

/// Entry point for every operation. Each call runs in its own transaction.
pub struct Store {
    pub(crate) conn: Connection,
    pub(crate) events: Box<dyn EventSink>,
}

impl Store {
    pub fn open(config: &Config) -> Result<Self> {
        let conn = db::open_db(config)?;
        info!(path = %config.db_path.display(), "store opened");
        Ok(Store {
            conn,
            events: Box::new(SqliteEventSink),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Store {
            conn: db::open_in_memory()?,
            events: Box::new(SqliteEventSink),
        })
    }

    /// Replaces the default table-backed sink.
    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish_non_exhaustive()
    }
}

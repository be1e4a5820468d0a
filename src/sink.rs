//! Record sinks. Each one takes a single record per call; a failure affects
//! only that record.

mod api;
mod sheet;
mod sql;

use async_trait::async_trait;

use crate::config::{SinkConfig, SinkKind};
use crate::models::ProfileRecord;

pub use api::ApiSink;
pub use sheet::SheetSink;
pub use sql::SqliteSink;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected record with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("sink is not configured: {0}")]
    Config(String),
    #[error("{0} lock poisoned by an earlier panic")]
    Poisoned(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Stored,
    /// The sink already holds this detail URL and left it untouched.
    AlreadyPresent,
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, record: &ProfileRecord) -> Result<SinkOutcome, SinkError>;
}

pub fn build_sink(config: &SinkConfig) -> Result<Box<dyn RecordSink>, SinkError> {
    Ok(match config.kind {
        SinkKind::Api => Box::new(ApiSink::from_config(config)?),
        SinkKind::Sheet => Box::new(SheetSink::open(&config.sheet_path, config.sheet_format)?),
        SinkKind::Sqlite => Box::new(SqliteSink::open(&config.sqlite_path)?),
    })
}

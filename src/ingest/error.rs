//! Error types for the ingest bridge.
//!
//! Every variant is terminal for one message only.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload is not a JSON object or a known field has the wrong type.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Appending to the local log failed.
    #[error("local log {path}: {source}")]
    LocalLog {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Remote submission queue is at capacity; the record was dropped.
    #[error("remote submission queue is full")]
    QueueFull,

    /// Remote workers have shut down.
    #[error("remote submission queue is closed")]
    QueueClosed,
}

/// Failure reported by a remote sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("insert rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("configuration error: {0}")]
    Config(String),
}

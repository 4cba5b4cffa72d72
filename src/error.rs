// src/error.rs
//! Error taxonomy of the polling core. None of these are fatal to the process.

use thiserror::Error;

/// A content/feed source was unreachable or returned malformed data.
#[derive(Debug, Error)]
pub enum SourceFetchError {
    #[error("http request to {source_name} failed: {message}")]
    Http { source_name: String, message: String },
    #[error("{source_name} answered with HTTP {status}")]
    Status { source_name: String, status: u16 },
    #[error("could not parse {source_name} payload: {message}")]
    Parse { source_name: String, message: String },
    #[error("source {source_name} is misconfigured: {message}")]
    Config { source_name: String, message: String },
}

/// The notification sink failed to deliver a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Http(String),
    #[error("destination answered with HTTP {0}")]
    Status(u16),
    #[error("delivery worker is gone")]
    Closed,
    #[error("destination rejected message: {0}")]
    Rejected(String),
}

/// Persistence read/write failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store (de)serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Why a poll cycle did not run.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CycleError {
    #[error("a {0} poll cycle is already running")]
    AlreadyRunning(&'static str),
}

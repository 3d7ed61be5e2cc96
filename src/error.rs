//! Error types for the CoreStage engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the CoreStage engine
#[derive(Error, Debug)]
pub enum Error {
    /// Parameter rejected at operation entry
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Positioned read/write failure with offset context
    #[error("I/O error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Fatal startup error (file open, thread create)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an I/O error with the block offset it occurred at
    pub fn io_at(offset: u64, source: std::io::Error) -> Self {
        Error::Io { offset, source }
    }
}

use thiserror::Error;

/// Failure of a whole decode pass. Individual bad records are skipped, not reported.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unrecognized pcap magic: {0:#010x}")]
    InvalidMagic(u32),

    #[error("capture too short for a pcap magic number ({0} bytes)")]
    TruncatedHeader(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An input source that could not be read at all
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

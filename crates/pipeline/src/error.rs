use carousel_core::SourceError;

/// Failures that abort a whole load cycle.
///
/// Per-record and per-field failures never surface here; they degrade to
/// empty slide fields inside the cycle.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Load cycle cancelled")]
    Cancelled,
}

/// Why an image URL could not be verified.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image request returned status {0}")]
    Status(u16),

    #[error("Payload is not a decodable image: {0}")]
    Decode(String),

    #[error("Unsupported image URL: {0}")]
    Unsupported(String),
}

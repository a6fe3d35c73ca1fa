use carousel_core::ConfigError;
use carousel_pipeline::ProbeError;

/// Failures surfaced by the worker runtime and its settings.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Page {0} is no longer running")]
    PageClosed(String),

    #[error("Invalid setting {name}: {reason}")]
    Setting { name: &'static str, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Fixture could not be read: {0}")]
    Fixture(String),
}

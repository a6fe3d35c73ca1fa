/// Failures reported by a [`DataSource`](crate::source::DataSource) or one of
/// its table/view/field handles.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("No active table")]
    NoActiveTable,

    #[error("Value unavailable for record {record_id} in field {field_id}")]
    ValueUnavailable { field_id: String, record_id: String },

    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

/// Failures loading, parsing, validating, or persisting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config must be a JSON object")]
    NotAnObject,

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Duplicate page id: {0}")]
    DuplicatePageId(String),
}

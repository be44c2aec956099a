use thiserror::Error;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Schema mismatch: field '{field}' is not declared on model '{model}'")]
    SchemaMismatch { model: String, field: String },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Connection pool exhausted after waiting {0} ms")]
    PoolExhausted(u64),

    #[error("Connection pool closed")]
    PoolClosed,

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AdapterError {
    /// Short error kind name, stable across message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::UnknownModel(_) => "unknown_model",
            AdapterError::SchemaMismatch { .. } => "schema_mismatch",
            AdapterError::UnsupportedOperator(_) => "unsupported_operator",
            AdapterError::InvalidValue { .. } => "invalid_value",
            AdapterError::InvalidPagination(_) => "invalid_pagination",
            AdapterError::Transport(_) => "transport_error",
            AdapterError::WriteConflict(_) => "write_conflict",
            AdapterError::PoolExhausted(_) => "pool_exhausted",
            AdapterError::PoolClosed => "pool_closed",
            AdapterError::Timeout(_) => "timeout",
            AdapterError::Config(_) => "config_error",
        }
    }

    /// Errors raised while compiling a query, before any connection is touched.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            AdapterError::UnknownModel(_)
                | AdapterError::SchemaMismatch { .. }
                | AdapterError::UnsupportedOperator(_)
                | AdapterError::InvalidValue { .. }
                | AdapterError::InvalidPagination(_)
        )
    }

    pub(crate) fn schema_mismatch(model: &str, field: &str) -> Self {
        AdapterError::SchemaMismatch {
            model: model.to_string(),
            field: field.to_string(),
        }
    }
}

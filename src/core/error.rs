use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Schema violation in '{partition}' line {line}: {message}")]
    SchemaValidation {
        partition: String,
        line: usize,
        message: String,
    },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unbalanced transaction: {0}")]
    UnbalancedTransaction(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// Shorthand for codec and store errors that must name the offending
    /// partition and line.
    pub fn schema(partition: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            partition: partition.into(),
            line,
            message: message.into(),
        }
    }
}

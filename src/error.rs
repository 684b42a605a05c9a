use thiserror::Error;

/// Convenience result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Failures that abort a validation or import call as a whole.
///
/// Row-level data problems never show up here; they are collected as
/// warnings/errors on the validation result instead.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The input could not be parsed as a table. Raised before any store access.
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    /// Any store failure inside the import transaction. The message is the
    /// store's own, passed through untouched.
    #[error("{0}")]
    Store(#[from] rusqlite::Error),

    #[error("credential hashing failed: {0}")]
    Credential(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no valid records to import")]
    NoValidRecords,
}

impl ImportError {
    /// Stable code reported on the IPC envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::SourceUnreadable(_) => "source_unreadable",
            ImportError::Store(_) => "transaction_failed",
            ImportError::Credential(_) => "credential_failed",
            ImportError::Config(_) => "bad_config",
            ImportError::NoValidRecords => "no_valid_records",
        }
    }
}

impl From<csv::Error> for ImportError {
    fn from(e: csv::Error) -> Self {
        ImportError::SourceUnreadable(e.to_string())
    }
}

#[cfg(feature = "excel")]
impl From<calamine::Error> for ImportError {
    fn from(e: calamine::Error) -> Self {
        ImportError::SourceUnreadable(e.to_string())
    }
}

/// Shared error type used across all coderelay crates.
///
/// The variants follow the failure taxonomy of the session directory and the
/// runners: lookups that miss, writes that would rebind a token, operator
/// misconfiguration, and external process failures.  Corrupt state on read
/// paths never reaches this type; it degrades to an empty default instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration: {0}")]
    Configuration(String),

    /// Displayed verbatim so the process's own diagnostics reach the user.
    #[error("{0}")]
    ExternalProcess(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

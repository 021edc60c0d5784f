pub mod config;
pub mod deck;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod skills;
pub mod store;
pub mod workflow;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Rate limited: {0}")]
    RateLimit(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Checkpoint store error: {0}")]
    Store(String),
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Run lock lost: {0}")]
    LockLost(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Run already active: {0}")]
    AlreadyRunning(String),
    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),
    #[error("Run cancelled: {0}")]
    Cancelled(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors worth retrying under a step's retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::RateLimit(_))
    }

    /// Errors raised by the checkpoint store; fatal to a run.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Sqlx(_) | Error::Migrate(_))
    }

    /// Stable name of the error class, recorded in failure checkpoints.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Provider(_) => "provider",
            Error::RateLimit(_) => "rate_limit",
            Error::Validation(_) => "validation",
            Error::MalformedResponse(_) => "malformed_response",
            Error::Store(_) | Error::Sqlx(_) | Error::Migrate(_) => "store",
            Error::LockLost(_) => "lock_lost",
            Error::NotFound(_) => "not_found",
            Error::AlreadyRunning(_) => "already_running",
            Error::CorruptCheckpoint(_) => "corrupt_checkpoint",
            Error::Cancelled(_) => "cancelled",
            Error::Template(_) => "template",
            Error::Io(_) => "io",
            Error::SerdeJson(_) | Error::SerdeYaml(_) | Error::Uuid(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<tera::Error> for Error {
    fn from(e: tera::Error) -> Self {
        // tera nests the useful message in the source chain
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Error::Template(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Provider("503".into()).is_transient());
        assert!(Error::RateLimit("429".into()).is_transient());
        assert!(!Error::Validation("bad".into()).is_transient());
        assert!(!Error::MalformedResponse("not json".into()).is_transient());
        assert!(!Error::Store("disk full".into()).is_transient());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::RateLimit("x".into()).kind(), "rate_limit");
        assert_eq!(Error::Store("x".into()).kind(), "store");
        assert!(Error::Store("x".into()).is_store_failure());
        assert!(!Error::Provider("x".into()).is_store_failure());
    }
}

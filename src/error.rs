//! Error taxonomy shared by the indexer, the facades, and the HTTP layer.

use thiserror::Error;

/// Every failure the library reports.
///
/// `Configuration` and `EmptyCorpus` are raised before any index mutation.
/// `Persistence` aborts a refresh or rebuild. `Generation` is skipped per
/// document during upserts and is folded into an answer-shaped result by the
/// query and chat facades.
#[derive(Debug, Error)]
pub enum NexusError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no documents found in the configured input directories")]
    EmptyCorpus,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NexusError>;

impl NexusError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn generation(err: impl std::fmt::Display) -> Self {
        Self::Generation(err.to_string())
    }

    /// Short machine-readable code, used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::EmptyCorpus => "empty_corpus",
            Self::Persistence(_) => "persistence",
            Self::Generation(_) => "generation",
            Self::Io(_) => "io",
        }
    }
}

impl From<sqlx::Error> for NexusError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for NexusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(NexusError::EmptyCorpus.code(), "empty_corpus");
        assert_eq!(NexusError::config("x").code(), "configuration");
        assert_eq!(NexusError::generation("boom").to_string(), "generation error: boom");
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid source {source_key}: {reason}")]
    InvalidSource { source_key: String, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DomainError {
    pub fn invalid_source(source_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            source_key: source_key.into(),
            reason: reason.into(),
        }
    }
}

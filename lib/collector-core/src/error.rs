use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Error, Debug)]
pub enum CollectorError {
    /// The stored object changed since it was read (optimistic concurrency)
    #[error("Write conflict on {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::error::Error),
}

impl CollectorError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CollectorError::Conflict(_))
    }
}

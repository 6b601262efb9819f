use thiserror::Error;

use stockline_core::{DomainError, ErrorKind};

use crate::catalog::BlobError;
use crate::store::StoreError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure of an infrastructure-level operation.
///
/// Either the domain refused (deterministic, never retried), the store
/// failed (some of which are transient) or blob IO failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Domain(e) => e.kind(),
            ServiceError::Store(StoreError::Conflict(_) | StoreError::Unique(_)) => {
                ErrorKind::Conflict
            }
            ServiceError::Store(_) | ServiceError::Blob(_) => ErrorKind::Storage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Store(e) if e.is_retryable())
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, ServiceError::Store(StoreError::Unique(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_are_retryable_domain_errors_are_not() {
        let conflict = ServiceError::from(StoreError::Conflict("products/1".into()));
        assert!(conflict.is_retryable());
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let domain = ServiceError::from(DomainError::insufficient_stock("A", 2, 1));
        assert!(!domain.is_retryable());
        assert_eq!(domain.kind().code(), "insufficient_stock");
    }

    #[test]
    fn backend_failures_report_storage_kind() {
        let err = ServiceError::from(StoreError::Backend("pool closed".into()));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("pool closed"));
    }
}

//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic, business-level failures only. Storage and transport
/// failures are modelled in the infrastructure crate and wrap this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The current status does not permit the requested transition.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The order has already been cancelled.
    #[error("order {0} is already cancelled")]
    AlreadyCancelled(String),

    /// The ledger floor would be violated.
    #[error("insufficient stock for product {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: i64,
        available: i64,
    },

    /// A reconciliation row lacks one of the fields every product needs.
    #[error("missing required fields: {0}")]
    MissingRequiredFields(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An import source could not be opened or contained nothing to process.
    #[error("import source unusable: {0}")]
    StructuralImportFailure(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness or optimistic concurrency conflict.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Stable, machine-readable error category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTransition,
    AlreadyCancelled,
    InsufficientStock,
    MissingRequiredFields,
    NotFound,
    StructuralImportFailure,
    Validation,
    Conflict,
    Storage,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::AlreadyCancelled => "already_cancelled",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::MissingRequiredFields => "missing_required_fields",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StructuralImportFailure => "structural_import_failure",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl DomainError {
    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn insufficient_stock(sku: impl Into<String>, requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            sku: sku.into(),
            requested,
            available,
        }
    }

    pub fn missing_fields(msg: impl Into<String>) -> Self {
        Self::MissingRequiredFields(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        Self::StructuralImportFailure(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            DomainError::AlreadyCancelled(_) => ErrorKind::AlreadyCancelled,
            DomainError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            DomainError::MissingRequiredFields(_) => ErrorKind::MissingRequiredFields,
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::StructuralImportFailure(_) => ErrorKind::StructuralImportFailure,
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::Conflict(_) => ErrorKind::Conflict,
        }
    }
}

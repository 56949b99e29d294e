//! Domain error taxonomy shared by the application modules.

use bookswap_db::StoreError;
use bookswap_http::AppError;
use serde_json::json;
use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("catalog unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("paired update on {key} left unreconciled: {reason}")]
    PartialFailure { key: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DomainError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl From<CatalogError> for DomainError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(isbn) => {
                DomainError::NotFound(format!("catalog entry '{isbn}'"))
            }
            CatalogError::Unavailable(reason) => DomainError::UpstreamUnavailable(reason),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        let message = err.to_string();
        match err {
            DomainError::NotFound(_) => AppError::not_found(message),
            DomainError::Conflict(_) => AppError::conflict(vec![], message),
            DomainError::Validation { field, reason } => {
                AppError::validation(vec![json!({ "field": field, "error": reason })], message)
            }
            DomainError::UpstreamUnavailable(_) => AppError::unavailable(message),
            DomainError::PartialFailure { .. } => AppError::partial_failure(message),
            DomainError::Store(store) => AppError::Internal(anyhow::Error::new(store)),
        }
    }
}

/// Catalog identifiers: trimmed, non-empty, ASCII letters, digits and hyphens.
pub fn catalog_id(raw: &str) -> Result<String, DomainError> {
    let isbn = raw.trim();
    if isbn.is_empty() {
        return Err(DomainError::validation("isbn", "must not be empty"));
    }
    if isbn.len() > 32 {
        return Err(DomainError::validation("isbn", "longer than 32 characters"));
    }
    if !isbn.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(DomainError::validation(
            "isbn",
            "only letters, digits and hyphens are allowed",
        ));
    }
    Ok(isbn.to_string())
}

/// Trimmed, non-empty text field.
pub fn required(field: &'static str, raw: &str) -> Result<String, DomainError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(DomainError::validation(field, "must not be empty"));
    }
    Ok(value.to_string())
}

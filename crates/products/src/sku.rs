//! SKU normalisation and synthesis.

use stockline_core::{DomainError, DomainResult};

/// Trim a SKU and reject empty or whitespace-bearing values.
pub fn normalize_sku(raw: &str) -> DomainResult<String> {
    let sku = raw.trim();
    if sku.is_empty() {
        return Err(DomainError::validation("sku cannot be empty"));
    }
    if sku.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!("sku cannot contain whitespace: {sku:?}")));
    }
    Ok(sku.to_string())
}

/// Candidate SKUs for a variant that arrived without one: `PARENT-1`,
/// `PARENT-2`, ...
///
/// Callers take the first candidate the store does not already hold.
pub fn variant_sku_candidates(parent_sku: &str) -> impl Iterator<Item = String> + '_ {
    (1u64..).map(move |n| format!("{parent_sku}-{n}"))
}

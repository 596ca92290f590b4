//! API handlers module

pub mod catalog;
pub mod ebooks;
pub mod health;
pub mod webhooks;

use nexora_common::errors::{AppError, Result};
use validator::Validate;

/// Run derive-based validation on a request body
pub(crate) fn validate_body<T: Validate>(body: &T) -> Result<()> {
    Ok(body.validate()?)
}

/// Unwrap an optional body or query field, reporting it by its wire name
pub(crate) fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| AppError::MissingField {
        field: field.to_string(),
    })
}

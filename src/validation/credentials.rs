use crate::error::{AppError, Result};

/// Most identifiers a single batch request may name.
pub const MAX_BATCH_SIZE: usize = 500;

/// Validates a portal identifier (roll number).
///
/// # Arguments
///
/// * `identifier` - The identifier to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the identifier is valid.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.trim().is_empty() {
        return Err(AppError::Validation(
            "Missing username".to_string(),
        ));
    }

    if identifier.len() > 64 {
        return Err(AppError::Validation(
            "Username must be at most 64 characters".to_string(),
        ));
    }

    if !identifier.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::Validation(
            "Username can only contain letters and numbers".to_string(),
        ));
    }

    Ok(())
}

/// Validates a portal secret.
pub fn validate_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(AppError::Validation(
            "Missing password".to_string(),
        ));
    }

    if secret.len() > 128 {
        return Err(AppError::Validation(
            "Password must be at most 128 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates the identifier list of a batch request.
pub fn validate_batch(identifiers: &[String]) -> Result<()> {
    if identifiers.is_empty() {
        return Err(AppError::Validation(
            "Usernames must be a non-empty array".to_string(),
        ));
    }

    if identifiers.len() > MAX_BATCH_SIZE {
        return Err(AppError::Validation(format!(
            "At most {} usernames per batch",
            MAX_BATCH_SIZE
        )));
    }

    identifiers.iter().try_for_each(|id| validate_identifier(id))
}

use crate::crypto::token::is_well_formed_session_id;
use crate::error::{AppError, Result};

/// Validates a session identifier taken from a request path.
///
/// # Arguments
///
/// * `session_id` - The identifier to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the identifier is valid.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(AppError::Validation(
            "Session id cannot be empty".to_string(),
        ));
    }

    if !is_well_formed_session_id(session_id) {
        return Err(AppError::Validation(
            "Session id is malformed".to_string(),
        ));
    }

    Ok(())
}

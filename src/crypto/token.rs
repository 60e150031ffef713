use rand::RngCore;
use rand::rngs::OsRng;
use base64::{Engine as _, engine::general_purpose};

/// The size of a session identifier in bytes (before encoding).
const SESSION_ID_SIZE: usize = 32;

/// The length of an encoded session identifier.
pub const SESSION_ID_LEN: usize = 43;

/// Generates a new random session identifier.
///
/// # Returns
///
/// A URL-safe base64-encoded identifier.
pub fn generate_session_id() -> String {
    let mut token = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut token);

    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

/// Whether `id` has the shape of an identifier produced by [`generate_session_id`].
pub fn is_well_formed_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

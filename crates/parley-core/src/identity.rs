//! Identities and the rules for display names.
//!
//! A display name is whatever the user typed, trimmed. Server and client apply
//! the same normalization so that a client can find itself in a roster by
//! comparing names.

use thiserror::Error;

/// Server-assigned identifier of one transport session. Never reused.
pub type ConnectionId = u64;

/// Author string the server puts on the echo of a sender's own message.
///
/// Reserved: no participant may announce it as a display name, otherwise
/// their messages would be indistinguishable from echoes.
pub const SELF_MARKER: &str = "me";

/// Default upper bound on display name length, in bytes.
pub const DEFAULT_MAX_NAME_LEN: usize = 64;

/// Reasons a display name is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Empty after trimming whitespace.
    #[error("display name is empty")]
    Empty,

    /// Longer than the configured limit.
    #[error("display name is {len} bytes, limit is {max}")]
    TooLong {
        /// Length after trimming
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Collides with [`SELF_MARKER`].
    #[error("display name {0:?} is reserved")]
    Reserved(String),
}

/// Trim `raw` and check it is usable as a display name.
///
/// # Errors
///
/// - `NameError::Empty` for empty or whitespace-only input
/// - `NameError::TooLong` if the trimmed name exceeds `max_len` bytes
/// - `NameError::Reserved` if the trimmed name is [`SELF_MARKER`]
pub fn normalize_name(raw: &str, max_len: usize) -> Result<String, NameError> {
    let name = raw.trim();

    if name.is_empty() {
        return Err(NameError::Empty);
    }

    if name.len() > max_len {
        return Err(NameError::TooLong { len: name.len(), max: max_len });
    }

    if name == SELF_MARKER {
        return Err(NameError::Reserved(name.to_string()));
    }

    Ok(name.to_string())
}

/// Trimmed message text, or `None` if nothing is left to send.
pub fn normalize_text(raw: &str) -> Option<&str> {
    let text = raw.trim();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(normalize_name("  alice \n", 64), Ok("alice".to_string()));
    }

    #[test]
    fn rejects_blank_names() {
        assert_eq!(normalize_name("", 64), Err(NameError::Empty));
        assert_eq!(normalize_name(" \t ", 64), Err(NameError::Empty));
    }

    #[test]
    fn rejects_self_marker() {
        assert_eq!(normalize_name(" me ", 64), Err(NameError::Reserved("me".to_string())));
        assert!(normalize_name("meg", 64).is_ok());
    }

    #[test]
    fn enforces_length_limit() {
        assert!(normalize_name("abcd", 4).is_ok());
        assert_eq!(normalize_name("abcde", 4), Err(NameError::TooLong { len: 5, max: 4 }));
    }

    #[test]
    fn text_normalization() {
        assert_eq!(normalize_text("  hi  "), Some("hi"));
        assert_eq!(normalize_text("   "), None);
    }

    proptest! {
        #[test]
        fn accepted_names_are_fixed_points(raw in ".{0,80}") {
            if let Ok(name) = normalize_name(&raw, DEFAULT_MAX_NAME_LEN) {
                prop_assert_eq!(normalize_name(&name, DEFAULT_MAX_NAME_LEN), Ok(name.clone()));
                prop_assert_eq!(name.trim(), name.as_str());
            }
        }
    }
}

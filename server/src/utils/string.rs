//! String utility functions

/// Maximum length for client-supplied identifiers
pub const MAX_ID_LENGTH: usize = 256;

/// Client identifiers: non-empty, bounded, no control characters
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ID_LENGTH && !id.chars().any(char::is_control)
}

/// Trim and drop empty strings
pub fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("value is too short (min {min}, got {got})")]
    TooShort { min: usize, got: usize },
    #[error("value is too long (max {max}, got {got})")]
    TooLong { max: usize, got: usize },
    #[error("invalid characters")]
    InvalidCharacters,
    #[error("invalid format")]
    InvalidFormat,
}

/// Conversation identifiers are lowercase slugs.
pub fn validate_conversation_identifier(identifier: &str) -> Result<(), ValidationError> {
    let len = identifier.len();
    if len < 1 {
        return Err(ValidationError::TooShort { min: 1, got: len });
    }
    if len > 100 {
        return Err(ValidationError::TooLong { max: 100, got: len });
    }
    if !identifier
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

/// Length is counted in characters, not bytes.
pub fn validate_message_content(content: &str, max: usize) -> Result<(), ValidationError> {
    let len = content.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { max, got: len });
    }
    Ok(())
}

/// Accepts `xx`, `xxx` and an optional region suffix such as `pt-BR`.
pub fn validate_language_code(code: &str) -> Result<(), ValidationError> {
    let mut parts = code.split(['-', '_']);
    let primary = parts.next().unwrap_or_default();
    if !(2..=3).contains(&primary.len()) || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidFormat);
    }
    match (parts.next(), parts.next()) {
        (None, _) => Ok(()),
        (Some(region), None)
            if (2..=4).contains(&region.len())
                && region.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            Ok(())
        }
        _ => Err(ValidationError::InvalidFormat),
    }
}

/// Lowercased primary subtag (`pt-BR` -> `pt`).
pub fn normalize_language_code(code: &str) -> String {
    code.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

//! Input validation helpers.
//!
//! Centralized validation for the handful of formats the API accepts
//! in free-text fields: email addresses (people, users) and asset tags.

use thiserror::Error;

/// Maximum length of an email address per RFC 5321.
const MAX_EMAIL_LENGTH: usize = 254;
/// Maximum length of the local part (before @).
const MAX_LOCAL_PART_LENGTH: usize = 64;

/// Maximum length of an asset tag.
const MAX_ASSET_TAG_LENGTH: usize = 64;

/// Errors from email validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("Email address is empty")]
    Empty,

    #[error("Email address exceeds maximum length of {MAX_EMAIL_LENGTH} characters")]
    TooLong,

    #[error("Email address must contain exactly one '@' symbol")]
    BadAtSymbol,

    #[error("Local part (before @) is empty or too long")]
    BadLocalPart,

    #[error("Domain part (after @) is invalid")]
    BadDomain,

    #[error("Invalid character in email: '{0}'")]
    InvalidChar(char),
}

/// Validates an email address against a practical subset of RFC 5321.
pub fn validate_email(email: &str) -> Result<(), EmailError> {
    if email.is_empty() {
        return Err(EmailError::Empty);
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(EmailError::TooLong);
    }

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(l), Some(d), None) => (l, d),
        _ => return Err(EmailError::BadAtSymbol),
    };

    if local.is_empty() || local.len() > MAX_LOCAL_PART_LENGTH {
        return Err(EmailError::BadLocalPart);
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(EmailError::BadLocalPart);
    }
    for c in local.chars() {
        if !(c.is_ascii_alphanumeric() || "._%+-".contains(c)) {
            return Err(EmailError::InvalidChar(c));
        }
    }

    if domain.is_empty() || !domain.contains('.') {
        return Err(EmailError::BadDomain);
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return Err(EmailError::BadDomain);
    }
    for label in domain.split('.') {
        if label.is_empty() || label.starts_with('-') || label.ends_with('-') {
            return Err(EmailError::BadDomain);
        }
        for c in label.chars() {
            if !(c.is_ascii_alphanumeric() || c == '-') {
                return Err(EmailError::InvalidChar(c));
            }
        }
    }

    Ok(())
}

/// Errors from asset tag validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetTagError {
    #[error("Asset tag is empty")]
    Empty,

    #[error("Asset tag exceeds maximum length of {MAX_ASSET_TAG_LENGTH} characters")]
    TooLong,

    #[error("Invalid character in asset tag: '{0}'. Use letters, digits, and hyphens")]
    InvalidChar(char),
}

/// Validates an asset tag: non-empty, bounded length, alphanumeric
/// with hyphens.
pub fn validate_asset_tag(tag: &str) -> Result<(), AssetTagError> {
    if tag.is_empty() {
        return Err(AssetTagError::Empty);
    }
    if tag.len() > MAX_ASSET_TAG_LENGTH {
        return Err(AssetTagError::TooLong);
    }
    for c in tag.chars() {
        if !(c.is_ascii_alphanumeric() || c == '-') {
            return Err(AssetTagError::InvalidChar(c));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("first.last@example.com").is_ok());
        assert!(validate_email("user+tag@sub.example.org").is_ok());
        assert!(validate_email("x_1%2@example-host.example").is_ok());
    }

    #[test]
    fn test_invalid_emails() {
        assert_eq!(validate_email(""), Err(EmailError::Empty));
        assert_eq!(validate_email("no-at-sign"), Err(EmailError::BadAtSymbol));
        assert_eq!(validate_email("two@@example.com"), Err(EmailError::BadAtSymbol));
        assert_eq!(validate_email("@example.com"), Err(EmailError::BadLocalPart));
        assert_eq!(validate_email(".dot@example.com"), Err(EmailError::BadLocalPart));
        assert_eq!(validate_email("a..b@example.com"), Err(EmailError::BadLocalPart));
        assert_eq!(validate_email("a@nodot"), Err(EmailError::BadDomain));
        assert_eq!(validate_email("a@.example.com"), Err(EmailError::BadDomain));
        assert_eq!(validate_email("a@-bad.example"), Err(EmailError::BadDomain));
        assert!(matches!(
            validate_email("sp ace@example.com"),
            Err(EmailError::InvalidChar(' '))
        ));
    }

    #[test]
    fn test_email_length_limits() {
        let long_local = format!("{}@example.com", "a".repeat(65));
        assert_eq!(validate_email(&long_local), Err(EmailError::BadLocalPart));

        let too_long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(validate_email(&too_long), Err(EmailError::TooLong));
    }

    #[test]
    fn test_valid_asset_tags() {
        assert!(validate_asset_tag("AST-0001").is_ok());
        assert!(validate_asset_tag("KL-C02XK1ZZJGH5").is_ok());
        assert!(validate_asset_tag("x").is_ok());
    }

    #[test]
    fn test_invalid_asset_tags() {
        assert_eq!(validate_asset_tag(""), Err(AssetTagError::Empty));
        assert_eq!(
            validate_asset_tag(&"a".repeat(65)),
            Err(AssetTagError::TooLong)
        );
        assert!(matches!(
            validate_asset_tag("AST 01"),
            Err(AssetTagError::InvalidChar(' '))
        ));
        assert!(matches!(
            validate_asset_tag("AST_01"),
            Err(AssetTagError::InvalidChar('_'))
        ));
    }
}

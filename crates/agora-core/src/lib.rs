#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "agora"
}

/// Oldest client-supplied content timestamp the forum accepts
/// (2023-09-01T00:00:00Z). Anything earlier is a stale or forged form.
pub const MIN_CONTENT_DATE_UNIX: i64 = 1_693_526_400;

const MAX_USERNAME_CHARS: usize = 32;
const MAX_EMAIL_CHARS: usize = 254;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("username is invalid")]
    InvalidUsername,
    #[error("email is invalid")]
    InvalidEmail,
    #[error("content date is too old")]
    ContentDateTooOld,
}

/// Reduced user identity attached to live connections and carried in
/// every payload that names a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStub {
    pub id: i64,
    pub name: String,
}

/// Returns true for the form values the web client submits for an empty
/// field: whitespace-only strings and the literal `undefined`.
#[must_use]
pub fn is_blank(field: &str) -> bool {
    let trimmed = field.trim();
    trimmed.is_empty() || trimmed == "undefined"
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for Username {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_blank(&value) || value.len() > MAX_USERNAME_CHARS {
            return Err(DomainError::InvalidUsername);
        }
        // An '@' would make a username indistinguishable from an email
        // credential key at login time.
        if value.contains('@') || value.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidUsername);
        }
        Ok(Self(value))
    }
}

impl core::fmt::Display for Username {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_email(&value)?;
        Ok(Self(value))
    }
}

/// Returns true when a login credential key should be resolved as an
/// email address rather than a username.
#[must_use]
pub fn looks_like_email(credential_key: &str) -> bool {
    validate_email(credential_key).is_ok()
}

fn validate_email(value: &str) -> Result<(), DomainError> {
    if is_blank(value) || value.len() > MAX_EMAIL_CHARS {
        return Err(DomainError::InvalidEmail);
    }
    let Some((local, domain)) = value.split_once('@') else {
        return Err(DomainError::InvalidEmail);
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(DomainError::InvalidEmail);
    }
    if value.chars().any(char::is_whitespace) {
        return Err(DomainError::InvalidEmail);
    }
    let dot_atoms_ok = domain.split('.').all(|atom| !atom.is_empty());
    if !dot_atoms_ok {
        return Err(DomainError::InvalidEmail);
    }
    Ok(())
}

/// Canonical name for the private chat between two users. The pair is
/// unordered: `chat_pair_name(a, b) == chat_pair_name(b, a)`.
#[must_use]
pub fn chat_pair_name(user_a: i64, user_b: i64) -> String {
    if user_a < user_b {
        format!("{user_a}-{user_b}")
    } else {
        format!("{user_b}-{user_a}")
    }
}

/// Rejects client-supplied timestamps older than the forum's epoch.
///
/// # Errors
/// Returns [`DomainError::ContentDateTooOld`] for timestamps before
/// [`MIN_CONTENT_DATE_UNIX`].
pub fn validate_content_date(date_unix: i64) -> Result<(), DomainError> {
    if date_unix < MIN_CONTENT_DATE_UNIX {
        return Err(DomainError::ContentDateTooOld);
    }
    Ok(())
}

/// Truncates post content to a listing preview, keeping a whole char
/// boundary and appending an ellipsis when anything was cut.
#[must_use]
pub fn content_preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_owned();
    }
    let mut preview: String = content.chars().take(max_chars).collect();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::{
        chat_pair_name, content_preview, is_blank, looks_like_email, project_name,
        validate_content_date, DomainError, EmailAddress, Username, MIN_CONTENT_DATE_UNIX,
    };

    #[test]
    fn project_name_is_stable() {
        assert_eq!(project_name(), "agora");
    }

    #[test]
    fn username_accepts_plain_name() {
        let name = Username::try_from(String::from("margo")).unwrap();
        assert_eq!(name.as_str(), "margo");
    }

    #[test]
    fn username_rejects_blank_and_undefined() {
        assert_eq!(
            Username::try_from(String::from("   ")).unwrap_err(),
            DomainError::InvalidUsername
        );
        assert_eq!(
            Username::try_from(String::from("undefined")).unwrap_err(),
            DomainError::InvalidUsername
        );
    }

    #[test]
    fn username_rejects_email_shaped_value() {
        assert_eq!(
            Username::try_from(String::from("margo@example.com")).unwrap_err(),
            DomainError::InvalidUsername
        );
    }

    #[test]
    fn email_accepts_dot_atom_domain() {
        let email = EmailAddress::try_from(String::from("margo@example.com")).unwrap();
        assert_eq!(email.as_str(), "margo@example.com");
    }

    #[test]
    fn email_rejects_missing_domain() {
        assert_eq!(
            EmailAddress::try_from(String::from("margo@")).unwrap_err(),
            DomainError::InvalidEmail
        );
        assert_eq!(
            EmailAddress::try_from(String::from("margo@ex..com")).unwrap_err(),
            DomainError::InvalidEmail
        );
    }

    #[test]
    fn credential_key_classification() {
        assert!(looks_like_email("margo@example.com"));
        assert!(!looks_like_email("margo"));
    }

    #[test]
    fn chat_pair_name_is_order_independent() {
        assert_eq!(chat_pair_name(7, 3), "3-7");
        assert_eq!(chat_pair_name(3, 7), chat_pair_name(7, 3));
    }

    #[test]
    fn content_date_bounds() {
        assert!(validate_content_date(MIN_CONTENT_DATE_UNIX).is_ok());
        assert_eq!(
            validate_content_date(MIN_CONTENT_DATE_UNIX - 1).unwrap_err(),
            DomainError::ContentDateTooOld
        );
    }

    #[test]
    fn preview_truncates_and_marks_cut() {
        assert_eq!(content_preview("short", 10), "short");
        assert_eq!(content_preview("abcdefgh", 4), "abcd...");
    }

    #[test]
    fn is_blank_matches_form_sentinels() {
        assert!(is_blank(""));
        assert!(is_blank("  \t"));
        assert!(is_blank("undefined"));
        assert!(!is_blank("x"));
    }
}

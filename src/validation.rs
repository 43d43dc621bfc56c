//! Input checks shared by the login, registration and task flows.
//!
//! Every check returns `Result<_, ValidationError>`; the error carries the
//! field it belongs to, a kind and the inline message to show next to it.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Minimum length accepted at login
pub const MIN_LOGIN_PASSWORD_LEN: usize = 6;
/// Minimum length accepted when choosing a new password
pub const MIN_NEW_PASSWORD_LEN: usize = 8;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Email,
    Password,
    ConfirmPassword,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Required,
    InvalidFormat,
    InvalidDomain,
    TooShort,
    WeakPassword,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: Field,
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    fn new(field: Field, kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Strip characters commonly used for markup injection and trim whitespace
pub fn sanitize_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validate an email address. Returns the sanitized address on success.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let sanitized = sanitize_input(email);

    if sanitized.is_empty() {
        return Err(ValidationError::new(Field::Email, ValidationKind::Required, "Email is required"));
    }

    if !EMAIL_RE.is_match(&sanitized)
        || sanitized.contains("..")
        || sanitized.starts_with('.')
        || sanitized.ends_with('.')
    {
        return Err(ValidationError::new(
            Field::Email,
            ValidationKind::InvalidFormat,
            "Invalid email format",
        ));
    }

    if let Some((_, domain)) = sanitized.split_once('@') {
        if domain.split('.').any(str::is_empty) {
            return Err(ValidationError::new(
                Field::Email,
                ValidationKind::InvalidDomain,
                "Invalid email domain",
            ));
        }
    }

    Ok(sanitized)
}

pub fn is_valid_email(email: &str) -> bool {
    validate_email(email).is_ok()
}

/// Check a password typed on the login form
pub fn validate_login_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::new(
            Field::Password,
            ValidationKind::Required,
            "Password is required",
        ));
    }
    if password.chars().count() < MIN_LOGIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            Field::Password,
            ValidationKind::TooShort,
            format!("Password must be at least {} characters", MIN_LOGIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Fair,
    Strong,
}

impl PasswordStrength {
    pub fn label(self) -> &'static str {
        match self {
            PasswordStrength::Weak => "weak",
            PasswordStrength::Fair => "fair",
            PasswordStrength::Strong => "strong",
        }
    }
}

/// Score a password on length and character variety
pub fn password_strength(password: &str) -> PasswordStrength {
    let len = password.chars().count();
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    let score = [
        len >= MIN_NEW_PASSWORD_LEN,
        len >= 12,
        has_lower && has_upper,
        has_digit,
        has_symbol,
    ]
    .iter()
    .filter(|&&hit| hit)
    .count();

    match score {
        0..=2 => PasswordStrength::Weak,
        3 => PasswordStrength::Fair,
        _ => PasswordStrength::Strong,
    }
}

pub fn is_strong_enough_password(password: &str) -> bool {
    validate_new_password(password).is_ok()
}

/// Check a password chosen at registration
pub fn validate_new_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::new(
            Field::Password,
            ValidationKind::Required,
            "Password is required",
        ));
    }
    if password.chars().count() < MIN_NEW_PASSWORD_LEN {
        return Err(ValidationError::new(
            Field::Password,
            ValidationKind::TooShort,
            format!("Password must be at least {} characters", MIN_NEW_PASSWORD_LEN),
        ));
    }
    if password_strength(password) < PasswordStrength::Fair {
        return Err(ValidationError::new(
            Field::Password,
            ValidationKind::WeakPassword,
            "Password is too weak: mix upper and lower case letters, digits and symbols",
        ));
    }
    Ok(())
}

pub fn validate_confirm_password(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password != confirm {
        return Err(ValidationError::new(
            Field::ConfirmPassword,
            ValidationKind::Mismatch,
            "Passwords do not match",
        ));
    }
    Ok(())
}

/// Validate a task title. Returns the trimmed title.
pub fn validate_task_title(title: &str) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(Field::Title, ValidationKind::Required, "Title is required"));
    }
    Ok(trimmed.to_string())
}

use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 32;
pub const DISPLAY_NAME_MIN: usize = 3;
pub const DISPLAY_NAME_MAX: usize = 50;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref DISPLAY_NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9 _-]+$").unwrap();
}

/// Canonical email form used for every store read and write.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// At least 32 chars with an uppercase, a lowercase, a digit and a
/// non-alphanumeric character.
pub fn is_strong_password(password: &str) -> bool {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return false;
    }
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let special = password.chars().any(|c| !c.is_ascii_alphanumeric());
    upper && lower && digit && special
}

pub fn is_valid_display_name(name: &str) -> bool {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    (DISPLAY_NAME_MIN..=DISPLAY_NAME_MAX).contains(&len) && DISPLAY_NAME_RE.is_match(trimmed)
}

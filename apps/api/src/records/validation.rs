use serde::{Deserialize, Deserializer};

use crate::errors::FieldErrors;

pub const NAME_MAX: usize = 50;
pub const EMAIL_MAX: usize = 255;
pub const COMPANY_MAX: usize = 250;

/// Trims the address and lower-cases its domain part. The local part is
/// left alone since mail servers may treat it case-sensitively.
pub fn normalize_email(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => trimmed.to_string(),
    }
}

/// "jEAN" -> "Jean"
pub fn capitalize(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

pub fn check_length(errors: &mut FieldErrors, field: &str, value: &str, max: usize) {
    let len = value.trim().chars().count();
    if len == 0 {
        errors.push(field, "This field is required.");
    } else if len > max {
        errors.push(
            field,
            format!("Ensure this value has at most {max} characters (it has {len})."),
        );
    }
}

pub fn check_email(errors: &mut FieldErrors, field: &str, value: &str) {
    let value = value.trim();
    if value.chars().count() > EMAIL_MAX {
        errors.push(
            field,
            format!("Ensure this value has at most {EMAIL_MAX} characters."),
        );
        return;
    }
    let valid = match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        errors.push(field, "Enter a valid email address.");
    }
}

pub fn check_amount(errors: &mut FieldErrors, field: &str, amount: f64) {
    if !amount.is_finite() {
        errors.push(field, "Enter a number.");
    } else if amount < 0.0 {
        errors.push(field, "Ensure this value is greater than or equal to 0.");
    }
}

/// Largest head count the events table can hold.
pub const ATTENDEES_MAX: u32 = i32::MAX as u32;

pub fn check_attendees(errors: &mut FieldErrors, field: &str, attendees: u32) {
    if attendees > ATTENDEES_MAX {
        errors.push(
            field,
            format!("Ensure this value is less than or equal to {ATTENDEES_MAX}."),
        );
    }
}

/// `None` for blank strings, the trimmed value otherwise.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Lets a PATCH body distinguish an absent field (`None`) from an explicit
/// `null` (`Some(None)`). Pair with `#[serde(default)]`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

use regex::Regex;
use std::sync::LazyLock;

/// Latin and Cyrillic letters, whitespace, `-` and `_`; 1 to 100 characters.
static FULL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-zА-Яа-яЁё\s\-_]{1,100}$").expect("valid full name pattern"));

/// Latin letters, digits and `!@#$%&()_-`; 6 to 18 characters.
static PASSWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9!@#$%&()_\-]{6,18}$").expect("valid password pattern"));

/// Width of the `users.email` column.
pub const EMAIL_MAX_LEN: usize = 255;

/// `local@domain.tld`, the top-level segment being 2+ letters.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$").expect("valid email pattern")
});

/// validate_full_name
///
/// Checks a display name. Surrounding whitespace is ignored.
pub fn validate_full_name(value: &str) -> Result<(), &'static str> {
    let value = value.trim();
    if value.is_empty() {
        return Err("full name is required");
    }
    if !FULL_NAME_RE.is_match(value) {
        return Err(
            "full name: 1-100 characters; only Latin/Cyrillic letters, spaces, \"-\" and \"_\"",
        );
    }
    Ok(())
}

/// validate_password
///
/// Checks a plaintext password before it is hashed. Surrounding whitespace is ignored.
pub fn validate_password(value: &str) -> Result<(), &'static str> {
    if !PASSWORD_RE.is_match(value.trim()) {
        return Err("password: 6-18 characters; only Latin letters, digits and !@#$%&()_-");
    }
    Ok(())
}

/// validate_email
///
/// Checks the `local@domain.tld` shape on the normalized (trimmed, lowercased) value.
pub fn validate_email(value: &str) -> Result<(), &'static str> {
    let email = normalize_email(value);
    if email.chars().count() > EMAIL_MAX_LEN {
        return Err("email must be at most 255 characters");
    }
    if !EMAIL_RE.is_match(&email) {
        return Err("invalid email format");
    }
    Ok(())
}

/// Emails are stored and looked up in this form.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Collects the messages of every failing check, in order.
pub fn collect_errors<'a>(checks: impl IntoIterator<Item = Result<(), &'a str>>) -> Vec<String> {
    checks
        .into_iter()
        .filter_map(|check| check.err().map(str::to_string))
        .collect()
}

/// Reads an integer the way HTML forms and loose JSON clients send it:
/// a JSON integer or a decimal string. Anything else is `None`.
pub fn json_int(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => text_int(s),
        _ => None,
    }
}

pub fn text_int(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

//! Identity format and password strength rules.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

pub const MIN_PASSWORD_LENGTH: usize = 12;

pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

const COMMON_PATTERNS: &[&str] = &[
    "password",
    "123456",
    "qwerty",
    "admin",
    "login",
    "welcome",
    "geriatric",
    "healthcare",
    "medical",
];

fn get_regex(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern defined in code"))
}

/// Every rule a password broke, in the order the rules are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordViolations(pub Vec<String>);

impl fmt::Display for PasswordViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl std::error::Error for PasswordViolations {}

/// Identity fields a password must not embed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordOwner<'a> {
    pub login_name: Option<&'a str>,
    pub employee_code: Option<&'a str>,
}

pub fn validate_password(password: &str, owner: PasswordOwner<'_>) -> Result<(), PasswordViolations> {
    let mut errors = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long."
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain at least one uppercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain at least one lowercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one digit.".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        errors.push(format!(
            "Password must contain at least one special character: {SPECIAL_CHARACTERS}"
        ));
    }

    let lower = password.to_lowercase();
    if COMMON_PATTERNS.iter().any(|p| lower.contains(p)) {
        errors.push("Password cannot contain common words or patterns.".to_string());
    }

    if let Some(login) = owner.login_name.filter(|s| !s.is_empty())
        && lower.contains(&login.to_lowercase())
    {
        errors.push("Password cannot contain your login name.".to_string());
    }
    if let Some(code) = owner.employee_code.filter(|s| !s.is_empty())
        && lower.contains(&code.to_lowercase())
    {
        errors.push("Password cannot contain your employee code.".to_string());
    }

    let chars: Vec<char> = password.chars().collect();
    if chars.windows(3).any(|w| {
        let (a, b, c) = (u32::from(w[0]), u32::from(w[1]), u32::from(w[2]));
        a + 1 == b && b + 1 == c
    }) {
        errors.push("Password cannot contain sequential characters.".to_string());
    }
    if chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2]) {
        errors.push(
            "Password cannot contain more than 2 consecutive identical characters.".to_string(),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PasswordViolations(errors))
    }
}

/// Upper-cases and checks an employee code such as `NU12345`.
pub fn normalize_employee_code(code: &str) -> Result<String, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"^[A-Z]{2,3}\d{4,6}$");

    let normalized = code.trim().to_uppercase();
    if re.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err("Employee code must be 2-3 letters followed by 4-6 digits (e.g. NU12345)".to_string())
    }
}

pub fn validate_login_name(login: &str) -> Result<&str, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"^[a-zA-Z0-9_.\-]{3,150}$");

    let trimmed = login.trim();
    if re.is_match(trimmed) {
        Ok(trimmed)
    } else {
        Err(
            "Login name must be 3-150 characters of letters, digits, dots, dashes or underscores"
                .to_string(),
        )
    }
}

/// Upper-cases and checks a center code such as `NORTH`.
pub fn normalize_center_code(code: &str) -> Result<String, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"^[A-Z]{2,5}$");

    let normalized = code.trim().to_uppercase();
    if re.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err("Center code must be 2-5 letters".to_string())
    }
}

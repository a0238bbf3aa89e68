use uuid::Uuid;

use super::ApiError;

pub fn validate_limit(limit: u64) -> Result<u64, ApiError> {
    const MAX_LIMIT: u64 = 1000;
    const MIN_LIMIT: u64 = 1;

    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "Invalid limit: {limit}. Limit must be between {MIN_LIMIT} and {MAX_LIMIT}"
        )));
    }
    Ok(limit)
}

pub fn validate_days(days: u32) -> Result<u32, ApiError> {
    if days == 0 || days > 3650 {
        return Err(ApiError::validation(format!(
            "Invalid window: {days} days. Must be between 1 and 3650"
        )));
    }
    Ok(days)
}

pub fn parse_id(field: &str, value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value.trim())
        .map_err(|_| ApiError::validation(format!("Invalid {field}: {value}")))
}

pub fn require_non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

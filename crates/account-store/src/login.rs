//! Login normalization.

use crate::error::StoreError;

/// Normalize a phone-number login to E.164 format.
pub fn normalize_login(login: &str) -> Result<String, StoreError> {
    // Remove all non-digit characters except leading +
    let has_plus = login.trim_start().starts_with('+');
    let digits: String = login.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err(StoreError::InvalidLogin(
            "Login must contain at least one digit".into(),
        ));
    }

    if digits.len() < 7 {
        return Err(StoreError::InvalidLogin("Login too short".into()));
    }

    if digits.len() > 15 {
        return Err(StoreError::InvalidLogin("Login too long".into()));
    }

    if has_plus || digits.len() >= 10 {
        Ok(format!("+{}", digits))
    } else {
        Err(StoreError::InvalidLogin(
            "Login must include country code".into(),
        ))
    }
}

use crate::error::{JournalError, Result};

const MAX_CODE_LEN: usize = 10;

/// Trim and upper-case a stock code, rejecting anything that is not 1-10
/// ASCII alphanumerics.
pub fn normalize_stock_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(JournalError::validation("stock_code", "must not be empty"));
    }
    if code.len() > MAX_CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(JournalError::validation(
            "stock_code",
            format!("'{}' is not a valid stock code", code),
        ));
    }
    Ok(code.to_ascii_uppercase())
}

pub fn require_positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(JournalError::validation(field, "must be greater than 0"));
    }
    Ok(())
}

pub fn require_positive_opt(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) => require_positive(field, v),
        None => Ok(()),
    }
}

/// Ratio in (0, 1]
pub fn require_ratio(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(JournalError::validation(field, "must be in (0, 1]"));
    }
    Ok(())
}

pub fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(JournalError::validation(field, "must not be empty"));
    }
    Ok(())
}

/// Blank strings are stored as NULL
pub fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_stock_code() {
        assert_eq!(normalize_stock_code(" 600519 ").unwrap(), "600519");
        assert_eq!(normalize_stock_code("sh600519").unwrap(), "SH600519");
        assert!(normalize_stock_code("").is_err());
        assert!(normalize_stock_code("600 519").is_err());
        assert!(normalize_stock_code("12345678901").is_err());
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = require_positive("price", -1.0).unwrap_err();
        match err {
            JournalError::Validation { field, .. } => assert_eq!(field, "price"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(require_positive("price", f64::NAN).is_err());
    }

    #[test]
    fn test_require_ratio_bounds() {
        assert!(require_ratio("sell_ratio", 1.0).is_ok());
        assert!(require_ratio("sell_ratio", 0.5).is_ok());
        assert!(require_ratio("sell_ratio", 0.0).is_err());
        assert!(require_ratio("sell_ratio", 1.01).is_err());
    }

    #[test]
    fn test_clean_optional() {
        assert_eq!(clean_optional(Some("  ".to_string())), None);
        assert_eq!(clean_optional(Some(" note ".to_string())), Some("note".to_string()));
        assert_eq!(clean_optional(None), None);
    }
}

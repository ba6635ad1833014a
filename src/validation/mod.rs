/// Field validation shared by the managers
///
/// Every helper reports the offending field through `VaultError::InvalidInput`.
use crate::error::{VaultError, VaultResult};
use chrono::NaiveDate;
use validator::ValidateEmail;

/// Shortest credential accepted for storage
pub const MIN_CREDENTIAL_LEN: usize = 6;

/// Trim and reject blank values
pub fn required(field: &'static str, value: &str) -> VaultResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(VaultError::invalid(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Trim; blank becomes `None`
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn length(field: &'static str, value: &str, min: usize, max: usize) -> VaultResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(VaultError::invalid(
            field,
            format!("must be between {} and {} characters", min, max),
        ));
    }
    Ok(())
}

pub fn is_email(value: &str) -> bool {
    value.validate_email()
}

pub fn email(field: &'static str, value: &str) -> VaultResult<String> {
    let value = required(field, value)?;
    if !is_email(&value) {
        return Err(VaultError::invalid(field, "is not a valid email address"));
    }
    Ok(value)
}

/// Stored credentials must meet the minimum length
pub fn credential(field: &'static str, value: &str) -> VaultResult<()> {
    if value.chars().count() < MIN_CREDENTIAL_LEN {
        return Err(VaultError::invalid(
            field,
            format!("must be at least {} characters", MIN_CREDENTIAL_LEN),
        ));
    }
    Ok(())
}

/// `YYYY-MM-DD`; blank means no date
pub fn renewal_date(value: Option<&str>) -> VaultResult<Option<NaiveDate>> {
    match optional(value) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                VaultError::invalid("next_renewal_date", format!("'{}' is not a YYYY-MM-DD date", raw))
            }),
    }
}

pub fn cost(value: f64) -> VaultResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(VaultError::invalid("cost", "must be a non-negative number"));
    }
    Ok(value)
}

/// Mail provider inferred from the domain part of an address
pub fn provider_of(address: &str) -> String {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_trims() {
        assert_eq!(required("name", "  Netflix ").unwrap(), "Netflix");
        assert!(required("name", "   ").is_err());
    }

    #[test]
    fn test_optional_blank_is_none() {
        assert_eq!(optional(Some("  ")), None);
        assert_eq!(optional(None), None);
        assert_eq!(optional(Some(" bob ")), Some("bob".to_string()));
    }

    #[test]
    fn test_email_shapes() {
        assert!(is_email("alice@example.com"));
        assert!(!is_email("alice"));
        assert!(!is_email("alice@"));
        assert!(email("email", "not-an-email").is_err());
    }

    #[test]
    fn test_credential_minimum() {
        assert!(credential("password", "12345").is_err());
        assert!(credential("password", "123456").is_ok());
    }

    #[test]
    fn test_renewal_date_formats() {
        assert_eq!(
            renewal_date(Some("2026-03-31")).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 31)
        );
        assert_eq!(renewal_date(Some("")).unwrap(), None);
        assert_eq!(renewal_date(None).unwrap(), None);

        let err = renewal_date(Some("31/03/2026")).unwrap_err();
        assert!(matches!(
            err,
            VaultError::InvalidInput { field: "next_renewal_date", .. }
        ));
        assert!(renewal_date(Some("2026-02-30")).is_err());
    }

    #[test]
    fn test_cost_bounds() {
        assert_eq!(cost(9.99).unwrap(), 9.99);
        assert!(cost(0.0).is_ok());
        assert!(cost(-1.0).is_err());
        assert!(cost(f64::NAN).is_err());
        assert!(cost(f64::INFINITY).is_err());
    }

    #[test]
    fn test_provider_is_domain() {
        assert_eq!(provider_of("alice@gmail.com"), "gmail.com");
        assert_eq!(provider_of("nobody"), "");
    }
}

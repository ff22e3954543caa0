use std::str::FromStr;

use crate::error::ConfigError;

/// Read an env var, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(default),
    }
}

pub(crate) fn parse_string_env(
    key: &str,
    default: impl Into<String>,
) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or_else(|| default.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keys are unique per test so parallel tests never observe each other.

    #[test]
    fn missing_key_uses_default() {
        let port: u16 = parse_optional_env("PLOTHUB_TEST_MISSING_PORT", 8000).unwrap();
        assert_eq!(port, 8000);
    }

    #[test]
    fn invalid_number_is_reported_with_key() {
        // SAFETY: test-only env mutation on a key no other test touches.
        unsafe { std::env::set_var("PLOTHUB_TEST_BAD_PORT", "eighty") };
        let err = parse_optional_env::<u16>("PLOTHUB_TEST_BAD_PORT", 1).unwrap_err();
        assert!(err.to_string().contains("PLOTHUB_TEST_BAD_PORT"));
    }

    #[test]
    fn empty_value_counts_as_unset() {
        // SAFETY: test-only env mutation on a key no other test touches.
        unsafe { std::env::set_var("PLOTHUB_TEST_EMPTY", "  ") };
        assert_eq!(optional_env("PLOTHUB_TEST_EMPTY").unwrap(), None);
        assert_eq!(
            parse_string_env("PLOTHUB_TEST_EMPTY", "fallback").unwrap(),
            "fallback"
        );
    }
}

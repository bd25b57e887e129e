//! Environment configuration helpers

use std::str::FromStr;
use thiserror::Error;

/// Error reading a typed value from the environment
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvError {
    /// The variable is set but could not be parsed
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        key: String,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },
}

/// Read a variable, treating empty values as unset
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a variable or fall back to a default
pub fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

/// Read and parse a variable
///
/// Returns `Ok(None)` when the variable is unset.
pub fn env_parse<T>(key: &str) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, env_var(key))
}

fn parse_value<T>(key: &str, raw: Option<String>) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.parse::<T>().map_err(|e| EnvError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
            value,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u16>("PORT", Some("8080".into())), Ok(Some(8080)));
        assert_eq!(parse_value::<u16>("PORT", None), Ok(None));
    }

    #[test]
    fn test_parse_value_invalid() {
        let err = parse_value::<u16>("PORT", Some("eighty".into())).unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert!(err.to_string().contains("eighty"));
    }

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("AGENT_UTILS_SURELY_UNSET_VAR", "fallback"), "fallback");
    }
}

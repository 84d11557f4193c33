//! Engine configuration.
//!
//! Configuration is plain data: hosts embed it in their own config files
//! through serde, or load it from `FED_*` environment variables with
//! [`EngineConfig::from_env`].

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::method::HttpMethod;

/// Default RSA signature method URI.
pub const DEFAULT_RSA_SIGNATURE_METHOD: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Protocol timing and message handling.
    pub protocol: ProtocolConfig,
    /// Signing behaviour.
    pub crypto: CryptoConfig,
}

/// Protocol timing and message handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Allowed clock difference with peers, in seconds.
    pub clock_skew_secs: i64,
    /// Lifetime of issued assertions, in seconds.
    pub assertion_validity_secs: i64,
    /// Lifetime of issued logout requests, in seconds.
    pub logout_request_validity_secs: i64,
    /// Maximum size of a decoded inbound message, in bytes.
    pub max_message_size: usize,
    /// Method used when the caller does not pick one.
    pub default_http_method: HttpMethod,
    /// Reject unsigned requests even when the peer metadata does not ask for
    /// signatures. A present signature is always verified.
    pub require_signed_requests: bool,
}

/// Signing behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Sign outbound requests, responses and assertions.
    pub sign_messages: bool,
    /// Signature method URI used with RSA keys.
    pub rsa_signature_method: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: 300,
            assertion_validity_secs: 300,
            logout_request_validity_secs: 300,
            max_message_size: 64 * 1024,
            default_http_method: HttpMethod::Redirect,
            require_signed_requests: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            sign_messages: true,
            rsa_signature_method: DEFAULT_RSA_SIGNATURE_METHOD.to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if a
    /// value is out of range.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let protocol = &mut config.protocol;

        if let Some(v) = parse_var(&lookup, "FED_CLOCK_SKEW_SECS")? {
            protocol.clock_skew_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "FED_ASSERTION_VALIDITY_SECS")? {
            protocol.assertion_validity_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "FED_LOGOUT_REQUEST_VALIDITY_SECS")? {
            protocol.logout_request_validity_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "FED_MAX_MESSAGE_SIZE")? {
            protocol.max_message_size = v;
        }
        if let Some(v) = parse_var(&lookup, "FED_DEFAULT_HTTP_METHOD")? {
            protocol.default_http_method = v;
        }
        if let Some(v) = lookup("FED_REQUIRE_SIGNED_REQUESTS") {
            protocol.require_signed_requests = parse_flag("FED_REQUIRE_SIGNED_REQUESTS", &v)?;
        }
        if let Some(v) = lookup("FED_SIGN_MESSAGES") {
            config.crypto.sign_messages = parse_flag("FED_SIGN_MESSAGES", &v)?;
        }
        if let Some(v) = lookup("FED_RSA_SIGNATURE_METHOD") {
            config.crypto.rsa_signature_method = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for negative durations, a zero
    /// assertion lifetime or a zero message size limit.
    pub fn validate(&self) -> Result<()> {
        let p = &self.protocol;
        if p.clock_skew_secs < 0 {
            return Err(ConfigError::OutOfRange("clock skew must not be negative".to_string()));
        }
        if p.assertion_validity_secs <= 0 || p.logout_request_validity_secs <= 0 {
            return Err(ConfigError::OutOfRange("message lifetimes must be positive".to_string()));
        }
        if p.max_message_size == 0 {
            return Err(ConfigError::OutOfRange("max message size must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol.clock_skew_secs, 300);
        assert_eq!(config.protocol.default_http_method, HttpMethod::Redirect);
        assert!(config.crypto.sign_messages);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("FED_CLOCK_SKEW_SECS", "60"),
            ("FED_DEFAULT_HTTP_METHOD", "post"),
            ("FED_REQUIRE_SIGNED_REQUESTS", "true"),
        ]
        .into_iter()
        .collect();

        let config =
            EngineConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.protocol.clock_skew_secs, 60);
        assert_eq!(config.protocol.default_http_method, HttpMethod::Post);
        assert!(config.protocol.require_signed_requests);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let result = EngineConfig::from_lookup(|k| {
            (k == "FED_MAX_MESSAGE_SIZE").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = EngineConfig::from_lookup(|k| {
            (k == "FED_CLOCK_SKEW_SECS").then(|| "-5".to_string())
        });
        assert!(matches!(result, Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"protocol":{"clock_skew_secs":10}}"#).unwrap();
        assert_eq!(config.protocol.clock_skew_secs, 10);
        assert_eq!(config.protocol.assertion_validity_secs, 300);
        assert_eq!(config.crypto, CryptoConfig::default());
    }
}

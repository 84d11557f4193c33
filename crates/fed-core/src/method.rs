//! HTTP methods used to carry protocol messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Transport used for an inbound or outbound protocol message.
///
/// The numeric codes are stable and may be persisted by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpMethod {
    /// No message to transport.
    None,
    /// Any method the peer supports.
    Any,
    /// Plain HTTP GET (no SAML binding).
    Get,
    /// HTTP-POST binding: base64 form field.
    Post,
    /// HTTP-Redirect binding: deflated query parameter.
    #[default]
    Redirect,
    /// SOAP binding: message in the envelope body.
    Soap,
    /// HTTP-Artifact binding, artifact delivered in a query string.
    ArtifactGet,
    /// HTTP-Artifact binding, artifact delivered in a form.
    ArtifactPost,
}

impl HttpMethod {
    /// Order in which methods are tried when a peer does not support the
    /// requested one.
    pub const PREFERENCE: [Self; 5] = [
        Self::Redirect,
        Self::Post,
        Self::ArtifactGet,
        Self::ArtifactPost,
        Self::Soap,
    ];

    /// Returns the stable numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::None => -1,
            Self::Any => 0,
            Self::Get => 1,
            Self::Post => 2,
            Self::Redirect => 3,
            Self::Soap => 4,
            Self::ArtifactGet => 5,
            Self::ArtifactPost => 6,
        }
    }

    /// Parses a numeric code.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::None),
            0 => Some(Self::Any),
            1 => Some(Self::Get),
            2 => Some(Self::Post),
            3 => Some(Self::Redirect),
            4 => Some(Self::Soap),
            5 => Some(Self::ArtifactGet),
            6 => Some(Self::ArtifactPost),
            _ => None,
        }
    }

    /// Returns true if the message travels as a form body.
    #[must_use]
    pub const fn uses_body(self) -> bool {
        matches!(self, Self::Post | Self::Soap | Self::ArtifactPost)
    }

    /// Returns true for both artifact variants.
    #[must_use]
    pub const fn is_artifact(self) -> bool {
        matches!(self, Self::ArtifactGet | Self::ArtifactPost)
    }

    /// Returns the lowercase name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Any => "any",
            Self::Get => "get",
            Self::Post => "post",
            Self::Redirect => "redirect",
            Self::Soap => "soap",
            Self::ArtifactGet => "artifact_get",
            Self::ArtifactPost => "artifact_post",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "any" => Self::Any,
            "get" => Self::Get,
            "post" => Self::Post,
            "redirect" => Self::Redirect,
            "soap" => Self::Soap,
            "artifact_get" | "artifact-get" => Self::ArtifactGet,
            "artifact_post" | "artifact-post" => Self::ArtifactPost,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "http_method".to_string(),
                    value: other.to_string(),
                })
            }
        };
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for method in [
            HttpMethod::None,
            HttpMethod::Any,
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Redirect,
            HttpMethod::Soap,
            HttpMethod::ArtifactGet,
            HttpMethod::ArtifactPost,
        ] {
            assert_eq!(HttpMethod::from_code(method.code()), Some(method));
            assert_eq!(method.as_str().parse::<HttpMethod>().ok(), Some(method));
        }
        assert_eq!(HttpMethod::from_code(42), None);
    }

    #[test]
    fn redirect_is_default() {
        assert_eq!(HttpMethod::default(), HttpMethod::Redirect);
        assert_eq!(HttpMethod::PREFERENCE[0], HttpMethod::Redirect);
    }

    #[test]
    fn body_methods() {
        assert!(HttpMethod::Post.uses_body());
        assert!(HttpMethod::Soap.uses_body());
        assert!(!HttpMethod::Redirect.uses_body());
        assert!(!HttpMethod::ArtifactGet.uses_body());
    }
}

//! SAML error types.
//!
//! Every failure of the engine is reported as a [`SamlError`]. The variant
//! names the failure kind; [`SamlError::kind`] exposes it as a fieldless enum
//! for exhaustive matching, and [`SamlError::status_code`] maps it to the
//! SAML status sent back to a peer.

use thiserror::Error;

use crate::types::{status_codes, sub_status_codes};

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// SAML protocol errors.
#[derive(Debug, Error)]
pub enum SamlError {
    /// Unparsable or schema-invalid input.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Signature absent where required, mismatched or made with the wrong key.
    #[error("signature validation failed: {0}")]
    SignatureInvalid(String),

    /// No provider is registered under this entity ID.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The message refers to a session this principal does not have.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The peer answered with a non-success status.
    #[error("peer returned status {status}{}", .sub_status.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    StatusNotSuccess {
        /// Top-level status code URI.
        status: String,
        /// Second-level status code URI.
        sub_status: Option<String>,
        /// Status message sent by the peer.
        message: Option<String>,
    },

    /// The assertion or message is outside its validity window.
    #[error("assertion outside its validity window: {0}")]
    AssertionExpired(String),

    /// The assertion is not addressed to this provider.
    #[error("audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch {
        /// Local entity ID.
        expected: String,
        /// Audiences found in the assertion.
        actual: String,
    },

    /// A persisted record could not be restored.
    #[error("corrupt dump: {0}")]
    CorruptDump(String),

    /// Local policy declined to proceed.
    #[error("request denied: {0}")]
    RequestDenied(String),

    /// The target provider has no usable single sign-on endpoint.
    #[error("no single sign-on endpoint for {0}")]
    NoSsoEndpoint(String),

    /// The target provider has no usable single logout endpoint.
    #[error("no single logout endpoint for {0}")]
    NoSloEndpoint(String),

    /// The binding cannot carry this message.
    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// A message was built before the exchange was initialised.
    #[error("exchange not initialized")]
    NotInitialized,

    /// No request has been received and validated.
    #[error("no validated request")]
    NoValidatedRequest,

    /// No assertion has been built.
    #[error("no assertion built")]
    NoAssertion,

    /// No response has been processed successfully.
    #[error("no valid response")]
    NoValidResponse,

    /// No session exists for the targeted provider.
    #[error("no active session")]
    NoActiveSession,

    /// The session targeted by a logout request does not exist.
    #[error("session not found")]
    SessionNotFound,

    /// A metadata document could not be used.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Key or certificate material could not be used.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The provider cannot be registered under this entity ID.
    #[error("duplicate provider: {0}")]
    DuplicateProvider(String),

    /// A cryptographic primitive failed.
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Fieldless failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    MalformedMessage,
    SignatureInvalid,
    UnknownProvider,
    UnknownSession,
    StatusNotSuccess,
    AssertionExpired,
    AudienceMismatch,
    CorruptDump,
    RequestDenied,
    NoSsoEndpoint,
    NoSloEndpoint,
    UnsupportedBinding,
    NotInitialized,
    NoValidatedRequest,
    NoAssertion,
    NoValidResponse,
    NoActiveSession,
    SessionNotFound,
    InvalidMetadata,
    InvalidKey,
    DuplicateProvider,
    Crypto,
}

impl SamlError {
    /// Returns the failure kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Self::UnknownProvider(_) => ErrorKind::UnknownProvider,
            Self::UnknownSession(_) => ErrorKind::UnknownSession,
            Self::StatusNotSuccess { .. } => ErrorKind::StatusNotSuccess,
            Self::AssertionExpired(_) => ErrorKind::AssertionExpired,
            Self::AudienceMismatch { .. } => ErrorKind::AudienceMismatch,
            Self::CorruptDump(_) => ErrorKind::CorruptDump,
            Self::RequestDenied(_) => ErrorKind::RequestDenied,
            Self::NoSsoEndpoint(_) => ErrorKind::NoSsoEndpoint,
            Self::NoSloEndpoint(_) => ErrorKind::NoSloEndpoint,
            Self::UnsupportedBinding(_) => ErrorKind::UnsupportedBinding,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::NoValidatedRequest => ErrorKind::NoValidatedRequest,
            Self::NoAssertion => ErrorKind::NoAssertion,
            Self::NoValidResponse => ErrorKind::NoValidResponse,
            Self::NoActiveSession => ErrorKind::NoActiveSession,
            Self::SessionNotFound => ErrorKind::SessionNotFound,
            Self::InvalidMetadata(_) => ErrorKind::InvalidMetadata,
            Self::InvalidKey(_) => ErrorKind::InvalidKey,
            Self::DuplicateProvider(_) => ErrorKind::DuplicateProvider,
            Self::Crypto(_) => ErrorKind::Crypto,
        }
    }

    /// Returns the SAML top-level status code for this error.
    ///
    /// For [`SamlError::StatusNotSuccess`] the peer's own code is returned.
    #[must_use]
    pub fn status_code(&self) -> &str {
        match self {
            Self::StatusNotSuccess { status, .. } => status,
            Self::MalformedMessage(_)
            | Self::SignatureInvalid(_)
            | Self::UnknownProvider(_)
            | Self::UnknownSession(_)
            | Self::AssertionExpired(_)
            | Self::AudienceMismatch { .. }
            | Self::SessionNotFound
            | Self::UnsupportedBinding(_) => status_codes::REQUESTER,
            _ => status_codes::RESPONDER,
        }
    }

    /// Returns the second-level status code, if one applies.
    #[must_use]
    pub fn sub_status_code(&self) -> Option<&str> {
        match self {
            Self::StatusNotSuccess { sub_status, .. } => sub_status.as_deref(),
            Self::RequestDenied(_) | Self::SignatureInvalid(_) => {
                Some(sub_status_codes::REQUEST_DENIED)
            }
            Self::UnknownSession(_) | Self::SessionNotFound => {
                Some(sub_status_codes::UNKNOWN_PRINCIPAL)
            }
            Self::UnsupportedBinding(_) => Some(sub_status_codes::UNSUPPORTED_BINDING),
            Self::UnknownProvider(_) => Some(sub_status_codes::REQUEST_UNSUPPORTED),
            _ => None,
        }
    }

    /// Returns the status message sent by a peer, if any.
    #[must_use]
    pub fn peer_message(&self) -> Option<&str> {
        match self {
            Self::StatusNotSuccess { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }
}

impl From<quick_xml::Error> for SamlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::MalformedMessage(format!("XML parsing error: {err}"))
    }
}

impl From<quick_xml::events::attributes::AttrError> for SamlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::MalformedMessage(format!("XML attribute error: {err}"))
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedMessage(format!("base64 decoding failed: {err}"))
    }
}

impl From<std::io::Error> for SamlError {
    fn from(err: std::io::Error) -> Self {
        Self::MalformedMessage(format!("deflate failed: {err}"))
    }
}

impl From<serde_json::Error> for SamlError {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptDump(err.to_string())
    }
}

impl From<fed_crypto::SignatureError> for SamlError {
    fn from(err: fed_crypto::SignatureError) -> Self {
        use fed_crypto::SignatureError as E;
        match err {
            E::Verification => Self::SignatureInvalid(err.to_string()),
            E::InvalidKey(_) | E::InvalidCertificate(_) | E::UnsupportedAlgorithm(_) => {
                Self::InvalidKey(err.to_string())
            }
            E::Signing(_) => Self::Crypto(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let err = SamlError::malformed("test");
        assert_eq!(err.kind(), ErrorKind::MalformedMessage);
        assert_eq!(err.status_code(), status_codes::REQUESTER);

        let err = SamlError::RequestDenied("authentication failed".to_string());
        assert_eq!(err.status_code(), status_codes::RESPONDER);
        assert_eq!(err.sub_status_code(), Some(sub_status_codes::REQUEST_DENIED));

        let err = SamlError::NotInitialized;
        assert_eq!(err.status_code(), status_codes::RESPONDER);
        assert_eq!(err.sub_status_code(), None);
    }

    #[test]
    fn peer_status_is_propagated_verbatim() {
        let err = SamlError::StatusNotSuccess {
            status: status_codes::RESPONDER.to_string(),
            sub_status: Some(sub_status_codes::AUTHN_FAILED.to_string()),
            message: Some("bad password".to_string()),
        };
        assert_eq!(err.status_code(), status_codes::RESPONDER);
        assert_eq!(err.sub_status_code(), Some(sub_status_codes::AUTHN_FAILED));
        assert_eq!(err.peer_message(), Some("bad password"));
        assert!(err.to_string().contains("AuthnFailed"));
    }

    #[test]
    fn crypto_errors_map_to_kinds() {
        let err: SamlError = fed_crypto::SignatureError::Verification.into();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);

        let err: SamlError = fed_crypto::SignatureError::InvalidKey("x".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
    }
}

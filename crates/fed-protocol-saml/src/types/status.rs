//! Protocol status.

use serde::{Deserialize, Serialize};

use super::{status_codes, sub_status_codes};
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML protocol status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The status code.
    pub status_code: StatusCode,

    /// Optional status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Status {
    /// Creates a success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::success(),
            status_message: None,
        }
    }

    /// Creates a requester error status.
    #[must_use]
    pub fn requester_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::requester(),
            status_message: Some(message.into()),
        }
    }

    /// Creates a responder error status.
    #[must_use]
    pub fn responder_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::responder(),
            status_message: Some(message.into()),
        }
    }

    /// Creates a `Responder`/`RequestDenied` status.
    #[must_use]
    pub fn request_denied() -> Self {
        Self {
            status_code: StatusCode::responder()
                .with_sub_status(StatusCode::new(sub_status_codes::REQUEST_DENIED)),
            status_message: None,
        }
    }

    /// Creates a `Requester`/`UnknownPrincipal` status.
    #[must_use]
    pub fn unknown_principal() -> Self {
        Self {
            status_code: StatusCode::requester()
                .with_sub_status(StatusCode::new(sub_status_codes::UNKNOWN_PRINCIPAL)),
            status_message: None,
        }
    }

    /// Builds the status a peer receives for a local failure.
    #[must_use]
    pub fn from_error(err: &SamlError) -> Self {
        let mut code = StatusCode::new(err.status_code());
        if let Some(sub) = err.sub_status_code() {
            code = code.with_sub_status(StatusCode::new(sub));
        }
        Self {
            status_code: code,
            status_message: None,
        }
    }

    /// Returns true if this status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }

    /// Sets the status message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Converts a non-success status into [`SamlError::StatusNotSuccess`].
    ///
    /// # Errors
    ///
    /// Returns the peer's status verbatim when it is not `Success`.
    pub fn ensure_success(&self) -> SamlResult<()> {
        if self.is_success() {
            return Ok(());
        }
        Err(SamlError::StatusNotSuccess {
            status: self.status_code.value.clone(),
            sub_status: self.status_code.sub_status_value().map(str::to_string),
            message: self.status_message.clone(),
        })
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        XmlElement::new("samlp:Status")
            .with_child(self.status_code.to_element())
            .with_opt_child(
                self.status_message
                    .as_ref()
                    .map(|m| XmlElement::new("samlp:StatusMessage").with_text(m)),
            )
    }

    pub(crate) fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let code = element
            .child("StatusCode")
            .ok_or_else(|| SamlError::malformed("Status has no StatusCode"))?;
        Ok(Self {
            status_code: StatusCode::from_element(code)?,
            status_message: element.child_text("StatusMessage"),
        })
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

/// SAML status code, optionally nesting a second-level code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// The status code URI.
    pub value: String,

    /// Nested status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<Box<StatusCode>>,
}

impl StatusCode {
    /// Creates a status code with the given value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status_code: None,
        }
    }

    /// Creates a success status code.
    #[must_use]
    pub fn success() -> Self {
        Self::new(status_codes::SUCCESS)
    }

    /// Creates a requester error status code.
    #[must_use]
    pub fn requester() -> Self {
        Self::new(status_codes::REQUESTER)
    }

    /// Creates a responder error status code.
    #[must_use]
    pub fn responder() -> Self {
        Self::new(status_codes::RESPONDER)
    }

    /// Adds a sub-status code.
    #[must_use]
    pub fn with_sub_status(mut self, sub: StatusCode) -> Self {
        self.status_code = Some(Box::new(sub));
        self
    }

    /// Returns true if this is a success status code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.value == status_codes::SUCCESS
    }

    /// Returns the sub-status code value if present.
    #[must_use]
    pub fn sub_status_value(&self) -> Option<&str> {
        self.status_code.as_ref().map(|s| s.value.as_str())
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new("samlp:StatusCode")
            .with_attr("Value", &self.value)
            .with_opt_child(self.status_code.as_ref().map(|sub| sub.to_element()))
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let value = super::required_attr(element, "Value")?.to_string();
        let status_code = element
            .child("StatusCode")
            .map(Self::from_element)
            .transpose()?
            .map(Box::new);
        Ok(Self { value, status_code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_success() {
        let status = Status::success();
        assert!(status.is_success());
        assert!(status.ensure_success().is_ok());
    }

    #[test]
    fn non_success_is_propagated_verbatim() {
        let status = Status::request_denied().with_message("no consent");
        let err = status.ensure_success().unwrap_err();
        assert_eq!(err.status_code(), status_codes::RESPONDER);
        assert_eq!(err.sub_status_code(), Some(sub_status_codes::REQUEST_DENIED));
        assert_eq!(err.peer_message(), Some("no consent"));
    }

    #[test]
    fn status_element_nests_codes() {
        let status = Status::unknown_principal().with_message("who?");
        let element = XmlElement::parse(&status.to_element().to_xml()).unwrap();
        let parsed = Status::from_element(&element).unwrap();
        assert_eq!(parsed, status);
        assert_eq!(
            parsed.status_code.sub_status_value(),
            Some(sub_status_codes::UNKNOWN_PRINCIPAL)
        );
    }

    #[test]
    fn status_from_local_error() {
        let status = Status::from_error(&SamlError::SessionNotFound);
        assert_eq!(status.status_code.value, status_codes::REQUESTER);
        assert_eq!(
            status.status_code.sub_status_value(),
            Some(sub_status_codes::UNKNOWN_PRINCIPAL)
        );
    }
}

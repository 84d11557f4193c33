//! SAML Response carrying assertions back to the SP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    format_instant, parse_instant, required_attr, required_issuer, Assertion, Status, SAMLP_NS,
    SAML_NS, SAML_VERSION,
};
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Unique identifier for this response.
    pub id: String,

    /// The request this response answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// Entity ID of the responder.
    pub issuer: String,

    /// Where the response is delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Outcome of the request.
    pub status: Status,

    /// Assertions, only present on success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
}

impl Response {
    /// Creates a response with the given status.
    #[must_use]
    pub fn new(issuer: impl Into<String>, status: Status) -> Self {
        Self {
            id: super::new_id(),
            in_response_to: None,
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            status,
            assertions: Vec::new(),
        }
    }

    /// Sets the request being answered.
    #[must_use]
    pub fn in_response_to(mut self, request_id: Option<String>) -> Self {
        self.in_response_to = request_id;
        self
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds an assertion.
    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Returns true if the status is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the first assertion.
    #[must_use]
    pub fn first_assertion(&self) -> Option<&Assertion> {
        self.assertions.first()
    }

    /// Builds the document element with the given assertion elements in
    /// place of [`Response::assertions`]. Used to embed signed assertions.
    #[must_use]
    pub fn to_element_with(&self, assertions: Vec<XmlElement>) -> XmlElement {
        let mut element = XmlElement::new("samlp:Response")
            .with_attr("xmlns:samlp", SAMLP_NS)
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("ID", &self.id)
            .with_attr("Version", SAML_VERSION)
            .with_attr("IssueInstant", format_instant(self.issue_instant))
            .with_opt_attr("InResponseTo", self.in_response_to.as_ref())
            .with_opt_attr("Destination", self.destination.as_ref())
            .with_child(super::issuer_element(&self.issuer))
            .with_child(self.status.to_element());
        for assertion in assertions {
            element = element.with_child(assertion);
        }
        element
    }

    /// Builds the document element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        self.to_element_with(self.assertions.iter().map(Assertion::to_element).collect())
    }

    /// Parses a `samlp:Response` document element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for missing content or
    /// encrypted assertions.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        super::expect_message(element, "Response")?;
        let status = element
            .child("Status")
            .ok_or_else(|| SamlError::malformed("Response has no Status"))
            .and_then(Status::from_element)?;
        let assertions = element
            .elements()
            .filter(|e| matches!(e.local_name(), "Assertion" | "EncryptedAssertion"))
            .map(Assertion::from_element)
            .collect::<SamlResult<Vec<_>>>()?;

        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            in_response_to: element.attr("InResponseTo").map(str::to_string),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: required_issuer(element)?,
            destination: element.attr("Destination").map(str::to_string),
            status,
            assertions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{sub_status_codes, NameId, Subject};

    #[test]
    fn success_response_with_assertion() {
        let assertion =
            Assertion::new("https://idp.example/").with_subject(Subject::new(NameId::email("a@b.c")));
        let response = Response::new("https://idp.example/", Status::success())
            .in_response_to(Some("_req".to_string()))
            .with_destination("https://sp.example/acs")
            .with_assertion(assertion.clone());

        let xml = response.to_element().to_xml();
        let parsed = Response::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();

        assert!(parsed.is_success());
        assert_eq!(parsed.in_response_to.as_deref(), Some("_req"));
        assert_eq!(parsed.first_assertion().unwrap().id, assertion.id);
    }

    #[test]
    fn denied_response_has_no_assertion() {
        let response = Response::new("https://idp.example/", Status::request_denied());
        let xml = response.to_element().to_xml();
        let parsed = Response::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();

        assert!(!parsed.is_success());
        assert!(parsed.assertions.is_empty());
        assert_eq!(
            parsed.status.status_code.sub_status_value(),
            Some(sub_status_codes::REQUEST_DENIED)
        );
    }

    #[test]
    fn missing_status_is_malformed() {
        let xml = r#"<samlp:Response ID="_1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>x</saml:Issuer></samlp:Response>"#;
        let err = Response::from_element(&XmlElement::parse(xml).unwrap()).unwrap_err();
        assert!(matches!(err, SamlError::MalformedMessage(_)));
    }
}

//! Single logout messages.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{
    format_instant, optional_instant, parse_instant, required_attr, required_issuer, NameId,
    Status, SAMLP_NS, SAML_NS, SAML_VERSION,
};
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML Logout Request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// Entity ID of the requester.
    pub issuer: String,

    /// Where the request is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Time after which the request must be discarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Reason URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The principal being logged out.
    pub name_id: NameId,

    /// Sessions to terminate; empty means all of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_indexes: Vec<String>,
}

impl LogoutRequest {
    /// Creates a new logout request issued now.
    #[must_use]
    pub fn new(issuer: impl Into<String>, name_id: NameId) -> Self {
        Self {
            id: super::new_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            not_on_or_after: None,
            reason: None,
            name_id,
            session_indexes: Vec::new(),
        }
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds a session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_indexes.push(index.into());
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Limits the request's lifetime.
    #[must_use]
    pub fn valid_for(mut self, validity: Duration) -> Self {
        self.not_on_or_after = Some(self.issue_instant + validity);
        self
    }

    /// Returns true once `NotOnOrAfter` has passed, allowing for `skew`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.not_on_or_after.is_some_and(|t| now - skew >= t)
    }

    /// Builds the document element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("samlp:LogoutRequest")
            .with_attr("xmlns:samlp", SAMLP_NS)
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("ID", &self.id)
            .with_attr("Version", SAML_VERSION)
            .with_attr("IssueInstant", format_instant(self.issue_instant))
            .with_opt_attr("Destination", self.destination.as_ref())
            .with_opt_attr("NotOnOrAfter", self.not_on_or_after.map(format_instant))
            .with_opt_attr("Reason", self.reason.as_ref())
            .with_child(super::issuer_element(&self.issuer))
            .with_child(self.name_id.to_element());
        for index in &self.session_indexes {
            element = element.with_child(XmlElement::new("samlp:SessionIndex").with_text(index));
        }
        element
    }

    /// Parses a `samlp:LogoutRequest` document element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for missing content.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        super::expect_message(element, "LogoutRequest")?;
        let name_id = element
            .child("NameID")
            .or_else(|| element.child("EncryptedID"))
            .ok_or_else(|| SamlError::malformed("LogoutRequest has no NameID"))
            .and_then(NameId::from_element)?;

        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: required_issuer(element)?,
            destination: element.attr("Destination").map(str::to_string),
            not_on_or_after: optional_instant(element, "NotOnOrAfter")?,
            reason: element.attr("Reason").map(str::to_string),
            name_id,
            session_indexes: element
                .children_named("SessionIndex")
                .map(|s| s.text().trim().to_string())
                .collect(),
        })
    }
}

/// SAML Logout Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
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

    /// Outcome of the logout.
    pub status: Status,
}

impl LogoutResponse {
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
        }
    }

    /// Sets the request being answered.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Returns true if the status is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Builds the document element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new("samlp:LogoutResponse")
            .with_attr("xmlns:samlp", SAMLP_NS)
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("ID", &self.id)
            .with_attr("Version", SAML_VERSION)
            .with_attr("IssueInstant", format_instant(self.issue_instant))
            .with_opt_attr("InResponseTo", self.in_response_to.as_ref())
            .with_opt_attr("Destination", self.destination.as_ref())
            .with_child(super::issuer_element(&self.issuer))
            .with_child(self.status.to_element())
    }

    /// Parses a `samlp:LogoutResponse` document element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for missing content.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        super::expect_message(element, "LogoutResponse")?;
        let status = element
            .child("Status")
            .ok_or_else(|| SamlError::malformed("LogoutResponse has no Status"))
            .and_then(Status::from_element)?;
        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            in_response_to: element.attr("InResponseTo").map(str::to_string),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: required_issuer(element)?,
            destination: element.attr("Destination").map(str::to_string),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::logout_reasons;

    #[test]
    fn logout_request_element() {
        let request = LogoutRequest::new("https://sp.example/", NameId::persistent("abc"))
            .with_destination("https://idp.example/slo")
            .with_session_index("_s1")
            .with_reason(logout_reasons::USER)
            .valid_for(Duration::minutes(5));

        let xml = request.to_element().to_xml();
        let parsed = LogoutRequest::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();

        assert_eq!(parsed.name_id, request.name_id);
        assert_eq!(parsed.session_indexes, vec!["_s1".to_string()]);
        assert_eq!(parsed.reason.as_deref(), Some(logout_reasons::USER));
        assert!(!parsed.is_expired(Utc::now(), Duration::zero()));
        assert!(parsed.is_expired(Utc::now() + Duration::minutes(6), Duration::zero()));
    }

    #[test]
    fn logout_request_requires_name_id() {
        let xml = r#"<samlp:LogoutRequest ID="_1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>x</saml:Issuer></samlp:LogoutRequest>"#;
        assert!(LogoutRequest::from_element(&XmlElement::parse(xml).unwrap()).is_err());
    }

    #[test]
    fn logout_response_status() {
        let response = LogoutResponse::new("https://idp.example/", Status::unknown_principal())
            .in_response_to("_req");
        let xml = response.to_element().to_xml();
        let parsed = LogoutResponse::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();

        assert!(!parsed.is_success());
        assert_eq!(parsed.in_response_to.as_deref(), Some("_req"));
        assert!(parsed.status.ensure_success().is_err());
    }
}

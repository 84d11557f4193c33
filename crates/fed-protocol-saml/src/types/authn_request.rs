//! Authentication request sent by an SP to an IdP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    format_instant, parse_instant, required_attr, required_issuer, AuthnContextClass,
    NameIdPolicy, SamlBinding, SAMLP_NS, SAML_NS, SAML_VERSION,
};
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML Authentication Request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// Entity ID of the requesting SP.
    pub issuer: String,

    /// Where the request is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Where the response should be sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_consumer_service_url: Option<String>,

    /// Index into the SP's assertion consumer service list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_consumer_service_index: Option<u32>,

    /// Binding URI requested for the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_binding: Option<String>,

    /// Name ID policy constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_id_policy: Option<NameIdPolicy>,

    /// Requested authentication context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_authn_context: Option<RequestedAuthnContext>,

    /// Whether the IdP must authenticate the user afresh.
    #[serde(default)]
    pub force_authn: bool,

    /// Whether the IdP must not interact with the user.
    #[serde(default)]
    pub is_passive: bool,

    /// Consent URI obtained by the SP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<String>,

    /// Human-readable name of the requester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

impl AuthnRequest {
    /// Creates a new request issued now.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: super::new_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            assertion_consumer_service_url: None,
            assertion_consumer_service_index: None,
            protocol_binding: None,
            name_id_policy: None,
            requested_authn_context: None,
            force_authn: false,
            is_passive: false,
            consent: None,
            provider_name: None,
        }
    }

    /// Sets the assertion consumer service URL.
    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the protocol binding for the response.
    #[must_use]
    pub fn with_binding(mut self, binding: SamlBinding) -> Self {
        self.protocol_binding = Some(binding.uri().to_string());
        self
    }

    /// Sets the name ID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Sets the requested authentication context.
    #[must_use]
    pub fn with_authn_context(mut self, context: RequestedAuthnContext) -> Self {
        self.requested_authn_context = Some(context);
        self
    }

    /// Returns the parsed protocol binding.
    #[must_use]
    pub fn parsed_binding(&self) -> Option<SamlBinding> {
        self.protocol_binding
            .as_deref()
            .and_then(SamlBinding::from_uri)
    }

    /// Builds the `samlp:AuthnRequest` document element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        let bool_attr = |b: bool| if b { "true" } else { "false" };
        XmlElement::new("samlp:AuthnRequest")
            .with_attr("xmlns:samlp", SAMLP_NS)
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("ID", &self.id)
            .with_attr("Version", SAML_VERSION)
            .with_attr("IssueInstant", format_instant(self.issue_instant))
            .with_opt_attr("Destination", self.destination.as_ref())
            .with_opt_attr(
                "AssertionConsumerServiceURL",
                self.assertion_consumer_service_url.as_ref(),
            )
            .with_opt_attr(
                "AssertionConsumerServiceIndex",
                self.assertion_consumer_service_index.map(|i| i.to_string()),
            )
            .with_opt_attr("ProtocolBinding", self.protocol_binding.as_ref())
            .with_opt_attr("Consent", self.consent.as_ref())
            .with_opt_attr("ProviderName", self.provider_name.as_ref())
            .with_attr("ForceAuthn", bool_attr(self.force_authn))
            .with_attr("IsPassive", bool_attr(self.is_passive))
            .with_child(super::issuer_element(&self.issuer))
            .with_opt_child(self.name_id_policy.as_ref().map(NameIdPolicy::to_element))
            .with_opt_child(
                self.requested_authn_context
                    .as_ref()
                    .map(RequestedAuthnContext::to_element),
            )
    }

    /// Parses a `samlp:AuthnRequest` document element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] when the element is not an
    /// AuthnRequest or lacks required content.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        super::expect_message(element, "AuthnRequest")?;
        let flag = |name: &str| matches!(element.attr(name), Some("true" | "1"));
        let acs_index = element
            .attr("AssertionConsumerServiceIndex")
            .map(|v| {
                v.parse::<u32>()
                    .map_err(|_| SamlError::malformed("invalid AssertionConsumerServiceIndex"))
            })
            .transpose()?;

        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: required_issuer(element)?,
            destination: element.attr("Destination").map(str::to_string),
            assertion_consumer_service_url: element
                .attr("AssertionConsumerServiceURL")
                .map(str::to_string),
            assertion_consumer_service_index: acs_index,
            protocol_binding: element.attr("ProtocolBinding").map(str::to_string),
            name_id_policy: element
                .child("NameIDPolicy")
                .map(NameIdPolicy::from_element),
            requested_authn_context: element
                .child("RequestedAuthnContext")
                .map(RequestedAuthnContext::from_element),
            force_authn: flag("ForceAuthn"),
            is_passive: flag("IsPassive"),
            consent: element.attr("Consent").map(str::to_string),
            provider_name: element.attr("ProviderName").map(str::to_string),
        })
    }
}

/// Requested authentication context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAuthnContext {
    /// Comparison method.
    #[serde(default)]
    pub comparison: AuthnContextComparison,

    /// Acceptable authentication context class references.
    #[serde(default)]
    pub authn_context_class_refs: Vec<String>,
}

impl RequestedAuthnContext {
    /// Creates a context requiring exactly `class`.
    #[must_use]
    pub fn exact(class: AuthnContextClass) -> Self {
        Self {
            comparison: AuthnContextComparison::Exact,
            authn_context_class_refs: vec![class.uri().to_string()],
        }
    }

    /// Sets the comparison method.
    #[must_use]
    pub const fn with_comparison(mut self, comparison: AuthnContextComparison) -> Self {
        self.comparison = comparison;
        self
    }

    fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("samlp:RequestedAuthnContext")
            .with_attr("Comparison", self.comparison.as_str());
        for class_ref in &self.authn_context_class_refs {
            element =
                element.with_child(XmlElement::new("saml:AuthnContextClassRef").with_text(class_ref));
        }
        element
    }

    fn from_element(element: &XmlElement) -> Self {
        Self {
            comparison: element
                .attr("Comparison")
                .and_then(AuthnContextComparison::from_str_opt)
                .unwrap_or_default(),
            authn_context_class_refs: element
                .children_named("AuthnContextClassRef")
                .map(|c| c.text().trim().to_string())
                .collect(),
        }
    }
}

/// Authentication context comparison methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthnContextComparison {
    /// Exact match required.
    #[default]
    Exact,
    /// At least as strong.
    Minimum,
    /// At most as strong.
    Maximum,
    /// Stronger than any listed.
    Better,
}

impl AuthnContextComparison {
    /// Returns the attribute value for this comparison.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::Better => "better",
        }
    }

    fn from_str_opt(value: &str) -> Option<Self> {
        [Self::Exact, Self::Minimum, Self::Maximum, Self::Better]
            .into_iter()
            .find(|c| c.as_str() == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NameIdFormat;

    #[test]
    fn authn_request_element() {
        let request = AuthnRequest::new("https://sp.example/")
            .with_acs_url("https://sp.example/acs")
            .with_destination("https://idp.example/sso")
            .with_binding(SamlBinding::HttpPost)
            .with_name_id_policy(NameIdPolicy::with_format(NameIdFormat::Persistent).allow_create(true))
            .with_authn_context(
                RequestedAuthnContext::exact(AuthnContextClass::PasswordProtectedTransport)
                    .with_comparison(AuthnContextComparison::Minimum),
            );

        let xml = request.to_element().to_xml();
        assert!(xml.starts_with("<samlp:AuthnRequest "));
        let parsed = AuthnRequest::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();

        assert_eq!(parsed.id, request.id);
        assert_eq!(parsed.issuer, "https://sp.example/");
        assert_eq!(parsed.parsed_binding(), Some(SamlBinding::HttpPost));
        assert_eq!(parsed.name_id_policy, request.name_id_policy);
        assert_eq!(parsed.requested_authn_context, request.requested_authn_context);
        assert!(!parsed.force_authn);
    }

    #[test]
    fn rejects_missing_issuer_or_version() {
        let xml = r#"<samlp:AuthnRequest ID="_1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"/>"#;
        assert!(AuthnRequest::from_element(&XmlElement::parse(xml).unwrap()).is_err());

        let xml = r#"<samlp:AuthnRequest ID="_1" Version="1.1" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>x</saml:Issuer></samlp:AuthnRequest>"#;
        assert!(AuthnRequest::from_element(&XmlElement::parse(xml).unwrap()).is_err());
    }

    #[test]
    fn rejects_other_messages() {
        let xml = r#"<samlp:LogoutRequest ID="_1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>x</saml:Issuer></samlp:LogoutRequest>"#;
        assert!(AuthnRequest::from_element(&XmlElement::parse(xml).unwrap()).is_err());
    }
}

//! SAML Assertion types.
//!
//! Assertions carry the statements an IdP makes about a subject.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{
    format_instant, optional_instant, parse_instant, required_attr, required_issuer,
    AuthnContextClass, NameId, SAML_NS, SAML_VERSION,
};
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML Assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Unique identifier for this assertion.
    pub id: String,

    /// Timestamp when this assertion was issued.
    pub issue_instant: DateTime<Utc>,

    /// Entity ID of the issuing IdP.
    pub issuer: String,

    /// The subject of this assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,

    /// Validity conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,

    /// How the subject authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn_statement: Option<AuthnStatement>,

    /// Attributes about the subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_statement: Option<AttributeStatement>,
}

impl Assertion {
    /// Creates a new assertion issued now.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: super::new_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            subject: None,
            conditions: None,
            authn_statement: None,
            attribute_statement: None,
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Sets the conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Sets the authentication statement.
    #[must_use]
    pub fn with_authn_statement(mut self, statement: AuthnStatement) -> Self {
        self.authn_statement = Some(statement);
        self
    }

    /// Sets the attribute statement. An empty statement is dropped.
    #[must_use]
    pub fn with_attribute_statement(mut self, statement: AttributeStatement) -> Self {
        self.attribute_statement = (!statement.attributes.is_empty()).then_some(statement);
        self
    }

    /// Returns the subject's name identifier.
    #[must_use]
    pub fn name_id(&self) -> Option<&NameId> {
        self.subject.as_ref().and_then(|s| s.name_id.as_ref())
    }

    /// Returns the session index of the authentication statement.
    #[must_use]
    pub fn session_index(&self) -> Option<&str> {
        self.authn_statement
            .as_ref()
            .and_then(|s| s.session_index.as_deref())
    }

    /// Checks time bounds and audience.
    ///
    /// `skew` widens every time bound in both directions.
    ///
    /// # Errors
    ///
    /// [`SamlError::AssertionExpired`] outside the validity window,
    /// [`SamlError::AudienceMismatch`] when `audience` is not listed.
    pub fn validate(&self, audience: &str, now: DateTime<Utc>, skew: Duration) -> SamlResult<()> {
        if let Some(conditions) = &self.conditions {
            check_window(conditions.not_before, conditions.not_on_or_after, now, skew)?;

            if !conditions.audience_restrictions.is_empty() {
                let listed = conditions
                    .audience_restrictions
                    .iter()
                    .all(|ar| ar.audiences.iter().any(|a| a == audience));
                if !listed {
                    let actual = conditions
                        .audience_restrictions
                        .iter()
                        .flat_map(|ar| ar.audiences.iter().map(String::as_str))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(SamlError::AudienceMismatch {
                        expected: audience.to_string(),
                        actual,
                    });
                }
            }
        }

        if let Some(subject) = &self.subject {
            for confirmation in &subject.subject_confirmations {
                if let Some(data) = &confirmation.subject_confirmation_data {
                    check_window(data.not_before, data.not_on_or_after, now, skew)?;
                }
            }
        }

        Ok(())
    }

    /// Checks the bearer confirmation of a Web SSO assertion: at least one
    /// must name a local consumer service as `Recipient` and, when
    /// `request_id` is given and the confirmation names a request, answer
    /// that request.
    ///
    /// # Errors
    ///
    /// [`SamlError::MalformedMessage`] when no bearer confirmation fits.
    pub fn check_bearer(&self, request_id: Option<&str>, is_local: impl Fn(&str) -> bool) -> SamlResult<()> {
        let confirmed = self
            .subject
            .iter()
            .flat_map(|s| &s.subject_confirmations)
            .filter(|c| c.method == SubjectConfirmation::BEARER)
            .filter_map(|c| c.subject_confirmation_data.as_ref())
            .any(|data| {
                let recipient_ok = data.recipient.as_deref().is_some_and(&is_local);
                let answers = match (request_id, data.in_response_to.as_deref()) {
                    (Some(expected), Some(actual)) => expected == actual,
                    _ => true,
                };
                recipient_ok && answers
            });
        if confirmed {
            Ok(())
        } else {
            Err(SamlError::malformed(
                "no bearer confirmation addressed to this provider",
            ))
        }
    }

    /// Builds the XML element, declaring its own namespace so it can be
    /// signed and stored on its own.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new("saml:Assertion")
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("ID", &self.id)
            .with_attr("IssueInstant", format_instant(self.issue_instant))
            .with_attr("Version", SAML_VERSION)
            .with_child(super::issuer_element(&self.issuer))
            .with_opt_child(self.subject.as_ref().map(Subject::to_element))
            .with_opt_child(self.conditions.as_ref().map(Conditions::to_element))
            .with_opt_child(self.authn_statement.as_ref().map(AuthnStatement::to_element))
            .with_opt_child(
                self.attribute_statement
                    .as_ref()
                    .map(AttributeStatement::to_element),
            )
    }

    /// Parses an `Assertion` element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for missing required content.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        if element.local_name() == "EncryptedAssertion" {
            return Err(SamlError::malformed("encrypted assertions are not supported"));
        }
        super::expect_message(element, "Assertion")?;
        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: required_issuer(element)?,
            subject: element.child("Subject").map(Subject::from_element).transpose()?,
            conditions: element
                .child("Conditions")
                .map(Conditions::from_element)
                .transpose()?,
            authn_statement: element
                .child("AuthnStatement")
                .map(AuthnStatement::from_element)
                .transpose()?,
            attribute_statement: element
                .child("AttributeStatement")
                .map(AttributeStatement::from_element)
                .transpose()?,
        })
    }
}

fn check_window(
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    skew: Duration,
) -> SamlResult<()> {
    if let Some(not_before) = not_before {
        if now + skew < not_before {
            return Err(SamlError::AssertionExpired(format!(
                "not valid before {}",
                format_instant(not_before)
            )));
        }
    }
    if let Some(not_on_or_after) = not_on_or_after {
        if now - skew >= not_on_or_after {
            return Err(SamlError::AssertionExpired(format!(
                "expired at {}",
                format_instant(not_on_or_after)
            )));
        }
    }
    Ok(())
}

/// Subject of an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// The name identifier for the subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_id: Option<NameId>,

    /// Subject confirmations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_confirmations: Vec<SubjectConfirmation>,
}

impl Subject {
    /// Creates a new subject with a name ID.
    #[must_use]
    pub fn new(name_id: NameId) -> Self {
        Self {
            name_id: Some(name_id),
            subject_confirmations: Vec::new(),
        }
    }

    /// Adds a subject confirmation.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: SubjectConfirmation) -> Self {
        self.subject_confirmations.push(confirmation);
        self
    }

    fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("saml:Subject")
            .with_opt_child(self.name_id.as_ref().map(NameId::to_element));
        for confirmation in &self.subject_confirmations {
            element = element.with_child(confirmation.to_element());
        }
        element
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let name_id = match element.child("NameID") {
            Some(n) => Some(NameId::from_element(n)?),
            None => match element.child("EncryptedID") {
                Some(e) => Some(NameId::from_element(e)?),
                None => None,
            },
        };
        let subject_confirmations = element
            .children_named("SubjectConfirmation")
            .map(SubjectConfirmation::from_element)
            .collect::<SamlResult<Vec<_>>>()?;
        Ok(Self {
            name_id,
            subject_confirmations,
        })
    }
}

/// Subject confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmation {
    /// The confirmation method URI.
    pub method: String,

    /// Confirmation data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_confirmation_data: Option<SubjectConfirmationData>,
}

impl SubjectConfirmation {
    /// Bearer confirmation method URI.
    pub const BEARER: &'static str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

    /// Creates a bearer confirmation.
    #[must_use]
    pub fn bearer() -> Self {
        Self {
            method: Self::BEARER.to_string(),
            subject_confirmation_data: None,
        }
    }

    /// Sets the confirmation data.
    #[must_use]
    pub fn with_data(mut self, data: SubjectConfirmationData) -> Self {
        self.subject_confirmation_data = Some(data);
        self
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new("saml:SubjectConfirmation")
            .with_attr("Method", &self.method)
            .with_opt_child(
                self.subject_confirmation_data
                    .as_ref()
                    .map(SubjectConfirmationData::to_element),
            )
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            method: required_attr(element, "Method")?.to_string(),
            subject_confirmation_data: element
                .child("SubjectConfirmationData")
                .map(SubjectConfirmationData::from_element)
                .transpose()?,
        })
    }
}

/// Subject confirmation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmationData {
    /// The request this assertion answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// Time before which the subject cannot be confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Time after which the subject can no longer be confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Where the assertion may be presented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl SubjectConfirmationData {
    /// Creates confirmation data for a response to `request_id`.
    #[must_use]
    pub fn for_request(
        request_id: Option<String>,
        recipient: impl Into<String>,
        validity: Duration,
    ) -> Self {
        Self {
            in_response_to: request_id,
            not_before: None,
            not_on_or_after: Some(Utc::now() + validity),
            recipient: Some(recipient.into()),
        }
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new("saml:SubjectConfirmationData")
            .with_opt_attr("InResponseTo", self.in_response_to.as_ref())
            .with_opt_attr("NotBefore", self.not_before.map(format_instant))
            .with_opt_attr("NotOnOrAfter", self.not_on_or_after.map(format_instant))
            .with_opt_attr("Recipient", self.recipient.as_ref())
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            in_response_to: element.attr("InResponseTo").map(str::to_string),
            not_before: optional_instant(element, "NotBefore")?,
            not_on_or_after: optional_instant(element, "NotOnOrAfter")?,
            recipient: element.attr("Recipient").map(str::to_string),
        })
    }
}

/// Conditions for assertion validity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Time before which the assertion is not valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Time at or after which the assertion is not valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Audience restrictions; every restriction must list the relying party.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience_restrictions: Vec<AudienceRestriction>,

    /// One-time use condition.
    #[serde(default)]
    pub one_time_use: bool,
}

impl Conditions {
    /// Creates conditions valid from now for `validity`.
    #[must_use]
    pub fn with_validity(validity: Duration) -> Self {
        let now = Utc::now();
        Self {
            not_before: Some(now),
            not_on_or_after: Some(now + validity),
            audience_restrictions: Vec::new(),
            one_time_use: false,
        }
    }

    /// Adds an audience restriction.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience_restrictions.push(AudienceRestriction {
            audiences: vec![audience.into()],
        });
        self
    }

    fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("saml:Conditions")
            .with_opt_attr("NotBefore", self.not_before.map(format_instant))
            .with_opt_attr("NotOnOrAfter", self.not_on_or_after.map(format_instant));
        for restriction in &self.audience_restrictions {
            let mut ar = XmlElement::new("saml:AudienceRestriction");
            for audience in &restriction.audiences {
                ar = ar.with_child(XmlElement::new("saml:Audience").with_text(audience));
            }
            element = element.with_child(ar);
        }
        if self.one_time_use {
            element = element.with_child(XmlElement::new("saml:OneTimeUse"));
        }
        element
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            not_before: optional_instant(element, "NotBefore")?,
            not_on_or_after: optional_instant(element, "NotOnOrAfter")?,
            audience_restrictions: element
                .children_named("AudienceRestriction")
                .map(|ar| AudienceRestriction {
                    audiences: ar
                        .children_named("Audience")
                        .map(|a| a.text().trim().to_string())
                        .collect(),
                })
                .collect(),
            one_time_use: element.child("OneTimeUse").is_some(),
        })
    }
}

/// Audience restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceRestriction {
    /// Entity IDs allowed to rely on the assertion.
    pub audiences: Vec<String>,
}

/// Authentication statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnStatement {
    /// The time of authentication.
    pub authn_instant: DateTime<Utc>,

    /// Session index shared with the relying party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,

    /// Time at which the session ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_not_on_or_after: Option<DateTime<Utc>>,

    /// Authentication context class reference URI.
    pub authn_context_class_ref: String,
}

impl AuthnStatement {
    /// Creates a statement with a fresh session index.
    #[must_use]
    pub fn new(method: impl Into<String>, authn_instant: DateTime<Utc>) -> Self {
        Self {
            authn_instant,
            session_index: Some(super::new_id()),
            session_not_on_or_after: None,
            authn_context_class_ref: method.into(),
        }
    }

    /// Returns the parsed context class, if it is a well-known one.
    #[must_use]
    pub fn context_class(&self) -> Option<AuthnContextClass> {
        AuthnContextClass::from_uri(&self.authn_context_class_ref)
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new("saml:AuthnStatement")
            .with_attr("AuthnInstant", format_instant(self.authn_instant))
            .with_opt_attr("SessionIndex", self.session_index.as_ref())
            .with_opt_attr(
                "SessionNotOnOrAfter",
                self.session_not_on_or_after.map(format_instant),
            )
            .with_child(XmlElement::new("saml:AuthnContext").with_child(
                XmlElement::new("saml:AuthnContextClassRef").with_text(&self.authn_context_class_ref),
            ))
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let authn_context_class_ref = element
            .child("AuthnContext")
            .and_then(|ctx| ctx.child_text("AuthnContextClassRef"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| AuthnContextClass::Unspecified.uri().to_string());
        Ok(Self {
            authn_instant: parse_instant(required_attr(element, "AuthnInstant")?)?,
            session_index: element.attr("SessionIndex").map(str::to_string),
            session_not_on_or_after: optional_instant(element, "SessionNotOnOrAfter")?,
            authn_context_class_ref,
        })
    }
}

/// Attribute statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeStatement {
    /// Attributes in document order.
    pub attributes: Vec<Attribute>,
}

impl AttributeStatement {
    /// Creates a statement holding `attributes`.
    #[must_use]
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    /// Returns the values of the first attribute called `name`.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.values.as_slice())
    }

    fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("saml:AttributeStatement");
        for attribute in &self.attributes {
            element = element.with_child(attribute.to_element());
        }
        element
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        if element.child("EncryptedAttribute").is_some() {
            return Err(SamlError::malformed("encrypted attributes are not supported"));
        }
        let attributes = element
            .children_named("Attribute")
            .map(Attribute::from_element)
            .collect::<SamlResult<Vec<_>>>()?;
        Ok(Self { attributes })
    }
}

/// SAML Attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// The attribute name.
    pub name: String,

    /// Format URI of the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_format: Option<String>,

    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,

    /// Values, one `AttributeValue` each.
    #[serde(default)]
    pub values: Vec<String>,
}

impl Attribute {
    /// URI name format.
    pub const NAME_FORMAT_URI: &'static str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";

    /// Basic name format.
    pub const NAME_FORMAT_BASIC: &'static str =
        "urn:oasis:names:tc:SAML:2.0:attrname-format:basic";

    /// Creates an attribute with a single value.
    #[must_use]
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::multi(name, vec![value.into()])
    }

    /// Creates an attribute with several values.
    #[must_use]
    pub fn multi(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            name_format: None,
            friendly_name: None,
            values,
        }
    }

    /// Sets the friendly name.
    #[must_use]
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    /// Sets the name format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.name_format = Some(format.into());
        self
    }

    fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("saml:Attribute")
            .with_attr("Name", &self.name)
            .with_opt_attr("NameFormat", self.name_format.as_ref())
            .with_opt_attr("FriendlyName", self.friendly_name.as_ref());
        for value in &self.values {
            element = element.with_child(XmlElement::new("saml:AttributeValue").with_text(value));
        }
        element
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            name: required_attr(element, "Name")?.to_string(),
            name_format: element.attr("NameFormat").map(str::to_string),
            friendly_name: element.attr("FriendlyName").map(str::to_string),
            values: element
                .children_named("AttributeValue")
                .map(XmlElement::text)
                .collect(),
        })
    }
}

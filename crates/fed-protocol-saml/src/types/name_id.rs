//! Name identifiers.
//!
//! A name identifier correlates one principal across two providers.

use serde::{Deserialize, Serialize};

use super::NameIdFormat;
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML Name ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameId {
    /// The opaque identifier value.
    pub value: String,

    /// Format URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Domain of the asserting party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_qualifier: Option<String>,

    /// Entity ID of the relying party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,
}

impl NameId {
    /// Creates a name ID with no format.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
        }
    }

    /// Creates an email address name ID.
    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self::new(email).with_format(NameIdFormat::Email)
    }

    /// Creates a persistent name ID.
    #[must_use]
    pub fn persistent(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Persistent)
    }

    /// Creates a transient name ID.
    #[must_use]
    pub fn transient(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Transient)
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: NameIdFormat) -> Self {
        self.format = Some(format.uri().to_string());
        self
    }

    /// Sets the name qualifier.
    #[must_use]
    pub fn with_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.name_qualifier = Some(qualifier.into());
        self
    }

    /// Sets the SP name qualifier.
    #[must_use]
    pub fn with_sp_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.sp_name_qualifier = Some(qualifier.into());
        self
    }

    /// Returns the parsed format, *unspecified* when absent or unknown.
    #[must_use]
    pub fn parsed_format(&self) -> NameIdFormat {
        self.format
            .as_deref()
            .and_then(NameIdFormat::from_uri)
            .unwrap_or_default()
    }

    /// True when both identifiers name the same principal.
    ///
    /// Qualifiers are only compared when both sides carry them.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        fn same(a: Option<&String>, b: Option<&String>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        self.value == other.value
            && self.parsed_format() == other.parsed_format()
            && same(self.name_qualifier.as_ref(), other.name_qualifier.as_ref())
            && same(self.sp_name_qualifier.as_ref(), other.sp_name_qualifier.as_ref())
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        XmlElement::new("saml:NameID")
            .with_opt_attr("Format", self.format.as_ref())
            .with_opt_attr("NameQualifier", self.name_qualifier.as_ref())
            .with_opt_attr("SPNameQualifier", self.sp_name_qualifier.as_ref())
            .with_text(&self.value)
    }

    pub(crate) fn from_element(element: &XmlElement) -> SamlResult<Self> {
        if element.local_name() == "EncryptedID" {
            return Err(SamlError::malformed("encrypted name identifiers are not supported"));
        }
        let value = element.text().trim().to_string();
        if value.is_empty() {
            return Err(SamlError::malformed("empty NameID"));
        }
        Ok(Self {
            value,
            format: element.attr("Format").map(str::to_string),
            name_qualifier: element.attr("NameQualifier").map(str::to_string),
            sp_name_qualifier: element.attr("SPNameQualifier").map(str::to_string),
        })
    }
}

/// Name ID policy of an authentication request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIdPolicy {
    /// The requested format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The SP name qualifier for the name ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,

    /// Whether the IdP may create a new identifier.
    #[serde(default)]
    pub allow_create: bool,
}

impl NameIdPolicy {
    /// Creates a policy requesting a specific format.
    #[must_use]
    pub fn with_format(format: NameIdFormat) -> Self {
        Self {
            format: Some(format.uri().to_string()),
            sp_name_qualifier: None,
            allow_create: false,
        }
    }

    /// Sets whether new identifiers can be created.
    #[must_use]
    pub const fn allow_create(mut self, allow: bool) -> Self {
        self.allow_create = allow;
        self
    }

    /// Returns the parsed format.
    #[must_use]
    pub fn parsed_format(&self) -> Option<NameIdFormat> {
        self.format.as_deref().and_then(NameIdFormat::from_uri)
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        XmlElement::new("samlp:NameIDPolicy")
            .with_opt_attr("Format", self.format.as_ref())
            .with_opt_attr("SPNameQualifier", self.sp_name_qualifier.as_ref())
            .with_attr("AllowCreate", if self.allow_create { "true" } else { "false" })
    }

    pub(crate) fn from_element(element: &XmlElement) -> Self {
        Self {
            format: element.attr("Format").map(str::to_string),
            sp_name_qualifier: element.attr("SPNameQualifier").map(str::to_string),
            allow_create: matches!(element.attr("AllowCreate"), Some("true" | "1")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_id_email() {
        let name_id = NameId::email("user@example.com");
        assert_eq!(name_id.value, "user@example.com");
        assert_eq!(name_id.parsed_format(), NameIdFormat::Email);
    }

    #[test]
    fn unknown_format_reads_as_unspecified() {
        let mut name_id = NameId::new("x");
        assert_eq!(name_id.parsed_format(), NameIdFormat::Unspecified);
        name_id.format = Some("urn:example:custom".to_string());
        assert_eq!(name_id.parsed_format(), NameIdFormat::Unspecified);
    }

    #[test]
    fn name_id_element_keeps_qualifiers() {
        let name_id = NameId::persistent("abc123")
            .with_name_qualifier("https://idp.example/")
            .with_sp_name_qualifier("https://sp.example/");
        let xml = name_id.to_element().to_xml();
        let parsed = NameId::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();
        assert_eq!(parsed, name_id);
    }

    #[test]
    fn matching_ignores_missing_qualifiers() {
        let issued = NameId::persistent("abc").with_sp_name_qualifier("https://sp.example/");
        assert!(issued.matches(&NameId::persistent("abc")));
        assert!(!issued.matches(&NameId::transient("abc")));
        assert!(!issued.matches(&NameId::persistent("abc").with_sp_name_qualifier("other")));
    }

    #[test]
    fn encrypted_id_is_rejected() {
        let element = XmlElement::parse("<saml:EncryptedID>x</saml:EncryptedID>").unwrap();
        assert!(NameId::from_element(&element).is_err());
    }

    #[test]
    fn policy_allow_create() {
        let policy = NameIdPolicy::with_format(NameIdFormat::Persistent).allow_create(true);
        let element = XmlElement::parse(&policy.to_element().to_xml()).unwrap();
        let parsed = NameIdPolicy::from_element(&element);
        assert_eq!(parsed.parsed_format(), Some(NameIdFormat::Persistent));
        assert!(parsed.allow_create);
    }
}

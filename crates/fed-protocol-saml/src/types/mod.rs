//! SAML protocol types.

mod artifact;
mod assertion;
mod authn_request;
mod constants;
mod logout;
mod name_id;
mod response;
mod status;

pub use artifact::*;
pub use assertion::*;
pub use authn_request::*;
pub use constants::*;
pub use logout::*;
pub use name_id::*;
pub use response::*;
pub use status::*;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// Generates a fresh message identifier.
///
/// XML IDs must not start with a digit, hence the prefix.
pub(crate) fn new_id() -> String {
    format!("_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SamlError::malformed(format!("invalid timestamp: {value}")))
}

pub(crate) fn required_attr<'a>(element: &'a XmlElement, name: &str) -> SamlResult<&'a str> {
    element.attr(name).ok_or_else(|| {
        SamlError::malformed(format!("{} is missing the {name} attribute", element.local_name()))
    })
}

pub(crate) fn optional_instant(element: &XmlElement, name: &str) -> SamlResult<Option<DateTime<Utc>>> {
    element.attr(name).map(parse_instant).transpose()
}

/// Checks the element name and SAML version of a protocol message root.
pub(crate) fn expect_message(element: &XmlElement, local: &str) -> SamlResult<()> {
    if element.local_name() != local {
        return Err(SamlError::malformed(format!(
            "expected {local}, found {}",
            element.local_name()
        )));
    }
    let version = required_attr(element, "Version")?;
    if version != SAML_VERSION {
        return Err(SamlError::malformed(format!("unsupported SAML version: {version}")));
    }
    Ok(())
}

/// Builds the `saml:Issuer` element.
pub(crate) fn issuer_element(issuer: &str) -> XmlElement {
    XmlElement::new("saml:Issuer").with_text(issuer)
}

pub(crate) fn required_issuer(element: &XmlElement) -> SamlResult<String> {
    element
        .child_text("Issuer")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SamlError::malformed(format!("{} has no Issuer", element.local_name())))
}

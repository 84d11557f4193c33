//! SOAP binding.

use crate::error::{SamlError, SamlResult};
use crate::types::SOAP_ENV_NS;
use crate::xml::{XmlElement, XmlNode};

/// Wraps a message into a SOAP 1.1 envelope and serializes it.
#[must_use]
pub fn wrap_soap(message: XmlElement) -> String {
    XmlElement::new("soap-env:Envelope")
        .with_attr("xmlns:soap-env", SOAP_ENV_NS)
        .with_child(XmlElement::new("soap-env:Body").with_child(message))
        .to_xml()
}

/// Extracts the message from a parsed envelope.
pub(crate) fn unwrap_envelope(envelope: XmlElement) -> SamlResult<XmlElement> {
    let body = envelope
        .children
        .into_iter()
        .find_map(|node| match node {
            XmlNode::Element(e) if e.local_name() == "Body" => Some(e),
            _ => None,
        })
        .ok_or_else(|| SamlError::malformed("SOAP envelope has no Body"))?;

    body.children
        .into_iter()
        .find_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
        .ok_or_else(|| SamlError::malformed("SOAP Body is empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::decode_inbound;
    use fed_core::HttpMethod;

    #[test]
    fn envelope_roundtrip() {
        let message = XmlElement::new("samlp:LogoutRequest").with_attr("ID", "_1");
        let soap = wrap_soap(message);
        assert!(soap.starts_with("<soap-env:Envelope"));

        let decoded = decode_inbound(&soap, 4096).unwrap();
        assert_eq!(decoded.http_method, HttpMethod::Soap);
        assert_eq!(decoded.xml().unwrap().local_name(), "LogoutRequest");
    }

    #[test]
    fn empty_body_is_malformed() {
        let envelope = XmlElement::parse(
            "<s:Envelope xmlns:s=\"urn:s\"><s:Body></s:Body></s:Envelope>",
        )
        .unwrap();
        assert!(unwrap_envelope(envelope).is_err());
    }
}

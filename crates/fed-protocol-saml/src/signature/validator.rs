//! Signature validation.
//!
//! Verification always uses the key registered for the peer. Certificates
//! embedded in `KeyInfo` are ignored.

use base64::{engine::general_purpose::STANDARD, Engine};
use fed_crypto::{DigestAlgorithm, SignatureAlgorithm, VerifyingKey};

use crate::bindings::QuerySignature;
use crate::error::{SamlError, SamlResult};
use crate::types::canonicalization_algorithms;
use crate::xml::XmlElement;

fn invalid(msg: impl Into<String>) -> SamlError {
    SamlError::SignatureInvalid(msg.into())
}

/// True when `element` has a direct `Signature` child.
#[must_use]
pub fn has_enveloped_signature(element: &XmlElement) -> bool {
    element.child("Signature").is_some()
}

/// Verifies the enveloped signature of `element` with `key`.
///
/// The signature must be a direct child and its single reference must
/// point at the element's own `ID`, so a signature moved in from another
/// element never validates.
///
/// # Errors
///
/// Returns [`SamlError::SignatureInvalid`] if the signature is absent,
/// references another element, uses unknown algorithms or does not match.
pub fn verify_enveloped(element: &XmlElement, key: &VerifyingKey) -> SamlResult<SignatureAlgorithm> {
    let signature = element
        .child("Signature")
        .ok_or_else(|| invalid(format!("{} is not signed", element.local_name())))?;
    let signed_info = signature
        .child("SignedInfo")
        .ok_or_else(|| invalid("Signature has no SignedInfo"))?;

    let c14n = signed_info
        .child("CanonicalizationMethod")
        .and_then(|c| c.attr("Algorithm"));
    if c14n != Some(canonicalization_algorithms::EXCLUSIVE_C14N) {
        return Err(invalid("unsupported canonicalization method"));
    }

    let sig_uri = signed_info
        .child("SignatureMethod")
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| invalid("SignedInfo has no SignatureMethod"))?;
    let algorithm = SignatureAlgorithm::from_uri(sig_uri)
        .ok_or_else(|| invalid(format!("unknown signature method {sig_uri}")))?;
    if algorithm.is_deprecated() {
        tracing::warn!(algorithm = sig_uri, "accepting legacy SHA-1 signature");
    }

    let mut references = signed_info.children_named("Reference");
    let reference = references
        .next()
        .ok_or_else(|| invalid("SignedInfo has no Reference"))?;
    if references.next().is_some() {
        return Err(invalid("multiple references are not accepted"));
    }

    let id = element
        .attr("ID")
        .ok_or_else(|| invalid("signed element has no ID"))?;
    if reference.attr("URI") != Some(format!("#{id}").as_str()) {
        return Err(invalid("signature references another element"));
    }

    if let Some(transforms) = reference.child("Transforms") {
        for transform in transforms.children_named("Transform") {
            match transform.attr("Algorithm") {
                Some(canonicalization_algorithms::ENVELOPED_SIGNATURE)
                | Some(canonicalization_algorithms::EXCLUSIVE_C14N) => {}
                other => {
                    return Err(invalid(format!(
                        "unsupported transform {}",
                        other.unwrap_or("(none)")
                    )))
                }
            }
        }
    }

    let digest_uri = reference
        .child("DigestMethod")
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| invalid("Reference has no DigestMethod"))?;
    let digest_alg = DigestAlgorithm::from_uri(digest_uri)
        .ok_or_else(|| invalid(format!("unknown digest method {digest_uri}")))?;
    let expected = decode_b64(
        &reference
            .child_text("DigestValue")
            .ok_or_else(|| invalid("Reference has no DigestValue"))?,
    )?;

    let actual = fed_crypto::digest(digest_alg, element.canonicalize_enveloped().as_bytes());
    if actual != expected {
        return Err(invalid("digest mismatch"));
    }

    let signature_value = decode_b64(
        &signature
            .child_text("SignatureValue")
            .ok_or_else(|| invalid("Signature has no SignatureValue"))?,
    )?;
    key.verify(algorithm, signed_info.canonicalize().as_bytes(), &signature_value)
        .map_err(|_| invalid("signature value does not match"))?;

    Ok(algorithm)
}

/// Verifies a redirect-binding query signature with `key`.
///
/// # Errors
///
/// Returns [`SamlError::SignatureInvalid`] on mismatch.
pub fn verify_query(signature: &QuerySignature, key: &VerifyingKey) -> SamlResult<()> {
    key.verify(
        signature.algorithm,
        signature.signed_data.as_bytes(),
        &signature.signature,
    )
    .map_err(|_| invalid("query signature does not match"))
}

fn decode_b64(value: &str) -> SamlResult<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| invalid(format!("bad base64 in signature: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::XmlSigner;
    use crate::types::XMLDSIG_NS;
    use crate::xml::XmlNode;
    use fed_crypto::SigningKey;

    fn new_key() -> SigningKey {
        let cert = rcgen::generate_simple_self_signed(vec!["idp.example".to_string()]).unwrap();
        SigningKey::from_der(
            &cert.signing_key.serialize_der(),
            SignatureAlgorithm::RsaSha256,
        )
        .unwrap()
    }

    fn document() -> XmlElement {
        XmlElement::parse(
            r#"<samlp:Response xmlns:samlp="urn:p" xmlns:saml="urn:a" ID="_r1"><saml:Issuer>https://idp.example/</saml:Issuer><samlp:Status>ok</samlp:Status></samlp:Response>"#,
        )
        .unwrap()
    }

    #[test]
    fn sign_then_verify_after_reparse() {
        let key = new_key();
        let mut doc = document();
        XmlSigner::new(&key, None).sign_element(&mut doc).unwrap();

        assert_eq!(doc.elements().nth(1).unwrap().local_name(), "Signature");

        let reparsed = XmlElement::parse(&doc.to_xml()).unwrap();
        let alg = verify_enveloped(&reparsed, &key.verifying_key()).unwrap();
        assert_eq!(alg, SignatureAlgorithm::EcdsaSha256);
    }

    #[test]
    fn tampered_content_fails() {
        let key = new_key();
        let mut doc = document();
        XmlSigner::new(&key, None).sign_element(&mut doc).unwrap();

        let tampered = doc.to_xml().replace("ok", "OK");
        let reparsed = XmlElement::parse(&tampered).unwrap();
        let err = verify_enveloped(&reparsed, &key.verifying_key()).unwrap_err();
        assert!(matches!(err, SamlError::SignatureInvalid(_)));
    }

    #[test]
    fn wrong_key_fails() {
        let key = new_key();
        let other = new_key();
        let mut doc = document();
        XmlSigner::new(&key, None).sign_element(&mut doc).unwrap();

        assert!(verify_enveloped(&doc, &other.verifying_key()).is_err());
    }

    #[test]
    fn missing_signature_fails() {
        let key = new_key();
        assert!(!has_enveloped_signature(&document()));
        assert!(verify_enveloped(&document(), &key.verifying_key()).is_err());
    }

    #[test]
    fn signature_moved_to_another_id_fails() {
        let key = new_key();
        let mut doc = document();
        XmlSigner::new(&key, None).sign_element(&mut doc).unwrap();
        for (k, v) in &mut doc.attributes {
            if k == "ID" {
                *v = "_other".to_string();
            }
        }
        assert!(verify_enveloped(&doc, &key.verifying_key()).is_err());
    }

    #[test]
    fn key_info_carries_certificate() {
        let key = new_key();
        let mut doc = document();
        XmlSigner::new(&key, Some(b"cert")).sign_element(&mut doc).unwrap();
        assert!(doc.find("X509Certificate").is_some());
        assert!(verify_enveloped(&doc, &key.verifying_key()).is_ok());
    }

    #[test]
    fn pretty_printed_assertion_with_inherited_namespace_verifies() {
        let key = new_key();
        let mut doc = XmlElement::parse(
            r#"<samlp:Response xmlns:samlp="urn:p" xmlns:saml="urn:a" ID="_r1">
    <saml:Issuer>https://idp.example/</saml:Issuer>
    <saml:Assertion ID="_a1">
        <saml:Issuer>https://idp.example/</saml:Issuer>
        <saml:Subject>
            <saml:NameID>alice</saml:NameID>
        </saml:Subject>
    </saml:Assertion>
</samlp:Response>"#,
        )
        .unwrap();
        for node in &mut doc.children {
            if let XmlNode::Element(e) = node {
                if e.local_name() == "Assertion" {
                    XmlSigner::new(&key, None).sign_element(e).unwrap();
                }
            }
        }

        let reparsed = XmlElement::parse(&doc.to_xml()).unwrap();
        let assertion = reparsed.child("Assertion").unwrap();
        assert!(!assertion.attributes.iter().any(|(k, _)| k == "xmlns:saml"));
        verify_enveloped(assertion, &key.verifying_key()).unwrap();

        let extracted = XmlElement::parse(&assertion.to_xml()).unwrap();
        verify_enveloped(&extracted, &key.verifying_key()).unwrap();

        let reindented = doc.to_xml().replace("<saml:NameID>", "\n<saml:NameID>");
        let reparsed = XmlElement::parse(&reindented).unwrap();
        assert!(verify_enveloped(reparsed.child("Assertion").unwrap(), &key.verifying_key()).is_err());
    }

    #[test]
    fn signed_info_may_inherit_the_dsig_namespace() {
        let key = new_key();
        let mut doc = document();
        XmlSigner::new(&key, None).sign_element(&mut doc).unwrap();

        let xml = doc.to_xml();
        let declared = format!("<ds:SignedInfo xmlns:ds=\"{XMLDSIG_NS}\">");
        assert!(xml.contains(&declared));
        let inherited = xml.replacen(&declared, "<ds:SignedInfo>", 1);

        let reparsed = XmlElement::parse(&inherited).unwrap();
        verify_enveloped(&reparsed, &key.verifying_key()).unwrap();
    }
}

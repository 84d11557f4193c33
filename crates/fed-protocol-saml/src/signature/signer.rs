//! Signature creation.

use base64::{engine::general_purpose::STANDARD, Engine};
use fed_crypto::SigningKey;

use crate::error::{SamlError, SamlResult};
use crate::types::{canonicalization_algorithms, XMLDSIG_NS};
use crate::xml::XmlElement;

/// Signs elements and redirect queries with the local key.
#[derive(Debug, Clone, Copy)]
pub struct XmlSigner<'a> {
    key: &'a SigningKey,
    certificate_der: Option<&'a [u8]>,
}

impl<'a> XmlSigner<'a> {
    /// Creates a signer. The certificate, when given, is published in
    /// `KeyInfo`.
    #[must_use]
    pub const fn new(key: &'a SigningKey, certificate_der: Option<&'a [u8]>) -> Self {
        Self {
            key,
            certificate_der,
        }
    }

    /// Returns the signature method URI.
    #[must_use]
    pub fn algorithm_uri(&self) -> &'static str {
        self.key.algorithm().uri()
    }

    /// Inserts an enveloped signature over `element`.
    ///
    /// The element must carry an `ID` attribute. Any previous direct
    /// signature is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] without an `ID`, or a crypto
    /// error if signing fails.
    pub fn sign_element(&self, element: &mut XmlElement) -> SamlResult<()> {
        let id = element
            .attr("ID")
            .ok_or_else(|| SamlError::malformed("cannot sign an element without ID"))?
            .to_string();

        if let Some(pos) = element.child_position("Signature") {
            element.children.remove(pos);
        }

        let algorithm = self.key.algorithm();
        let digest_alg = algorithm.digest();
        let digest = fed_crypto::digest(digest_alg, element.canonicalize_enveloped().as_bytes());

        let signed_info = build_signed_info(
            &id,
            algorithm.uri(),
            digest_alg.uri(),
            &STANDARD.encode(digest),
        );
        let signature_value = self.key.sign(signed_info.canonicalize().as_bytes())?;

        let mut signature = XmlElement::new("ds:Signature")
            .with_attr("xmlns:ds", XMLDSIG_NS)
            .with_child(signed_info)
            .with_child(XmlElement::new("ds:SignatureValue").with_text(STANDARD.encode(signature_value)));
        if let Some(cert) = self.certificate_der {
            signature = signature.with_child(
                XmlElement::new("ds:KeyInfo").with_child(
                    XmlElement::new("ds:X509Data")
                        .with_child(XmlElement::new("ds:X509Certificate").with_text(STANDARD.encode(cert))),
                ),
            );
        }

        let position = element.child_position("Issuer").map_or(0, |p| p + 1);
        element.insert_child(position, signature);
        Ok(())
    }

    /// Signs a redirect-binding query.
    ///
    /// `query` must already hold the message, relay state and `SigAlg`
    /// parameters, URL-encoded and in that order. Returns the base64
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if signing fails.
    pub fn sign_query(&self, query: &str) -> SamlResult<String> {
        let signature = self.key.sign(query.as_bytes())?;
        Ok(STANDARD.encode(signature))
    }
}

fn build_signed_info(id: &str, signature_uri: &str, digest_uri: &str, digest_b64: &str) -> XmlElement {
    let exc_c14n = canonicalization_algorithms::EXCLUSIVE_C14N;
    XmlElement::new("ds:SignedInfo")
        .with_attr("xmlns:ds", XMLDSIG_NS)
        .with_child(XmlElement::new("ds:CanonicalizationMethod").with_attr("Algorithm", exc_c14n))
        .with_child(XmlElement::new("ds:SignatureMethod").with_attr("Algorithm", signature_uri))
        .with_child(
            XmlElement::new("ds:Reference")
                .with_attr("URI", format!("#{id}"))
                .with_child(
                    XmlElement::new("ds:Transforms")
                        .with_child(
                            XmlElement::new("ds:Transform").with_attr(
                                "Algorithm",
                                canonicalization_algorithms::ENVELOPED_SIGNATURE,
                            ),
                        )
                        .with_child(XmlElement::new("ds:Transform").with_attr("Algorithm", exc_c14n)),
                )
                .with_child(XmlElement::new("ds:DigestMethod").with_attr("Algorithm", digest_uri))
                .with_child(XmlElement::new("ds:DigestValue").with_text(digest_b64)),
        )
}

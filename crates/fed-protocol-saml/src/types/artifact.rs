//! HTTP-Artifact binding types.
//!
//! A type-0x0004 artifact is 44 bytes: type code, endpoint index, SHA-1 of
//! the issuer's entity ID and a random message handle, base64 encoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};

use super::{
    format_instant, parse_instant, required_attr, required_issuer, Status, SAMLP_NS, SAML_NS,
    SAML_VERSION,
};
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML2 artifact type code.
pub const ARTIFACT_TYPE_CODE: u16 = 0x0004;

const ARTIFACT_LEN: usize = 44;

/// Decoded SAML2 artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Index of the issuer's artifact resolution endpoint.
    pub endpoint_index: u16,
    /// SHA-1 of the issuer's entity ID.
    pub source_id: [u8; 20],
    /// Random handle naming the stored message.
    pub message_handle: [u8; 20],
}

impl Artifact {
    /// Creates an artifact for a message issued by `entity_id`.
    #[must_use]
    pub fn new(entity_id: &str, endpoint_index: u16) -> Self {
        Self {
            endpoint_index,
            source_id: Self::source_id_for(entity_id),
            message_handle: fed_crypto::random::generate_message_handle(),
        }
    }

    /// Returns the source ID of an entity.
    #[must_use]
    pub fn source_id_for(entity_id: &str) -> [u8; 20] {
        let digest = fed_crypto::sha1(entity_id.as_bytes());
        let mut id = [0u8; 20];
        id.copy_from_slice(&digest[..20]);
        id
    }

    /// True when this artifact was issued by `entity_id`.
    #[must_use]
    pub fn issued_by(&self, entity_id: &str) -> bool {
        self.source_id == Self::source_id_for(entity_id)
    }

    /// Encodes the artifact as base64.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(ARTIFACT_LEN);
        bytes.extend_from_slice(&ARTIFACT_TYPE_CODE.to_be_bytes());
        bytes.extend_from_slice(&self.endpoint_index.to_be_bytes());
        bytes.extend_from_slice(&self.source_id);
        bytes.extend_from_slice(&self.message_handle);
        STANDARD.encode(bytes)
    }

    /// Decodes a base64 artifact.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for bad base64, a wrong length
    /// or a type code other than 0x0004.
    pub fn decode(encoded: &str) -> SamlResult<Self> {
        let bytes = STANDARD.decode(encoded.trim())?;
        if bytes.len() != ARTIFACT_LEN {
            return Err(SamlError::malformed("artifact has the wrong length"));
        }
        let type_code = u16::from_be_bytes([bytes[0], bytes[1]]);
        if type_code != ARTIFACT_TYPE_CODE {
            return Err(SamlError::malformed(format!(
                "unsupported artifact type {type_code:#06x}"
            )));
        }
        let mut source_id = [0u8; 20];
        source_id.copy_from_slice(&bytes[4..24]);
        let mut message_handle = [0u8; 20];
        message_handle.copy_from_slice(&bytes[24..44]);
        Ok(Self {
            endpoint_index: u16::from_be_bytes([bytes[2], bytes[3]]),
            source_id,
            message_handle,
        })
    }
}

/// Request to dereference an artifact, sent over SOAP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResolve {
    /// Unique identifier for this request.
    pub id: String,
    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,
    /// Entity ID of the requester.
    pub issuer: String,
    /// Artifact resolution endpoint.
    pub destination: Option<String>,
    /// The base64 artifact.
    pub artifact: String,
}

impl ArtifactResolve {
    /// Creates a resolve request for `artifact`.
    #[must_use]
    pub fn new(issuer: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            id: super::new_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            artifact: artifact.into(),
        }
    }

    /// Builds the document element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new("samlp:ArtifactResolve")
            .with_attr("xmlns:samlp", SAMLP_NS)
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("ID", &self.id)
            .with_attr("Version", SAML_VERSION)
            .with_attr("IssueInstant", format_instant(self.issue_instant))
            .with_opt_attr("Destination", self.destination.as_ref())
            .with_child(super::issuer_element(&self.issuer))
            .with_child(XmlElement::new("samlp:Artifact").with_text(&self.artifact))
    }

    /// Parses a `samlp:ArtifactResolve` document element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for missing content.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        super::expect_message(element, "ArtifactResolve")?;
        let artifact = element
            .child_text("Artifact")
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SamlError::malformed("ArtifactResolve has no Artifact"))?;
        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: required_issuer(element)?,
            destination: element.attr("Destination").map(str::to_string),
            artifact,
        })
    }
}

/// Answer to an [`ArtifactResolve`], embedding the referenced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// The resolve request being answered.
    pub in_response_to: Option<String>,
    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,
    /// Entity ID of the responder.
    pub issuer: String,
    /// Outcome of the resolution.
    pub status: Status,
    /// The dereferenced protocol message.
    pub message: Option<XmlElement>,
}

impl ArtifactResponse {
    /// Creates a response carrying `message`.
    #[must_use]
    pub fn new(issuer: impl Into<String>, status: Status, message: Option<XmlElement>) -> Self {
        Self {
            id: super::new_id(),
            in_response_to: None,
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            status,
            message,
        }
    }

    /// Builds the document element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new("samlp:ArtifactResponse")
            .with_attr("xmlns:samlp", SAMLP_NS)
            .with_attr("xmlns:saml", SAML_NS)
            .with_attr("ID", &self.id)
            .with_attr("Version", SAML_VERSION)
            .with_attr("IssueInstant", format_instant(self.issue_instant))
            .with_opt_attr("InResponseTo", self.in_response_to.as_ref())
            .with_child(super::issuer_element(&self.issuer))
            .with_child(self.status.to_element())
            .with_opt_child(self.message.clone())
    }

    /// Parses a `samlp:ArtifactResponse` document element.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::MalformedMessage`] for missing content.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        super::expect_message(element, "ArtifactResponse")?;
        let status = element
            .child("Status")
            .ok_or_else(|| SamlError::malformed("ArtifactResponse has no Status"))
            .and_then(Status::from_element)?;
        let message = element
            .elements()
            .find(|e| !matches!(e.local_name(), "Issuer" | "Signature" | "Status" | "Extensions"))
            .cloned();
        Ok(Self {
            id: required_attr(element, "ID")?.to_string(),
            in_response_to: element.attr("InResponseTo").map(str::to_string),
            issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
            issuer: required_issuer(element)?,
            status,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_layout() {
        let artifact = Artifact::new("https://idp.example/", 1);
        let encoded = artifact.encode();
        let raw = STANDARD.decode(&encoded).unwrap();

        assert_eq!(raw.len(), 44);
        assert_eq!(&raw[..2], &[0x00, 0x04]);
        assert_eq!(&raw[2..4], &[0x00, 0x01]);

        let decoded = Artifact::decode(&encoded).unwrap();
        assert_eq!(decoded, artifact);
        assert!(decoded.issued_by("https://idp.example/"));
        assert!(!decoded.issued_by("https://other.example/"));
    }

    #[test]
    fn artifact_rejects_wrong_type() {
        let mut raw = vec![0x00, 0x02, 0x00, 0x00];
        raw.extend_from_slice(&[0u8; 40]);
        assert!(Artifact::decode(&STANDARD.encode(raw)).is_err());
        assert!(Artifact::decode("AAAA").is_err());
    }

    #[test]
    fn artifact_response_embeds_message() {
        let inner = XmlElement::new("samlp:Response").with_attr("ID", "_inner");
        let response = ArtifactResponse::new("https://idp.example/", Status::success(), Some(inner));
        let xml = response.to_element().to_xml();
        let parsed = ArtifactResponse::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();
        assert_eq!(parsed.message.unwrap().attr("ID"), Some("_inner"));
    }

    #[test]
    fn artifact_resolve_element() {
        let resolve = ArtifactResolve::new("https://sp.example/", "AAQAAA==");
        let xml = resolve.to_element().to_xml();
        let parsed = ArtifactResolve::from_element(&XmlElement::parse(&xml).unwrap()).unwrap();
        assert_eq!(parsed.artifact, "AAQAAA==");
    }
}

//! SAML bindings.
//!
//! - **HTTP-Redirect**: deflated, base64 and URL-encoded in the query, with
//!   an optional detached query signature
//! - **HTTP-POST**: base64 form field
//! - **HTTP-Artifact**: a reference resolved later over SOAP
//! - **SOAP**: the message is the body of a SOAP 1.1 envelope
//!
//! [`decode_inbound`] accepts any of these shapes and reports which one
//! was used.

mod post;
mod redirect;
mod soap;

pub use post::*;
pub use redirect::*;
pub use soap::*;

use base64::{engine::general_purpose::STANDARD, Engine};
use fed_core::HttpMethod;
use fed_crypto::SignatureAlgorithm;

use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// Query or form parameter carrying a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageParam {
    /// `SAMLRequest`.
    Request,
    /// `SAMLResponse`.
    Response,
    /// `SAMLart`.
    Artifact,
}

impl MessageParam {
    /// Returns the parameter name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
            Self::Artifact => "SAMLart",
        }
    }
}

/// Outbound message descriptor produced by a build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination URL; for redirect and artifact-GET it carries the
    /// whole message.
    pub url: String,
    /// Body for POST (base64 message or artifact) and SOAP (envelope).
    pub body: Option<String>,
    /// Binding used.
    pub http_method: HttpMethod,
    /// Relay state to send along.
    pub relay_state: Option<String>,
    /// Parameter that carries `body` in a form post.
    pub param: MessageParam,
}

impl OutboundMessage {
    /// Renders an auto-submitting HTML form for POST-style messages.
    #[must_use]
    pub fn html_form(&self) -> Option<String> {
        match (self.http_method, &self.body) {
            (HttpMethod::Post | HttpMethod::ArtifactPost, Some(body)) => Some(post::auto_submit_form(
                &self.url,
                self.param,
                body,
                self.relay_state.as_deref(),
            )),
            _ => None,
        }
    }
}

/// Detached signature of a redirect-binding query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySignature {
    /// The exact bytes that were signed.
    pub signed_data: String,
    /// Signature method.
    pub algorithm: SignatureAlgorithm,
    /// Raw signature.
    pub signature: Vec<u8>,
}

/// Content of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    /// A protocol message.
    Xml(XmlElement),
    /// An artifact to resolve.
    Artifact(String),
}

/// An inbound message with its transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Message content.
    pub payload: InboundPayload,
    /// Binding the message arrived with.
    pub http_method: HttpMethod,
    /// Relay state sent along.
    pub relay_state: Option<String>,
    /// Query signature, for signed redirect messages.
    pub query_signature: Option<QuerySignature>,
}

impl DecodedMessage {
    /// Returns the XML payload.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::UnsupportedBinding`] for artifacts.
    pub fn xml(&self) -> SamlResult<&XmlElement> {
        match &self.payload {
            InboundPayload::Xml(element) => Ok(element),
            InboundPayload::Artifact(_) => Err(SamlError::UnsupportedBinding(
                "artifact must be resolved before processing".to_string(),
            )),
        }
    }
}

/// Decodes a message in any supported binding.
///
/// Accepted shapes: a SOAP envelope or bare XML document; a query string or
/// URL holding `SAMLRequest`, `SAMLResponse` or `SAMLart`; a base64 POST
/// field value (message or artifact).
///
/// # Errors
///
/// Returns [`SamlError::MalformedMessage`] when nothing decodable is found
/// or the decoded message exceeds `max_size` bytes.
pub fn decode_inbound(message: &str, max_size: usize) -> SamlResult<DecodedMessage> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(SamlError::malformed("empty message"));
    }
    if trimmed.len() > max_size.saturating_mul(2) {
        return Err(SamlError::malformed("message too large"));
    }

    if trimmed.starts_with('<') {
        let element = XmlElement::parse(trimmed)?;
        if element.local_name() == "Envelope" {
            return Ok(DecodedMessage {
                payload: InboundPayload::Xml(soap::unwrap_envelope(element)?),
                http_method: HttpMethod::Soap,
                relay_state: None,
                query_signature: None,
            });
        }
        return Ok(DecodedMessage {
            payload: InboundPayload::Xml(element),
            http_method: HttpMethod::Post,
            relay_state: None,
            query_signature: None,
        });
    }

    if ["SAMLRequest=", "SAMLResponse=", "SAMLart="]
        .iter()
        .any(|p| trimmed.contains(p))
    {
        return redirect::decode_query(trimmed, max_size);
    }

    post::decode_form_value(trimmed, max_size)
}

fn decode_base64(value: &str) -> SamlResult<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

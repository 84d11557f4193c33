//! HTTP-Redirect binding.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use fed_core::HttpMethod;
use fed_crypto::SignatureAlgorithm;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::{DecodedMessage, InboundPayload, MessageParam, QuerySignature};
use crate::error::{SamlError, SamlResult};
use crate::signature::XmlSigner;
use crate::xml::XmlElement;

/// Builds a redirect URL carrying `xml`.
///
/// With a signer, `SigAlg` and `Signature` are appended; the signature
/// covers the message, relay state and `SigAlg` parameters in that order.
///
/// # Errors
///
/// Returns an error if compression or signing fails.
pub fn encode_redirect(
    destination: &str,
    param: MessageParam,
    xml: &str,
    relay_state: Option<&str>,
    signer: Option<&XmlSigner<'_>>,
) -> SamlResult<String> {
    let compressed = deflate_compress(xml.as_bytes())?;
    let mut query = format!(
        "{}={}",
        param.as_str(),
        urlencoding::encode(&STANDARD.encode(compressed))
    );
    if let Some(rs) = relay_state {
        query.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
    }
    if let Some(signer) = signer {
        query.push_str(&format!("&SigAlg={}", urlencoding::encode(signer.algorithm_uri())));
        let signature = signer.sign_query(&query)?;
        query.push_str(&format!("&Signature={}", urlencoding::encode(&signature)));
    }
    Ok(append_query(destination, &query))
}

/// Builds an artifact-GET URL.
#[must_use]
pub fn encode_artifact_url(destination: &str, artifact: &str, relay_state: Option<&str>) -> String {
    let mut query = format!("SAMLart={}", urlencoding::encode(artifact));
    if let Some(rs) = relay_state {
        query.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
    }
    append_query(destination, &query)
}

fn append_query(destination: &str, query: &str) -> String {
    let separator = if destination.contains('?') { '&' } else { '?' };
    format!("{destination}{separator}{query}")
}

/// Decodes a query string or full URL.
pub(crate) fn decode_query(input: &str, max_size: usize) -> SamlResult<DecodedMessage> {
    let query = input.split_once('?').map_or(input, |(_, q)| q);
    let query = query.split_once('#').map_or(query, |(q, _)| q);

    let mut message: Option<(MessageParam, &str)> = None;
    let mut artifact = None;
    let mut relay_state = None;
    let mut sig_alg = None;
    let mut signature = None;

    for segment in query.split('&') {
        let (key, raw) = segment.split_once('=').unwrap_or((segment, ""));
        match key {
            "SAMLRequest" => message = Some((MessageParam::Request, raw)),
            "SAMLResponse" => message = Some((MessageParam::Response, raw)),
            "SAMLart" => artifact = Some(raw),
            "RelayState" => relay_state = Some(raw),
            "SigAlg" => sig_alg = Some(raw),
            "Signature" => signature = Some(raw),
            _ => {}
        }
    }

    let relay_state_value = relay_state.map(form_decode).transpose()?;

    if let Some(raw) = artifact {
        return Ok(DecodedMessage {
            payload: InboundPayload::Artifact(url_decode(raw)?),
            http_method: HttpMethod::ArtifactGet,
            relay_state: relay_state_value,
            query_signature: None,
        });
    }

    let (param, raw) =
        message.ok_or_else(|| SamlError::malformed("no SAML message in query"))?;
    let compressed = super::decode_base64(&url_decode(raw)?)?;
    let inflated = deflate_decompress(&compressed, max_size)?;
    let xml = String::from_utf8(inflated)
        .map_err(|_| SamlError::malformed("redirect message is not UTF-8"))?;

    let query_signature = match (signature, sig_alg) {
        (None, _) => None,
        (Some(_), None) => {
            return Err(SamlError::SignatureInvalid("Signature without SigAlg".to_string()))
        }
        (Some(sig), Some(alg)) => {
            let alg_uri = form_decode(alg)?;
            let algorithm = SignatureAlgorithm::from_uri(&alg_uri).ok_or_else(|| {
                SamlError::SignatureInvalid(format!("unknown signature method {alg_uri}"))
            })?;
            let signature = STANDARD
                .decode(url_decode(sig)?)
                .map_err(|e| SamlError::SignatureInvalid(format!("bad signature encoding: {e}")))?;

            let mut signed_data = format!("{}={raw}", param.as_str());
            if let Some(rs) = relay_state {
                signed_data.push_str(&format!("&RelayState={rs}"));
            }
            signed_data.push_str(&format!("&SigAlg={alg}"));

            Some(QuerySignature {
                signed_data,
                algorithm,
                signature,
            })
        }
    };

    Ok(DecodedMessage {
        payload: InboundPayload::Xml(XmlElement::parse(&xml)?),
        http_method: HttpMethod::Redirect,
        relay_state: relay_state_value,
        query_signature,
    })
}

/// Percent-decodes a base64 value; a literal `+` stays a `+`.
fn url_decode(raw: &str) -> SamlResult<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| SamlError::malformed("query parameter is not UTF-8"))
}

/// Decodes a form-encoded text value, where `+` stands for a space.
fn form_decode(raw: &str) -> SamlResult<String> {
    url_decode(&raw.replace('+', " "))
}

/// Compresses with raw DEFLATE (no zlib header).
fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflates at most `max_size` bytes.
fn deflate_decompress(data: &[u8], max_size: usize) -> SamlResult<Vec<u8>> {
    let limit = u64::try_from(max_size).unwrap_or(u64::MAX).saturating_add(1);
    let mut decompressed = Vec::new();
    DeflateDecoder::new(data)
        .take(limit)
        .read_to_end(&mut decompressed)?;
    if decompressed.len() > max_size {
        return Err(SamlError::malformed("inflated message too large"));
    }
    Ok(decompressed)
}

//! HTTP-POST binding.

use base64::{engine::general_purpose::STANDARD, Engine};
use fed_core::HttpMethod;

use super::{DecodedMessage, InboundPayload, MessageParam};
use crate::error::{SamlError, SamlResult};
use crate::types::ARTIFACT_TYPE_CODE;
use crate::xml::XmlElement;

/// Encodes a serialized message as a POST field value.
#[must_use]
pub fn encode_post(xml: &str) -> String {
    STANDARD.encode(xml)
}

/// Decodes a POST field value holding either a message or an artifact.
pub(crate) fn decode_form_value(value: &str, max_size: usize) -> SamlResult<DecodedMessage> {
    let bytes = super::decode_base64(value)?;
    if bytes.len() > max_size {
        return Err(SamlError::malformed("message too large"));
    }

    if bytes.len() == 44 && bytes[..2] == ARTIFACT_TYPE_CODE.to_be_bytes() {
        return Ok(DecodedMessage {
            payload: InboundPayload::Artifact(value.trim().to_string()),
            http_method: HttpMethod::ArtifactPost,
            relay_state: None,
            query_signature: None,
        });
    }

    let xml = String::from_utf8(bytes)
        .map_err(|_| SamlError::malformed("POST message is not UTF-8"))?;
    Ok(DecodedMessage {
        payload: InboundPayload::Xml(XmlElement::parse(&xml)?),
        http_method: HttpMethod::Post,
        relay_state: None,
        query_signature: None,
    })
}

pub(crate) fn auto_submit_form(
    destination: &str,
    param: MessageParam,
    value: &str,
    relay_state: Option<&str>,
) -> String {
    let relay_state_input = relay_state
        .map(|rs| {
            format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                html_escape(rs)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>SAML POST Binding</title>
</head>
<body onload="document.forms[0].submit()">
    <form method="post" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        html_escape(destination),
        param.as_str(),
        html_escape(value),
        relay_state_input
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

//! State shared by the login and logout exchanges.
//!
//! A [`Profile`] binds one exchange to the trust store and owns the
//! exchange's working copies of the principal's identity and session.
//! Records are copied in through a dump/restore round trip, so the
//! caller's record is never aliased.

use std::sync::Arc;

use chrono::Duration;
use fed_core::HttpMethod;
use tracing::{debug, warn};

use crate::bindings::{
    decode_inbound, encode_post, encode_redirect, wrap_soap, DecodedMessage, MessageParam,
    OutboundMessage,
};
use crate::error::{SamlError, SamlResult};
use crate::identity::Identity;
use crate::metadata::{Endpoint, ProviderRecord};
use crate::server::Server;
use crate::session::Session;
use crate::signature::{has_enveloped_signature, verify_enveloped, verify_query};
use crate::types::NameId;
use crate::xml::XmlElement;

/// Exchange state common to [`Login`](crate::login::Login) and
/// [`Logout`](crate::logout::Logout).
#[derive(Debug)]
pub struct Profile {
    server: Arc<Server>,
    identity: Option<Identity>,
    session: Option<Session>,
    remote_provider_id: Option<String>,
    name_id: Option<NameId>,
    relay_state: Option<String>,
    message: Option<OutboundMessage>,
}

impl Profile {
    pub(crate) fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            identity: None,
            session: None,
            remote_provider_id: None,
            name_id: None,
            relay_state: None,
            message: None,
        }
    }

    /// Returns the trust store.
    #[must_use]
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Returns the working identity.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Replaces the working identity with a copy of `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if the copy fails.
    pub fn set_identity(&mut self, identity: &Identity) -> SamlResult<()> {
        self.set_identity_from_dump(&identity.dump()?)
    }

    /// Replaces the working identity with one restored from a dump.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] for an unusable dump; the
    /// previous identity is kept.
    pub fn set_identity_from_dump(&mut self, dump: &str) -> SamlResult<()> {
        self.identity = Some(Identity::from_dump(dump)?);
        Ok(())
    }

    /// Returns the working session.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Replaces the working session with a copy of `session`.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if the copy fails.
    pub fn set_session(&mut self, session: &Session) -> SamlResult<()> {
        self.set_session_from_dump(&session.dump()?)
    }

    /// Replaces the working session with one restored from a dump.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] for an unusable dump; the
    /// previous session is kept.
    pub fn set_session_from_dump(&mut self, dump: &str) -> SamlResult<()> {
        self.session = Some(Session::from_dump(dump)?);
        Ok(())
    }

    /// Returns the remote provider of the exchange.
    #[must_use]
    pub fn remote_provider_id(&self) -> Option<&str> {
        self.remote_provider_id.as_deref()
    }

    /// Returns the name identifier of the principal.
    #[must_use]
    pub fn name_id(&self) -> Option<&NameId> {
        self.name_id.as_ref()
    }

    /// Returns the relay state.
    #[must_use]
    pub fn relay_state(&self) -> Option<&str> {
        self.relay_state.as_deref()
    }

    /// Sets the relay state sent with the next message.
    pub fn set_relay_state(&mut self, relay_state: Option<String>) {
        self.relay_state = relay_state;
    }

    /// Returns the last outbound message.
    #[must_use]
    pub fn message(&self) -> Option<&OutboundMessage> {
        self.message.as_ref()
    }

    pub(crate) fn identity_mut(&mut self) -> &mut Identity {
        self.identity.get_or_insert_with(Identity::new)
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        self.session.get_or_insert_with(Session::new)
    }

    pub(crate) fn existing_session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub(crate) fn existing_identity_mut(&mut self) -> Option<&mut Identity> {
        self.identity.as_mut()
    }

    pub(crate) fn set_remote_provider_id(&mut self, provider_id: impl Into<String>) {
        self.remote_provider_id = Some(provider_id.into());
    }

    pub(crate) fn set_name_id(&mut self, name_id: Option<NameId>) {
        self.name_id = name_id;
    }

    pub(crate) fn server_arc(&self) -> Arc<Server> {
        Arc::clone(&self.server)
    }

    pub(crate) fn clock_skew(&self) -> Duration {
        Duration::seconds(self.server.config().protocol.clock_skew_secs)
    }

    pub(crate) fn decode(&self, message: &str) -> SamlResult<DecodedMessage> {
        decode_inbound(message, self.server.config().protocol.max_message_size).inspect_err(|e| {
            warn!(error = %e, "inbound message rejected");
        })
    }

    /// Checks the signature of an inbound message from `provider`.
    ///
    /// A present signature is always verified. Returns whether the message
    /// was signed.
    pub(crate) fn verify_inbound(
        &self,
        decoded: &DecodedMessage,
        element: &XmlElement,
        provider: &ProviderRecord,
        required: bool,
    ) -> SamlResult<bool> {
        let signed = decoded.query_signature.is_some() || has_enveloped_signature(element);
        if !signed {
            if required {
                warn!(provider_id = %provider.entity_id(), message = element.local_name(), "unsigned message rejected");
                return Err(SamlError::SignatureInvalid(format!(
                    "{} from {} is not signed",
                    element.local_name(),
                    provider.entity_id()
                )));
            }
            return Ok(false);
        }

        match &decoded.query_signature {
            Some(query) => {
                let key = peer_key(provider)?;
                verify_query(query, key).inspect_err(|e| {
                    warn!(provider_id = %provider.entity_id(), error = %e, "query signature rejected");
                })?;
            }
            None => self.verify_element(element, provider)?,
        }
        Ok(true)
    }

    /// Verifies the enveloped signature of `element` with the key of
    /// `provider`.
    pub(crate) fn verify_element(&self, element: &XmlElement, provider: &ProviderRecord) -> SamlResult<()> {
        let key = peer_key(provider)?;
        verify_enveloped(element, key)
            .map(|_| ())
            .inspect_err(|e| {
                warn!(
                    provider_id = %provider.entity_id(),
                    element = element.local_name(),
                    error = %e,
                    "signature rejected"
                );
            })
    }

    /// Serializes `element` for `method` and records the result as the
    /// last outbound message.
    ///
    /// Redirect messages carry a query signature, POST and SOAP messages an
    /// enveloped one, when message signing is enabled.
    pub(crate) fn emit(
        &mut self,
        mut element: XmlElement,
        param: MessageParam,
        url: &str,
        method: HttpMethod,
    ) -> SamlResult<OutboundMessage> {
        let signer = self.server.signer();
        let relay_state = self.relay_state.clone();

        let (url, body) = match method {
            HttpMethod::Redirect => {
                let url = encode_redirect(
                    url,
                    param,
                    &element.to_xml(),
                    relay_state.as_deref(),
                    signer.as_ref(),
                )?;
                (url, None)
            }
            HttpMethod::Post | HttpMethod::Soap => {
                if let Some(signer) = &signer {
                    signer.sign_element(&mut element)?;
                }
                let body = if method == HttpMethod::Soap {
                    wrap_soap(element)
                } else {
                    encode_post(&element.to_xml())
                };
                (url.to_string(), Some(body))
            }
            other => {
                return Err(SamlError::UnsupportedBinding(format!(
                    "{other} cannot carry {}",
                    element.local_name()
                )))
            }
        };

        let message = OutboundMessage {
            url,
            body,
            http_method: method,
            relay_state: if method == HttpMethod::Soap { None } else { relay_state },
            param,
        };
        debug!(method = %method, param = param.as_str(), "outbound message built");
        self.message = Some(message.clone());
        Ok(message)
    }

    pub(crate) fn record_message(&mut self, message: OutboundMessage) {
        self.message = Some(message);
    }

    pub(crate) fn take_relay_state_from(&mut self, decoded: &DecodedMessage) {
        if decoded.relay_state.is_some() {
            self.relay_state.clone_from(&decoded.relay_state);
        }
    }
}

fn peer_key(provider: &ProviderRecord) -> SamlResult<&fed_crypto::VerifyingKey> {
    provider.verifying_key().ok_or_else(|| {
        SamlError::SignatureInvalid(format!("no signing key known for {}", provider.entity_id()))
    })
}

/// Picks `requested` if `lookup` finds an endpoint for it, else the first
/// method of [`HttpMethod::PREFERENCE`] within `allowed` that has one.
pub(crate) fn select_endpoint<'a>(
    requested: HttpMethod,
    allowed: &[HttpMethod],
    lookup: impl Fn(HttpMethod) -> Option<&'a Endpoint>,
) -> Option<(HttpMethod, &'a Endpoint)> {
    let exact = allowed
        .contains(&requested)
        .then(|| lookup(requested))
        .flatten()
        .map(|e| (requested, e));
    exact.or_else(|| {
        HttpMethod::PREFERENCE
            .into_iter()
            .filter(|m| allowed.contains(m))
            .find_map(|m| lookup(m).map(|e| (m, e)))
    })
}

/// Resolves `Any`, `None` and `Get` to the configured default method.
pub(crate) fn concrete_method(requested: HttpMethod, default: HttpMethod) -> HttpMethod {
    match requested {
        HttpMethod::Any | HttpMethod::None | HttpMethod::Get => default,
        other => other,
    }
}

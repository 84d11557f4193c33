//! Single logout.
//!
//! A [`Logout`] drives one SLO exchange:
//!
//! ```text
//! initiator: Init -> RequestBuilt -> Sent -> ResponseReceived | Done
//! responder: Init -> RequestReceived -> Validated -> ResponseBuilt
//! ```
//!
//! A provider holding sessions with several peers (usually the IdP) logs
//! the principal out of each in turn: after answering or initiating one
//! exchange it asks [`Logout::get_next_provider_id`] for the next peer and
//! calls [`Logout::init_request`] again until none is left. A request
//! received from the initiating peer stays available throughout, so the
//! final answer to it can be built once the fan-out is over.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use fed_core::HttpMethod;
use tracing::{debug, info, warn};

use crate::bindings::{MessageParam, OutboundMessage};
use crate::error::{SamlError, SamlResult};
use crate::identity::Identity;
use crate::profile::{concrete_method, select_endpoint, Profile};
use crate::server::Server;
use crate::session::Session;
use crate::types::{LogoutRequest, LogoutResponse, NameId, NameIdFormat, Status};

/// Bindings that can carry logout messages.
const SLO_METHODS: [HttpMethod; 3] = [HttpMethod::Redirect, HttpMethod::Post, HttpMethod::Soap];

/// Progress of a [`Logout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogoutState {
    /// Nothing done yet.
    Init,
    /// Request built, not yet serialized.
    RequestBuilt,
    /// Request serialized for sending.
    Sent,
    /// Request from a peer parsed and authenticated.
    RequestReceived,
    /// Received request honoured, sessions removed.
    Validated,
    /// Answer to the received request serialized.
    ResponseBuilt,
    /// Peer confirmed; other peers still hold a session.
    ResponseReceived,
    /// Peer confirmed; no peer is left to log out.
    Done,
}

#[derive(Debug, Clone)]
struct Received {
    request: LogoutRequest,
    http_method: HttpMethod,
    relay_state: Option<String>,
    status: Option<Status>,
}

/// One SLO exchange.
#[derive(Debug)]
pub struct Logout {
    profile: Profile,
    state: LogoutState,
    http_method: HttpMethod,
    request: Option<LogoutRequest>,
    received: Option<Received>,
    response: Option<LogoutResponse>,
    attempted: BTreeSet<String>,
}

impl Logout {
    /// Starts an exchange for the trust store `server`.
    #[must_use]
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            profile: Profile::new(server),
            state: LogoutState::Init,
            http_method: HttpMethod::Redirect,
            request: None,
            received: None,
            response: None,
            attempted: BTreeSet::new(),
        }
    }

    /// Prepares a logout request for `provider_id`, or for the next peer
    /// holding a session.
    ///
    /// The request names every session index held for the peer. When the
    /// peer has no SLO endpoint for `method`, the first supported binding
    /// in [`HttpMethod::PREFERENCE`] order is used.
    ///
    /// # Errors
    ///
    /// [`SamlError::UnknownProvider`] for an unregistered target,
    /// [`SamlError::NoActiveSession`] without a session for it,
    /// [`SamlError::NoSloEndpoint`] if it has no usable endpoint.
    pub fn init_request(&mut self, provider_id: Option<&str>, method: HttpMethod) -> SamlResult<()> {
        let server = self.profile.server_arc();
        if let Some(id) = provider_id {
            server.lookup_provider(id)?;
        }
        let session = self
            .profile
            .session()
            .filter(|s| !s.is_empty())
            .ok_or(SamlError::NoActiveSession)?;
        let target = match provider_id {
            Some(id) => id.to_string(),
            None => self
                .get_next_provider_id()
                .ok_or(SamlError::NoActiveSession)?,
        };
        if session.entries(&target).is_empty() {
            return Err(SamlError::NoActiveSession);
        }
        let provider = server.lookup_provider(&target)?;

        let requested = concrete_method(method, server.config().protocol.default_http_method);
        let (method, endpoint) = select_endpoint(requested, &SLO_METHODS, |m| provider.slo_endpoint(m))
            .ok_or_else(|| SamlError::NoSloEndpoint(target.clone()))?;
        if method != requested {
            info!(provider_id = %target, requested = %requested, used = %method, "falling back to another SLO binding");
        }

        let name_id = session
            .entries(&target)
            .iter()
            .find_map(|e| e.name_id.clone())
            .or_else(|| {
                self.profile
                    .identity()
                    .and_then(|i| i.get_federation(&target))
                    .cloned()
            })
            .ok_or(SamlError::NoActiveSession)?;

        let validity = Duration::seconds(server.config().protocol.logout_request_validity_secs);
        let mut request = LogoutRequest::new(server.entity_id(), name_id.clone())
            .with_destination(&endpoint.location)
            .valid_for(validity);
        for index in session.session_indexes(&target) {
            request = request.with_session_index(index);
        }

        self.profile.set_remote_provider_id(&target);
        self.profile.set_name_id(Some(name_id));
        self.attempted.insert(target);
        self.http_method = method;
        self.request = Some(request);
        self.set_state(LogoutState::RequestBuilt);
        Ok(())
    }

    /// Serializes the logout request.
    ///
    /// # Errors
    ///
    /// [`SamlError::NotInitialized`] before [`Logout::init_request`].
    pub fn build_request_msg(&mut self) -> SamlResult<OutboundMessage> {
        if !matches!(self.state, LogoutState::RequestBuilt | LogoutState::Sent) {
            return Err(SamlError::NotInitialized);
        }
        let request = self.request.as_ref().ok_or(SamlError::NotInitialized)?;
        let destination = request.destination.clone().ok_or(SamlError::NotInitialized)?;
        let message = self.profile.emit(
            request.to_element(),
            MessageParam::Request,
            &destination,
            self.http_method,
        )?;
        self.set_state(LogoutState::Sent);
        Ok(message)
    }

    /// Parses and authenticates an inbound logout request, sent over
    /// redirect, POST or SOAP.
    ///
    /// # Errors
    ///
    /// [`SamlError::MalformedMessage`], [`SamlError::SignatureInvalid`],
    /// [`SamlError::UnknownProvider`], [`SamlError::AssertionExpired`] for
    /// a stale request, or [`SamlError::UnknownSession`] when the attached
    /// session knows nothing of the requester.
    pub fn process_request_msg(&mut self, message: &str) -> SamlResult<()> {
        let decoded = self.profile.decode(message)?;
        if !SLO_METHODS.contains(&decoded.http_method) {
            return Err(SamlError::UnsupportedBinding(format!(
                "LogoutRequest over {}",
                decoded.http_method
            )));
        }
        let element = decoded.xml()?;
        let request = LogoutRequest::from_element(element)?;

        let server = self.profile.server_arc();
        let provider = server.lookup_provider(&request.issuer)?;
        self.profile.verify_inbound(
            &decoded,
            element,
            provider,
            server.config().protocol.require_signed_requests,
        )?;
        if request.is_expired(Utc::now(), self.profile.clock_skew()) {
            warn!(provider_id = %provider.entity_id(), "expired logout request");
            return Err(SamlError::AssertionExpired(format!(
                "logout request {} expired",
                request.id
            )));
        }
        if let Some(destination) = &request.destination {
            if !server.local().has_location(destination) {
                return Err(SamlError::malformed(format!(
                    "request addressed to {destination}"
                )));
            }
        }
        if let Some(session) = self.profile.session() {
            if session.entries(&request.issuer).is_empty() {
                return Err(SamlError::UnknownSession(request.issuer.clone()));
            }
        }

        info!(provider_id = %provider.entity_id(), request_id = %request.id, binding = %decoded.http_method, "logout request received");
        self.profile.take_relay_state_from(&decoded);
        self.profile.set_remote_provider_id(provider.entity_id());
        self.profile.set_name_id(Some(request.name_id.clone()));
        self.received = Some(Received {
            request,
            http_method: decoded.http_method,
            relay_state: decoded.relay_state.clone(),
            status: None,
        });
        self.set_state(LogoutState::RequestReceived);
        Ok(())
    }

    /// Honours the received request: removes the requester's sessions
    /// and its transient name identifiers.
    ///
    /// A request naming session indexes closes the matching sessions of
    /// the subject; one without any closes every session of the subject
    /// with the requester.
    ///
    /// # Errors
    ///
    /// [`SamlError::NoValidatedRequest`] without a received request,
    /// [`SamlError::SessionNotFound`] when the subject or session indexes
    /// do not match. The answer then carries `UnknownPrincipal`.
    pub fn validate_request(&mut self) -> SamlResult<()> {
        if self.state != LogoutState::RequestReceived {
            return Err(SamlError::NoValidatedRequest);
        }
        let received = self.received.as_ref().ok_or(SamlError::NoValidatedRequest)?;
        let request = &received.request;
        let issuer = request.issuer.clone();

        let Some(session) = self.profile.session() else {
            return Err(self.unknown_principal());
        };
        let entries = session.entries(&issuer);
        let identity = self.profile.identity();
        let names_subject = |name_id: Option<&NameId>| match name_id {
            Some(n) => n.matches(&request.name_id),
            None => identity.is_some_and(|i| {
                i.name_identifiers(&issuer)
                    .iter()
                    .any(|n| n.matches(&request.name_id))
            }),
        };
        let matched: Vec<_> = entries
            .iter()
            .filter(|e| names_subject(e.name_id.as_ref()))
            .filter(|e| {
                request.session_indexes.is_empty()
                    || e.session_index
                        .as_ref()
                        .map_or(true, |i| request.session_indexes.contains(i))
            })
            .collect();
        if matched.is_empty() {
            return Err(self.unknown_principal());
        }
        let remove_all = matched.len() == entries.len();
        let indexes: Vec<String> = matched.iter().filter_map(|e| e.session_index.clone()).collect();

        if let Some(session) = self.profile.existing_session_mut() {
            if remove_all {
                session.remove_provider(&issuer);
            } else {
                session.remove_session_indexes(&issuer, &indexes);
            }
        }
        self.drop_transient_ids(&issuer);
        if let Some(received) = self.received.as_mut() {
            received.status = Some(Status::success());
        }
        info!(provider_id = %issuer, "sessions closed on request");
        self.set_state(LogoutState::Validated);
        Ok(())
    }

    fn unknown_principal(&mut self) -> SamlError {
        if let Some(received) = self.received.as_mut() {
            warn!(provider_id = %received.request.issuer, "logout request for an unknown principal");
            received.status = Some(Status::unknown_principal());
        }
        SamlError::SessionNotFound
    }

    fn drop_transient_ids(&mut self, provider_id: &str) {
        let Some(identity) = self.profile.existing_identity_mut() else {
            return;
        };
        let transient: Vec<NameId> = identity
            .name_identifiers(provider_id)
            .iter()
            .filter(|n| n.parsed_format() == NameIdFormat::Transient)
            .cloned()
            .collect();
        for name_id in &transient {
            identity.remove_name_identifier(provider_id, name_id);
        }
    }

    /// Serializes the answer to the received request.
    ///
    /// A SOAP request is answered in the SOAP response, with an empty URL.
    /// Otherwise the answer goes to the requester's SLO response location,
    /// with the request's binding when the requester supports it. Available
    /// after [`Logout::validate_request`], whether it succeeded or reported
    /// an unknown principal, and after any fan-out that followed.
    ///
    /// # Errors
    ///
    /// [`SamlError::NoValidatedRequest`] before validation,
    /// [`SamlError::NoSloEndpoint`] if the requester has no usable endpoint.
    pub fn build_response_msg(&mut self) -> SamlResult<OutboundMessage> {
        let received = self.received.clone().ok_or(SamlError::NoValidatedRequest)?;
        let status = received.status.ok_or(SamlError::NoValidatedRequest)?;
        let request = received.request;

        let server = self.profile.server_arc();
        let requester = server.lookup_provider(&request.issuer)?;
        let (method, url) = if received.http_method == HttpMethod::Soap {
            (HttpMethod::Soap, String::new())
        } else {
            let (method, endpoint) = select_endpoint(
                received.http_method,
                &[HttpMethod::Redirect, HttpMethod::Post],
                |m| requester.slo_endpoint(m),
            )
            .ok_or_else(|| SamlError::NoSloEndpoint(request.issuer.clone()))?;
            (method, endpoint.response_url().to_string())
        };

        let mut response = LogoutResponse::new(server.entity_id(), status).in_response_to(&request.id);
        if !url.is_empty() {
            response = response.with_destination(&url);
        }
        self.profile.set_relay_state(received.relay_state);
        let message = self
            .profile
            .emit(response.to_element(), MessageParam::Response, &url, method)?;

        self.profile.set_remote_provider_id(&request.issuer);
        self.response = Some(response);
        self.set_state(LogoutState::ResponseBuilt);
        Ok(message)
    }

    /// Processes the peer's answer to the request sent by this exchange and
    /// closes the local sessions with it.
    ///
    /// # Errors
    ///
    /// [`SamlError::NotInitialized`] if no request was sent,
    /// [`SamlError::MalformedMessage`] for an answer from another peer or to
    /// another request, [`SamlError::SignatureInvalid`], or
    /// [`SamlError::StatusNotSuccess`] when the peer refused. Sessions are
    /// kept on failure.
    pub fn process_response_msg(&mut self, message: &str) -> SamlResult<()> {
        if self.state != LogoutState::Sent {
            return Err(SamlError::NotInitialized);
        }
        let request = self.request.as_ref().ok_or(SamlError::NotInitialized)?;
        let target = self
            .profile
            .remote_provider_id()
            .ok_or(SamlError::NotInitialized)?
            .to_string();

        let decoded = self.profile.decode(message)?;
        let element = decoded.xml()?;
        let response = LogoutResponse::from_element(element)?;

        let server = self.profile.server_arc();
        let provider = server.lookup_provider(&response.issuer)?;
        if response.issuer != target {
            return Err(SamlError::malformed(format!(
                "logout response from {}, expected {target}",
                response.issuer
            )));
        }
        if response.in_response_to.as_deref() != Some(request.id.as_str()) {
            warn!(provider_id = %target, "logout response answers another request");
            return Err(SamlError::malformed("InResponseTo does not match the request"));
        }
        self.profile.verify_inbound(&decoded, element, provider, false)?;
        response.status.ensure_success().inspect_err(|e| {
            warn!(provider_id = %target, error = %e, "peer refused logout");
        })?;

        if let Some(session) = self.profile.existing_session_mut() {
            session.remove_provider(&target);
        }
        self.drop_transient_ids(&target);
        if self.received.is_none() {
            self.profile.take_relay_state_from(&decoded);
        }
        info!(provider_id = %target, "logout confirmed");
        self.response = Some(response);
        let next = if self.get_next_provider_id().is_some() {
            LogoutState::ResponseReceived
        } else {
            LogoutState::Done
        };
        self.set_state(next);
        Ok(())
    }

    /// Returns the next peer that still holds a session and was not yet
    /// asked in this exchange, skipping the peer whose request started it.
    #[must_use]
    pub fn get_next_provider_id(&self) -> Option<String> {
        let initiator = self.received.as_ref().map(|r| r.request.issuer.as_str());
        self.profile
            .session()?
            .provider_ids()
            .into_iter()
            .find(|id| Some(id.as_str()) != initiator && !self.attempted.contains(id))
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> LogoutState {
        self.state
    }

    /// Returns the request sent by this exchange.
    #[must_use]
    pub fn request(&self) -> Option<&LogoutRequest> {
        self.request.as_ref()
    }

    /// Returns the pending request for adjustment before
    /// [`Logout::build_request_msg`].
    pub fn request_mut(&mut self) -> Option<&mut LogoutRequest> {
        match self.state {
            LogoutState::RequestBuilt | LogoutState::Sent => self.request.as_mut(),
            _ => None,
        }
    }

    /// Returns the request received from a peer.
    #[must_use]
    pub fn received_request(&self) -> Option<&LogoutRequest> {
        self.received.as_ref().map(|r| &r.request)
    }

    /// Returns the status the received request is answered with.
    #[must_use]
    pub fn response_status(&self) -> Option<&Status> {
        self.received.as_ref().and_then(|r| r.status.as_ref())
    }

    /// Returns the last response built or processed.
    #[must_use]
    pub fn response(&self) -> Option<&LogoutResponse> {
        self.response.as_ref()
    }

    /// Returns the binding of the last request built.
    #[must_use]
    pub const fn http_method(&self) -> HttpMethod {
        self.http_method
    }

    /// Returns the URL of the last outbound message.
    #[must_use]
    pub fn msg_url(&self) -> Option<&str> {
        self.profile.message().map(|m| m.url.as_str())
    }

    /// Returns the body of the last outbound message.
    #[must_use]
    pub fn msg_body(&self) -> Option<&str> {
        self.profile.message().and_then(|m| m.body.as_deref())
    }

    /// Returns the shared exchange state.
    #[must_use]
    pub const fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Returns the shared exchange state for modification.
    pub fn profile_mut(&mut self) -> &mut Profile {
        &mut self.profile
    }

    /// Returns the working identity.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.profile.identity()
    }

    /// Replaces the working identity with a copy of `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if the copy fails.
    pub fn set_identity(&mut self, identity: &Identity) -> SamlResult<()> {
        self.profile.set_identity(identity)
    }

    /// Returns the working session.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.profile.session()
    }

    /// Replaces the working session with a copy of `session`.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if the copy fails.
    pub fn set_session(&mut self, session: &Session) -> SamlResult<()> {
        self.profile.set_session(session)
    }

    /// Returns the peer of the current step.
    #[must_use]
    pub fn remote_provider_id(&self) -> Option<&str> {
        self.profile.remote_provider_id()
    }

    /// Returns the subject being logged out.
    #[must_use]
    pub fn name_id(&self) -> Option<&NameId> {
        self.profile.name_id()
    }

    /// Returns the relay state.
    #[must_use]
    pub fn relay_state(&self) -> Option<&str> {
        self.profile.relay_state()
    }

    /// Sets the relay state sent with the next message.
    pub fn set_relay_state(&mut self, relay_state: Option<String>) {
        self.profile.set_relay_state(relay_state);
    }

    fn set_state(&mut self, state: LogoutState) {
        debug!(from = ?self.state, to = ?state, "logout state");
        self.state = state;
    }
}

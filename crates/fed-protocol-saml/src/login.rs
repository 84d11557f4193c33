//! Web Browser single sign-on.
//!
//! A [`Login`] drives one SSO exchange, from either side:
//!
//! ```text
//! SP:  Init -> RequestBuilt -> RequestSent -> ResponseReceived -> Accepted
//! IdP: Init -> RequestReceived -> Validated -> AssertionBuilt -> ResponseBuilt
//! ```
//!
//! A denied request moves the IdP to `Failed`; a Response carrying the
//! denial can still be built from there. Operations that fail for any other
//! reason leave the exchange untouched.
//!
//! With the artifact binding the IdP sends a reference instead of the
//! Response; the SP resolves it over SOAP with
//! [`Login::init_artifact_resolve`] and the IdP answers with
//! [`Login::process_artifact_resolve`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fed_core::HttpMethod;
use tracing::{debug, info, warn};

use crate::bindings::{
    encode_artifact_url, DecodedMessage, InboundPayload, MessageParam, OutboundMessage,
};
use crate::error::{SamlError, SamlResult};
use crate::identity::Identity;
use crate::metadata::{Endpoint, ProviderRecord, Role};
use crate::profile::{concrete_method, select_endpoint, Profile};
use crate::server::Server;
use crate::session::{Session, SessionEntry};
use crate::signature::has_enveloped_signature;
use crate::types::{
    Artifact, ArtifactResolve, ArtifactResponse, Assertion, Attribute, AttributeStatement,
    AuthnContextClass, AuthnRequest, AuthnStatement, Conditions, NameId, NameIdFormat,
    NameIdPolicy, Response, Status, Subject, SubjectConfirmation,
    SubjectConfirmationData,
};
use crate::xml::XmlElement;

/// Bindings that can carry an authentication request.
const REQUEST_METHODS: [HttpMethod; 2] = [HttpMethod::Redirect, HttpMethod::Post];

/// Progress of a [`Login`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginState {
    /// Nothing done yet.
    Init,
    /// SP: request built, not yet serialized.
    RequestBuilt,
    /// SP: request serialized for sending.
    RequestSent,
    /// IdP: request parsed and authenticated.
    RequestReceived,
    /// IdP: the principal may be asserted.
    Validated,
    /// IdP: assertion signed.
    AssertionBuilt,
    /// IdP: response serialized.
    ResponseBuilt,
    /// SP: response verified.
    ResponseReceived,
    /// SP: session established.
    Accepted,
    /// IdP: the request was denied.
    Failed,
}

/// One SSO exchange.
#[derive(Debug)]
pub struct Login {
    profile: Profile,
    state: LoginState,
    http_method: HttpMethod,
    request: Option<AuthnRequest>,
    acs_url: Option<String>,
    response_status: Status,
    attributes: Vec<Attribute>,
    authn_context: Option<String>,
    assertion: Option<Assertion>,
    assertion_element: Option<XmlElement>,
    response: Option<Response>,
    artifact: Option<String>,
    artifact_message: Option<String>,
    artifact_resolve: Option<ArtifactResolve>,
    resolved_message: Option<XmlElement>,
}

impl Login {
    /// Starts an exchange for the trust store `server`.
    #[must_use]
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            profile: Profile::new(server),
            state: LoginState::Init,
            http_method: HttpMethod::Redirect,
            request: None,
            acs_url: None,
            response_status: Status::success(),
            attributes: Vec::new(),
            authn_context: None,
            assertion: None,
            assertion_element: None,
            response: None,
            artifact: None,
            artifact_message: None,
            artifact_resolve: None,
            resolved_message: None,
        }
    }

    // ------------------------------------------------------------------
    // Service provider
    // ------------------------------------------------------------------

    /// Prepares an authentication request for `provider_id`, or for the
    /// first registered IdP.
    ///
    /// When the IdP has no SSO endpoint for `method`, the first supported
    /// binding in [`HttpMethod::PREFERENCE`] order is used.
    ///
    /// # Errors
    ///
    /// [`SamlError::UnknownProvider`] if the target is not a registered
    /// IdP, [`SamlError::NoSsoEndpoint`] if it has no usable endpoint.
    pub fn init_authn_request(&mut self, provider_id: Option<&str>, method: HttpMethod) -> SamlResult<()> {
        let server = self.profile.server_arc();
        let idp = match provider_id {
            Some(id) => server.lookup_provider(id)?,
            None => server.first_provider_with_role(Role::IdentityProvider).ok_or_else(|| {
                SamlError::UnknownProvider("no identity provider registered".to_string())
            })?,
        };
        if !idp.supports(Role::IdentityProvider) {
            return Err(SamlError::UnknownProvider(format!(
                "{} is not an identity provider",
                idp.entity_id()
            )));
        }

        let requested = concrete_method(method, server.config().protocol.default_http_method);
        let (method, endpoint) = select_endpoint(requested, &REQUEST_METHODS, |m| idp.sso_endpoint(m))
            .ok_or_else(|| SamlError::NoSsoEndpoint(idp.entity_id().to_string()))?;
        if method != requested {
            info!(provider_id = %idp.entity_id(), requested = %requested, used = %method, "falling back to another SSO binding");
        }

        let local = server.local();
        let mut request = AuthnRequest::new(local.entity_id()).with_destination(&endpoint.location);
        if let Some(acs) = local.default_acs() {
            request = request.with_acs_url(&acs.location).with_binding(acs.binding);
        }
        if let Some(format) = local
            .name_id_formats()
            .first()
            .and_then(|f| NameIdFormat::from_uri(f))
        {
            request = request.with_name_id_policy(NameIdPolicy::with_format(format).allow_create(true));
        }

        self.profile.set_remote_provider_id(idp.entity_id());
        self.http_method = method;
        self.request = Some(request);
        self.set_state(LoginState::RequestBuilt);
        Ok(())
    }

    /// Returns the pending authentication request for adjustment before
    /// [`Login::build_authn_request_msg`].
    pub fn authn_request_mut(&mut self) -> Option<&mut AuthnRequest> {
        match self.state {
            LoginState::RequestBuilt | LoginState::RequestSent => self.request.as_mut(),
            _ => None,
        }
    }

    /// Asks the IdP to answer with `method`, at the local assertion
    /// consumer service for that binding.
    ///
    /// # Errors
    ///
    /// [`SamlError::NotInitialized`] before [`Login::init_authn_request`],
    /// [`SamlError::UnsupportedBinding`] if no local consumer service uses
    /// the binding.
    pub fn set_protocol_binding(&mut self, method: HttpMethod) -> SamlResult<()> {
        if self.state != LoginState::RequestBuilt {
            return Err(SamlError::NotInitialized);
        }
        let server = self.profile.server_arc();
        let acs = server.local().acs_endpoint(method).ok_or_else(|| {
            SamlError::UnsupportedBinding(format!("no assertion consumer service for {method}"))
        })?;
        let request = self.request.as_mut().ok_or(SamlError::NotInitialized)?;
        request.assertion_consumer_service_url = Some(acs.location.clone());
        request.assertion_consumer_service_index = None;
        request.protocol_binding = Some(acs.binding.uri().to_string());
        Ok(())
    }

    /// Serializes the authentication request.
    ///
    /// # Errors
    ///
    /// [`SamlError::NotInitialized`] before [`Login::init_authn_request`].
    pub fn build_authn_request_msg(&mut self) -> SamlResult<OutboundMessage> {
        if !matches!(self.state, LoginState::RequestBuilt | LoginState::RequestSent) {
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
        self.set_state(LoginState::RequestSent);
        Ok(message)
    }

    /// Verifies an inbound Response, bare or inside an `ArtifactResponse`.
    ///
    /// The response, its assertion or the artifact envelope must be signed
    /// by the issuing IdP. Every signature present is verified.
    ///
    /// # Errors
    ///
    /// [`SamlError::MalformedMessage`], [`SamlError::SignatureInvalid`],
    /// [`SamlError::UnknownProvider`], [`SamlError::StatusNotSuccess`],
    /// [`SamlError::AssertionExpired`] or [`SamlError::AudienceMismatch`].
    pub fn process_response_msg(&mut self, message: &str) -> SamlResult<()> {
        let decoded = self.profile.decode(message)?;
        let server = self.profile.server_arc();
        let outer = decoded.xml()?;

        let (element, envelope_signed) = if outer.local_name() == "ArtifactResponse" {
            let signed = self.check_artifact_response(&decoded, outer, &server)?;
            let inner = outer
                .child("Response")
                .ok_or_else(|| SamlError::malformed("ArtifactResponse carries no Response"))?;
            (inner, signed)
        } else {
            (outer, false)
        };

        let response = Response::from_element(element)?;
        let idp = server.lookup_provider(&response.issuer)?;
        if !idp.supports(Role::IdentityProvider) {
            return Err(SamlError::UnknownProvider(format!(
                "{} is not an identity provider",
                idp.entity_id()
            )));
        }
        if let (Some(request), Some(in_response_to)) = (&self.request, &response.in_response_to) {
            if &request.id != in_response_to {
                warn!(provider_id = %idp.entity_id(), "response answers another request");
                return Err(SamlError::malformed("InResponseTo does not match the request"));
            }
        }
        if let Some(destination) = &response.destination {
            if !server.local().has_location(destination) {
                return Err(SamlError::malformed(format!(
                    "response addressed to {destination}"
                )));
            }
        }

        let response_signed = self.profile.verify_inbound(&decoded, element, idp, false)?;
        response.status.ensure_success().inspect_err(|e| {
            info!(provider_id = %idp.entity_id(), error = %e, "identity provider refused");
        })?;

        let assertion_element = element
            .child("Assertion")
            .ok_or_else(|| SamlError::malformed("Response carries no assertion"))?;
        let assertion = response
            .first_assertion()
            .cloned()
            .ok_or_else(|| SamlError::malformed("Response carries no assertion"))?;
        let assertion_signed = has_enveloped_signature(assertion_element);
        if assertion_signed {
            self.profile.verify_element(assertion_element, idp)?;
        }
        if !(response_signed || assertion_signed || envelope_signed) {
            warn!(provider_id = %idp.entity_id(), "unsigned assertion rejected");
            return Err(SamlError::SignatureInvalid(
                "neither the response nor the assertion is signed".to_string(),
            ));
        }
        if assertion.issuer != idp.entity_id() {
            return Err(SamlError::SignatureInvalid(format!(
                "assertion issued by {} inside a response from {}",
                assertion.issuer,
                idp.entity_id()
            )));
        }
        assertion.validate(server.entity_id(), Utc::now(), self.profile.clock_skew())?;
        let request_id = self.request.as_ref().map(|r| r.id.as_str());
        assertion
            .check_bearer(request_id, |url| server.local().has_location(url))
            .inspect_err(|e| warn!(provider_id = %idp.entity_id(), error = %e, "bearer confirmation rejected"))?;
        let name_id = assertion
            .name_id()
            .cloned()
            .ok_or_else(|| SamlError::malformed("assertion has no subject"))?;

        self.profile.take_relay_state_from(&decoded);
        self.profile.set_remote_provider_id(idp.entity_id());
        self.profile.set_name_id(Some(name_id));
        self.authn_context = assertion
            .authn_statement
            .as_ref()
            .map(|s| s.authn_context_class_ref.clone());
        self.assertion_element = Some(assertion_element.clone());
        self.assertion = Some(assertion);
        self.response = Some(response);
        self.set_state(LoginState::ResponseReceived);
        Ok(())
    }

    fn check_artifact_response(
        &self,
        decoded: &DecodedMessage,
        element: &XmlElement,
        server: &Server,
    ) -> SamlResult<bool> {
        let envelope = ArtifactResponse::from_element(element)?;
        let idp = server.lookup_provider(&envelope.issuer)?;
        if let Some(expected) = self.profile.remote_provider_id() {
            if expected != idp.entity_id() {
                return Err(SamlError::malformed(format!(
                    "artifact resolved by {} instead of {expected}",
                    idp.entity_id()
                )));
            }
        }
        if let Some(resolve) = &self.artifact_resolve {
            if envelope.in_response_to.as_deref() != Some(resolve.id.as_str()) {
                return Err(SamlError::malformed(
                    "ArtifactResponse answers another resolve request",
                ));
            }
        }
        let signed = self.profile.verify_inbound(decoded, element, idp, false)?;
        envelope.status.ensure_success()?;
        Ok(signed)
    }

    /// Establishes the session: records the name identifier in the identity
    /// and the assertion in the session.
    ///
    /// # Errors
    ///
    /// [`SamlError::NoValidResponse`] unless a response was processed.
    pub fn accept_sso(&mut self) -> SamlResult<()> {
        if self.state != LoginState::ResponseReceived {
            return Err(SamlError::NoValidResponse);
        }
        let (Some(assertion), Some(element), Some(provider_id), Some(name_id)) = (
            self.assertion.as_ref(),
            self.assertion_element.as_ref(),
            self.profile.remote_provider_id().map(str::to_string),
            self.profile.name_id().cloned(),
        ) else {
            return Err(SamlError::NoValidResponse);
        };

        let statement = assertion.authn_statement.as_ref();
        let entry = SessionEntry {
            assertion: element.to_xml(),
            session_index: assertion.session_index().map(str::to_string),
            authn_instant: statement.map_or(assertion.issue_instant, |s| s.authn_instant),
            authn_method: statement.map_or_else(
                || AuthnContextClass::Password.uri().to_string(),
                |s| s.authn_context_class_ref.clone(),
            ),
            name_id: Some(name_id.clone()),
        };

        self.profile.identity_mut().add_name_identifier(&provider_id, name_id);
        self.profile.session_mut().add_entry(&provider_id, entry);
        info!(provider_id = %provider_id, "single sign-on accepted");
        self.set_state(LoginState::Accepted);
        Ok(())
    }

    /// Takes an artifact received at an assertion consumer service and
    /// prepares the `ArtifactResolve` for its issuer.
    ///
    /// # Errors
    ///
    /// [`SamlError::MalformedMessage`] for anything but an artifact,
    /// [`SamlError::UnknownProvider`] if no registered provider issued it,
    /// [`SamlError::UnsupportedBinding`] if the issuer has no artifact
    /// resolution service.
    pub fn init_artifact_resolve(&mut self, message: &str) -> SamlResult<()> {
        let decoded = self.profile.decode(message)?;
        let InboundPayload::Artifact(encoded) = &decoded.payload else {
            return Err(SamlError::malformed("expected an artifact"));
        };
        let artifact = Artifact::decode(encoded)?;

        let server = self.profile.server_arc();
        let idp = server
            .providers()
            .find(|p| artifact.issued_by(p.entity_id()))
            .ok_or_else(|| {
                SamlError::UnknownProvider("artifact issued by an unregistered provider".to_string())
            })?;
        let endpoint = idp
            .artifact_resolution_endpoint(Some(artifact.endpoint_index))
            .ok_or_else(|| {
                SamlError::UnsupportedBinding(format!(
                    "{} has no artifact resolution service",
                    idp.entity_id()
                ))
            })?;

        let mut resolve = ArtifactResolve::new(server.entity_id(), encoded.clone());
        resolve.destination = Some(endpoint.location.clone());

        self.profile.take_relay_state_from(&decoded);
        self.profile.set_remote_provider_id(idp.entity_id());
        self.artifact = Some(encoded.clone());
        self.artifact_resolve = Some(resolve);
        debug!(provider_id = %idp.entity_id(), "artifact resolve prepared");
        Ok(())
    }

    /// Serializes the pending `ArtifactResolve` as a SOAP envelope.
    ///
    /// # Errors
    ///
    /// [`SamlError::NotInitialized`] before [`Login::init_artifact_resolve`].
    pub fn build_artifact_resolve_msg(&mut self) -> SamlResult<OutboundMessage> {
        let resolve = self.artifact_resolve.as_ref().ok_or(SamlError::NotInitialized)?;
        let destination = resolve.destination.clone().ok_or(SamlError::NotInitialized)?;
        self.profile
            .emit(resolve.to_element(), MessageParam::Request, &destination, HttpMethod::Soap)
    }

    // ------------------------------------------------------------------
    // Identity provider
    // ------------------------------------------------------------------

    /// Parses and authenticates an inbound AuthnRequest.
    ///
    /// The signature is required when configured, when the IdP wants signed
    /// requests or when the SP declares it signs them.
    ///
    /// # Errors
    ///
    /// [`SamlError::MalformedMessage`], [`SamlError::SignatureInvalid`],
    /// [`SamlError::UnknownProvider`] or [`SamlError::UnsupportedBinding`].
    pub fn process_authn_request_msg(&mut self, message: &str) -> SamlResult<()> {
        let decoded = self.profile.decode(message)?;
        if !REQUEST_METHODS.contains(&decoded.http_method) {
            return Err(SamlError::UnsupportedBinding(format!(
                "AuthnRequest over {}",
                decoded.http_method
            )));
        }
        let element = decoded.xml()?;
        let request = AuthnRequest::from_element(element)?;

        let server = self.profile.server_arc();
        let sp = server.lookup_provider(&request.issuer)?;
        if !sp.supports(Role::ServiceProvider) {
            return Err(SamlError::UnknownProvider(format!(
                "{} is not a service provider",
                sp.entity_id()
            )));
        }
        let required = server.config().protocol.require_signed_requests
            || server.local().authn_requests_signed()
            || sp.authn_requests_signed();
        self.profile.verify_inbound(&decoded, element, sp, required)?;

        if let Some(destination) = &request.destination {
            if !server.local().has_location(destination) {
                return Err(SamlError::malformed(format!(
                    "request addressed to {destination}"
                )));
            }
        }

        let acs = consumer_service(sp, &request)?;
        let method = acs.binding.default_method();
        if method == HttpMethod::Soap {
            return Err(SamlError::UnsupportedBinding(
                "responses cannot be sent over SOAP".to_string(),
            ));
        }

        info!(provider_id = %sp.entity_id(), request_id = %request.id, binding = %method, "authentication request received");
        self.profile.take_relay_state_from(&decoded);
        self.profile.set_remote_provider_id(sp.entity_id());
        self.acs_url = Some(acs.location.clone());
        self.http_method = method;
        self.request = Some(request);
        self.response_status = Status::success();
        self.assertion = None;
        self.assertion_element = None;
        self.set_state(LoginState::RequestReceived);
        Ok(())
    }

    /// Gate before an assertion is issued.
    ///
    /// A persistent identifier the SP has not been given before requires
    /// consent, unless the request states that consent was obtained.
    ///
    /// # Errors
    ///
    /// [`SamlError::NoValidatedRequest`] if no request was received,
    /// [`SamlError::RequestDenied`] if authentication failed or consent is
    /// missing. A denied exchange can only answer with a failure Response.
    pub fn validate_request(&mut self, authentication_succeeded: bool, consent_obtained: bool) -> SamlResult<()> {
        if self.state != LoginState::RequestReceived {
            return Err(SamlError::NoValidatedRequest);
        }
        if !authentication_succeeded {
            return Err(self.deny("authentication failed"));
        }
        if !consent_obtained && self.needs_consent() {
            return Err(self.deny("consent not obtained"));
        }
        self.set_state(LoginState::Validated);
        Ok(())
    }

    fn needs_consent(&self) -> bool {
        let (Some(request), Some(sp)) = (&self.request, self.profile.remote_provider_id()) else {
            return false;
        };
        let persistent = request
            .name_id_policy
            .as_ref()
            .and_then(NameIdPolicy::parsed_format)
            == Some(NameIdFormat::Persistent);
        let federated = self
            .profile
            .identity()
            .and_then(|i| i.name_identifier_with_format(sp, NameIdFormat::Persistent.uri()))
            .is_some();
        persistent && !federated && request.consent.is_none()
    }

    fn deny(&mut self, reason: &str) -> SamlError {
        warn!(
            provider_id = self.profile.remote_provider_id().unwrap_or_default(),
            reason,
            "authentication request denied"
        );
        self.response_status = Status::request_denied().with_message(reason);
        self.set_state(LoginState::Failed);
        SamlError::RequestDenied(reason.to_string())
    }

    /// Attaches the name identifier for the next assertion, replacing any
    /// previous one. The format defaults to *unspecified*.
    pub fn set_name_identifier(&mut self, value: impl Into<String>, format: Option<NameIdFormat>) {
        let name_id = NameId::new(value).with_format(format.unwrap_or_default());
        self.profile.set_name_id(Some(name_id));
    }

    /// Adds attributes to the attribute statement of the next assertion.
    pub fn set_attributes(&mut self, attributes: &[Attribute]) {
        self.attributes.extend_from_slice(attributes);
    }

    /// Builds and signs the assertion and records the SP in the session.
    ///
    /// `authn_method` defaults to the password context class and
    /// `authn_instant` to now.
    ///
    /// # Errors
    ///
    /// [`SamlError::RequestDenied`] after a denial,
    /// [`SamlError::NoValidatedRequest`] before [`Login::validate_request`].
    pub fn build_assertion(
        &mut self,
        authn_method: Option<&str>,
        authn_instant: Option<DateTime<Utc>>,
    ) -> SamlResult<()> {
        match self.state {
            LoginState::Validated => {}
            LoginState::Failed => {
                return Err(SamlError::RequestDenied(
                    self.response_status
                        .status_message
                        .clone()
                        .unwrap_or_else(|| "request denied".to_string()),
                ))
            }
            _ => return Err(SamlError::NoValidatedRequest),
        }
        let (Some(request), Some(acs_url), Some(sp_id)) = (
            self.request.as_ref(),
            self.acs_url.as_deref(),
            self.profile.remote_provider_id(),
        ) else {
            return Err(SamlError::NoValidatedRequest);
        };

        let server = self.profile.server_arc();
        let sp = server.lookup_provider(sp_id)?;
        let (name_id, new_federation) = self.resolve_name_id(request, sp);

        let method = authn_method.unwrap_or(AuthnContextClass::Password.uri());
        let instant = authn_instant.unwrap_or_else(Utc::now);
        let validity = Duration::seconds(server.config().protocol.assertion_validity_secs);

        let confirmation = SubjectConfirmation::bearer().with_data(
            SubjectConfirmationData::for_request(Some(request.id.clone()), acs_url, validity),
        );
        let assertion = Assertion::new(server.entity_id())
            .with_subject(Subject::new(name_id.clone()).with_confirmation(confirmation))
            .with_conditions(Conditions::with_validity(validity).with_audience(sp.entity_id()))
            .with_authn_statement(AuthnStatement::new(method, instant))
            .with_attribute_statement(AttributeStatement::new(self.attributes.clone()));
        let mut element = assertion.to_element();
        server.assertion_signer().sign_element(&mut element)?;

        let sp_id = sp.entity_id().to_string();
        if new_federation {
            self.profile
                .identity_mut()
                .add_name_identifier(&sp_id, name_id.clone());
        }
        self.profile.session_mut().add_entry(
            &sp_id,
            SessionEntry {
                assertion: element.to_xml(),
                session_index: assertion.session_index().map(str::to_string),
                authn_instant: instant,
                authn_method: method.to_string(),
                name_id: Some(name_id.clone()),
            },
        );
        self.profile.set_name_id(Some(name_id));
        self.authn_context = Some(method.to_string());
        self.assertion = Some(assertion);
        self.assertion_element = Some(element);
        debug!(provider_id = %sp_id, "assertion built");
        self.set_state(LoginState::AssertionBuilt);
        Ok(())
    }

    /// Picks the subject of the assertion. Returns whether it is a new
    /// persistent federation to record in the identity.
    fn resolve_name_id(&self, request: &AuthnRequest, sp: &ProviderRecord) -> (NameId, bool) {
        if let Some(explicit) = self.profile.name_id() {
            return (explicit.clone(), false);
        }
        let format = request
            .name_id_policy
            .as_ref()
            .and_then(NameIdPolicy::parsed_format)
            .filter(|f| *f != NameIdFormat::Unspecified)
            .or_else(|| {
                sp.name_id_formats()
                    .iter()
                    .find_map(|f| NameIdFormat::from_uri(f))
            })
            .unwrap_or(NameIdFormat::Transient);
        let local = self.profile.server().entity_id();

        if format == NameIdFormat::Persistent {
            if let Some(existing) = self
                .profile
                .identity()
                .and_then(|i| i.name_identifier_with_format(sp.entity_id(), format.uri()))
            {
                return (existing.clone(), false);
            }
            let created = NameId::persistent(fed_crypto::random::generate_name_identifier())
                .with_name_qualifier(local)
                .with_sp_name_qualifier(sp.entity_id());
            return (created, true);
        }

        let transient = NameId::transient(fed_crypto::random::generate_name_identifier())
            .with_name_qualifier(local)
            .with_sp_name_qualifier(sp.entity_id());
        (transient, false)
    }

    /// Serializes the Response for the binding negotiated with the SP.
    ///
    /// After a denial the Response carries the failure status and no
    /// assertion. With an artifact binding the message is an artifact and
    /// the Response is kept as [`Login::artifact_message`].
    ///
    /// # Errors
    ///
    /// [`SamlError::NoAssertion`] before [`Login::build_assertion`],
    /// [`SamlError::UnsupportedBinding`] for the artifact binding without a
    /// local artifact resolution service.
    pub fn build_response_msg(&mut self) -> SamlResult<OutboundMessage> {
        let assertion_element = match self.state {
            LoginState::AssertionBuilt => Some(
                self.assertion_element
                    .clone()
                    .ok_or(SamlError::NoAssertion)?,
            ),
            LoginState::Failed => None,
            _ => return Err(SamlError::NoAssertion),
        };
        let (Some(request), Some(acs_url)) = (self.request.as_ref(), self.acs_url.clone()) else {
            return Err(SamlError::NoAssertion);
        };

        let mut response = Response::new(self.profile.server().entity_id(), self.response_status.clone())
            .in_response_to(Some(request.id.clone()))
            .with_destination(&acs_url);
        let element = response.to_element_with(assertion_element.into_iter().collect());
        if let Some(assertion) = &self.assertion {
            if self.state == LoginState::AssertionBuilt {
                response = response.with_assertion(assertion.clone());
            }
        }

        let message = match self.http_method {
            HttpMethod::ArtifactGet | HttpMethod::ArtifactPost => self.emit_artifact(element, &acs_url)?,
            method => self
                .profile
                .emit(element, MessageParam::Response, &acs_url, method)?,
        };
        self.response = Some(response);
        self.set_state(LoginState::ResponseBuilt);
        Ok(message)
    }

    fn emit_artifact(&mut self, mut element: XmlElement, acs_url: &str) -> SamlResult<OutboundMessage> {
        let server = self.profile.server_arc();
        let local = server.local();
        let ars = local.artifact_resolution_endpoint(None).ok_or_else(|| {
            SamlError::UnsupportedBinding(format!(
                "{} has no artifact resolution service",
                local.entity_id()
            ))
        })?;
        if let Some(signer) = server.signer() {
            signer.sign_element(&mut element)?;
        }

        let artifact = Artifact::new(local.entity_id(), ars.index.unwrap_or(0)).encode();
        let relay_state = self.profile.relay_state().map(str::to_string);
        let message = if self.http_method == HttpMethod::ArtifactGet {
            OutboundMessage {
                url: encode_artifact_url(acs_url, &artifact, relay_state.as_deref()),
                body: None,
                http_method: HttpMethod::ArtifactGet,
                relay_state,
                param: MessageParam::Artifact,
            }
        } else {
            OutboundMessage {
                url: acs_url.to_string(),
                body: Some(artifact.clone()),
                http_method: HttpMethod::ArtifactPost,
                relay_state,
                param: MessageParam::Artifact,
            }
        };

        self.artifact = Some(artifact);
        self.artifact_message = Some(element.to_xml());
        self.profile.record_message(message.clone());
        Ok(message)
    }

    /// Parses an inbound `ArtifactResolve` and fetches the referenced
    /// message through `lookup`, which maps an artifact to the stored
    /// [`Login::artifact_message`].
    ///
    /// An artifact `lookup` does not know is answered with an empty
    /// `ArtifactResponse`.
    ///
    /// # Errors
    ///
    /// [`SamlError::MalformedMessage`], [`SamlError::SignatureInvalid`] or
    /// [`SamlError::UnknownProvider`], also when the artifact was issued by
    /// another entity.
    pub fn process_artifact_resolve(
        &mut self,
        message: &str,
        lookup: impl FnOnce(&str) -> Option<String>,
    ) -> SamlResult<()> {
        let decoded = self.profile.decode(message)?;
        let element = decoded.xml()?;
        let resolve = ArtifactResolve::from_element(element)?;

        let server = self.profile.server_arc();
        let requester = server.lookup_provider(&resolve.issuer)?;
        self.profile.verify_inbound(
            &decoded,
            element,
            requester,
            server.config().protocol.require_signed_requests,
        )?;

        let artifact = Artifact::decode(&resolve.artifact)?;
        if !artifact.issued_by(server.entity_id()) {
            return Err(SamlError::UnknownProvider(
                "artifact was issued by another entity".to_string(),
            ));
        }
        let resolved = lookup(&resolve.artifact)
            .map(|xml| XmlElement::parse(&xml))
            .transpose()?;
        if resolved.is_none() {
            warn!(provider_id = %requester.entity_id(), "unknown artifact");
        }

        self.profile.set_remote_provider_id(requester.entity_id());
        self.artifact = Some(resolve.artifact.clone());
        self.artifact_resolve = Some(resolve);
        self.resolved_message = resolved;
        Ok(())
    }

    /// Serializes the `ArtifactResponse` as a SOAP envelope. The returned
    /// URL is empty: the envelope answers the SOAP request.
    ///
    /// # Errors
    ///
    /// [`SamlError::NoValidatedRequest`] before
    /// [`Login::process_artifact_resolve`].
    pub fn build_artifact_response_msg(&mut self) -> SamlResult<OutboundMessage> {
        let resolve = self
            .artifact_resolve
            .as_ref()
            .ok_or(SamlError::NoValidatedRequest)?;
        let mut response = ArtifactResponse::new(
            self.profile.server().entity_id(),
            Status::success(),
            self.resolved_message.take(),
        );
        response.in_response_to = Some(resolve.id.clone());
        self.profile
            .emit(response.to_element(), MessageParam::Response, "", HttpMethod::Soap)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> LoginState {
        self.state
    }

    /// Returns the authentication request built or received.
    #[must_use]
    pub fn request(&self) -> Option<&AuthnRequest> {
        self.request.as_ref()
    }

    /// Returns the ID of the authentication request.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.id.as_str())
    }

    /// Returns the authentication context class of the assertion.
    #[must_use]
    pub fn authn_context(&self) -> Option<&str> {
        self.authn_context.as_deref()
    }

    /// Returns the assertion issued or accepted.
    #[must_use]
    pub fn assertion(&self) -> Option<&Assertion> {
        self.assertion.as_ref()
    }

    /// Returns the Response built or received.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Returns the status the IdP answers with.
    #[must_use]
    pub const fn response_status(&self) -> &Status {
        &self.response_status
    }

    /// Returns the artifact sent or being resolved.
    #[must_use]
    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    /// Returns the Response an artifact stands for, to be stored until the
    /// SP resolves it.
    #[must_use]
    pub fn artifact_message(&self) -> Option<&str> {
        self.artifact_message.as_deref()
    }

    /// Returns the binding of the next outbound message.
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

    /// Returns the remote provider.
    #[must_use]
    pub fn remote_provider_id(&self) -> Option<&str> {
        self.profile.remote_provider_id()
    }

    /// Returns the subject of the exchange.
    #[must_use]
    pub fn name_id(&self) -> Option<&NameId> {
        self.profile.name_id()
    }

    /// Returns the format URI of the subject.
    #[must_use]
    pub fn name_id_format(&self) -> Option<&str> {
        self.profile.name_id().and_then(|n| n.format.as_deref())
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

    fn set_state(&mut self, state: LoginState) {
        debug!(from = ?self.state, to = ?state, "login state");
        self.state = state;
    }
}

/// Picks the assertion consumer service a request asks for: by URL, by
/// index, by binding, else the SP's default.
fn consumer_service<'a>(sp: &'a ProviderRecord, request: &AuthnRequest) -> SamlResult<&'a Endpoint> {
    let unknown = |what: String| {
        SamlError::malformed(format!(
            "{what} is not an assertion consumer service of {}",
            sp.entity_id()
        ))
    };
    if let Some(url) = &request.assertion_consumer_service_url {
        return sp.acs_by_location(url).ok_or_else(|| unknown(url.clone()));
    }
    if let Some(index) = request.assertion_consumer_service_index {
        return u16::try_from(index)
            .ok()
            .and_then(|i| sp.acs_by_index(i))
            .ok_or_else(|| unknown(format!("index {index}")));
    }
    request
        .parsed_binding()
        .and_then(|b| sp.acs_endpoint(b.default_method()))
        .or_else(|| sp.default_acs())
        .ok_or_else(|| unknown("default".to_string()))
}

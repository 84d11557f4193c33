//! Web Browser SSO between the IdP and a service provider.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fed_core::{EngineConfig, EngineContext};
use fed_protocol_saml::{
    Attribute, AuthnContextClass, Endpoint, ErrorKind, HttpMethod, Login, LoginState,
    MetadataBuilder, NameIdFormat, SamlBinding, Server,
};

use crate::common::{self, kind, Federation, IDP, SP_A, SP_B};

/// Redirect request, POST response, attributes and relay state survive the
/// round trip and both sides record the session.
#[test]
fn test_redirect_request_post_response() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(None, HttpMethod::Redirect)?;
    sp.set_relay_state(Some("/inbox?folder=2".to_string()));
    let request = sp.build_authn_request_msg()?;
    assert!(request.url.starts_with(&format!("{IDP}/sso?SAMLRequest=")));
    assert_eq!(sp.state(), LoginState::RequestSent);

    let mut idp = Login::new(Arc::clone(&fed.idp));
    idp.process_authn_request_msg(&request.url)?;
    assert_eq!(idp.remote_provider_id(), Some(SP_A));
    assert_eq!(idp.relay_state(), Some("/inbox?folder=2"));

    idp.validate_request(true, true)?;
    idp.set_attributes(&[
        Attribute::single("mail", "jdoe@example.org"),
        Attribute::single("role", "auditor"),
    ]);
    idp.build_assertion(Some(AuthnContextClass::PasswordProtectedTransport.uri()), None)?;
    let response = idp.build_response_msg()?;
    assert_eq!(response.http_method, HttpMethod::Post);
    assert_eq!(response.url, format!("{SP_A}/acs"));
    assert_eq!(response.relay_state.as_deref(), Some("/inbox?folder=2"));

    let body = response.body.as_deref().unwrap_or_default();
    sp.process_response_msg(body)?;
    sp.accept_sso()?;

    assert_eq!(sp.state(), LoginState::Accepted);
    assert_eq!(sp.relay_state(), Some("/inbox?folder=2"));
    assert_eq!(
        sp.authn_context(),
        Some(AuthnContextClass::PasswordProtectedTransport.uri())
    );
    let statement = sp
        .assertion()
        .and_then(|a| a.attribute_statement.as_ref())
        .ok_or_else(|| anyhow::anyhow!("no attribute statement"))?;
    assert_eq!(statement.values("role"), Some(&["auditor".to_string()][..]));

    let name_id = sp.name_id().cloned().ok_or_else(|| anyhow::anyhow!("no subject"))?;
    assert_eq!(name_id.parsed_format(), NameIdFormat::Persistent);
    assert_eq!(idp.name_id(), Some(&name_id));
    assert_eq!(sp.identity().and_then(|i| i.get_federation(IDP)), Some(&name_id));

    let sp_session = sp.session().ok_or_else(|| anyhow::anyhow!("no SP session"))?;
    let idp_session = idp.session().ok_or_else(|| anyhow::anyhow!("no IdP session"))?;
    assert_eq!(sp_session.get_assertions(IDP).len(), 1);
    assert_eq!(idp_session.get_assertions(SP_A).len(), 1);
    assert_eq!(
        sp_session.get_session_index(IDP),
        idp_session.get_session_index(SP_A)
    );
    assert!(sp_session.is_dirty());
    Ok(())
}

/// A request sent by POST is answered the same way.
#[test]
fn test_post_request() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut sp = Login::new(Arc::clone(&fed.sp_b));
    sp.init_authn_request(Some(IDP), HttpMethod::Post)?;
    let request = sp.build_authn_request_msg()?;
    assert_eq!(request.url, format!("{IDP}/sso/post"));

    let mut idp = Login::new(Arc::clone(&fed.idp));
    idp.process_authn_request_msg(request.body.as_deref().unwrap_or_default())?;
    assert_eq!(idp.remote_provider_id(), Some(SP_B));
    idp.validate_request(true, true)?;
    idp.build_assertion(None, None)?;
    let response = idp.build_response_msg()?;

    sp.process_response_msg(response.body.as_deref().unwrap_or_default())?;
    sp.accept_sso()?;
    assert_eq!(sp.authn_context(), Some(AuthnContextClass::Password.uri()));
    Ok(())
}

/// A failed authentication yields a RequestDenied response that the SP
/// rejects without creating a session.
#[test]
fn test_denied_authentication() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(Some(IDP), HttpMethod::Redirect)?;
    let request = sp.build_authn_request_msg()?;

    let mut idp = Login::new(Arc::clone(&fed.idp));
    idp.process_authn_request_msg(&request.url)?;
    assert_eq!(kind(idp.validate_request(false, true)), Some(ErrorKind::RequestDenied));
    assert_eq!(idp.state(), LoginState::Failed);

    assert_eq!(kind(idp.build_assertion(None, None)), Some(ErrorKind::RequestDenied));

    let response = idp.build_response_msg()?;
    assert!(idp.session().map_or(true, |s| s.is_empty()));

    let err = kind(sp.process_response_msg(response.body.as_deref().unwrap_or_default()));
    assert_eq!(err, Some(ErrorKind::StatusNotSuccess));
    assert!(sp.session().is_none());
    Ok(())
}

/// Editing the signed response in transit is detected.
#[test]
fn test_tampered_response_rejected() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(Some(IDP), HttpMethod::Redirect)?;
    let request = sp.build_authn_request_msg()?;

    let mut idp = Login::new(Arc::clone(&fed.idp));
    idp.process_authn_request_msg(&request.url)?;
    idp.validate_request(true, true)?;
    idp.set_attributes(&[Attribute::single("role", "reader")]);
    idp.build_assertion(None, None)?;
    let response = idp.build_response_msg()?;

    let xml = String::from_utf8(STANDARD.decode(response.body.as_deref().unwrap_or_default())?)?;
    assert!(xml.contains(">reader<"));
    let forged = STANDARD.encode(xml.replace(">reader<", ">admin<"));

    let err = kind(sp.process_response_msg(&forged));
    assert_eq!(err, Some(ErrorKind::SignatureInvalid));
    assert_eq!(sp.state(), LoginState::RequestSent);

    // The untouched response is still accepted afterwards.
    sp.process_response_msg(response.body.as_deref().unwrap_or_default())?;
    sp.accept_sso()?;
    Ok(())
}

/// SOAP cannot carry an AuthnRequest, so the request falls back to the
/// IdP's preferred front-channel binding.
#[test]
fn test_sso_binding_fallback() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(Some(IDP), HttpMethod::Soap)?;
    assert_eq!(sp.http_method(), HttpMethod::Redirect);

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(Some(IDP), HttpMethod::Any)?;
    assert_eq!(sp.http_method(), HttpMethod::Redirect);
    Ok(())
}

/// An IdP that publishes no SSO service cannot be asked to sign in.
#[test]
fn test_idp_without_sso_service() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let logout_only = MetadataBuilder::new("https://logout-only.test/")
        .idp_slo_service(Endpoint::new(
            SamlBinding::HttpRedirect,
            "https://logout-only.test/slo",
        ))
        .build();

    let mut sp = common::server(&fed.sp_a_party, &EngineConfig::default())?;
    sp.register_provider(&logout_only, None)?;

    let mut login = Login::new(Arc::new(sp));
    let err = kind(login.init_authn_request(Some("https://logout-only.test/"), HttpMethod::Redirect));
    assert_eq!(err, Some(ErrorKind::NoSsoEndpoint));
    assert_eq!(login.state(), LoginState::Init);

    let err = kind(login.init_authn_request(Some(SP_B), HttpMethod::Redirect));
    assert_eq!(err, Some(ErrorKind::UnknownProvider));
    Ok(())
}

/// The response travels as an artifact that the SP resolves over SOAP.
#[test]
fn test_artifact_binding() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(Some(IDP), HttpMethod::Redirect)?;
    sp.set_protocol_binding(HttpMethod::ArtifactGet)?;
    let request = sp.build_authn_request_msg()?;

    let mut idp = Login::new(Arc::clone(&fed.idp));
    idp.process_authn_request_msg(&request.url)?;
    assert_eq!(idp.http_method(), HttpMethod::ArtifactGet);
    idp.validate_request(true, true)?;
    idp.build_assertion(None, None)?;
    let redirect = idp.build_response_msg()?;
    assert!(redirect.url.starts_with(&format!("{SP_A}/acs/artifact?SAMLart=")));

    // The IdP keeps the response until the artifact is resolved.
    let artifact = idp.artifact().map(str::to_string).unwrap_or_default();
    let stored = idp.artifact_message().map(str::to_string);

    sp.init_artifact_resolve(&redirect.url)?;
    let resolve = sp.build_artifact_resolve_msg()?;
    assert_eq!(resolve.url, format!("{IDP}/artifact"));
    assert_eq!(resolve.http_method, HttpMethod::Soap);

    let mut resolver = Login::new(Arc::clone(&fed.idp));
    resolver.process_artifact_resolve(resolve.body.as_deref().unwrap_or_default(), |a| {
        (a == artifact).then_some(stored).flatten()
    })?;
    let answer = resolver.build_artifact_response_msg()?;
    assert!(answer.url.is_empty());

    sp.process_response_msg(answer.body.as_deref().unwrap_or_default())?;
    sp.accept_sso()?;
    assert_eq!(sp.session().map(|s| s.get_assertions(IDP).len()), Some(1));
    Ok(())
}

/// With unsigned messages the assertion signature still authenticates the
/// response.
#[test]
fn test_unsigned_messages_signed_assertion() -> anyhow::Result<()> {
    let mut config = EngineConfig::default();
    config.crypto.sign_messages = false;
    let fed = Federation::with_config(&config)?;

    let signed_in = fed.sign_in(&fed.sp_a, None)?;
    assert_eq!(signed_in.sp_session.get_assertions(IDP).len(), 1);
    Ok(())
}

/// An IdP configured to require signed requests refuses unsigned ones.
#[test]
fn test_signed_requests_required() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut unsigned = EngineConfig::default();
    unsigned.crypto.sign_messages = false;
    let mut sp = common::server(&fed.sp_a_party, &unsigned)?;
    sp.register_provider(&fed.idp_party.metadata, None)?;

    let mut strict = EngineConfig::default();
    strict.protocol.require_signed_requests = true;
    let mut idp = Server::create(
        EngineContext::with_config(strict)?,
        &fed.idp_party.metadata,
        fed.idp_party.key_pem.as_bytes(),
        None,
        None,
    )?;
    idp.register_provider(&fed.sp_a_party.metadata, None)?;

    let mut sp_login = Login::new(Arc::new(sp));
    sp_login.init_authn_request(Some(IDP), HttpMethod::Redirect)?;
    let request = sp_login.build_authn_request_msg()?;

    let mut idp_login = Login::new(Arc::new(idp));
    let err = kind(idp_login.process_authn_request_msg(&request.url));
    assert_eq!(err, Some(ErrorKind::SignatureInvalid));
    Ok(())
}

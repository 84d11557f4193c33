//! Single logout, including the IdP relaying a logout to every other SP.

use std::sync::Arc;

use fed_protocol_saml::{ErrorKind, HttpMethod, Logout, LogoutState, OutboundMessage, Server, Session};

use crate::common::{kind, Federation, IDP, SP_A, SP_B};

/// Returns what the browser or SOAP client would deliver for `message`.
fn delivered(message: &OutboundMessage) -> &str {
    message.body.as_deref().unwrap_or(message.url.as_str())
}

/// Lets `sp` answer a logout request on behalf of the principal.
fn answer_at(sp: &Arc<Server>, session: &Session, request: &OutboundMessage) -> anyhow::Result<OutboundMessage> {
    let mut logout = Logout::new(Arc::clone(sp));
    logout.set_session(session)?;
    logout.process_request_msg(delivered(request))?;
    logout.validate_request()?;
    assert!(logout.session().is_some_and(Session::is_empty));
    Ok(logout.build_response_msg()?)
}

/// SP-A starts the logout; the IdP logs the principal out of SP-B over
/// SOAP before answering SP-A.
#[test]
fn test_sp_initiated_logout_fans_out() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let at_a = fed.sign_in(&fed.sp_a, None)?;
    let at_b = fed.sign_in(&fed.sp_b, Some(&at_a.idp_session))?;
    let idp_session = at_b.idp_session;
    assert_eq!(idp_session.provider_ids(), vec![SP_A.to_string(), SP_B.to_string()]);

    let mut sp = Logout::new(Arc::clone(&fed.sp_a));
    sp.set_session(&at_a.sp_session)?;
    sp.set_relay_state(Some("/goodbye".to_string()));
    sp.init_request(None, HttpMethod::Redirect)?;
    let request = sp.build_request_msg()?;
    assert!(request.url.starts_with(&format!("{IDP}/slo?SAMLRequest=")));
    assert_eq!(sp.state(), LogoutState::Sent);

    let mut idp = Logout::new(Arc::clone(&fed.idp));
    idp.set_session(&idp_session)?;
    idp.process_request_msg(&request.url)?;
    assert_eq!(idp.state(), LogoutState::RequestReceived);
    assert_eq!(idp.remote_provider_id(), Some(SP_A));
    idp.validate_request()?;
    assert!(idp.session().is_some_and(|s| s.entries(SP_A).is_empty()));

    // Relay the logout to every other SP.
    let mut relayed = Vec::new();
    while let Some(next) = idp.get_next_provider_id() {
        idp.init_request(Some(next.as_str()), HttpMethod::Soap)?;
        let soap = idp.build_request_msg()?;
        assert_eq!(soap.url, format!("{next}/slo/soap"));
        let answer = answer_at(&fed.sp_b, &at_b.sp_session, &soap)?;
        assert!(answer.url.is_empty());
        idp.process_response_msg(delivered(&answer))?;
        relayed.push(next);
    }
    assert_eq!(relayed, vec![SP_B.to_string()]);
    assert_eq!(idp.state(), LogoutState::Done);
    assert!(idp.session().is_some_and(Session::is_empty));

    // Finally answer SP-A.
    let response = idp.build_response_msg()?;
    assert!(response.url.starts_with(&format!("{SP_A}/slo?SAMLResponse=")));
    assert_eq!(response.relay_state.as_deref(), Some("/goodbye"));
    assert_eq!(idp.state(), LogoutState::ResponseBuilt);

    sp.process_response_msg(&response.url)?;
    assert_eq!(sp.state(), LogoutState::Done);
    assert_eq!(sp.relay_state(), Some("/goodbye"));
    assert!(sp.session().is_some_and(Session::is_empty));
    Ok(())
}

/// The IdP starts the logout; SP-A answers at the IdP's response location.
#[test]
fn test_idp_initiated_redirect_logout() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let signed_in = fed.sign_in(&fed.sp_a, None)?;

    let mut idp = Logout::new(Arc::clone(&fed.idp));
    idp.set_session(&signed_in.idp_session)?;
    idp.init_request(None, HttpMethod::Redirect)?;
    assert_eq!(idp.remote_provider_id(), Some(SP_A));
    let session_index = signed_in.idp_session.get_session_index(SP_A).map(str::to_string);
    assert_eq!(
        idp.request().map(|r| r.session_indexes.clone()),
        session_index.map(|i| vec![i])
    );
    let request = idp.build_request_msg()?;

    let response = answer_at(&fed.sp_a, &signed_in.sp_session, &request)?;
    assert!(response.url.starts_with(&format!("{IDP}/slo/response?SAMLResponse=")));

    idp.process_response_msg(&response.url)?;
    assert_eq!(idp.state(), LogoutState::Done);
    assert_eq!(idp.get_next_provider_id(), None);
    Ok(())
}

/// A POST request is answered over the binding the SP supports.
#[test]
fn test_logout_response_binding_fallback() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let signed_in = fed.sign_in(&fed.sp_a, None)?;

    let mut sp = Logout::new(Arc::clone(&fed.sp_a));
    sp.set_session(&signed_in.sp_session)?;
    sp.init_request(Some(IDP), HttpMethod::Post)?;
    assert_eq!(sp.http_method(), HttpMethod::Post);
    let request = sp.build_request_msg()?;
    assert_eq!(request.url, format!("{IDP}/slo/post"));

    let mut idp = Logout::new(Arc::clone(&fed.idp));
    idp.set_session(&signed_in.idp_session)?;
    idp.process_request_msg(delivered(&request))?;
    idp.validate_request()?;
    // SP-A publishes no POST logout service.
    let response = idp.build_response_msg()?;
    assert_eq!(response.http_method, HttpMethod::Redirect);

    sp.process_response_msg(&response.url)?;
    assert_eq!(sp.state(), LogoutState::Done);
    Ok(())
}

/// Responses are only accepted from the asked peer, for the request sent.
#[test]
fn test_unrelated_logout_response_rejected() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let first = fed.sign_in(&fed.sp_a, None)?;
    let second = fed.sign_in(&fed.sp_a, None)?;

    let mut stale = Logout::new(Arc::clone(&fed.sp_a));
    stale.set_session(&first.sp_session)?;
    stale.init_request(None, HttpMethod::Soap)?;
    let stale_request = stale.build_request_msg()?;
    let stale_answer = answer_at(&fed.idp, &first.idp_session, &stale_request)?;

    let mut sp = Logout::new(Arc::clone(&fed.sp_a));
    sp.set_session(&second.sp_session)?;
    assert_eq!(kind(sp.process_response_msg(delivered(&stale_answer))), Some(ErrorKind::NotInitialized));

    sp.init_request(None, HttpMethod::Soap)?;
    sp.build_request_msg()?;
    assert_eq!(
        kind(sp.process_response_msg(delivered(&stale_answer))),
        Some(ErrorKind::MalformedMessage)
    );
    assert_eq!(sp.state(), LogoutState::Sent);
    assert!(sp.session().is_some_and(|s| !s.is_empty()));
    Ok(())
}

/// A principal unknown to the responder gets an UnknownPrincipal answer,
/// which leaves the initiator's session in place.
#[test]
fn test_logout_for_unknown_principal() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let first = fed.sign_in(&fed.sp_a, None)?;
    let second = fed.sign_in(&fed.sp_a, None)?;

    let mut idp = Logout::new(Arc::clone(&fed.idp));
    idp.set_session(&second.idp_session)?;
    idp.init_request(Some(SP_A), HttpMethod::Soap)?;
    let request = idp.build_request_msg()?;

    let mut sp = Logout::new(Arc::clone(&fed.sp_a));
    sp.set_session(&first.sp_session)?;
    sp.process_request_msg(delivered(&request))?;
    assert_eq!(kind(sp.validate_request()), Some(ErrorKind::SessionNotFound));
    assert!(sp.session().is_some_and(|s| !s.is_empty()));
    let answer = sp.build_response_msg()?;

    assert_eq!(
        kind(idp.process_response_msg(delivered(&answer))),
        Some(ErrorKind::StatusNotSuccess)
    );
    assert!(idp.session().is_some_and(|s| !s.is_empty()));
    Ok(())
}

/// Logout needs a session with the target.
#[test]
fn test_logout_without_session() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let signed_in = fed.sign_in(&fed.sp_a, None)?;

    let mut idp = Logout::new(Arc::clone(&fed.idp));
    assert_eq!(kind(idp.init_request(None, HttpMethod::Redirect)), Some(ErrorKind::NoActiveSession));

    idp.set_session(&signed_in.idp_session)?;
    assert_eq!(
        kind(idp.init_request(Some(SP_B), HttpMethod::Redirect)),
        Some(ErrorKind::NoActiveSession)
    );
    assert_eq!(
        kind(idp.init_request(Some("https://stranger.test/"), HttpMethod::Redirect)),
        Some(ErrorKind::UnknownProvider)
    );
    assert_eq!(kind(idp.build_request_msg()), Some(ErrorKind::NotInitialized));
    assert_eq!(kind(idp.validate_request()), Some(ErrorKind::NoValidatedRequest));
    Ok(())
}

//! Dumps of the trust store and of the per-principal records, and provider
//! registration.

use std::sync::Arc;

use fed_core::EngineContext;
use fed_protocol_saml::{ErrorKind, HttpMethod, Identity, Login, Logout, LogoutState, Server, Session};

use crate::common::{self, kind, Federation, IDP, SP_A, SP_B};

/// A restored trust store keeps its providers and its signing key.
#[test]
fn test_trust_store_dump_round_trip() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let dump = fed.idp.dump()?;
    let restored = Arc::new(Server::restore(EngineContext::new(), dump.expose())?);

    assert_eq!(restored.entity_id(), IDP);
    assert_eq!(restored.provider_ids(), fed.idp.provider_ids());

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(Some(IDP), HttpMethod::Redirect)?;
    let request = sp.build_authn_request_msg()?;

    let mut idp = Login::new(restored);
    idp.process_authn_request_msg(&request.url)?;
    idp.validate_request(true, true)?;
    idp.build_assertion(None, None)?;
    let response = idp.build_response_msg()?;

    sp.process_response_msg(response.body.as_deref().unwrap_or_default())?;
    sp.accept_sso()?;
    Ok(())
}

/// A damaged trust store dump is refused as a whole.
#[test]
fn test_corrupt_trust_store_dump() -> anyhow::Result<()> {
    let fed = Federation::new()?;
    let dump = fed.sp_a.dump()?;
    let truncated = &dump.expose()[..dump.expose().len() / 2];
    let wrong_metadata = dump.expose().replace("EntityDescriptor", "Entity");

    for bad in [truncated, wrong_metadata.as_str(), "{}", ""] {
        assert_eq!(
            kind(Server::restore(EngineContext::new(), bad)),
            Some(ErrorKind::CorruptDump),
            "{bad}"
        );
    }
    Ok(())
}

/// Session and identity survive being stored between two requests, and
/// the restored records drive the logout.
#[test]
fn test_records_persist_between_requests() -> anyhow::Result<()> {
    let fed = Federation::new()?;

    let mut sp = Login::new(Arc::clone(&fed.sp_a));
    sp.init_authn_request(Some(IDP), HttpMethod::Redirect)?;
    let request = sp.build_authn_request_msg()?;
    let mut idp = Login::new(Arc::clone(&fed.idp));
    idp.process_authn_request_msg(&request.url)?;
    idp.validate_request(true, true)?;
    idp.build_assertion(None, None)?;
    let response = idp.build_response_msg()?;
    sp.process_response_msg(response.body.as_deref().unwrap_or_default())?;
    sp.accept_sso()?;

    let session_dump = sp.session().map(Session::dump).transpose()?.unwrap_or_default();
    let identity_dump = sp.identity().map(Identity::dump).transpose()?.unwrap_or_default();

    let session = Session::from_dump(&session_dump)?;
    assert!(session.is_dirty());
    assert_eq!(session.provider_ids(), vec![IDP.to_string()]);
    let identity = Identity::from_dump(&identity_dump)?;
    assert_eq!(identity.get_federation(IDP), sp.name_id());

    let mut logout = Logout::new(Arc::clone(&fed.sp_a));
    logout.profile_mut().set_session_from_dump(&session_dump)?;
    logout.profile_mut().set_identity_from_dump(&identity_dump)?;
    logout.init_request(None, HttpMethod::Soap)?;
    assert_eq!(logout.name_id(), sp.name_id());
    let request = logout.build_request_msg()?;

    let mut responder = Logout::new(Arc::clone(&fed.idp));
    if let Some(session) = idp.session() {
        responder.set_session(session)?;
    }
    responder.process_request_msg(request.body.as_deref().unwrap_or_default())?;
    responder.validate_request()?;
    let answer = responder.build_response_msg()?;

    logout.process_response_msg(answer.body.as_deref().unwrap_or_default())?;
    assert_eq!(logout.state(), LogoutState::Done);
    let emptied = logout.session().map(Session::dump).transpose()?.unwrap_or_default();
    assert!(Session::from_dump(&emptied)?.is_empty());

    assert_eq!(
        kind(logout.profile_mut().set_session_from_dump("{\"version\":7,\"entries\":{}}")),
        Some(ErrorKind::CorruptDump)
    );
    Ok(())
}

/// Registering a provider again replaces it; the local entity and broken
/// metadata are refused.
#[test]
fn test_provider_registration() -> anyhow::Result<()> {
    let idp_party = common::idp_party()?;
    let sp_party = common::sp_party(SP_A)?;
    let mut idp = common::server(&idp_party, &Default::default())?;

    idp.register_provider(&sp_party.metadata, None)?;
    idp.register_provider(&sp_party.metadata, None)?;
    assert_eq!(idp.provider_ids(), vec![SP_A.to_string()]);
    assert!(idp.get_provider(SP_A).is_some());
    assert!(idp.get_provider(SP_B).is_none());

    assert_eq!(
        kind(idp.register_provider(&idp_party.metadata, None)),
        Some(ErrorKind::DuplicateProvider)
    );
    assert_eq!(
        kind(idp.register_provider("<md:Organization xmlns:md=\"urn:oasis:names:tc:SAML:2.0:metadata\"/>", None)),
        Some(ErrorKind::InvalidMetadata)
    );
    assert_eq!(idp.provider_ids().len(), 1);
    Ok(())
}

//! Fixtures shared by unit tests: one IdP and two SPs that trust each other.

use std::sync::Arc;

use fed_core::{EngineConfig, EngineContext, HttpMethod};

use crate::login::Login;
use crate::metadata::{Endpoint, MetadataBuilder};
use crate::server::Server;
use crate::session::Session;
use crate::types::{NameIdFormat, SamlBinding};

pub(crate) const IDP: &str = "https://idp.example/";
pub(crate) const SP: &str = "https://sp.example/";
pub(crate) const SP_B: &str = "https://sp-b.example/";

pub(crate) struct Party {
    pub metadata: String,
    pub key_pem: String,
}

fn certified() -> (Vec<u8>, String) {
    let certified = rcgen::generate_simple_self_signed(vec!["saml.example".to_string()]).unwrap();
    (certified.cert.der().to_vec(), certified.signing_key.serialize_pem())
}

pub(crate) fn idp_party() -> Party {
    let (der, key_pem) = certified();
    let metadata = MetadataBuilder::new(IDP)
        .signing_certificate(&der)
        .sso_service(SamlBinding::HttpRedirect, format!("{IDP}sso/redirect"))
        .sso_service(SamlBinding::HttpPost, format!("{IDP}sso/post"))
        .idp_slo_service(
            Endpoint::new(SamlBinding::HttpRedirect, format!("{IDP}slo"))
                .with_response_location(format!("{IDP}slo/return")),
        )
        .idp_slo_service(Endpoint::new(SamlBinding::Soap, format!("{IDP}slo/soap")))
        .artifact_resolution_service(format!("{IDP}ars"), 0)
        .name_id_format(NameIdFormat::Persistent.uri())
        .build();
    Party { metadata, key_pem }
}

pub(crate) fn sp_party(entity_id: &str) -> Party {
    let (der, key_pem) = certified();
    let metadata = MetadataBuilder::new(entity_id)
        .signing_certificate(&der)
        .acs(SamlBinding::HttpPost, format!("{entity_id}acs/post"), 0)
        .acs(SamlBinding::HttpArtifact, format!("{entity_id}acs/artifact"), 1)
        .acs(SamlBinding::HttpRedirect, format!("{entity_id}acs/redirect"), 2)
        .sp_slo_service(Endpoint::new(SamlBinding::HttpRedirect, format!("{entity_id}slo")))
        .sp_slo_service(Endpoint::new(SamlBinding::Soap, format!("{entity_id}slo/soap")))
        .name_id_format(NameIdFormat::Persistent.uri())
        .build();
    Party { metadata, key_pem }
}

pub(crate) fn server(party: &Party, config: &EngineConfig) -> Server {
    let ctx = EngineContext::with_config(config.clone()).unwrap();
    Server::create(ctx, &party.metadata, party.key_pem.as_bytes(), None, None).unwrap()
}

/// IdP, SP and a second SP, all registered with each other.
pub(crate) fn federation(config: &EngineConfig) -> (Arc<Server>, Arc<Server>, Arc<Server>) {
    let idp = idp_party();
    let sp = sp_party(SP);
    let sp_b = sp_party(SP_B);

    let mut idp_server = server(&idp, config);
    idp_server.register_provider(&sp.metadata, None).unwrap();
    idp_server.register_provider(&sp_b.metadata, None).unwrap();

    let mut sp_server = server(&sp, config);
    sp_server.register_provider(&idp.metadata, None).unwrap();
    let mut sp_b_server = server(&sp_b, config);
    sp_b_server.register_provider(&idp.metadata, None).unwrap();

    (Arc::new(idp_server), Arc::new(sp_server), Arc::new(sp_b_server))
}

/// Runs a complete SSO between `idp` and `sp`. Returns the IdP's and the
/// SP's session afterwards.
pub(crate) fn single_sign_on(
    idp: &Arc<Server>,
    sp: &Arc<Server>,
    idp_session: Option<&Session>,
) -> (Session, Session) {
    let mut sp_login = Login::new(Arc::clone(sp));
    sp_login.init_authn_request(Some(IDP), HttpMethod::Redirect).unwrap();
    let request = sp_login.build_authn_request_msg().unwrap();

    let mut idp_login = Login::new(Arc::clone(idp));
    if let Some(session) = idp_session {
        idp_login.set_session(session).unwrap();
    }
    idp_login.process_authn_request_msg(&request.url).unwrap();
    idp_login.validate_request(true, true).unwrap();
    idp_login.build_assertion(None, None).unwrap();
    let response = idp_login.build_response_msg().unwrap();

    sp_login.process_response_msg(response.body.as_deref().unwrap()).unwrap();
    sp_login.accept_sso().unwrap();
    (
        idp_login.session().cloned().unwrap(),
        sp_login.session().cloned().unwrap(),
    )
}

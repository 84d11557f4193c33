//! Common test utilities and fixtures.
//!
//! A [`Federation`] holds an identity provider and two service providers,
//! each with a fresh self-signed key pair, all registered with each other.

use std::sync::Arc;

use fed_core::{EngineConfig, EngineContext};
use fed_protocol_saml::{
    Endpoint, ErrorKind, HttpMethod, Login, MetadataBuilder, NameIdFormat, SamlBinding, SamlResult,
    Server, Session,
};

pub const IDP: &str = "https://idp.test/saml";
pub const SP_A: &str = "https://app-a.test/saml";
pub const SP_B: &str = "https://app-b.test/saml";

/// Metadata and private key of one provider.
pub struct Party {
    pub metadata: String,
    pub key_pem: String,
}

/// Test environment with three in-process providers.
pub struct Federation {
    pub idp: Arc<Server>,
    pub sp_a: Arc<Server>,
    pub sp_b: Arc<Server>,
    pub idp_party: Party,
    pub sp_a_party: Party,
}

/// Sessions left behind by one SSO, on both sides.
pub struct SignedIn {
    pub idp_session: Session,
    pub sp_session: Session,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fed_protocol_saml=debug")
        .with_test_writer()
        .try_init();
}

/// Error kind of a failed engine call.
pub fn kind<T>(result: SamlResult<T>) -> Option<ErrorKind> {
    result.err().map(|e| e.kind())
}

fn key_pair() -> anyhow::Result<(Vec<u8>, String)> {
    let certified = rcgen::generate_simple_self_signed(vec!["saml.test".to_string()])?;
    Ok((certified.cert.der().to_vec(), certified.signing_key.serialize_pem()))
}

pub fn idp_party() -> anyhow::Result<Party> {
    let (der, key_pem) = key_pair()?;
    let metadata = MetadataBuilder::new(IDP)
        .signing_certificate(&der)
        .sso_service(SamlBinding::HttpRedirect, format!("{IDP}/sso"))
        .sso_service(SamlBinding::HttpPost, format!("{IDP}/sso/post"))
        .idp_slo_service(
            Endpoint::new(SamlBinding::HttpRedirect, format!("{IDP}/slo"))
                .with_response_location(format!("{IDP}/slo/response")),
        )
        .idp_slo_service(Endpoint::new(SamlBinding::HttpPost, format!("{IDP}/slo/post")))
        .idp_slo_service(Endpoint::new(SamlBinding::Soap, format!("{IDP}/slo/soap")))
        .artifact_resolution_service(format!("{IDP}/artifact"), 0)
        .name_id_format(NameIdFormat::Persistent.uri())
        .build();
    Ok(Party { metadata, key_pem })
}

pub fn sp_party(entity_id: &str) -> anyhow::Result<Party> {
    let (der, key_pem) = key_pair()?;
    let metadata = MetadataBuilder::new(entity_id)
        .signing_certificate(&der)
        .acs(SamlBinding::HttpPost, format!("{entity_id}/acs"), 0)
        .acs(SamlBinding::HttpArtifact, format!("{entity_id}/acs/artifact"), 1)
        .sp_slo_service(Endpoint::new(SamlBinding::HttpRedirect, format!("{entity_id}/slo")))
        .sp_slo_service(Endpoint::new(SamlBinding::Soap, format!("{entity_id}/slo/soap")))
        .name_id_format(NameIdFormat::Persistent.uri())
        .build();
    Ok(Party { metadata, key_pem })
}

pub fn server(party: &Party, config: &EngineConfig) -> anyhow::Result<Server> {
    let ctx = EngineContext::with_config(config.clone())?;
    Ok(Server::create(ctx, &party.metadata, party.key_pem.as_bytes(), None, None)?)
}

impl Federation {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> anyhow::Result<Self> {
        init_tracing();
        let idp_party = idp_party()?;
        let sp_a_party = sp_party(SP_A)?;
        let sp_b_party = sp_party(SP_B)?;

        let mut idp = server(&idp_party, config)?;
        idp.register_provider(&sp_a_party.metadata, None)?;
        idp.register_provider(&sp_b_party.metadata, None)?;

        let mut sp_a = server(&sp_a_party, config)?;
        sp_a.register_provider(&idp_party.metadata, None)?;
        let mut sp_b = server(&sp_b_party, config)?;
        sp_b.register_provider(&idp_party.metadata, None)?;

        Ok(Self {
            idp: Arc::new(idp),
            sp_a: Arc::new(sp_a),
            sp_b: Arc::new(sp_b),
            idp_party,
            sp_a_party,
        })
    }

    /// Signs the principal in at `sp` through the IdP, continuing
    /// `idp_session` when given.
    pub fn sign_in(&self, sp: &Arc<Server>, idp_session: Option<&Session>) -> anyhow::Result<SignedIn> {
        let mut sp_login = Login::new(Arc::clone(sp));
        sp_login.init_authn_request(Some(IDP), HttpMethod::Redirect)?;
        let request = sp_login.build_authn_request_msg()?;

        let mut idp_login = Login::new(Arc::clone(&self.idp));
        if let Some(session) = idp_session {
            idp_login.set_session(session)?;
        }
        idp_login.process_authn_request_msg(&request.url)?;
        idp_login.validate_request(true, true)?;
        idp_login.build_assertion(None, None)?;
        let response = idp_login.build_response_msg()?;

        let body = response.body.as_deref().ok_or_else(|| anyhow::anyhow!("no POST body"))?;
        sp_login.process_response_msg(body)?;
        sp_login.accept_sso()?;

        Ok(SignedIn {
            idp_session: idp_login.session().cloned().unwrap_or_default(),
            sp_session: sp_login.session().cloned().unwrap_or_default(),
        })
    }
}

//! SAML metadata.
//!
//! Parses an `EntityDescriptor` into a [`ProviderRecord`] and builds
//! metadata documents for local entities.

use base64::{engine::general_purpose::STANDARD, Engine};
use fed_core::HttpMethod;
use fed_crypto::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::{SamlBinding, MD_NS, SAMLP_NS, XMLDSIG_NS};
use crate::xml::XmlElement;

fn invalid(msg: impl Into<String>) -> SamlError {
    SamlError::InvalidMetadata(msg.into())
}

/// Role a provider plays, fixed when its record is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Identity provider.
    IdentityProvider,
    /// Service provider.
    ServiceProvider,
    /// Both descriptors are present.
    Both,
}

impl Role {
    /// True if the provider can issue assertions.
    #[must_use]
    pub const fn is_idp(&self) -> bool {
        matches!(self, Self::IdentityProvider | Self::Both)
    }

    /// True if the provider can consume assertions.
    #[must_use]
    pub const fn is_sp(&self) -> bool {
        matches!(self, Self::ServiceProvider | Self::Both)
    }

    /// True if this role covers `other`.
    #[must_use]
    pub const fn supports(&self, other: Self) -> bool {
        match other {
            Self::IdentityProvider => self.is_idp(),
            Self::ServiceProvider => self.is_sp(),
            Self::Both => self.is_idp() && self.is_sp(),
        }
    }
}

/// A protocol endpoint advertised in metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Binding of the endpoint.
    pub binding: SamlBinding,
    /// Where requests are sent.
    pub location: String,
    /// Where responses are sent, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_location: Option<String>,
    /// Index for indexed endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u16>,
    /// `isDefault` flag of indexed endpoints.
    #[serde(default)]
    pub is_default: bool,
}

impl Endpoint {
    /// Creates a non-indexed endpoint.
    #[must_use]
    pub fn new(binding: SamlBinding, location: impl Into<String>) -> Self {
        Self {
            binding,
            location: location.into(),
            response_location: None,
            index: None,
            is_default: false,
        }
    }

    /// Sets the index.
    #[must_use]
    pub const fn with_index(mut self, index: u16) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets the response location.
    #[must_use]
    pub fn with_response_location(mut self, location: impl Into<String>) -> Self {
        self.response_location = Some(location.into());
        self
    }

    /// Returns the response location, falling back to the location.
    #[must_use]
    pub fn response_url(&self) -> &str {
        self.response_location.as_deref().unwrap_or(&self.location)
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let binding_uri = element
            .attr("Binding")
            .ok_or_else(|| invalid(format!("{} has no Binding", element.local_name())))?;
        let binding = SamlBinding::from_uri(binding_uri)
            .ok_or_else(|| invalid(format!("unknown binding {binding_uri}")))?;
        let location = element
            .attr("Location")
            .ok_or_else(|| invalid(format!("{} has no Location", element.local_name())))?;
        url::Url::parse(location).map_err(|e| invalid(format!("bad Location {location}: {e}")))?;

        let response_location = element.attr("ResponseLocation").map(str::to_string);
        if let Some(rl) = &response_location {
            url::Url::parse(rl).map_err(|e| invalid(format!("bad ResponseLocation {rl}: {e}")))?;
        }
        let index = element
            .attr("index")
            .map(|i| i.parse::<u16>().map_err(|_| invalid(format!("bad endpoint index {i}"))))
            .transpose()?;

        Ok(Self {
            binding,
            location: location.to_string(),
            response_location,
            index,
            is_default: matches!(element.attr("isDefault"), Some("true" | "1")),
        })
    }

    fn to_element(&self, name: &str) -> XmlElement {
        XmlElement::new(format!("md:{name}"))
            .with_attr("Binding", self.binding.uri())
            .with_attr("Location", &self.location)
            .with_opt_attr("ResponseLocation", self.response_location.as_ref())
            .with_opt_attr("index", self.index.map(|i| i.to_string()))
            .with_opt_attr("isDefault", self.is_default.then_some("true"))
    }
}

fn select(endpoints: &[Endpoint], method: HttpMethod) -> Option<&Endpoint> {
    let binding = SamlBinding::for_method(method)?;
    endpoints.iter().find(|e| e.binding == binding)
}

/// A provider as described by its metadata.
///
/// Records are immutable once built; registering new metadata for the same
/// entity ID replaces the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    entity_id: String,
    role: Role,
    signing_certificate: Option<Vec<u8>>,
    encryption_certificate: Option<Vec<u8>>,
    verifying_key: Option<VerifyingKey>,
    sso_services: Vec<Endpoint>,
    slo_services: Vec<Endpoint>,
    acs_services: Vec<Endpoint>,
    artifact_resolution_services: Vec<Endpoint>,
    name_id_formats: Vec<String>,
    authn_requests_signed: bool,
    metadata: String,
}

impl ProviderRecord {
    /// Parses a metadata document.
    ///
    /// The root is an `EntityDescriptor`, or an `EntitiesDescriptor`
    /// holding exactly one. The role follows from the SSO descriptors found.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::InvalidMetadata`] for unparsable documents,
    /// missing role descriptors, bad endpoints or unusable certificates.
    pub fn from_metadata(metadata: &str) -> SamlResult<Self> {
        let root = XmlElement::parse(metadata).map_err(|e| invalid(e.to_string()))?;
        let entity = match root.local_name() {
            "EntityDescriptor" => &root,
            "EntitiesDescriptor" => {
                let mut entities = root.children_named("EntityDescriptor");
                match (entities.next(), entities.next()) {
                    (Some(entity), None) => entity,
                    _ => return Err(invalid("expected exactly one EntityDescriptor")),
                }
            }
            other => return Err(invalid(format!("unexpected root element {other}"))),
        };

        let entity_id = entity
            .attr("entityID")
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| invalid("EntityDescriptor has no entityID"))?
            .to_string();

        let idp = entity.child("IDPSSODescriptor");
        let sp = entity.child("SPSSODescriptor");
        let role = match (idp, sp) {
            (Some(_), Some(_)) => Role::Both,
            (Some(_), None) => Role::IdentityProvider,
            (None, Some(_)) => Role::ServiceProvider,
            (None, None) => {
                return Err(invalid(format!(
                    "{entity_id} describes neither an IdP nor an SP"
                )))
            }
        };

        let mut record = Self {
            entity_id,
            role,
            signing_certificate: None,
            encryption_certificate: None,
            verifying_key: None,
            sso_services: Vec::new(),
            slo_services: Vec::new(),
            acs_services: Vec::new(),
            artifact_resolution_services: Vec::new(),
            name_id_formats: Vec::new(),
            authn_requests_signed: false,
            metadata: metadata.to_string(),
        };

        for descriptor in [idp, sp].into_iter().flatten() {
            record.read_descriptor(descriptor)?;
        }
        if let Some(idp) = idp {
            record.authn_requests_signed |=
                matches!(idp.attr("WantAuthnRequestsSigned"), Some("true" | "1"));
        }
        if let Some(sp) = sp {
            record.authn_requests_signed |=
                matches!(sp.attr("AuthnRequestsSigned"), Some("true" | "1"));
        }

        if let Some(cert) = &record.signing_certificate {
            record.verifying_key = Some(
                VerifyingKey::from_certificate_der(cert)
                    .map_err(|e| invalid(format!("signing certificate: {e}")))?,
            );
        }

        Ok(record)
    }

    fn read_descriptor(&mut self, descriptor: &XmlElement) -> SamlResult<()> {
        for key in descriptor.children_named("KeyDescriptor") {
            let Some(cert) = key
                .find("X509Certificate")
                .map(|c| c.text())
                .filter(|c| !c.trim().is_empty())
            else {
                continue;
            };
            let compact: String = cert.chars().filter(|c| !c.is_whitespace()).collect();
            let der = STANDARD
                .decode(compact)
                .map_err(|e| invalid(format!("bad certificate encoding: {e}")))?;
            match key.attr("use") {
                Some("encryption") => {
                    self.encryption_certificate.get_or_insert(der);
                }
                Some("signing") => {
                    self.signing_certificate.get_or_insert(der);
                }
                _ => {
                    self.signing_certificate.get_or_insert_with(|| der.clone());
                    self.encryption_certificate.get_or_insert(der);
                }
            }
        }

        let endpoints = |name: &str| {
            descriptor
                .children_named(name)
                .map(Endpoint::from_element)
                .collect::<SamlResult<Vec<_>>>()
        };
        self.sso_services.extend(endpoints("SingleSignOnService")?);
        self.slo_services.extend(endpoints("SingleLogoutService")?);
        self.acs_services.extend(endpoints("AssertionConsumerService")?);
        self.artifact_resolution_services
            .extend(endpoints("ArtifactResolutionService")?);
        self.name_id_formats.extend(
            descriptor
                .children_named("NameIDFormat")
                .map(|f| f.text().trim().to_string()),
        );
        Ok(())
    }

    /// Replaces the verification key with an explicit one.
    pub(crate) fn set_verifying_key(&mut self, key: VerifyingKey) {
        self.verifying_key = Some(key);
    }

    /// Returns the entity ID.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Returns the role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// True if the provider plays `role`.
    #[must_use]
    pub const fn supports(&self, role: Role) -> bool {
        self.role.supports(role)
    }

    /// Returns the DER signing certificate.
    #[must_use]
    pub fn signing_certificate(&self) -> Option<&[u8]> {
        self.signing_certificate.as_deref()
    }

    /// Returns the DER encryption certificate.
    #[must_use]
    pub fn encryption_certificate(&self) -> Option<&[u8]> {
        self.encryption_certificate.as_deref()
    }

    /// Returns the key used to verify this provider's signatures.
    #[must_use]
    pub fn verifying_key(&self) -> Option<&VerifyingKey> {
        self.verifying_key.as_ref()
    }

    /// True if the provider signs, or wants signed, authentication requests.
    #[must_use]
    pub const fn authn_requests_signed(&self) -> bool {
        self.authn_requests_signed
    }

    /// Returns the advertised name ID format URIs.
    #[must_use]
    pub fn name_id_formats(&self) -> &[String] {
        &self.name_id_formats
    }

    /// Returns the original metadata document.
    #[must_use]
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the single sign-on endpoint for `method`.
    #[must_use]
    pub fn sso_endpoint(&self, method: HttpMethod) -> Option<&Endpoint> {
        select(&self.sso_services, method)
    }

    /// Returns the single logout endpoint for `method`.
    #[must_use]
    pub fn slo_endpoint(&self, method: HttpMethod) -> Option<&Endpoint> {
        select(&self.slo_services, method)
    }

    /// Returns where logout responses for `method` go.
    #[must_use]
    pub fn slo_response_location(&self, method: HttpMethod) -> Option<&str> {
        self.slo_endpoint(method).map(Endpoint::response_url)
    }

    /// Returns the assertion consumer service for `method`.
    #[must_use]
    pub fn acs_endpoint(&self, method: HttpMethod) -> Option<&Endpoint> {
        select(&self.acs_services, method)
    }

    /// Returns the assertion consumer service with `index`.
    #[must_use]
    pub fn acs_by_index(&self, index: u16) -> Option<&Endpoint> {
        self.acs_services.iter().find(|e| e.index == Some(index))
    }

    /// Returns the assertion consumer service at `location`.
    #[must_use]
    pub fn acs_by_location(&self, location: &str) -> Option<&Endpoint> {
        self.acs_services.iter().find(|e| e.location == location)
    }

    /// True if any endpoint of this provider listens at `url`.
    #[must_use]
    pub fn has_location(&self, url: &str) -> bool {
        self.sso_services
            .iter()
            .chain(&self.slo_services)
            .chain(&self.acs_services)
            .chain(&self.artifact_resolution_services)
            .any(|e| e.location == url || e.response_location.as_deref() == Some(url))
    }

    /// Returns the default assertion consumer service: the one flagged
    /// `isDefault`, else the first listed.
    #[must_use]
    pub fn default_acs(&self) -> Option<&Endpoint> {
        self.acs_services
            .iter()
            .find(|e| e.is_default)
            .or_else(|| self.acs_services.first())
    }

    /// Returns the artifact resolution service, by index when given.
    #[must_use]
    pub fn artifact_resolution_endpoint(&self, index: Option<u16>) -> Option<&Endpoint> {
        let soap = |e: &&Endpoint| e.binding == SamlBinding::Soap;
        match index {
            Some(i) => self
                .artifact_resolution_services
                .iter()
                .filter(soap)
                .find(|e| e.index == Some(i))
                .or_else(|| self.artifact_resolution_services.iter().find(soap)),
            None => self.artifact_resolution_services.iter().find(soap),
        }
    }

    /// True if any SSO, SLO or ACS endpoint uses `binding`.
    #[must_use]
    pub fn has_binding(&self, binding: SamlBinding) -> bool {
        self.sso_services
            .iter()
            .chain(&self.slo_services)
            .chain(&self.acs_services)
            .any(|e| e.binding == binding)
    }
}

/// Builds a metadata document for a local entity.
#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    entity_id: String,
    signing_certificate: Option<Vec<u8>>,
    idp: Option<Descriptor>,
    sp: Option<Descriptor>,
}

#[derive(Debug, Clone, Default)]
struct Descriptor {
    sso: Vec<Endpoint>,
    slo: Vec<Endpoint>,
    acs: Vec<Endpoint>,
    artifact_resolution: Vec<Endpoint>,
    name_id_formats: Vec<String>,
    signed_requests: bool,
}

impl MetadataBuilder {
    /// Starts metadata for `entity_id`.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ..Self::default()
        }
    }

    /// Publishes a DER signing certificate.
    #[must_use]
    pub fn signing_certificate(mut self, der: &[u8]) -> Self {
        self.signing_certificate = Some(der.to_vec());
        self
    }

    /// Adds an IdP single sign-on service.
    #[must_use]
    pub fn sso_service(mut self, binding: SamlBinding, location: impl Into<String>) -> Self {
        self.idp
            .get_or_insert_with(Descriptor::default)
            .sso
            .push(Endpoint::new(binding, location));
        self
    }

    /// Adds an IdP single logout service.
    #[must_use]
    pub fn idp_slo_service(mut self, endpoint: Endpoint) -> Self {
        self.idp.get_or_insert_with(Descriptor::default).slo.push(endpoint);
        self
    }

    /// Adds an IdP artifact resolution service (SOAP).
    #[must_use]
    pub fn artifact_resolution_service(mut self, location: impl Into<String>, index: u16) -> Self {
        self.idp
            .get_or_insert_with(Descriptor::default)
            .artifact_resolution
            .push(Endpoint::new(SamlBinding::Soap, location).with_index(index));
        self
    }

    /// Requires signed authentication requests at the IdP.
    #[must_use]
    pub fn want_authn_requests_signed(mut self, want: bool) -> Self {
        self.idp.get_or_insert_with(Descriptor::default).signed_requests = want;
        self
    }

    /// Adds an SP assertion consumer service.
    #[must_use]
    pub fn acs(mut self, binding: SamlBinding, location: impl Into<String>, index: u16) -> Self {
        self.sp
            .get_or_insert_with(Descriptor::default)
            .acs
            .push(Endpoint::new(binding, location).with_index(index));
        self
    }

    /// Adds an SP single logout service.
    #[must_use]
    pub fn sp_slo_service(mut self, endpoint: Endpoint) -> Self {
        self.sp.get_or_insert_with(Descriptor::default).slo.push(endpoint);
        self
    }

    /// Declares that the SP signs its authentication requests.
    #[must_use]
    pub fn authn_requests_signed(mut self, signed: bool) -> Self {
        self.sp.get_or_insert_with(Descriptor::default).signed_requests = signed;
        self
    }

    /// Advertises a name ID format on every descriptor present.
    #[must_use]
    pub fn name_id_format(mut self, format: &str) -> Self {
        for descriptor in [self.idp.as_mut(), self.sp.as_mut()].into_iter().flatten() {
            descriptor.name_id_formats.push(format.to_string());
        }
        self
    }

    /// Serializes the document.
    #[must_use]
    pub fn build(&self) -> String {
        let mut root = XmlElement::new("md:EntityDescriptor")
            .with_attr("xmlns:md", MD_NS)
            .with_attr("xmlns:ds", XMLDSIG_NS)
            .with_attr("entityID", &self.entity_id);

        if let Some(idp) = &self.idp {
            let element = XmlElement::new("md:IDPSSODescriptor")
                .with_attr("protocolSupportEnumeration", SAMLP_NS)
                .with_attr(
                    "WantAuthnRequestsSigned",
                    if idp.signed_requests { "true" } else { "false" },
                );
            let mut element = self.fill(
                element,
                idp,
                &[
                    ("ArtifactResolutionService", &idp.artifact_resolution),
                    ("SingleLogoutService", &idp.slo),
                ],
            );
            for endpoint in &idp.sso {
                element = element.with_child(endpoint.to_element("SingleSignOnService"));
            }
            root = root.with_child(element);
        }

        if let Some(sp) = &self.sp {
            let element = XmlElement::new("md:SPSSODescriptor")
                .with_attr("protocolSupportEnumeration", SAMLP_NS)
                .with_attr(
                    "AuthnRequestsSigned",
                    if sp.signed_requests { "true" } else { "false" },
                );
            let mut element = self.fill(element, sp, &[("SingleLogoutService", &sp.slo)]);
            for endpoint in &sp.acs {
                element = element.with_child(endpoint.to_element("AssertionConsumerService"));
            }
            root = root.with_child(element);
        }

        root.to_xml()
    }

    fn fill(
        &self,
        mut element: XmlElement,
        descriptor: &Descriptor,
        endpoint_groups: &[(&str, &Vec<Endpoint>)],
    ) -> XmlElement {
        if let Some(cert) = &self.signing_certificate {
            element = element.with_child(
                XmlElement::new("md:KeyDescriptor")
                    .with_attr("use", "signing")
                    .with_child(XmlElement::new("ds:KeyInfo").with_child(
                        XmlElement::new("ds:X509Data").with_child(
                            XmlElement::new("ds:X509Certificate").with_text(STANDARD.encode(cert)),
                        ),
                    )),
            );
        }
        for (name, endpoints) in endpoint_groups {
            for endpoint in endpoints.iter() {
                element = element.with_child(endpoint.to_element(name));
            }
        }
        for format in &descriptor.name_id_formats {
            element = element.with_child(XmlElement::new("md:NameIDFormat").with_text(format));
        }
        element
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate() -> Vec<u8> {
        rcgen::generate_simple_self_signed(vec!["idp.example".to_string()])
            .unwrap()
            .cert
            .der()
            .to_vec()
    }

    fn idp_metadata() -> String {
        MetadataBuilder::new("https://idp.example/")
            .signing_certificate(&certificate())
            .sso_service(SamlBinding::HttpRedirect, "https://idp.example/sso")
            .sso_service(SamlBinding::HttpPost, "https://idp.example/sso/post")
            .idp_slo_service(
                Endpoint::new(SamlBinding::HttpRedirect, "https://idp.example/slo")
                    .with_response_location("https://idp.example/slo/return"),
            )
            .artifact_resolution_service("https://idp.example/ars", 0)
            .want_authn_requests_signed(true)
            .build()
    }

    #[test]
    fn parses_idp_metadata() {
        let record = ProviderRecord::from_metadata(&idp_metadata()).unwrap();

        assert_eq!(record.entity_id(), "https://idp.example/");
        assert_eq!(record.role(), Role::IdentityProvider);
        assert!(record.supports(Role::IdentityProvider));
        assert!(!record.supports(Role::ServiceProvider));
        assert!(record.verifying_key().is_some());
        assert!(record.authn_requests_signed());
        assert_eq!(
            record.sso_endpoint(HttpMethod::Post).unwrap().location,
            "https://idp.example/sso/post"
        );
        assert!(record.sso_endpoint(HttpMethod::Soap).is_none());
        assert_eq!(
            record.slo_response_location(HttpMethod::Redirect),
            Some("https://idp.example/slo/return")
        );
        assert!(record.artifact_resolution_endpoint(Some(0)).is_some());
    }

    #[test]
    fn parses_sp_metadata() {
        let metadata = MetadataBuilder::new("https://sp.example/")
            .acs(SamlBinding::HttpPost, "https://sp.example/acs", 0)
            .acs(SamlBinding::HttpArtifact, "https://sp.example/acs/artifact", 1)
            .authn_requests_signed(true)
            .build();
        let record = ProviderRecord::from_metadata(&metadata).unwrap();

        assert_eq!(record.role(), Role::ServiceProvider);
        assert_eq!(record.default_acs().unwrap().location, "https://sp.example/acs");
        assert_eq!(
            record.acs_by_index(1).unwrap().binding,
            SamlBinding::HttpArtifact
        );
        assert!(record.verifying_key().is_none());
    }

    #[test]
    fn rejects_unusable_metadata() {
        assert!(ProviderRecord::from_metadata("<md:EntityDescriptor entityID=\"x\"/>").is_err());
        assert!(ProviderRecord::from_metadata("<md:Other/>").is_err());
        assert!(ProviderRecord::from_metadata("not xml").is_err());

        let bad_location = r#"<md:EntityDescriptor entityID="x"><md:IDPSSODescriptor><md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="not a url"/></md:IDPSSODescriptor></md:EntityDescriptor>"#;
        let err = ProviderRecord::from_metadata(bad_location).unwrap_err();
        assert!(matches!(err, SamlError::InvalidMetadata(_)));
    }

    #[test]
    fn entities_descriptor_with_one_entity() {
        let inner = idp_metadata();
        let wrapped = format!("<md:EntitiesDescriptor xmlns:md=\"{MD_NS}\">{inner}</md:EntitiesDescriptor>");
        let record = ProviderRecord::from_metadata(&wrapped).unwrap();
        assert_eq!(record.entity_id(), "https://idp.example/");
    }
}

//! Trust store.
//!
//! A [`Server`] holds the local provider's identity and key material plus
//! the metadata of every remote provider it trusts. It is built once,
//! populated with providers, then shared read-only (usually behind an
//! `Arc`) by any number of [`Login`](crate::login::Login) and
//! [`Logout`](crate::logout::Logout) exchanges.

use std::collections::BTreeMap;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use fed_core::{EngineConfig, EngineContext};
use fed_crypto::{
    pem_to_der, verify_issued_by, SecretBytes, SecretString, SignatureAlgorithm, SigningKey,
    VerifyingKey,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SamlError, SamlResult};
use crate::metadata::{ProviderRecord, Role};
use crate::signature::XmlSigner;

const DUMP_VERSION: u32 = 1;

/// Initial size of the dump buffer; growing it wipes the old allocation.
const DUMP_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone)]
struct RegisteredProvider {
    record: ProviderRecord,
    public_key_pem: Option<String>,
}

/// Local provider plus trusted remote providers.
pub struct Server {
    ctx: EngineContext,
    local: ProviderRecord,
    signing_key: SigningKey,
    private_key: SecretBytes,
    key_password: Option<SecretString>,
    certificate_der: Option<Vec<u8>>,
    decryption_key: Option<SecretBytes>,
    providers: BTreeMap<String, RegisteredProvider>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("entity_id", &self.local.entity_id())
            .field("role", &self.local.role())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a trust store from local metadata and key material.
    ///
    /// `signing_key` is a PEM or DER private key. When the local metadata
    /// publishes a signing certificate, the key must match it.
    ///
    /// `password` is only kept in the vault and carried through
    /// [`Server::dump`]; it is never used to decrypt the keys, which must
    /// be supplied unencrypted.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::InvalidMetadata`] if the metadata is unusable,
    /// and [`SamlError::InvalidKey`] if a key cannot be loaded or does not
    /// match the published certificate.
    pub fn create(
        ctx: EngineContext,
        metadata: &str,
        signing_key: &[u8],
        decryption_key: Option<&[u8]>,
        password: Option<SecretString>,
    ) -> SamlResult<Self> {
        let local = ProviderRecord::from_metadata(metadata)?;
        let certificate_der = local.signing_certificate().map(<[u8]>::to_vec);
        Self::build(
            ctx,
            local,
            SecretBytes::from_slice(signing_key),
            certificate_der,
            decryption_key.map(SecretBytes::from_slice),
            password,
        )
    }

    /// Creates a trust store from PEM buffers.
    ///
    /// The certificate, when given, is published in the `KeyInfo` of every
    /// signature and must match the private key. Without it the signing
    /// certificate of the local metadata is used.
    ///
    /// # Errors
    ///
    /// See [`Server::create`].
    pub fn from_buffers(
        ctx: EngineContext,
        metadata: &str,
        private_key_pem: &str,
        certificate_pem: Option<&str>,
        password: Option<SecretString>,
    ) -> SamlResult<Self> {
        let local = ProviderRecord::from_metadata(metadata)?;
        let certificate_der = match certificate_pem {
            Some(pem) => Some(
                pem_to_der(pem, "CERTIFICATE")
                    .ok_or_else(|| SamlError::InvalidKey("no CERTIFICATE block".to_string()))?,
            ),
            None => local.signing_certificate().map(<[u8]>::to_vec),
        };
        Self::build(
            ctx,
            local,
            SecretBytes::from_slice(private_key_pem.as_bytes()),
            certificate_der,
            None,
            password,
        )
    }

    fn build(
        ctx: EngineContext,
        local: ProviderRecord,
        private_key: SecretBytes,
        certificate_der: Option<Vec<u8>>,
        decryption_key: Option<SecretBytes>,
        key_password: Option<SecretString>,
    ) -> SamlResult<Self> {
        let signing_key = load_signing_key(ctx.config(), private_key.expose())?;

        let published = [
            certificate_der.as_deref(),
            local.signing_certificate(),
        ];
        for cert in published.into_iter().flatten() {
            let expected = VerifyingKey::from_certificate_der(cert)?;
            if signing_key.verifying_key() != expected {
                return Err(SamlError::InvalidKey(format!(
                    "signing key of {} does not match its certificate",
                    local.entity_id()
                )));
            }
        }

        if let Some(key) = &decryption_key {
            load_signing_key(ctx.config(), key.expose())?;
        }

        info!(
            entity_id = %local.entity_id(),
            role = ?local.role(),
            algorithm = ?signing_key.algorithm(),
            "trust store created"
        );

        Ok(Self {
            ctx,
            local,
            signing_key,
            private_key,
            key_password,
            certificate_der,
            decryption_key,
            providers: BTreeMap::new(),
        })
    }

    /// Registers a remote provider from its metadata.
    ///
    /// The role is taken from the metadata. Registering an entity ID again
    /// replaces the previous record. With a CA certificate, the provider's
    /// signing certificate must have been issued by it.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::InvalidMetadata`] for unusable metadata or a
    /// failed CA check, and [`SamlError::DuplicateProvider`] for the local
    /// entity ID.
    pub fn register_provider(&mut self, metadata: &str, trusted_ca_pem: Option<&str>) -> SamlResult<()> {
        self.add_provider_from_buffer(metadata, None, trusted_ca_pem)
    }

    /// Registers a remote provider, optionally overriding its verification
    /// key with an explicit `PUBLIC KEY` or `CERTIFICATE` PEM.
    ///
    /// # Errors
    ///
    /// See [`Server::register_provider`]. An unusable explicit key is
    /// reported as [`SamlError::InvalidKey`].
    pub fn add_provider_from_buffer(
        &mut self,
        metadata: &str,
        public_key_pem: Option<&str>,
        trusted_ca_pem: Option<&str>,
    ) -> SamlResult<()> {
        let mut record = ProviderRecord::from_metadata(metadata)?;
        let entity_id = record.entity_id().to_string();

        if entity_id == self.local.entity_id() {
            return Err(SamlError::DuplicateProvider(entity_id));
        }

        if let Some(ca_pem) = trusted_ca_pem {
            check_issued_by(&record, ca_pem)?;
        }

        if let Some(pem) = public_key_pem {
            record.set_verifying_key(VerifyingKey::from_pem(pem)?);
        }

        if record.verifying_key().is_none() {
            warn!(provider_id = %entity_id, "provider publishes no signing key");
        }

        let replaced = self
            .providers
            .insert(
                entity_id.clone(),
                RegisteredProvider {
                    record,
                    public_key_pem: public_key_pem.map(str::to_string),
                },
            )
            .is_some();

        info!(provider_id = %entity_id, replaced, "provider registered");
        Ok(())
    }

    /// Reads a metadata file and registers the provider it describes.
    ///
    /// # Errors
    ///
    /// An unreadable file is reported as [`SamlError::InvalidMetadata`];
    /// see [`Server::add_provider_from_buffer`] for the rest.
    pub fn add_provider_from_path(
        &mut self,
        path: impl AsRef<Path>,
        public_key_pem: Option<&str>,
        trusted_ca_pem: Option<&str>,
    ) -> SamlResult<()> {
        let path = path.as_ref();
        let metadata = std::fs::read_to_string(path).map_err(|e| {
            SamlError::InvalidMetadata(format!("cannot read {}: {e}", path.display()))
        })?;
        self.add_provider_from_buffer(&metadata, public_key_pem, trusted_ca_pem)
    }

    /// Returns a registered provider.
    #[must_use]
    pub fn get_provider(&self, entity_id: &str) -> Option<&ProviderRecord> {
        self.providers.get(entity_id).map(|p| &p.record)
    }

    /// Returns a registered provider or fails.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::UnknownProvider`] if nothing is registered under
    /// `entity_id`.
    pub fn lookup_provider(&self, entity_id: &str) -> SamlResult<&ProviderRecord> {
        self.get_provider(entity_id)
            .ok_or_else(|| SamlError::UnknownProvider(entity_id.to_string()))
    }

    /// Iterates over registered providers in entity ID order.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderRecord> {
        self.providers.values().map(|p| &p.record)
    }

    /// Returns the registered entity IDs in order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Returns the first registered provider playing `role`.
    #[must_use]
    pub fn first_provider_with_role(&self, role: Role) -> Option<&ProviderRecord> {
        self.providers().find(|p| p.supports(role))
    }

    /// Returns the local entity ID.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        self.local.entity_id()
    }

    /// Returns the local role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.local.role()
    }

    /// Returns the local provider record.
    #[must_use]
    pub const fn local(&self) -> &ProviderRecord {
        &self.local
    }

    /// Returns the engine context.
    #[must_use]
    pub const fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.ctx.config()
    }

    /// True if a decryption key was supplied.
    #[must_use]
    pub const fn has_decryption_key(&self) -> bool {
        self.decryption_key.is_some()
    }

    /// Signer for protocol messages, if message signing is enabled.
    pub(crate) fn signer(&self) -> Option<XmlSigner<'_>> {
        self.config()
            .crypto
            .sign_messages
            .then(|| self.assertion_signer())
    }

    /// Signer for assertions, which are always signed.
    pub(crate) fn assertion_signer(&self) -> XmlSigner<'_> {
        XmlSigner::new(&self.signing_key, self.certificate_der.as_deref())
    }

    /// Serializes the trust store, key material included.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if serialization fails.
    pub fn dump(&self) -> SamlResult<SecretString> {
        let private_key = self.private_key.to_base64();
        let password = self.key_password.as_ref().map(SecretString::to_base64);
        let decryption_key = self.decryption_key.as_ref().map(SecretBytes::to_base64);
        let certificate = self.certificate_der.as_ref().map(|c| STANDARD.encode(c));

        let dump = ServerDumpRef {
            version: DUMP_VERSION,
            metadata: self.local.metadata(),
            private_key: &private_key,
            password: password.as_deref().map(String::as_str),
            decryption_key: decryption_key.as_deref().map(String::as_str),
            certificate: certificate.as_deref(),
            providers: self
                .providers
                .values()
                .map(|p| ProviderDumpRef {
                    metadata: p.record.metadata(),
                    public_key: p.public_key_pem.as_deref(),
                })
                .collect(),
        };
        let mut buffer = SecretBytes::with_capacity(DUMP_CAPACITY);
        serde_json::to_writer(&mut buffer, &dump)?;
        SecretString::from_utf8(buffer).map_err(|e| SamlError::CorruptDump(e.to_string()))
    }

    /// Restores a trust store from [`Server::dump`] output.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if any part of the dump cannot be
    /// restored; no partially populated store is ever returned.
    pub fn restore(ctx: EngineContext, dump: &str) -> SamlResult<Self> {
        Self::restore_inner(ctx, dump).map_err(|e| match e {
            SamlError::CorruptDump(_) => e,
            other => SamlError::CorruptDump(other.to_string()),
        })
    }

    fn restore_inner(ctx: EngineContext, dump: &str) -> SamlResult<Self> {
        let dump: ServerDump = serde_json::from_str(dump)?;
        if dump.version != DUMP_VERSION {
            return Err(SamlError::CorruptDump(format!(
                "unsupported trust store dump version {}",
                dump.version
            )));
        }

        let private_key = SecretString::new(dump.private_key);
        let private_key = SecretBytes::from_base64(private_key.expose())
            .map_err(|e| SamlError::CorruptDump(format!("private key: {e}")))?;
        let password = dump
            .password
            .map(|p| SecretString::from_base64(SecretString::new(p).expose()))
            .transpose()
            .map_err(|e| SamlError::CorruptDump(format!("key password: {e}")))?;
        let decryption_key = dump
            .decryption_key
            .map(|k| SecretBytes::from_base64(SecretString::new(k).expose()))
            .transpose()
            .map_err(|e| SamlError::CorruptDump(format!("decryption key: {e}")))?;
        let certificate_der = dump.certificate.map(|c| STANDARD.decode(c)).transpose()?;

        let local = ProviderRecord::from_metadata(&dump.metadata)?;
        let mut server = Self::build(ctx, local, private_key, certificate_der, decryption_key, password)?;
        for provider in dump.providers {
            server.add_provider_from_buffer(&provider.metadata, provider.public_key.as_deref(), None)?;
        }

        debug!(
            entity_id = %server.entity_id(),
            providers = server.providers.len(),
            "trust store restored"
        );
        Ok(server)
    }
}

fn load_signing_key(config: &EngineConfig, key: &[u8]) -> SamlResult<SigningKey> {
    let rsa_algorithm = SignatureAlgorithm::from_uri(&config.crypto.rsa_signature_method)
        .ok_or_else(|| {
            SamlError::InvalidKey(format!(
                "unsupported signature method {}",
                config.crypto.rsa_signature_method
            ))
        })?;
    Ok(SigningKey::from_bytes(key, rsa_algorithm)?)
}

fn check_issued_by(record: &ProviderRecord, ca_pem: &str) -> SamlResult<()> {
    let ca_der = pem_to_der(ca_pem, "CERTIFICATE")
        .ok_or_else(|| SamlError::InvalidMetadata("CA certificate is not PEM".to_string()))?;
    let cert = record.signing_certificate().ok_or_else(|| {
        SamlError::InvalidMetadata(format!(
            "{} publishes no certificate to check against the CA",
            record.entity_id()
        ))
    })?;
    verify_issued_by(cert, &ca_der).map_err(|e| {
        warn!(provider_id = %record.entity_id(), error = %e, "certificate not issued by trusted CA");
        SamlError::InvalidMetadata(format!(
            "certificate of {} not issued by the trusted CA: {e}",
            record.entity_id()
        ))
    })
}

#[derive(Serialize)]
struct ServerDumpRef<'a> {
    version: u32,
    metadata: &'a str,
    private_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decryption_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate: Option<&'a str>,
    providers: Vec<ProviderDumpRef<'a>>,
}

#[derive(Serialize)]
struct ProviderDumpRef<'a> {
    metadata: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct ServerDump {
    version: u32,
    metadata: String,
    private_key: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    decryption_key: Option<String>,
    #[serde(default)]
    certificate: Option<String>,
    providers: Vec<ProviderDump>,
}

#[derive(Deserialize)]
struct ProviderDump {
    metadata: String,
    #[serde(default)]
    public_key: Option<String>,
}

//! # fed-protocol-saml
//!
//! SAML 2.0 Web Browser SSO and Single Logout for both the identity
//! provider and the service provider side.
//!
//! - [`server`]: the trust store, holding the local provider's metadata and
//!   keys plus every registered peer
//! - [`identity`] and [`session`]: per-principal federation and session
//!   records, persisted by the application through their dumps
//! - [`login`]: the SSO exchange (AuthnRequest, Response, Artifact)
//! - [`logout`]: the SLO exchange, including fan-out to every peer holding
//!   a session
//! - [`bindings`]: HTTP-Redirect, HTTP-POST, SOAP and artifact encodings
//!
//! The engine performs no I/O. Exchanges produce [`OutboundMessage`]s and
//! consume the raw query string or form value the application received.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fed_core::EngineContext;
//! use fed_protocol_saml::{HttpMethod, Login, Server};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let (metadata, key, idp_metadata) = (String::new(), Vec::<u8>::new(), String::new());
//! let mut server = Server::create(EngineContext::new(), &metadata, &key, None, None)?;
//! server.register_provider(&idp_metadata, None)?;
//!
//! let mut login = Login::new(Arc::new(server));
//! login.init_authn_request(None, HttpMethod::Redirect)?;
//! let redirect = login.build_authn_request_msg()?;
//! println!("Location: {}", redirect.url);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod error;
pub mod identity;
pub mod login;
pub mod logout;
pub mod metadata;
pub mod profile;
pub mod server;
pub mod session;
pub mod signature;
pub mod types;
pub mod xml;

#[cfg(test)]
mod testing;

pub use bindings::{MessageParam, OutboundMessage};
pub use error::{ErrorKind, SamlError, SamlResult};
pub use fed_core::HttpMethod;
pub use fed_crypto::SignatureAlgorithm;
pub use identity::Identity;
pub use login::{Login, LoginState};
pub use logout::{Logout, LogoutState};
pub use metadata::{Endpoint, MetadataBuilder, ProviderRecord, Role};
pub use profile::Profile;
pub use server::Server;
pub use session::{Session, SessionEntry};
pub use types::*;

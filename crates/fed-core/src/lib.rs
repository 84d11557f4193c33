//! # fed-core
//!
//! Engine context, configuration and shared enumerations for the fedsso
//! SAML engine.
//!
//! Every other fedsso crate builds on the values defined here. The
//! [`EngineContext`] replaces process-wide initialisation state: a trust
//! store can only be constructed from a context, and dropping the last
//! context clone releases nothing global because nothing global is held.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod method;

pub use config::{CryptoConfig, EngineConfig, ProtocolConfig};
pub use context::{EngineContext, VersionMode};
pub use error::{ConfigError, Result};
pub use method::HttpMethod;

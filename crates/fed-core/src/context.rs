//! Engine context.
//!
//! A context is an explicit value that stands in for library-wide
//! initialisation. It carries the configuration and the engine version and
//! is threaded through trust store construction. Clones share the same
//! configuration.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Result;

/// How [`EngineContext::check_version`] compares versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMode {
    /// All three components must match.
    Exact,
    /// Same major version, and at least the requested minor/subminor.
    Abi,
    /// The engine version is greater than or equal to the requested one.
    Numerical,
}

/// Explicit engine context.
#[derive(Debug, Clone)]
pub struct EngineContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    config: EngineConfig,
    version: (u32, u32, u32),
}

impl EngineContext {
    /// Creates a context with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Creates a context from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let version = parse_version(env!("CARGO_PKG_VERSION"));
        tracing::debug!(
            version = env!("CARGO_PKG_VERSION"),
            default_method = %config.protocol.default_http_method,
            "engine context created"
        );
        Self {
            inner: Arc::new(ContextInner { config, version }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns the engine version as `(major, minor, subminor)`.
    #[must_use]
    pub fn version(&self) -> (u32, u32, u32) {
        self.inner.version
    }

    /// Always true: a context only exists once the engine is usable.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        true
    }

    /// Checks the engine version against a required version.
    #[must_use]
    pub fn check_version(&self, major: u32, minor: u32, subminor: u32, mode: VersionMode) -> bool {
        let current = self.inner.version;
        let wanted = (major, minor, subminor);
        match mode {
            VersionMode::Exact => current == wanted,
            VersionMode::Abi => current.0 == major && (current.1, current.2) >= (minor, subminor),
            VersionMode::Numerical => current >= wanted,
        }
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_version(raw: &str) -> (u32, u32, u32) {
    let mut parts = raw
        .split(['.', '-', '+'])
        .map(|p| p.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

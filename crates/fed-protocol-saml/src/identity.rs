//! Identity store.
//!
//! An [`Identity`] records the name identifiers a principal shares with
//! each remote provider (its federations). It is created empty, grows on
//! the first successful SSO with a provider and is persisted by the
//! application through [`Identity::dump`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::NameId;

const DUMP_VERSION: u32 = 1;

/// Federations of one principal, keyed by remote entity ID.
///
/// For a given provider there is at most one name identifier per format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    federations: BTreeMap<String, Vec<NameId>>,
    dirty: bool,
}

impl Identity {
    /// Creates an empty identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no provider has a name identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.federations.values().all(Vec::is_empty)
    }

    /// True if the identity changed since the last [`Identity::clear_dirty`].
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the identity as persisted.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Returns the primary name identifier shared with `provider_id`.
    #[must_use]
    pub fn get_federation(&self, provider_id: &str) -> Option<&NameId> {
        self.federations.get(provider_id).and_then(|ids| ids.first())
    }

    /// Returns every name identifier shared with `provider_id`.
    #[must_use]
    pub fn name_identifiers(&self, provider_id: &str) -> &[NameId] {
        self.federations
            .get(provider_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the name identifier of `format` shared with `provider_id`.
    #[must_use]
    pub fn name_identifier_with_format(&self, provider_id: &str, format: &str) -> Option<&NameId> {
        self.name_identifiers(provider_id)
            .iter()
            .find(|n| n.format.as_deref() == Some(format))
    }

    /// Returns the federated provider IDs in order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.federations
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Records a name identifier for `provider_id`, replacing the one with
    /// the same format.
    pub fn add_name_identifier(&mut self, provider_id: impl Into<String>, name_id: NameId) {
        let ids = self.federations.entry(provider_id.into()).or_default();
        if ids.contains(&name_id) {
            return;
        }
        ids.retain(|n| n.format != name_id.format);
        ids.push(name_id);
        self.dirty = true;
    }

    /// Removes one name identifier. Returns true if it was present.
    pub fn remove_name_identifier(&mut self, provider_id: &str, name_id: &NameId) -> bool {
        let Some(ids) = self.federations.get_mut(provider_id) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|n| !n.matches(name_id));
        let removed = ids.len() != before;
        if ids.is_empty() {
            self.federations.remove(provider_id);
        }
        self.dirty |= removed;
        removed
    }

    /// Drops every name identifier shared with `provider_id`.
    /// Returns true if a federation existed.
    pub fn remove_federation(&mut self, provider_id: &str) -> bool {
        let removed = self.federations.remove(provider_id).is_some();
        self.dirty |= removed;
        removed
    }

    /// Serializes the identity.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if serialization fails.
    pub fn dump(&self) -> SamlResult<String> {
        let dump = IdentityDump {
            version: DUMP_VERSION,
            federations: self.federations.clone(),
            dirty: self.dirty,
        };
        Ok(serde_json::to_string(&dump)?)
    }

    /// Restores an identity from [`Identity::dump`] output.
    ///
    /// The whole dump is rejected if any federation is inconsistent.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] on any defect.
    pub fn from_dump(dump: &str) -> SamlResult<Self> {
        let dump: IdentityDump = serde_json::from_str(dump)?;
        if dump.version != DUMP_VERSION {
            return Err(SamlError::CorruptDump(format!(
                "unsupported identity dump version {}",
                dump.version
            )));
        }

        for (provider_id, ids) in &dump.federations {
            if provider_id.is_empty() {
                return Err(SamlError::CorruptDump("empty provider ID".to_string()));
            }
            for (i, name_id) in ids.iter().enumerate() {
                if name_id.value.is_empty() {
                    return Err(SamlError::CorruptDump(format!(
                        "empty name identifier for {provider_id}"
                    )));
                }
                if ids[..i].iter().any(|n| n.format == name_id.format) {
                    return Err(SamlError::CorruptDump(format!(
                        "two name identifiers with the same format for {provider_id}"
                    )));
                }
            }
        }

        let mut federations = dump.federations;
        federations.retain(|_, ids| !ids.is_empty());
        Ok(Self {
            federations,
            dirty: dump.dirty,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct IdentityDump {
    version: u32,
    federations: BTreeMap<String, Vec<NameId>>,
    #[serde(default)]
    dirty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const SP: &str = "https://sp.example/";

    #[test]
    fn federation_lifecycle() {
        let mut identity = Identity::new();
        assert!(identity.is_empty());
        assert!(!identity.is_dirty());

        identity.add_name_identifier(SP, NameId::persistent("abc"));
        assert!(!identity.is_empty());
        assert!(identity.is_dirty());
        assert_eq!(identity.get_federation(SP).unwrap().value, "abc");

        // Same format replaces, another format is kept alongside.
        identity.add_name_identifier(SP, NameId::persistent("def"));
        identity.add_name_identifier(SP, NameId::email("user@example.com"));
        assert_eq!(identity.name_identifiers(SP).len(), 2);
        assert_eq!(identity.get_federation(SP).unwrap().value, "def");

        assert!(identity.remove_name_identifier(SP, &NameId::persistent("def")));
        assert_eq!(identity.provider_ids(), vec![SP.to_string()]);

        assert!(identity.remove_federation(SP));
        assert!(identity.is_empty());
        assert!(!identity.remove_federation(SP));
    }

    #[test]
    fn dump_round_trip() {
        let mut identity = Identity::new();
        identity.add_name_identifier(SP, NameId::persistent("abc").with_sp_name_qualifier(SP));
        identity.add_name_identifier("https://other.example/", NameId::email("a@b.c"));

        let restored = Identity::from_dump(&identity.dump().unwrap()).unwrap();
        assert_eq!(restored.provider_ids(), identity.provider_ids());
        assert_eq!(restored.name_identifiers(SP), identity.name_identifiers(SP));
        assert_eq!(restored, identity);

        identity.clear_dirty();
        let restored = Identity::from_dump(&identity.dump().unwrap()).unwrap();
        assert!(!restored.is_dirty());

        let empty = Identity::from_dump(&Identity::new().dump().unwrap()).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn partial_dumps_are_rejected() {
        let format = crate::types::NameIdFormat::Persistent.uri();
        for bad in [
            "",
            "{}",
            r#"{"version":7,"federations":{}}"#,
            r#"{"version":1,"federations":{"":[{"value":"x"}]}}"#,
            r#"{"version":1,"federations":{"sp":[{"value":""}]}}"#,
            format!(
                r#"{{"version":1,"federations":{{"sp":[{{"value":"a","format":"{format}"}},{{"value":"b","format":"{format}"}}]}}}}"#
            )
            .as_str(),
        ] {
            let err = Identity::from_dump(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CorruptDump, "{bad}");
        }
    }
}

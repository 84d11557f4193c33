//! Session store.
//!
//! A [`Session`] keeps the assertions through which a principal is signed
//! in with each remote provider. SSO appends to it, SLO removes from it.
//! Every mutation sets the dirty flag; the application clears it once the
//! dump has been persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::NameId;
use crate::xml::XmlElement;

const DUMP_VERSION: u32 = 1;

/// One authentication shared with a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// The signed assertion as received or issued.
    pub assertion: String,
    /// Session index of the assertion's authentication statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,
    /// When the principal authenticated.
    pub authn_instant: DateTime<Utc>,
    /// Authentication context class URI.
    pub authn_method: String,
    /// Subject of the assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_id: Option<NameId>,
}

/// Sessions of one principal, keyed by remote entity ID.
///
/// Session indexes are unique within one provider's entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    entries: BTreeMap<String, Vec<SessionEntry>>,
    dirty: bool,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no provider has an assertion.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }

    /// True if the session changed since the last [`Session::clear_dirty`].
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the session as persisted.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Returns the assertions held for `provider_id`, oldest first.
    #[must_use]
    pub fn get_assertions(&self, provider_id: &str) -> Vec<&str> {
        self.entries(provider_id)
            .iter()
            .map(|e| e.assertion.as_str())
            .collect()
    }

    /// Returns the entries held for `provider_id`.
    #[must_use]
    pub fn entries(&self, provider_id: &str) -> &[SessionEntry] {
        self.entries
            .get(provider_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the first session index held for `provider_id`.
    #[must_use]
    pub fn get_session_index(&self, provider_id: &str) -> Option<&str> {
        self.entries(provider_id)
            .iter()
            .find_map(|e| e.session_index.as_deref())
    }

    /// Same as [`Session::get_session_index`].
    #[must_use]
    pub fn get_provider_index(&self, provider_id: &str) -> Option<&str> {
        self.get_session_index(provider_id)
    }

    /// Returns every session index held for `provider_id`.
    #[must_use]
    pub fn session_indexes(&self, provider_id: &str) -> Vec<&str> {
        self.entries(provider_id)
            .iter()
            .filter_map(|e| e.session_index.as_deref())
            .collect()
    }

    /// Returns the provider IDs with at least one assertion, in order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Appends an entry for `provider_id`. An entry with the same session
    /// index is replaced.
    pub fn add_entry(&mut self, provider_id: impl Into<String>, entry: SessionEntry) {
        let entries = self.entries.entry(provider_id.into()).or_default();
        if entry.session_index.is_some() {
            entries.retain(|e| e.session_index != entry.session_index);
        }
        entries.push(entry);
        self.dirty = true;
    }

    /// Removes every entry of `provider_id`. Returns true if any existed.
    pub fn remove_provider(&mut self, provider_id: &str) -> bool {
        let removed = self
            .entries
            .remove(provider_id)
            .is_some_and(|entries| !entries.is_empty());
        self.dirty |= removed;
        removed
    }

    /// Removes the entries of `provider_id` carrying one of
    /// `session_indexes`. Returns true if any was removed.
    pub fn remove_session_indexes(&mut self, provider_id: &str, session_indexes: &[String]) -> bool {
        let Some(entries) = self.entries.get_mut(provider_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| {
            e.session_index
                .as_ref()
                .map_or(true, |i| !session_indexes.contains(i))
        });
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.entries.remove(provider_id);
        }
        self.dirty |= removed;
        removed
    }

    /// Serializes the session.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] if serialization fails.
    pub fn dump(&self) -> SamlResult<String> {
        let dump = SessionDump {
            version: DUMP_VERSION,
            entries: self.entries.clone(),
            dirty: self.dirty,
        };
        Ok(serde_json::to_string(&dump)?)
    }

    /// Restores a session from [`Session::dump`] output.
    ///
    /// Every stored assertion must still parse; the whole dump is rejected
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::CorruptDump`] on any defect.
    pub fn from_dump(dump: &str) -> SamlResult<Self> {
        let dump: SessionDump = serde_json::from_str(dump)?;
        if dump.version != DUMP_VERSION {
            return Err(SamlError::CorruptDump(format!(
                "unsupported session dump version {}",
                dump.version
            )));
        }

        for (provider_id, entries) in &dump.entries {
            if provider_id.is_empty() {
                return Err(SamlError::CorruptDump("empty provider ID".to_string()));
            }
            for (i, entry) in entries.iter().enumerate() {
                let assertion = XmlElement::parse(&entry.assertion).map_err(|e| {
                    SamlError::CorruptDump(format!("assertion for {provider_id}: {e}"))
                })?;
                if assertion.local_name() != "Assertion" {
                    return Err(SamlError::CorruptDump(format!(
                        "stored message for {provider_id} is not an assertion"
                    )));
                }
                if entry.session_index.is_some()
                    && entries[..i].iter().any(|e| e.session_index == entry.session_index)
                {
                    return Err(SamlError::CorruptDump(format!(
                        "duplicate session index for {provider_id}"
                    )));
                }
            }
        }

        let mut entries = dump.entries;
        entries.retain(|_, e| !e.is_empty());
        Ok(Self {
            entries,
            dirty: dump.dirty,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SessionDump {
    version: u32,
    entries: BTreeMap<String, Vec<SessionEntry>>,
    #[serde(default)]
    dirty: bool,
}

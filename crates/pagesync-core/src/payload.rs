//! Discovery payload: metadata attached to advertisements.
//!
//! A browsing node only invites peers whose payload exactly equals its own.
//! Peers showing a different document can never usefully reconcile state, so
//! they stay invisible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Key carrying the page (item) count of the shared document.
pub const PAGE_COUNT_KEY: &str = "pageCount";

/// Limits inherited from DNS-SD TXT records.
pub mod limits {
    /// Max entries in a payload.
    pub const MAX_ENTRIES: usize = 8;
    /// Max bytes in a key or a value.
    pub const MAX_FIELD_LEN: usize = 255;
}

/// Small key-value mapping attached to advertisements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryPayload(BTreeMap<String, String>);

impl DiscoveryPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload describing a document with `count` pages.
    pub fn for_page_count(count: u32) -> Self {
        let mut payload = Self::new();
        payload.0.insert(PAGE_COUNT_KEY.to_string(), count.to_string());
        payload
    }

    /// Add an entry, enforcing the payload limits.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), CoreError> {
        let key = key.into();
        let value = value.into();

        if key.len() > limits::MAX_FIELD_LEN || value.len() > limits::MAX_FIELD_LEN {
            return Err(CoreError::PayloadTooLarge(format!("entry {key:?} too long")));
        }
        if !self.0.contains_key(&key) && self.0.len() >= limits::MAX_ENTRIES {
            return Err(CoreError::PayloadTooLarge("too many entries".into()));
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The page count, if present and numeric.
    pub fn page_count(&self) -> Option<u32> {
        self.get(PAGE_COUNT_KEY)?.parse().ok()
    }

    /// Check that a payload received from the network respects the limits.
    pub fn validate_limits(&self) -> Result<(), CoreError> {
        if self.0.len() > limits::MAX_ENTRIES {
            return Err(CoreError::PayloadTooLarge("too many entries".into()));
        }
        for (key, value) in &self.0 {
            if key.len() > limits::MAX_FIELD_LEN || value.len() > limits::MAX_FIELD_LEN {
                return Err(CoreError::PayloadTooLarge(format!("entry {key:?} too long")));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

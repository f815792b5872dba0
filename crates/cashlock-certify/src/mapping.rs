//! External-to-internal account mapping.
//!
//! An explicit entry always wins. Without one, an external account maps to
//! the internal account whose normalized id (spaces removed, upper case)
//! is equal. Anything else is a mapping gap.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cashlock_core::AccountId;

/// How an external account was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    /// Listed in the configured map.
    Explicit,
    /// Normalized ids are equal.
    Normalized,
    /// No internal account found.
    Unmapped,
}

/// Configured external account id to internal account id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountMapping {
    entries: BTreeMap<String, AccountId>,
}

impl AccountMapping {
    /// Empty mapping; resolution falls back to normalized equality.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an explicit entry.
    pub fn insert(&mut self, external: impl Into<String>, internal: AccountId) {
        self.entries.insert(external.into(), internal);
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no explicit entry is configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve `external` against the internal accounts known to the
    /// snapshot.
    ///
    /// An explicit entry pointing at an account the snapshot does not hold
    /// is still a gap.
    pub fn resolve<'a>(
        &self,
        external: &str,
        internal: &'a [AccountId],
    ) -> (Option<&'a AccountId>, MappingMethod) {
        if let Some(target) = self.entries.get(external) {
            let hit = internal.iter().find(|a| *a == target);
            return match hit {
                Some(a) => (Some(a), MappingMethod::Explicit),
                None => (None, MappingMethod::Unmapped),
            };
        }
        let wanted = AccountId::new(external).normalized();
        match internal.iter().find(|a| a.normalized() == wanted) {
            Some(a) => (Some(a), MappingMethod::Normalized),
            None => (None, MappingMethod::Unmapped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal() -> Vec<AccountId> {
        vec![
            AccountId::new("DE89370400440532013000"),
            AccountId::new("GB29NWBK60161331926819"),
        ]
    }

    #[test]
    fn explicit_entry_wins_over_normalized_match() {
        let accounts = internal();
        let mut map = AccountMapping::new();
        map.insert("DE89370400440532013000", AccountId::new("GB29NWBK60161331926819"));
        let (hit, method) = map.resolve("DE89370400440532013000", &accounts);
        assert_eq!(hit, Some(&accounts[1]));
        assert_eq!(method, MappingMethod::Explicit);
    }

    #[test]
    fn print_format_iban_maps_by_normalization() {
        let accounts = internal();
        let (hit, method) = AccountMapping::new().resolve("de89 3704 0044 0532 0130 00", &accounts);
        assert_eq!(hit, Some(&accounts[0]));
        assert_eq!(method, MappingMethod::Normalized);
    }

    #[test]
    fn unknown_and_dangling_entries_are_gaps() {
        let accounts = internal();
        let mut map = AccountMapping::new();
        map.insert("TMS-7", AccountId::new("NOT-IN-SNAPSHOT"));
        assert_eq!(map.resolve("TMS-7", &accounts), (None, MappingMethod::Unmapped));
        assert_eq!(map.resolve("TMS-8", &accounts), (None, MappingMethod::Unmapped));
    }
}

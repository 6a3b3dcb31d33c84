//! Reference sets: valid foreign-key values loaded once per run.
//!
//! A [`ReferenceSet`] answers membership in O(1) and, for natural keys,
//! resolves a key to the referenced row's UUID. Sets are built before the
//! first row is transformed and never change afterwards.

use std::collections::{BTreeMap, HashMap};

use crate::error::StoreResult;
use crate::logs::{log_info, log_success};
use crate::mapping::{EntityMapping, KeyKind, ReferenceSpec};
use crate::store::BulkStore;

/// Normalize a key for comparison.
pub fn normalize_key(kind: KeyKind, key: &str) -> String {
    match kind {
        KeyKind::Uuid => key.trim().to_ascii_lowercase(),
        KeyKind::Natural => key.trim().to_lowercase(),
    }
}

// =============================================================================
// Reference Set
// =============================================================================

/// Valid keys for one reference.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    kind: KeyKind,
    /// normalized key -> resolved value (the key itself for UUID sets)
    entries: HashMap<String, String>,
}

impl ReferenceSet {
    pub fn new(kind: KeyKind) -> Self {
        Self { kind, entries: HashMap::new() }
    }

    /// Build a UUID set from fixture keys.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new(KeyKind::Uuid);
        for key in keys {
            set.insert(key.as_ref(), None);
        }
        set
    }

    /// Build a natural-key set from `(key, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::new(KeyKind::Natural);
        for (key, value) in pairs {
            set.insert(key.as_ref(), Some(value.as_ref()));
        }
        set
    }

    fn insert(&mut self, key: &str, value: Option<&str>) {
        let normalized = normalize_key(self.kind, key);
        if normalized.is_empty() {
            return;
        }
        let value = match value {
            Some(v) => v.trim().to_string(),
            None => normalized.clone(),
        };
        // First row wins on duplicate natural keys
        self.entries.entry(normalized).or_insert(value);
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize_key(self.kind, key))
    }

    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.entries.get(&normalize_key(self.kind, key)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Reference Sets
// =============================================================================

/// All reference sets of one import run, keyed by reference name.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSets {
    sets: BTreeMap<String, ReferenceSet>,
}

impl ReferenceSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set(mut self, name: &str, set: ReferenceSet) -> Self {
        self.sets.insert(name.to_string(), set);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ReferenceSet> {
        self.sets.get(name)
    }

    /// Membership test. Unknown reference names are never valid.
    pub fn is_valid(&self, name: &str, key: &str) -> bool {
        self.sets.get(name).is_some_and(|s| s.contains(key))
    }

    pub fn resolve(&self, name: &str, key: &str) -> Option<&str> {
        self.sets.get(name).and_then(|s| s.resolve(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReferenceSet)> {
        self.sets.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Loads reference sets from the store.
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Load every reference a mapping declares. Any query failure is fatal.
    pub async fn load(store: &dyn BulkStore, mapping: &EntityMapping) -> StoreResult<ReferenceSets> {
        let mut sets = ReferenceSets::new();
        if mapping.references.is_empty() {
            return Ok(sets);
        }

        log_info("🔗 Loading reference data...");
        for (name, spec) in &mapping.references {
            let set = Self::load_one(store, spec).await?;
            log_success(format!(
                "{} {} keys from {}.{}",
                set.len(),
                name,
                spec.table,
                spec.key_column
            ));
            sets = sets.with_set(name, set);
        }
        Ok(sets)
    }

    async fn load_one(store: &dyn BulkStore, spec: &ReferenceSpec) -> StoreResult<ReferenceSet> {
        let pairs = store
            .fetch_keys(&spec.table, &spec.key_column, spec.value_column.as_deref())
            .await?;

        let mut set = ReferenceSet::new(spec.kind);
        for (key, value) in pairs {
            set.insert(&key, value.as_deref());
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::find_builtin;
    use crate::models::FieldValue;
    use crate::store::MemoryStore;

    const U1: &str = "6f1c1a8e-4b0a-4c4e-9a53-2f1f3c9d8e01";

    #[test]
    fn test_uuid_membership_is_case_insensitive() {
        let set = ReferenceSet::from_keys([U1]);
        assert!(set.contains(&U1.to_uppercase()));
        assert!(set.contains(&format!("  {}  ", U1)));
        assert!(!set.contains("6f1c1a8e-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_natural_keys_resolve_to_value() {
        let set = ReferenceSet::from_pairs([("SUMMER10", U1), ("summer10", "other")]);
        assert_eq!(set.resolve(" Summer10 "), Some(U1));
        assert_eq!(set.len(), 1);
        assert_eq!(set.resolve("winter"), None);
    }

    #[test]
    fn test_empty_keys_ignored() {
        let set = ReferenceSet::from_keys(["", "  "]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_unknown_reference_name_is_invalid() {
        let sets = ReferenceSets::new().with_set("users", ReferenceSet::from_keys([U1]));
        assert!(sets.is_valid("users", U1));
        assert!(!sets.is_valid("purchases", U1));
    }

    #[tokio::test]
    async fn test_resolver_loads_declared_references() {
        let store = MemoryStore::new();
        store.seed(
            "users",
            &["uuid"],
            vec![vec![FieldValue::Text(U1.into())]],
        );
        store.seed(
            "discount_codes",
            &["uuid", "code"],
            vec![vec![FieldValue::Text(U1.into()), FieldValue::Text("SAVE5".into())]],
        );

        let mapping = find_builtin("purchases").unwrap();
        let sets = ReferenceResolver::load(&store, &mapping).await.unwrap();

        assert!(sets.is_valid("users", U1));
        assert_eq!(sets.resolve("discount_codes", "save5"), Some(U1));
    }

    #[tokio::test]
    async fn test_resolver_propagates_store_failure() {
        let store = MemoryStore::new().without_table("users");
        let mapping = find_builtin("payout_requests").unwrap();
        assert!(ReferenceResolver::load(&store, &mapping).await.is_err());
    }
}

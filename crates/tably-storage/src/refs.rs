//! Reference management and reflogs.

use crate::{Result, Sum};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One entry in a ref's append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflog {
    /// Value before the mutation, `None` when the ref was created.
    pub old_oid: Option<Sum>,
    /// Value after the mutation, `None` when the ref was deleted.
    pub new_oid: Option<Sum>,
    /// Name of the actor that performed the mutation.
    pub author_name: String,
    /// Email of the actor that performed the mutation.
    pub author_email: String,
    /// Seconds since the Unix epoch.
    pub time: i64,
    /// Operation that mutated the ref, e.g. `receive-pack` or `fetch`.
    pub action: String,
    /// Human readable detail, e.g. `update ref`.
    pub message: String,
}

/// Identity recorded in reflog entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Actor {
    /// Creates an actor.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Builds a reflog entry for a mutation performed by this actor now.
    pub fn reflog(
        &self,
        old_oid: Option<Sum>,
        new_oid: Option<Sum>,
        action: &str,
        message: &str,
    ) -> Reflog {
        Reflog {
            old_oid,
            new_oid,
            author_name: self.name.clone(),
            author_email: self.email.clone(),
            time: now_secs(),
            action: action.to_string(),
            message: message.to_string(),
        }
    }
}

/// Current time in seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Trait for reference storage backends.
///
/// Ref writes are not idempotent, so every update goes through
/// [`RefStore::compare_and_swap`], which must be atomic in the backend.
pub trait RefStore: Send + Sync {
    /// Gets the sum a ref points to.
    fn get(&self, name: &str) -> Result<Option<Sum>>;

    /// Atomically sets `name` to `new` if it currently holds `expected`.
    ///
    /// `expected == None` means the ref must not exist. Returns `false`
    /// without writing when the stored value differs.
    fn compare_and_swap(&self, name: &str, expected: Option<Sum>, new: Sum) -> Result<bool>;

    /// Atomically deletes `name` if it currently holds `expected`.
    ///
    /// Returns `false` without deleting when the ref is absent or holds
    /// another value.
    fn compare_and_delete(&self, name: &str, expected: Sum) -> Result<bool>;

    /// Lists refs whose name starts with `prefix`, sorted by name.
    fn list(&self, prefix: &str) -> Result<Vec<(String, Sum)>>;

    /// Appends an entry to a ref's reflog.
    fn append_reflog(&self, name: &str, entry: Reflog) -> Result<()>;

    /// Returns a ref's reflog, oldest entry first.
    fn reflog(&self, name: &str) -> Result<Vec<Reflog>>;
}

impl<T: RefStore + ?Sized> RefStore for Arc<T> {
    fn get(&self, name: &str) -> Result<Option<Sum>> {
        (**self).get(name)
    }

    fn compare_and_swap(&self, name: &str, expected: Option<Sum>, new: Sum) -> Result<bool> {
        (**self).compare_and_swap(name, expected, new)
    }

    fn compare_and_delete(&self, name: &str, expected: Sum) -> Result<bool> {
        (**self).compare_and_delete(name, expected)
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, Sum)>> {
        (**self).list(prefix)
    }

    fn append_reflog(&self, name: &str, entry: Reflog) -> Result<()> {
        (**self).append_reflog(name, entry)
    }

    fn reflog(&self, name: &str) -> Result<Vec<Reflog>> {
        (**self).reflog(name)
    }
}

/// Unconditionally points `name` at `sum` and records a reflog entry.
///
/// Retries the compare-and-swap until it wins against concurrent writers.
pub fn save_ref(
    refs: &dyn RefStore,
    name: &str,
    sum: Sum,
    actor: &Actor,
    action: &str,
    message: &str,
) -> Result<()> {
    loop {
        let old = refs.get(name)?;
        if refs.compare_and_swap(name, old, sum)? {
            refs.append_reflog(name, actor.reflog(old, Some(sum), action, message))?;
            tracing::debug!(name = %name, sum = %sum, action = %action, "Ref saved");
            return Ok(());
        }
    }
}

/// Thread-safe in-memory reference store.
#[derive(Debug, Default)]
pub struct MemoryRefStore {
    refs: RwLock<BTreeMap<String, Sum>>,
    reflogs: RwLock<HashMap<String, Vec<Reflog>>>,
}

impl MemoryRefStore {
    /// Creates a new empty reference store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefStore for MemoryRefStore {
    fn get(&self, name: &str) -> Result<Option<Sum>> {
        Ok(self.refs.read().get(name).copied())
    }

    fn compare_and_swap(&self, name: &str, expected: Option<Sum>, new: Sum) -> Result<bool> {
        let mut refs = self.refs.write();
        if refs.get(name).copied() != expected {
            return Ok(false);
        }
        refs.insert(name.to_string(), new);
        Ok(true)
    }

    fn compare_and_delete(&self, name: &str, expected: Sum) -> Result<bool> {
        let mut refs = self.refs.write();
        if refs.get(name) != Some(&expected) {
            return Ok(false);
        }
        refs.remove(name);
        Ok(true)
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, Sum)>> {
        Ok(self
            .refs
            .read()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, sum)| (name.clone(), *sum))
            .collect())
    }

    fn append_reflog(&self, name: &str, entry: Reflog) -> Result<()> {
        self.reflogs
            .write()
            .entry(name.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    fn reflog(&self, name: &str) -> Result<Vec<Reflog>> {
        Ok(self.reflogs.read().get(name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(n: u8) -> Sum {
        Sum::from_bytes([n; 16])
    }

    #[test]
    fn test_cas_create_requires_absence() {
        let store = MemoryRefStore::new();
        assert!(store.compare_and_swap("heads/main", None, sum(1)).unwrap());
        assert!(!store.compare_and_swap("heads/main", None, sum(2)).unwrap());
        assert_eq!(store.get("heads/main").unwrap(), Some(sum(1)));
    }

    #[test]
    fn test_cas_update_requires_expected_value() {
        let store = MemoryRefStore::new();
        store.compare_and_swap("heads/main", None, sum(1)).unwrap();

        assert!(!store
            .compare_and_swap("heads/main", Some(sum(9)), sum(2))
            .unwrap());
        assert_eq!(store.get("heads/main").unwrap(), Some(sum(1)));

        assert!(store
            .compare_and_swap("heads/main", Some(sum(1)), sum(2))
            .unwrap());
        assert_eq!(store.get("heads/main").unwrap(), Some(sum(2)));
    }

    #[test]
    fn test_cas_concurrent_writers_single_winner() {
        let store = Arc::new(MemoryRefStore::new());
        store.compare_and_swap("heads/main", None, sum(0)).unwrap();

        let handles: Vec<_> = (1..=8u8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .compare_and_swap("heads/main", Some(sum(0)), sum(n))
                        .unwrap()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_ref_listing_by_prefix() {
        let store = MemoryRefStore::new();
        store.compare_and_swap("heads/main", None, sum(1)).unwrap();
        store.compare_and_swap("heads/feature", None, sum(2)).unwrap();
        store.compare_and_swap("tags/v1", None, sum(3)).unwrap();
        store
            .compare_and_swap("remotes/origin/main", None, sum(4))
            .unwrap();

        let heads = store.list("heads/").unwrap();
        assert_eq!(
            heads,
            vec![
                ("heads/feature".to_string(), sum(2)),
                ("heads/main".to_string(), sum(1)),
            ]
        );
        assert_eq!(store.list("").unwrap().len(), 4);
        assert!(store.list("remotes/upstream/").unwrap().is_empty());
    }

    #[test]
    fn test_compare_and_delete() {
        let store = MemoryRefStore::new();
        store.compare_and_swap("heads/main", None, sum(1)).unwrap();
        assert!(!store.compare_and_delete("heads/main", sum(2)).unwrap());
        assert_eq!(store.get("heads/main").unwrap(), Some(sum(1)));
        assert!(store.compare_and_delete("heads/main", sum(1)).unwrap());
        assert!(!store.compare_and_delete("heads/main", sum(1)).unwrap());
        assert_eq!(store.get("heads/main").unwrap(), None);
    }

    #[test]
    fn test_save_ref_appends_reflog() {
        let store = MemoryRefStore::new();
        let actor = Actor::new("Alice", "alice@example.com");

        save_ref(&store, "heads/main", sum(1), &actor, "commit", "initial").unwrap();
        save_ref(&store, "heads/main", sum(2), &actor, "commit", "second").unwrap();

        let log = store.reflog("heads/main").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].old_oid, None);
        assert_eq!(log[0].new_oid, Some(sum(1)));
        assert_eq!(log[1].old_oid, Some(sum(1)));
        assert_eq!(log[1].new_oid, Some(sum(2)));
        assert_eq!(log[1].author_email, "alice@example.com");
        assert_eq!(log[1].message, "second");
    }

    #[test]
    fn test_reflog_of_unknown_ref_is_empty() {
        let store = MemoryRefStore::new();
        assert!(store.reflog("heads/none").unwrap().is_empty());
    }
}

//! Applying pushed ref updates on the receiving side.

use crate::{is_ancestor_of, Result};
use std::sync::Arc;
use tably_storage::{Actor, ObjectStore, ObjectType, RefStore, Sum};

/// Reflog action recorded for ref changes made by a push.
pub const RECEIVE_PACK_ACTION: &str = "receive-pack";

/// Rejection reasons reported back to the pushing client.
pub mod reason {
    /// Deletes are denied by configuration.
    pub const DELETE_DENIED: &str = "remote does not support deleting refs";
    /// The new commit never arrived.
    pub const MISSING_COMMIT: &str = "remote did not receive commit";
    /// The ref moved after the client read it.
    pub const STALE: &str = "remote ref updated since checkout";
    /// Non-fast-forward updates are denied by configuration.
    pub const NON_FAST_FORWARD: &str = "remote does not support non-fast-fowards";
}

/// One ref change requested by a push or produced by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Value the requester believes the destination holds, `None` if absent.
    pub old_sum: Option<Sum>,
    /// New value, `None` to delete the destination.
    pub sum: Option<Sum>,
    /// Source ref name on the sending side.
    pub src: String,
    /// Destination ref name on the receiving side.
    pub dst: String,
    /// Allow a non-fast-forward update.
    pub force: bool,
    /// Why the update was rejected, if it was.
    pub err_msg: Option<String>,
}

impl Update {
    /// Creates an update with no outcome yet.
    pub fn new(
        old_sum: Option<Sum>,
        sum: Option<Sum>,
        src: impl Into<String>,
        dst: impl Into<String>,
    ) -> Self {
        Self {
            old_sum,
            sum,
            src: src.into(),
            dst: dst.into(),
            force: false,
            err_msg: None,
        }
    }

    /// Returns true if this update deletes its destination.
    pub fn is_delete(&self) -> bool {
        self.sum.is_none()
    }

    /// Returns true if the update has not been rejected.
    pub fn is_ok(&self) -> bool {
        self.err_msg.is_none()
    }

    fn reject(&mut self, reason: &str) {
        self.err_msg = Some(reason.to_string());
    }
}

/// Rules applied to incoming ref updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefUpdatePolicy {
    /// Reject updates that delete a ref.
    pub deny_deletes: bool,
    /// Reject updates whose new commit does not descend from the old one.
    pub deny_non_fast_forwards: bool,
}

/// Applies updates against a repository's stores under a policy.
pub struct RefUpdater {
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    policy: RefUpdatePolicy,
    actor: Actor,
}

impl RefUpdater {
    /// Creates an updater that records changes under `actor`.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
        policy: RefUpdatePolicy,
        actor: Actor,
    ) -> Self {
        Self {
            objects,
            refs,
            policy,
            actor,
        }
    }

    /// Applies every update independently.
    ///
    /// Rejections are recorded in each update's `err_msg`; only storage
    /// failures abort the batch.
    pub fn apply_all(&self, updates: &mut [Update]) -> Result<()> {
        for update in updates.iter_mut() {
            self.apply(update)?;
        }
        Ok(())
    }

    /// Applies one update, recording a rejection in `err_msg`.
    pub fn apply(&self, update: &mut Update) -> Result<()> {
        let Some(sum) = update.sum else {
            return self.apply_delete(update);
        };

        if !self.objects.exist(ObjectType::Commit, &sum)? {
            update.reject(reason::MISSING_COMMIT);
            return Ok(());
        }

        let current = self.refs.get(&update.dst)?;
        if current != update.old_sum {
            update.reject(reason::STALE);
            return Ok(());
        }

        if let Some(current) = current {
            if self.policy.deny_non_fast_forwards
                && !is_ancestor_of(self.objects.clone(), &current, &sum)?
            {
                update.reject(reason::NON_FAST_FORWARD);
                return Ok(());
            }
        }

        if !self.refs.compare_and_swap(&update.dst, current, sum)? {
            update.reject(reason::STALE);
            return Ok(());
        }

        let message = if current.is_some() {
            "update ref"
        } else {
            "create ref"
        };
        self.refs.append_reflog(
            &update.dst,
            self.actor
                .reflog(current, Some(sum), RECEIVE_PACK_ACTION, message),
        )?;
        tracing::info!(
            dst = %update.dst,
            old = %Sum::to_hex_optional(current.as_ref()),
            new = %sum,
            "{}",
            message
        );
        Ok(())
    }

    fn apply_delete(&self, update: &mut Update) -> Result<()> {
        if self.policy.deny_deletes {
            update.reject(reason::DELETE_DENIED);
            return Ok(());
        }
        let Some(expected) = update.old_sum else {
            // Nothing to delete unless the ref appeared meanwhile.
            if self.refs.get(&update.dst)?.is_some() {
                update.reject(reason::STALE);
            }
            return Ok(());
        };
        if !self.refs.compare_and_delete(&update.dst, expected)? {
            update.reject(reason::STALE);
            return Ok(());
        }
        self.refs.append_reflog(
            &update.dst,
            self.actor
                .reflog(Some(expected), None, RECEIVE_PACK_ACTION, "delete ref"),
        )?;
        tracing::info!(dst = %update.dst, old = %expected, "delete ref");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Graph;
    use tably_storage::Reflog;

    fn updater(g: &Graph, policy: RefUpdatePolicy) -> RefUpdater {
        RefUpdater::new(
            g.objects(),
            g.refs(),
            policy,
            Actor::new("Server", "server@example.com"),
        )
    }

    #[test]
    fn test_create_ref() {
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);

        let mut update = Update::new(None, Some(a), "heads/alpha", "heads/alpha");
        updater(&g, RefUpdatePolicy::default()).apply(&mut update).unwrap();
        assert!(update.is_ok());
        assert_eq!(g.refs().get("heads/alpha").unwrap(), Some(a));

        let log = g.refs().reflog("heads/alpha").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].old_oid, None);
        assert_eq!(log[0].message, "create ref");
        assert_eq!(log[0].action, "receive-pack");
    }

    #[test]
    fn test_fast_forward_update_writes_reflog() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        let y = g.commit("y", &[x], 2);
        g.set_ref("heads/beta", x);

        let policy = RefUpdatePolicy {
            deny_deletes: true,
            deny_non_fast_forwards: true,
        };
        let mut update = Update::new(Some(x), Some(y), "heads/beta", "heads/beta");
        updater(&g, policy).apply(&mut update).unwrap();
        assert!(update.is_ok());
        assert_eq!(g.refs().get("heads/beta").unwrap(), Some(y));

        let log = g.refs().reflog("heads/beta").unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.old_oid, Some(x));
        assert_eq!(last.new_oid, Some(y));
        assert_eq!(last.action, "receive-pack");
        assert_eq!(last.message, "update ref");
        assert_eq!(last.author_name, "Server");
    }

    #[test]
    fn test_stale_old_sum_is_rejected() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        let y = g.commit("y", &[x], 2);
        let z = g.commit("z", &[y], 3);
        g.set_ref("heads/beta", y);

        let mut update = Update::new(Some(x), Some(z), "heads/beta", "heads/beta");
        updater(&g, RefUpdatePolicy::default()).apply(&mut update).unwrap();
        assert_eq!(update.err_msg.as_deref(), Some(reason::STALE));
        assert_eq!(g.refs().get("heads/beta").unwrap(), Some(y));
    }

    #[test]
    fn test_create_over_existing_ref_is_stale() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        g.set_ref("heads/beta", x);

        let mut update = Update::new(None, Some(x), "heads/beta", "heads/beta");
        updater(&g, RefUpdatePolicy::default()).apply(&mut update).unwrap();
        assert_eq!(update.err_msg.as_deref(), Some(reason::STALE));
    }

    #[test]
    fn test_non_fast_forward_denied() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        let y = g.commit("y", &[], 2);
        g.set_ref("heads/beta", x);

        let policy = RefUpdatePolicy {
            deny_non_fast_forwards: true,
            ..Default::default()
        };
        let mut update = Update::new(Some(x), Some(y), "heads/beta", "heads/beta");
        update.force = true;
        updater(&g, policy).apply(&mut update).unwrap();
        assert_eq!(
            update.err_msg.as_deref(),
            Some("remote does not support non-fast-fowards")
        );
        assert_eq!(g.refs().get("heads/beta").unwrap(), Some(x));
    }

    #[test]
    fn test_non_fast_forward_allowed_by_default() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        let y = g.commit("y", &[], 2);
        g.set_ref("heads/beta", x);

        let mut update = Update::new(Some(x), Some(y), "heads/beta", "heads/beta");
        updater(&g, RefUpdatePolicy::default()).apply(&mut update).unwrap();
        assert!(update.is_ok());
        assert_eq!(g.refs().get("heads/beta").unwrap(), Some(y));
    }

    #[test]
    fn test_missing_commit_is_rejected() {
        let g = Graph::new();
        let mut update = Update::new(
            None,
            Some(Sum::compute(b"never sent")),
            "heads/beta",
            "heads/beta",
        );
        updater(&g, RefUpdatePolicy::default()).apply(&mut update).unwrap();
        assert_eq!(update.err_msg.as_deref(), Some(reason::MISSING_COMMIT));
        assert_eq!(g.refs().get("heads/beta").unwrap(), None);
    }

    #[test]
    fn test_delete_denied() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        g.set_ref("heads/beta", x);

        let policy = RefUpdatePolicy {
            deny_deletes: true,
            ..Default::default()
        };
        let mut update = Update::new(Some(x), None, "heads/beta", "heads/beta");
        updater(&g, policy).apply(&mut update).unwrap();
        assert_eq!(
            update.err_msg.as_deref(),
            Some("remote does not support deleting refs")
        );
        assert_eq!(g.refs().get("heads/beta").unwrap(), Some(x));
    }

    #[test]
    fn test_delete_allowed() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        g.set_ref("heads/beta", x);

        let mut update = Update::new(Some(x), None, "heads/beta", "heads/beta");
        updater(&g, RefUpdatePolicy::default()).apply(&mut update).unwrap();
        assert!(update.is_ok());
        assert_eq!(g.refs().get("heads/beta").unwrap(), None);
        assert_eq!(
            g.refs().reflog("heads/beta").unwrap().last().unwrap().message,
            "delete ref"
        );
    }

    #[test]
    fn test_batch_outcomes_are_independent() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        let y = g.commit("y", &[x], 2);
        g.set_ref("heads/a", x);
        g.set_ref("heads/b", x);

        let mut updates = vec![
            Update::new(Some(x), Some(y), "heads/a", "heads/a"),
            Update::new(Some(y), Some(y), "heads/b", "heads/b"),
            Update::new(None, Some(y), "heads/c", "heads/c"),
        ];
        updater(&g, RefUpdatePolicy::default())
            .apply_all(&mut updates)
            .unwrap();
        assert!(updates[0].is_ok());
        assert_eq!(updates[1].err_msg.as_deref(), Some(reason::STALE));
        assert!(updates[2].is_ok());
    }

    /// Moves `name` from `from` to `to` right before every conditional
    /// delete, the way a push landing mid-request would.
    struct InterleavedPush {
        inner: Arc<dyn RefStore>,
        name: &'static str,
        from: Sum,
        to: Sum,
    }

    impl RefStore for InterleavedPush {
        fn get(&self, name: &str) -> tably_storage::Result<Option<Sum>> {
            self.inner.get(name)
        }

        fn compare_and_swap(
            &self,
            name: &str,
            expected: Option<Sum>,
            new: Sum,
        ) -> tably_storage::Result<bool> {
            self.inner.compare_and_swap(name, expected, new)
        }

        fn compare_and_delete(&self, name: &str, expected: Sum) -> tably_storage::Result<bool> {
            self.inner
                .compare_and_swap(self.name, Some(self.from), self.to)?;
            self.inner.compare_and_delete(name, expected)
        }

        fn list(&self, prefix: &str) -> tably_storage::Result<Vec<(String, Sum)>> {
            self.inner.list(prefix)
        }

        fn append_reflog(&self, name: &str, entry: Reflog) -> tably_storage::Result<()> {
            self.inner.append_reflog(name, entry)
        }

        fn reflog(&self, name: &str) -> tably_storage::Result<Vec<Reflog>> {
            self.inner.reflog(name)
        }
    }

    #[test]
    fn test_delete_loses_to_interleaved_push() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        let y = g.commit("y", &[x], 2);
        g.set_ref("heads/beta", x);

        let refs = Arc::new(InterleavedPush {
            inner: g.refs(),
            name: "heads/beta",
            from: x,
            to: y,
        });
        let updater = RefUpdater::new(
            g.objects(),
            refs,
            RefUpdatePolicy::default(),
            Actor::new("Server", "server@example.com"),
        );

        let mut update = Update::new(Some(x), None, "heads/beta", "heads/beta");
        updater.apply(&mut update).unwrap();
        assert_eq!(update.err_msg.as_deref(), Some(reason::STALE));
        assert_eq!(g.refs().get("heads/beta").unwrap(), Some(y));
        assert!(g
            .refs()
            .reflog("heads/beta")
            .unwrap()
            .iter()
            .all(|entry| entry.message != "delete ref"));
    }

    #[test]
    fn test_delete_of_absent_ref_is_noop() {
        let mut g = Graph::new();
        let x = g.commit("x", &[], 1);
        g.set_ref("heads/beta", x);

        let updater = updater(&g, RefUpdatePolicy::default());
        let mut update = Update::new(None, None, "heads/gone", "heads/gone");
        updater.apply(&mut update).unwrap();
        assert!(update.is_ok());
        assert!(g.refs().reflog("heads/gone").unwrap().is_empty());

        let mut update = Update::new(None, None, "heads/beta", "heads/beta");
        updater.apply(&mut update).unwrap();
        assert_eq!(update.err_msg.as_deref(), Some(reason::STALE));
        assert_eq!(g.refs().get("heads/beta").unwrap(), Some(x));
    }

    #[test]
    fn test_concurrent_pushes_to_same_ref_single_winner() {
        let mut g = Graph::new();
        let base = g.commit("base", &[], 1);
        let tips: Vec<Sum> = (0..8)
            .map(|i| g.commit(&format!("tip{}", i), &[base], 2 + i))
            .collect();
        g.set_ref("heads/main", base);

        let updater = Arc::new(updater(&g, RefUpdatePolicy::default()));
        let handles: Vec<_> = tips
            .into_iter()
            .map(|tip| {
                let updater = updater.clone();
                std::thread::spawn(move || {
                    let mut update = Update::new(Some(base), Some(tip), "heads/main", "heads/main");
                    updater.apply(&mut update).unwrap();
                    update.is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(g.refs().reflog("heads/main").unwrap().len(), 1);
    }
}

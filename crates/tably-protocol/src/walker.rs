//! Time-ordered traversal of the commit DAG.
//!
//! [`CommitsQueue`] yields commits newest first. Every sum that has ever
//! entered the queue is recorded as seen, so each commit is yielded at
//! most once no matter how many paths lead to it.

use crate::{Result, SumSet};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use tably_storage::{Commit, ObjectStore, Sum};

struct Entry {
    sum: Sum,
    commit: Commit,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.commit
            .time
            .cmp(&other.commit.time)
            .then_with(|| self.sum.cmp(&other.sum))
    }
}

/// Priority queue of commits ordered by time, newest first.
pub struct CommitsQueue {
    objects: Arc<dyn ObjectStore>,
    heap: BinaryHeap<Entry>,
    seen: SumSet,
    removed: SumSet,
}

impl CommitsQueue {
    /// Creates an empty queue over `objects`.
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            objects,
            heap: BinaryHeap::new(),
            seen: SumSet::new(),
            removed: SumSet::new(),
        }
    }

    /// Adds starting points, marking each as seen.
    pub fn seed(&mut self, sums: &[Sum]) -> Result<()> {
        for sum in sums {
            self.insert(*sum)?;
        }
        Ok(())
    }

    fn insert(&mut self, sum: Sum) -> Result<()> {
        if !self.seen.insert(sum) {
            return Ok(());
        }
        let commit = self.objects.get_commit(&sum)?;
        self.heap.push(Entry { sum, commit });
        Ok(())
    }

    /// Pops the newest commit and queues its unseen parents.
    ///
    /// Returns `None` once the queue is exhausted.
    pub fn pop_insert_parents(&mut self) -> Result<Option<(Sum, Commit)>> {
        let Some(Entry { sum, commit }) = self.heap.pop() else {
            return Ok(None);
        };
        for parent in &commit.parents {
            self.insert(*parent)?;
        }
        Ok(Some((sum, commit)))
    }

    /// Pops until `target` is produced.
    ///
    /// Returns `None` if the queue runs out without yielding `target`.
    pub fn pop_until(&mut self, target: &Sum) -> Result<Option<(Sum, Commit)>> {
        while let Some((sum, commit)) = self.pop_insert_parents()? {
            if sum == *target {
                return Ok(Some((sum, commit)));
            }
        }
        Ok(None)
    }

    /// Marks every ancestor of `sums` as seen without yielding them.
    ///
    /// Ancestors already waiting in the queue are dropped from it.
    pub fn remove_ancestors(&mut self, sums: &[Sum]) -> Result<()> {
        let mut work: VecDeque<Sum> = sums.iter().copied().collect();
        let mut removed = 0usize;
        while let Some(sum) = work.pop_front() {
            if !self.removed.insert(sum) {
                continue;
            }
            self.seen.insert(sum);
            removed += 1;
            // An acknowledged sum may be one we never had locally.
            let Some(data) = self.objects.get(tably_storage::ObjectType::Commit, &sum)? else {
                continue;
            };
            let commit = Commit::decode(&data)?;
            work.extend(
                commit
                    .parents
                    .iter()
                    .filter(|p| !self.removed.contains(p))
                    .copied(),
            );
        }

        let before = self.heap.len();
        let removed_set = &self.removed;
        self.heap.retain(|entry| !removed_set.contains(&entry.sum));
        tracing::trace!(
            marked = removed,
            dropped = before - self.heap.len(),
            "Removed ancestors from commits queue"
        );
        Ok(())
    }

    /// Returns true if `sum` has entered the queue or been removed.
    pub fn seen(&self, sum: &Sum) -> bool {
        self.seen.contains(sum)
    }

    /// Returns true if no commits are waiting.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of commits waiting.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Returns true if `ancestor` is reachable from `descendant`, or equal to it.
pub fn is_ancestor_of(
    objects: Arc<dyn ObjectStore>,
    ancestor: &Sum,
    descendant: &Sum,
) -> Result<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut queue = CommitsQueue::new(objects);
    queue.seed(&[*descendant])?;
    Ok(queue.pop_until(ancestor)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Graph;

    #[test]
    fn test_pops_newest_first_and_each_once() {
        // a <- b <- d
        //  \<- c <-/
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);
        let b = g.commit("b", &[a], 2);
        let c = g.commit("c", &[a], 3);
        let d = g.commit("d", &[b, c], 4);

        let mut queue = CommitsQueue::new(g.objects());
        queue.seed(&[d]).unwrap();
        let mut order = Vec::new();
        while let Some((sum, _)) = queue.pop_insert_parents().unwrap() {
            order.push(sum);
        }
        assert_eq!(order, vec![d, c, b, a]);
        assert!(queue.pop_insert_parents().unwrap().is_none());
    }

    #[test]
    fn test_seed_marks_seen() {
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);
        let b = g.commit("b", &[a], 2);

        let mut queue = CommitsQueue::new(g.objects());
        queue.seed(&[b]).unwrap();
        assert!(queue.seen(&b));
        assert!(!queue.seen(&a));
        queue.pop_insert_parents().unwrap();
        assert!(queue.seen(&a));
    }

    #[test]
    fn test_pop_until() {
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);
        let b = g.commit("b", &[a], 2);
        let c = g.commit("c", &[b], 3);

        let mut queue = CommitsQueue::new(g.objects());
        queue.seed(&[c]).unwrap();
        let (sum, commit) = queue.pop_until(&b).unwrap().unwrap();
        assert_eq!(sum, b);
        assert_eq!(commit.message, "b");
        assert!(queue.pop_until(&Sum::compute(b"missing")).unwrap().is_none());
    }

    #[test]
    fn test_remove_ancestors() {
        // a <- b <- c <- e
        //       \<- d
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);
        let b = g.commit("b", &[a], 2);
        let c = g.commit("c", &[b], 3);
        let d = g.commit("d", &[b], 4);
        let e = g.commit("e", &[c], 5);

        let mut queue = CommitsQueue::new(g.objects());
        queue.seed(&[e, d]).unwrap();
        assert_eq!(queue.pop_insert_parents().unwrap().unwrap().0, e);

        queue.remove_ancestors(&[d]).unwrap();
        assert!(queue.seen(&a));

        let mut rest = Vec::new();
        while let Some((sum, _)) = queue.pop_insert_parents().unwrap() {
            rest.push(sum);
        }
        assert_eq!(rest, vec![c]);
    }

    #[test]
    fn test_remove_unknown_ancestor_is_ignored() {
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);

        let mut queue = CommitsQueue::new(g.objects());
        queue.seed(&[a]).unwrap();
        queue.remove_ancestors(&[Sum::compute(b"remote only")]).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_is_ancestor_of() {
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);
        let b = g.commit("b", &[a], 2);
        let c = g.commit("c", &[a], 3);

        assert!(is_ancestor_of(g.objects(), &a, &b).unwrap());
        assert!(is_ancestor_of(g.objects(), &b, &b).unwrap());
        assert!(!is_ancestor_of(g.objects(), &b, &a).unwrap());
        assert!(!is_ancestor_of(g.objects(), &b, &c).unwrap());
    }
}

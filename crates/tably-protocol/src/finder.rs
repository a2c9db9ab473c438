//! Server-side computation of the minimal set of objects to transfer.
//!
//! The finder accumulates `commons`, the commits both sides are known to
//! hold. Because every have is folded in together with its whole ancestry,
//! `commons` is always closed under parents. A want is resolved once a
//! walk from it reaches `commons`; the transfer is then every ancestor of
//! the wants minus `commons`, along with the tables and blocks no common
//! commit already references.
//!
//! ACKs carry the haves that were proven common rather than `commons`
//! itself. `commons` is exactly the ancestor closure of those haves, so a
//! client that removes the ancestors of every ACK has marked the whole of
//! `commons` without it ever going over the wire.

use crate::{CommitsQueue, ProtocolError, Result, SumSet};
use std::collections::VecDeque;
use std::sync::Arc;
use tably_storage::{ObjectStore, ObjectType, RefStore, Sum};

/// Result of one negotiation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinderOutcome {
    /// More haves are needed. Every have proven common so far, whose
    /// ancestor closure is the finder's `commons`.
    Acks(Vec<Sum>),
    /// Negotiation is over and a packfile can be sent.
    Ready,
}

/// Server-side negotiation state for one upload-pack session.
pub struct ClosedSetsFinder {
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    reachable: Option<CommitsQueue>,
    commons: SumSet,
    acked: Vec<Sum>,
    wants: SumSet,
    reachable_wants: SumSet,
    resolved: SumSet,
    started: bool,
}

impl ClosedSetsFinder {
    /// Creates a finder over the server's object and ref stores.
    pub fn new(objects: Arc<dyn ObjectStore>, refs: Arc<dyn RefStore>) -> Self {
        Self {
            objects,
            refs,
            reachable: None,
            commons: SumSet::new(),
            acked: Vec::new(),
            wants: SumSet::new(),
            reachable_wants: SumSet::new(),
            resolved: SumSet::new(),
            started: false,
        }
    }

    /// Processes one round of wants and haves.
    pub fn process(&mut self, wants: &[Sum], haves: &[Sum], done: bool) -> Result<FinderOutcome> {
        if !self.started && wants.is_empty() {
            return Err(ProtocolError::BadRequest("empty wants list".to_string()));
        }

        for want in wants {
            if !self.is_reachable(want)? {
                return Err(ProtocolError::BadRequest(format!(
                    "unrecognized wants: {}",
                    want
                )));
            }
        }
        self.started = true;
        for want in wants {
            if !self.reachable_wants.contains(want) {
                self.wants.insert(*want);
            }
        }

        let mut new_commons = 0usize;
        for have in haves {
            if self.commons.contains(have) {
                continue;
            }
            if !self.objects.exist(ObjectType::Commit, have)? || !self.is_reachable(have)? {
                continue;
            }
            new_commons += self.find_commons(have)?;
            self.acked.push(*have);
        }

        let pending: Vec<Sum> = self.wants.iter().copied().collect();
        for want in pending {
            if self.resolve_want(&want)? {
                self.wants.remove(&want);
                self.reachable_wants.insert(want);
            }
        }

        tracing::debug!(
            wants = wants.len(),
            haves = haves.len(),
            new_commons,
            commons = self.commons.len(),
            unresolved = self.wants.len(),
            done,
            "Processed negotiation round"
        );

        if !self.wants.is_empty() && !done {
            return Ok(FinderOutcome::Acks(self.acked.clone()));
        }
        Ok(FinderOutcome::Ready)
    }

    /// Sums proven common so far. Closed under parents.
    pub fn commons(&self) -> &SumSet {
        &self.commons
    }

    /// Returns true if `sum` is in the ancestry of one of the server's refs.
    fn is_reachable(&mut self, sum: &Sum) -> Result<bool> {
        if self.reachable.is_none() {
            let tips: Vec<Sum> = self
                .refs
                .list("")?
                .into_iter()
                .map(|(_, sum)| sum)
                .collect();
            let mut queue = CommitsQueue::new(self.objects.clone());
            queue.seed(&tips)?;
            self.reachable = Some(queue);
        }
        let Some(queue) = self.reachable.as_mut() else {
            return Ok(false);
        };
        if queue.seen(sum) {
            return Ok(true);
        }
        Ok(queue.pop_until(sum)?.is_some())
    }

    /// Adds `have` and all of its ancestors to `commons`.
    fn find_commons(&mut self, have: &Sum) -> Result<usize> {
        let mut added = 0usize;
        let mut work = VecDeque::from([*have]);
        while let Some(sum) = work.pop_front() {
            if !self.commons.insert(sum) {
                continue;
            }
            added += 1;
            let commit = self.objects.get_commit(&sum)?;
            work.extend(
                commit
                    .parents
                    .into_iter()
                    .filter(|p| !self.commons.contains(p)),
            );
        }
        Ok(added)
    }

    /// Walks parents of `want` breadth first looking for a common commit.
    fn resolve_want(&mut self, want: &Sum) -> Result<bool> {
        let mut visited = SumSet::new();
        let mut work = VecDeque::from([*want]);
        let mut found = false;
        while let Some(sum) = work.pop_front() {
            if self.commons.contains(&sum) || self.resolved.contains(&sum) {
                found = true;
                break;
            }
            if !visited.insert(sum) {
                continue;
            }
            let commit = self.objects.get_commit(&sum)?;
            work.extend(commit.parents);
        }
        if found {
            self.resolved.extend_from(&visited);
        }
        Ok(found)
    }

    /// Commits reachable from the wants but not from `commons`, oldest first.
    pub fn commits_to_send(&self) -> Result<Vec<Sum>> {
        let mut visited = SumSet::new();
        let mut commits = Vec::new();
        let mut work: VecDeque<Sum> = self
            .reachable_wants
            .iter()
            .chain(self.wants.iter())
            .copied()
            .collect();
        while let Some(sum) = work.pop_front() {
            if self.commons.contains(&sum) || !visited.insert(sum) {
                continue;
            }
            let commit = self.objects.get_commit(&sum)?;
            work.extend(commit.parents.iter().copied());
            commits.push((commit.time, sum));
        }
        commits.sort();
        Ok(commits.into_iter().map(|(_, sum)| sum).collect())
    }

    /// Every object to transfer, in packfile order.
    ///
    /// For each commit to send, oldest first: its blocks, its table, then
    /// the commit itself. Tables and blocks referenced by any common
    /// commit are left out, and nothing is listed twice.
    pub fn object_plan(&self) -> Result<VecDeque<(ObjectType, Sum)>> {
        let mut known_tables = SumSet::new();
        let mut known_blocks = SumSet::new();
        for sum in self.commons.iter() {
            let commit = self.objects.get_commit(sum)?;
            if known_tables.insert(commit.table) {
                known_blocks.extend(self.objects.get_table(&commit.table)?.blocks);
            }
        }

        let mut plan = VecDeque::new();
        for sum in self.commits_to_send()? {
            let commit = self.objects.get_commit(&sum)?;
            if known_tables.insert(commit.table) {
                let table = self.objects.get_table(&commit.table)?;
                for block in table.blocks {
                    if known_blocks.insert(block) {
                        plan.push_back((ObjectType::Block, block));
                    }
                }
                plan.push_back((ObjectType::Table, commit.table));
            }
            plan.push_back((ObjectType::Commit, sum));
        }
        Ok(plan)
    }
}

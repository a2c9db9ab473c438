//! Accumulates pushed objects until every wanted commit is complete.

use crate::packfile::PackfileReader;
use crate::{Result, SumSet};
use bytes::Bytes;
use std::sync::Arc;
use tably_storage::{Commit, ObjectStore, ObjectType, Sum, Table};

/// Tracks which objects a push still owes the receiver.
///
/// A commit is complete once it and its table, blocks and parents are all
/// present in the store, either from before the push or from a packfile.
pub struct ObjectReceiver {
    objects: Arc<dyn ObjectStore>,
    pending_commits: SumSet,
    pending_tables: SumSet,
    pending_blocks: SumSet,
    received: usize,
}

impl ObjectReceiver {
    /// Creates a receiver expecting the given commits.
    pub fn new(objects: Arc<dyn ObjectStore>, wanted: impl IntoIterator<Item = Sum>) -> Result<Self> {
        let mut pending_commits = SumSet::new();
        for sum in wanted {
            if !objects.exist(ObjectType::Commit, &sum)? {
                pending_commits.insert(sum);
            }
        }
        Ok(Self {
            objects,
            pending_commits,
            pending_tables: SumSet::new(),
            pending_blocks: SumSet::new(),
            received: 0,
        })
    }

    /// Stores one object and updates what remains outstanding.
    pub fn receive(&mut self, object_type: ObjectType, data: Vec<u8>) -> Result<Sum> {
        let data = Bytes::from(data);
        let sum = self.objects.save_raw(object_type, data.clone())?;
        self.received += 1;

        match object_type {
            ObjectType::Commit => {
                self.pending_commits.remove(&sum);
                let commit = Commit::decode(&data)?;
                for parent in &commit.parents {
                    if !self.objects.exist(ObjectType::Commit, parent)? {
                        self.pending_commits.insert(*parent);
                    }
                }
                if !self.objects.exist(ObjectType::Table, &commit.table)? {
                    self.pending_tables.insert(commit.table);
                }
            }
            ObjectType::Table => {
                self.pending_tables.remove(&sum);
                let table = Table::decode(&data)?;
                for block in &table.blocks {
                    if !self.objects.exist(ObjectType::Block, block)? {
                        self.pending_blocks.insert(*block);
                    }
                }
            }
            ObjectType::Block => {
                self.pending_blocks.remove(&sum);
            }
        }
        Ok(sum)
    }

    /// Reads every object out of a packfile.
    pub fn receive_packfile(&mut self, data: &[u8]) -> Result<usize> {
        let mut reader = PackfileReader::new(data)?;
        let mut count = 0;
        while let Some((object_type, data)) = reader.read_object()? {
            self.receive(object_type, data)?;
            count += 1;
        }
        tracing::debug!(
            objects = count,
            pending = self.pending(),
            "Received packfile"
        );
        Ok(count)
    }

    /// Returns true once nothing is outstanding.
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Number of objects still outstanding.
    pub fn pending(&self) -> usize {
        self.pending_commits.len() + self.pending_tables.len() + self.pending_blocks.len()
    }

    /// Total objects received so far.
    pub fn received(&self) -> usize {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packfile::PackfileWriter;
    use crate::testutil::Graph;

    fn pack(source: &Graph, objects: &[(ObjectType, Sum)]) -> Vec<u8> {
        let mut writer = PackfileWriter::new(Vec::new()).unwrap();
        for (ty, sum) in objects {
            let data = source.store().get(*ty, sum).unwrap().unwrap();
            writer.write_object(*ty, &data).unwrap();
        }
        writer.finish().unwrap()
    }

    fn closure(g: &Graph, sum: Sum) -> Vec<(ObjectType, Sum)> {
        let commit = g.store().get_commit(&sum).unwrap();
        let table = g.store().get_table(&commit.table).unwrap();
        let mut objects: Vec<_> = table
            .blocks
            .iter()
            .map(|b| (ObjectType::Block, *b))
            .collect();
        objects.push((ObjectType::Table, commit.table));
        objects.push((ObjectType::Commit, sum));
        objects
    }

    #[test]
    fn test_complete_after_full_closure() {
        let mut client = Graph::new();
        let a = client.commit("a", &[], 1);
        let b = client.commit("b", &[a], 2);

        let server = Graph::new();
        client.copy_commit(&a, &server);

        let mut receiver = ObjectReceiver::new(server.objects(), [b]).unwrap();
        assert!(!receiver.is_complete());
        receiver.receive_packfile(&pack(&client, &closure(&client, b))).unwrap();
        assert!(receiver.is_complete());
        assert_eq!(receiver.received(), 3);
        assert!(server.store().exist(ObjectType::Commit, &b).unwrap());
    }

    #[test]
    fn test_missing_parent_keeps_receiver_waiting() {
        let mut client = Graph::new();
        let a = client.commit("a", &[], 1);
        let b = client.commit("b", &[a], 2);
        let server = Graph::new();

        let mut receiver = ObjectReceiver::new(server.objects(), [b]).unwrap();
        receiver.receive_packfile(&pack(&client, &closure(&client, b))).unwrap();
        assert!(!receiver.is_complete());
        assert_eq!(receiver.pending(), 1);

        receiver.receive_packfile(&pack(&client, &closure(&client, a))).unwrap();
        assert!(receiver.is_complete());
    }

    #[test]
    fn test_commit_before_table_waits_for_table() {
        let mut client = Graph::new();
        let a = client.commit("a", &[], 1);
        let server = Graph::new();

        let mut objects = closure(&client, a);
        objects.reverse();
        let mut receiver = ObjectReceiver::new(server.objects(), [a]).unwrap();
        receiver.receive_packfile(&pack(&client, &objects[..1])).unwrap();
        assert_eq!(receiver.pending(), 1);
        receiver.receive_packfile(&pack(&client, &objects[1..2])).unwrap();
        assert_eq!(receiver.pending(), 1);
        receiver.receive_packfile(&pack(&client, &objects[2..])).unwrap();
        assert!(receiver.is_complete());
    }

    #[test]
    fn test_existing_commit_needs_nothing() {
        let mut g = Graph::new();
        let a = g.commit("a", &[], 1);
        let receiver = ObjectReceiver::new(g.objects(), [a]).unwrap();
        assert!(receiver.is_complete());
    }

    #[test]
    fn test_invalid_object_is_rejected() {
        let server = Graph::new();
        let mut receiver = ObjectReceiver::new(server.objects(), []).unwrap();
        assert!(receiver
            .receive(ObjectType::Table, b"not a table".to_vec())
            .is_err());
        assert!(server.store().is_empty());
    }
}

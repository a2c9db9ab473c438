//! Helpers for building commit graphs in tests.

use bytes::Bytes;
use std::sync::Arc;
use tably_storage::{
    Commit, MemoryRefStore, MemoryStore, ObjectStore, RefStore, Sum, Table,
};

/// A repository of commits whose tables each hold one distinct block.
pub struct Graph {
    store: Arc<MemoryStore>,
    refs: Arc<MemoryRefStore>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            refs: Arc::new(MemoryRefStore::new()),
        }
    }

    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn refs(&self) -> Arc<dyn RefStore> {
        self.refs.clone()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Adds a commit named `name` with its own table and block.
    pub fn commit(&mut self, name: &str, parents: &[Sum], time: i64) -> Sum {
        let block = self
            .store
            .save_block(Bytes::from(format!("1,{}\n", name)))
            .unwrap();
        let table = Table {
            columns: vec!["id".to_string(), "name".to_string()],
            primary_key: vec![0],
            rows_count: 1,
            blocks: vec![block],
        };
        let table = self.store.save_table(&table).unwrap();
        self.commit_with_table(name, parents, time, table)
    }

    /// Adds a commit that points at an existing table.
    pub fn commit_with_table(&mut self, name: &str, parents: &[Sum], time: i64, table: Sum) -> Sum {
        self.store
            .save_commit(&Commit {
                table,
                parents: parents.to_vec(),
                author_name: "Tester".to_string(),
                author_email: "tester@example.com".to_string(),
                time,
                message: name.to_string(),
            })
            .unwrap()
    }

    pub fn set_ref(&self, name: &str, sum: Sum) {
        let current = self.refs.get(name).unwrap();
        assert!(self.refs.compare_and_swap(name, current, sum).unwrap());
    }

    /// Copies one commit with its table and blocks into `other`.
    pub fn copy_commit(&self, sum: &Sum, other: &Graph) {
        let commit = self.store.get_commit(sum).unwrap();
        let table = self.store.get_table(&commit.table).unwrap();
        for block in &table.blocks {
            other
                .store
                .save_block(self.store.get_block(block).unwrap())
                .unwrap();
        }
        other.store.save_table(&table).unwrap();
        other.store.save_commit(&commit).unwrap();
    }
}

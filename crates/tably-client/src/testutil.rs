//! In-memory repositories for tests.

use bytes::Bytes;
use std::sync::Arc;
use tably_storage::{Actor, Commit, MemoryRefStore, MemoryStore, ObjectStore, RefStore, Sum, Table};

pub struct Repo {
    store: Arc<MemoryStore>,
    refs: Arc<MemoryRefStore>,
    pub actor: Actor,
}

impl Repo {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            refs: Arc::new(MemoryRefStore::new()),
            actor: Actor::new("Client", "client@example.com"),
        }
    }

    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn refs(&self) -> Arc<dyn RefStore> {
        self.refs.clone()
    }

    /// Adds a commit with a one-block table.
    pub fn commit(&mut self, name: &str, parents: &[Sum], time: i64) -> Sum {
        let block = self
            .store
            .save_block(Bytes::from(format!("{time},{name}\n")))
            .unwrap();
        let table = self
            .store
            .save_table(&Table {
                columns: vec!["id".to_string(), "name".to_string()],
                primary_key: vec![0],
                rows_count: 1,
                blocks: vec![block],
            })
            .unwrap();
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

    /// Sum of a root commit that only exists in a throwaway repository.
    pub fn commit_sum(mut self, name: &str, time: i64) -> Sum {
        self.commit(name, &[], time)
    }

    pub fn set_ref(&self, name: &str, sum: Sum) {
        let current = self.refs.get(name).unwrap();
        assert!(self.refs.compare_and_swap(name, current, sum).unwrap());
    }
}

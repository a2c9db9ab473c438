//! Shared fixtures for node integration tests.

#![allow(dead_code)]

use axum::Router;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tably_node::api::{create_router, AppState};
use tably_node::config::TransferConfig;
use tably_storage::{
    Actor, Commit, MemoryRefStore, MemoryStore, ObjectStore, ObjectType, RefStore, Sum, Table,
};

/// An in-memory repository.
#[derive(Clone)]
pub struct Repo {
    pub store: Arc<MemoryStore>,
    pub refs: Arc<MemoryRefStore>,
}

impl Repo {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            refs: Arc::new(MemoryRefStore::new()),
        }
    }

    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn ref_store(&self) -> Arc<dyn RefStore> {
        self.refs.clone()
    }

    /// Adds a commit whose table holds one block named after it.
    pub fn commit(&self, name: &str, parents: &[Sum], time: i64) -> Sum {
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

    /// Copies a commit with its table and blocks into `other`.
    pub fn copy_commit(&self, sum: &Sum, other: &Repo) {
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

    pub fn set_ref(&self, name: &str, sum: Sum) {
        let current = self.refs.get(name).unwrap();
        assert!(self.refs.compare_and_swap(name, current, sum).unwrap());
    }

    pub fn get_ref(&self, name: &str) -> Option<Sum> {
        self.refs.get(name).unwrap()
    }

    pub fn has_commit(&self, sum: &Sum) -> bool {
        self.store.exist(ObjectType::Commit, sum).unwrap()
    }
}

/// Node state over `repo` with the given transfer settings.
pub fn state(repo: &Repo, transfer: &TransferConfig) -> AppState {
    AppState::new(
        repo.objects(),
        repo.ref_store(),
        transfer,
        Actor::new("Origin", "origin@example.com"),
    )
}

pub fn router(repo: &Repo, transfer: &TransferConfig) -> (Router, AppState) {
    let state = state(repo, transfer);
    (create_router(state.clone()), state)
}

/// Serves `repo` on a loopback port.
pub async fn serve(repo: &Repo, transfer: &TransferConfig) -> (SocketAddr, AppState) {
    let (app, state) = router(repo, transfer);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

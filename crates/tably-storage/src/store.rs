//! Content-addressed object storage.

use crate::{Commit, ObjectType, Result, StorageError, Sum, Table};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for object storage backends.
///
/// Objects are immutable and keyed by their type and content sum, so
/// writes are idempotent and safe under concurrent writers.
pub trait ObjectStore: Send + Sync {
    /// Retrieves the encoded object, if present.
    fn get(&self, object_type: ObjectType, sum: &Sum) -> Result<Option<Bytes>>;

    /// Stores an encoded object under its sum.
    fn put(&self, object_type: ObjectType, sum: &Sum, data: Bytes) -> Result<()>;

    /// Checks if an object exists.
    fn exist(&self, object_type: ObjectType, sum: &Sum) -> Result<bool>;

    /// Loads and decodes a commit.
    fn get_commit(&self, sum: &Sum) -> Result<Commit> {
        let data = self
            .get(ObjectType::Commit, sum)?
            .ok_or_else(|| not_found(ObjectType::Commit, sum))?;
        Commit::decode(&data)
    }

    /// Encodes and stores a commit, returning its sum.
    fn save_commit(&self, commit: &Commit) -> Result<Sum> {
        let data = commit.encode();
        let sum = Sum::compute(&data);
        self.put(ObjectType::Commit, &sum, data)?;
        Ok(sum)
    }

    /// Loads and decodes a table.
    fn get_table(&self, sum: &Sum) -> Result<Table> {
        let data = self
            .get(ObjectType::Table, sum)?
            .ok_or_else(|| not_found(ObjectType::Table, sum))?;
        Table::decode(&data)
    }

    /// Encodes and stores a table, returning its sum.
    fn save_table(&self, table: &Table) -> Result<Sum> {
        let data = table.encode();
        let sum = Sum::compute(&data);
        self.put(ObjectType::Table, &sum, data)?;
        Ok(sum)
    }

    /// Loads a block.
    fn get_block(&self, sum: &Sum) -> Result<Bytes> {
        self.get(ObjectType::Block, sum)?
            .ok_or_else(|| not_found(ObjectType::Block, sum))
    }

    /// Stores a block, returning its sum.
    fn save_block(&self, data: Bytes) -> Result<Sum> {
        let sum = Sum::compute(&data);
        self.put(ObjectType::Block, &sum, data)?;
        Ok(sum)
    }

    /// Stores raw object bytes as received from a peer, recomputing the sum.
    fn save_raw(&self, object_type: ObjectType, data: Bytes) -> Result<Sum> {
        match object_type {
            ObjectType::Commit => {
                Commit::decode(&data)?;
            }
            ObjectType::Table => {
                Table::decode(&data)?;
            }
            ObjectType::Block => {}
        }
        let sum = Sum::compute(&data);
        self.put(object_type, &sum, data)?;
        Ok(sum)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn get(&self, object_type: ObjectType, sum: &Sum) -> Result<Option<Bytes>> {
        (**self).get(object_type, sum)
    }

    fn put(&self, object_type: ObjectType, sum: &Sum, data: Bytes) -> Result<()> {
        (**self).put(object_type, sum, data)
    }

    fn exist(&self, object_type: ObjectType, sum: &Sum) -> Result<bool> {
        (**self).exist(object_type, sum)
    }
}

pub(crate) fn not_found(object_type: ObjectType, sum: &Sum) -> StorageError {
    StorageError::NotFound {
        kind: object_type.as_str(),
        sum: sum.to_hex(),
    }
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<(ObjectType, Sum), Bytes>>,
}

impl MemoryStore {
    /// Creates a new empty object store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of objects in the store.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Returns the number of objects of one type.
    pub fn count(&self, object_type: ObjectType) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|(ty, _)| *ty == object_type)
            .count()
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, object_type: ObjectType, sum: &Sum) -> Result<Option<Bytes>> {
        Ok(self.objects.read().get(&(object_type, *sum)).cloned())
    }

    fn put(&self, object_type: ObjectType, sum: &Sum, data: Bytes) -> Result<()> {
        self.objects.write().insert((object_type, *sum), data);
        Ok(())
    }

    fn exist(&self, object_type: ObjectType, sum: &Sum) -> Result<bool> {
        Ok(self.objects.read().contains_key(&(object_type, *sum)))
    }
}

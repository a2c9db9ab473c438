//! RocksDB persistent storage backend.
//!
//! Objects live in one column family per object type. Refs are mutated
//! through optimistic transactions so that compare-and-swap is decided by
//! the engine rather than by an in-process lock.

use crate::{ObjectStore, ObjectType, RefStore, Reflog, Result, StorageError, Sum};
use bytes::Bytes;
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, ErrorKind, OptimisticTransactionDB,
    Options,
};
use std::path::{Path, PathBuf};

/// RocksDB storage configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Number of background compaction threads.
    pub background_jobs: i32,

    /// Enable LZ4 compression.
    pub compression_enabled: bool,

    /// Bloom filter bits per key (0 to disable).
    pub bloom_filter_bits: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/rocksdb"),
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
            background_jobs: 4,
            compression_enabled: true,
            bloom_filter_bits: 10,
        }
    }
}

const CF_COMMITS: &str = "commits";
const CF_TABLES: &str = "tables";
const CF_BLOCKS: &str = "blocks";
const CF_REFS: &str = "refs";
const CF_REFLOG: &str = "reflog";

/// RocksDB-backed object and reference store.
pub struct RocksDbStore {
    db: OptimisticTransactionDB,
}

fn backend_err(e: rocksdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl RocksDbStore {
    /// Opens or creates a RocksDB database.
    pub fn open(config: RocksDbConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.increase_parallelism(config.background_jobs);
        opts.set_max_background_jobs(config.background_jobs);

        if config.compression_enabled {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let mut block_opts = BlockBasedOptions::default();
        if config.bloom_filter_bits > 0 {
            block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        }
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        let cfs = [CF_COMMITS, CF_TABLES, CF_BLOCKS, CF_REFS, CF_REFLOG]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, opts.clone()));

        let db = OptimisticTransactionDB::open_cf_descriptors(&opts, &config.path, cfs)
            .map_err(backend_err)?;

        tracing::info!(path = %config.path.display(), "Opened RocksDB store");
        Ok(Self { db })
    }

    /// Opens with default configuration.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Backend(format!("missing column family: {}", name)))
    }

    fn object_cf(&self, object_type: ObjectType) -> Result<&ColumnFamily> {
        self.cf(match object_type {
            ObjectType::Commit => CF_COMMITS,
            ObjectType::Table => CF_TABLES,
            ObjectType::Block => CF_BLOCKS,
        })
    }
}

impl ObjectStore for RocksDbStore {
    fn get(&self, object_type: ObjectType, sum: &Sum) -> Result<Option<Bytes>> {
        let cf = self.object_cf(object_type)?;
        Ok(self
            .db
            .get_cf(cf, sum.as_bytes())
            .map_err(backend_err)?
            .map(Bytes::from))
    }

    fn put(&self, object_type: ObjectType, sum: &Sum, data: Bytes) -> Result<()> {
        let cf = self.object_cf(object_type)?;
        self.db
            .put_cf(cf, sum.as_bytes(), &data)
            .map_err(backend_err)
    }

    fn exist(&self, object_type: ObjectType, sum: &Sum) -> Result<bool> {
        let cf = self.object_cf(object_type)?;
        self.db
            .get_pinned_cf(cf, sum.as_bytes())
            .map(|opt| opt.is_some())
            .map_err(backend_err)
    }
}

impl RefStore for RocksDbStore {
    fn get(&self, name: &str) -> Result<Option<Sum>> {
        let cf = self.cf(CF_REFS)?;
        match self.db.get_cf(cf, name.as_bytes()).map_err(backend_err)? {
            Some(data) => Ok(Some(Sum::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn compare_and_swap(&self, name: &str, expected: Option<Sum>, new: Sum) -> Result<bool> {
        let cf = self.cf(CF_REFS)?;
        let txn = self.db.transaction();
        let current = txn
            .get_for_update_cf(cf, name.as_bytes(), true)
            .map_err(backend_err)?
            .map(|data| Sum::from_slice(&data))
            .transpose()?;
        if current != expected {
            return Ok(false);
        }
        txn.put_cf(cf, name.as_bytes(), new.as_bytes())
            .map_err(backend_err)?;
        match txn.commit() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::Busy || e.kind() == ErrorKind::TryAgain => {
                tracing::debug!(name = %name, "Ref compare-and-swap lost to a concurrent writer");
                Ok(false)
            }
            Err(e) => Err(backend_err(e)),
        }
    }

    fn compare_and_delete(&self, name: &str, expected: Sum) -> Result<bool> {
        let cf = self.cf(CF_REFS)?;
        let txn = self.db.transaction();
        let current = txn
            .get_for_update_cf(cf, name.as_bytes(), true)
            .map_err(backend_err)?
            .map(|data| Sum::from_slice(&data))
            .transpose()?;
        if current != Some(expected) {
            return Ok(false);
        }
        txn.delete_cf(cf, name.as_bytes()).map_err(backend_err)?;
        match txn.commit() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::Busy || e.kind() == ErrorKind::TryAgain => {
                tracing::debug!(name = %name, "Ref delete lost to a concurrent writer");
                Ok(false)
            }
            Err(e) => Err(backend_err(e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, Sum)>> {
        let cf = self.cf(CF_REFS)?;
        let mut refs = Vec::new();
        for item in self.db.prefix_iterator_cf(cf, prefix.as_bytes()) {
            let (key, value) = item.map_err(backend_err)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::Backend(format!("invalid ref name: {}", e)))?;
            refs.push((name, Sum::from_slice(&value)?));
        }
        Ok(refs)
    }

    fn append_reflog(&self, name: &str, entry: Reflog) -> Result<()> {
        let cf = self.cf(CF_REFLOG)?;
        loop {
            let txn = self.db.transaction();
            let mut entries: Vec<Reflog> = match txn
                .get_for_update_cf(cf, name.as_bytes(), true)
                .map_err(backend_err)?
            {
                Some(data) => serde_json::from_slice(&data)
                    .map_err(|e| StorageError::Backend(format!("corrupt reflog: {}", e)))?,
                None => Vec::new(),
            };
            entries.push(entry.clone());
            let data = serde_json::to_vec(&entries)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            txn.put_cf(cf, name.as_bytes(), data).map_err(backend_err)?;
            match txn.commit() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Busy || e.kind() == ErrorKind::TryAgain => {
                    continue
                }
                Err(e) => return Err(backend_err(e)),
            }
        }
    }

    fn reflog(&self, name: &str) -> Result<Vec<Reflog>> {
        let cf = self.cf(CF_REFLOG)?;
        match self.db.get_cf(cf, name.as_bytes()).map_err(backend_err)? {
            Some(data) => serde_json::from_slice(&data)
                .map_err(|e| StorageError::Backend(format!("corrupt reflog: {}", e))),
            None => Ok(Vec::new()),
        }
    }
}

//! RocksDB-backed persistent message storage.
//!
//! ## Storage Layout
//!
//! Uses column families for logical separation:
//! - `messages`: `id_be(8)` -> bincode-serialized Message
//! - `children`: `parent_be(8) + created_at_be(8) + id_be(8)` -> `id_be(8)`
//! - `meta`: id allocation counter
//!
//! The `children` index encodes the parent id first (with `0` standing in
//! for "no parent"), so one prefix scan yields the ordered sibling set: keys
//! under a shared parent sort by `created_at`, then by `id` for timestamp
//! ties. This is the equality-filter-on-parent the store layer needs, with
//! the ordering baked into the key encoding.
//!
//! Record and index writes always travel in one `WriteBatch`, so the two
//! column families can never disagree about which messages exist.

use crate::error::{Result, StoreError};
use crate::message::{Message, MessageId};
use crate::storage::MessageBackend;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatch,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Column family names.
const CF_MESSAGES: &str = "messages";
const CF_CHILDREN: &str = "children";
const CF_META: &str = "meta";

/// Key for the id allocation counter in the meta column family.
const META_NEXT_ID: &[u8] = b"next_id";

/// Parent encoding for top-level messages in child-index keys.
///
/// Real ids start at 1, so the zero prefix can never collide with an
/// allocated parent.
const ROOT_PARENT: u64 = 0;

/// Configuration for RocksDB storage.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Maximum number of open files.
    pub max_open_files: i32,
    /// Number of log files to keep.
    pub keep_log_file_num: usize,
    /// Maximum WAL size in bytes.
    pub max_wal_size: u64,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum number of write buffers.
    pub max_write_buffer_number: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            max_open_files: 128,
            keep_log_file_num: 2,
            max_wal_size: 32 * 1024 * 1024,      // 32MB
            write_buffer_size: 32 * 1024 * 1024, // 32MB
            max_write_buffer_number: 2,
        }
    }
}

impl RocksDbConfig {
    /// Builds RocksDB Options from this configuration.
    pub fn build_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(self.keep_log_file_num);
        opts.set_max_total_wal_size(self.max_wal_size);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }
}

/// RocksDB-backed message backend.
pub struct RocksBackend {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    next_id: AtomicU64,
}

impl RocksBackend {
    /// Opens (creating if necessary) a message database at the given path
    /// with the default configuration.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(db_path, &RocksDbConfig::default())
    }

    /// Opens a message database with a custom configuration.
    pub fn open_with_config(db_path: impl AsRef<Path>, config: &RocksDbConfig) -> Result<Self> {
        let opts = config.build_options();
        let cf_opts = Options::default();

        let cf_descriptors: Vec<_> = [CF_MESSAGES, CF_CHILDREN, CF_META]
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(*cf, cf_opts.clone()))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            db_path.as_ref(),
            cf_descriptors,
        )
        .map_err(|e| StoreError::storage(format!("Failed to open RocksDB: {}", e)))?;

        let backend = Self {
            db: Arc::new(db),
            next_id: AtomicU64::new(MessageId::FIRST.as_u64()),
        };

        // Restore the allocation counter so deleted ids stay dead across
        // restarts.
        if let Some(bytes) = backend.get_raw(CF_META, META_NEXT_ID)? {
            let stored = u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::storage("Corrupt id counter in meta"))?,
            );
            backend.next_id.store(stored, Ordering::SeqCst);
        }

        info!(
            path = %db_path.as_ref().display(),
            next_id = backend.next_id.load(Ordering::SeqCst),
            "Opened message RocksDB"
        );

        Ok(backend)
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::storage(format!("Column family '{}' not found", name)))
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::storage(format!("Failed to read: {}", e)))
    }

    /// Parent field encoding used in child-index keys.
    fn parent_raw(parent: Option<MessageId>) -> u64 {
        parent.map_or(ROOT_PARENT, MessageId::as_u64)
    }

    /// Index key: `parent_be(8) + created_at_be(8) + id_be(8)` (24 bytes).
    ///
    /// Non-inverted timestamps: oldest sibling first, chronological reading
    /// order.
    fn child_index_key(parent: Option<MessageId>, created_at: u64, id: MessageId) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(&Self::parent_raw(parent).to_be_bytes());
        key.extend_from_slice(&created_at.to_be_bytes());
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    /// Prefix covering all child-index entries of one parent.
    fn child_index_prefix(parent: Option<MessageId>) -> [u8; 8] {
        Self::parent_raw(parent).to_be_bytes()
    }

    fn decode_message(bytes: &[u8]) -> Result<Message> {
        bincode::deserialize(bytes)
            .map_err(|e| StoreError::serialization(format!("Failed to deserialize: {}", e)))
    }

    /// Iterates child-index entries under `prefix`, in key order.
    ///
    /// The callback receives the indexed message id and returns true to
    /// continue or false to stop.
    fn child_index_iterate<F>(&self, prefix: &[u8], mut callback: F) -> Result<()>
    where
        F: FnMut(MessageId) -> bool,
    {
        let cf = self.cf(CF_CHILDREN)?;
        let mut iter = self.db.raw_iterator_cf(&cf);
        iter.seek(prefix);

        while iter.valid() {
            let Some(key) = iter.key() else { break };
            if !key.starts_with(prefix) {
                break;
            }
            let Some(value) = iter.value() else { break };
            let id_bytes: [u8; 8] = value
                .try_into()
                .map_err(|_| StoreError::storage("Corrupt child-index entry"))?;
            if !callback(MessageId::from_be_bytes(id_bytes)) {
                break;
            }
            iter.next();
        }
        iter.status()
            .map_err(|e| StoreError::storage(format!("Iterator error: {}", e)))
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::storage(format!("Failed to commit batch: {}", e)))
    }
}

impl MessageBackend for RocksBackend {
    fn next_id(&self) -> Result<MessageId> {
        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        // Persist before handing the id out so a crash here wastes an id
        // rather than reissuing one.
        let cf = self.cf(CF_META)?;
        self.db
            .put_cf(&cf, META_NEXT_ID, (raw + 1).to_be_bytes())
            .map_err(|e| StoreError::storage(format!("Failed to persist id counter: {}", e)))?;

        trace!(id = raw, "allocated message id");
        Ok(MessageId::from_raw(raw))
    }

    fn get(&self, id: MessageId) -> Result<Option<Message>> {
        match self.get_raw(CF_MESSAGES, &id.to_be_bytes())? {
            Some(bytes) => {
                trace!(id = %id, value_bytes = bytes.len(), "db_get: found record");
                Ok(Some(Self::decode_message(&bytes)?))
            }
            None => {
                trace!(id = %id, "db_get: key not found");
                Ok(None)
            }
        }
    }

    fn insert(&self, message: &Message) -> Result<()> {
        let bytes = bincode::serialize(message)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize: {}", e)))?;

        let messages = self.cf(CF_MESSAGES)?;
        let children = self.cf(CF_CHILDREN)?;

        // Record and index entry land atomically.
        let mut batch = WriteBatch::default();
        batch.put_cf(&messages, message.id.to_be_bytes(), &bytes);
        batch.put_cf(
            &children,
            Self::child_index_key(message.parent_id, message.created_at, message.id),
            message.id.to_be_bytes(),
        );
        self.write_batch(batch)?;

        trace!(
            id = %message.id,
            parent = ?message.parent_id,
            value_bytes = bytes.len(),
            "db_insert: stored message"
        );
        Ok(())
    }

    fn update(&self, message: &Message) -> Result<()> {
        if self.get_raw(CF_MESSAGES, &message.id.to_be_bytes())?.is_none() {
            return Err(StoreError::storage(format!(
                "Update of nonexistent record {}",
                message.id
            )));
        }

        let bytes = bincode::serialize(message)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize: {}", e)))?;
        let cf = self.cf(CF_MESSAGES)?;
        self.db
            .put_cf(&cf, message.id.to_be_bytes(), &bytes)
            .map_err(|e| StoreError::storage(format!("Failed to write: {}", e)))?;

        // parent_id and created_at never change, so the index entry is
        // already correct.
        trace!(id = %message.id, "db_update: rewrote record");
        Ok(())
    }

    fn children_of(&self, parent: Option<MessageId>) -> Result<Vec<Message>> {
        let mut ids = Vec::new();
        self.child_index_iterate(&Self::child_index_prefix(parent), |id| {
            ids.push(id);
            true
        })?;

        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(id)? {
                Some(message) => children.push(message),
                None => {
                    return Err(StoreError::storage(format!(
                        "Child index references missing record {}",
                        id
                    )))
                }
            }
        }

        debug!(
            parent = ?parent,
            records = children.len(),
            "db_children_of: collected ordered children"
        );
        Ok(children)
    }

    fn has_children(&self, parent: MessageId) -> Result<bool> {
        let mut found = false;
        self.child_index_iterate(&Self::child_index_prefix(Some(parent)), |_| {
            found = true;
            false
        })?;
        Ok(found)
    }

    fn remove_many(&self, ids: &[MessageId]) -> Result<()> {
        let messages = self.cf(CF_MESSAGES)?;
        let children = self.cf(CF_CHILDREN)?;

        // One batch, one commit: either the whole set disappears or none of
        // it does.
        let mut batch = WriteBatch::default();
        let mut removed = 0usize;
        for &id in ids {
            let Some(message) = self.get(id)? else {
                continue;
            };
            batch.delete_cf(&messages, id.to_be_bytes());
            batch.delete_cf(
                &children,
                Self::child_index_key(message.parent_id, message.created_at, message.id),
            );
            removed += 1;
        }
        self.write_batch(batch)?;

        debug!(
            requested = ids.len(),
            records_deleted = removed,
            "db_remove_many: committed batch removal"
        );
        Ok(())
    }
}

impl std::fmt::Debug for RocksBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksBackend")
            .field("db", &"RocksDB")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (RocksBackend, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend =
            RocksBackend::open(temp_dir.path().join("messages_db")).expect("Failed to open db");
        (backend, temp_dir)
    }

    fn stored(
        backend: &RocksBackend,
        content: &str,
        created_at: u64,
        parent: Option<MessageId>,
    ) -> Message {
        let message = Message {
            id: backend.next_id().unwrap(),
            content: content.to_string(),
            created_at,
            parent_id: parent,
        };
        backend.insert(&message).unwrap();
        message
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let (backend, _temp) = create_test_backend();
        let message = stored(&backend, "hello", 100, None);

        let loaded = backend.get(message.id).unwrap().unwrap();
        assert_eq!(loaded, message);
    }

    #[test]
    fn test_get_missing_key() {
        let (backend, _temp) = create_test_backend();
        assert!(backend.get(MessageId::from_raw(404)).unwrap().is_none());
    }

    #[test]
    fn test_children_order_by_timestamp_then_id() {
        let (backend, _temp) = create_test_backend();
        let root = stored(&backend, "root", 100, None);

        // Insert out of timestamp order; two replies share a timestamp.
        let late = stored(&backend, "late", 300, Some(root.id));
        let tie_a = stored(&backend, "tie_a", 200, Some(root.id));
        let tie_b = stored(&backend, "tie_b", 200, Some(root.id));

        let children = backend.children_of(Some(root.id)).unwrap();
        assert_eq!(children, vec![tie_a, tie_b, late]);
    }

    #[test]
    fn test_roots_listing_uses_zero_prefix() {
        let (backend, _temp) = create_test_backend();
        let a = stored(&backend, "a", 100, None);
        let b = stored(&backend, "b", 200, None);
        stored(&backend, "reply", 150, Some(a.id));

        let roots = backend.children_of(None).unwrap();
        assert_eq!(roots, vec![a, b]);
    }

    #[test]
    fn test_has_children() {
        let (backend, _temp) = create_test_backend();
        let root = stored(&backend, "root", 100, None);
        assert!(!backend.has_children(root.id).unwrap());

        stored(&backend, "reply", 200, Some(root.id));
        assert!(backend.has_children(root.id).unwrap());
    }

    #[test]
    fn test_update_rewrites_content_only() {
        let (backend, _temp) = create_test_backend();
        let mut message = stored(&backend, "before", 100, None);

        message.content = "after".to_string();
        backend.update(&message).unwrap();

        let loaded = backend.get(message.id).unwrap().unwrap();
        assert_eq!(loaded.content, "after");
        assert_eq!(loaded.created_at, 100);
    }

    #[test]
    fn test_update_missing_record_fails() {
        let (backend, _temp) = create_test_backend();
        let phantom = Message {
            id: MessageId::from_raw(9),
            content: "ghost".to_string(),
            created_at: 0,
            parent_id: None,
        };
        assert!(matches!(
            backend.update(&phantom),
            Err(StoreError::Storage(_))
        ));
    }

    #[test]
    fn test_remove_many_clears_records_and_index() {
        let (backend, _temp) = create_test_backend();
        let root = stored(&backend, "root", 100, None);
        let reply = stored(&backend, "reply", 200, Some(root.id));
        let other = stored(&backend, "other", 300, None);

        backend.remove_many(&[root.id, reply.id]).unwrap();

        assert!(backend.get(root.id).unwrap().is_none());
        assert!(backend.get(reply.id).unwrap().is_none());
        assert!(!backend.has_children(root.id).unwrap());
        assert_eq!(backend.children_of(None).unwrap(), vec![other]);
    }

    #[test]
    fn test_remove_many_ignores_unknown_ids() {
        let (backend, _temp) = create_test_backend();
        let message = stored(&backend, "keep", 100, None);

        backend
            .remove_many(&[MessageId::from_raw(777), message.id])
            .unwrap();
        assert!(backend.get(message.id).unwrap().is_none());
    }

    #[test]
    fn test_id_counter_survives_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("messages_db");

        let first_id = {
            let backend = RocksBackend::open(&db_path).expect("Failed to open db");
            let message = stored(&backend, "first", 100, None);
            backend.remove_many(&[message.id]).unwrap();
            message.id
        };

        let backend = RocksBackend::open(&db_path).expect("Failed to reopen db");
        let next = backend.next_id().unwrap();
        assert!(next > first_id);
    }
}

//! In-memory backend backed by a `HashMap`.
//!
//! The reference implementation of [`MessageBackend`]: children are a derived
//! view computed by filter + sort on every read, never stored state. Useful
//! for tests and as the behavior the persistent backend must reproduce.

use crate::error::{Result, StoreError};
use crate::message::{Message, MessageId};
use crate::storage::MessageBackend;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// An in-memory message backend.
#[derive(Debug)]
pub struct MemoryBackend {
    records: RwLock<HashMap<MessageId, Message>>,
    next_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(MessageId::FIRST.as_u64()),
        }
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBackend for MemoryBackend {
    fn next_id(&self) -> Result<MessageId> {
        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageId::from_raw(raw))
    }

    fn get(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    fn insert(&self, message: &Message) -> Result<()> {
        self.records
            .write()
            .unwrap()
            .insert(message.id, message.clone());
        Ok(())
    }

    fn update(&self, message: &Message) -> Result<()> {
        let mut records = self.records.write().unwrap();
        match records.get_mut(&message.id) {
            Some(existing) => {
                *existing = message.clone();
                Ok(())
            }
            None => Err(StoreError::storage(format!(
                "Update of nonexistent record {}",
                message.id
            ))),
        }
    }

    fn children_of(&self, parent: Option<MessageId>) -> Result<Vec<Message>> {
        let records = self.records.read().unwrap();
        let mut children: Vec<Message> = records
            .values()
            .filter(|m| m.parent_id == parent)
            .cloned()
            .collect();
        children.sort_by_key(Message::sort_key);
        Ok(children)
    }

    fn has_children(&self, parent: MessageId) -> Result<bool> {
        let records = self.records.read().unwrap();
        Ok(records.values().any(|m| m.parent_id == Some(parent)))
    }

    fn remove_many(&self, ids: &[MessageId]) -> Result<()> {
        // Single write-lock acquisition makes the removal all-or-nothing
        // relative to other backend calls.
        let mut records = self.records.write().unwrap();
        for id in ids {
            records.remove(id);
        }
        Ok(())
    }
}

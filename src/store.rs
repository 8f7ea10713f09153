//! The thread store: single authority over message existence, parentage, and
//! structural deletion rules.
//!
//! Every message enters the forest through [`ThreadStore::add_message`],
//! which validates the parent before insertion — children cannot be created
//! before parents, so following parent links always terminates at a root and
//! no cycle can ever form. Parent links are immutable after creation; there
//! is no re-parenting operation.
//!
//! ## Concurrency
//!
//! The backend sits behind a `std::sync::RwLock`. Readers share the lock and
//! observe fully applied state; mutations hold it exclusively, so
//! parent-check-then-insert and collect-then-remove each execute as one
//! indivisible step relative to every other call. No reader can see a
//! half-deleted subtree, and no insert can attach a child under a node whose
//! subtree is being removed.

use crate::error::{Result, StoreError};
use crate::message::{
    current_timestamp_millis, validate_content, Message, MessageId, MessageTree,
    MessageWithReplies,
};
use crate::storage::MessageBackend;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// Outcome of a delete request.
///
/// Deliberately a tri-state rather than a boolean: "nothing there" and
/// "blocked by policy" require different caller responses, and neither is a
/// store failure. `Err(StoreError)` is reserved for invalid input and
/// backend faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The message (and, under cascade, its whole subtree) was removed.
    Deleted,
    /// No message with the requested id exists; nothing changed.
    NotFound,
    /// The message has at least one reply and cascade was not requested;
    /// nothing changed. Retry with `cascade = true` to remove the subtree.
    RefusedHasDependents,
}

/// A threaded message store over a pluggable persistence backend.
pub struct ThreadStore<B> {
    backend: RwLock<B>,
}

impl<B: MessageBackend> ThreadStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: RwLock::new(backend),
        }
    }

    /// Consumes the store and returns the backend.
    pub fn into_backend(self) -> B {
        self.backend.into_inner().unwrap()
    }

    /// Lists all top-level messages with their full reply subtrees attached,
    /// in sibling order. An empty store yields an empty list.
    pub fn list_roots(&self) -> Result<Vec<MessageTree>> {
        let backend = self.backend.read().unwrap();
        let roots = backend.children_of(None)?;

        let mut trees = Vec::with_capacity(roots.len());
        for root in roots {
            trees.push(assemble_subtree(&*backend, root)?);
        }

        debug!(roots = trees.len(), "list_roots: assembled forest");
        Ok(trees)
    }

    /// Returns the message with the given id together with its ordered
    /// direct replies. Grandchildren are not expanded.
    ///
    /// # Errors
    /// Returns `NotFound` if no such message exists.
    pub fn get(&self, id: MessageId) -> Result<MessageWithReplies> {
        let backend = self.backend.read().unwrap();
        let message = backend.get(id)?.ok_or(StoreError::NotFound(id))?;
        let replies = backend.children_of(Some(id))?;
        Ok(MessageWithReplies { message, replies })
    }

    /// Returns the message with the given id with its full descendant tree
    /// expanded recursively.
    ///
    /// # Errors
    /// Returns `NotFound` if no such message exists.
    pub fn get_subtree(&self, id: MessageId) -> Result<MessageTree> {
        let backend = self.backend.read().unwrap();
        let message = backend.get(id)?.ok_or(StoreError::NotFound(id))?;
        assemble_subtree(&*backend, message)
    }

    /// Lists the ordered direct replies of the given message.
    ///
    /// Existence is checked before listing, so a missing parent is
    /// distinguishable from a parent with no replies.
    ///
    /// # Errors
    /// Returns `NotFound` if the id does not reference an existing message.
    pub fn direct_replies(&self, id: MessageId) -> Result<Vec<Message>> {
        let backend = self.backend.read().unwrap();
        if backend.get(id)?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        backend.children_of(Some(id))
    }

    /// Adds a new message, as a root (`parent_id == None`) or as a reply.
    ///
    /// The store assigns the id and the creation timestamp; there is no way
    /// for a caller to supply either.
    ///
    /// # Errors
    /// - `InvalidArgument` if the content is empty or oversized
    /// - `NotFound` if `parent_id` does not reference an existing message
    pub fn add_message(
        &self,
        content: impl Into<String>,
        parent_id: Option<MessageId>,
    ) -> Result<Message> {
        let content = content.into();
        validate_content(&content)?;

        let backend = self.backend.write().unwrap();

        // Parent check and insert happen under the same exclusive guard, so
        // a concurrent cascade cannot slip between them.
        if let Some(parent) = parent_id {
            if backend.get(parent)?.is_none() {
                return Err(StoreError::NotFound(parent));
            }
        }

        let message = Message {
            id: backend.next_id()?,
            content,
            created_at: current_timestamp_millis(),
            parent_id,
        };
        backend.insert(&message)?;

        info!(id = %message.id, parent = ?parent_id, "added message");
        Ok(message)
    }

    /// Replaces the content of an existing message. `created_at` and
    /// `parent_id` are left untouched.
    ///
    /// # Errors
    /// - `InvalidArgument` if the new content is empty or oversized
    /// - `NotFound` if the id is unknown
    pub fn update_content(
        &self,
        id: MessageId,
        new_content: impl Into<String>,
    ) -> Result<Message> {
        let new_content = new_content.into();
        validate_content(&new_content)?;

        let backend = self.backend.write().unwrap();
        let mut message = backend.get(id)?.ok_or(StoreError::NotFound(id))?;
        message.content = new_content;
        backend.update(&message)?;

        debug!(id = %id, "updated message content");
        Ok(message)
    }

    /// Deletes a message, applying the dependents policy.
    ///
    /// - unknown id: [`DeleteOutcome::NotFound`], no change
    /// - has replies, `cascade == false`: [`DeleteOutcome::RefusedHasDependents`],
    ///   no change — the caller decides whether to retry with cascade
    /// - has replies, `cascade == true`: the message and every descendant are
    ///   removed as one atomic unit
    /// - leaf: removed regardless of the flag
    ///
    /// # Errors
    /// Only backend failures surface as `Err`; all three policy outcomes are
    /// `Ok`.
    pub fn delete(&self, id: MessageId, cascade: bool) -> Result<DeleteOutcome> {
        let backend = self.backend.write().unwrap();

        if backend.get(id)?.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }

        if backend.has_children(id)? && !cascade {
            debug!(id = %id, "delete refused: message has replies");
            return Ok(DeleteOutcome::RefusedHasDependents);
        }

        let doomed = collect_subtree_ids(&*backend, id)?;
        backend.remove_many(&doomed)?;

        info!(id = %id, records_deleted = doomed.len(), cascade, "deleted message subtree");
        Ok(DeleteOutcome::Deleted)
    }
}

impl<B: MessageBackend> std::fmt::Debug for ThreadStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore").finish_non_exhaustive()
    }
}

/// Collects `id` plus every descendant id, breadth-first.
///
/// Explicit work-list: reply chains can be pathologically deep, and callers
/// must not pay for that in stack frames.
fn collect_subtree_ids<B: MessageBackend>(backend: &B, id: MessageId) -> Result<Vec<MessageId>> {
    let mut ids = vec![id];
    let mut cursor = 0;
    while cursor < ids.len() {
        for child in backend.children_of(Some(ids[cursor]))? {
            ids.push(child.id);
        }
        cursor += 1;
    }
    Ok(ids)
}

/// Expands a message into its full reply tree without call recursion.
///
/// First pass: breadth-first collection of every descendant and the ordered
/// child-id list per node. Second pass: walk the collection order backwards,
/// so every node's reply trees are complete before the node itself is built.
fn assemble_subtree<B: MessageBackend>(backend: &B, root: Message) -> Result<MessageTree> {
    let root_id = root.id;

    let mut order: Vec<MessageId> = Vec::new();
    let mut records: HashMap<MessageId, Message> = HashMap::new();
    let mut child_ids: HashMap<MessageId, Vec<MessageId>> = HashMap::new();

    records.insert(root.id, root);
    let mut queue = std::collections::VecDeque::from([root_id]);
    while let Some(id) = queue.pop_front() {
        order.push(id);
        let children = backend.children_of(Some(id))?;
        let ids: Vec<MessageId> = children.iter().map(|m| m.id).collect();
        for child in children {
            queue.push_back(child.id);
            records.insert(child.id, child);
        }
        child_ids.insert(id, ids);
    }

    let mut built: HashMap<MessageId, MessageTree> = HashMap::new();
    for id in order.iter().rev() {
        let mut replies = Vec::new();
        if let Some(ids) = child_ids.get(id) {
            for child_id in ids {
                let subtree = built
                    .remove(child_id)
                    .ok_or_else(|| StoreError::storage("Subtree assembly lost a node"))?;
                replies.push(subtree);
            }
        }
        let message = records
            .remove(id)
            .ok_or_else(|| StoreError::storage("Subtree assembly lost a record"))?;
        built.insert(*id, MessageTree { message, replies });
    }

    built
        .remove(&root_id)
        .ok_or_else(|| StoreError::storage("Subtree assembly lost the root"))
}

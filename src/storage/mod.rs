//! Persistence backends for the message forest.
//!
//! The store core is backend-agnostic: anything that can allocate unique ids,
//! look records up by id, filter by the parent-reference field, and remove a
//! set of records atomically can sit underneath it.
//!
//! ## Backends
//!
//! - [`MemoryBackend`]: `HashMap`-based, the reference implementation and the
//!   default for tests
//! - [`RocksBackend`]: persistent RocksDB storage with an ordered child index

pub mod memory;
pub mod rocks;

pub use memory::MemoryBackend;
pub use rocks::{RocksBackend, RocksDbConfig};

use crate::error::Result;
use crate::message::{Message, MessageId};

/// Storage contract for the thread store.
///
/// All methods take `&self` to support backends with internal locking
/// (RocksDB, `RwLock`-guarded maps). Implementations do not enforce tree
/// policy — parent existence, delete gating, and ordering semantics beyond
/// the `children_of` contract live in the store layer.
pub trait MessageBackend: Send + Sync {
    /// Allocates a fresh message id.
    ///
    /// Ids are unique for the lifetime of the backing data and are never
    /// reused, even after deletion.
    fn next_id(&self) -> Result<MessageId>;

    /// Point lookup by id. A just-inserted record must be visible.
    fn get(&self, id: MessageId) -> Result<Option<Message>>;

    /// Stores a new message record.
    fn insert(&self, message: &Message) -> Result<()>;

    /// Rewrites an existing record in place.
    ///
    /// Only `content` ever changes; `created_at` and `parent_id` are
    /// immutable, so child-index entries stay valid across updates.
    fn update(&self, message: &Message) -> Result<()>;

    /// Lists the messages whose `parent_id` equals `parent`, in sibling
    /// order (`created_at` ascending, then id ascending).
    ///
    /// `None` lists the top-level (root) messages.
    fn children_of(&self, parent: Option<MessageId>) -> Result<Vec<Message>>;

    /// Returns true if at least one message has `parent` as its parent.
    fn has_children(&self, parent: MessageId) -> Result<bool>;

    /// Removes the given records as one atomic unit.
    ///
    /// Either every id is removed or, on failure, none are. Unknown ids are
    /// ignored.
    fn remove_many(&self, ids: &[MessageId]) -> Result<()>;
}

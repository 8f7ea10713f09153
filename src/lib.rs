//! # Threadstore - Threaded Message Store
//!
//! A store for threaded message collections: each message is either a
//! top-level post or a reply to exactly one other message, and replies can
//! themselves be replied to, forming a forest of rooted trees of unbounded
//! depth.
//!
//! ## Features
//!
//! - **Forest invariant by construction**: a reply's parent must already
//!   exist, and parent links are immutable, so no cycle can ever form
//! - **Deterministic sibling order**: `created_at` ascending with id
//!   tie-break, recomputed from the flat message set on every query
//! - **Cascade-aware deletion**: deleting a message with replies is refused
//!   unless cascade is requested, and a cascade removes the whole subtree as
//!   one atomic unit — never a silent orphan, never silent data loss
//! - **Pluggable persistence**: an in-memory backend and a RocksDB backend
//!   behind one trait
//!
//! ## Example
//!
//! ```
//! use threadstore::{DeleteOutcome, MemoryBackend, ThreadStore};
//!
//! # fn main() -> threadstore::Result<()> {
//! let store = ThreadStore::new(MemoryBackend::new());
//!
//! let root = store.add_message("hello", None)?;
//! let reply = store.add_message("hi there", Some(root.id))?;
//!
//! // A message with replies refuses plain deletion...
//! assert_eq!(store.delete(root.id, false)?, DeleteOutcome::RefusedHasDependents);
//! // ...but cascade removes the whole subtree atomically.
//! assert_eq!(store.delete(root.id, true)?, DeleteOutcome::Deleted);
//! assert!(store.get(reply.id).is_err());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod message;
pub mod storage;
pub mod store;

pub use error::{Result, StoreError};
pub use message::{
    Message, MessageId, MessageTree, MessageWithReplies, MAX_CONTENT_SIZE,
};
pub use storage::{MemoryBackend, MessageBackend, RocksBackend, RocksDbConfig};
pub use store::{DeleteOutcome, ThreadStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

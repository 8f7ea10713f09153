//! Message model for the threaded store.
//!
//! A message is either a top-level (root) message or a reply to exactly one
//! other message. Replies can themselves be replied to, so the full
//! collection forms a forest of rooted trees of unbounded depth.
//!
//! The parent link is the only stored relationship. "Replies of M" is always
//! a derived view recomputed from the flat message set, never a stored
//! back-pointer collection.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum message content size (100 KB).
pub const MAX_CONTENT_SIZE: usize = 100 * 1024;

/// Unique identifier of a stored message.
///
/// Ids are assigned by the storage backend, strictly increasing, and never
/// reused — a deleted id never reappears. The raw value `0` is reserved as
/// the "no parent" sentinel in storage index keys and is never allocated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(u64);

impl MessageId {
    /// First id handed out by a fresh backend.
    pub const FIRST: MessageId = MessageId(1);

    /// Creates an id from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the big-endian key encoding of this id.
    ///
    /// Big-endian keeps byte order and numeric order aligned, so range scans
    /// over encoded ids iterate in allocation order.
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decodes an id from its big-endian key encoding.
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single stored message.
///
/// Serialized with bincode for persistence. `id`, `created_at`, and
/// `parent_id` are immutable after creation; only `content` has an update
/// path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned unique identifier.
    pub id: MessageId,
    /// Text payload. Non-empty, at most [`MAX_CONTENT_SIZE`] bytes.
    pub content: String,
    /// Store-assigned creation timestamp in milliseconds since Unix epoch.
    pub created_at: u64,
    /// Parent message id, or `None` for a top-level message.
    pub parent_id: Option<MessageId>,
}

impl Message {
    /// Returns true if this is a top-level message.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Sort key for sibling ordering: `created_at` ascending, ties broken by
    /// `id` ascending for a deterministic total order.
    pub fn sort_key(&self) -> (u64, MessageId) {
        (self.created_at, self.id)
    }
}

/// A message with its ordered direct replies attached.
///
/// This is the one-level view: grandchildren are not expanded. Callers
/// needing deeper levels issue further calls or use the subtree view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWithReplies {
    /// The message itself.
    pub message: Message,
    /// Direct replies in sibling order.
    pub replies: Vec<Message>,
}

/// A message with its full reply subtree expanded recursively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTree {
    /// The message at this node.
    pub message: Message,
    /// Reply subtrees in sibling order.
    pub replies: Vec<MessageTree>,
}

impl MessageTree {
    /// Creates a tree node with no replies.
    pub fn leaf(message: Message) -> Self {
        Self {
            message,
            replies: Vec::new(),
        }
    }

    /// Total number of messages in this subtree, including the node itself.
    pub fn size(&self) -> usize {
        // Explicit work-list; reply chains can be arbitrarily deep.
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.replies.iter());
        }
        count
    }
}

/// Validates message content for create and update operations.
///
/// # Errors
/// Returns `InvalidArgument` if the content is empty or exceeds
/// [`MAX_CONTENT_SIZE`].
pub fn validate_content(content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(StoreError::invalid_argument(
            "Message content cannot be empty",
        ));
    }
    if content.len() > MAX_CONTENT_SIZE {
        return Err(StoreError::invalid_argument(format!(
            "Message content exceeds maximum size of {} bytes",
            MAX_CONTENT_SIZE
        )));
    }
    Ok(())
}

/// Returns the current Unix timestamp in milliseconds.
pub fn current_timestamp_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64, created_at: u64, parent: Option<u64>) -> Message {
        Message {
            id: MessageId::from_raw(id),
            content: "test".to_string(),
            created_at,
            parent_id: parent.map(MessageId::from_raw),
        }
    }

    #[test]
    fn test_id_key_encoding_roundtrip() {
        let id = MessageId::from_raw(0xDEAD_BEEF);
        assert_eq!(MessageId::from_be_bytes(id.to_be_bytes()), id);
    }

    #[test]
    fn test_id_key_encoding_preserves_order() {
        let a = MessageId::from_raw(255);
        let b = MessageId::from_raw(256);
        assert!(a.to_be_bytes() < b.to_be_bytes());
    }

    #[test]
    fn test_sort_key_orders_by_timestamp_then_id() {
        let earlier = message(5, 100, None);
        let later = message(1, 200, None);
        assert!(earlier.sort_key() < later.sort_key());

        // Identical timestamps fall back to id order.
        let first = message(1, 100, None);
        let second = message(2, 100, None);
        assert!(first.sort_key() < second.sort_key());
    }

    #[test]
    fn test_is_root() {
        assert!(message(1, 0, None).is_root());
        assert!(!message(2, 0, Some(1)).is_root());
    }

    #[test]
    fn test_validate_content_empty() {
        assert!(matches!(
            validate_content(""),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_content_too_large() {
        let oversized = "x".repeat(MAX_CONTENT_SIZE + 1);
        assert!(matches!(
            validate_content(&oversized),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_content_at_limit() {
        let max = "x".repeat(MAX_CONTENT_SIZE);
        assert!(validate_content(&max).is_ok());
    }

    #[test]
    fn test_tree_size() {
        let tree = MessageTree {
            message: message(1, 0, None),
            replies: vec![
                MessageTree {
                    message: message(2, 1, Some(1)),
                    replies: vec![MessageTree::leaf(message(4, 2, Some(2)))],
                },
                MessageTree::leaf(message(3, 1, Some(1))),
            ],
        };
        assert_eq!(tree.size(), 4);
    }

    #[test]
    fn test_message_serialization_roundtrip() {
        let original = message(7, 1234, Some(3));
        let bytes = bincode::serialize(&original).expect("Failed to serialize");
        let decoded: Message = bincode::deserialize(&bytes).expect("Failed to deserialize");
        assert_eq!(original, decoded);
    }
}

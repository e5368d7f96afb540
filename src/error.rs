//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine.
///
/// Kinds map directly onto the taxonomy the pager, node codec, tree,
/// cursor, and schema registry are each responsible for reporting.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pager: requested page index does not exist or is out of range
    #[error("page {0} is invalid or out of range")]
    BadPage(PageId),

    /// Pager: the backing store cannot grow to satisfy an allocation
    #[error("out of storage: cannot allocate another page")]
    OutOfStorage,

    /// Pager or node codec: on-disk structure failed a consistency check
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Tree: exact-match lookup or delete target does not exist
    #[error("key not found")]
    KeyNotFound,

    /// Tree: insert target already exists
    #[error("duplicate key")]
    DuplicateKey,

    /// Tree: operation requires at least one entry but the tree is empty
    #[error("tree is empty")]
    EmptyTree,

    /// Registry: duplicate name, unknown table, or column index out of range
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// Registry: record layout exceeds MAX_RECORD_LAYOUT columns or overflows a page
    #[error("layout overflow: {0}")]
    LayoutOverflow(String),

    /// Cursor: operation attempted on a cursor that is not in the required state
    #[error("cursor is not positioned on a valid entry")]
    CursorInvalid,

    /// A programming error such as comparing values of mismatched DataType
    #[error("fault: {0}")]
    Fault(String),
}

impl StorageError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    pub fn schema_conflict(msg: impl Into<String>) -> Self {
        Self::SchemaConflict(msg.into())
    }

    pub fn layout_overflow(msg: impl Into<String>) -> Self {
        Self::LayoutOverflow(msg.into())
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        Self::Fault(msg.into())
    }
}

//! Common types used throughout the storage engine.

mod data_type;
mod page_id;

pub use data_type::{DataType, ValueKind};
pub use page_id::PageId;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Floor on tree viability: a tree whose page size/key size/record size
/// combination cannot fit at least this many entries per node is rejected
/// at creation time rather than silently built unusably small.
pub const MIN_ENTRY_COUNT: usize = 3;

/// Bound on cursor path-stack depth (root-to-leaf frames).
pub const MAX_BTREE_DEPTH: usize = 16;

/// Fixed width, in bytes, of a table or column name in the catalog.
pub const TABLE_NAME_SIZE: usize = 32;
pub const COLUMN_NAME_SIZE: usize = 32;

/// Maximum number of columns (including the key column) a record layout
/// may declare.
pub const MAX_RECORD_LAYOUT: usize = 32;

/// Magic value identifying a valid database file, stored in the page-0
/// header.
pub const FILE_MAGIC: u32 = 0x4250_4C53;

//! Paged B+Tree implementation.
//!
//! This module provides the on-disk B+Tree that supports:
//! - Point lookups (`get`)
//! - Ordered insertion with split-and-propagate (`insert`)
//! - Deletion with rebalance-and-propagate (`delete`)
//! - Ordered range traversal and seeks through a stateful `Cursor`

mod config;
mod cursor;
mod tree;

pub use config::BPlusTreeConfig;
pub use cursor::{Cursor, CursorState};
pub use tree::BPlusTree;
pub(crate) use tree::reachable_pages_from;

//! Tree descriptor computed at creation time.

use crate::error::{Result, StorageError};
use crate::node::{validate_page_capacity, NodeLayout};
use crate::types::{DataType, MIN_ENTRY_COUNT, PAGE_SIZE};

/// Fixed sizing for one tree: key/record widths and the derived node
/// capacities, minimums, and split points. Computed once at
/// `btree_create` and carried verbatim for the tree's lifetime — reusing
/// it across reopen requires the caller to pass the same `key_type` and
/// `record_size` used originally (the schema registry is the source of
/// truth for that pairing).
#[derive(Debug, Clone, Copy)]
pub struct BPlusTreeConfig {
    pub key_type: DataType,
    pub record_size: usize,
    pub leaf_max_keys: usize,
    pub leaf_min_keys: usize,
    pub leaf_split_index: usize,
    pub internal_max_keys: usize,
    pub internal_min_keys: usize,
    pub internal_split_index: usize,
}

impl BPlusTreeConfig {
    pub fn create(key_type: DataType, record_size: usize) -> Result<Self> {
        let layout = NodeLayout::new(key_type.width(), record_size);
        validate_page_capacity(PAGE_SIZE, &layout)?;

        let leaf_max_keys = layout.leaf_max_keys(PAGE_SIZE);
        let internal_max_keys = layout.internal_max_keys(PAGE_SIZE);

        if leaf_max_keys < MIN_ENTRY_COUNT || internal_max_keys < MIN_ENTRY_COUNT {
            return Err(StorageError::layout_overflow(
                "node capacity falls below MIN_ENTRY_COUNT at this page size",
            ));
        }

        Ok(Self {
            key_type,
            record_size,
            leaf_max_keys,
            leaf_min_keys: split_index(leaf_max_keys),
            leaf_split_index: split_index(leaf_max_keys),
            internal_max_keys,
            internal_min_keys: split_index(internal_max_keys),
            internal_split_index: split_index(internal_max_keys),
        })
    }

    pub fn layout(&self) -> NodeLayout {
        NodeLayout::new(self.key_type.width(), self.record_size)
    }
}

/// The point a node of `max_keys` capacity splits or shrinks at. A node
/// that has just overflowed to `max_keys + 1` entries splits so the left
/// half keeps this many and the right half (the sibling) takes the rest
/// — the extra entry on an odd split lands on the right. The same value
/// doubles as the minimum occupancy a node may fall to before it needs
/// rebalancing, since it is exactly `ceil(max_keys / 2)`.
fn split_index(max_keys: usize) -> usize {
    (max_keys + 1) / 2
}

//! Pure functions over a page buffer.
//!
//! Every function here takes the node's key/record widths explicitly
//! rather than reading them from the page — a page knows its own
//! header but not the tree-level layout it belongs to; that lives on
//! `BPlusTree`/`NodeLayout` and is threaded through by the caller.

use super::header::{NodeHeader, NODE_HEADER_SIZE};
use crate::error::{Result, StorageError};
use crate::types::PageId;

/// Key and record widths for one tree. Both internal and leaf nodes of
/// the same tree share `key_size`; only leaves use `record_size`.
#[derive(Debug, Clone, Copy)]
pub struct NodeLayout {
    pub key_size: usize,
    pub record_size: usize,
}

impl NodeLayout {
    pub fn new(key_size: usize, record_size: usize) -> Self {
        Self {
            key_size,
            record_size,
        }
    }

    fn leaf_entry_size(&self) -> usize {
        self.key_size + self.record_size
    }

    fn leaf_entry_offset(&self, i: usize) -> usize {
        NODE_HEADER_SIZE + i * self.leaf_entry_size()
    }

    fn internal_key_offset(&self, i: usize) -> usize {
        NODE_HEADER_SIZE + i * self.key_size
    }

    /// Byte offset of the start of the child-pointer array, given the
    /// node's current key count (children are packed directly after the
    /// keys with no gap).
    fn internal_children_offset(&self, key_count: usize) -> usize {
        NODE_HEADER_SIZE + key_count * self.key_size
    }

    /// Maximum keys a leaf of this layout can hold in one page.
    pub fn leaf_max_keys(&self, page_size: usize) -> usize {
        (page_size - NODE_HEADER_SIZE) / self.leaf_entry_size()
    }

    /// Maximum keys an internal node of this layout can hold in one page
    /// (each key has a trailing 4-byte child pointer, plus one extra
    /// leading/trailing child overall).
    pub fn internal_max_keys(&self, page_size: usize) -> usize {
        (page_size - NODE_HEADER_SIZE - 4) / (self.key_size + 4)
    }
}

// ---------------------------------------------------------------- leaf

pub fn leaf_key<'a>(page: &'a [u8], i: usize, layout: &NodeLayout) -> &'a [u8] {
    let off = layout.leaf_entry_offset(i);
    &page[off..off + layout.key_size]
}

pub fn leaf_record<'a>(page: &'a [u8], i: usize, layout: &NodeLayout) -> &'a [u8] {
    let off = layout.leaf_entry_offset(i) + layout.key_size;
    &page[off..off + layout.record_size]
}

/// Shift entries `[i..key_count)` one slot to the right and write a new
/// `(key, record)` at `i`. Caller has already verified capacity.
pub fn leaf_insert_at(
    page: &mut [u8],
    i: usize,
    key: &[u8],
    record: &[u8],
    layout: &NodeLayout,
) -> Result<()> {
    let mut header = NodeHeader::read(page)?;
    let key_count = header.key_count as usize;
    debug_assert!(i <= key_count);
    debug_assert_eq!(key.len(), layout.key_size);
    debug_assert_eq!(record.len(), layout.record_size);

    let entry_size = layout.leaf_entry_size();
    if i < key_count {
        let src = layout.leaf_entry_offset(i);
        let dst = layout.leaf_entry_offset(i + 1);
        let len = (key_count - i) * entry_size;
        page.copy_within(src..src + len, dst);
    }

    let off = layout.leaf_entry_offset(i);
    page[off..off + layout.key_size].copy_from_slice(key);
    page[off + layout.key_size..off + entry_size].copy_from_slice(record);

    header.key_count = (key_count + 1) as u16;
    header.write(page);
    Ok(())
}

pub fn leaf_delete_at(page: &mut [u8], i: usize, layout: &NodeLayout) -> Result<()> {
    let mut header = NodeHeader::read(page)?;
    let key_count = header.key_count as usize;
    debug_assert!(i < key_count);

    let entry_size = layout.leaf_entry_size();
    if i + 1 < key_count {
        let src = layout.leaf_entry_offset(i + 1);
        let dst = layout.leaf_entry_offset(i);
        let len = (key_count - i - 1) * entry_size;
        page.copy_within(src..src + len, dst);
    }

    header.key_count = (key_count - 1) as u16;
    header.write(page);
    Ok(())
}

pub fn leaf_update_record_at(
    page: &mut [u8],
    i: usize,
    record: &[u8],
    layout: &NodeLayout,
) -> Result<()> {
    debug_assert_eq!(record.len(), layout.record_size);
    let off = layout.leaf_entry_offset(i) + layout.key_size;
    page[off..off + layout.record_size].copy_from_slice(record);
    Ok(())
}

// ------------------------------------------------------------ internal

pub fn internal_key<'a>(page: &'a [u8], i: usize, layout: &NodeLayout) -> &'a [u8] {
    let off = layout.internal_key_offset(i);
    &page[off..off + layout.key_size]
}

/// Child pointer at index `i` (0..=key_count). `key_count` must be the
/// node's current count (read by the caller from the header).
pub fn internal_child(page: &[u8], i: usize, key_count: usize, layout: &NodeLayout) -> PageId {
    let base = layout.internal_children_offset(key_count);
    let off = base + i * 4;
    PageId::new(u32::from_le_bytes([
        page[off],
        page[off + 1],
        page[off + 2],
        page[off + 3],
    ]))
}

pub fn internal_set_child(
    page: &mut [u8],
    i: usize,
    key_count: usize,
    child: PageId,
    layout: &NodeLayout,
) {
    let base = layout.internal_children_offset(key_count);
    let off = base + i * 4;
    page[off..off + 4].copy_from_slice(&child.value().to_le_bytes());
}

/// Insert separator `key` at key-index `i` with `right_child` becoming
/// the child at index `i + 1` (the existing child at `i` is left
/// untouched and remains the child to the left of the new separator).
///
/// The child array grows by one slot and moves to a new base offset
/// (children sit directly after the keys, which just grew by one). The
/// slots above `i` are relocated to `i + 2..` before the slots at or
/// below `i` are relocated to their unchanged indices at the new base —
/// in that order, so neither copy clobbers the other's source.
pub fn internal_insert_separator(
    page: &mut [u8],
    i: usize,
    key: &[u8],
    right_child: PageId,
    layout: &NodeLayout,
) -> Result<()> {
    let mut header = NodeHeader::read(page)?;
    let key_count = header.key_count as usize;
    debug_assert!(i <= key_count);
    debug_assert_eq!(key.len(), layout.key_size);

    let old_base = layout.internal_children_offset(key_count);
    let new_base = layout.internal_children_offset(key_count + 1);

    if i < key_count {
        let src = old_base + (i + 1) * 4;
        let len = (key_count - i) * 4;
        let dst = new_base + (i + 2) * 4;
        page.copy_within(src..src + len, dst);
    }
    {
        let src = old_base;
        let len = (i + 1) * 4;
        let dst = new_base;
        page.copy_within(src..src + len, dst);
    }

    if i < key_count {
        let src = layout.internal_key_offset(i);
        let dst = layout.internal_key_offset(i + 1);
        let len = (key_count - i) * layout.key_size;
        page.copy_within(src..src + len, dst);
    }

    let key_off = layout.internal_key_offset(i);
    page[key_off..key_off + layout.key_size].copy_from_slice(key);

    header.key_count = (key_count + 1) as u16;
    header.write(page);

    internal_set_child(page, i + 1, key_count + 1, right_child, layout);
    Ok(())
}

/// Remove separator key `i` along with the child pointer at
/// `remove_child_index` (either `i` or `i + 1`, chosen by the caller
/// depending on whether the left or right child of the separator is
/// being discarded during a merge).
pub fn internal_delete_separator(
    page: &mut [u8],
    i: usize,
    remove_child_index: usize,
    layout: &NodeLayout,
) -> Result<()> {
    let mut header = NodeHeader::read(page)?;
    let key_count = header.key_count as usize;
    debug_assert!(i < key_count);
    debug_assert!(remove_child_index <= key_count);

    // Shift children first, at the current (pre-shrink) child count.
    if remove_child_index < key_count {
        let src = layout.internal_children_offset(key_count) + (remove_child_index + 1) * 4;
        let dst = layout.internal_children_offset(key_count) + remove_child_index * 4;
        let len = (key_count - remove_child_index) * 4;
        page.copy_within(src..src + len, dst);
    }

    if i + 1 < key_count {
        let src = layout.internal_key_offset(i + 1);
        let dst = layout.internal_key_offset(i);
        let len = (key_count - i - 1) * layout.key_size;
        page.copy_within(src..src + len, dst);
    }

    // Children now sit key_size bytes earlier since key_count shrank;
    // move the (already-compacted) child block to its new home.
    let old_children_off = layout.internal_children_offset(key_count);
    let new_children_off = layout.internal_children_offset(key_count - 1);
    let children_len = key_count * 4; // one fewer child, but block pre-shift above left key_count slots valid
    page.copy_within(
        old_children_off..old_children_off + children_len,
        new_children_off,
    );

    header.key_count = (key_count - 1) as u16;
    header.write(page);
    Ok(())
}

/// Overwrite the separator key at index `i` in place (used when a borrow
/// rewrites the parent's separator to the new first key of a sibling).
pub fn internal_set_key(page: &mut [u8], i: usize, key: &[u8], layout: &NodeLayout) {
    let off = layout.internal_key_offset(i);
    page[off..off + layout.key_size].copy_from_slice(key);
}

pub fn leaf_key_count(page: &[u8]) -> Result<usize> {
    Ok(NodeHeader::read(page)?.key_count as usize)
}

pub fn validate_page_capacity(page_size: usize, layout: &NodeLayout) -> Result<()> {
    if layout.leaf_max_keys(page_size) < crate::types::MIN_ENTRY_COUNT {
        return Err(StorageError::layout_overflow(
            "leaf node cannot hold MIN_ENTRY_COUNT entries at this page size",
        ));
    }
    if layout.internal_max_keys(page_size) < crate::types::MIN_ENTRY_COUNT {
        return Err(StorageError::layout_overflow(
            "internal node cannot hold MIN_ENTRY_COUNT entries at this page size",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::header::NodeHeader;
    use crate::types::PAGE_SIZE;

    fn new_leaf_page(layout: &NodeLayout) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        NodeHeader::new_leaf().write(&mut page);
        let _ = layout;
        page
    }

    fn new_internal_page() -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        NodeHeader::new_internal().write(&mut page);
        page
    }

    #[test]
    fn leaf_insert_and_read_back() {
        let layout = NodeLayout::new(4, 8);
        let mut page = new_leaf_page(&layout);

        leaf_insert_at(&mut page, 0, &20i32.to_le_bytes(), b"record-b", &layout).unwrap();
        leaf_insert_at(&mut page, 0, &10i32.to_le_bytes(), b"record-a", &layout).unwrap();
        leaf_insert_at(&mut page, 2, &30i32.to_le_bytes(), b"record-c", &layout).unwrap();

        assert_eq!(leaf_key_count(&page).unwrap(), 3);
        assert_eq!(leaf_key(&page, 0, &layout), &10i32.to_le_bytes());
        assert_eq!(leaf_key(&page, 1, &layout), &20i32.to_le_bytes());
        assert_eq!(leaf_key(&page, 2, &layout), &30i32.to_le_bytes());
        assert_eq!(leaf_record(&page, 1, &layout), b"record-b");
    }

    #[test]
    fn leaf_delete_shifts_tail() {
        let layout = NodeLayout::new(4, 4);
        let mut page = new_leaf_page(&layout);
        for (i, k) in [10, 20, 30].into_iter().enumerate() {
            leaf_insert_at(&mut page, i, &k.to_le_bytes(), b"abcd", &layout).unwrap();
        }
        leaf_delete_at(&mut page, 1, &layout).unwrap();
        assert_eq!(leaf_key_count(&page).unwrap(), 2);
        assert_eq!(leaf_key(&page, 0, &layout), &10i32.to_le_bytes());
        assert_eq!(leaf_key(&page, 1, &layout), &30i32.to_le_bytes());
    }

    #[test]
    fn internal_insert_separator_places_child() {
        let layout = NodeLayout::new(4, 0);
        let mut page = new_internal_page();
        internal_set_child(&mut page, 0, 0, PageId::new(1), &layout);

        internal_insert_separator(&mut page, 0, &30i32.to_le_bytes(), PageId::new(2), &layout)
            .unwrap();
        internal_insert_separator(&mut page, 1, &60i32.to_le_bytes(), PageId::new(3), &layout)
            .unwrap();

        let key_count = leaf_key_count(&page).unwrap();
        assert_eq!(key_count, 2);
        assert_eq!(internal_key(&page, 0, &layout), &30i32.to_le_bytes());
        assert_eq!(internal_key(&page, 1, &layout), &60i32.to_le_bytes());
        assert_eq!(internal_child(&page, 0, key_count, &layout), PageId::new(1));
        assert_eq!(internal_child(&page, 1, key_count, &layout), PageId::new(2));
        assert_eq!(internal_child(&page, 2, key_count, &layout), PageId::new(3));
    }

    #[test]
    fn internal_insert_separator_at_front_preserves_later_children() {
        let layout = NodeLayout::new(4, 0);
        let mut page = new_internal_page();
        // build [10, 20] over children [1, 2, 3]
        internal_set_child(&mut page, 0, 0, PageId::new(1), &layout);
        internal_insert_separator(&mut page, 0, &10i32.to_le_bytes(), PageId::new(2), &layout)
            .unwrap();
        internal_insert_separator(&mut page, 1, &20i32.to_le_bytes(), PageId::new(3), &layout)
            .unwrap();

        // prepend a new leftmost child 0 ahead of key 5
        internal_insert_separator(&mut page, 0, &5i32.to_le_bytes(), PageId::new(1), &layout)
            .unwrap();

        let key_count = leaf_key_count(&page).unwrap();
        assert_eq!(key_count, 3);
        assert_eq!(internal_key(&page, 0, &layout), &5i32.to_le_bytes());
        assert_eq!(internal_key(&page, 1, &layout), &10i32.to_le_bytes());
        assert_eq!(internal_key(&page, 2, &layout), &20i32.to_le_bytes());
        assert_eq!(internal_child(&page, 0, key_count, &layout), PageId::new(1));
        assert_eq!(internal_child(&page, 1, key_count, &layout), PageId::new(1));
        assert_eq!(internal_child(&page, 2, key_count, &layout), PageId::new(2));
        assert_eq!(internal_child(&page, 3, key_count, &layout), PageId::new(3));
    }

    #[test]
    fn internal_delete_separator_removes_right_child() {
        let layout = NodeLayout::new(4, 0);
        let mut page = new_internal_page();
        internal_set_child(&mut page, 0, 0, PageId::new(1), &layout);
        internal_insert_separator(&mut page, 0, &10i32.to_le_bytes(), PageId::new(2), &layout)
            .unwrap();
        internal_insert_separator(&mut page, 1, &20i32.to_le_bytes(), PageId::new(3), &layout)
            .unwrap();

        // remove separator 1 (key 20) and the child to its right (index 2)
        internal_delete_separator(&mut page, 1, 2, &layout).unwrap();

        let key_count = leaf_key_count(&page).unwrap();
        assert_eq!(key_count, 1);
        assert_eq!(internal_key(&page, 0, &layout), &10i32.to_le_bytes());
        assert_eq!(internal_child(&page, 0, key_count, &layout), PageId::new(1));
        assert_eq!(internal_child(&page, 1, key_count, &layout), PageId::new(2));
    }
}

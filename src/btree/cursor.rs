//! Cursor state machine.
//!
//! Holds a path stack of `(page_id, index)` pairs, descends to the
//! leftmost/rightmost leaf, and advances across leaves via the
//! leaf-chain link. Exposes a four-state machine rather than a plain
//! valid/invalid flag, the full `seek_exact`/`ge`/`gt`/`le`/`lt` surface,
//! `save`/`restore`, and mutation through the cursor with sibling-cursor
//! invalidation.

use crate::btree::tree::{BPlusTree, PathFrame};
use crate::error::{Result, StorageError};
use crate::node::{leaf_key, leaf_record, NodeHeader};
use crate::types::{PageId, MAX_BTREE_DEPTH};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;

/// Cursor position state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Never positioned, or positioned past the end of the tree.
    Invalid,
    /// Positioned on a live entry; `key()`/`record()` are valid.
    Valid,
    /// A structural mutation (by this cursor or another) invalidated the
    /// current position; the next traversal call must reseek.
    RequiresSeek,
    /// A prior operation failed in a way that leaves the cursor unusable
    /// until explicitly reseeked from scratch.
    Fault,
}

#[derive(Clone)]
struct Position {
    path: Vec<PathFrame>,
    leaf: PageId,
    index: usize,
    key: Vec<u8>,
}

/// A cursor over one `BPlusTree`. Holds the tree behind shared interior
/// mutability rather than an exclusive borrow, so more than one cursor can
/// be open over the same tree at once; a structural mutation through any
/// of them is detected by the others via the tree's version counter and
/// flips them to `RequiresSeek` on their next call.
pub struct Cursor {
    tree: Arc<RwLock<BPlusTree>>,
    state: CursorState,
    position: Option<Position>,
    saved: Option<Position>,
    seen_version: u64,
    last_key: Option<Vec<u8>>,
}

impl Cursor {
    pub fn new(tree: Arc<RwLock<BPlusTree>>) -> Self {
        let seen_version = tree.read().version();
        Self {
            tree,
            state: CursorState::Invalid,
            position: None,
            saved: None,
            seen_version,
            last_key: None,
        }
    }

    /// Current state, rechecked against the tree's version counter first
    /// so a mutation made through another cursor on the same tree is
    /// reflected here even before this cursor's next traversal call.
    pub fn state(&mut self) -> CursorState {
        self.check_version();
        self.state
    }

    pub fn is_valid(&mut self) -> bool {
        self.state() == CursorState::Valid
    }

    /// Marks this cursor as needing a reseek. Called on every other open
    /// cursor over the same tree whenever one of them splits, merges, or
    /// frees a page, checked via the tree's version counter since cursors
    /// don't hold direct references to each other.
    fn check_version(&mut self) {
        if self.state == CursorState::Valid && self.tree.read().version() != self.seen_version {
            self.state = CursorState::RequiresSeek;
        }
    }

    fn note_mutation(&mut self) {
        self.seen_version = self.tree.read().version();
    }

    fn leaf_entry(&self, leaf: PageId, index: usize) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let layout = self.tree.read().layout();
        let guard = self.tree.read().buffer_pool().fetch_page(leaf)?;
        let page = guard.read();
        let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
        if index >= count {
            return Ok(None);
        }
        Ok(Some((
            leaf_key(page.as_bytes(), index, &layout).to_vec(),
            leaf_record(page.as_bytes(), index, &layout).to_vec(),
        )))
    }

    fn set_position(&mut self, path: Vec<PathFrame>, leaf: PageId, index: usize) -> Result<()> {
        if path.len() >= MAX_BTREE_DEPTH {
            self.state = CursorState::Fault;
            return Err(StorageError::fault("cursor path exceeds MAX_BTREE_DEPTH"));
        }
        match self.leaf_entry(leaf, index)? {
            Some((key, _)) => {
                self.last_key = Some(key.clone());
                self.position = Some(Position { path, leaf, index, key });
                self.state = CursorState::Valid;
            }
            None => {
                self.position = None;
                self.state = CursorState::Invalid;
            }
        }
        Ok(())
    }

    pub fn key(&self) -> Result<Vec<u8>> {
        self.require_valid()?;
        let pos = self.position.as_ref().unwrap();
        Ok(self.leaf_entry(pos.leaf, pos.index)?.unwrap().0)
    }

    pub fn record(&self) -> Result<Vec<u8>> {
        self.require_valid()?;
        let pos = self.position.as_ref().unwrap();
        Ok(self.leaf_entry(pos.leaf, pos.index)?.unwrap().1)
    }

    fn require_valid(&self) -> Result<()> {
        if self.state != CursorState::Valid {
            return Err(StorageError::CursorInvalid);
        }
        Ok(())
    }

    pub fn seek_exact(&mut self, key: &[u8]) -> Result<bool> {
        let (path, leaf, j) = self.tree.read().find_leaf(key)?;
        let layout = self.tree.read().layout();
        let exact = match self.leaf_entry_raw(leaf, j, &layout)? {
            Some(found) => self.tree.read().config().key_type.compare(&found, key)? == Ordering::Equal,
            None => false,
        };
        if exact {
            self.set_position(path, leaf, j)?;
            self.note_mutation();
            Ok(true)
        } else {
            self.state = CursorState::Invalid;
            self.position = None;
            Ok(false)
        }
    }

    fn leaf_entry_raw(&self, leaf: PageId, index: usize, layout: &crate::node::NodeLayout) -> Result<Option<Vec<u8>>> {
        let guard = self.tree.read().buffer_pool().fetch_page(leaf)?;
        let page = guard.read();
        let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
        if index >= count {
            return Ok(None);
        }
        Ok(Some(leaf_key(page.as_bytes(), index, layout).to_vec()))
    }

    /// Shared implementation for `seek_ge`/`seek_gt`/`seek_le`/`seek_lt`:
    /// descend once to the insertion point, then adjust by one step if
    /// the exact boundary wasn't landed on directly.
    fn seek_relative(&mut self, key: &[u8], forward: bool, inclusive: bool) -> Result<bool> {
        let (path, leaf, j) = self.tree.read().find_leaf(key)?;
        let layout = self.tree.read().layout();
        let count = {
            let guard = self.tree.read().buffer_pool().fetch_page(leaf)?;
            NodeHeader::read(guard.read().as_bytes())?.key_count as usize
        };
        let found_raw = self.leaf_entry_raw(leaf, j, &layout)?;
        let exact = j < count
            && self.tree.read().config().key_type.compare(
                found_raw.as_deref().unwrap(),
                key,
            )? == Ordering::Equal;

        if exact && inclusive {
            self.set_position(path, leaf, j)?;
            self.note_mutation();
            return Ok(true);
        }
        if exact && !inclusive {
            self.set_position(path, leaf, j)?;
            self.note_mutation();
            return if forward { self.next() } else { self.previous() };
        }
        // `j` is the smallest index with keys[j] >= key (or `count` if
        // none), i.e. already the successor for ge/gt. For le/lt we need
        // the predecessor instead, stepped from this (possibly
        // past-the-end) position without first requiring it be valid.
        if forward {
            let found = if j < count {
                self.set_position(path, leaf, j)?;
                self.state == CursorState::Valid
            } else {
                // `j == count`: no entry in this leaf is >= key, but the
                // leaf's own right_sibling holds strictly larger keys
                // (routing here means key < right_sibling's first key),
                // so the successor is that sibling's first entry.
                self.step_next_from_exhausted_leaf(leaf)?
            };
            self.note_mutation();
            Ok(found)
        } else {
            let found = self.step_previous(path, leaf, j)?;
            self.note_mutation();
            Ok(found)
        }
    }

    /// Follows `right_sibling` once to land on the first entry of the
    /// next leaf, used when a forward seek's insertion point fell past
    /// the end of its landing leaf.
    fn step_next_from_exhausted_leaf(&mut self, leaf: PageId) -> Result<bool> {
        let right_sibling = {
            let guard = self.tree.read().buffer_pool().fetch_page(leaf)?;
            NodeHeader::read(guard.read().as_bytes())?.right_sibling
        };
        if !right_sibling.is_valid() {
            self.state = CursorState::Invalid;
            self.position = None;
            return Ok(false);
        }
        let path = self.path_for_leaf(right_sibling)?;
        self.set_position(path, right_sibling, 0)?;
        Ok(self.state == CursorState::Valid)
    }

    pub fn seek_ge(&mut self, key: &[u8]) -> Result<bool> {
        self.seek_relative(key, true, true)
    }

    pub fn seek_gt(&mut self, key: &[u8]) -> Result<bool> {
        self.seek_relative(key, true, false)
    }

    pub fn seek_le(&mut self, key: &[u8]) -> Result<bool> {
        self.seek_relative(key, false, true)
    }

    pub fn seek_lt(&mut self, key: &[u8]) -> Result<bool> {
        self.seek_relative(key, false, false)
    }

    /// Recovers the root-to-parent path for `leaf` by re-descending
    /// using its own first key. Used whenever a leaf is reached some way
    /// other than `find_leaf` (leaf-chain hop, leftmost/rightmost walk),
    /// so a later `previous()`/`next()` from it can still walk the path
    /// stack correctly instead of carrying a stale empty path forward.
    fn path_for_leaf(&self, leaf: PageId) -> Result<Vec<PathFrame>> {
        let layout = self.tree.read().layout();
        let probe = {
            let guard = self.tree.read().buffer_pool().fetch_page(leaf)?;
            let page = guard.read();
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            if count == 0 {
                return Ok(Vec::new());
            }
            leaf_key(page.as_bytes(), 0, &layout).to_vec()
        };
        Ok(self.tree.read().find_leaf(&probe)?.0)
    }

    pub fn first(&mut self) -> Result<bool> {
        let leaf = self.tree.read().leftmost_leaf()?;
        let path = self.path_for_leaf(leaf)?;
        self.set_position(path, leaf, 0)?;
        self.note_mutation();
        Ok(self.state == CursorState::Valid)
    }

    pub fn last(&mut self) -> Result<bool> {
        let leaf = self.tree.read().rightmost_leaf()?;
        let count = {
            let guard = self.tree.read().buffer_pool().fetch_page(leaf)?;
            NodeHeader::read(guard.read().as_bytes())?.key_count as usize
        };
        if count == 0 {
            self.state = CursorState::Invalid;
            self.position = None;
            return Ok(false);
        }
        let path = self.path_for_leaf(leaf)?;
        self.set_position(path, leaf, count - 1)?;
        self.note_mutation();
        Ok(self.state == CursorState::Valid)
    }

    /// Advances to the next entry. If this cursor is `RequiresSeek`
    /// (e.g. after its own `delete()`), re-descends using the last known
    /// key before continuing.
    pub fn next(&mut self) -> Result<bool> {
        self.check_version();
        if self.state == CursorState::RequiresSeek {
            self.reseek_after_mutation()?;
        }
        let pos = match &self.position {
            Some(p) => p.clone(),
            None => return Ok(false),
        };

        let next_index = pos.index + 1;
        if self.leaf_entry(pos.leaf, next_index)?.is_some() {
            self.set_position(pos.path, pos.leaf, next_index)?;
            return Ok(true);
        }

        let right_sibling = {
            let guard = self.tree.read().buffer_pool().fetch_page(pos.leaf)?;
            NodeHeader::read(guard.read().as_bytes())?.right_sibling
        };
        if !right_sibling.is_valid() {
            self.state = CursorState::Invalid;
            self.position = None;
            return Ok(false);
        }
        let path = self.path_for_leaf(right_sibling)?;
        self.set_position(path, right_sibling, 0)?;
        Ok(self.state == CursorState::Valid)
    }

    /// Steps backward. If already at the first entry of a leaf, walks up
    /// the path stack for an ancestor with an available left sibling,
    /// then descends to that sibling's rightmost leaf.
    pub fn previous(&mut self) -> Result<bool> {
        self.check_version();
        if self.state == CursorState::RequiresSeek {
            self.reseek_after_mutation()?;
        }
        let pos = match &self.position {
            Some(p) => p.clone(),
            None => return Ok(false),
        };
        self.step_previous(pos.path, pos.leaf, pos.index)
    }

    /// Steps to the entry immediately before `(leaf, index)` in key
    /// order. `index` may equal the leaf's `key_count` (a past-the-end
    /// position, as produced by `find_leaf` when no entry is >= the
    /// search key) — in that case the step lands on the leaf's own last
    /// entry rather than walking up first.
    fn step_previous(&mut self, path: Vec<PathFrame>, leaf: PageId, index: usize) -> Result<bool> {
        let count = {
            let guard = self.tree.read().buffer_pool().fetch_page(leaf)?;
            NodeHeader::read(guard.read().as_bytes())?.key_count as usize
        };

        if index > 0 && index <= count {
            self.set_position(path, leaf, index - 1)?;
            return Ok(self.state == CursorState::Valid);
        }

        // Walk up the path looking for a left sibling, then descend
        // rightmost from there.
        let mut path = path;
        while let Some(frame) = path.pop() {
            if frame.child_index > 0 {
                let left_sibling = {
                    let layout = self.tree.read().layout();
                    let guard = self.tree.read().buffer_pool().fetch_page(frame.page)?;
                    let page = guard.read();
                    let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
                    crate::node::internal_child(
                        page.as_bytes(),
                        frame.child_index - 1,
                        count,
                        &layout,
                    )
                };
                let mut new_path = path;
                new_path.push(PathFrame {
                    page: frame.page,
                    child_index: frame.child_index - 1,
                });
                let sibling_leaf = self.descend_rightmost(left_sibling, &mut new_path)?;
                let sibling_count = {
                    let guard = self.tree.read().buffer_pool().fetch_page(sibling_leaf)?;
                    NodeHeader::read(guard.read().as_bytes())?.key_count as usize
                };
                self.set_position(new_path, sibling_leaf, sibling_count.saturating_sub(1))?;
                return Ok(self.state == CursorState::Valid);
            }
        }

        self.state = CursorState::Invalid;
        self.position = None;
        Ok(false)
    }

    fn descend_rightmost(&self, mut current: PageId, path: &mut Vec<PathFrame>) -> Result<PageId> {
        let layout = self.tree.read().layout();
        loop {
            let (is_leaf, count) = {
                let guard = self.tree.read().buffer_pool().fetch_page(current)?;
                let header = NodeHeader::read(guard.read().as_bytes())?;
                (header.is_leaf(), header.key_count as usize)
            };
            if is_leaf {
                return Ok(current);
            }
            let guard = self.tree.read().buffer_pool().fetch_page(current)?;
            let child = crate::node::internal_child(guard.read().as_bytes(), count, count, &layout);
            path.push(PathFrame {
                page: current,
                child_index: count,
            });
            current = child;
        }
    }

    /// Inserts `(key, record)` and repositions this cursor on it,
    /// invalidating every other open cursor on the tree via the version
    /// bump.
    pub fn insert(&mut self, key: &[u8], record: &[u8]) -> Result<()> {
        self.tree.write().insert(key, record)?;
        self.note_mutation();
        self.seek_exact(key)?;
        Ok(())
    }

    /// Rewrites the record at the current position in place. The key
    /// does not change, so no structural mutation occurs and other
    /// cursors are unaffected.
    pub fn update(&mut self, record: &[u8]) -> Result<()> {
        self.require_valid()?;
        let pos = self.position.as_ref().unwrap();
        let layout = self.tree.read().layout();
        let guard = self.tree.read().buffer_pool().fetch_page_mut(pos.leaf)?;
        crate::node::leaf_update_record_at(guard.write().as_bytes_mut(), pos.index, record, &layout)
    }

    /// Removes the current entry. The cursor becomes `RequiresSeek`;
    /// `key()`/`record()` are undefined until the next `next()`/
    /// `previous()` re-descends.
    pub fn delete(&mut self) -> Result<()> {
        self.require_valid()?;
        let key = self.key()?;
        self.tree.write().delete(&key)?;
        self.note_mutation();
        self.last_key = Some(key);
        self.state = CursorState::RequiresSeek;
        self.position = None;
        Ok(())
    }

    /// Re-descends using the last known key after a delete left this
    /// cursor `RequiresSeek`, landing on the smallest remaining key
    /// greater than or equal to it (the deleted key's successor).
    fn reseek_after_mutation(&mut self) -> Result<()> {
        let key = match self.last_key.clone() {
            Some(k) => k,
            None => {
                self.state = CursorState::Invalid;
                return Ok(());
            }
        };
        let (path, leaf, j) = self.tree.read().find_leaf(&key)?;
        self.set_position(path, leaf, j)?;
        self.note_mutation();
        Ok(())
    }

    pub fn save(&mut self) {
        self.saved = self.position.clone();
    }

    /// Restores the saved position by key rather than by raw path, since
    /// the saved path's pages may have split, merged, or been freed by a
    /// mutation that happened after `save()`. If the saved key is still
    /// present this lands back on it (`Valid`); otherwise this leaves the
    /// cursor `RequiresSeek` with the saved key remembered, so `next()`/
    /// `previous()` resume at its nearest surviving neighbor exactly as
    /// they do after `delete()`.
    pub fn restore(&mut self) -> Result<()> {
        let saved = match self.saved.clone() {
            Some(pos) => pos,
            None => {
                self.state = CursorState::Invalid;
                self.position = None;
                return Ok(());
            }
        };
        let (path, leaf, j) = self.tree.read().find_leaf(&saved.key)?;
        let layout = self.tree.read().layout();
        let exact = match self.leaf_entry_raw(leaf, j, &layout)? {
            Some(found) => self.tree.read().config().key_type.compare(&found, &saved.key)? == Ordering::Equal,
            None => false,
        };
        if exact {
            self.set_position(path, leaf, j)?;
        } else {
            self.last_key = Some(saved.key);
            self.state = CursorState::RequiresSeek;
            self.position = None;
        }
        self.note_mutation();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPool, BufferPoolImpl};
    use crate::storage::MemoryPager;
    use crate::types::DataType;
    use std::sync::Arc;

    fn new_tree() -> Result<Arc<RwLock<BPlusTree>>> {
        let pager = Arc::new(MemoryPager::new());
        let pool: Arc<dyn BufferPool> = Arc::new(BufferPoolImpl::new(pager, 64));
        Ok(Arc::new(RwLock::new(BPlusTree::create(pool, DataType::TYPE_4, 4)?)))
    }

    fn key(k: i32) -> Vec<u8> {
        k.to_le_bytes().to_vec()
    }

    #[test]
    fn first_and_next_walk_in_order() -> Result<()> {
        let tree = new_tree()?;
        for i in [3, 1, 2, 5, 4] {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        assert!(cursor.first()?);
        let mut seen = Vec::new();
        loop {
            seen.push(i32::from_le_bytes(cursor.key()?.try_into().unwrap()));
            if !cursor.next()? {
                break;
            }
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn last_and_previous_walk_reverse_order() -> Result<()> {
        let tree = new_tree()?;
        for i in 0..20 {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        assert!(cursor.last()?);
        let mut seen = Vec::new();
        loop {
            seen.push(i32::from_le_bytes(cursor.key()?.try_into().unwrap()));
            if !cursor.previous()? {
                break;
            }
        }
        assert_eq!(seen, (0..20).rev().collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn seek_exact_misses_leave_cursor_invalid() -> Result<()> {
        let tree = new_tree()?;
        tree.write().insert(&key(1), b"abcd")?;
        let mut cursor = Cursor::new(tree.clone());
        assert!(!cursor.seek_exact(&key(99))?);
        assert_eq!(cursor.state(), CursorState::Invalid);
        Ok(())
    }

    #[test]
    fn range_seek_lands_on_the_nearest_key_and_past_the_end_is_invalid() -> Result<()> {
        let tree = new_tree()?;
        for i in [10, 20, 30, 40, 50] {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());

        assert!(cursor.seek_ge(&key(25))?);
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 30);

        assert!(cursor.seek_le(&key(25))?);
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 20);

        assert!(!cursor.seek_gt(&key(50))?);
        assert_eq!(cursor.state(), CursorState::Invalid);
        Ok(())
    }

    #[test]
    fn seek_ge_lands_on_successor_when_absent() -> Result<()> {
        let tree = new_tree()?;
        for i in [0, 2, 4, 6, 8] {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        assert!(cursor.seek_ge(&key(3))?);
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 4);
        Ok(())
    }

    #[test]
    fn seek_le_lands_on_predecessor_when_absent() -> Result<()> {
        let tree = new_tree()?;
        for i in [0, 2, 4, 6, 8] {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        assert!(cursor.seek_le(&key(5))?);
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 4);
        Ok(())
    }

    #[test]
    fn delete_then_next_resumes_from_successor() -> Result<()> {
        let tree = new_tree()?;
        for i in 0..10 {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        cursor.seek_exact(&key(5))?;
        cursor.delete()?;
        assert_eq!(cursor.state(), CursorState::RequiresSeek);
        assert!(cursor.next()?);
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 6);
        Ok(())
    }

    #[test]
    fn save_and_restore_round_trip_position() -> Result<()> {
        let tree = new_tree()?;
        for i in 0..5 {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        cursor.seek_exact(&key(2))?;
        cursor.save();
        cursor.next()?;
        cursor.next()?;
        cursor.restore()?;
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 2);
        Ok(())
    }

    #[test]
    fn restore_after_an_unrelated_delete_still_resumes_at_the_saved_key() -> Result<()> {
        let tree = new_tree()?;
        for i in 0..5 {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        cursor.seek_exact(&key(2))?;
        cursor.save();

        cursor.seek_exact(&key(4))?;
        cursor.delete()?;
        assert_eq!(cursor.state(), CursorState::RequiresSeek);

        cursor.restore()?;
        assert_eq!(cursor.state(), CursorState::Valid);
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 2);
        Ok(())
    }

    #[test]
    fn restore_after_the_saved_key_is_deleted_lands_on_its_successor() -> Result<()> {
        let tree = new_tree()?;
        for i in 0..5 {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut cursor = Cursor::new(tree.clone());
        cursor.seek_exact(&key(2))?;
        cursor.save();

        cursor.delete()?;
        assert_eq!(cursor.state(), CursorState::RequiresSeek);

        cursor.restore()?;
        assert_eq!(
            cursor.state(),
            CursorState::RequiresSeek,
            "the saved key is gone, so restore must not claim Valid"
        );
        assert!(cursor.next()?);
        assert_eq!(i32::from_le_bytes(cursor.key()?.try_into().unwrap()), 3);
        Ok(())
    }

    #[test]
    fn update_rewrites_record_without_changing_key() -> Result<()> {
        let tree = new_tree()?;
        tree.write().insert(&key(1), b"orig")?;
        let mut cursor = Cursor::new(tree.clone());
        cursor.seek_exact(&key(1))?;
        cursor.update(b"new!")?;
        assert_eq!(cursor.record()?, b"new!");
        Ok(())
    }

    #[test]
    fn a_mutation_through_one_cursor_invalidates_a_sibling_cursor() -> Result<()> {
        let tree = new_tree()?;
        for i in 0..5 {
            tree.write().insert(&key(i), b"abcd")?;
        }
        let mut a = Cursor::new(tree.clone());
        let mut b = Cursor::new(tree.clone());

        assert!(a.seek_exact(&key(2))?);
        assert!(b.seek_exact(&key(4))?);
        assert_eq!(a.state(), CursorState::Valid);
        assert_eq!(b.state(), CursorState::Valid);

        // `a` splits the tree's single leaf by inserting past capacity;
        // `b` never touches the tree itself, so this only shows up the
        // next time something asks for `b`'s state.
        for i in 5..20 {
            a.insert(&key(i), b"abcd")?;
        }
        assert_eq!(
            b.state(),
            CursorState::RequiresSeek,
            "a structural mutation through `a` must invalidate `b`'s stale position"
        );
        Ok(())
    }
}

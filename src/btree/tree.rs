//! B+Tree operations: creation, `find_leaf`, insert/split propagation,
//! delete/rebalance propagation, and a forward scan.
//!
//! A struct owning a buffer pool handle plus tree-level bookkeeping,
//! with recursive insert/split handled by walking a path collected on
//! the way down. Keys and records are fixed-width, addressed through
//! `crate::node`, and deletes rebalance via borrow-then-merge
//! propagation.

use crate::btree::config::BPlusTreeConfig;
use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::node::{
    internal_child, internal_delete_separator, internal_insert_separator, internal_key,
    internal_set_child, internal_set_key, leaf_delete_at, leaf_insert_at, leaf_key, leaf_record,
    NodeHeader, NodeLayout,
};
use crate::types::PageId;
use std::cmp::Ordering;
use std::sync::Arc;

/// One stack frame recorded while descending an internal node: which
/// page, and which child index was chosen to recurse into.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathFrame {
    pub page: PageId,
    pub child_index: usize,
}

/// A single fixed-width B+Tree backed by a buffer pool.
///
/// Mutating operations take `&mut self` because they may change
/// `root`, the only tree-level state that is not itself stored on a
/// page. Everything else lives in the page graph reachable from `root`.
pub struct BPlusTree {
    buffer_pool: Arc<dyn BufferPool>,
    config: BPlusTreeConfig,
    root: PageId,
    version: u64,
}

impl BPlusTree {
    /// Allocates a fresh single-leaf tree.
    pub fn create(
        buffer_pool: Arc<dyn BufferPool>,
        key_type: crate::types::DataType,
        record_size: usize,
    ) -> Result<Self> {
        let config = BPlusTreeConfig::create(key_type, record_size)?;
        let (root, guard) = buffer_pool.new_page()?;
        NodeHeader::new_leaf().write(guard.write().as_bytes_mut());
        Ok(Self {
            buffer_pool,
            config,
            root,
            version: 0,
        })
    }

    /// Reattaches to a tree whose root page was recorded elsewhere (the
    /// schema registry, on reopen).
    pub fn open(buffer_pool: Arc<dyn BufferPool>, config: BPlusTreeConfig, root: PageId) -> Self {
        Self {
            buffer_pool,
            config,
            root,
            version: 0,
        }
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn config(&self) -> &BPlusTreeConfig {
        &self.config
    }

    /// Bumped on every split, merge, or root change; cursors compare
    /// this against the value recorded at their last descent to detect
    /// that they need to reseek.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn layout(&self) -> NodeLayout {
        self.config.layout()
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<dyn BufferPool> {
        &self.buffer_pool
    }

    pub fn is_empty(&self) -> Result<bool> {
        let guard = self.buffer_pool.fetch_page(self.root)?;
        let header = NodeHeader::read(guard.read().as_bytes())?;
        Ok(header.is_leaf() && header.key_count == 0)
    }

    fn key_count(&self, page: PageId) -> Result<usize> {
        let guard = self.buffer_pool.fetch_page(page)?;
        Ok(NodeHeader::read(guard.read().as_bytes())?.key_count as usize)
    }

    /// Smallest index in `[0, count)` for which `pred` holds, or `count`
    /// if `pred` never holds. `pred` must be monotonic (false*, true*)
    /// over the range, which key order guarantees for the predicates
    /// `find_leaf` uses.
    fn binary_search_leftmost<F>(count: usize, mut pred: F) -> Result<usize>
    where
        F: FnMut(usize) -> Result<bool>,
    {
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(mid)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    /// Descends from the root for `key`.
    /// Returns the path of internal frames, the leaf reached, and the
    /// insertion position (smallest `j` with `keys[j] >= key`, or
    /// `key_count`).
    pub(crate) fn find_leaf(&self, key: &[u8]) -> Result<(Vec<PathFrame>, PageId, usize)> {
        let layout = self.layout();
        let mut path = Vec::new();
        let mut current = self.root;
        loop {
            let header = {
                let guard = self.buffer_pool.fetch_page(current)?;
                NodeHeader::read(guard.read().as_bytes())?
            };
            let count = header.key_count as usize;

            if header.is_leaf() {
                let guard = self.buffer_pool.fetch_page(current)?;
                let page = guard.read();
                let j = Self::binary_search_leftmost(count, |i| {
                    Ok(self.config.key_type.compare(leaf_key(page.as_bytes(), i, &layout), key)?
                        != Ordering::Less)
                })?;
                return Ok((path, current, j));
            }

            let (i, child) = {
                let guard = self.buffer_pool.fetch_page(current)?;
                let page = guard.read();
                let i = Self::binary_search_leftmost(count, |idx| {
                    Ok(self
                        .config
                        .key_type
                        .compare(key, internal_key(page.as_bytes(), idx, &layout))?
                        == Ordering::Less)
                })?;
                let child = internal_child(page.as_bytes(), i, count, &layout);
                (i, child)
            };
            path.push(PathFrame {
                page: current,
                child_index: i,
            });
            current = child;
        }
    }

    /// Looks up the record for `key`, if present.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let layout = self.layout();
        let (_, leaf, j) = self.find_leaf(key)?;
        let guard = self.buffer_pool.fetch_page(leaf)?;
        let page = guard.read();
        let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
        if j >= count {
            return Ok(None);
        }
        let found = leaf_key(page.as_bytes(), j, &layout);
        if self.config.key_type.compare(found, key)? == Ordering::Equal {
            Ok(Some(leaf_record(page.as_bytes(), j, &layout).to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Inserts `(key, record)`. Fails with `DuplicateKey` if `key` is
    /// already present.
    pub fn insert(&mut self, key: &[u8], record: &[u8]) -> Result<()> {
        let layout = self.layout();
        if key.len() != layout.key_size || record.len() != self.config.record_size {
            return Err(StorageError::fault("insert: key/record width mismatch"));
        }

        let (path, leaf, j) = self.find_leaf(key)?;

        let overflow = {
            let guard = self.buffer_pool.fetch_page_mut(leaf)?;
            let mut page = guard.write();
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            if j < count {
                let existing = leaf_key(page.as_bytes(), j, &layout);
                if self.config.key_type.compare(existing, key)? == Ordering::Equal {
                    return Err(StorageError::DuplicateKey);
                }
            }
            leaf_insert_at(page.as_bytes_mut(), j, key, record, &layout)?;
            NodeHeader::read(page.as_bytes())?.key_count as usize > self.config.leaf_max_keys
        };

        if !overflow {
            return Ok(());
        }

        let (separator, new_leaf) = self.split_leaf(leaf)?;
        self.version += 1;
        self.propagate_split(path, separator, new_leaf)
    }

    fn split_leaf(&mut self, leaf: PageId) -> Result<(Vec<u8>, PageId)> {
        let layout = self.layout();
        let split = self.config.leaf_split_index;

        let (moved, old_right_sibling, key_count) = {
            let guard = self.buffer_pool.fetch_page(leaf)?;
            let page = guard.read();
            let header = NodeHeader::read(page.as_bytes())?;
            let count = header.key_count as usize;
            let mut moved = Vec::with_capacity(count - split);
            for i in split..count {
                moved.push((
                    leaf_key(page.as_bytes(), i, &layout).to_vec(),
                    leaf_record(page.as_bytes(), i, &layout).to_vec(),
                ));
            }
            (moved, header.right_sibling, count)
        };

        let (new_leaf, new_guard) = self.buffer_pool.new_page()?;
        {
            let mut page = new_guard.write();
            let mut header = NodeHeader::new_leaf();
            header.right_sibling = old_right_sibling;
            header.write(page.as_bytes_mut());
            for (i, (k, r)) in moved.iter().enumerate() {
                leaf_insert_at(page.as_bytes_mut(), i, k, r, &layout)?;
            }
        }

        {
            let guard = self.buffer_pool.fetch_page_mut(leaf)?;
            let mut page = guard.write();
            for _ in split..key_count {
                let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
                leaf_delete_at(page.as_bytes_mut(), count - 1, &layout)?;
            }
            let mut header = NodeHeader::read(page.as_bytes())?;
            header.right_sibling = new_leaf;
            header.write(page.as_bytes_mut());
        }

        // The separator is a copy of R.keys[0]; R keeps its own copy too
        // (leaf splits duplicate the boundary key, unlike internal splits).
        let separator = moved[0].0.clone();
        Ok((separator, new_leaf))
    }

    fn split_internal(&mut self, node: PageId) -> Result<(Vec<u8>, PageId)> {
        let layout = self.layout();
        let split = self.config.internal_split_index;

        let (promoted, moved_keys, moved_children, count) = {
            let guard = self.buffer_pool.fetch_page(node)?;
            let page = guard.read();
            let header = NodeHeader::read(page.as_bytes())?;
            let count = header.key_count as usize;
            let promoted = internal_key(page.as_bytes(), split, &layout).to_vec();
            let mut keys = Vec::new();
            for i in (split + 1)..count {
                keys.push(internal_key(page.as_bytes(), i, &layout).to_vec());
            }
            let mut children = Vec::new();
            for i in (split + 1)..=count {
                children.push(internal_child(page.as_bytes(), i, count, &layout));
            }
            (promoted, keys, children, count)
        };

        let (new_node, new_guard) = self.buffer_pool.new_page()?;
        {
            let mut page = new_guard.write();
            let mut header = NodeHeader::new_internal();
            header.write(page.as_bytes_mut());
            internal_set_child(page.as_bytes_mut(), 0, 0, moved_children[0], &layout);
            for (i, k) in moved_keys.iter().enumerate() {
                internal_insert_separator(page.as_bytes_mut(), i, k, moved_children[i + 1], &layout)?;
            }
        }

        {
            let guard = self.buffer_pool.fetch_page_mut(node)?;
            let mut page = guard.write();
            for _ in split..count {
                let key_count = NodeHeader::read(page.as_bytes())?.key_count as usize;
                let last = key_count - 1;
                internal_delete_separator(page.as_bytes_mut(), last, last + 1, &layout)?;
            }
        }

        Ok((promoted, new_node))
    }

    /// Walks `path` from the leaf upward, inserting a promoted separator
    /// into each ancestor and splitting it in turn if it overflows.
    /// Creates a new root once the path is exhausted and the last node
    /// split.
    fn propagate_split(
        &mut self,
        mut path: Vec<PathFrame>,
        mut separator: Vec<u8>,
        mut new_child: PageId,
    ) -> Result<()> {
        let layout = self.layout();
        loop {
            match path.pop() {
                None => {
                    let (new_root, guard) = self.buffer_pool.new_page()?;
                    {
                        let mut page = guard.write();
                        NodeHeader::new_internal().write(page.as_bytes_mut());
                        internal_set_child(page.as_bytes_mut(), 0, 0, self.root, &layout);
                        internal_insert_separator(
                            page.as_bytes_mut(),
                            0,
                            &separator,
                            new_child,
                            &layout,
                        )?;
                    }
                    self.root = new_root;
                    return Ok(());
                }
                Some(frame) => {
                    let overflow = {
                        let guard = self.buffer_pool.fetch_page_mut(frame.page)?;
                        let mut page = guard.write();
                        internal_insert_separator(
                            page.as_bytes_mut(),
                            frame.child_index,
                            &separator,
                            new_child,
                            &layout,
                        )?;
                        NodeHeader::read(page.as_bytes())?.key_count as usize
                            > self.config.internal_max_keys
                    };
                    if !overflow {
                        return Ok(());
                    }
                    let (new_sep, new_internal) = self.split_internal(frame.page)?;
                    separator = new_sep;
                    new_child = new_internal;
                }
            }
        }
    }

    /// Removes `key`. Fails with `KeyNotFound` if absent.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let layout = self.layout();
        let (path, leaf, j) = self.find_leaf(key)?;

        {
            let guard = self.buffer_pool.fetch_page(leaf)?;
            let page = guard.read();
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            if j >= count
                || self.config.key_type.compare(leaf_key(page.as_bytes(), j, &layout), key)?
                    != Ordering::Equal
            {
                return Err(StorageError::KeyNotFound);
            }
        }

        {
            let guard = self.buffer_pool.fetch_page_mut(leaf)?;
            let mut page = guard.write();
            leaf_delete_at(page.as_bytes_mut(), j, &layout)?;
        }

        if leaf == self.root {
            return Ok(());
        }

        let underflow = self.key_count(leaf)? < self.config.leaf_min_keys;
        if !underflow {
            return Ok(());
        }

        self.version += 1;
        self.rebalance_leaf(path, leaf)
    }

    fn sibling_ids(
        &self,
        parent: PageId,
        idx: usize,
        parent_count: usize,
    ) -> Result<(Option<PageId>, Option<PageId>)> {
        let layout = self.layout();
        let guard = self.buffer_pool.fetch_page(parent)?;
        let page = guard.read();
        let left = if idx > 0 {
            Some(internal_child(page.as_bytes(), idx - 1, parent_count, &layout))
        } else {
            None
        };
        let right = if idx < parent_count {
            Some(internal_child(page.as_bytes(), idx + 1, parent_count, &layout))
        } else {
            None
        };
        Ok((left, right))
    }

    fn rebalance_leaf(&mut self, mut path: Vec<PathFrame>, leaf: PageId) -> Result<()> {
        let frame = path
            .pop()
            .expect("a non-root leaf always has a recorded parent frame");
        let parent = frame.page;
        let idx = frame.child_index;
        let parent_count = self.key_count(parent)?;
        let (left, right) = self.sibling_ids(parent, idx, parent_count)?;

        if let Some(left) = left {
            if self.key_count(left)? > self.config.leaf_min_keys {
                self.borrow_leaf_from_left(left, leaf, parent, idx - 1)?;
                return Ok(());
            }
        }
        if let Some(right) = right {
            if self.key_count(right)? > self.config.leaf_min_keys {
                self.borrow_leaf_from_right(leaf, right, parent, idx)?;
                return Ok(());
            }
        }

        if let Some(left) = left {
            self.merge_leaves(left, leaf)?;
            self.after_child_removed(path, parent, idx - 1)
        } else if let Some(right) = right {
            self.merge_leaves(leaf, right)?;
            self.after_child_removed(path, parent, idx)
        } else {
            unreachable!("a non-root leaf with a parent always has at least one sibling")
        }
    }

    fn borrow_leaf_from_left(
        &mut self,
        left: PageId,
        leaf: PageId,
        parent: PageId,
        sep_index: usize,
    ) -> Result<()> {
        let layout = self.layout();
        let (key, record) = {
            let guard = self.buffer_pool.fetch_page(left)?;
            let page = guard.read();
            let last = NodeHeader::read(page.as_bytes())?.key_count as usize - 1;
            (
                leaf_key(page.as_bytes(), last, &layout).to_vec(),
                leaf_record(page.as_bytes(), last, &layout).to_vec(),
            )
        };
        {
            let guard = self.buffer_pool.fetch_page_mut(left)?;
            let mut page = guard.write();
            let last = NodeHeader::read(page.as_bytes())?.key_count as usize - 1;
            leaf_delete_at(page.as_bytes_mut(), last, &layout)?;
        }
        {
            let guard = self.buffer_pool.fetch_page_mut(leaf)?;
            let mut page = guard.write();
            leaf_insert_at(page.as_bytes_mut(), 0, &key, &record, &layout)?;
        }
        let guard = self.buffer_pool.fetch_page_mut(parent)?;
        internal_set_key(guard.write().as_bytes_mut(), sep_index, &key, &layout);
        Ok(())
    }

    fn borrow_leaf_from_right(
        &mut self,
        leaf: PageId,
        right: PageId,
        parent: PageId,
        sep_index: usize,
    ) -> Result<()> {
        let layout = self.layout();
        let (key, record) = {
            let guard = self.buffer_pool.fetch_page(right)?;
            let page = guard.read();
            (
                leaf_key(page.as_bytes(), 0, &layout).to_vec(),
                leaf_record(page.as_bytes(), 0, &layout).to_vec(),
            )
        };
        {
            let guard = self.buffer_pool.fetch_page_mut(right)?;
            let mut page = guard.write();
            leaf_delete_at(page.as_bytes_mut(), 0, &layout)?;
        }
        {
            let guard = self.buffer_pool.fetch_page_mut(leaf)?;
            let mut page = guard.write();
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            leaf_insert_at(page.as_bytes_mut(), count, &key, &record, &layout)?;
        }
        let new_first = {
            let guard = self.buffer_pool.fetch_page(right)?;
            leaf_key(guard.read().as_bytes(), 0, &layout).to_vec()
        };
        let guard = self.buffer_pool.fetch_page_mut(parent)?;
        internal_set_key(guard.write().as_bytes_mut(), sep_index, &new_first, &layout);
        Ok(())
    }

    fn merge_leaves(&mut self, left: PageId, right: PageId) -> Result<()> {
        let layout = self.layout();
        let (entries, right_sibling) = {
            let guard = self.buffer_pool.fetch_page(right)?;
            let page = guard.read();
            let header = NodeHeader::read(page.as_bytes())?;
            let count = header.key_count as usize;
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                entries.push((
                    leaf_key(page.as_bytes(), i, &layout).to_vec(),
                    leaf_record(page.as_bytes(), i, &layout).to_vec(),
                ));
            }
            (entries, header.right_sibling)
        };
        {
            let guard = self.buffer_pool.fetch_page_mut(left)?;
            let mut page = guard.write();
            for (k, r) in &entries {
                let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
                leaf_insert_at(page.as_bytes_mut(), count, k, r, &layout)?;
            }
            let mut header = NodeHeader::read(page.as_bytes())?;
            header.right_sibling = right_sibling;
            header.write(page.as_bytes_mut());
        }
        self.buffer_pool.free_page(right)
    }

    /// After a leaf or internal merge frees a child, removes the
    /// separator and the now-dangling child pointer from `parent` at
    /// `sep_index`/`sep_index + 1`, collapsing the root if it drops to a
    /// single child, or propagating an underflow further up otherwise.
    fn after_child_removed(
        &mut self,
        path: Vec<PathFrame>,
        parent: PageId,
        sep_index: usize,
    ) -> Result<()> {
        let layout = self.layout();
        {
            let guard = self.buffer_pool.fetch_page_mut(parent)?;
            let mut page = guard.write();
            internal_delete_separator(page.as_bytes_mut(), sep_index, sep_index + 1, &layout)?;
        }

        if parent == self.root {
            if self.key_count(parent)? == 0 {
                let only_child = {
                    let guard = self.buffer_pool.fetch_page(parent)?;
                    internal_child(guard.read().as_bytes(), 0, 0, &layout)
                };
                self.root = only_child;
                self.buffer_pool.free_page(parent)?;
            }
            return Ok(());
        }

        if self.key_count(parent)? < self.config.internal_min_keys {
            self.rebalance_internal(path, parent)
        } else {
            Ok(())
        }
    }

    fn rebalance_internal(&mut self, mut path: Vec<PathFrame>, node: PageId) -> Result<()> {
        let frame = path
            .pop()
            .expect("a non-root internal node always has a recorded parent frame");
        let parent = frame.page;
        let idx = frame.child_index;
        let parent_count = self.key_count(parent)?;
        let (left, right) = self.sibling_ids(parent, idx, parent_count)?;

        if let Some(left) = left {
            if self.key_count(left)? > self.config.internal_min_keys {
                self.borrow_internal_from_left(left, node, parent, idx - 1)?;
                return Ok(());
            }
        }
        if let Some(right) = right {
            if self.key_count(right)? > self.config.internal_min_keys {
                self.borrow_internal_from_right(node, right, parent, idx)?;
                return Ok(());
            }
        }

        if let Some(left) = left {
            self.merge_internal(left, node, parent, idx - 1)?;
            self.after_child_removed(path, parent, idx - 1)
        } else if let Some(right) = right {
            self.merge_internal(node, right, parent, idx)?;
            self.after_child_removed(path, parent, idx)
        } else {
            unreachable!("a non-root internal node with a parent always has at least one sibling")
        }
    }

    fn borrow_internal_from_left(
        &mut self,
        left: PageId,
        node: PageId,
        parent: PageId,
        sep_index: usize,
    ) -> Result<()> {
        let layout = self.layout();
        let parent_sep = {
            let guard = self.buffer_pool.fetch_page(parent)?;
            internal_key(guard.read().as_bytes(), sep_index, &layout).to_vec()
        };
        let (moved_key, moved_child) = {
            let guard = self.buffer_pool.fetch_page(left)?;
            let page = guard.read();
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            (
                internal_key(page.as_bytes(), count - 1, &layout).to_vec(),
                internal_child(page.as_bytes(), count, count, &layout),
            )
        };
        {
            let guard = self.buffer_pool.fetch_page_mut(left)?;
            let mut page = guard.write();
            let last = NodeHeader::read(page.as_bytes())?.key_count as usize - 1;
            internal_delete_separator(page.as_bytes_mut(), last, last + 1, &layout)?;
        }
        {
            let guard = self.buffer_pool.fetch_page_mut(node)?;
            let mut page = guard.write();
            internal_insert_separator(page.as_bytes_mut(), 0, &parent_sep, moved_child, &layout)?;
            // insert_separator leaves the node's prior leftmost child at
            // index 0 (untouched) and places `moved_child` at index 1;
            // swap them so the borrowed child ends up leftmost.
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            let prior_leftmost = internal_child(page.as_bytes(), 0, count, &layout);
            internal_set_child(page.as_bytes_mut(), 0, count, moved_child, &layout);
            internal_set_child(page.as_bytes_mut(), 1, count, prior_leftmost, &layout);
        }
        let guard = self.buffer_pool.fetch_page_mut(parent)?;
        internal_set_key(guard.write().as_bytes_mut(), sep_index, &moved_key, &layout);
        Ok(())
    }

    fn borrow_internal_from_right(
        &mut self,
        node: PageId,
        right: PageId,
        parent: PageId,
        sep_index: usize,
    ) -> Result<()> {
        let layout = self.layout();
        let parent_sep = {
            let guard = self.buffer_pool.fetch_page(parent)?;
            internal_key(guard.read().as_bytes(), sep_index, &layout).to_vec()
        };
        let (moved_key, moved_child) = {
            let guard = self.buffer_pool.fetch_page(right)?;
            let page = guard.read();
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            (
                internal_key(page.as_bytes(), 0, &layout).to_vec(),
                internal_child(page.as_bytes(), 0, count, &layout),
            )
        };
        {
            let guard = self.buffer_pool.fetch_page_mut(right)?;
            let mut page = guard.write();
            internal_delete_separator(page.as_bytes_mut(), 0, 0, &layout)?;
        }
        {
            let guard = self.buffer_pool.fetch_page_mut(node)?;
            let mut page = guard.write();
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            internal_insert_separator(page.as_bytes_mut(), count, &parent_sep, moved_child, &layout)?;
        }
        let guard = self.buffer_pool.fetch_page_mut(parent)?;
        internal_set_key(guard.write().as_bytes_mut(), sep_index, &moved_key, &layout);
        Ok(())
    }

    /// Merges `right`'s keys and children into `left` with the parent
    /// separator dropping down between them, then frees `right`.
    fn merge_internal(
        &mut self,
        left: PageId,
        right: PageId,
        parent: PageId,
        sep_index: usize,
    ) -> Result<()> {
        let layout = self.layout();
        let parent_sep = {
            let guard = self.buffer_pool.fetch_page(parent)?;
            internal_key(guard.read().as_bytes(), sep_index, &layout).to_vec()
        };
        let (right_keys, right_children, right_count) = {
            let guard = self.buffer_pool.fetch_page(right)?;
            let page = guard.read();
            let header = NodeHeader::read(page.as_bytes())?;
            let count = header.key_count as usize;
            let mut keys = Vec::with_capacity(count);
            for i in 0..count {
                keys.push(internal_key(page.as_bytes(), i, &layout).to_vec());
            }
            let mut children = Vec::with_capacity(count + 1);
            for i in 0..=count {
                children.push(internal_child(page.as_bytes(), i, count, &layout));
            }
            (keys, children, count)
        };

        let guard = self.buffer_pool.fetch_page_mut(left)?;
        let mut page = guard.write();
        let base = NodeHeader::read(page.as_bytes())?.key_count as usize;
        internal_insert_separator(page.as_bytes_mut(), base, &parent_sep, right_children[0], &layout)?;
        for i in 0..right_count {
            let count = NodeHeader::read(page.as_bytes())?.key_count as usize;
            internal_insert_separator(
                page.as_bytes_mut(),
                count,
                &right_keys[i],
                right_children[i + 1],
                &layout,
            )?;
        }
        drop(page);
        drop(guard);
        self.buffer_pool.free_page(right)
    }

    /// Yields `(key, record)` pairs over `[start, end)` in key order by
    /// walking the leaf chain, starting from the leaf that would contain
    /// `start` (or the leftmost leaf if `start` is `None`).
    pub fn scan(&self, start: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let layout = self.layout();
        let (mut current, mut start_index) = match start {
            Some(key) => {
                let (_, leaf, j) = self.find_leaf(key)?;
                (leaf, j)
            }
            None => (self.leftmost_leaf()?, 0),
        };

        let mut out = Vec::new();
        loop {
            let (count, right_sibling) = {
                let guard = self.buffer_pool.fetch_page(current)?;
                let header = NodeHeader::read(guard.read().as_bytes())?;
                (header.key_count as usize, header.right_sibling)
            };
            let guard = self.buffer_pool.fetch_page(current)?;
            let page = guard.read();
            for i in start_index..count {
                out.push((
                    leaf_key(page.as_bytes(), i, &layout).to_vec(),
                    leaf_record(page.as_bytes(), i, &layout).to_vec(),
                ));
            }
            drop(page);
            drop(guard);

            if !right_sibling.is_valid() {
                break;
            }
            current = right_sibling;
            start_index = 0;
        }
        Ok(out)
    }

    pub(crate) fn leftmost_leaf(&self) -> Result<PageId> {
        let mut current = self.root;
        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            let page = guard.read();
            let header = NodeHeader::read(page.as_bytes())?;
            if header.is_leaf() {
                return Ok(current);
            }
            current = internal_child(page.as_bytes(), 0, header.key_count as usize, &self.layout());
        }
    }

    pub(crate) fn rightmost_leaf(&self) -> Result<PageId> {
        let mut current = self.root;
        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            let page = guard.read();
            let header = NodeHeader::read(page.as_bytes())?;
            if header.is_leaf() {
                return Ok(current);
            }
            let count = header.key_count as usize;
            current = internal_child(page.as_bytes(), count, count, &self.layout());
        }
    }
}

/// Every page reachable from `root`: `root` itself, plus every internal
/// and leaf page in its subtree. Used by the schema registry to diff the
/// pages a tree has grown since a snapshot was taken, so `restore()` can
/// free exactly the ones that are now unreachable.
pub(crate) fn reachable_pages_from(
    buffer_pool: &Arc<dyn BufferPool>,
    layout: &NodeLayout,
    root: PageId,
) -> Result<Vec<PageId>> {
    let mut pages = Vec::new();
    if !root.is_valid() {
        return Ok(pages);
    }
    let mut stack = vec![root];
    while let Some(page_id) = stack.pop() {
        pages.push(page_id);
        let guard = buffer_pool.fetch_page(page_id)?;
        let page = guard.read();
        let header = NodeHeader::read(page.as_bytes())?;
        if !header.is_leaf() {
            let count = header.key_count as usize;
            for i in 0..=count {
                stack.push(internal_child(page.as_bytes(), i, count, layout));
            }
        }
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolImpl;
    use crate::storage::MemoryPager;
    use crate::types::DataType;

    fn new_tree(record_size: usize) -> Result<BPlusTree> {
        let pager = Arc::new(MemoryPager::new());
        let pool: Arc<dyn BufferPool> = Arc::new(BufferPoolImpl::new(pager, 64));
        BPlusTree::create(pool, DataType::TYPE_4, record_size)
    }

    fn key(k: i32) -> Vec<u8> {
        k.to_le_bytes().to_vec()
    }

    #[test]
    fn empty_tree_has_no_entries() -> Result<()> {
        let tree = new_tree(8)?;
        assert!(tree.is_empty()?);
        assert_eq!(tree.get(&key(1))?, None);
        Ok(())
    }

    #[test]
    fn insert_and_get_round_trip() -> Result<()> {
        let mut tree = new_tree(8)?;
        tree.insert(&key(5), b"record-5")?;
        tree.insert(&key(3), b"record-3")?;
        tree.insert(&key(9), b"record-9")?;
        assert_eq!(tree.get(&key(3))?.as_deref(), Some(&b"record-3"[..]));
        assert_eq!(tree.get(&key(9))?.as_deref(), Some(&b"record-9"[..]));
        assert_eq!(tree.get(&key(7))?, None);
        Ok(())
    }

    #[test]
    fn duplicate_insert_is_rejected() -> Result<()> {
        let mut tree = new_tree(8)?;
        tree.insert(&key(1), b"record-1")?;
        assert!(matches!(
            tree.insert(&key(1), b"record-2"),
            Err(StorageError::DuplicateKey)
        ));
        Ok(())
    }

    #[test]
    fn inserting_past_capacity_splits_and_creates_root() -> Result<()> {
        let mut tree = new_tree(4)?;
        let leaf_max = tree.config().leaf_max_keys;
        for i in 0..(leaf_max as i32 + 1) {
            tree.insert(&key(i), b"rec!")?;
        }
        assert!(tree.version() >= 1);
        for i in 0..(leaf_max as i32 + 1) {
            assert!(tree.get(&key(i))?.is_some());
        }
        Ok(())
    }

    #[test]
    fn scan_returns_entries_in_key_order() -> Result<()> {
        let mut tree = new_tree(4)?;
        for i in [5, 1, 9, 3, 7, 2, 8, 4, 6, 0] {
            tree.insert(&key(i), b"rec!")?;
        }
        let entries = tree.scan(None)?;
        let got: Vec<i32> = entries
            .iter()
            .map(|(k, _)| i32::from_le_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn delete_then_get_returns_none() -> Result<()> {
        let mut tree = new_tree(4)?;
        for i in 0..20 {
            tree.insert(&key(i), b"rec!")?;
        }
        for i in (0..20).step_by(2) {
            tree.delete(&key(i))?;
        }
        for i in 0..20 {
            let expect_present = i % 2 == 1;
            assert_eq!(tree.get(&key(i))?.is_some(), expect_present);
        }
        Ok(())
    }

    #[test]
    fn delete_missing_key_is_key_not_found() -> Result<()> {
        let mut tree = new_tree(4)?;
        tree.insert(&key(1), b"rec!")?;
        assert!(matches!(
            tree.delete(&key(99)),
            Err(StorageError::KeyNotFound)
        ));
        Ok(())
    }

    #[test]
    fn delete_down_to_empty_collapses_cleanly() -> Result<()> {
        let mut tree = new_tree(4)?;
        for i in 0..30 {
            tree.insert(&key(i), b"rec!")?;
        }
        for i in 0..30 {
            tree.delete(&key(i))?;
        }
        assert!(tree.is_empty()?);
        assert_eq!(tree.scan(None)?.len(), 0);
        Ok(())
    }

    #[test]
    fn insert_and_delete_in_random_order_preserves_survivors() -> Result<()> {
        let mut tree = new_tree(4)?;
        let inserted: Vec<i32> = (0..50).collect();
        for &i in inserted.iter() {
            tree.insert(&key(i * 7 % 53), b"rec!")?;
        }
        let deleted = [3, 10, 20, 30, 40];
        for &i in deleted.iter() {
            tree.delete(&key(i * 7 % 53))?;
        }
        let scanned = tree.scan(None)?;
        assert_eq!(scanned.len(), inserted.len() - deleted.len());
        let mut prev: Option<i32> = None;
        for (k, _) in &scanned {
            let v = i32::from_le_bytes(k.as_slice().try_into().unwrap());
            if let Some(p) = prev {
                assert!(v > p, "scan must yield strictly increasing keys");
            }
            prev = Some(v);
        }
        Ok(())
    }

    #[test]
    fn randomized_insert_delete_matches_a_btreemap_model() -> Result<()> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::BTreeMap;

        let mut rng = StdRng::seed_from_u64(0xB7);
        let mut tree = new_tree(4)?;
        let mut model: BTreeMap<i32, Vec<u8>> = BTreeMap::new();

        for _ in 0..500 {
            let k = rng.gen_range(0..200);
            if rng.gen_bool(0.7) {
                let record = [rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>()];
                let outcome = tree.insert(&key(k), &record);
                if model.contains_key(&k) {
                    assert!(matches!(outcome, Err(StorageError::DuplicateKey)));
                } else {
                    outcome?;
                    model.insert(k, record.to_vec());
                }
            } else {
                let outcome = tree.delete(&key(k));
                if model.remove(&k).is_some() {
                    outcome?;
                } else {
                    assert!(matches!(outcome, Err(StorageError::KeyNotFound)));
                }
            }
        }

        let scanned = tree.scan(None)?;
        let expected: Vec<(Vec<u8>, Vec<u8>)> = model
            .iter()
            .map(|(k, v)| (key(*k), v.clone()))
            .collect();
        assert_eq!(scanned, expected);
        Ok(())
    }

    fn leaf_count(tree: &BPlusTree) -> Result<usize> {
        let mut current = tree.leftmost_leaf()?;
        let mut count = 0usize;
        loop {
            count += 1;
            let guard = tree.buffer_pool().fetch_page(current)?;
            let right_sibling = NodeHeader::read(guard.read().as_bytes())?.right_sibling;
            if !right_sibling.is_valid() {
                return Ok(count);
            }
            current = right_sibling;
        }
    }

    #[test]
    fn delete_borrows_from_a_surplus_right_sibling_instead_of_merging() -> Result<()> {
        // record_size is chosen so a page holds only 4 leaf entries,
        // making the borrow-vs-merge choice reachable with a handful of
        // keys instead of hundreds.
        let record_size = 900;
        let mut tree = new_tree(record_size)?;
        assert_eq!(tree.config().leaf_max_keys, 4);
        assert_eq!(tree.config().leaf_min_keys, 2);

        for k in 1..=7 {
            tree.insert(&key(k), &vec![0u8; record_size])?;
        }
        // Splits land as [1,2] [3,4] [5,6,7]: three leaves, the
        // rightmost holding one entry more than the minimum.
        assert_eq!(leaf_count(&tree)?, 3);

        // Deleting 3 drops the middle leaf to 1 entry. Its left
        // sibling is already at the minimum and can't lend one, so the
        // borrow must come from the right sibling's surplus entry.
        tree.delete(&key(3))?;

        assert_eq!(
            leaf_count(&tree)?,
            3,
            "borrowing from a surplus sibling must not merge leaves"
        );
        assert!(tree.get(&key(3))?.is_none());
        assert!(tree.get(&key(4))?.is_some());

        let scanned = tree.scan(None)?;
        let keys: Vec<i32> = scanned
            .iter()
            .map(|(k, _)| i32::from_le_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![1, 2, 4, 5, 6, 7]);
        Ok(())
    }

    #[test]
    fn delete_down_to_one_leaf_collapses_the_internal_root() -> Result<()> {
        let record_size = 900;
        let mut tree = new_tree(record_size)?;
        assert_eq!(tree.config().leaf_max_keys, 4);

        for k in 1..=5 {
            tree.insert(&key(k), &vec![0u8; record_size])?;
        }

        // The fifth insert overflows the single leaf and splits it,
        // promoting its right half's first key into a fresh root.
        let root_header = {
            let guard = tree.buffer_pool().fetch_page(tree.root())?;
            NodeHeader::read(guard.read().as_bytes())?
        };
        assert!(!root_header.is_leaf());
        assert_eq!(root_header.key_count, 1);
        assert_eq!(leaf_count(&tree)?, 2);

        tree.delete(&key(1))?;
        tree.delete(&key(2))?;

        let root_header = {
            let guard = tree.buffer_pool().fetch_page(tree.root())?;
            NodeHeader::read(guard.read().as_bytes())?
        };
        assert!(
            root_header.is_leaf(),
            "merging the last two leaves must collapse the root to a leaf"
        );
        assert_eq!(leaf_count(&tree)?, 1);

        let scanned = tree.scan(None)?;
        let keys: Vec<i32> = scanned
            .iter()
            .map(|(k, _)| i32::from_le_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![3, 4, 5]);
        Ok(())
    }
}

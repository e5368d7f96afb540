//! Buffer pool implementation.
//!
//! Frames cache a raw `PageBuf` instead of a typed slotted page, since
//! the fixed-width node codec (`crate::node`) reads and writes page bytes
//! directly and needs no page-level wrapper of its own.

use crate::buffer::lru::LruCache;
use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::Pager;
use crate::types::PageId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for buffer pool operations.
pub trait BufferPool: Send + Sync {
    /// Fetch a page for reading.
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>>;

    /// Fetch a page for writing.
    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>>;

    /// Allocate a fresh page and pin it for writing.
    fn new_page(&self) -> Result<(PageId, PageGuardMut<'_>)>;

    /// Flush a specific page to the backing pager, if dirty.
    fn flush_page(&self, page_id: PageId) -> Result<()>;

    /// Flush every dirty page and sync the pager.
    fn flush_all(&self) -> Result<()>;

    /// Evict a page from the cache (it must not be pinned) and return it
    /// to the pager's free list.
    fn free_page(&self, page_id: PageId) -> Result<()>;

    /// Total number of pages the pager has allocated.
    fn page_count(&self) -> usize;

    /// Maximum number of frames this pool will cache.
    fn capacity(&self) -> usize;
}

struct BufferFrame {
    page: PageBuf,
    dirty: bool,
    pin_count: u32,
}

impl BufferFrame {
    fn new(page: PageBuf) -> Self {
        Self {
            page,
            dirty: false,
            pin_count: 0,
        }
    }
}

/// Caches pages in memory, evicting the least-recently-used unpinned
/// frame when full.
pub struct BufferPoolImpl {
    pager: Arc<dyn Pager>,
    frames: RwLock<HashMap<PageId, Arc<RwLock<BufferFrame>>>>,
    lru: RwLock<LruCache>,
    capacity: usize,
}

impl BufferPoolImpl {
    pub fn new(pager: Arc<dyn Pager>, capacity: usize) -> Self {
        Self {
            pager,
            frames: RwLock::new(HashMap::with_capacity(capacity)),
            lru: RwLock::new(LruCache::new(capacity)),
            capacity,
        }
    }

    fn get_frame(&self, page_id: PageId) -> Result<Arc<RwLock<BufferFrame>>> {
        {
            let frames = self.frames.read();
            if let Some(frame) = frames.get(&page_id) {
                self.lru.write().access(page_id.value());
                return Ok(Arc::clone(frame));
            }
        }
        self.load_page(page_id)
    }

    fn load_page(&self, page_id: PageId) -> Result<Arc<RwLock<BufferFrame>>> {
        let page = self.pager.fetch(page_id)?;

        if self.frames.read().len() >= self.capacity {
            self.evict_one()?;
        }

        let frame = Arc::new(RwLock::new(BufferFrame::new(page)));
        self.frames.write().insert(page_id, Arc::clone(&frame));
        self.lru.write().access(page_id.value());
        Ok(frame)
    }

    fn evict_one(&self) -> Result<()> {
        let mut lru = self.lru.write();
        loop {
            let page_id = match lru.pop_lru() {
                Some(id) => PageId::new(id),
                None => return Err(StorageError::fault("buffer pool exhausted: all frames pinned")),
            };

            let pinned = {
                let frames = self.frames.read();
                frames
                    .get(&page_id)
                    .map(|f| f.read().pin_count > 0)
                    .unwrap_or(false)
            };

            if pinned {
                lru.access(page_id.value());
                continue;
            }

            drop(lru);
            self.flush_page(page_id)?;
            self.frames.write().remove(&page_id);
            return Ok(());
        }
    }
}

impl BufferPool for BufferPoolImpl {
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.get_frame(page_id)?;
        frame.write().pin_count += 1;
        Ok(PageGuard {
            page_id,
            frame,
            pool: self,
        })
    }

    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>> {
        let frame = self.get_frame(page_id)?;
        {
            let mut f = frame.write();
            f.pin_count += 1;
            f.dirty = true;
        }
        Ok(PageGuardMut {
            page_id,
            frame,
            pool: self,
        })
    }

    fn new_page(&self) -> Result<(PageId, PageGuardMut<'_>)> {
        let page_id = self.pager.allocate()?;
        let frame = Arc::new(RwLock::new(BufferFrame {
            page: PageBuf::new(),
            dirty: true,
            pin_count: 1,
        }));

        self.frames.write().insert(page_id, Arc::clone(&frame));
        self.lru.write().access(page_id.value());

        Ok((
            page_id,
            PageGuardMut {
                page_id,
                frame,
                pool: self,
            },
        ))
    }

    fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frames = self.frames.read();
        if let Some(frame) = frames.get(&page_id) {
            let mut guard = frame.write();
            if guard.dirty {
                self.pager.write(page_id, guard.page.as_bytes())?;
                guard.dirty = false;
            }
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        let page_ids: Vec<PageId> = self.frames.read().keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        self.pager.flush()
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        self.frames.write().remove(&page_id);
        self.lru.write().remove(page_id.value());
        self.pager.free(page_id)
    }

    fn page_count(&self) -> usize {
        self.pager.page_count() as usize
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// RAII guard for read access to a page.
pub struct PageGuard<'a> {
    page_id: PageId,
    frame: Arc<RwLock<BufferFrame>>,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuard<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        let mut frame = self.frame.write();
        frame.pin_count = frame.pin_count.saturating_sub(1);
        self.pool.lru.write().access(self.page_id.value());
    }
}

pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, BufferFrame>,
}

impl<'a> std::ops::Deref for PageRef<'a> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.page
    }
}

/// RAII guard for write access to a page.
pub struct PageGuardMut<'a> {
    page_id: PageId,
    frame: Arc<RwLock<BufferFrame>>,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuardMut<'a> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn write(&self) -> PageRefMut<'_> {
        let mut guard = self.frame.write();
        guard.dirty = true;
        PageRefMut { guard }
    }

    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }
}

impl<'a> Drop for PageGuardMut<'a> {
    fn drop(&mut self) {
        let mut frame = self.frame.write();
        frame.pin_count = frame.pin_count.saturating_sub(1);
        self.pool.lru.write().access(self.page_id.value());
    }
}

pub struct PageRefMut<'a> {
    guard: RwLockWriteGuard<'a, BufferFrame>,
}

impl<'a> std::ops::Deref for PageRefMut<'a> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.page
    }
}

impl<'a> std::ops::DerefMut for PageRefMut<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.page
    }
}

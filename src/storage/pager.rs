//! Pager contract.

use crate::error::Result;
use crate::page::PageBuf;
use crate::types::PageId;

/// Fixed-size page store: allocate, free, fetch, flush.
///
/// Page indexes are stable for the life of the store. Page 0 is the
/// reserved header page and is never handed out by `allocate`.
pub trait Pager: Send + Sync {
    /// Allocate a page, preferring a freed page over growing the store.
    /// Fails with `OutOfStorage` if the backing store cannot grow.
    fn allocate(&self) -> Result<PageId>;

    /// Return a page to the free list. The page's prior contents are
    /// overwritten with the free-list link; callers must not keep using
    /// byte contents from a freed page.
    fn free(&self, page_id: PageId) -> Result<()>;

    /// Read a page's current bytes. Fails with `BadPage` if `page_id`
    /// is out of range or is the header page.
    fn fetch(&self, page_id: PageId) -> Result<PageBuf>;

    /// Overwrite a page's bytes in place. Visible to the next `fetch`.
    fn write(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Persist all pending writes to the backing store.
    fn flush(&self) -> Result<()>;

    /// Number of pages allocated in the store, including page 0.
    fn page_count(&self) -> u32;

    /// Root page of the serialized schema catalog, or `PageId::INVALID`
    /// before any table has been created.
    fn schema_root(&self) -> PageId;

    /// Update the schema catalog root recorded in the page-0 header.
    fn set_schema_root(&self, page_id: PageId) -> Result<()>;
}

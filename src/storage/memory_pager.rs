//! In-memory `Pager`.
//!
//! Pages live in a plain `Vec<PageBuf>` with no file I/O. Free-list
//! threading is identical to `FilePager` for parity between backends.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::file_header::FileHeader;
use crate::storage::pager::Pager;
use crate::types::PageId;
use parking_lot::RwLock;

struct Inner {
    header: FileHeader,
    pages: Vec<PageBuf>,
}

pub struct MemoryPager {
    inner: RwLock<Inner>,
}

impl MemoryPager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                header: FileHeader::new(),
                pages: vec![PageBuf::new()],
            }),
        }
    }
}

impl Default for MemoryPager {
    fn default() -> Self {
        Self::new()
    }
}

impl Pager for MemoryPager {
    fn allocate(&self) -> Result<PageId> {
        let mut inner = self.inner.write();

        let head = inner.header.free_list_head;
        if head.is_valid() {
            let next = {
                let page = &inner.pages[head.value() as usize];
                PageId::new(u32::from_le_bytes(page[0..4].try_into().unwrap()))
            };
            inner.header.free_list_head = next;
            inner.pages[head.value() as usize] = PageBuf::new();
            return Ok(head);
        }

        let page_id = PageId::new(inner.header.page_count);
        inner.header.page_count += 1;
        inner.pages.push(PageBuf::new());
        Ok(page_id)
    }

    fn free(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(StorageError::BadPage(page_id));
        }
        let mut inner = self.inner.write();
        if page_id.value() >= inner.header.page_count {
            return Err(StorageError::BadPage(page_id));
        }
        let head = inner.header.free_list_head;
        let mut link = PageBuf::new();
        link.as_bytes_mut()[0..4].copy_from_slice(&head.value().to_le_bytes());
        inner.pages[page_id.value() as usize] = link;
        inner.header.free_list_head = page_id;
        Ok(())
    }

    fn fetch(&self, page_id: PageId) -> Result<PageBuf> {
        let inner = self.inner.read();
        if !page_id.is_valid() || page_id.value() >= inner.header.page_count {
            return Err(StorageError::BadPage(page_id));
        }
        Ok(inner.pages[page_id.value() as usize].clone())
    }

    fn write(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        if !page_id.is_valid() || page_id.value() >= inner.header.page_count {
            return Err(StorageError::BadPage(page_id));
        }
        inner.pages[page_id.value() as usize] = PageBuf::from_bytes(data);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.inner.read().header.page_count
    }

    fn schema_root(&self) -> PageId {
        self.inner.read().header.schema_root
    }

    fn set_schema_root(&self, page_id: PageId) -> Result<()> {
        self.inner.write().header.schema_root = page_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_write_roundtrip() -> Result<()> {
        let pager = MemoryPager::new();
        let page_id = pager.allocate()?;
        assert_eq!(page_id, PageId::new(1));

        let mut data = vec![0u8; crate::types::PAGE_SIZE];
        data[0..5].copy_from_slice(b"hello");
        pager.write(page_id, &data)?;

        let read = pager.fetch(page_id)?;
        assert_eq!(&read[0..5], b"hello");
        Ok(())
    }

    #[test]
    fn free_list_reuses_pages() -> Result<()> {
        let pager = MemoryPager::new();
        let p1 = pager.allocate()?;
        let p2 = pager.allocate()?;
        pager.free(p1)?;
        let p3 = pager.allocate()?;
        assert_eq!(p3, p1);
        let _ = p2;
        Ok(())
    }

    #[test]
    fn fetch_out_of_range_is_bad_page() {
        let pager = MemoryPager::new();
        assert!(matches!(
            pager.fetch(PageId::new(99)),
            Err(StorageError::BadPage(_))
        ));
    }
}

//! Disk-backed `Pager`.
//!
//! The free list here is threaded through the pages themselves instead of
//! kept in an in-memory queue, so it survives a reopen: `free_list_head`
//! in the page-0 header points at the most recently freed page, and the
//! first four bytes of every free page hold the *next* free page (or 0).

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::file_header::FileHeader;
use crate::storage::pager::Pager;
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub struct FilePager {
    file: RwLock<File>,
    header: RwLock<FileHeader>,
    sync_on_write: bool,
}

impl FilePager {
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists && file.metadata()?.len() >= PAGE_SIZE as u64 {
            let mut file_ref = &file;
            let mut buf = vec![0u8; PAGE_SIZE];
            file_ref.read_exact(&mut buf)?;
            FileHeader::read(&buf)?
        } else {
            let header = FileHeader::new();
            let mut buf = vec![0u8; PAGE_SIZE];
            header.write(&mut buf);

            let mut file_ref = &file;
            file_ref.seek(SeekFrom::Start(0))?;
            file_ref.write_all(&buf)?;
            file_ref.sync_all()?;

            header
        };

        Ok(Self {
            file: RwLock::new(file),
            header: RwLock::new(header),
            sync_on_write,
        })
    }

    fn flush_header(&self) -> Result<()> {
        let header = self.header.read();
        let mut buf = vec![0u8; PAGE_SIZE];
        header.write(&mut buf);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        if self.sync_on_write {
            file.sync_data()?;
        }
        Ok(())
    }

    fn raw_read(&self, page_id: PageId) -> Result<PageBuf> {
        let offset = page_id.file_offset(PAGE_SIZE);
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(PageBuf::from_bytes(&buf))
    }

    fn raw_write(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = page_id.file_offset(PAGE_SIZE);
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if self.sync_on_write {
            file.sync_data()?;
        }
        Ok(())
    }
}

impl Pager for FilePager {
    fn allocate(&self) -> Result<PageId> {
        let reused = {
            let mut header = self.header.write();
            let head = header.free_list_head;
            if head.is_valid() {
                drop(header);
                let page = self.raw_read(head)?;
                let next = PageId::new(u32::from_le_bytes(page[0..4].try_into().unwrap()));
                let mut header = self.header.write();
                header.free_list_head = next;
                Some(head)
            } else {
                None
            }
        };

        if let Some(page_id) = reused {
            self.raw_write(page_id, PageBuf::new().as_bytes())?;
            self.flush_header()?;
            return Ok(page_id);
        }

        let page_id = {
            let mut header = self.header.write();
            let id = PageId::new(header.page_count);
            header.page_count += 1;
            id
        };

        self.raw_write(page_id, PageBuf::new().as_bytes())?;
        self.flush_header()?;
        Ok(page_id)
    }

    fn free(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(StorageError::BadPage(page_id));
        }
        let head = self.header.read().free_list_head;

        let mut link = PageBuf::new();
        link.as_bytes_mut()[0..4].copy_from_slice(&head.value().to_le_bytes());
        self.raw_write(page_id, link.as_bytes())?;

        self.header.write().free_list_head = page_id;
        self.flush_header()
    }

    fn fetch(&self, page_id: PageId) -> Result<PageBuf> {
        if !page_id.is_valid() || page_id.value() >= self.header.read().page_count {
            return Err(StorageError::BadPage(page_id));
        }
        self.raw_read(page_id)
    }

    fn write(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if !page_id.is_valid() || page_id.value() >= self.header.read().page_count {
            return Err(StorageError::BadPage(page_id));
        }
        if data.len() != PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }
        self.raw_write(page_id, data)
    }

    fn flush(&self) -> Result<()> {
        self.flush_header()?;
        self.file.write().sync_all()?;
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.header.read().page_count
    }

    fn schema_root(&self) -> PageId {
        self.header.read().schema_root
    }

    fn set_schema_root(&self, page_id: PageId) -> Result<()> {
        self.header.write().schema_root = page_id;
        self.flush_header()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_and_write_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pager = FilePager::open(&path, false)?;

        let page_id = pager.allocate()?;
        assert_eq!(page_id, PageId::new(1));

        let mut data = vec![0u8; PAGE_SIZE];
        data[0..5].copy_from_slice(b"hello");
        pager.write(page_id, &data)?;

        let read = pager.fetch(page_id)?;
        assert_eq!(&read[0..5], b"hello");
        Ok(())
    }

    #[test]
    fn free_list_reuses_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pager = FilePager::open(&path, false)?;

        let p1 = pager.allocate()?;
        let p2 = pager.allocate()?;
        let p3 = pager.allocate()?;
        assert_eq!((p1, p2, p3), (PageId::new(1), PageId::new(2), PageId::new(3)));

        pager.free(p2)?;
        let p4 = pager.allocate()?;
        assert_eq!(p4, p2);
        Ok(())
    }

    #[test]
    fn free_list_survives_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let pager = FilePager::open(&path, true)?;
            let p1 = pager.allocate()?;
            let _p2 = pager.allocate()?;
            pager.free(p1)?;
        }

        let pager = FilePager::open(&path, false)?;
        let reused = pager.allocate()?;
        assert_eq!(reused, PageId::new(1));
        Ok(())
    }

    #[test]
    fn schema_root_persists() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let pager = FilePager::open(&path, true)?;
            let root = pager.allocate()?;
            pager.set_schema_root(root)?;
        }

        let pager = FilePager::open(&path, false)?;
        assert_eq!(pager.schema_root(), PageId::new(1));
        Ok(())
    }
}

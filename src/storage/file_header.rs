//! Page-0 pager header.

use crate::error::{Result, StorageError};
use crate::types::{PageId, FILE_MAGIC, PAGE_SIZE};

/// `{ magic: u32, page_size: u32, page_count: u32, free_list_head: u32, schema_root: u32 }`,
/// little-endian, stored in the first bytes of page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub page_size: u32,
    /// Total number of pages allocated in the backing store, including page 0.
    pub page_count: u32,
    /// Head of the on-page free list, or `PageId::INVALID` (0) if empty.
    pub free_list_head: PageId,
    /// Root page of the serialized schema catalog, or `PageId::INVALID` (0)
    /// before any table has been created.
    pub schema_root: PageId,
}

impl FileHeader {
    /// A fresh header for a newly created store: one page (the header
    /// itself) allocated, empty free list, no schema yet.
    pub fn new() -> Self {
        Self {
            magic: FILE_MAGIC,
            page_size: PAGE_SIZE as u32,
            page_count: 1,
            free_list_head: PageId::INVALID,
            schema_root: PageId::INVALID,
        }
    }

    pub fn read(page: &[u8]) -> Result<Self> {
        if page.len() < PAGE_SIZE {
            return Err(StorageError::corruption("header page shorter than PAGE_SIZE"));
        }
        let magic = u32::from_le_bytes(page[0..4].try_into().unwrap());
        if magic != FILE_MAGIC {
            return Err(StorageError::corruption(format!(
                "bad file magic: expected {:#x}, got {:#x}",
                FILE_MAGIC, magic
            )));
        }
        let page_size = u32::from_le_bytes(page[4..8].try_into().unwrap());
        let page_count = u32::from_le_bytes(page[8..12].try_into().unwrap());
        let free_list_head = PageId::new(u32::from_le_bytes(page[12..16].try_into().unwrap()));
        let schema_root = PageId::new(u32::from_le_bytes(page[16..20].try_into().unwrap()));
        Ok(Self {
            magic,
            page_size,
            page_count,
            free_list_head,
            schema_root,
        })
    }

    pub fn write(&self, page: &mut [u8]) {
        page[0..4].copy_from_slice(&self.magic.to_le_bytes());
        page[4..8].copy_from_slice(&self.page_size.to_le_bytes());
        page[8..12].copy_from_slice(&self.page_count.to_le_bytes());
        page[12..16].copy_from_slice(&self.free_list_head.value().to_le_bytes());
        page[16..20].copy_from_slice(&self.schema_root.value().to_le_bytes());
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let header = FileHeader {
            magic: FILE_MAGIC,
            page_size: PAGE_SIZE as u32,
            page_count: 5,
            free_list_head: PageId::new(3),
            schema_root: PageId::new(4),
        };
        header.write(&mut buf);
        let restored = FileHeader::read(&buf).unwrap();
        assert_eq!(restored, header);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(FileHeader::read(&buf), Err(StorageError::Corruption(_))));
    }
}

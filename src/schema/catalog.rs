//! Catalog serialization: tables/indexes as a fixed-width descriptor
//! sequence written through a linked page chain rooted at `schema_root`.
//!
//! The same "first bytes of the page are a link, not payload" technique
//! `storage::file_pager`'s free list uses for freed pages is reused here
//! for catalog pages, since neither backend has a growable contiguous
//! region to write the catalog into. Every descriptor field is a fixed
//! width rather than length-prefixed, so a table or column count never
//! changes the byte offset of anything that comes after it at a given
//! nesting depth.

use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::record::{ColumnLayout, RecordLayout};
use crate::schema::{Index, SchemaRegistry, Table, TreeType};
use crate::types::{DataType, PageId, COLUMN_NAME_SIZE, PAGE_SIZE, TABLE_NAME_SIZE};

/// Bytes of page payload available after the 4-byte next-page link and
/// the 4-byte payload-length field.
const CHAIN_PAGE_CAPACITY: usize = PAGE_SIZE - 8;

/// A column descriptor: `name[32]` zero-padded, then a one-byte type tag.
const COLUMN_DESCRIPTOR_SIZE: usize = COLUMN_NAME_SIZE + 1;

fn write_fixed_name(buf: &mut Vec<u8>, name: &str, width: usize) {
    let bytes = name.as_bytes();
    let mut field = vec![0u8; width];
    field[..bytes.len()].copy_from_slice(bytes);
    buf.extend_from_slice(&field);
}

fn read_fixed_name(buf: &[u8], width: usize) -> Result<(String, usize)> {
    let field = buf
        .get(0..width)
        .ok_or_else(|| StorageError::corruption("catalog: name field truncated"))?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    let name = String::from_utf8(field[..end].to_vec())
        .map_err(|_| StorageError::corruption("catalog: name is not utf-8"))?;
    Ok((name, width))
}

fn encode_column(buf: &mut Vec<u8>, column: &ColumnLayout) {
    write_fixed_name(buf, column.name(), COLUMN_NAME_SIZE);
    buf.push(column.data_type().tag_byte());
}

fn decode_column(buf: &[u8]) -> Result<(ColumnLayout, usize)> {
    let (name, n) = read_fixed_name(buf, COLUMN_NAME_SIZE)?;
    let tag = *buf
        .get(n)
        .ok_or_else(|| StorageError::corruption("catalog: column tag truncated"))?;
    let data_type = DataType::from_tag_byte(tag)?;
    let column = ColumnLayout::new(name, data_type)?;
    Ok((column, COLUMN_DESCRIPTOR_SIZE))
}

/// `key_column` descriptor, then a one-byte value-column count, then that
/// many value-column descriptors.
fn encode_layout(buf: &mut Vec<u8>, layout: &RecordLayout) {
    encode_column(buf, layout.key_column());
    buf.push(layout.value_columns().len() as u8);
    for column in layout.value_columns() {
        encode_column(buf, column);
    }
}

fn decode_layout(buf: &[u8]) -> Result<(RecordLayout, usize)> {
    let (key, mut offset) = decode_column(buf)?;
    let value_count = *buf
        .get(offset)
        .ok_or_else(|| StorageError::corruption("catalog: value column count truncated"))?;
    offset += 1;
    let mut values = Vec::with_capacity(value_count as usize);
    for _ in 0..value_count {
        let (column, n) = decode_column(&buf[offset..])?;
        offset += n;
        values.push(column);
    }
    let layout = RecordLayout::new(key, values)?;
    Ok((layout, offset))
}

/// `name[32]`, `tree_type_u8`, the table's layout, `primary_root: u32`,
/// an `index_count: u8`, then that many `(column_index: u8, root: u32,
/// layout)` index descriptors.
fn encode_table(buf: &mut Vec<u8>, table: &Table) {
    write_fixed_name(buf, &table.name, TABLE_NAME_SIZE);
    buf.push(table.tree_type.tag());
    encode_layout(buf, &table.layout);
    buf.extend_from_slice(&table.tree_root.value().to_le_bytes());
    buf.push(table.indexes.len() as u8);
    for index in &table.indexes {
        buf.push(index.column_index as u8);
        buf.extend_from_slice(&index.tree_root.value().to_le_bytes());
        encode_layout(buf, &index.layout);
    }
}

fn decode_table(buf: &[u8]) -> Result<(Table, usize)> {
    let (name, mut offset) = read_fixed_name(buf, TABLE_NAME_SIZE)?;

    let tag = *buf
        .get(offset)
        .ok_or_else(|| StorageError::corruption("catalog: tree type tag truncated"))?;
    let tree_type = TreeType::from_tag(tag)?;
    offset += 1;

    let (layout, n) = decode_layout(&buf[offset..])?;
    offset += n;

    let tree_root = read_page_id(buf, &mut offset)?;

    let index_count = *buf
        .get(offset)
        .ok_or_else(|| StorageError::corruption("catalog: index count truncated"))?;
    offset += 1;

    let mut indexes = Vec::with_capacity(index_count as usize);
    for _ in 0..index_count {
        let column_index = *buf
            .get(offset)
            .ok_or_else(|| StorageError::corruption("catalog: index column_index truncated"))?
            as usize;
        offset += 1;
        let tree_root = read_page_id(buf, &mut offset)?;
        let (layout, n) = decode_layout(&buf[offset..])?;
        offset += n;
        indexes.push(Index {
            column_index,
            tree_root,
            layout,
        });
    }

    Ok((
        Table {
            name,
            layout,
            tree_root,
            tree_type,
            indexes,
        },
        offset,
    ))
}

fn read_page_id(buf: &[u8], offset: &mut usize) -> Result<PageId> {
    let bytes: [u8; 4] = buf
        .get(*offset..*offset + 4)
        .ok_or_else(|| StorageError::corruption("catalog: page id truncated"))?
        .try_into()
        .unwrap();
    *offset += 4;
    Ok(PageId::new(u32::from_le_bytes(bytes)))
}

/// Walks the existing catalog chain starting at `root` and frees every
/// page in it. A no-op if `root` is not a valid page.
fn free_chain(buffer_pool: &dyn BufferPool, root: PageId) -> Result<()> {
    let mut current = root;
    while current.is_valid() {
        let next = {
            let guard = buffer_pool.fetch_page(current)?;
            let page = guard.read();
            PageId::new(u32::from_le_bytes(page.as_bytes()[0..4].try_into().unwrap()))
        };
        buffer_pool.free_page(current)?;
        current = next;
    }
    Ok(())
}

/// Serializes every table in `registry` and writes it through a fresh
/// catalog page chain, freeing whatever chain `old_root` pointed at.
/// Returns the new chain's root, or `PageId::INVALID` if the registry
/// holds no tables.
pub fn store_catalog(
    buffer_pool: &dyn BufferPool,
    registry: &SchemaRegistry,
    old_root: PageId,
) -> Result<PageId> {
    free_chain(buffer_pool, old_root)?;

    let mut names = registry.get_all_table_names();
    names.sort();
    if names.is_empty() {
        return Ok(PageId::INVALID);
    }

    let mut blob = Vec::new();
    blob.extend_from_slice(&(names.len() as u32).to_le_bytes());
    for name in &names {
        encode_table(&mut blob, registry.get_table(name)?);
    }

    let chunks: Vec<&[u8]> = blob.chunks(CHAIN_PAGE_CAPACITY).collect();

    let mut page_ids = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        let (page_id, _) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let next = page_ids.get(i + 1).copied().unwrap_or(PageId::INVALID);
        let mut guard = buffer_pool.fetch_page_mut(page_ids[i])?;
        let page = guard.write();
        let bytes = page.as_bytes_mut();
        bytes[0..4].copy_from_slice(&next.value().to_le_bytes());
        bytes[4..8].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
        bytes[8..8 + chunk.len()].copy_from_slice(chunk);
    }

    Ok(page_ids[0])
}

/// Reads the catalog chain rooted at `root` and rebuilds a
/// `SchemaRegistry` from it. Returns an empty registry if `root` is not
/// a valid page (no table has been created yet).
pub fn load_catalog(buffer_pool: &dyn BufferPool, root: PageId) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    if !root.is_valid() {
        return Ok(registry);
    }

    let mut blob = Vec::new();
    let mut current = root;
    while current.is_valid() {
        let guard = buffer_pool.fetch_page(current)?;
        let page = guard.read();
        let bytes = page.as_bytes();
        let next = PageId::new(u32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        let len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        blob.extend_from_slice(&bytes[8..8 + len]);
        current = next;
    }

    let table_count = u32::from_le_bytes(
        blob.get(0..4)
            .ok_or_else(|| StorageError::corruption("catalog: table count truncated"))?
            .try_into()
            .unwrap(),
    );
    let mut offset = 4;
    for _ in 0..table_count {
        let (table, n) = decode_table(&blob[offset..])?;
        offset += n;
        registry.add_table(table.name.clone(), table.layout, table.tree_root, table.tree_type)?;
        for index in table.indexes {
            registry.create_index(&table.name, index.column_index, index.tree_root, index.layout)?;
        }
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolImpl;
    use crate::storage::MemoryPager;
    use std::sync::Arc;

    fn sample_registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        let layout = RecordLayout::new(
            ColumnLayout::new("id", DataType::TYPE_4).unwrap(),
            vec![ColumnLayout::new("name", DataType::TYPE_16).unwrap()],
        )
        .unwrap();
        registry
            .add_table("users", layout, PageId::new(5), TreeType::BPlusTree)
            .unwrap();
        let index_layout = RecordLayout::new(
            ColumnLayout::new("name", DataType::TYPE_16).unwrap(),
            vec![ColumnLayout::new("pk", DataType::TYPE_4).unwrap()],
        )
        .unwrap();
        registry
            .create_index("users", 1, PageId::new(6), index_layout)
            .unwrap();
        registry
    }

    #[test]
    fn catalog_round_trips_through_a_page_chain() -> Result<()> {
        let pager = Arc::new(MemoryPager::new());
        let pool = BufferPoolImpl::new(pager, 16);
        let registry = sample_registry();

        let root = store_catalog(&pool, &registry, PageId::INVALID)?;
        assert!(root.is_valid());

        let restored = load_catalog(&pool, root)?;
        let table = restored.get_table("users")?;
        assert_eq!(table.tree_root, PageId::new(5));
        assert_eq!(table.layout.record_size(), 16);
        assert_eq!(restored.get_index("users", 1)?.tree_root, PageId::new(6));
        Ok(())
    }

    #[test]
    fn empty_registry_has_no_root() -> Result<()> {
        let pager = Arc::new(MemoryPager::new());
        let pool = BufferPoolImpl::new(pager, 16);
        let registry = SchemaRegistry::new();
        let root = store_catalog(&pool, &registry, PageId::INVALID)?;
        assert_eq!(root, PageId::INVALID);
        Ok(())
    }

    #[test]
    fn restoring_frees_the_old_chain() -> Result<()> {
        let pager = Arc::new(MemoryPager::new());
        let pool = BufferPoolImpl::new(pager, 16);
        let registry = sample_registry();

        let root1 = store_catalog(&pool, &registry, PageId::INVALID)?;
        let before = pool.page_count();
        let root2 = store_catalog(&pool, &registry, root1)?;
        let after = pool.page_count();

        // The old chain's page was freed and reused rather than leaked.
        assert!(after <= before + 1);
        assert_ne!(root1, PageId::INVALID);
        assert_ne!(root2, PageId::INVALID);
        Ok(())
    }

    #[test]
    fn a_name_at_the_full_32_byte_width_round_trips_without_a_terminator() -> Result<()> {
        let pager = Arc::new(MemoryPager::new());
        let pool = BufferPoolImpl::new(pager, 16);
        let mut registry = SchemaRegistry::new();
        let long_name = "x".repeat(TABLE_NAME_SIZE);
        let layout = RecordLayout::new(ColumnLayout::new("id", DataType::TYPE_4).unwrap(), vec![]).unwrap();
        registry
            .add_table(long_name.clone(), layout, PageId::new(1), TreeType::BPlusTree)
            .unwrap();

        let root = store_catalog(&pool, &registry, PageId::INVALID)?;
        let restored = load_catalog(&pool, root)?;
        assert_eq!(restored.get_table(&long_name)?.tree_root, PageId::new(1));
        Ok(())
    }
}

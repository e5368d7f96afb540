//! Schema registry: named tables, their record layouts, and secondary
//! indexes.
//!
//! Wraps shared state behind a thin API guarded by `parking_lot::RwLock`.
//! The catalog is persisted as a sequence of fixed-width table
//! descriptors written through a linked chain rooted at `schema_root`.

mod catalog;

use crate::btree::{reachable_pages_from, BPlusTreeConfig};
use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::types::{PageId, COLUMN_NAME_SIZE, TABLE_NAME_SIZE};
use crate::record::RecordLayout;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which tree backs a table. Carried as a tag so the catalog format can
/// distinguish tree kinds, but only `BPlusTree` is constructible from a
/// safe entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeType {
    BTree,
    BPlusTree,
}

impl TreeType {
    fn tag(self) -> u8 {
        match self {
            TreeType::BTree => 0,
            TreeType::BPlusTree => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(TreeType::BTree),
            1 => Ok(TreeType::BPlusTree),
            other => Err(StorageError::corruption(format!(
                "unknown tree type tag {}",
                other
            ))),
        }
    }
}

/// A secondary index: a B+Tree keyed by one column of the owning table,
/// whose records are that table's primary key.
#[derive(Debug, Clone)]
pub struct Index {
    pub column_index: usize,
    pub tree_root: PageId,
    pub layout: RecordLayout,
}

/// A named table: its record layout, the tree root carrying its rows,
/// and any secondary indexes.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub layout: RecordLayout,
    pub tree_root: PageId,
    pub tree_type: TreeType,
    pub indexes: Vec<Index>,
}

/// A point-in-time copy of the whole catalog, for rollback after a
/// failed batch. Cloning every `Table` (rather than just its tree root)
/// means `restore()` can also undo a table or index having been added or
/// removed since the snapshot was taken, not just a root pointer change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    tables: HashMap<String, Table>,
}

fn validate_name(name: &str, max_len: usize, what: &str) -> Result<()> {
    if name.is_empty() || name.len() > max_len {
        return Err(StorageError::schema_conflict(format!(
            "{} name {:?} must be 1..={} bytes",
            what, name, max_len
        )));
    }
    Ok(())
}

/// `table_name -> Table` plus `(table_name, column_index) -> Index`.
/// Names are case-sensitive and bounded by
/// `TABLE_NAME_SIZE`/`COLUMN_NAME_SIZE`. Does not enforce foreign keys.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, Table>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Registers a freshly created table. Fails with `SchemaConflict` if
    /// the name is already registered or violates `TABLE_NAME_SIZE`.
    pub fn add_table(
        &mut self,
        name: impl Into<String>,
        layout: RecordLayout,
        tree_root: PageId,
        tree_type: TreeType,
    ) -> Result<()> {
        let name = name.into();
        validate_name(&name, TABLE_NAME_SIZE, "table")?;
        for column in layout.columns() {
            validate_name(column.name(), COLUMN_NAME_SIZE, "column")?;
        }
        if self.tables.contains_key(&name) {
            return Err(StorageError::schema_conflict(format!(
                "table {:?} already exists",
                name
            )));
        }
        self.tables.insert(
            name.clone(),
            Table {
                name,
                layout,
                tree_root,
                tree_type,
                indexes: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StorageError::schema_conflict(format!("unknown table {:?}", name)))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::schema_conflict(format!("unknown table {:?}", name)))
    }

    pub fn get_all_table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| StorageError::schema_conflict(format!("unknown table {:?}", name)))
    }

    /// Registers a secondary index on `column_index` of `table_name`.
    /// Fails with `SchemaConflict` if the table or column does not exist,
    /// or an index on that column already exists.
    pub fn create_index(
        &mut self,
        table_name: &str,
        column_index: usize,
        tree_root: PageId,
        layout: RecordLayout,
    ) -> Result<()> {
        let table = self.get_table_mut(table_name)?;
        if column_index >= table.layout.columns().len() {
            return Err(StorageError::schema_conflict(format!(
                "column index {} out of range for table {:?}",
                column_index, table_name
            )));
        }
        if table.indexes.iter().any(|idx| idx.column_index == column_index) {
            return Err(StorageError::schema_conflict(format!(
                "index on column {} of table {:?} already exists",
                column_index, table_name
            )));
        }
        table.indexes.push(Index {
            column_index,
            tree_root,
            layout,
        });
        Ok(())
    }

    pub fn get_index(&self, table_name: &str, column_index: usize) -> Result<&Index> {
        self.get_table(table_name)?
            .indexes
            .iter()
            .find(|idx| idx.column_index == column_index)
            .ok_or_else(|| {
                StorageError::schema_conflict(format!(
                    "no index on column {} of table {:?}",
                    column_index, table_name
                ))
            })
    }

    pub fn drop_index(&mut self, table_name: &str, column_index: usize) -> Result<Index> {
        let table = self.get_table_mut(table_name)?;
        let pos = table
            .indexes
            .iter()
            .position(|idx| idx.column_index == column_index)
            .ok_or_else(|| {
                StorageError::schema_conflict(format!(
                    "no index on column {} of table {:?}",
                    column_index, table_name
                ))
            })?;
        Ok(table.indexes.remove(pos))
    }

    /// Captures the full catalog, to be restored if a subsequent batch
    /// fails.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tables: self.tables.clone(),
        }
    }

    /// Rolls the catalog back to a prior `snapshot()`, freeing every page
    /// that is reachable from a table's or index's current tree but was
    /// not reachable at snapshot time — splits, new tables, and new
    /// indexes all allocate pages that become orphaned the moment their
    /// catalog entry is rolled back, and this is the only place left that
    /// still knows both the old and the new root to diff them.
    pub fn restore(&mut self, snapshot: &Snapshot, buffer_pool: &Arc<dyn BufferPool>) -> Result<()> {
        for (name, current) in &self.tables {
            let before = snapshot.tables.get(name);
            free_unreachable_since(buffer_pool, &current.layout, before.map(|t| t.tree_root), current.tree_root)?;
            for index in &current.indexes {
                let before_root = before.and_then(|t| {
                    t.indexes
                        .iter()
                        .find(|idx| idx.column_index == index.column_index)
                        .map(|idx| idx.tree_root)
                });
                free_unreachable_since(buffer_pool, &index.layout, before_root, index.tree_root)?;
            }
        }
        self.tables = snapshot.tables.clone();
        Ok(())
    }
}

/// Frees every page reachable from `current_root` that was not already
/// reachable from `before_root` (`None` if the tree didn't exist at
/// snapshot time, in which case the whole current tree is freed).
/// No-op when the root hasn't moved since the snapshot.
fn free_unreachable_since(
    buffer_pool: &Arc<dyn BufferPool>,
    layout: &RecordLayout,
    before_root: Option<PageId>,
    current_root: PageId,
) -> Result<()> {
    if before_root == Some(current_root) {
        return Ok(());
    }
    let node_layout = BPlusTreeConfig::create(layout.key_type(), layout.record_size())?.layout();
    let before_pages: HashSet<PageId> = match before_root {
        Some(root) => reachable_pages_from(buffer_pool, &node_layout, root)?.into_iter().collect(),
        None => HashSet::new(),
    };
    for page in reachable_pages_from(buffer_pool, &node_layout, current_root)? {
        if !before_pages.contains(&page) {
            buffer_pool.free_page(page)?;
        }
    }
    Ok(())
}

pub use catalog::{load_catalog, store_catalog};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ColumnLayout;
    use crate::types::DataType;

    fn sample_layout() -> RecordLayout {
        RecordLayout::new(
            ColumnLayout::new("id", DataType::TYPE_4).unwrap(),
            vec![ColumnLayout::new("name", DataType::TYPE_16).unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn add_and_get_table() -> Result<()> {
        let mut registry = SchemaRegistry::new();
        registry.add_table("users", sample_layout(), PageId::new(1), TreeType::BPlusTree)?;
        assert_eq!(registry.get_table("users")?.tree_root, PageId::new(1));
        assert_eq!(registry.get_all_table_names(), vec!["users".to_string()]);
        Ok(())
    }

    #[test]
    fn duplicate_table_name_is_schema_conflict() {
        let mut registry = SchemaRegistry::new();
        registry
            .add_table("users", sample_layout(), PageId::new(1), TreeType::BPlusTree)
            .unwrap();
        let result = registry.add_table("users", sample_layout(), PageId::new(2), TreeType::BPlusTree);
        assert!(matches!(result, Err(StorageError::SchemaConflict(_))));
    }

    #[test]
    fn create_index_and_drop_it() -> Result<()> {
        let mut registry = SchemaRegistry::new();
        registry.add_table("users", sample_layout(), PageId::new(1), TreeType::BPlusTree)?;
        let index_layout = RecordLayout::new(
            ColumnLayout::new("name", DataType::TYPE_16).unwrap(),
            vec![ColumnLayout::new("pk", DataType::TYPE_4).unwrap()],
        )?;
        registry.create_index("users", 1, PageId::new(2), index_layout)?;
        assert_eq!(registry.get_index("users", 1)?.tree_root, PageId::new(2));
        registry.drop_index("users", 1)?;
        assert!(registry.get_index("users", 1).is_err());
        Ok(())
    }

    fn memory_pool() -> Arc<dyn BufferPool> {
        use crate::buffer::BufferPoolImpl;
        use crate::storage::MemoryPager;
        Arc::new(BufferPoolImpl::new(Arc::new(MemoryPager::new()), 64))
    }

    #[test]
    fn snapshot_restores_tree_roots() -> Result<()> {
        let pool = memory_pool();
        let tree = crate::btree::BPlusTree::create(pool.clone(), DataType::TYPE_4, 8)?;
        let mut registry = SchemaRegistry::new();
        registry.add_table("users", sample_layout(), tree.root(), TreeType::BPlusTree)?;
        let snapshot = registry.snapshot();

        registry.get_table_mut("users")?.tree_root = PageId::new(99);
        assert_eq!(registry.get_table("users")?.tree_root, PageId::new(99));

        registry.restore(&snapshot, &pool)?;
        assert_eq!(registry.get_table("users")?.tree_root, tree.root());
        Ok(())
    }

    #[test]
    fn restore_frees_pages_allocated_since_the_snapshot() -> Result<()> {
        let pool = memory_pool();
        let mut tree = crate::btree::BPlusTree::create(pool.clone(), DataType::TYPE_4, 900)?;
        let mut registry = SchemaRegistry::new();
        registry.add_table(
            "users",
            RecordLayout::new(
                ColumnLayout::new("id", DataType::TYPE_4).unwrap(),
                vec![ColumnLayout::new("pad", DataType::TYPE_64).unwrap()],
            )?,
            tree.root(),
            TreeType::BPlusTree,
        )?;
        let snapshot = registry.snapshot();
        let pages_before = pool.page_count();

        for k in 0..8i32 {
            tree.insert(&k.to_le_bytes(), &vec![0u8; 900])?;
        }
        assert!(pool.page_count() > pages_before, "inserts past one leaf's capacity must split");
        registry.get_table_mut("users")?.tree_root = tree.root();

        registry.restore(&snapshot, &pool)?;
        assert_eq!(registry.get_table("users")?.tree_root, snapshot.tables["users"].tree_root);

        // The pages the splits allocated are now free; a fresh allocation
        // reuses one of them instead of growing the file further.
        let reused = pool.new_page()?.0;
        assert!(reused.value() < pool.page_count() as u32, "a freed page should have been reused");
        Ok(())
    }

    #[test]
    fn drop_table_removes_it() -> Result<()> {
        let mut registry = SchemaRegistry::new();
        registry.add_table("users", sample_layout(), PageId::new(1), TreeType::BPlusTree)?;
        registry.drop_table("users")?;
        assert!(registry.get_table("users").is_err());
        Ok(())
    }
}

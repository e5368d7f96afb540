//! # Paged B+Tree storage core
//!
//! The indexed-record storage layer of a small relational database: a
//! paged, on-disk (or in-memory) B+Tree with cursor-based traversal and a
//! schema registry that owns tree roots and record layouts. The VM
//! opcode interpreter, SQL parser, query planner, REPL, and CLI surface
//! are out of scope; they are external collaborators of this crate.
//!
//! ## Architecture
//!
//! - **Storage layer** (`storage`): the pager contract plus its two
//!   backends, `FilePager` and `MemoryPager`.
//! - **Buffer pool** (`buffer`): LRU page cache with dirty tracking.
//! - **Node codec** (`node`): fixed-width leaf/internal page layout.
//! - **B+Tree** (`btree`): creation, search, insert/delete with
//!   split/merge propagation, and the `Cursor` traversal state machine.
//! - **Record layout** (`record`): typed columns and values.
//! - **Schema registry** (`schema`): named tables, their layouts and
//!   tree roots, and secondary indexes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use btree_storage::{Database, PagerConfig};
//! use btree_storage::record::{ColumnLayout, RecordLayout, Value};
//! use btree_storage::types::DataType;
//!
//! let db = Database::open(PagerConfig::in_memory())?;
//! let layout = RecordLayout::new(
//!     ColumnLayout::new("id", DataType::TYPE_4)?,
//!     vec![ColumnLayout::new("name", DataType::TYPE_16)?],
//! )?;
//! db.create_table("users", layout)?;
//!
//! let mut users = db.table("users")?;
//! users.insert(&Value::Int(1), &[Value::Str(b"alice".to_vec())])?;
//! assert!(users.get(&Value::Int(1))?.is_some());
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod node;
pub mod page;
pub mod record;
pub mod schema;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{PageId, PAGE_SIZE};

use btree::{BPlusTreeConfig, BPlusTree, Cursor};
use buffer::{BufferPool, BufferPoolImpl};
use record::{RecordLayout, Value};
use schema::{load_catalog, store_catalog, Index, SchemaRegistry, Snapshot, TreeType};
use storage::{FilePager, MemoryPager, Pager};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How to open a `Database`: on disk at a path, or purely in memory.
#[derive(Debug, Clone)]
pub struct PagerConfig {
    pub path: Option<PathBuf>,
    pub buffer_pool_size: usize,
    pub sync_on_write: bool,
}

impl PagerConfig {
    /// A database backed by a single file.
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: Some(path.into()),
            buffer_pool_size: 1000,
            sync_on_write: false,
        }
    }

    /// A database that keeps its page graph in memory with no I/O.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            buffer_pool_size: 1000,
            sync_on_write: false,
        }
    }

    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }
}

/// Top-level handle: a pager, the buffer pool over it, and the schema
/// registry describing every table and index currently stored.
///
/// Shared state behind a thin API, guarded by `parking_lot::RwLock`.
pub struct Database {
    pager: Arc<dyn Pager>,
    buffer_pool: Arc<dyn BufferPool>,
    registry: RwLock<SchemaRegistry>,
}

impl Database {
    /// Opens an existing database or creates a new one at `config`'s
    /// location, reloading the schema catalog from `schema_root`.
    pub fn open(config: PagerConfig) -> Result<Self> {
        let pager: Arc<dyn Pager> = match &config.path {
            Some(path) => Arc::new(FilePager::open(path, config.sync_on_write)?),
            None => Arc::new(MemoryPager::new()),
        };
        let buffer_pool: Arc<dyn BufferPool> =
            Arc::new(BufferPoolImpl::new(pager.clone(), config.buffer_pool_size));
        let registry = load_catalog(buffer_pool.as_ref(), pager.schema_root())?;
        Ok(Self {
            pager,
            buffer_pool,
            registry: RwLock::new(registry),
        })
    }

    fn persist_catalog(&self) -> Result<()> {
        let new_root = {
            let registry = self.registry.read();
            store_catalog(self.buffer_pool.as_ref(), &registry, self.pager.schema_root())?
        };
        self.pager.set_schema_root(new_root)
    }

    /// Persists the catalog, rolling the registry back to `snapshot` on
    /// failure so a DDL call either fully succeeds or leaves the catalog
    /// exactly as it was before it ran.
    fn persist_catalog_or_restore(&self, snapshot: &Snapshot) -> Result<()> {
        match self.persist_catalog() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.registry.write().restore(snapshot, &self.buffer_pool)?;
                Err(e)
            }
        }
    }

    /// Creates an empty table with the given record layout. If the
    /// catalog fails to persist afterward, the registry (and the fresh
    /// tree's page) are rolled back to their pre-call state.
    pub fn create_table(&self, name: &str, layout: RecordLayout) -> Result<()> {
        let snapshot = self.registry.read().snapshot();
        let tree = BPlusTree::create(self.buffer_pool.clone(), layout.key_type(), layout.record_size())?;
        {
            let mut registry = self.registry.write();
            registry.add_table(name, layout, tree.root(), TreeType::BPlusTree)?;
        }
        self.persist_catalog_or_restore(&snapshot)
    }

    /// Removes a table and its indexes from the catalog. The pages
    /// making up its tree are not reclaimed; space reuse after a drop is
    /// left to a caller that cares about it. If the catalog fails to
    /// persist afterward, the dropped table is restored.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let snapshot = self.registry.read().snapshot();
        self.registry.write().drop_table(name)?;
        self.persist_catalog_or_restore(&snapshot)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.registry.read().get_all_table_names()
    }

    /// Opens a live handle over `name`'s primary tree.
    pub fn table(&self, name: &str) -> Result<TableHandle<'_>> {
        let (layout, root) = {
            let registry = self.registry.read();
            let table = registry.get_table(name)?;
            (table.layout.clone(), table.tree_root)
        };
        let config = BPlusTreeConfig::create(layout.key_type(), layout.record_size())?;
        let tree = Arc::new(RwLock::new(BPlusTree::open(self.buffer_pool.clone(), config, root)));
        Ok(TableHandle {
            db: self,
            name: name.to_string(),
            layout,
            tree,
        })
    }

    /// Builds a secondary index on `column_index` of `table_name` by
    /// scanning every existing row. If the catalog fails to persist
    /// afterward, the registry and the fresh index tree's pages are
    /// rolled back.
    pub fn create_index(&self, table_name: &str, column_index: usize) -> Result<()> {
        let snapshot = self.registry.read().snapshot();
        let (table_layout, table_root) = {
            let registry = self.registry.read();
            let table = registry.get_table(table_name)?;
            (table.layout.clone(), table.tree_root)
        };

        let indexed_column = table_layout
            .columns()
            .get(column_index)
            .ok_or_else(|| {
                StorageError::schema_conflict(format!(
                    "column index {} out of range for table {:?}",
                    column_index, table_name
                ))
            })?
            .clone();

        let index_layout = RecordLayout::new(
            record::ColumnLayout::new(indexed_column.name(), indexed_column.data_type())?,
            vec![record::ColumnLayout::new("pk", table_layout.key_type())?],
        )?;

        let mut index_tree = BPlusTree::create(
            self.buffer_pool.clone(),
            index_layout.key_type(),
            index_layout.record_size(),
        )?;

        let table_config = BPlusTreeConfig::create(table_layout.key_type(), table_layout.record_size())?;
        let table_tree = Arc::new(RwLock::new(BPlusTree::open(self.buffer_pool.clone(), table_config, table_root)));
        let mut cursor = Cursor::new(table_tree);
        let mut has_row = cursor.first()?;
        while has_row {
            let key_bytes = cursor.key()?;
            let record_bytes = cursor.record()?;
            let index_key = if column_index == 0 {
                key_bytes.clone()
            } else {
                table_layout
                    .value_bytes(&record_bytes, column_index - 1)
                    .to_vec()
            };
            index_tree.insert(&index_key, &key_bytes)?;
            has_row = cursor.next()?;
        }

        {
            let mut registry = self.registry.write();
            registry.create_index(table_name, column_index, index_tree.root(), index_layout)?;
        }
        self.persist_catalog_or_restore(&snapshot)
    }

    /// Drops a secondary index from the catalog. Its tree's pages are
    /// not reclaimed, matching `drop_table`'s tradeoff. If the catalog
    /// fails to persist afterward, the dropped index is restored.
    pub fn drop_index(&self, table_name: &str, column_index: usize) -> Result<()> {
        let snapshot = self.registry.read().snapshot();
        self.registry.write().drop_index(table_name, column_index)?;
        self.persist_catalog_or_restore(&snapshot)
    }

    /// Looks up a secondary index's current root and layout.
    pub fn index(&self, table_name: &str, column_index: usize) -> Result<Index> {
        Ok(self.registry.read().get_index(table_name, column_index)?.clone())
    }

    /// Flushes the catalog and every dirty page to the backing pager.
    pub fn flush(&self) -> Result<()> {
        self.persist_catalog()?;
        self.buffer_pool.flush_all()
    }
}

/// A live view over one table's tree: typed insert/get/delete, plus a
/// raw `Cursor` for ordered traversal. Holds the only open `BPlusTree`
/// for this table; creating a second `TableHandle` for the same table
/// while this one is live would let them disagree about the tree root
/// until the next catalog reload, so callers must serialize access.
pub struct TableHandle<'a> {
    db: &'a Database,
    name: String,
    layout: RecordLayout,
    tree: Arc<RwLock<BPlusTree>>,
}

impl<'a> TableHandle<'a> {
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Inserts a new row. Fails with `DuplicateKey` if `key` already
    /// exists. If the catalog fails to persist the tree's new root
    /// afterward, the registry and this handle's tree are rolled back to
    /// the pre-insert snapshot.
    pub fn insert(&mut self, key: &Value, values: &[Value]) -> Result<()> {
        let key_bytes = key.encode(self.layout.key_type())?;
        let mut record = Vec::with_capacity(self.layout.record_size());
        for (value, column) in values.iter().zip(self.layout.value_columns()) {
            record.extend(value.encode(column.data_type())?);
        }
        let snapshot = self.db.registry.read().snapshot();
        self.tree.write().insert(&key_bytes, &record)?;
        self.sync_root_or_restore(&snapshot)
    }

    /// Looks up a row by its primary key.
    pub fn get(&self, key: &Value) -> Result<Option<Vec<Value>>> {
        let key_bytes = key.encode(self.layout.key_type())?;
        match self.tree.read().get(&key_bytes)? {
            Some(record) => Ok(Some(self.layout.decode_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Deletes a row by its primary key. Fails with `KeyNotFound` if it
    /// does not exist. Rolled back the same way as `insert` if the
    /// catalog fails to persist afterward.
    pub fn delete(&mut self, key: &Value) -> Result<()> {
        let key_bytes = key.encode(self.layout.key_type())?;
        let snapshot = self.db.registry.read().snapshot();
        self.tree.write().delete(&key_bytes)?;
        self.sync_root_or_restore(&snapshot)
    }

    /// A positioned cursor over this table's tree. The tree is shared
    /// behind `Arc<RwLock<_>>`, so more than one cursor may be live over
    /// it at once; a mutation through one is visible to the others as
    /// `CursorState::RequiresSeek` on their next access.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.tree.clone())
    }

    /// Every row in key order.
    pub fn scan_all(&self) -> Result<Vec<(Value, Vec<Value>)>> {
        self.tree
            .read()
            .scan(None)?
            .into_iter()
            .map(|(key, record)| {
                Ok((self.layout.decode_key(&key)?, self.layout.decode_record(&record)?))
            })
            .collect()
    }

    /// Drives a full table scan in key order, invoking `emit` once per
    /// row with every column's value (key column first). `emit` must not
    /// reenter the cursor driving this scan.
    pub fn scan_emit<F>(&self, mut emit: F) -> Result<()>
    where
        F: FnMut(&[Value]) -> Result<()>,
    {
        let mut cursor = Cursor::new(self.tree.clone());
        let mut has_row = cursor.first()?;
        while has_row {
            let mut row = vec![self.layout.decode_key(&cursor.key()?)?];
            row.extend(self.layout.decode_record(&cursor.record()?)?);
            emit(&row)?;
            has_row = cursor.next()?;
        }
        Ok(())
    }

    fn sync_root(&mut self) -> Result<()> {
        let root = self.tree.read().root();
        self.db
            .registry
            .write()
            .get_table_mut(&self.name)?
            .tree_root = root;
        self.db.persist_catalog()
    }

    /// `sync_root`, but on failure rolls the registry back to `snapshot`
    /// and reopens this handle's tree from the restored root so it never
    /// points at pages `restore()` has freed.
    fn sync_root_or_restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        match self.sync_root() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.db.registry.write().restore(snapshot, &self.db.buffer_pool)?;
                let config = *self.tree.read().config();
                let restored_root = self.db.registry.read().get_table(&self.name)?.tree_root;
                *self.tree.write() = BPlusTree::open(self.db.buffer_pool.clone(), config, restored_root);
                Err(e)
            }
        }
    }
}

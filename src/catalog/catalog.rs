use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::catalog::Schema;
use crate::common::{ColType, DbError, FileId, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub ty: ColType,
    pub len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub file_id: FileId,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub file_id: FileId,
    pub columns: Vec<ColumnMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TableMeta {
    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.ty, c.len))
                .collect(),
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogData {
    tables: HashMap<String, TableMeta>,
    next_file_id: FileId,
}

/// In-memory table/column/index metadata behind a reader/writer latch (DDL
/// takes the writer side), persisted to a single bincode file.
pub struct Catalog {
    inner: RwLock<CatalogData>,
    path: PathBuf,
}

impl Catalog {
    /// Loads the catalog file, or starts empty when it does not exist yet.
    /// A file that exists but does not parse is corrupt metadata: startup
    /// fails.
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let bytes = std::fs::read(&path)?;
            bincode::deserialize(&bytes).map_err(|_| DbError::Deserialization)?
        } else {
            CatalogData {
                tables: HashMap::new(),
                next_file_id: 1,
            }
        };
        Ok(Self {
            inner: RwLock::new(data),
            path,
        })
    }

    pub fn save(&self) -> Result<()> {
        let inner = self.inner.read().unwrap();
        let bytes = bincode::serialize(&*inner).map_err(|_| DbError::Deserialization)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    pub fn allocate_file_id(&self) -> FileId {
        let mut inner = self.inner.write().unwrap();
        let id = inner.next_file_id;
        inner.next_file_id += 1;
        id
    }

    pub fn create_table(&self, name: &str, columns: Vec<ColumnMeta>, file_id: FileId) -> Result<TableMeta> {
        let mut inner = self.inner.write().unwrap();
        if inner.tables.contains_key(name) {
            return Err(DbError::TableExists(name.to_string()));
        }
        let meta = TableMeta {
            name: name.to_string(),
            file_id,
            columns,
            indexes: Vec::new(),
        };
        inner.tables.insert(name.to_string(), meta.clone());
        Ok(meta)
    }

    pub fn drop_table(&self, name: &str) -> Result<TableMeta> {
        let mut inner = self.inner.write().unwrap();
        inner
            .tables
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table(&self, name: &str) -> Result<TableMeta> {
        let inner = self.inner.read().unwrap();
        inner
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn tables(&self) -> Vec<TableMeta> {
        let inner = self.inner.read().unwrap();
        inner.tables.values().cloned().collect()
    }

    pub fn schema(&self, table: &str) -> Result<Schema> {
        Ok(self.table(table)?.schema())
    }

    pub fn add_index(&self, meta: IndexMeta) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let table = inner
            .tables
            .get_mut(&meta.table)
            .ok_or_else(|| DbError::TableNotFound(meta.table.clone()))?;
        if table.indexes.iter().any(|i| i.name == meta.name) {
            return Err(DbError::Other(format!("Index {} already exists", meta.name)));
        }
        table.indexes.push(meta);
        Ok(())
    }

    pub fn drop_index(&self, table: &str, index: &str) -> Result<IndexMeta> {
        let mut inner = self.inner.write().unwrap();
        let table = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        let pos = table
            .indexes
            .iter()
            .position(|i| i.name == index)
            .ok_or_else(|| DbError::IndexNotFound(index.to_string()))?;
        Ok(table.indexes.remove(pos))
    }
}

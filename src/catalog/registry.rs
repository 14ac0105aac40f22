use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::common::{DbError, Result};
use crate::index::BTreeIndex;
use crate::record::HeapFile;

/// Open heap and index handles, shared by the executors, the transaction
/// manager (abort undo) and recovery.
#[derive(Default)]
pub struct TableRegistry {
    heaps: RwLock<HashMap<String, Arc<HeapFile>>>,
    indexes: RwLock<HashMap<String, Vec<Arc<BTreeIndex>>>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_heap(&self, table: &str, heap: Arc<HeapFile>) {
        self.heaps.write().unwrap().insert(table.to_string(), heap);
    }

    pub fn unregister_heap(&self, table: &str) {
        self.heaps.write().unwrap().remove(table);
        self.indexes.write().unwrap().remove(table);
    }

    pub fn heap(&self, table: &str) -> Result<Arc<HeapFile>> {
        self.heaps
            .read()
            .unwrap()
            .get(table)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    pub fn register_index(&self, table: &str, index: Arc<BTreeIndex>) {
        self.indexes
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(index);
    }

    pub fn unregister_index(&self, table: &str, index_name: &str) {
        if let Some(list) = self.indexes.write().unwrap().get_mut(table) {
            list.retain(|i| i.name() != index_name);
        }
    }

    pub fn indexes_of(&self, table: &str) -> Vec<Arc<BTreeIndex>> {
        self.indexes
            .read()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn index(&self, table: &str, index_name: &str) -> Result<Arc<BTreeIndex>> {
        self.indexes_of(table)
            .into_iter()
            .find(|i| i.name() == index_name)
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))
    }

    pub fn tables(&self) -> Vec<String> {
        self.heaps.read().unwrap().keys().cloned().collect()
    }
}

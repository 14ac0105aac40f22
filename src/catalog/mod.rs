mod catalog;
mod registry;
mod schema;

pub use catalog::{Catalog, ColumnMeta, IndexMeta, TableMeta};
pub use registry::TableRegistry;
pub use schema::{Column, Schema};

use crate::common::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout of a database directory: one data file per table, one index
/// file per index, the write-ahead log and the catalog file.
#[derive(Debug, Clone)]
pub struct DbFiles {
    db_directory: PathBuf,
}

impl DbFiles {
    pub fn new(db_path: &Path) -> Result<Self> {
        fs::create_dir_all(db_path)?;
        Ok(Self {
            db_directory: db_path.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.db_directory
    }

    pub fn table_file_path(&self, table: &str) -> PathBuf {
        self.db_directory.join(format!("{}.tbl", table))
    }

    pub fn index_file_path(&self, table: &str, index: &str) -> PathBuf {
        self.db_directory.join(format!("{}.{}.idx", table, index))
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.db_directory.join("db.log")
    }

    pub fn meta_file_path(&self) -> PathBuf {
        self.db_directory.join("db.meta")
    }

    pub fn destroy(&self) -> Result<()> {
        if self.db_directory.exists() {
            fs::remove_dir_all(&self.db_directory)?;
        }
        Ok(())
    }
}

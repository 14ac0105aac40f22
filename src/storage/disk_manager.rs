use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::common::{DbError, FileId, PageId, Result, PAGE_SIZE};
use crate::storage::{File, FileMode, PosixFile};

/// Mediates all file IO: page files addressed by (file id, page number) and
/// the append-only log file.
pub struct DiskManager {
    files: Mutex<HashMap<FileId, Box<dyn File>>>,
    log_file: Mutex<Box<dyn File>>,
}

impl DiskManager {
    pub fn new(log_path: &Path) -> Result<Self> {
        let log_file = PosixFile::new(log_path, FileMode::WRITE)?;
        Ok(Self {
            files: Mutex::new(HashMap::new()),
            log_file: Mutex::new(Box::new(log_file)),
        })
    }

    /// Opens (creating if absent) a page file and registers it under `file_id`.
    pub fn open_file(&self, file_id: FileId, path: &Path) -> Result<()> {
        let file = PosixFile::new(path, FileMode::WRITE)?;
        self.files.lock().unwrap().insert(file_id, Box::new(file));
        Ok(())
    }

    pub fn close_file(&self, file_id: FileId) {
        self.files.lock().unwrap().remove(&file_id);
    }

    pub fn delete_file(&self, file_id: FileId, path: &PathBuf) -> Result<()> {
        self.close_file(file_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(&page_id.file_id())
            .ok_or_else(|| DbError::Other(format!("File {} not open", page_id.file_id())))?;
        let data = file.read_block(page_id.page_no() as usize * PAGE_SIZE, PAGE_SIZE)?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(&page_id.file_id())
            .ok_or_else(|| DbError::Other(format!("File {} not open", page_id.file_id())))?;
        file.write_block(buf, page_id.page_no() as usize * PAGE_SIZE)
    }

    /// Extends the file by one page and returns the new page number.
    pub fn allocate_page(&self, file_id: FileId) -> Result<u32> {
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(&file_id)
            .ok_or_else(|| DbError::Other(format!("File {} not open", file_id)))?;
        let page_no = (file.size()? / PAGE_SIZE) as u32;
        file.resize((page_no as usize + 1) * PAGE_SIZE)?;
        Ok(page_no)
    }

    pub fn num_pages(&self, file_id: FileId) -> Result<u32> {
        let files = self.files.lock().unwrap();
        let file = files
            .get(&file_id)
            .ok_or_else(|| DbError::Other(format!("File {} not open", file_id)))?;
        Ok((file.size()? / PAGE_SIZE) as u32)
    }

    pub fn sync_file(&self, file_id: FileId) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        if let Some(file) = files.get_mut(&file_id) {
            file.sync()?;
        }
        Ok(())
    }

    pub fn sync_all_files(&self) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        for file in files.values_mut() {
            file.sync()?;
        }
        Ok(())
    }

    // Log file: append-only body after a fixed-size in-place header.

    /// Appends raw bytes at the end of the log file, returning their offset.
    pub fn append_log(&self, data: &[u8]) -> Result<u64> {
        let mut log = self.log_file.lock().unwrap();
        let offset = log.size()?;
        log.write_block(data, offset)?;
        Ok(offset as u64)
    }

    pub fn read_log(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut log = self.log_file.lock().unwrap();
        log.read_block(offset as usize, len)
    }

    /// Rewrites the fixed-size log header in place.
    pub fn write_log_header(&self, data: &[u8]) -> Result<()> {
        let mut log = self.log_file.lock().unwrap();
        log.write_block(data, 0)?;
        log.sync()
    }

    pub fn log_size(&self) -> Result<u64> {
        Ok(self.log_file.lock().unwrap().size()? as u64)
    }

    pub fn sync_log(&self) -> Result<()> {
        self.log_file.lock().unwrap().sync()
    }
}

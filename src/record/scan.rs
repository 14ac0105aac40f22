use std::sync::Arc;

use crate::common::{Result, Rid};
use crate::lock::LockMode;
use crate::record::HeapFile;
use crate::transaction::TxnHandle;

/// Forward cursor over a heap file in page-then-slot order. The page bitmap
/// is re-read on every page visit, so a structural change to the current page
/// simply reflects in what the cursor yields next.
pub struct HeapScan {
    heap: Arc<HeapFile>,
    total_pages: u32,
    page_no: u32,
    buffered: Vec<(Rid, Vec<u8>)>,
    buffered_at: usize,
}

impl HeapScan {
    pub(crate) fn new(heap: Arc<HeapFile>, txn: &TxnHandle) -> Result<Self> {
        heap.lock_table(txn, LockMode::S)?;
        let total_pages = heap.total_pages()?;
        Ok(Self {
            heap,
            total_pages,
            page_no: 1,
            buffered: Vec::new(),
            buffered_at: 0,
        })
    }

    pub fn next(&mut self) -> Result<Option<(Rid, Vec<u8>)>> {
        loop {
            if self.buffered_at < self.buffered.len() {
                let item = self.buffered[self.buffered_at].clone();
                self.buffered_at += 1;
                return Ok(Some(item));
            }
            if self.page_no >= self.total_pages {
                return Ok(None);
            }
            self.buffered = self.heap.read_page_tuples(self.page_no)?;
            self.buffered_at = 0;
            self.page_no += 1;
        }
    }
}

use std::cmp::Ordering;
use std::sync::Arc;

use crate::common::{Result, Rid, Value};
use crate::index::node;
use crate::index::BTreeIndex;
use crate::transaction::TxnHandle;

/// Range cursor over an index. No latch is held between `next()` calls; the
/// cursor remembers the last full key returned and re-descends from the root
/// each step, so concurrent splits and merges of the visited leaves are
/// harmless. Each position visited is protected by a shared gap lock.
pub struct BTreeScan {
    index: Arc<BTreeIndex>,
    txn: TxnHandle,
    /// Search key for the next step: the lower bound initially, then the
    /// last full key returned.
    position: Vec<u8>,
    /// Strict search once a key has been returned.
    started: bool,
    low_inclusive: bool,
    high: Option<Vec<u8>>,
    high_inclusive: bool,
    exhausted: bool,
}

impl BTreeScan {
    /// Opens a cursor over `[low, high]` (bounds optional, inclusiveness per
    /// flag).
    pub fn open(
        index: Arc<BTreeIndex>,
        txn: &TxnHandle,
        low: Option<&[Value]>,
        low_inclusive: bool,
        high: Option<&[Value]>,
        high_inclusive: bool,
    ) -> Result<Self> {
        let position = match low {
            Some(values) => {
                let mut full = index.key_from_values(values)?;
                // Inclusive bounds start before the key's first rid;
                // exclusive bounds start after its last.
                let sentinel = if low_inclusive {
                    Rid::new(0, 0)
                } else {
                    Rid::new(u32::MAX, u32::MAX)
                };
                full.extend_from_slice(&sentinel.to_bytes());
                full
            }
            None => {
                // Start before everything: descend to the first leaf.
                Vec::new()
            }
        };
        let high = match high {
            Some(values) => Some(index.key_from_values(values)?),
            None => None,
        };
        Ok(Self {
            index,
            txn: txn.clone(),
            position,
            started: false,
            low_inclusive,
            high,
            high_inclusive,
            exhausted: false,
        })
    }

    /// Next (user key bytes, rid) within bounds, or None.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Rid)>> {
        if self.exhausted {
            return Ok(None);
        }
        self.txn.check_active()?;

        let found = if self.position.is_empty() && !self.started {
            self.first_entry()?
        } else {
            // Strict once started; on the first probe honor the low bound's
            // inclusiveness.
            let strict = self.started || !self.low_inclusive;
            self.index
                .find_first(&self.position, strict)?
                .map(|(guard, pos)| {
                    (
                        node::key_at(guard.data(), self.index.key_size(), pos).to_vec(),
                        node::rid_at(guard.data(), self.index.key_size(), pos),
                    )
                })
        };

        let (full_key, rid) = match found {
            Some(entry) => entry,
            None => {
                self.finish()?;
                return Ok(None);
            }
        };

        if let Some(high) = &self.high {
            let user = &full_key[..self.index.user_key_len()];
            match self.index.cmp_user(user, high) {
                Ordering::Greater => {
                    self.finish()?;
                    return Ok(None);
                }
                Ordering::Equal if !self.high_inclusive => {
                    self.finish()?;
                    return Ok(None);
                }
                _ => {}
            }
        }

        self.index.gap_lock_shared(&self.txn, full_key.clone())?;
        self.position = full_key.clone();
        self.started = true;
        Ok(Some((full_key, rid)))
    }

    /// Entry at the very start of the leaf chain.
    fn first_entry(&self) -> Result<Option<(Vec<u8>, Rid)>> {
        let mut leaf_no = self.index.first_leaf()?;
        loop {
            if leaf_no == crate::common::NO_PAGE {
                return Ok(None);
            }
            let guard = self
                .index
                .pool()
                .fetch_read(crate::common::PageId::new(self.index.file_id(), leaf_no))?;
            if node::num_keys(guard.data()) > 0 {
                return Ok(Some((
                    node::key_at(guard.data(), self.index.key_size(), 0).to_vec(),
                    node::rid_at(guard.data(), self.index.key_size(), 0),
                )));
            }
            leaf_no = node::next_leaf(guard.data());
        }
    }

    /// Locks the end-of-range gap so later inserts into the scanned range
    /// conflict (phantom protection), then marks the cursor done.
    fn finish(&mut self) -> Result<()> {
        self.exhausted = true;
        self.index.gap_lock_shared(&self.txn, Vec::new())
    }
}

use std::cmp::Ordering;
use std::sync::Arc;

use crate::buffer::{BufferPool, PageReadGuard, PageWriteGuard};
use crate::catalog::Schema;
use crate::common::{ColType, DbError, FileId, PageId, Result, Rid, Value, NO_PAGE};
use crate::index::node;
use crate::lock::{LockManager, LockMode, LockObject};
use crate::transaction::TxnHandle;

pub(crate) const MAGIC: &[u8; 4] = b"RMIX";
const VERSION: u32 = 1;

// Index file header page (page 0) field offsets.
const HDR_MAGIC: usize = 0;
const HDR_VERSION: usize = 4;
const HDR_KEY_SIZE: usize = 8;
const HDR_ROOT: usize = 12;
const HDR_FIRST_LEAF: usize = 16;
const HDR_TOTAL_PAGES: usize = 20;

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn write_u32(data: &mut [u8], at: usize, v: u32) {
    data[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// One indexed column: offset and width within the table tuple, plus the
/// type that drives comparisons.
#[derive(Debug, Clone)]
pub(crate) struct KeyCol {
    pub offset: usize,
    pub len: usize,
    pub ty: ColType,
}

/// Disk-resident B+ tree mapping (user key, rid) to rid. Duplicate user keys
/// are allowed unless the index is unique; the trailing rid breaks ties.
pub struct BTreeIndex {
    name: String,
    table: String,
    file_id: FileId,
    unique: bool,
    key_cols: Vec<KeyCol>,
    user_key_len: usize,
    key_size: usize,
    /// Order m: a node overflows when it reaches m+1 keys (one entry of
    /// physical slack is reserved so the overflow fits on the page).
    order: usize,
    min_leaf: usize,
    min_internal: usize,
    pool: Arc<BufferPool>,
    locks: Arc<LockManager>,
}

impl BTreeIndex {
    fn key_cols_from(schema: &Schema, columns: &[String]) -> Result<Vec<KeyCol>> {
        columns
            .iter()
            .map(|name| {
                let idx = schema.col_index(name)?;
                let col = &schema.columns()[idx];
                Ok(KeyCol {
                    offset: col.offset,
                    len: col.len,
                    ty: col.ty,
                })
            })
            .collect()
    }

    fn build(
        name: &str,
        table: &str,
        file_id: FileId,
        unique: bool,
        key_cols: Vec<KeyCol>,
        pool: Arc<BufferPool>,
        locks: Arc<LockManager>,
    ) -> Self {
        let user_key_len: usize = key_cols.iter().map(|c| c.len).sum();
        let key_size = user_key_len + Rid::SERIALIZED_LEN;
        let order = node::capacity(key_size) - 1;
        Self {
            name: name.to_string(),
            table: table.to_string(),
            file_id,
            unique,
            key_cols,
            user_key_len,
            key_size,
            order,
            min_leaf: (order + 1) / 2,
            min_internal: order / 2,
            pool,
            locks,
        }
    }

    /// Creates a fresh index file: header page plus an empty leaf root.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        name: &str,
        table: &str,
        file_id: FileId,
        unique: bool,
        schema: &Schema,
        columns: &[String],
        pool: Arc<BufferPool>,
        locks: Arc<LockManager>,
    ) -> Result<Arc<Self>> {
        let key_cols = Self::key_cols_from(schema, columns)?;
        let index = Arc::new(Self::build(name, table, file_id, unique, key_cols, pool, locks));

        let root_no = {
            let (mut header, header_no) = index.pool.new_page(file_id)?;
            debug_assert_eq!(header_no, 0);
            let (mut root, root_no) = index.pool.new_page(file_id)?;
            node::init(root.data_mut(), true);
            root.mark_dirty();
            drop(root);

            let data = header.data_mut();
            data[HDR_MAGIC..HDR_MAGIC + 4].copy_from_slice(MAGIC);
            write_u32(data, HDR_VERSION, VERSION);
            write_u32(data, HDR_KEY_SIZE, index.key_size as u32);
            write_u32(data, HDR_ROOT, root_no);
            write_u32(data, HDR_FIRST_LEAF, root_no);
            write_u32(data, HDR_TOTAL_PAGES, 2);
            header.mark_dirty();
            root_no
        };
        // DDL is not transactional: header and root must survive a crash.
        index.pool.flush_page(index.page(0))?;
        index.pool.flush_page(index.page(root_no))?;
        Ok(index)
    }

    /// Opens an existing index file, validating the header.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        name: &str,
        table: &str,
        file_id: FileId,
        unique: bool,
        schema: &Schema,
        columns: &[String],
        pool: Arc<BufferPool>,
        locks: Arc<LockManager>,
    ) -> Result<Arc<Self>> {
        let key_cols = Self::key_cols_from(schema, columns)?;
        let index = Arc::new(Self::build(name, table, file_id, unique, key_cols, pool, locks));
        {
            let header = index.pool.fetch_read(PageId::new(file_id, 0))?;
            let data = header.data();
            if &data[HDR_MAGIC..HDR_MAGIC + 4] != MAGIC {
                return Err(DbError::Other(format!("Bad magic in index file {}", name)));
            }
            if read_u32(data, HDR_KEY_SIZE) as usize != index.key_size {
                return Err(DbError::Other(format!(
                    "Key size mismatch in index file {}",
                    name
                )));
            }
        }
        Ok(index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub(crate) fn key_size(&self) -> usize {
        self.key_size
    }

    pub(crate) fn user_key_len(&self) -> usize {
        self.user_key_len
    }

    pub(crate) fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Extracts the user key bytes for this index from a table tuple.
    pub fn key_from_tuple(&self, tuple: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.user_key_len);
        for col in &self.key_cols {
            key.extend_from_slice(&tuple[col.offset..col.offset + col.len]);
        }
        key
    }

    /// Encodes a user key from values (for lookups and scan bounds).
    pub fn key_from_values(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.key_cols.len() {
            return Err(DbError::Other(format!(
                "Index {} expects {} key values, got {}",
                self.name,
                self.key_cols.len(),
                values.len()
            )));
        }
        let mut key = vec![0u8; self.user_key_len];
        let mut off = 0;
        for (col, value) in self.key_cols.iter().zip(values) {
            value.encode_into(&mut key[off..off + col.len])?;
            off += col.len;
        }
        Ok(key)
    }

    fn full_key(&self, user_key: &[u8], rid: Rid) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.key_size);
        key.extend_from_slice(user_key);
        key.extend_from_slice(&rid.to_bytes());
        key
    }

    /// Column-wise lexicographic comparison of user key bytes.
    pub(crate) fn cmp_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        let mut off = 0;
        for col in &self.key_cols {
            let va = Value::decode(col.ty, &a[off..off + col.len]);
            let vb = Value::decode(col.ty, &b[off..off + col.len]);
            if let Ok(ord) = va.compare(&vb) {
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            off += col.len;
        }
        Ordering::Equal
    }

    pub(crate) fn cmp_full(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.cmp_user(&a[..self.user_key_len], &b[..self.user_key_len]) {
            Ordering::Equal => {
                let ra = Rid::from_bytes(&a[self.user_key_len..]);
                let rb = Rid::from_bytes(&b[self.user_key_len..]);
                ra.cmp(&rb)
            }
            other => other,
        }
    }

    /// First entry index with key >= `full` (or > when `strict`).
    pub(crate) fn bound_in(&self, data: &[u8], full: &[u8], strict: bool) -> usize {
        let n = node::num_keys(data);
        for i in 0..n {
            let ord = self.cmp_full(node::key_at(data, self.key_size, i), full);
            let past = if strict {
                ord == Ordering::Greater
            } else {
                ord != Ordering::Less
            };
            if past {
                return i;
            }
        }
        n
    }

    fn child_for(&self, data: &[u8], full: &[u8]) -> u32 {
        let pos = self.bound_in(data, full, true);
        if pos == 0 {
            node::leftmost_child(data)
        } else {
            node::child_at(data, self.key_size, pos - 1)
        }
    }

    fn page(&self, page_no: u32) -> PageId {
        PageId::new(self.file_id, page_no)
    }

    fn root_page(&self) -> Result<u32> {
        let header = self.pool.fetch_read(self.page(0))?;
        Ok(read_u32(header.data(), HDR_ROOT))
    }

    pub(crate) fn first_leaf(&self) -> Result<u32> {
        let header = self.pool.fetch_read(self.page(0))?;
        Ok(read_u32(header.data(), HDR_FIRST_LEAF))
    }

    // ---- insertion ----

    /// Inserts under a transaction: takes an exclusive gap lock on the key's
    /// successor (phantom protection) before the structural insert.
    pub fn insert_with_txn(&self, txn: &TxnHandle, tuple: &[u8], rid: Rid) -> Result<()> {
        txn.check_active()?;
        let user = self.key_from_tuple(tuple);
        let full = self.full_key(&user, rid);
        let successor = self.successor_of(&full)?.unwrap_or_default();
        let object = LockObject::Gap(self.file_id, successor);
        self.locks.lock(txn.id(), &object, LockMode::X)?;
        txn.add_lock(object);
        self.insert_full(&user, rid)
    }

    /// Lock-free insert used by undo and recovery rebuild.
    pub fn insert_for_tuple(&self, tuple: &[u8], rid: Rid) -> Result<()> {
        let user = self.key_from_tuple(tuple);
        self.insert_full(&user, rid)
    }

    fn insert_full(&self, user_key: &[u8], rid: Rid) -> Result<()> {
        let full = self.full_key(user_key, rid);
        let ks = self.key_size;

        // Crab down with write latches; the header page guard stands in for
        // the root pointer latch and is released as soon as a safe node is
        // reached.
        let mut ctx: Vec<PageWriteGuard> = Vec::new();
        let header = self.pool.fetch_write(self.page(0))?;
        let mut current = read_u32(header.data(), HDR_ROOT);
        ctx.push(header);

        let mut guard = loop {
            let g = self.pool.fetch_write(self.page(current))?;
            if node::num_keys(g.data()) < self.order {
                ctx.clear();
            }
            if node::is_leaf(g.data()) {
                break g;
            }
            let child = self.child_for(g.data(), &full);
            ctx.push(g);
            current = child;
        };

        let n = node::num_keys(guard.data());
        let pos = self.bound_in(guard.data(), &full, false);
        if pos < n && self.cmp_full(node::key_at(guard.data(), ks, pos), &full) == Ordering::Equal {
            return Ok(()); // exact (key, rid) already present
        }
        if self.unique {
            let clash = (pos < n
                && self.cmp_user(
                    &node::key_at(guard.data(), ks, pos)[..self.user_key_len],
                    user_key,
                ) == Ordering::Equal)
                || (pos > 0
                    && self.cmp_user(
                        &node::key_at(guard.data(), ks, pos - 1)[..self.user_key_len],
                        user_key,
                    ) == Ordering::Equal)
                || (pos == n && self.next_leaf_starts_with(guard.data(), user_key)?);
            if clash {
                return Err(DbError::DuplicateKey(self.name.clone()));
            }
        }

        node::insert_entry(guard.data_mut(), ks, pos, &full, &rid.to_bytes());
        guard.mark_dirty();
        if node::num_keys(guard.data()) > self.order {
            self.split_leaf(ctx, guard)?;
        }
        Ok(())
    }

    fn next_leaf_starts_with(&self, data: &[u8], user_key: &[u8]) -> Result<bool> {
        let next = node::next_leaf(data);
        if next == NO_PAGE {
            return Ok(false);
        }
        let g = self.pool.fetch_read(self.page(next))?;
        if node::num_keys(g.data()) == 0 {
            return Ok(false);
        }
        Ok(self.cmp_user(
            &node::key_at(g.data(), self.key_size, 0)[..self.user_key_len],
            user_key,
        ) == Ordering::Equal)
    }

    fn split_leaf(&self, ctx: Vec<PageWriteGuard>, mut left: PageWriteGuard) -> Result<()> {
        let ks = self.key_size;
        let left_no = left.page_id().page_no();
        let split_at = (self.order + 2) / 2; // left keeps ceil((m+1)/2)

        let (mut right, right_no) = self.pool.new_page(self.file_id)?;
        node::init(right.data_mut(), true);
        node::move_tail(left.data_mut(), right.data_mut(), ks, split_at);

        let old_next = node::next_leaf(left.data());
        node::set_next_leaf(left.data_mut(), right_no);
        node::set_prev_leaf(right.data_mut(), left_no);
        node::set_next_leaf(right.data_mut(), old_next);
        if old_next != NO_PAGE {
            let mut nn = self.pool.fetch_write(self.page(old_next))?;
            node::set_prev_leaf(nn.data_mut(), right_no);
            nn.mark_dirty();
        }

        let separator = node::key_at(right.data(), ks, 0).to_vec();
        left.mark_dirty();
        right.mark_dirty();
        drop(left);
        drop(right);
        self.insert_into_parent(ctx, left_no, separator, right_no)
    }

    /// Installs (separator, right) into the parent taken from the latch
    /// stack, splitting upward as needed. The stack bottoms out at the header
    /// page guard, where a root split installs a new root.
    fn insert_into_parent(
        &self,
        mut ctx: Vec<PageWriteGuard>,
        left_no: u32,
        separator: Vec<u8>,
        right_no: u32,
    ) -> Result<()> {
        let ks = self.key_size;
        let mut parent = ctx.pop().ok_or_else(|| {
            DbError::Other("B+ tree split escaped its latch context".to_string())
        })?;

        if parent.page_id().page_no() == 0 {
            // Root split: grow the tree by one level.
            let (mut root, root_no) = self.pool.new_page(self.file_id)?;
            node::init(root.data_mut(), false);
            node::set_leftmost_child(root.data_mut(), left_no);
            node::insert_entry(root.data_mut(), ks, 0, &separator, &node::child_value(right_no));
            root.mark_dirty();
            drop(root);
            write_u32(parent.data_mut(), HDR_ROOT, root_no);
            parent.mark_dirty();
            return Ok(());
        }

        let pos = self.bound_in(parent.data(), &separator, false);
        node::insert_entry(
            parent.data_mut(),
            ks,
            pos,
            &separator,
            &node::child_value(right_no),
        );
        parent.mark_dirty();

        if node::num_keys(parent.data()) > self.order {
            let parent_no = parent.page_id().page_no();
            let n = node::num_keys(parent.data());
            let sep_idx = (self.order + 2) / 2 - 1;

            let (mut new_right, new_right_no) = self.pool.new_page(self.file_id)?;
            node::init(new_right.data_mut(), false);
            let up_separator = node::key_at(parent.data(), ks, sep_idx).to_vec();
            node::set_leftmost_child(
                new_right.data_mut(),
                node::child_at(parent.data(), ks, sep_idx),
            );
            debug_assert!(sep_idx + 1 <= n);
            node::move_tail(parent.data_mut(), new_right.data_mut(), ks, sep_idx + 1);
            node::set_num_keys(parent.data_mut(), sep_idx); // drop the moved-up separator
            new_right.mark_dirty();
            parent.mark_dirty();
            drop(parent);
            drop(new_right);
            return self.insert_into_parent(ctx, parent_no, up_separator, new_right_no);
        }
        Ok(())
    }

    // ---- removal ----

    /// Removes the entry for (tuple key, rid). Missing entries are ignored,
    /// which keeps undo idempotent.
    pub fn delete_for_tuple(&self, tuple: &[u8], rid: Rid) -> Result<()> {
        let user = self.key_from_tuple(tuple);
        self.remove_full(&user, rid)
    }

    fn remove_full(&self, user_key: &[u8], rid: Rid) -> Result<()> {
        let full = self.full_key(user_key, rid);
        let ks = self.key_size;

        let mut ctx: Vec<PageWriteGuard> = Vec::new();
        let header = self.pool.fetch_write(self.page(0))?;
        let mut current = read_u32(header.data(), HDR_ROOT);
        ctx.push(header);

        let mut guard = loop {
            let g = self.pool.fetch_write(self.page(current))?;
            let leaf = node::is_leaf(g.data());
            let n = node::num_keys(g.data());
            let is_root = ctx.len() == 1;
            let safe = if is_root {
                leaf || n >= 2
            } else if leaf {
                n > self.min_leaf
            } else {
                n > self.min_internal
            };
            if safe {
                ctx.clear();
            }
            if leaf {
                break g;
            }
            let child = self.child_for(g.data(), &full);
            ctx.push(g);
            current = child;
        };

        let n = node::num_keys(guard.data());
        let pos = self.bound_in(guard.data(), &full, false);
        if pos >= n || self.cmp_full(node::key_at(guard.data(), ks, pos), &full) != Ordering::Equal
        {
            return Ok(()); // not present
        }
        node::remove_entry(guard.data_mut(), ks, pos);
        guard.mark_dirty();
        self.rebalance(ctx, guard)
    }

    /// Restores minimum occupancy after a removal: redistribute from a
    /// sibling when it has spare entries, merge otherwise; merges propagate
    /// upward and may collapse the root.
    fn rebalance(&self, mut ctx: Vec<PageWriteGuard>, mut guard: PageWriteGuard) -> Result<()> {
        let ks = self.key_size;
        loop {
            let node_no = guard.page_id().page_no();
            let leaf = node::is_leaf(guard.data());
            let n = node::num_keys(guard.data());

            let mut parent = match ctx.pop() {
                Some(p) => p,
                None => return Ok(()), // node was safe; nothing to do
            };

            if parent.page_id().page_no() == 0 {
                // `guard` is the root.
                if !leaf && n == 0 {
                    let new_root = node::leftmost_child(guard.data());
                    write_u32(parent.data_mut(), HDR_ROOT, new_root);
                    parent.mark_dirty();
                }
                return Ok(());
            }

            let min = if leaf { self.min_leaf } else { self.min_internal };
            if n >= min {
                return Ok(());
            }

            let pn = node::num_keys(parent.data());
            // Position among the parent's children: -1 is the leftmost child.
            let my_idx: isize = if node::leftmost_child(parent.data()) == node_no {
                -1
            } else {
                let mut found = None;
                for i in 0..pn {
                    if node::child_at(parent.data(), ks, i) == node_no {
                        found = Some(i as isize);
                        break;
                    }
                }
                found.ok_or_else(|| {
                    DbError::Other("B+ tree parent lost track of child".to_string())
                })?
            };

            if my_idx < pn as isize - 1 {
                // A right sibling exists; separator sits at my_idx + 1.
                let sep_idx = (my_idx + 1) as usize;
                let right_no = node::child_at(parent.data(), ks, sep_idx);
                let mut right = self.pool.fetch_write(self.page(right_no))?;
                let rmin = if leaf { self.min_leaf } else { self.min_internal };

                if node::num_keys(right.data()) > rmin {
                    // Borrow the right sibling's first entry.
                    if leaf {
                        let k = node::key_at(right.data(), ks, 0).to_vec();
                        let v = node::value_at(right.data(), ks, 0).to_vec();
                        node::remove_entry(right.data_mut(), ks, 0);
                        let at = node::num_keys(guard.data());
                        node::insert_entry(guard.data_mut(), ks, at, &k, &v);
                        let new_sep = node::key_at(right.data(), ks, 0).to_vec();
                        node::set_entry(
                            parent.data_mut(),
                            ks,
                            sep_idx,
                            &new_sep,
                            &node::child_value(right_no),
                        );
                    } else {
                        // Rotate left through the parent separator.
                        let sep_key = node::key_at(parent.data(), ks, sep_idx).to_vec();
                        let r_leftmost = node::leftmost_child(right.data());
                        let at = node::num_keys(guard.data());
                        node::insert_entry(
                            guard.data_mut(),
                            ks,
                            at,
                            &sep_key,
                            &node::child_value(r_leftmost),
                        );
                        let r_first_key = node::key_at(right.data(), ks, 0).to_vec();
                        let r_first_child = node::child_at(right.data(), ks, 0);
                        node::set_leftmost_child(right.data_mut(), r_first_child);
                        node::remove_entry(right.data_mut(), ks, 0);
                        node::set_entry(
                            parent.data_mut(),
                            ks,
                            sep_idx,
                            &r_first_key,
                            &node::child_value(right_no),
                        );
                    }
                    guard.mark_dirty();
                    right.mark_dirty();
                    parent.mark_dirty();
                    return Ok(());
                }

                // Merge the right sibling into this node.
                if leaf {
                    self.append_all(&mut guard, &mut right)?;
                    let rn = node::next_leaf(right.data());
                    node::set_next_leaf(guard.data_mut(), rn);
                    if rn != NO_PAGE {
                        let mut nn = self.pool.fetch_write(self.page(rn))?;
                        node::set_prev_leaf(nn.data_mut(), node_no);
                        nn.mark_dirty();
                    }
                } else {
                    let sep_key = node::key_at(parent.data(), ks, sep_idx).to_vec();
                    let at = node::num_keys(guard.data());
                    node::insert_entry(
                        guard.data_mut(),
                        ks,
                        at,
                        &sep_key,
                        &node::child_value(node::leftmost_child(right.data())),
                    );
                    self.append_all(&mut guard, &mut right)?;
                }
                node::remove_entry(parent.data_mut(), ks, sep_idx);
                guard.mark_dirty();
                right.mark_dirty();
                parent.mark_dirty();
                drop(right);
                guard = parent; // parent may underflow in turn
            } else {
                // Rightmost child: work with the left sibling; separator at
                // my_idx.
                let sep_idx = my_idx as usize;
                let left_no = if sep_idx == 0 {
                    node::leftmost_child(parent.data())
                } else {
                    node::child_at(parent.data(), ks, sep_idx - 1)
                };
                let mut left = self.pool.fetch_write(self.page(left_no))?;
                let lmin = if leaf { self.min_leaf } else { self.min_internal };

                if node::num_keys(left.data()) > lmin {
                    // Borrow the left sibling's last entry.
                    let li = node::num_keys(left.data()) - 1;
                    if leaf {
                        let k = node::key_at(left.data(), ks, li).to_vec();
                        let v = node::value_at(left.data(), ks, li).to_vec();
                        node::remove_entry(left.data_mut(), ks, li);
                        node::insert_entry(guard.data_mut(), ks, 0, &k, &v);
                        node::set_entry(
                            parent.data_mut(),
                            ks,
                            sep_idx,
                            &k,
                            &node::child_value(node_no),
                        );
                    } else {
                        let sep_key = node::key_at(parent.data(), ks, sep_idx).to_vec();
                        let l_last_key = node::key_at(left.data(), ks, li).to_vec();
                        let l_last_child = node::child_at(left.data(), ks, li);
                        let my_leftmost = node::leftmost_child(guard.data());
                        node::insert_entry(
                            guard.data_mut(),
                            ks,
                            0,
                            &sep_key,
                            &node::child_value(my_leftmost),
                        );
                        node::set_leftmost_child(guard.data_mut(), l_last_child);
                        node::remove_entry(left.data_mut(), ks, li);
                        node::set_entry(
                            parent.data_mut(),
                            ks,
                            sep_idx,
                            &l_last_key,
                            &node::child_value(node_no),
                        );
                    }
                    guard.mark_dirty();
                    left.mark_dirty();
                    parent.mark_dirty();
                    return Ok(());
                }

                // Merge this node into the left sibling.
                if leaf {
                    self.append_all(&mut left, &mut guard)?;
                    let rn = node::next_leaf(guard.data());
                    node::set_next_leaf(left.data_mut(), rn);
                    if rn != NO_PAGE {
                        let mut nn = self.pool.fetch_write(self.page(rn))?;
                        node::set_prev_leaf(nn.data_mut(), left_no);
                        nn.mark_dirty();
                    }
                } else {
                    let sep_key = node::key_at(parent.data(), ks, sep_idx).to_vec();
                    let at = node::num_keys(left.data());
                    node::insert_entry(
                        left.data_mut(),
                        ks,
                        at,
                        &sep_key,
                        &node::child_value(node::leftmost_child(guard.data())),
                    );
                    self.append_all(&mut left, &mut guard)?;
                }
                node::remove_entry(parent.data_mut(), ks, sep_idx);
                left.mark_dirty();
                guard.mark_dirty();
                parent.mark_dirty();
                drop(left);
                guard = parent;
            }
        }
    }

    /// Appends all of `src`'s entries to the tail of `dst`.
    fn append_all(&self, dst: &mut PageWriteGuard, src: &mut PageWriteGuard) -> Result<()> {
        let ks = self.key_size;
        let n = node::num_keys(src.data());
        for i in 0..n {
            let k = node::key_at(src.data(), ks, i).to_vec();
            let v = node::value_at(src.data(), ks, i).to_vec();
            let at = node::num_keys(dst.data());
            node::insert_entry(dst.data_mut(), ks, at, &k, &v);
        }
        node::set_num_keys(src.data_mut(), 0);
        Ok(())
    }

    // ---- lookups ----

    /// Point lookup: the rid of the first entry matching the user key.
    pub fn lookup(&self, user_key: &[u8]) -> Result<Option<Rid>> {
        let full = self.full_key(user_key, Rid::new(0, 0));
        match self.find_first(&full, false)? {
            Some((guard, pos)) => {
                let entry = node::key_at(guard.data(), self.key_size, pos);
                if self.cmp_user(&entry[..self.user_key_len], user_key) == Ordering::Equal {
                    Ok(Some(node::rid_at(guard.data(), self.key_size, pos)))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Full key of the first entry strictly greater than `full`.
    fn successor_of(&self, full: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .find_first(full, true)?
            .map(|(guard, pos)| node::key_at(guard.data(), self.key_size, pos).to_vec()))
    }

    /// Shared-crab descent to the first entry >= `full` (or > when strict),
    /// following leaf links past empty leaves.
    pub(crate) fn find_first(
        &self,
        full: &[u8],
        strict: bool,
    ) -> Result<Option<(PageReadGuard, usize)>> {
        let header = self.pool.fetch_read(self.page(0))?;
        let root = read_u32(header.data(), HDR_ROOT);
        let mut guard = self.pool.fetch_read(self.page(root))?;
        drop(header);
        while !node::is_leaf(guard.data()) {
            let child = self.child_for(guard.data(), full);
            let next = self.pool.fetch_read(self.page(child))?;
            guard = next;
        }
        let mut pos = self.bound_in(guard.data(), full, strict);
        while pos >= node::num_keys(guard.data()) {
            let next = node::next_leaf(guard.data());
            if next == NO_PAGE {
                return Ok(None);
            }
            guard = self.pool.fetch_read(self.page(next))?;
            pos = self.bound_in(guard.data(), full, strict);
        }
        Ok(Some((guard, pos)))
    }

    // ---- maintenance ----

    /// Points the tree at a brand-new empty leaf root. Used before an index
    /// rebuild during recovery; the old pages are left orphaned in the file.
    pub fn reset(&self) -> Result<()> {
        let mut header = self.pool.fetch_write(self.page(0))?;
        let (mut root, root_no) = self.pool.new_page(self.file_id)?;
        node::init(root.data_mut(), true);
        root.mark_dirty();
        drop(root);
        write_u32(header.data_mut(), HDR_ROOT, root_no);
        write_u32(header.data_mut(), HDR_FIRST_LEAF, root_no);
        header.mark_dirty();
        Ok(())
    }

    /// Registers an S gap lock for a range scan position.
    pub(crate) fn gap_lock_shared(&self, txn: &TxnHandle, key: Vec<u8>) -> Result<()> {
        txn.check_active()?;
        let object = LockObject::Gap(self.file_id, key);
        self.locks.lock(txn.id(), &object, LockMode::S)?;
        txn.add_lock(object);
        Ok(())
    }
}

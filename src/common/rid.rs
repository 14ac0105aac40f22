use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Record identifier: (page, slot). Stable for a tuple's lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: u32,
    pub slot_no: u32,
}

impl Rid {
    pub const SERIALIZED_LEN: usize = 8;

    pub fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&self.page_no.to_le_bytes());
        buf[4..].copy_from_slice(&self.slot_no.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_no: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot_no: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl PartialOrd for Rid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rid {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_no.cmp(&other.page_no) {
            Ordering::Equal => self.slot_no.cmp(&other.slot_no),
            other => other,
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

use crate::common::{DbError, Result};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub page_size: usize,
    pub buffer_pool_pages: usize,
    pub log_buffer_bytes: usize,
    pub lock_timeout_ms: u64,
    /// Working-memory budget for sort runs, in tuples.
    pub sort_memory_tuples: usize,
    /// Fan-in of a single merge pass.
    pub sort_merge_fanin: usize,
    /// In-memory group budget before hash aggregation spills.
    pub agg_memory_groups: usize,
    pub enable_nestloop: bool,
    pub enable_sortmerge: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: crate::common::PAGE_SIZE,
            buffer_pool_pages: 1000,
            log_buffer_bytes: 64 * 1024,
            lock_timeout_ms: 2000,
            sort_memory_tuples: 1024,
            sort_merge_fanin: 8,
            agg_memory_groups: 4096,
            enable_nestloop: true,
            enable_sortmerge: true,
        }
    }
}

impl DatabaseConfig {
    /// Sets a named knob from its textual value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "enable_nestloop" => self.enable_nestloop = parse_bool(name, value)?,
            "enable_sortmerge" => self.enable_sortmerge = parse_bool(name, value)?,
            "buffer_pool_pages" => self.buffer_pool_pages = parse_num(name, value)?,
            "log_buffer_bytes" => self.log_buffer_bytes = parse_num(name, value)?,
            "lock_timeout_ms" => self.lock_timeout_ms = parse_num(name, value)? as u64,
            "sort_memory_tuples" => self.sort_memory_tuples = parse_num(name, value)?,
            "agg_memory_groups" => self.agg_memory_groups = parse_num(name, value)?,
            _ => return Err(DbError::Other(format!("Unknown config knob: {}", name))),
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(DbError::Other(format!(
            "Invalid boolean for {}: {}",
            name, value
        ))),
    }
}

fn parse_num(name: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| DbError::Other(format!("Invalid number for {}: {}", name, value)))
}

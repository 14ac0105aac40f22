mod buffer_pool;
mod replacer;

pub use buffer_pool::{BufferFrame, BufferPool, PageReadGuard, PageWriteGuard};
pub use replacer::LruKReplacer;

use crate::sync::sleeplock::Sleeplock;
use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

/// Block size.
pub const BSIZE: usize = 1024;

/// Contents of one disk block.
pub type BlockData = [u8; BSIZE];

/// Which disk block a buffer caches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}
impl BlockId {
    pub const fn new(dev: u32, blockno: u32) -> BlockId {
        BlockId { dev, blockno }
    }
}
impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// One cache buffer. Its identity and reference count are kept
/// by the shard it currently belongs to, not here.
pub struct Buffer {
    /// Has data been read from disk?
    valid: AtomicBool,
    pub(crate) data: Sleeplock<BlockData>,
}
impl Buffer {
    pub const fn new() -> Buffer {
        Buffer {
            valid: AtomicBool::new(false),
            data: Sleeplock::new([0u8; BSIZE]),
        }
    }
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
    /// Only after the data was loaded from disk.
    pub(crate) fn set_valid(&self) {
        self.valid.store(true, Ordering::Release);
    }
    /// Only while repurposing an unreferenced buffer, under its shard lock.
    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}
impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

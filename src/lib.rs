//! Kernel resource managers shared by every hart: the sharded disk
//! block cache ([`io::bio`]) and the per-hart physical page
//! allocator ([`mem::kalloc`]).
//!
//! Both are process-wide singletons set up once by the boot hart
//! through [`init`] and never torn down.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod io;
pub mod mem;
pub mod param;
pub mod sync;

pub use crate::{
    arch::{set_platform, Platform},
    io::{
        bio::{
            binit, bpin, bread, brelse, bunpin, bwrite, Bcache, Buf, BufferCache, BufferError,
            KernelBuf, PinnedBuf, ShardStats,
        },
        buf::{BlockData, BlockId, BSIZE},
        disk::{BlockDevice, DiskError},
        ramdisk::RamDisk,
    },
    mem::kalloc::{kalloc, kfree, kinit, KernelAllocator, KernelMemory, Kmem},
};

use core::ops::Range;
use log::info;

/// Bring up the page allocator and the buffer cache.
///
/// Call on the boot hart before any other hart is started; every
/// later call is a no-op.
///
/// # Safety
/// `heap` must be physical memory that nothing else uses.
pub unsafe fn init(
    platform: &'static dyn Platform,
    disk: &'static dyn BlockDevice,
    heap: Range<usize>,
) {
    set_platform(platform);
    let kmem = kinit(heap.start, heap.end);
    binit(disk);
    info!(
        "resources ready: {} free pages, {} buffers",
        kmem.free_pages(),
        param::NBUF
    );
}

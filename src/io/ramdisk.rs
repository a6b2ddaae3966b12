//! Ramdisk that serves a disk image held in memory,
//! such as the one loaded by qemu -initrd fs.img.

use super::{
    buf::{BlockData, BSIZE},
    disk::{BlockDevice, DiskError},
};
use crate::sync::spinmutex::SpinMutex;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct RamDisk<'a> {
    dev: u32,
    blocks: SpinMutex<&'a mut [BlockData]>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}
impl<'a> RamDisk<'a> {
    pub fn new(dev: u32, blocks: &'a mut [BlockData]) -> RamDisk<'a> {
        RamDisk {
            dev,
            blocks: SpinMutex::new(blocks),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
    /// Serve the image at `base`, `len` bytes long.
    ///
    /// # Safety
    /// The region must be valid, block aligned, and used by nothing
    /// else for `'a`.
    pub unsafe fn from_raw(dev: u32, base: *mut u8, len: usize) -> RamDisk<'a> {
        let blocks = core::slice::from_raw_parts_mut(base.cast::<BlockData>(), len / BSIZE);
        RamDisk::new(dev, blocks)
    }
    pub fn size(&self) -> usize {
        self.blocks.lock().len()
    }
    /// Number of completed block reads.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
    /// Number of completed block writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
    fn check(&self, dev: u32, blockno: u32, size: usize) -> Result<usize, DiskError> {
        if dev != self.dev {
            Err(DiskError::NoDevice(dev))
        } else if blockno as usize >= size {
            Err(DiskError::OutOfRange(blockno))
        } else {
            Ok(blockno as usize)
        }
    }
}
impl<'a> BlockDevice for RamDisk<'a> {
    fn read_block(&self, dev: u32, blockno: u32, data: &mut BlockData) -> Result<(), DiskError> {
        let blocks = self.blocks.lock();
        let index = self.check(dev, blockno, blocks.len())?;
        data.copy_from_slice(&blocks[index]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
    fn write_block(&self, dev: u32, blockno: u32, data: &BlockData) -> Result<(), DiskError> {
        let mut blocks = self.blocks.lock();
        let index = self.check(dev, blockno, blocks.len())?;
        blocks[index].copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

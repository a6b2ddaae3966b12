//! Interface to the disk driver beneath the buffer cache.

use super::buf::BlockData;
use core::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiskError {
    /// The driver does not serve this device number.
    NoDevice(u32),
    /// The block lies past the end of the device.
    OutOfRange(u32),
}
impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::NoDevice(dev) => write!(f, "no such device {}", dev),
            DiskError::OutOfRange(blockno) => write!(f, "block {} out of range", blockno),
        }
    }
}

/// Synchronous block I/O. Both calls return only once the
/// transfer has finished.
pub trait BlockDevice: Sync {
    fn read_block(&self, dev: u32, blockno: u32, data: &mut BlockData) -> Result<(), DiskError>;
    fn write_block(&self, dev: u32, blockno: u32, data: &BlockData) -> Result<(), DiskError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn read_block(&self, dev: u32, blockno: u32, data: &mut BlockData) -> Result<(), DiskError> {
        (**self).read_block(dev, blockno, data)
    }
    fn write_block(&self, dev: u32, blockno: u32, data: &BlockData) -> Result<(), DiskError> {
        (**self).write_block(dev, blockno, data)
    }
}

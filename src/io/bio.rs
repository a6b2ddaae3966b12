//! Buffer cache.
//!
//! The buffer cache is a fixed pool of buffers holding cached
//! copies of disk block contents. Caching disk blocks in memory
//! reduces the number of disk reads and also provides a
//! synchronization point for disk blocks used by multiple processes.
//!
//! The pool is split into shards by `blockno % NSHARD`, each with
//! its own spin lock, so lookups of different blocks rarely contend.
//! A shard that runs out of free buffers takes one from another shard.
//! Recycling is first-fit within a shard and there is no global
//! recency order.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call bread.
//! - After changing buffer data, call bwrite to write it to disk.
//! - When done with the buffer, call brelse (or drop it).
//! - Only one process at a time can use a buffer,
//!   so do not keep them longer than necessary.

use super::{
    buf::{BlockData, BlockId, Buffer},
    disk::BlockDevice,
};
use crate::{
    param,
    sync::{
        sleeplock::SleeplockGuard,
        spinmutex::{SpinMutex, SpinMutexGuard},
    },
};
use arrayvec::ArrayVec;
use core::{
    fmt,
    mem::ManuallyDrop,
    num::NonZeroU32,
    ops::{Deref, DerefMut},
};
use log::{debug, error, trace};
use spin::Once;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferError {
    /// Every buffer is referenced.
    OutOfBuffers,
}
impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::OutOfBuffers => write!(f, "no buffers"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BufferState {
    /// May be recycled for another block.
    Free,
    Held { refs: NonZeroU32 },
}
impl BufferState {
    fn refs(self) -> u32 {
        match self {
            BufferState::Free => 0,
            BufferState::Held { refs } => refs.get(),
        }
    }
    fn is_free(self) -> bool {
        self == BufferState::Free
    }
    fn get(self) -> BufferState {
        let refs = match self {
            BufferState::Free => NonZeroU32::MIN,
            BufferState::Held { refs } => refs.saturating_add(1),
        };
        BufferState::Held { refs }
    }
    /// `None` if there is no reference left to drop.
    fn put(self) -> Option<BufferState> {
        match self {
            BufferState::Free => None,
            BufferState::Held { refs } => Some(match NonZeroU32::new(refs.get() - 1) {
                Some(refs) => BufferState::Held { refs },
                None => BufferState::Free,
            }),
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Slot {
    /// Index into the buffer pool.
    buffer: usize,
    /// `None` until the buffer is first used.
    block: Option<BlockId>,
    state: BufferState,
}

/// Buffers currently assigned to one shard, most recently
/// adopted first.
struct Shard<const NBUF: usize> {
    slots: ArrayVec<Slot, NBUF>,
}
impl<const NBUF: usize> Shard<NBUF> {
    const fn new() -> Shard<NBUF> {
        Shard {
            slots: ArrayVec::new_const(),
        }
    }
    /// Is the block already cached? Takes a reference if so.
    fn find_cached(&mut self, block: BlockId) -> Option<usize> {
        let slot = self.slots.iter_mut().find(|s| s.block == Some(block))?;
        slot.state = slot.state.get();
        Some(slot.buffer)
    }
    /// Give the first unreferenced buffer of this shard to `block`.
    fn recycle(&mut self, block: BlockId) -> Option<usize> {
        let slot = self.slots.iter_mut().find(|s| s.state.is_free())?;
        slot.block = Some(block);
        slot.state = BufferState::Free.get();
        Some(slot.buffer)
    }
    /// Unlink the first unreferenced buffer.
    fn take_free(&mut self) -> Option<Slot> {
        let position = self.slots.iter().position(|s| s.state.is_free())?;
        Some(self.slots.remove(position))
    }
    fn adopt(&mut self, slot: Slot) {
        self.slots.insert(0, slot);
    }
    fn slot_mut(&mut self, buffer: usize) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.buffer == buffer)
    }
}

/// Occupancy of one shard.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Buffers linked into the shard.
    pub buffers: usize,
    /// Of those, how many are referenced.
    pub held: usize,
}

pub struct BufferCache<D, const NBUF: usize, const NSHARD: usize> {
    device: D,
    buffers: [Buffer; NBUF],
    shards: [SpinMutex<Shard<NBUF>>; NSHARD],
}
impl<D: BlockDevice, const NBUF: usize, const NSHARD: usize> BufferCache<D, NBUF, NSHARD> {
    /// All buffers start out unused, in shard 0.
    pub fn new(device: D) -> Self {
        assert!(NBUF > 0 && NSHARD > 0, "binit: empty cache");

        let mut shards: [SpinMutex<Shard<NBUF>>; NSHARD] =
            core::array::from_fn(|_| SpinMutex::new(Shard::new()));
        for buffer in 0..NBUF {
            shards[0].get_mut().slots.push(Slot {
                buffer,
                block: None,
                state: BufferState::Free,
            });
        }

        BufferCache {
            device,
            buffers: core::array::from_fn(|_| Buffer::new()),
            shards,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn shard_of(block: BlockId) -> usize {
        block.blockno as usize % NSHARD
    }

    /// Lock two distinct shards, lower index first.
    /// Returns the guards as `(home, other)`.
    #[allow(clippy::type_complexity)]
    fn lock_pair(
        &self,
        home: usize,
        other: usize,
    ) -> (SpinMutexGuard<'_, Shard<NBUF>>, SpinMutexGuard<'_, Shard<NBUF>>) {
        if home < other {
            let home = self.shards[home].lock();
            (home, self.shards[other].lock())
        } else {
            let other = self.shards[other].lock();
            (self.shards[home].lock(), other)
        }
    }

    /// Wait for exclusive use of a buffer we already hold a reference to.
    /// No shard lock may be held.
    fn lock_buffer(&self, buffer: usize, block: BlockId) -> Buf<'_, NBUF> {
        let entry = &self.buffers[buffer];
        Buf {
            index: buffer,
            block,
            buffer: entry,
            shard: &self.shards[Self::shard_of(block)],
            data: ManuallyDrop::new(entry.data.lock()),
        }
    }

    /// Look through the cache for the block on device dev.
    ///
    /// If not found, recycle an unreferenced buffer for it.
    /// In either case, return the buffer locked.
    pub fn get(&self, dev: u32, blockno: u32) -> Result<Buf<'_, NBUF>, BufferError> {
        let block = BlockId::new(dev, blockno);
        let home = Self::shard_of(block);

        {
            let mut shard = self.shards[home].lock();
            if let Some(buffer) = shard.find_cached(block) {
                drop(shard);
                return Ok(self.lock_buffer(buffer, block));
            }
            if let Some(buffer) = shard.recycle(block) {
                self.buffers[buffer].invalidate();
                drop(shard);
                return Ok(self.lock_buffer(buffer, block));
            }
        }

        // The home shard was unlocked above, so each round looks at it
        // again before taking a buffer from the other shard.
        for victim in (0..NSHARD).filter(|&k| k != home) {
            let (mut shard, mut other) = self.lock_pair(home, victim);

            if let Some(buffer) = shard.find_cached(block) {
                drop(other);
                drop(shard);
                return Ok(self.lock_buffer(buffer, block));
            }
            if let Some(buffer) = shard.recycle(block) {
                self.buffers[buffer].invalidate();
                drop(other);
                drop(shard);
                return Ok(self.lock_buffer(buffer, block));
            }
            if let Some(mut slot) = other.take_free() {
                slot.block = Some(block);
                slot.state = BufferState::Free.get();
                shard.adopt(slot);
                self.buffers[slot.buffer].invalidate();
                drop(other);
                drop(shard);
                trace!(
                    "bget: buffer {} moved from shard {} to {} for {}",
                    slot.buffer,
                    victim,
                    home,
                    block
                );
                return Ok(self.lock_buffer(slot.buffer, block));
            }
        }

        error!("bget: no free buffer for {}", block);
        Err(BufferError::OutOfBuffers)
    }

    /// Return a locked buffer with the contents of the indicated block.
    pub fn bread(&self, dev: u32, blockno: u32) -> Result<Buf<'_, NBUF>, BufferError> {
        let mut buf = self.get(dev, blockno)?;
        if !buf.is_valid() {
            if let Err(err) = self.device.read_block(dev, blockno, &mut buf) {
                error!("bread: {}: {}", buf.block, err);
                panic!("bread");
            }
            buf.buffer.set_valid();
        }
        Ok(buf)
    }

    fn check_owner(&self, buf: &Buf<'_, NBUF>, who: &str) {
        if !core::ptr::eq(buf.buffer, &self.buffers[buf.index]) {
            panic!("{}: buffer from another cache", who);
        }
    }

    /// Write the buffer's contents to disk.
    pub fn bwrite(&self, buf: &Buf<'_, NBUF>) {
        self.check_owner(buf, "bwrite");
        if let Err(err) = self.device.write_block(buf.block.dev, buf.block.blockno, buf) {
            error!("bwrite: {}: {}", buf.block, err);
            panic!("bwrite");
        }
    }

    /// Release a locked buffer.
    ///
    /// The buffer stays in its shard with its contents, so a later
    /// `bread` of the same block is served without disk I/O unless
    /// the buffer was recycled in between.
    pub fn brelse(&self, buf: Buf<'_, NBUF>) {
        self.check_owner(&buf, "brelse");
        drop(buf);
    }

    /// Keep the buffer from being recycled after it is released,
    /// without keeping it locked.
    pub fn bpin(&self, buf: &Buf<'_, NBUF>) -> PinnedBuf {
        self.check_owner(buf, "bpin");
        let mut shard = buf.shard.lock();
        match shard.slot_mut(buf.index) {
            Some(slot) => slot.state = slot.state.get(),
            None => panic!("bpin"),
        }
        PinnedBuf {
            index: buf.index,
            block: buf.block,
        }
    }

    pub fn bunpin(&self, pin: PinnedBuf) {
        let mut shard = self.shards[Self::shard_of(pin.block)].lock();
        let slot = match shard.slot_mut(pin.index) {
            Some(slot) if slot.block == Some(pin.block) => slot,
            _ => panic!("bunpin"),
        };
        match slot.state.put() {
            Some(state) => slot.state = state,
            None => panic!("bunpin"),
        }
    }

    /// References currently held on a cached block.
    /// `None` if the block is not cached.
    pub fn refs(&self, dev: u32, blockno: u32) -> Option<u32> {
        let block = BlockId::new(dev, blockno);
        let shard = self.shards[Self::shard_of(block)].lock();
        shard
            .slots
            .iter()
            .find(|s| s.block == Some(block))
            .map(|s| s.state.refs())
    }

    /// Per-shard occupancy, one shard lock at a time.
    pub fn stats(&self) -> [ShardStats; NSHARD] {
        core::array::from_fn(|i| {
            let shard = self.shards[i].lock();
            ShardStats {
                buffers: shard.slots.len(),
                held: shard.slots.iter().filter(|s| !s.state.is_free()).count(),
            }
        })
    }
}

fn release<const NBUF: usize>(shard: &SpinMutex<Shard<NBUF>>, index: usize, block: BlockId) {
    let mut shard = shard.lock();
    let slot = match shard.slot_mut(index) {
        Some(slot) => slot,
        None => panic!("brelse"),
    };
    match slot.state.put() {
        Some(state) => slot.state = state,
        None => panic!("brelse"),
    }
    if slot.state.is_free() {
        trace!("brelse: {} unreferenced", block);
    }
}

/// A locked buffer. Derefs to the block contents.
///
/// Dropping it releases the buffer, like `brelse`.
pub struct Buf<'c, const NBUF: usize> {
    index: usize,
    block: BlockId,
    buffer: &'c Buffer,
    shard: &'c SpinMutex<Shard<NBUF>>,
    data: ManuallyDrop<SleeplockGuard<'c, BlockData>>,
}
impl<'c, const NBUF: usize> Buf<'c, NBUF> {
    pub fn dev(&self) -> u32 {
        self.block.dev
    }
    pub fn blockno(&self) -> u32 {
        self.block.blockno
    }
    pub fn block(&self) -> BlockId {
        self.block
    }
    /// Has data been read from disk?
    pub fn is_valid(&self) -> bool {
        self.buffer.is_valid()
    }
}
impl<'c, const NBUF: usize> Deref for Buf<'c, NBUF> {
    type Target = BlockData;

    fn deref(&self) -> &BlockData {
        &self.data
    }
}
impl<'c, const NBUF: usize> DerefMut for Buf<'c, NBUF> {
    fn deref_mut(&mut self) -> &mut BlockData {
        &mut self.data
    }
}
impl<'c, const NBUF: usize> Drop for Buf<'c, NBUF> {
    fn drop(&mut self) {
        // Unlock the data before touching the shard: a waiter on the
        // sleeplock already holds a reference, so the buffer cannot be
        // recycled in between.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        release(self.shard, self.index, self.block);
    }
}
impl<'c, const NBUF: usize> fmt::Debug for Buf<'c, NBUF> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("index", &self.index)
            .field("block", &self.block)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// An extra reference taken by `bpin`, returned with `bunpin`.
#[derive(Debug)]
#[must_use = "a pinned buffer stays resident until passed to bunpin"]
pub struct PinnedBuf {
    index: usize,
    block: BlockId,
}
impl PinnedBuf {
    pub fn block(&self) -> BlockId {
        self.block
    }
}

/// The kernel's buffer cache.
pub type Bcache = BufferCache<&'static dyn BlockDevice, { param::NBUF }, { param::NSHARD }>;
/// A locked buffer from the kernel's cache.
pub type KernelBuf = Buf<'static, { param::NBUF }>;

static BCACHE: Once<Bcache> = Once::new();

/// Set up the kernel's buffer cache over `device`.
/// Must run before any other hart uses the cache.
pub fn binit(device: &'static dyn BlockDevice) -> &'static Bcache {
    BCACHE.call_once(|| {
        debug!(
            "binit: {} buffers in {} shards",
            param::NBUF,
            param::NSHARD
        );
        BufferCache::new(device)
    })
}

fn bcache() -> &'static Bcache {
    match BCACHE.get() {
        Some(bcache) => bcache,
        None => panic!("bcache: binit not called"),
    }
}

/// Return a locked buffer with the contents of the indicated block.
/// Running out of buffers is fatal.
pub fn bread(dev: u32, blockno: u32) -> KernelBuf {
    match bcache().bread(dev, blockno) {
        Ok(buf) => buf,
        Err(err) => panic!("bget: {}", err),
    }
}

pub fn bwrite(buf: &KernelBuf) {
    bcache().bwrite(buf);
}

pub fn brelse(buf: KernelBuf) {
    bcache().brelse(buf);
}

pub fn bpin(buf: &KernelBuf) -> PinnedBuf {
    bcache().bpin(buf)
}

pub fn bunpin(pin: PinnedBuf) {
    bcache().bunpin(pin);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{buf::BSIZE, ramdisk::RamDisk};
    use std::{thread, vec::Vec};

    fn image(blocks: usize) -> Vec<BlockData> {
        (0..blocks).map(|i| [i as u8; BSIZE]).collect()
    }

    #[test]
    fn state_transitions() {
        let state = BufferState::Free.get();
        assert_eq!(state.refs(), 1);
        let state = state.get();
        assert_eq!(state.refs(), 2);
        let state = state.put().unwrap().put().unwrap();
        assert!(state.is_free());
        assert_eq!(state.put(), None);
    }

    #[test]
    fn third_block_waits_for_a_release() {
        let mut image = image(16);
        let disk = RamDisk::new(1, &mut image);
        let cache: BufferCache<_, 2, 1> = BufferCache::new(&disk);

        let a = cache.get(1, 5).unwrap();
        let b = cache.get(1, 9).unwrap();
        assert_ne!(a.index, b.index);
        assert_eq!(cache.get(1, 13).unwrap_err(), BufferError::OutOfBuffers);

        let freed = a.index;
        cache.brelse(a);
        let c = cache.get(1, 13).unwrap();
        assert_eq!(c.index, freed);
        assert!(!c.is_valid());
        // The old identity is gone.
        assert_eq!(cache.refs(1, 5), None);
        assert_eq!(cache.refs(1, 13), Some(1));
        drop(b);
        drop(c);
    }

    #[test]
    fn hit_skips_the_disk() {
        let mut image = image(16);
        let disk = RamDisk::new(1, &mut image);
        let cache: BufferCache<_, 4, 3> = BufferCache::new(&disk);

        let buf = cache.bread(1, 7).unwrap();
        assert_eq!(buf[0], 7);
        assert!(buf.is_valid());
        cache.brelse(buf);
        assert_eq!(cache.refs(1, 7), Some(0));

        let buf = cache.bread(1, 7).unwrap();
        assert_eq!(buf[BSIZE - 1], 7);
        assert_eq!(disk.reads(), 1);
        drop(buf);
    }

    #[test]
    fn write_survives_recycling() {
        let mut image = image(16);
        let disk = RamDisk::new(1, &mut image);
        let cache: BufferCache<_, 1, 1> = BufferCache::new(&disk);

        let mut buf = cache.bread(1, 3).unwrap();
        buf.fill(0xab);
        cache.bwrite(&buf);
        cache.brelse(buf);

        // Push block 3 out of the only buffer, then read it back.
        let other = cache.bread(1, 4).unwrap();
        assert_eq!(other[0], 4);
        drop(other);
        let buf = cache.bread(1, 3).unwrap();
        assert!(buf.iter().all(|&b| b == 0xab));
        assert_eq!(disk.reads(), 3);
        assert_eq!(disk.writes(), 1);
        drop(buf);
    }

    #[test]
    fn pinned_buffer_is_not_recycled() {
        let mut image = image(16);
        let disk = RamDisk::new(1, &mut image);
        let cache: BufferCache<_, 1, 1> = BufferCache::new(&disk);

        let buf = cache.bread(1, 2).unwrap();
        let pin = cache.bpin(&buf);
        cache.brelse(buf);
        assert_eq!(cache.refs(1, 2), Some(1));
        assert_eq!(cache.get(1, 6).unwrap_err(), BufferError::OutOfBuffers);

        // Still cached: no second read.
        let buf = cache.bread(1, 2).unwrap();
        assert_eq!(disk.reads(), 1);
        drop(buf);

        cache.bunpin(pin);
        assert_eq!(cache.refs(1, 2), Some(0));
        assert!(cache.get(1, 6).is_ok());
    }

    #[test]
    #[should_panic(expected = "bunpin")]
    fn unpin_with_wrong_identity_panics() {
        let mut image = image(16);
        let disk = RamDisk::new(1, &mut image);
        let cache: BufferCache<_, 2, 1> = BufferCache::new(&disk);

        let buf = cache.get(1, 2).unwrap();
        let pin = cache.bpin(&buf);
        let forged = PinnedBuf {
            index: pin.index,
            block: BlockId::new(1, 3),
        };
        drop(buf);
        cache.bunpin(pin);
        cache.bunpin(forged);
    }

    #[test]
    fn miss_takes_a_buffer_from_another_shard() {
        let mut image = image(16);
        let disk = RamDisk::new(1, &mut image);
        let cache: BufferCache<_, 3, 3> = BufferCache::new(&disk);
        assert_eq!(cache.stats()[0].buffers, 3);

        let one = cache.get(1, 1).unwrap();
        let two = cache.get(1, 2).unwrap();
        let stats = cache.stats();
        assert_eq!(stats[0], ShardStats { buffers: 1, held: 0 });
        assert_eq!(stats[1], ShardStats { buffers: 1, held: 1 });
        assert_eq!(stats[2], ShardStats { buffers: 1, held: 1 });
        drop(one);
        drop(two);

        // Block 4 lands in shard 1 and reuses the free buffer there.
        let four = cache.get(1, 4).unwrap();
        assert_eq!(cache.refs(1, 1), None);
        assert_eq!(cache.stats()[1].buffers, 1);
        drop(four);
    }

    #[test]
    fn concurrent_readers_share_one_identity() {
        let mut image = image(64);
        let disk = RamDisk::new(1, &mut image);
        let cache: BufferCache<_, 8, 3> = BufferCache::new(&disk);

        thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| {
                    for round in 0..200u32 {
                        let blockno = round % 5;
                        let buf = cache.bread(1, blockno).unwrap();
                        assert_eq!(buf[0], blockno as u8);
                    }
                });
            }
        });

        for blockno in 0..5 {
            assert_eq!(cache.refs(1, blockno), Some(0));
        }
        let held: usize = cache.stats().iter().map(|s| s.held).sum();
        assert_eq!(held, 0);
        let total: usize = cache.stats().iter().map(|s| s.buffers).sum();
        assert_eq!(total, 8);
        // Unreferenced blocks may have been recycled in between.
        assert!(disk.reads() >= 5);
    }
}

//! Long-term locks for processes.
//!
//! Unlike [`SpinMutex`](super::spinmutex::SpinMutex), a waiter
//! gives up its hart instead of spinning with interrupts off, so a
//! `Sleeplock` may be held across disk I/O. Never acquire one while
//! holding a spin lock.

use crate::arch::{sleep, wakeup};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut, Drop},
    sync::atomic::{AtomicBool, Ordering},
};

pub struct Sleeplock<T> {
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}
impl<T> Sleeplock<T> {
    pub const fn new(value: T) -> Sleeplock<T> {
        Sleeplock {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(value),
        }
    }
    fn chan(&self) -> usize {
        self as *const Self as usize
    }
    pub fn lock(&self) -> SleeplockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            // Put the process to sleep until it gets released.
            sleep(self.chan());
        }
        SleeplockGuard { lock: self }
    }
    pub fn try_lock(&self) -> Option<SleeplockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SleeplockGuard { lock: self })
        }
    }
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
        wakeup(self.chan());
    }
}
unsafe impl<T> Sync for Sleeplock<T> where T: Send {}
unsafe impl<T> Send for Sleeplock<T> where T: Send {}

pub struct SleeplockGuard<'l, T> {
    lock: &'l Sleeplock<T>,
}
impl<'l, T> Deref for SleeplockGuard<'l, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.inner.get() }
    }
}
impl<'l, T> DerefMut for SleeplockGuard<'l, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.inner.get() }
    }
}
impl<'l, T> Drop for SleeplockGuard<'l, T> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}

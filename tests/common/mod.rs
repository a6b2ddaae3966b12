//! A `Platform` where every test thread plays one hart.

#![allow(dead_code)]

use bcache_kalloc::{set_platform, Platform};
use std::{cell::Cell, thread};

thread_local! {
    static HART: Cell<usize> = const { Cell::new(0) };
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

pub struct Host;

impl Platform for Host {
    fn cpu_id(&self) -> usize {
        HART.with(|hart| hart.get())
    }
    fn push_off(&self) {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
    }
    fn pop_off(&self) {
        DEPTH.with(|depth| match depth.get() {
            0 => panic!("pop_intr_off"),
            n => depth.set(n - 1),
        });
    }
    fn sleep(&self, _chan: usize) {
        thread::yield_now();
    }
}

pub static HOST: Host = Host;

pub fn install() {
    set_platform(&HOST);
}

/// Make the calling thread act as `hart`.
pub fn become_hart(hart: usize) {
    HART.with(|h| h.set(hart));
}

/// Interrupt-off nesting depth of the calling thread.
pub fn depth() -> usize {
    DEPTH.with(|depth| depth.get())
}

/// Run `f` on a fresh thread acting as `hart`.
pub fn on_hart<T, F>(hart: usize, f: F) -> thread::Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    thread::scope(|s| {
        s.spawn(move || {
            become_hart(hart);
            f()
        })
        .join()
    })
}

#[repr(C, align(4096))]
pub struct Page(pub [u8; 4096]);

/// A page-aligned region to hand to an allocator.
pub fn heap(pages: usize) -> Vec<Page> {
    (0..pages).map(|_| Page([0u8; 4096])).collect()
}

pub fn bounds(heap: &mut [Page]) -> (usize, usize) {
    let start = heap.as_mut_ptr() as usize;
    (start, start + heap.len() * 4096)
}

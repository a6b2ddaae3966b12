//! Architecture-agnostic access to the few machine primitives
//! the buffer cache and the page allocator need.
//!
//! The kernel registers its [`Platform`] once at boot, before any
//! other hart is released. Until then a single-hart fallback is used:
//! hart 0, no interrupt control, and sleeping degrades to spinning.

#[cfg(target_arch = "riscv64")]
pub mod riscv;

pub mod cpu;
pub mod mem;
pub mod trap;

use spin::Once;

/// Machine primitives supplied by whoever hosts the kernel core.
pub trait Platform: Sync {
    /// Id of the hart executing the caller.
    ///
    /// Only meaningful while interrupts are off; otherwise the
    /// caller may be moved to another hart right after the read.
    fn cpu_id(&self) -> usize {
        0
    }
    /// Disable interrupts on this hart, counting nesting depth.
    fn push_off(&self) {}
    /// Undo one `push_off`, restoring interrupts at depth zero.
    fn pop_off(&self) {}
    /// Give up the hart until `wakeup(chan)` may have happened.
    ///
    /// Spurious returns are allowed, so callers re-check their condition.
    fn sleep(&self, _chan: usize) {
        core::hint::spin_loop();
    }
    fn wakeup(&self, _chan: usize) {}
}

struct SingleHart;
impl Platform for SingleHart {}

static PLATFORM: Once<&'static dyn Platform> = Once::new();

/// Install the platform. Only the first call has any effect.
pub fn set_platform(platform: &'static dyn Platform) {
    PLATFORM.call_once(|| platform);
}

pub(crate) fn platform() -> &'static dyn Platform {
    match PLATFORM.get() {
        Some(platform) => *platform,
        None => &SingleHart,
    }
}

/// Sleep on `chan` until it may have been woken.
pub fn sleep(chan: usize) {
    platform().sleep(chan);
}

pub fn wakeup(chan: usize) {
    platform().wakeup(chan);
}

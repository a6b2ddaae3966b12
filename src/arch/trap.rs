//! Architecture-agnostic interrupt disabling.

use super::{cpu, platform};
use core::marker::PhantomData;

/// Keeps interrupts off on the current hart while it lives.
///
/// Holding one pins the caller to its hart, so the id returned by
/// [`InterruptBlocker::cpu_id`] stays correct until the blocker drops,
/// on every exit path.
pub struct InterruptBlocker {
    // Must be dropped on the hart that created it.
    _not_send: PhantomData<*const ()>,
}
impl InterruptBlocker {
    pub fn new() -> InterruptBlocker {
        push_intr_off();
        InterruptBlocker {
            _not_send: PhantomData,
        }
    }
    /// Id of the hart this blocker pins the caller to.
    pub fn cpu_id(&self) -> usize {
        cpu::cpu_id()
    }
}
impl Default for InterruptBlocker {
    fn default() -> InterruptBlocker {
        InterruptBlocker::new()
    }
}
impl core::ops::Drop for InterruptBlocker {
    fn drop(&mut self) {
        pop_intr_off();
    }
}

/// Like `intr_off()`, but matched: it takes two `pop_intr_off()`s
/// to undo two `push_intr_off()`s. If interrupts were off to
/// begin with, they stay off.
pub fn push_intr_off() {
    platform().push_off();
}

pub fn pop_intr_off() {
    platform().pop_off();
}

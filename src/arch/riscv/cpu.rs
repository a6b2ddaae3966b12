use super::asm::r_tp;
use crate::param::NCPU;

static mut CPUS: [Cpu; NCPU] = [Cpu::new(); NCPU];

/// Per-CPU interrupt nesting state.
#[derive(Copy, Clone)]
pub struct Cpu {
    /// Depth of push_off() nesting.
    pub interrupt_disable_layers: i32,
    /// Were interrupts enabled before push_off()?
    pub previous_interrupts_enabled: bool,
}
impl Cpu {
    pub const fn new() -> Cpu {
        Cpu {
            interrupt_disable_layers: 0,
            previous_interrupts_enabled: false,
        }
    }
    /// Must be called with interrupts disabled
    /// to prevent race with process being moved
    /// to a different CPU.
    pub fn current_id() -> usize {
        unsafe { r_tp() as usize }
    }
    /// Return this CPU's cpu struct.
    /// Interrupts must be disabled.
    pub unsafe fn current() -> &'static mut Cpu {
        &mut *core::ptr::addr_of_mut!(CPUS[Cpu::current_id()])
    }
}

//! RISC-V (Sv39, supervisor mode) implementation of [`Platform`].

pub mod asm;
pub mod cpu;
pub mod mem;

use super::Platform;
use cpu::Cpu;

/// Supervisor Interrupt Enable
pub const SSTATUS_SIE: u64 = 1 << 1;

extern "C" {
    // Provided by the scheduler: give up the hart for one round.
    #[link_name = "yield"]
    fn yield_hart();
}

pub struct Riscv;

/// The platform a RISC-V kernel passes to [`set_platform`](super::set_platform).
pub static RISCV: Riscv = Riscv;

impl Platform for Riscv {
    fn cpu_id(&self) -> usize {
        Cpu::current_id()
    }
    fn push_off(&self) {
        unsafe {
            let old = asm::intr_get();
            let cpu = Cpu::current();

            asm::intr_off();
            if cpu.interrupt_disable_layers == 0 {
                cpu.previous_interrupts_enabled = old;
            }
            cpu.interrupt_disable_layers += 1;
        }
    }
    fn pop_off(&self) {
        unsafe {
            let cpu = Cpu::current();

            if asm::intr_get() {
                panic!("pop_intr_off - interruptible");
            } else if cpu.interrupt_disable_layers < 1 {
                panic!("pop_intr_off");
            }

            cpu.interrupt_disable_layers -= 1;

            if cpu.interrupt_disable_layers == 0 && cpu.previous_interrupts_enabled {
                asm::intr_on();
            }
        }
    }
    fn sleep(&self, _chan: usize) {
        unsafe { yield_hart() }
    }
}

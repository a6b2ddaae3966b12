//! Architecture-agnostic memory constants.

#[cfg(target_arch = "riscv64")]
pub use super::riscv::mem::{KERNEL_BASE, PHYSICAL_END};

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

pub fn round_up_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub fn round_down_page(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}

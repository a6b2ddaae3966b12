// Physical memory layout

// QEMU -machine virt is setup like this,
// based on QEMU's hw/riscv/virt.c
//
// 80000000 - boot ROM jumps here in machine mode (kernel loads the kernel here)
//
// The kernel uses physical memory as so:
// 80000000 - entry.S, then kernel text and data
// end      - start of kernel page allocation area
// PHYSICAL_END - end of RAM used by the kernel

/// The kernel starts here.
pub const KERNEL_BASE: usize = 0x8000_0000;

/// The end of physical memory.
#[cfg(feature = "milk-v")]
pub const PHYSICAL_END: usize = KERNEL_BASE + (64 * 1024 * 1024);
/// The end of physical memory.
#[cfg(all(feature = "qemu-riscv64", not(feature = "milk-v")))]
pub const PHYSICAL_END: usize = KERNEL_BASE + (128 * 1024 * 1024);

#[cfg(not(any(feature = "milk-v", feature = "qemu-riscv64")))]
compile_error!("a platform must be selected");

//! Physical memory allocator, for user processes,
//! kernel stacks, page-table pages,
//! and pipe buffers. Allocates whole 4096-byte pages.
//!
//! Every hart keeps its own free list. Frees go to the freeing
//! hart's list. An allocation that finds its own list empty takes
//! a single page from the first other hart that has one.

use crate::{
    arch::{
        mem::{is_page_aligned, round_up_page, PAGE_SIZE},
        trap::InterruptBlocker,
    },
    param,
    sync::spinmutex::SpinMutex,
};
use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{null_mut, NonNull},
};
use log::{debug, error, trace};
use spin::Once;

/// Fill byte for freed pages, to catch dangling references.
pub const FREE_JUNK: u8 = 0x01;
/// Fill byte for newly allocated pages, to catch reads of
/// memory the caller never initialized.
pub const ALLOC_JUNK: u8 = 0x05;

/// Link stored in the first bytes of every free page.
#[repr(C)]
struct Run {
    next: *mut Run,
}

struct FreeList {
    head: *mut Run,
    len: usize,
}
// The pages on the list belong to nobody else.
unsafe impl Send for FreeList {}
impl FreeList {
    const fn new() -> FreeList {
        FreeList {
            head: null_mut(),
            len: 0,
        }
    }
    /// # Safety
    /// `run` must be a free, exclusively owned page.
    unsafe fn push(&mut self, run: NonNull<Run>) {
        (*run.as_ptr()).next = self.head;
        self.head = run.as_ptr();
        self.len += 1;
    }
    fn pop(&mut self) -> Option<NonNull<Run>> {
        let run = NonNull::new(self.head)?;
        self.head = unsafe { (*run.as_ptr()).next };
        self.len -= 1;
        Some(run)
    }
}

pub struct KernelMemory<const NCPU: usize> {
    /// First page handed out, page aligned.
    start: usize,
    /// One past the last usable byte.
    end: usize,
    lists: [SpinMutex<FreeList>; NCPU],
}
impl<const NCPU: usize> KernelMemory<NCPU> {
    /// Take over every whole page in `[start, end)`. The pages all
    /// start out on the calling hart's free list.
    ///
    /// # Safety
    /// The range must be memory that nothing else uses for as long
    /// as the allocator or any page it hands out is alive.
    pub unsafe fn new(start: usize, end: usize) -> KernelMemory<NCPU> {
        assert!(NCPU > 0, "kinit: no harts");
        let start = round_up_page(start.max(PAGE_SIZE));
        let kmem = KernelMemory {
            start,
            end: end.max(start),
            lists: core::array::from_fn(|_| SpinMutex::new(FreeList::new())),
        };
        kmem.freerange(kmem.start, kmem.end);
        debug!(
            "kinit: {} pages in [{:#x}, {:#x})",
            kmem.total_pages(),
            kmem.start,
            kmem.end
        );
        kmem
    }

    unsafe fn freerange(&self, start: usize, end: usize) {
        let mut p = round_up_page(start);
        while p + PAGE_SIZE <= end {
            self.kfree(p as *mut u8);
            p += PAGE_SIZE;
        }
    }

    fn owns(&self, pa: usize) -> bool {
        is_page_aligned(pa) && pa >= self.start && pa < self.end && self.end - pa >= PAGE_SIZE
    }

    /// Which free list the pinned hart uses.
    fn hart(&self, blocker: &InterruptBlocker) -> usize {
        let cpu = blocker.cpu_id();
        if cpu >= NCPU {
            error!("kalloc: hart {} but only {} free lists", cpu, NCPU);
            panic!("kalloc: hart out of range");
        }
        cpu
    }

    /// Free the page of physical memory pointed at by pa,
    /// which normally should have been returned by a call
    /// to kalloc(). The exception is when initializing the
    /// allocator - see new() above.
    ///
    /// # Safety
    /// Nothing may use the page after this call.
    pub unsafe fn kfree(&self, pa: *mut u8) {
        if !self.owns(pa as usize) {
            error!("kfree: {:p} is not a page of this allocator", pa);
            panic!("kfree");
        }

        // Fill with junk to catch dangling refs.
        core::ptr::write_bytes(pa, FREE_JUNK, PAGE_SIZE);

        let run = NonNull::new_unchecked(pa.cast::<Run>());
        let blocker = InterruptBlocker::new();
        let cpu = self.hart(&blocker);
        self.lists[cpu].lock().push(run);
    }

    /// Allocate one 4096-byte page of physical memory.
    ///
    /// Returns `None` if no hart has a free page.
    pub fn kalloc(&self) -> Option<NonNull<u8>> {
        let blocker = InterruptBlocker::new();
        let cpu = self.hart(&blocker);

        let mut run = self.lists[cpu].lock().pop();
        if run.is_none() {
            // At most one free-list lock is held at any time.
            for victim in (0..NCPU).filter(|&i| i != cpu) {
                let stolen = self.lists[victim].lock().pop();
                if let Some(page) = stolen {
                    trace!("kalloc: hart {} took {:p} from hart {}", cpu, page, victim);
                    unsafe { self.lists[cpu].lock().push(page) };
                    break;
                }
            }
            run = self.lists[cpu].lock().pop();
        }
        drop(blocker);

        let page = run?.cast::<u8>();
        unsafe { core::ptr::write_bytes(page.as_ptr(), ALLOC_JUNK, PAGE_SIZE) };
        Some(page)
    }

    /// Number of whole pages the allocator manages.
    pub fn total_pages(&self) -> usize {
        (self.end - self.start) / PAGE_SIZE
    }

    /// Free pages on each hart's list, one lock at a time.
    pub fn stats(&self) -> [usize; NCPU] {
        core::array::from_fn(|i| self.lists[i].lock().len)
    }

    pub fn free_pages(&self) -> usize {
        self.stats().iter().sum()
    }
}

/// The kernel's page allocator.
pub type Kmem = KernelMemory<{ param::NCPU }>;

static KMEM: Once<Kmem> = Once::new();

/// Hand the pages in `[start, end)` to the kernel's allocator.
/// Must run once, before any other hart allocates.
///
/// # Safety
/// See [`KernelMemory::new`].
pub unsafe fn kinit(start: usize, end: usize) -> &'static Kmem {
    KMEM.call_once(|| KernelMemory::new(start, end))
}

fn kmem() -> &'static Kmem {
    match KMEM.get() {
        Some(kmem) => kmem,
        None => panic!("kmem: kinit not called"),
    }
}

/// Allocate one page from the kernel's allocator.
pub fn kalloc() -> Option<NonNull<u8>> {
    kmem().kalloc()
}

/// Return a page to the kernel's allocator.
///
/// # Safety
/// See [`KernelMemory::kfree`].
pub unsafe fn kfree(pa: *mut u8) {
    kmem().kfree(pa);
}

/// `GlobalAlloc` over the kernel's page allocator, for kernels
/// that want `alloc` collections. Every allocation takes a whole page.
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() > PAGE_SIZE || layout.align() > PAGE_SIZE {
            panic!("can only allocate one page of memory at a time");
        }
        match kalloc() {
            Some(page) => page.as_ptr(),
            None => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        kfree(ptr);
    }
}

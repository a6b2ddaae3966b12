mod common;

use bcache_kalloc::KernelMemory;
use common::{become_hart, bounds, depth, heap, install, on_hart};
use rand::Rng;
use std::{collections::HashSet, thread};

type Kmem4 = KernelMemory<4>;

fn alloc_on<const N: usize>(kmem: &KernelMemory<N>, hart: usize) -> Option<usize> {
    on_hart(hart, || kmem.kalloc().map(|page| page.as_ptr() as usize)).unwrap()
}

fn free_on<const N: usize>(kmem: &KernelMemory<N>, hart: usize, page: usize) {
    on_hart(hart, || unsafe { kmem.kfree(page as *mut u8) }).unwrap()
}

#[test]
fn empty_hart_takes_one_page() {
    install();
    let mut heap = heap(8);
    let (start, end) = bounds(&mut heap);
    // Built on hart 0, so hart 0 owns every page.
    let kmem: Kmem4 = unsafe { KernelMemory::new(start, end) };
    assert_eq!(kmem.stats(), [8, 0, 0, 0]);

    let page = alloc_on(&kmem, 2).unwrap();
    assert_eq!(kmem.stats(), [7, 0, 0, 0]);

    // Freed pages go to the freeing hart.
    free_on(&kmem, 3, page);
    assert_eq!(kmem.stats(), [7, 0, 0, 1]);

    // Hart 1 steals from the lowest other hart with pages.
    assert!(alloc_on(&kmem, 1).is_some());
    assert_eq!(kmem.stats(), [6, 0, 0, 1]);

    // Hart 3 still serves itself first.
    assert_eq!(alloc_on(&kmem, 3), Some(page));
    assert_eq!(kmem.stats(), [6, 0, 0, 0]);
}

#[test]
fn exhaustion_is_shared_by_all_harts() {
    install();
    let mut heap = heap(3);
    let (start, end) = bounds(&mut heap);
    let kmem: KernelMemory<2> = unsafe { KernelMemory::new(start, end) };

    let pages: Vec<usize> = (0..3).map(|_| alloc_on(&kmem, 1).unwrap()).collect();
    assert_eq!(alloc_on(&kmem, 0), None);
    assert_eq!(alloc_on(&kmem, 1), None);

    free_on(&kmem, 0, pages[0]);
    assert_eq!(alloc_on(&kmem, 1), Some(pages[0]));
}

#[test]
fn hart_without_a_free_list_panics() {
    install();
    let mut heap = heap(1);
    let (start, end) = bounds(&mut heap);
    let kmem: KernelMemory<2> = unsafe { KernelMemory::new(start, end) };
    assert!(on_hart(5, || kmem.kalloc().is_some()).is_err());
    assert_eq!(kmem.free_pages(), 1);
}

#[test]
fn interrupts_are_restored() {
    install();
    let mut heap = heap(2);
    let (start, end) = bounds(&mut heap);
    let kmem: KernelMemory<2> = unsafe { KernelMemory::new(start, end) };
    let page = kmem.kalloc().unwrap();
    assert_eq!(depth(), 0);
    unsafe { kmem.kfree(page.as_ptr()) };
    assert_eq!(depth(), 0);
}

#[test]
fn pages_are_conserved_under_churn() {
    install();
    const HARTS: usize = 4;
    let mut heap = heap(64);
    let (start, end) = bounds(&mut heap);
    let kmem: KernelMemory<HARTS> = unsafe { KernelMemory::new(start, end) };

    let held: Vec<usize> = thread::scope(|s| {
        let workers: Vec<_> = (0..HARTS)
            .map(|hart| {
                let kmem = &kmem;
                s.spawn(move || {
                    become_hart(hart);
                    let mut rng = rand::thread_rng();
                    let mut mine: Vec<usize> = Vec::new();
                    for _ in 0..2000 {
                        if rng.gen_bool(0.6) {
                            if let Some(page) = kmem.kalloc() {
                                let page = page.as_ptr();
                                // Stamp it; a page handed out twice gets clobbered.
                                unsafe { page.cast::<usize>().write(page as usize) };
                                mine.push(page as usize);
                            }
                        } else if !mine.is_empty() {
                            let page = mine.swap_remove(rng.gen_range(0..mine.len()));
                            assert_eq!(unsafe { (page as *const usize).read() }, page);
                            unsafe { kmem.kfree(page as *mut u8) };
                        }
                    }
                    for &page in &mine {
                        assert_eq!(unsafe { (page as *const usize).read() }, page);
                    }
                    mine
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = held.iter().collect();
    assert_eq!(unique.len(), held.len());
    assert_eq!(kmem.free_pages() + held.len(), kmem.total_pages());
}

pub mod kalloc;

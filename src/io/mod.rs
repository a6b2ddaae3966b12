pub mod bio;
pub mod buf;
pub mod disk;
pub mod ramdisk;

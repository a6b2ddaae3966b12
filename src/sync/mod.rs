pub mod sleeplock;
pub mod spinmutex;

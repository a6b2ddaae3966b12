/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Device number of file system root disk
pub const ROOTDEV: u32 = 1;
/// Max num of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// Size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// Number of independently locked buffer cache shards.
/// Prime, so consecutive block numbers spread evenly.
pub const NSHARD: usize = 13;

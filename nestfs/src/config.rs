//! On-disk layout constants. Everything below `SECTOR_SIZE` is derived from it,
//! so changing the sector size re-derives the header and directory geometry.

use std::mem::size_of;

/// Bytes per disk sector, the unit of allocation and I/O.
pub const SECTOR_SIZE: usize = 128;

/// Width of one on-disk integer field.
pub const INT_BYTES: usize = size_of::<u32>();

/// Slots in a header's sector table once `num_bytes`, `num_sectors` and `level`
/// have taken their share of the sector.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 3 * INT_BYTES) / INT_BYTES;

/// Deepest index tree a file may use.
pub const MAX_LEVEL: u32 = 4;

/// Well-known header locations. These are read at mount without any lookup.
pub const FREE_MAP_SECTOR: usize = 0;
pub const DIRECTORY_SECTOR: usize = 1;

/// Entries per directory table. Directories never grow past this.
pub const NUM_DIR_ENTRIES: usize = 64;

/// Longest name a directory entry keeps. The on-disk buffer adds a NUL.
pub const FILE_NAME_MAX_LEN: usize = 11;

/// Size of a directory's content: the whole entry table.
pub const DIRECTORY_FILE_SIZE: usize = crate::directory::DIRECTORY_ENTRY_SIZE * NUM_DIR_ENTRIES;

/// Handles the open-file table will hold at once.
pub const MAX_OPEN_FILES: usize = 16;

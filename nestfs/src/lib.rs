//! A small hierarchical file system over a fixed-size sector device.
//!
//! Files are described by one-sector headers that grow into an index tree of
//! up to four levels as files get larger. Directories are fixed tables of named
//! entries stored as ordinary files, and free space is a bitmap that is itself
//! a file.
mod alloc;
pub mod config;
mod directory;
mod error;
mod fs;
mod header;
pub mod io;
mod open_file;
mod path;
pub mod syscall;

pub use crate::alloc::{Bitmap, SectorAllocator, State};
pub use crate::directory::{render_listing, Directory, DirectoryEntry, ListedEntry};
pub use crate::error::{FsError, Result};
pub use crate::fs::{FileSystem, OpenFileId};
pub use crate::header::{capacity, child_size, level_for, sector_needs_by_level, slots_used, FileHeader};
pub use crate::open_file::OpenFile;
pub use crate::path::AbsolutePath;

//! Directories are fixed tables of named entries, stored as the content of an
//! ordinary file. A table never grows: once every slot is in use the directory
//! is full.

use std::borrow::Cow;
use std::fmt;
use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::alloc::SectorAllocator;
use crate::config::{DIRECTORY_FILE_SIZE, FILE_NAME_MAX_LEN, NUM_DIR_ENTRIES};
use crate::error::{FsError, Result};
use crate::header::FileHeader;
use crate::io::{BlockStorage, SectorNumber};
use crate::open_file::OpenFile;
use crate::path::AbsolutePath;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq, Eq)]
/// One slot of a directory table. The name buffer keeps room for a trailing NUL
/// and its length must keep the record free of padding.
pub struct DirectoryEntry {
    in_use: u16,
    is_directory: u16,
    /// Sector of the entry's file header.
    sector: u32,
    name: [u8; FILE_NAME_MAX_LEN + 1],
}

pub const DIRECTORY_ENTRY_SIZE: usize = size_of::<DirectoryEntry>();

/// Longest prefix of `name` that fits an entry, cut on a character boundary.
fn truncate_name(name: &str) -> &str {
    if name.len() <= FILE_NAME_MAX_LEN {
        return name;
    }
    let mut end = FILE_NAME_MAX_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

impl DirectoryEntry {
    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory != 0
    }

    pub fn sector(&self) -> SectorNumber {
        self.sector as SectorNumber
    }

    fn name_bytes(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..end]
    }

    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    fn name_eq(&self, name: &str) -> bool {
        self.name_bytes() == truncate_name(name).as_bytes()
    }
}

/// One line of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedEntry {
    /// Nesting below the listed directory, 0 for its own entries.
    pub depth: usize,
    pub name: String,
    /// Path relative to the listed directory, e.g. `d/b.txt`.
    pub path: String,
    pub is_directory: bool,
    pub sector: SectorNumber,
}

/// One line per entry. A flat listing prints bare names; a recursive one
/// prints the indented `[D]`/`[F]` form of each entry.
pub fn render_listing(listing: &[ListedEntry], recursive: bool) -> String {
    listing
        .iter()
        .map(|e| if recursive { e.to_string() } else { e.name.clone() })
        .collect::<Vec<_>>()
        .join("\n")
}

impl fmt::Display for ListedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.is_directory { "[D]" } else { "[F]" };
        write!(f, "{}{} {}", "  ".repeat(self.depth), marker, self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Directory {
    table: Vec<DirectoryEntry>,
}

impl Default for Directory {
    fn default() -> Self {
        Directory::new()
    }
}

impl Directory {
    /// An empty table of `NUM_DIR_ENTRIES` free slots.
    pub fn new() -> Self {
        Directory {
            table: vec![DirectoryEntry::new_zeroed(); NUM_DIR_ENTRIES],
        }
    }

    /// Reads the entry table out of a directory file.
    pub fn fetch_from(dev: &mut impl BlockStorage, file: &OpenFile) -> Result<Self> {
        let mut buf = vec![0u8; DIRECTORY_FILE_SIZE];
        file.read_at(dev, &mut buf, 0)?;
        let table = buf
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .map(DirectoryEntry::read_from)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| FsError::InvalidArgument("malformed directory table".to_string()))?;
        Ok(Directory { table })
    }

    /// Opens the directory file whose header is at `sector` and reads it.
    pub fn load(dev: &mut impl BlockStorage, sector: SectorNumber) -> Result<Self> {
        let file = OpenFile::new(dev, sector)?;
        Directory::fetch_from(dev, &file)
    }

    pub fn write_back(&self, dev: &mut impl BlockStorage, file: &OpenFile) -> Result<()> {
        file.write_at(dev, self.table.as_slice().as_bytes(), 0)?;
        Ok(())
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.table.iter().position(|e| e.in_use() && e.name_eq(name))
    }

    pub fn entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.find_index(name).map(|i| &self.table[i])
    }

    /// Header sector of `name`, if present.
    pub fn find(&self, name: &str) -> Option<SectorNumber> {
        self.entry(name).map(DirectoryEntry::sector)
    }

    /// Walks `path` from component `index` on, opening each intermediate
    /// directory in turn. Returns the header sector of the last component and
    /// whether it is a directory.
    pub fn find_by_absolute_path(
        &self,
        dev: &mut impl BlockStorage,
        path: &AbsolutePath,
        index: usize,
    ) -> Result<(SectorNumber, bool)> {
        let name = path
            .component(index)
            .ok_or_else(|| FsError::InvalidPath(format!("{} has no component {}", path, index)))?;
        let entry = self.entry(name).ok_or(FsError::NotFound)?;

        if index + 1 == path.depth() {
            return Ok((entry.sector(), entry.is_directory()));
        }
        if !entry.is_directory() {
            return Err(FsError::NotADirectory);
        }
        Directory::load(dev, entry.sector())?.find_by_absolute_path(dev, path, index + 1)
    }

    /// Claims the first free slot for `name`. Fails if the name is taken or no
    /// slot is free, leaving the table as it was.
    pub fn add(&mut self, name: &str, sector: SectorNumber, is_directory: bool) -> Result<()> {
        if self.find_index(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .table
            .iter_mut()
            .find(|e| !e.in_use())
            .ok_or(FsError::DirectoryFull)?;

        let name = truncate_name(name).as_bytes();
        *slot = DirectoryEntry::new_zeroed();
        slot.in_use = 1;
        slot.is_directory = is_directory as u16;
        slot.sector = sector as u32;
        slot.name[..name.len()].copy_from_slice(name);
        Ok(())
    }

    /// Frees the slot of `name`. The file it points at is untouched.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let i = self.find_index(name).ok_or(FsError::NotFound)?;
        self.table[i].in_use = 0;
        Ok(())
    }

    /// Frees the storage of every entry, descending into sub-directories first,
    /// and empties the table.
    pub fn remove_all(
        &mut self,
        dev: &mut impl BlockStorage,
        allocator: &mut impl SectorAllocator,
    ) -> Result<()> {
        for entry in self.table.iter_mut().filter(|e| e.in_use()) {
            if entry.is_directory() {
                Directory::load(dev, entry.sector())?.remove_all(dev, allocator)?;
            }
            let hdr = FileHeader::fetch_from(dev, entry.sector())?;
            hdr.deallocate_multi_level(dev, allocator, true)?;
            allocator.clear(entry.sector());
            entry.in_use = 0;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.table.iter().all(|e| !e.in_use())
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.table.iter().filter(|e| e.in_use())
    }

    /// In-use entries of this directory only.
    pub fn list(&self) -> Vec<ListedEntry> {
        self.entries()
            .map(|e| ListedEntry {
                depth: 0,
                name: e.name().into_owned(),
                path: e.name().into_owned(),
                is_directory: e.is_directory(),
                sector: e.sector(),
            })
            .collect()
    }

    /// In-use entries with every sub-directory's listing following its entry,
    /// `depth` levels deeper.
    pub fn recursively_list(
        &self,
        dev: &mut impl BlockStorage,
        depth: usize,
    ) -> Result<Vec<ListedEntry>> {
        let mut listing = vec![];
        for entry in self.entries() {
            let name = entry.name().into_owned();
            listing.push(ListedEntry {
                depth,
                name: name.clone(),
                path: name.clone(),
                is_directory: entry.is_directory(),
                sector: entry.sector(),
            });
            if entry.is_directory() {
                let nested = Directory::load(dev, entry.sector())?.recursively_list(dev, depth + 1)?;
                listing.extend(nested.into_iter().map(|mut child| {
                    child.path = format!("{}/{}", name, child.path);
                    child
                }));
            }
        }
        Ok(listing)
    }
}

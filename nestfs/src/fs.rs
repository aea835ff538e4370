use log::{debug, info};

use crate::alloc::{Bitmap, SectorAllocator};
use crate::config::{DIRECTORY_FILE_SIZE, DIRECTORY_SECTOR, FREE_MAP_SECTOR, MAX_OPEN_FILES};
use crate::directory::{render_listing, Directory, ListedEntry};
use crate::error::{FsError, Result};
use crate::header::FileHeader;
use crate::io::{BlockStorage, SectorNumber};
use crate::open_file::OpenFile;
use crate::path::AbsolutePath;

/// Small integer naming an entry of the open-file table. Ids start at 1.
pub type OpenFileId = usize;

/// A hierarchical file system over a sector device.
///
/// # Layout
/// ====================================================================
/// | Bitmap header (0) | Root directory header (1) | Everything else  |
/// ====================================================================
///
/// The free-sector bitmap and the root directory are ordinary files whose
/// headers sit at the two well-known sectors. Both stay open for as long as the
/// file system does. Every other sector is handed out through the bitmap.
///
/// Mutating operations work on in-memory copies of the bitmap and the affected
/// directories and write them back only once everything has succeeded. A failed
/// operation leaves nothing on disk that a directory or the bitmap refers to.
pub struct FileSystem<T: BlockStorage> {
    dev: T,
    free_map_file: OpenFile,
    directory_file: OpenFile,
    open_files: Vec<Option<OpenFile>>,
}

impl<T: BlockStorage> FileSystem<T> {
    /// Lays an empty file system onto `dev`, whatever it held before.
    pub fn format(mut dev: T) -> Result<Self> {
        let num_sectors = dev.sector_count();
        if num_sectors <= DIRECTORY_SECTOR {
            return Err(FsError::InvalidArgument(format!(
                "a device of {} sectors cannot hold the root headers",
                num_sectors
            )));
        }
        info!("Formatting the file system over {} sectors.", num_sectors);

        let mut free_map = Bitmap::new(num_sectors);
        let directory = Directory::new();

        // The headers take the well-known sectors, their content comes out of
        // the same map they describe.
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(DIRECTORY_SECTOR);
        let map_hdr =
            FileHeader::allocate_multi_level(&mut dev, &mut free_map, Bitmap::file_size(num_sectors))?;
        let dir_hdr = FileHeader::allocate_multi_level(&mut dev, &mut free_map, DIRECTORY_FILE_SIZE)?;

        // Headers must be on disk before the files can be opened.
        debug!("Writing headers back to disk.");
        map_hdr.write_back(&mut dev, FREE_MAP_SECTOR)?;
        dir_hdr.write_back(&mut dev, DIRECTORY_SECTOR)?;

        let free_map_file = OpenFile::new(&mut dev, FREE_MAP_SECTOR)?;
        let directory_file = OpenFile::new(&mut dev, DIRECTORY_SECTOR)?;

        debug!("Writing bitmap and directory back to disk.");
        free_map.write_back(&mut dev, &free_map_file)?;
        directory.write_back(&mut dev, &directory_file)?;
        dev.sync_disk()?;

        Ok(FileSystem::with_roots(dev, free_map_file, directory_file))
    }

    /// Attaches to a device that already holds a formatted file system.
    pub fn mount(mut dev: T) -> Result<Self> {
        info!("Mounting the file system.");
        let free_map_file = OpenFile::new(&mut dev, FREE_MAP_SECTOR)?;
        let directory_file = OpenFile::new(&mut dev, DIRECTORY_SECTOR)?;
        Ok(FileSystem::with_roots(dev, free_map_file, directory_file))
    }

    fn with_roots(dev: T, free_map_file: OpenFile, directory_file: OpenFile) -> Self {
        FileSystem {
            dev,
            free_map_file,
            directory_file,
            open_files: std::iter::repeat_with(|| None).take(MAX_OPEN_FILES).collect(),
        }
    }

    /// Creates a regular file of fixed `initial_size` bytes at `name`.
    ///
    /// Fails if the parent directory does not exist, the name is taken, the
    /// parent has no free entry, or the disk cannot hold the header and data.
    pub fn create(&mut self, name: &str, initial_size: usize) -> Result<()> {
        debug!("Creating file {} size {}", name, initial_size);
        self.create_entry(name, initial_size, false)
    }

    /// Creates an empty directory at `name`.
    pub fn create_directory(&mut self, name: &str) -> Result<()> {
        debug!("Creating directory {}", name);
        self.create_entry(name, DIRECTORY_FILE_SIZE, true)
    }

    fn create_entry(&mut self, name: &str, size: usize, is_directory: bool) -> Result<()> {
        let path = AbsolutePath::parse(name)?;
        let leaf = path
            .last_name()
            .ok_or_else(|| FsError::InvalidPath("\"/\" always exists".to_string()))?;

        let root = self.load_root()?;
        let dir_sector = path.get_upper_level_sector(&mut self.dev, &root, DIRECTORY_SECTOR)?;
        let dir_file = OpenFile::new(&mut self.dev, dir_sector)?;
        let mut directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        if directory.find(leaf).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut free_map = self.load_free_map()?;
        let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
        directory.add(leaf, sector, is_directory)?;
        let hdr = FileHeader::allocate_multi_level(&mut self.dev, &mut free_map, size)?;

        // Everything worked, flush all changes back to disk. Content first,
        // then the entry naming it, then the map claiming its sectors.
        hdr.write_back(&mut self.dev, sector)?;
        if is_directory {
            let file = OpenFile::new(&mut self.dev, sector)?;
            Directory::new().write_back(&mut self.dev, &file)?;
        }
        directory.write_back(&mut self.dev, &dir_file)?;
        free_map.write_back(&mut self.dev, &self.free_map_file)?;
        info!("Created {} with header at sector {}", path, sector);
        Ok(())
    }

    /// Opens the file or directory at `name`. Every call yields an independent
    /// handle.
    pub fn open(&mut self, name: &str) -> Result<OpenFile> {
        debug!("Opening file {}", name);
        let path = AbsolutePath::parse(name)?;
        let root = self.load_root()?;
        let sector = path.get_sector(&mut self.dev, &root, DIRECTORY_SECTOR)?;
        OpenFile::new(&mut self.dev, sector)
    }

    /// Deletes the file at `name`: its data, its header and its entry.
    ///
    /// Does not descend into directories. An empty directory is removed like a
    /// file; a directory that still has entries fails with `LeafMismatch` and
    /// must go through [`FileSystem::remove_recursively`].
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let path = AbsolutePath::parse(name)?;
        let leaf = path
            .last_name()
            .ok_or_else(|| FsError::InvalidPath("cannot remove \"/\"".to_string()))?;

        let root = self.load_root()?;
        let (sector, is_directory) = path.resolve(&mut self.dev, &root, DIRECTORY_SECTOR)?;
        let dir_sector = path.get_upper_level_sector(&mut self.dev, &root, DIRECTORY_SECTOR)?;
        if is_directory && !Directory::load(&mut self.dev, sector)?.is_empty() {
            return Err(FsError::LeafMismatch);
        }

        let mut free_map = self.load_free_map()?;
        debug!("Start deallocate {} at sector {}", path, sector);
        let hdr = FileHeader::fetch_from(&mut self.dev, sector)?;
        hdr.deallocate_multi_level(&mut self.dev, &mut free_map, true)?;
        free_map.clear(sector);

        self.unlink(dir_sector, leaf, &free_map)?;
        info!("Removed {}", path);
        Ok(())
    }

    /// Deletes `name` and, for a directory, everything below it.
    pub fn remove_recursively(&mut self, name: &str) -> Result<()> {
        let path = AbsolutePath::parse(name)?;
        let leaf = path
            .last_name()
            .ok_or_else(|| FsError::InvalidPath("cannot remove \"/\"".to_string()))?;

        let root = self.load_root()?;
        let (sector, is_directory) = path.resolve(&mut self.dev, &root, DIRECTORY_SECTOR)?;
        if !is_directory {
            return self.remove(name);
        }
        let dir_sector = path.get_upper_level_sector(&mut self.dev, &root, DIRECTORY_SECTOR)?;

        let mut free_map = self.load_free_map()?;
        let mut target = Directory::load(&mut self.dev, sector)?;
        target.remove_all(&mut self.dev, &mut free_map)?;

        let hdr = FileHeader::fetch_from(&mut self.dev, sector)?;
        hdr.deallocate_multi_level(&mut self.dev, &mut free_map, true)?;
        free_map.clear(sector);

        self.unlink(dir_sector, leaf, &free_map)?;
        info!("Removed {} and everything below it", path);
        Ok(())
    }

    /// Drops `leaf` from the directory at `dir_sector`, then persists that
    /// directory and the already updated map, in that order. Table entries
    /// whose header sector the map no longer holds are closed.
    fn unlink(&mut self, dir_sector: SectorNumber, leaf: &str, free_map: &Bitmap) -> Result<()> {
        let dir_file = OpenFile::new(&mut self.dev, dir_sector)?;
        let mut directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        directory.remove(leaf)?;
        directory.write_back(&mut self.dev, &dir_file)?;
        free_map.write_back(&mut self.dev, &self.free_map_file)?;

        for (i, slot) in self.open_files.iter_mut().enumerate() {
            if slot.as_ref().map_or(false, |f| !free_map.test(f.sector())) {
                debug!("Closing open file {} of a removed file", i + 1);
                *slot = None;
            }
        }
        Ok(())
    }

    /// Lists the directory at `name`, descending into sub-directories when
    /// `recursive` is set.
    pub fn list(&mut self, name: &str, recursive: bool) -> Result<Vec<ListedEntry>> {
        let (sector, is_directory) = self.resolve(name)?;
        if !is_directory {
            return Err(FsError::NotADirectory);
        }
        let directory = Directory::load(&mut self.dev, sector)?;
        let listing = if recursive {
            directory.recursively_list(&mut self.dev, 0)?
        } else {
            directory.list()
        };
        debug!("Listing of {}:\n{}", name, render_listing(&listing, recursive));
        Ok(listing)
    }

    /// Opens `name` into the open-file table and returns its id.
    ///
    /// Removing the file later closes its table entry, and the id then fails
    /// like any unknown id. Handles returned by [`FileSystem::open`] are not
    /// tracked and go stale on removal.
    pub fn open_a_file(&mut self, name: &str) -> Result<OpenFileId> {
        let file = self.open(name)?;
        let (i, slot) = self
            .open_files
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(FsError::TooManyOpenFiles)?;
        *slot = Some(file);
        Ok(i + 1)
    }

    /// Reads from the open file `id` at its seek position.
    pub fn read(&mut self, id: OpenFileId, buf: &mut [u8]) -> Result<usize> {
        let file = Self::open_slot(&mut self.open_files, id)?;
        file.read(&mut self.dev, buf)
    }

    /// Writes to the open file `id` at its seek position.
    pub fn write(&mut self, id: OpenFileId, buf: &[u8]) -> Result<usize> {
        let file = Self::open_slot(&mut self.open_files, id)?;
        file.write(&mut self.dev, buf)
    }

    pub fn close(&mut self, id: OpenFileId) -> Result<()> {
        Self::open_slot(&mut self.open_files, id)?;
        self.open_files[id - 1] = None;
        Ok(())
    }

    fn open_slot(open_files: &mut [Option<OpenFile>], id: OpenFileId) -> Result<&mut OpenFile> {
        id.checked_sub(1)
            .and_then(|i| open_files.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::InvalidArgument(format!("no open file with id {}", id)))
    }

    pub fn read_at(&mut self, file: &OpenFile, buf: &mut [u8], position: usize) -> Result<usize> {
        file.read_at(&mut self.dev, buf, position)
    }

    pub fn write_at(&mut self, file: &OpenFile, buf: &[u8], position: usize) -> Result<usize> {
        file.write_at(&mut self.dev, buf, position)
    }

    pub fn file_length(&self, file: &OpenFile) -> usize {
        file.length()
    }

    /// Sectors the persisted bitmap still has free.
    pub fn free_sectors(&mut self) -> Result<usize> {
        Ok(self.load_free_map()?.num_clear())
    }

    /// Renders both root headers, the bitmap usage and the root directory with
    /// the header of every entry.
    pub fn dump(&mut self) -> Result<String> {
        let free_map = self.load_free_map()?;
        let root = self.load_root()?;

        let mut out = format!(
            "Bit map file header:\n{}\nDirectory file header:\n{}\nFree sectors: {} of {}\nDirectory contents:\n",
            self.free_map_file.header(),
            self.directory_file.header(),
            free_map.num_clear(),
            free_map.len()
        );
        for entry in root.entries() {
            let hdr = FileHeader::fetch_from(&mut self.dev, entry.sector())?;
            out.push_str(&format!(
                "Name: {}, Sector: {}\n{}\n",
                entry.name(),
                entry.sector(),
                hdr
            ));
        }
        Ok(out)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.dev.sync_disk()?;
        Ok(())
    }

    /// Closes the file system and hands the device back.
    pub fn into_device(self) -> T {
        self.dev
    }

    fn resolve(&mut self, name: &str) -> Result<(SectorNumber, bool)> {
        let path = AbsolutePath::parse(name)?;
        let root = self.load_root()?;
        path.resolve(&mut self.dev, &root, DIRECTORY_SECTOR)
    }

    fn load_root(&mut self) -> Result<Directory> {
        Directory::fetch_from(&mut self.dev, &self.directory_file)
    }

    fn load_free_map(&mut self) -> Result<Bitmap> {
        let mut free_map = Bitmap::new(self.dev.sector_count());
        free_map.fetch_from(&mut self.dev, &self.free_map_file)?;
        Ok(free_map)
    }
}

use crate::config::SECTOR_SIZE;
use crate::io::{BlockStorage, SectorNumber};
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Emulates a sector disk in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a sector.
    fd: File,
    /// The total number of sectors available in the file store.
    sector_count: usize,
}

impl FileBlockEmulator {
    /// Opens a disk image at the specified path. This method does not validate
    /// the sectors, it is up for clients to ensure disks are appropriately
    /// initialized.
    pub fn open_disk<P: AsRef<Path>>(dest: P, nsectors: usize) -> std::io::Result<Self> {
        // Return error if the file does not exist rather than create one.
        let fd = OpenOptions::new().read(true).write(true).open(dest)?;
        Ok(FileBlockEmulator {
            fd,
            sector_count: nsectors,
        })
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, sector: SectorNumber) -> std::io::Result<()> {
        if sector >= self.sector_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector out of range",
            ));
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read_sector(&mut self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(sector)?;
        if buf.len() < SECTOR_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read sector",
            ));
        }
        trace!("read sector {}", sector);
        self.fd
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        self.fd.read_exact(&mut buf[..SECTOR_SIZE])
    }

    /// This method truncates writes that exceed the sector size.
    fn write_sector(&mut self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(sector)?;
        trace!("write sector {}", sector);
        self.fd
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;

        let max = SECTOR_SIZE.min(buf.len());
        self.fd.write_all(&buf[..max])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    sector_count: usize,
    clear: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            // A better default here might be the size of the file rounded down
            // to the nearest sector.
            sector_count: 0,
            clear: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired sectors in the device.
    pub fn with_sector_count(mut self, sectors: usize) -> Self {
        self.sector_count = sectors;
        self
    }

    /// Zero the medium on build. Turn this off to reattach an already
    /// formatted image.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless
    /// told otherwise, does destructive things to prepare the file for use.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        debug_assert!(self.sector_count > 0);
        if self.clear {
            self.zero_medium()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            sector_count: self.sector_count,
        })
    }

    fn zero_medium(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the whole disk, buffering each write to prevent excessive syscalls.
        let zeroes = [0x00; SECTOR_SIZE];
        for _ in 0..self.sector_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_disk(sectors: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_sector_count(sectors)
            .build()
            .expect("failed to allocate disk image")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let mut disk_emu = build_disk(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(
            disk_emu.into_file().metadata().unwrap().len(),
            4 * SECTOR_SIZE as u64
        );
    }

    #[test]
    fn can_read_and_write_sectors() {
        let mut disk_emu = build_disk(4);

        // Fill a sector with a non-zero character.
        disk_emu.write_sector(2, &[0x55; SECTOR_SIZE]).unwrap();

        // Read a different sector.
        let mut read_sector = vec![0xff; SECTOR_SIZE];
        disk_emu.read_sector(3, &mut read_sector).unwrap();
        assert_eq!(read_sector, vec![0x00; SECTOR_SIZE]);

        // Read the sector with data.
        let mut filled = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(2, &mut filled).unwrap();
        assert_eq!(filled, vec![0x55; SECTOR_SIZE]);
    }

    #[test]
    fn can_read_and_write_start_and_end_sectors() {
        let mut disk_emu = build_disk(2);

        disk_emu.write_sector(0, &[0x11; SECTOR_SIZE]).unwrap();
        disk_emu.write_sector(1, &[0x22; SECTOR_SIZE]).unwrap();

        let mut buf = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(0, &mut buf).unwrap();
        assert_eq!(buf, vec![0x11; SECTOR_SIZE]);
        disk_emu.read_sector(1, &mut buf).unwrap();
        assert_eq!(buf, vec![0x22; SECTOR_SIZE]);
    }

    #[test]
    fn access_beyond_range_is_an_error() {
        let mut disk_emu = build_disk(1);

        let err = disk_emu.write_sector(1, &[0x55; SECTOR_SIZE]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut buf = vec![0x00; SECTOR_SIZE];
        assert!(disk_emu.read_sector(1, &mut buf).is_err());
    }

    #[test]
    fn reading_into_short_buffer_is_an_error() {
        let mut disk_emu = build_disk(1);
        let mut buf = vec![0x00; SECTOR_SIZE / 2];
        assert!(disk_emu.read_sector(0, &mut buf).is_err());
    }

    #[test]
    fn short_write_only_touches_prefix() {
        let mut disk_emu = build_disk(1);
        disk_emu.write_sector(0, &[0x55; SECTOR_SIZE]).unwrap();
        disk_emu.write_sector(0, &[0x11; SECTOR_SIZE / 2]).unwrap();

        let mut buf = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(0, &mut buf).unwrap();
        assert_eq!(&buf[..SECTOR_SIZE / 2], &[0x11; SECTOR_SIZE / 2][..]);
        assert_eq!(&buf[SECTOR_SIZE / 2..], &[0x55; SECTOR_SIZE / 2][..]);
    }

    #[test]
    fn reattached_medium_keeps_contents() {
        let image = tempfile::NamedTempFile::new().unwrap();
        let mut disk_emu = FileBlockEmulatorBuilder::from(image.reopen().unwrap())
            .with_sector_count(2)
            .build()
            .unwrap();
        disk_emu.write_sector(1, &[0x42; SECTOR_SIZE]).unwrap();
        disk_emu.sync_disk().unwrap();

        let mut disk_emu = FileBlockEmulatorBuilder::from(image.reopen().unwrap())
            .with_sector_count(2)
            // Don't reset initialized disk.
            .clear_medium(false)
            .build()
            .unwrap();
        let mut buf = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(1, &mut buf).unwrap();
        assert_eq!(buf, vec![0x42; SECTOR_SIZE]);
    }
}

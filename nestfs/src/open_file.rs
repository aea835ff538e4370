use crate::config::SECTOR_SIZE;
use crate::error::Result;
use crate::header::FileHeader;
use crate::io::{BlockStorage, SectorNumber};

/// A live handle over one file: its header sector, the header itself and a
/// seek position. Reads and writes address the file's logical bytes and never
/// grow it past the length fixed at creation.
#[derive(Debug)]
pub struct OpenFile {
    sector: SectorNumber,
    hdr: FileHeader,
    seek_position: usize,
}

impl OpenFile {
    pub fn new(dev: &mut impl BlockStorage, sector: SectorNumber) -> Result<Self> {
        Ok(OpenFile {
            sector,
            hdr: FileHeader::fetch_from(dev, sector)?,
            seek_position: 0,
        })
    }

    pub fn sector(&self) -> SectorNumber {
        self.sector
    }

    pub fn header(&self) -> &FileHeader {
        &self.hdr
    }

    pub fn length(&self) -> usize {
        self.hdr.file_length()
    }

    pub fn seek(&mut self, position: usize) {
        self.seek_position = position;
    }

    /// Reads from the seek position and advances it by the bytes read.
    pub fn read(&mut self, dev: &mut impl BlockStorage, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(dev, buf, self.seek_position)?;
        self.seek_position += n;
        Ok(n)
    }

    /// Writes at the seek position and advances it by the bytes written.
    pub fn write(&mut self, dev: &mut impl BlockStorage, buf: &[u8]) -> Result<usize> {
        let n = self.write_at(dev, buf, self.seek_position)?;
        self.seek_position += n;
        Ok(n)
    }

    /// Reads up to `buf.len()` bytes starting at `position`, stopping at the end
    /// of the file. Returns the number of bytes read.
    pub fn read_at(
        &self,
        dev: &mut impl BlockStorage,
        buf: &mut [u8],
        position: usize,
    ) -> Result<usize> {
        let len = self.clamp(buf.len(), position);
        let mut sector_buf = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < len {
            let offset = position + done;
            let in_sector = offset % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(len - done);

            let sector = self.hdr.byte_to_sector(dev, offset)?;
            dev.read_sector(sector, &mut sector_buf)?;
            buf[done..done + chunk].copy_from_slice(&sector_buf[in_sector..in_sector + chunk]);
            done += chunk;
        }
        Ok(len)
    }

    /// Writes up to `buf.len()` bytes starting at `position`, stopping at the end
    /// of the file. Partial sectors are read first so their other bytes survive.
    pub fn write_at(&self, dev: &mut impl BlockStorage, buf: &[u8], position: usize) -> Result<usize> {
        let len = self.clamp(buf.len(), position);
        let mut sector_buf = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < len {
            let offset = position + done;
            let in_sector = offset % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(len - done);

            let sector = self.hdr.byte_to_sector(dev, offset)?;
            if chunk < SECTOR_SIZE {
                dev.read_sector(sector, &mut sector_buf)?;
            }
            sector_buf[in_sector..in_sector + chunk].copy_from_slice(&buf[done..done + chunk]);
            dev.write_sector(sector, &sector_buf)?;
            done += chunk;
        }
        Ok(len)
    }

    fn clamp(&self, requested: usize, position: usize) -> usize {
        requested.min(self.length().saturating_sub(position))
    }
}

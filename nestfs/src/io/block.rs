/// The sector number to access ranging from 0 (the first sector) to n - 1 (the
/// last sector) where n is the number of sectors on the device.
pub type SectorNumber = usize;

/// A raw sector device. Every higher layer talks to the disk through this trait
/// and nothing else, one whole sector at a time.
pub trait BlockStorage {
    /// Total sectors available on the device.
    fn sector_count(&self) -> usize;
    /// Reads disk sector number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a sector out of range, or into a buffer shorter than a
    /// sector, will return an error.
    fn read_sector(&mut self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified sector number. Buffers longer
    /// than a sector are truncated.
    ///
    /// # Errors
    ///
    /// Attempting to write a sector out of range will return an error.
    fn write_sector(&mut self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}

use crate::error::Result;
use crate::io::{BlockStorage, SectorNumber};
use crate::open_file::OpenFile;
use zerocopy::AsBytes;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// The capability the index tree and directories allocate through. Ownership of
/// a sector is nothing more than its bit being set here.
pub trait SectorAllocator {
    fn mark(&mut self, sector: SectorNumber);
    fn clear(&mut self, sector: SectorNumber);
    fn test(&self, sector: SectorNumber) -> bool;
    /// Claims the lowest free sector.
    fn find_and_set(&mut self) -> Option<SectorNumber>;
    /// Sectors still available.
    fn num_clear(&self) -> usize;
}

/// Free-sector map, one bit per sector on the device. The map persists itself
/// as the content of an ordinary file whose header lives at a well-known sector.
#[derive(Clone, Debug, PartialEq)]
pub struct Bitmap {
    words: Vec<u64>,
    num_bits: usize,
}

impl Bitmap {
    pub fn new(num_bits: usize) -> Self {
        Self {
            words: vec![0; (num_bits + 63) / 64],
            num_bits,
        }
    }

    /// Bytes the map occupies as file content.
    pub fn file_size(num_bits: usize) -> usize {
        (num_bits + 7) / 8
    }

    pub fn len(&self) -> usize {
        self.num_bits
    }

    pub fn get(&self, sector: SectorNumber) -> State {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        // Grab the u64 containing the significant bit.
        let word = self.words[sector / 64];

        let inner_offset = sector % 64;
        match (word >> inner_offset) & 0b01 {
            0 => State::Free,
            1 => State::Used,
            _ => unreachable!("Sector state returned a non 0 or 1 value. This likely indicates an error with bitmasking"),
        }
    }

    /// Loads the map from its backing file.
    pub fn fetch_from(&mut self, dev: &mut impl BlockStorage, file: &OpenFile) -> Result<()> {
        let mut buf = vec![0u8; self.words.len() * 8];
        let size = Bitmap::file_size(self.num_bits);
        file.read_at(dev, &mut buf[..size], 0)?;
        for (word, bytes) in self.words.iter_mut().zip(buf.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            *word = u64::from_ne_bytes(raw);
        }
        Ok(())
    }

    /// Writes the map to its backing file.
    pub fn write_back(&self, dev: &mut impl BlockStorage, file: &OpenFile) -> Result<()> {
        let size = Bitmap::file_size(self.num_bits);
        file.write_at(dev, &self.words.as_slice().as_bytes()[..size], 0)?;
        Ok(())
    }
}

impl SectorAllocator for Bitmap {
    fn mark(&mut self, sector: SectorNumber) {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        self.words[sector / 64] |= 0b01_u64 << (sector % 64);
    }

    fn clear(&mut self, sector: SectorNumber) {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        self.words[sector / 64] &= !(0b01_u64 << (sector % 64));
    }

    fn test(&self, sector: SectorNumber) -> bool {
        self.get(sector) == State::Used
    }

    fn find_and_set(&mut self) -> Option<SectorNumber> {
        // Skip whole words that are already full, then take the first clear bit.
        let (i, word) = self
            .words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let sector = i * 64 + word.trailing_ones() as usize;
        if sector >= self.num_bits {
            return None;
        }
        self.mark(sector);
        Some(sector)
    }

    fn num_clear(&self) -> usize {
        // Padding bits past `num_bits` are never set, so they count as clear here.
        let padding = self.words.len() * 64 - self.num_bits;
        self.words.iter().map(|w| w.count_zeros() as usize).sum::<usize>() - padding
    }
}

//! File headers and the index tree beneath them.
//!
//! A header fills exactly one sector. At level 1 its slots name data sectors;
//! at level `L > 1` they name child headers of level `L - 1`, each covering
//! `capacity(L - 1)` bytes of the file. Only the last child of a node (the
//! rightmost subtree) may cover less than that.

use std::fmt;
use std::mem::size_of;

use log::{debug, trace};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::alloc::SectorAllocator;
use crate::config::{MAX_LEVEL, NUM_DIRECT, SECTOR_SIZE};
use crate::error::{FsError, Result};
use crate::io::{BlockStorage, SectorNumber};

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq, Eq)]
/// This structure __must be exactly one sector.__
pub struct FileHeader {
    /// Logical length of the bytes this node covers.
    num_bytes: u32,
    /// Sectors charged to the subtree below this node, data and index alike.
    num_sectors: u32,
    /// Depth of the tree rooted here, 1 meaning the slots are data sectors.
    level: u32,
    data_sectors: [u32; NUM_DIRECT],
}

const _: () = assert!(size_of::<FileHeader>() == SECTOR_SIZE);

/// Bytes addressable by a tree of the given depth. `capacity(0)` is one sector,
/// the span of a single level-1 slot.
pub fn capacity(level: u32) -> usize {
    NUM_DIRECT.pow(level) * SECTOR_SIZE
}

/// The shallowest level able to hold `file_size`, if any.
pub fn level_for(file_size: usize) -> Option<u32> {
    (1..=MAX_LEVEL).find(|&level| file_size <= capacity(level))
}

/// Slots a level-`level` node covering `total` bytes has in use.
pub fn slots_used(total: usize, level: u32) -> usize {
    let span = capacity(level - 1);
    (total + span - 1) / span
}

/// Bytes covered by slot `index` of a level-`level` node covering `total`
/// bytes. Every slot is full except the rightmost one in use, which gets the
/// remainder; slots past it cover nothing.
pub fn child_size(total: usize, level: u32, index: usize) -> usize {
    let span = capacity(level - 1);
    total.saturating_sub(index * span).min(span)
}

/// Sectors a level-`level` tree covering `size` bytes needs below its own
/// header: the data sectors plus one sector for every child index node.
pub fn sector_needs_by_level(level: u32, size: usize) -> usize {
    let used = slots_used(size, level);
    if level == 1 || used == 0 {
        return used;
    }
    let full_child = 1 + sector_needs_by_level(level - 1, capacity(level - 1));
    let last_child = 1 + sector_needs_by_level(level - 1, child_size(size, level, used - 1));
    (used - 1) * full_child + last_child
}

impl FileHeader {
    fn empty(level: u32) -> Self {
        let mut hdr = FileHeader::new_zeroed();
        hdr.level = level;
        hdr
    }

    /// Builds a header for a new file of `file_size` bytes, claiming every data
    /// and index sector it needs from `allocator` and writing the child index
    /// nodes to disk. The header itself is not written.
    ///
    /// Fails with `NoSpace` without touching the allocator when the size is
    /// beyond a level-4 tree or the allocator is short of sectors.
    pub fn allocate_multi_level(
        dev: &mut impl BlockStorage,
        allocator: &mut impl SectorAllocator,
        file_size: usize,
    ) -> Result<Self> {
        let level = level_for(file_size).ok_or(FsError::NoSpace)?;
        let needs = sector_needs_by_level(level, file_size);
        if allocator.num_clear() < needs {
            debug!(
                "{} bytes need {} sectors, only {} free",
                file_size,
                needs,
                allocator.num_clear()
            );
            return Err(FsError::NoSpace);
        }
        debug!(
            "allocating {} bytes at level {} using {} sectors",
            file_size, level, needs
        );

        let mut hdr = FileHeader::empty(level);
        hdr.allocate_subtree(dev, allocator, file_size)?;
        Ok(hdr)
    }

    fn allocate_subtree(
        &mut self,
        dev: &mut impl BlockStorage,
        allocator: &mut impl SectorAllocator,
        size: usize,
    ) -> Result<()> {
        let level = self.level;
        self.num_bytes = size as u32;
        self.num_sectors = sector_needs_by_level(level, size) as u32;

        for i in 0..slots_used(size, level) {
            let sector = allocator.find_and_set().ok_or(FsError::NoSpace)?;
            self.data_sectors[i] = sector as u32;
            if level > 1 {
                let mut child = FileHeader::empty(level - 1);
                child.allocate_subtree(dev, allocator, child_size(size, level, i))?;
                child.write_back(dev, sector)?;
                trace!("index node level {} at sector {}", level - 1, sector);
            }
        }
        Ok(())
    }

    /// Returns every sector below this header to `allocator`. The header's own
    /// sector is the caller's to clear.
    ///
    /// `is_right_most` says whether this node is the last of its parent's
    /// children. Any other node is full, so its share of the file is its whole
    /// capacity regardless of what it holds on disk.
    pub fn deallocate_multi_level(
        &self,
        dev: &mut impl BlockStorage,
        allocator: &mut impl SectorAllocator,
        is_right_most: bool,
    ) -> Result<()> {
        let level = self.level;
        let share = if is_right_most {
            self.num_bytes as usize
        } else {
            capacity(level)
        };
        let used = slots_used(share, level);

        for (i, &sector) in self.data_sectors[..used].iter().enumerate() {
            let sector = sector as SectorNumber;
            if level > 1 {
                let child = FileHeader::fetch_from(dev, sector)?;
                child.deallocate_multi_level(dev, allocator, is_right_most && i == used - 1)?;
            }
            allocator.clear(sector);
        }
        Ok(())
    }

    /// Translates a byte offset into the sector holding that byte.
    pub fn byte_to_sector(&self, dev: &mut impl BlockStorage, offset: usize) -> Result<SectorNumber> {
        if offset >= self.num_bytes as usize {
            return Err(FsError::InvalidArgument(format!(
                "offset {} past end of {} byte file",
                offset, self.num_bytes
            )));
        }
        let span = capacity(self.level - 1);
        let sector = self.data_sectors[offset / span] as SectorNumber;
        if self.level == 1 {
            return Ok(sector);
        }
        FileHeader::fetch_from(dev, sector)?.byte_to_sector(dev, offset % span)
    }

    pub fn fetch_from(dev: &mut impl BlockStorage, sector: SectorNumber) -> Result<Self> {
        let mut buf = [0u8; SECTOR_SIZE];
        dev.read_sector(sector, &mut buf)?;
        let hdr = FileHeader::read_from(&buf[..]).ok_or_else(|| {
            FsError::InvalidArgument(format!("sector {} does not hold a header", sector))
        })?;
        if hdr.level == 0 || hdr.level > MAX_LEVEL {
            return Err(FsError::InvalidArgument(format!(
                "sector {} holds a header of level {}",
                sector, hdr.level
            )));
        }
        Ok(hdr)
    }

    pub fn write_back(&self, dev: &mut impl BlockStorage, sector: SectorNumber) -> Result<()> {
        dev.write_sector(sector, self.as_bytes())?;
        Ok(())
    }

    pub fn file_length(&self) -> usize {
        self.num_bytes as usize
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors as usize
    }

    /// The top-level slots in use.
    pub fn data_sectors(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        self.data_sectors[..slots_used(self.num_bytes as usize, self.level)]
            .iter()
            .map(|&s| s as SectorNumber)
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "FileHeader: {} bytes, level {}, {} sectors",
            self.num_bytes, self.level, self.num_sectors
        )?;
        write!(f, "Slots:")?;
        for sector in self.data_sectors() {
            write!(f, " {}", sector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use std::collections::HashSet;

    fn create_test_device(sectors: usize) -> FileBlockEmulator {
        let dev = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(dev)
            .with_sector_count(sectors)
            .build()
            .expect("Could not initialize disk emulator.")
    }

    fn used_sectors(bmp: &Bitmap) -> HashSet<SectorNumber> {
        (0..bmp.len()).filter(|&s| bmp.test(s)).collect()
    }

    #[test]
    fn header_fills_one_sector() {
        assert_eq!(FileHeader::empty(1).as_bytes().len(), SECTOR_SIZE);
        assert_eq!(NUM_DIRECT, 29);
    }

    #[test]
    fn capacity_grows_by_num_direct_per_level() {
        assert_eq!(capacity(0), SECTOR_SIZE);
        assert_eq!(capacity(1), NUM_DIRECT * SECTOR_SIZE);
        for level in 1..=MAX_LEVEL {
            assert_eq!(capacity(level), capacity(level - 1) * NUM_DIRECT);
        }
    }

    #[test]
    fn level_is_smallest_that_fits() {
        assert_eq!(level_for(0), Some(1));
        assert_eq!(level_for(capacity(1)), Some(1));
        assert_eq!(level_for(capacity(1) + 1), Some(2));
        assert_eq!(level_for(capacity(3)), Some(3));
        assert_eq!(level_for(capacity(3) + 1), Some(4));
        assert_eq!(level_for(capacity(4)), Some(4));
        assert_eq!(level_for(capacity(4) + 1), None);
    }

    #[test]
    fn child_size_gives_remainder_to_rightmost_slot() {
        let total = 2 * capacity(1) + 100;
        assert_eq!(slots_used(total, 2), 3);
        assert_eq!(child_size(total, 2, 0), capacity(1));
        assert_eq!(child_size(total, 2, 1), capacity(1));
        assert_eq!(child_size(total, 2, 2), 100);
        assert_eq!(child_size(total, 2, 3), 0);
    }

    #[test]
    fn child_size_at_exact_capacity_boundary() {
        // An exactly full node has no partial child.
        let total = capacity(2);
        assert_eq!(slots_used(total, 2), NUM_DIRECT);
        assert_eq!(child_size(total, 2, NUM_DIRECT - 1), capacity(1));

        // One byte over a child boundary spills a single byte into the next slot.
        let total = capacity(1) + 1;
        assert_eq!(slots_used(total, 2), 2);
        assert_eq!(child_size(total, 2, 1), 1);

        // Level 1 slots are single sectors.
        assert_eq!(child_size(SECTOR_SIZE + 5, 1, 1), 5);
    }

    #[test]
    fn sector_needs_count_data_and_index_sectors() {
        assert_eq!(sector_needs_by_level(1, 0), 0);
        assert_eq!(sector_needs_by_level(1, 1), 1);
        assert_eq!(sector_needs_by_level(1, SECTOR_SIZE), 1);
        assert_eq!(sector_needs_by_level(1, SECTOR_SIZE + 1), 2);
        assert_eq!(sector_needs_by_level(1, capacity(1)), NUM_DIRECT);
        // One full child (1 + 29) and one child holding a single byte (1 + 1).
        assert_eq!(sector_needs_by_level(2, capacity(1) + 1), 32);
        // A full level-2 child of 870 sectors plus a one byte level-2 child of 3.
        assert_eq!(sector_needs_by_level(3, capacity(2) + 1), 874);
    }

    #[test]
    fn allocation_at_level_one_capacity_has_no_index_overhead() {
        let mut dev = create_test_device(64);
        let mut bmp = Bitmap::new(64);

        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, capacity(1)).unwrap();

        assert_eq!(hdr.level(), 1);
        assert_eq!(hdr.num_sectors(), NUM_DIRECT);
        assert_eq!(bmp.num_clear(), 64 - NUM_DIRECT);
    }

    #[test]
    fn one_byte_past_level_one_forces_level_two() {
        let mut dev = create_test_device(64);
        let mut bmp = Bitmap::new(64);

        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, capacity(1) + 1).unwrap();

        assert_eq!(hdr.level(), 2);
        assert_eq!(hdr.num_sectors(), 32);
        assert_eq!(bmp.num_clear(), 64 - 32);
        // Both top-level slots are index nodes one level down.
        for sector in hdr.data_sectors() {
            assert_eq!(FileHeader::fetch_from(&mut dev, sector).unwrap().level(), 1);
        }
    }

    #[test]
    fn empty_file_allocates_nothing() {
        let mut dev = create_test_device(8);
        let mut bmp = Bitmap::new(8);

        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, 0).unwrap();

        assert_eq!(hdr.level(), 1);
        assert_eq!(hdr.file_length(), 0);
        assert_eq!(hdr.data_sectors().count(), 0);
        assert_eq!(bmp.num_clear(), 8);
    }

    #[test]
    fn oversized_file_fails_without_touching_allocator() {
        let mut dev = create_test_device(8);
        let mut bmp = Bitmap::new(8);
        bmp.mark(3);
        let before = bmp.clone();

        let result = FileHeader::allocate_multi_level(&mut dev, &mut bmp, capacity(4) + 1);

        assert!(matches!(result, Err(FsError::NoSpace)));
        assert_eq!(bmp, before);
    }

    #[test]
    fn shortfall_fails_without_touching_allocator() {
        let mut dev = create_test_device(16);
        let mut bmp = Bitmap::new(16);
        let before = bmp.clone();

        let result = FileHeader::allocate_multi_level(&mut dev, &mut bmp, 17 * SECTOR_SIZE);

        assert!(matches!(result, Err(FsError::NoSpace)));
        assert_eq!(bmp, before);
    }

    #[test]
    fn write_back_then_fetch_reproduces_header() {
        let mut dev = create_test_device(64);
        let mut bmp = Bitmap::new(64);
        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, capacity(1) + 700).unwrap();

        hdr.write_back(&mut dev, 63).unwrap();
        let fetched = FileHeader::fetch_from(&mut dev, 63).unwrap();

        assert_eq!(fetched, hdr);
        assert_eq!(fetched.file_length(), capacity(1) + 700);
        assert_eq!(fetched.num_sectors(), hdr.num_sectors());
        assert_eq!(fetched.level(), 2);
    }

    #[test]
    fn fetching_a_zeroed_sector_is_an_error() {
        let mut dev = create_test_device(4);
        assert!(FileHeader::fetch_from(&mut dev, 2).is_err());
    }

    #[test]
    fn byte_to_sector_maps_every_block_to_a_distinct_allocated_sector() {
        let mut dev = create_test_device(128);
        let mut bmp = Bitmap::new(128);
        bmp.mark(0);
        let size = 2 * capacity(1) + 300;
        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, size).unwrap();
        let allocated = used_sectors(&bmp);

        let mut seen = HashSet::new();
        for offset in (0..size).step_by(SECTOR_SIZE) {
            let sector = hdr.byte_to_sector(&mut dev, offset).unwrap();
            assert!(allocated.contains(&sector));
            assert_ne!(sector, 0);
            assert!(seen.insert(sector), "sector {} mapped twice", sector);
            // Every byte of the block lands in the same sector.
            let last = (offset + SECTOR_SIZE - 1).min(size - 1);
            assert_eq!(hdr.byte_to_sector(&mut dev, last).unwrap(), sector);
        }
        assert_eq!(seen.len(), (size + SECTOR_SIZE - 1) / SECTOR_SIZE);
        // The rest of the allocation is index nodes.
        assert_eq!(allocated.len() - 1 - seen.len(), 3);
    }

    #[test]
    fn byte_to_sector_rejects_offsets_past_end() {
        let mut dev = create_test_device(8);
        let mut bmp = Bitmap::new(8);
        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, 10).unwrap();

        assert!(hdr.byte_to_sector(&mut dev, 9).is_ok());
        assert!(matches!(
            hdr.byte_to_sector(&mut dev, 10),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn deallocation_clears_exactly_what_allocation_marked() {
        let mut dev = create_test_device(128);
        let mut bmp = Bitmap::new(128);
        // Unrelated sectors that must survive.
        bmp.mark(0);
        bmp.mark(5);
        let before = bmp.clone();

        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, capacity(1) * 3 + 1).unwrap();
        assert_eq!(bmp.num_clear(), before.num_clear() - hdr.num_sectors());
        assert!(bmp.test(0) && bmp.test(5));

        hdr.deallocate_multi_level(&mut dev, &mut bmp, true).unwrap();
        assert_eq!(bmp, before);
    }

    #[test]
    fn level_three_tree_round_trips() {
        let mut dev = create_test_device(1024);
        let mut bmp = Bitmap::new(1024);
        let before = bmp.clone();
        let size = capacity(2) + 1;

        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, size).unwrap();
        assert_eq!(hdr.level(), 3);
        assert_eq!(hdr.num_sectors(), 874);
        assert_eq!(bmp.num_clear(), 1024 - 874);

        // The lone byte of the rightmost subtree resolves through two index nodes.
        let last = hdr.byte_to_sector(&mut dev, size - 1).unwrap();
        let first = hdr.byte_to_sector(&mut dev, 0).unwrap();
        assert!(bmp.test(last) && bmp.test(first));
        assert_ne!(first, last);

        hdr.deallocate_multi_level(&mut dev, &mut bmp, true).unwrap();
        assert_eq!(bmp, before);
    }

    #[test]
    fn level_four_tree_round_trips() {
        let sectors = 26 * 1024;
        let mut dev = create_test_device(sectors);
        let mut bmp = Bitmap::new(sectors);
        let before = bmp.clone();
        let size = capacity(3) + 2 * SECTOR_SIZE;

        let hdr = FileHeader::allocate_multi_level(&mut dev, &mut bmp, size).unwrap();
        assert_eq!(hdr.level(), 4);
        assert_eq!(hdr.num_sectors(), sector_needs_by_level(4, size));
        assert_eq!(bmp.num_clear(), sectors - hdr.num_sectors());

        let a = hdr.byte_to_sector(&mut dev, capacity(3)).unwrap();
        let b = hdr.byte_to_sector(&mut dev, size - 1).unwrap();
        assert_ne!(a, b);
        assert!(bmp.test(a) && bmp.test(b));

        hdr.deallocate_multi_level(&mut dev, &mut bmp, true).unwrap();
        assert_eq!(bmp, before);
    }
}

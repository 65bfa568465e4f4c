//! Sector allocator for the container's data region.
//!
//! The data region is a flat run of fixed-size sectors starting at
//! `start_index` in the backing file. Sector payloads are enciphered whole;
//! the allocator tracks which sector indices are free and which are in use.
//! `sector_count` is a high-water mark of sectors ever minted and never
//! decreases.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::trace;

use crate::cipher::BlockCipher;
use crate::config::SECTOR_SIZE;
use crate::error::{Error, Result};

/// Allocator over the sector data region.
///
/// Allocation and deallocation are pure in-memory operations; only
/// [`secure_write`](Self::secure_write) and [`secure_read`](Self::secure_read)
/// touch the backing stream. Allocated sectors stay in the free list until
/// the first write finalizes them as occupied.
#[derive(Debug)]
pub struct SectorAllocator {
    start_index: u64,
    sector_count: u32,
    free: Vec<u32>,
    occupied: Vec<u32>,
}

impl SectorAllocator {
    /// Create an empty allocator whose data region begins at `start_index`.
    pub fn new(start_index: u64) -> Self {
        Self::from_parts(start_index, 0, Vec::new(), Vec::new())
    }

    /// Rebuild an allocator from persisted state.
    pub fn from_parts(start_index: u64, sector_count: u32, free: Vec<u32>, occupied: Vec<u32>) -> Self {
        let mut alloc = Self {
            start_index,
            sector_count,
            free,
            occupied,
        };
        alloc.free.sort_unstable();
        alloc.occupied.sort_unstable();
        alloc
    }

    /// Byte offset in the backing file where the sector region begins.
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// High-water mark of sectors ever minted.
    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }

    /// Free sector indices, ascending.
    pub fn free(&self) -> &[u32] {
        &self.free
    }

    /// Occupied sector indices, ascending.
    pub fn occupied(&self) -> &[u32] {
        &self.occupied
    }

    /// Byte offset of a sector within the backing file.
    fn sector_offset(&self, sector: u32) -> u64 {
        self.start_index + u64::from(sector) * SECTOR_SIZE as u64
    }

    /// Allocate enough sectors to hold `length` bytes.
    pub fn allocate_bytes(&mut self, length: u64) -> Vec<u32> {
        let count = length.div_ceil(SECTOR_SIZE as u64) as usize;
        self.allocate_sectors(count)
    }

    /// Allocate exactly `count` sector indices.
    ///
    /// The free list is served ascending so low indices fill up first; any
    /// shortfall mints fresh indices starting at the current high-water mark.
    /// Returned sectors remain in the free list until a write finalizes them.
    pub fn allocate_sectors(&mut self, count: usize) -> Vec<u32> {
        self.free.sort_unstable();

        if self.free.len() < count {
            let shortfall = count - self.free.len();
            for i in 0..shortfall {
                self.free.push(self.sector_count + i as u32);
            }
            self.sector_count += shortfall as u32;
            trace!(shortfall, sector_count = self.sector_count, "minted sectors");
        }

        self.free[..count].to_vec()
    }

    /// Stream `length` bytes from `source` into `sectors`, one enciphered
    /// sector at a time, then move the whole set from free to occupied.
    ///
    /// The final piece may be short; the sector buffer is carried over
    /// between pieces, so the enciphered tail beyond the final piece holds
    /// whatever the previous piece left there.
    pub fn secure_write<S, R>(
        &mut self,
        stream: &mut S,
        source: &mut R,
        length: u64,
        sectors: &[u32],
        cipher: &dyn BlockCipher,
        key: &[u8],
    ) -> Result<()>
    where
        S: Write + Seek,
        R: Read,
    {
        let needed = length.div_ceil(SECTOR_SIZE as u64);
        if sectors.len() as u64 != needed {
            return Err(Error::SectorMismatch {
                needed,
                provided: sectors.len(),
            });
        }

        let mut buffer = [0u8; SECTOR_SIZE];
        let mut remaining = length;

        for &sector in sectors {
            let byte_count = (SECTOR_SIZE as u64).min(remaining) as usize;
            source.read_exact(&mut buffer[..byte_count])?;

            cipher.encrypt(&mut buffer, 0, key);

            stream.seek(SeekFrom::Start(self.sector_offset(sector)))?;
            stream.write_all(&buffer)?;

            remaining -= byte_count as u64;
        }

        remove_sectors(&mut self.free, sectors);
        add_sectors(&mut self.occupied, sectors);
        trace!(count = sectors.len(), length, "wrote sectors");

        Ok(())
    }

    /// Decipher `sectors` in order and copy exactly `length` bytes into
    /// `output`, discarding each sector's padding tail.
    pub fn secure_read<S, W>(
        &self,
        stream: &mut S,
        output: &mut W,
        length: u64,
        sectors: &[u32],
        cipher: &dyn BlockCipher,
        key: &[u8],
    ) -> Result<()>
    where
        S: Read + Seek,
        W: Write,
    {
        let mut buffer = [0u8; SECTOR_SIZE];
        let mut remaining = length;

        for &sector in sectors {
            if remaining == 0 {
                break;
            }

            let byte_count = (SECTOR_SIZE as u64).min(remaining) as usize;

            stream.seek(SeekFrom::Start(self.sector_offset(sector)))?;
            stream.read_exact(&mut buffer)?;

            cipher.decrypt(&mut buffer, 0, key);

            output.write_all(&buffer[..byte_count])?;
            remaining -= byte_count as u64;
        }

        Ok(())
    }

    /// Move `sectors` from occupied back to free.
    ///
    /// Succeeds only if every requested sector is currently occupied. On
    /// failure nothing is mutated.
    pub fn deallocate(&mut self, sectors: &[u32]) -> bool {
        let all_occupied = sectors
            .iter()
            .all(|s| self.occupied.binary_search(s).is_ok());

        if all_occupied {
            remove_sectors(&mut self.occupied, sectors);
            add_sectors(&mut self.free, sectors);
            trace!(count = sectors.len(), "deallocated sectors");
        }

        all_occupied
    }
}

fn add_sectors(list: &mut Vec<u32>, sectors: &[u32]) {
    list.extend_from_slice(sectors);
    list.sort_unstable();
}

fn remove_sectors(list: &mut Vec<u32>, sectors: &[u32]) {
    list.retain(|s| !sectors.contains(s));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesCipher;
    use std::io::Cursor;

    const KEY: &[u8] = b"sector test key";

    fn check_invariants(alloc: &SectorAllocator) {
        for s in alloc.free() {
            assert!(*s < alloc.sector_count());
            assert!(alloc.occupied().binary_search(s).is_err());
        }
        for s in alloc.occupied() {
            assert!(*s < alloc.sector_count());
        }
    }

    #[test]
    fn allocate_bytes_rounds_up() {
        let mut alloc = SectorAllocator::new(0);

        assert_eq!(alloc.allocate_bytes(0).len(), 0);
        assert_eq!(alloc.allocate_bytes(1).len(), 1);
        assert_eq!(alloc.allocate_bytes(SECTOR_SIZE as u64).len(), 1);
        assert_eq!(alloc.allocate_bytes(SECTOR_SIZE as u64 + 1).len(), 2);
    }

    #[test]
    fn allocation_mints_from_high_water_mark() {
        let mut alloc = SectorAllocator::new(0);

        let first = alloc.allocate_sectors(3);
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(alloc.sector_count(), 3);

        // Not yet written, so the same indices are handed out again.
        let second = alloc.allocate_sectors(2);
        assert_eq!(second, vec![0, 1]);
        assert_eq!(alloc.sector_count(), 3);
    }

    #[test]
    fn write_read_roundtrip_with_partial_final_sector() {
        let mut alloc = SectorAllocator::new(0);
        let cipher = AesCipher::new();
        let mut stream = Cursor::new(Vec::new());

        let data: Vec<u8> = (0..SECTOR_SIZE + 100).map(|i| (i % 251) as u8).collect();
        let sectors = alloc.allocate_bytes(data.len() as u64);
        assert_eq!(sectors.len(), 2);

        alloc
            .secure_write(
                &mut stream,
                &mut Cursor::new(&data),
                data.len() as u64,
                &sectors,
                &cipher,
                KEY,
            )
            .unwrap();

        assert_eq!(alloc.occupied(), &sectors[..]);
        assert!(alloc.free().is_empty());
        check_invariants(&alloc);

        let mut output = Vec::new();
        alloc
            .secure_read(&mut stream, &mut output, data.len() as u64, &sectors, &cipher, KEY)
            .unwrap();

        assert_eq!(output, data);
    }

    #[test]
    fn ciphertext_differs_from_plaintext_on_disk() {
        let mut alloc = SectorAllocator::new(0);
        let cipher = AesCipher::new();
        let mut stream = Cursor::new(Vec::new());

        let data = vec![7u8; SECTOR_SIZE];
        let sectors = alloc.allocate_bytes(data.len() as u64);
        alloc
            .secure_write(
                &mut stream,
                &mut Cursor::new(&data),
                data.len() as u64,
                &sectors,
                &cipher,
                KEY,
            )
            .unwrap();

        assert_ne!(&stream.get_ref()[..SECTOR_SIZE], &data[..]);
    }

    #[test]
    fn freed_sectors_are_reused_lowest_first() {
        let mut alloc = SectorAllocator::new(0);
        let cipher = AesCipher::new();
        let mut stream = Cursor::new(Vec::new());

        let data = vec![1u8; 3 * SECTOR_SIZE];
        let sectors = alloc.allocate_bytes(data.len() as u64);
        alloc
            .secure_write(
                &mut stream,
                &mut Cursor::new(&data),
                data.len() as u64,
                &sectors,
                &cipher,
                KEY,
            )
            .unwrap();

        assert!(alloc.deallocate(&sectors));
        check_invariants(&alloc);

        let again = alloc.allocate_sectors(3);
        assert_eq!(again, sectors);
        assert_eq!(alloc.sector_count(), 3);
    }

    #[test]
    fn mismatched_sector_list_is_an_error_not_a_panic() {
        let mut alloc = SectorAllocator::new(0);
        let cipher = AesCipher::new();
        let mut stream = Cursor::new(Vec::new());

        let data = vec![4u8; 2 * SECTOR_SIZE];
        let sectors = alloc.allocate_bytes(data.len() as u64);

        let result = alloc.secure_write(
            &mut stream,
            &mut Cursor::new(&data),
            data.len() as u64,
            &sectors[..1],
            &cipher,
            KEY,
        );
        assert!(matches!(
            result,
            Err(crate::error::Error::SectorMismatch { needed: 2, provided: 1 })
        ));

        // Nothing was written or finalized.
        assert!(stream.get_ref().is_empty());
        assert!(alloc.occupied().is_empty());
    }

    #[test]
    fn deallocate_unoccupied_is_a_no_op() {
        let mut alloc = SectorAllocator::new(0);
        let cipher = AesCipher::new();
        let mut stream = Cursor::new(Vec::new());

        let data = vec![2u8; SECTOR_SIZE];
        let sectors = alloc.allocate_bytes(data.len() as u64);
        alloc
            .secure_write(
                &mut stream,
                &mut Cursor::new(&data),
                data.len() as u64,
                &sectors,
                &cipher,
                KEY,
            )
            .unwrap();

        let free_before = alloc.free().to_vec();
        let occupied_before = alloc.occupied().to_vec();

        // Sector 9 was never written, so the whole request must fail.
        assert!(!alloc.deallocate(&[sectors[0], 9]));
        assert_eq!(alloc.free(), &free_before[..]);
        assert_eq!(alloc.occupied(), &occupied_before[..]);
    }

    #[test]
    fn region_offset_respects_start_index() {
        let mut alloc = SectorAllocator::new(56);
        let cipher = AesCipher::new();
        let mut stream = Cursor::new(Vec::new());

        let data = vec![3u8; 10];
        let sectors = alloc.allocate_bytes(data.len() as u64);
        alloc
            .secure_write(
                &mut stream,
                &mut Cursor::new(&data),
                data.len() as u64,
                &sectors,
                &cipher,
                KEY,
            )
            .unwrap();

        assert_eq!(stream.get_ref().len(), 56 + SECTOR_SIZE);
    }
}

//! Fixed-capacity wrap-around history of decoded codes for both channels.

use core::ops::{Add, Sub};
use std::ops::{AddAssign, SubAssign};

use crate::{Code, Error, Result};
use crate::config::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreGeometry {
    /// Words per raw block.
    pub block_len: usize,
    /// Blocks held before the oldest one is overwritten.
    pub blocks: usize,
}

impl Default for StoreGeometry {
    fn default() -> Self {
        StoreGeometry { block_len: 1024, blocks: 20 }
    }
}

impl StoreGeometry {
    pub fn capacity(&self) -> usize {
        self.block_len * self.blocks
    }
}

/// Logical position in a `CircularStore`. Offsetting a cursor in either direction by any amount
/// wraps modulo the store capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCursor {
    index: usize,
    bound: usize,
}

impl StoreCursor {
    pub fn new(bound: usize) -> StoreCursor {
        StoreCursor { index: 0, bound }
    }

    pub fn into_inner(self) -> usize {
        self.index
    }

    /// Offset by a signed distance.
    pub fn offset(self, distance: isize) -> StoreCursor {
        if distance < 0 {
            self - distance.unsigned_abs()
        } else {
            self + distance as usize
        }
    }
}

impl Add<usize> for StoreCursor {
    type Output = StoreCursor;

    fn add(self, offset: usize) -> Self::Output {
        StoreCursor { index: (self.index + offset % self.bound) % self.bound, bound: self.bound }
    }
}

impl AddAssign<usize> for StoreCursor {
    fn add_assign(&mut self, offset: usize) {
        *self = *self + offset
    }
}

impl Sub<usize> for StoreCursor {
    type Output = StoreCursor;

    fn sub(self, offset: usize) -> Self::Output {
        // `bound` need not be a power of two, so `wrapping_sub` cannot be used here
        StoreCursor {
            index: (self.index + self.bound - offset % self.bound) % self.bound,
            bound: self.bound
        }
    }
}

impl SubAssign<usize> for StoreCursor {
    fn sub_assign(&mut self, offset: usize) {
        *self = *self - offset
    }
}

#[derive(Debug)]
pub struct CircularStore {
    geometry: StoreGeometry,
    codes: [Box<[Code]>; 2],
    cursor: StoreCursor,
}

impl CircularStore {
    pub fn new(geometry: StoreGeometry) -> Result<CircularStore> {
        // a trigger compares each code with its predecessor, which must be in the store
        if geometry.block_len < 2 || geometry.blocks == 0 {
            return Err(Error::Geometry { block_len: geometry.block_len, blocks: geometry.blocks })
        }
        let capacity = geometry.capacity();
        log::trace!("allocated sample store of {} blocks x {} codes", geometry.blocks,
            geometry.block_len);
        Ok(CircularStore {
            geometry,
            codes: [vec![0; capacity].into_boxed_slice(), vec![0; capacity].into_boxed_slice()],
            cursor: StoreCursor::new(capacity),
        })
    }

    pub fn geometry(&self) -> StoreGeometry {
        self.geometry
    }

    pub fn capacity(&self) -> usize {
        self.geometry.capacity()
    }

    /// Position the next block will be written at.
    pub fn cursor(&self) -> StoreCursor {
        self.cursor
    }

    /// Let `writer` fill one block worth of codes for both channels at the write cursor, then
    /// advance past them. Returns the cursor of the first code written.
    ///
    /// Since the capacity is a whole number of blocks, a block is never split by wraparound.
    pub fn append<F>(&mut self, writer: F) -> StoreCursor
            where F: FnOnce(&mut [Code], &mut [Code]) {
        let start = self.cursor;
        let range = start.index..start.index + self.geometry.block_len;
        let [ch1, ch2] = &mut self.codes;
        writer(&mut ch1[range.clone()], &mut ch2[range]);
        self.cursor += self.geometry.block_len;
        start
    }

    pub fn read(&self, channel: Channel, cursor: StoreCursor) -> Code {
        assert!(cursor.bound == self.capacity());
        self.codes[channel.index()][cursor.index]
    }

    /// Read at a logical index; negative and overflowing indices wrap.
    pub fn read_at(&self, channel: Channel, index: isize) -> Code {
        let capacity = self.capacity() as isize;
        self.codes[channel.index()][index.rem_euclid(capacity) as usize]
    }

    pub fn read_pair(&self, cursor: StoreCursor) -> [Code; 2] {
        [self.read(Channel::Ch1, cursor), self.read(Channel::Ch2, cursor)]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_store_cursor() {
        let cursor = StoreCursor::new(128);
        assert_eq!((cursor + 10).index, 10);
        assert_eq!((cursor + 10 + 120).index, 2);
        assert_eq!((cursor + 130).index, 2);
        assert_eq!((cursor - 10).index, 118);
        assert_eq!((cursor - 130).index, 126);
        assert_eq!((cursor + 0), cursor);
        let mut cursor = cursor;
        cursor += 10;
        assert_eq!(cursor.index, 10);
        cursor -= 20;
        assert_eq!(cursor.index, 118);
    }

    #[test]
    fn test_store_cursor_not_power_of_two() {
        let cursor = StoreCursor::new(20480);
        assert_eq!((cursor - 1).index, 20479);
        assert_eq!((cursor - 20481).index, 20479);
        assert_eq!((cursor + usize::MAX).index, usize::MAX % 20480);
        assert_eq!(cursor.offset(-50).index, 20430);
        assert_eq!(cursor.offset(20500).index, 20);
    }

    #[test]
    fn test_geometry_rejected() {
        assert!(matches!(CircularStore::new(StoreGeometry { block_len: 1, blocks: 4 }),
            Err(Error::Geometry { .. })));
        assert!(matches!(CircularStore::new(StoreGeometry { block_len: 8, blocks: 0 }),
            Err(Error::Geometry { .. })));
    }

    #[test]
    fn test_append_and_wrap() {
        let mut store = CircularStore::new(StoreGeometry { block_len: 4, blocks: 3 }).unwrap();
        assert_eq!(store.capacity(), 12);
        for block in 0..4u16 {
            let start = store.append(|ch1, ch2| {
                for (i, (code1, code2)) in ch1.iter_mut().zip(ch2.iter_mut()).enumerate() {
                    *code1 = block * 10 + i as u16;
                    *code2 = 1000 + block * 10 + i as u16;
                }
            });
            assert_eq!(start.into_inner(), (block as usize * 4) % 12);
        }
        assert_eq!(store.cursor().into_inner(), 4);
        // the fourth block overwrote the first
        assert_eq!(store.read_at(Channel::Ch1, 0), 30);
        assert_eq!(store.read_at(Channel::Ch1, -1), 23);
        assert_eq!(store.read_at(Channel::Ch2, 12 + 5), 1011);
        assert_eq!(store.read_at(Channel::Ch1, -13), 23);
        assert_eq!(store.read_pair(store.cursor() - 1), [33, 1033]);
    }
}

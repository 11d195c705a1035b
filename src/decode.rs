//! Converts raw interleaved ADC words into per-channel offset-binary codes.
//!
//! Each raw word carries one two's complement 12-bit reading per channel. In the logical
//! (packed) layout, channel 1 occupies bits 0..=11 and channel 2 bits 12..=23, with bit 11 and
//! bit 23 as the sign bits. The decoded code is offset-binary: zero volts is `MID_CODE`.

use std::io::{self, Read};

use crate::{Code, Error, Result, MID_CODE};
use crate::store::{CircularStore, StoreCursor};

const FIELD_BITS: u32 = 12;
const MAGNITUDE_MASK: u32 = 0x7ff;
const SIGN_BIT: u32 = 0x800;
const CODE_MASK: u32 = 0xfff;
const PACKED_MASK: u32 = 0xff_ffff;

/// Word bit carrying each logical bit when the ADC outputs are wired to the parallel bus.
/// Bits 10, 20..=23 and 29..=31 of the bus word are not connected.
const EPI_PINS: [u8; 24] = [
     0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 11, 12, // channel 1
    13, 14, 15, 16, 17, 18, 19, 24, 25, 26, 27, 28, // channel 2
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordLayout {
    /// Channel fields are contiguous in the low 24 bits.
    #[default]
    Packed,
    /// Channel fields are scattered over the parallel bus pins.
    Epi,
}

impl WordLayout {
    /// Gather the 24 logical bits of `word`.
    pub fn pack(self, word: u32) -> u32 {
        match self {
            Self::Packed => word & PACKED_MASK,
            Self::Epi => EPI_PINS.iter().enumerate()
                .fold(0, |packed, (bit, &pin)| packed | ((word >> pin) & 1) << bit),
        }
    }

    /// Inverse of `pack`; unconnected bus bits are zero.
    pub fn unpack(self, packed: u32) -> u32 {
        match self {
            Self::Packed => packed & PACKED_MASK,
            Self::Epi => EPI_PINS.iter().enumerate()
                .fold(0, |word, (bit, &pin)| word | ((packed >> bit) & 1) << pin),
        }
    }
}

fn decode_field(field: u32) -> Code {
    let magnitude = field & MAGNITUDE_MASK;
    let code = if field & SIGN_BIT == 0 {
        MID_CODE as u32 + magnitude
    } else {
        // one's complement of the magnitude, then undo the two's complement offset
        let inverted = !magnitude & MAGNITUDE_MASK;
        MID_CODE as u32 - (1 + inverted)
    };
    (code & CODE_MASK) as Code
}

fn encode_field(code: Code) -> u32 {
    (code as u32 & CODE_MASK) ^ SIGN_BIT
}

/// Decode one raw word into the codes of channel 1 and channel 2.
pub fn decode_word(word: u32, layout: WordLayout) -> [Code; 2] {
    let packed = layout.pack(word);
    [decode_field(packed), decode_field(packed >> FIELD_BITS)]
}

/// Build the raw word that decodes to `codes`; used by synthetic sources.
pub fn encode_word(codes: [Code; 2], layout: WordLayout) -> u32 {
    layout.unpack(encode_field(codes[0]) | encode_field(codes[1]) << FIELD_BITS)
}

/// Decode a whole block into `store` at its write cursor, returning the cursor of the first
/// decoded sample.
pub fn decode_block(block: &RawBlock, layout: WordLayout, store: &mut CircularStore)
        -> Result<StoreCursor> {
    let expected = store.geometry().block_len;
    if block.len() != expected {
        return Err(Error::BlockLength { expected, actual: block.len() })
    }
    Ok(store.append(|ch1, ch2| {
        for ((&word, code1), code2) in block.words().iter().zip(ch1).zip(ch2) {
            [*code1, *code2] = decode_word(word, layout);
        }
    }))
}

/// One transfer worth of raw words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    words: Box<[u32]>,
}

impl RawBlock {
    pub fn new(words: Vec<u32>) -> RawBlock {
        RawBlock { words: words.into_boxed_slice() }
    }

    /// Read `len` little-endian words from `reader`.
    pub fn read_from<R: Read>(reader: &mut R, len: usize) -> io::Result<RawBlock> {
        let mut words = vec![0u32; len];
        reader.read_exact(bytemuck::cast_slice_mut(&mut words[..]))?;
        for word in words.iter_mut() {
            *word = u32::from_le(*word);
        }
        Ok(RawBlock::new(words))
    }

    pub fn from_codes<I>(codes: I, layout: WordLayout) -> RawBlock
            where I: IntoIterator<Item = [Code; 2]> {
        RawBlock::new(codes.into_iter().map(|pair| encode_word(pair, layout)).collect())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

impl From<Vec<u32>> for RawBlock {
    fn from(words: Vec<u32>) -> Self {
        RawBlock::new(words)
    }
}

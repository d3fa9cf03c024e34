//! Bit-level I/O for entropy-coded streams.
//!
//! Zstandard entropy streams are written forward, LSB-first, and terminated
//! by a single `1` marker bit; they are then read *backward*, starting from
//! the marker. [`BitWriter`] produces such streams into a caller-provided
//! slice, [`ReverseBitReader`] consumes them.
//!
//! # Example
//!
//! ```
//! use oxizstd_core::bitstream::{BitWriter, ReverseBitReader};
//!
//! let mut storage = [0u8; 16];
//! let mut writer = BitWriter::new(&mut storage);
//! writer.add_bits(0b101, 3);
//! writer.add_bits(0b1100, 4);
//! writer.flush_bits();
//! let size = writer.close().unwrap();
//!
//! // Read back in reverse order of writing.
//! let mut reader = ReverseBitReader::new(&storage[..size]).unwrap();
//! assert_eq!(reader.read_bits(4), 0b1100);
//! assert_eq!(reader.read_bits(3), 0b101);
//! assert!(reader.is_finished());
//! ```

use crate::error::{Result, ZstdError};

/// Mask with the low `nb_bits` set.
#[inline]
fn low_mask(nb_bits: u32) -> u64 {
    if nb_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << nb_bits) - 1
    }
}

/// LSB-first bit writer over a fixed destination slice.
///
/// The writer never panics on a full destination: it records the overflow
/// and [`BitWriter::close`] returns `None`, which callers treat as
/// "does not fit".
#[derive(Debug)]
pub struct BitWriter<'a> {
    dst: &'a mut [u8],
    pos: usize,
    container: u64,
    bit_pos: u32,
    overflow: bool,
}

impl<'a> BitWriter<'a> {
    /// Create a writer positioned at the start of `dst`.
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self {
            dst,
            pos: 0,
            container: 0,
            bit_pos: 0,
            overflow: false,
        }
    }

    /// Append the low `nb_bits` of `value`.
    ///
    /// At most 57 bits may be pending between two flushes.
    #[inline]
    pub fn add_bits(&mut self, value: u64, nb_bits: u32) {
        debug_assert!(nb_bits + self.bit_pos <= 64);
        if nb_bits == 0 {
            return;
        }
        self.container |= (value & low_mask(nb_bits)) << self.bit_pos;
        self.bit_pos += nb_bits;
    }

    /// Move all whole bytes of the container to the destination.
    #[inline]
    pub fn flush_bits(&mut self) {
        let nb_bytes = (self.bit_pos >> 3) as usize;
        if nb_bytes == 0 {
            return;
        }
        let bytes = self.container.to_le_bytes();
        if self.pos + nb_bytes <= self.dst.len() {
            self.dst[self.pos..self.pos + nb_bytes].copy_from_slice(&bytes[..nb_bytes]);
        } else {
            self.overflow = true;
        }
        self.pos += nb_bytes;
        self.container = if nb_bytes >= 8 {
            0
        } else {
            self.container >> (nb_bytes * 8)
        };
        self.bit_pos &= 7;
    }

    /// Bytes fully written so far.
    pub fn bytes_written(&self) -> usize {
        self.pos
    }

    /// Whether the destination ran out of space.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Write the end marker and the last partial byte.
    ///
    /// Returns the stream size, or `None` if the destination was too small.
    pub fn close(mut self) -> Option<usize> {
        self.add_bits(1, 1);
        self.flush_bits();
        if self.bit_pos > 0 {
            if self.pos < self.dst.len() {
                self.dst[self.pos] = self.container as u8;
            } else {
                self.overflow = true;
            }
            self.pos += 1;
        }
        if self.overflow { None } else { Some(self.pos) }
    }
}

/// Backward bit reader over a stream produced by [`BitWriter`].
///
/// Reading past the start of the stream yields zero bits; callers detect
/// that condition through [`ReverseBitReader::overflowed`].
#[derive(Debug, Clone)]
pub struct ReverseBitReader<'a> {
    src: &'a [u8],
    /// Number of unread bits, counted from the start of `src`.
    remaining: isize,
}

impl<'a> ReverseBitReader<'a> {
    /// Position the reader just below the end marker of `src`.
    pub fn new(src: &'a [u8]) -> Result<Self> {
        let last = match src.last() {
            Some(&b) => b,
            None => return Err(ZstdError::corrupted(0, "empty bitstream")),
        };
        if last == 0 {
            return Err(ZstdError::corrupted(
                src.len() as u64,
                "bitstream end marker missing",
            ));
        }
        let padding = last.leading_zeros() as isize + 1;
        Ok(Self {
            src,
            remaining: src.len() as isize * 8 - padding,
        })
    }

    fn load(&self, start: isize, nb_bits: u32) -> u64 {
        if nb_bits == 0 {
            return 0;
        }
        if start < 0 {
            let shortfall = (-start) as u32;
            if shortfall >= nb_bits {
                return 0;
            }
            return self.load(0, nb_bits - shortfall) << shortfall;
        }
        let byte = (start >> 3) as usize;
        let shift = (start & 7) as u32;
        let mut word = [0u8; 8];
        let end = (byte + 8).min(self.src.len());
        if byte < end {
            word[..end - byte].copy_from_slice(&self.src[byte..end]);
        }
        (u64::from_le_bytes(word) >> shift) & low_mask(nb_bits)
    }

    /// Read `nb_bits` (at most 56) from the top of the stream.
    #[inline]
    pub fn read_bits(&mut self, nb_bits: u32) -> u64 {
        let value = self.peek_bits(nb_bits);
        self.remaining -= nb_bits as isize;
        value
    }

    /// Look at the next `nb_bits` without consuming them.
    #[inline]
    pub fn peek_bits(&self, nb_bits: u32) -> u64 {
        debug_assert!(nb_bits <= 56);
        self.load(self.remaining - nb_bits as isize, nb_bits)
    }

    /// Number of bits not yet consumed (negative once overflowed).
    pub fn bits_remaining(&self) -> isize {
        self.remaining
    }

    /// All bits consumed exactly.
    pub fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    /// More bits were consumed than the stream holds.
    pub fn overflowed(&self) -> bool {
        self.remaining < 0
    }
}

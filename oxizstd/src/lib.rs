//! # OxiZstd
//!
//! Pure Rust implementation of a Zstandard (RFC 8878) compression engine.
//!
//! The engine follows the reference compressor's architecture: every
//! context draws its memory from a single arena [`workspace`], parameters
//! are resolved from a level table tuned to the expected input size, and
//! blocks are parsed by one of several match finders (fast, double-fast,
//! hash chain, rows of tags, binary trees) before entropy coding.
//!
//! ## Features
//!
//! - One-shot ([`compress`], [`CCtx::compress2`]) and streaming
//!   ([`StreamCompressor`]) compression with byte-identical output
//! - Digested dictionaries ([`CDict`]) attached by reference or copied,
//!   including a dedicated read-only search index
//! - Flat parameter surface ([`CParameter`]) with runtime-queryable bounds
//! - Externally produced sequences ([`CCtx::compress_sequences`],
//!   [`SequenceProducer`])
//! - A reference decoder ([`decompress`], [`ZstdDecoder`]) with dictionary,
//!   skippable-frame and checksum support
//!
//! ## Example
//!
//! ```rust
//! use oxizstd::{compress, decompress};
//!
//! let data = b"Hello, Zstandard! Hello, Zstandard! Hello, Zstandard!";
//! let compressed = compress(data, 3).unwrap();
//! let decompressed = decompress(&compressed).unwrap();
//! assert_eq!(decompressed, data);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod block;
mod bt;
mod cctx;
mod cdict;
mod checksum;
mod clevels;
mod dds;
mod double_fast;
mod fast;
mod frame;
mod fse;
mod hash;
mod hc;
mod huffman;
mod lazy;
mod literals;
mod match_state;
mod opt;
pub mod params;
mod producer;
mod row;
mod seq_store;
mod sequences;
mod stream;
mod window;
pub mod workspace;

pub use cctx::{CCtx, ResetDirective, estimate_cctx_size};
pub use cdict::{CDict, DICT_MAGIC, DictContentType, estimate_cdict_size};
pub use checksum::checksum;
pub use frame::{
    FRAME_HEADER_SIZE_MAX, FrameHeader, ZstdDecoder, decompress, decompress_with_dict,
    parse_frame_header, write_skippable_frame,
};
pub use oxizstd_core::{
    EndDirective, ErrorCode, InBuffer, OutBuffer, Result, StreamCompressor, ZstdError,
};
pub use params::{
    BufferMode, CCtxParams, CParameter, CompressionParameters, DictAttachPref, Format, FrameParameters,
    ParamSwitch, Strategy, adjust_cparams, get_cparams, max_clevel, min_clevel,
};
pub use producer::SequenceProducer;
pub use sequences::Sequence;

/// Zstandard frame magic number.
pub const ZSTD_MAGIC: u32 = 0xFD2F_B528;

/// First skippable frame magic number.
pub const SKIPPABLE_MAGIC_LOW: u32 = 0x184D_2A50;

/// Last skippable frame magic number.
pub const SKIPPABLE_MAGIC_HIGH: u32 = 0x184D_2A5F;

/// Magic number plus payload length.
pub const SKIPPABLE_HEADER_SIZE: usize = 8;

/// Largest uncompressed block (128 KiB).
pub const BLOCKSIZE_MAX: usize = 1 << 17;

/// Content size of a frame whose size was not announced.
pub const CONTENTSIZE_UNKNOWN: u64 = u64::MAX;

/// Block types in Zstandard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Raw uncompressed block.
    Raw,
    /// RLE block (single byte repeated).
    Rle,
    /// Compressed with literals and sequences.
    Compressed,
    /// Reserved (invalid).
    Reserved,
}

impl BlockType {
    /// Create block type from 2-bit value.
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits & 0x03 {
            0 => Ok(BlockType::Raw),
            1 => Ok(BlockType::Rle),
            2 => Ok(BlockType::Compressed),
            _ => Err(ZstdError::corrupted(0, "reserved block type")),
        }
    }

    /// 2-bit value written in block headers.
    pub fn bits(self) -> u8 {
        match self {
            BlockType::Raw => 0,
            BlockType::Rle => 1,
            BlockType::Compressed => 2,
            BlockType::Reserved => 3,
        }
    }
}

/// Literals section type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralsBlockType {
    /// Raw literals (uncompressed).
    Raw,
    /// RLE literals (single byte).
    Rle,
    /// Compressed with Huffman, tree included.
    Compressed,
    /// Compressed with Huffman, uses previous tree.
    Treeless,
}

impl LiteralsBlockType {
    /// Create from 2-bit value.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => LiteralsBlockType::Raw,
            1 => LiteralsBlockType::Rle,
            2 => LiteralsBlockType::Compressed,
            _ => LiteralsBlockType::Treeless,
        }
    }

    /// 2-bit value written in literals headers.
    pub fn bits(self) -> u8 {
        match self {
            LiteralsBlockType::Raw => 0,
            LiteralsBlockType::Rle => 1,
            LiteralsBlockType::Compressed => 2,
            LiteralsBlockType::Treeless => 3,
        }
    }
}

/// Largest frame a single-shot compression of `src_size` bytes can need.
pub const fn compress_bound(src_size: usize) -> usize {
    const LIMIT: usize = 128 << 10;
    let margin = if src_size < LIMIT {
        (LIMIT - src_size) >> 11
    } else {
        0
    };
    src_size + (src_size >> 8) + margin
}

/// Room to give a one-shot compression: the frame bound plus the worst
/// case of split blocks falling back to raw partitions.
pub(crate) const fn compress_capacity(src_size: usize) -> usize {
    let blocks = src_size / BLOCKSIZE_MAX + 1;
    compress_bound(src_size) + blocks * block::BLOCK_HEADER_SIZE * block::MAX_NB_BLOCK_SPLITS
}

/// Compress `src` into a new frame at `level`.
pub fn compress(src: &[u8], level: i32) -> Result<Vec<u8>> {
    let mut cctx = CCtx::with_level(level);
    let mut dst = vec![0u8; compress_capacity(src.len())];
    let written = cctx.compress2(&mut dst, src)?;
    dst.truncate(written);
    Ok(dst)
}

/// Compress `src` at `level`, referencing `dict` (raw content or a
/// dictionary in the Zstandard format).
pub fn compress_with_dict(src: &[u8], dict: &[u8], level: i32) -> Result<Vec<u8>> {
    let mut cctx = CCtx::with_level(level);
    cctx.load_dictionary(dict)?;
    let mut dst = vec![0u8; compress_capacity(src.len())];
    let written = cctx.compress2(&mut dst, src)?;
    dst.truncate(written);
    Ok(dst)
}

//! Literals section of a compressed block.
//!
//! Literals are stored raw, as a single repeated byte (RLE), or
//! Huffman-compressed with a fresh table or the previous block's table
//! ("treeless").

use oxizstd_core::{Result, ZstdError};

use crate::fse;
use crate::huffman::{self, HufCTable, HufDTable, HufRepeat};
use crate::params::Strategy;
use crate::LiteralsBlockType;

/// Fewest literals worth splitting into four streams.
pub const MIN_LITERALS_FOR_4_STREAMS: usize = 6;

/// Huffman state carried between blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HufEntropy {
    /// Table of the last block that used one.
    pub table: HufCTable,
    /// Whether `table` may be reused.
    pub repeat: HufRepeat,
}

/// Bytes a compressed representation must save to be kept.
#[inline]
pub fn min_gain(src_size: usize, strategy: Strategy) -> usize {
    let min_log = if strategy >= Strategy::BtUltra {
        strategy as u32 - 1
    } else {
        6
    };
    (src_size >> min_log) + 2
}

fn min_literals_to_compress(strategy: Strategy, repeat: HufRepeat) -> usize {
    let shift = (9 - strategy as i32).min(3);
    if repeat == HufRepeat::Valid {
        6
    } else {
        8usize << shift
    }
}

/// Store literals uncompressed. Returns the section size.
pub fn no_compress_literals(dst: &mut [u8], src: &[u8]) -> Result<usize> {
    let fl_size = 1 + (src.len() > 31) as usize + (src.len() > 4095) as usize;
    if dst.len() < fl_size + src.len() {
        return Err(ZstdError::dst_size_too_small(fl_size + src.len(), dst.len()));
    }
    write_raw_header(dst, LiteralsBlockType::Raw, src.len(), fl_size);
    dst[fl_size..fl_size + src.len()].copy_from_slice(src);
    Ok(fl_size + src.len())
}

/// Store literals as one repeated byte. Returns the section size.
pub fn compress_rle_literals(dst: &mut [u8], src: &[u8]) -> Result<usize> {
    let fl_size = 1 + (src.len() > 31) as usize + (src.len() > 4095) as usize;
    if dst.len() < fl_size + 1 {
        return Err(ZstdError::dst_size_too_small(fl_size + 1, dst.len()));
    }
    write_raw_header(dst, LiteralsBlockType::Rle, src.len(), fl_size);
    dst[fl_size] = src[0];
    Ok(fl_size + 1)
}

fn write_raw_header(dst: &mut [u8], ty: LiteralsBlockType, size: usize, fl_size: usize) {
    let ty = ty.bits() as u32;
    let size = size as u32;
    match fl_size {
        1 => dst[0] = (ty + (size << 3)) as u8,
        2 => dst[..2].copy_from_slice(&((ty + (1 << 2) + (size << 4)) as u16).to_le_bytes()),
        _ => dst[..3].copy_from_slice(&(ty + (3 << 2) + (size << 4)).to_le_bytes()[..3]),
    }
}

/// Huffman-compress `src` into `dst`, reusing `table` when worthwhile.
///
/// On entry `table` holds the previous table. Returns 0 when not
/// compressible, 1 when `src` is a single repeated byte.
fn huf_compress(
    dst: &mut [u8],
    src: &[u8],
    single_stream: bool,
    table: &mut HufCTable,
    repeat: &mut HufRepeat,
    prefer_repeat: bool,
) -> usize {
    let compress_with = |dst: &mut [u8], table: &HufCTable, header: usize| -> usize {
        let payload = if single_stream {
            table.compress_1x(&mut dst[header..], src)
        } else {
            table.compress_4x(&mut dst[header..], src)
        };
        match payload {
            Some(size) if header + size < src.len().saturating_sub(1) => header + size,
            _ => 0,
        }
    };

    if src.is_empty() || dst.is_empty() {
        return 0;
    }
    if prefer_repeat && *repeat == HufRepeat::Valid {
        return compress_with(dst, &*table, 0);
    }
    let mut count = [0u32; 256];
    let (max_symbol, largest) = fse::hist_count(&mut count, src);
    if largest as usize == src.len() {
        dst[0] = src[0];
        return 1;
    }
    if largest as usize <= (src.len() >> 7) + 4 {
        return 0;
    }
    if *repeat == HufRepeat::Check && !table.validate(&count, max_symbol) {
        *repeat = HufRepeat::None;
    }
    if prefer_repeat && *repeat != HufRepeat::None {
        return compress_with(dst, &*table, 0);
    }

    let mut fresh = HufCTable::default();
    let huff_log = huffman::optimal_table_log(huffman::TABLELOG_DEFAULT, src.len(), max_symbol);
    fresh.build(&count, max_symbol, huff_log);
    let Ok(h_size) = fresh.write(dst) else {
        return 0;
    };

    if *repeat != HufRepeat::None {
        let old_size = table.estimate_compressed_size(&count, max_symbol);
        let new_size = fresh.estimate_compressed_size(&count, max_symbol);
        if old_size <= h_size + new_size || h_size + 12 >= src.len() {
            return compress_with(dst, &*table, 0);
        }
    }
    if h_size + 12 >= src.len() {
        return 0;
    }
    *repeat = HufRepeat::None;
    *table = fresh;
    compress_with(dst, &*table, h_size)
}

/// Compress the literals of a block. Returns the section size.
///
/// `next` receives the table to carry to the following block.
pub fn compress_literals(
    dst: &mut [u8],
    src: &[u8],
    prev: &HufEntropy,
    next: &mut HufEntropy,
    strategy: Strategy,
    disable_compression: bool,
) -> Result<usize> {
    let lh_size = 3 + (src.len() >= 1024) as usize + (src.len() >= 16 * 1024) as usize;
    let mut single_stream = src.len() < 256;
    next.clone_from(prev);

    if disable_compression || src.len() < min_literals_to_compress(strategy, prev.repeat) {
        return no_compress_literals(dst, src);
    }
    if dst.len() < lh_size + 1 {
        return Err(ZstdError::dst_size_too_small(lh_size + 1, dst.len()));
    }

    let mut repeat = prev.repeat;
    let prefer_repeat = strategy < Strategy::Lazy && src.len() <= 1024;
    if repeat == HufRepeat::Valid && lh_size == 3 {
        single_stream = true;
    }
    let c_lit_size = huf_compress(
        &mut dst[lh_size..],
        src,
        single_stream,
        &mut next.table,
        &mut repeat,
        prefer_repeat,
    );
    let ty = if repeat != HufRepeat::None {
        LiteralsBlockType::Treeless
    } else {
        LiteralsBlockType::Compressed
    };

    if c_lit_size == 0 || c_lit_size >= src.len() - min_gain(src.len(), strategy) {
        next.clone_from(prev);
        return no_compress_literals(dst, src);
    }
    if c_lit_size == 1 && (src.len() >= 8 || src.iter().all(|&b| b == src[0])) {
        next.clone_from(prev);
        return compress_rle_literals(dst, src);
    }
    if ty == LiteralsBlockType::Compressed {
        next.repeat = HufRepeat::Check;
    }

    let ty_bits = ty.bits() as u32;
    let size = src.len() as u32;
    let c_size = c_lit_size as u32;
    match lh_size {
        3 => {
            debug_assert!(single_stream || src.len() >= MIN_LITERALS_FOR_4_STREAMS);
            let lhc = ty_bits + ((!single_stream as u32) << 2) + (size << 4) + (c_size << 14);
            dst[..3].copy_from_slice(&lhc.to_le_bytes()[..3]);
        }
        4 => {
            let lhc = ty_bits + (2 << 2) + (size << 4) + (c_size << 18);
            dst[..4].copy_from_slice(&lhc.to_le_bytes());
        }
        _ => {
            let lhc = ty_bits + (3 << 2) + (size << 4) + (c_size << 22);
            dst[..4].copy_from_slice(&lhc.to_le_bytes());
            dst[4] = (c_lit_size >> 10) as u8;
        }
    }
    Ok(lh_size + c_lit_size)
}

/// Estimated literals section size for `src`, header included, from its
/// histogram alone. Picks the cheapest of raw, RLE, the previous table and
/// a fresh table with its description.
pub fn estimate_literals_size(src: &[u8], prev: &HufEntropy, disable_compression: bool) -> usize {
    let fl_size = 1 + (src.len() > 31) as usize + (src.len() > 4095) as usize;
    let raw = fl_size + src.len();
    if disable_compression || src.is_empty() {
        return raw;
    }
    let mut count = [0u32; 256];
    let (max_symbol, largest) = fse::hist_count(&mut count, src);
    if largest as usize == src.len() {
        return fl_size + 1;
    }
    if largest as usize <= (src.len() >> 7) + 4 {
        return raw;
    }
    let lh_size = 3 + (src.len() >= 1024) as usize + (src.len() >= 16 * 1024) as usize;
    // Four streams carry a jump table.
    let jump_table = if src.len() < 256 { 0 } else { 6 };
    let mut best = raw;
    if prev.repeat != HufRepeat::None && prev.table.validate(&count, max_symbol) {
        best = best.min(lh_size + jump_table + prev.table.estimate_compressed_size(&count, max_symbol));
    }
    let mut fresh = HufCTable::default();
    let huff_log = huffman::optimal_table_log(huffman::TABLELOG_DEFAULT, src.len(), max_symbol);
    fresh.build(&count, max_symbol, huff_log);
    let mut description = [0u8; 256];
    if let Ok(h_size) = fresh.write(&mut description) {
        best = best.min(lh_size + jump_table + h_size + fresh.estimate_compressed_size(&count, max_symbol));
    }
    best
}

/// Parsed literals section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralsHeader {
    /// Representation.
    pub block_type: LiteralsBlockType,
    /// Number of literals.
    pub regenerated_size: usize,
    /// Payload size (1 for RLE).
    pub compressed_size: usize,
    /// Number of Huffman streams.
    pub num_streams: usize,
    /// Header size.
    pub header_size: usize,
}

/// Parse a literals section header.
pub fn parse_literals_header(src: &[u8]) -> Result<LiteralsHeader> {
    let read = |n: usize| -> Result<u64> {
        if src.len() < n {
            return Err(ZstdError::corrupted(0, "literals: truncated header"));
        }
        let mut b = [0u8; 8];
        b[..n].copy_from_slice(&src[..n]);
        Ok(u64::from_le_bytes(b))
    };
    let b0 = read(1)? as u8;
    let block_type = LiteralsBlockType::from_bits(b0);
    let size_format = (b0 >> 2) & 3;
    match block_type {
        LiteralsBlockType::Raw | LiteralsBlockType::Rle => {
            let (header_size, regenerated_size) = match size_format {
                0 | 2 => (1, (b0 >> 3) as usize),
                1 => (2, (read(2)? >> 4) as usize),
                _ => (3, (read(3)? >> 4) as usize),
            };
            let compressed_size = if block_type == LiteralsBlockType::Rle {
                1
            } else {
                regenerated_size
            };
            Ok(LiteralsHeader {
                block_type,
                regenerated_size,
                compressed_size,
                num_streams: 1,
                header_size,
            })
        }
        LiteralsBlockType::Compressed | LiteralsBlockType::Treeless => {
            let (header_size, bits, num_streams) = match size_format {
                0 => (3, 10, 1),
                1 => (3, 10, 4),
                2 => (4, 14, 4),
                _ => (5, 18, 4),
            };
            let lhc = read(header_size)?;
            let mask = (1u64 << bits) - 1;
            Ok(LiteralsHeader {
                block_type,
                regenerated_size: ((lhc >> 4) & mask) as usize,
                compressed_size: ((lhc >> (4 + bits)) & mask) as usize,
                num_streams,
                header_size,
            })
        }
    }
}

/// Decode a literals section into `out`. Returns bytes consumed.
///
/// `table` holds the Huffman table of previous blocks and is replaced
/// when the section carries a new one.
pub fn decode_literals(src: &[u8], table: &mut HufDTable, out: &mut Vec<u8>) -> Result<usize> {
    let header = parse_literals_header(src)?;
    let start = header.header_size;
    let end = start + header.compressed_size;
    if end > src.len() {
        return Err(ZstdError::corrupted(start as u64, "literals: truncated payload"));
    }
    if header.regenerated_size > huffman::BLOCKSIZE_MAX {
        return Err(ZstdError::corrupted(0, "literals: section too large"));
    }
    out.clear();
    match header.block_type {
        LiteralsBlockType::Raw => out.extend_from_slice(&src[start..end]),
        LiteralsBlockType::Rle => out.resize(header.regenerated_size, src[start]),
        LiteralsBlockType::Compressed | LiteralsBlockType::Treeless => {
            let mut ip = start;
            if header.block_type == LiteralsBlockType::Compressed {
                let (fresh, size) = HufDTable::read(&src[start..end])?;
                *table = fresh;
                ip += size;
            } else if !table.is_loaded() {
                return Err(ZstdError::corrupted(0, "literals: treeless without table"));
            }
            out.resize(header.regenerated_size, 0);
            if header.num_streams == 1 {
                table.decompress_1x(&src[ip..end], out)?;
            } else {
                table.decompress_4x(&src[ip..end], out)?;
            }
        }
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(section: &[u8], table: &mut HufDTable) -> Vec<u8> {
        let mut out = Vec::new();
        let used = decode_literals(section, table, &mut out).unwrap();
        assert_eq!(used, section.len());
        out
    }

    #[test]
    fn test_raw_headers_all_sizes() {
        for len in [0usize, 31, 32, 4095, 4096, 70_000] {
            let src = vec![0x5Au8; len];
            let mut dst = vec![0u8; len + 8];
            let size = no_compress_literals(&mut dst, &src).unwrap();
            let header = parse_literals_header(&dst).unwrap();
            assert_eq!(header.regenerated_size, len);
            assert_eq!(size, header.header_size + len);
        }
    }

    #[test]
    fn test_compressed_then_treeless() {
        let text = b"literal bytes from an english-like source with repeated words repeated often. "
            .repeat(30);
        let mut dst = vec![0u8; text.len() + 64];
        let prev = HufEntropy::default();
        let mut next = HufEntropy::default();
        let size = compress_literals(&mut dst, &text, &prev, &mut next, Strategy::Lazy2, false).unwrap();
        assert!(size < text.len());
        assert_eq!(next.repeat, HufRepeat::Check);
        let mut table = HufDTable::default();
        assert_eq!(decode(&dst[..size], &mut table), text);

        // Same statistics: the previous table is reused.
        let prev = next.clone();
        let mut next2 = HufEntropy::default();
        let size = compress_literals(&mut dst, &text, &prev, &mut next2, Strategy::Lazy2, false).unwrap();
        assert_eq!(parse_literals_header(&dst).unwrap().block_type, LiteralsBlockType::Treeless);
        assert_eq!(decode(&dst[..size], &mut table), text);
    }

    #[test]
    fn test_uniform_literals_become_rle() {
        let src = vec![9u8; 500];
        let mut dst = vec![0u8; 600];
        let mut next = HufEntropy::default();
        let size =
            compress_literals(&mut dst, &src, &HufEntropy::default(), &mut next, Strategy::DFast, false).unwrap();
        assert_eq!(size, 3);
        let mut table = HufDTable::default();
        assert_eq!(decode(&dst[..size], &mut table), src);
    }

    #[test]
    fn test_disabled_compression_is_raw() {
        let src = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbb".repeat(10);
        let mut dst = vec![0u8; src.len() + 8];
        let mut next = HufEntropy::default();
        compress_literals(&mut dst, &src, &HufEntropy::default(), &mut next, Strategy::Fast, true).unwrap();
        assert_eq!(parse_literals_header(&dst).unwrap().block_type, LiteralsBlockType::Raw);
    }

    #[test]
    fn test_min_gain() {
        assert_eq!(min_gain(1 << 16, Strategy::Fast), (1 << 10) + 2);
        assert_eq!(min_gain(1 << 16, Strategy::BtUltra2), (1 << 8) + 2);
    }
}

//! Huffman coding for Zstandard literals.
//!
//! Codes are canonical and at most [`TABLELOG_MAX`] bits long. The table is
//! transmitted as a list of *weights* (`weight = max_bits + 1 - nb_bits`),
//! either packed as 4-bit nibbles or FSE-compressed; the weight of the last
//! symbol is implied by the others.

use oxizstd_core::{BitWriter, ReverseBitReader, Result, ZstdError};

use crate::fse::{self, FseCTable, FseDTable};
use crate::hash::highbit32;

/// Longest code the decoder accepts.
pub const TABLELOG_MAX: u32 = 12;
/// Default longest code produced by the encoder.
pub const TABLELOG_DEFAULT: u32 = 11;
/// Largest input of a single Huffman-compressed literals section.
pub const BLOCKSIZE_MAX: usize = 128 * 1024;

const MAX_FSE_TABLELOG_FOR_HUFF_HEADER: u32 = 6;

/// Reuse state of a Huffman table carried between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HufRepeat {
    /// No previous table.
    #[default]
    None,
    /// A previous table exists but may not cover every symbol.
    Check,
    /// The previous table is known to cover every symbol.
    Valid,
}

/// One code: value and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Code {
    value: u16,
    nb_bits: u8,
}

/// Huffman compression table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HufCTable {
    max_symbol: u32,
    table_log: u32,
    codes: [Code; 256],
}

impl Default for HufCTable {
    fn default() -> Self {
        Self {
            max_symbol: 0,
            table_log: 0,
            codes: [Code::default(); 256],
        }
    }
}

/// Length-limited code lengths through package-merge.
///
/// `count` must contain at least two non-zero entries.
fn limited_code_lengths(count: &[u32], max_symbol: u32, max_bits: u32, lengths: &mut [u8; 256]) {
    #[derive(Clone, Copy)]
    struct Node {
        weight: u64,
        leaf: Option<u8>,
        left: usize,
        right: usize,
    }

    lengths.fill(0);
    let mut leaves: Vec<(u64, u8)> = count[..=max_symbol as usize]
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c > 0)
        .map(|(s, &c)| (c as u64, s as u8))
        .collect();
    leaves.sort_unstable();
    let n = leaves.len();
    if n < 2 {
        if let Some(&(_, s)) = leaves.first() {
            lengths[s as usize] = 1;
        }
        return;
    }

    let mut nodes: Vec<Node> = leaves
        .iter()
        .map(|&(weight, s)| Node {
            weight,
            leaf: Some(s),
            left: 0,
            right: 0,
        })
        .collect();
    let leaf_ids: Vec<usize> = (0..n).collect();
    let mut list = leaf_ids.clone();

    for _ in 1..max_bits {
        let mut packages = Vec::with_capacity(list.len() / 2);
        for pair in list.chunks_exact(2) {
            nodes.push(Node {
                weight: nodes[pair[0]].weight + nodes[pair[1]].weight,
                leaf: None,
                left: pair[0],
                right: pair[1],
            });
            packages.push(nodes.len() - 1);
        }
        let mut merged = Vec::with_capacity(n + packages.len());
        let (mut i, mut j) = (0, 0);
        while i < n || j < packages.len() {
            let take_leaf = j == packages.len()
                || (i < n && nodes[leaf_ids[i]].weight <= nodes[packages[j]].weight);
            if take_leaf {
                merged.push(leaf_ids[i]);
                i += 1;
            } else {
                merged.push(packages[j]);
                j += 1;
            }
        }
        list = merged;
    }

    let mut stack: Vec<usize> = list[..2 * n - 2].to_vec();
    while let Some(id) = stack.pop() {
        let node = nodes[id];
        match node.leaf {
            Some(s) => lengths[s as usize] += 1,
            None => {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }
}

/// Table log for `src_size` literals.
pub fn optimal_table_log(max_table_log: u32, src_size: usize, max_symbol: u32) -> u32 {
    fse::optimal_table_log_internal(max_table_log, src_size, max_symbol, 1)
}

impl HufCTable {
    /// Largest encodable symbol.
    pub fn max_symbol(&self) -> u32 {
        self.max_symbol
    }

    /// Code length of `symbol`, 0 if the table cannot encode it.
    #[inline]
    pub fn nb_bits(&self, symbol: u8) -> u32 {
        self.codes[symbol as usize].nb_bits as u32
    }

    /// Build a table for `count` with codes of at most `max_bits`.
    /// Returns the longest code actually used.
    pub fn build(&mut self, count: &[u32], max_symbol: u32, max_bits: u32) -> u32 {
        let mut lengths = [0u8; 256];
        limited_code_lengths(count, max_symbol, max_bits, &mut lengths);
        let used_bits = lengths.iter().copied().max().unwrap_or(0) as u32;
        self.assign_codes(&lengths, max_symbol, used_bits);
        used_bits
    }

    /// Parse a serialized table, as stored in a dictionary. Returns the
    /// table, whether some symbol below the largest one has no code, and
    /// the bytes consumed.
    pub fn read(src: &[u8]) -> Result<(Self, bool, usize)> {
        let (mut weights, nb_weights, consumed) = read_weights(src)?;
        let table_log = complete_weights(&mut weights, nb_weights)?;
        let max_symbol = nb_weights as u32;
        let mut lengths = [0u8; 256];
        let mut has_zero_weights = false;
        for (l, &w) in lengths.iter_mut().zip(weights.iter()).take(nb_weights + 1) {
            if w > 0 {
                *l = (table_log + 1 - w as u32) as u8;
            } else {
                has_zero_weights = true;
            }
        }
        let mut table = Self::default();
        table.assign_codes(&lengths, max_symbol, table_log);
        Ok((table, has_zero_weights, consumed))
    }

    /// Canonical code values for the given lengths.
    fn assign_codes(&mut self, lengths: &[u8; 256], max_symbol: u32, table_log: u32) {
        let mut nb_per_rank = [0u16; TABLELOG_MAX as usize + 2];
        for &l in &lengths[..=max_symbol as usize] {
            nb_per_rank[l as usize] += 1;
        }
        let mut val_per_rank = [0u16; TABLELOG_MAX as usize + 2];
        let mut min = 0u16;
        for n in (1..=table_log as usize).rev() {
            val_per_rank[n] = min;
            min += nb_per_rank[n];
            min >>= 1;
        }
        self.codes = [Code::default(); 256];
        for s in 0..=max_symbol as usize {
            let l = lengths[s];
            if l > 0 {
                self.codes[s] = Code {
                    value: val_per_rank[l as usize],
                    nb_bits: l,
                };
                val_per_rank[l as usize] += 1;
            }
        }
        self.max_symbol = max_symbol;
        self.table_log = table_log;
    }

    /// Estimated compressed size of `count` in bytes.
    pub fn estimate_compressed_size(&self, count: &[u32], max_symbol: u32) -> usize {
        let bits: usize = count[..=max_symbol as usize]
            .iter()
            .zip(self.codes.iter())
            .map(|(&c, code)| c as usize * code.nb_bits as usize)
            .sum();
        bits >> 3
    }

    /// Whether every symbol present in `count` has a code.
    pub fn validate(&self, count: &[u32], max_symbol: u32) -> bool {
        if self.max_symbol < max_symbol {
            return false;
        }
        count[..=max_symbol as usize]
            .iter()
            .zip(self.codes.iter())
            .all(|(&c, code)| c == 0 || code.nb_bits != 0)
    }

    /// Serialize the table description. Returns its size.
    pub fn write(&self, dst: &mut [u8]) -> Result<usize> {
        let max_symbol = self.max_symbol as usize;
        let mut weights = [0u8; 256];
        for (w, code) in weights.iter_mut().zip(self.codes.iter()).take(max_symbol) {
            if code.nb_bits > 0 {
                *w = (self.table_log + 1 - code.nb_bits as u32) as u8;
            }
        }
        if dst.is_empty() {
            return Err(ZstdError::dst_size_too_small(1, 0));
        }
        let h_size = compress_weights(&mut dst[1..], &weights[..max_symbol]);
        if h_size > 1 && h_size < max_symbol / 2 {
            dst[0] = h_size as u8;
            return Ok(h_size + 1);
        }
        if max_symbol > 128 {
            return Err(ZstdError::generic("huffman: too many symbols for raw weights"));
        }
        let size = max_symbol.div_ceil(2) + 1;
        if dst.len() < size {
            return Err(ZstdError::dst_size_too_small(size, dst.len()));
        }
        dst[0] = (128 + (max_symbol - 1)) as u8;
        weights[max_symbol] = 0;
        for n in (0..max_symbol).step_by(2) {
            dst[n / 2 + 1] = (weights[n] << 4) + weights[n + 1];
        }
        Ok(size)
    }

    #[inline]
    fn encode_symbol(&self, writer: &mut BitWriter<'_>, symbol: u8) {
        let code = self.codes[symbol as usize];
        writer.add_bits(code.value as u64, code.nb_bits as u32);
    }

    /// Compress into one stream. `None` when `dst` is too small.
    pub fn compress_1x(&self, dst: &mut [u8], src: &[u8]) -> Option<usize> {
        let mut writer = BitWriter::new(dst);
        for chunk in src.rchunks(4) {
            for &b in chunk.iter().rev() {
                self.encode_symbol(&mut writer, b);
            }
            writer.flush_bits();
        }
        writer.close()
    }

    /// Compress into four streams behind a 6-byte jump table.
    pub fn compress_4x(&self, dst: &mut [u8], src: &[u8]) -> Option<usize> {
        let segment = src.len().div_ceil(4);
        if dst.len() < 6 + 1 + 1 + 1 + 8 {
            return None;
        }
        let mut op = 6usize;
        for i in 0..4 {
            let start = (i * segment).min(src.len());
            let end = if i == 3 {
                src.len()
            } else {
                ((i + 1) * segment).min(src.len())
            };
            let size = self.compress_1x(&mut dst[op..], &src[start..end])?;
            if i < 3 {
                let size16 = u16::try_from(size).ok()?;
                dst[2 * i..2 * i + 2].copy_from_slice(&size16.to_le_bytes());
            }
            op += size;
        }
        Some(op)
    }
}

/// FSE-compress Huffman weights. Returns 0 when not compressible.
fn compress_weights(dst: &mut [u8], weights: &[u8]) -> usize {
    if weights.len() <= 1 {
        return 0;
    }
    let mut count = [0u32; 256];
    let (max_symbol, largest) = fse::hist_count(&mut count, weights);
    if largest as usize == weights.len() || largest == 1 {
        return 0;
    }
    let table_log = fse::optimal_table_log(MAX_FSE_TABLELOG_FOR_HUFF_HEADER, weights.len(), max_symbol);
    let mut norm = [0i16; 256];
    if fse::normalize_count(&mut norm, table_log, &count, weights.len(), max_symbol, false).is_err() {
        return 0;
    }
    let Ok(h_size) = fse::write_ncount(dst, &norm, max_symbol, table_log) else {
        return 0;
    };
    let mut ct = FseCTable::new();
    if ct.build(&norm, max_symbol, table_log).is_err() {
        return 0;
    }
    match fse::compress_using_ctable(&mut dst[h_size..], weights, &ct) {
        Some(c_size) if c_size > 0 => h_size + c_size,
        _ => 0,
    }
}

/// Parse serialized weights. Returns the weights, how many were
/// explicit, and the bytes consumed.
fn read_weights(src: &[u8]) -> Result<([u8; 256], usize, usize)> {
    let Some(&header) = src.first() else {
        return Err(ZstdError::corrupted(0, "huffman: missing table"));
    };
    let mut weights = [0u8; 256];
    if header >= 128 {
        let n = header as usize - 127;
        let bytes = n.div_ceil(2);
        if src.len() < 1 + bytes {
            return Err(ZstdError::corrupted(0, "huffman: truncated weights"));
        }
        for (i, w) in weights.iter_mut().enumerate().take(n) {
            let b = src[1 + i / 2];
            *w = if i % 2 == 0 { b >> 4 } else { b & 0x0F };
        }
        return Ok((weights, n, 1 + bytes));
    }
    let size = header as usize;
    if src.len() < 1 + size {
        return Err(ZstdError::corrupted(0, "huffman: truncated weights"));
    }
    let (table, h_size) = FseDTable::read(&src[1..1 + size], TABLELOG_MAX, MAX_FSE_TABLELOG_FOR_HUFF_HEADER)?;
    if h_size >= size {
        return Err(ZstdError::corrupted(0, "huffman: weight stream missing"));
    }
    let decoded = fse::decompress_interleaved2(&src[1 + h_size..1 + size], &table, 255)?;
    weights[..decoded.len()].copy_from_slice(&decoded);
    Ok((weights, decoded.len(), 1 + size))
}

/// Validate explicit weights and append the implied last one. Returns the
/// table log.
fn complete_weights(weights: &mut [u8; 256], nb_weights: usize) -> Result<u32> {
    if nb_weights == 0 || nb_weights > 255 {
        return Err(ZstdError::corrupted(0, "huffman: bad weight count"));
    }
    let mut total = 0u32;
    for &w in &weights[..nb_weights] {
        if w as u32 > TABLELOG_MAX {
            return Err(ZstdError::corrupted(0, "huffman: weight too large"));
        }
        if w > 0 {
            total += 1 << (w - 1);
        }
    }
    if total == 0 {
        return Err(ZstdError::corrupted(0, "huffman: all weights zero"));
    }
    let table_log = highbit32(total) + 1;
    if table_log > TABLELOG_MAX {
        return Err(ZstdError::corrupted(0, "huffman: table too large"));
    }
    let rest = (1u32 << table_log) - total;
    if !rest.is_power_of_two() {
        return Err(ZstdError::corrupted(0, "huffman: incomplete tree"));
    }
    weights[nb_weights] = (highbit32(rest) + 1) as u8;
    Ok(table_log)
}

/// One decoding cell of a single-symbol table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DEntry {
    symbol: u8,
    nb_bits: u8,
}

/// Huffman decoding table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HufDTable {
    table_log: u32,
    entries: Vec<DEntry>,
}

impl HufDTable {
    /// Whether a table was loaded.
    pub fn is_loaded(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Parse a table description. Returns the table and bytes consumed.
    pub fn read(src: &[u8]) -> Result<(Self, usize)> {
        let (mut weights, nb_weights, consumed) = read_weights(src)?;
        let table = Self::from_weights(&mut weights, nb_weights)?;
        Ok((table, consumed))
    }

    /// Build from explicit weights, appending the implied last weight.
    fn from_weights(weights: &mut [u8; 256], nb_weights: usize) -> Result<Self> {
        let table_log = complete_weights(weights, nb_weights)?;
        let nb_symbols = nb_weights + 1;

        let mut rank_start = [0u32; TABLELOG_MAX as usize + 2];
        for &w in &weights[..nb_symbols] {
            if w > 0 {
                rank_start[w as usize] += 1 << (w - 1);
            }
        }
        let mut next = 0u32;
        for w in 1..=table_log as usize {
            let size = rank_start[w];
            rank_start[w] = next;
            next += size;
        }

        let mut entries = vec![DEntry::default(); 1 << table_log];
        for (s, &w) in weights[..nb_symbols].iter().enumerate() {
            if w == 0 {
                continue;
            }
            let len = 1u32 << (w - 1);
            let start = rank_start[w as usize];
            let entry = DEntry {
                symbol: s as u8,
                nb_bits: (table_log + 1 - w as u32) as u8,
            };
            entries[start as usize..(start + len) as usize].fill(entry);
            rank_start[w as usize] += len;
        }
        Ok(Self { table_log, entries })
    }

    fn decode_stream(&self, src: &[u8], out: &mut [u8]) -> Result<()> {
        let mut reader = ReverseBitReader::new(src)?;
        for o in out.iter_mut() {
            let entry = self.entries[reader.peek_bits(self.table_log) as usize];
            reader.read_bits(entry.nb_bits as u32);
            *o = entry.symbol;
        }
        if !reader.is_finished() {
            return Err(ZstdError::corrupted(0, "huffman: stream not fully consumed"));
        }
        Ok(())
    }

    /// Decode one stream filling `out`.
    pub fn decompress_1x(&self, src: &[u8], out: &mut [u8]) -> Result<()> {
        self.decode_stream(src, out)
    }

    /// Decode four streams behind a jump table filling `out`.
    pub fn decompress_4x(&self, src: &[u8], out: &mut [u8]) -> Result<()> {
        if src.len() < 10 {
            return Err(ZstdError::corrupted(0, "huffman: truncated jump table"));
        }
        let sizes = [
            u16::from_le_bytes([src[0], src[1]]) as usize,
            u16::from_le_bytes([src[2], src[3]]) as usize,
            u16::from_le_bytes([src[4], src[5]]) as usize,
        ];
        let total: usize = sizes.iter().sum::<usize>() + 6;
        if total > src.len() {
            return Err(ZstdError::corrupted(0, "huffman: jump table out of range"));
        }
        let segment = out.len().div_ceil(4);
        if 3 * segment > out.len() {
            return Err(ZstdError::corrupted(0, "huffman: too few literals for 4 streams"));
        }
        let mut ip = 6usize;
        let mut op = 0usize;
        for i in 0..4 {
            let size = if i < 3 { sizes[i] } else { src.len() - total };
            let regen = if i < 3 { segment } else { out.len() - 3 * segment };
            self.decode_stream(&src[ip..ip + size], &mut out[op..op + regen])?;
            ip += size;
            op += regen;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text() -> Vec<u8> {
        b"It was the best of times, it was the worst of times, it was the age of wisdom, \
          it was the age of foolishness, it was the epoch of belief, it was the epoch of \
          incredulity, it was the season of Light, it was the season of Darkness."
            .repeat(4)
    }

    #[test]
    fn test_lengths_are_limited_and_complete() {
        let mut count = [0u32; 256];
        // Fibonacci weights force long codes without a limit.
        let (mut a, mut b) = (1u32, 1u32);
        for c in count.iter_mut().take(24) {
            *c = a;
            (a, b) = (b, a + b);
        }
        let mut lengths = [0u8; 256];
        limited_code_lengths(&count, 23, 11, &mut lengths);
        let kraft: u32 = lengths[..24].iter().map(|&l| 1u32 << (11 - l)).sum();
        assert_eq!(kraft, 1 << 11);
        assert!(lengths[..24].iter().all(|&l| (1..=11).contains(&l)));
    }

    #[test]
    fn test_table_description_and_streams() {
        let data = text();
        let mut count = [0u32; 256];
        let (max_symbol, _) = fse::hist_count(&mut count, &data);
        let mut ct = HufCTable::default();
        let log = optimal_table_log(TABLELOG_DEFAULT, data.len(), max_symbol);
        ct.build(&count, max_symbol, log);
        assert!(ct.validate(&count, max_symbol));

        let mut buf = vec![0u8; 2048];
        let h_size = ct.write(&mut buf).unwrap();
        let (dt, consumed) = HufDTable::read(&buf[..h_size]).unwrap();
        assert_eq!(consumed, h_size);

        let c1 = ct.compress_1x(&mut buf, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        dt.decompress_1x(&buf[..c1], &mut out).unwrap();
        assert_eq!(out, data);

        let c4 = ct.compress_4x(&mut buf, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        dt.decompress_4x(&buf[..c4], &mut out).unwrap();
        assert_eq!(out, data);
        assert!(c4 < data.len());
    }

    #[test]
    fn test_encoder_table_reloads_from_description() {
        let data = text();
        let mut count = [0u32; 256];
        let (max_symbol, _) = fse::hist_count(&mut count, &data);
        let mut ct = HufCTable::default();
        ct.build(&count, max_symbol, TABLELOG_DEFAULT);
        let mut buf = vec![0u8; 512];
        let h_size = ct.write(&mut buf).unwrap();

        let (reloaded, has_zero_weights, consumed) = HufCTable::read(&buf[..h_size]).unwrap();
        assert_eq!(consumed, h_size);
        assert!(has_zero_weights);
        assert_eq!(reloaded, ct);
    }

    #[test]
    fn test_validate_rejects_missing_symbol() {
        let mut count = [0u32; 256];
        count[b'a' as usize] = 10;
        count[b'b' as usize] = 5;
        let mut ct = HufCTable::default();
        ct.build(&count, b'b' as u32, 11);
        count[b'c' as usize] = 1;
        assert!(!ct.validate(&count, b'c' as u32));
    }

    #[test]
    fn test_code_lengths_follow_counts() {
        let mut count = [0u32; 256];
        count[b'a' as usize] = 100;
        count[b'b' as usize] = 10;
        count[b'c' as usize] = 1;
        let mut ct = HufCTable::default();
        ct.build(&count, b'c' as u32, 11);
        assert_eq!(ct.nb_bits(b'a'), 1);
        assert!(ct.nb_bits(b'c') >= ct.nb_bits(b'b'));
        assert_eq!(ct.nb_bits(b'z'), 0);
    }

    #[test]
    fn test_corrupt_description() {
        assert!(HufDTable::read(&[]).is_err());
        assert!(HufDTable::read(&[200]).is_err());
    }
}

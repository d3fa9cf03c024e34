//! Finite State Entropy (FSE) codec.
//!
//! FSE is the tANS coder Zstandard uses for sequence codes and for
//! compressing Huffman weights. This module covers both directions:
//!
//! - statistics: histogram, table log selection, count normalization
//! - the NCount header (normalized distribution) writer and reader
//! - compression tables ([`FseCTable`]) and symbol encoding
//! - decoding tables ([`FseDTable`])
//! - cost estimation used to choose between table representations

use oxizstd_core::{BitWriter, ReverseBitReader, Result, ZstdError};
use std::sync::OnceLock;

use crate::hash::highbit32;

/// Smallest table log.
pub const MIN_TABLELOG: u32 = 5;
/// Largest table log produced by the encoder.
pub const MAX_TABLELOG: u32 = 12;
/// Table log used when the caller gives none.
pub const DEFAULT_TABLELOG: u32 = 11;
/// Largest table log a header may declare.
pub const TABLELOG_ABSOLUTE_MAX: u32 = 15;

/// Histogram of `src` into `count`. Returns `(max_symbol, largest_count)`.
///
/// `count` must hold 256 cells.
pub fn hist_count(count: &mut [u32], src: &[u8]) -> (u32, u32) {
    count[..256].fill(0);
    for &b in src {
        count[b as usize] += 1;
    }
    let mut max_symbol = 0u32;
    let mut largest = 0u32;
    for (s, &c) in count[..256].iter().enumerate() {
        if c > 0 {
            max_symbol = s as u32;
        }
        largest = largest.max(c);
    }
    (max_symbol, largest)
}

fn min_table_log(src_size: usize, max_symbol_value: u32) -> u32 {
    let min_bits_src = highbit32(src_size as u32) + 1;
    let min_bits_symbols = highbit32(max_symbol_value.max(1)) + 2;
    min_bits_src.min(min_bits_symbols)
}

pub(crate) fn optimal_table_log_internal(
    max_table_log: u32,
    src_size: usize,
    max_symbol_value: u32,
    minus: u32,
) -> u32 {
    let max_bits_src = highbit32((src_size.max(2) - 1) as u32).saturating_sub(minus);
    let min_bits = min_table_log(src_size.max(1), max_symbol_value);
    let mut table_log = if max_table_log == 0 {
        DEFAULT_TABLELOG
    } else {
        max_table_log
    };
    if max_bits_src < table_log {
        table_log = max_bits_src;
    }
    if min_bits > table_log {
        table_log = min_bits;
    }
    table_log.clamp(MIN_TABLELOG, MAX_TABLELOG)
}

/// Table log balancing header cost against precision for `src_size` symbols.
pub fn optimal_table_log(max_table_log: u32, src_size: usize, max_symbol_value: u32) -> u32 {
    optimal_table_log_internal(max_table_log, src_size, max_symbol_value, 2)
}

const RTB_TABLE: [u64; 8] = [0, 473195, 504333, 520860, 550000, 700000, 750000, 830000];

/// Scale `count` so that it sums to `1 << table_log`.
///
/// Symbols too rare to deserve a full slot get `-1` when `use_low_prob` is
/// set (they still take one slot), `1` otherwise.
pub fn normalize_count(
    norm: &mut [i16],
    table_log: u32,
    count: &[u32],
    total: usize,
    max_symbol_value: u32,
    use_low_prob: bool,
) -> Result<()> {
    if !(MIN_TABLELOG..=MAX_TABLELOG).contains(&table_log) {
        return Err(ZstdError::generic("fse: table log out of range"));
    }
    let scale = 62 - table_log;
    let step = (1u64 << 62) / total as u64;
    let v_step = 1u64 << (scale - 20);
    let mut still_to_distribute: i32 = 1 << table_log;
    let mut largest = 0usize;
    let mut largest_p: i16 = 0;
    let low_threshold = (total >> table_log) as u32;
    let low_prob: i16 = if use_low_prob { -1 } else { 1 };

    for s in 0..=max_symbol_value as usize {
        let c = count[s];
        if c as usize == total {
            return Err(ZstdError::generic("fse: single symbol, use rle"));
        }
        if c == 0 {
            norm[s] = 0;
            continue;
        }
        if c <= low_threshold {
            norm[s] = low_prob;
            still_to_distribute -= 1;
        } else {
            let scaled = c as u64 * step;
            let mut proba = (scaled >> scale) as i16;
            if proba < 8 {
                let rest_to_beat = v_step * RTB_TABLE[proba as usize];
                if scaled - ((proba as u64) << scale) > rest_to_beat {
                    proba += 1;
                }
            }
            if proba > largest_p {
                largest_p = proba;
                largest = s;
            }
            norm[s] = proba;
            still_to_distribute -= proba as i32;
        }
    }
    if -still_to_distribute >= (norm[largest] >> 1) as i32 {
        normalize_m2(norm, table_log, count, total, max_symbol_value, low_prob)
    } else {
        norm[largest] += still_to_distribute as i16;
        Ok(())
    }
}

/// Secondary normalization for flat distributions.
fn normalize_m2(
    norm: &mut [i16],
    table_log: u32,
    count: &[u32],
    total: usize,
    max_symbol_value: u32,
    low_prob: i16,
) -> Result<()> {
    const NOT_YET_ASSIGNED: i16 = -2;
    let mut total = total as u64;
    let mut distributed: u32 = 0;
    let low_threshold = total >> table_log;
    let mut low_one = (total * 3) >> (table_log + 1);
    let nb_symbols = max_symbol_value as usize + 1;

    for s in 0..nb_symbols {
        let c = count[s] as u64;
        if c == 0 {
            norm[s] = 0;
        } else if c <= low_threshold {
            norm[s] = low_prob;
            distributed += 1;
            total -= c;
        } else if c <= low_one {
            norm[s] = 1;
            distributed += 1;
            total -= c;
        } else {
            norm[s] = NOT_YET_ASSIGNED;
        }
    }
    let mut to_distribute = (1u32 << table_log) - distributed;
    if to_distribute == 0 {
        return Ok(());
    }
    if total / to_distribute as u64 > low_one {
        low_one = (total * 3) / (to_distribute as u64 * 2);
        for s in 0..nb_symbols {
            if norm[s] == NOT_YET_ASSIGNED && count[s] as u64 <= low_one {
                norm[s] = 1;
                distributed += 1;
                total -= count[s] as u64;
            }
        }
        to_distribute = (1u32 << table_log) - distributed;
    }
    if distributed as usize == nb_symbols {
        // Every symbol is rare: give the remainder to the most frequent.
        let mut max_v = 0usize;
        let mut max_c = 0u32;
        for (s, &c) in count[..nb_symbols].iter().enumerate() {
            if c > max_c {
                max_v = s;
                max_c = c;
            }
        }
        norm[max_v] += to_distribute as i16;
        return Ok(());
    }
    if total == 0 {
        let mut s = 0usize;
        while to_distribute > 0 {
            if norm[s] > 0 {
                to_distribute -= 1;
                norm[s] += 1;
            }
            s = (s + 1) % nb_symbols;
        }
        return Ok(());
    }

    let v_step_log = 62 - table_log;
    let mid = (1u128 << (v_step_log - 1)) - 1;
    let r_step = (((1u128 << v_step_log) * to_distribute as u128) + mid) / total as u128;
    let mut tmp_total = mid;
    for s in 0..nb_symbols {
        if norm[s] == NOT_YET_ASSIGNED {
            let end = tmp_total + count[s] as u128 * r_step;
            let s_start = (tmp_total >> v_step_log) as u32;
            let s_end = (end >> v_step_log) as u32;
            let weight = s_end - s_start;
            if weight < 1 {
                return Err(ZstdError::generic("fse: normalization failed"));
            }
            norm[s] = weight as i16;
            tmp_total = end;
        }
    }
    Ok(())
}

/// Serialize a normalized distribution. Returns the header size.
pub fn write_ncount(
    dst: &mut [u8],
    norm: &[i16],
    max_symbol_value: u32,
    table_log: u32,
) -> Result<usize> {
    if table_log > MAX_TABLELOG || table_log < MIN_TABLELOG {
        return Err(ZstdError::generic("fse: table log out of range"));
    }
    let table_size = 1i32 << table_log;
    let alphabet_size = max_symbol_value as usize + 1;
    let mut out = 0usize;
    let mut bit_stream: u64 = 0;
    let mut bit_count: u32 = 0;
    let mut symbol = 0usize;
    let mut previous_is0 = false;

    let mut emit2 = |out: &mut usize, bit_stream: u64| -> Result<()> {
        if *out + 2 > dst.len() {
            return Err(ZstdError::dst_size_too_small(*out + 2, dst.len()));
        }
        dst[*out] = bit_stream as u8;
        dst[*out + 1] = (bit_stream >> 8) as u8;
        *out += 2;
        Ok(())
    };

    bit_stream |= ((table_log - MIN_TABLELOG) as u64) << bit_count;
    bit_count += 4;

    let mut remaining = table_size + 1;
    let mut threshold = table_size;
    let mut nb_bits = table_log + 1;

    while symbol < alphabet_size && remaining > 1 {
        if previous_is0 {
            let mut start = symbol;
            while symbol < alphabet_size && norm[symbol] == 0 {
                symbol += 1;
            }
            if symbol == alphabet_size {
                break;
            }
            while symbol >= start + 24 {
                start += 24;
                bit_stream |= 0xFFFFu64 << bit_count;
                emit2(&mut out, bit_stream)?;
                bit_stream >>= 16;
            }
            while symbol >= start + 3 {
                start += 3;
                bit_stream |= 3u64 << bit_count;
                bit_count += 2;
            }
            bit_stream |= ((symbol - start) as u64) << bit_count;
            bit_count += 2;
            if bit_count > 16 {
                emit2(&mut out, bit_stream)?;
                bit_stream >>= 16;
                bit_count -= 16;
            }
        }
        let mut count = norm[symbol] as i32;
        symbol += 1;
        let max = (2 * threshold - 1) - remaining;
        remaining -= count.abs();
        count += 1;
        if count >= threshold {
            count += max;
        }
        bit_stream |= (count as u64) << bit_count;
        bit_count += nb_bits;
        if count < max {
            bit_count -= 1;
        }
        previous_is0 = count == 1;
        if remaining < 1 {
            return Err(ZstdError::generic("fse: invalid normalized distribution"));
        }
        while remaining < threshold {
            nb_bits -= 1;
            threshold >>= 1;
        }
        if bit_count > 16 {
            emit2(&mut out, bit_stream)?;
            bit_stream >>= 16;
            bit_count -= 16;
        }
    }
    if remaining != 1 {
        return Err(ZstdError::generic("fse: invalid normalized distribution"));
    }
    let tail = bit_count.div_ceil(8) as usize;
    if out + tail > dst.len() {
        return Err(ZstdError::dst_size_too_small(out + tail, dst.len()));
    }
    for i in 0..tail {
        dst[out + i] = (bit_stream >> (8 * i)) as u8;
    }
    Ok(out + tail)
}

/// Header decoded by [`read_ncount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NCount {
    /// Largest symbol with a non-zero count.
    pub max_symbol: u32,
    /// Table log.
    pub table_log: u32,
    /// Header size in bytes.
    pub size: usize,
}

/// Forward LSB-first reader over a byte slice, zero-padded past the end.
struct ForwardBits<'a> {
    src: &'a [u8],
    pos: usize,
}

impl ForwardBits<'_> {
    fn peek(&self, nb: u32) -> u32 {
        let byte = self.pos >> 3;
        let shift = (self.pos & 7) as u32;
        let mut word = [0u8; 8];
        let end = (byte + 8).min(self.src.len());
        if byte < end {
            word[..end - byte].copy_from_slice(&self.src[byte..end]);
        }
        ((u64::from_le_bytes(word) >> shift) & ((1u64 << nb) - 1)) as u32
    }

    fn skip(&mut self, nb: u32) {
        self.pos += nb as usize;
    }
}

/// Parse a normalized distribution into `norm` (at least
/// `max_symbol_value + 1` cells).
pub fn read_ncount(norm: &mut [i16], max_symbol_value: u32, src: &[u8]) -> Result<NCount> {
    if src.is_empty() {
        return Err(ZstdError::corrupted(0, "fse: empty header"));
    }
    let mut bits = ForwardBits { src, pos: 0 };
    let table_log = bits.peek(4) + MIN_TABLELOG;
    bits.skip(4);
    if table_log > TABLELOG_ABSOLUTE_MAX {
        return Err(ZstdError::corrupted(0, "fse: table log too large"));
    }
    let max_sv1 = max_symbol_value as usize + 1;
    norm[..max_sv1].fill(0);
    let mut remaining: i32 = (1 << table_log) + 1;
    let mut threshold: i32 = 1 << table_log;
    let mut nb_bits = table_log + 1;
    let mut symbol = 0usize;
    let mut previous0 = false;

    while remaining > 1 {
        if previous0 {
            loop {
                let repeat = bits.peek(2) as usize;
                bits.skip(2);
                symbol += repeat;
                if repeat != 3 {
                    break;
                }
            }
            if symbol >= max_sv1 {
                return Err(ZstdError::corrupted(0, "fse: symbol out of range"));
            }
        }
        if symbol >= max_sv1 {
            return Err(ZstdError::corrupted(0, "fse: too many symbols"));
        }
        let max = (2 * threshold - 1) - remaining;
        let low = bits.peek(nb_bits - 1) as i32;
        let mut count;
        if low < max {
            count = low;
            bits.skip(nb_bits - 1);
        } else {
            count = bits.peek(nb_bits) as i32;
            if count >= threshold {
                count -= max;
            }
            bits.skip(nb_bits);
        }
        count -= 1;
        remaining -= count.abs();
        norm[symbol] = count as i16;
        symbol += 1;
        previous0 = count == 0;
        if remaining < 1 {
            break;
        }
        while remaining < threshold {
            nb_bits -= 1;
            threshold >>= 1;
        }
    }
    if remaining != 1 {
        return Err(ZstdError::corrupted(0, "fse: invalid distribution"));
    }
    let size = bits.pos.div_ceil(8);
    if size > src.len() {
        return Err(ZstdError::corrupted(0, "fse: truncated header"));
    }
    Ok(NCount {
        max_symbol: symbol as u32 - 1,
        table_log,
        size,
    })
}

/// Step used to spread symbols over a table.
#[inline]
fn table_step(table_size: usize) -> usize {
    (table_size >> 1) + (table_size >> 3) + 3
}

/// Spread symbols over `1 << table_log` cells. Low-probability symbols
/// (`-1`) take the last cells.
fn spread_symbols(norm: &[i16], max_symbol_value: u32, table_log: u32, table: &mut Vec<u8>) -> usize {
    let table_size = 1usize << table_log;
    let mask = table_size - 1;
    let step = table_step(table_size);
    table.clear();
    table.resize(table_size, 0);
    let mut high_threshold = table_size - 1;
    for (s, &n) in norm[..=max_symbol_value as usize].iter().enumerate() {
        if n == -1 {
            table[high_threshold] = s as u8;
            high_threshold = high_threshold.wrapping_sub(1);
        }
    }
    let mut position = 0usize;
    for (s, &n) in norm[..=max_symbol_value as usize].iter().enumerate() {
        for _ in 0..n.max(0) {
            table[position] = s as u8;
            position = (position + step) & mask;
            while position > high_threshold {
                position = (position + step) & mask;
            }
        }
    }
    high_threshold
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SymbolTransform {
    delta_find_state: i32,
    delta_nb_bits: u32,
}

/// FSE compression table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FseCTable {
    table_log: u32,
    max_symbol: u32,
    state_table: Vec<u16>,
    symbol_tt: Vec<SymbolTransform>,
}

/// Encoder state bound to one [`FseCTable`].
#[derive(Debug, Clone, Copy)]
pub struct FseCState {
    value: u32,
}

impl FseCTable {
    /// An empty, unusable table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Most bits one occurrence of `symbol` can take, 0 if the table
    /// cannot encode it.
    pub fn max_nb_bits(&self, symbol: usize) -> u32 {
        match self.symbol_tt.get(symbol) {
            Some(tt) if symbol as u32 <= self.max_symbol => tt.delta_nb_bits.wrapping_add(0xFFFF) >> 16,
            _ => 0,
        }
    }

    /// Whether the table was built.
    pub fn is_built(&self) -> bool {
        !self.state_table.is_empty()
    }

    /// Build from a normalized distribution.
    pub fn build(&mut self, norm: &[i16], max_symbol_value: u32, table_log: u32) -> Result<()> {
        if table_log > TABLELOG_ABSOLUTE_MAX {
            return Err(ZstdError::generic("fse: table log too large"));
        }
        let table_size = 1usize << table_log;
        let nb_symbols = max_symbol_value as usize + 1;
        let mut symbols = Vec::new();
        spread_symbols(norm, max_symbol_value, table_log, &mut symbols);

        let mut cumul = vec![0u32; nb_symbols + 1];
        for s in 0..nb_symbols {
            let n = norm[s];
            cumul[s + 1] = cumul[s] + if n == -1 { 1 } else { n.max(0) as u32 };
        }
        if cumul[nb_symbols] as usize != table_size {
            return Err(ZstdError::generic("fse: distribution does not fill table"));
        }

        self.state_table.clear();
        self.state_table.resize(table_size, 0);
        for (u, &s) in symbols.iter().enumerate() {
            let slot = &mut cumul[s as usize];
            self.state_table[*slot as usize] = (table_size + u) as u16;
            *slot += 1;
        }

        self.symbol_tt.clear();
        self.symbol_tt.resize(nb_symbols, SymbolTransform::default());
        let mut total: i32 = 0;
        for s in 0..nb_symbols {
            let tt = &mut self.symbol_tt[s];
            match norm[s] {
                0 => {
                    tt.delta_nb_bits = ((table_log + 1) << 16) - (1 << table_log);
                }
                -1 | 1 => {
                    tt.delta_nb_bits = (table_log << 16) - (1 << table_log);
                    tt.delta_find_state = total - 1;
                    total += 1;
                }
                n => {
                    let n = n as u32;
                    let max_bits_out = table_log - highbit32(n - 1);
                    let min_state_plus = n << max_bits_out;
                    tt.delta_nb_bits = (max_bits_out << 16).wrapping_sub(min_state_plus);
                    tt.delta_find_state = total - n as i32;
                    total += n as i32;
                }
            }
        }
        self.table_log = table_log;
        self.max_symbol = max_symbol_value;
        Ok(())
    }

    /// Table that encodes a single symbol with zero bits.
    pub fn build_rle(&mut self, symbol: u8) {
        self.table_log = 0;
        self.max_symbol = symbol as u32;
        self.state_table.clear();
        self.state_table.extend_from_slice(&[0, 0]);
        self.symbol_tt.clear();
        self.symbol_tt
            .resize(symbol as usize + 1, SymbolTransform::default());
    }

    /// Start encoding with `symbol` (the last symbol of the stream).
    #[inline]
    pub fn init_state(&self, symbol: u8) -> FseCState {
        let tt = self.symbol_tt[symbol as usize];
        let nb_bits_out = (tt.delta_nb_bits + (1 << 15)) >> 16;
        let value = (nb_bits_out << 16).wrapping_sub(tt.delta_nb_bits);
        let index = ((value >> nb_bits_out) as i32 + tt.delta_find_state) as usize;
        FseCState {
            value: self.state_table[index] as u32,
        }
    }

    /// Encode `symbol`, writing the bits of the previous state.
    #[inline]
    pub fn encode(&self, writer: &mut BitWriter<'_>, state: &mut FseCState, symbol: u8) {
        let tt = self.symbol_tt[symbol as usize];
        let nb_bits_out = state.value.wrapping_add(tt.delta_nb_bits) >> 16;
        writer.add_bits(state.value as u64, nb_bits_out);
        let index = ((state.value >> nb_bits_out) as i32 + tt.delta_find_state) as usize;
        state.value = self.state_table[index] as u32;
    }

    /// Write the final state.
    #[inline]
    pub fn flush_state(&self, writer: &mut BitWriter<'_>, state: &FseCState) {
        writer.add_bits(state.value as u64, self.table_log);
        writer.flush_bits();
    }

    /// Approximate cost, in 1/256 bit, of `symbol`. `None` when the symbol
    /// cannot be encoded efficiently by this table.
    fn symbol_cost(&self, symbol: usize, accuracy_log: u32) -> u32 {
        let tt = self.symbol_tt[symbol];
        let min_nb_bits = tt.delta_nb_bits >> 16;
        let threshold = (min_nb_bits + 1) << 16;
        let table_size = 1u32 << self.table_log;
        let delta_from_threshold =
            threshold.wrapping_sub(tt.delta_nb_bits.wrapping_add(table_size));
        let normalized = (delta_from_threshold << accuracy_log) >> self.table_log;
        ((min_nb_bits + 1) << accuracy_log).wrapping_sub(normalized)
    }

    /// Estimated bits to encode `count` with this table, or `None` when a
    /// present symbol has no usable state.
    pub fn bit_cost(&self, count: &[u32], max: u32) -> Option<usize> {
        const ACCURACY_LOG: u32 = 8;
        if !self.is_built() || self.table_log == 0 || self.max_symbol < max {
            return None;
        }
        let bad_cost = (self.table_log + 1) << ACCURACY_LOG;
        let mut cost = 0usize;
        for (s, &c) in count[..=max as usize].iter().enumerate() {
            if c == 0 {
                continue;
            }
            let bit_cost = self.symbol_cost(s, ACCURACY_LOG);
            if bit_cost >= bad_cost {
                return None;
            }
            cost += c as usize * bit_cost as usize;
        }
        Some(cost >> ACCURACY_LOG)
    }
}

fn inverse_probability_log256() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [0u32; 256];
        for (i, cell) in t.iter_mut().enumerate().skip(1) {
            *cell = (256.0 * -(i as f64 / 256.0).log2()).floor() as u32;
        }
        t
    })
}

/// Bits to encode `count` under a predefined distribution.
/// `None` when a present symbol has probability zero.
pub fn cross_entropy_cost(norm: &[i16], accuracy_log: u32, count: &[u32], max: u32) -> Option<usize> {
    let table = inverse_probability_log256();
    let shift = 8 - accuracy_log;
    let mut cost = 0usize;
    for s in 0..=max as usize {
        let n = if s < norm.len() { norm[s] } else { 0 };
        if count[s] != 0 && n == 0 {
            return None;
        }
        let norm256 = ((if n == -1 { 1 } else { n.max(0) as u32 }) << shift) as usize;
        cost += count[s] as usize * table[norm256.min(255)] as usize;
    }
    Some(cost >> 8)
}

/// Shannon cost of `count`, in bits.
pub fn entropy_cost(count: &[u32], max: u32, total: usize) -> usize {
    let table = inverse_probability_log256();
    let mut cost = 0usize;
    for &c in &count[..=max as usize] {
        let mut norm = (256 * c as usize) / total.max(1);
        if c != 0 && norm == 0 {
            norm = 1;
        }
        cost += c as usize * table[norm.min(255)] as usize;
    }
    cost >> 8
}

/// Size of the NCount header a fresh table for `count` would need.
pub fn ncount_cost(count: &[u32], max: u32, nb_seq: usize, fse_log: u32) -> Option<usize> {
    let mut norm = [0i16; 256];
    let mut wksp = [0u8; 512];
    let table_log = optimal_table_log(fse_log, nb_seq, max);
    normalize_count(&mut norm, table_log, count, nb_seq, max, use_low_prob_count(nb_seq)).ok()?;
    write_ncount(&mut wksp, &norm, max, table_log).ok()
}

/// Whether low-probability symbols get the `-1` marker.
pub fn use_low_prob_count(nb_seq: usize) -> bool {
    nb_seq >= 2048
}

/// Compress `src` with two interleaved states.
///
/// Returns `None` if the input is too small or `dst` too short.
pub fn compress_using_ctable(dst: &mut [u8], src: &[u8], ct: &FseCTable) -> Option<usize> {
    if src.len() <= 2 {
        return None;
    }
    let mut writer = BitWriter::new(dst);
    let mut ip = src.len();
    let (mut state1, mut state2);
    if src.len() & 1 == 1 {
        ip -= 1;
        state1 = ct.init_state(src[ip]);
        ip -= 1;
        state2 = ct.init_state(src[ip]);
        ip -= 1;
        ct.encode(&mut writer, &mut state1, src[ip]);
        writer.flush_bits();
    } else {
        ip -= 1;
        state2 = ct.init_state(src[ip]);
        ip -= 1;
        state1 = ct.init_state(src[ip]);
    }
    while ip > 0 {
        ip -= 1;
        ct.encode(&mut writer, &mut state2, src[ip]);
        writer.flush_bits();
        if ip == 0 {
            break;
        }
        ip -= 1;
        ct.encode(&mut writer, &mut state1, src[ip]);
        writer.flush_bits();
    }
    ct.flush_state(&mut writer, &state2);
    ct.flush_state(&mut writer, &state1);
    writer.close()
}

/// One decoding cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeEntry {
    /// Decoded symbol.
    pub symbol: u8,
    /// Bits to read for the next state.
    pub nb_bits: u8,
    /// Base of the next state.
    pub new_state: u16,
}

/// FSE decoding table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FseDTable {
    table_log: u32,
    entries: Vec<DecodeEntry>,
}

impl FseDTable {
    /// Build from a normalized distribution.
    pub fn build(norm: &[i16], max_symbol_value: u32, table_log: u32) -> Result<Self> {
        if table_log > TABLELOG_ABSOLUTE_MAX {
            return Err(ZstdError::corrupted(0, "fse: table log too large"));
        }
        let table_size = 1u32 << table_log;
        let mut symbols = Vec::new();
        spread_symbols(norm, max_symbol_value, table_log, &mut symbols);

        let mut symbol_next: Vec<u32> = norm[..=max_symbol_value as usize]
            .iter()
            .map(|&n| if n == -1 { 1 } else { n.max(0) as u32 })
            .collect();
        let mut entries = vec![DecodeEntry::default(); table_size as usize];
        for (u, &s) in symbols.iter().enumerate() {
            let next = &mut symbol_next[s as usize];
            let next_state = *next;
            *next += 1;
            if next_state == 0 {
                return Err(ZstdError::corrupted(0, "fse: invalid distribution"));
            }
            let nb_bits = table_log - highbit32(next_state);
            entries[u] = DecodeEntry {
                symbol: s,
                nb_bits: nb_bits as u8,
                new_state: ((next_state << nb_bits) - table_size) as u16,
            };
        }
        Ok(Self { table_log, entries })
    }

    /// Table that always decodes `symbol` without reading bits.
    pub fn rle(symbol: u8) -> Self {
        Self {
            table_log: 0,
            entries: vec![DecodeEntry {
                symbol,
                nb_bits: 0,
                new_state: 0,
            }],
        }
    }

    /// Parse an NCount header from `src` and build the table.
    /// Returns the table and the header size.
    pub fn read(src: &[u8], max_symbol_value: u32, max_log: u32) -> Result<(Self, usize)> {
        let mut norm = [0i16; 256];
        let header = read_ncount(&mut norm, max_symbol_value, src)?;
        if header.table_log > max_log {
            return Err(ZstdError::corrupted(0, "fse: table log too large"));
        }
        let table = Self::build(&norm, header.max_symbol, header.table_log)?;
        Ok((table, header.size))
    }

    /// Read the initial state.
    #[inline]
    pub fn init_state(&self, reader: &mut ReverseBitReader<'_>) -> usize {
        reader.read_bits(self.table_log) as usize
    }

    /// Symbol of `state`.
    #[inline]
    pub fn peek_symbol(&self, state: usize) -> u8 {
        self.entries[state].symbol
    }

    /// Advance `state` by reading its bits.
    #[inline]
    pub fn update_state(&self, reader: &mut ReverseBitReader<'_>, state: &mut usize) {
        let entry = self.entries[*state];
        let low = reader.read_bits(entry.nb_bits as u32) as usize;
        *state = entry.new_state as usize + low;
    }

    /// Decode a symbol and advance.
    #[inline]
    pub fn decode(&self, reader: &mut ReverseBitReader<'_>, state: &mut usize) -> u8 {
        let symbol = self.peek_symbol(*state);
        self.update_state(reader, state);
        symbol
    }
}

/// Decode a stream produced by [`compress_using_ctable`].
pub fn decompress_interleaved2(src: &[u8], table: &FseDTable, max_out: usize) -> Result<Vec<u8>> {
    let mut reader = ReverseBitReader::new(src)?;
    let mut state1 = table.init_state(&mut reader);
    let mut state2 = table.init_state(&mut reader);
    let mut out = Vec::with_capacity(max_out.min(256));
    loop {
        if out.len() + 2 > max_out {
            return Err(ZstdError::corrupted(0, "fse: output too large"));
        }
        out.push(table.decode(&mut reader, &mut state1));
        if reader.overflowed() {
            out.push(table.peek_symbol(state2));
            break;
        }
        if out.len() + 2 > max_out {
            return Err(ZstdError::corrupted(0, "fse: output too large"));
        }
        out.push(table.decode(&mut reader, &mut state2));
        if reader.overflowed() {
            out.push(table.peek_symbol(state1));
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skewed_symbols(n: usize) -> Vec<u8> {
        let mut seed = 0x2545_F491u32;
        (0..n)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                match seed % 16 {
                    0..=7 => 0,
                    8..=11 => 1,
                    12 | 13 => 2,
                    14 => 3,
                    _ => (4 + seed % 9) as u8,
                }
            })
            .collect()
    }

    #[test]
    fn test_normalize_sums_to_table_size() {
        let data = skewed_symbols(5000);
        let mut count = [0u32; 256];
        let (max, _) = hist_count(&mut count, &data);
        for use_low in [false, true] {
            let mut norm = [0i16; 256];
            let log = optimal_table_log(9, data.len(), max);
            normalize_count(&mut norm, log, &count, data.len(), max, use_low).unwrap();
            let sum: i32 = norm[..=max as usize]
                .iter()
                .map(|&n| if n == -1 { 1 } else { n as i32 })
                .sum();
            assert_eq!(sum, 1 << log);
            for s in 0..=max as usize {
                assert_eq!(count[s] == 0, norm[s] == 0);
            }
        }
    }

    #[test]
    fn test_ncount_write_read() {
        let data = skewed_symbols(3000);
        let mut count = [0u32; 256];
        let (max, _) = hist_count(&mut count, &data);
        let mut norm = [0i16; 256];
        normalize_count(&mut norm, 8, &count, data.len(), max, true).unwrap();

        let mut header = [0u8; 128];
        let size = write_ncount(&mut header, &norm, max, 8).unwrap();
        let mut decoded = [0i16; 256];
        let parsed = read_ncount(&mut decoded, 255, &header[..size]).unwrap();
        assert_eq!(parsed.table_log, 8);
        assert_eq!(parsed.size, size);
        assert_eq!(&decoded[..=max as usize], &norm[..=max as usize]);
    }

    #[test]
    fn test_interleaved_stream() {
        let data = skewed_symbols(777);
        let mut count = [0u32; 256];
        let (max, _) = hist_count(&mut count, &data);
        let mut norm = [0i16; 256];
        let log = optimal_table_log(6, data.len(), max);
        normalize_count(&mut norm, log, &count, data.len(), max, false).unwrap();
        let mut ct = FseCTable::new();
        ct.build(&norm, max, log).unwrap();

        let mut dst = vec![0u8; 1024];
        let size = compress_using_ctable(&mut dst, &data, &ct).unwrap();
        assert!(size < data.len());

        let dt = FseDTable::build(&norm, max, log).unwrap();
        let decoded = decompress_interleaved2(&dst[..size], &dt, 1000).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_costs() {
        let data = skewed_symbols(4000);
        let mut count = [0u32; 256];
        let (max, _) = hist_count(&mut count, &data);
        let mut norm = [0i16; 256];
        normalize_count(&mut norm, 9, &count, data.len(), max, false).unwrap();
        let mut ct = FseCTable::new();
        ct.build(&norm, max, 9).unwrap();

        let shannon = entropy_cost(&count, max, data.len());
        let table_cost = ct.bit_cost(&count, max).unwrap();
        let cross = cross_entropy_cost(&norm, 9 - 1, &count, max);
        assert!(shannon > 0);
        assert!(table_cost >= shannon / 2 && table_cost <= shannon * 2);
        assert!(cross.is_some());
        assert!(ncount_cost(&count, max, data.len(), 9).unwrap() > 0);

        // A symbol missing from the distribution makes it unusable.
        let mut other = count;
        other[200] = 5;
        assert!(ct.bit_cost(&other, 200).is_none());
    }

    #[test]
    fn test_max_nb_bits_follows_probability() {
        let mut norm = [0i16; 4];
        norm[..4].copy_from_slice(&[40, 16, 7, 1]);
        let mut ct = FseCTable::new();
        ct.build(&norm, 3, 6).unwrap();
        // Rarer symbols may cost more bits, never fewer.
        assert!(ct.max_nb_bits(0) <= ct.max_nb_bits(1));
        assert!(ct.max_nb_bits(1) <= ct.max_nb_bits(2));
        assert_eq!(ct.max_nb_bits(3), 6);
        assert_eq!(ct.max_nb_bits(9), 0);

        let mut rle = FseCTable::new();
        rle.build_rle(2);
        assert_eq!(rle.max_nb_bits(2), 0);
    }

    #[test]
    fn test_rle_table_writes_no_bits() {
        let mut ct = FseCTable::new();
        ct.build_rle(7);
        let mut storage = [0u8; 8];
        let mut writer = BitWriter::new(&mut storage);
        let mut state = ct.init_state(7);
        ct.encode(&mut writer, &mut state, 7);
        ct.flush_state(&mut writer, &state);
        assert_eq!(writer.close(), Some(1));
    }
}

//! Sequences section: symbol codes, table selection, encoding and decoding.
//!
//! Each sequence is coded as three symbols (literal length, offset, match
//! length) plus extra bits. Every symbol stream picks one of four table
//! representations per block (see [`SymbolEncodingType`]).

use oxizstd_core::{BitWriter, ReverseBitReader, Result, ZstdError};

use crate::fse::{self, FseCTable, FseDTable};
use crate::hash::highbit32;
use crate::params::Strategy;
use crate::seq_store::{Repcodes, SeqSection, MINMATCH};

/// Largest literal length code.
pub const MAX_LL: u32 = 35;
/// Largest match length code.
pub const MAX_ML: u32 = 52;
/// Largest offset code.
pub const MAX_OFF: u32 = 31;
/// Largest offset code of the predefined distribution.
pub const DEFAULT_MAX_OFF: u32 = 28;
/// Table log limit of literal lengths.
pub const LL_FSE_LOG: u32 = 9;
/// Table log limit of match lengths.
pub const ML_FSE_LOG: u32 = 9;
/// Table log limit of offsets.
pub const OFF_FSE_LOG: u32 = 8;
/// Sequence counts at or above this use the 3-byte form.
pub const LONGNBSEQ: usize = 0x7F00;

/// Extra bits per literal length code.
pub const LL_BITS: [u8; 36] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 3, 3, 4, 6, 7, 8, 9, 10, 11,
    12, 13, 14, 15, 16,
];

/// Baseline per literal length code.
pub const LL_BASE: [u32; 36] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 18, 20, 22, 24, 28, 32, 40, 48, 64,
    0x80, 0x100, 0x200, 0x400, 0x800, 0x1000, 0x2000, 0x4000, 0x8000, 0x10000,
];

/// Extra bits per match length code.
pub const ML_BITS: [u8; 53] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    1, 1, 1, 1, 2, 2, 3, 3, 4, 4, 5, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
];

/// Baseline per match length code.
pub const ML_BASE: [u32; 53] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28,
    29, 30, 31, 32, 33, 34, 35, 37, 39, 41, 43, 47, 51, 59, 67, 83, 99, 0x83, 0x103, 0x203, 0x403,
    0x803, 0x1003, 0x2003, 0x4003, 0x8003, 0x10003,
];

/// Predefined literal length distribution.
pub const LL_DEFAULT_NORM: [i16; 36] = [
    4, 3, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2, 2, 3, 2, 1, 1, 1, 1, 1,
    -1, -1, -1, -1,
];
/// Table log of [`LL_DEFAULT_NORM`].
pub const LL_DEFAULT_NORM_LOG: u32 = 6;

/// Predefined match length distribution.
pub const ML_DEFAULT_NORM: [i16; 53] = [
    1, 4, 3, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1, -1, -1,
];
/// Table log of [`ML_DEFAULT_NORM`].
pub const ML_DEFAULT_NORM_LOG: u32 = 6;

/// Predefined offset distribution.
pub const OF_DEFAULT_NORM: [i16; 29] = [
    1, 1, 1, 1, 1, 1, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1,
];
/// Table log of [`OF_DEFAULT_NORM`].
pub const OF_DEFAULT_NORM_LOG: u32 = 5;

const LL_CODE: [u8; 64] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 16, 17, 17, 18, 18, 19, 19, 20, 20,
    20, 20, 21, 21, 21, 21, 22, 22, 22, 22, 22, 22, 22, 22, 23, 23, 23, 23, 23, 23, 23, 23, 24, 24,
    24, 24, 24, 24, 24, 24, 24, 24, 24, 24, 24, 24, 24, 24,
];

const ML_CODE: [u8; 128] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31, 32, 32, 33, 33, 34, 34, 35, 35, 36, 36, 36, 36, 37, 37, 37, 37, 38, 38,
    38, 38, 38, 38, 38, 38, 39, 39, 39, 39, 39, 39, 39, 39, 40, 40, 40, 40, 40, 40, 40, 40, 40, 40,
    40, 40, 40, 40, 40, 40, 41, 41, 41, 41, 41, 41, 41, 41, 41, 41, 41, 41, 41, 41, 41, 41, 42, 42,
    42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42, 42,
    42, 42, 42, 42, 42, 42,
];

/// Code of a literal length.
#[inline]
pub fn ll_code(lit_length: u32) -> u8 {
    if lit_length > 63 {
        (highbit32(lit_length) + 19) as u8
    } else {
        LL_CODE[lit_length as usize]
    }
}

/// Code of a match length minus [`MINMATCH`].
#[inline]
pub fn ml_code(ml_base: u32) -> u8 {
    if ml_base > 127 {
        (highbit32(ml_base) + 36) as u8
    } else {
        ML_CODE[ml_base as usize]
    }
}

/// Representation of one symbol stream's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolEncodingType {
    /// Predefined distribution.
    Basic = 0,
    /// A single symbol, no bits.
    Rle = 1,
    /// Table transmitted in the block.
    Compressed = 2,
    /// Table of the previous block.
    Repeat = 3,
}

impl SymbolEncodingType {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Basic,
            1 => Self::Rle,
            2 => Self::Compressed,
            _ => Self::Repeat,
        }
    }
}

/// Reuse state of an FSE table carried between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FseRepeat {
    /// Cannot be reused.
    #[default]
    None,
    /// May be reused after checking it covers every symbol.
    Check,
    /// Known to cover every symbol.
    Valid,
}

/// FSE tables of the three sequence streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeqEntropy {
    /// Offsets.
    pub of_table: FseCTable,
    /// Match lengths.
    pub ml_table: FseCTable,
    /// Literal lengths.
    pub ll_table: FseCTable,
    /// Offsets reuse state.
    pub of_repeat: FseRepeat,
    /// Match lengths reuse state.
    pub ml_repeat: FseRepeat,
    /// Literal lengths reuse state.
    pub ll_repeat: FseRepeat,
}

/// Static description of one symbol stream.
struct StreamSpec {
    fse_log: u32,
    default_norm: &'static [i16],
    default_norm_log: u32,
    default_max: u32,
}

const LL_SPEC: StreamSpec = StreamSpec {
    fse_log: LL_FSE_LOG,
    default_norm: &LL_DEFAULT_NORM,
    default_norm_log: LL_DEFAULT_NORM_LOG,
    default_max: MAX_LL,
};

const OF_SPEC: StreamSpec = StreamSpec {
    fse_log: OFF_FSE_LOG,
    default_norm: &OF_DEFAULT_NORM,
    default_norm_log: OF_DEFAULT_NORM_LOG,
    default_max: DEFAULT_MAX_OFF,
};

const ML_SPEC: StreamSpec = StreamSpec {
    fse_log: ML_FSE_LOG,
    default_norm: &ML_DEFAULT_NORM,
    default_norm_log: ML_DEFAULT_NORM_LOG,
    default_max: MAX_ML,
};

/// Choose how to transmit a symbol stream's table.
#[allow(clippy::too_many_arguments)]
fn select_encoding_type(
    repeat_mode: &mut FseRepeat,
    count: &[u32],
    max: u32,
    most_frequent: usize,
    nb_seq: usize,
    spec: &StreamSpec,
    prev: &FseCTable,
    default_allowed: bool,
    strategy: Strategy,
) -> SymbolEncodingType {
    if most_frequent == nb_seq {
        *repeat_mode = FseRepeat::None;
        if default_allowed && nb_seq <= 2 {
            return SymbolEncodingType::Basic;
        }
        return SymbolEncodingType::Rle;
    }
    if strategy < Strategy::Lazy {
        if default_allowed {
            const STATIC_FSE_NBSEQ_MAX: usize = 1000;
            let mult = 10 - strategy as usize;
            let dynamic_fse_nbseq_min = ((1usize << spec.default_norm_log) * mult) >> 3;
            if *repeat_mode == FseRepeat::Valid && nb_seq < STATIC_FSE_NBSEQ_MAX {
                return SymbolEncodingType::Repeat;
            }
            if nb_seq < dynamic_fse_nbseq_min
                || most_frequent < (nb_seq >> (spec.default_norm_log - 1))
            {
                *repeat_mode = FseRepeat::None;
                return SymbolEncodingType::Basic;
            }
        }
    } else {
        let basic_cost = if default_allowed {
            fse::cross_entropy_cost(spec.default_norm, spec.default_norm_log, count, max)
        } else {
            None
        };
        let repeat_cost = if *repeat_mode != FseRepeat::None {
            prev.bit_cost(count, max)
        } else {
            None
        };
        let ncount_cost = fse::ncount_cost(count, max, nb_seq, spec.fse_log);
        let compressed_cost =
            ncount_cost.map(|n| (n << 3) + fse::entropy_cost(count, max, nb_seq));
        let basic = basic_cost.unwrap_or(usize::MAX);
        let repeat = repeat_cost.unwrap_or(usize::MAX);
        let compressed = compressed_cost.unwrap_or(usize::MAX);
        if basic <= repeat && basic <= compressed && basic_cost.is_some() {
            *repeat_mode = FseRepeat::None;
            return SymbolEncodingType::Basic;
        }
        if repeat <= compressed && repeat_cost.is_some() {
            return SymbolEncodingType::Repeat;
        }
    }
    *repeat_mode = FseRepeat::Check;
    SymbolEncodingType::Compressed
}

/// Build the table of one stream into `next`, writing its description to
/// `dst`. Returns the description size.
#[allow(clippy::too_many_arguments)]
fn build_ctable(
    dst: &mut [u8],
    next: &mut FseCTable,
    ty: SymbolEncodingType,
    count: &mut [u32],
    max: u32,
    codes: &[u8],
    spec: &StreamSpec,
    prev: &FseCTable,
) -> Result<usize> {
    let nb_seq = codes.len();
    match ty {
        SymbolEncodingType::Rle => {
            if dst.is_empty() {
                return Err(ZstdError::dst_size_too_small(1, 0));
            }
            next.build_rle(max as u8);
            dst[0] = codes[0];
            Ok(1)
        }
        SymbolEncodingType::Repeat => {
            next.clone_from(prev);
            Ok(0)
        }
        SymbolEncodingType::Basic => {
            next.build(spec.default_norm, spec.default_max, spec.default_norm_log)?;
            Ok(0)
        }
        SymbolEncodingType::Compressed => {
            let table_log = fse::optimal_table_log(spec.fse_log, nb_seq, max);
            let mut nb_seq_1 = nb_seq;
            let last = codes[nb_seq - 1] as usize;
            if count[last] > 1 {
                count[last] -= 1;
                nb_seq_1 -= 1;
            }
            let mut norm = [0i16; 64];
            fse::normalize_count(
                &mut norm,
                table_log,
                count,
                nb_seq_1,
                max,
                fse::use_low_prob_count(nb_seq_1),
            )?;
            let size = fse::write_ncount(dst, &norm, max, table_log)?;
            next.build(&norm, max, table_log)?;
            Ok(size)
        }
    }
}

/// Outcome of table selection for the three streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqStatistics {
    /// Literal lengths table type.
    pub ll_type: SymbolEncodingType,
    /// Offsets table type.
    pub of_type: SymbolEncodingType,
    /// Match lengths table type.
    pub ml_type: SymbolEncodingType,
    /// Bytes of table descriptions written.
    pub size: usize,
    /// Size of the last compressed table description, 0 if none.
    pub last_count_size: usize,
}

fn histogram(count: &mut [u32; 64], codes: &[u8]) -> (u32, usize) {
    count.fill(0);
    for &c in codes {
        count[c as usize] += 1;
    }
    let max = count.iter().rposition(|&c| c > 0).unwrap_or(0) as u32;
    let most_frequent = count.iter().copied().max().unwrap_or(0) as usize;
    (max, most_frequent)
}

/// Select and write the three table descriptions.
pub fn build_sequences_statistics(
    dst: &mut [u8],
    section: &SeqSection<'_>,
    prev: &SeqEntropy,
    next: &mut SeqEntropy,
    strategy: Strategy,
) -> Result<SeqStatistics> {
    let nb_seq = section.nb_seq();
    let mut count = [0u32; 64];
    let mut op = 0usize;
    let mut last_count_size = 0usize;

    let (max, most_frequent) = histogram(&mut count, section.ll_codes);
    next.ll_repeat = prev.ll_repeat;
    let ll_type = select_encoding_type(
        &mut next.ll_repeat,
        &count,
        max,
        most_frequent,
        nb_seq,
        &LL_SPEC,
        &prev.ll_table,
        true,
        strategy,
    );
    let size = build_ctable(
        &mut dst[op..],
        &mut next.ll_table,
        ll_type,
        &mut count,
        max,
        section.ll_codes,
        &LL_SPEC,
        &prev.ll_table,
    )?;
    if ll_type == SymbolEncodingType::Compressed {
        last_count_size = size;
    }
    op += size;

    let (max, most_frequent) = histogram(&mut count, section.of_codes);
    next.of_repeat = prev.of_repeat;
    let of_type = select_encoding_type(
        &mut next.of_repeat,
        &count,
        max,
        most_frequent,
        nb_seq,
        &OF_SPEC,
        &prev.of_table,
        max <= DEFAULT_MAX_OFF,
        strategy,
    );
    let size = build_ctable(
        &mut dst[op..],
        &mut next.of_table,
        of_type,
        &mut count,
        max,
        section.of_codes,
        &OF_SPEC,
        &prev.of_table,
    )?;
    if of_type == SymbolEncodingType::Compressed {
        last_count_size = size;
    }
    op += size;

    let (max, most_frequent) = histogram(&mut count, section.ml_codes);
    next.ml_repeat = prev.ml_repeat;
    let ml_type = select_encoding_type(
        &mut next.ml_repeat,
        &count,
        max,
        most_frequent,
        nb_seq,
        &ML_SPEC,
        &prev.ml_table,
        true,
        strategy,
    );
    let size = build_ctable(
        &mut dst[op..],
        &mut next.ml_table,
        ml_type,
        &mut count,
        max,
        section.ml_codes,
        &ML_SPEC,
        &prev.ml_table,
    )?;
    if ml_type == SymbolEncodingType::Compressed {
        last_count_size = size;
    }
    op += size;

    Ok(SeqStatistics {
        ll_type,
        of_type,
        ml_type,
        size: op,
        last_count_size,
    })
}

/// Estimated bits of one symbol stream: the cheapest table choice plus
/// its description.
fn estimate_stream_bits(count: &mut [u32; 64], codes: &[u8], spec: &StreamSpec, prev: &FseCTable, repeat: FseRepeat) -> usize {
    let nb_seq = codes.len();
    let (max, most_frequent) = histogram(count, codes);
    if most_frequent == nb_seq {
        return 8;
    }
    let basic = if max <= spec.default_max {
        fse::cross_entropy_cost(spec.default_norm, spec.default_norm_log, count, max)
    } else {
        None
    };
    let repeated = if repeat != FseRepeat::None { prev.bit_cost(count, max) } else { None };
    let compressed =
        fse::ncount_cost(count, max, nb_seq, spec.fse_log).map(|n| (n << 3) + fse::entropy_cost(count, max, nb_seq));
    [basic, repeated, compressed]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(nb_seq * spec.fse_log as usize)
}

/// Estimated sequences section size of `section`, header included,
/// without building or writing any table.
pub fn estimate_sequences_size(section: &SeqSection<'_>, prev: &SeqEntropy) -> usize {
    let nb_seq = section.nb_seq();
    let count_size = 1 + (nb_seq >= 128) as usize + (nb_seq >= LONGNBSEQ) as usize;
    if nb_seq == 0 {
        return count_size;
    }
    let mut count = [0u32; 64];
    let mut bits = estimate_stream_bits(&mut count, section.ll_codes, &LL_SPEC, &prev.ll_table, prev.ll_repeat)
        + estimate_stream_bits(&mut count, section.of_codes, &OF_SPEC, &prev.of_table, prev.of_repeat)
        + estimate_stream_bits(&mut count, section.ml_codes, &ML_SPEC, &prev.ml_table, prev.ml_repeat);
    bits += section.ll_codes.iter().map(|&c| LL_BITS[c as usize] as usize).sum::<usize>();
    bits += section.ml_codes.iter().map(|&c| ML_BITS[c as usize] as usize).sum::<usize>();
    bits += section.of_codes.iter().map(|&c| c as usize).sum::<usize>();
    count_size + 1 + bits.div_ceil(8)
}

/// Write the sequence count. Returns bytes written.
pub fn write_nb_seq(dst: &mut [u8], nb_seq: usize) -> Result<usize> {
    if dst.len() < 4 {
        return Err(ZstdError::dst_size_too_small(4, dst.len()));
    }
    if nb_seq < 128 {
        dst[0] = nb_seq as u8;
        Ok(1)
    } else if nb_seq < LONGNBSEQ {
        dst[0] = ((nb_seq >> 8) + 0x80) as u8;
        dst[1] = nb_seq as u8;
        Ok(2)
    } else {
        dst[0] = 0xFF;
        dst[1..3].copy_from_slice(&((nb_seq - LONGNBSEQ) as u16).to_le_bytes());
        Ok(3)
    }
}

/// Type byte of the sequences header.
pub fn encoding_types_byte(stats: &SeqStatistics) -> u8 {
    ((stats.ll_type as u8) << 6) | ((stats.of_type as u8) << 4) | ((stats.ml_type as u8) << 2)
}

/// FSE-encode the sequences of `section` with `tables`.
/// Returns the bitstream size, `None` if `dst` is too small.
pub fn encode_sequences(dst: &mut [u8], tables: &SeqEntropy, section: &SeqSection<'_>) -> Option<usize> {
    let nb_seq = section.nb_seq();
    let last = nb_seq.checked_sub(1)?;
    let mut writer = BitWriter::new(dst);
    let (ll, of, ml) = (&tables.ll_table, &tables.of_table, &tables.ml_table);

    let mut ml_state = ml.init_state(section.ml_codes[last]);
    let mut of_state = of.init_state(section.of_codes[last]);
    let mut ll_state = ll.init_state(section.ll_codes[last]);
    writer.add_bits(
        section.lit_lengths[last] as u64,
        LL_BITS[section.ll_codes[last] as usize] as u32,
    );
    writer.flush_bits();
    writer.add_bits(
        section.ml_bases[last] as u64,
        ML_BITS[section.ml_codes[last] as usize] as u32,
    );
    writer.flush_bits();
    writer.add_bits(section.off_bases[last] as u64, section.of_codes[last] as u32);
    writer.flush_bits();

    for n in (0..last).rev() {
        let ll_code = section.ll_codes[n];
        let of_code = section.of_codes[n];
        let ml_code = section.ml_codes[n];
        of.encode(&mut writer, &mut of_state, of_code);
        ml.encode(&mut writer, &mut ml_state, ml_code);
        writer.flush_bits();
        ll.encode(&mut writer, &mut ll_state, ll_code);
        writer.flush_bits();
        writer.add_bits(section.lit_lengths[n] as u64, LL_BITS[ll_code as usize] as u32);
        writer.add_bits(section.ml_bases[n] as u64, ML_BITS[ml_code as usize] as u32);
        writer.flush_bits();
        writer.add_bits(section.off_bases[n] as u64, of_code as u32);
        writer.flush_bits();
    }
    ml.flush_state(&mut writer, &ml_state);
    of.flush_state(&mut writer, &of_state);
    ll.flush_state(&mut writer, &ll_state);
    writer.close()
}

/// A decoded sequence with a resolved offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    /// Literals copied before the match.
    pub lit_length: u32,
    /// Match length.
    pub match_length: u32,
    /// Match distance.
    pub offset: u32,
}

/// Tables carried between blocks by the decoder.
#[derive(Debug, Clone, Default)]
pub struct SeqDecodeTables {
    /// Literal lengths.
    pub ll: Option<FseDTable>,
    /// Offsets.
    pub of: Option<FseDTable>,
    /// Match lengths.
    pub ml: Option<FseDTable>,
}

fn read_table(
    src: &[u8],
    ty: SymbolEncodingType,
    slot: &mut Option<FseDTable>,
    max: u32,
    max_log: u32,
    default_norm: &[i16],
    default_log: u32,
) -> Result<usize> {
    match ty {
        SymbolEncodingType::Basic => {
            *slot = Some(FseDTable::build(
                default_norm,
                default_norm.len() as u32 - 1,
                default_log,
            )?);
            Ok(0)
        }
        SymbolEncodingType::Rle => {
            let &symbol = src
                .first()
                .ok_or_else(|| ZstdError::corrupted(0, "sequences: missing rle symbol"))?;
            if symbol as u32 > max {
                return Err(ZstdError::corrupted(0, "sequences: rle symbol out of range"));
            }
            *slot = Some(FseDTable::rle(symbol));
            Ok(1)
        }
        SymbolEncodingType::Compressed => {
            let (table, size) = FseDTable::read(src, max, max_log)?;
            *slot = Some(table);
            Ok(size)
        }
        SymbolEncodingType::Repeat => {
            if slot.is_none() {
                return Err(ZstdError::corrupted(0, "sequences: repeat without table"));
            }
            Ok(0)
        }
    }
}

/// Decode a sequences section, resolving offsets against `reps`.
pub fn decode_sequences(
    src: &[u8],
    tables: &mut SeqDecodeTables,
    reps: &mut Repcodes,
) -> Result<Vec<Sequence>> {
    let Some(&b0) = src.first() else {
        return Err(ZstdError::corrupted(0, "sequences: missing header"));
    };
    let (nb_seq, mut ip) = match b0 {
        0 => return Ok(Vec::new()),
        1..=127 => (b0 as usize, 1),
        128..=254 => {
            let b1 = *src
                .get(1)
                .ok_or_else(|| ZstdError::corrupted(0, "sequences: truncated count"))?;
            ((((b0 - 128) as usize) << 8) + b1 as usize, 2)
        }
        255 => {
            if src.len() < 3 {
                return Err(ZstdError::corrupted(0, "sequences: truncated count"));
            }
            (u16::from_le_bytes([src[1], src[2]]) as usize + LONGNBSEQ, 3)
        }
    };
    let modes = *src
        .get(ip)
        .ok_or_else(|| ZstdError::corrupted(ip as u64, "sequences: missing modes"))?;
    ip += 1;
    if modes & 3 != 0 {
        return Err(ZstdError::corrupted(ip as u64, "sequences: reserved bits set"));
    }
    ip += read_table(
        &src[ip..],
        SymbolEncodingType::from_bits(modes >> 6),
        &mut tables.ll,
        MAX_LL,
        LL_FSE_LOG,
        &LL_DEFAULT_NORM,
        LL_DEFAULT_NORM_LOG,
    )?;
    ip += read_table(
        &src[ip..],
        SymbolEncodingType::from_bits(modes >> 4),
        &mut tables.of,
        MAX_OFF,
        OFF_FSE_LOG,
        &OF_DEFAULT_NORM,
        OF_DEFAULT_NORM_LOG,
    )?;
    ip += read_table(
        &src[ip..],
        SymbolEncodingType::from_bits(modes >> 2),
        &mut tables.ml,
        MAX_ML,
        ML_FSE_LOG,
        &ML_DEFAULT_NORM,
        ML_DEFAULT_NORM_LOG,
    )?;
    let (Some(ll), Some(of), Some(ml)) = (&tables.ll, &tables.of, &tables.ml) else {
        return Err(ZstdError::corrupted(ip as u64, "sequences: missing table"));
    };
    if ip >= src.len() {
        return Err(ZstdError::corrupted(ip as u64, "sequences: missing bitstream"));
    }

    let mut reader = ReverseBitReader::new(&src[ip..])?;
    let mut ll_state = ll.init_state(&mut reader);
    let mut of_state = of.init_state(&mut reader);
    let mut ml_state = ml.init_state(&mut reader);
    let mut out = Vec::with_capacity(nb_seq);

    for i in 0..nb_seq {
        let ll_code = ll.peek_symbol(ll_state) as usize;
        let of_code = of.peek_symbol(of_state) as u32;
        let ml_code = ml.peek_symbol(ml_state) as usize;
        if ll_code > MAX_LL as usize || ml_code > MAX_ML as usize || of_code > MAX_OFF {
            return Err(ZstdError::corrupted(ip as u64, "sequences: code out of range"));
        }
        let off_base = (1u32 << of_code) + reader.read_bits(of_code) as u32;
        let match_length = ML_BASE[ml_code] + reader.read_bits(ML_BITS[ml_code] as u32) as u32;
        let lit_length = LL_BASE[ll_code] + reader.read_bits(LL_BITS[ll_code] as u32) as u32;

        let ll0 = lit_length == 0;
        let offset = reps.resolve(off_base, ll0);
        if offset == 0 {
            return Err(ZstdError::corrupted(ip as u64, "sequences: zero offset"));
        }
        reps.update(off_base, ll0);
        out.push(Sequence {
            lit_length,
            match_length,
            offset,
        });

        if i + 1 < nb_seq {
            ll.update_state(&mut reader, &mut ll_state);
            ml.update_state(&mut reader, &mut ml_state);
            of.update_state(&mut reader, &mut of_state);
        }
        if reader.overflowed() {
            return Err(ZstdError::corrupted(ip as u64, "sequences: bitstream overrun"));
        }
    }
    if !reader.is_finished() {
        return Err(ZstdError::corrupted(ip as u64, "sequences: trailing bits"));
    }
    debug_assert!(out.iter().all(|s| s.match_length >= MINMATCH));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq_store::{offset_to_off_base, repcode_to_off_base, SeqStore};

    #[test]
    fn test_codes_match_baselines() {
        for ll in [0u32, 5, 15, 16, 17, 63, 64, 100, 1000, 65535, 65536, 131071] {
            let c = ll_code(ll) as usize;
            assert!(LL_BASE[c] <= ll && ll < LL_BASE[c] + (1 << LL_BITS[c]), "ll {ll}");
        }
        for ml in [3u32, 10, 34, 35, 36, 130, 131, 4000, 65538, 131074] {
            let c = ml_code(ml - MINMATCH) as usize;
            assert!(ML_BASE[c] <= ml && ml < ML_BASE[c] + (1 << ML_BITS[c]), "ml {ml}");
        }
    }

    #[test]
    fn test_default_norms_fill_tables() {
        let sum = |n: &[i16]| n.iter().map(|&v| v.unsigned_abs() as u32).sum::<u32>();
        assert_eq!(sum(&LL_DEFAULT_NORM), 1 << LL_DEFAULT_NORM_LOG);
        assert_eq!(sum(&ML_DEFAULT_NORM), 1 << ML_DEFAULT_NORM_LOG);
        assert_eq!(sum(&OF_DEFAULT_NORM), 1 << OF_DEFAULT_NORM_LOG);
    }

    fn encode_and_decode(strategy: Strategy, seqs: &[(u32, usize, usize)]) {
        let n = seqs.len();
        let mut lits = vec![0u8; 1 << 20];
        let (mut off, mut ll, mut ml) = (vec![0u32; n], vec![0u16; n], vec![0u16; n]);
        let (mut c1, mut c2, mut c3) = (vec![0u8; n], vec![0u8; n], vec![0u8; n]);
        let mut store = SeqStore::new(&mut lits, &mut off, &mut ll, &mut ml, &mut c1, &mut c2, &mut c3);
        let filler = vec![b'x'; 1 << 16];
        for &(off_base, lit_len, match_len) in seqs {
            store.store_seq(&filler[..lit_len], off_base, match_len);
        }
        store.compute_codes();
        let section = store.full_section();

        let prev = SeqEntropy::default();
        let mut next = SeqEntropy::default();
        let mut dst = vec![0u8; 1 << 16];
        let nb = write_nb_seq(&mut dst, n).unwrap();
        let stats = build_sequences_statistics(&mut dst[nb + 1..], &section, &prev, &mut next, strategy).unwrap();
        dst[nb] = encoding_types_byte(&stats);
        let mut op = nb + 1 + stats.size;
        op += encode_sequences(&mut dst[op..], &next, &section).unwrap();

        let mut tables = SeqDecodeTables::default();
        let mut dreps = Repcodes::default();
        let decoded = decode_sequences(&dst[..op], &mut tables, &mut dreps).unwrap();
        assert_eq!(decoded.len(), n);

        let mut ereps = Repcodes::default();
        for (d, &(off_base, lit_len, match_len)) in decoded.iter().zip(seqs) {
            let ll0 = lit_len == 0;
            assert_eq!(d.offset, ereps.resolve(off_base, ll0));
            ereps.update(off_base, ll0);
            assert_eq!(d.lit_length as usize, lit_len);
            assert_eq!(d.match_length as usize, match_len);
        }
    }

    #[test]
    fn test_sequences_section_fast_and_lazy() {
        let mut seqs = Vec::new();
        for i in 0..400u32 {
            let off_base = if i % 5 == 0 {
                repcode_to_off_base(1 + i % 3)
            } else {
                offset_to_off_base(1 + (i * 37) % 5000)
            };
            seqs.push((off_base, (i % 23) as usize, 3 + (i % 40) as usize));
        }
        encode_and_decode(Strategy::Fast, &seqs);
        encode_and_decode(Strategy::Lazy2, &seqs);
    }

    #[test]
    fn test_single_sequence_and_long_lengths() {
        encode_and_decode(Strategy::DFast, &[(offset_to_off_base(7), 3, 4)]);
        encode_and_decode(
            Strategy::BtLazy2,
            &[(offset_to_off_base(10), 2, 70_000), (offset_to_off_base(3), 0, 5)],
        );
    }
}

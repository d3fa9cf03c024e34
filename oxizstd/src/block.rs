//! Block encoding.
//!
//! Turns a filled [`SeqStore`] into one or more blocks: a literals section
//! followed by the FSE-coded sequences, or a raw/RLE block when entropy
//! coding does not pay. Entropy tables and repeat offsets live in a
//! double-buffered [`BlockState`] so a block can be encoded against the
//! previous block's tables and discarded if it loses to the fallback.

use oxizstd_core::{ErrorCode, Result, ZstdError};
use tracing::trace;

use crate::literals::{self, HufEntropy};
use crate::params::Strategy;
use crate::seq_store::{REP_NUM, REP_START, Repcodes, SeqSection, SeqStore};
use crate::sequences::{self, FseRepeat, SeqEntropy};
use crate::BlockType;

/// Size of a block header.
pub const BLOCK_HEADER_SIZE: usize = 3;

/// Compressed sizes below this are checked for a constant block.
const RLE_MAX_LENGTH: usize = 25;

/// Fewest sequences a partition must hold to be bisected further.
pub const MIN_SEQUENCES_BLOCK_SPLITTING: usize = 300;

/// Upper bound on partitions per block.
pub const MAX_NB_BLOCK_SPLITS: usize = 196;

/// Literal and sequence tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntropyTables {
    /// Literals.
    pub huf: HufEntropy,
    /// Sequences.
    pub fse: SeqEntropy,
}

/// State a block leaves behind for the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBlockState {
    /// Repeat offsets.
    pub rep: [u32; REP_NUM],
    /// Entropy tables.
    pub entropy: EntropyTables,
}

impl Default for CompressedBlockState {
    fn default() -> Self {
        Self {
            rep: REP_START,
            entropy: EntropyTables::default(),
        }
    }
}

/// Previous/next pair of [`CompressedBlockState`], swapped on success.
#[derive(Debug, Clone, Default)]
pub struct BlockState {
    slots: [CompressedBlockState; 2],
    prev: usize,
    lit_starts: Vec<usize>,
    splits: Vec<usize>,
}

impl BlockState {
    /// Fresh state: default repeat offsets, no reusable tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything carried from earlier blocks.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.rep = REP_START;
            slot.entropy.huf.repeat = Default::default();
            slot.entropy.fse.ll_repeat = FseRepeat::None;
            slot.entropy.fse.of_repeat = FseRepeat::None;
            slot.entropy.fse.ml_repeat = FseRepeat::None;
        }
    }

    /// Start from a digested dictionary's state.
    pub fn load(&mut self, state: &CompressedBlockState) {
        self.slots[self.prev].clone_from(state);
    }

    /// State of the last emitted block.
    pub fn prev(&self) -> &CompressedBlockState {
        &self.slots[self.prev]
    }

    /// Mutable state of the last emitted block.
    pub fn prev_mut(&mut self) -> &mut CompressedBlockState {
        &mut self.slots[self.prev]
    }

    fn pair_mut(&mut self) -> (&CompressedBlockState, &mut CompressedBlockState) {
        let [a, b] = &mut self.slots;
        if self.prev == 0 { (&*a, b) } else { (&*b, a) }
    }

    /// Promote the next state to previous.
    pub fn confirm(&mut self) {
        self.prev ^= 1;
    }

    /// A raw or RLE block leaves the decoder's offset table untouched but the
    /// encoder can no longer vouch for it.
    pub fn downgrade_offset_repeat(&mut self) {
        let fse = &mut self.slots[self.prev].entropy.fse;
        if fse.of_repeat == FseRepeat::Valid {
            fse.of_repeat = FseRepeat::Check;
        }
    }
}

/// Per-block encoding switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOptions {
    /// Active strategy.
    pub strategy: Strategy,
    /// Store literals raw.
    pub disable_literal_compression: bool,
    /// Try splitting blocks along sequence boundaries.
    pub split_blocks: bool,
}

/// Write a block header.
pub fn write_block_header(dst: &mut [u8], last: bool, block_type: BlockType, size: usize) -> Result<()> {
    if dst.len() < BLOCK_HEADER_SIZE {
        return Err(ZstdError::dst_size_too_small(BLOCK_HEADER_SIZE, dst.len()));
    }
    let header = last as u32 + ((block_type.bits() as u32) << 1) + ((size as u32) << 3);
    dst[..3].copy_from_slice(&header.to_le_bytes()[..3]);
    Ok(())
}

/// Emit `src` as a raw block. Returns bytes written.
pub fn write_raw_block(dst: &mut [u8], src: &[u8], last: bool) -> Result<usize> {
    let total = BLOCK_HEADER_SIZE + src.len();
    if dst.len() < total {
        return Err(ZstdError::dst_size_too_small(total, dst.len()));
    }
    write_block_header(dst, last, BlockType::Raw, src.len())?;
    dst[BLOCK_HEADER_SIZE..total].copy_from_slice(src);
    Ok(total)
}

/// Emit `size` copies of `byte` as an RLE block. Returns bytes written.
pub fn write_rle_block(dst: &mut [u8], byte: u8, size: usize, last: bool) -> Result<usize> {
    if dst.len() < BLOCK_HEADER_SIZE + 1 {
        return Err(ZstdError::dst_size_too_small(BLOCK_HEADER_SIZE + 1, dst.len()));
    }
    write_block_header(dst, last, BlockType::Rle, size)?;
    dst[BLOCK_HEADER_SIZE] = byte;
    Ok(BLOCK_HEADER_SIZE + 1)
}

/// Whether `src` is one repeated byte.
pub fn is_rle(src: &[u8]) -> bool {
    match src.first() {
        Some(&b) => src.iter().all(|&x| x == b),
        None => false,
    }
}

/// Bytes of source covered by a section: its literals plus its matches.
fn section_src_size(section: &SeqSection<'_>) -> usize {
    section.lits.len() + section.regenerated_size() - section.literal_size()
}

fn entropy_compress_internal(
    dst: &mut [u8],
    section: &SeqSection<'_>,
    prev: &EntropyTables,
    next: &mut EntropyTables,
    opts: BlockOptions,
) -> Result<usize> {
    let nb_seq = section.nb_seq();
    let mut op = literals::compress_literals(
        dst,
        section.lits,
        &prev.huf,
        &mut next.huf,
        opts.strategy,
        opts.disable_literal_compression,
    )?;

    if dst.len() - op < 3 + 1 {
        return Err(ZstdError::dst_size_too_small(op + 4, dst.len()));
    }
    op += sequences::write_nb_seq(&mut dst[op..], nb_seq)?;
    if nb_seq == 0 {
        next.fse.clone_from(&prev.fse);
        return Ok(op);
    }

    let seq_head = op;
    op += 1;
    let stats = sequences::build_sequences_statistics(
        &mut dst[op..],
        section,
        &prev.fse,
        &mut next.fse,
        opts.strategy,
    )?;
    dst[seq_head] = sequences::encoding_types_byte(&stats);
    op += stats.size;

    let available = dst.len() - op;
    let bitstream = sequences::encode_sequences(&mut dst[op..], &next.fse, section)
        .ok_or_else(|| ZstdError::dst_size_too_small(available + 1, available))?;
    // Old decoders reject a compressed table followed by a bitstream this short.
    if stats.last_count_size != 0 && stats.last_count_size + bitstream < 4 {
        return Ok(0);
    }
    Ok(op + bitstream)
}

/// Entropy-code `section` into `dst`. Returns 0 when a raw block would be
/// at least as small.
///
/// `next` receives the tables the block uses; it is only meaningful when
/// the result exceeds 1.
pub fn entropy_compress_section(
    dst: &mut [u8],
    section: &SeqSection<'_>,
    prev: &EntropyTables,
    next: &mut EntropyTables,
    opts: BlockOptions,
    src_size: usize,
) -> Result<usize> {
    let c_size = match entropy_compress_internal(dst, section, prev, next, opts) {
        Ok(size) => size,
        Err(e) if e.code() == ErrorCode::DstSizeTooSmall && src_size <= dst.len() => return Ok(0),
        Err(e) => return Err(e),
    };
    if c_size == 0 {
        return Ok(0);
    }
    let max_c_size = src_size.saturating_sub(literals::min_gain(src_size, opts.strategy));
    if c_size >= max_c_size {
        return Ok(0);
    }
    Ok(c_size)
}

/// Encode one block (or one partition of a block) and write it with its
/// header. Returns bytes written and whether the entropy state advanced.
fn emit_block(
    dst: &mut [u8],
    src: &[u8],
    section: &SeqSection<'_>,
    state: &mut BlockState,
    opts: BlockOptions,
    last: bool,
) -> Result<(usize, bool)> {
    if dst.len() < BLOCK_HEADER_SIZE {
        return Err(ZstdError::dst_size_too_small(BLOCK_HEADER_SIZE, dst.len()));
    }
    let (prev, next) = state.pair_mut();
    let mut c_size = entropy_compress_section(
        &mut dst[BLOCK_HEADER_SIZE..],
        section,
        &prev.entropy,
        &mut next.entropy,
        opts,
        src.len(),
    )?;
    if c_size < RLE_MAX_LENGTH && is_rle(src) {
        c_size = 1;
    }

    let result = match c_size {
        0 => {
            trace!(src_size = src.len(), last, "raw block");
            (write_raw_block(dst, src, last)?, false)
        }
        1 => {
            trace!(src_size = src.len(), last, "rle block");
            (write_rle_block(dst, src[0], src.len(), last)?, false)
        }
        _ => {
            state.confirm();
            write_block_header(dst, last, BlockType::Compressed, c_size)?;
            trace!(src_size = src.len(), c_size, last, "compressed block");
            (BLOCK_HEADER_SIZE + c_size, true)
        }
    };
    state.downgrade_offset_repeat();
    Ok(result)
}

/// Compress one block whose sequences the parser already stored.
///
/// `parser_reps` holds the repeat offsets after parsing. Returns bytes
/// written, block header included.
#[allow(clippy::too_many_arguments)]
pub fn compress_block(
    dst: &mut [u8],
    src: &[u8],
    store: &mut SeqStore<'_>,
    state: &mut BlockState,
    parser_reps: Repcodes,
    opts: BlockOptions,
    last: bool,
) -> Result<usize> {
    store.compute_codes();

    if opts.split_blocks && store.nb_seq() > 4 {
        derive_block_splits(store, state, opts);
        if !state.splits.is_empty() {
            return compress_partitions(dst, src, store, state, opts, last);
        }
    }

    state.pair_mut().1.rep = parser_reps.rep;
    let (written, _) = emit_block(dst, src, &store.full_section(), state, opts, last)?;
    Ok(written)
}

fn compress_partitions(
    dst: &mut [u8],
    src: &[u8],
    store: &mut SeqStore<'_>,
    state: &mut BlockState,
    opts: BlockOptions,
    last: bool,
) -> Result<usize> {
    let mut decoder_reps = Repcodes { rep: state.prev().rep };
    let mut parser_reps = decoder_reps;
    let boundaries: Vec<usize> = state
        .splits
        .iter()
        .copied()
        .chain(std::iter::once(store.nb_seq()))
        .collect();
    trace!(partitions = boundaries.len(), "splitting block");

    let mut written = 0usize;
    let mut src_pos = 0usize;
    let mut seq_start = 0usize;
    for (i, &seq_end) in boundaries.iter().enumerate() {
        let last_partition = i + 1 == boundaries.len();
        let decoder_before = decoder_reps;
        store.resolve_off_codes(seq_start..seq_end, &mut decoder_reps, &mut parser_reps);
        store.compute_codes_range(seq_start..seq_end);
        let lit_starts = std::mem::take(&mut state.lit_starts);
        let section = section_of(store, &lit_starts, seq_start, seq_end);

        let part_size = if last_partition {
            src.len() - src_pos
        } else {
            section_src_size(&section)
        };
        debug_assert_eq!(part_size, section_src_size(&section));
        let part = &src[src_pos..src_pos + part_size];

        let (n, advanced) = emit_block(
            &mut dst[written..],
            part,
            &section,
            state,
            opts,
            last && last_partition,
        )?;
        state.lit_starts = lit_starts;
        if !advanced {
            decoder_reps = decoder_before;
        }
        written += n;
        src_pos += part_size;
        seq_start = seq_end;
    }
    state.prev_mut().rep = decoder_reps.rep;
    Ok(written)
}

fn section_of<'x>(store: &'x SeqStore<'_>, lit_starts: &[usize], start: usize, end: usize) -> SeqSection<'x> {
    let lit_end = if end == store.nb_seq() {
        store.literals().len()
    } else {
        lit_starts[end]
    };
    store.section(start..end, lit_starts[start]..lit_end)
}

struct Splitter<'x, 's> {
    store: &'x SeqStore<'s>,
    lit_starts: &'x [usize],
    prev: &'x EntropyTables,
    opts: BlockOptions,
    splits: &'x mut Vec<usize>,
}

/// Estimated block size of `section` against `prev`, from symbol
/// statistics only. Never more than a raw block.
fn estimate_block_size(section: &SeqSection<'_>, prev: &EntropyTables, opts: BlockOptions) -> usize {
    let raw = section_src_size(section);
    let size = literals::estimate_literals_size(section.lits, &prev.huf, opts.disable_literal_compression)
        + sequences::estimate_sequences_size(section, &prev.fse);
    size.min(raw) + BLOCK_HEADER_SIZE
}

impl Splitter<'_, '_> {
    fn estimate(&self, start: usize, end: usize) -> usize {
        let section = section_of(self.store, self.lit_starts, start, end);
        estimate_block_size(&section, self.prev, self.opts)
    }

    fn bisect(&mut self, start: usize, end: usize) {
        if end - start < MIN_SEQUENCES_BLOCK_SPLITTING || self.splits.len() >= MAX_NB_BLOCK_SPLITS {
            return;
        }
        let mid = (start + end) / 2;
        let whole = self.estimate(start, end);
        let first = self.estimate(start, mid);
        let second = self.estimate(mid, end);
        trace!(start, end, whole, first, second, "split estimate");
        if first + second < whole {
            self.bisect(start, mid);
            self.splits.push(mid);
            self.bisect(mid, end);
        }
    }
}

/// Choose partition boundaries for the stored sequences. Leaves the
/// boundaries (excluding the end) in `state.splits`.
fn derive_block_splits(store: &SeqStore<'_>, state: &mut BlockState, opts: BlockOptions) {
    let nb_seq = store.nb_seq();
    state.lit_starts.clear();
    let mut pos = 0usize;
    for i in 0..nb_seq {
        state.lit_starts.push(pos);
        pos += store.seq(i).lit_length as usize;
    }
    state.lit_starts.push(pos);
    state.splits.clear();

    let prev = &state.slots[state.prev].entropy;
    let mut splitter = Splitter {
        store,
        lit_starts: &state.lit_starts,
        prev,
        opts,
        splits: &mut state.splits,
    };
    splitter.bisect(0, nb_seq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq_store::{offset_to_off_base, repcode_to_off_base};

    struct Buffers {
        lits: Vec<u8>,
        off: Vec<u32>,
        ll: Vec<u16>,
        ml: Vec<u16>,
        llc: Vec<u8>,
        ofc: Vec<u8>,
        mlc: Vec<u8>,
    }

    impl Buffers {
        fn new(max_seq: usize, max_lit: usize) -> Self {
            Self {
                lits: vec![0; max_lit],
                off: vec![0; max_seq],
                ll: vec![0; max_seq],
                ml: vec![0; max_seq],
                llc: vec![0; max_seq],
                ofc: vec![0; max_seq],
                mlc: vec![0; max_seq],
            }
        }

        fn store(&mut self) -> SeqStore<'_> {
            SeqStore::new(
                &mut self.lits,
                &mut self.off,
                &mut self.ll,
                &mut self.ml,
                &mut self.llc,
                &mut self.ofc,
                &mut self.mlc,
            )
        }
    }

    fn opts(split_blocks: bool) -> BlockOptions {
        BlockOptions {
            strategy: Strategy::Lazy2,
            disable_literal_compression: false,
            split_blocks,
        }
    }

    fn header(bytes: &[u8]) -> (bool, u8, usize) {
        let h = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
        (h & 1 == 1, ((h >> 1) & 3) as u8, (h >> 3) as usize)
    }

    #[test]
    fn test_block_header_layout() {
        let mut dst = [0u8; 3];
        write_block_header(&mut dst, true, BlockType::Compressed, 1000).unwrap();
        assert_eq!(header(&dst), (true, 2, 1000));
        assert!(write_block_header(&mut [0u8; 2], false, BlockType::Raw, 1).is_err());
    }

    #[test]
    fn test_is_rle() {
        assert!(is_rle(b"aaaa"));
        assert!(is_rle(b"z"));
        assert!(!is_rle(b"aaab"));
        assert!(!is_rle(b""));
    }

    #[test]
    fn test_state_swap() {
        let mut state = BlockState::new();
        state.pair_mut().1.rep = [9, 10, 11];
        assert_eq!(state.prev().rep, REP_START);
        state.confirm();
        assert_eq!(state.prev().rep, [9, 10, 11]);
        state.reset();
        assert_eq!(state.prev().rep, REP_START);
    }

    #[test]
    fn test_incompressible_becomes_raw() {
        let src: Vec<u8> = (0..200u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let mut bufs = Buffers::new(16, 256);
        let mut store = bufs.store();
        store.store_last_literals(&src);
        let mut state = BlockState::new();
        let mut dst = vec![0u8; 512];
        let n = compress_block(&mut dst, &src, &mut store, &mut state, Repcodes::default(), opts(false), true)
            .unwrap();
        assert_eq!(n, BLOCK_HEADER_SIZE + src.len());
        assert_eq!(header(&dst), (true, 0, src.len()));
        assert_eq!(&dst[3..n], &src[..]);
        assert_eq!(state.prev().rep, REP_START);
    }

    #[test]
    fn test_constant_block_becomes_rle() {
        let src = vec![7u8; 4096];
        let mut bufs = Buffers::new(16, 16);
        let mut store = bufs.store();
        store.store_seq(&src[..1], offset_to_off_base(1), src.len() - 1);
        let mut state = BlockState::new();
        let mut dst = vec![0u8; 64];
        let n = compress_block(&mut dst, &src, &mut store, &mut state, Repcodes::default(), opts(false), false)
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(header(&dst), (false, 1, 4096));
        assert_eq!(dst[3], 7);
    }

    #[test]
    fn test_compressed_block_confirms_state() {
        let pattern = b"the quick brown fox jumps over the lazy dog, ";
        let mut src = Vec::new();
        for i in 0..40 {
            src.extend_from_slice(pattern);
            src.push(b'0' + (i % 10) as u8);
        }
        let mut bufs = Buffers::new(64, src.len());
        let mut store = bufs.store();
        let step = pattern.len() + 1;
        store.store_seq(&src[..step], offset_to_off_base(step as u32), pattern.len());
        let mut reps = Repcodes::default();
        reps.update(offset_to_off_base(step as u32), false);
        let mut pos = step + pattern.len();
        while pos + step <= src.len() {
            store.store_seq(&src[pos..pos + 1], repcode_to_off_base(1), pattern.len());
            reps.update(repcode_to_off_base(1), false);
            pos += step;
        }
        store.store_last_literals(&src[pos..]);

        let mut state = BlockState::new();
        let mut dst = vec![0u8; src.len() + 64];
        let n = compress_block(&mut dst, &src, &mut store, &mut state, reps, opts(false), true)
            .unwrap();
        let (last, ty, size) = header(&dst);
        assert!(last);
        assert_eq!(ty, 2);
        assert_eq!(size + BLOCK_HEADER_SIZE, n);
        assert!(n < src.len() / 2);
        assert_eq!(state.prev().rep, reps.rep);
    }

    #[test]
    fn test_size_estimate_tracks_encoded_size() {
        let pattern = b"the quick brown fox jumps over the lazy dog, ";
        let mut src = Vec::new();
        for i in 0..40 {
            src.extend_from_slice(pattern);
            src.push(b'0' + (i % 10) as u8);
        }
        let mut bufs = Buffers::new(64, src.len());
        let mut store = bufs.store();
        let step = pattern.len() + 1;
        store.store_seq(&src[..step], offset_to_off_base(step as u32), pattern.len());
        let mut pos = step + pattern.len();
        while pos + step <= src.len() {
            store.store_seq(&src[pos..pos + 1], repcode_to_off_base(1), pattern.len());
            pos += step;
        }
        store.store_last_literals(&src[pos..]);
        store.compute_codes();

        let state = BlockState::new();
        let section = store.section(0..store.nb_seq(), 0..store.literals().len());
        let estimate = estimate_block_size(&section, &state.prev().entropy, opts(false));
        let raw = section_src_size(&section) + BLOCK_HEADER_SIZE;
        assert!(estimate < raw);

        let mut encoded = vec![0u8; src.len() + 64];
        let mut next = EntropyTables::default();
        let n = entropy_compress_internal(&mut encoded, &section, &state.prev().entropy, &mut next, opts(false))
            .unwrap()
            + BLOCK_HEADER_SIZE;
        assert!(estimate <= 2 * n && n <= 2 * estimate, "estimate {estimate} encoded {n}");
    }

    #[test]
    fn test_size_estimate_capped_at_raw() {
        let src: Vec<u8> = (0..300u32).map(|i| (i.wrapping_mul(2654435761) >> 11) as u8).collect();
        let mut bufs = Buffers::new(4, src.len());
        let mut store = bufs.store();
        store.store_last_literals(&src);
        store.compute_codes();
        let section = store.section(0..0, 0..src.len());
        let prev = EntropyTables::default();
        assert_eq!(estimate_block_size(&section, &prev, opts(false)), src.len() + BLOCK_HEADER_SIZE);

        let mut off = opts(false);
        off.disable_literal_compression = true;
        assert_eq!(estimate_block_size(&section, &prev, off), src.len() + BLOCK_HEADER_SIZE);
    }

    #[test]
    fn test_split_boundaries_are_ordered() {
        // Two halves with different literal statistics.
        let mut src: Vec<u8> = (0..32u8).collect();
        let mut bufs = Buffers::new(1024, 8192);
        let mut store = bufs.store();
        let mut reps = Repcodes::default();
        let mut seed = 1u32;
        let mut anchor = 0usize;
        for i in 0..800usize {
            let lit_len = if i < 400 { 2 } else { 9 };
            for _ in 0..lit_len {
                seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
                let b = if i < 400 { b'a' + (seed >> 28) as u8 } else { (seed >> 24) as u8 };
                src.push(b);
            }
            let lits = src[anchor..].to_vec();
            let offset = if i < 400 { 4 } else { 16 + (i as u32 % 7) };
            let ml = if i < 400 { 4 } else { 6 };
            for _ in 0..ml {
                let b = src[src.len() - offset as usize];
                src.push(b);
            }
            store.store_seq(&lits, offset_to_off_base(offset), ml);
            reps.update(offset_to_off_base(offset), false);
            anchor = src.len();
        }

        let mut state = BlockState::new();
        store.compute_codes();
        derive_block_splits(&store, &mut state, opts(true));
        assert!(state.splits.len() <= MAX_NB_BLOCK_SPLITS);
        assert!(state.splits.windows(2).all(|w| w[0] < w[1]));
        assert!(state.splits.iter().all(|&s| s > 0 && s < 800));

        let mut dst = vec![0u8; src.len() + 1024];
        let n = compress_block(&mut dst, &src, &mut store, &mut state, reps, opts(true), true).unwrap();
        // Every partition header chains up to the whole output.
        let mut pos = 0;
        let mut regenerated = 0;
        loop {
            let (last, ty, size) = header(&dst[pos..]);
            pos += BLOCK_HEADER_SIZE;
            match ty {
                0 => {
                    pos += size;
                    regenerated += size;
                }
                1 => {
                    pos += 1;
                    regenerated += size;
                }
                _ => pos += size,
            }
            if last {
                break;
            }
        }
        assert_eq!(pos, n);
        assert!(regenerated <= src.len());
    }
}

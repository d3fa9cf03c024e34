//! Greedy and lazy block parser.
//!
//! One loop serves every search structure: a [`MatchFinder`] supplies the
//! best candidate at a position, and the parser decides whether to take it
//! or to look one or two positions further (`DEPTH`). Repeat offsets are
//! tried first since they cost almost nothing to encode.
//!
//! The parser is monomorphized per finder, depth and dictionary mode, so
//! [`select`] hands back plain function pointers and no branch on those
//! choices survives in the inner loop.

use std::ops::Range;

use crate::fast::{SEARCH_STRENGTH, dict_pos, rep_index_valid};
use crate::hash::{count, count_2segments, highbit32, read32};
use crate::match_state::{BlockCompressor, DictMode, HASH_READ_SIZE, MatchCtx};
use crate::params::Strategy;
use crate::seq_store::{REP_NUM, SeqStore, off_base_is_repcode, repcode_to_off_base};
use crate::{bt, hc, row};

/// Local tables only.
pub(crate) const NO_DICT: u8 = 0;
/// Attached dictionary searched through its own tables.
pub(crate) const DICT_MATCH_STATE: u8 = 1;
/// Attached dictionary with a dedicated search index.
pub(crate) const DEDICATED_DICT_SEARCH: u8 = 2;

/// Above this step, finders insert a single position per update until the
/// next match is found.
const LAZY_SKIPPING_STEP: usize = 8;

/// Sentinel offset base: large enough that any real candidate wins the
/// first gain comparison.
pub(crate) const NO_OFF_BASE: u32 = 999_999_999;

/// A search structure the lazy parser can query.
pub trait MatchFinder {
    /// Longest match found at buffer position `ip`, as
    /// `(length, off_base)`. Inserts every position before `ip` into the
    /// tables first. `lazy_skipping` allows inserting only the latest.
    ///
    /// A length below 4 means nothing usable was found.
    fn find_best_match<const MODE: u8>(
        ctx: &mut MatchCtx<'_>,
        ip: usize,
        iend: usize,
        lazy_skipping: bool,
    ) -> (usize, u32);
}

/// Hash chains: one candidate list per hash bucket.
#[derive(Debug)]
pub struct HashChain;

/// Rows of 16 or 32 slots with one tag byte each.
#[derive(Debug)]
pub struct Row;

/// Binary trees sorted on suffix order.
#[derive(Debug)]
pub struct BinaryTree;

impl MatchFinder for HashChain {
    #[inline]
    fn find_best_match<const MODE: u8>(
        ctx: &mut MatchCtx<'_>,
        ip: usize,
        iend: usize,
        lazy_skipping: bool,
    ) -> (usize, u32) {
        hc::find_best_match::<MODE>(ctx, ip, iend, lazy_skipping)
    }
}

impl MatchFinder for Row {
    #[inline]
    fn find_best_match<const MODE: u8>(
        ctx: &mut MatchCtx<'_>,
        ip: usize,
        iend: usize,
        lazy_skipping: bool,
    ) -> (usize, u32) {
        row::find_best_match::<MODE>(ctx, ip, iend, lazy_skipping)
    }
}

impl MatchFinder for BinaryTree {
    #[inline]
    fn find_best_match<const MODE: u8>(
        ctx: &mut MatchCtx<'_>,
        ip: usize,
        iend: usize,
        _lazy_skipping: bool,
    ) -> (usize, u32) {
        bt::find_best_match::<MODE>(ctx, ip, iend)
    }
}

/// Block compressor for `strategy` using finder `M`.
pub fn select<M: MatchFinder>(strategy: Strategy, mode: DictMode) -> BlockCompressor {
    match (strategy.search_depth(), mode) {
        (0, DictMode::NoDict) => compress_block::<M, 0, NO_DICT>,
        (0, DictMode::DictMatchState) => compress_block::<M, 0, DICT_MATCH_STATE>,
        (0, DictMode::DedicatedDictSearch) => compress_block::<M, 0, DEDICATED_DICT_SEARCH>,
        (1, DictMode::NoDict) => compress_block::<M, 1, NO_DICT>,
        (1, DictMode::DictMatchState) => compress_block::<M, 1, DICT_MATCH_STATE>,
        (1, DictMode::DedicatedDictSearch) => compress_block::<M, 1, DEDICATED_DICT_SEARCH>,
        (_, DictMode::NoDict) => compress_block::<M, 2, NO_DICT>,
        (_, DictMode::DictMatchState) => compress_block::<M, 2, DICT_MATCH_STATE>,
        (_, DictMode::DedicatedDictSearch) => compress_block::<M, 2, DEDICATED_DICT_SEARCH>,
    }
}

#[inline]
fn gain(len: usize, off_base: u32, mul: i64) -> i64 {
    len as i64 * mul - highbit32(off_base) as i64
}

/// Length of the repeat match at `pos` with `offset`, 0 if there is none.
#[inline]
fn rep_match_length<const MODE: u8>(ctx: &MatchCtx<'_>, pos: usize, offset: u32, iend: usize) -> usize {
    if offset == 0 {
        return 0;
    }
    let src = ctx.src;
    if MODE == NO_DICT {
        let off = offset as usize;
        if off > pos || read32(src, pos - off) != read32(src, pos) {
            return 0;
        }
        return count(src, pos + 4, pos + 4 - off, iend) + 4;
    }
    let prefix_lowest_index = ctx.ms.window.dict_limit;
    let rep_index = ctx.index(pos).wrapping_sub(offset);
    if !rep_index_valid(prefix_lowest_index, rep_index) {
        return 0;
    }
    if rep_index < prefix_lowest_index {
        let Some(dict) = ctx.dict else { return 0 };
        let Some(m) = dict_pos(ctx, rep_index, ctx.dict_index_delta()) else {
            return 0;
        };
        if read32(dict.src, m) != read32(src, pos) {
            return 0;
        }
        let dict_end = dict.pos(dict.end_index());
        count_2segments(src, pos + 4, iend, dict.src, m + 4, dict_end, ctx.prefix_start()) + 4
    } else {
        let m = ctx.pos(rep_index);
        if read32(src, m) != read32(src, pos) {
            return 0;
        }
        count(src, pos + 4, m + 4, iend) + 4
    }
}

/// Extend a fresh match backwards over pending literals. Returns the new
/// start and length.
fn catch_up<const MODE: u8>(
    ctx: &MatchCtx<'_>,
    mut start: usize,
    mut len: usize,
    offset: u32,
    anchor: usize,
) -> (usize, usize) {
    let src = ctx.src;
    let prefix_lowest_index = ctx.ms.window.dict_limit;
    let prefix_lowest = ctx.prefix_start();
    let match_index = ctx.index(start).wrapping_sub(offset);
    if MODE != NO_DICT && match_index < prefix_lowest_index {
        let Some(dict) = ctx.dict else {
            return (start, len);
        };
        let mut m = dict.pos(match_index.wrapping_sub(ctx.dict_index_delta()));
        let m_low = dict.pos(dict.low_index());
        while start > anchor && m > m_low && src[start - 1] == dict.src[m - 1] {
            start -= 1;
            m -= 1;
            len += 1;
        }
    } else {
        let mut m = start - offset as usize;
        while start > anchor && m > prefix_lowest && src[start - 1] == src[m - 1] {
            start -= 1;
            m -= 1;
            len += 1;
        }
    }
    (start, len)
}

/// The parse loop. `DEPTH` is the lookahead: 0 greedy, 1 lazy, 2 lazy2.
fn compress_block<M: MatchFinder, const DEPTH: u32, const MODE: u8>(
    ctx: &mut MatchCtx<'_>,
    store: &mut SeqStore<'_>,
    rep: &mut [u32; REP_NUM],
    block: Range<usize>,
) -> usize {
    if MODE != NO_DICT && ctx.dict.is_none() {
        return compress_block::<M, DEPTH, NO_DICT>(ctx, store, rep, block);
    }
    let src = ctx.src;
    let (istart, iend) = (block.start, block.end);
    let mut anchor = istart;
    if iend - istart < HASH_READ_SIZE + 1 {
        return iend - anchor;
    }
    let ilimit = iend - HASH_READ_SIZE;
    let prefix_lowest = ctx.prefix_start();
    let dict_len = ctx.dict.map_or(0, |d| d.pos(d.end_index()) - d.pos(d.low_index()));
    let mut ip = istart;

    let (mut offset_1, mut offset_2) = (rep[0], rep[1]);
    let (mut saved_1, mut saved_2) = (0, 0);
    if MODE == NO_DICT {
        let curr = ctx.index(ip);
        let window_low = ctx.ms.window.lowest_match_index(curr, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
        let max_rep = curr - window_low;
        if offset_2 > max_rep {
            saved_2 = offset_2;
            offset_2 = 0;
        }
        if offset_1 > max_rep {
            saved_1 = offset_1;
            offset_1 = 0;
        }
    }
    // Nothing to reference at the very first byte.
    if ip - prefix_lowest + dict_len == 0 {
        ip += 1;
    }
    let mut lazy_skipping = false;

    while ip < ilimit {
        let mut match_length = rep_match_length::<MODE>(ctx, ip + 1, offset_1, iend);
        let mut off_base = repcode_to_off_base(1);
        let mut start = ip + 1;

        if DEPTH > 0 || match_length == 0 {
            let (ml, ob) = M::find_best_match::<MODE>(ctx, ip, iend, lazy_skipping);
            if ml > match_length {
                match_length = ml;
                off_base = ob;
                start = ip;
            }
            if match_length < 4 {
                let step = (ip - anchor) >> SEARCH_STRENGTH;
                ip += step + 1;
                lazy_skipping = step > LAZY_SKIPPING_STEP;
                continue;
            }

            if DEPTH >= 1 {
                while ip < ilimit {
                    ip += 1;
                    let ml_rep = rep_match_length::<MODE>(ctx, ip, offset_1, iend);
                    if ml_rep >= 4 && ml_rep as i64 * 3 > gain(match_length, off_base, 3) + 1 {
                        match_length = ml_rep;
                        off_base = repcode_to_off_base(1);
                        start = ip;
                    }
                    let (ml2, ob2) = M::find_best_match::<MODE>(ctx, ip, iend, false);
                    if ml2 >= 4 && gain(ml2, ob2, 4) > gain(match_length, off_base, 4) + 4 {
                        match_length = ml2;
                        off_base = ob2;
                        start = ip;
                        continue;
                    }

                    if DEPTH == 2 && ip < ilimit {
                        ip += 1;
                        let ml_rep = rep_match_length::<MODE>(ctx, ip, offset_1, iend);
                        if ml_rep >= 4 && ml_rep as i64 * 4 > gain(match_length, off_base, 4) + 1 {
                            match_length = ml_rep;
                            off_base = repcode_to_off_base(1);
                            start = ip;
                        }
                        let (ml2, ob2) = M::find_best_match::<MODE>(ctx, ip, iend, false);
                        if ml2 >= 4 && gain(ml2, ob2, 4) > gain(match_length, off_base, 4) + 7 {
                            match_length = ml2;
                            off_base = ob2;
                            start = ip;
                            continue;
                        }
                    }
                    break;
                }
            }

            if !off_base_is_repcode(off_base) {
                let offset = off_base - REP_NUM as u32;
                (start, match_length) = catch_up::<MODE>(ctx, start, match_length, offset, anchor);
                offset_2 = offset_1;
                offset_1 = offset;
            }
        }

        store.store_seq(&src[anchor..start], off_base, match_length);
        ip = start + match_length;
        anchor = ip;
        lazy_skipping = false;

        // Repeat offset 2 right after a match is cheap enough to take greedily.
        while ip <= ilimit {
            let rl = rep_match_length::<MODE>(ctx, ip, offset_2, iend);
            if rl == 0 {
                break;
            }
            std::mem::swap(&mut offset_1, &mut offset_2);
            store.store_seq(&[], repcode_to_off_base(1), rl);
            ip += rl;
            anchor = ip;
        }
    }

    if saved_1 != 0 && offset_1 != 0 {
        saved_2 = saved_1;
    }
    rep[0] = if offset_1 != 0 { offset_1 } else { saved_1 };
    rep[1] = if offset_2 != 0 { offset_2 } else { saved_2 };
    iend - anchor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_state::{MatchState, MatchTables, select_block_compressor};
    use crate::params::get_cparams;
    use crate::seq_store::{Repcodes, SeqDef};

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
        fn new(cap: usize) -> Self {
            Self {
                lits: vec![0; cap + 32],
                off: vec![0; cap],
                ll: vec![0; cap],
                ml: vec![0; cap],
                llc: vec![0; cap],
                ofc: vec![0; cap],
                mlc: vec![0; cap],
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

    /// Rebuild the block from the parsed sequences.
    fn replay(store: &SeqStore<'_>, history: &[u8], rep: [u32; 3], trailing: &[u8]) -> Vec<u8> {
        let mut out = history.to_vec();
        let mut reps = Repcodes { rep };
        let lits = store.literals();
        let mut lit_pos = 0;
        for i in 0..store.nb_seq() {
            let SeqDef {
                off_base,
                lit_length,
                match_length,
            } = store.seq(i);
            let (ll, ml) = (lit_length as usize, match_length as usize);
            out.extend_from_slice(&lits[lit_pos..lit_pos + ll]);
            lit_pos += ll;
            let offset = reps.resolve(off_base, ll == 0) as usize;
            reps.update(off_base, ll == 0);
            for _ in 0..ml {
                let b = out[out.len() - offset];
                out.push(b);
            }
        }
        out.extend_from_slice(trailing);
        out
    }

    fn parse(strategy: Strategy, use_row: bool, data: &[u8]) -> Vec<u8> {
        let mut cp = get_cparams(6, data.len() as u64, 0);
        cp.strategy = strategy;
        cp.search_log = 5;
        let mut ms = MatchState::new(cp, use_row, true, false);
        let mut hash = vec![0u32; ms.sizes.hash];
        let mut chain = vec![0u32; ms.sizes.chain];
        let mut hash3 = vec![0u32; ms.sizes.hash3];
        let mut tags = vec![0u8; ms.sizes.tags];
        ms.window.update(data.len());
        let mut bufs = Buffers::new(data.len());
        let mut store = bufs.store();
        let mut rep = [1, 4, 8];
        let compressor = select_block_compressor(strategy, use_row, DictMode::NoDict);
        let trailing = {
            let mut ctx = MatchCtx {
                src: data,
                ms: &mut ms,
                tables: MatchTables {
                    hash: &mut hash,
                    chain: &mut chain,
                    hash3: &mut hash3,
                    tags: &mut tags,
                },
                dict: None,
                opt: None,
            };
            compressor(&mut ctx, &mut store, &mut rep, 0..data.len())
        };
        assert!(store.nb_seq() > 0, "{strategy:?} found no match");
        replay(&store, &[], [1, 4, 8], &data[data.len() - trailing..])
    }

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..400u32 {
            data.extend_from_slice(format!("entry {} value {} ", i % 37, i % 11).as_bytes());
        }
        data
    }

    #[test]
    fn test_every_depth_reproduces_input() {
        let data = sample();
        for strategy in [Strategy::Greedy, Strategy::Lazy, Strategy::Lazy2, Strategy::BtLazy2] {
            assert_eq!(parse(strategy, false, &data), data, "{strategy:?}");
        }
        for strategy in [Strategy::Greedy, Strategy::Lazy2] {
            assert_eq!(parse(strategy, true, &data), data, "{strategy:?} row");
        }
    }

    #[test]
    fn test_tiny_block_is_all_literals() {
        let cp = get_cparams(5, 8, 0);
        let mut ms = MatchState::new(cp, false, true, false);
        let (mut hash, mut chain) = (vec![0u32; ms.sizes.hash], vec![0u32; ms.sizes.chain]);
        let data = b"abcdabcd";
        ms.window.update(data.len());
        let mut bufs = Buffers::new(16);
        let mut store = bufs.store();
        let mut ctx = MatchCtx {
            src: data,
            ms: &mut ms,
            tables: MatchTables {
                hash: &mut hash,
                chain: &mut chain,
                hash3: &mut [],
                tags: &mut [],
            },
            dict: None,
            opt: None,
        };
        let mut rep = [1, 4, 8];
        let left = select::<HashChain>(Strategy::Lazy, DictMode::NoDict)(&mut ctx, &mut store, &mut rep, 0..8);
        assert_eq!(left, 8);
        assert_eq!(store.nb_seq(), 0);
    }

    #[test]
    fn test_gain_prefers_closer_offsets() {
        assert!(gain(10, 4, 4) > gain(10, 1 << 20, 4));
        assert!(gain(12, 1 << 20, 4) > gain(10, 1 << 20, 4));
    }
}

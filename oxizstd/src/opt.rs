//! Optimal block parser for the `BtOpt`, `BtUltra` and `BtUltra2`
//! strategies.
//!
//! At each starting point the parser collects every match the binary tree
//! offers, then runs a forward pass over up to [`OPT_NUM`] positions that
//! prices literals and matches from adaptive symbol statistics. The
//! cheapest path is walked back and stored. Statistics carry over from
//! block to block within a frame and are rescaled at each block start.
//!
//! Statistics live in a workspace object; the match list and the price
//! table are aligned workspace buffers.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use tracing::trace;

use crate::block::EntropyTables;
use crate::bt;
use crate::hash::highbit32;
use crate::huffman::HufRepeat;
use crate::lazy::{DICT_MATCH_STATE, NO_DICT};
use crate::match_state::{BlockCompressor, DictMode, HASH_READ_SIZE, MatchCtx};
use crate::params::Strategy;
use crate::seq_store::{MINMATCH, REP_NUM, Repcodes, SeqStore};
use crate::sequences::{LL_BITS, MAX_LL, MAX_ML, MAX_OFF, ML_BITS, ll_code, ml_code};
use crate::BLOCKSIZE_MAX;

/// Positions covered by one forward pass.
pub const OPT_NUM: usize = 1 << 12;

/// Price table cells: a pass may store one sequence past its last position.
pub const OPT_NODES: usize = OPT_NUM + 3;

/// Match list cells.
pub const OPT_MATCHES: usize = OPT_NUM + 1;

const BITCOST_ACCURACY: u32 = 8;
const BITCOST_MULTIPLIER: u32 = 1 << BITCOST_ACCURACY;

/// Price of a position not reached yet.
const MAX_PRICE: i32 = 1 << 30;

/// Blocks this small are priced with fixed costs.
const PREDEF_THRESHOLD: usize = 8;

/// Weight added to a literal's count each time it is stored.
const LITFREQ_ADD: u32 = 2;

const BASE_LL_FREQS: [u32; MAX_LL as usize + 1] = [
    4, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1,
];

const BASE_OF_FREQS: [u32; MAX_OFF as usize + 1] = [
    6, 2, 1, 1, 2, 3, 4, 4, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

/// One match offered to the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MatchCandidate {
    /// Encoded offset.
    pub off_base: u32,
    /// Match length.
    pub len: u32,
}

/// Cheapest known way to reach one position of a forward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct OptNode {
    price: i32,
    off_base: u32,
    mlen: u32,
    litlen: u32,
    rep: [u32; REP_NUM],
}

impl OptNode {
    #[inline]
    fn total_len(&self) -> usize {
        (self.litlen + self.mlen) as usize
    }
}

/// Adaptive symbol statistics of the optimal parser.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct OptStats {
    lit_freq: [u32; 256],
    lit_length_freq: [u32; MAX_LL as usize + 1],
    match_length_freq: [u32; MAX_ML as usize + 1],
    off_code_freq: [u32; MAX_OFF as usize + 1],
    lit_sum: u32,
    lit_length_sum: u32,
    match_length_sum: u32,
    off_code_sum: u32,
    lit_sum_base_price: u32,
    lit_length_sum_base_price: u32,
    match_length_sum_base_price: u32,
    off_code_sum_base_price: u32,
    /// Non-zero while fixed prices are in use.
    predef: u32,
}

/// Bytes of the statistics object.
pub const OPT_STATS_BYTES: usize = std::mem::size_of::<OptStats>();

/// Cost of a symbol seen `stat` times, integer bits only.
#[inline]
fn bit_weight(stat: u32) -> u32 {
    highbit32(stat + 1) * BITCOST_MULTIPLIER
}

/// Cost of a symbol seen `stat` times, with a fractional part.
#[inline]
fn frac_weight(stat: u32) -> u32 {
    let stat = stat as u64 + 1;
    let hb = 63 - stat.leading_zeros();
    hb * BITCOST_MULTIPLIER + ((stat << BITCOST_ACCURACY) >> hb) as u32
}

#[inline]
fn weight(stat: u32, level: u32) -> u32 {
    if level > 0 { frac_weight(stat) } else { bit_weight(stat) }
}

/// Add `shift`-downscaled counts back, keeping every symbol at least at 1
/// when `keep_all` is set, or at least at 1 if it was seen otherwise.
fn downscale(table: &mut [u32], shift: u32, keep_all: bool) -> u32 {
    let mut sum = 0;
    for cell in table {
        let base = if keep_all { 1 } else { (*cell > 0) as u32 };
        *cell = base + (*cell >> shift);
        sum += *cell;
    }
    sum
}

/// Bring the total of `table` down to about `1 << log_target`.
fn scale(table: &mut [u32], log_target: u32) -> u32 {
    let prev: u32 = table.iter().sum();
    let factor = prev >> log_target;
    if factor <= 1 {
        return prev;
    }
    downscale(table, highbit32(factor), true)
}

/// Frequency seeded from a code of `bit_cost` bits, scaled to `1 << scale_log`.
#[inline]
fn freq_from_bits(bit_cost: u32, scale_log: u32) -> u32 {
    if bit_cost == 0 {
        1
    } else {
        1 << scale_log.saturating_sub(bit_cost)
    }
}

impl OptStats {
    /// Whether statistics were gathered in this frame yet.
    pub fn is_fresh(&self) -> bool {
        self.lit_length_sum == 0
    }

    /// Prepare statistics for a new block `src`.
    ///
    /// The first block of a frame starts from the dictionary's entropy
    /// tables when they cover every literal, otherwise from the block's own
    /// literal histogram. Later blocks keep what was learnt, scaled down.
    fn rescale(&mut self, src: &[u8], seed: Option<&EntropyTables>, compressed_literals: bool, level: u32) {
        self.predef = 0;
        if self.is_fresh() {
            if src.len() <= PREDEF_THRESHOLD {
                self.predef = 1;
            }
            match seed.filter(|e| e.huf.repeat == HufRepeat::Valid) {
                Some(entropy) => {
                    self.predef = 0;
                    if compressed_literals {
                        for (lit, freq) in self.lit_freq.iter_mut().enumerate() {
                            *freq = freq_from_bits(entropy.huf.table.nb_bits(lit as u8), 11);
                        }
                        self.lit_sum = self.lit_freq.iter().sum();
                    }
                    let fse = &entropy.fse;
                    for (ll, freq) in self.lit_length_freq.iter_mut().enumerate() {
                        *freq = freq_from_bits(fse.ll_table.max_nb_bits(ll), 10);
                    }
                    for (ml, freq) in self.match_length_freq.iter_mut().enumerate() {
                        *freq = freq_from_bits(fse.ml_table.max_nb_bits(ml), 10);
                    }
                    for (of, freq) in self.off_code_freq.iter_mut().enumerate() {
                        *freq = freq_from_bits(fse.of_table.max_nb_bits(of), 10);
                    }
                    self.lit_length_sum = self.lit_length_freq.iter().sum();
                    self.match_length_sum = self.match_length_freq.iter().sum();
                    self.off_code_sum = self.off_code_freq.iter().sum();
                }
                None => {
                    if compressed_literals {
                        self.lit_freq.fill(0);
                        for &b in src {
                            self.lit_freq[b as usize] += 1;
                        }
                        self.lit_sum = downscale(&mut self.lit_freq, 8, false);
                    }
                    self.lit_length_freq = BASE_LL_FREQS;
                    self.lit_length_sum = BASE_LL_FREQS.iter().sum();
                    self.match_length_freq.fill(1);
                    self.match_length_sum = MAX_ML + 1;
                    self.off_code_freq = BASE_OF_FREQS;
                    self.off_code_sum = BASE_OF_FREQS.iter().sum();
                }
            }
        } else {
            if compressed_literals {
                self.lit_sum = scale(&mut self.lit_freq, 12);
            }
            self.lit_length_sum = scale(&mut self.lit_length_freq, 11);
            self.match_length_sum = scale(&mut self.match_length_freq, 11);
            self.off_code_sum = scale(&mut self.off_code_freq, 11);
        }
        self.set_base_prices(compressed_literals, level);
    }

    fn set_base_prices(&mut self, compressed_literals: bool, level: u32) {
        if compressed_literals {
            self.lit_sum_base_price = weight(self.lit_sum, level);
        }
        self.lit_length_sum_base_price = weight(self.lit_length_sum, level);
        self.match_length_sum_base_price = weight(self.match_length_sum, level);
        self.off_code_sum_base_price = weight(self.off_code_sum, level);
    }

    /// Price of emitting `literals` as literals.
    fn raw_literals_cost(&self, literals: &[u8], compressed_literals: bool, level: u32) -> u32 {
        let n = literals.len() as u32;
        if n == 0 {
            return 0;
        }
        if !compressed_literals {
            return (n << 3) * BITCOST_MULTIPLIER;
        }
        if self.predef != 0 {
            return n * 6 * BITCOST_MULTIPLIER;
        }
        let price_max = self.lit_sum_base_price.saturating_sub(BITCOST_MULTIPLIER);
        literals.iter().fold(self.lit_sum_base_price * n, |price, &b| {
            price - weight(self.lit_freq[b as usize], level).min(price_max)
        })
    }

    /// Price of a literal length field.
    fn lit_length_price(&self, lit_length: u32, level: u32) -> u32 {
        if self.predef != 0 {
            return weight(lit_length, level);
        }
        // Not representable: a full block of literals costs one bit more.
        if lit_length as usize >= BLOCKSIZE_MAX {
            return BITCOST_MULTIPLIER + self.lit_length_price(BLOCKSIZE_MAX as u32 - 1, level);
        }
        let code = ll_code(lit_length) as usize;
        LL_BITS[code] as u32 * BITCOST_MULTIPLIER + self.lit_length_sum_base_price
            - weight(self.lit_length_freq[code], level)
    }

    /// Price of the offset and match length fields of a match.
    fn match_price(&self, off_base: u32, match_length: u32, level: u32) -> u32 {
        let off_code = highbit32(off_base);
        let ml_base = match_length - MINMATCH;
        if self.predef != 0 {
            return weight(ml_base, level) + (16 + off_code) * BITCOST_MULTIPLIER;
        }
        let mut price = off_code * BITCOST_MULTIPLIER + self.off_code_sum_base_price
            - weight(self.off_code_freq[off_code as usize], level);
        // Far offsets slow down decoding.
        if level < 2 && off_code >= 20 {
            price += (off_code - 19) * 2 * BITCOST_MULTIPLIER;
        }
        let ml = ml_code(ml_base) as usize;
        price += ML_BITS[ml] as u32 * BITCOST_MULTIPLIER + self.match_length_sum_base_price
            - weight(self.match_length_freq[ml], level);
        // Fewer sequences decode faster.
        price + BITCOST_MULTIPLIER / 5
    }

    /// Learn from one stored sequence.
    fn update(&mut self, literals: &[u8], off_base: u32, match_length: u32, compressed_literals: bool) {
        if compressed_literals {
            for &b in literals {
                self.lit_freq[b as usize] += LITFREQ_ADD;
            }
            self.lit_sum += literals.len() as u32 * LITFREQ_ADD;
        }
        self.lit_length_freq[ll_code(literals.len() as u32) as usize] += 1;
        self.lit_length_sum += 1;
        self.off_code_freq[highbit32(off_base) as usize] += 1;
        self.off_code_sum += 1;
        self.match_length_freq[ml_code(match_length - MINMATCH) as usize] += 1;
        self.match_length_sum += 1;
    }
}

/// Everything the optimal parser keeps besides the search tables.
#[derive(Debug)]
pub struct OptState<'a> {
    /// Symbol statistics, carried between blocks.
    pub stats: &'a mut OptStats,
    /// Matches found at one position.
    pub matches: &'a mut [MatchCandidate],
    /// Price table of one forward pass.
    pub nodes: &'a mut [OptNode],
    /// Entropy tables the frame starts from.
    pub seed: Option<&'a EntropyTables>,
    /// Whether literals will be Huffman-compressed.
    pub compressed_literals: bool,
}

/// Effort level of an optimal strategy: 0 prunes the search, 2 prices
/// with fractional bits.
fn opt_level(strategy: Strategy) -> u32 {
    match strategy {
        Strategy::BtOpt => 0,
        _ => 2,
    }
}

/// Block compressor for an optimal strategy.
pub fn select(strategy: Strategy, mode: DictMode) -> BlockCompressor {
    let dict = mode != DictMode::NoDict;
    match (opt_level(strategy), dict) {
        (0, false) => compress_block::<0, NO_DICT>,
        (0, true) => compress_block::<0, DICT_MATCH_STATE>,
        (_, false) if strategy == Strategy::BtUltra2 => compress_block_ultra2,
        (_, false) => compress_block::<2, NO_DICT>,
        (_, true) => compress_block::<2, DICT_MATCH_STATE>,
    }
}

fn compress_block<const LEVEL: u32, const MODE: u8>(
    ctx: &mut MatchCtx<'_>,
    store: &mut SeqStore<'_>,
    rep: &mut [u32; REP_NUM],
    block: Range<usize>,
) -> usize {
    if MODE != NO_DICT && ctx.dict.is_none() {
        return compress_block::<LEVEL, NO_DICT>(ctx, store, rep, block);
    }
    let Some(mut opt) = ctx.opt.take() else {
        debug_assert!(false, "optimal parser without its state");
        return block.end - block.start;
    };
    let last_lits = parse::<LEVEL, MODE>(ctx, &mut opt, store, rep, block);
    ctx.opt = Some(opt);
    last_lits
}

/// `BtUltra2`: the first block of a frame without history is parsed twice.
/// The first pass only seeds the statistics; its tables are then pushed
/// out of the window so the second pass starts clean.
fn compress_block_ultra2(
    ctx: &mut MatchCtx<'_>,
    store: &mut SeqStore<'_>,
    rep: &mut [u32; REP_NUM],
    block: Range<usize>,
) -> usize {
    let Some(mut opt) = ctx.opt.take() else {
        debug_assert!(false, "optimal parser without its state");
        return block.end - block.start;
    };
    let len = block.end - block.start;
    let window = ctx.ms.window;
    if opt.stats.is_fresh()
        && store.nb_seq() == 0
        && window.dict_limit == window.low_limit
        && ctx.index(block.start) == window.dict_limit
        && len > PREDEF_THRESHOLD
    {
        let mut scratch_rep = *rep;
        parse::<2, NO_DICT>(ctx, &mut opt, store, &mut scratch_rep, block.clone());
        store.reset();
        let shift = len as u32;
        let window = &mut ctx.ms.window;
        window.base += shift;
        window.dict_limit += shift;
        window.low_limit = window.dict_limit;
        window.next_src += shift;
        ctx.ms.next_to_update = window.dict_limit;
        trace!(len, "statistics seeded by a first pass");
    }
    let last_lits = parse::<2, NO_DICT>(ctx, &mut opt, store, rep, block);
    ctx.opt = Some(opt);
    last_lits
}

/// The parse loop. Returns the number of trailing literals.
fn parse<const LEVEL: u32, const MODE: u8>(
    ctx: &mut MatchCtx<'_>,
    opt: &mut OptState<'_>,
    store: &mut SeqStore<'_>,
    rep: &mut [u32; REP_NUM],
    block: Range<usize>,
) -> usize {
    let src = ctx.src;
    let (istart, iend) = (block.start, block.end);
    let mut anchor = istart;
    if iend - istart < HASH_READ_SIZE + 1 {
        return iend - anchor;
    }
    let ilimit = iend - HASH_READ_SIZE;
    let cp = ctx.ms.cparams;
    let sufficient_len = (cp.target_length as usize).min(OPT_NUM - 1);
    let min_match = if cp.min_match == 3 { 3 } else { 4 };
    let mut next_to_update3 = ctx.ms.next_to_update;
    let compressed = opt.compressed_literals;
    let stats = &mut *opt.stats;
    let matches = &mut *opt.matches;
    let nodes = &mut *opt.nodes;

    stats.rescale(&src[istart..iend], opt.seed, compressed, LEVEL);
    let mut ip = istart;
    if ip == ctx.prefix_start() {
        ip += 1;
    }

    while ip < ilimit {
        let litlen = (ip - anchor) as u32;
        let nb_matches =
            bt::get_all_matches::<MODE>(ctx, ip, iend, rep, litlen == 0, min_match, &mut next_to_update3, matches);
        if nb_matches == 0 {
            ip += 1;
            continue;
        }
        nodes[0] = OptNode {
            price: stats.lit_length_price(litlen, LEVEL) as i32,
            off_base: 0,
            mlen: 0,
            litlen,
            rep: *rep,
        };

        let (cur, last_seq) = 'forward: {
            let longest = matches[nb_matches - 1];
            // Long enough: no need to look further.
            if longest.len as usize > sufficient_len {
                break 'forward (
                    0,
                    OptNode {
                        litlen,
                        mlen: longest.len,
                        off_base: longest.off_base,
                        ..OptNode::default()
                    },
                );
            }

            let literals_price = nodes[0].price as u32 + stats.lit_length_price(0, LEVEL);
            let mut pos = 1;
            while pos < min_match {
                nodes[pos].price = MAX_PRICE;
                pos += 1;
            }
            for m in &matches[..nb_matches] {
                while pos <= m.len as usize {
                    let price = literals_price + stats.match_price(m.off_base, pos as u32, LEVEL);
                    nodes[pos] = OptNode {
                        price: price as i32,
                        off_base: m.off_base,
                        mlen: pos as u32,
                        litlen,
                        rep: nodes[pos].rep,
                    };
                    pos += 1;
                }
            }
            let mut last_pos = pos - 1;

            let mut cur = 1;
            while cur <= last_pos {
                let inr = ip + cur;

                // One more literal may be cheaper than what reached `cur`.
                let prev = nodes[cur - 1];
                let lit = if prev.mlen == 0 { prev.litlen + 1 } else { 1 };
                let price = prev.price
                    + stats.raw_literals_cost(&src[inr - 1..inr], compressed, LEVEL) as i32
                    + stats.lit_length_price(lit, LEVEL) as i32
                    - stats.lit_length_price(lit - 1, LEVEL) as i32;
                if price <= nodes[cur].price {
                    nodes[cur] = OptNode {
                        price,
                        off_base: 0,
                        mlen: 0,
                        litlen: lit,
                        rep: nodes[cur].rep,
                    };
                }

                // Repeat offsets in effect at `cur`.
                nodes[cur].rep = if nodes[cur].mlen != 0 {
                    let from = cur - nodes[cur].mlen as usize;
                    let mut reps = Repcodes { rep: nodes[from].rep };
                    reps.update(nodes[cur].off_base, nodes[cur].litlen == 0);
                    reps.rep
                } else {
                    nodes[cur - 1].rep
                };

                // The last match must start at least 8 bytes before the end.
                if inr > ilimit {
                    cur += 1;
                    continue;
                }
                if cur == last_pos {
                    break;
                }
                if LEVEL == 0 && nodes[cur + 1].price <= nodes[cur].price + (BITCOST_MULTIPLIER / 2) as i32 {
                    cur += 1;
                    continue;
                }

                let node = nodes[cur];
                let ll0 = node.mlen != 0;
                let litlen = if node.mlen == 0 { node.litlen } else { 0 };
                let base_price = node.price as u32 + stats.lit_length_price(0, LEVEL);
                let nb = bt::get_all_matches::<MODE>(ctx, inr, iend, &node.rep, ll0, min_match, &mut next_to_update3, matches);
                if nb == 0 {
                    cur += 1;
                    continue;
                }

                let longest = matches[nb - 1];
                if longest.len as usize > sufficient_len || cur + longest.len as usize >= OPT_NUM {
                    // Jump back over the literals preceding the match; a run
                    // that reaches the pass start restarts from position 0.
                    let back = if node.mlen == 0 { node.litlen as usize } else { 0 };
                    break 'forward (
                        cur.saturating_sub(back),
                        OptNode {
                            litlen,
                            mlen: longest.len,
                            off_base: longest.off_base,
                            ..OptNode::default()
                        },
                    );
                }

                for (i, m) in matches[..nb].iter().enumerate() {
                    let start_ml = if i > 0 { matches[i - 1].len + 1 } else { min_match as u32 };
                    let mut mlen = m.len;
                    while mlen >= start_ml {
                        let pos = cur + mlen as usize;
                        let price = base_price as i32 + stats.match_price(m.off_base, mlen, LEVEL) as i32;
                        if pos > last_pos || price < nodes[pos].price {
                            while last_pos < pos {
                                nodes[last_pos + 1].price = MAX_PRICE;
                                last_pos += 1;
                            }
                            nodes[pos] = OptNode {
                                price,
                                off_base: m.off_base,
                                mlen,
                                litlen,
                                rep: nodes[pos].rep,
                            };
                        } else if LEVEL == 0 {
                            break;
                        }
                        mlen -= 1;
                    }
                }
                cur += 1;
            }

            let last = nodes[last_pos];
            (last_pos.saturating_sub(last.total_len()), last)
        };

        // Repeat offsets after the chosen path.
        *rep = if last_seq.mlen != 0 {
            let mut reps = Repcodes { rep: nodes[cur].rep };
            reps.update(last_seq.off_base, last_seq.litlen == 0);
            reps.rep
        } else {
            nodes[cur].rep
        };

        // Walk the path backwards, packing it at the top of the table.
        let store_end = cur + 1;
        let mut store_start = store_end;
        let mut seq_pos = cur;
        nodes[store_end] = last_seq;
        while seq_pos > 0 {
            let back = nodes[seq_pos].total_len();
            store_start -= 1;
            nodes[store_start] = nodes[seq_pos];
            seq_pos = seq_pos.saturating_sub(back);
        }

        for node in &nodes[store_start..=store_end] {
            let llen = node.litlen as usize;
            if node.mlen == 0 {
                // Only literals: the next pass starts after them.
                ip = anchor + llen;
                continue;
            }
            let literals = &src[anchor..anchor + llen];
            stats.update(literals, node.off_base, node.mlen, compressed);
            store.store_seq(literals, node.off_base, node.mlen as usize);
            anchor += llen + node.mlen as usize;
            ip = anchor;
        }
        stats.set_base_prices(compressed, LEVEL);
    }

    iend - anchor
}

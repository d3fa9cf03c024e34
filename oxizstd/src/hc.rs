//! Hash-chain match finder.
//!
//! The hash table holds the newest position of each bucket and the chain
//! table links every position to the previous one with the same hash, in
//! a ring of `1 << chain_log` cells. A search walks the chain newest
//! first for at most `1 << search_log` candidates.

use crate::dds;
use crate::hash::{count, count_2segments, hash_ptr, read32};
use crate::lazy::{DEDICATED_DICT_SEARCH, DICT_MATCH_STATE, NO_OFF_BASE};
use crate::match_state::MatchCtx;
use crate::seq_store::offset_to_off_base;

/// Bytes hashed by the lazy finders for a given `min_match`.
#[inline]
pub(crate) fn search_mls(min_match: u32) -> u32 {
    min_match.clamp(4, 6)
}

fn insert(ctx: &mut MatchCtx<'_>, target: usize, mls: u32, lazy_skipping: bool) -> u32 {
    let h_bits = ctx.ms.cparams.hash_log;
    let chain_mask = (1u32 << ctx.ms.cparams.chain_log) - 1;
    let target_index = ctx.index(target);
    let mut idx = ctx.ms.next_to_update;
    while idx < target_index {
        let h = hash_ptr(ctx.src, ctx.pos(idx), h_bits, mls);
        ctx.tables.chain[(idx & chain_mask) as usize] = ctx.tables.hash[h];
        ctx.tables.hash[h] = idx;
        idx += 1;
        if lazy_skipping {
            break;
        }
    }
    ctx.ms.next_to_update = target_index;
    ctx.tables.hash[hash_ptr(ctx.src, target, h_bits, mls)]
}

/// Insert every position up to buffer position `target` and return the
/// newest candidate for `target` itself.
pub fn insert_and_find_first_index(ctx: &mut MatchCtx<'_>, target: usize) -> u32 {
    let mls = search_mls(ctx.ms.cparams.min_match);
    insert(ctx, target, mls, false)
}

/// Best match at `ip` as `(length, off_base)`, length 0 if under 4.
pub fn find_best_match<const MODE: u8>(
    ctx: &mut MatchCtx<'_>,
    ip: usize,
    iend: usize,
    lazy_skipping: bool,
) -> (usize, u32) {
    let cp = ctx.ms.cparams;
    let mls = search_mls(cp.min_match);
    let chain_size = 1u32 << cp.chain_log;
    let chain_mask = chain_size - 1;
    let curr = ctx.index(ip);
    let low_limit = ctx
        .ms
        .window
        .lowest_match_index(curr, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
    let min_chain = curr.saturating_sub(chain_size);
    let mut nb_attempts = 1u32 << cp.search_log;
    let mut ml = 3usize;
    let mut off_base = NO_OFF_BASE;

    let mut match_index = insert(ctx, ip, mls, lazy_skipping);
    let src = ctx.src;
    while match_index >= low_limit && nb_attempts > 0 {
        let m = ctx.pos(match_index);
        // Only a candidate agreeing on byte `ml` can beat the current best.
        if src[m + ml] == src[ip + ml] {
            let len = count(src, ip, m, iend);
            if len > ml {
                ml = len;
                off_base = offset_to_off_base(curr - match_index);
                if ip + len == iend {
                    break;
                }
            }
        }
        nb_attempts -= 1;
        if match_index <= min_chain {
            break;
        }
        match_index = ctx.tables.chain[(match_index & chain_mask) as usize];
    }

    if MODE == DEDICATED_DICT_SEARCH {
        ml = dds::search(ctx, ip, iend, nb_attempts, ml, &mut off_base);
    } else if MODE == DICT_MATCH_STATE {
        ml = search_dict(ctx, ip, iend, nb_attempts, ml, &mut off_base);
    }

    if ml < 4 { (0, NO_OFF_BASE) } else { (ml, off_base) }
}

/// Walk the attached dictionary's chains after the local ones.
fn search_dict(
    ctx: &MatchCtx<'_>,
    ip: usize,
    iend: usize,
    mut nb_attempts: u32,
    mut ml: usize,
    off_base: &mut u32,
) -> usize {
    let Some(dict) = ctx.dict else { return ml };
    let src = ctx.src;
    let curr = ctx.index(ip);
    let mls = search_mls(ctx.ms.cparams.min_match);
    let dict_chain_mask = (1u32 << dict.ms.cparams.chain_log) - 1;
    let dict_lowest = dict.low_index();
    let dict_end_index = dict.end_index();
    let dict_min_chain = dict_end_index.saturating_sub(dict_chain_mask + 1);
    let dict_end = dict.pos(dict_end_index);
    let delta = ctx.dict_index_delta();
    let prefix_start = ctx.prefix_start();

    let mut match_index = dict.tables.hash[hash_ptr(src, ip, dict.ms.cparams.hash_log, mls)];
    while match_index >= dict_lowest && nb_attempts > 0 {
        let m = dict.pos(match_index);
        if m + 4 <= dict_end && read32(dict.src, m) == read32(src, ip) {
            let len = count_2segments(src, ip + 4, iend, dict.src, m + 4, dict_end, prefix_start) + 4;
            if len > ml {
                ml = len;
                *off_base = offset_to_off_base(curr.wrapping_sub(match_index.wrapping_add(delta)));
                if ip + len == iend {
                    break;
                }
            }
        }
        nb_attempts -= 1;
        if match_index <= dict_min_chain {
            break;
        }
        match_index = dict
            .tables
            .chain
            .get((match_index & dict_chain_mask) as usize)
            .copied()
            .unwrap_or(0);
    }
    ml
}

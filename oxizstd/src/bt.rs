//! Binary-tree match finder.
//!
//! The chain table stores, for each position in a ring of
//! `1 << (chain_log - 1)` nodes, two links: the next smaller and the next
//! larger suffix in the same hash bucket. A search descends the tree
//! comparing suffixes and rewires it so the current position becomes the
//! new root.
//!
//! During compression, positions are first pushed unsorted onto their
//! bucket (the second link holds [`DUBT_UNSORTED_MARK`]) and only sorted
//! into the tree when a later search reaches them. Dictionaries are loaded
//! fully sorted, since they are searched many times.

use std::ops::ControlFlow;

use crate::fast::{dict_pos, rep_index_valid};
use crate::hash::{count, count_2segments, hash3, hash_ptr, highbit32, read32};
use crate::hc::search_mls;
use crate::lazy::{NO_DICT, NO_OFF_BASE};
use crate::opt::{MatchCandidate, OPT_NUM};
use crate::match_state::{DUBT_UNSORTED_MARK, DictMatchState, MatchCtx};
use crate::seq_store::{REP_NUM, offset_to_off_base, repcode_to_off_base};

/// Longest distance taken for a match found through the 3-byte table.
const HASH3_MAX_DISTANCE: u32 = 1 << 18;

#[inline]
fn bt_mask(chain_log: u32) -> u32 {
    (1u32 << (chain_log - 1)) - 1
}

/// Whether a gain in length is worth a change of offset.
#[inline]
fn better(len: usize, best: usize, distance: u32, off_base: u32) -> bool {
    4 * (len as i64 - best as i64) > highbit32(distance + 1) as i64 - highbit32(off_base) as i64
}

/// Insert `ip` into its sorted tree. Returns how many positions may be
/// skipped afterwards: long matches make the following positions
/// redundant.
fn insert_bt1(ctx: &mut MatchCtx<'_>, ip: usize, iend: usize, target: u32, mls: u32) -> u32 {
    let cp = ctx.ms.cparams;
    let mask = bt_mask(cp.chain_log);
    let src = ctx.src;
    let window = ctx.ms.window;
    let h = hash_ptr(src, ip, cp.hash_log, mls);
    let curr = window.index(ip);
    let bt_low = if mask >= curr { 0 } else { curr - mask };
    let window_low = window.lowest_match_index(target, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
    let mut match_end_idx = curr + 8 + 1;
    let mut best_length = 8usize;
    let mut nb_compares = 1u32 << cp.search_log;
    let (mut common_smaller, mut common_larger) = (0usize, 0usize);
    let mut smaller = Some(2 * (curr & mask) as usize);
    let mut larger = Some(2 * (curr & mask) as usize + 1);

    let mut match_index = ctx.tables.hash[h];
    ctx.tables.hash[h] = curr;
    let bt = &mut *ctx.tables.chain;

    while nb_compares > 0 && match_index >= window_low {
        let (Some(s), Some(l)) = (smaller, larger) else { break };
        let next = 2 * (match_index & mask) as usize;
        let m = window.pos(match_index);
        let mut ml = common_smaller.min(common_larger);
        ml += count(src, ip + ml, m + ml, iend);
        if ml > best_length {
            best_length = ml;
            if ml as u32 > match_end_idx - match_index {
                match_end_idx = match_index + ml as u32;
            }
        }
        // Equal up to the end: the order is unknown, so stop here.
        if ip + ml == iend {
            break;
        }
        if src[m + ml] < src[ip + ml] {
            bt[s] = match_index;
            common_smaller = ml;
            if match_index <= bt_low {
                smaller = None;
                break;
            }
            smaller = Some(next + 1);
            match_index = bt[next + 1];
        } else {
            bt[l] = match_index;
            common_larger = ml;
            if match_index <= bt_low {
                larger = None;
                break;
            }
            larger = Some(next);
            match_index = bt[next];
        }
        nb_compares -= 1;
    }
    if let Some(s) = smaller {
        bt[s] = 0;
    }
    if let Some(l) = larger {
        bt[l] = 0;
    }

    let positions = if best_length > 384 { (best_length as u32 - 384).min(192) } else { 0 };
    positions.max(match_end_idx - (curr + 8))
}

/// Insert every position below buffer position `target` into the sorted
/// trees, comparing up to `end`.
pub fn update_tree(ctx: &mut MatchCtx<'_>, target: usize, end: usize) {
    let mls = search_mls(ctx.ms.cparams.min_match);
    let target = ctx.index(target);
    let mut idx = ctx.ms.next_to_update;
    while idx < target {
        let ip = ctx.pos(idx);
        idx += insert_bt1(ctx, ip, end, target, mls);
    }
    ctx.ms.next_to_update = target;
}

/// Push pending positions onto their buckets, unsorted.
fn update_dubt(ctx: &mut MatchCtx<'_>, ip: usize, mls: u32) {
    let cp = ctx.ms.cparams;
    let mask = bt_mask(cp.chain_log);
    let target = ctx.index(ip);
    for idx in ctx.ms.next_to_update..target {
        let h = hash_ptr(ctx.src, ctx.pos(idx), cp.hash_log, mls);
        let node = 2 * (idx & mask) as usize;
        ctx.tables.chain[node] = ctx.tables.hash[h];
        ctx.tables.chain[node + 1] = DUBT_UNSORTED_MARK;
        ctx.tables.hash[h] = idx;
    }
    ctx.ms.next_to_update = target;
}

/// Sort the unsorted node `curr` into the tree below it.
fn insert_dubt1(ctx: &mut MatchCtx<'_>, curr: u32, iend: usize, mut nb_compares: u32, bt_low: u32) {
    let cp = ctx.ms.cparams;
    let mask = bt_mask(cp.chain_log);
    let src = ctx.src;
    let window = ctx.ms.window;
    let ip = window.pos(curr);
    let max_distance = ctx.ms.max_distance();
    let window_low = if curr - window.low_limit > max_distance {
        curr - max_distance
    } else {
        window.low_limit
    };
    let bt = &mut *ctx.tables.chain;
    let (mut common_smaller, mut common_larger) = (0usize, 0usize);
    let mut smaller = Some(2 * (curr & mask) as usize);
    let mut larger = Some(2 * (curr & mask) as usize + 1);
    // The first link of an unsorted node leads to the next sorted one.
    let mut match_index = bt[2 * (curr & mask) as usize];

    while nb_compares > 0 && match_index > window_low {
        let (Some(s), Some(l)) = (smaller, larger) else { break };
        let next = 2 * (match_index & mask) as usize;
        let m = window.pos(match_index);
        let mut ml = common_smaller.min(common_larger);
        ml += count(src, ip + ml, m + ml, iend);
        if ip + ml == iend {
            break;
        }
        if src[m + ml] < src[ip + ml] {
            bt[s] = match_index;
            common_smaller = ml;
            if match_index <= bt_low {
                smaller = None;
                break;
            }
            smaller = Some(next + 1);
            match_index = bt[next + 1];
        } else {
            bt[l] = match_index;
            common_larger = ml;
            if match_index <= bt_low {
                larger = None;
                break;
            }
            larger = Some(next);
            match_index = bt[next];
        }
        nb_compares -= 1;
    }
    if let Some(s) = smaller {
        bt[s] = 0;
    }
    if let Some(l) = larger {
        bt[l] = 0;
    }
}

/// Best match at `ip` as `(length, off_base)`, length 0 if under 4.
pub fn find_best_match<const MODE: u8>(ctx: &mut MatchCtx<'_>, ip: usize, iend: usize) -> (usize, u32) {
    let curr = ctx.index(ip);
    // Covered by a previous long match.
    if curr < ctx.ms.next_to_update {
        return (0, NO_OFF_BASE);
    }
    let cp = ctx.ms.cparams;
    let mls = search_mls(cp.min_match);
    update_dubt(ctx, ip, mls);

    let mask = bt_mask(cp.chain_log);
    let src = ctx.src;
    let window = ctx.ms.window;
    let h = hash_ptr(src, ip, cp.hash_log, mls);
    let window_low = window.lowest_match_index(curr, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
    let bt_low = if mask >= curr { 0 } else { curr - mask };
    let unsort_limit = bt_low.max(window_low);
    let mut nb_compares = 1u32 << cp.search_log;
    let mut nb_candidates = nb_compares;

    // Walk the unsorted run, reversing it through the mark cells.
    let mut match_index = ctx.tables.hash[h];
    let mut previous = 0u32;
    {
        let bt = &mut *ctx.tables.chain;
        while match_index > unsort_limit
            && bt[2 * (match_index & mask) as usize + 1] == DUBT_UNSORTED_MARK
            && nb_candidates > 1
        {
            let node = 2 * (match_index & mask) as usize;
            bt[node + 1] = previous;
            previous = match_index;
            match_index = bt[node];
            nb_candidates -= 1;
        }
        // Out of budget: drop the last unsorted node rather than sort it.
        if match_index > unsort_limit && bt[2 * (match_index & mask) as usize + 1] == DUBT_UNSORTED_MARK {
            let node = 2 * (match_index & mask) as usize;
            bt[node] = 0;
            bt[node + 1] = 0;
        }
    }
    // Sort the stacked nodes, oldest first.
    match_index = previous;
    while match_index != 0 {
        let next = ctx.tables.chain[2 * (match_index & mask) as usize + 1];
        insert_dubt1(ctx, match_index, iend, nb_candidates, unsort_limit);
        match_index = next;
        nb_candidates += 1;
    }

    let mut best_length = 0usize;
    let mut off_base = NO_OFF_BASE;
    let mut match_end_idx = curr + 8 + 1;
    {
        let bt = &mut *ctx.tables.chain;
        let (mut common_smaller, mut common_larger) = (0usize, 0usize);
        let mut smaller = Some(2 * (curr & mask) as usize);
        let mut larger = Some(2 * (curr & mask) as usize + 1);
        match_index = ctx.tables.hash[h];
        ctx.tables.hash[h] = curr;

        while nb_compares > 0 && match_index > window_low {
            let (Some(s), Some(l)) = (smaller, larger) else { break };
            let next = 2 * (match_index & mask) as usize;
            let m = window.pos(match_index);
            let mut ml = common_smaller.min(common_larger);
            ml += count(src, ip + ml, m + ml, iend);
            if ml > best_length {
                if ml as u32 > match_end_idx - match_index {
                    match_end_idx = match_index + ml as u32;
                }
                if better(ml, best_length, curr - match_index, off_base) {
                    best_length = ml;
                    off_base = offset_to_off_base(curr - match_index);
                }
                if ip + ml == iend {
                    if MODE != NO_DICT {
                        nb_compares = 0;
                    }
                    break;
                }
            }
            if src[m + ml] < src[ip + ml] {
                bt[s] = match_index;
                common_smaller = ml;
                if match_index <= bt_low {
                    smaller = None;
                    break;
                }
                smaller = Some(next + 1);
                match_index = bt[next + 1];
            } else {
                bt[l] = match_index;
                common_larger = ml;
                if match_index <= bt_low {
                    larger = None;
                    break;
                }
                larger = Some(next);
                match_index = bt[next];
            }
            nb_compares -= 1;
        }
        if let Some(s) = smaller {
            bt[s] = 0;
        }
        if let Some(l) = larger {
            bt[l] = 0;
        }
    }

    if ctx.ms.hash_log3 > 0 && !ctx.tables.hash3.is_empty() {
        let h3 = hash3(src, ip, ctx.ms.hash_log3);
        let m3 = ctx.tables.hash3[h3];
        ctx.tables.hash3[h3] = curr;
        if m3 >= window_low && m3 < curr && curr - m3 < HASH3_MAX_DISTANCE {
            let len = count(src, ip, window.pos(m3), iend);
            if len > best_length && better(len, best_length, curr - m3, off_base) {
                best_length = len;
                off_base = offset_to_off_base(curr - m3);
            }
        }
    }

    if MODE != NO_DICT && nb_compares > 0 {
        if let Some(dict) = ctx.dict {
            best_length = search_dict(ctx, &dict, ip, iend, best_length, nb_compares, mls, |ml, distance, best| {
                if better(ml, best, distance, off_base) {
                    off_base = offset_to_off_base(distance);
                    ControlFlow::Continue(ml)
                } else {
                    ControlFlow::Continue(best)
                }
            });
        }
    }

    ctx.ms.next_to_update = match_end_idx - 8;
    if best_length < 4 { (0, NO_OFF_BASE) } else { (best_length, off_base) }
}

/// First `len` bytes (3 or 4) at `pos`, for a quick equality test.
#[inline]
fn read_min_match(src: &[u8], pos: usize, len: usize) -> u32 {
    if len == 3 { read32(src, pos) << 8 } else { read32(src, pos) }
}

/// Collect every useful match at `ip` into `matches`, shortest first, each
/// strictly longer than the one before and than `length_to_beat - 1`.
/// Returns how many were found.
///
/// Repeat offsets (`rep`, shifted when `ll0`) are tried first, then the
/// 3-byte table when the minimum match is 3, then the sorted tree and the
/// dictionary's tree. Stops early on a match longer than the target
/// length. `next3` tracks the 3-byte table's insertion point.
#[allow(clippy::too_many_arguments)]
pub fn get_all_matches<const MODE: u8>(
    ctx: &mut MatchCtx<'_>,
    ip: usize,
    iend: usize,
    rep: &[u32; REP_NUM],
    ll0: bool,
    length_to_beat: usize,
    next3: &mut u32,
    matches: &mut [MatchCandidate],
) -> usize {
    let curr = ctx.index(ip);
    // Covered by a previous long match.
    if curr < ctx.ms.next_to_update {
        return 0;
    }
    update_tree(ctx, ip, iend);

    let cp = ctx.ms.cparams;
    let mls = search_mls(cp.min_match);
    let min_match = if cp.min_match == 3 { 3 } else { 4 };
    let sufficient_len = (cp.target_length as usize).min(OPT_NUM - 1);
    let mask = bt_mask(cp.chain_log);
    let src = ctx.src;
    let window = ctx.ms.window;
    let dict_limit = window.dict_limit;
    let window_low = window.lowest_match_index(curr, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
    let match_low = window_low.max(1);
    let bt_low = if mask >= curr { 0 } else { curr - mask };
    let delta = ctx.dict_index_delta();
    let mut best_length = length_to_beat - 1;
    let mut nb = 0usize;

    let ll0 = ll0 as u32;
    for rep_code in ll0..REP_NUM as u32 + ll0 {
        let rep_offset = if rep_code == REP_NUM as u32 {
            rep[0].wrapping_sub(1)
        } else {
            rep[rep_code as usize]
        };
        let rep_index = curr.wrapping_sub(rep_offset);
        let mut rep_len = 0;
        if rep_offset.wrapping_sub(1) < curr - dict_limit {
            let m = window.pos(rep_index);
            if rep_index >= window_low && read_min_match(src, ip, min_match) == read_min_match(src, m, min_match) {
                rep_len = count(src, ip + min_match, m + min_match, iend) + min_match;
            }
        } else if MODE != NO_DICT {
            if let Some(dict) = ctx.dict {
                let in_dict = rep_offset.wrapping_sub(1) < curr.wrapping_sub(dict.low_index().wrapping_add(delta));
                if in_dict && rep_index_valid(dict_limit, rep_index) {
                    if let Some(m) = dict_pos(ctx, rep_index, delta) {
                        if read_min_match(dict.src, m, min_match) == read_min_match(src, ip, min_match) {
                            let dict_end = dict.pos(dict.end_index());
                            rep_len = count_2segments(
                                src,
                                ip + min_match,
                                iend,
                                dict.src,
                                m + min_match,
                                dict_end,
                                ctx.prefix_start(),
                            ) + min_match;
                        }
                    }
                }
            }
        }
        if rep_len > best_length {
            best_length = rep_len;
            matches[nb] = MatchCandidate {
                off_base: repcode_to_off_base(rep_code - ll0 + 1),
                len: rep_len as u32,
            };
            nb += 1;
            if rep_len > sufficient_len || ip + rep_len == iend {
                return nb;
            }
        }
    }

    if min_match == 3 && best_length < 3 && !ctx.tables.hash3.is_empty() {
        let h_bits = ctx.ms.hash_log3;
        let mut idx = *next3;
        while idx < curr {
            ctx.tables.hash3[hash3(src, window.pos(idx), h_bits)] = idx;
            idx += 1;
        }
        *next3 = curr.max(*next3);
        let m3 = ctx.tables.hash3[hash3(src, ip, h_bits)];
        if m3 >= match_low && m3 < curr && curr - m3 < HASH3_MAX_DISTANCE {
            let len = count(src, ip, window.pos(m3), iend);
            if len >= 3 {
                best_length = len;
                matches[0] = MatchCandidate {
                    off_base: offset_to_off_base(curr - m3),
                    len: len as u32,
                };
                nb = 1;
                if len > sufficient_len || ip + len == iend {
                    ctx.ms.next_to_update = curr + 1;
                    return 1;
                }
            }
        }
    }

    let h = hash_ptr(src, ip, cp.hash_log, mls);
    let mut match_index = ctx.tables.hash[h];
    ctx.tables.hash[h] = curr;
    let mut nb_compares = 1u32 << cp.search_log;
    let mut match_end_idx = curr + 8 + 1;
    {
        let bt = &mut *ctx.tables.chain;
        let (mut common_smaller, mut common_larger) = (0usize, 0usize);
        let mut smaller = Some(2 * (curr & mask) as usize);
        let mut larger = Some(2 * (curr & mask) as usize + 1);

        while nb_compares > 0 && match_index >= match_low {
            let (Some(s), Some(l)) = (smaller, larger) else { break };
            nb_compares -= 1;
            let next = 2 * (match_index & mask) as usize;
            let m = window.pos(match_index);
            let mut ml = common_smaller.min(common_larger);
            ml += count(src, ip + ml, m + ml, iend);
            if ml > best_length {
                if ml as u32 > match_end_idx - match_index {
                    match_end_idx = match_index + ml as u32;
                }
                best_length = ml;
                matches[nb] = MatchCandidate {
                    off_base: offset_to_off_base(curr - match_index),
                    len: ml as u32,
                };
                nb += 1;
                if ml > OPT_NUM || ip + ml == iend {
                    if MODE != NO_DICT {
                        nb_compares = 0;
                    }
                    break;
                }
            }
            if src[m + ml] < src[ip + ml] {
                bt[s] = match_index;
                common_smaller = ml;
                if match_index <= bt_low {
                    smaller = None;
                    break;
                }
                smaller = Some(next + 1);
                match_index = bt[next + 1];
            } else {
                bt[l] = match_index;
                common_larger = ml;
                if match_index <= bt_low {
                    larger = None;
                    break;
                }
                larger = Some(next);
                match_index = bt[next];
            }
        }
        if let Some(s) = smaller {
            bt[s] = 0;
        }
        if let Some(l) = larger {
            bt[l] = 0;
        }
    }

    if MODE != NO_DICT && nb_compares > 0 {
        if let Some(dict) = ctx.dict {
            search_dict(ctx, &dict, ip, iend, best_length, nb_compares, mls, |ml, distance, _| {
                let match_index = curr.wrapping_sub(distance);
                if ml as u32 > match_end_idx.wrapping_sub(match_index) {
                    match_end_idx = match_index.wrapping_add(ml as u32);
                }
                matches[nb] = MatchCandidate {
                    off_base: offset_to_off_base(distance),
                    len: ml as u32,
                };
                nb += 1;
                if ml > OPT_NUM { ControlFlow::Break(ml) } else { ControlFlow::Continue(ml) }
            });
        }
    }

    ctx.ms.next_to_update = match_end_idx - 8;
    nb
}

/// Descend the dictionary's sorted tree. Every candidate longer than
/// `best_length` goes to `visit(length, distance, best_length)`, which
/// answers with the length to beat from then on. The tree is read-only
/// here.
#[allow(clippy::too_many_arguments)]
fn search_dict(
    ctx: &MatchCtx<'_>,
    dict: &DictMatchState<'_>,
    ip: usize,
    iend: usize,
    mut best_length: usize,
    mut nb_compares: u32,
    mls: u32,
    mut visit: impl FnMut(usize, u32, usize) -> ControlFlow<usize, usize>,
) -> usize {
    let src = ctx.src;
    let curr = ctx.index(ip);
    let prefix_start = ctx.prefix_start();
    let delta = ctx.dict_index_delta();
    let dict_high = dict.end_index();
    let dict_low = dict.low_index();
    let dict_end = dict.pos(dict_high);
    let mask = bt_mask(dict.ms.cparams.chain_log);
    let bt_low = if mask >= dict_high - dict_low { dict_low } else { dict_high - mask };
    let bt = dict.tables.chain;
    let (mut common_smaller, mut common_larger) = (0usize, 0usize);

    // Byte `k` of a match starting at dictionary position `m`, continuing
    // into the prefix past the dictionary end.
    let match_byte = |m: usize, k: usize| -> u8 {
        if m + k < dict_end {
            dict.src[m + k]
        } else {
            src[prefix_start + (m + k - dict_end)]
        }
    };

    let mut dict_index = dict.tables.hash[hash_ptr(src, ip, dict.ms.cparams.hash_log, mls)];
    while nb_compares > 0 && dict_index > dict_low {
        let next = 2 * (dict_index & mask) as usize;
        if next + 1 >= bt.len() {
            break;
        }
        let m = dict.pos(dict_index);
        let mut ml = common_smaller.min(common_larger);
        ml += if m + ml < dict_end {
            count_2segments(src, ip + ml, iend, dict.src, m + ml, dict_end, prefix_start)
        } else {
            count(src, ip + ml, prefix_start + (m + ml - dict_end), iend)
        };
        if ml > best_length {
            let distance = curr.wrapping_sub(dict_index.wrapping_add(delta));
            best_length = match visit(ml, distance, best_length) {
                ControlFlow::Continue(best) => best,
                ControlFlow::Break(best) => return best,
            };
            if ip + ml == iend {
                break;
            }
        }
        if dict_index <= bt_low {
            break;
        }
        if match_byte(m, ml) < src[ip + ml] {
            common_smaller = ml;
            dict_index = bt[next + 1];
        } else {
            common_larger = ml;
            dict_index = bt[next];
        }
        nb_compares -= 1;
    }
    best_length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_state::{MatchState, MatchTables};
    use crate::params::{Strategy, get_cparams};

    fn text() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..300u32 {
            data.extend_from_slice(format!("k{:03}=v{:03};", i % 50, (i * 7) % 13).as_bytes());
        }
        data
    }

    fn state(len: usize) -> MatchState {
        let mut cp = get_cparams(13, len as u64, 0);
        cp.strategy = Strategy::BtLazy2;
        // Enough nodes that the ring never wraps in these tests.
        cp.chain_log = 13;
        cp.hash_log = 12;
        cp.search_log = 5;
        let mut ms = MatchState::new(cp, false, true, false);
        ms.window.update(len);
        ms
    }

    /// Every node reachable from a bucket root must be older than the root.
    fn check_tree(chain: &[u32], root: u32, mask: u32, depth: usize) {
        if root <= DUBT_UNSORTED_MARK || depth > 64 {
            return;
        }
        let node = 2 * (root & mask) as usize;
        for child in [chain[node], chain[node + 1]] {
            if child > DUBT_UNSORTED_MARK {
                assert!(child < root, "child {child} not older than {root}");
                check_tree(chain, child, mask, depth + 1);
            }
        }
    }

    #[test]
    fn test_sorted_insert_keeps_tree_ordered() {
        let data = text();
        let mut ms = state(data.len());
        let mut hash = vec![0u32; ms.sizes.hash];
        let mut chain = vec![0u32; ms.sizes.chain];
        let mask = bt_mask(ms.cparams.chain_log);
        {
            let mut ctx = MatchCtx {
                src: &data,
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
            update_tree(&mut ctx, data.len() - 8, data.len());
            assert_eq!(ctx.ms.next_to_update, ctx.index(data.len() - 8));
        }
        for &root in hash.iter().filter(|&&r| r != 0) {
            check_tree(&chain, root, mask, 0);
        }
    }

    #[test]
    fn test_lazy_sort_finds_long_match() {
        let mut data = text();
        let needle = data[120..200].to_vec();
        data.extend_from_slice(b"####");
        let at = data.len();
        data.extend_from_slice(&needle);
        data.extend_from_slice(b"!!!!!!!!!!!!!!!!");
        let mut ms = state(data.len());
        let mut hash = vec![0u32; ms.sizes.hash];
        let mut chain = vec![0u32; ms.sizes.chain];
        let mut ctx = MatchCtx {
            src: &data,
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
        let (len, off_base) = find_best_match::<NO_DICT>(&mut ctx, at, data.len());
        assert!(len >= 80, "len {len}");
        let offset = (off_base - 3) as usize;
        assert_eq!(&data[at - offset..at - offset + len], &data[at..at + len]);
        // Positions inside the match are skipped by the next search.
        assert!(ctx.ms.next_to_update > ctx.index(at));
    }
}

//! Dedicated dictionary search.
//!
//! A dictionary that will be attached many times can afford a search
//! structure tuned for lookups alone. The hash table is split into buckets
//! of [`BUCKET_SIZE`] cells: the first cells cache the newest positions of
//! the bucket, the last one packs a pointer into a compacted chain table
//! as `start << 8 | length`. Once built, the index is never mutated.

use crate::hash::{count_2segments, hash_ptr, read32};
use crate::hc::search_mls;
use crate::match_state::MatchCtx;
use crate::seq_store::offset_to_off_base;

/// Log2 of the cells per bucket.
pub const BUCKET_LOG: u32 = 2;

const BUCKET_SIZE: usize = 1 << BUCKET_LOG;
const CACHE_SIZE: usize = BUCKET_SIZE - 1;

/// Build the index over the dictionary content up to buffer position
/// `target`. The tables must be clean.
///
/// The hash table is `BUCKET_SIZE` times larger than the bucket count, so
/// the spare room first serves as a scratch chain table.
pub fn build(ctx: &mut MatchCtx<'_>, target: usize) {
    let cp = ctx.ms.cparams;
    let target = ctx.index(target);
    let start = ctx.ms.next_to_update;
    let chain_size = 1u32 << cp.chain_log;
    let min_chain = if chain_size < target - start { target - chain_size } else { start };
    let chain_limit = (1u32 << cp.search_log).saturating_sub(CACHE_SIZE as u32).min(255) as usize;
    let hash_log = cp.hash_log - BUCKET_LOG;
    let nb_buckets = 1usize << hash_log;
    let mls = search_mls(cp.min_match);
    let tmp_chain_size = (CACHE_SIZE as u32) << hash_log;
    let tmp_min_chain = if tmp_chain_size < target { target - tmp_chain_size } else { start };
    let hash = &mut *ctx.tables.hash;
    let chain = &mut *ctx.tables.chain;
    let window = ctx.ms.window;
    let src = ctx.src;

    // Plain hash chains, kept in the upper part of the hash table.
    for idx in start..target {
        let h = hash_ptr(src, window.pos(idx), hash_log, mls);
        if idx >= tmp_min_chain {
            hash[nb_buckets + (idx - tmp_min_chain) as usize] = hash[h];
        }
        hash[h] = idx;
    }
    let tmp_next = |hash: &[u32], i: u32| hash[nb_buckets + (i - tmp_min_chain) as usize];

    // Compact every chain past the cached entries into the chain table.
    let mut chain_pos = 0usize;
    for bucket in 0..nb_buckets {
        let mut cached = 0;
        let mut beyond_min_chain = 0;
        let mut i = hash[bucket];
        while i >= tmp_min_chain && cached < CACHE_SIZE {
            if i < min_chain {
                beyond_min_chain += 1;
            }
            i = tmp_next(hash, i);
            cached += 1;
        }
        let mut len = 0usize;
        if cached == CACHE_SIZE {
            while len < chain_limit && chain_pos < chain.len() {
                if i < min_chain {
                    beyond_min_chain += 1;
                    if i == 0 || beyond_min_chain > CACHE_SIZE {
                        break;
                    }
                }
                chain[chain_pos] = i;
                chain_pos += 1;
                len += 1;
                if i < tmp_min_chain {
                    break;
                }
                i = tmp_next(hash, i);
            }
        }
        hash[bucket] = if len > 0 { (((chain_pos - len) << 8) + len) as u32 } else { 0 };
    }

    // Spread the packed pointers to the last cell of each bucket, top down
    // so no pointer is overwritten before it moves.
    for bucket in (0..nb_buckets).rev() {
        let packed = hash[bucket];
        let cells = bucket << BUCKET_LOG;
        hash[cells..cells + CACHE_SIZE].fill(0);
        hash[cells + BUCKET_SIZE - 1] = packed;
    }

    for idx in start..target {
        let cells = hash_ptr(src, window.pos(idx), hash_log, mls) << BUCKET_LOG;
        hash.copy_within(cells..cells + CACHE_SIZE - 1, cells + 1);
        hash[cells] = idx;
    }
    ctx.ms.next_to_update = target;
}

/// Search the attached index after the local tables. `ml` is the best
/// length so far; returns the new best and updates `off_base` when a
/// longer match turns up.
pub fn search(
    ctx: &MatchCtx<'_>,
    ip: usize,
    iend: usize,
    nb_attempts: u32,
    mut ml: usize,
    off_base: &mut u32,
) -> usize {
    let Some(dict) = ctx.dict else { return ml };
    let src = ctx.src;
    let curr = ctx.index(ip);
    let delta = ctx.dict_index_delta();
    let dict_end = dict.pos(dict.end_index());
    let prefix_start = ctx.prefix_start();
    let hash_log = dict.ms.cparams.hash_log - BUCKET_LOG;
    let cells = hash_ptr(src, ip, hash_log, search_mls(ctx.ms.cparams.min_match)) << BUCKET_LOG;
    let table = dict.tables.hash;

    // Returns true once the match reaches the end of input.
    let mut consider = |match_index: u32, ml: &mut usize| -> bool {
        let m = dict.pos(match_index);
        if m + 4 > dict_end || read32(dict.src, m) != read32(src, ip) {
            return false;
        }
        let len = count_2segments(src, ip + 4, iend, dict.src, m + 4, dict_end, prefix_start) + 4;
        if len > *ml {
            *ml = len;
            *off_base = offset_to_off_base(curr.wrapping_sub(match_index.wrapping_add(delta)));
            return ip + len == iend;
        }
        false
    };

    let bucket_limit = (nb_attempts as usize).min(CACHE_SIZE);
    for attempt in 0..bucket_limit {
        let match_index = table[cells + attempt];
        if match_index == 0 || consider(match_index, &mut ml) {
            return ml;
        }
    }

    let packed = table[cells + BUCKET_SIZE - 1];
    let chain_start = (packed >> 8) as usize;
    let chain_len = (packed & 0xFF) as usize;
    let chain_limit = (nb_attempts as usize - bucket_limit).min(chain_len);
    for &match_index in dict.tables.chain.iter().skip(chain_start).take(chain_limit) {
        if consider(match_index, &mut ml) {
            break;
        }
    }
    ml
}

//! Single-hash-table block compressor.
//!
//! One table indexed by a hash of `min_match` bytes, one candidate per
//! position. Positions without a match are skipped with a step that grows
//! with the distance to the last match, which keeps incompressible input
//! cheap.

use std::ops::Range;

use crate::hash::{count, count_2segments, hash_ptr, read32};
use crate::match_state::{HASH_READ_SIZE, MatchCtx};
use crate::seq_store::{REP_NUM, SeqStore, offset_to_off_base, repcode_to_off_base};

/// Skip strength: the step grows by one every `1 << SEARCH_STRENGTH`
/// literals without a match.
pub const SEARCH_STRENGTH: u32 = 8;

/// Positions inserted per step when loading a dictionary.
const HASH_FILL_STEP: usize = 3;

/// Insert history up to buffer position `end`. `full` also fills empty
/// cells for the positions between steps.
pub fn fill_hash_table(ctx: &mut MatchCtx<'_>, end: usize, full: bool) {
    let h_bits = ctx.ms.cparams.hash_log;
    let mls = ctx.ms.cparams.min_match;
    let iend = end - HASH_READ_SIZE;
    let mut ip = ctx.pos(ctx.ms.next_to_update);
    while ip + HASH_FILL_STEP < iend + 2 {
        let curr = ctx.index(ip);
        let h = hash_ptr(ctx.src, ip, h_bits, mls);
        ctx.tables.hash[h] = curr;
        if full {
            for p in 1..HASH_FILL_STEP {
                let h = hash_ptr(ctx.src, ip + p, h_bits, mls);
                if ctx.tables.hash[h] == 0 {
                    ctx.tables.hash[h] = curr + p as u32;
                }
            }
        }
        ip += HASH_FILL_STEP;
    }
}

fn step_size(ctx: &MatchCtx<'_>) -> usize {
    ctx.ms.cparams.target_length.max(1) as usize
}

/// Drop repeat offsets that reach before `lowest` at block start. Returns
/// the saved value to restore if the block never uses them.
fn sanitize_reps(curr: u32, lowest: u32, offset_1: &mut u32, offset_2: &mut u32) -> u32 {
    let max_rep = curr - lowest;
    let mut saved = 0;
    if *offset_2 > max_rep {
        saved = *offset_2;
        *offset_2 = 0;
    }
    if *offset_1 > max_rep {
        saved = *offset_1;
        *offset_1 = 0;
    }
    saved
}

/// Compress a block against local history only.
pub fn compress_block(
    ctx: &mut MatchCtx<'_>,
    store: &mut SeqStore<'_>,
    rep: &mut [u32; REP_NUM],
    block: Range<usize>,
) -> usize {
    let h_bits = ctx.ms.cparams.hash_log;
    let mls = ctx.ms.cparams.min_match;
    let step = step_size(ctx);
    let src = ctx.src;
    let (istart, iend) = (block.start, block.end);
    let end_index = ctx.index(iend);
    let prefix_start_index =
        ctx.ms.window.lowest_match_index(end_index, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
    let prefix_start = ctx.pos(prefix_start_index);
    let mut anchor = istart;
    if iend - istart < HASH_READ_SIZE + 1 {
        return iend - anchor;
    }
    let ilimit = iend - HASH_READ_SIZE;
    let mut ip = istart + (istart == prefix_start) as usize;

    let (mut offset_1, mut offset_2) = (rep[0], rep[1]);
    let offset_saved = sanitize_reps(ctx.index(ip), prefix_start_index, &mut offset_1, &mut offset_2);

    while ip < ilimit {
        let h = hash_ptr(src, ip, h_bits, mls);
        let curr = ctx.index(ip);
        let match_index = ctx.tables.hash[h];
        ctx.tables.hash[h] = curr;

        let m_length;
        if offset_1 > 0 && read32(src, ip + 1 - offset_1 as usize) == read32(src, ip + 1) {
            m_length = count(src, ip + 5, ip + 5 - offset_1 as usize, iend) + 4;
            ip += 1;
            store.store_seq(&src[anchor..ip], repcode_to_off_base(1), m_length);
        } else if match_index <= prefix_start_index || read32(src, ctx.pos(match_index)) != read32(src, ip) {
            ip += ((ip - anchor) >> SEARCH_STRENGTH) + step;
            continue;
        } else {
            let mut m = ctx.pos(match_index);
            let offset = (ip - m) as u32;
            let mut len = count(src, ip + 4, m + 4, iend) + 4;
            while ip > anchor && m > prefix_start && src[ip - 1] == src[m - 1] {
                ip -= 1;
                m -= 1;
                len += 1;
            }
            m_length = len;
            offset_2 = offset_1;
            offset_1 = offset;
            store.store_seq(&src[anchor..ip], offset_to_off_base(offset), m_length);
        }

        ip += m_length;
        anchor = ip;
        if ip <= ilimit {
            let fill = ctx.pos(curr + 2);
            ctx.tables.hash[hash_ptr(src, fill, h_bits, mls)] = curr + 2;
            ctx.tables.hash[hash_ptr(src, ip - 2, h_bits, mls)] = ctx.index(ip - 2);
            while ip <= ilimit && offset_2 > 0 && read32(src, ip) == read32(src, ip - offset_2 as usize) {
                let rl = count(src, ip + 4, ip + 4 - offset_2 as usize, iend) + 4;
                std::mem::swap(&mut offset_1, &mut offset_2);
                ctx.tables.hash[hash_ptr(src, ip, h_bits, mls)] = ctx.index(ip);
                store.store_seq(&[], repcode_to_off_base(1), rl);
                ip += rl;
                anchor = ip;
            }
        }
    }

    rep[0] = if offset_1 != 0 { offset_1 } else { offset_saved };
    rep[1] = if offset_2 != 0 { offset_2 } else { offset_saved };
    iend - anchor
}

/// Resolve an index below the prefix into a dictionary position, if the
/// dictionary holds at least 4 bytes there.
#[inline]
pub(crate) fn dict_pos(ctx: &MatchCtx<'_>, index: u32, delta: u32) -> Option<usize> {
    let dict = ctx.dict.as_ref()?;
    let d = index.wrapping_sub(delta);
    if d < dict.low_index() || d.wrapping_add(4) > dict.end_index() {
        return None;
    }
    Some(dict.pos(d))
}

/// Whether a repeat candidate at `rep_index` can be compared: inside the
/// prefix, or inside the dictionary without straddling its end.
#[inline]
pub(crate) fn rep_index_valid(prefix_start_index: u32, rep_index: u32) -> bool {
    prefix_start_index.wrapping_sub(1).wrapping_sub(rep_index) >= 3
}

/// Compress a block with an attached dictionary.
pub fn compress_block_dict_match_state(
    ctx: &mut MatchCtx<'_>,
    store: &mut SeqStore<'_>,
    rep: &mut [u32; REP_NUM],
    block: Range<usize>,
) -> usize {
    let Some(dict) = ctx.dict else {
        return compress_block(ctx, store, rep, block);
    };
    let h_bits = ctx.ms.cparams.hash_log;
    let mls = ctx.ms.cparams.min_match;
    let dict_h_bits = dict.ms.cparams.hash_log;
    let dict_mls = dict.ms.cparams.min_match;
    let step = step_size(ctx);
    let src = ctx.src;
    let dsrc = dict.src;
    let (istart, iend) = (block.start, block.end);
    let prefix_start_index = ctx.ms.window.dict_limit;
    let prefix_start = ctx.pos(prefix_start_index);
    let delta = ctx.dict_index_delta();
    let dict_start_index = dict.low_index();
    let dict_start = dict.pos(dict_start_index);
    let dict_end = dict.pos(dict.end_index());
    let mut anchor = istart;
    if iend - istart < HASH_READ_SIZE + 1 {
        return iend - anchor;
    }
    let ilimit = iend - HASH_READ_SIZE;
    let mut ip = istart + (istart == prefix_start && dict_end == dict_start) as usize;
    let (mut offset_1, mut offset_2) = (rep[0], rep[1]);

    while ip < ilimit {
        let h = hash_ptr(src, ip, h_bits, mls);
        let curr = ctx.index(ip);
        let match_index = ctx.tables.hash[h];
        ctx.tables.hash[h] = curr;
        let rep_index = (curr + 1).wrapping_sub(offset_1);

        let m_length;
        let rep_hit = if offset_1 == 0 || !rep_index_valid(prefix_start_index, rep_index) {
            None
        } else if rep_index < prefix_start_index {
            dict_pos(ctx, rep_index, delta)
                .filter(|&m| read32(dsrc, m) == read32(src, ip + 1))
                .map(|m| count_2segments(src, ip + 5, iend, dsrc, m + 4, dict_end, prefix_start) + 4)
        } else {
            let m = ctx.pos(rep_index);
            (read32(src, m) == read32(src, ip + 1)).then(|| count(src, ip + 5, m + 4, iend) + 4)
        };

        if let Some(len) = rep_hit {
            m_length = len;
            ip += 1;
            store.store_seq(&src[anchor..ip], repcode_to_off_base(1), m_length);
        } else if match_index <= prefix_start_index {
            let dict_h = hash_ptr(src, ip, dict_h_bits, dict_mls);
            let dict_match_index = dict.tables.hash[dict_h];
            let candidate = (dict_match_index > dict_start_index)
                .then(|| dict.pos(dict_match_index))
                .filter(|&m| read32(dsrc, m) == read32(src, ip));
            let Some(mut m) = candidate else {
                ip += ((ip - anchor) >> SEARCH_STRENGTH) + step;
                continue;
            };
            let offset = curr - dict_match_index - delta;
            let mut len = count_2segments(src, ip + 4, iend, dsrc, m + 4, dict_end, prefix_start) + 4;
            while ip > anchor && m > dict_start && src[ip - 1] == dsrc[m - 1] {
                ip -= 1;
                m -= 1;
                len += 1;
            }
            m_length = len;
            offset_2 = offset_1;
            offset_1 = offset;
            store.store_seq(&src[anchor..ip], offset_to_off_base(offset), m_length);
        } else if read32(src, ctx.pos(match_index)) != read32(src, ip) {
            ip += ((ip - anchor) >> SEARCH_STRENGTH) + step;
            continue;
        } else {
            let mut m = ctx.pos(match_index);
            let offset = (ip - m) as u32;
            let mut len = count(src, ip + 4, m + 4, iend) + 4;
            while ip > anchor && m > prefix_start && src[ip - 1] == src[m - 1] {
                ip -= 1;
                m -= 1;
                len += 1;
            }
            m_length = len;
            offset_2 = offset_1;
            offset_1 = offset;
            store.store_seq(&src[anchor..ip], offset_to_off_base(offset), m_length);
        }

        ip += m_length;
        anchor = ip;
        if ip <= ilimit {
            let fill = ctx.pos(curr + 2);
            ctx.tables.hash[hash_ptr(src, fill, h_bits, mls)] = curr + 2;
            ctx.tables.hash[hash_ptr(src, ip - 2, h_bits, mls)] = ctx.index(ip - 2);
            while ip <= ilimit && offset_2 > 0 {
                let current2 = ctx.index(ip);
                let rep_index2 = current2.wrapping_sub(offset_2);
                if !rep_index_valid(prefix_start_index, rep_index2) {
                    break;
                }
                let rl = if rep_index2 < prefix_start_index {
                    dict_pos(ctx, rep_index2, delta)
                        .filter(|&m| read32(dsrc, m) == read32(src, ip))
                        .map(|m| count_2segments(src, ip + 4, iend, dsrc, m + 4, dict_end, prefix_start) + 4)
                } else {
                    let m = ctx.pos(rep_index2);
                    (read32(src, m) == read32(src, ip)).then(|| count(src, ip + 4, m + 4, iend) + 4)
                };
                let Some(rl) = rl else { break };
                std::mem::swap(&mut offset_1, &mut offset_2);
                store.store_seq(&[], repcode_to_off_base(1), rl);
                ctx.tables.hash[hash_ptr(src, ip, h_bits, mls)] = current2;
                ip += rl;
                anchor = ip;
            }
        }
    }

    rep[0] = offset_1;
    rep[1] = offset_2;
    iend - anchor
}

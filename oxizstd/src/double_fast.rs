//! Two-table block compressor.
//!
//! A long table hashes 8 bytes (it lives in the main hash table) and a
//! short table hashes `min_match` bytes (it lives in the chain table).
//! Long matches are preferred; a short hit triggers one more long lookup
//! at the next position before it is accepted.

use std::ops::Range;

use crate::fast::{SEARCH_STRENGTH, dict_pos, rep_index_valid};
use crate::hash::{count, count_2segments, hash_ptr, read32, read64};
use crate::match_state::{HASH_READ_SIZE, MatchCtx};
use crate::seq_store::{REP_NUM, SeqStore, offset_to_off_base, repcode_to_off_base};

const HASH_FILL_STEP: usize = 3;

/// Insert history up to buffer position `end` into both tables.
pub fn fill_double_hash_table(ctx: &mut MatchCtx<'_>, end: usize, full: bool) {
    let h_bits_l = ctx.ms.cparams.hash_log;
    let h_bits_s = ctx.ms.cparams.chain_log;
    let mls = ctx.ms.cparams.min_match;
    let iend = end - HASH_READ_SIZE;
    let mut ip = ctx.pos(ctx.ms.next_to_update);
    while ip + HASH_FILL_STEP - 1 <= iend {
        let curr = ctx.index(ip);
        for i in 0..HASH_FILL_STEP {
            let sm = hash_ptr(ctx.src, ip + i, h_bits_s, mls);
            let lg = hash_ptr(ctx.src, ip + i, h_bits_l, 8);
            if i == 0 {
                ctx.tables.chain[sm] = curr;
            }
            if i == 0 || ctx.tables.hash[lg] == 0 {
                ctx.tables.hash[lg] = curr + i as u32;
            }
            if !full {
                break;
            }
        }
        ip += HASH_FILL_STEP;
    }
}

/// Insert the positions around a freshly stored match.
fn fill_after_match(ctx: &mut MatchCtx<'_>, curr: u32, ip: usize) {
    let h_bits_l = ctx.ms.cparams.hash_log;
    let h_bits_s = ctx.ms.cparams.chain_log;
    let mls = ctx.ms.cparams.min_match;
    let src = ctx.src;
    let insert = curr + 2;
    let ins_pos = ctx.pos(insert);
    ctx.tables.hash[hash_ptr(src, ins_pos, h_bits_l, 8)] = insert;
    ctx.tables.hash[hash_ptr(src, ip - 2, h_bits_l, 8)] = ctx.index(ip - 2);
    ctx.tables.chain[hash_ptr(src, ins_pos, h_bits_s, mls)] = insert;
    ctx.tables.chain[hash_ptr(src, ip - 1, h_bits_s, mls)] = ctx.index(ip - 1);
}

fn insert_both(ctx: &mut MatchCtx<'_>, ip: usize) {
    let h_bits_l = ctx.ms.cparams.hash_log;
    let h_bits_s = ctx.ms.cparams.chain_log;
    let mls = ctx.ms.cparams.min_match;
    let idx = ctx.index(ip);
    ctx.tables.chain[hash_ptr(ctx.src, ip, h_bits_s, mls)] = idx;
    ctx.tables.hash[hash_ptr(ctx.src, ip, h_bits_l, 8)] = idx;
}

/// Compress a block against local history only.
pub fn compress_block(
    ctx: &mut MatchCtx<'_>,
    store: &mut SeqStore<'_>,
    rep: &mut [u32; REP_NUM],
    block: Range<usize>,
) -> usize {
    let h_bits_l = ctx.ms.cparams.hash_log;
    let h_bits_s = ctx.ms.cparams.chain_log;
    let mls = ctx.ms.cparams.min_match;
    let src = ctx.src;
    let (istart, iend) = (block.start, block.end);
    let end_index = ctx.index(iend);
    let prefix_lowest_index =
        ctx.ms.window.lowest_match_index(end_index, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
    let prefix_lowest = ctx.pos(prefix_lowest_index);
    let mut anchor = istart;
    if iend - istart < HASH_READ_SIZE + 1 {
        return iend - anchor;
    }
    let ilimit = iend - HASH_READ_SIZE;
    let mut ip = istart + (istart == prefix_lowest) as usize;

    let (mut offset_1, mut offset_2) = (rep[0], rep[1]);
    let mut offset_saved = 0;
    {
        let max_rep = ctx.index(ip) - prefix_lowest_index;
        if offset_2 > max_rep {
            offset_saved = offset_2;
            offset_2 = 0;
        }
        if offset_1 > max_rep {
            offset_saved = offset_1;
            offset_1 = 0;
        }
    }

    while ip < ilimit {
        let h2 = hash_ptr(src, ip, h_bits_l, 8);
        let h = hash_ptr(src, ip, h_bits_s, mls);
        let curr = ctx.index(ip);
        let match_index_l = ctx.tables.hash[h2];
        let match_index_s = ctx.tables.chain[h];
        ctx.tables.hash[h2] = curr;
        ctx.tables.chain[h] = curr;

        let m_length;
        if offset_1 > 0 && read32(src, ip + 1 - offset_1 as usize) == read32(src, ip + 1) {
            m_length = count(src, ip + 5, ip + 5 - offset_1 as usize, iend) + 4;
            ip += 1;
            store.store_seq(&src[anchor..ip], repcode_to_off_base(1), m_length);
        } else {
            // (match position, length) once a candidate is accepted.
            let mut found: Option<(usize, usize)> = None;
            if match_index_l > prefix_lowest_index {
                let m = ctx.pos(match_index_l);
                if read64(src, m) == read64(src, ip) {
                    found = Some((m, count(src, ip + 8, m + 8, iend) + 8));
                }
            }
            if found.is_none()
                && match_index_s > prefix_lowest_index
                && read32(src, ctx.pos(match_index_s)) == read32(src, ip)
            {
                let hl3 = hash_ptr(src, ip + 1, h_bits_l, 8);
                let match_index_l3 = ctx.tables.hash[hl3];
                ctx.tables.hash[hl3] = curr + 1;
                let m3 = ctx.pos(match_index_l3);
                if match_index_l3 > prefix_lowest_index && read64(src, m3) == read64(src, ip + 1) {
                    ip += 1;
                    found = Some((m3, count(src, ip + 8, m3 + 8, iend) + 8));
                } else {
                    let m = ctx.pos(match_index_s);
                    found = Some((m, count(src, ip + 4, m + 4, iend) + 4));
                }
            }
            let Some((mut m, mut len)) = found else {
                ip += ((ip - anchor) >> SEARCH_STRENGTH) + 1;
                continue;
            };
            while ip > anchor && m > prefix_lowest && src[ip - 1] == src[m - 1] {
                ip -= 1;
                m -= 1;
                len += 1;
            }
            let offset = (ip - m) as u32;
            offset_2 = offset_1;
            offset_1 = offset;
            m_length = len;
            store.store_seq(&src[anchor..ip], offset_to_off_base(offset), m_length);
        }

        ip += m_length;
        anchor = ip;
        if ip <= ilimit {
            fill_after_match(ctx, curr, ip);
            while ip <= ilimit && offset_2 > 0 && read32(src, ip) == read32(src, ip - offset_2 as usize) {
                let rl = count(src, ip + 4, ip + 4 - offset_2 as usize, iend) + 4;
                std::mem::swap(&mut offset_1, &mut offset_2);
                insert_both(ctx, ip);
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

/// Where an accepted candidate lives.
#[derive(Clone, Copy)]
enum Source {
    Local(usize),
    Dict(usize),
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
    let h_bits_l = ctx.ms.cparams.hash_log;
    let h_bits_s = ctx.ms.cparams.chain_log;
    let mls = ctx.ms.cparams.min_match;
    let dict_h_bits_l = dict.ms.cparams.hash_log;
    let dict_h_bits_s = dict.ms.cparams.chain_log;
    let dict_mls = dict.ms.cparams.min_match;
    let src = ctx.src;
    let dsrc = dict.src;
    let (istart, iend) = (block.start, block.end);
    let prefix_lowest_index = ctx.ms.window.dict_limit;
    let prefix_lowest = ctx.pos(prefix_lowest_index);
    let delta = ctx.dict_index_delta();
    let dict_start_index = dict.low_index();
    let dict_start = dict.pos(dict_start_index);
    let dict_end = dict.pos(dict.end_index());
    let mut anchor = istart;
    if iend - istart < HASH_READ_SIZE + 1 {
        return iend - anchor;
    }
    let ilimit = iend - HASH_READ_SIZE;
    let mut ip = istart + (istart == prefix_lowest && dict_end == dict_start) as usize;
    let (mut offset_1, mut offset_2) = (rep[0], rep[1]);

    let long_len = |source: Source, at: usize| -> usize {
        match source {
            Source::Local(m) => count(src, at + 8, m + 8, iend) + 8,
            Source::Dict(m) => count_2segments(src, at + 8, iend, dsrc, m + 8, dict_end, prefix_lowest) + 8,
        }
    };

    while ip < ilimit {
        let h2 = hash_ptr(src, ip, h_bits_l, 8);
        let h = hash_ptr(src, ip, h_bits_s, mls);
        let curr = ctx.index(ip);
        let match_index_l = ctx.tables.hash[h2];
        let match_index_s = ctx.tables.chain[h];
        ctx.tables.hash[h2] = curr;
        ctx.tables.chain[h] = curr;

        let rep_index = (curr + 1).wrapping_sub(offset_1);
        let rep_hit = if offset_1 == 0 || !rep_index_valid(prefix_lowest_index, rep_index) {
            None
        } else if rep_index < prefix_lowest_index {
            dict_pos(ctx, rep_index, delta)
                .filter(|&m| read32(dsrc, m) == read32(src, ip + 1))
                .map(|m| count_2segments(src, ip + 5, iend, dsrc, m + 4, dict_end, prefix_lowest) + 4)
        } else {
            let m = ctx.pos(rep_index);
            (read32(src, m) == read32(src, ip + 1)).then(|| count(src, ip + 5, m + 4, iend) + 4)
        };

        let m_length;
        if let Some(len) = rep_hit {
            m_length = len;
            ip += 1;
            store.store_seq(&src[anchor..ip], repcode_to_off_base(1), m_length);
        } else {
            // (source, index in local space, length)
            let mut found: Option<(Source, u32, usize)> = None;
            if match_index_l > prefix_lowest_index {
                let m = ctx.pos(match_index_l);
                if read64(src, m) == read64(src, ip) {
                    found = Some((Source::Local(m), match_index_l, long_len(Source::Local(m), ip)));
                }
            } else {
                let d = dict.tables.hash[hash_ptr(src, ip, dict_h_bits_l, 8)];
                if d > dict_start_index && read64(dsrc, dict.pos(d)) == read64(src, ip) {
                    let s = Source::Dict(dict.pos(d));
                    found = Some((s, d.wrapping_add(delta), long_len(s, ip)));
                }
            }

            if found.is_none() {
                let short = if match_index_s > prefix_lowest_index {
                    let m = ctx.pos(match_index_s);
                    (read32(src, m) == read32(src, ip)).then_some((Source::Local(m), match_index_s))
                } else {
                    let d = dict.tables.chain[hash_ptr(src, ip, dict_h_bits_s, dict_mls)];
                    (d > dict_start_index && read32(dsrc, dict.pos(d)) == read32(src, ip))
                        .then(|| (Source::Dict(dict.pos(d)), d.wrapping_add(delta)))
                };
                if let Some((short_src, short_index)) = short {
                    let hl3 = hash_ptr(src, ip + 1, h_bits_l, 8);
                    let match_index_l3 = ctx.tables.hash[hl3];
                    ctx.tables.hash[hl3] = curr + 1;
                    let long3 = if match_index_l3 > prefix_lowest_index {
                        let m = ctx.pos(match_index_l3);
                        (read64(src, m) == read64(src, ip + 1)).then_some((Source::Local(m), match_index_l3))
                    } else {
                        let d = dict.tables.hash[hash_ptr(src, ip + 1, dict_h_bits_l, 8)];
                        (d > dict_start_index && read64(dsrc, dict.pos(d)) == read64(src, ip + 1))
                            .then(|| (Source::Dict(dict.pos(d)), d.wrapping_add(delta)))
                    };
                    found = match long3 {
                        Some((s, idx)) => {
                            ip += 1;
                            Some((s, idx, long_len(s, ip)))
                        }
                        None => {
                            let len = match short_src {
                                Source::Local(m) => count(src, ip + 4, m + 4, iend) + 4,
                                Source::Dict(m) => {
                                    count_2segments(src, ip + 4, iend, dsrc, m + 4, dict_end, prefix_lowest) + 4
                                }
                            };
                            Some((short_src, short_index, len))
                        }
                    };
                }
            }

            let Some((source, match_index, mut len)) = found else {
                ip += ((ip - anchor) >> SEARCH_STRENGTH) + 1;
                continue;
            };
            let offset = ctx.index(ip) - match_index;
            match source {
                Source::Local(mut m) => {
                    while ip > anchor && m > prefix_lowest && src[ip - 1] == src[m - 1] {
                        ip -= 1;
                        m -= 1;
                        len += 1;
                    }
                }
                Source::Dict(mut m) => {
                    while ip > anchor && m > dict_start && src[ip - 1] == dsrc[m - 1] {
                        ip -= 1;
                        m -= 1;
                        len += 1;
                    }
                }
            }
            offset_2 = offset_1;
            offset_1 = offset;
            m_length = len;
            store.store_seq(&src[anchor..ip], offset_to_off_base(offset), m_length);
        }

        ip += m_length;
        anchor = ip;
        if ip <= ilimit {
            fill_after_match(ctx, curr, ip);
            while ip <= ilimit && offset_2 > 0 {
                let current2 = ctx.index(ip);
                let rep_index2 = current2.wrapping_sub(offset_2);
                if !rep_index_valid(prefix_lowest_index, rep_index2) {
                    break;
                }
                let rl = if rep_index2 < prefix_lowest_index {
                    dict_pos(ctx, rep_index2, delta)
                        .filter(|&m| read32(dsrc, m) == read32(src, ip))
                        .map(|m| count_2segments(src, ip + 4, iend, dsrc, m + 4, dict_end, prefix_lowest) + 4)
                } else {
                    let m = ctx.pos(rep_index2);
                    (read32(src, m) == read32(src, ip)).then(|| count(src, ip + 4, m + 4, iend) + 4)
                };
                let Some(rl) = rl else { break };
                std::mem::swap(&mut offset_1, &mut offset_2);
                store.store_seq(&[], repcode_to_off_base(1), rl);
                insert_both(ctx, ip);
                ip += rl;
                anchor = ip;
            }
        }
    }

    rep[0] = offset_1;
    rep[1] = offset_2;
    iend - anchor
}

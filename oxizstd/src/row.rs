//! Row-based match finder.
//!
//! The hash table is cut into rows of 16 or 32 cells. Each cell has a
//! one-byte tag in a parallel table, taken from the low bits of a longer
//! hash, so one vector compare over a row's tags yields the few slots
//! worth a byte comparison. The first tag byte of a row is not a tag but
//! the row head: the slot most recently written. Slots are filled
//! backwards from the head, so walking from the head forwards visits the
//! newest candidates first.

use crate::dds;
use crate::hash::{count, count_2segments, hash_ptr, read32};
use crate::hc::search_mls;
use crate::lazy::{DEDICATED_DICT_SEARCH, DICT_MATCH_STATE, NO_OFF_BASE};
use crate::match_state::MatchCtx;
use crate::params::ROW_HASH_TAG_BITS;
use crate::seq_store::offset_to_off_base;

/// Above this many pending positions, only both ends of the gap are inserted.
const SKIP_THRESHOLD: u32 = 384;
const MAX_MATCH_START_POSITIONS_TO_UPDATE: u32 = 96;
const MAX_MATCH_END_POSITIONS_TO_UPDATE: u32 = 32;

/// Most slots a row can have.
const MAX_ROW_ENTRIES: usize = 32;

#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
mod x86 {
    use core::arch::x86_64::*;

    /// Bit `i` set when `row[i] == tag`. `row` holds 16 or 32 bytes.
    ///
    /// # Safety
    ///
    /// Requires SSE2.
    #[target_feature(enable = "sse2")]
    pub unsafe fn tag_mask(row: &[u8], tag: u8) -> u32 {
        let mut mask = 0u32;
        for (i, chunk) in row.chunks_exact(16).enumerate() {
            // SAFETY: chunk is exactly 16 bytes and loadu has no alignment
            // requirement; SSE2 is enabled for this function.
            let bits = unsafe {
                let needle = _mm_set1_epi8(tag as i8);
                let v = _mm_loadu_si128(chunk.as_ptr() as *const __m128i);
                _mm_movemask_epi8(_mm_cmpeq_epi8(v, needle)) as u32 & 0xFFFF
            };
            mask |= bits << (16 * i);
        }
        mask
    }
}

#[cfg(all(target_arch = "aarch64", target_feature = "neon"))]
mod arm {
    use core::arch::aarch64::*;

    /// Bit `i` set when `row[i] == tag`. `row` holds 16 or 32 bytes.
    ///
    /// # Safety
    ///
    /// Requires NEON.
    #[target_feature(enable = "neon")]
    pub unsafe fn tag_mask(row: &[u8], tag: u8) -> u32 {
        let mut mask = 0u32;
        for (i, chunk) in row.chunks_exact(16).enumerate() {
            // SAFETY: chunk is exactly 16 bytes; NEON is enabled for this
            // function.
            let nibbles = unsafe {
                let v = vld1q_u8(chunk.as_ptr());
                let eq = vceqq_u8(v, vdupq_n_u8(tag));
                let narrowed = vshrn_n_u16::<4>(vreinterpretq_u16_u8(eq));
                vget_lane_u64::<0>(vreinterpret_u64_u8(narrowed))
            };
            mask |= collapse_nibbles(nibbles) << (16 * i);
        }
        mask
    }

    /// One bit per nibble of a compare result.
    #[inline]
    fn collapse_nibbles(n: u64) -> u32 {
        let mut m = n & 0x1111_1111_1111_1111;
        m = (m | (m >> 3)) & 0x0303_0303_0303_0303;
        m = (m | (m >> 6)) & 0x000F_000F_000F_000F;
        m = (m | (m >> 12)) & 0x0000_00FF_0000_00FF;
        m = (m | (m >> 24)) & 0xFFFF;
        m as u32
    }
}

/// Bit `i` set when `row[i] == tag`, eight bytes at a time.
pub fn portable_tag_mask(row: &[u8], tag: u8) -> u32 {
    const LOW: u64 = 0x0101_0101_0101_0101;
    const HIGH: u64 = 0x8080_8080_8080_8080;
    let splat = LOW.wrapping_mul(tag as u64);
    let mut mask = 0u32;
    for (i, chunk) in row.chunks_exact(8).enumerate() {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let x = u64::from_le_bytes(word) ^ splat;
        // High bit of each zero byte, without carries between lanes.
        let zero = !(((x & !HIGH).wrapping_add(!HIGH)) | x) & HIGH;
        let packed = (zero >> 7).wrapping_mul(0x0102_0408_1020_4080) >> 56;
        mask |= (packed as u32) << (8 * i);
    }
    mask
}

#[inline]
fn tag_mask(row: &[u8], tag: u8) -> u32 {
    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    {
        // SAFETY: SSE2 is enabled at compile time.
        unsafe { x86::tag_mask(row, tag) }
    }
    #[cfg(all(target_arch = "aarch64", target_feature = "neon"))]
    {
        // SAFETY: NEON is enabled at compile time.
        unsafe { arm::tag_mask(row, tag) }
    }
    #[cfg(not(any(
        all(target_arch = "x86_64", target_feature = "sse2"),
        all(target_arch = "aarch64", target_feature = "neon")
    )))]
    {
        portable_tag_mask(row, tag)
    }
}

/// Matching slots of a row, rotated so bit 0 is the head slot.
#[inline]
fn match_mask(tag_row: &[u8], tag: u8, head: u32) -> u32 {
    let raw = tag_mask(tag_row, tag);
    if tag_row.len() == 16 {
        (raw as u16).rotate_right(head) as u32
    } else {
        raw.rotate_right(head)
    }
}

/// Claim the next slot of a row, moving its head backwards. Slot 0 holds
/// the head itself and is never handed out.
#[inline]
fn next_slot(tag_row: &mut [u8], row_mask: u32) -> usize {
    let mut next = (tag_row[0] as u32).wrapping_sub(1) & row_mask;
    if next == 0 {
        next = row_mask;
    }
    tag_row[0] = next as u8;
    next as usize
}

/// Geometry of the rows for one match state.
#[derive(Debug, Clone, Copy)]
struct Rows {
    row_log: u32,
    hash_log: u32,
    mls: u32,
}

impl Rows {
    fn of(ms: &crate::match_state::MatchState) -> Self {
        Self {
            row_log: ms.row_log,
            hash_log: ms.cparams.hash_log - ms.row_log,
            mls: search_mls(ms.cparams.min_match),
        }
    }

    #[inline]
    fn entries(&self) -> usize {
        1 << self.row_log
    }

    #[inline]
    fn mask(&self) -> u32 {
        (1 << self.row_log) - 1
    }

    /// `(first cell of the row, tag)` for the bytes at `pos`.
    #[inline]
    fn locate(&self, src: &[u8], pos: usize) -> (usize, u8) {
        let hash = hash_ptr(src, pos, self.hash_log + ROW_HASH_TAG_BITS, self.mls);
        ((hash >> ROW_HASH_TAG_BITS) << self.row_log, hash as u8)
    }
}

fn insert_range(ctx: &mut MatchCtx<'_>, rows: Rows, from: u32, to: u32) {
    let entries = rows.entries();
    for idx in from..to {
        let (row, tag) = rows.locate(ctx.src, ctx.pos(idx));
        let slot = next_slot(&mut ctx.tables.tags[row..row + entries], rows.mask());
        ctx.tables.tags[row + slot] = tag;
        ctx.tables.hash[row + slot] = idx;
    }
}

/// Insert every position below buffer position `target`.
pub fn update(ctx: &mut MatchCtx<'_>, target: usize) {
    let rows = Rows::of(ctx.ms);
    let target = ctx.index(target);
    insert_range(ctx, rows, ctx.ms.next_to_update, target);
    ctx.ms.next_to_update = target;
}

/// Catch the rows up to `curr`, skipping the middle of long gaps.
fn update_for_search(ctx: &mut MatchCtx<'_>, rows: Rows, curr: u32, lazy_skipping: bool) {
    let mut idx = ctx.ms.next_to_update;
    if idx >= curr {
        return;
    }
    if lazy_skipping {
        insert_range(ctx, rows, idx, curr.min(idx + 1));
    } else {
        if curr - idx > SKIP_THRESHOLD {
            insert_range(ctx, rows, idx, idx + MAX_MATCH_START_POSITIONS_TO_UPDATE);
            idx = curr - MAX_MATCH_END_POSITIONS_TO_UPDATE;
        }
        insert_range(ctx, rows, idx, curr);
    }
    ctx.ms.next_to_update = curr;
}

/// Best match at `ip` as `(length, off_base)`, length 0 if under 4.
pub fn find_best_match<const MODE: u8>(
    ctx: &mut MatchCtx<'_>,
    ip: usize,
    iend: usize,
    lazy_skipping: bool,
) -> (usize, u32) {
    let rows = Rows::of(ctx.ms);
    let entries = rows.entries();
    let row_mask = rows.mask();
    let curr = ctx.index(ip);
    let low_limit = ctx
        .ms
        .window
        .lowest_match_index(curr, ctx.ms.max_distance(), ctx.ms.loaded_dict_end);
    let mut nb_attempts = 1u32 << ctx.ms.cparams.search_log.min(rows.row_log);
    let mut ml = 3usize;
    let mut off_base = NO_OFF_BASE;

    update_for_search(ctx, rows, curr, lazy_skipping);

    let src = ctx.src;
    let (row, tag) = rows.locate(src, ip);
    let mut candidates = [0u32; MAX_ROW_ENTRIES];
    let mut nb_candidates = 0;
    {
        let tag_row = &ctx.tables.tags[row..row + entries];
        let head = tag_row[0] as u32 & row_mask;
        let mut matches = match_mask(tag_row, tag, head);
        while matches != 0 && nb_attempts > 0 {
            let slot = (head + matches.trailing_zeros()) & row_mask;
            matches &= matches - 1;
            if slot == 0 {
                continue;
            }
            let match_index = ctx.tables.hash[row + slot as usize];
            if match_index < low_limit {
                break;
            }
            candidates[nb_candidates] = match_index;
            nb_candidates += 1;
            nb_attempts -= 1;
        }
    }
    let slot = next_slot(&mut ctx.tables.tags[row..row + entries], row_mask);
    ctx.tables.tags[row + slot] = tag;
    ctx.tables.hash[row + slot] = curr;
    ctx.ms.next_to_update = curr + 1;

    for &match_index in &candidates[..nb_candidates] {
        let m = ctx.pos(match_index);
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
    }

    if MODE == DEDICATED_DICT_SEARCH {
        ml = dds::search(ctx, ip, iend, nb_attempts, ml, &mut off_base);
    } else if MODE == DICT_MATCH_STATE {
        ml = search_dict(ctx, ip, iend, nb_attempts, ml, &mut off_base);
    }

    if ml < 4 { (0, NO_OFF_BASE) } else { (ml, off_base) }
}

/// Search the attached dictionary's row for the same hash.
fn search_dict(
    ctx: &MatchCtx<'_>,
    ip: usize,
    iend: usize,
    mut nb_attempts: u32,
    mut ml: usize,
    off_base: &mut u32,
) -> usize {
    let Some(dict) = ctx.dict else { return ml };
    let rows = Rows::of(dict.ms);
    let entries = rows.entries();
    let row_mask = rows.mask();
    let src = ctx.src;
    let (row, tag) = rows.locate(src, ip);
    let Some(tag_row) = dict.tables.tags.get(row..row + entries) else {
        return ml;
    };
    let curr = ctx.index(ip);
    let delta = ctx.dict_index_delta();
    let dict_lowest = dict.low_index();
    let dict_end = dict.pos(dict.end_index());
    let prefix_start = ctx.prefix_start();

    let head = tag_row[0] as u32 & row_mask;
    let mut matches = match_mask(tag_row, tag, head);
    while matches != 0 && nb_attempts > 0 {
        let slot = (head + matches.trailing_zeros()) & row_mask;
        matches &= matches - 1;
        if slot == 0 {
            continue;
        }
        let match_index = dict.tables.hash[row + slot as usize];
        if match_index < dict_lowest {
            break;
        }
        nb_attempts -= 1;
        let m = dict.pos(match_index);
        if m + 4 > dict_end || read32(dict.src, m) != read32(src, ip) {
            continue;
        }
        let len = count_2segments(src, ip + 4, iend, dict.src, m + 4, dict_end, prefix_start) + 4;
        if len > ml {
            ml = len;
            *off_base = offset_to_off_base(curr.wrapping_sub(match_index.wrapping_add(delta)));
            if ip + len == iend {
                break;
            }
        }
    }
    ml
}

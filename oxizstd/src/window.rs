//! Sliding window bookkeeping over 32-bit indices.
//!
//! Every byte ever fed to a context gets a 32-bit *index*. The first byte
//! of a fresh window has index [`WINDOW_START_INDEX`]; index `0` marks an
//! empty table cell. The bytes themselves live in a history buffer whose
//! first byte has index `base`; `base` moves forward when the buffer is
//! compacted, and indices keep counting.
//!
//! Indices are kept narrow on purpose: tables store `u32` cells. When the
//! running index approaches [`CURRENT_MAX`], [`Window::correct_overflow`]
//! shifts every index down by a multiple of the table cycle.

/// Index of the first byte of a fresh window.
pub const WINDOW_START_INDEX: u32 = 2;

/// Largest index the window may reach before an overflow correction.
pub const CURRENT_MAX: u32 = (3u32 << 29) + (1u32 << 31);

/// Largest distance a correction may need to preserve.
pub const MAX_DIST_LIMIT: u32 = (1u32 << 31) - 1;

/// Position of the window over the index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Index of the first byte of the history buffer.
    pub base: u32,
    /// First index of the current contiguous prefix.
    pub dict_limit: u32,
    /// Lowest index still valid as a match source.
    pub low_limit: u32,
    /// Index one past the last byte handed to the match finders.
    pub next_src: u32,
    /// Number of overflow corrections applied so far.
    pub nb_overflow_corrections: u32,
}

impl Default for Window {
    fn default() -> Self {
        Self::new()
    }
}

impl Window {
    /// A fresh, empty window.
    pub fn new() -> Self {
        Self {
            base: WINDOW_START_INDEX,
            dict_limit: WINDOW_START_INDEX,
            low_limit: WINDOW_START_INDEX,
            next_src: WINDOW_START_INDEX,
            nb_overflow_corrections: 0,
        }
    }

    /// Forget all history; indices continue from the current position.
    pub fn clear(&mut self) {
        self.low_limit = self.next_src;
        self.dict_limit = self.next_src;
    }

    /// Buffer position of `index`.
    #[inline]
    pub fn pos(&self, index: u32) -> usize {
        index.wrapping_sub(self.base) as usize
    }

    /// Index of buffer position `pos`.
    #[inline]
    pub fn index(&self, pos: usize) -> u32 {
        self.base.wrapping_add(pos as u32)
    }

    /// Append `len` contiguous bytes.
    pub fn update(&mut self, len: usize) {
        self.next_src = self.next_src.wrapping_add(len as u32);
    }

    /// The history buffer dropped its first `shift` bytes.
    pub fn slide_buffer(&mut self, shift: usize) {
        self.base = self.base.wrapping_add(shift as u32);
    }

    /// Whether indices up to `src_end` would cross the overflow guard band.
    pub fn need_overflow_correction(&self, src_end: u32) -> bool {
        src_end > CURRENT_MAX
    }

    /// Shift indices down so that `curr` lands on the same position within
    /// its `1 << cycle_log` cycle, keeping at least `max_dist` of history.
    ///
    /// Returns the amount subtracted; tables must be reduced by the same
    /// amount.
    pub fn correct_overflow(&mut self, cycle_log: u32, max_dist: u32, curr: u32) -> u32 {
        let cycle_size = 1u32 << cycle_log;
        let cycle_mask = cycle_size - 1;
        let current_cycle = curr & cycle_mask;
        let cycle_correction = if current_cycle < WINDOW_START_INDEX {
            cycle_size.max(WINDOW_START_INDEX)
        } else {
            0
        };
        let new_current = current_cycle + cycle_correction + max_dist.max(cycle_size);
        debug_assert!(max_dist <= MAX_DIST_LIMIT);
        debug_assert!(curr > new_current);
        let correction = curr - new_current;

        self.base = self.base.wrapping_sub(correction);
        self.next_src -= correction;
        self.low_limit = if self.low_limit < correction + WINDOW_START_INDEX {
            WINDOW_START_INDEX
        } else {
            self.low_limit - correction
        };
        self.dict_limit = if self.dict_limit < correction + WINDOW_START_INDEX {
            WINDOW_START_INDEX
        } else {
            self.dict_limit - correction
        };
        self.nb_overflow_corrections += 1;
        correction
    }

    /// Raise `low_limit` so that no match reaches further than `max_dist`
    /// before `block_start`. Invalidates a loaded dictionary once it falls
    /// out of reach; returns whether that happened.
    pub fn enforce_max_dist(
        &mut self,
        block_start: u32,
        max_dist: u32,
        loaded_dict_end: &mut u32,
    ) -> bool {
        if block_start > max_dist.saturating_add(*loaded_dict_end) {
            let new_low = block_start - max_dist;
            if self.low_limit < new_low {
                self.low_limit = new_low;
            }
            if self.dict_limit < self.low_limit {
                self.dict_limit = self.low_limit;
            }
            let dropped = *loaded_dict_end != 0;
            *loaded_dict_end = 0;
            return dropped;
        }
        false
    }

    /// Drop a loaded or attached dictionary once `block_end` is more than
    /// `max_dist` past its end. Returns whether it was dropped.
    pub fn check_dict_validity(block_end: u32, max_dist: u32, loaded_dict_end: &mut u32) -> bool {
        if *loaded_dict_end != 0 && block_end > loaded_dict_end.saturating_add(max_dist) {
            *loaded_dict_end = 0;
            return true;
        }
        false
    }

    /// Lowest index a match at `curr` may reference.
    #[inline]
    pub fn lowest_match_index(&self, curr: u32, max_distance: u32, loaded_dict_end: u32) -> u32 {
        let lowest_valid = self.low_limit;
        let within_window = if curr - lowest_valid > max_distance {
            curr - max_distance
        } else {
            lowest_valid
        };
        if loaded_dict_end != 0 {
            lowest_valid
        } else {
            within_window
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_window() {
        let w = Window::new();
        assert_eq!(w.next_src, WINDOW_START_INDEX);
        assert_eq!(w.low_limit, w.dict_limit);
        assert_eq!(w.pos(WINDOW_START_INDEX), 0);
        assert_eq!(w.index(10), 12);
    }

    #[test]
    fn test_overflow_correction_keeps_positions() {
        let mut w = Window::new();
        let curr = CURRENT_MAX + 1000;
        w.next_src = curr;
        w.low_limit = curr - (1 << 20);
        w.dict_limit = w.low_limit;
        w.base = curr - (1 << 21);
        let pos_before = w.pos(curr - 5);

        assert!(w.need_overflow_correction(curr));
        let correction = w.correct_overflow(20, 1 << 20, curr);
        assert!(correction > 0);
        assert_eq!(w.next_src, curr - correction);
        assert_eq!(w.pos(curr - 5 - correction), pos_before);
        // Same position within the cycle, at least max_dist of headroom.
        assert_eq!(w.next_src & ((1 << 20) - 1), curr & ((1 << 20) - 1));
        assert!(w.next_src >= 1 << 20);
        assert!(w.low_limit >= WINDOW_START_INDEX);
        assert_eq!(w.nb_overflow_corrections, 1);
        assert!(!w.need_overflow_correction(w.next_src));
    }

    #[test]
    fn test_enforce_max_dist() {
        let mut w = Window::new();
        w.next_src = 10_000;
        let mut loaded = 0;
        assert!(!w.enforce_max_dist(10_000, 1024, &mut loaded));
        assert_eq!(w.low_limit, 10_000 - 1024);
        assert_eq!(w.dict_limit, w.low_limit);

        // A loaded dictionary keeps the whole range valid until out of reach.
        let mut w = Window::new();
        let mut loaded = 600;
        assert!(!w.enforce_max_dist(1000, 1024, &mut loaded));
        assert_eq!(w.low_limit, WINDOW_START_INDEX);
        assert!(w.enforce_max_dist(2000, 1024, &mut loaded));
        assert_eq!(loaded, 0);
    }

    #[test]
    fn test_lowest_match_index() {
        let mut w = Window::new();
        w.low_limit = 100;
        assert_eq!(w.lowest_match_index(5000, 1024, 0), 5000 - 1024);
        assert_eq!(w.lowest_match_index(500, 1024, 0), 100);
        assert_eq!(w.lowest_match_index(5000, 1024, 300), 100);
    }

    #[test]
    fn test_check_dict_validity() {
        let mut loaded = 500;
        assert!(!Window::check_dict_validity(1000, 1024, &mut loaded));
        assert!(Window::check_dict_validity(2000, 1024, &mut loaded));
        assert_eq!(loaded, 0);
    }
}

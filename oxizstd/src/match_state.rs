//! Match state: the window plus the search tables of one context.
//!
//! Tables live in the owner's [`Workspace`](crate::workspace::Workspace);
//! the state only records parameters and positions. A block compressor
//! sees everything through a [`MatchCtx`]: the history buffer, the
//! mutable tables, and optionally a read-only [`DictMatchState`] borrowed
//! from a digested dictionary.

use std::ops::Range;

use tracing::debug;

use crate::params::{CompressionParameters, Strategy, cycle_log, row_match_finder_supported};
use crate::seq_store::{REP_NUM, SeqStore};
use crate::window::{CURRENT_MAX, Window};
use crate::workspace::table_space;
use crate::opt::{self, OptState};
use crate::{bt, dds, double_fast, fast, hc, lazy, row};

/// Largest log2 size of the 3-byte hash table.
pub const HASHLOG3_MAX: u32 = 17;

/// Chain cell value of a binary-tree node not yet sorted.
pub const DUBT_UNSORTED_MARK: u32 = 1;

/// Bytes the match finders may read past a position when hashing.
pub const HASH_READ_SIZE: usize = 8;

/// Hard-reset once the window gets this close to the index ceiling.
const INDEX_OVERFLOW_MARGIN: u32 = 16 << 20;

/// Where the candidates of a search come from besides the local tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictMode {
    /// Local tables only.
    NoDict,
    /// A digested dictionary's tables, attached by reference.
    DictMatchState,
    /// A digested dictionary with a dedicated search structure.
    DedicatedDictSearch,
}

/// Sizes (in cells) of every search table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableSizes {
    /// Main hash table.
    pub hash: usize,
    /// Chain or binary-tree table.
    pub chain: usize,
    /// 3-byte hash table.
    pub hash3: usize,
    /// Row tag bytes.
    pub tags: usize,
}

impl TableSizes {
    /// Table sizes for `cparams`. Pure: the same inputs give the same sizes.
    pub fn new(cparams: &CompressionParameters, use_row: bool, for_cctx: bool, dedicated: bool) -> Self {
        let use_row = use_row && row_match_finder_supported(cparams.strategy);
        let hash = 1usize << cparams.hash_log;
        let chain = if chain_table_needed(cparams.strategy, use_row, dedicated) {
            1usize << cparams.chain_log
        } else {
            0
        };
        let hash3 = if for_cctx && cparams.min_match == 3 {
            1usize << hash_log3(cparams)
        } else {
            0
        };
        let tags = if use_row { hash } else { 0 };
        Self {
            hash,
            chain,
            hash3,
            tags,
        }
    }

    /// Workspace bytes the tables occupy.
    pub fn workspace_bytes(&self) -> usize {
        table_space(self.hash * 4)
            + table_space(self.chain * 4)
            + table_space(self.hash3 * 4)
            + table_space(self.tags)
    }
}

fn chain_table_needed(strategy: Strategy, use_row: bool, dedicated: bool) -> bool {
    dedicated || (strategy != Strategy::Fast && !use_row)
}

fn hash_log3(cparams: &CompressionParameters) -> u32 {
    HASHLOG3_MAX.min(cparams.window_log)
}

/// Row width log2 for a search log: 16 or 32 slots.
pub fn row_log(search_log: u32) -> u32 {
    search_log.clamp(4, 5)
}

/// Mutable views over a context's search tables.
#[derive(Debug)]
pub struct MatchTables<'a> {
    /// Main hash table (rows when the row finder is active).
    pub hash: &'a mut [u32],
    /// Chain or binary-tree table.
    pub chain: &'a mut [u32],
    /// 3-byte hash table.
    pub hash3: &'a mut [u32],
    /// Row tags; the first byte of each row is its head.
    pub tags: &'a mut [u8],
}

impl MatchTables<'_> {
    /// Subtract `reducer` from every stored index. Indices that would fall
    /// below the window start become empty.
    pub fn reduce(&mut self, reducer: u32, preserve_unsorted_mark: bool) {
        reduce_table(self.hash, reducer, false);
        reduce_table(self.chain, reducer, preserve_unsorted_mark);
        reduce_table(self.hash3, reducer, false);
    }
}

fn reduce_table(table: &mut [u32], reducer: u32, preserve_mark: bool) {
    let threshold = reducer + crate::window::WINDOW_START_INDEX;
    for cell in table {
        *cell = if preserve_mark && *cell == DUBT_UNSORTED_MARK {
            DUBT_UNSORTED_MARK
        } else if *cell < threshold {
            0
        } else {
            *cell - reducer
        };
    }
}

/// Read-only views over a digested dictionary's tables.
#[derive(Debug, Clone, Copy)]
pub struct DictTables<'a> {
    /// Main hash table (or the dedicated search index).
    pub hash: &'a [u32],
    /// Chain or binary-tree table.
    pub chain: &'a [u32],
    /// Row tags.
    pub tags: &'a [u8],
}

/// Search parameters and positions of one context or dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    /// Window over the history buffer.
    pub window: Window,
    /// Lowest index not yet inserted into the tables.
    pub next_to_update: u32,
    /// End index of a loaded dictionary, 0 if none is in reach.
    pub loaded_dict_end: u32,
    /// Parameters the tables were built for.
    pub cparams: CompressionParameters,
    /// Whether the row finder owns the hash table.
    pub use_row: bool,
    /// Whether the tables hold a dedicated dictionary search index.
    pub dedicated_dict_search: bool,
    /// Log2 size of the 3-byte table, 0 if absent.
    pub hash_log3: u32,
    /// Row width log2 when the row finder is active.
    pub row_log: u32,
    /// Table sizes.
    pub sizes: TableSizes,
}

impl MatchState {
    /// State for `cparams` with a fresh window.
    pub fn new(cparams: CompressionParameters, use_row: bool, for_cctx: bool, dedicated: bool) -> Self {
        let use_row = use_row && row_match_finder_supported(cparams.strategy);
        let sizes = TableSizes::new(&cparams, use_row, for_cctx, dedicated);
        Self {
            window: Window::new(),
            next_to_update: crate::window::WINDOW_START_INDEX,
            loaded_dict_end: 0,
            cparams,
            use_row,
            dedicated_dict_search: dedicated,
            hash_log3: if sizes.hash3 > 0 { hash_log3(&cparams) } else { 0 },
            row_log: row_log(cparams.search_log),
            sizes,
        }
    }

    /// Prepare for a new frame. `hard` restarts the index space, otherwise
    /// indices continue and old table entries fall out of the window.
    pub fn reset(&mut self, hard: bool) {
        if hard {
            self.window = Window::new();
        } else {
            self.window.clear();
        }
        self.next_to_update = self.window.next_src;
        self.loaded_dict_end = 0;
    }

    /// Whether continuing the index space would leave too little headroom.
    pub fn index_too_close_to_max(&self) -> bool {
        self.window.next_src > CURRENT_MAX - INDEX_OVERFLOW_MARGIN
    }

    /// Largest back-reference distance.
    pub fn max_distance(&self) -> u32 {
        1u32 << self.cparams.window_log
    }

    /// Shift all indices down if `block_end` (an index) would cross the
    /// overflow guard band. Returns the correction applied.
    pub fn correct_overflow_if_needed(&mut self, tables: &mut MatchTables<'_>, block_start: u32, block_end: u32) -> Option<u32> {
        if !self.window.need_overflow_correction(block_end) {
            return None;
        }
        let cycle = cycle_log(self.cparams.chain_log, self.cparams.strategy);
        let correction = self.window.correct_overflow(cycle, self.max_distance(), block_start);
        tables.reduce(correction, self.cparams.strategy.uses_binary_tree());
        self.next_to_update = self.next_to_update.saturating_sub(correction);
        self.loaded_dict_end = 0;
        debug!(correction, corrections = self.window.nb_overflow_corrections, "index overflow correction");
        Some(correction)
    }

    /// Insert `src[..end]` (positions in the history buffer) as matchable
    /// history, according to the active strategy.
    ///
    /// `for_cdict` fills denser tables, since a dictionary is built once
    /// and reused many times.
    pub fn load_content(&mut self, src: &[u8], tables: MatchTables<'_>, end: usize, for_cdict: bool) {
        let window = self.window;
        let start = window.pos(self.next_to_update.max(window.dict_limit));
        if end <= start + HASH_READ_SIZE {
            self.next_to_update = window.index(end);
            return;
        }
        let mut ctx = MatchCtx {
            src,
            ms: self,
            tables,
            dict: None,
            opt: None,
        };
        match ctx.ms.cparams.strategy {
            Strategy::Fast => fast::fill_hash_table(&mut ctx, end, for_cdict),
            Strategy::DFast => double_fast::fill_double_hash_table(&mut ctx, end, for_cdict),
            Strategy::Greedy | Strategy::Lazy | Strategy::Lazy2 => {
                if ctx.ms.dedicated_dict_search {
                    dds::build(&mut ctx, end - HASH_READ_SIZE);
                } else if ctx.ms.use_row {
                    row::update(&mut ctx, end - HASH_READ_SIZE);
                } else {
                    hc::insert_and_find_first_index(&mut ctx, end - HASH_READ_SIZE);
                }
            }
            _ => bt::update_tree(&mut ctx, end - HASH_READ_SIZE, end),
        }
        ctx.ms.next_to_update = window.index(end);
    }
}

/// Read-only dictionary attached to a compression.
#[derive(Debug, Clone, Copy)]
pub struct DictMatchState<'a> {
    /// The dictionary's match state.
    pub ms: &'a MatchState,
    /// Dictionary content, indexed through `ms.window`.
    pub src: &'a [u8],
    /// The dictionary's tables.
    pub tables: DictTables<'a>,
}

impl DictMatchState<'_> {
    /// One past the last dictionary index.
    #[inline]
    pub fn end_index(&self) -> u32 {
        self.ms.window.next_src
    }

    /// Lowest valid dictionary index.
    #[inline]
    pub fn low_index(&self) -> u32 {
        self.ms.window.low_limit
    }

    /// Buffer position of a dictionary index.
    #[inline]
    pub fn pos(&self, index: u32) -> usize {
        self.ms.window.pos(index)
    }
}

/// Everything a block compressor works on.
#[derive(Debug)]
pub struct MatchCtx<'a> {
    /// History buffer; positions are relative to `ms.window.base`.
    pub src: &'a [u8],
    /// Parameters and positions.
    pub ms: &'a mut MatchState,
    /// Local tables.
    pub tables: MatchTables<'a>,
    /// Attached dictionary, if any.
    pub dict: Option<DictMatchState<'a>>,
    /// Optimal parser state, present for the optimal strategies.
    pub opt: Option<OptState<'a>>,
}

impl MatchCtx<'_> {
    /// Index of buffer position `pos`.
    #[inline]
    pub fn index(&self, pos: usize) -> u32 {
        self.ms.window.index(pos)
    }

    /// Buffer position of `index`.
    #[inline]
    pub fn pos(&self, index: u32) -> usize {
        self.ms.window.pos(index)
    }

    /// Buffer position where the current prefix starts.
    #[inline]
    pub fn prefix_start(&self) -> usize {
        self.ms.window.pos(self.ms.window.dict_limit)
    }

    /// Offset between dictionary indices and local indices: a dictionary
    /// index `d` sits at distance `curr - (d + delta)` from `curr`.
    #[inline]
    pub fn dict_index_delta(&self) -> u32 {
        match &self.dict {
            Some(dict) => self.ms.window.dict_limit.wrapping_sub(dict.end_index()),
            None => 0,
        }
    }
}

/// Parse `block` (positions in the history buffer) into `store`.
/// Returns the number of trailing literals not yet stored.
pub type BlockCompressor = fn(&mut MatchCtx<'_>, &mut SeqStore<'_>, &mut [u32; REP_NUM], Range<usize>) -> usize;

/// Pick the block compressor for a strategy and dictionary mode.
pub fn select_block_compressor(strategy: Strategy, use_row: bool, mode: DictMode) -> BlockCompressor {
    use lazy::{BinaryTree, HashChain, Row};
    match (strategy, mode) {
        (Strategy::Fast, DictMode::NoDict) => fast::compress_block,
        (Strategy::Fast, _) => fast::compress_block_dict_match_state,
        (Strategy::DFast, DictMode::NoDict) => double_fast::compress_block,
        (Strategy::DFast, _) => double_fast::compress_block_dict_match_state,
        (Strategy::Greedy | Strategy::Lazy | Strategy::Lazy2, _) if use_row => lazy::select::<Row>(strategy, mode),
        (Strategy::Greedy | Strategy::Lazy | Strategy::Lazy2, _) => lazy::select::<HashChain>(strategy, mode),
        (Strategy::BtLazy2, DictMode::DedicatedDictSearch) => lazy::select::<BinaryTree>(strategy, DictMode::DictMatchState),
        (Strategy::BtLazy2, _) => lazy::select::<BinaryTree>(strategy, mode),
        (_, DictMode::DedicatedDictSearch) => opt::select(strategy, DictMode::DictMatchState),
        (_, _) => opt::select(strategy, mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::get_cparams;

    #[test]
    fn test_table_sizes_follow_strategy() {
        let mut cp = get_cparams(1, 1 << 20, 0);
        cp.strategy = Strategy::Fast;
        let s = TableSizes::new(&cp, false, true, false);
        assert_eq!(s.hash, 1 << cp.hash_log);
        assert_eq!(s.chain, 0);
        assert_eq!(s.tags, 0);

        cp.strategy = Strategy::Lazy;
        let s = TableSizes::new(&cp, true, true, false);
        assert_eq!(s.chain, 0);
        assert_eq!(s.tags, s.hash);
        let s = TableSizes::new(&cp, false, true, false);
        assert_eq!(s.chain, 1 << cp.chain_log);

        cp.min_match = 3;
        assert!(TableSizes::new(&cp, false, true, false).hash3 > 0);
        assert_eq!(TableSizes::new(&cp, false, false, false).hash3, 0);
        // Same inputs, same answer.
        assert_eq!(TableSizes::new(&cp, false, true, false), TableSizes::new(&cp, false, true, false));
    }

    #[test]
    fn test_row_request_ignored_without_row_support() {
        let mut cp = get_cparams(5, 1 << 20, 0);
        for strategy in [Strategy::DFast, Strategy::BtLazy2, Strategy::BtUltra2] {
            cp.strategy = strategy;
            let s = TableSizes::new(&cp, true, true, false);
            assert_eq!(s.chain, 1 << cp.chain_log, "{strategy:?}");
            assert_eq!(s.tags, 0);
            assert!(!MatchState::new(cp, true, true, false).use_row);
        }
    }

    #[test]
    fn test_reduce_table() {
        let mut t = vec![0u32, 1, 5, 1000, 1001, 5000];
        reduce_table(&mut t, 999, true);
        assert_eq!(t, vec![0, 1, 0, 0, 2, 4001]);
        let mut t = vec![1u32, 1003];
        reduce_table(&mut t, 1000, false);
        assert_eq!(t, vec![0, 3]);
    }

    #[test]
    fn test_row_log_bounds() {
        assert_eq!(row_log(1), 4);
        assert_eq!(row_log(4), 4);
        assert_eq!(row_log(5), 5);
        assert_eq!(row_log(9), 5);
    }

    #[test]
    fn test_reset_continues_indices() {
        let cp = get_cparams(3, 1 << 16, 0);
        let mut ms = MatchState::new(cp, false, true, false);
        ms.window.update(5000);
        ms.loaded_dict_end = 300;
        ms.reset(false);
        assert_eq!(ms.window.low_limit, ms.window.next_src);
        assert_eq!(ms.next_to_update, ms.window.next_src);
        assert_eq!(ms.loaded_dict_end, 0);
        ms.reset(true);
        assert_eq!(ms.window, Window::new());
    }
}

//! Default compression parameters per level and source-size tier.
//!
//! Row 0 of every tier is the base for negative (fast) levels. Columns are
//! `windowLog, chainLog, hashLog, searchLog, minMatch, targetLength, strategy`.

use crate::params::{CompressionParameters, Strategy};

/// Highest compression level.
pub const MAX_CLEVEL: i32 = 22;

/// Level used when the caller asks for level 0.
pub const DEFAULT_CLEVEL: i32 = 3;

/// Source-size tiers: `> 256 KiB`, `<= 256 KiB`, `<= 128 KiB`, `<= 16 KiB`.
pub const NB_TIERS: usize = 4;

const fn p(
    window_log: u32,
    chain_log: u32,
    hash_log: u32,
    search_log: u32,
    min_match: u32,
    target_length: u32,
    strategy: Strategy,
) -> CompressionParameters {
    CompressionParameters {
        window_log,
        chain_log,
        hash_log,
        search_log,
        min_match,
        target_length,
        strategy,
    }
}

use Strategy::*;

/// The level table, indexed by `[tier][level]`.
pub static DEFAULT_CPARAMETERS: [[CompressionParameters; MAX_CLEVEL as usize + 1]; NB_TIERS] = [
    [
        // > 256 KiB
        p(19, 12, 13, 1, 6, 1, Fast),
        p(19, 13, 14, 1, 7, 0, Fast),
        p(20, 15, 16, 1, 6, 0, Fast),
        p(21, 16, 17, 1, 5, 0, DFast),
        p(21, 18, 18, 1, 5, 0, DFast),
        p(21, 18, 19, 3, 5, 2, Greedy),
        p(21, 18, 19, 3, 5, 4, Lazy),
        p(21, 19, 20, 4, 5, 8, Lazy),
        p(21, 19, 20, 4, 5, 16, Lazy2),
        p(22, 20, 21, 4, 5, 16, Lazy2),
        p(22, 21, 22, 5, 5, 16, Lazy2),
        p(22, 21, 22, 6, 5, 16, Lazy2),
        p(22, 22, 23, 6, 5, 32, Lazy2),
        p(22, 22, 22, 4, 5, 32, BtLazy2),
        p(22, 22, 23, 5, 5, 32, BtLazy2),
        p(22, 23, 23, 6, 5, 32, BtLazy2),
        p(22, 22, 22, 5, 5, 48, BtOpt),
        p(23, 23, 22, 5, 4, 64, BtOpt),
        p(23, 23, 22, 6, 3, 64, BtUltra),
        p(23, 24, 22, 7, 3, 256, BtUltra2),
        p(25, 25, 23, 7, 3, 256, BtUltra2),
        p(26, 26, 24, 7, 3, 512, BtUltra2),
        p(27, 27, 25, 9, 3, 999, BtUltra2),
    ],
    [
        // <= 256 KiB
        p(18, 12, 13, 1, 5, 1, Fast),
        p(18, 13, 14, 1, 6, 0, Fast),
        p(18, 14, 14, 1, 5, 0, DFast),
        p(18, 16, 16, 1, 4, 0, DFast),
        p(18, 16, 17, 3, 5, 2, Greedy),
        p(18, 17, 18, 5, 5, 2, Greedy),
        p(18, 18, 19, 3, 5, 4, Lazy),
        p(18, 18, 19, 4, 4, 4, Lazy),
        p(18, 18, 19, 4, 4, 8, Lazy2),
        p(18, 18, 19, 5, 4, 8, Lazy2),
        p(18, 18, 19, 6, 4, 8, Lazy2),
        p(18, 18, 19, 5, 4, 12, BtLazy2),
        p(18, 19, 19, 7, 4, 12, BtLazy2),
        p(18, 18, 19, 4, 4, 16, BtOpt),
        p(18, 18, 19, 4, 3, 32, BtOpt),
        p(18, 18, 19, 6, 3, 128, BtOpt),
        p(18, 19, 19, 6, 3, 128, BtUltra),
        p(18, 19, 19, 8, 3, 256, BtUltra),
        p(18, 19, 19, 6, 3, 128, BtUltra2),
        p(18, 19, 19, 8, 3, 256, BtUltra2),
        p(18, 19, 19, 10, 3, 512, BtUltra2),
        p(18, 19, 19, 12, 3, 512, BtUltra2),
        p(18, 19, 19, 13, 3, 999, BtUltra2),
    ],
    [
        // <= 128 KiB
        p(17, 12, 12, 1, 5, 1, Fast),
        p(17, 12, 13, 1, 6, 0, Fast),
        p(17, 13, 15, 1, 5, 0, Fast),
        p(17, 15, 16, 2, 5, 0, DFast),
        p(17, 17, 17, 2, 4, 0, DFast),
        p(17, 16, 17, 3, 4, 2, Greedy),
        p(17, 16, 17, 3, 4, 4, Lazy),
        p(17, 16, 17, 3, 4, 8, Lazy2),
        p(17, 16, 17, 4, 4, 8, Lazy2),
        p(17, 16, 17, 5, 4, 8, Lazy2),
        p(17, 16, 17, 6, 4, 8, Lazy2),
        p(17, 17, 17, 5, 4, 8, BtLazy2),
        p(17, 18, 17, 7, 4, 12, BtLazy2),
        p(17, 18, 17, 3, 4, 12, BtOpt),
        p(17, 18, 17, 4, 3, 32, BtOpt),
        p(17, 18, 17, 6, 3, 256, BtOpt),
        p(17, 18, 17, 6, 3, 128, BtUltra),
        p(17, 18, 17, 8, 3, 256, BtUltra),
        p(17, 18, 17, 10, 3, 512, BtUltra),
        p(17, 18, 17, 5, 3, 256, BtUltra2),
        p(17, 18, 17, 7, 3, 512, BtUltra2),
        p(17, 18, 17, 9, 3, 512, BtUltra2),
        p(17, 18, 17, 11, 3, 999, BtUltra2),
    ],
    [
        // <= 16 KiB
        p(14, 12, 13, 1, 5, 1, Fast),
        p(14, 14, 15, 1, 5, 0, Fast),
        p(14, 14, 15, 1, 4, 0, Fast),
        p(14, 14, 15, 2, 4, 0, DFast),
        p(14, 14, 14, 4, 4, 2, Greedy),
        p(14, 14, 14, 3, 4, 4, Lazy),
        p(14, 14, 14, 4, 4, 8, Lazy2),
        p(14, 14, 14, 6, 4, 8, Lazy2),
        p(14, 14, 14, 8, 4, 8, Lazy2),
        p(14, 15, 14, 5, 4, 8, BtLazy2),
        p(14, 15, 14, 9, 4, 8, BtLazy2),
        p(14, 15, 14, 3, 4, 12, BtOpt),
        p(14, 15, 14, 4, 3, 24, BtOpt),
        p(14, 15, 14, 5, 3, 32, BtUltra),
        p(14, 15, 15, 6, 3, 64, BtUltra),
        p(14, 15, 15, 7, 3, 256, BtUltra),
        p(14, 15, 15, 5, 3, 48, BtUltra2),
        p(14, 15, 15, 6, 3, 128, BtUltra2),
        p(14, 15, 15, 7, 3, 256, BtUltra2),
        p(14, 15, 15, 8, 3, 256, BtUltra2),
        p(14, 15, 15, 8, 3, 512, BtUltra2),
        p(14, 15, 15, 9, 3, 512, BtUltra2),
        p(14, 15, 15, 10, 3, 999, BtUltra2),
    ],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategies_non_decreasing_per_tier() {
        for tier in &DEFAULT_CPARAMETERS {
            for pair in tier[1..].windows(2) {
                assert!(pair[0].strategy <= pair[1].strategy);
            }
        }
    }

    #[test]
    fn test_table_within_bounds() {
        for tier in &DEFAULT_CPARAMETERS {
            for cp in tier {
                assert!(cp.check().is_ok(), "{cp:?}");
            }
        }
    }
}

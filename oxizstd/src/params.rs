//! Compression parameters and their resolution.
//!
//! Callers configure a context through a flat key/value surface
//! ([`CParameter`]) whose values are stored in [`CCtxParams`]. At the start
//! of every frame the stored values are resolved into concrete
//! [`CompressionParameters`]: the level table provides defaults for the
//! expected source size, explicit overrides win, and the result is shrunk
//! to what the input (plus dictionary) can actually use.

use crate::clevels::{DEFAULT_CLEVEL, DEFAULT_CPARAMETERS, MAX_CLEVEL};
use crate::{BLOCKSIZE_MAX, CONTENTSIZE_UNKNOWN};
use oxizstd_core::{Result, ZstdError};

/// Smallest window log a frame may declare.
pub const WINDOWLOG_ABSOLUTEMIN: u32 = 10;
/// Bounds of `windowLog`.
pub const WINDOWLOG_MIN: u32 = 10;
/// Bounds of `windowLog`.
pub const WINDOWLOG_MAX: u32 = 31;
/// Bounds of `hashLog`.
pub const HASHLOG_MIN: u32 = 6;
/// Bounds of `hashLog`.
pub const HASHLOG_MAX: u32 = 30;
/// Bounds of `chainLog`.
pub const CHAINLOG_MIN: u32 = 6;
/// Bounds of `chainLog`.
pub const CHAINLOG_MAX: u32 = 30;
/// Bounds of `searchLog`.
pub const SEARCHLOG_MIN: u32 = 1;
/// Bounds of `searchLog`.
pub const SEARCHLOG_MAX: u32 = WINDOWLOG_MAX - 1;
/// Bounds of `minMatch`.
pub const MINMATCH_MIN: u32 = 3;
/// Bounds of `minMatch`.
pub const MINMATCH_MAX: u32 = 7;
/// Bounds of `targetLength`.
pub const TARGETLENGTH_MAX: u32 = BLOCKSIZE_MAX as u32;
/// Smallest non-zero target compressed block size.
pub const TARGETCBLOCKSIZE_MIN: u32 = 1340;
/// Largest target compressed block size.
pub const TARGETCBLOCKSIZE_MAX: u32 = BLOCKSIZE_MAX as u32;
/// Smallest configurable maximum block size.
pub const BLOCKSIZE_MAX_MIN: u32 = 1 << 10;
/// Window log used when long-distance matching is enabled.
pub const LDM_DEFAULT_WINDOW_LOG: u32 = 27;
/// Number of tag bits stored per row entry.
pub const ROW_HASH_TAG_BITS: u32 = 8;

/// Lowest (fastest) compression level.
pub const fn min_clevel() -> i32 {
    -(TARGETLENGTH_MAX as i32)
}

/// Highest compression level.
pub const fn max_clevel() -> i32 {
    MAX_CLEVEL
}

/// Level used when none is configured.
pub const fn default_clevel() -> i32 {
    DEFAULT_CLEVEL
}

/// Match-finding strategy, ordered by effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
    /// Single hash table, skip-ahead search.
    Fast = 1,
    /// Two hash tables (short and long).
    DFast = 2,
    /// Lazy parser, depth 0.
    Greedy = 3,
    /// Lazy parser, depth 1.
    Lazy = 4,
    /// Lazy parser, depth 2.
    Lazy2 = 5,
    /// Lazy parser, depth 2, binary-tree search.
    BtLazy2 = 6,
    /// Binary-tree search, high effort.
    BtOpt = 7,
    /// Binary-tree search, higher effort.
    BtUltra = 8,
    /// Binary-tree search, highest effort.
    BtUltra2 = 9,
}

impl Strategy {
    /// Convert from the integer parameter value.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            1 => Strategy::Fast,
            2 => Strategy::DFast,
            3 => Strategy::Greedy,
            4 => Strategy::Lazy,
            5 => Strategy::Lazy2,
            6 => Strategy::BtLazy2,
            7 => Strategy::BtOpt,
            8 => Strategy::BtUltra,
            9 => Strategy::BtUltra2,
            _ => return None,
        })
    }

    /// Lazy lookahead depth used by the block parser.
    pub fn search_depth(self) -> u32 {
        match self {
            Strategy::Fast | Strategy::DFast | Strategy::Greedy => 0,
            Strategy::Lazy => 1,
            _ => 2,
        }
    }

    /// Whether the strategy searches with a binary tree.
    pub fn uses_binary_tree(self) -> bool {
        self >= Strategy::BtLazy2
    }

    /// Whether blocks are parsed by pricing every match path.
    pub fn uses_optimal_parser(self) -> bool {
        self >= Strategy::BtOpt
    }
}

/// Tri-state switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamSwitch {
    /// Let the engine decide.
    #[default]
    Auto = 0,
    /// Force on.
    Enable = 1,
    /// Force off.
    Disable = 2,
}

impl ParamSwitch {
    fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ParamSwitch::Auto),
            1 => Some(ParamSwitch::Enable),
            2 => Some(ParamSwitch::Disable),
            _ => None,
        }
    }
}

/// Frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Standard frames starting with the magic number.
    #[default]
    Zstd1 = 0,
    /// Frames without the 4-byte magic number.
    Magicless = 1,
}

/// Preference between referencing and copying a digested dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictAttachPref {
    /// Decide from the expected source size.
    #[default]
    Default = 0,
    /// Always reference the dictionary tables in place.
    ForceAttach = 1,
    /// Always copy the dictionary tables.
    ForceCopy = 2,
    /// Always reload the dictionary content.
    ForceLoad = 3,
}

/// Whether the caller keeps a streaming buffer in place between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// The context copies what it needs; the buffer may change freely.
    #[default]
    Buffered = 0,
    /// The caller passes the same buffer, with the cursor where the
    /// context left it, on every call of the frame.
    Stable = 1,
}

/// Why parameters are being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CParamMode {
    /// Regular compression; a dictionary, if any, is loaded.
    NoAttachDict,
    /// The dictionary is attached; its size does not affect the window.
    AttachDict,
    /// Parameters for building a digested dictionary.
    CreateCDict,
    /// No information.
    Unknown,
}

/// The seven core compression parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionParameters {
    /// Log2 of the largest back-reference distance.
    pub window_log: u32,
    /// Log2 of the chain (or binary-tree) table size.
    pub chain_log: u32,
    /// Log2 of the main hash table size.
    pub hash_log: u32,
    /// Log2 of the number of search attempts.
    pub search_log: u32,
    /// Shortest match searched for.
    pub min_match: u32,
    /// Match length that ends the search early (acceleration for `Fast`).
    pub target_length: u32,
    /// Match-finding strategy.
    pub strategy: Strategy,
}

impl Default for CompressionParameters {
    fn default() -> Self {
        get_cparams(DEFAULT_CLEVEL, CONTENTSIZE_UNKNOWN, 0)
    }
}

impl CompressionParameters {
    /// Reject any field outside its bounds.
    pub fn check(&self) -> Result<()> {
        check_bound(CParameter::WindowLog, self.window_log as i32)?;
        check_bound(CParameter::ChainLog, self.chain_log as i32)?;
        check_bound(CParameter::HashLog, self.hash_log as i32)?;
        check_bound(CParameter::SearchLog, self.search_log as i32)?;
        check_bound(CParameter::MinMatch, self.min_match as i32)?;
        check_bound(CParameter::TargetLength, self.target_length as i32)?;
        Ok(())
    }

    /// Clamp every field into its bounds.
    pub fn clamp(mut self) -> Self {
        let clamp = |param: CParameter, value: u32| -> u32 {
            let b = param.bounds();
            (value as i64).clamp(b.lower as i64, b.upper as i64) as u32
        };
        self.window_log = clamp(CParameter::WindowLog, self.window_log);
        self.chain_log = clamp(CParameter::ChainLog, self.chain_log);
        self.hash_log = clamp(CParameter::HashLog, self.hash_log);
        self.search_log = clamp(CParameter::SearchLog, self.search_log);
        self.min_match = clamp(CParameter::MinMatch, self.min_match);
        self.target_length = clamp(CParameter::TargetLength, self.target_length);
        self
    }

    /// Largest back-reference distance.
    pub fn window_size(&self) -> usize {
        1usize << self.window_log
    }
}

/// Frame-level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParameters {
    /// Write the content size in the frame header when known.
    pub content_size_flag: bool,
    /// Append an XXH64-based content checksum.
    pub checksum_flag: bool,
    /// Omit the dictionary id from the frame header.
    pub no_dict_id_flag: bool,
}

impl Default for FrameParameters {
    fn default() -> Self {
        Self {
            content_size_flag: true,
            checksum_flag: false,
            no_dict_id_flag: false,
        }
    }
}

/// Long-distance matching settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LdmParams {
    /// Whether long-distance matching is on.
    pub enable: ParamSwitch,
    /// Log2 of the LDM hash table size (0 = derive from windowLog).
    pub hash_log: u32,
    /// Log2 of the bucket size (0 = default).
    pub bucket_size_log: u32,
    /// Shortest long-distance match (0 = default).
    pub min_match_length: u32,
    /// Log2 of the insertion rate (0 = derive).
    pub hash_rate_log: u32,
}

/// Inclusive bounds of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    /// Smallest accepted value.
    pub lower: i32,
    /// Largest accepted value.
    pub upper: i32,
}

impl Bounds {
    const fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    /// Whether `value` lies within the bounds.
    pub fn contains(&self, value: i32) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
}

/// Flat parameter space of a compression context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CParameter {
    /// Compression level (clamped, 0 selects the default).
    CompressionLevel,
    /// Log2 of the window size.
    WindowLog,
    /// Log2 of the main hash table size.
    HashLog,
    /// Log2 of the chain table size.
    ChainLog,
    /// Log2 of the number of search attempts.
    SearchLog,
    /// Minimum match length.
    MinMatch,
    /// Target match length.
    TargetLength,
    /// Strategy, as its integer value.
    Strategy,
    /// Long-distance matching switch.
    EnableLongDistanceMatching,
    /// LDM hash table size log.
    LdmHashLog,
    /// LDM minimum match length.
    LdmMinMatch,
    /// LDM bucket size log.
    LdmBucketSizeLog,
    /// LDM insertion rate log.
    LdmHashRateLog,
    /// Content size in frame header.
    ContentSizeFlag,
    /// Content checksum.
    ChecksumFlag,
    /// Dictionary id in frame header.
    DictIdFlag,
    /// Frame format.
    Format,
    /// Dictionary attach/copy preference.
    ForceAttachDict,
    /// Huffman compression of literals.
    LiteralCompressionMode,
    /// Target compressed block size (0 = off).
    TargetCBlockSize,
    /// Row-based match finder switch.
    UseRowMatchFinder,
    /// Block splitting switch.
    SplitBlocks,
    /// Dedicated dictionary search for digested dictionaries.
    EnableDedicatedDictSearch,
    /// Validate externally produced sequences.
    ValidateSequences,
    /// Fall back to internal match finding when the sequence producer fails.
    EnableSeqProducerFallback,
    /// Largest uncompressed block size (0 = 128 KiB).
    MaxBlockSize,
    /// Keep the requested window even when a dictionary would shrink it.
    ForceMaxWindow,
    /// Input buffer mode.
    InBufferMode,
    /// Output buffer mode.
    OutBufferMode,
}

impl CParameter {
    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            CParameter::CompressionLevel => "compressionLevel",
            CParameter::WindowLog => "windowLog",
            CParameter::HashLog => "hashLog",
            CParameter::ChainLog => "chainLog",
            CParameter::SearchLog => "searchLog",
            CParameter::MinMatch => "minMatch",
            CParameter::TargetLength => "targetLength",
            CParameter::Strategy => "strategy",
            CParameter::EnableLongDistanceMatching => "enableLongDistanceMatching",
            CParameter::LdmHashLog => "ldmHashLog",
            CParameter::LdmMinMatch => "ldmMinMatch",
            CParameter::LdmBucketSizeLog => "ldmBucketSizeLog",
            CParameter::LdmHashRateLog => "ldmHashRateLog",
            CParameter::ContentSizeFlag => "contentSizeFlag",
            CParameter::ChecksumFlag => "checksumFlag",
            CParameter::DictIdFlag => "dictIDFlag",
            CParameter::Format => "format",
            CParameter::ForceAttachDict => "forceAttachDict",
            CParameter::LiteralCompressionMode => "literalCompressionMode",
            CParameter::TargetCBlockSize => "targetCBlockSize",
            CParameter::UseRowMatchFinder => "useRowMatchFinder",
            CParameter::SplitBlocks => "splitBlocks",
            CParameter::EnableDedicatedDictSearch => "enableDedicatedDictSearch",
            CParameter::ValidateSequences => "validateSequences",
            CParameter::EnableSeqProducerFallback => "enableSeqProducerFallback",
            CParameter::MaxBlockSize => "maxBlockSize",
            CParameter::ForceMaxWindow => "forceMaxWindow",
            CParameter::InBufferMode => "inBufferMode",
            CParameter::OutBufferMode => "outBufferMode",
        }
    }

    /// Accepted values of the parameter.
    pub fn bounds(self) -> Bounds {
        match self {
            CParameter::CompressionLevel => Bounds::new(min_clevel(), max_clevel()),
            CParameter::WindowLog => Bounds::new(WINDOWLOG_MIN as i32, WINDOWLOG_MAX as i32),
            CParameter::HashLog => Bounds::new(HASHLOG_MIN as i32, HASHLOG_MAX as i32),
            CParameter::ChainLog => Bounds::new(CHAINLOG_MIN as i32, CHAINLOG_MAX as i32),
            CParameter::SearchLog => Bounds::new(SEARCHLOG_MIN as i32, SEARCHLOG_MAX as i32),
            CParameter::MinMatch => Bounds::new(MINMATCH_MIN as i32, MINMATCH_MAX as i32),
            CParameter::TargetLength => Bounds::new(0, TARGETLENGTH_MAX as i32),
            CParameter::Strategy => {
                Bounds::new(Strategy::Fast as i32, Strategy::BtUltra2 as i32)
            }
            CParameter::EnableLongDistanceMatching
            | CParameter::LiteralCompressionMode
            | CParameter::UseRowMatchFinder
            | CParameter::SplitBlocks => Bounds::new(0, 2),
            CParameter::LdmHashLog => Bounds::new(HASHLOG_MIN as i32, HASHLOG_MAX as i32),
            CParameter::LdmMinMatch => Bounds::new(4, 4096),
            CParameter::LdmBucketSizeLog => Bounds::new(1, 8),
            CParameter::LdmHashRateLog => {
                Bounds::new(0, (WINDOWLOG_MAX - HASHLOG_MIN) as i32)
            }
            CParameter::ContentSizeFlag
            | CParameter::ChecksumFlag
            | CParameter::DictIdFlag
            | CParameter::EnableDedicatedDictSearch
            | CParameter::ValidateSequences
            | CParameter::EnableSeqProducerFallback
            | CParameter::ForceMaxWindow => Bounds::new(0, 1),
            CParameter::Format | CParameter::InBufferMode | CParameter::OutBufferMode => {
                Bounds::new(0, 1)
            }
            CParameter::ForceAttachDict => Bounds::new(0, 3),
            CParameter::TargetCBlockSize => {
                Bounds::new(TARGETCBLOCKSIZE_MIN as i32, TARGETCBLOCKSIZE_MAX as i32)
            }
            CParameter::MaxBlockSize => Bounds::new(BLOCKSIZE_MAX_MIN as i32, BLOCKSIZE_MAX as i32),
        }
    }
}

fn check_bound(param: CParameter, value: i32) -> Result<()> {
    let b = param.bounds();
    if b.contains(value) {
        Ok(())
    } else {
        Err(ZstdError::parameter_out_of_bound(
            param.name(),
            value as i64,
            b.lower as i64,
            b.upper as i64,
        ))
    }
}

/// Every value configurable on a compression context.
///
/// Core parameters left at `0` mean "derive from the compression level".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CCtxParams {
    /// Frame format.
    pub format: Format,
    /// Explicit core parameter overrides (0 = unset).
    pub cparams: ExplicitCParams,
    /// Frame flags.
    pub fparams: FrameParameters,
    /// Compression level.
    pub compression_level: i32,
    /// Target compressed block size (0 = off).
    pub target_cblock_size: usize,
    /// Dictionary attach/copy preference.
    pub attach_dict_pref: DictAttachPref,
    /// Huffman compression of literals.
    pub literal_compression_mode: ParamSwitch,
    /// Long-distance matching.
    pub ldm: LdmParams,
    /// Row-based match finder.
    pub use_row_match_finder: ParamSwitch,
    /// Block splitting.
    pub use_block_splitter: ParamSwitch,
    /// Build digested dictionaries with a dedicated search structure.
    pub enable_dedicated_dict_search: bool,
    /// Validate externally produced sequences.
    pub validate_sequences: bool,
    /// Fall back to internal match finding when a producer fails.
    pub enable_seq_producer_fallback: bool,
    /// Largest uncompressed block size (0 = 128 KiB).
    pub max_block_size: usize,
    /// Never let a dictionary extend the window past `window_log`.
    pub force_window: bool,
    /// Input buffer mode.
    pub in_buffer_mode: BufferMode,
    /// Output buffer mode.
    pub out_buffer_mode: BufferMode,
}

/// Explicit overrides of [`CompressionParameters`]; `0` means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExplicitCParams {
    /// Window log override.
    pub window_log: u32,
    /// Chain log override.
    pub chain_log: u32,
    /// Hash log override.
    pub hash_log: u32,
    /// Search log override.
    pub search_log: u32,
    /// Minimum match override.
    pub min_match: u32,
    /// Target length override.
    pub target_length: u32,
    /// Strategy override.
    pub strategy: Option<Strategy>,
}

impl ExplicitCParams {
    /// Overrides that pin every field to `cparams`.
    pub fn from_cparams(cparams: &CompressionParameters) -> Self {
        Self {
            window_log: cparams.window_log,
            chain_log: cparams.chain_log,
            hash_log: cparams.hash_log,
            search_log: cparams.search_log,
            min_match: cparams.min_match,
            target_length: cparams.target_length,
            strategy: Some(cparams.strategy),
        }
    }

    /// Replace fields of `cparams` with every override that is set.
    pub fn apply(&self, cparams: &mut CompressionParameters) {
        if self.window_log != 0 {
            cparams.window_log = self.window_log;
        }
        if self.chain_log != 0 {
            cparams.chain_log = self.chain_log;
        }
        if self.hash_log != 0 {
            cparams.hash_log = self.hash_log;
        }
        if self.search_log != 0 {
            cparams.search_log = self.search_log;
        }
        if self.min_match != 0 {
            cparams.min_match = self.min_match;
        }
        if self.target_length != 0 {
            cparams.target_length = self.target_length;
        }
        if let Some(strategy) = self.strategy {
            cparams.strategy = strategy;
        }
    }
}

impl Default for CCtxParams {
    fn default() -> Self {
        Self::with_level(DEFAULT_CLEVEL)
    }
}

impl CCtxParams {
    /// Parameters for `level` with every other setting at its default.
    pub fn with_level(level: i32) -> Self {
        Self {
            format: Format::Zstd1,
            cparams: ExplicitCParams::default(),
            fparams: FrameParameters::default(),
            compression_level: level.clamp(min_clevel(), max_clevel()),
            target_cblock_size: 0,
            attach_dict_pref: DictAttachPref::Default,
            literal_compression_mode: ParamSwitch::Auto,
            ldm: LdmParams::default(),
            use_row_match_finder: ParamSwitch::Auto,
            use_block_splitter: ParamSwitch::Auto,
            enable_dedicated_dict_search: false,
            validate_sequences: false,
            enable_seq_producer_fallback: false,
            max_block_size: 0,
            force_window: false,
            in_buffer_mode: BufferMode::Buffered,
            out_buffer_mode: BufferMode::Buffered,
        }
    }

    /// Parameters pinned to explicit core parameters.
    pub fn with_cparams(cparams: CompressionParameters, fparams: FrameParameters) -> Self {
        let mut params = Self::default();
        params.cparams = ExplicitCParams::from_cparams(&cparams);
        params.fparams = fparams;
        params
    }

    /// Set one parameter. `0` resets a core parameter to "derive from level".
    ///
    /// Returns the value actually stored.
    pub fn set_parameter(&mut self, param: CParameter, value: i32) -> Result<i32> {
        let switch = |value: i32| -> Result<ParamSwitch> {
            check_bound(param, value)?;
            ParamSwitch::from_i32(value).ok_or_else(|| ZstdError::parameter_unsupported(param.name()))
        };
        match param {
            CParameter::CompressionLevel => {
                let level = value.clamp(min_clevel(), max_clevel());
                self.compression_level = if level == 0 { DEFAULT_CLEVEL } else { level };
                return Ok(self.compression_level);
            }
            CParameter::WindowLog => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.cparams.window_log = value as u32;
            }
            CParameter::HashLog => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.cparams.hash_log = value as u32;
            }
            CParameter::ChainLog => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.cparams.chain_log = value as u32;
            }
            CParameter::SearchLog => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.cparams.search_log = value as u32;
            }
            CParameter::MinMatch => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.cparams.min_match = value as u32;
            }
            CParameter::TargetLength => {
                check_bound(param, value)?;
                self.cparams.target_length = value as u32;
            }
            CParameter::Strategy => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.cparams.strategy = Strategy::from_i32(value);
            }
            CParameter::EnableLongDistanceMatching => self.ldm.enable = switch(value)?,
            CParameter::LdmHashLog => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.ldm.hash_log = value as u32;
            }
            CParameter::LdmMinMatch => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.ldm.min_match_length = value as u32;
            }
            CParameter::LdmBucketSizeLog => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.ldm.bucket_size_log = value as u32;
            }
            CParameter::LdmHashRateLog => {
                check_bound(param, value)?;
                self.ldm.hash_rate_log = value as u32;
            }
            CParameter::ContentSizeFlag => self.fparams.content_size_flag = value != 0,
            CParameter::ChecksumFlag => self.fparams.checksum_flag = value != 0,
            CParameter::DictIdFlag => self.fparams.no_dict_id_flag = value == 0,
            CParameter::Format => {
                check_bound(param, value)?;
                self.format = if value == 1 {
                    Format::Magicless
                } else {
                    Format::Zstd1
                };
            }
            CParameter::ForceAttachDict => {
                check_bound(param, value)?;
                self.attach_dict_pref = match value {
                    1 => DictAttachPref::ForceAttach,
                    2 => DictAttachPref::ForceCopy,
                    3 => DictAttachPref::ForceLoad,
                    _ => DictAttachPref::Default,
                };
            }
            CParameter::LiteralCompressionMode => self.literal_compression_mode = switch(value)?,
            CParameter::TargetCBlockSize => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.target_cblock_size = value as usize;
            }
            CParameter::UseRowMatchFinder => self.use_row_match_finder = switch(value)?,
            CParameter::SplitBlocks => self.use_block_splitter = switch(value)?,
            CParameter::EnableDedicatedDictSearch => {
                self.enable_dedicated_dict_search = value != 0
            }
            CParameter::ValidateSequences => self.validate_sequences = value != 0,
            CParameter::EnableSeqProducerFallback => {
                self.enable_seq_producer_fallback = value != 0
            }
            CParameter::MaxBlockSize => {
                if value != 0 {
                    check_bound(param, value)?;
                }
                self.max_block_size = value as usize;
            }
            CParameter::ForceMaxWindow => self.force_window = value != 0,
            CParameter::InBufferMode | CParameter::OutBufferMode => {
                check_bound(param, value)?;
                let mode = if value == 1 {
                    BufferMode::Stable
                } else {
                    BufferMode::Buffered
                };
                if param == CParameter::InBufferMode {
                    self.in_buffer_mode = mode;
                } else {
                    self.out_buffer_mode = mode;
                }
            }
        }
        Ok(value)
    }

    /// Read back a stored parameter value.
    pub fn get_parameter(&self, param: CParameter) -> i32 {
        match param {
            CParameter::CompressionLevel => self.compression_level,
            CParameter::WindowLog => self.cparams.window_log as i32,
            CParameter::HashLog => self.cparams.hash_log as i32,
            CParameter::ChainLog => self.cparams.chain_log as i32,
            CParameter::SearchLog => self.cparams.search_log as i32,
            CParameter::MinMatch => self.cparams.min_match as i32,
            CParameter::TargetLength => self.cparams.target_length as i32,
            CParameter::Strategy => self.cparams.strategy.map_or(0, |s| s as i32),
            CParameter::EnableLongDistanceMatching => self.ldm.enable as i32,
            CParameter::LdmHashLog => self.ldm.hash_log as i32,
            CParameter::LdmMinMatch => self.ldm.min_match_length as i32,
            CParameter::LdmBucketSizeLog => self.ldm.bucket_size_log as i32,
            CParameter::LdmHashRateLog => self.ldm.hash_rate_log as i32,
            CParameter::ContentSizeFlag => self.fparams.content_size_flag as i32,
            CParameter::ChecksumFlag => self.fparams.checksum_flag as i32,
            CParameter::DictIdFlag => (!self.fparams.no_dict_id_flag) as i32,
            CParameter::Format => self.format as i32,
            CParameter::ForceAttachDict => self.attach_dict_pref as i32,
            CParameter::LiteralCompressionMode => self.literal_compression_mode as i32,
            CParameter::TargetCBlockSize => self.target_cblock_size as i32,
            CParameter::UseRowMatchFinder => self.use_row_match_finder as i32,
            CParameter::SplitBlocks => self.use_block_splitter as i32,
            CParameter::EnableDedicatedDictSearch => self.enable_dedicated_dict_search as i32,
            CParameter::ValidateSequences => self.validate_sequences as i32,
            CParameter::EnableSeqProducerFallback => self.enable_seq_producer_fallback as i32,
            CParameter::MaxBlockSize => self.max_block_size as i32,
            CParameter::ForceMaxWindow => self.force_window as i32,
            CParameter::InBufferMode => self.in_buffer_mode as i32,
            CParameter::OutBufferMode => self.out_buffer_mode as i32,
        }
    }
}

/// Size class used to pick a row of the level table.
///
/// An unknown source size with a dictionary is treated as a small input.
fn row_size(src_size_hint: u64, dict_size: u64, mode: CParamMode) -> u64 {
    let dict_size = if mode == CParamMode::AttachDict {
        0
    } else {
        dict_size
    };
    let unknown = src_size_hint == CONTENTSIZE_UNKNOWN;
    let added = if unknown && dict_size > 0 { 500 } else { 0 };
    if unknown && dict_size == 0 {
        CONTENTSIZE_UNKNOWN
    } else {
        src_size_hint
            .wrapping_add(dict_size)
            .wrapping_add(added)
    }
}

fn get_cparams_internal(
    level: i32,
    src_size_hint: u64,
    dict_size: u64,
    mode: CParamMode,
) -> CompressionParameters {
    let r_size = row_size(src_size_hint, dict_size, mode);
    let tier = (r_size <= 256 * 1024) as usize
        + (r_size <= 128 * 1024) as usize
        + (r_size <= 16 * 1024) as usize;
    let row = match level {
        0 => DEFAULT_CLEVEL,
        l if l < 0 => 0,
        l => l.min(MAX_CLEVEL),
    } as usize;
    let mut cp = DEFAULT_CPARAMETERS[tier][row];
    if level < 0 {
        cp.target_length = level.max(min_clevel()).unsigned_abs();
    }
    adjust_cparams_internal(cp, src_size_hint, dict_size, mode, ParamSwitch::Auto)
}

/// Parameters for `level` tuned to `src_size_hint` and `dict_size`.
///
/// Pure: identical inputs give identical outputs.
pub fn get_cparams(level: i32, src_size_hint: u64, dict_size: u64) -> CompressionParameters {
    let src = if src_size_hint == 0 {
        CONTENTSIZE_UNKNOWN
    } else {
        src_size_hint
    };
    get_cparams_internal(level, src, dict_size, CParamMode::Unknown)
}

/// Log2 of a window that covers both the dictionary and the source.
fn dict_and_window_log(window_log: u32, src_size: u64, dict_size: u64) -> u32 {
    let max_window_size = 1u64 << WINDOWLOG_MAX;
    if dict_size == 0 {
        return window_log;
    }
    let window_size = 1u64 << window_log;
    let dict_and_window = dict_size + window_size;
    if window_size >= dict_size + src_size {
        window_log
    } else if dict_and_window >= max_window_size {
        WINDOWLOG_MAX
    } else {
        highbit64(dict_and_window - 1) + 1
    }
}

/// Effective chain cycle: binary trees use two cells per position.
pub fn cycle_log(chain_log: u32, strategy: Strategy) -> u32 {
    chain_log - strategy.uses_binary_tree() as u32
}

#[inline]
fn highbit64(v: u64) -> u32 {
    63 - v.leading_zeros()
}

pub(crate) fn adjust_cparams_internal(
    mut cp: CompressionParameters,
    src_size: u64,
    dict_size: u64,
    mode: CParamMode,
    use_row_match_finder: ParamSwitch,
) -> CompressionParameters {
    const MIN_SRC_SIZE: u64 = 513;
    let max_window_resize = 1u64 << (WINDOWLOG_MAX - 1);

    let mut src_size = src_size;
    let mut dict_size = dict_size;
    match mode {
        CParamMode::CreateCDict => {
            if dict_size > 0 && src_size == CONTENTSIZE_UNKNOWN {
                src_size = MIN_SRC_SIZE;
            }
        }
        CParamMode::AttachDict => dict_size = 0,
        CParamMode::NoAttachDict | CParamMode::Unknown => {}
    }

    // Shrink the window to what the input can use.
    if src_size <= max_window_resize && dict_size <= max_window_resize {
        let t_size = src_size + dict_size;
        let hash_size_min = 1u64 << HASHLOG_MIN;
        let src_log = if t_size < hash_size_min {
            HASHLOG_MIN
        } else {
            highbit64(t_size - 1) + 1
        };
        if cp.window_log > src_log {
            cp.window_log = src_log;
        }
    }
    if src_size != CONTENTSIZE_UNKNOWN {
        let dw_log = dict_and_window_log(cp.window_log, src_size, dict_size);
        let c_log = cycle_log(cp.chain_log, cp.strategy);
        if cp.hash_log > dw_log + 1 {
            cp.hash_log = dw_log + 1;
        }
        if c_log > dw_log {
            cp.chain_log -= c_log - dw_log;
        }
    }
    if cp.window_log < WINDOWLOG_ABSOLUTEMIN {
        cp.window_log = WINDOWLOG_ABSOLUTEMIN;
    }

    // Rows keep tag bits inside each 32-bit hash; cap the hash log.
    let use_row = if use_row_match_finder == ParamSwitch::Auto {
        ParamSwitch::Enable
    } else {
        use_row_match_finder
    };
    if row_match_finder_used(cp.strategy, use_row) {
        let row_log = crate::match_state::row_log(cp.search_log);
        let max_hash_log = 32 - ROW_HASH_TAG_BITS + row_log;
        if cp.hash_log > max_hash_log {
            cp.hash_log = max_hash_log;
        }
    }
    cp
}

/// Fit `cparams` to a source of `src_size` bytes with a `dict_size` dictionary.
///
/// Fields are clamped first; nothing grows beyond what was given.
pub fn adjust_cparams(
    cparams: CompressionParameters,
    src_size: u64,
    dict_size: u64,
) -> CompressionParameters {
    let src = if src_size == 0 {
        CONTENTSIZE_UNKNOWN
    } else {
        src_size
    };
    adjust_cparams_internal(cparams.clamp(), src, dict_size, CParamMode::Unknown, ParamSwitch::Auto)
}

/// Resolve the parameters a frame will actually use.
pub fn get_cparams_from_cctx_params(
    params: &CCtxParams,
    src_size_hint: u64,
    dict_size: u64,
    mode: CParamMode,
) -> CompressionParameters {
    let mut cp = get_cparams_internal(params.compression_level, src_size_hint, dict_size, mode);
    if resolve_enable_ldm(params.ldm.enable, &cp) == ParamSwitch::Enable {
        cp.window_log = LDM_DEFAULT_WINDOW_LOG;
    }
    params.cparams.apply(&mut cp);
    adjust_cparams_internal(
        cp,
        src_size_hint,
        dict_size,
        mode,
        params.use_row_match_finder,
    )
}

/// Parameters of a digested dictionary carrying a dedicated search index.
/// Lazy strategies get a hash table one bucket wider per cell.
pub fn dedicated_dict_search_cparams(level: i32, dict_size: u64) -> CompressionParameters {
    let mut cp = get_cparams_internal(level, 0, dict_size, CParamMode::CreateCDict);
    if (Strategy::Greedy..=Strategy::Lazy2).contains(&cp.strategy) {
        cp.hash_log += crate::dds::BUCKET_LOG;
    }
    cp
}

/// Whether a dedicated search index can be built for `cparams`.
pub fn dedicated_dict_search_supported(cparams: &CompressionParameters) -> bool {
    (Strategy::Greedy..=Strategy::Lazy2).contains(&cparams.strategy)
        && cparams.hash_log > cparams.chain_log
        && cparams.chain_log <= 24
}

/// Parameters for a context attaching a dedicated-search dictionary: the
/// local tables do not need the bucket growth.
pub fn revert_dedicated_dict_search_cparams(cparams: &mut CompressionParameters) {
    if (Strategy::Greedy..=Strategy::Lazy2).contains(&cparams.strategy) {
        cparams.hash_log = cparams
            .hash_log
            .saturating_sub(crate::dds::BUCKET_LOG)
            .max(HASHLOG_MIN);
    }
}

/// Whether the row match finder can serve `strategy` at all.
pub fn row_match_finder_supported(strategy: Strategy) -> bool {
    (Strategy::Greedy..=Strategy::Lazy2).contains(&strategy)
}

/// Whether the row match finder is in use for a resolved switch.
pub fn row_match_finder_used(strategy: Strategy, mode: ParamSwitch) -> bool {
    row_match_finder_supported(strategy) && mode == ParamSwitch::Enable
}

/// Window log above which rows beat hash chains.
const fn row_window_log_threshold() -> u32 {
    if cfg!(any(target_feature = "sse2", target_feature = "neon")) {
        14
    } else {
        17
    }
}

/// Resolve an `Auto` row-matchfinder switch.
pub fn resolve_row_match_finder_mode(
    mode: ParamSwitch,
    cparams: &CompressionParameters,
) -> ParamSwitch {
    if mode != ParamSwitch::Auto {
        return mode;
    }
    if row_match_finder_supported(cparams.strategy)
        && cparams.window_log > row_window_log_threshold()
    {
        ParamSwitch::Enable
    } else {
        ParamSwitch::Disable
    }
}

/// Resolve an `Auto` block-splitter switch.
pub fn resolve_block_splitter_mode(
    mode: ParamSwitch,
    cparams: &CompressionParameters,
) -> ParamSwitch {
    if mode != ParamSwitch::Auto {
        return mode;
    }
    if cparams.strategy >= Strategy::BtOpt && cparams.window_log >= 17 {
        ParamSwitch::Enable
    } else {
        ParamSwitch::Disable
    }
}

/// Resolve an `Auto` long-distance-matching switch.
pub fn resolve_enable_ldm(mode: ParamSwitch, cparams: &CompressionParameters) -> ParamSwitch {
    if mode != ParamSwitch::Auto {
        return mode;
    }
    if cparams.strategy >= Strategy::BtOpt && cparams.window_log >= 27 {
        ParamSwitch::Enable
    } else {
        ParamSwitch::Disable
    }
}

/// Whether literals are left uncompressed.
pub fn literals_compression_disabled(
    mode: ParamSwitch,
    cparams: &CompressionParameters,
) -> bool {
    match mode {
        ParamSwitch::Enable => false,
        ParamSwitch::Disable => true,
        ParamSwitch::Auto => cparams.strategy == Strategy::Fast && cparams.target_length > 0,
    }
}

/// Resolved maximum block size.
pub fn resolve_max_block_size(max_block_size: usize) -> usize {
    if max_block_size == 0 {
        BLOCKSIZE_MAX
    } else {
        max_block_size
    }
}

/// Largest pledged size for which a digested dictionary is attached rather
/// than copied, per strategy.
pub fn attach_dict_size_cutoff(strategy: Strategy) -> u64 {
    const KB: u64 = 1024;
    match strategy {
        Strategy::Fast => 8 * KB,
        Strategy::DFast => 16 * KB,
        Strategy::Greedy
        | Strategy::Lazy
        | Strategy::Lazy2
        | Strategy::BtLazy2
        | Strategy::BtOpt => 32 * KB,
        Strategy::BtUltra | Strategy::BtUltra2 => 8 * KB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_cparams_tiers() {
        let small = get_cparams(3, 1000, 0);
        assert_eq!(small.strategy, Strategy::DFast);
        assert!(small.window_log <= 10);

        let large = get_cparams(3, CONTENTSIZE_UNKNOWN, 0);
        assert_eq!(large.window_log, 21);
        assert_eq!(large.hash_log, 17);
        assert_eq!(large.chain_log, 16);
    }

    #[test]
    fn test_get_cparams_pure_and_bounded() {
        for level in [-5, 0, 1, 3, 7, 12, 19, 22, 40] {
            for size in [1u64, 100, 20_000, 200_000, 1 << 20, CONTENTSIZE_UNKNOWN] {
                for dict in [0u64, 3, 64 * 1024] {
                    let a = get_cparams(level, size, dict);
                    let b = get_cparams(level, size, dict);
                    assert_eq!(a, b);
                    assert!(a.check().is_ok(), "{level} {size} {dict}: {a:?}");
                }
            }
        }
    }

    #[test]
    fn test_negative_level_acceleration() {
        let cp = get_cparams(-7, CONTENTSIZE_UNKNOWN, 0);
        assert_eq!(cp.strategy, Strategy::Fast);
        assert_eq!(cp.target_length, 7);
    }

    #[test]
    fn test_adjust_never_grows() {
        let cp = get_cparams(19, CONTENTSIZE_UNKNOWN, 0);
        let adjusted = adjust_cparams(cp, 5000, 0);
        assert!(adjusted.window_log <= cp.window_log);
        assert!(adjusted.hash_log <= cp.hash_log);
        assert!(adjusted.chain_log <= cp.chain_log);
        assert_eq!(adjusted.window_log, 13);
    }

    #[test]
    fn test_set_parameter_bounds() {
        let mut params = CCtxParams::default();
        let err = params.set_parameter(CParameter::WindowLog, 40).unwrap_err();
        assert_eq!(err.code(), oxizstd_core::ErrorCode::ParameterOutOfBound);
        params.set_parameter(CParameter::WindowLog, 20).unwrap();
        assert_eq!(params.get_parameter(CParameter::WindowLog), 20);
        params.set_parameter(CParameter::WindowLog, 0).unwrap();
        assert_eq!(params.get_parameter(CParameter::WindowLog), 0);

        // Levels are clamped, 0 selects the default.
        assert_eq!(params.set_parameter(CParameter::CompressionLevel, 100).unwrap(), 22);
        assert_eq!(params.set_parameter(CParameter::CompressionLevel, 0).unwrap(), 3);

        assert!(params.set_parameter(CParameter::TargetCBlockSize, 100).is_err());
        params.set_parameter(CParameter::TargetCBlockSize, 2000).unwrap();
        params.set_parameter(CParameter::TargetCBlockSize, 0).unwrap();
    }

    #[test]
    fn test_overrides_applied_then_adjusted() {
        let mut params = CCtxParams::with_level(5);
        params.set_parameter(CParameter::WindowLog, 25).unwrap();
        params.set_parameter(CParameter::Strategy, 4).unwrap();
        let cp = get_cparams_from_cctx_params(&params, 1 << 16, 0, CParamMode::NoAttachDict);
        assert_eq!(cp.strategy, Strategy::Lazy);
        assert_eq!(cp.window_log, 16);
    }

    #[test]
    fn test_row_mode_resolution() {
        let mut cp = get_cparams(5, CONTENTSIZE_UNKNOWN, 0);
        assert_eq!(
            resolve_row_match_finder_mode(ParamSwitch::Auto, &cp),
            ParamSwitch::Enable
        );
        cp.window_log = 12;
        assert_eq!(
            resolve_row_match_finder_mode(ParamSwitch::Auto, &cp),
            ParamSwitch::Disable
        );
        cp.strategy = Strategy::BtLazy2;
        cp.window_log = 22;
        assert_eq!(
            resolve_row_match_finder_mode(ParamSwitch::Auto, &cp),
            ParamSwitch::Disable
        );
        assert_eq!(
            resolve_row_match_finder_mode(ParamSwitch::Enable, &cp),
            ParamSwitch::Enable
        );
    }

    #[test]
    fn test_dedicated_dict_search_params() {
        let plain = get_cparams_internal(5, 0, 32 * 1024, CParamMode::CreateCDict);
        let mut dds = dedicated_dict_search_cparams(5, 32 * 1024);
        assert_eq!(dds.hash_log, plain.hash_log + crate::dds::BUCKET_LOG);
        assert!(dedicated_dict_search_supported(&dds));
        revert_dedicated_dict_search_cparams(&mut dds);
        assert_eq!(dds.hash_log, plain.hash_log);

        let fast = dedicated_dict_search_cparams(1, 32 * 1024);
        assert!(!dedicated_dict_search_supported(&fast));
    }

    #[test]
    fn test_strategy_bounds_and_depth() {
        assert_eq!(CParameter::Strategy.bounds(), Bounds { lower: 1, upper: 9 });
        assert_eq!(Strategy::Greedy.search_depth(), 0);
        assert_eq!(Strategy::Lazy.search_depth(), 1);
        assert_eq!(Strategy::BtLazy2.search_depth(), 2);
    }
}

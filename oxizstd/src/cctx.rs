//! Compression context.
//!
//! A [`CCtx`] draws all of its memory from one [`Workspace`]: search
//! tables at the front, sequence buffers and byte buffers at the tail. The
//! tail holds a history buffer (`[window | buffered input]`) that every
//! block is compressed from, so one-shot and streaming compression run the
//! same code on the same positions and produce the same bytes.
//!
//! Frames are opened lazily by the first streaming call (or by
//! [`CCtx::compress2`]), which resolves parameters, resets the workspace
//! and applies the active dictionary in one of three ways:
//!
//! - **attach**: search a [`CDict`]'s tables in place next to local tables
//! - **copy**: duplicate a [`CDict`]'s tables and content
//! - **load**: insert raw dictionary content into fresh tables

use oxizstd_core::{EndDirective, InBuffer, OutBuffer, StreamCompressor};
use tracing::{debug, trace};

use crate::block::{
    self, BLOCK_HEADER_SIZE, BlockOptions, BlockState, MAX_NB_BLOCK_SPLITS, write_raw_block,
};
use crate::cdict::{CDict, DictContentType, parse_dictionary};
use crate::checksum::{CHECKSUM_SIZE, FrameChecksum};
use crate::frame::{FRAME_HEADER_SIZE_MAX, write_frame_header};
use crate::match_state::{
    DictMode, MatchCtx, MatchState, MatchTables, TableSizes, select_block_compressor,
};
use crate::opt::{MatchCandidate, OPT_MATCHES, OPT_NODES, OPT_STATS_BYTES, OptNode, OptState, OptStats};
use crate::params::{
    BufferMode, CCtxParams, CParamMode, CParameter, CompressionParameters, DictAttachPref, ParamSwitch,
    adjust_cparams_internal, get_cparams_from_cctx_params, literals_compression_disabled,
    resolve_block_splitter_mode, resolve_max_block_size, resolve_row_match_finder_mode,
    revert_dedicated_dict_search_cparams, row_match_finder_used,
};
use crate::producer::{BlockSplitter, SequenceBounds, SequenceProducer, transfer_sequences};
use crate::seq_store::{Repcodes, SeqStore};
use crate::sequences::Sequence;
use crate::window::Window;
use crate::workspace::{
    Region, Workspace, aligned_space, as_cells_mut, as_u16s_mut, as_u32s_mut, buffer_space, object_space, slack_space,
};
use crate::{BLOCKSIZE_MAX, CONTENTSIZE_UNKNOWN, Result, ZstdError, compress_capacity};

/// Blocks shorter than this are stored raw without being parsed.
const MIN_COMPRESSIBLE_BLOCK: usize = 1 + 1 + BLOCK_HEADER_SIZE + 1 + 1;

/// Largest frame epilogue: a header for an empty frame, the closing empty
/// block and the checksum.
const EPILOGUE_MAX: usize = FRAME_HEADER_SIZE_MAX + BLOCK_HEADER_SIZE + CHECKSUM_SIZE;

/// Smallest block a compressed-size target may cap blocks to.
const TARGET_CBLOCK_FLOOR: usize = 1 << 10;

/// What [`CCtx::reset`] forgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDirective {
    /// Abandon the current frame. Parameters and dictionaries stay.
    SessionOnly,
    /// Restore default parameters and drop dictionaries. Only valid
    /// between frames.
    Parameters,
    /// Both of the above.
    SessionAndParameters,
}

/// Frame writing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameStage {
    Created,
    Init,
    Ongoing,
    Ending,
}

/// Streaming buffer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamStage {
    /// No frame open; parameters may change.
    Init,
    /// Accepting input.
    Load,
    /// Draining the staging buffer.
    Flush,
}

/// Dictionary the next frames start from.
#[derive(Debug, Default)]
enum DictSource<'d> {
    #[default]
    None,
    /// Owned copy, used by every frame.
    Local {
        bytes: Vec<u8>,
        content_type: DictContentType,
    },
    /// Digested dictionary, used by every frame.
    Digested(&'d CDict),
    /// Used by the next frame only.
    Prefix {
        bytes: &'d [u8],
        content_type: DictContentType,
    },
}

impl DictSource<'_> {
    fn size(&self) -> usize {
        match self {
            DictSource::None => 0,
            DictSource::Local { bytes, .. } => bytes.len(),
            DictSource::Digested(cdict) => cdict.dict_size(),
            DictSource::Prefix { bytes, .. } => bytes.len(),
        }
    }
}

/// Buffer sizes of a context, derived from resolved parameters only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Sizing {
    tables: TableSizes,
    block_size: usize,
    max_nb_seq: usize,
    history: usize,
    block_out: usize,
    /// Whether the optimal parser's buffers are needed.
    opt: bool,
}

impl Sizing {
    fn for_frame(
        params: &CCtxParams,
        cp: &CompressionParameters,
        use_row: bool,
        pledged: u64,
        dict_content: usize,
        producer: bool,
    ) -> Self {
        let window_size = (1u64 << cp.window_log).min(pledged).max(1) as usize;
        let mut block_size = resolve_max_block_size(params.max_block_size).min(window_size);
        if params.target_cblock_size != 0 {
            block_size = block_size.min((2 * params.target_cblock_size).max(TARGET_CBLOCK_FLOOR));
        }
        let split = resolve_block_splitter_mode(params.use_block_splitter, cp) == ParamSwitch::Enable;
        let divider = if cp.min_match == 3 || producer { 3 } else { 4 };
        let partitions = if split { MAX_NB_BLOCK_SPLITS + 1 } else { 1 };
        // Stable output is written to in place and never staged.
        let block_out = match params.out_buffer_mode {
            BufferMode::Stable => 0,
            BufferMode::Buffered => {
                FRAME_HEADER_SIZE_MAX + block_size + partitions * BLOCK_HEADER_SIZE + EPILOGUE_MAX
            }
        };
        Self {
            tables: TableSizes::new(cp, use_row, true, false),
            block_size,
            max_nb_seq: block_size / divider,
            history: window_size + block_size + dict_content,
            block_out,
            opt: cp.strategy.uses_optimal_parser(),
        }
    }

    fn opt_matches(&self) -> usize {
        if self.opt { OPT_MATCHES } else { 0 }
    }

    fn opt_nodes(&self) -> usize {
        if self.opt { OPT_NODES } else { 0 }
    }

    fn workspace_bytes(&self) -> usize {
        // The parser statistics are reserved whatever the strategy, since
        // a reused workspace may later serve an optimal one.
        object_space(OPT_STATS_BYTES)
            + self.tables.workspace_bytes()
            + aligned_space(self.opt_matches() * size_of::<MatchCandidate>())
            + aligned_space(self.opt_nodes() * size_of::<OptNode>())
            + aligned_space(self.max_nb_seq * 4)
            + 2 * aligned_space(self.max_nb_seq * 2)
            + buffer_space(self.block_size)
            + 3 * buffer_space(self.max_nb_seq)
            + buffer_space(self.history)
            + buffer_space(self.block_out)
            + slack_space()
    }
}

/// Where each buffer of a context sits in its workspace.
#[derive(Debug, Clone, Copy, Default)]
struct Layout {
    hash: Region,
    chain: Region,
    hash3: Region,
    tags: Region,
    opt_stats: Region,
    opt_matches: Region,
    opt_nodes: Region,
    off_bases: Region,
    lit_lengths: Region,
    ml_bases: Region,
    lits: Region,
    ll_codes: Region,
    of_codes: Region,
    ml_codes: Region,
    history: Region,
    block_out: Region,
}

/// Mutable views of every buffer at once.
struct Views<'w> {
    tables: MatchTables<'w>,
    opt_stats: Option<&'w mut OptStats>,
    opt_matches: &'w mut [MatchCandidate],
    opt_nodes: &'w mut [OptNode],
    store: SeqStore<'w>,
    history: &'w mut [u8],
    block_out: &'w mut [u8],
}

impl Layout {
    fn reserve(ws: &mut Workspace, s: &Sizing, opt_stats: Region) -> Result<Self> {
        let layout = Self {
            hash: ws.reserve_table(s.tables.hash * 4),
            chain: ws.reserve_table(s.tables.chain * 4),
            hash3: ws.reserve_table(s.tables.hash3 * 4),
            tags: ws.reserve_table(s.tables.tags),
            opt_stats,
            opt_matches: ws.reserve_aligned(s.opt_matches() * size_of::<MatchCandidate>()),
            opt_nodes: ws.reserve_aligned(s.opt_nodes() * size_of::<OptNode>()),
            off_bases: ws.reserve_aligned(s.max_nb_seq * 4),
            lit_lengths: ws.reserve_aligned(s.max_nb_seq * 2),
            ml_bases: ws.reserve_aligned(s.max_nb_seq * 2),
            lits: ws.reserve_buffer(s.block_size),
            ll_codes: ws.reserve_buffer(s.max_nb_seq),
            of_codes: ws.reserve_buffer(s.max_nb_seq),
            ml_codes: ws.reserve_buffer(s.max_nb_seq),
            history: ws.reserve_buffer(s.history),
            block_out: ws.reserve_buffer(s.block_out),
        };
        if ws.reserve_failed() {
            return Err(ZstdError::memory_allocation(s.workspace_bytes()));
        }
        Ok(layout)
    }

    fn views<'w>(&self, ws: &'w mut Workspace, s: &Sizing) -> Views<'w> {
        let [hash, chain, hash3, tags, stats, matches, nodes, off, ll, ml, lits, llc, ofc, mlc, history, block_out] =
            ws.split_mut([
                self.hash,
                self.chain,
                self.hash3,
                self.tags,
                self.opt_stats,
                self.opt_matches,
                self.opt_nodes,
                self.off_bases,
                self.lit_lengths,
                self.ml_bases,
                self.lits,
                self.ll_codes,
                self.of_codes,
                self.ml_codes,
                self.history,
                self.block_out,
            ]);
        let n = s.max_nb_seq;
        let t = s.tables;
        Views {
            tables: MatchTables {
                hash: &mut as_u32s_mut(hash)[..t.hash],
                chain: &mut as_u32s_mut(chain)[..t.chain],
                hash3: &mut as_u32s_mut(hash3)[..t.hash3],
                tags: &mut tags[..t.tags],
            },
            opt_stats: stats.get_mut(..OPT_STATS_BYTES).and_then(|b| bytemuck::try_from_bytes_mut(b).ok()),
            opt_matches: as_cells_mut(&mut matches[..s.opt_matches() * size_of::<MatchCandidate>()]),
            opt_nodes: as_cells_mut(&mut nodes[..s.opt_nodes() * size_of::<OptNode>()]),
            store: SeqStore::new(
                &mut lits[..s.block_size],
                &mut as_u32s_mut(off)[..n],
                &mut as_u16s_mut(ll)[..n],
                &mut as_u16s_mut(ml)[..n],
                &mut llc[..n],
                &mut ofc[..n],
                &mut mlc[..n],
            ),
            history: &mut history[..s.history],
            block_out: &mut block_out[..s.block_out],
        }
    }
}

/// Output of one block compression.
enum Target<'o> {
    /// The context's staging buffer, after what is already staged.
    Staging,
    /// A caller buffer.
    Caller(&'o mut [u8]),
}

/// Memory a [`CCtx`] compressing at `level` can occupy, whatever the
/// input size.
pub fn estimate_cctx_size(level: i32) -> usize {
    const TIERS: [u64; 4] = [16 << 10, 128 << 10, 256 << 10, CONTENTSIZE_UNKNOWN];
    let params = CCtxParams::with_level(level);
    let workspace = TIERS
        .iter()
        .map(|&size| {
            let cp = get_cparams_from_cctx_params(&params, size, 0, CParamMode::NoAttachDict);
            let use_row = row_match_finder_used(cp.strategy, resolve_row_match_finder_mode(params.use_row_match_finder, &cp));
            Sizing::for_frame(&params, &cp, use_row, size, 0, false).workspace_bytes()
        })
        .max()
        .unwrap_or(0);
    std::mem::size_of::<CCtx<'static>>() + workspace
}

/// Compression context.
///
/// Reusable across frames: the workspace and the index space carry over,
/// so compressing many small inputs with one context avoids reallocating
/// and re-zeroing tables. Dictionaries referenced with [`CCtx::ref_cdict`]
/// or [`CCtx::ref_prefix`] must outlive the context (`'d`).
pub struct CCtx<'d> {
    requested: CCtxParams,
    applied: CCtxParams,
    cparams: CompressionParameters,
    split_blocks: bool,
    ws: Workspace,
    sizing: Sizing,
    layout: Layout,
    /// Optimal parser statistics, an object that lives as long as the
    /// workspace allocation.
    opt_stats: Region,
    ms: MatchState,
    initialized: bool,
    block_state: BlockState,
    checksum: FrameChecksum,
    dict: DictSource<'d>,
    attached: Option<&'d CDict>,
    dict_id: u32,
    dict_content_size: usize,
    producer: Option<Box<dyn SequenceProducer + 'd>>,
    external_seqs: Vec<Sequence>,
    pledged: u64,
    consumed: u64,
    produced: u64,
    frame_stage: FrameStage,
    hist_len: usize,
    pending: usize,
    flush_start: usize,
    flush_end: usize,
    pub(crate) stream_stage: StreamStage,
    pub(crate) frame_ended: bool,
    pub(crate) errored: bool,
    /// Address of the input cursor a stable input buffer must come back with.
    pub(crate) expected_in: Option<usize>,
    /// Address and room of the output cursor a stable output buffer must
    /// come back with.
    pub(crate) expected_out: Option<(usize, usize)>,
}

impl std::fmt::Debug for CCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CCtx")
            .field("requested", &self.requested)
            .field("cparams", &self.cparams)
            .field("workspace", &self.ws.size())
            .field("dict", &self.dict)
            .field("producer", &self.producer.is_some())
            .field("frame_stage", &self.frame_stage)
            .field("stream_stage", &self.stream_stage)
            .finish_non_exhaustive()
    }
}

impl Default for CCtx<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d> CCtx<'d> {
    /// Context at the default level.
    pub fn new() -> Self {
        Self::with_params(CCtxParams::default())
    }

    /// Context at `level`.
    pub fn with_level(level: i32) -> Self {
        Self::with_params(CCtxParams::with_level(level))
    }

    fn with_params(params: CCtxParams) -> Self {
        let cparams = get_cparams_from_cctx_params(&params, CONTENTSIZE_UNKNOWN, 0, CParamMode::Unknown);
        Self {
            applied: params.clone(),
            requested: params,
            cparams,
            split_blocks: false,
            ws: Workspace::empty(),
            sizing: Sizing::default(),
            layout: Layout::default(),
            opt_stats: Region::EMPTY,
            ms: MatchState::new(cparams, false, true, false),
            initialized: false,
            block_state: BlockState::new(),
            checksum: FrameChecksum::new(),
            dict: DictSource::None,
            attached: None,
            dict_id: 0,
            dict_content_size: 0,
            producer: None,
            external_seqs: Vec::new(),
            pledged: CONTENTSIZE_UNKNOWN,
            consumed: 0,
            produced: 0,
            frame_stage: FrameStage::Created,
            hist_len: 0,
            pending: 0,
            flush_start: 0,
            flush_end: 0,
            stream_stage: StreamStage::Init,
            frame_ended: false,
            errored: false,
            expected_in: None,
            expected_out: None,
        }
    }

    fn require_init_stage(&self, what: &str) -> Result<()> {
        if self.stream_stage != StreamStage::Init {
            return Err(ZstdError::stage_wrong(format!("{what} can only change between frames")));
        }
        Ok(())
    }

    /// Set one parameter for the next frames.
    pub fn set_parameter(&mut self, param: CParameter, value: i32) -> Result<()> {
        self.require_init_stage(param.name())?;
        self.requested.set_parameter(param, value).map(|_| ())
    }

    /// Value stored for `param`.
    pub fn get_parameter(&self, param: CParameter) -> i32 {
        self.requested.get_parameter(param)
    }

    /// Replace every parameter at once.
    pub fn set_params(&mut self, params: CCtxParams) -> Result<()> {
        self.require_init_stage("parameters")?;
        if matches!(self.dict, DictSource::Digested(_)) {
            return Err(ZstdError::stage_wrong(
                "parameters cannot be replaced while a digested dictionary is referenced",
            ));
        }
        self.requested = params;
        Ok(())
    }

    /// Parameters the next frame starts from.
    pub fn params(&self) -> &CCtxParams {
        &self.requested
    }

    /// Announce the size of the next frame's content.
    /// [`CONTENTSIZE_UNKNOWN`] withdraws the announcement.
    pub fn set_pledged_src_size(&mut self, size: u64) -> Result<()> {
        self.require_init_stage("the pledged source size")?;
        self.pledged = size;
        Ok(())
    }

    /// Abandon the current frame and/or restore defaults.
    pub fn reset(&mut self, directive: ResetDirective) -> Result<()> {
        if matches!(directive, ResetDirective::SessionOnly | ResetDirective::SessionAndParameters) {
            self.end_session();
            self.errored = false;
        }
        if matches!(directive, ResetDirective::Parameters | ResetDirective::SessionAndParameters) {
            self.require_init_stage("parameters")?;
            self.dict = DictSource::None;
            self.producer = None;
            self.requested = CCtxParams::default();
        }
        Ok(())
    }

    /// Keep an owned copy of `dict` for every following frame. The
    /// dictionary format is detected from its magic number; an empty
    /// `dict` clears any dictionary.
    pub fn load_dictionary(&mut self, dict: &[u8]) -> Result<()> {
        self.load_dictionary_as(dict, DictContentType::Auto)
    }

    /// Like [`CCtx::load_dictionary`] with an explicit content type.
    pub fn load_dictionary_as(&mut self, dict: &[u8], content_type: DictContentType) -> Result<()> {
        self.require_init_stage("the dictionary")?;
        self.dict = if dict.is_empty() {
            DictSource::None
        } else {
            DictSource::Local {
                bytes: dict.to_vec(),
                content_type,
            }
        };
        Ok(())
    }

    /// Compress every following frame with `cdict`. Its compression level
    /// overrides the context's.
    pub fn ref_cdict(&mut self, cdict: &'d CDict) -> Result<()> {
        self.require_init_stage("the dictionary")?;
        self.dict = DictSource::Digested(cdict);
        Ok(())
    }

    /// Use `prefix` as history for the next frame only.
    pub fn ref_prefix(&mut self, prefix: &'d [u8]) -> Result<()> {
        self.ref_prefix_as(prefix, DictContentType::RawContent)
    }

    /// Like [`CCtx::ref_prefix`] with an explicit content type.
    pub fn ref_prefix_as(&mut self, prefix: &'d [u8], content_type: DictContentType) -> Result<()> {
        self.require_init_stage("the dictionary")?;
        self.dict = if prefix.is_empty() {
            DictSource::None
        } else {
            DictSource::Prefix {
                bytes: prefix,
                content_type,
            }
        };
        Ok(())
    }

    /// Parse blocks with `producer` instead of the internal match finders.
    pub fn set_sequence_producer(&mut self, producer: Box<dyn SequenceProducer + 'd>) -> Result<()> {
        self.require_init_stage("the sequence producer")?;
        self.producer = Some(producer);
        Ok(())
    }

    /// Go back to the internal match finders.
    pub fn clear_sequence_producer(&mut self) -> Result<()> {
        self.require_init_stage("the sequence producer")?;
        self.producer = None;
        Ok(())
    }

    /// Compress `src` into one frame with the context's parameters and
    /// dictionary. Returns the frame size.
    ///
    /// Any frame in progress is abandoned first.
    pub fn compress2(&mut self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        self.reset(ResetDirective::SessionOnly)?;
        let mut output = OutBuffer::new(dst);
        let mut input = InBuffer::new(src);
        let remaining = self.compress_stream(&mut output, &mut input, EndDirective::End)?;
        if remaining != 0 {
            return Err(ZstdError::dst_size_too_small(output.pos + remaining, output.dst.len()));
        }
        Ok(output.pos)
    }

    /// Compress `src` at `level`, ignoring the context's parameters,
    /// dictionary and sequence producer (which are kept for later frames).
    pub fn compress(&mut self, dst: &mut [u8], src: &[u8], level: i32) -> Result<usize> {
        self.require_init_stage("parameters")?;
        let saved_params = std::mem::replace(&mut self.requested, CCtxParams::with_level(level));
        let saved_dict = std::mem::take(&mut self.dict);
        let saved_producer = self.producer.take();
        let result = self.compress2(dst, src);
        self.requested = saved_params;
        self.dict = saved_dict;
        self.producer = saved_producer;
        result
    }

    /// Total memory held.
    pub fn sizeof(&self) -> usize {
        let dict = match &self.dict {
            DictSource::Local { bytes, .. } => bytes.capacity(),
            _ => 0,
        };
        std::mem::size_of::<Self>()
            + self.ws.size()
            + dict
            + self.external_seqs.capacity() * std::mem::size_of::<Sequence>()
    }

    /// Source bytes compressed in the current frame.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes produced for the current frame, staged ones included.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    // ---- frame setup ----

    /// Resolve parameters and reset for a new frame. `end_size` is the
    /// whole input when the first call already ends the frame.
    pub(crate) fn begin_frame(&mut self, end_size: Option<usize>) -> Result<()> {
        let dict = std::mem::take(&mut self.dict);
        let result = self.begin_frame_with(&dict, end_size);
        if !matches!(dict, DictSource::Prefix { .. }) {
            self.dict = dict;
        }
        result
    }

    fn begin_frame_with(&mut self, dict: &DictSource<'d>, end_size: Option<usize>) -> Result<()> {
        if let Some(size) = end_size {
            if self.pledged == CONTENTSIZE_UNKNOWN {
                self.pledged = size as u64;
            }
        }
        let pledged = self.pledged;
        let mut params = self.requested.clone();
        if self.producer.is_some() && !matches!(dict, DictSource::None) {
            return Err(ZstdError::parameter_unsupported(
                "a sequence producer cannot be combined with a dictionary",
            ));
        }
        if let DictSource::Digested(cdict) = dict {
            params.compression_level = cdict.compression_level();
        }
        let dict_size = dict.size();
        let attach = match dict {
            DictSource::Digested(cdict) => {
                cdict.should_attach(params.attach_dict_pref, params.force_window, pledged)
            }
            _ => false,
        };
        let mode = if attach {
            CParamMode::AttachDict
        } else {
            CParamMode::NoAttachDict
        };
        let cp = get_cparams_from_cctx_params(&params, pledged, dict_size as u64, mode);
        let use_row = row_match_finder_used(cp.strategy, resolve_row_match_finder_mode(params.use_row_match_finder, &cp));
        if pledged == CONTENTSIZE_UNKNOWN {
            params.fparams.content_size_flag = false;
        }
        self.applied = params;

        match *dict {
            DictSource::Digested(cdict) if self.uses_cdict_tables(cdict, pledged) => {
                self.reset_using_cdict(cdict, cp, pledged, attach)?;
            }
            DictSource::Digested(cdict) => {
                self.reset_internal(cp, use_row, pledged, cdict.content().len())?;
                self.block_state.load(cdict.block_state());
                self.dict_id = cdict.dict_id();
                self.load_dict_content(cdict.content());
            }
            DictSource::Local {
                ref bytes,
                content_type,
            } => {
                self.reset_internal(cp, use_row, pledged, bytes.len())?;
                self.insert_dictionary(bytes, content_type)?;
            }
            DictSource::Prefix { bytes, content_type } => {
                self.reset_internal(cp, use_row, pledged, bytes.len())?;
                self.insert_dictionary(bytes, content_type)?;
            }
            DictSource::None => self.reset_internal(cp, use_row, pledged, 0)?,
        }
        debug!(
            level = self.applied.compression_level,
            window_log = self.cparams.window_log,
            hash_log = self.cparams.hash_log,
            chain_log = self.cparams.chain_log,
            strategy = ?self.cparams.strategy,
            pledged,
            block_size = self.sizing.block_size,
            dict_id = self.dict_id,
            "frame parameters resolved"
        );
        Ok(())
    }

    /// Whether a digested dictionary is used through its tables (attached
    /// or copied) rather than by reloading its content.
    fn uses_cdict_tables(&self, cdict: &CDict, pledged: u64) -> bool {
        let dict_size = cdict.dict_size() as u64;
        !cdict.content().is_empty()
            && (pledged < BLOCKSIZE_MAX as u64
                || pledged < dict_size.saturating_mul(6)
                || pledged == CONTENTSIZE_UNKNOWN
                || cdict.compression_level() == 0)
            && self.applied.attach_dict_pref != DictAttachPref::ForceLoad
    }

    /// Size the workspace for `cp` and rewind every buffer.
    ///
    /// The index space restarts (and tables are zeroed) only when the
    /// workspace is reallocated, on first use, or when indices get close
    /// to their ceiling; otherwise old entries simply fall below the new
    /// window.
    fn reset_internal(
        &mut self,
        cp: CompressionParameters,
        use_row: bool,
        pledged: u64,
        dict_content: usize,
    ) -> Result<()> {
        let sizing = Sizing::for_frame(&self.applied, &cp, use_row, pledged, dict_content, self.producer.is_some());
        let needed = sizing.workspace_bytes();
        let realloc = !self.ws.size_within_bounds(needed);
        if realloc {
            self.initialized = false;
            self.ws.free();
            self.ws = Workspace::create(needed)?;
            self.opt_stats = self.ws.reserve_object(OPT_STATS_BYTES);
            if self.ws.reserve_failed() {
                return Err(ZstdError::memory_allocation(needed));
            }
        }
        self.ws.bump_oversized_duration(needed);

        let hard = realloc || !self.initialized || self.ms.index_too_close_to_max();
        let window = self.ms.window;
        self.ms = MatchState::new(cp, use_row, true, false);
        if !hard {
            self.ms.window = window;
        }
        self.ms.reset(hard);
        self.ms.window.base = self.ms.window.next_src;

        if hard {
            self.ws.mark_tables_dirty();
        }
        self.ws.clear();
        self.initialized = false;
        self.layout = Layout::reserve(&mut self.ws, &sizing, self.opt_stats)?;
        self.ws.clean_tables();
        // Statistics are learnt afresh in every frame.
        self.ws.bytes_mut(self.opt_stats).fill(0);
        self.initialized = true;
        debug!(workspace = self.ws.size(), needed, realloc, hard, "context reset");

        self.sizing = sizing;
        self.cparams = cp;
        self.split_blocks = resolve_block_splitter_mode(self.applied.use_block_splitter, &cp) == ParamSwitch::Enable;
        self.block_state.reset();
        self.checksum.reset();
        self.attached = None;
        self.dict_id = 0;
        self.dict_content_size = 0;
        self.pledged = pledged;
        self.consumed = 0;
        self.produced = 0;
        self.frame_stage = FrameStage::Init;
        self.hist_len = 0;
        self.pending = 0;
        self.flush_start = 0;
        self.flush_end = 0;
        self.frame_ended = false;
        Ok(())
    }

    fn reset_using_cdict(&mut self, cdict: &'d CDict, cp: CompressionParameters, pledged: u64, attach: bool) -> Result<()> {
        let dict_ms = cdict.raw_match_state();
        if attach {
            let mut dict_cp = cdict.cparams();
            if cdict.dedicated() {
                revert_dedicated_dict_search_cparams(&mut dict_cp);
            }
            let mut local = adjust_cparams_internal(
                dict_cp,
                pledged,
                cdict.dict_size() as u64,
                CParamMode::AttachDict,
                self.applied.use_row_match_finder,
            );
            local.window_log = cp.window_log;
            self.reset_internal(local, cdict.use_row(), pledged, 0)?;

            let dict_end = dict_ms.window.next_src;
            if dict_end > dict_ms.window.dict_limit {
                // Local indices start past the dictionary's so that
                // translated dictionary indices never go negative.
                let window = &mut self.ms.window;
                if window.dict_limit < dict_end {
                    window.next_src = dict_end;
                    window.clear();
                    window.base = dict_end;
                    self.ms.next_to_update = dict_end;
                }
                self.ms.loaded_dict_end = self.ms.window.dict_limit;
                self.attached = Some(cdict);
            }
            debug!(dict_id = cdict.dict_id(), dedicated = cdict.dedicated(), "attached dictionary");
        } else {
            let mut dict_cp = cdict.cparams();
            dict_cp.window_log = cp.window_log;
            let content = cdict.content();
            self.reset_internal(dict_cp, cdict.use_row(), pledged, content.len())?;

            let src = cdict.tables();
            let views = self.layout.views(&mut self.ws, &self.sizing);
            debug_assert_eq!(views.tables.hash.len(), src.hash.len());
            copy_prefix(views.tables.hash, src.hash);
            copy_prefix(views.tables.chain, src.chain);
            copy_prefix(views.tables.tags, src.tags);
            views.tables.hash3.fill(0);
            views.history[..content.len()].copy_from_slice(content);
            self.ws.mark_tables_clean();

            self.ms.window = dict_ms.window;
            self.ms.next_to_update = dict_ms.next_to_update;
            self.ms.loaded_dict_end = if self.applied.force_window {
                0
            } else {
                dict_ms.loaded_dict_end
            };
            self.hist_len = content.len();
            debug!(dict_id = cdict.dict_id(), "copied dictionary tables");
        }
        self.dict_id = cdict.dict_id();
        self.dict_content_size = cdict.content().len();
        self.block_state.load(cdict.block_state());
        Ok(())
    }

    /// Load a raw or formatted dictionary into the fresh context.
    fn insert_dictionary(&mut self, dict: &[u8], content_type: DictContentType) -> Result<()> {
        let Some(entropy) = parse_dictionary(dict, content_type)? else {
            return Ok(());
        };
        self.block_state.load(&entropy.state);
        self.dict_id = entropy.dict_id;
        self.load_dict_content(&dict[entropy.header_size..]);
        debug!(dict_id = self.dict_id, content = dict.len() - entropy.header_size, "loaded dictionary");
        Ok(())
    }

    /// Place `content` at the start of the history and index it.
    fn load_dict_content(&mut self, content: &[u8]) {
        if content.is_empty() {
            return;
        }
        let views = self.layout.views(&mut self.ws, &self.sizing);
        views.history[..content.len()].copy_from_slice(content);
        self.ms.window.update(content.len());
        // With a forced window the dictionary obeys the plain distance limit.
        self.ms.loaded_dict_end = if self.applied.force_window {
            0
        } else {
            self.ms.window.next_src
        };
        self.ms.load_content(views.history, views.tables, content.len(), false);
        self.hist_len = content.len();
        self.dict_content_size = content.len();
    }

    /// Back to stream stage `Init`, forgetting the frame in progress.
    pub(crate) fn end_session(&mut self) {
        self.stream_stage = StreamStage::Init;
        self.pledged = CONTENTSIZE_UNKNOWN;
        self.frame_ended = false;
        self.pending = 0;
        self.flush_start = 0;
        self.flush_end = 0;
        self.frame_stage = FrameStage::Created;
        self.expected_in = None;
        self.expected_out = None;
    }

    // ---- input buffering ----

    /// Uncompressed bytes buffered for the next block.
    pub(crate) fn buffered(&self) -> usize {
        self.pending
    }

    /// Uncompressed size of a full block.
    pub(crate) fn block_size(&self) -> usize {
        self.sizing.block_size
    }

    /// Append as much of `data` as fits in the current block. Returns the
    /// number of bytes taken.
    pub(crate) fn buffer_input(&mut self, data: &[u8]) -> Result<usize> {
        let n = data.len().min(self.sizing.block_size - self.pending);
        if n == 0 {
            return Ok(0);
        }
        if self.hist_len + n > self.sizing.history {
            self.compact_history(n)?;
        }
        let history = self.ws.bytes_mut(self.layout.history);
        history[self.hist_len..self.hist_len + n].copy_from_slice(&data[..n]);
        self.hist_len += n;
        self.pending += n;
        Ok(n)
    }

    /// Drop history no match can reach any more to make room for `n` bytes.
    fn compact_history(&mut self, n: usize) -> Result<()> {
        let ms = &mut self.ms;
        let block_start = ms.window.next_src;
        let max_dist = ms.max_distance();
        if ms.window.enforce_max_dist(block_start, max_dist, &mut ms.loaded_dict_end) {
            self.attached = None;
        }
        let shift = ms
            .window
            .pos(ms.window.low_limit)
            .min(self.hist_len - self.pending);
        if shift > 0 {
            let history = self.ws.bytes_mut(self.layout.history);
            history.copy_within(shift..self.hist_len, 0);
            self.hist_len -= shift;
            ms.window.slide_buffer(shift);
            trace!(shift, kept = self.hist_len, "compacted history");
        }
        if self.hist_len + n > self.sizing.history {
            return Err(ZstdError::generic("history buffer overflow"));
        }
        Ok(())
    }

    // ---- block compression ----

    /// Compress the buffered bytes into the staging buffer, as the last
    /// block of the frame when `last` is set, and close the frame then.
    pub(crate) fn compress_staged(&mut self, last: bool) -> Result<()> {
        self.flush_start = 0;
        self.flush_end = 0;
        if self.pending > 0 {
            self.flush_end = self.compress_block_into(Target::Staging, last)?;
        }
        if last {
            let (epilogue, n) = self.epilogue()?;
            let staging = self.ws.bytes_mut(self.layout.block_out);
            staging[self.flush_end..self.flush_end + n].copy_from_slice(&epilogue[..n]);
            self.flush_end += n;
            self.frame_ended = true;
        }
        Ok(())
    }

    /// Staged bytes not yet handed to the caller.
    pub(crate) fn staged(&self) -> &[u8] {
        &self.ws.bytes(self.layout.block_out)[self.flush_start..self.flush_end]
    }

    /// The caller took `n` staged bytes.
    pub(crate) fn consume_staged(&mut self, n: usize) {
        self.flush_start += n;
        if self.flush_start == self.flush_end {
            self.flush_start = 0;
            self.flush_end = 0;
        }
    }

    /// Compress all of `src` straight into `dst` and close the frame.
    /// Returns bytes written.
    pub(crate) fn compress_end_direct(&mut self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        let mut op = 0usize;
        let mut ip = 0usize;
        while ip < src.len() {
            ip += self.buffer_input(&src[ip..])?;
            let last = ip == src.len();
            op += self.compress_block_into(Target::Caller(&mut dst[op..]), last)?;
        }
        self.close_into(dst, op)
    }

    /// Compress the buffered bytes straight into `dst`, as the last block
    /// of the frame when `last` is set, and close the frame then. Used when
    /// the output buffer is stable; running out of room is an error.
    pub(crate) fn compress_in_place(&mut self, dst: &mut [u8], last: bool) -> Result<usize> {
        let mut op = 0usize;
        if self.pending > 0 {
            op = self.compress_block_into(Target::Caller(dst), last)?;
        }
        if last {
            return self.close_into(dst, op);
        }
        Ok(op)
    }

    /// Write the epilogue at `op` in `dst`. Returns the total written.
    fn close_into(&mut self, dst: &mut [u8], op: usize) -> Result<usize> {
        let (epilogue, n) = self.epilogue()?;
        let capacity = dst.len();
        let out = dst
            .get_mut(op..op + n)
            .ok_or_else(|| ZstdError::dst_size_too_small(op + n, capacity))?;
        out.copy_from_slice(&epilogue[..n]);
        self.frame_ended = true;
        Ok(op + n)
    }

    /// Whether stable output was requested for the open frame.
    pub(crate) fn stable_output(&self) -> bool {
        self.applied.out_buffer_mode == BufferMode::Stable
    }

    /// Whether stable input was requested for the open frame.
    pub(crate) fn stable_input(&self) -> bool {
        self.applied.in_buffer_mode == BufferMode::Stable
    }

    /// Whether `capacity` bytes are enough to compress `src_len` bytes
    /// without staging.
    pub(crate) fn fits_direct(capacity: usize, src_len: usize) -> bool {
        capacity >= compress_capacity(src_len)
    }

    /// Compress the buffered bytes as one block, preceded by the frame
    /// header if nothing was written yet. Returns bytes written.
    fn compress_block_into(&mut self, target: Target<'_>, last: bool) -> Result<usize> {
        let len = self.pending;
        let (start_pos, end_pos) = (self.hist_len - len, self.hist_len);
        self.consumed += len as u64;
        if self.pledged != CONTENTSIZE_UNKNOWN && self.consumed > self.pledged {
            return Err(ZstdError::src_size_wrong(self.pledged, self.consumed));
        }

        let views = self.layout.views(&mut self.ws, &self.sizing);
        let Views {
            mut tables,
            opt_stats,
            opt_matches,
            opt_nodes,
            mut store,
            history,
            block_out,
        } = views;
        let compressed_literals = !literals_compression_disabled(self.applied.literal_compression_mode, &self.cparams);
        let dst: &mut [u8] = match target {
            Target::Staging => &mut block_out[self.flush_end..],
            Target::Caller(dst) => dst,
        };
        let history: &[u8] = history;
        let block = &history[start_pos..end_pos];

        let mut op = 0usize;
        if self.frame_stage == FrameStage::Init {
            op += write_frame_header(
                dst,
                self.applied.format,
                &self.applied.fparams,
                self.cparams.window_log,
                self.pledged,
                self.dict_id,
            )?;
            self.frame_stage = FrameStage::Ongoing;
        }
        if self.applied.fparams.checksum_flag {
            self.checksum.update(block);
        }

        let ms = &mut self.ms;
        ms.window.update(len);
        let max_dist = ms.max_distance();
        let (start, end) = (ms.window.index(start_pos), ms.window.index(end_pos));
        if ms.correct_overflow_if_needed(&mut tables, start, end).is_some() {
            self.attached = None;
        }
        let (block_start, block_end) = (ms.window.index(start_pos), ms.window.index(end_pos));
        if Window::check_dict_validity(block_end, max_dist, &mut ms.loaded_dict_end) {
            self.attached = None;
        }
        if ms.window.enforce_max_dist(block_start, max_dist, &mut ms.loaded_dict_end) {
            self.attached = None;
        }
        if ms.next_to_update < ms.window.low_limit {
            ms.next_to_update = ms.window.low_limit;
        }

        let written = if len < MIN_COMPRESSIBLE_BLOCK {
            let n = write_raw_block(&mut dst[op..], block, last)?;
            self.block_state.downgrade_offset_repeat();
            n
        } else {
            // Limit the catch-up after a very long match.
            if block_start > ms.next_to_update + 384 {
                ms.next_to_update = block_start - 192.min(block_start - ms.next_to_update - 384);
            }
            let mut reps = Repcodes {
                rep: self.block_state.prev().rep,
            };
            store.reset();

            let mut parsed = false;
            if let Some(producer) = self.producer.as_mut() {
                self.external_seqs.clear();
                match producer.produce_sequences(block, self.cparams.window_size(), &mut self.external_seqs) {
                    Ok(()) => {
                        let bounds = SequenceBounds {
                            min_match: self.cparams.min_match,
                            window_size: self.cparams.window_size(),
                            dict_size: 0,
                            block_pos: 0,
                            validate: self.applied.validate_sequences,
                        };
                        transfer_sequences(&mut store, &self.external_seqs, block, &mut reps, &bounds)?;
                        parsed = true;
                    }
                    Err(e) if self.applied.enable_seq_producer_fallback => {
                        debug!(error = %e, "sequence producer failed, using internal match finder");
                    }
                    Err(e) => return Err(e),
                }
            }
            if !parsed {
                let mode = match self.attached {
                    None => DictMode::NoDict,
                    Some(cdict) if cdict.dedicated() => DictMode::DedicatedDictSearch,
                    Some(_) => DictMode::DictMatchState,
                };
                let compressor = select_block_compressor(ms.cparams.strategy, ms.use_row, mode);
                let opt = opt_stats.filter(|_| self.sizing.opt).map(|stats| OptState {
                    stats,
                    matches: opt_matches,
                    nodes: opt_nodes,
                    seed: Some(&self.block_state.prev().entropy),
                    compressed_literals,
                });
                let mut ctx = MatchCtx {
                    src: &history[..end_pos],
                    ms,
                    tables,
                    dict: self.attached.map(CDict::match_state),
                    opt,
                };
                let last_lits = compressor(&mut ctx, &mut store, &mut reps.rep, start_pos..end_pos);
                store.store_last_literals(&history[end_pos - last_lits..end_pos]);
            }

            let opts = BlockOptions {
                strategy: self.cparams.strategy,
                disable_literal_compression: !compressed_literals,
                split_blocks: self.split_blocks,
            };
            block::compress_block(&mut dst[op..], block, &mut store, &mut self.block_state, reps, opts, last)?
        };
        op += written;
        trace!(src_size = len, c_size = written, last, "block");

        if last {
            self.frame_stage = FrameStage::Ending;
        }
        self.pending = 0;
        self.produced += op as u64;
        Ok(op)
    }

    /// Close the frame: a header if the frame is still empty, a last empty
    /// block unless the last block was already flagged, and the checksum.
    fn epilogue(&mut self) -> Result<([u8; EPILOGUE_MAX], usize)> {
        let mut out = [0u8; EPILOGUE_MAX];
        let mut op = 0usize;
        if self.frame_stage == FrameStage::Init {
            op += write_frame_header(
                &mut out,
                self.applied.format,
                &self.applied.fparams,
                self.cparams.window_log,
                0,
                0,
            )?;
            self.frame_stage = FrameStage::Ongoing;
        }
        if self.frame_stage != FrameStage::Ending {
            op += write_raw_block(&mut out[op..], &[], true)?;
            self.frame_stage = FrameStage::Ending;
        }
        if self.applied.fparams.checksum_flag {
            op += self
                .checksum
                .write(&mut out[op..])
                .ok_or_else(|| ZstdError::generic("epilogue buffer too small"))?;
        }
        self.frame_stage = FrameStage::Created;
        if self.pledged != CONTENTSIZE_UNKNOWN && self.consumed != self.pledged {
            return Err(ZstdError::src_size_wrong(self.pledged, self.consumed));
        }
        self.produced += op as u64;
        debug!(consumed = self.consumed, produced = self.produced, "frame complete");
        Ok((out, op))
    }

    // ---- external sequences ----

    /// Compress `src` into one frame from caller-supplied `sequences`
    /// instead of searching for matches. Returns the frame size.
    ///
    /// The sequences must describe `src` from its first byte; bytes after
    /// the last sequence are stored as literals. Offsets may reach into
    /// the context's dictionary. Sequences that do not describe `src`
    /// are rejected with [`crate::ErrorCode::CorruptionDetected`].
    pub fn compress_sequences(&mut self, dst: &mut [u8], sequences: &[Sequence], src: &[u8]) -> Result<usize> {
        self.reset(ResetDirective::SessionOnly)?;
        let result = self.compress_sequences_frame(dst, sequences, src);
        self.end_session();
        result
    }

    fn compress_sequences_frame(&mut self, dst: &mut [u8], sequences: &[Sequence], src: &[u8]) -> Result<usize> {
        self.begin_frame(Some(src.len()))?;
        if self.pledged != src.len() as u64 {
            return Err(ZstdError::src_size_wrong(self.pledged, src.len() as u64));
        }
        let mut op = write_frame_header(
            dst,
            self.applied.format,
            &self.applied.fparams,
            self.cparams.window_log,
            self.pledged,
            self.dict_id,
        )?;
        self.frame_stage = FrameStage::Ongoing;
        if self.applied.fparams.checksum_flag {
            self.checksum.update(src);
        }

        if src.is_empty() {
            if sequences.iter().any(|s| s.lit_length != 0 || s.match_length != 0) {
                return Err(ZstdError::corrupted(0, "sequences describe more than the source"));
            }
            op += write_raw_block(&mut dst[op..], &[], true)?;
        }

        let mut splitter = BlockSplitter::new(sequences, self.cparams.min_match);
        let mut block_seqs = Vec::new();
        let mut ip = 0usize;
        while ip < src.len() {
            let remaining = src.len() - ip;
            let block_len = splitter.next_block(self.sizing.block_size, remaining, &mut block_seqs);
            if block_len == 0 {
                return Err(ZstdError::corrupted(ip as u64, "sequence does not fit in a block"));
            }
            let last = block_len == remaining;
            let block = &src[ip..ip + block_len];
            let bounds = SequenceBounds {
                min_match: self.cparams.min_match,
                window_size: self.cparams.window_size(),
                dict_size: self.dict_content_size,
                block_pos: ip,
                validate: true,
            };

            let Views { mut store, .. } = self.layout.views(&mut self.ws, &self.sizing);
            store.reset();
            let mut reps = Repcodes {
                rep: self.block_state.prev().rep,
            };
            transfer_sequences(&mut store, &block_seqs, block, &mut reps, &bounds)
                .map_err(|e| ZstdError::corrupted(ip as u64, e.to_string()))?;

            let written = if block_len < MIN_COMPRESSIBLE_BLOCK {
                self.block_state.downgrade_offset_repeat();
                write_raw_block(&mut dst[op..], block, last)?
            } else {
                let opts = BlockOptions {
                    strategy: self.cparams.strategy,
                    disable_literal_compression: literals_compression_disabled(
                        self.applied.literal_compression_mode,
                        &self.cparams,
                    ),
                    split_blocks: false,
                };
                block::compress_block(&mut dst[op..], block, &mut store, &mut self.block_state, reps, opts, last)?
            };
            trace!(src_size = block_len, c_size = written, last, sequences = block_seqs.len(), "sequence block");
            op += written;
            ip += block_len;
        }
        if !splitter.is_done() {
            return Err(ZstdError::corrupted(src.len() as u64, "sequences extend past the source"));
        }
        self.consumed = src.len() as u64;

        if self.applied.fparams.checksum_flag {
            let available = dst.len();
            op += self
                .checksum
                .write(&mut dst[op..])
                .ok_or_else(|| ZstdError::dst_size_too_small(op + CHECKSUM_SIZE, available))?;
        }
        self.frame_stage = FrameStage::Created;
        Ok(op)
    }
}

fn copy_prefix<T: Copy>(dst: &mut [T], src: &[T]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdict::tests::build_dictionary;
    use crate::frame::{decompress, decompress_with_dict, parse_frame_header};
    use crate::params::{Format, Strategy};
    use crate::{ErrorCode, ZSTD_MAGIC, ZstdDecoder};

    fn sample(len: usize) -> Vec<u8> {
        let words = ["alpha ", "beta ", "gamma ", "delta ", "epsilon ", "zeta "];
        let mut out = Vec::with_capacity(len);
        let mut i = 0usize;
        while out.len() < len {
            out.extend_from_slice(words[(i * 7 + i / 3) % words.len()].as_bytes());
            i += 1;
        }
        out.truncate(len);
        out
    }

    fn compress_with(cctx: &mut CCtx<'_>, src: &[u8]) -> Vec<u8> {
        let mut dst = vec![0u8; compress_capacity(src.len())];
        let n = cctx.compress2(&mut dst, src).unwrap();
        dst.truncate(n);
        dst
    }

    #[test]
    fn test_empty_frame() {
        let mut cctx = CCtx::with_level(3);
        let frame = compress_with(&mut cctx, b"");
        assert_eq!(frame, [0x28, 0xB5, 0x2F, 0xFD, 0x20, 0x00, 0x01, 0x00, 0x00]);
        assert!(decompress(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_empty_frame_of_unknown_size() {
        let mut cctx = CCtx::with_level(3);
        let mut dst = [0u8; 64];
        let mut out = OutBuffer::new(&mut dst);
        let mut input = InBuffer::new(b"");
        cctx.compress_stream(&mut out, &mut input, EndDirective::Continue).unwrap();
        assert_eq!(cctx.compress_stream(&mut out, &mut input, EndDirective::End).unwrap(), 0);
        let frame = out.written().to_vec();
        let header = parse_frame_header(&frame, Format::Zstd1).unwrap();
        assert_eq!(header.content_size, None);
        assert!(!header.single_segment);
        assert!(decompress(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_across_levels() {
        let src = sample(300_000);
        for level in [-5, 1, 2, 3, 5, 7, 13, 16, 19] {
            let mut cctx = CCtx::with_level(level);
            let frame = compress_with(&mut cctx, &src);
            assert!(frame.len() < src.len() / 4, "level {level}");
            assert_eq!(decompress(&frame).unwrap(), src, "level {level}");
        }
    }

    #[test]
    fn test_parameters_frozen_mid_frame() {
        let mut cctx = CCtx::with_level(3);
        let mut dst = vec![0u8; 1 << 16];
        let mut out = OutBuffer::new(&mut dst);
        let src = sample(1000);
        let mut input = InBuffer::new(&src);
        cctx.compress_stream(&mut out, &mut input, EndDirective::Continue).unwrap();

        let err = cctx.set_parameter(CParameter::WindowLog, 20).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StageWrong);
        let err = cctx.set_parameter(CParameter::CompressionLevel, 5).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StageWrong);
        assert_eq!(cctx.set_pledged_src_size(10).unwrap_err().code(), ErrorCode::StageWrong);
        assert_eq!(cctx.load_dictionary(b"dictionary").unwrap_err().code(), ErrorCode::StageWrong);
        assert_eq!(
            cctx.reset(ResetDirective::Parameters).unwrap_err().code(),
            ErrorCode::StageWrong
        );

        cctx.reset(ResetDirective::SessionOnly).unwrap();
        cctx.set_parameter(CParameter::WindowLog, 20).unwrap();
        assert_eq!(cctx.get_parameter(CParameter::WindowLog), 20);
    }

    #[test]
    fn test_reset_parameters_restores_defaults() {
        let mut cctx = CCtx::with_level(9);
        cctx.set_parameter(CParameter::ChecksumFlag, 1).unwrap();
        cctx.load_dictionary(b"some dictionary content").unwrap();
        cctx.reset(ResetDirective::Parameters).unwrap();
        assert_eq!(cctx.get_parameter(CParameter::ChecksumFlag), 0);
        assert_eq!(cctx.get_parameter(CParameter::CompressionLevel), 3);
        assert!(matches!(cctx.dict, DictSource::None));
    }

    #[test]
    fn test_pledged_size_mismatch() {
        let src = sample(50);
        let mut dst = vec![0u8; 256];

        let mut cctx = CCtx::with_level(1);
        cctx.set_pledged_src_size(100).unwrap();
        let mut out = OutBuffer::new(&mut dst);
        let mut input = InBuffer::new(&src);
        let err = cctx.compress_stream(&mut out, &mut input, EndDirective::End).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SrcSizeWrong);
        let err = cctx.compress_stream(&mut out, &mut input, EndDirective::End).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InitMissing);

        cctx.reset(ResetDirective::SessionOnly).unwrap();
        cctx.set_pledged_src_size(10).unwrap();
        let mut out = OutBuffer::new(&mut dst);
        let mut input = InBuffer::new(&src);
        let err = cctx.compress_stream(&mut out, &mut input, EndDirective::End).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SrcSizeWrong);

        cctx.reset(ResetDirective::SessionOnly).unwrap();
        cctx.set_pledged_src_size(50).unwrap();
        let mut out = OutBuffer::new(&mut dst);
        let mut input = InBuffer::new(&src);
        assert_eq!(cctx.compress_stream(&mut out, &mut input, EndDirective::End).unwrap(), 0);
        let frame = out.written().to_vec();
        assert_eq!(parse_frame_header(&frame, Format::Zstd1).unwrap().content_size, Some(50));
        assert_eq!(decompress(&frame).unwrap(), src);
    }

    #[test]
    fn test_workspace_and_indices_carry_over() {
        let src = sample(20_000);
        let mut cctx = CCtx::with_level(3);
        let first = compress_with(&mut cctx, &src);
        let size = cctx.ws.size();
        let next_src = cctx.ms.window.next_src;
        let second = compress_with(&mut cctx, &src);
        assert_eq!(first, second);
        assert_eq!(cctx.ws.size(), size);
        assert!(cctx.ms.window.next_src >= next_src + src.len() as u32);
        assert!(cctx.ws.is_consistent());
    }

    #[test]
    fn test_sizeof_within_estimate() {
        for level in [1, 3, 6, 12, 19] {
            let mut cctx = CCtx::with_level(level);
            compress_with(&mut cctx, &sample(10_000));
            assert!(cctx.sizeof() <= estimate_cctx_size(level), "level {level}");
        }
        assert!(estimate_cctx_size(19) > estimate_cctx_size(1));
    }

    #[test]
    fn test_sizing_is_pure() {
        let params = CCtxParams::with_level(5);
        let cp = get_cparams_from_cctx_params(&params, 1 << 20, 0, CParamMode::NoAttachDict);
        let a = Sizing::for_frame(&params, &cp, true, 1 << 20, 0, false);
        let b = Sizing::for_frame(&params, &cp, true, 1 << 20, 0, false);
        assert_eq!(a, b);
        assert_eq!(a.block_size, BLOCKSIZE_MAX);
        assert_eq!(a.max_nb_seq, BLOCKSIZE_MAX / 4);
    }

    #[test]
    fn test_stable_output_needs_no_staging() {
        let mut params = CCtxParams::with_level(5);
        let cp = get_cparams_from_cctx_params(&params, 1 << 20, 0, CParamMode::NoAttachDict);
        let buffered = Sizing::for_frame(&params, &cp, true, 1 << 20, 0, false);
        params.out_buffer_mode = BufferMode::Stable;
        let stable = Sizing::for_frame(&params, &cp, true, 1 << 20, 0, false);
        assert!(buffered.block_out > BLOCKSIZE_MAX);
        assert_eq!(stable.block_out, 0);
        assert!(stable.workspace_bytes() < buffered.workspace_bytes());
    }

    #[test]
    fn test_target_cblock_size_caps_blocks() {
        let src = sample(64 << 10);
        let mut cctx = CCtx::with_level(3);
        cctx.set_parameter(CParameter::TargetCBlockSize, 1340).unwrap();
        let frame = compress_with(&mut cctx, &src);
        assert_eq!(cctx.sizing.block_size, 2680);
        assert_eq!(decompress(&frame).unwrap(), src);
    }

    #[test]
    fn test_magicless_format() {
        let src = sample(5000);
        let mut cctx = CCtx::with_level(3);
        cctx.set_parameter(CParameter::Format, 1).unwrap();
        let frame = compress_with(&mut cctx, &src);
        assert_ne!(&frame[..4], &ZSTD_MAGIC.to_le_bytes());
        let mut decoder = ZstdDecoder::new();
        decoder.set_format(Format::Magicless);
        assert_eq!(decoder.decompress(&frame).unwrap(), src);
    }

    #[test]
    fn test_checksum_flag() {
        let src = sample(4000);
        let mut cctx = CCtx::with_level(3);
        cctx.set_parameter(CParameter::ChecksumFlag, 1).unwrap();
        let frame = compress_with(&mut cctx, &src);
        assert!(parse_frame_header(&frame, Format::Zstd1).unwrap().has_checksum);
        let digest = crate::checksum(&src).to_le_bytes();
        assert_eq!(&frame[frame.len() - 4..], &digest);
        assert_eq!(decompress(&frame).unwrap(), src);
    }

    #[test]
    fn test_compress_ignores_sticky_settings() {
        let src = sample(4000);
        let mut cctx = CCtx::with_level(9);
        cctx.set_parameter(CParameter::ChecksumFlag, 1).unwrap();
        cctx.load_dictionary(b"a dictionary that is not used").unwrap();
        let mut dst = vec![0u8; compress_capacity(src.len())];
        let n = cctx.compress(&mut dst, &src, 1).unwrap();
        let header = parse_frame_header(&dst[..n], Format::Zstd1).unwrap();
        assert!(!header.has_checksum);
        assert_eq!(header.dict_id, 0);
        assert_eq!(cctx.get_parameter(CParameter::ChecksumFlag), 1);
        assert_eq!(cctx.get_parameter(CParameter::CompressionLevel), 9);
        assert!(matches!(cctx.dict, DictSource::Local { .. }));
    }

    #[test]
    fn test_dst_too_small() {
        let src = sample(10_000);
        let mut cctx = CCtx::with_level(3);
        let mut dst = [0u8; 16];
        let err = cctx.compress2(&mut dst, &src).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DstSizeTooSmall);
        // The next frame starts clean.
        let frame = compress_with(&mut cctx, &src);
        assert_eq!(decompress(&frame).unwrap(), src);
    }

    fn dictionary_content() -> Vec<u8> {
        sample(8000)
    }

    #[test]
    fn test_cdict_attach_copy_and_load_round_trip() {
        let content = dictionary_content();
        let dict = build_dictionary(&content, 0x1234);
        let src = sample(3000);
        let plain = compress_with(&mut CCtx::with_level(1), &src);

        let cdict = CDict::new(&dict, 1).unwrap();
        for pref in [DictAttachPref::ForceAttach, DictAttachPref::ForceCopy, DictAttachPref::ForceLoad] {
            let mut cctx = CCtx::with_level(1);
            cctx.set_parameter(CParameter::ForceAttachDict, pref as i32).unwrap();
            cctx.ref_cdict(&cdict).unwrap();
            let frame = compress_with(&mut cctx, &src);
            match pref {
                DictAttachPref::ForceAttach => assert!(cctx.attached.is_some()),
                _ => assert!(cctx.attached.is_none()),
            }
            assert_eq!(parse_frame_header(&frame, Format::Zstd1).unwrap().dict_id, 0x1234);
            assert!(frame.len() < plain.len(), "{pref:?}");
            assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src, "{pref:?}");
        }
    }

    #[test]
    fn test_forced_window_copies_dictionary() {
        let dict = build_dictionary(&dictionary_content(), 0x1234);
        let src = sample(3000);
        let cdict = CDict::new(&dict, 1).unwrap();

        let mut copied = CCtx::with_level(1);
        copied.set_parameter(CParameter::ForceAttachDict, DictAttachPref::ForceCopy as i32).unwrap();
        copied.ref_cdict(&cdict).unwrap();
        let expected = compress_with(&mut copied, &src);

        let mut cctx = CCtx::with_level(1);
        cctx.set_parameter(CParameter::ForceMaxWindow, 1).unwrap();
        cctx.ref_cdict(&cdict).unwrap();
        let frame = compress_with(&mut cctx, &src);
        assert!(cctx.attached.is_none());
        assert_eq!(cctx.ms.loaded_dict_end, 0);
        assert_eq!(frame, expected);
        assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src);
    }

    #[test]
    fn test_cdict_with_lazy_strategies() {
        let content = dictionary_content();
        let src = sample(6000);
        for (level, dedicated) in [(5, false), (5, true), (13, false)] {
            let mut params = CCtxParams::with_level(level);
            params.enable_dedicated_dict_search = dedicated;
            let cdict = CDict::with_params(&content, DictContentType::RawContent, &params).unwrap();
            let mut cctx = CCtx::with_level(level);
            cctx.ref_cdict(&cdict).unwrap();
            let frame = compress_with(&mut cctx, &src);
            assert_eq!(decompress_with_dict(&frame, &content).unwrap(), src, "level {level}");
        }
    }

    #[test]
    fn test_local_dictionary_is_sticky() {
        let content = dictionary_content();
        let src = sample(2000);
        let mut cctx = CCtx::with_level(3);
        cctx.load_dictionary(&content).unwrap();
        let first = compress_with(&mut cctx, &src);
        let second = compress_with(&mut cctx, &src);
        assert_eq!(first, second);
        assert_eq!(decompress_with_dict(&first, &content).unwrap(), src);
    }

    #[test]
    fn test_prefix_is_single_use() {
        let prefix = dictionary_content();
        let src = sample(2000);
        let mut cctx = CCtx::with_level(3);
        cctx.ref_prefix(&prefix).unwrap();
        let with_prefix = compress_with(&mut cctx, &src);
        let without = compress_with(&mut cctx, &src);
        assert!(with_prefix.len() < without.len());
        assert_eq!(decompress_with_dict(&with_prefix, &prefix).unwrap(), src);
        assert_eq!(decompress(&without).unwrap(), src);
    }

    #[test]
    fn test_corrupted_dictionary_rejected() {
        let mut cctx = CCtx::with_level(3);
        cctx.load_dictionary_as(b"no magic in here", DictContentType::FullDict).unwrap();
        let mut dst = [0u8; 128];
        let err = cctx.compress2(&mut dst, b"data").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DictionaryWrong);
    }

    fn seq(lit_length: u32, match_length: u32, offset: u32) -> Sequence {
        Sequence {
            lit_length,
            match_length,
            offset,
        }
    }

    #[test]
    fn test_compress_sequences() {
        let src = b"abcdefabcdefabcdef-tail".to_vec();
        let seqs = [seq(6, 12, 6)];
        let mut cctx = CCtx::with_level(3);
        cctx.set_parameter(CParameter::ChecksumFlag, 1).unwrap();
        let mut dst = vec![0u8; 256];
        let n = cctx.compress_sequences(&mut dst, &seqs, &src).unwrap();
        assert_eq!(decompress(&dst[..n]).unwrap(), src);

        let n = cctx.compress_sequences(&mut dst, &[], b"").unwrap();
        assert!(decompress(&dst[..n]).unwrap().is_empty());
    }

    #[test]
    fn test_compress_sequences_across_blocks() {
        let unit = sample(1000);
        let mut src = unit.clone();
        let mut seqs = vec![seq(1000, 0, 0)];
        for _ in 0..300 {
            src.extend_from_slice(&unit);
            seqs.push(seq(0, 1000, 1000));
        }
        let mut cctx = CCtx::with_level(1);
        let mut dst = vec![0u8; compress_capacity(src.len())];
        let n = cctx.compress_sequences(&mut dst, &seqs, &src).unwrap();
        assert!(n < 20_000);
        assert_eq!(decompress(&dst[..n]).unwrap(), src);
    }

    #[test]
    fn test_compress_sequences_rejects_invalid() {
        let src = b"abcdefabcdefabcdef".to_vec();
        let mut cctx = CCtx::with_level(3);
        let mut dst = vec![0u8; 256];
        for bad in [vec![seq(6, 12, 100)], vec![seq(6, 12, 0)], vec![seq(10, 12, 6)]] {
            let err = cctx.compress_sequences(&mut dst, &bad, &src).unwrap_err();
            assert_eq!(err.code(), ErrorCode::CorruptionDetected, "{bad:?}");
        }
        let err = cctx.compress_sequences(&mut dst, &[seq(1, 0, 0)], b"").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptionDetected);
    }

    #[test]
    fn test_compress_sequences_reach_into_dictionary() {
        let content = dictionary_content();
        let src = content[100..400].to_vec();
        let mut cctx = CCtx::with_level(3);
        cctx.load_dictionary(&content).unwrap();
        let offset = (content.len() - 100) as u32;
        let mut dst = vec![0u8; 1024];
        let n = cctx.compress_sequences(&mut dst, &[seq(0, 300, offset)], &src).unwrap();
        assert_eq!(decompress_with_dict(&dst[..n], &content).unwrap(), src);
    }

    struct LiteralsOnly;

    impl SequenceProducer for LiteralsOnly {
        fn produce_sequences(&mut self, _src: &[u8], _window_size: usize, _out: &mut Vec<Sequence>) -> Result<()> {
            Ok(())
        }
    }

    struct Failing;

    impl SequenceProducer for Failing {
        fn produce_sequences(&mut self, _src: &[u8], _window_size: usize, _out: &mut Vec<Sequence>) -> Result<()> {
            Err(ZstdError::generic("no sequences today"))
        }
    }

    #[test]
    fn test_sequence_producer() {
        let src = sample(50_000);
        let mut cctx = CCtx::with_level(3);
        cctx.set_sequence_producer(Box::new(LiteralsOnly)).unwrap();
        let literal_only = compress_with(&mut cctx, &src);
        assert_eq!(decompress(&literal_only).unwrap(), src);

        cctx.set_sequence_producer(Box::new(Failing)).unwrap();
        let mut dst = vec![0u8; compress_capacity(src.len())];
        assert_eq!(cctx.compress2(&mut dst, &src).unwrap_err().code(), ErrorCode::Generic);

        cctx.reset(ResetDirective::SessionOnly).unwrap();
        cctx.set_parameter(CParameter::EnableSeqProducerFallback, 1).unwrap();
        let fallback = compress_with(&mut cctx, &src);
        assert!(fallback.len() < literal_only.len());
        assert_eq!(decompress(&fallback).unwrap(), src);

        cctx.load_dictionary(b"dictionary content").unwrap();
        assert_eq!(
            cctx.compress2(&mut dst, &src).unwrap_err().code(),
            ErrorCode::ParameterUnsupported
        );
    }

    #[test]
    fn test_strategy_override() {
        let src = sample(40_000);
        for strategy in [Strategy::Fast, Strategy::DFast, Strategy::Greedy, Strategy::Lazy2, Strategy::BtLazy2, Strategy::BtUltra2] {
            let mut cctx = CCtx::with_level(3);
            cctx.set_parameter(CParameter::Strategy, strategy as i32).unwrap();
            let frame = compress_with(&mut cctx, &src);
            assert_eq!(decompress(&frame).unwrap(), src, "{strategy:?}");
        }
    }

    fn opt_stats(cctx: &CCtx<'_>) -> OptStats {
        *bytemuck::from_bytes::<OptStats>(&cctx.ws.bytes(cctx.opt_stats)[..OPT_STATS_BYTES])
    }

    #[test]
    fn test_parser_statistics_live_in_workspace_objects() {
        let src = sample(30_000);
        let mut cctx = CCtx::with_level(19);
        compress_with(&mut cctx, &src);
        assert_eq!(cctx.opt_stats.offset, 0);
        assert_eq!(cctx.opt_stats.len, object_space(OPT_STATS_BYTES));
        assert!(!opt_stats(&cctx).is_fresh());

        // A new frame starts from zeroed statistics in the same object.
        let region = cctx.opt_stats;
        cctx.set_parameter(CParameter::CompressionLevel, 1).unwrap();
        let frame = compress_with(&mut cctx, &src);
        assert_eq!(decompress(&frame).unwrap(), src);
        assert_eq!(cctx.opt_stats, region);
        assert!(opt_stats(&cctx).is_fresh());
        assert!(cctx.layout.opt_nodes.len == 0);
        assert!(cctx.ws.is_consistent());
    }

    #[test]
    fn test_optimal_strategies_differ_from_lazy_tree() {
        let mut src = Vec::new();
        let mut seed = 99u32;
        while src.len() < 60_000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let word = ["north ", "south ", "east ", "west ", "up ", "down "][(seed >> 29) as usize % 6];
            src.extend_from_slice(word.as_bytes());
            if seed & 7 == 0 {
                src.push((seed >> 12) as u8);
            }
        }
        let mut frames = Vec::new();
        for strategy in [Strategy::BtLazy2, Strategy::BtOpt, Strategy::BtUltra, Strategy::BtUltra2] {
            let mut cctx = CCtx::with_level(19);
            cctx.set_parameter(CParameter::Strategy, strategy as i32).unwrap();
            let frame = compress_with(&mut cctx, &src);
            assert_eq!(decompress(&frame).unwrap(), src, "{strategy:?}");
            frames.push(frame);
        }
        for frame in &frames[1..] {
            assert_ne!(frame, &frames[0]);
            // Pricing every path never loses much to the lazy parse.
            assert!(frame.len() <= frames[0].len() + frames[0].len() / 50, "{} vs {}", frame.len(), frames[0].len());
        }
        for level in 16..=22 {
            let frame = crate::compress(&src, level).unwrap();
            assert_eq!(decompress(&frame).unwrap(), src, "level {level}");
        }
    }
}

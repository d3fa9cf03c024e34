//! Digested dictionaries.
//!
//! A [`CDict`] holds a private copy of a dictionary, the entropy tables and
//! repeat offsets parsed from its header, and match-finder tables already
//! filled with its content. Compression contexts either attach it by
//! reference (searching its tables read-only next to their own) or copy
//! its tables into their workspace; the dictionary itself is never
//! mutated after construction.

use oxizstd_core::{Result, ZstdError};
use tracing::debug;

use crate::block::CompressedBlockState;
use crate::fse::{FseCTable, read_ncount};
use crate::huffman::{HufCTable, HufRepeat};
use crate::match_state::{DictMatchState, DictTables, MatchState, MatchTables, TableSizes};
use crate::params::{
    CCtxParams, CParamMode, CompressionParameters, DictAttachPref,
    attach_dict_size_cutoff, dedicated_dict_search_cparams, dedicated_dict_search_supported,
    get_cparams_from_cctx_params, resolve_row_match_finder_mode, row_match_finder_used,
};
use crate::seq_store::REP_NUM;
use crate::sequences::{FseRepeat, LL_FSE_LOG, MAX_LL, MAX_ML, MAX_OFF, ML_FSE_LOG, OFF_FSE_LOG};
use crate::window::{CURRENT_MAX, WINDOW_START_INDEX};
use crate::workspace::{Region, Workspace, as_u32s, as_u32s_mut, object_space, slack_space};
use crate::CONTENTSIZE_UNKNOWN;

/// Magic number opening a dictionary in the Zstandard format.
pub const DICT_MAGIC: u32 = 0xEC30_A437;

/// Dictionaries shorter than this are ignored.
const DICT_MIN_SIZE: usize = 8;

/// How to interpret dictionary bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictContentType {
    /// Zstandard format if the magic number is present, raw content otherwise.
    #[default]
    Auto,
    /// Raw content, even if it starts with the magic number.
    RawContent,
    /// Zstandard format; anything else is rejected.
    FullDict,
}

/// What the header of a dictionary provided.
#[derive(Debug, Clone)]
pub(crate) struct DictEntropy {
    /// Entropy tables and repeat offsets to start from.
    pub state: CompressedBlockState,
    /// Dictionary id, 0 for raw content.
    pub dict_id: u32,
    /// Bytes preceding the content.
    pub header_size: usize,
}

/// Split `dict` into entropy state and content.
///
/// Returns `None` when the dictionary is too short to be used at all.
pub(crate) fn parse_dictionary(dict: &[u8], content_type: DictContentType) -> Result<Option<DictEntropy>> {
    if dict.len() < DICT_MIN_SIZE {
        if content_type == DictContentType::FullDict {
            return Err(ZstdError::dictionary_wrong("dictionary shorter than its header"));
        }
        return Ok(None);
    }
    let raw = DictEntropy {
        state: CompressedBlockState::default(),
        dict_id: 0,
        header_size: 0,
    };
    if content_type == DictContentType::RawContent {
        return Ok(Some(raw));
    }
    if read_le32(dict, 0) != DICT_MAGIC {
        if content_type == DictContentType::FullDict {
            return Err(ZstdError::dictionary_wrong("missing dictionary magic number"));
        }
        return Ok(Some(raw));
    }
    load_entropy(dict).map(Some)
}

fn read_le32(src: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

/// Parse the entropy section following the magic number and id.
fn load_entropy(dict: &[u8]) -> Result<DictEntropy> {
    let corrupted = |what: &str| ZstdError::dictionary_corrupted(what.to_string());
    let dict_id = read_le32(dict, 4);
    let mut state = CompressedBlockState::default();
    let mut ip = 8usize;

    let (table, has_zero_weights, size) =
        HufCTable::read(&dict[ip..]).map_err(|_| corrupted("bad literals table"))?;
    state.entropy.huf.repeat = if !has_zero_weights && table.max_symbol() == 255 {
        HufRepeat::Valid
    } else {
        HufRepeat::Check
    };
    state.entropy.huf.table = table;
    ip += size;

    let mut of_norm = [0i16; MAX_OFF as usize + 1];
    let of = read_ncount(&mut of_norm, MAX_OFF, &dict[ip..]).map_err(|_| corrupted("bad offsets header"))?;
    if of.table_log > OFF_FSE_LOG {
        return Err(corrupted("offsets table log too large"));
    }
    let mut of_table = FseCTable::new();
    of_table
        .build(&of_norm, MAX_OFF, of.table_log)
        .map_err(|_| corrupted("bad offsets table"))?;
    ip += of.size;

    let mut ml_norm = [0i16; MAX_ML as usize + 1];
    let ml = read_ncount(&mut ml_norm, MAX_ML, dict.get(ip..).unwrap_or_default())
        .map_err(|_| corrupted("bad match lengths header"))?;
    if ml.table_log > ML_FSE_LOG {
        return Err(corrupted("match lengths table log too large"));
    }
    state
        .entropy
        .fse
        .ml_table
        .build(&ml_norm, ml.max_symbol, ml.table_log)
        .map_err(|_| corrupted("bad match lengths table"))?;
    state.entropy.fse.ml_repeat = ncount_repeat(&ml_norm, ml.max_symbol, MAX_ML);
    ip += ml.size;

    let mut ll_norm = [0i16; MAX_LL as usize + 1];
    let ll = read_ncount(&mut ll_norm, MAX_LL, dict.get(ip..).unwrap_or_default())
        .map_err(|_| corrupted("bad literal lengths header"))?;
    if ll.table_log > LL_FSE_LOG {
        return Err(corrupted("literal lengths table log too large"));
    }
    state
        .entropy
        .fse
        .ll_table
        .build(&ll_norm, ll.max_symbol, ll.table_log)
        .map_err(|_| corrupted("bad literal lengths table"))?;
    state.entropy.fse.ll_repeat = ncount_repeat(&ll_norm, ll.max_symbol, MAX_LL);
    ip += ll.size;

    if ip + 4 * REP_NUM > dict.len() {
        return Err(corrupted("truncated repeat offsets"));
    }
    for (i, rep) in state.rep.iter_mut().enumerate() {
        *rep = read_le32(dict, ip + 4 * i);
    }
    ip += 4 * REP_NUM;

    // Every offset a dictionary-primed frame can reach must be encodable.
    let content_size = dict.len() - ip;
    let mut of_max = MAX_OFF;
    if content_size as u64 <= u32::MAX as u64 - (128 << 10) {
        of_max = highbit32(content_size as u32 + (128 << 10));
    }
    state.entropy.fse.of_repeat = ncount_repeat(&of_norm, of.max_symbol, of_max.min(MAX_OFF));
    state.entropy.fse.of_table = of_table;

    for &rep in &state.rep {
        if rep == 0 || rep as usize > content_size {
            return Err(corrupted("repeat offset out of range"));
        }
    }
    Ok(DictEntropy {
        state,
        dict_id,
        header_size: ip,
    })
}

#[inline]
fn highbit32(v: u32) -> u32 {
    31 - v.leading_zeros()
}

/// A table may be trusted outright only if it codes every symbol up to `max`.
fn ncount_repeat(norm: &[i16], dict_max: u32, max: u32) -> FseRepeat {
    if dict_max < max || norm[..=max as usize].contains(&0) {
        FseRepeat::Check
    } else {
        FseRepeat::Valid
    }
}

/// A digested dictionary, shareable read-only between contexts.
#[derive(Debug)]
pub struct CDict {
    ws: Workspace,
    dict: Region,
    dict_len: usize,
    header_size: usize,
    hash: Region,
    chain: Region,
    tags: Region,
    ms: MatchState,
    block_state: CompressedBlockState,
    dict_id: u32,
    compression_level: i32,
}

/// Workspace bytes of a digested dictionary.
fn cdict_workspace_bytes(dict_size: usize, sizes: &TableSizes) -> usize {
    object_space(dict_size) + sizes.workspace_bytes() + slack_space()
}

/// Resolve the parameters a dictionary is built with. Returns them with
/// the row-finder and dedicated-search decisions.
fn cdict_params(params: &CCtxParams, dict_size: usize) -> (CompressionParameters, bool, bool) {
    let dict_size = dict_size as u64;
    let mut dedicated = params.enable_dedicated_dict_search;
    let mut cp = if dedicated {
        let mut cp = dedicated_dict_search_cparams(params.compression_level, dict_size);
        params.cparams.apply(&mut cp);
        cp
    } else {
        get_cparams_from_cctx_params(params, CONTENTSIZE_UNKNOWN, dict_size, CParamMode::CreateCDict)
    };
    if !dedicated_dict_search_supported(&cp) {
        dedicated = false;
        cp = get_cparams_from_cctx_params(params, CONTENTSIZE_UNKNOWN, dict_size, CParamMode::CreateCDict);
    }
    let use_row = row_match_finder_used(cp.strategy, resolve_row_match_finder_mode(params.use_row_match_finder, &cp));
    (cp, use_row, dedicated)
}

/// Memory a [`CDict`] for `dict_size` bytes at `level` occupies.
pub fn estimate_cdict_size(dict_size: usize, level: i32) -> usize {
    let (cp, use_row, dedicated) = cdict_params(&CCtxParams::with_level(level), dict_size);
    let sizes = TableSizes::new(&cp, use_row, false, dedicated);
    std::mem::size_of::<CDict>() + cdict_workspace_bytes(dict_size, &sizes)
}

impl CDict {
    /// Digest `dict` for compression at `level`.
    pub fn new(dict: &[u8], level: i32) -> Result<Self> {
        Self::with_params(dict, DictContentType::Auto, &CCtxParams::with_level(level))
    }

    /// Digest `dict` with explicit parameters. Only the compression level,
    /// the core parameter overrides, the row-finder switch and the
    /// dedicated-search flag are taken from `params`.
    pub fn with_params(dict: &[u8], content_type: DictContentType, params: &CCtxParams) -> Result<Self> {
        let (cp, use_row, dedicated) = cdict_params(params, dict.len());
        let mut ms = MatchState::new(cp, use_row, false, dedicated);
        let sizes = ms.sizes;

        let mut ws = Workspace::create(cdict_workspace_bytes(dict.len(), &sizes))?;
        let dict_region = ws.reserve_object(dict.len());
        let hash = ws.reserve_table(sizes.hash * 4);
        let chain = ws.reserve_table(sizes.chain * 4);
        let tags = ws.reserve_table(sizes.tags);
        if ws.reserve_failed() {
            return Err(ZstdError::memory_allocation(ws.size()));
        }
        ws.clean_tables();
        ws.bytes_mut(dict_region)[..dict.len()].copy_from_slice(dict);

        let (block_state, dict_id, header_size) = match parse_dictionary(dict, content_type)? {
            Some(entropy) => (entropy.state, entropy.dict_id, entropy.header_size),
            None => (CompressedBlockState::default(), 0, dict.len()),
        };

        let [stored, hash_bytes, chain_bytes, tag_bytes] = ws.split_mut([dict_region, hash, chain, tags]);
        let mut content: &[u8] = &stored[header_size..dict.len()];
        // Only the tail fits the index space.
        let max_len = (CURRENT_MAX - WINDOW_START_INDEX) as usize;
        let skipped = content.len().saturating_sub(max_len);
        content = &content[skipped..];
        ms.window.update(content.len());
        ms.loaded_dict_end = ms.window.next_src;
        let tables = MatchTables {
            hash: &mut as_u32s_mut(hash_bytes)[..sizes.hash],
            chain: &mut as_u32s_mut(chain_bytes)[..sizes.chain],
            hash3: &mut [],
            tags: &mut tag_bytes[..sizes.tags],
        };
        ms.load_content(content, tables, content.len(), true);

        debug!(
            dict_id,
            dict_size = dict.len(),
            content_size = content.len(),
            strategy = ?cp.strategy,
            use_row,
            dedicated,
            workspace = ws.size(),
            "digested dictionary"
        );
        Ok(Self {
            ws,
            dict: dict_region,
            dict_len: dict.len(),
            header_size: header_size + skipped,
            hash,
            chain,
            tags,
            ms,
            block_state,
            dict_id,
            compression_level: params.compression_level,
        })
    }

    /// Dictionary id written into frame headers, 0 for raw content.
    pub fn dict_id(&self) -> u32 {
        self.dict_id
    }

    /// Level the dictionary was digested for.
    pub fn compression_level(&self) -> i32 {
        self.compression_level
    }

    /// Parameters the tables were built with.
    pub fn cparams(&self) -> CompressionParameters {
        self.ms.cparams
    }

    /// Total memory held.
    pub fn sizeof(&self) -> usize {
        std::mem::size_of::<Self>() + self.ws.size()
    }

    /// The dictionary as given.
    pub fn bytes(&self) -> &[u8] {
        &self.ws.bytes(self.dict)[..self.dict_len]
    }

    /// Size of the dictionary as given.
    pub fn dict_size(&self) -> usize {
        self.dict_len
    }

    /// Indexed content, without the entropy header.
    pub fn content(&self) -> &[u8] {
        &self.bytes()[self.header_size..]
    }

    /// Whether the row finder indexed the content.
    pub fn use_row(&self) -> bool {
        self.ms.use_row
    }

    /// Whether the tables hold a dedicated search index.
    pub fn dedicated(&self) -> bool {
        self.ms.dedicated_dict_search
    }

    /// Entropy tables and repeat offsets to start frames from.
    pub(crate) fn block_state(&self) -> &CompressedBlockState {
        &self.block_state
    }

    /// Read-only view for searching next to a context's own tables.
    pub(crate) fn match_state(&self) -> DictMatchState<'_> {
        DictMatchState {
            ms: &self.ms,
            src: self.content(),
            tables: self.tables(),
        }
    }

    /// Raw state, for contexts copying the tables.
    pub(crate) fn raw_match_state(&self) -> &MatchState {
        &self.ms
    }

    pub(crate) fn tables(&self) -> DictTables<'_> {
        let sizes = self.ms.sizes;
        DictTables {
            hash: &as_u32s(self.ws.bytes(self.hash))[..sizes.hash],
            chain: &as_u32s(self.ws.bytes(self.chain))[..sizes.chain],
            tags: &self.ws.bytes(self.tags)[..sizes.tags],
        }
    }

    /// Whether a frame expecting `pledged` bytes should reference the
    /// dictionary rather than copy its tables. A forced window always
    /// copies, unless the tables only exist in dedicated form.
    pub(crate) fn should_attach(&self, pref: DictAttachPref, force_window: bool, pledged: u64) -> bool {
        let cutoff = attach_dict_size_cutoff(self.ms.cparams.strategy);
        self.ms.dedicated_dict_search
            || ((pledged <= cutoff || pledged == CONTENTSIZE_UNKNOWN || pref == DictAttachPref::ForceAttach)
                && pref != DictAttachPref::ForceCopy
                && !force_window)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fse::{normalize_count, write_ncount};
    use crate::params::Strategy;
    use oxizstd_core::ErrorCode;

    fn ncount(counts: &[u32], log: u32, out: &mut Vec<u8>) {
        let total: u32 = counts.iter().sum();
        let max = counts.len() as u32 - 1;
        let mut norm = vec![0i16; counts.len()];
        normalize_count(&mut norm, log, counts, total as usize, max, false).unwrap();
        let mut buf = vec![0u8; 512];
        let n = write_ncount(&mut buf, &norm, max, log).unwrap();
        out.extend_from_slice(&buf[..n]);
    }

    /// A well-formed dictionary in the Zstandard format whose tables code
    /// every symbol.
    pub(crate) fn build_dictionary(content: &[u8], dict_id: u32) -> Vec<u8> {
        let mut dict = Vec::new();
        dict.extend_from_slice(&DICT_MAGIC.to_le_bytes());
        dict.extend_from_slice(&dict_id.to_le_bytes());

        let mut count = [0u32; 256];
        for (i, c) in count.iter_mut().enumerate() {
            *c = 1 + (i % 7) as u32 + if (b'a'..=b'z').contains(&(i as u8)) { 40 } else { 0 };
        }
        let mut huf = HufCTable::default();
        huf.build(&count, 255, 11);
        let mut buf = vec![0u8; 512];
        let n = huf.write(&mut buf).unwrap();
        dict.extend_from_slice(&buf[..n]);

        ncount(&[4u32; MAX_OFF as usize + 1], 8, &mut dict);
        ncount(&[3u32; MAX_ML as usize + 1], 9, &mut dict);
        ncount(&[3u32; MAX_LL as usize + 1], 9, &mut dict);
        for rep in [1u32, 4, 8] {
            dict.extend_from_slice(&rep.to_le_bytes());
        }
        dict.extend_from_slice(content);
        dict
    }

    fn sample_content() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog; ".repeat(40)
    }

    #[test]
    fn test_raw_content_dictionary() {
        let content = sample_content();
        let cdict = CDict::new(&content, 3).unwrap();
        assert_eq!(cdict.dict_id(), 0);
        assert_eq!(cdict.content(), &content[..]);
        let ms = cdict.raw_match_state();
        assert_eq!(ms.window.dict_limit, WINDOW_START_INDEX);
        assert_eq!(ms.window.next_src, WINDOW_START_INDEX + content.len() as u32);
        assert_eq!(ms.loaded_dict_end, ms.window.next_src);
        assert!(cdict.tables().hash.iter().any(|&h| h != 0));
    }

    #[test]
    fn test_full_dictionary_entropy() {
        let content = sample_content();
        let dict = build_dictionary(&content, 0x1234);
        let cdict = CDict::new(&dict, 3).unwrap();
        assert_eq!(cdict.dict_id(), 0x1234);
        assert_eq!(cdict.content(), &content[..]);
        assert_eq!(cdict.bytes(), &dict[..]);
        let state = cdict.block_state();
        assert_eq!(state.rep, [1, 4, 8]);
        assert_eq!(state.entropy.huf.repeat, HufRepeat::Valid);
        assert_eq!(state.entropy.fse.ll_repeat, FseRepeat::Valid);
        assert_eq!(state.entropy.fse.ml_repeat, FseRepeat::Valid);
        assert_eq!(state.entropy.fse.of_repeat, FseRepeat::Valid);
    }

    #[test]
    fn test_content_type_rules() {
        let content = sample_content();
        let err = CDict::with_params(&content, DictContentType::FullDict, &CCtxParams::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DictionaryWrong);

        let err = CDict::with_params(b"tiny", DictContentType::FullDict, &CCtxParams::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DictionaryWrong);

        // Too short to matter: ignored.
        let cdict = CDict::new(b"tiny", 3).unwrap();
        assert!(cdict.content().is_empty());

        // The magic number alone does not make raw content structured.
        let dict = build_dictionary(&content, 7);
        let cdict = CDict::with_params(&dict, DictContentType::RawContent, &CCtxParams::default()).unwrap();
        assert_eq!(cdict.dict_id(), 0);
        assert_eq!(cdict.content().len(), dict.len());
    }

    #[test]
    fn test_corrupted_dictionary() {
        let mut dict = DICT_MAGIC.to_le_bytes().to_vec();
        dict.extend_from_slice(&[1, 0, 0, 0]);
        dict.extend_from_slice(&[0xFF; 24]);
        let err = CDict::new(&dict, 3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DictionaryCorrupted);

        // Repeat offsets may not reach beyond the content.
        let mut dict = build_dictionary(b"0123456789abcdef", 9);
        let reps_at = dict.len() - 16 - 12;
        dict[reps_at..reps_at + 4].copy_from_slice(&100u32.to_le_bytes());
        let err = CDict::new(&dict, 3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DictionaryCorrupted);
    }

    #[test]
    fn test_ncount_repeat() {
        assert_eq!(ncount_repeat(&[1, 2, 3], 2, 2), FseRepeat::Valid);
        assert_eq!(ncount_repeat(&[1, 0, 3], 2, 2), FseRepeat::Check);
        assert_eq!(ncount_repeat(&[1, 2, 3], 1, 2), FseRepeat::Check);
    }

    #[test]
    fn test_should_attach() {
        let cdict = CDict::new(&sample_content(), 1).unwrap();
        assert_eq!(cdict.cparams().strategy, Strategy::Fast);
        assert!(cdict.should_attach(DictAttachPref::Default, false, 1000));
        assert!(!cdict.should_attach(DictAttachPref::Default, false, 1 << 20));
        assert!(cdict.should_attach(DictAttachPref::Default, false, CONTENTSIZE_UNKNOWN));
        assert!(cdict.should_attach(DictAttachPref::ForceAttach, false, 1 << 20));
        assert!(!cdict.should_attach(DictAttachPref::ForceCopy, false, 1000));
        assert!(!cdict.should_attach(DictAttachPref::Default, true, 1000));
        assert!(!cdict.should_attach(DictAttachPref::ForceAttach, true, CONTENTSIZE_UNKNOWN));
    }

    #[test]
    fn test_dedicated_search_dictionary() {
        let mut params = CCtxParams::with_level(5);
        params.enable_dedicated_dict_search = true;
        let cdict = CDict::with_params(&sample_content(), DictContentType::Auto, &params).unwrap();
        assert!(cdict.dedicated());
        assert!(!cdict.tables().chain.is_empty());
        // Always attached.
        assert!(cdict.should_attach(DictAttachPref::ForceCopy, false, 1 << 30));
        assert!(cdict.should_attach(DictAttachPref::Default, true, 1000));

        // Fast strategies have no dedicated index.
        let mut params = CCtxParams::with_level(1);
        params.enable_dedicated_dict_search = true;
        let cdict = CDict::with_params(&sample_content(), DictContentType::Auto, &params).unwrap();
        assert!(!cdict.dedicated());
    }

    #[test]
    fn test_sizeof_matches_estimate() {
        let content = sample_content();
        for level in [1, 3, 7, 19] {
            let cdict = CDict::new(&content, level).unwrap();
            assert_eq!(cdict.sizeof(), estimate_cdict_size(content.len(), level));
        }
    }
}

//! Zstandard frame format.
//!
//! Writing side: the frame header and skippable frames. Reading side: a
//! reference decoder that walks frames block by block, optionally primed
//! with a dictionary, and verifies content size and checksum.

use oxizstd_core::{Result, ZstdError};
use tracing::trace;

use crate::cdict::DICT_MAGIC;
use crate::checksum::{CHECKSUM_SIZE, FrameChecksum};
use crate::huffman::HufDTable;
use crate::literals::decode_literals;
use crate::params::{Format, FrameParameters, WINDOWLOG_ABSOLUTEMIN, WINDOWLOG_MAX};
use crate::seq_store::{REP_NUM, Repcodes};
use crate::sequences::{
    LL_FSE_LOG, MAX_LL, MAX_ML, MAX_OFF, ML_FSE_LOG, OFF_FSE_LOG, SeqDecodeTables, Sequence,
    decode_sequences,
};
use crate::fse::FseDTable;
use crate::{
    BLOCKSIZE_MAX, BlockType, CONTENTSIZE_UNKNOWN, SKIPPABLE_HEADER_SIZE, SKIPPABLE_MAGIC_HIGH,
    SKIPPABLE_MAGIC_LOW, ZSTD_MAGIC,
};

/// Largest frame header: magic, descriptor, window byte, 4-byte dictionary
/// id and 8-byte content size.
pub const FRAME_HEADER_SIZE_MAX: usize = 18;

/// Frame header descriptor flags.
const FHD_SINGLE_SEGMENT: u8 = 0x20;
const FHD_CONTENT_CHECKSUM: u8 = 0x04;
const FHD_RESERVED: u8 = 0x08;
const FHD_DICT_ID_FLAG_MASK: u8 = 0x03;

const DICT_ID_FIELD_SIZE: [usize; 4] = [0, 1, 2, 4];
const FCS_FIELD_SIZE: [usize; 4] = [0, 2, 4, 8];

/// Write a frame header. Returns its size.
///
/// An unknown `pledged` size leaves the content size out of the header.
pub(crate) fn write_frame_header(
    dst: &mut [u8],
    format: Format,
    fparams: &FrameParameters,
    window_log: u32,
    pledged: u64,
    dict_id: u32,
) -> Result<usize> {
    if dst.len() < FRAME_HEADER_SIZE_MAX {
        return Err(ZstdError::dst_size_too_small(FRAME_HEADER_SIZE_MAX, dst.len()));
    }
    let content_size_flag = fparams.content_size_flag && pledged != CONTENTSIZE_UNKNOWN;
    let dict_id_code = if fparams.no_dict_id_flag {
        0
    } else {
        (dict_id > 0) as usize + (dict_id >= 256) as usize + (dict_id >= 65536) as usize
    };
    let window_size = 1u64 << window_log;
    let single_segment = content_size_flag && window_size >= pledged;
    let fcs_code = if content_size_flag {
        (pledged >= 256) as usize + (pledged >= 65536 + 256) as usize + (pledged >= 0xFFFF_FFFF) as usize
    } else {
        0
    };
    let descriptor = dict_id_code as u8
        | ((fparams.checksum_flag as u8) << 2)
        | ((single_segment as u8) << 5)
        | ((fcs_code as u8) << 6);

    let mut pos = 0;
    if format == Format::Zstd1 {
        dst[..4].copy_from_slice(&ZSTD_MAGIC.to_le_bytes());
        pos = 4;
    }
    dst[pos] = descriptor;
    pos += 1;
    if !single_segment {
        dst[pos] = ((window_log - WINDOWLOG_ABSOLUTEMIN) << 3) as u8;
        pos += 1;
    }
    let id_size = DICT_ID_FIELD_SIZE[dict_id_code];
    dst[pos..pos + id_size].copy_from_slice(&dict_id.to_le_bytes()[..id_size]);
    pos += id_size;
    match fcs_code {
        0 => {
            if single_segment {
                dst[pos] = pledged as u8;
                pos += 1;
            }
        }
        1 => {
            dst[pos..pos + 2].copy_from_slice(&((pledged - 256) as u16).to_le_bytes());
            pos += 2;
        }
        2 => {
            dst[pos..pos + 4].copy_from_slice(&(pledged as u32).to_le_bytes());
            pos += 4;
        }
        _ => {
            dst[pos..pos + 8].copy_from_slice(&pledged.to_le_bytes());
            pos += 8;
        }
    }
    Ok(pos)
}

/// Wrap `src` into a skippable frame with magic `0x184D2A50 + variant`.
/// Returns bytes written.
pub fn write_skippable_frame(dst: &mut [u8], src: &[u8], variant: u32) -> Result<usize> {
    if variant > SKIPPABLE_MAGIC_HIGH - SKIPPABLE_MAGIC_LOW {
        return Err(ZstdError::parameter_out_of_bound(
            "skippable variant",
            variant as i64,
            0,
            (SKIPPABLE_MAGIC_HIGH - SKIPPABLE_MAGIC_LOW) as i64,
        ));
    }
    let size = u32::try_from(src.len()).map_err(|_| ZstdError::src_size_wrong(u32::MAX as u64, src.len() as u64))?;
    let total = SKIPPABLE_HEADER_SIZE + src.len();
    if dst.len() < total {
        return Err(ZstdError::dst_size_too_small(total, dst.len()));
    }
    dst[..4].copy_from_slice(&(SKIPPABLE_MAGIC_LOW + variant).to_le_bytes());
    dst[4..8].copy_from_slice(&size.to_le_bytes());
    dst[8..total].copy_from_slice(src);
    Ok(total)
}

fn is_skippable(src: &[u8]) -> bool {
    src.len() >= 4 && (read_le32(src, 0) & 0xFFFF_FFF0) == SKIPPABLE_MAGIC_LOW
}

fn read_le32(src: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

fn read_le(src: &[u8], size: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..size].copy_from_slice(&src[..size]);
    u64::from_le_bytes(bytes)
}

/// Zstandard frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Window size the frame needs.
    pub window_size: u64,
    /// Uncompressed content size, if announced.
    pub content_size: Option<u64>,
    /// Dictionary id, 0 if absent.
    pub dict_id: u32,
    /// Whether a content checksum follows the last block.
    pub has_checksum: bool,
    /// Whether the window covers the whole content.
    pub single_segment: bool,
    /// Header size in bytes.
    pub header_size: usize,
}

/// Parse a frame header.
pub fn parse_frame_header(data: &[u8], format: Format) -> Result<FrameHeader> {
    let mut pos = 0;
    if format == Format::Zstd1 {
        if data.len() < 4 {
            return Err(ZstdError::corrupted(0, "truncated frame header"));
        }
        let magic = read_le32(data, 0);
        if magic != ZSTD_MAGIC {
            return Err(ZstdError::corrupted(0, format!("unknown frame magic {magic:#010x}")));
        }
        pos = 4;
    }
    let &descriptor = data
        .get(pos)
        .ok_or_else(|| ZstdError::corrupted(pos as u64, "truncated frame header"))?;
    pos += 1;
    if descriptor & FHD_RESERVED != 0 {
        return Err(ZstdError::corrupted(pos as u64, "reserved descriptor bit set"));
    }
    let single_segment = descriptor & FHD_SINGLE_SEGMENT != 0;
    let has_checksum = descriptor & FHD_CONTENT_CHECKSUM != 0;
    let id_size = DICT_ID_FIELD_SIZE[(descriptor & FHD_DICT_ID_FLAG_MASK) as usize];
    let fcs_code = (descriptor >> 6) as usize;
    let fcs_size = if fcs_code == 0 && single_segment { 1 } else { FCS_FIELD_SIZE[fcs_code] };

    let needed = pos + (!single_segment) as usize + id_size + fcs_size;
    if data.len() < needed {
        return Err(ZstdError::corrupted(pos as u64, "truncated frame header"));
    }

    let mut window_size = 0u64;
    if !single_segment {
        let wd = data[pos];
        pos += 1;
        let window_log = (wd >> 3) as u32 + WINDOWLOG_ABSOLUTEMIN;
        if window_log > WINDOWLOG_MAX {
            return Err(ZstdError::corrupted(pos as u64, "window too large"));
        }
        let base = 1u64 << window_log;
        window_size = base + (base >> 3) * (wd & 0x07) as u64;
    }

    let dict_id = read_le(&data[pos..], id_size) as u32;
    pos += id_size;

    let content_size = match fcs_size {
        0 => None,
        2 => Some(read_le(&data[pos..], 2) + 256),
        n => Some(read_le(&data[pos..], n)),
    };
    pos += fcs_size;

    if single_segment {
        window_size = content_size.unwrap_or(0);
    }
    Ok(FrameHeader {
        window_size,
        content_size,
        dict_id,
        has_checksum,
        single_segment,
        header_size: pos,
    })
}

/// Dictionary as the decoder sees it.
#[derive(Debug, Clone, Default)]
struct DecoderDict {
    content: Vec<u8>,
    dict_id: u32,
    huf: Option<HufDTable>,
    seq: SeqDecodeTables,
    reps: Repcodes,
}

impl DecoderDict {
    fn parse(dict: &[u8]) -> Result<Self> {
        if dict.len() < 8 || read_le32(dict, 0) != DICT_MAGIC {
            return Ok(Self {
                content: dict.to_vec(),
                ..Self::default()
            });
        }
        let corrupted = |what: &str| ZstdError::dictionary_corrupted(what.to_string());
        let dict_id = read_le32(dict, 4);
        let mut ip = 8;
        let (huf, size) = HufDTable::read(&dict[ip..]).map_err(|_| corrupted("bad literals table"))?;
        ip += size;
        let (of, size) =
            FseDTable::read(&dict[ip..], MAX_OFF, OFF_FSE_LOG).map_err(|_| corrupted("bad offsets table"))?;
        ip += size;
        let (ml, size) = FseDTable::read(dict.get(ip..).unwrap_or_default(), MAX_ML, ML_FSE_LOG)
            .map_err(|_| corrupted("bad match lengths table"))?;
        ip += size;
        let (ll, size) = FseDTable::read(dict.get(ip..).unwrap_or_default(), MAX_LL, LL_FSE_LOG)
            .map_err(|_| corrupted("bad literal lengths table"))?;
        ip += size;
        if ip + 4 * REP_NUM > dict.len() {
            return Err(corrupted("truncated repeat offsets"));
        }
        let mut reps = Repcodes::default();
        for (i, rep) in reps.rep.iter_mut().enumerate() {
            *rep = read_le32(dict, ip + 4 * i);
        }
        ip += 4 * REP_NUM;
        let content = dict[ip..].to_vec();
        if reps.rep.iter().any(|&r| r == 0 || r as usize > content.len()) {
            return Err(corrupted("repeat offset out of range"));
        }
        Ok(Self {
            content,
            dict_id,
            huf: Some(huf),
            seq: SeqDecodeTables {
                ll: Some(ll),
                of: Some(of),
                ml: Some(ml),
            },
            reps,
        })
    }
}

/// Zstandard decoder.
#[derive(Debug, Default)]
pub struct ZstdDecoder {
    format: Format,
    dict: Option<DecoderDict>,
    /// Dictionary content followed by the frame's output.
    history: Vec<u8>,
    huf: HufDTable,
    seq: SeqDecodeTables,
    reps: Repcodes,
    literals: Vec<u8>,
}

impl ZstdDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder for frames compressed with `dict`, raw content or a
    /// dictionary in the Zstandard format.
    pub fn with_dictionary(dict: &[u8]) -> Result<Self> {
        Ok(Self {
            dict: Some(DecoderDict::parse(dict)?),
            ..Self::default()
        })
    }

    /// Select the frame format.
    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Decode every frame in `data`, skipping skippable frames.
    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let rest = &data[pos..];
            if self.format == Format::Zstd1 && is_skippable(rest) {
                if rest.len() < SKIPPABLE_HEADER_SIZE {
                    return Err(ZstdError::corrupted(pos as u64, "truncated skippable frame"));
                }
                let size = SKIPPABLE_HEADER_SIZE + read_le32(rest, 4) as usize;
                if rest.len() < size {
                    return Err(ZstdError::corrupted(pos as u64, "truncated skippable frame"));
                }
                pos += size;
                continue;
            }
            pos += self.decode_frame(rest, &mut out)?;
        }
        Ok(out)
    }

    /// Decode one frame from the start of `data`, appending its content to
    /// `out`. Returns the frame's compressed size.
    pub fn decode_frame(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        let header = parse_frame_header(data, self.format)?;
        self.begin_frame(&header)?;
        let prefix = self.history.len();
        let block_size_max = (header.window_size.min(BLOCKSIZE_MAX as u64) as usize).max(1);
        if let Some(size) = header.content_size {
            self.history.reserve(size.min(1 << 30) as usize);
        }

        let mut pos = header.header_size;
        loop {
            if data.len() < pos + 3 {
                return Err(ZstdError::corrupted(pos as u64, "truncated block header"));
            }
            let block_header = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], 0]);
            pos += 3;
            let last_block = block_header & 1 != 0;
            let block_type = BlockType::from_bits(((block_header >> 1) & 0x03) as u8)?;
            let block_size = (block_header >> 3) as usize;
            if block_size > block_size_max {
                return Err(ZstdError::corrupted(pos as u64, format!("block size {block_size} exceeds maximum")));
            }
            let stored = if block_type == BlockType::Rle { 1 } else { block_size };
            if data.len() < pos + stored {
                return Err(ZstdError::corrupted(pos as u64, "truncated block data"));
            }
            let block = &data[pos..pos + stored];
            trace!(?block_type, block_size, last_block, "decoding block");
            match block_type {
                BlockType::Raw => self.history.extend_from_slice(block),
                BlockType::Rle => self.history.extend(std::iter::repeat_n(block[0], block_size)),
                BlockType::Compressed => {
                    self.decode_compressed_block(block, prefix, header.window_size, block_size_max)?
                }
                BlockType::Reserved => return Err(ZstdError::corrupted(pos as u64, "reserved block type")),
            }
            pos += stored;
            if last_block {
                break;
            }
        }

        let content = &self.history[prefix..];
        if let Some(expected) = header.content_size {
            if content.len() as u64 != expected {
                return Err(ZstdError::corrupted(
                    pos as u64,
                    format!("content size mismatch: expected {expected}, got {}", content.len()),
                ));
            }
        }
        if header.has_checksum {
            if data.len() < pos + CHECKSUM_SIZE {
                return Err(ZstdError::corrupted(pos as u64, "missing content checksum"));
            }
            let expected = read_le32(data, pos);
            let mut hasher = FrameChecksum::new();
            hasher.update(content);
            let computed = hasher.digest();
            if expected != computed {
                return Err(ZstdError::checksum_wrong(expected, computed));
            }
            pos += CHECKSUM_SIZE;
        }
        out.extend_from_slice(content);
        Ok(pos)
    }

    /// Load the dictionary state, or fresh state, for a new frame.
    fn begin_frame(&mut self, header: &FrameHeader) -> Result<()> {
        self.history.clear();
        self.huf = HufDTable::default();
        self.seq = SeqDecodeTables::default();
        self.reps = Repcodes::default();
        match &self.dict {
            Some(dict) => {
                if header.dict_id != 0 && dict.dict_id != 0 && header.dict_id != dict.dict_id {
                    return Err(ZstdError::dictionary_wrong(format!(
                        "frame needs dictionary {}, got {}",
                        header.dict_id, dict.dict_id
                    )));
                }
                self.history.extend_from_slice(&dict.content);
                if let Some(huf) = &dict.huf {
                    self.huf = huf.clone();
                    self.seq = dict.seq.clone();
                    self.reps = dict.reps;
                }
            }
            None if header.dict_id != 0 => {
                return Err(ZstdError::dictionary_wrong(format!(
                    "frame needs dictionary {}",
                    header.dict_id
                )));
            }
            None => {}
        }
        Ok(())
    }

    fn decode_compressed_block(
        &mut self,
        block: &[u8],
        prefix: usize,
        window_size: u64,
        block_size_max: usize,
    ) -> Result<()> {
        let mut literals = std::mem::take(&mut self.literals);
        let consumed = decode_literals(block, &mut self.huf, &mut literals)?;
        let sequences = decode_sequences(&block[consumed..], &mut self.seq, &mut self.reps)?;
        let before = self.history.len();
        let result = self.execute_sequences(&literals, &sequences, prefix, window_size);
        self.literals = literals;
        result?;
        if self.history.len() - before > block_size_max {
            return Err(ZstdError::corrupted(before as u64, "block regenerates too much"));
        }
        debug_assert!(self.history.len() >= prefix);
        Ok(())
    }

    /// Execute sequences, appending to the history.
    ///
    /// The first `dict_len` history bytes are dictionary content. A match
    /// may reach back over the frame's own output, up to the window size,
    /// and then into the dictionary.
    fn execute_sequences(
        &mut self,
        literals: &[u8],
        sequences: &[Sequence],
        dict_len: usize,
        window_size: u64,
    ) -> Result<()> {
        let mut lit_pos = 0;
        for seq in sequences {
            let lit_length = seq.lit_length as usize;
            if lit_pos + lit_length > literals.len() {
                return Err(ZstdError::corrupted(0, "literal length exceeds available literals"));
            }
            self.history.extend_from_slice(&literals[lit_pos..lit_pos + lit_length]);
            lit_pos += lit_length;

            let offset = seq.offset as usize;
            let produced = self.history.len() - dict_len;
            let reach = (produced as u64).min(window_size) as usize + dict_len;
            if offset == 0 || offset > reach {
                return Err(ZstdError::corrupted(
                    produced as u64,
                    format!("invalid offset {offset} (reach {reach}, window {window_size})"),
                ));
            }
            let start = self.history.len() - offset;
            // Overlapping copies repeat the last `offset` bytes.
            for i in 0..seq.match_length as usize {
                let byte = self.history[start + i];
                self.history.push(byte);
            }
        }
        self.history.extend_from_slice(&literals[lit_pos..]);
        Ok(())
    }
}

/// Decompress every frame in `data`.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    ZstdDecoder::new().decompress(data)
}

/// Decompress frames compressed with `dict`.
pub fn decompress_with_dict(data: &[u8], dict: &[u8]) -> Result<Vec<u8>> {
    ZstdDecoder::with_dictionary(dict)?.decompress(data)
}

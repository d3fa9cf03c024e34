//! Per-block store of literals and sequences awaiting entropy coding.
//!
//! The store is a set of views over arena buffers. Lengths are kept in
//! 16 bits; at most one sequence per block may carry a literal or match
//! length beyond `u16::MAX`, recorded in [`LongLength`].

use crate::hash::highbit32;
use crate::sequences::{ll_code, ml_code, MAX_LL, MAX_ML};

/// Shortest match the format can express.
pub const MINMATCH: u32 = 3;

/// Number of repeat offsets.
pub const REP_NUM: usize = 3;

/// Repeat offsets at the start of a frame.
pub const REP_START: [u32; REP_NUM] = [1, 4, 8];

/// Encoded offset of a real distance.
#[inline]
pub const fn offset_to_off_base(offset: u32) -> u32 {
    offset + REP_NUM as u32
}

/// Encoded offset of repeat code `rep` (1..=3).
#[inline]
pub const fn repcode_to_off_base(rep: u32) -> u32 {
    rep
}

/// Whether an encoded offset is a repeat code.
#[inline]
pub const fn off_base_is_repcode(off_base: u32) -> bool {
    off_base <= REP_NUM as u32
}

/// The three most recent offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repcodes {
    /// Most recent first.
    pub rep: [u32; REP_NUM],
}

impl Default for Repcodes {
    fn default() -> Self {
        Self { rep: REP_START }
    }
}

impl Repcodes {
    /// Distance designated by `off_base` against the current history.
    pub fn resolve(&self, off_base: u32, ll0: bool) -> u32 {
        if !off_base_is_repcode(off_base) {
            return off_base - REP_NUM as u32;
        }
        let adjusted = off_base - 1 + ll0 as u32;
        if adjusted == REP_NUM as u32 {
            self.rep[0].wrapping_sub(1)
        } else {
            self.rep[adjusted as usize]
        }
    }

    /// Record a sequence with encoded offset `off_base`.
    pub fn update(&mut self, off_base: u32, ll0: bool) {
        if !off_base_is_repcode(off_base) {
            self.rep = [off_base - REP_NUM as u32, self.rep[0], self.rep[1]];
            return;
        }
        let rep_code = off_base - 1 + ll0 as u32;
        if rep_code == 0 {
            return;
        }
        let current = if rep_code == REP_NUM as u32 {
            self.rep[0].wrapping_sub(1)
        } else {
            self.rep[rep_code as usize]
        };
        if rep_code >= 2 {
            self.rep[2] = self.rep[1];
        }
        self.rep[1] = self.rep[0];
        self.rep[0] = current;
    }
}

/// Sequence whose length exceeds 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LongLength {
    /// No long length in this block.
    #[default]
    None,
    /// Literal length of the sequence at this index.
    Literal(usize),
    /// Match length of the sequence at this index.
    Match(usize),
}

/// One sequence with full lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqDef {
    /// Encoded offset.
    pub off_base: u32,
    /// Literals before the match.
    pub lit_length: u32,
    /// Match length.
    pub match_length: u32,
}

/// Sequences and literals of the block being compressed.
#[derive(Debug)]
pub struct SeqStore<'a> {
    lits: &'a mut [u8],
    nb_lits: usize,
    off_bases: &'a mut [u32],
    lit_lengths: &'a mut [u16],
    ml_bases: &'a mut [u16],
    nb_seq: usize,
    ll_codes: &'a mut [u8],
    of_codes: &'a mut [u8],
    ml_codes: &'a mut [u8],
    long_length: LongLength,
}

impl<'a> SeqStore<'a> {
    /// Wrap arena buffers. Sequence arrays share one capacity.
    pub fn new(
        lits: &'a mut [u8],
        off_bases: &'a mut [u32],
        lit_lengths: &'a mut [u16],
        ml_bases: &'a mut [u16],
        ll_codes: &'a mut [u8],
        of_codes: &'a mut [u8],
        ml_codes: &'a mut [u8],
    ) -> Self {
        Self {
            lits,
            nb_lits: 0,
            off_bases,
            lit_lengths,
            ml_bases,
            nb_seq: 0,
            ll_codes,
            of_codes,
            ml_codes,
            long_length: LongLength::None,
        }
    }

    /// Maximum number of sequences.
    pub fn capacity(&self) -> usize {
        self.off_bases
            .len()
            .min(self.lit_lengths.len())
            .min(self.ml_bases.len())
            .min(self.ll_codes.len())
    }

    /// Rewind for a new block.
    pub fn reset(&mut self) {
        self.nb_lits = 0;
        self.nb_seq = 0;
        self.long_length = LongLength::None;
    }

    /// Number of stored sequences.
    pub fn nb_seq(&self) -> usize {
        self.nb_seq
    }

    /// Stored literal bytes.
    pub fn literals(&self) -> &[u8] {
        &self.lits[..self.nb_lits]
    }

    /// Append a sequence: `literals` then a match of `match_length` bytes.
    #[inline]
    pub fn store_seq(&mut self, literals: &[u8], off_base: u32, match_length: usize) {
        debug_assert!(self.nb_seq < self.capacity());
        debug_assert!(match_length >= MINMATCH as usize);
        let n = self.nb_seq;
        self.lits[self.nb_lits..self.nb_lits + literals.len()].copy_from_slice(literals);
        self.nb_lits += literals.len();
        if literals.len() > u16::MAX as usize {
            self.long_length = LongLength::Literal(n);
        }
        self.lit_lengths[n] = literals.len() as u16;
        self.off_bases[n] = off_base;
        let ml_base = match_length - MINMATCH as usize;
        if ml_base > u16::MAX as usize {
            self.long_length = LongLength::Match(n);
        }
        self.ml_bases[n] = ml_base as u16;
        self.nb_seq += 1;
    }

    /// Append the trailing literals of a block.
    pub fn store_last_literals(&mut self, literals: &[u8]) {
        self.lits[self.nb_lits..self.nb_lits + literals.len()].copy_from_slice(literals);
        self.nb_lits += literals.len();
    }

    /// Sequence `i` with full lengths.
    pub fn seq(&self, i: usize) -> SeqDef {
        let mut lit_length = self.lit_lengths[i] as u32;
        let mut match_length = self.ml_bases[i] as u32 + MINMATCH;
        match self.long_length {
            LongLength::Literal(p) if p == i => lit_length += 0x10000,
            LongLength::Match(p) if p == i => match_length += 0x10000,
            _ => {}
        }
        SeqDef {
            off_base: self.off_bases[i],
            lit_length,
            match_length,
        }
    }

    /// Derive symbol codes of every sequence. Returns whether some offset
    /// needs more bits than one bitstream flush can hold.
    pub fn compute_codes(&mut self) -> bool {
        self.compute_codes_range(0..self.nb_seq)
    }

    /// Recompute symbol codes of sequences `seqs` only.
    pub fn compute_codes_range(&mut self, seqs: std::ops::Range<usize>) -> bool {
        let mut long_offsets = false;
        for i in seqs.clone() {
            let ll = self.lit_lengths[i] as u32;
            let ml = self.ml_bases[i] as u32;
            self.ll_codes[i] = ll_code(ll);
            self.of_codes[i] = highbit32(self.off_bases[i]) as u8;
            self.ml_codes[i] = ml_code(ml);
            long_offsets |= self.of_codes[i] > 56;
        }
        match self.long_length {
            LongLength::Literal(p) if seqs.contains(&p) => self.ll_codes[p] = MAX_LL as u8,
            LongLength::Match(p) if seqs.contains(&p) => self.ml_codes[p] = MAX_ML as u8,
            _ => {}
        }
        long_offsets
    }

    /// View of sequences `seqs` and their literals (`lit_range`).
    pub fn section(&self, seqs: std::ops::Range<usize>, lit_range: std::ops::Range<usize>) -> SeqSection<'_> {
        let long_length = match self.long_length {
            LongLength::Literal(p) if seqs.contains(&p) => LongLength::Literal(p - seqs.start),
            LongLength::Match(p) if seqs.contains(&p) => LongLength::Match(p - seqs.start),
            _ => LongLength::None,
        };
        SeqSection {
            lits: &self.lits[lit_range],
            off_bases: &self.off_bases[seqs.clone()],
            lit_lengths: &self.lit_lengths[seqs.clone()],
            ml_bases: &self.ml_bases[seqs.clone()],
            ll_codes: &self.ll_codes[seqs.clone()],
            of_codes: &self.of_codes[seqs.clone()],
            ml_codes: &self.ml_codes[seqs],
            long_length,
        }
    }

    /// View of the whole block.
    pub fn full_section(&self) -> SeqSection<'_> {
        self.section(0..self.nb_seq, 0..self.nb_lits)
    }

    /// Rewrite repeat codes of `seqs` that the decoder would resolve
    /// differently from the parser.
    ///
    /// `decoder` is the history the decoder will hold, `parser` the one the
    /// parser assumed. Both advance over the range.
    pub fn resolve_off_codes(
        &mut self,
        seqs: std::ops::Range<usize>,
        decoder: &mut Repcodes,
        parser: &mut Repcodes,
    ) {
        let long_lit = match self.long_length {
            LongLength::Literal(p) => Some(p),
            _ => None,
        };
        for i in seqs {
            let ll0 = self.lit_lengths[i] == 0 && long_lit != Some(i);
            let off_base = self.off_bases[i];
            if off_base_is_repcode(off_base) {
                let d_raw = decoder.resolve(off_base, ll0);
                let c_raw = parser.resolve(off_base, ll0);
                if d_raw != c_raw {
                    self.off_bases[i] = offset_to_off_base(c_raw);
                }
            }
            decoder.update(self.off_bases[i], ll0);
            parser.update(off_base, ll0);
        }
    }
}

/// Read-only view over a contiguous run of sequences.
#[derive(Debug, Clone, Copy)]
pub struct SeqSection<'a> {
    /// Literals of the run.
    pub lits: &'a [u8],
    /// Encoded offsets.
    pub off_bases: &'a [u32],
    /// Literal lengths (low 16 bits).
    pub lit_lengths: &'a [u16],
    /// Match lengths minus [`MINMATCH`] (low 16 bits).
    pub ml_bases: &'a [u16],
    /// Literal length codes.
    pub ll_codes: &'a [u8],
    /// Offset codes.
    pub of_codes: &'a [u8],
    /// Match length codes.
    pub ml_codes: &'a [u8],
    /// Long length relative to the run.
    pub long_length: LongLength,
}

impl SeqSection<'_> {
    /// Number of sequences.
    pub fn nb_seq(&self) -> usize {
        self.off_bases.len()
    }

    /// Bytes regenerated by the sequences (literals included).
    pub fn regenerated_size(&self) -> usize {
        let mut total = 0usize;
        for i in 0..self.nb_seq() {
            total += self.lit_lengths[i] as usize + self.ml_bases[i] as usize + MINMATCH as usize;
        }
        match self.long_length {
            LongLength::None => {}
            _ => total += 0x10000,
        }
        total
    }

    /// Literal bytes consumed by the sequences.
    pub fn literal_size(&self) -> usize {
        let mut total: usize = self.lit_lengths.iter().map(|&l| l as usize).sum();
        if let LongLength::Literal(_) = self.long_length {
            total += 0x10000;
        }
        total
    }
}

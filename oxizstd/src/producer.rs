//! Externally produced sequences.
//!
//! Sequences come either from a [`SequenceProducer`] registered on a
//! context, one block at a time, or from a caller handing a whole frame's
//! worth to [`CCtx::compress_sequences`](crate::CCtx::compress_sequences).
//! Both paths end in [`transfer_sequences`], which checks each triple and
//! turns raw offsets into repeat codes where possible.

use oxizstd_core::{Result, ZstdError};

use crate::seq_store::{MINMATCH, REP_NUM, Repcodes, SeqStore, offset_to_off_base};
use crate::sequences::Sequence;

/// Source of sequences replacing the built-in match finders.
///
/// Long-distance matchers and other external parsers plug in here.
pub trait SequenceProducer {
    /// Parse one block `src` into `out`.
    ///
    /// Offsets may not reach before the start of `src`. Bytes not covered
    /// by a sequence are trailing literals; a sequence with
    /// `match_length == 0` carries literals only. `window_size` is the
    /// frame's window, for producers that cap their own distances.
    fn produce_sequences(&mut self, src: &[u8], window_size: usize, out: &mut Vec<Sequence>) -> Result<()>;
}

/// Limits checked while storing sequences.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SequenceBounds {
    /// Shortest accepted match.
    pub min_match: u32,
    /// Window size of the frame.
    pub window_size: usize,
    /// Dictionary bytes in reach before the frame's first byte.
    pub dict_size: usize,
    /// Frame position of the block's first byte.
    pub block_pos: usize,
    /// Check offsets against the window and matches against `min_match`.
    pub validate: bool,
}

/// Encoded offset of a raw `offset`, using a repeat code when it equals
/// one of the recent offsets.
pub(crate) fn finalize_off_base(offset: u32, rep: &[u32; REP_NUM], ll0: bool) -> u32 {
    if !ll0 && offset == rep[0] {
        1
    } else if offset == rep[1] {
        2 - ll0 as u32
    } else if offset == rep[2] {
        3 - ll0 as u32
    } else if ll0 && offset == rep[0].wrapping_sub(1) {
        3
    } else {
        offset_to_off_base(offset)
    }
}

fn invalid(message: impl Into<String>) -> ZstdError {
    ZstdError::corrupted(0, message)
}

/// Store `seqs`, which cover a prefix of `src` (one block), followed by
/// the remaining bytes as trailing literals.
pub(crate) fn transfer_sequences(
    store: &mut SeqStore<'_>,
    seqs: &[Sequence],
    src: &[u8],
    reps: &mut Repcodes,
    bounds: &SequenceBounds,
) -> Result<()> {
    let mut pos = 0usize;
    let mut lit_start = 0usize;
    for seq in seqs {
        let lit_length = seq.lit_length as usize;
        let match_length = seq.match_length as usize;
        if pos + lit_length + match_length > src.len() {
            return Err(invalid("sequences cover more than the source"));
        }
        pos += lit_length;
        if match_length == 0 {
            continue;
        }
        if seq.offset == 0 {
            return Err(invalid("zero offset"));
        }
        if match_length < MINMATCH as usize || (bounds.validate && seq.match_length < bounds.min_match) {
            return Err(invalid(format!("match length {match_length} too short")));
        }
        if bounds.validate {
            let frame_pos = bounds.block_pos + pos;
            let reach = if frame_pos > bounds.window_size {
                bounds.window_size
            } else {
                frame_pos + bounds.dict_size
            };
            if seq.offset as usize > reach {
                return Err(invalid(format!("offset {} beyond reach {reach}", seq.offset)));
            }
        }
        if store.nb_seq() >= store.capacity() {
            return Err(invalid("too many sequences for one block"));
        }
        let ll0 = pos == lit_start;
        let off_base = finalize_off_base(seq.offset, &reps.rep, ll0);
        reps.update(off_base, ll0);
        store.store_seq(&src[lit_start..pos], off_base, match_length);
        pos += match_length;
        lit_start = pos;
    }
    store.store_last_literals(&src[lit_start..]);
    Ok(())
}

/// Cuts a frame's sequences into blocks.
///
/// A match crossing a block boundary is split in two when both pieces
/// stay at least `min_match` long; otherwise the block ends before it.
#[derive(Debug)]
pub(crate) struct BlockSplitter<'s> {
    seqs: &'s [Sequence],
    next: usize,
    /// Part of `seqs[next]` not yet handed out.
    pending: Option<Sequence>,
    min_match: u32,
}

impl<'s> BlockSplitter<'s> {
    pub fn new(seqs: &'s [Sequence], min_match: u32) -> Self {
        Self {
            seqs,
            next: 0,
            pending: None,
            min_match: min_match.max(MINMATCH),
        }
    }

    fn peek(&self) -> Option<Sequence> {
        self.pending.or_else(|| self.seqs.get(self.next).copied())
    }

    /// Drop the current sequence.
    fn take(&mut self) {
        if self.pending.take().is_none() {
            self.next += 1;
        }
    }

    /// Replace the current sequence by what is left of it.
    fn replace(&mut self, rest: Sequence) {
        if self.pending.is_none() {
            self.next += 1;
        }
        self.pending = Some(rest);
    }

    /// Fill `out` with sequences of the next block of at most `budget`
    /// bytes. Returns the block's length, trailing literals included.
    pub fn next_block(&mut self, budget: usize, remaining_src: usize, out: &mut Vec<Sequence>) -> usize {
        out.clear();
        let budget = budget.min(remaining_src);
        let mut used = 0usize;
        while let Some(seq) = self.peek() {
            let lit = seq.lit_length as usize;
            let ml = seq.match_length as usize;
            let room = budget - used;
            if lit + ml <= room {
                out.push(seq);
                used += lit + ml;
                self.take();
                continue;
            }
            if lit >= room {
                // The block ends inside the literals.
                self.replace(Sequence {
                    lit_length: (lit - room) as u32,
                    ..seq
                });
                return budget;
            }
            let min = self.min_match as usize;
            let mut first = room - lit;
            if ml - first < min {
                first = ml.saturating_sub(min);
            }
            if first >= min {
                out.push(Sequence {
                    match_length: first as u32,
                    ..seq
                });
                self.replace(Sequence {
                    lit_length: 0,
                    match_length: (ml - first) as u32,
                    offset: seq.offset,
                });
                return used + lit + first;
            }
            // End the block on the literals; the match opens the next one.
            self.replace(Sequence {
                lit_length: 0,
                ..seq
            });
            return used + lit;
        }
        budget
    }

    /// Whether every sequence was handed out.
    pub fn is_done(&self) -> bool {
        self.pending.is_none() && self.next >= self.seqs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq_store::REP_START;
    use oxizstd_core::ErrorCode;

    fn seq(lit_length: u32, match_length: u32, offset: u32) -> Sequence {
        Sequence {
            lit_length,
            match_length,
            offset,
        }
    }

    struct Buffers {
        lits: Vec<u8>,
        off: Vec<u32>,
        ll: Vec<u16>,
        ml: Vec<u16>,
        codes: [Vec<u8>; 3],
    }

    impl Buffers {
        fn new(n: usize) -> Self {
            Self {
                lits: vec![0; n],
                off: vec![0; n],
                ll: vec![0; n],
                ml: vec![0; n],
                codes: [vec![0; n], vec![0; n], vec![0; n]],
            }
        }

        fn store(&mut self) -> SeqStore<'_> {
            let [a, b, c] = &mut self.codes;
            SeqStore::new(&mut self.lits, &mut self.off, &mut self.ll, &mut self.ml, a, b, c)
        }
    }

    fn bounds(validate: bool) -> SequenceBounds {
        SequenceBounds {
            min_match: 4,
            window_size: 1 << 10,
            dict_size: 0,
            block_pos: 0,
            validate,
        }
    }

    #[test]
    fn test_finalize_off_base() {
        let rep = REP_START;
        assert_eq!(finalize_off_base(1, &rep, false), 1);
        assert_eq!(finalize_off_base(4, &rep, false), 2);
        assert_eq!(finalize_off_base(8, &rep, false), 3);
        // With no literals, rep0 is not a candidate and codes shift.
        assert_eq!(finalize_off_base(1, &rep, true), offset_to_off_base(1));
        assert_eq!(finalize_off_base(4, &rep, true), 1);
        assert_eq!(finalize_off_base(8, &rep, true), 2);
        assert_eq!(finalize_off_base(100, &[101, 4, 8], true), 3);
        assert_eq!(finalize_off_base(77, &rep, false), offset_to_off_base(77));
    }

    #[test]
    fn test_transfer_stores_literals_and_repeats() {
        let src = b"abcdefabcdefXYZabcdefabcdef!".to_vec();
        let mut buffers = Buffers::new(64);
        let mut store = buffers.store();
        let mut reps = Repcodes::default();
        let seqs = [seq(6, 6, 6), seq(3, 12, 15)];
        transfer_sequences(&mut store, &seqs, &src, &mut reps, &bounds(true)).unwrap();
        assert_eq!(store.nb_seq(), 2);
        assert_eq!(store.literals(), b"abcdefXYZ!");
        assert_eq!(store.seq(0).off_base, offset_to_off_base(6));
        assert_eq!(store.seq(1).match_length, 12);
        assert_eq!(reps.rep, [15, 6, 1]);
    }

    #[test]
    fn test_literal_only_sequences_merge() {
        let src = b"0123456789012345".to_vec();
        let mut buffers = Buffers::new(32);
        let mut store = buffers.store();
        let mut reps = Repcodes::default();
        let seqs = [seq(4, 0, 0), seq(6, 6, 10)];
        transfer_sequences(&mut store, &seqs, &src, &mut reps, &bounds(true)).unwrap();
        assert_eq!(store.nb_seq(), 1);
        assert_eq!(store.seq(0).lit_length, 10);
    }

    #[test]
    fn test_invalid_sequences_rejected() {
        let src = vec![7u8; 100];
        let cases = [
            (vec![seq(10, 5, 0)], true),
            (vec![seq(10, 2, 1)], false),
            (vec![seq(10, 3, 1)], true),
            (vec![seq(10, 8, 11)], true),
            (vec![seq(90, 20, 1)], false),
        ];
        for (seqs, validate) in cases {
            let mut buffers = Buffers::new(128);
            let mut store = buffers.store();
            let mut reps = Repcodes::default();
            let err = transfer_sequences(&mut store, &seqs, &src, &mut reps, &bounds(validate)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::CorruptionDetected, "{seqs:?}");
        }

        // Without validation, distances are the caller's business.
        let mut buffers = Buffers::new(128);
        let mut store = buffers.store();
        let mut reps = Repcodes::default();
        transfer_sequences(&mut store, &[seq(10, 8, 11)], &src, &mut reps, &bounds(false)).unwrap();
    }

    #[test]
    fn test_offsets_may_reach_into_dictionary() {
        let src = vec![1u8; 64];
        let mut buffers = Buffers::new(128);
        let mut store = buffers.store();
        let mut reps = Repcodes::default();
        let b = SequenceBounds {
            dict_size: 100,
            ..bounds(true)
        };
        transfer_sequences(&mut store, &[seq(2, 10, 90)], &src, &mut reps, &b).unwrap();
    }

    #[test]
    fn test_splitter_cuts_matches_at_boundaries() {
        let seqs = [seq(10, 100, 5), seq(0, 4, 5)];
        let mut splitter = BlockSplitter::new(&seqs, 3);
        let mut out = Vec::new();
        let total = 10 + 100 + 4 + 6;

        let n = splitter.next_block(64, total, &mut out);
        assert_eq!(n, 64);
        assert_eq!(out, vec![seq(10, 54, 5)]);

        // The remaining source after the last match is trailing literals.
        let n = splitter.next_block(64, total - 64, &mut out);
        assert_eq!(out, vec![seq(0, 46, 5), seq(0, 4, 5)]);
        assert_eq!(n, 56);
        assert!(splitter.is_done());
    }

    #[test]
    fn test_splitter_keeps_pieces_long_enough() {
        // Only 2 bytes of the match fit: the block ends before it.
        let seqs = [seq(30, 20, 7)];
        let mut splitter = BlockSplitter::new(&seqs, 4);
        let mut out = Vec::new();
        assert_eq!(splitter.next_block(32, 50, &mut out), 30);
        assert!(out.is_empty());
        assert_eq!(splitter.next_block(32, 20, &mut out), 20);
        assert_eq!(out, vec![seq(0, 20, 7)]);

        // A tail shorter than min_match would be left: cut earlier.
        let seqs = [seq(0, 34, 7)];
        let mut splitter = BlockSplitter::new(&seqs, 4);
        assert_eq!(splitter.next_block(32, 34, &mut out), 30);
        assert_eq!(out, vec![seq(0, 30, 7)]);
        assert_eq!(splitter.next_block(32, 4, &mut out), 4);
        assert_eq!(out, vec![seq(0, 4, 7)]);
    }

    #[test]
    fn test_splitter_splits_long_literal_runs() {
        let seqs = [seq(100, 10, 3)];
        let mut splitter = BlockSplitter::new(&seqs, 3);
        let mut out = Vec::new();
        assert_eq!(splitter.next_block(64, 110, &mut out), 64);
        assert!(out.is_empty());
        assert_eq!(splitter.next_block(64, 46, &mut out), 46);
        assert_eq!(out, vec![seq(36, 10, 3)]);
    }
}

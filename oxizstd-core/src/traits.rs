//! Streaming buffer types and the streaming compressor trait.
//!
//! A streaming call consumes from an [`InBuffer`] and produces into an
//! [`OutBuffer`], advancing their `pos` cursors. Progress is driven entirely
//! by the caller: every call returns after doing as much as the buffers
//! allow, together with a hint of how much output is still pending.

use crate::error::Result;

/// Input buffer with a read cursor.
#[derive(Debug)]
pub struct InBuffer<'a> {
    /// Source bytes.
    pub src: &'a [u8],
    /// Number of bytes already consumed.
    pub pos: usize,
}

impl<'a> InBuffer<'a> {
    /// Wrap a source slice with the cursor at its start.
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.src[self.pos..]
    }

    /// Whether all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }
}

/// Output buffer with a write cursor.
#[derive(Debug)]
pub struct OutBuffer<'a> {
    /// Destination bytes.
    pub dst: &'a mut [u8],
    /// Number of bytes already written.
    pub pos: usize,
}

impl<'a> OutBuffer<'a> {
    /// Wrap a destination slice with the cursor at its start.
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self { dst, pos: 0 }
    }

    /// Free capacity left after the cursor.
    pub fn capacity_left(&self) -> usize {
        self.dst.len() - self.pos
    }

    /// Bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.dst[..self.pos]
    }

    /// Copy as much of `bytes` as fits; returns how many were copied.
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.capacity_left());
        self.dst[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        self.pos += n;
        n
    }
}

/// What the caller wants the stream to do with buffered data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndDirective {
    /// Buffer input; emit blocks only when full.
    #[default]
    Continue,
    /// Emit everything received so far without closing the frame.
    Flush,
    /// Emit everything and close the frame.
    End,
}

/// A streaming compressor.
pub trait StreamCompressor {
    /// Compress from `input` into `output` under `directive`.
    ///
    /// Returns a lower bound of bytes still waiting to be flushed; `0` with
    /// [`EndDirective::End`] means the frame is complete.
    fn compress_stream(
        &mut self,
        output: &mut OutBuffer<'_>,
        input: &mut InBuffer<'_>,
        directive: EndDirective,
    ) -> Result<usize>;

    /// Compress a whole buffer by driving [`Self::compress_stream`] with a
    /// small bounce buffer.
    fn compress_all(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut compressed = Vec::with_capacity(data.len() / 2 + 64);
        let mut chunk = vec![0u8; 1 << 16];
        let mut input = InBuffer::new(data);

        loop {
            let mut output = OutBuffer::new(&mut chunk);
            let remaining = self.compress_stream(&mut output, &mut input, EndDirective::End)?;
            compressed.extend_from_slice(output.written());
            if remaining == 0 {
                break;
            }
        }

        Ok(compressed)
    }
}

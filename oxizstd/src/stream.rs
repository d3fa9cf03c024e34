//! Streaming compression.
//!
//! Input is gathered into the context's history buffer one block at a
//! time. A block is compressed only once it is full and more input is
//! known to follow (or a flush or end is requested), so that the block
//! boundaries, and therefore the output bytes, do not depend on how the
//! caller slices its input. Compressed blocks are staged inside the
//! workspace and drained into the caller's buffer as room allows.
//!
//! A caller that declares its output buffer stable gets blocks written
//! into it directly, with no staging. Buffers declared stable are checked
//! on every call of the frame: the cursor must come back where the
//! previous call left it.

use oxizstd_core::{EndDirective, InBuffer, OutBuffer, StreamCompressor};
use tracing::{debug, trace};

use crate::cctx::{CCtx, StreamStage};
use crate::{Result, ZstdError};

impl StreamCompressor for CCtx<'_> {
    fn compress_stream(
        &mut self,
        output: &mut OutBuffer<'_>,
        input: &mut InBuffer<'_>,
        directive: EndDirective,
    ) -> Result<usize> {
        if self.errored {
            return Err(ZstdError::init_missing(
                "an earlier error ended the frame; reset the session first",
            ));
        }
        let result = self
            .check_buffer_stability(output, input)
            .and_then(|()| self.drive(output, input, directive));
        match &result {
            Ok(_) => self.set_buffer_expectations(output, input),
            Err(e) => {
                debug!(error = %e, "stream stopped");
                self.errored = true;
            }
        }
        result
    }
}

fn cursor_in(input: &InBuffer<'_>) -> usize {
    input.src.as_ptr() as usize + input.pos
}

fn cursor_out(output: &OutBuffer<'_>) -> (usize, usize) {
    (output.dst.as_ptr() as usize + output.pos, output.capacity_left())
}

impl CCtx<'_> {
    /// Reject stable buffers that moved since the previous call.
    fn check_buffer_stability(&self, output: &OutBuffer<'_>, input: &InBuffer<'_>) -> Result<()> {
        if self.stream_stage == StreamStage::Init {
            return Ok(());
        }
        if self.expected_in.is_some_and(|at| at != cursor_in(input)) {
            return Err(ZstdError::stability_not_respected("stable input buffer changed"));
        }
        if self.expected_out.is_some_and(|at| at != cursor_out(output)) {
            return Err(ZstdError::stability_not_respected("stable output buffer changed"));
        }
        Ok(())
    }

    fn set_buffer_expectations(&mut self, output: &OutBuffer<'_>, input: &InBuffer<'_>) {
        if self.stream_stage == StreamStage::Init {
            return;
        }
        self.expected_in = self.stable_input().then(|| cursor_in(input));
        self.expected_out = self.stable_output().then(|| cursor_out(output));
    }

    fn drive(
        &mut self,
        output: &mut OutBuffer<'_>,
        input: &mut InBuffer<'_>,
        directive: EndDirective,
    ) -> Result<usize> {
        if self.stream_stage == StreamStage::Init {
            let end_size = (directive == EndDirective::End).then(|| input.remaining().len());
            self.begin_frame(end_size)?;
            self.stream_stage = StreamStage::Load;
            debug!(?directive, "stream started");
        }

        loop {
            match self.stream_stage {
                StreamStage::Init => return Ok(0),
                StreamStage::Load => {
                    if directive == EndDirective::End && self.buffered() == 0 {
                        let src = input.remaining();
                        if Self::fits_direct(output.capacity_left(), src.len()) {
                            let written = self.compress_end_direct(&mut output.dst[output.pos..], src)?;
                            output.pos += written;
                            input.pos = input.src.len();
                            self.end_session();
                            debug!(written, "stream ended without staging");
                            return Ok(0);
                        }
                    }

                    input.pos += self.buffer_input(input.remaining())?;
                    let full = self.buffered() == self.block_size();
                    match directive {
                        EndDirective::Continue if !full || input.is_empty() => break,
                        EndDirective::Flush if self.buffered() == 0 => break,
                        _ => {}
                    }
                    let last = directive == EndDirective::End && input.is_empty();
                    if self.stable_output() {
                        let written = self.compress_in_place(&mut output.dst[output.pos..], last)?;
                        output.pos += written;
                        trace!(written, "wrote block in place");
                        if self.frame_ended {
                            self.end_session();
                            debug!("stream ended");
                            return Ok(0);
                        }
                        continue;
                    }
                    self.compress_staged(last)?;
                    self.stream_stage = StreamStage::Flush;
                }
                StreamStage::Flush => {
                    let staged = self.staged();
                    let pushed = output.push_slice(staged);
                    let left = staged.len() - pushed;
                    self.consume_staged(pushed);
                    if left > 0 {
                        trace!(left, "output full");
                        break;
                    }
                    if self.frame_ended {
                        self.end_session();
                        debug!("stream ended");
                        return Ok(0);
                    }
                    self.stream_stage = StreamStage::Load;
                }
            }
        }
        Ok(self.staged().len())
    }
}

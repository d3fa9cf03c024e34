//! Frames produced here must decode with an independent decoder.

use std::io::Read;

use oxizstd::{
    CCtx, CParameter, EndDirective, InBuffer, OutBuffer, StreamCompressor, compress,
    compress_bound,
};
use ruzstd::streaming_decoder::StreamingDecoder;

fn ruzstd_decode(frame: &[u8]) -> Vec<u8> {
    let mut source = frame;
    let mut decoder = StreamingDecoder::new(&mut source).unwrap();
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).unwrap();
    out
}

fn mixed(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    let mut seed: u32 = 0x9E37_79B9;
    let mut i = 0u32;
    while data.len() < len {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        match seed >> 30 {
            0 => data.extend_from_slice(format!("record {i:06} status=ok\n").as_bytes()),
            1 => data.extend(std::iter::repeat_n((seed >> 8) as u8, (seed >> 20) as usize % 40)),
            2 => data.extend_from_slice(&seed.to_be_bytes()),
            _ => {
                let back = data.len().min(1 + (seed as usize >> 12) % 5000);
                let start = data.len() - back;
                let copy = data[start..start + back.min(64)].to_vec();
                data.extend_from_slice(&copy);
            }
        }
        i += 1;
    }
    data.truncate(len);
    data
}

#[test]
fn test_ruzstd_decodes_every_strategy() {
    let src = mixed(300_000);
    for level in [-5, -1, 1, 2, 3, 5, 7, 12, 16, 19, 22] {
        let frame = compress(&src, level).unwrap();
        assert!(ruzstd_decode(&frame) == src, "level {level}");
    }
}

#[test]
fn test_ruzstd_verifies_checksum() {
    let src = mixed(70_000);
    let mut cctx = CCtx::with_level(6);
    cctx.set_parameter(CParameter::ChecksumFlag, 1).unwrap();
    let mut dst = vec![0u8; compress_bound(src.len())];
    let n = cctx.compress2(&mut dst, &src).unwrap();
    assert_eq!(ruzstd_decode(&dst[..n]), src);
}

#[test]
fn test_ruzstd_decodes_small_inputs() {
    for len in [0, 1, 6, 7, 64, 1000] {
        let src = mixed(len);
        let frame = compress(&src, 3).unwrap();
        assert_eq!(ruzstd_decode(&frame), src, "len {len}");
    }
}

#[test]
fn test_ruzstd_decodes_streamed_frame() {
    let src = mixed(600_000);
    let mut cctx = CCtx::with_level(4);
    let mut frame = Vec::new();
    let mut out = vec![0u8; 10_000];
    for (i, chunk) in src.chunks(33_333).enumerate() {
        let directive = if i % 5 == 4 {
            EndDirective::Flush
        } else {
            EndDirective::Continue
        };
        let mut input = InBuffer::new(chunk);
        loop {
            let mut output = OutBuffer::new(&mut out);
            let left = cctx.compress_stream(&mut output, &mut input, directive).unwrap();
            frame.extend_from_slice(output.written());
            if input.is_empty() && (directive == EndDirective::Continue || left == 0) {
                break;
            }
        }
    }
    let mut input = InBuffer::new(&[]);
    loop {
        let mut output = OutBuffer::new(&mut out);
        let left = cctx.compress_stream(&mut output, &mut input, EndDirective::End).unwrap();
        frame.extend_from_slice(output.written());
        if left == 0 {
            break;
        }
    }
    assert!(ruzstd_decode(&frame) == src);
}

//! Streaming compression integration tests.

use oxizstd::{
    CCtx, CParameter, EndDirective, ErrorCode, InBuffer, OutBuffer, ResetDirective,
    StreamCompressor, compress_bound, decompress,
};

const CHUNK: usize = 4 << 10;
const FLUSH_EVERY: usize = 1 << 20;

fn corpus(len: usize) -> Vec<u8> {
    let words: [&[u8]; 16] = [
        b"stream ", b"block ", b"window ", b"match ", b"literal ", b"offset ", b"table ",
        b"entropy ", b"frame ", b"header ", b"checksum ", b"dictionary ", b"level ", b"hash ",
        b"chain ", b"tree ",
    ];
    let mut data = Vec::with_capacity(len);
    let mut seed: u32 = 0xDEAD_BEEF;
    while data.len() < len {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        data.extend_from_slice(words[(seed & 15) as usize]);
        if seed % 29 == 0 {
            data.extend_from_slice(&seed.to_le_bytes());
        }
    }
    data.truncate(len);
    data
}

fn one_shot(cctx: &mut CCtx<'_>, src: &[u8]) -> Vec<u8> {
    let mut dst = vec![0u8; compress_bound(src.len()) + (src.len() >> 10) + 4096];
    let n = cctx.compress2(&mut dst, src).unwrap();
    dst.truncate(n);
    dst
}

/// Call `compress_stream` until the input is consumed and, for flush and
/// end, until nothing is left to flush.
fn drive(
    cctx: &mut CCtx<'_>,
    frame: &mut Vec<u8>,
    out: &mut [u8],
    data: &[u8],
    directive: EndDirective,
) {
    let mut input = InBuffer::new(data);
    loop {
        let mut output = OutBuffer::new(out);
        let left = cctx.compress_stream(&mut output, &mut input, directive).unwrap();
        frame.extend_from_slice(output.written());
        let done = match directive {
            EndDirective::Continue => input.is_empty(),
            _ => input.is_empty() && left == 0,
        };
        if done {
            break;
        }
    }
}

#[test]
fn test_chunked_stream_with_flushes_matches_one_shot() {
    let src = corpus(10 << 20);
    let expected = one_shot(&mut CCtx::with_level(3), &src);

    let mut cctx = CCtx::with_level(3);
    cctx.set_pledged_src_size(src.len() as u64).unwrap();
    let mut frame = Vec::with_capacity(expected.len());
    let mut out = vec![0u8; 1 << 16];
    for (i, chunk) in src.chunks(CHUNK).enumerate() {
        drive(&mut cctx, &mut frame, &mut out, chunk, EndDirective::Continue);
        if (i + 1) * CHUNK % FLUSH_EVERY == 0 {
            drive(&mut cctx, &mut frame, &mut out, &[], EndDirective::Flush);
        }
    }
    drive(&mut cctx, &mut frame, &mut out, &[], EndDirective::End);

    assert_eq!(frame.len(), expected.len());
    assert!(frame == expected);
    assert_eq!(decompress(&frame).unwrap(), src);
}

#[test]
fn test_stream_through_one_byte_output() {
    let src = corpus(40_000);
    let mut cctx = CCtx::with_level(5);
    cctx.set_pledged_src_size(src.len() as u64).unwrap();
    let mut frame = Vec::new();
    let mut out = [0u8; 1];
    drive(&mut cctx, &mut frame, &mut out, &src, EndDirective::End);
    assert_eq!(frame, one_shot(&mut CCtx::with_level(5), &src));
}

#[test]
fn test_flushed_stream_of_unknown_size() {
    let src = corpus(500_000);
    let mut cctx = CCtx::with_level(3);
    cctx.set_parameter(CParameter::ChecksumFlag, 1).unwrap();
    let mut frame = Vec::new();
    let mut out = vec![0u8; 8192];
    for chunk in src.chunks(50_000) {
        drive(&mut cctx, &mut frame, &mut out, chunk, EndDirective::Flush);
    }
    drive(&mut cctx, &mut frame, &mut out, &[], EndDirective::End);
    assert_eq!(decompress(&frame).unwrap(), src);
}

#[test]
fn test_frames_back_to_back() {
    let first = corpus(100_000);
    let second = corpus(30_000);
    let mut cctx = CCtx::with_level(4);
    let mut stream = Vec::new();
    let mut out = vec![0u8; 4096];
    drive(&mut cctx, &mut stream, &mut out, &first, EndDirective::End);
    drive(&mut cctx, &mut stream, &mut out, &second, EndDirective::End);

    let mut expected = first.clone();
    expected.extend_from_slice(&second);
    assert_eq!(decompress(&stream).unwrap(), expected);
}

#[test]
fn test_parameters_locked_while_streaming() {
    let src = corpus(300_000);
    let mut cctx = CCtx::with_level(3);
    let mut frame = Vec::new();
    let mut out = vec![0u8; 1 << 16];
    drive(&mut cctx, &mut frame, &mut out, &src, EndDirective::Continue);
    assert!(!frame.is_empty(), "a block should have been produced");

    for (param, value) in [
        (CParameter::WindowLog, 20),
        (CParameter::CompressionLevel, 9),
        (CParameter::Strategy, 2),
        (CParameter::ChecksumFlag, 1),
    ] {
        let err = cctx.set_parameter(param, value).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StageWrong, "{param:?}");
    }

    // The frame continues with the original parameters.
    drive(&mut cctx, &mut frame, &mut out, &[], EndDirective::End);
    assert_eq!(decompress(&frame).unwrap(), src);
    cctx.set_parameter(CParameter::WindowLog, 20).unwrap();
}

#[test]
fn test_reset_mid_frame_starts_over() {
    let src = corpus(200_000);
    let mut cctx = CCtx::with_level(3);
    let mut discarded = Vec::new();
    let mut out = vec![0u8; 4096];
    drive(&mut cctx, &mut discarded, &mut out, &src[..150_000], EndDirective::Continue);
    cctx.reset(ResetDirective::SessionOnly).unwrap();

    let mut frame = Vec::new();
    drive(&mut cctx, &mut frame, &mut out, &src, EndDirective::End);
    assert_eq!(decompress(&frame).unwrap(), src);
}

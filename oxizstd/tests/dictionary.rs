//! Dictionary compression integration tests.

use oxizstd::{
    CCtx, CCtxParams, CDict, CParameter, DictAttachPref, DictContentType, EndDirective, ErrorCode,
    Format, InBuffer, OutBuffer, StreamCompressor, compress_bound, decompress,
    decompress_with_dict, estimate_cdict_size, parse_frame_header,
};

fn record(id: u32) -> Vec<u8> {
    format!(
        r#"{{"id":{id},"user":"member-{}","region":"{}","score":{},"flags":["beta","stable"]}}"#,
        id * 7919 % 1000,
        ["north", "south", "east", "west"][(id % 4) as usize],
        id * 31 % 977
    )
    .into_bytes()
}

/// Many small records, as a dictionary would be trained on.
fn dictionary(len: usize) -> Vec<u8> {
    let mut dict = Vec::new();
    let mut id = 10_000;
    while dict.len() < len {
        dict.extend_from_slice(&record(id));
        id += 13;
    }
    dict.truncate(len);
    dict
}

fn compress_frame(cctx: &mut CCtx<'_>, src: &[u8]) -> Vec<u8> {
    let mut dst = vec![0u8; compress_bound(src.len()) + 4096];
    let n = cctx.compress2(&mut dst, src).unwrap();
    dst.truncate(n);
    dst
}

#[test]
fn test_dictionary_shrinks_small_records() {
    let dict = dictionary(32 << 10);
    let cdict = CDict::new(&dict, 3).unwrap();
    for id in [1, 42, 500] {
        let src = record(id);
        let plain = compress_frame(&mut CCtx::with_level(3), &src);
        let mut cctx = CCtx::new();
        cctx.ref_cdict(&cdict).unwrap();
        let frame = compress_frame(&mut cctx, &src);
        assert!(frame.len() < plain.len(), "{} vs {}", frame.len(), plain.len());
        assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src);
    }
}

#[test]
fn test_every_dictionary_mode_round_trips() {
    let dict = dictionary(16 << 10);
    let mut src = Vec::new();
    for id in 0..200 {
        src.extend_from_slice(&record(id));
    }
    for level in [1, 2, 4, 6, 9, 16, 19] {
        let cdict = CDict::new(&dict, level).unwrap();
        for pref in [
            DictAttachPref::Default,
            DictAttachPref::ForceAttach,
            DictAttachPref::ForceCopy,
            DictAttachPref::ForceLoad,
        ] {
            let mut cctx = CCtx::new();
            cctx.set_parameter(CParameter::ForceAttachDict, pref as i32).unwrap();
            cctx.ref_cdict(&cdict).unwrap();
            let frame = compress_frame(&mut cctx, &src);
            let out = decompress_with_dict(&frame, &dict).unwrap();
            assert!(out == src, "level {level} {pref:?}");
        }
    }
}

#[test]
fn test_dedicated_search_dictionary() {
    let dict = dictionary(64 << 10);
    let mut params = CCtxParams::with_level(5);
    params.enable_dedicated_dict_search = true;
    let cdict = CDict::with_params(&dict, DictContentType::RawContent, &params).unwrap();
    assert!(cdict.dedicated());

    let src: Vec<u8> = (0..50).flat_map(record).collect();
    let mut cctx = CCtx::new();
    cctx.ref_cdict(&cdict).unwrap();
    let frame = compress_frame(&mut cctx, &src);
    assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src);
}

#[test]
fn test_cdict_shared_between_threads() {
    let dict = dictionary(16 << 10);
    let cdict = CDict::new(&dict, 3).unwrap();
    let frames: Vec<(Vec<u8>, Vec<u8>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let cdict = &cdict;
                scope.spawn(move || {
                    let src: Vec<u8> = (t * 100..t * 100 + 60).flat_map(record).collect();
                    let mut cctx = CCtx::new();
                    cctx.ref_cdict(cdict).unwrap();
                    let frame = compress_frame(&mut cctx, &src);
                    (src, frame)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for (src, frame) in frames {
        assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src);
    }
}

#[test]
fn test_cdict_reuse_is_deterministic() {
    let dict = dictionary(8 << 10);
    let cdict = CDict::new(&dict, 4).unwrap();
    let src: Vec<u8> = (0..30).flat_map(record).collect();
    let mut cctx = CCtx::new();
    cctx.ref_cdict(&cdict).unwrap();
    let first = compress_frame(&mut cctx, &src);
    for _ in 0..3 {
        assert_eq!(compress_frame(&mut cctx, &src), first);
    }
    let mut fresh = CCtx::new();
    fresh.ref_cdict(&cdict).unwrap();
    assert_eq!(compress_frame(&mut fresh, &src), first);
}

/// Stream `src` without announcing its size, so that a digested
/// dictionary is used through its tables whatever the input length.
fn compress_unsized(cctx: &mut CCtx<'_>, src: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    let mut out = vec![0u8; 1 << 16];
    let mut input = InBuffer::new(src);
    let mut directive = EndDirective::Continue;
    loop {
        let mut output = OutBuffer::new(&mut out);
        let left = cctx.compress_stream(&mut output, &mut input, directive).unwrap();
        frame.extend_from_slice(output.written());
        if directive == EndDirective::End && left == 0 {
            return frame;
        }
        if input.is_empty() {
            directive = EndDirective::End;
        }
    }
}

#[test]
fn test_dictionary_falls_out_of_window() {
    let dict = dictionary(32 << 10);
    let cdict = CDict::new(&dict, 3).unwrap();
    let src: Vec<u8> = (0..20_000).flat_map(record).collect();
    for pref in [DictAttachPref::ForceAttach, DictAttachPref::ForceCopy] {
        let mut cctx = CCtx::new();
        cctx.set_parameter(CParameter::ForceAttachDict, pref as i32).unwrap();
        cctx.set_parameter(CParameter::WindowLog, 17).unwrap();
        cctx.ref_cdict(&cdict).unwrap();
        let frame = compress_unsized(&mut cctx, &src);
        assert_eq!(parse_frame_header(&frame, Format::Zstd1).unwrap().content_size, None);
        assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src, "{pref:?}");
    }
}

#[test]
fn test_prefix_applies_to_one_frame() {
    let prefix = dictionary(4 << 10);
    let src: Vec<u8> = (10_000..10_020).step_by(13).flat_map(record).collect();
    let mut cctx = CCtx::with_level(3);
    cctx.ref_prefix(&prefix).unwrap();
    let with_prefix = compress_frame(&mut cctx, &src);
    assert_eq!(decompress_with_dict(&with_prefix, &prefix).unwrap(), src);

    let without = compress_frame(&mut cctx, &src);
    assert_eq!(decompress(&without).unwrap(), src);
    assert!(with_prefix.len() < without.len());
}

#[test]
fn test_dictionary_sources_replace_each_other() {
    let dict = dictionary(8 << 10);
    let cdict = CDict::new(&dict, 3).unwrap();
    let src: Vec<u8> = (0..10).flat_map(record).collect();

    let mut cctx = CCtx::with_level(3);
    cctx.ref_cdict(&cdict).unwrap();
    cctx.load_dictionary(&[]).unwrap();
    let frame = compress_frame(&mut cctx, &src);
    assert_eq!(decompress(&frame).unwrap(), src);

    cctx.load_dictionary(&dict).unwrap();
    let frame = compress_frame(&mut cctx, &src);
    assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src);
    assert_eq!(parse_frame_header(&frame, Format::Zstd1).unwrap().dict_id, 0);
}

#[test]
fn test_params_frozen_while_cdict_referenced() {
    let dict = dictionary(4 << 10);
    let cdict = CDict::new(&dict, 3).unwrap();
    let mut cctx = CCtx::new();
    cctx.ref_cdict(&cdict).unwrap();
    let err = cctx.set_params(CCtxParams::with_level(7)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::StageWrong);
}

#[test]
fn test_full_dictionary_requires_magic() {
    let err = CDict::with_params(
        &dictionary(1024),
        DictContentType::FullDict,
        &CCtxParams::with_level(3),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DictionaryWrong);
}

#[test]
fn test_cdict_size_estimate() {
    for (len, level) in [(1 << 10, 1), (16 << 10, 3), (100 << 10, 9), (64 << 10, 19)] {
        let cdict = CDict::new(&dictionary(len), level).unwrap();
        assert!(cdict.sizeof() <= estimate_cdict_size(len, level), "{len} at {level}");
    }
}

#[test]
fn test_forced_window_with_large_dictionary() {
    let dict = dictionary(32 << 10);
    let src: Vec<u8> = (0..300).flat_map(record).collect();
    let cdict = CDict::new(&dict, 3).unwrap();
    for force in [0, 1] {
        let mut cctx = CCtx::new();
        cctx.set_parameter(CParameter::WindowLog, 10).unwrap();
        cctx.set_parameter(CParameter::ForceMaxWindow, force).unwrap();
        cctx.ref_cdict(&cdict).unwrap();
        let frame = compress_frame(&mut cctx, &src);
        assert_eq!(decompress_with_dict(&frame, &dict).unwrap(), src, "force {force}");
        let header = parse_frame_header(&frame, Format::Zstd1).unwrap();
        assert!(header.window_size <= 1 << 10 || header.single_segment, "force {force}");
    }
}

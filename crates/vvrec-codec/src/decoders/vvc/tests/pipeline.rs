use std::sync::Arc;

use vvrec_core::VvError;

use super::{
    FlatPredictor, ReaderScript, build_frame, frame_params, full_slice_header, plane_is_flat, scripted_slice,
    test_config,
};
use crate::decoders::vvc::config::DecoderConfig;
use crate::decoders::vvc::cu::{CuPool, MotionInfo, Mv};
use crate::decoders::vvc::frame::{ProgressKind, RefPic, RefPicLists};
use crate::decoders::vvc::params::{CollocatedRef, SliceHeader, SliceType, Sps};
use crate::decoders::vvc::sao::{SaoComponent, SaoParams, SaoType};
use crate::decoders::vvc::thread::{FrameDecoder, TaskMask};

fn decoder(config: &DecoderConfig) -> FrameDecoder {
    match FrameDecoder::new(config) {
        Ok(d) => d,
        Err(err) => panic!("创建解码器失败: {err}"),
    }
}

fn inter_header() -> SliceHeader {
    SliceHeader {
        slice_type: SliceType::B,
        num_ref_idx: [1, 0],
        ..SliceHeader::default()
    }
}

fn skip_script() -> ReaderScript {
    ReaderScript {
        skip: true,
        intra: false,
        motion: MotionInfo::uni(0, 0, Mv::new(0, 0)),
        ..ReaderScript::default()
    }
}

fn missing_ref() -> RefPicLists {
    [vec![RefPic { poc: -1, frame: None }], Vec::new()]
}

#[test]
fn test_single_skip_ctu_copies_inter_prediction() {
    let fp = frame_params(Sps::default());
    let header = full_slice_header(&fp, inter_header(), false);
    let slice = scripted_slice(header, missing_ref(), skip_script());
    let pool = Arc::new(CuPool::new());
    let config = test_config(2);
    let fc = build_frame(fp, vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());

    let dec = decoder(&config);
    let ft = match dec.submit(Arc::clone(&fc)) {
        Ok(ft) => ft,
        Err(err) => panic!("提交帧失败: {err}"),
    };
    let tracker = Arc::clone(&ft);
    if let Err(err) = dec.wait(ft) {
        panic!("解码失败: {err}");
    }

    assert_eq!(tracker.avail(0, 0), TaskMask::all(), "全部阶段应完成");
    for c in 0..3 {
        assert!(plane_is_flat(&fc.pic, c, 77), "平面 {c} 应等于帧间预测值");
    }
    assert_eq!(fc.progress(ProgressKind::Pixel), 64);
    assert_eq!(fc.progress(ProgressKind::Motion), 64);
    assert_eq!(pool.free_cus(), 1, "CU 重建后归还池");
    assert_eq!(tracker.dispatch_log().len(), 8, "单个 CTU 派发 8 个阶段");
}

#[test]
fn test_zero_coefficients_leave_prediction_unchanged() {
    let fp = frame_params(Sps {
        width: 128,
        height: 64,
        ..Sps::default()
    });
    let header = full_slice_header(&fp, SliceHeader::default(), false);
    let script = ReaderScript {
        luma_coded: true,
        chroma_coded: true,
        dc: 0,
        ..ReaderScript::default()
    };
    let slice = scripted_slice(header, RefPicLists::default(), script);
    let pool = Arc::new(CuPool::new());
    let config = test_config(2);
    let fc = build_frame(fp, vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());

    let dec = decoder(&config);
    let result = dec.submit(Arc::clone(&fc)).and_then(|ft| dec.wait(ft));
    if let Err(err) = result {
        panic!("解码失败: {err}");
    }
    for c in 0..3 {
        assert!(plane_is_flat(&fc.pic, c, 90), "全零系数不应改变平面 {c}");
    }
}

#[test]
fn test_dc_residual_raises_flat_block() {
    let fp = frame_params(Sps::default());
    let header = full_slice_header(&fp, SliceHeader::default(), false);
    let script = ReaderScript {
        luma_coded: true,
        dc: 64,
        ..ReaderScript::default()
    };
    let slice = scripted_slice(header, RefPicLists::default(), script);
    let pool = Arc::new(CuPool::new());
    let config = test_config(1);
    let fc = build_frame(fp, vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());

    let dec = decoder(&config);
    if let Err(err) = dec.submit(Arc::clone(&fc)).and_then(|ft| dec.wait(ft)) {
        panic!("解码失败: {err}");
    }
    // QP 32 下 DC=64 的 64x64 块残差为 26
    assert!(plane_is_flat(&fc.pic, 0, 116), "DC 残差应均匀叠加到预测上");
    assert!(plane_is_flat(&fc.pic, 1, 90), "色度无残差");
}

#[test]
fn test_parse_error_is_returned_by_wait() {
    let fp = frame_params(Sps {
        width: 192,
        height: 128,
        ..Sps::default()
    });
    let header = full_slice_header(&fp, SliceHeader::default(), false);
    let script = ReaderScript {
        fail_at: Some(4),
        ..ReaderScript::default()
    };
    let slice = scripted_slice(header, RefPicLists::default(), script);
    let pool = Arc::new(CuPool::new());
    let config = test_config(3);
    let fc = build_frame(fp, vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());

    let dec = decoder(&config);
    let ft = match dec.submit(Arc::clone(&fc)) {
        Ok(ft) => ft,
        Err(err) => panic!("提交帧失败: {err}"),
    };
    let tracker = Arc::clone(&ft);
    match dec.wait(ft) {
        Err(VvError::InvalidData(msg)) => assert!(msg.contains("脚本注入"), "应返回首个错误: {msg}"),
        other => panic!("期望非法数据错误, 实际 {other:?}"),
    }
    assert!(tracker.has_error());
    assert!(!tracker.avail(1, 1).contains(TaskMask::PARSE), "出错的 CTU 不应标记完成");
    assert_eq!(fc.progress(ProgressKind::Pixel), 128, "出错后进度仍推进到图像高度");
}

#[test]
fn test_missing_slice_is_invalid_data() {
    let fp = frame_params(Sps {
        width: 128,
        height: 64,
        ..Sps::default()
    });
    // 只覆盖第一个 CTU
    let header = SliceHeader {
        ctb_addrs: vec![0],
        entry_points: vec![0],
        ..SliceHeader::default()
    };
    let slice = scripted_slice(header.clone(), RefPicLists::default(), ReaderScript::default());
    let pool = Arc::new(CuPool::new());
    let config = test_config(2);
    let fc = build_frame(fp.clone(), vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());
    let dec = decoder(&config);
    match dec.submit(fc).and_then(|ft| dec.wait(ft)) {
        Err(VvError::InvalidData(_)) => {}
        other => panic!("缺失 slice 应报非法数据, 实际 {other:?}"),
    }

    let lenient = DecoderConfig {
        error_on_missing_slices: false,
        ..config
    };
    let slice = scripted_slice(header, RefPicLists::default(), ReaderScript::default());
    let fc = build_frame(fp, vec![slice], 1, 1, &pool, FlatPredictor::default(), lenient);
    if let Err(err) = dec.submit(fc).and_then(|ft| dec.wait(ft)) {
        panic!("关闭缺失检查后不应报错: {err}");
    }
}

#[test]
fn test_inter_frame_waits_for_reference() {
    let sps = Sps {
        width: 128,
        height: 128,
        ..Sps::default()
    };
    let pool = Arc::new(CuPool::new());
    let config = test_config(4);
    let dec = decoder(&config);

    let fp = frame_params(sps.clone());
    let header = full_slice_header(&fp, SliceHeader::default(), false);
    let intra = scripted_slice(header, RefPicLists::default(), ReaderScript::default());
    let ref_frame = build_frame(fp, vec![intra], 0, 0, &pool, FlatPredictor::default(), config.clone());

    let fp = frame_params(sps);
    let base = SliceHeader {
        temporal_mvp: Some(CollocatedRef { list: 0, ref_idx: 0 }),
        ..inter_header()
    };
    let header = full_slice_header(&fp, base, false);
    let refs = [
        vec![RefPic {
            poc: 0,
            frame: Some(Arc::clone(&ref_frame)),
        }],
        Vec::new(),
    ];
    let script = ReaderScript {
        motion: MotionInfo::uni(0, 0, Mv::new(0, 16 * 8)),
        ..skip_script()
    };
    let slice = scripted_slice(header, refs, script);
    let cur = build_frame(fp, vec![slice], 1, 1, &pool, FlatPredictor::default(), config);

    // 先提交依赖帧, 它必须等参考帧的进度
    let ft_cur = match dec.submit(Arc::clone(&cur)) {
        Ok(ft) => ft,
        Err(err) => panic!("提交帧失败: {err}"),
    };
    let ft_ref = match dec.submit(Arc::clone(&ref_frame)) {
        Ok(ft) => ft,
        Err(err) => panic!("提交参考帧失败: {err}"),
    };
    if let Err(err) = dec.wait(ft_cur) {
        panic!("当前帧解码失败: {err}");
    }
    assert_eq!(ref_frame.progress(ProgressKind::Pixel), 128, "当前帧完成时参考帧必已完成");
    if let Err(err) = dec.wait(ft_ref) {
        panic!("参考帧解码失败: {err}");
    }
    assert!(plane_is_flat(&cur.pic, 0, 77));
    assert!(plane_is_flat(&ref_frame.pic, 0, 90));
}

#[test]
fn test_sao_band_offset_through_staging() {
    let sps = Sps {
        sao_enabled: true,
        ..Sps::default()
    };
    let fp = frame_params(sps);
    let base = SliceHeader {
        sao_luma: true,
        ..SliceHeader::default()
    };
    let header = full_slice_header(&fp, base, false);
    let mut sao = SaoParams::default();
    // 90 >> 3 = 11
    sao.components[0] = SaoComponent {
        kind: SaoType::Band,
        offsets: [3, 0, 0, 0],
        band_position: 11,
        eo_class: 0,
    };
    let script = ReaderScript {
        sao,
        ..ReaderScript::default()
    };
    let slice = scripted_slice(header, RefPicLists::default(), script);
    let pool = Arc::new(CuPool::new());
    let config = test_config(2);
    let fc = build_frame(fp, vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());
    assert!(fc.staging.is_some(), "启用 SAO 时需要中间图像");

    let dec = decoder(&config);
    if let Err(err) = dec.submit(Arc::clone(&fc)).and_then(|ft| dec.wait(ft)) {
        panic!("解码失败: {err}");
    }
    assert!(plane_is_flat(&fc.pic, 0, 93), "带偏移应作用于亮度");
    assert!(plane_is_flat(&fc.pic, 1, 90), "色度 SAO 关闭时原样拷贝");
}

#[test]
fn test_disabled_sao_switch_bypasses_offsets() {
    let sps = Sps {
        sao_enabled: true,
        ..Sps::default()
    };
    let fp = frame_params(sps);
    let base = SliceHeader {
        sao_luma: true,
        ..SliceHeader::default()
    };
    let header = full_slice_header(&fp, base, false);
    let mut sao = SaoParams::default();
    sao.components[0] = SaoComponent {
        kind: SaoType::Band,
        offsets: [3, 0, 0, 0],
        band_position: 11,
        eo_class: 0,
    };
    let slice = scripted_slice(
        header,
        RefPicLists::default(),
        ReaderScript {
            sao,
            ..ReaderScript::default()
        },
    );
    let pool = Arc::new(CuPool::new());
    let config = DecoderConfig {
        disable_sao: true,
        ..test_config(1)
    };
    let fc = build_frame(fp, vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());
    let dec = decoder(&config);
    if let Err(err) = dec.submit(Arc::clone(&fc)).and_then(|ft| dec.wait(ft)) {
        panic!("解码失败: {err}");
    }
    assert!(plane_is_flat(&fc.pic, 0, 90), "调试开关关闭 SAO 后输出不变");
}

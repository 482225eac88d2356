use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use super::{FlatPredictor, ReaderScript, build_frame, frame_params, full_slice_header, scripted_slice, test_config};
use crate::decoders::vvc::cu::CuPool;
use crate::decoders::vvc::frame::{FrameContext, ProgressKind, RefPicLists};
use crate::decoders::vvc::params::{SliceHeader, Sps};
use crate::decoders::vvc::thread::{Dispatch, FrameDecoder, FrameThread, TaskMask, TaskType, stage_deps};

fn intra_frame(sps: Sps, wpp: bool, script: ReaderScript, threads: usize) -> (Arc<FrameContext>, FrameDecoder) {
    let fp = frame_params(sps);
    let header = full_slice_header(&fp, SliceHeader::default(), wpp);
    let slice = scripted_slice(header, RefPicLists::default(), script);
    let pool = Arc::new(CuPool::new());
    let config = test_config(threads);
    let fc = build_frame(fp, vec![slice], 0, 0, &pool, FlatPredictor::default(), config.clone());
    let dec = match FrameDecoder::new(&config) {
        Ok(d) => d,
        Err(err) => panic!("创建解码器失败: {err}"),
    };
    (fc, dec)
}

fn run(dec: &FrameDecoder, fc: &Arc<FrameContext>) -> Arc<FrameThread> {
    let ft = match dec.submit(Arc::clone(fc)) {
        Ok(ft) => ft,
        Err(err) => panic!("提交帧失败: {err}"),
    };
    let tracker = Arc::clone(&ft);
    if let Err(err) = dec.wait(ft) {
        panic!("解码失败: {err}");
    }
    tracker
}

fn position(log: &[Dispatch], kind: TaskType, rx: usize, ry: usize) -> usize {
    match log.iter().position(|d| d.kind == kind && d.rx == rx && d.ry == ry) {
        Some(i) => i,
        None => panic!("{} ({rx},{ry}) 未被派发", kind.name()),
    }
}

#[test]
fn test_recon_follows_raster_dependencies() {
    let sps = Sps {
        width: 128,
        height: 128,
        ..Sps::default()
    };
    let (fc, dec) = intra_frame(sps, false, ReaderScript::default(), 2);
    let ft = run(&dec, &fc);
    let recon: Vec<(usize, usize)> = ft
        .dispatch_log()
        .iter()
        .filter(|d| d.kind == TaskType::Recon)
        .map(|d| (d.rx, d.ry))
        .collect();
    assert_eq!(recon, vec![(0, 0), (1, 0), (0, 1), (1, 1)], "RECON 应满足右上与左侧依赖");
    for (rx, ry) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        assert_eq!(ft.avail(rx, ry), TaskMask::all());
    }
}

#[test]
fn test_wavefront_parse_waits_for_upper_right() {
    let sps = Sps {
        width: 192,
        height: 128,
        entropy_coding_sync: true,
        ..Sps::default()
    };
    let (fc, dec) = intra_frame(sps, true, ReaderScript::default(), 4);
    let ft = run(&dec, &fc);
    let log = ft.dispatch_log();
    let parse = |rx, ry| position(&log, TaskType::Parse, rx, ry);
    assert!(parse(0, 1) > parse(1, 0), "第二行首个 CTU 需等待上一行第二个 CTU");
    assert!(parse(1, 1) > parse(2, 0));
    // 行末 CTU 的右上邻居被钳制到 tile 右边界
    assert!(parse(2, 1) > parse(2, 0));
    assert!(parse(1, 1) > parse(0, 1), "同一入口点内按顺序解析");
}

#[test]
fn test_dispatch_log_respects_every_dependency() {
    let sps = Sps {
        width: 320,
        height: 256,
        log2_ctb_size: 5,
        log2_max_tb_size: 5,
        ..Sps::default()
    };
    let script = ReaderScript {
        random_split: Some(7),
        luma_coded: true,
        dc: 16,
        ..ReaderScript::default()
    };
    let (fc, dec) = intra_frame(sps, false, script, 4);
    let ft = run(&dec, &fc);
    let log = ft.dispatch_log();
    let geo = &fc.params.geometry;
    assert_eq!(log.len(), geo.ctb_count() * TaskType::ALL.len(), "每个 CTU 的每个阶段只派发一次");

    let index: HashMap<(TaskType, usize, usize), usize> =
        log.iter().enumerate().map(|(i, d)| ((d.kind, d.rx, d.ry), i)).collect();
    let at = |kind, rx: usize, ry: usize| index.get(&(kind, rx, ry)).copied();
    for (i, d) in log.iter().enumerate() {
        let prev = TaskType::ALL.iter().rev().find(|&&k| k < d.kind && k != TaskType::Alf);
        if let Some(&prev) = prev {
            let j = at(prev, d.rx, d.ry).unwrap_or(usize::MAX);
            assert!(j < i, "{} ({},{}) 早于同 CTU 的 {}", d.kind.name(), d.rx, d.ry, prev.name());
        }
        for &(dx, dy, dep) in stage_deps(d.kind) {
            let (Some(x), Some(y)) = (d.rx.checked_add_signed(dx), d.ry.checked_add_signed(dy)) else {
                continue;
            };
            if x >= geo.ctb_width || y >= geo.ctb_height {
                continue;
            }
            let j = at(dep, x, y).unwrap_or(usize::MAX);
            assert!(j < i, "{} ({},{}) 早于依赖 {} ({x},{y})", d.kind.name(), d.rx, d.ry, dep.name());
        }
        if d.kind == TaskType::Alf {
            for y in d.ry.saturating_sub(1)..=(d.ry + 1).min(geo.ctb_height - 1) {
                for x in d.rx.saturating_sub(1)..=(d.rx + 1).min(geo.ctb_width - 1) {
                    let j = at(TaskType::Sao, x, y).unwrap_or(usize::MAX);
                    assert!(j < i, "ALF ({},{}) 早于邻居 SAO ({x},{y})", d.rx, d.ry);
                }
            }
        }
    }
}

#[test]
fn test_availability_bits_only_grow() {
    let sps = Sps {
        width: 256,
        height: 192,
        ..Sps::default()
    };
    let script = ReaderScript {
        random_split: Some(3),
        ..ReaderScript::default()
    };
    let (fc, dec) = intra_frame(sps, false, script, 3);
    let ft = match dec.submit(Arc::clone(&fc)) {
        Ok(ft) => ft,
        Err(err) => panic!("提交帧失败: {err}"),
    };
    let geo = fc.params.geometry.clone();
    let height = fc.height();
    let tracker = Arc::clone(&ft);
    let poller = thread::spawn(move || {
        let mut last = vec![TaskMask::empty(); geo.ctb_count()];
        let mut polls = 0usize;
        loop {
            let finished = tracker.progress(ProgressKind::Pixel) >= height;
            for (addr, prev) in last.iter_mut().enumerate() {
                let (rx, ry) = geo.ctb_pos(addr);
                let now = tracker.avail(rx, ry);
                assert!(now.contains(*prev), "CTU ({rx},{ry}) 的完成位被清除: {prev:?} -> {now:?}");
                *prev = now;
            }
            polls += 1;
            if finished {
                return (last, polls);
            }
            thread::yield_now();
        }
    });
    if let Err(err) = dec.wait(ft) {
        panic!("解码失败: {err}");
    }
    let (last, polls) = match poller.join() {
        Ok(r) => r,
        Err(_) => panic!("轮询线程异常退出"),
    };
    assert!(polls > 0);
    assert!(last.iter().all(|m| *m == TaskMask::all()), "结束时全部阶段完成");
}

#[test]
fn test_two_frames_share_one_executor() {
    let sps = Sps {
        width: 128,
        height: 64,
        ..Sps::default()
    };
    let pool = Arc::new(CuPool::new());
    let config = test_config(2);
    let dec = match FrameDecoder::new(&config) {
        Ok(d) => d,
        Err(err) => panic!("创建解码器失败: {err}"),
    };
    assert_eq!(dec.threads(), 2);
    let mut frames = Vec::new();
    for poc in 0..2 {
        let fp = frame_params(sps.clone());
        let header = full_slice_header(&fp, SliceHeader::default(), false);
        let slice = scripted_slice(header, RefPicLists::default(), ReaderScript::default());
        let fc = build_frame(fp, vec![slice], poc, poc as u64, &pool, FlatPredictor::default(), config.clone());
        let ft = match dec.submit(Arc::clone(&fc)) {
            Ok(ft) => ft,
            Err(err) => panic!("提交帧失败: {err}"),
        };
        frames.push((fc, ft));
    }
    for (fc, ft) in frames {
        if let Err(err) = dec.wait(ft) {
            panic!("帧 {} 解码失败: {err}", fc.poc);
        }
        assert_eq!(fc.progress(ProgressKind::Pixel), 64);
    }
    // 4 个 CTU 各一个 CU, 归还后可被复用
    let free = pool.free_cus();
    assert!((1..=4).contains(&free), "CU 应全部归还池, 实际 {free}");
}

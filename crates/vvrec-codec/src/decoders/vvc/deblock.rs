//! 去块滤波.
//!
//! 亮度在 4 采样网格, 色度在 8 色度采样网格上处理变换块边与预测块边.
//! 边界强度与滤波长度按需从帧信息表推导, 不额外存储.
//! 垂直边阶段处理 CTU 内的全部垂直边; 水平边阶段的列窗口左移 8 个亮度采样,
//! 避免触及右侧 CTU 垂直边阶段仍可能修改的列.

use std::ops::Range;

use log::trace;
use vvrec_core::{Plane, VvResult};

use super::common::{CB, ChannelType, LUMA, PredMode};
use super::cu::{Mv, PredFlags};
use super::frame::{FrameContext, FrameTables};

/// `β'` 表, 下标为 Q (0..=63)
const BETA_TABLE: [i32; 64] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 20, 22, 24, //
    26, 28, 30, 32, 34, 36, 38, 40, 42, 44, 46, 48, 50, 52, 54, 56, //
    58, 60, 62, 64, 66, 68, 70, 72, 74, 76, 78, 80, 82, 84, 86, 88,
];

/// `tC'` 表, 下标为 Q (0..=65)
const TC_TABLE: [i32; 66] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    3, 4, 4, 4, 4, 5, 5, 5, 5, 7, 7, 8, 9, 10, 10, 11, //
    13, 14, 15, 17, 19, 21, 24, 25, 29, 33, 36, 41, 45, 51, 57, 64, //
    71, 80, 89, 100, 112, 125, 141, 157, 177, 198, 222, 250, 280, 314, 352, 395,
];

/// 水平边阶段列窗口的左移量 (亮度采样)
const HOR_WINDOW_SHIFT: usize = 8;

/// MV 差异门限 (1/16 像素)
const MV_THRESHOLD: i32 = 8;

/// 一条边上一个段的滤波参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeParams {
    pub bs: u8,
    pub len_p: usize,
    pub len_q: usize,
    pub qp_p: i32,
    pub qp_q: i32,
}

// ============================================================
// 阈值
// ============================================================

/// 由平均 QP 与边界强度求 `(β, tC)`
pub(crate) fn beta_tc(qp: i32, bs: u8, beta_offset_div2: i32, tc_offset_div2: i32, bit_depth: u32) -> (i32, i32) {
    let qb = (qp + (beta_offset_div2 << 1)).clamp(0, 63) as usize;
    let qt = (qp + 2 * (i32::from(bs) - 1) + (tc_offset_div2 << 1)).clamp(0, 65) as usize;
    let beta = BETA_TABLE[qb] * (1 << (bit_depth - 8));
    let tc_prime = TC_TABLE[qt];
    let tc = if bit_depth < 10 {
        (tc_prime + 2) >> (10 - bit_depth)
    } else {
        tc_prime * (1 << (bit_depth - 10))
    };
    (beta, tc)
}

// ============================================================
// 边界强度
// ============================================================

/// 一侧块的运动描述
#[derive(Debug, Clone, Copy)]
struct SideMotion {
    count: usize,
    refs: [i32; 2],
    mvs: [Mv; 2],
}

fn side_motion(t: &FrameTables, x4: usize, y4: usize) -> SideMotion {
    let flags = PredFlags::from_bits_truncate(t.pred_flags.get(x4, y4));
    let mut m = SideMotion {
        count: 0,
        refs: [0; 2],
        mvs: [Mv::default(); 2],
    };
    for list in 0..2 {
        let flag = if list == 0 { PredFlags::L0 } else { PredFlags::L1 };
        if flags.contains(flag) {
            m.refs[m.count] = t.ref_poc[list].get(x4, y4);
            m.mvs[m.count] = Mv::new(t.mv_x[list].get(x4, y4), t.mv_y[list].get(x4, y4));
            m.count += 1;
        }
    }
    m
}

/// 预测块边的运动强度: 参考图像或 MV 不同则为 1
fn motion_bs(p: &SideMotion, q: &SideMotion) -> u8 {
    if p.count != q.count {
        return 1;
    }
    match p.count {
        1 => u8::from(p.refs[0] != q.refs[0] || p.mvs[0].differs(q.mvs[0], MV_THRESHOLD)),
        2 => {
            let same_set = (p.refs[0] == q.refs[0] && p.refs[1] == q.refs[1])
                || (p.refs[0] == q.refs[1] && p.refs[1] == q.refs[0]);
            if !same_set {
                return 1;
            }
            let straight = !p.mvs[0].differs(q.mvs[0], MV_THRESHOLD) && !p.mvs[1].differs(q.mvs[1], MV_THRESHOLD);
            let cross = !p.mvs[0].differs(q.mvs[1], MV_THRESHOLD) && !p.mvs[1].differs(q.mvs[0], MV_THRESHOLD);
            if p.refs[0] != p.refs[1] {
                // 两个参考图像不同: 按参考图像配对
                let ok = if p.refs[0] == q.refs[0] { straight } else { cross };
                u8::from(!ok)
            } else {
                u8::from(!straight && !cross)
            }
        }
        _ => 0,
    }
}

/// 亮度边界强度
fn luma_bs(t: &FrameTables, p: (usize, usize), q: (usize, usize), tb_edge: bool, pred_edge: bool) -> u8 {
    let l = ChannelType::Luma as usize;
    let mode_p = PredMode::from_u8(t.pred_mode[l].get(p.0, p.1));
    let mode_q = PredMode::from_u8(t.pred_mode[l].get(q.0, q.1));
    if mode_p.is_intra() || mode_q.is_intra() || t.ciip.get(p.0, p.1) != 0 || t.ciip.get(q.0, q.1) != 0 {
        return 2;
    }
    if tb_edge && (t.coded[LUMA].get(p.0, p.1) != 0 || t.coded[LUMA].get(q.0, q.1) != 0) {
        return 1;
    }
    if !pred_edge {
        return 0;
    }
    let ibc_p = mode_p == PredMode::Ibc;
    let ibc_q = mode_q == PredMode::Ibc;
    if ibc_p != ibc_q {
        return 1;
    }
    let mp = side_motion(t, p.0, p.1);
    let mq = side_motion(t, q.0, q.1);
    if ibc_p {
        return u8::from(mp.mvs[0].differs(mq.mvs[0], MV_THRESHOLD));
    }
    motion_bs(&mp, &mq)
}

/// 色度边界强度 (按平面)
fn chroma_bs(t: &FrameTables, c_idx: usize, p: (usize, usize), q: (usize, usize), tb_edge: bool) -> u8 {
    let c = ChannelType::Chroma as usize;
    let intra_p = PredMode::from_u8(t.pred_mode[c].get(p.0, p.1)).is_intra();
    let intra_q = PredMode::from_u8(t.pred_mode[c].get(q.0, q.1)).is_intra();
    if intra_p || intra_q || t.ciip.get(p.0, p.1) != 0 || t.ciip.get(q.0, q.1) != 0 {
        return 2;
    }
    let coded = |pos: (usize, usize)| t.coded[c_idx].get(pos.0, pos.1) != 0 || t.joint_cbcr.get(pos.0, pos.1) != 0;
    u8::from(tb_edge && (coded(p) || coded(q)))
}

/// 边两侧是否允许跨越滤波
fn edge_filterable(fc: &FrameContext, p: (usize, usize), q: (usize, usize)) -> bool {
    let q_slice = fc.slice_index_at_sample(q.0, q.1);
    let Some(slice) = q_slice.and_then(|s| fc.slices.get(s)) else {
        return false;
    };
    if slice.header.deblocking_disabled {
        return false;
    }
    let pps = &fc.params.pps;
    if !pps.loop_filter_across_slices && fc.slice_index_at_sample(p.0, p.1) != q_slice {
        return false;
    }
    let log2 = fc.params.geometry.log2_ctb_size;
    pps.loop_filter_across_tiles
        || fc
            .params
            .geometry
            .same_tile((p.0 >> log2, p.1 >> log2), (q.0 >> log2, q.1 >> log2))
}

/// 推导一段边的参数, `q` 是边后第一个采样的亮度坐标; 不需要滤波时返回 `None`
pub(crate) fn edge_params(fc: &FrameContext, c_idx: usize, q: (usize, usize), vertical: bool) -> Option<EdgeParams> {
    let p = if vertical {
        (q.0.checked_sub(1)?, q.1)
    } else {
        (q.0, q.1.checked_sub(1)?)
    };
    let t = &fc.tables;
    let ch = if c_idx == LUMA {
        ChannelType::Luma
    } else {
        ChannelType::Chroma
    };
    let c = ch as usize;
    let q4 = FrameTables::at(q.0, q.1);
    let p4 = FrameTables::at(p.0, p.1);
    let (tb_start, cb_start) = if vertical {
        (t.tb_x[c].get(q4.0, q4.1) as usize, t.cb_x[c].get(q4.0, q4.1) as usize)
    } else {
        (t.tb_y[c].get(q4.0, q4.1) as usize, t.cb_y[c].get(q4.0, q4.1) as usize)
    };
    let along = if vertical { q.0 } else { q.1 };
    let tb_edge = tb_start == along;
    let cb_edge = cb_start == along;
    let sub_block_q = c_idx == LUMA && t.sub_block.get(q4.0, q4.1) != 0;
    let sub_edge = !cb_edge && sub_block_q && (along - cb_start) % 8 == 0;
    if !tb_edge && !cb_edge && !sub_edge {
        return None;
    }
    if !edge_filterable(fc, p, q) {
        return None;
    }

    let bs = if c_idx == LUMA {
        luma_bs(t, p4, q4, tb_edge, cb_edge || sub_edge)
    } else {
        chroma_bs(t, c_idx, p4, q4, tb_edge)
    };
    if bs == 0 {
        return None;
    }

    let size_across = |pos: (usize, usize)| -> usize {
        if vertical {
            usize::from(t.tb_w[c].get(pos.0, pos.1))
        } else {
            usize::from(t.tb_h[c].get(pos.0, pos.1))
        }
    };
    let ctb_boundary = !vertical && q.1 % fc.params.geometry.ctb_size == 0;
    let (len_p, len_q) = if c_idx == LUMA {
        let len = |size: usize| match size {
            0..=4 => 1,
            32.. => 7,
            _ => 3,
        };
        let (mut lp, mut lq) = (len(size_across(p4)), len(size_across(q4)));
        if sub_edge {
            lp = 3;
            lq = 3;
        } else {
            if sub_block_q {
                lq = lq.min(5);
            }
            if t.sub_block.get(p4.0, p4.1) != 0 {
                lp = lp.min(5);
            }
        }
        if ctb_boundary {
            lp = lp.min(3);
        }
        (lp, lq)
    } else {
        let fmt = fc.params.sps.chroma_format;
        let shift = if vertical { fmt.shift_x() } else { fmt.shift_y() };
        let both_large = (size_across(p4) >> shift) >= 8 && (size_across(q4) >> shift) >= 8;
        let l = if both_large { 3 } else { 1 };
        (if ctb_boundary { 1 } else { l }, l)
    };

    Some(EdgeParams {
        bs,
        len_p,
        len_q,
        qp_p: i32::from(t.qp[c].get(p4.0, p4.1)),
        qp_q: i32::from(t.qp[c].get(q4.0, q4.1)),
    })
}

// ============================================================
// 采样访问
// ============================================================

/// 一个边段: 最多 4 行, 每行两侧各 8 个采样
struct Segment {
    p: [[i32; 8]; 4],
    q: [[i32; 8]; 4],
    lines: usize,
}

/// 第 `k` 行中边某侧第 `i` 个采样的坐标
fn sample_pos(x: usize, y: usize, vertical: bool, k: usize, p_side: bool, i: usize) -> Option<(usize, usize)> {
    let (along, across) = if vertical { (y + k, x) } else { (x + k, y) };
    let across = if p_side { across.checked_sub(i + 1)? } else { across + i };
    Some(if vertical { (across, along) } else { (along, across) })
}

impl Segment {
    fn load(plane: &Plane, x: usize, y: usize, vertical: bool, lines: usize) -> Self {
        let mut seg = Self {
            p: [[0; 8]; 4],
            q: [[0; 8]; 4],
            lines,
        };
        for k in 0..lines {
            for i in 0..8 {
                // 图像外的采样钳位到边缘, 只参与判决不会被写回
                let (px, py) = sample_pos(x, y, vertical, k, true, i).unwrap_or_else(|| {
                    if vertical { (0, y + k) } else { (x + k, 0) }
                });
                seg.p[k][i] = i32::from(plane.get(px, py));
                if let Some((qx, qy)) = sample_pos(x, y, vertical, k, false, i) {
                    seg.q[k][i] = i32::from(plane.get(qx, qy));
                }
            }
        }
        seg
    }

    /// 只写回变化的采样
    fn store(&self, orig: &Segment, plane: &Plane, x: usize, y: usize, vertical: bool) {
        for k in 0..self.lines {
            for i in 0..8 {
                if self.p[k][i] != orig.p[k][i]
                    && let Some((px, py)) = sample_pos(x, y, vertical, k, true, i)
                {
                    plane.set(px, py, self.p[k][i] as u16);
                }
                if self.q[k][i] != orig.q[k][i]
                    && let Some((qx, qy)) = sample_pos(x, y, vertical, k, false, i)
                {
                    plane.set(qx, qy, self.q[k][i] as u16);
                }
            }
        }
    }
}

// ============================================================
// 亮度滤波
// ============================================================

fn clip(v: i32, center: i32, range: i32) -> i32 {
    v.clamp(center - range, center + range)
}

/// 长抽头滤波 (一侧或两侧长度 5/7)
fn luma_long_filter(p: &mut [i32; 8], q: &mut [i32; 8], len_p: usize, len_q: usize, tc: i32) {
    let (op, oq) = (*p, *q);
    let ref_middle = match (len_p, len_q) {
        (5, 5) | (5, 7) | (7, 5) => {
            (op[4] + op[3] + 2 * (op[2] + op[1] + op[0] + oq[0] + oq[1] + oq[2]) + oq[3] + oq[4] + 8) >> 4
        }
        (7, 7) => {
            (2 * (op[0] + oq[0])
                + op[1]
                + oq[1]
                + op[2]
                + oq[2]
                + op[3]
                + oq[3]
                + op[4]
                + oq[4]
                + op[5]
                + oq[5]
                + op[6]
                + oq[6]
                + 8)
                >> 4
        }
        (3, 5) | (5, 3) => (op[3] + op[2] + op[1] + op[0] + oq[0] + oq[1] + oq[2] + oq[3] + 4) >> 3,
        (3, 7) => {
            (2 * (op[2] + op[1] + op[0] + oq[0]) + op[0] + op[1] + oq[1] + oq[2] + oq[3] + oq[4] + oq[5] + oq[6] + 8)
                >> 4
        }
        _ => {
            (op[6] + op[5] + op[4] + op[3] + op[2] + op[1] + 2 * (oq[2] + oq[1] + oq[0] + op[0]) + oq[0] + oq[1] + 8)
                >> 4
        }
    };
    let taps = |len: usize| -> (&'static [i32], &'static [i32]) {
        match len {
            7 => (&[59, 50, 41, 32, 23, 14, 5], &[6, 5, 4, 3, 2, 1, 1]),
            5 => (&[58, 45, 32, 19, 6], &[6, 5, 4, 3, 2]),
            _ => (&[53, 32, 11], &[6, 4, 2]),
        }
    };
    let ref_p = (op[len_p] + op[len_p - 1] + 1) >> 1;
    let ref_q = (oq[len_q] + oq[len_q - 1] + 1) >> 1;
    let (fp, tp) = taps(len_p);
    for i in 0..len_p {
        let v = (ref_middle * fp[i] + ref_p * (64 - fp[i]) + 32) >> 6;
        p[i] = clip(v, op[i], (tc * tp[i]) >> 1);
    }
    let (fq, tq) = taps(len_q);
    for i in 0..len_q {
        let v = (ref_middle * fq[i] + ref_q * (64 - fq[i]) + 32) >> 6;
        q[i] = clip(v, oq[i], (tc * tq[i]) >> 1);
    }
}

/// 强滤波 (每侧 3 个采样)
fn luma_strong_filter(p: &mut [i32; 8], q: &mut [i32; 8], tc: i32) {
    let (op, oq) = (*p, *q);
    p[0] = clip((op[2] + 2 * op[1] + 2 * op[0] + 2 * oq[0] + oq[1] + 4) >> 3, op[0], 3 * tc);
    p[1] = clip((op[2] + op[1] + op[0] + oq[0] + 2) >> 2, op[1], 2 * tc);
    p[2] = clip((2 * op[3] + 3 * op[2] + op[1] + op[0] + oq[0] + 4) >> 3, op[2], tc);
    q[0] = clip((op[1] + 2 * op[0] + 2 * oq[0] + 2 * oq[1] + oq[2] + 4) >> 3, oq[0], 3 * tc);
    q[1] = clip((op[0] + oq[0] + oq[1] + oq[2] + 2) >> 2, oq[1], 2 * tc);
    q[2] = clip((op[0] + oq[0] + oq[1] + 3 * oq[2] + 2 * oq[3] + 4) >> 3, oq[2], tc);
}

/// 弱滤波
fn luma_weak_filter(p: &mut [i32; 8], q: &mut [i32; 8], tc: i32, nd_p: bool, nd_q: bool, max: i32) {
    let (op, oq) = (*p, *q);
    let delta = (9 * (oq[0] - op[0]) - 3 * (oq[1] - op[1]) + 8) >> 4;
    if delta.abs() >= tc * 10 {
        return;
    }
    let delta = delta.clamp(-tc, tc);
    p[0] = (op[0] + delta).clamp(0, max);
    q[0] = (oq[0] - delta).clamp(0, max);
    let half = tc >> 1;
    if nd_p {
        let dp = ((((op[2] + op[0] + 1) >> 1) - op[1] + delta) >> 1).clamp(-half, half);
        p[1] = (op[1] + dp).clamp(0, max);
    }
    if nd_q {
        let dq = ((((oq[2] + oq[0] + 1) >> 1) - oq[1] - delta) >> 1).clamp(-half, half);
        q[1] = (oq[1] + dq).clamp(0, max);
    }
}

/// 4 行亮度边段的判决与滤波
fn filter_luma_segment(seg: &mut Segment, beta: i32, tc: i32, len_p: usize, len_q: usize, max: i32) {
    let last = seg.lines - 1;
    let d2 = |s: &[i32; 8], a: usize| (s[a + 2] - 2 * s[a + 1] + s[a]).abs();
    let dp0 = d2(&seg.p[0], 0);
    let dq0 = d2(&seg.q[0], 0);
    let dp3 = d2(&seg.p[last], 0);
    let dq3 = d2(&seg.q[last], 0);
    let tc25 = (tc * 5 + 1) >> 1;

    let large_p = len_p > 3;
    let large_q = len_q > 3;
    if large_p || large_q {
        let widen = |d: i32, s: &[i32; 8], large: bool| if large { (d + d2(s, 3) + 1) >> 1 } else { d };
        let dp0l = widen(dp0, &seg.p[0], large_p);
        let dq0l = widen(dq0, &seg.q[0], large_q);
        let dp3l = widen(dp3, &seg.p[last], large_p);
        let dq3l = widen(dq3, &seg.q[last], large_q);
        let d0l = dp0l + dq0l;
        let d3l = dp3l + dq3l;
        let mlp = if large_p { len_p } else { 3 };
        let mlq = if large_q { len_q } else { 3 };
        if d0l + d3l < beta {
            let side = |s: &[i32; 8], ml: usize, large: bool| {
                let mut v = (s[3] - s[0]).abs();
                if ml == 7 {
                    v += (s[7] - s[6] - s[5] + s[4]).abs();
                }
                if large { (v + (s[3] - s[ml]).abs() + 1) >> 1 } else { v }
            };
            let strong_line = |k: usize, dl: i32| {
                2 * dl < (beta >> 4)
                    && side(&seg.p[k], mlp, large_p) + side(&seg.q[k], mlq, large_q) < ((beta * 3) >> 5)
                    && (seg.p[k][0] - seg.q[k][0]).abs() < tc25
            };
            if strong_line(0, d0l) && strong_line(last, d3l) {
                for k in 0..seg.lines {
                    let (p, q) = (&mut seg.p[k], &mut seg.q[k]);
                    luma_long_filter(p, q, mlp, mlq, tc);
                }
                return;
            }
        }
    }

    let d0 = dp0 + dq0;
    let d3 = dp3 + dq3;
    if d0 + d3 >= beta {
        return;
    }
    let strong_line = |k: usize, d: i32| {
        let (p, q) = (&seg.p[k], &seg.q[k]);
        (p[3] - p[0]).abs() + (q[3] - q[0]).abs() < (beta >> 3)
            && (p[0] - q[0]).abs() < tc25
            && 2 * d < (beta >> 2)
    };
    if len_p > 2 && len_q > 2 && strong_line(0, d0) && strong_line(last, d3) {
        for k in 0..seg.lines {
            let (p, q) = (&mut seg.p[k], &mut seg.q[k]);
            luma_strong_filter(p, q, tc);
        }
        return;
    }
    let side_thr = (beta + (beta >> 1)) >> 3;
    let nd_p = len_p > 1 && len_q > 1 && dp0 + dp3 < side_thr;
    let nd_q = len_p > 1 && len_q > 1 && dq0 + dq3 < side_thr;
    for k in 0..seg.lines {
        let (p, q) = (&mut seg.p[k], &mut seg.q[k]);
        luma_weak_filter(p, q, tc, nd_p, nd_q, max);
    }
}

// ============================================================
// 色度滤波
// ============================================================

fn chroma_strong_filter(p: &mut [i32; 8], q: &mut [i32; 8], tc: i32, p_len1: bool) {
    let (op, oq) = (*p, *q);
    if p_len1 {
        // 水平 CTU 边界: P 侧只有一行可用
        p[0] = clip((3 * op[1] + 2 * op[0] + oq[0] + oq[1] + oq[2] + 4) >> 3, op[0], tc);
        q[0] = clip((2 * op[1] + op[0] + 2 * oq[0] + oq[1] + oq[2] + oq[3] + 4) >> 3, oq[0], tc);
        q[1] = clip((op[1] + op[0] + oq[0] + 2 * oq[1] + oq[2] + 2 * oq[3] + 4) >> 3, oq[1], tc);
        q[2] = clip((op[0] + oq[0] + oq[1] + 2 * oq[2] + 3 * oq[3] + 4) >> 3, oq[2], tc);
        return;
    }
    p[0] = clip((op[3] + op[2] + op[1] + 2 * op[0] + oq[0] + oq[1] + oq[2] + 4) >> 3, op[0], tc);
    p[1] = clip((2 * op[3] + op[2] + 2 * op[1] + op[0] + oq[0] + oq[1] + 4) >> 3, op[1], tc);
    p[2] = clip((3 * op[3] + 2 * op[2] + op[1] + op[0] + oq[0] + 4) >> 3, op[2], tc);
    q[0] = clip((op[2] + op[1] + op[0] + 2 * oq[0] + oq[1] + oq[2] + oq[3] + 4) >> 3, oq[0], tc);
    q[1] = clip((op[1] + op[0] + oq[0] + 2 * oq[1] + oq[2] + 2 * oq[3] + 4) >> 3, oq[1], tc);
    q[2] = clip((op[0] + oq[0] + oq[1] + 2 * oq[2] + 3 * oq[3] + 4) >> 3, oq[2], tc);
}

fn chroma_weak_filter(p: &mut [i32; 8], q: &mut [i32; 8], tc: i32, max: i32) {
    let delta = ((((q[0] - p[0]) << 2) + p[1] - q[1] + 4) >> 3).clamp(-tc, tc);
    p[0] = (p[0] + delta).clamp(0, max);
    q[0] = (q[0] - delta).clamp(0, max);
}

fn filter_chroma_segment(seg: &mut Segment, beta: i32, tc: i32, len_p: usize, len_q: usize, max: i32) {
    let last = seg.lines - 1;
    let p_len1 = len_p == 1;
    let strong = len_q == 3 && {
        // P 侧长度为 1 时用 p1 代替更远的采样
        let far = |s: &[i32; 8], i: usize| if p_len1 { s[i.min(1)] } else { s[i] };
        let dp = |k: usize| (far(&seg.p[k], 2) - 2 * seg.p[k][1] + seg.p[k][0]).abs();
        let dq = |k: usize| (seg.q[k][2] - 2 * seg.q[k][1] + seg.q[k][0]).abs();
        let dpq0 = dp(0) + dq(0);
        let dpq1 = dp(last) + dq(last);
        let tc25 = (tc * 5 + 1) >> 1;
        let line_ok = |k: usize, dpq: i32| {
            2 * dpq < (beta >> 2)
                && (far(&seg.p[k], 3) - seg.p[k][0]).abs() + (seg.q[k][0] - seg.q[k][3]).abs() < (beta >> 3)
                && (seg.p[k][0] - seg.q[k][0]).abs() < tc25
        };
        dpq0 + dpq1 < beta && line_ok(0, dpq0) && line_ok(last, dpq1)
    };
    for k in 0..seg.lines {
        let (p, q) = (&mut seg.p[k], &mut seg.q[k]);
        if strong {
            chroma_strong_filter(p, q, tc, p_len1);
        } else {
            chroma_weak_filter(p, q, tc, max);
        }
    }
}

// ============================================================
// CTU 级入口
// ============================================================

/// 亮度区域 (CTU 或平移后的窗口) 内一个方向的全部边
fn deblock_edges(fc: &FrameContext, vertical: bool, xr: Range<usize>, yr: Range<usize>) -> VvResult<()> {
    let sps = &fc.params.sps;
    let max = (1i32 << sps.bit_depth) - 1;
    let pps = &fc.params.pps;

    // 亮度: 4 采样网格, 每段 4 行
    let plane = fc.pic.plane(LUMA)?;
    let step_across = 4;
    let (across, along) = if vertical { (xr.clone(), yr.clone()) } else { (yr.clone(), xr.clone()) };
    for e in across.clone().filter(|e| e % step_across == 0 && *e > 0) {
        for a in along.clone().step_by(4) {
            let (x, y) = if vertical { (e, a) } else { (a, e) };
            let Some(ep) = edge_params(fc, LUMA, (x, y), vertical) else {
                continue;
            };
            let slice = fc.slice_at(x >> fc.params.geometry.log2_ctb_size, y >> fc.params.geometry.log2_ctb_size);
            let offs = slice.map(|s| s.header.deblock[LUMA]).unwrap_or_default();
            let qp = (ep.qp_q + ep.qp_p + 1) >> 1;
            let (beta, tc) = beta_tc(qp, ep.bs, offs.beta_offset_div2, offs.tc_offset_div2, sps.bit_depth);
            let lines = 4.min(along.end - a);
            let orig = Segment::load(plane, x, y, vertical, lines);
            let mut seg = Segment::load(plane, x, y, vertical, lines);
            filter_luma_segment(&mut seg, beta, tc, ep.len_p, ep.len_q, max);
            seg.store(&orig, plane, x, y, vertical);
        }
    }

    // 色度: 8 色度采样网格, 每段 4 行
    if !sps.chroma_format.has_chroma() {
        return Ok(());
    }
    let (sx, sy) = (sps.chroma_format.shift_x(), sps.chroma_format.shift_y());
    let (s_across, s_along) = if vertical { (sx, sy) } else { (sy, sx) };
    let c_across = (across.start >> s_across)..(across.end >> s_across);
    let c_along = (along.start >> s_along)..(along.end >> s_along);
    for c_idx in CB..=CB + 1 {
        let plane = fc.pic.plane(c_idx)?;
        let pic_offset = if c_idx == CB { pps.cb_qp_offset } else { pps.cr_qp_offset };
        for e in c_across.clone().filter(|e| e % 8 == 0 && *e > 0) {
            for a in c_along.clone().step_by(4) {
                let (cx, cy) = if vertical { (e, a) } else { (a, e) };
                let q_luma = (cx << sx, cy << sy);
                let Some(ep) = edge_params(fc, c_idx, q_luma, vertical) else {
                    continue;
                };
                let log2 = fc.params.geometry.log2_ctb_size;
                let slice = fc.slice_at(q_luma.0 >> log2, q_luma.1 >> log2);
                let offs = slice.map(|s| s.header.deblock[c_idx]).unwrap_or_default();
                let qpi = ((ep.qp_q + ep.qp_p + 1) >> 1) + pic_offset;
                let qpc = fc.params.map_chroma_qp(c_idx - 1, qpi);
                let (beta, tc) = beta_tc(qpc, ep.bs, offs.beta_offset_div2, offs.tc_offset_div2, sps.bit_depth);
                let lines = 4.min(c_along.end - a);
                let orig = Segment::load(plane, cx, cy, vertical, lines);
                let mut seg = Segment::load(plane, cx, cy, vertical, lines);
                filter_chroma_segment(&mut seg, beta, tc, ep.len_p, ep.len_q, max);
                seg.store(&orig, plane, cx, cy, vertical);
            }
        }
    }
    Ok(())
}

/// CTU 亮度矩形 (已裁剪到图像内)
fn ctu_rect(fc: &FrameContext, rx: usize, ry: usize) -> (Range<usize>, Range<usize>) {
    let geo = &fc.params.geometry;
    let sps = &fc.params.sps;
    let x0 = rx << geo.log2_ctb_size;
    let y0 = ry << geo.log2_ctb_size;
    (
        x0..(x0 + geo.ctb_size).min(sps.width),
        y0..(y0 + geo.ctb_size).min(sps.height),
    )
}

/// 垂直边去块
pub fn deblock_vertical(fc: &FrameContext, rx: usize, ry: usize) -> VvResult<()> {
    if fc.config.disable_deblock {
        return Ok(());
    }
    let (xr, yr) = ctu_rect(fc, rx, ry);
    deblock_edges(fc, true, xr, yr)?;
    trace!("VVC: DEBLOCK_V CTU ({rx},{ry}) 完成");
    Ok(())
}

/// 水平边去块, 列窗口左移 8 个亮度采样
pub fn deblock_horizontal(fc: &FrameContext, rx: usize, ry: usize) -> VvResult<()> {
    if fc.config.disable_deblock {
        return Ok(());
    }
    let (xr, yr) = ctu_rect(fc, rx, ry);
    let last_col = rx + 1 == fc.params.geometry.ctb_width;
    let start = xr.start.saturating_sub(HOR_WINDOW_SHIFT);
    let end = if last_col {
        xr.end
    } else {
        xr.end.saturating_sub(HOR_WINDOW_SHIFT)
    };
    deblock_edges(fc, false, start..end, yr)?;
    trace!("VVC: DEBLOCK_H CTU ({rx},{ry}) 完成");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        BETA_TABLE, SideMotion, TC_TABLE, beta_tc, chroma_weak_filter, luma_strong_filter, luma_weak_filter,
        motion_bs,
    };
    use crate::decoders::vvc::cu::Mv;

    fn uni(r: i32, x: i32, y: i32) -> SideMotion {
        SideMotion {
            count: 1,
            refs: [r, 0],
            mvs: [Mv::new(x, y), Mv::default()],
        }
    }

    fn bi(r0: i32, r1: i32, a: Mv, b: Mv) -> SideMotion {
        SideMotion {
            count: 2,
            refs: [r0, r1],
            mvs: [a, b],
        }
    }

    #[test]
    fn test_tables_monotonic() {
        assert!(BETA_TABLE.windows(2).all(|w| w[0] <= w[1]));
        assert!(TC_TABLE.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(BETA_TABLE[63], 88);
        assert_eq!(TC_TABLE[65], 395);
    }

    #[test]
    fn test_beta_tc_bit_depth_scaling() {
        let (b8, t8) = beta_tc(37, 2, 0, 0, 8);
        let (b10, t10) = beta_tc(37, 2, 0, 0, 10);
        assert_eq!(b10, b8 * 4, "β 随位深按 2^(bd-8) 缩放");
        assert_eq!(t10, TC_TABLE[39]);
        assert_eq!(t8, (TC_TABLE[39] + 2) >> 2);
        let (b_off, _) = beta_tc(37, 1, 2, 0, 10);
        assert_eq!(b_off, BETA_TABLE[41] * 4, "beta_offset_div2 按 2 倍生效");
    }

    #[test]
    fn test_motion_bs_rules() {
        assert_eq!(motion_bs(&uni(1, 0, 0), &uni(1, 7, -7)), 0, "差值小于 8 不滤波");
        assert_eq!(motion_bs(&uni(1, 0, 0), &uni(1, 8, 0)), 1);
        assert_eq!(motion_bs(&uni(1, 0, 0), &uni(2, 0, 0)), 1, "参考图像不同");
        let a = Mv::new(0, 0);
        let b = Mv::new(32, 0);
        assert_eq!(motion_bs(&bi(1, 2, a, b), &bi(2, 1, b, a)), 0, "按参考图像配对后一致");
        assert_eq!(motion_bs(&bi(1, 1, a, b), &bi(1, 1, b, a)), 0, "同一参考时交叉配对一致");
        assert_eq!(motion_bs(&bi(1, 1, a, b), &bi(1, 1, b, b)), 1);
        assert_eq!(motion_bs(&uni(1, 0, 0), &bi(1, 1, a, a)), 1, "MV 个数不同");
    }

    #[test]
    fn test_weak_filter_smooths_step() {
        let mut p = [100; 8];
        let mut q = [110; 8];
        luma_weak_filter(&mut p, &mut q, 4, false, false, 1023);
        assert_eq!(p[0], 104, "增量被 tC 限制");
        assert_eq!(q[0], 106);
        assert_eq!(p[1], 100, "未启用 p1 修正");
    }

    #[test]
    fn test_strong_filter_flat_is_identity() {
        let mut p = [200; 8];
        let mut q = [200; 8];
        luma_strong_filter(&mut p, &mut q, 10);
        assert_eq!(p, [200; 8]);
        assert_eq!(q, [200; 8]);
        let mut cp = [50; 8];
        let mut cq = [50; 8];
        chroma_weak_filter(&mut cp, &mut cq, 3, 255);
        assert_eq!((cp[0], cq[0]), (50, 50));
    }
}

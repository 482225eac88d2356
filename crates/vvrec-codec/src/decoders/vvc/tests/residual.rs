use super::frame_params;
use crate::decoders::vvc::common::{INTRA_PLANAR, INTRA_VERT, PredMode, TreeType, diag_scan};
use crate::decoders::vvc::cu::{CodingUnit, IntraInfo, TransformBlock, TransformUnit};
use crate::decoders::vvc::dequant::{ScanWindow, apply_lfnst, reconstruct_residual};
use crate::decoders::vvc::lfnst::{LfnstGroup, kernel};
use crate::decoders::vvc::params::{SliceHeader, Sps};

fn intra_cu(size: usize, lfnst_idx: u8) -> CodingUnit {
    CodingUnit {
        width: size,
        height: size,
        tree: TreeType::Single,
        pred_mode: PredMode::Intra,
        qp: [32, 32, 32, 32],
        intra: IntraInfo {
            luma_mode: INTRA_PLANAR,
            ..IntraInfo::default()
        },
        lfnst_idx,
        ..CodingUnit::default()
    }
}

fn luma_tb(log2: u32, max_scan_x: usize, max_scan_y: usize) -> TransformBlock {
    TransformBlock {
        c_idx: 0,
        log2_w: log2,
        log2_h: log2,
        max_scan_x,
        max_scan_y,
        qp: 32,
        has_coeffs: true,
        ..TransformBlock::default()
    }
}

fn lfnst_sps() -> Sps {
    Sps {
        lfnst_enabled: true,
        ..Sps::default()
    }
}

#[test]
fn test_lfnst_widens_scan_window_for_8x8() {
    let fp = frame_params(lfnst_sps());
    let sh = SliceHeader::default();
    let cu = intra_cu(8, 1);
    let tu = TransformUnit {
        width: 8,
        height: 8,
        ..TransformUnit::default()
    };
    let tb = luma_tb(3, 1, 0);
    let mut coeffs = vec![0i32; 64];
    coeffs[0] = 10;
    coeffs[1] = -4;
    let window = match reconstruct_residual(&tb, &tu, &cu, &fp, &sh, &mut coeffs) {
        Ok(w) => w,
        Err(err) => panic!("残差重建失败: {err}"),
    };
    assert_eq!(
        window,
        ScanWindow {
            max_scan_x: 7,
            max_scan_y: 7
        },
        "8x8 块 LFNST 后扫描窗口扩展到 7"
    );
    assert!(coeffs.iter().any(|&r| r != 0), "非零系数应产生残差");
}

/// 直接矩阵乘得到的 LFNST 输出, 按散射位置写成 `size x size` 数组
fn expected_lfnst(input: &[i32], group: LfnstGroup, set: usize, idx: usize, transposed: bool) -> Vec<i32> {
    let (size, out_size) = match group {
        LfnstGroup::Small => (4, 16),
        LfnstGroup::Large => (8, 48),
    };
    let k = kernel(group, set, idx);
    let mut block = vec![0i32; size * size];
    for j in 0..out_size {
        let sum: i64 = input
            .iter()
            .enumerate()
            .map(|(i, &c)| i64::from(k[i * out_size + j]) * i64::from(c))
            .sum();
        let v = ((sum + 64) >> 7).clamp(-(1 << 15), (1 << 15) - 1) as i32;
        let (x, y) = if size == 8 && j >= 32 {
            ((j - 32) % 4, 4 + (j - 32) / 4)
        } else {
            (j % size, j / size)
        };
        let (x, y) = if transposed { (y, x) } else { (x, y) };
        block[y * size + x] = v;
    }
    block
}

/// 按对角扫描顺序把输入放进 `size x size` 系数块左上 4x4
fn place_in_scan_order(input: &[i32], size: usize) -> Vec<i32> {
    let mut coeffs = vec![0i32; size * size];
    for (&v, (x, y)) in input.iter().zip(diag_scan(4, 4)) {
        coeffs[y * size + x] = v;
    }
    coeffs
}

#[test]
fn test_lfnst_8x8_matches_direct_product() {
    let input = [10, -4, 6, 0, 3, 0, -2, 1];
    let tb = luma_tb(3, 2, 2);
    for (mode, set, transposed) in [(INTRA_PLANAR, 0usize, false), (INTRA_VERT, 2, true)] {
        for idx in 1..=2u8 {
            let mut cu = intra_cu(8, idx);
            cu.intra.luma_mode = mode;
            let mut coeffs = place_in_scan_order(&input, 8);
            let window = apply_lfnst(&mut coeffs, &tb, &cu, 15);
            assert_eq!(window.max_scan_x, 7);
            let expected = expected_lfnst(&input, LfnstGroup::Large, set, usize::from(idx), transposed);
            assert_eq!(coeffs, expected, "mode={mode} idx={idx} 输出与矩阵乘不一致");
            for y in 4..8 {
                for x in 4..8 {
                    assert_eq!(coeffs[y * 8 + x], 0, "右下 4x4 应保持为 0");
                }
            }
        }
    }
}

#[test]
fn test_lfnst_4x4_matches_direct_product() {
    let input = [20, -8, 0, 0, 0, 0, 0, 0];
    let tb = luma_tb(2, 1, 1);
    let cu = intra_cu(4, 2);
    let mut coeffs = place_in_scan_order(&input, 4);
    apply_lfnst(&mut coeffs, &tb, &cu, 15);
    assert_eq!(coeffs, expected_lfnst(&input, LfnstGroup::Small, 0, 2, false));
    // 119 * 20 + (-27) * (-8) = 2596, (2596 + 64) >> 7 = 20
    assert_eq!(coeffs[0], 20);

    let mut vertical = intra_cu(4, 2);
    vertical.intra.luma_mode = INTRA_VERT;
    let mut coeffs = place_in_scan_order(&input, 4);
    apply_lfnst(&mut coeffs, &tb, &vertical, 15);
    let expected = expected_lfnst(&input, LfnstGroup::Small, 2, 2, true);
    assert_eq!(coeffs, expected, "垂直类模式按转置位置散射");
    let straight = expected_lfnst(&input, LfnstGroup::Small, 2, 2, false);
    assert_eq!(coeffs[1], straight[4], "转置后 (1,0) 取自未转置的 (0,1)");
}

#[test]
fn test_lfnst_widens_scan_window_for_4x4() {
    let fp = frame_params(lfnst_sps());
    let sh = SliceHeader::default();
    let cu = intra_cu(4, 2);
    let tu = TransformUnit {
        width: 4,
        height: 4,
        ..TransformUnit::default()
    };
    let tb = luma_tb(2, 0, 0);
    let mut coeffs = vec![0i32; 16];
    coeffs[0] = 20;
    let window = match reconstruct_residual(&tb, &tu, &cu, &fp, &sh, &mut coeffs) {
        Ok(w) => w,
        Err(err) => panic!("残差重建失败: {err}"),
    };
    assert_eq!(window.max_scan_x, 3);
    assert_eq!(window.max_scan_y, 3);
}

#[test]
fn test_without_lfnst_window_is_unchanged() {
    let fp = frame_params(Sps::default());
    let sh = SliceHeader::default();
    let cu = intra_cu(8, 0);
    let tu = TransformUnit {
        width: 8,
        height: 8,
        ..TransformUnit::default()
    };
    let tb = luma_tb(3, 1, 0);
    let mut coeffs = vec![0i32; 64];
    coeffs[0] = 10;
    coeffs[1] = -4;
    let window = match reconstruct_residual(&tb, &tu, &cu, &fp, &sh, &mut coeffs) {
        Ok(w) => w,
        Err(err) => panic!("残差重建失败: {err}"),
    };
    assert_eq!(
        window,
        ScanWindow {
            max_scan_x: 1,
            max_scan_y: 0
        }
    );
}

#[test]
fn test_uncoded_block_yields_zero_residual() {
    let fp = frame_params(Sps::default());
    let sh = SliceHeader::default();
    let cu = intra_cu(8, 0);
    let tu = TransformUnit::default();
    let tb = TransformBlock {
        has_coeffs: false,
        ..luma_tb(3, 0, 0)
    };
    // 残留的旧数据必须被清零
    let mut coeffs = vec![7i32; 64];
    if let Err(err) = reconstruct_residual(&tb, &tu, &cu, &fp, &sh, &mut coeffs) {
        panic!("残差重建失败: {err}");
    }
    assert!(coeffs.iter().all(|&r| r == 0), "未编码块残差应全为 0");
}

#[test]
fn test_short_coefficient_buffer_is_rejected() {
    let fp = frame_params(Sps::default());
    let sh = SliceHeader::default();
    let cu = intra_cu(8, 0);
    let tu = TransformUnit::default();
    let tb = luma_tb(3, 0, 0);
    let mut coeffs = vec![0i32; 16];
    assert!(
        reconstruct_residual(&tb, &tu, &cu, &fp, &sh, &mut coeffs).is_err(),
        "系数长度不足时应报错"
    );
}

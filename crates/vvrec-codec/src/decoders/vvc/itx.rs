//! VVC 一维反变换核.
//!
//! - DCT-II: 尺寸 2~64, 部分蝶形分解 (偶数半部递归, 奇数半部查矩阵行).
//! - DST-VII / DCT-VIII: 尺寸 4~32, 直接矩阵乘.
//!
//! 变换矩阵由标准的整数余弦/正弦基表生成, 首次使用时构建并缓存.
//! 所有核与直接矩阵乘 `out[n] = Σ_k M[k][n] * in[k]` 逐位一致.

use std::sync::OnceLock;

use super::common::TxType;

// ============================================================
// 基表
// ============================================================

/// 64 点 DCT-II 奇数角度 (以 pi/128 为单位, j = 1, 3, 5, ..., 63)
const COS_ODD_1: [i32; 32] = [
    91, 90, 90, 90, 88, 87, 86, 84, 83, 81, 79, 77, 73, 71, 69, 65, 62, 59, 56, 52, 48, 44, 41,
    37, 33, 28, 24, 20, 15, 11, 7, 2,
];
/// j = 2, 6, 10, ..., 62
const COS_ODD_2: [i32; 16] = [90, 90, 88, 85, 82, 78, 73, 67, 61, 54, 46, 38, 31, 22, 13, 4];
/// j = 4, 12, 20, ..., 60
const COS_ODD_4: [i32; 8] = [90, 87, 80, 70, 57, 43, 25, 9];
/// j = 8, 24, 40, 56
const COS_ODD_8: [i32; 4] = [89, 75, 50, 18];
/// j = 16, 48
const COS_ODD_16: [i32; 2] = [83, 36];

/// DST-VII 正弦基表, `sin(pi * m / (2N + 1))`, m = 1..N
const SIN_4: [i32; 4] = [29, 55, 74, 84];
const SIN_8: [i32; 8] = [17, 32, 46, 60, 71, 78, 85, 86];
const SIN_16: [i32; 16] = [8, 17, 25, 33, 40, 48, 55, 62, 68, 73, 77, 81, 85, 87, 88, 88];
const SIN_32: [i32; 32] = [
    4, 9, 13, 17, 21, 26, 30, 34, 38, 42, 46, 50, 53, 56, 60, 63, 66, 68, 72, 74, 77, 78, 80, 82,
    84, 85, 86, 87, 88, 89, 90, 90,
];

/// 角度 `j * pi / 128` (0 <= j <= 64) 的整数余弦
fn cos_table(j: usize) -> i32 {
    match j {
        0 | 32 => 64,
        64 => 0,
        _ => {
            let tz = j.trailing_zeros();
            let idx = j >> (tz + 1);
            match tz {
                0 => COS_ODD_1[idx],
                1 => COS_ODD_2[idx],
                2 => COS_ODD_4[idx],
                3 => COS_ODD_8[idx],
                _ => COS_ODD_16[idx],
            }
        }
    }
}

/// 64 点 DCT-II 矩阵元素 `M64[k][n]`
fn dct2_64_entry(k: usize, n: usize) -> i32 {
    let mut a = (k * (2 * n + 1)) % 256;
    if a > 128 {
        a = 256 - a;
    }
    if a > 64 { -cos_table(128 - a) } else { cos_table(a) }
}

/// DST-VII 矩阵元素
fn dst7_entry(size: usize, sin: &[i32], k: usize, n: usize) -> i32 {
    let l = 2 * size + 1;
    let mut m = ((2 * k + 1) * (n + 1)) % (2 * l);
    let mut negate = false;
    if m >= l {
        negate = true;
        m -= l;
    }
    if m > size {
        m = l - m;
    }
    let v = if m == 0 { 0 } else { sin[m - 1] };
    if negate { -v } else { v }
}

/// 缓存的变换矩阵 (行优先, `size * size`)
struct TxMatrices {
    dct2: [Vec<i32>; 6],
    dst7: [Vec<i32>; 4],
    dct8: [Vec<i32>; 4],
}

fn matrices() -> &'static TxMatrices {
    static MATRICES: OnceLock<TxMatrices> = OnceLock::new();
    MATRICES.get_or_init(|| {
        let dct2 = std::array::from_fn(|i| {
            let size = 2usize << i;
            let step = 64 / size;
            let mut m = vec![0; size * size];
            for k in 0..size {
                for n in 0..size {
                    m[k * size + n] = dct2_64_entry(k * step, n);
                }
            }
            m
        });
        let sins: [&[i32]; 4] = [&SIN_4, &SIN_8, &SIN_16, &SIN_32];
        let dst7: [Vec<i32>; 4] = std::array::from_fn(|i| {
            let size = 4usize << i;
            let mut m = vec![0; size * size];
            for k in 0..size {
                for n in 0..size {
                    m[k * size + n] = dst7_entry(size, sins[i], k, n);
                }
            }
            m
        });
        let dct8 = std::array::from_fn(|i| {
            let size = 4usize << i;
            let mut m = vec![0; size * size];
            for k in 0..size {
                let s = if k % 2 == 0 { 1 } else { -1 };
                for n in 0..size {
                    m[k * size + n] = s * dst7[i][k * size + size - 1 - n];
                }
            }
            m
        });
        TxMatrices { dct2, dst7, dct8 }
    })
}

/// 获取 `(kind, size)` 对应的标准整数矩阵 (行 = 频率, 列 = 空间位置)
///
/// 尺寸不受支持时返回 `None` (DCT-II 2~64, DST-VII/DCT-VIII 4~32).
pub fn transform_matrix(kind: TxType, size: usize) -> Option<&'static [i32]> {
    if !size.is_power_of_two() {
        return None;
    }
    let log2 = size.trailing_zeros() as usize;
    let m = matrices();
    match kind {
        TxType::Dct2 if (1..=6).contains(&log2) => Some(&m.dct2[log2 - 1]),
        TxType::Dst7 if (2..=5).contains(&log2) => Some(&m.dst7[log2 - 2]),
        TxType::Dct8 if (2..=5).contains(&log2) => Some(&m.dct8[log2 - 2]),
        _ => None,
    }
}

// ============================================================
// 反变换核
// ============================================================

/// DCT-II 部分蝶形: `out[i] = E[i] + O[i]`, `out[N-1-i] = E[i] - O[i]`
fn inv_dct2_butterfly(input: &[i32], out: &mut [i32], size: usize) {
    if size == 1 {
        out[0] = 64 * input[0];
        return;
    }
    let half = size / 2;
    let mut even_in = [0i32; 32];
    let mut even = [0i32; 32];
    for j in 0..half {
        even_in[j] = input[2 * j];
    }
    inv_dct2_butterfly(&even_in[..half], &mut even[..half], half);

    let mat = &matrices().dct2[size.trailing_zeros() as usize - 1];
    for i in 0..half {
        let mut odd = 0i32;
        for j in 0..half {
            let c = input[2 * j + 1];
            if c != 0 {
                odd += mat[(2 * j + 1) * size + i] * c;
            }
        }
        out[i] = even[i] + odd;
        out[size - 1 - i] = even[i] - odd;
    }
}

/// 直接矩阵乘
fn inv_matrix(mat: &[i32], input: &[i32], out: &mut [i32], size: usize) {
    for (n, o) in out.iter_mut().enumerate().take(size) {
        let mut sum = 0i32;
        for (k, &c) in input.iter().enumerate().take(size) {
            if c != 0 {
                sum += mat[k * size + n] * c;
            }
        }
        *o = sum;
    }
}

/// 一维反变换
///
/// `input[k * in_stride]` 为第 k 个频率系数, 结果写入 `out[n * out_stride]`.
/// 调用方保证 `(kind, size)` 合法; 不合法的组合按 DCT-II 处理.
pub fn inverse_transform(
    kind: TxType,
    size: usize,
    out: &mut [i32],
    out_stride: usize,
    input: &[i32],
    in_stride: usize,
) {
    let mut src = [0i32; 64];
    let mut dst = [0i32; 64];
    for (k, s) in src.iter_mut().enumerate().take(size) {
        *s = input[k * in_stride];
    }
    match (kind, transform_matrix(kind, size)) {
        (TxType::Dct2, _) | (_, None) => inv_dct2_butterfly(&src[..size], &mut dst[..size], size),
        (_, Some(mat)) => inv_matrix(mat, &src[..size], &mut dst[..size], size),
    }
    for (n, &d) in dst.iter().enumerate().take(size) {
        out[n * out_stride] = d;
    }
}

#[cfg(test)]
mod tests {
    use super::{inverse_transform, transform_matrix};
    use crate::decoders::vvc::common::TxType;

    fn direct_multiply(kind: TxType, size: usize, input: &[i32]) -> Vec<i64> {
        let mat = match transform_matrix(kind, size) {
            Some(mat) => mat,
            None => panic!("缺少矩阵: {kind:?} {size}"),
        };
        (0..size)
            .map(|n| {
                (0..size)
                    .map(|k| i64::from(mat[k * size + n]) * i64::from(input[k]))
                    .sum()
            })
            .collect()
    }

    /// 线性同余伪随机序列, 结果落在合法系数范围内
    fn pseudo_random(seed: u32, len: usize) -> Vec<i32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                ((state >> 8) % 65_536) as i32 - 32_768
            })
            .collect()
    }

    fn check_kind(kind: TxType, sizes: &[usize]) {
        for &size in sizes {
            let mut inputs = vec![vec![0; size]];
            for k in 0..size {
                let mut impulse = vec![0; size];
                impulse[k] = 1;
                inputs.push(impulse);
            }
            for seed in 1..4u32 {
                inputs.push(pseudo_random(seed * 7919 + size as u32, size));
            }
            for input in inputs {
                let mut out = vec![0; size];
                inverse_transform(kind, size, &mut out, 1, &input, 1);
                let expect = direct_multiply(kind, size, &input);
                for n in 0..size {
                    assert_eq!(
                        i64::from(out[n]),
                        expect[n],
                        "{kind:?} size={size} n={n} 与直接矩阵乘不一致"
                    );
                }
            }
        }
    }

    #[test]
    fn test_dct2_matches_direct_multiply() {
        check_kind(TxType::Dct2, &[2, 4, 8, 16, 32, 64]);
    }

    #[test]
    fn test_dst7_dct8_match_direct_multiply() {
        check_kind(TxType::Dst7, &[4, 8, 16, 32]);
        check_kind(TxType::Dct8, &[4, 8, 16, 32]);
    }

    #[test]
    fn test_standard_4x4_rows() {
        let dct2 = transform_matrix(TxType::Dct2, 4).unwrap_or_default();
        assert_eq!(&dct2[4..8], &[83, 36, -36, -83]);
        assert_eq!(&dct2[8..12], &[64, -64, -64, 64]);
        let dst7 = transform_matrix(TxType::Dst7, 4).unwrap_or_default();
        assert_eq!(dst7, &[29, 55, 74, 84, 74, 74, 0, -74, 84, -29, -74, 55, 55, -84, 74, -29]);
        let dct8 = transform_matrix(TxType::Dct8, 4).unwrap_or_default();
        assert_eq!(dct8, &[84, 74, 55, 29, 74, 0, -74, -74, 55, -74, -29, 84, 29, -74, 84, -55]);
    }

    #[test]
    fn test_dct2_8_odd_row() {
        let dct2 = transform_matrix(TxType::Dct2, 8).unwrap_or_default();
        assert_eq!(&dct2[8..16], &[89, 75, 50, 18, -18, -50, -75, -89]);
    }

    #[test]
    fn test_strided_column_pass() {
        let size = 4;
        let stride = 3;
        let mut input = vec![0; size * stride];
        input[0] = 10;
        input[stride] = -4;
        let mut out = vec![0; size * stride];
        inverse_transform(TxType::Dct2, size, &mut out, stride, &input, stride);
        let expect = direct_multiply(TxType::Dct2, size, &[10, -4, 0, 0]);
        for n in 0..size {
            assert_eq!(i64::from(out[n * stride]), expect[n]);
        }
        assert_eq!(out[1], 0, "步长之外的位置不应被写入");
    }

    #[test]
    fn test_unsupported_sizes() {
        assert!(transform_matrix(TxType::Dst7, 64).is_none());
        assert!(transform_matrix(TxType::Dct8, 2).is_none());
        assert!(transform_matrix(TxType::Dct2, 128).is_none());
    }
}

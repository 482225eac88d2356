// ============================================================
// 基础枚举
// ============================================================

/// 亮度平面索引
pub const LUMA: usize = 0;
/// Cb 平面索引
pub const CB: usize = 1;
/// Cr 平面索引
pub const CR: usize = 2;

/// 最小块粒度 (逐块信息表按 4x4 亮度块存储)
pub const MIN_BLOCK_LOG2: u32 = 2;
/// 最大 CTU 尺寸
pub const MAX_CTU_SIZE: usize = 128;
/// 最大变换块尺寸
pub const MAX_TB_SIZE: usize = 64;

/// 通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Luma,
    Chroma,
}

/// 编码树类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TreeType {
    /// 亮度色度共用一棵树
    #[default]
    Single,
    /// 双树模式的亮度树
    DualLuma,
    /// 双树模式的色度树
    DualChroma,
}

impl TreeType {
    /// 是否包含亮度
    pub fn has_luma(self) -> bool {
        self != Self::DualChroma
    }

    /// 是否包含色度
    pub fn has_chroma(self) -> bool {
        self != Self::DualLuma
    }

    /// 逐块信息表中使用的通道
    pub fn channel(self) -> ChannelType {
        if self == Self::DualChroma {
            ChannelType::Chroma
        } else {
            ChannelType::Luma
        }
    }
}

/// CU 预测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PredMode {
    #[default]
    Inter = 0,
    Intra = 1,
    Skip = 2,
    Plt = 3,
    Ibc = 4,
}

impl PredMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Intra,
            2 => Self::Skip,
            3 => Self::Plt,
            4 => Self::Ibc,
            _ => Self::Inter,
        }
    }

    /// 是否帧内类 (去块强度按帧内处理)
    pub fn is_intra(self) -> bool {
        matches!(self, Self::Intra | Self::Plt)
    }
}

/// 编码树分区的模式类型约束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModeType {
    #[default]
    All,
    Inter,
    Intra,
}

/// 划分方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitMode {
    TtHor,
    BtHor,
    TtVer,
    BtVer,
    Qt,
}

impl SplitMode {
    /// 是否垂直方向划分
    pub fn is_vertical(self) -> bool {
        matches!(self, Self::TtVer | Self::BtVer)
    }

    /// 是否多类型树 (二叉/三叉) 划分
    pub fn is_mtt(self) -> bool {
        self != Self::Qt
    }

    /// 子块数量
    pub fn part_count(self) -> usize {
        match self {
            Self::BtHor | Self::BtVer => 2,
            Self::TtHor | Self::TtVer => 3,
            Self::Qt => 4,
        }
    }
}

/// 一维变换核类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TxType {
    #[default]
    Dct2,
    Dst7,
    Dct8,
}

/// 帧内子划分 (ISP) 方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IspType {
    #[default]
    None,
    Hor,
    Ver,
}

/// 帧内模式常量
pub const INTRA_PLANAR: u8 = 0;
pub const INTRA_DC: u8 = 1;
pub const INTRA_HOR: u8 = 18;
pub const INTRA_DIAG: u8 = 34;
pub const INTRA_VERT: u8 = 50;
/// 色度跨分量线性模型 (CCLM) 模式起点
pub const INTRA_LT_CCLM: u8 = 81;
pub const INTRA_L_CCLM: u8 = 82;
pub const INTRA_T_CCLM: u8 = 83;

// ============================================================
// 工具函数
// ============================================================

/// 有符号整数钳位到 16 位
#[inline]
pub(crate) fn clip_i16(v: i64) -> i32 {
    v.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i32
}

/// 取整右移, `shift` 为 0 时原样返回
#[inline]
pub(crate) fn round_shift(v: i32, shift: u32) -> i32 {
    if shift == 0 {
        v
    } else {
        (v + (1 << (shift - 1))) >> shift
    }
}

/// 正整数的 floor(log2)
#[inline]
pub(crate) fn ilog2(v: usize) -> u32 {
    debug_assert!(v > 0);
    usize::BITS - 1 - v.leading_zeros()
}

/// 取符号 (-1/0/1)
#[inline]
pub(crate) fn sign(v: i32) -> i32 {
    v.signum()
}

/// 右上到左下对角扫描顺序, 返回 `(x, y)` 序列
pub(crate) fn diag_scan(w: usize, h: usize) -> Vec<(usize, usize)> {
    let mut order = Vec::with_capacity(w * h);
    let mut x: isize = 0;
    let mut y: isize = 0;
    while order.len() < w * h {
        while y >= 0 {
            if (x as usize) < w && (y as usize) < h {
                order.push((x as usize, y as usize));
            }
            y -= 1;
            x += 1;
        }
        y = x;
        x = 0;
    }
    order
}

//! CTU 重建.
//!
//! 按解码顺序遍历 CTU 的 CU 链表: 先生成预测 (帧间整 CU 预测, 帧内按变换块预测),
//! 再对每个变换块做反量化和反变换, 把残差叠加到预测值上.
//! 启用 LMCS 时帧间预测先正向映射, 色度残差按邻近亮度均值缩放;
//! 重建结果停留在映射域, 由 LMCS 阶段统一反向映射.

use log::trace;
use vvrec_core::{VvError, VvResult};

use super::common::{ChannelType, LUMA, PredMode};
use super::cu::{CodingUnit, TransformBlock, TransformUnit};
use super::dequant::{add_residual, joint_cbcr_residual, reconstruct_residual, scale_chroma_residual};
use super::frame::{FrameContext, Slice};
use super::lmcs::{LmcsTables, chroma_residual_scale, forward_map_block};
use super::pred::{IntraRequest, ReconArea};

/// 重建过程中复用的缓冲
#[derive(Default)]
struct Scratch {
    res: Vec<i32>,
    derived: Vec<i32>,
    pixels: Vec<i32>,
}

/// 单个 CTU 的重建上下文
struct CtuRecon<'a> {
    fc: &'a FrameContext,
    slice: &'a Slice,
    /// slice 启用 LMCS 时的查找表
    lmcs: Option<&'a LmcsTables>,
    recon: Vec<ReconArea>,
    scratch: Scratch,
}

impl CtuRecon<'_> {
    fn chroma_shift(&self) -> (u32, u32) {
        let fmt = self.fc.params.sps.chroma_format;
        (fmt.shift_x(), fmt.shift_y())
    }

    /// 变换块在亮度坐标下的区域
    fn tb_area(&self, tb: &TransformBlock) -> ReconArea {
        let (sx, sy) = if tb.c_idx == LUMA { (0, 0) } else { self.chroma_shift() };
        ReconArea {
            x0: tb.x0 << sx,
            y0: tb.y0 << sy,
            width: tb.width() << sx,
            height: tb.height() << sy,
            channel: if tb.c_idx == LUMA {
                ChannelType::Luma
            } else {
                ChannelType::Chroma
            },
        }
    }

    fn intra_pred(&self, cu: &CodingUnit, tb: &TransformBlock) -> VvResult<()> {
        let mode = if tb.c_idx == LUMA {
            cu.intra.luma_mode
        } else {
            cu.intra.chroma_mode
        };
        let req = IntraRequest {
            cu,
            c_idx: tb.c_idx,
            x0: tb.x0,
            y0: tb.y0,
            width: tb.width(),
            height: tb.height(),
            mode,
            recon: &self.recon,
        };
        self.fc.predictor.intra_pred(&self.fc.pic, &req)
    }

    /// CU 级帧间预测 (含 CIIP 与 IBC)
    fn inter_pred(&self, cu: &CodingUnit) -> VvResult<()> {
        let fc = self.fc;
        fc.predictor.predict_inter(&fc.pic, &self.slice.refs, cu)?;
        if cu.pred_mode == PredMode::Ibc {
            // IBC 从当前图像拷贝, 采样已在映射域
            return Ok(());
        }
        if let Some(lmcs) = self.lmcs.filter(|_| cu.tree.has_luma()) {
            forward_map_block(fc, lmcs, cu.x0, cu.y0, cu.width, cu.height)?;
        }
        if cu.is_ciip() {
            fc.predictor.predict_ciip(&fc.pic, &self.slice.refs, cu, &self.recon)?;
        }
        Ok(())
    }

    /// 反量化反变换一个有系数的变换块, 残差留在 `scratch.res`
    fn residual(&mut self, cu: &CodingUnit, tu: &TransformUnit, tb: &TransformBlock, coeffs: &[i32]) -> VvResult<()> {
        let area = tb.area();
        let src = coeffs
            .get(tb.coeff_offset..tb.coeff_offset + area)
            .ok_or_else(|| VvError::Internal(format!("系数偏移越界: {}+{}", tb.coeff_offset, area)))?;
        let res = &mut self.scratch.res;
        res.clear();
        res.try_reserve(area)?;
        res.extend_from_slice(src);
        reconstruct_residual(tb, tu, cu, &self.fc.params, &self.slice.header, res)?;
        Ok(())
    }

    /// 残差叠加; 色度按 LMCS 缩放
    fn add(&mut self, tb: &TransformBlock, use_derived: bool) -> VvResult<()> {
        if tb.c_idx != LUMA
            && tb.area() > 4
            && self.slice.header.chroma_residual_scale
            && let Some(lmcs) = self.lmcs
        {
            let area = self.tb_area(tb);
            let scale = chroma_residual_scale(self.fc, lmcs, area.x0, area.y0)?;
            let res = if use_derived {
                &mut self.scratch.derived
            } else {
                &mut self.scratch.res
            };
            scale_chroma_residual(res, scale);
        }
        let Scratch { res, derived, pixels } = &mut self.scratch;
        let src = if use_derived { derived } else { res };
        add_residual(
            &self.fc.pic,
            tb.c_idx,
            tb.x0,
            tb.y0,
            tb.width(),
            tb.height(),
            src,
            pixels,
        )
    }

    fn reconstruct_tu(&mut self, cu: &CodingUnit, tu: &TransformUnit, coeffs: &[i32]) -> VvResult<()> {
        let intra = cu.is_intra();

        // 亮度先于色度完成, CCLM 需要已重建的亮度
        if let Some(tb) = tu.tb(LUMA) {
            if intra {
                self.intra_pred(cu, tb)?;
            }
            if tb.has_coeffs {
                self.residual(cu, tu, tb, coeffs)?;
                self.add(tb, false)?;
            }
            let area = self.tb_area(tb);
            self.recon.push(area);
        }

        let (Some(cb), Some(cr)) = (tu.tb(1), tu.tb(2)) else {
            return Ok(());
        };
        if intra {
            self.intra_pred(cu, cb)?;
            self.intra_pred(cu, cr)?;
        }
        match tu.joint_cbcr_mode() {
            0 => {
                for tb in [cb, cr] {
                    if tb.has_coeffs {
                        self.residual(cu, tu, tb, coeffs)?;
                        self.add(tb, false)?;
                    }
                }
            }
            mode => {
                // 模式 3 的系数在 Cr, 其余在 Cb; 另一平面由其推出
                let (coded, other) = if mode == 3 { (cr, cb) } else { (cb, cr) };
                if coded.has_coeffs {
                    self.residual(cu, tu, coded, coeffs)?;
                    let negative = self.slice.header.joint_cbcr_sign;
                    let Scratch { res, derived, .. } = &mut self.scratch;
                    derived.clear();
                    derived.try_reserve(res.len())?;
                    derived.resize(res.len(), 0);
                    joint_cbcr_residual(res, mode, negative, derived);
                    self.add(other, true)?;
                    self.add(coded, false)?;
                }
            }
        }
        let (a, b) = (self.tb_area(cb), self.tb_area(cr));
        self.recon.push(a);
        self.recon.push(b);
        Ok(())
    }

    fn reconstruct_cu(&mut self, cu: &CodingUnit, coeffs: &[i32]) -> VvResult<()> {
        match cu.pred_mode {
            PredMode::Inter | PredMode::Skip | PredMode::Ibc => self.inter_pred(cu)?,
            PredMode::Intra => {}
            PredMode::Plt => {
                return Err(VvError::NotImplemented(format!(
                    "调色板 CU 重建 @({},{})",
                    cu.x0, cu.y0
                )));
            }
        }
        for tu in &cu.tus {
            self.reconstruct_tu(cu, tu, coeffs)?;
        }
        trace!(
            "VVC: 重建 CU ({},{}) {}x{} {:?} tus={}",
            cu.x0,
            cu.y0,
            cu.width,
            cu.height,
            cu.pred_mode,
            cu.tus.len()
        );
        Ok(())
    }
}

/// RECON 阶段: 重建一个 CTU, 完成后把 CU 链表与系数归还池
pub fn reconstruct(fc: &FrameContext, rx: usize, ry: usize) -> VvResult<()> {
    let Some(mut data) = fc.take_ctu_data(rx, ry) else {
        return Err(VvError::Internal(format!("CTU ({rx},{ry}) 缺少解析结果")));
    };
    let Some(slice) = fc.slice_at(rx, ry) else {
        fc.release_ctu_data(data);
        return Err(VvError::Internal(format!("CTU ({rx},{ry}) 不属于任何 slice")));
    };
    let lmcs = fc.params.lmcs.as_ref().filter(|_| slice.header.lmcs_enabled);
    let mut ctx = CtuRecon {
        fc,
        slice,
        lmcs,
        recon: std::mem::take(&mut data.recon),
        scratch: Scratch::default(),
    };
    ctx.recon.clear();

    let mut result = Ok(());
    for cu in data.cus.iter() {
        if let Err(err) = ctx.reconstruct_cu(cu, &data.coeffs) {
            result = Err(err);
            break;
        }
    }
    data.recon = ctx.recon;
    trace!("VVC: RECON CTU ({rx},{ry}) 区域数 {}", data.recon.len());
    fc.release_ctu_data(data);
    result
}

//! 通过公开接口驱动完整的帧解码流程.

use std::sync::Arc;

use vvrec::AppConfig;
use vvrec::codec::vvc::alf::CtuAlfParams;
use vvrec::codec::vvc::common::{INTRA_PLANAR, IspType};
use vvrec::codec::vvc::cu::{CodingUnit, IntraInfo, MotionInfo, SbtInfo, TransformBlock};
use vvrec::codec::vvc::pred::{IntraRequest, ReconArea};
use vvrec::codec::vvc::sao::{SaoComponent, SaoParams, SaoType};
use vvrec::codec::vvc::syntax::{ResidualInfo, SplitContext};
use vvrec::codec::vvc::{
    ApsBundle, CuPool, DecoderConfig, FrameContext, FrameDecoder, Pps, Predictor, ProgressKind, RefPicLists,
    SliceHeader, SliceSource, Sps, SyntaxReader, decode_frame_ps, Slice,
};
use vvrec::core::{Picture, VvError, VvResult};

/// 帧内 CU 不划分, 无残差, 每个 CTU 使用同一组 SAO 参数
struct PlainReader {
    remaining: usize,
    last_entry: bool,
    sao: SaoParams,
}

impl SyntaxReader for PlainReader {
    fn sao_params(&mut self, _rx: usize, _ry: usize) -> VvResult<SaoParams> {
        Ok(self.sao)
    }

    fn alf_params(&mut self, _rx: usize, _ry: usize) -> VvResult<CtuAlfParams> {
        Ok(CtuAlfParams::default())
    }

    fn split_cu_flag(&mut self, _ctx: &SplitContext) -> VvResult<bool> {
        Ok(false)
    }

    fn split_qt_flag(&mut self, _ctx: &SplitContext) -> VvResult<bool> {
        Ok(true)
    }

    fn mtt_split_cu_vertical_flag(&mut self, _ctx: &SplitContext) -> VvResult<bool> {
        Ok(false)
    }

    fn mtt_split_cu_binary_flag(&mut self, _ctx: &SplitContext) -> VvResult<bool> {
        Ok(true)
    }

    fn non_inter_flag(&mut self, _ctx: &SplitContext) -> VvResult<bool> {
        Ok(true)
    }

    fn cu_skip_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn pred_mode_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(true)
    }

    fn pred_mode_ibc_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn pred_mode_plt_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn cu_act_enabled_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn intra_bdpcm_luma(&mut self, _cu: &CodingUnit) -> VvResult<Option<bool>> {
        Ok(None)
    }

    fn intra_bdpcm_chroma(&mut self, _cu: &CodingUnit) -> VvResult<Option<bool>> {
        Ok(None)
    }

    fn intra_luma_info(&mut self, _cu: &CodingUnit) -> VvResult<(IntraInfo, bool, bool)> {
        let info = IntraInfo {
            luma_mode: INTRA_PLANAR,
            isp: IspType::None,
            ..IntraInfo::default()
        };
        Ok((info, false, false))
    }

    fn intra_chroma_pred_mode(&mut self, _cu: &CodingUnit, luma_mode: u8) -> VvResult<u8> {
        Ok(luma_mode)
    }

    fn inter_data(&mut self, _cu: &CodingUnit) -> VvResult<MotionInfo> {
        Err(VvError::InvalidData("帧内 slice 不应读取帧间数据".into()))
    }

    fn cu_coded_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn cu_sbt(&mut self, _cu: &CodingUnit, _hor: bool, _ver: bool, _quad: bool) -> VvResult<Option<SbtInfo>> {
        Ok(None)
    }

    fn tu_cb_coded_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn tu_cr_coded_flag(&mut self, _cu: &CodingUnit, _cb_coded: bool) -> VvResult<bool> {
        Ok(false)
    }

    fn tu_y_coded_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn cu_qp_delta(&mut self) -> VvResult<i32> {
        Ok(0)
    }

    fn cu_chroma_qp_offset(&mut self) -> VvResult<Option<usize>> {
        Ok(None)
    }

    fn transform_skip_flag(&mut self, _cu: &CodingUnit, _c_idx: usize) -> VvResult<bool> {
        Ok(false)
    }

    fn tu_joint_cbcr_residual_flag(&mut self, _cu: &CodingUnit) -> VvResult<bool> {
        Ok(false)
    }

    fn residual_coding(
        &mut self,
        _cu: &CodingUnit,
        _tb: &TransformBlock,
        _coeffs: &mut [i32],
    ) -> VvResult<ResidualInfo> {
        Ok(ResidualInfo::default())
    }

    fn lfnst_idx(&mut self, _cu: &CodingUnit) -> VvResult<u8> {
        Ok(0)
    }

    fn mts_idx(&mut self, _cu: &CodingUnit) -> VvResult<u8> {
        Ok(0)
    }

    fn end_of_slice_flag(&mut self) -> VvResult<bool> {
        self.remaining = self.remaining.saturating_sub(1);
        Ok(self.last_entry && self.remaining == 0)
    }
}

struct PlainSource {
    header: SliceHeader,
    sao: SaoParams,
    /// 为真时拒绝创建读取器
    broken: bool,
}

impl SliceSource for PlainSource {
    fn entry_reader(&self, ep: usize) -> VvResult<Box<dyn SyntaxReader + Send>> {
        if self.broken {
            return Err(VvError::InvalidData(format!("入口点 {ep} 的数据被截断")));
        }
        let range = self.header.entry_point_range(ep);
        Ok(Box::new(PlainReader {
            remaining: range.len(),
            last_entry: ep + 1 == self.header.entry_points.len(),
            sao: self.sao,
        }))
    }
}

struct ConstPredictor(u16);

impl Predictor for ConstPredictor {
    fn intra_pred(&self, pic: &Picture, req: &IntraRequest<'_>) -> VvResult<()> {
        pic.plane(req.c_idx)?.fill_rect(req.x0, req.y0, req.width, req.height, self.0);
        Ok(())
    }

    fn predict_inter(&self, _pic: &Picture, _refs: &RefPicLists, _cu: &CodingUnit) -> VvResult<()> {
        Err(VvError::Unsupported("测试预测器只支持帧内".into()))
    }

    fn predict_ciip(
        &self,
        _pic: &Picture,
        _refs: &RefPicLists,
        _cu: &CodingUnit,
        _recon: &[ReconArea],
    ) -> VvResult<()> {
        Ok(())
    }
}

fn slice(header: SliceHeader, sao: SaoParams, broken: bool) -> Slice {
    let source = Arc::new(PlainSource {
        header: header.clone(),
        sao,
        broken,
    });
    Slice {
        header,
        refs: RefPicLists::default(),
        source,
    }
}

/// 256x128, 两个 tile 列, 每个 tile 一个 slice
fn tiled_frame(base: SliceHeader, sps: Sps, sao: SaoParams, broken: bool, config: &DecoderConfig) -> Arc<FrameContext> {
    let pps = Pps {
        tile_column_widths: vec![2, 2],
        ..Pps::default()
    };
    let params = match decode_frame_ps(Arc::new(sps), Arc::new(pps), &ApsBundle::default()) {
        Ok(p) => p,
        Err(err) => panic!("参数集校验失败: {err}"),
    };
    // tile 内光栅顺序
    let left = SliceHeader {
        ctb_addrs: vec![0, 1, 4, 5],
        entry_points: vec![0],
        ..base.clone()
    };
    let right = SliceHeader {
        ctb_addrs: vec![2, 3, 6, 7],
        entry_points: vec![0],
        ..base
    };
    let slices = vec![slice(left, sao, false), slice(right, sao, broken)];
    match FrameContext::new(
        params,
        slices,
        0,
        0,
        Arc::new(CuPool::new()),
        Arc::new(ConstPredictor(100)),
        config.clone(),
    ) {
        Ok(fc) => fc,
        Err(err) => panic!("创建帧上下文失败: {err}"),
    }
}

fn flat(pic: &Picture, value: u16) -> bool {
    (0..pic.plane_count()).all(|c| {
        pic.plane(c).is_ok_and(|p| (0..p.height()).all(|y| (0..p.width()).all(|x| p.get(x, y) == value)))
    })
}

fn sps() -> Sps {
    Sps {
        width: 256,
        height: 128,
        ..Sps::default()
    }
}

#[test]
fn test_tiled_slices_decode_to_prediction() {
    let config = match AppConfig::from_json(r#"{"decoder": {"threads": 3}}"#) {
        Ok(c) => c.decoder,
        Err(err) => panic!("解析配置失败: {err}"),
    };
    let decoder = match vvrec::frame_decoder(&config) {
        Ok(d) => d,
        Err(err) => panic!("创建解码器失败: {err}"),
    };
    assert_eq!(decoder.threads(), 3);
    let fc = tiled_frame(SliceHeader::default(), sps(), SaoParams::default(), false, &config);
    let ft = match decoder.submit(Arc::clone(&fc)) {
        Ok(ft) => ft,
        Err(err) => panic!("提交帧失败: {err}"),
    };
    if let Err(err) = decoder.wait(ft) {
        panic!("解码失败: {err}");
    }
    assert!(flat(&fc.pic, 100), "无残差时输出等于预测");
    assert_eq!(fc.progress(ProgressKind::Pixel), 128);
}

#[test]
fn test_edge_offset_keeps_flat_picture() {
    let config = DecoderConfig {
        threads: 2,
        ..DecoderConfig::default()
    };
    let decoder = match FrameDecoder::new(&config) {
        Ok(d) => d,
        Err(err) => panic!("创建解码器失败: {err}"),
    };
    let sps = Sps {
        sao_enabled: true,
        ..sps()
    };
    let base = SliceHeader {
        sao_luma: true,
        sao_chroma: true,
        ..SliceHeader::default()
    };
    let edge = SaoComponent {
        kind: SaoType::Edge,
        offsets: [2, 1, -1, -2],
        band_position: 0,
        eo_class: 2,
    };
    let sao = SaoParams { components: [edge; 3] };
    let fc = tiled_frame(base, sps, sao, false, &config);
    if let Err(err) = decoder.submit(Arc::clone(&fc)).and_then(|ft| decoder.wait(ft)) {
        panic!("解码失败: {err}");
    }
    // 平坦区域的边缘类别都是 0, 不加偏移
    assert!(flat(&fc.pic, 100));
}

#[test]
fn test_reader_failure_is_reported_by_wait() {
    let config = DecoderConfig {
        threads: 2,
        ..DecoderConfig::default()
    };
    let decoder = match FrameDecoder::new(&config) {
        Ok(d) => d,
        Err(err) => panic!("创建解码器失败: {err}"),
    };
    let fc = tiled_frame(SliceHeader::default(), sps(), SaoParams::default(), true, &config);
    match decoder.submit(Arc::clone(&fc)).and_then(|ft| decoder.wait(ft)) {
        Err(VvError::InvalidData(msg)) => assert!(msg.contains("截断"), "应返回读取器的错误: {msg}"),
        other => panic!("期望非法数据错误, 实际 {other:?}"),
    }
    assert_eq!(fc.progress(ProgressKind::Pixel), 128, "出错的帧也要释放等待者");
}

use serde::{Deserialize, Serialize};

/// 解码器运行配置
///
/// 滤波关闭开关只用于调试: 关闭后输出不再符合标准.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DecoderConfig {
    /// 工作线程数, 0 表示使用可用并行度
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub disable_deblock: bool,
    #[serde(default)]
    pub disable_sao: bool,
    #[serde(default)]
    pub disable_alf: bool,
    /// 有 CTU 未被任何 slice 覆盖时是否报错; 为 false 时只记录警告
    #[serde(default = "default_true")]
    pub error_on_missing_slices: bool,
    /// 记录任务派发顺序 (测试与排查调度问题时使用)
    #[serde(default)]
    pub record_dispatch: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            disable_deblock: false,
            disable_sao: false,
            disable_alf: false,
            error_on_missing_slices: true,
            record_dispatch: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DecoderConfig;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let cfg: DecoderConfig = match serde_json::from_str("{}") {
            Ok(cfg) => cfg,
            Err(err) => panic!("解析空配置失败: {err}"),
        };
        assert_eq!(cfg, DecoderConfig::default());
        assert!(cfg.error_on_missing_slices, "缺失 slice 默认报错");
    }

    #[test]
    fn test_config_partial_override() {
        let cfg: DecoderConfig = match serde_json::from_str(r#"{"threads": 4, "disable_alf": true}"#) {
            Ok(cfg) => cfg,
            Err(err) => panic!("解析配置失败: {err}"),
        };
        assert_eq!(cfg.threads, 4);
        assert!(cfg.disable_alf);
        assert!(!cfg.disable_sao);
    }
}

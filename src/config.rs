//! 应用级配置: 日志与解码器配置合并在一个 JSON 文档中.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vvrec_codec::DecoderConfig;

use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

impl AppConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("解析配置失败")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn test_sections_default_independently() {
        let config = match AppConfig::from_json(r#"{"decoder": {"threads": 2}}"#) {
            Ok(config) => config,
            Err(err) => panic!("解析配置失败: {err}"),
        };
        assert_eq!(config.decoder.threads, 2);
        assert!(config.decoder.error_on_missing_slices);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_json_is_an_error() {
        assert!(AppConfig::from_json("[1, 2]").is_err());
    }
}

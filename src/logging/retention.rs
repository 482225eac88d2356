use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::fs;
use std::path::Path;

/// 删除早于保留期的 `<prefix>.<YYYY-MM-DD>.log`, 返回删除的文件数
///
/// 文件名不符合该格式的条目原样保留.
pub fn cleanup_expired_logs(directory: &Path, prefix: &str, retention_days: i64, today: NaiveDate) -> Result<usize> {
    if !directory.exists() {
        return Ok(0);
    }
    let cutoff = today - ChronoDuration::days(retention_days.max(0));
    let entries =
        fs::read_dir(directory).with_context(|| format!("读取日志目录失败, path={}", directory.display()))?;

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(date) = parse_log_name(&file_name, prefix) else {
            continue;
        };
        if date < cutoff {
            let path = entry.path();
            fs::remove_file(&path).with_context(|| format!("删除过期日志失败, path={}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn parse_log_name(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let date_part = file_name
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_suffix(".log")?;
    if date_part.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

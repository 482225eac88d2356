use chrono::{Duration, Local};
use std::fs;
use tempfile::TempDir;
use vvrec::logging::{LoggingConfig, cleanup_expired_logs, init};

// 全局订阅器只能安装一次, 本文件只有一个测试调用 init()

fn temp_dir() -> TempDir {
    match TempDir::new() {
        Ok(dir) => dir,
        Err(err) => panic!("创建临时目录失败: {err}"),
    }
}

#[test]
fn test_init_creates_today_file_and_prunes_history() {
    let dir = temp_dir();
    let log_dir = dir.path().join("logs");
    if let Err(err) = fs::create_dir_all(&log_dir) {
        panic!("创建日志目录失败: {err}");
    }
    let today = Local::now().date_naive();
    let stale = log_dir.join(format!("decode.{}.log", (today - Duration::days(30)).format("%Y-%m-%d")));
    if let Err(err) = fs::write(&stale, b"old") {
        panic!("写入旧日志失败: {err}");
    }

    let config = LoggingConfig {
        level: "debug".to_string(),
        console: false,
        directory: Some(log_dir.to_string_lossy().to_string()),
        file_prefix: "decode".to_string(),
        retention_days: 7,
    };
    if let Err(err) = init(config.clone()) {
        panic!("日志系统初始化失败: {err}");
    }
    log::info!("日志系统已就绪");

    let current = log_dir.join(format!("decode.{}.log", today.format("%Y-%m-%d")));
    assert!(current.exists(), "应创建当天的日志文件");
    assert!(!stale.exists(), "超过保留期的日志应在初始化时删除");
    assert!(init(config).is_err(), "重复初始化应返回错误");
}

#[test]
fn test_cleanup_on_missing_directory_is_noop() {
    let dir = temp_dir();
    let missing = dir.path().join("absent");
    match cleanup_expired_logs(&missing, "vvrec", 7, Local::now().date_naive()) {
        Ok(removed) => assert_eq!(removed, 0),
        Err(err) => panic!("目录不存在时不应报错: {err}"),
    }
}

#[test]
fn test_zero_retention_keeps_only_today() {
    let dir = temp_dir();
    let today = Local::now().date_naive();
    for offset in 0..3 {
        let name = format!("vvrec.{}.log", (today - Duration::days(offset)).format("%Y-%m-%d"));
        if let Err(err) = fs::write(dir.path().join(name), b"x") {
            panic!("写入测试文件失败: {err}");
        }
    }
    let removed = match cleanup_expired_logs(dir.path(), "vvrec", 0, today) {
        Ok(n) => n,
        Err(err) => panic!("清理失败: {err}"),
    };
    assert_eq!(removed, 2);
    let left = match fs::read_dir(dir.path()) {
        Ok(entries) => entries.count(),
        Err(err) => panic!("读取目录失败: {err}"),
    };
    assert_eq!(left, 1);
}

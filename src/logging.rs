//! # Logging モジュール
//!
//! エンジンのログ出力を初期化します。
//!
//! tracing-subscriber による構造化ログを、コンソール（compact 形式）と
//! ファイル（JSON 形式、tracing-appender による非同期書き込み）へ出力します。
//! エンジン本体は tracing のイベントを発行するだけで、出力先は知りません。
//!
//! ## 出力先
//!
//! - `Console`: コンソールのみ
//! - `File`: ファイルのみ（logs/airdefsim.YYYY-MM-DD）
//! - `Both`: コンソールとファイルの両方
//!
//! `RUST_LOG` 環境変数が設定されている場合はそちらのフィルタを優先します。

use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// ログ出力先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(format!("無効な出力先: {}. 利用可能: console, file, both", s)),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub output: LogOutput,
    /// ログファイルのディレクトリ（File / Both のとき）
    pub log_dir: PathBuf,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Console,
            log_dir: PathBuf::from("logs"),
            file_prefix: "airdefsim".to_string(),
        }
    }
}

/// ログ初期化のエラー
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("ログディレクトリを作成できません: {}", .0.display())]
    Directory(PathBuf, #[source] std::io::Error),
    #[error("ログシステムの初期化に失敗しました")]
    Init(#[from] TryInitError),
}

/// ファイル出力の書き込みスレッドを保持するガード
///
/// ドロップすると未書き込みのログをフラッシュして書き込みを終了します。
/// `main` の終了まで保持してください。
#[must_use = "ガードをドロップするとファイル出力が止まります"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// ログシステムを初期化
///
/// # 引数
///
/// * `config` - ログ設定
///
/// # 戻り値
///
/// ファイル書き込みのガード
///
/// # 例
///
/// ```no_run
/// use airdefsim::logging::{init_logging, LogConfig, LogOutput};
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     output: LogOutput::Both,
///     ..LogConfig::default()
/// };
/// let _guard = init_logging(config).expect("ログ初期化に失敗");
/// ```
pub fn init_logging(config: LogConfig) -> Result<LogGuard, LoggingError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let console_layer = config.output.console().then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });

    let mut file_guard = None;
    let file_layer = if config.output.file() {
        ensure_log_directory(&config.log_dir)?;
        let appender = rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = non_blocking(appender);
        file_guard = Some(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
    } else {
        None
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogGuard { _file: file_guard })
}

/// ログレベルを文字列から解析
///
/// # 引数
///
/// * `level_str` - "trace" / "debug" / "info" / "warn" / "error"（大文字小文字は区別しない）
pub fn parse_log_level(level_str: &str) -> Result<Level, String> {
    match level_str.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!("無効なログレベル: {}. 利用可能: trace, debug, info, warn, error", level_str)),
    }
}

/// 詳細出力レベル（-v の回数）から既定のログレベルを決める
pub fn level_for_verbosity(verbose_level: u8) -> Level {
    match verbose_level {
        0 | 1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn ensure_log_directory(log_dir: &Path) -> Result<(), LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|e| LoggingError::Directory(log_dir.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_output_from_str() {
        assert_eq!(LogOutput::from_str("console"), Ok(LogOutput::Console));
        assert_eq!(LogOutput::from_str("FILE"), Ok(LogOutput::File));
        assert_eq!(LogOutput::from_str("all"), Ok(LogOutput::Both));
        assert!(LogOutput::from_str("syslog").is_err());
        assert!(LogOutput::Both.console() && LogOutput::Both.file());
        assert!(!LogOutput::Console.file());
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), Ok(Level::DEBUG));
        assert_eq!(parse_log_level("WARN"), Ok(Level::WARN));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), Level::INFO);
        assert_eq!(level_for_verbosity(2), Level::DEBUG);
        assert_eq!(level_for_verbosity(5), Level::TRACE);
    }
}

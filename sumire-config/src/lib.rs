//! Sumire 設定ファイルのサポート
//!
//! YAML / TOML ファイル、および Cargo.toml の `[package.metadata.sumire]`
//! セクションからの設定読み込みを提供します。設定ファイルの探索
//! （祖先ディレクトリの走査）と、CLI 指定値の重ね合わせ（フィールド単位で
//! CLI が優先）もこのクレートが担います。
//!
//! 列挙値の文字列は寛容にパースされ、未知の値は既定値（INFO / FILE / ALL）
//! へフォールバックします。それ以外のエラー（ファイル欠落、未対応の形式、
//! 構文エラー）は型付きエラーとして報告されます。

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use sumire_core::{LogLevel, LogOutput, TraceSettings, VariableMode};

/// 探索対象の設定ファイル名
const CONFIG_FILE_NAMES: &[&str] = &["sumire.yaml", "sumire.yml", "sumire.toml"];

/// 祖先ディレクトリの最大走査数
const MAX_SEARCH_DEPTH: usize = 20;

/// 設定エラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 設定ファイルが存在しない
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// 未対応の拡張子
    #[error("unsupported config file format: {0} (use .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),

    /// 読み込みエラー
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// YAML の構文エラー
    #[error("failed to parse YAML file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// TOML の構文エラー
    #[error("failed to parse TOML file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// 設定ファイルの内容
///
/// キーはハイフン区切り・アンダースコア区切りのどちらでも受け付けます。
/// 列挙値は文字列のまま保持し、`resolve` 時に寛容にパースします。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// ログレベル（DEBUG / INFO / WARNING / ERROR / SILENT）
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    /// 出力先（FILE / STDOUT / STDERR / FILE_STDOUT / FILE_STDERR）
    #[serde(alias = "log-output")]
    pub log_output: Option<String>,

    /// 変数記録モード（ALL / CHANGED / NONE）
    #[serde(alias = "variable-mode")]
    pub variable_mode: Option<String>,

    /// ログファイルの出力ディレクトリ
    #[serde(alias = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// ワークスペースフィルタの有効・無効
    #[serde(alias = "filter-workspace")]
    pub filter_workspace: Option<bool>,

    /// ワークスペースのルート
    #[serde(alias = "workspace-root")]
    pub workspace_root: Option<PathBuf>,

    /// トレース対象の関数名リスト
    #[serde(alias = "traceable-functions")]
    pub traceable_functions: Option<Vec<String>>,

    /// 非同期トレースの有効・無効
    #[serde(alias = "trace-async")]
    pub trace_async: Option<bool>,

    /// await 終了レコードの抑制閾値（ミリ秒）
    #[serde(alias = "await-threshold-ms")]
    pub await_threshold_ms: Option<f64>,

    /// タスクの生成・完了記録の有効・無効
    #[serde(alias = "trace-tasks")]
    pub trace_tasks: Option<bool>,
}

/// CLI 指定による上書き
///
/// 設定ファイルの値よりフィールド単位で優先されます。
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub log_output: Option<String>,
    pub variable_mode: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub no_filter_workspace: bool,
    pub traceable_functions: Option<Vec<String>>,
    pub trace_async: bool,
    pub await_threshold_ms: Option<f64>,
}

/// 解決済みのトレース設定一式
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// 同期トレーサの設定
    pub settings: TraceSettings,
    /// 非同期トレースを使うかどうか
    pub trace_async: bool,
    /// await 終了レコードの抑制閾値（ミリ秒）
    pub await_threshold_ms: f64,
    /// タスクの生成・完了を記録するかどうか
    pub trace_tasks: bool,
}

/// 設定ファイルを読み込む
///
/// 拡張子で形式を判定します。`Cargo.toml` が渡された場合は
/// `[package.metadata.sumire]` セクションを読み取ります（セクションが
/// 無ければ空の設定を返します）。
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "yaml" | "yml" => load_yaml(path),
        "toml" => {
            if path.file_name().and_then(|n| n.to_str()) == Some("Cargo.toml") {
                load_manifest_section(path)
            } else {
                load_toml(path)
            }
        }
        other => Err(ConfigError::UnsupportedFormat(format!(".{other}"))),
    }
}

/// YAML ファイルから設定を読み込む
///
/// 空のファイルは空の設定として扱います。
pub fn load_yaml(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = read_file(path)?;
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// TOML ファイルから設定を読み込む
pub fn load_toml(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = read_file(path)?;
    toml::from_str(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Cargo.toml の `[package.metadata.sumire]` セクションを読み込む
fn load_manifest_section(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = read_file(path)?;
    let value: toml::Value = toml::from_str(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;

    match manifest_section(&value) {
        Some(section) => {
            section
                .clone()
                .try_into()
                .map_err(|source| ConfigError::Toml {
                    path: path.to_path_buf(),
                    source,
                })
        }
        None => Ok(FileConfig::default()),
    }
}

/// マニフェストから sumire セクションを取り出す
fn manifest_section(value: &toml::Value) -> Option<&toml::Value> {
    value.get("package")?.get("metadata")?.get("sumire")
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// 設定ファイルを祖先ディレクトリへ向かって探索する
///
/// 各ディレクトリで `sumire.yaml` / `sumire.yml` / `sumire.toml` を探し、
/// 無ければ `[package.metadata.sumire]` セクションを持つ `Cargo.toml` を
/// 確認します。最大 20 階層まで遡ります。
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    for _ in 0..MAX_SEARCH_DEPTH {
        for name in CONFIG_FILE_NAMES {
            let candidate = current.join(name);
            if candidate.exists() {
                tracing::debug!("found config file: {}", candidate.display());
                return Some(candidate);
            }
        }

        let manifest = current.join("Cargo.toml");
        if manifest.exists() {
            if let Ok(content) = std::fs::read_to_string(&manifest) {
                if let Ok(value) = toml::from_str::<toml::Value>(&content) {
                    if manifest_section(&value).is_some() {
                        tracing::debug!("found manifest config: {}", manifest.display());
                        return Some(manifest);
                    }
                }
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    None
}

/// 設定ファイルと CLI 指定値を解決済みの設定へ合成する
///
/// CLI の指定がフィールド単位で優先されます。
pub fn resolve(config: &FileConfig, overrides: &Overrides) -> ResolvedConfig {
    let mut settings = TraceSettings::default();

    if let Some(level) = &config.log_level {
        settings.log_level = LogLevel::parse(level);
    }
    if let Some(output) = &config.log_output {
        settings.log_output = LogOutput::parse(output);
    }
    if let Some(mode) = &config.variable_mode {
        settings.variable_mode = VariableMode::parse(mode);
    }
    if let Some(log_dir) = &config.log_dir {
        settings.log_dir = log_dir.clone();
    }
    if let Some(filter) = config.filter_workspace {
        settings.filter_workspace = filter;
    }
    if let Some(root) = &config.workspace_root {
        settings.workspace_root = Some(root.clone());
    }
    if let Some(functions) = &config.traceable_functions {
        settings.traceable_functions = Some(functions.clone());
    }

    let mut trace_async = config.trace_async.unwrap_or(false);
    let mut await_threshold_ms = config.await_threshold_ms.unwrap_or(0.0);
    let trace_tasks = config.trace_tasks.unwrap_or(true);

    // CLI の指定で上書きする
    if let Some(level) = &overrides.log_level {
        settings.log_level = LogLevel::parse(level);
    }
    if let Some(output) = &overrides.log_output {
        settings.log_output = LogOutput::parse(output);
    }
    if let Some(mode) = &overrides.variable_mode {
        settings.variable_mode = VariableMode::parse(mode);
    }
    if let Some(log_dir) = &overrides.log_dir {
        settings.log_dir = log_dir.clone();
    }
    if overrides.no_filter_workspace {
        settings.filter_workspace = false;
    }
    if let Some(functions) = &overrides.traceable_functions {
        settings.traceable_functions = Some(functions.clone());
    }
    if overrides.trace_async {
        trace_async = true;
    }
    if let Some(threshold) = overrides.await_threshold_ms {
        if threshold > 0.0 {
            await_threshold_ms = threshold;
        }
    }

    ResolvedConfig {
        settings,
        trace_async,
        await_threshold_ms,
        trace_tasks,
    }
}

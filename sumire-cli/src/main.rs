//! Sumire CLI - コマンドラインインターフェース
//!
//! 設定ファイルと CLI 指定値からトレースセッションを構築し、同梱シナリオを
//! トレース付きで実行します。終了コードは 0 が成功、それ以外（不明な
//! シナリオ、設定エラー、シナリオ内のエラー）は 1 です。

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sumire_async::{AsyncSettings, AsyncTracer};
use sumire_config::{find_config_file, load_config, resolve, FileConfig, Overrides, ResolvedConfig};
use sumire_core::Tracer;

mod scenarios;

use scenarios::Scenario;

/// Sumire - Step Tracer
#[derive(Parser)]
#[command(name = "sumire")]
#[command(version = "0.1.0")]
#[command(about = "A lightweight step-level execution tracer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: TraceCommand,
}

#[derive(Subcommand)]
enum TraceCommand {
    /// Run a bundled scenario with tracing
    Run {
        /// Scenario name (see `sumire scenarios`)
        scenario: String,

        /// Path to a configuration file (YAML or TOML)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Log verbosity level (default: INFO)
        #[arg(long, value_name = "LEVEL")]
        log_level: Option<String>,

        /// Output destination (default: FILE)
        #[arg(long, value_name = "OUTPUT")]
        log_output: Option<String>,

        /// Variable logging mode (default: ALL)
        #[arg(long, value_name = "MODE")]
        variable_mode: Option<String>,

        /// Directory for log files (default: .tracer)
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,

        /// Trace all files, not just workspace files
        #[arg(long)]
        no_filter_workspace: bool,

        /// Function names to trace (default: all)
        #[arg(long, value_name = "FUNC", num_args = 1..)]
        traceable_functions: Option<Vec<String>>,

        /// Enable tracing of coroutines and await points
        #[arg(long)]
        trace_async: bool,

        /// Only log await points taking longer than this threshold (ms)
        #[arg(long, value_name = "MS", default_value_t = 0.0)]
        await_threshold_ms: f64,
    },

    /// List the bundled scenarios
    Scenarios,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        TraceCommand::Run {
            scenario,
            config,
            log_level,
            log_output,
            variable_mode,
            log_dir,
            no_filter_workspace,
            traceable_functions,
            trace_async,
            await_threshold_ms,
        } => {
            let overrides = Overrides {
                log_level,
                log_output,
                variable_mode,
                log_dir,
                no_filter_workspace,
                traceable_functions,
                trace_async,
                await_threshold_ms: (await_threshold_ms > 0.0).then_some(await_threshold_ms),
            };
            run_scenario(&scenario, config.as_deref(), overrides)
        }
        TraceCommand::Scenarios => {
            print_scenarios();
            ExitCode::SUCCESS
        }
    }
}

/// シナリオをトレース付きで実行する
fn run_scenario(
    name: &str,
    config_path: Option<&std::path::Path>,
    overrides: Overrides,
) -> ExitCode {
    let Some(scenario) = Scenario::parse(name) else {
        eprintln!("Error: unknown scenario: {name}");
        print_scenarios();
        return ExitCode::FAILURE;
    };

    // 設定ファイルを解決する（明示指定が無ければ祖先ディレクトリを探索）
    let file_config = match resolve_file_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let resolved = resolve(&file_config, &overrides);

    println!("Tracing: {name}");
    let result = if scenario.is_async() || resolved.trace_async {
        execute_async(scenario, &resolved)
    } else {
        execute_sync(scenario, &resolved)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error running scenario: {e}");
            ExitCode::FAILURE
        }
    }
}

/// 設定ファイルを読み込む
fn resolve_file_config(
    config_path: Option<&std::path::Path>,
) -> Result<FileConfig, sumire_config::ConfigError> {
    match config_path {
        Some(path) => load_config(path),
        None => {
            let start = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            match find_config_file(&start) {
                Some(found) => load_config(&found),
                None => Ok(FileConfig::default()),
            }
        }
    }
}

/// 同期トレーサでシナリオを実行する
fn execute_sync(scenario: Scenario, resolved: &ResolvedConfig) -> anyhow::Result<()> {
    let tracer = Tracer::new(resolved.settings.clone())?;
    if let Some(path) = tracer.log_path() {
        println!("Log output: {}", path.display());
    }

    match scenario {
        Scenario::Simple => tracer.trace(scenarios::run_simple),
        Scenario::Async => unreachable!("async scenarios run on the async path"),
    }
}

/// 非同期トレーサでシナリオを実行する
fn execute_async(scenario: Scenario, resolved: &ResolvedConfig) -> anyhow::Result<()> {
    let tracer = AsyncTracer::new(
        resolved.settings.clone(),
        AsyncSettings {
            await_threshold_ms: resolved.await_threshold_ms,
            trace_tasks: resolved.trace_tasks,
        },
    )?;
    if let Some(path) = tracer.log_path() {
        println!("Log output: {}", path.display());
    }

    match scenario {
        // 同期シナリオも --trace-async 指定時は検出付きフックで走らせる
        Scenario::Simple => tracer.trace(scenarios::run_simple),
        Scenario::Async => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(tracer.run_async(
                scenarios::run_async_pipeline(tracer.clone()),
                "run_async_pipeline",
            ))
        }
    }
}

fn print_scenarios() {
    println!("Available scenarios:");
    println!();
    for (name, description) in Scenario::list() {
        println!("  {name:<8} - {description}");
    }
    println!();
    println!("Examples:");
    println!("  sumire run simple");
    println!("  sumire run simple --log-output STDOUT --variable-mode CHANGED");
    println!("  sumire run async --trace-async --await-threshold-ms 50");
    println!("  sumire run simple --config sumire.yaml");
}

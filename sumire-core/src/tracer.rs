//! 同期トレースコントローラ
//!
//! セッションの状態機械（INACTIVE / ACTIVE）を管理します。セッションに入ると
//! カウンタ・タイマ・スナップショット履歴をリセットしてフックをインストールし、
//! セッションを抜けると（正常終了でも panic でも）直前のフックを復元します。
//!
//! ACTIVE 中は、ワークスペースフィルタと関数許可リストを通過した行レベル
//! イベントだけがステップロガーへ流れます。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::hook::{self, HookGuard, TraceHook};
use crate::level::{LogLevel, LogOutput, VariableMode};
use crate::location::{Frame, Location};
use crate::logger::{format_call_path, format_runtime, format_step_header, format_variables};
use crate::output::{CaptureBuffer, OutputWriter};
use crate::session::SessionState;
use crate::snapshot::VariableSnapshot;
use crate::Result;

/// トレーサの設定
#[derive(Debug, Clone)]
pub struct TraceSettings {
    /// ワークスペース配下のファイルのみトレースするかどうか
    pub filter_workspace: bool,
    /// ワークスペースのルート（None ならカレントディレクトリ）
    pub workspace_root: Option<PathBuf>,
    /// ログファイルの出力ディレクトリ
    pub log_dir: PathBuf,
    /// トレース対象の関数名リスト（None なら全関数）
    pub traceable_functions: Option<Vec<String>>,
    /// ログレベル
    pub log_level: LogLevel,
    /// 出力先
    pub log_output: LogOutput,
    /// 変数記録モード
    pub variable_mode: VariableMode,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            filter_workspace: true,
            workspace_root: None,
            log_dir: PathBuf::from(".tracer"),
            traceable_functions: None,
            log_level: LogLevel::Info,
            log_output: LogOutput::File,
            variable_mode: VariableMode::All,
        }
    }
}

/// 同期トレーサ
///
/// クローンは同じセッション状態を共有します。
#[derive(Clone)]
pub struct Tracer {
    settings: Arc<ResolvedSettings>,
    writer: Arc<Mutex<OutputWriter>>,
    state: Arc<Mutex<SessionState>>,
}

/// 解決済みの設定
#[derive(Debug)]
struct ResolvedSettings {
    filter_workspace: bool,
    workspace_root: Option<PathBuf>,
    traceable_functions: Option<Vec<String>>,
    log_level: LogLevel,
    variable_mode: VariableMode,
}

impl Tracer {
    /// 新しいトレーサを作成する
    ///
    /// ファイルを使う出力先の場合、この時点でログファイル名が採番されます。
    pub fn new(settings: TraceSettings) -> Result<Self> {
        let writer = OutputWriter::new(settings.log_output, &settings.log_dir)?;

        let workspace_root = settings
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok());

        Ok(Self {
            settings: Arc::new(ResolvedSettings {
                filter_workspace: settings.filter_workspace,
                workspace_root,
                traceable_functions: settings.traceable_functions,
                log_level: settings.log_level,
                variable_mode: settings.variable_mode,
            }),
            writer: Arc::new(Mutex::new(writer)),
            state: Arc::new(Mutex::new(SessionState::default())),
        })
    }

    /// 既定の設定でトレーサを作成する
    pub fn with_defaults() -> Result<Self> {
        Self::new(TraceSettings::default())
    }

    /// ログレベルを取得する
    pub fn log_level(&self) -> LogLevel {
        self.settings.log_level
    }

    /// 変数記録モードを取得する
    pub fn variable_mode(&self) -> VariableMode {
        self.settings.variable_mode
    }

    /// 採番されたログファイルのパスを取得する
    pub fn log_path(&self) -> Option<PathBuf> {
        self.lock_writer().log_path().map(Path::to_path_buf)
    }

    /// ストリーム出力をインメモリバッファへ差し替える（テスト・組込み用）
    pub fn capture_stream(&self, buffer: CaptureBuffer) {
        self.lock_writer().capture_stream(buffer);
    }

    /// セッションを開始する
    ///
    /// カウンタ・タイマ・スナップショット履歴をリセットし、自身をフックと
    /// してインストールします。返されたガードが drop されるとセッションが
    /// 終了し、直前のフックが復元されます。
    pub fn session(&self) -> TraceSession {
        self.initialize();
        TraceSession {
            _guard: hook::install(Arc::new(self.clone())),
        }
    }

    /// クロージャをセッション内で実行する（デコレータ相当）
    ///
    /// クロージャの戻り値はそのまま返されます。クロージャが panic しても
    /// セッションは終了し、panic は変更されずに伝播します。
    pub fn trace<R>(&self, f: impl FnOnce() -> R) -> R {
        let _session = self.session();
        f()
    }

    /// セッション状態をリセットする
    ///
    /// 通常は `session()` / `trace()` が呼び出します。非同期側の入口から
    /// 未初期化のまま使われた場合の遅延初期化にも使用されます。
    pub fn initialize(&self) {
        self.lock_state().reset();
    }

    /// タイマが初期化済みかどうか
    pub fn is_initialized(&self) -> bool {
        self.lock_state().timer.is_some()
    }

    /// 直前のイベントからの経過時間をミリ秒で返す
    pub fn elapsed_ms(&self) -> f64 {
        self.lock_state().elapsed_ms()
    }

    /// レコードを出力先へ書き込む
    ///
    /// SILENT では何も書きません。書き込み失敗はトレース対象のプログラムへ
    /// 伝播させず、診断ストリームへ報告します。
    pub fn write_record(&self, text: &str) {
        if self.settings.log_level >= LogLevel::Silent {
            return;
        }
        if let Err(e) = self.lock_writer().write_record(text) {
            tracing::warn!("failed to write trace record: {e}");
        }
    }

    /// ファイルがトレース対象かどうか
    ///
    /// ワークスペースフィルタが有効な場合、cargo レジストリ配下のパスと
    /// ワークスペースルート外の絶対パスを除外します。相対パス（ワークスペース
    /// 内のソースが `file!()` で埋め込む形）は対象とみなします。
    fn is_traceable_file(&self, file: &str) -> bool {
        if !self.settings.filter_workspace {
            return true;
        }

        if file.contains(".cargo") {
            return false;
        }

        let path = Path::new(file);
        if path.is_absolute() {
            match &self.settings.workspace_root {
                Some(root) => path.starts_with(root),
                None => true,
            }
        } else {
            true
        }
    }

    /// 関数がトレース対象かどうか
    fn is_traceable_function(&self, function: &str) -> bool {
        match &self.settings.traceable_functions {
            Some(functions) => functions.iter().any(|f| f == function),
            None => true,
        }
    }

    /// 行レベルイベントを 1 ステップとして記録する
    ///
    /// フィルタを通過しなかったイベントはステップ番号を消費しません。
    fn log_step(&self, location: &Location, globals: VariableSnapshot, locals: VariableSnapshot) {
        let mut state = self.lock_state();

        let function = state
            .frames
            .last()
            .map(|f| f.function)
            .unwrap_or(location.module);

        if !self.is_traceable_file(location.file) || !self.is_traceable_function(function) {
            return;
        }

        if self.settings.log_level >= LogLevel::Silent {
            return;
        }

        state.step += 1;
        let mut text = format_step_header(state.step);

        if self.settings.log_level.shows_step_detail() {
            text.push_str(&format_runtime(state.elapsed_ms()));
            text.push_str(&format_call_path(
                &state.frames,
                location.file,
                location.module,
                location.line,
            ));
            text.push('\n');

            let globals = globals.filtered();
            let locals = locals.filtered();
            text.push_str(&format_variables(
                self.settings.variable_mode,
                &globals,
                &locals,
                &state.previous_globals,
                &state.previous_locals,
            ));

            if self.settings.variable_mode == VariableMode::Changed {
                state.previous_globals = globals;
                state.previous_locals = locals;
            }
        }

        // 現在のフレームの行番号を更新しておく（上位フレーム描画用）
        if let Some(top) = state.frames.last_mut() {
            top.line = location.line;
        }

        drop(state);
        self.write_record(&text);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, OutputWriter> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TraceHook for Tracer {
    fn on_line(&self, location: &Location, globals: VariableSnapshot, locals: VariableSnapshot) {
        self.log_step(location, globals, locals);
        self.lock_state().timer = Some(std::time::Instant::now());
    }

    fn on_call(&self, location: &Location, function: &'static str, is_coroutine: bool) {
        let mut state = self.lock_state();
        state.frames.push(Frame::new(location, function, is_coroutine));
        state.timer = Some(std::time::Instant::now());
    }

    fn on_return(&self, _location: &Location, _function: &'static str, _is_coroutine: bool) {
        let mut state = self.lock_state();
        state.frames.pop();
        state.timer = Some(std::time::Instant::now());
    }
}

/// アクティブなトレースセッション
///
/// drop されるとフックが取り外され、直前のフックが復元されます。
#[must_use]
pub struct TraceSession {
    _guard: HookGuard,
}

impl TraceSession {
    /// インストール済みフックのガードをセッションとして包む
    ///
    /// 拡張トレーサ（非同期側など）が独自のフックをインストールする
    /// ときに使います。
    pub fn from_guard(guard: HookGuard) -> Self {
        Self { _guard: guard }
    }
}

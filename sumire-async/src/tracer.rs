//! 非同期トレースコントローラ
//!
//! 同期トレーサを拡張し、コルーチンの開始・終了、await ポイントの
//! 開始・終了、タスクの生成・完了を追跡します。アクティブなコルーチンの
//! レジストリと、ネストした await / コルーチンを帰属させるためのスタックを
//! 保持します。
//!
//! 明示的なラップ（`trace_coroutine` / `trace_await!` / `wrap_task` /
//! `gather`）が第一のトレース手段です。`coro_scope!` フレーム経由の検出は
//! DEBUG レベルのみのベストエフォートであり、外部スケジューラに再開される
//! 既存タスクは観測できないことがあります。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use sumire_core::hook::{self, TraceHook};
use sumire_core::value::{safe_repr, short_type_name};
use sumire_core::{
    Location, LogLevel, TraceSession, TraceSettings, Tracer, VariableSnapshot,
};
use tokio::task::JoinHandle;

use crate::future::{Outcome, TracedAwait, TracedCoroutine};
use crate::record::{AwaitPoint, CoroutineRecord};
use crate::Result;

/// 結果表現の最大文字数（超過分は切り詰める）
const RESULT_REPR_LIMIT: usize = 100;

/// コルーチン ID の採番カウンタ
static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(1);

/// 非同期トレースの設定
#[derive(Debug, Clone)]
pub struct AsyncSettings {
    /// この閾値（ミリ秒）未満の await 終了レコードを抑制する（0 で無効）
    pub await_threshold_ms: f64,
    /// タスクの生成・完了を記録するかどうか
    pub trace_tasks: bool,
}

impl Default for AsyncSettings {
    fn default() -> Self {
        Self {
            await_threshold_ms: 0.0,
            trace_tasks: true,
        }
    }
}

/// 非同期トレーサ固有の可変状態
#[derive(Default)]
struct AsyncState {
    /// 非同期ステップカウンタ
    async_step: u64,
    /// アクティブなコルーチンのレジストリ
    active: HashMap<u64, Arc<Mutex<CoroutineRecord>>>,
    /// 進行中の await ポイントのスタック
    await_stack: Vec<Arc<Mutex<AwaitPoint>>>,
    /// 進行中のコルーチンのスタック
    coro_stack: Vec<Arc<Mutex<CoroutineRecord>>>,
}

impl AsyncState {
    fn reset(&mut self) {
        self.async_step = 0;
        self.active.clear();
        self.await_stack.clear();
        self.coro_stack.clear();
    }
}

/// 非同期トレーサ
///
/// クローンは同じセッション状態を共有します。協調的なシングルスレッド
/// 実行（tokio の current_thread フレーバ等）を前提としています。
#[derive(Clone)]
pub struct AsyncTracer {
    base: Tracer,
    await_threshold_ms: f64,
    trace_tasks: bool,
    state: Arc<Mutex<AsyncState>>,
}

impl AsyncTracer {
    /// 新しい非同期トレーサを作成する
    pub fn new(settings: TraceSettings, async_settings: AsyncSettings) -> Result<Self> {
        Ok(Self::from_tracer(Tracer::new(settings)?, async_settings))
    }

    /// 既存の同期トレーサから非同期トレーサを作成する
    pub fn from_tracer(base: Tracer, async_settings: AsyncSettings) -> Self {
        Self {
            base,
            await_threshold_ms: async_settings.await_threshold_ms,
            trace_tasks: async_settings.trace_tasks,
            state: Arc::new(Mutex::new(AsyncState::default())),
        }
    }

    /// 既定の設定で非同期トレーサを作成する
    pub fn with_defaults() -> Result<Self> {
        Self::new(TraceSettings::default(), AsyncSettings::default())
    }

    /// ベースの同期トレーサを取得する
    pub fn base(&self) -> &Tracer {
        &self.base
    }

    /// 採番されたログファイルのパスを取得する
    pub fn log_path(&self) -> Option<std::path::PathBuf> {
        self.base.log_path()
    }

    /// ストリーム出力をインメモリバッファへ差し替える（テスト・組込み用）
    pub fn capture_stream(&self, buffer: sumire_core::CaptureBuffer) {
        self.base.capture_stream(buffer);
    }

    /// アクティブなコルーチン名の一覧を取得する
    pub fn active_coroutines(&self) -> Vec<String> {
        self.lock_state()
            .active
            .values()
            .map(|r| r.lock().unwrap_or_else(|e| e.into_inner()).name.clone())
            .collect()
    }

    /// セッション状態をリセットする
    pub fn initialize(&self) {
        self.base.initialize();
        self.lock_state().reset();
    }

    /// タイマが未初期化なら初期化する
    fn ensure_initialized(&self) {
        if !self.base.is_initialized() {
            self.initialize();
        }
    }

    /// セッションを開始する
    ///
    /// 自身を（コルーチン検出を含むフックとして）インストールします。
    /// 返されたガードが drop されると直前のフックが復元されます。
    pub fn session(&self) -> TraceSession {
        self.initialize();
        TraceSession::from_guard(hook::install(Arc::new(self.clone())))
    }

    /// クロージャをセッション内で実行する（同期デコレータ相当）
    pub fn trace<R>(&self, f: impl FnOnce() -> R) -> R {
        let _session = self.session();
        f()
    }

    /// コルーチンをセッション内でトレースしながら実行する
    ///
    /// セッションの入り口として使います。フックの復元はこの Future の
    /// 完了（または drop）時に行われます。
    pub async fn run_async<F: Future>(&self, future: F, name: impl Into<String>) -> F::Output {
        self.initialize();
        let _session = TraceSession::from_guard(hook::install(Arc::new(self.clone())));
        self.trace_coroutine(future, name).await
    }

    /// コルーチンの実行をトレースする
    ///
    /// 包んだコルーチンと同じ結果を返します。開始・終了レコードが
    /// 出力され、終了レコードはキャンセル時にも一度だけ出力されます。
    pub fn trace_coroutine<F: Future>(
        &self,
        future: F,
        name: impl Into<String>,
    ) -> TracedCoroutine<F> {
        self.ensure_initialized();
        TracedCoroutine::new(
            self.clone(),
            future,
            name.into(),
            Box::new(|_| Outcome::default()),
        )
    }

    /// 失敗しうるコルーチンの実行をトレースする
    ///
    /// `Err` は例外相当の結果として終了レコードに記録され、呼び出し元へ
    /// そのまま返されます。
    pub fn try_trace_coroutine<T, E, F>(
        &self,
        future: F,
        name: impl Into<String>,
    ) -> TracedCoroutine<F>
    where
        E: fmt::Display,
        F: Future<Output = std::result::Result<T, E>>,
    {
        self.ensure_initialized();
        TracedCoroutine::new(
            self.clone(),
            future,
            name.into(),
            Box::new(|output| Outcome {
                error: output.as_ref().err().map(format_error),
                rendered: None,
            }),
        )
    }

    /// await ポイントを明示的にトレースする
    ///
    /// 通常は呼び出し位置を自動で埋め込む `trace_await!` マクロを使います。
    pub fn trace_await<F>(
        &self,
        future: F,
        expr: impl Into<String>,
        location: Location,
    ) -> TracedAwait<F>
    where
        F: Future,
        F::Output: fmt::Debug,
    {
        self.ensure_initialized();
        let render = self.base.log_level() <= LogLevel::Debug;
        TracedAwait::new(
            self.clone(),
            future,
            expr.into(),
            location,
            Box::new(move |output| Outcome {
                error: None,
                rendered: render.then(|| truncate_repr(safe_repr(output))),
            }),
        )
    }

    /// 失敗しうる await ポイントを明示的にトレースする
    pub fn try_trace_await<T, E, F>(
        &self,
        future: F,
        expr: impl Into<String>,
        location: Location,
    ) -> TracedAwait<F>
    where
        T: fmt::Debug,
        E: fmt::Display,
        F: Future<Output = std::result::Result<T, E>>,
    {
        self.ensure_initialized();
        let render = self.base.log_level() <= LogLevel::Debug;
        TracedAwait::new(
            self.clone(),
            future,
            expr.into(),
            location,
            Box::new(move |output| match output {
                Ok(value) => Outcome {
                    error: None,
                    rendered: render.then(|| truncate_repr(safe_repr(value))),
                },
                Err(e) => Outcome {
                    error: Some(format_error(e)),
                    rendered: None,
                },
            }),
        )
    }

    /// コルーチンをトレース付きのタスクとして並行実行する
    ///
    /// タスク生成を直ちに記録し、完了（キャンセルを含む）を経過時間と
    /// ともに一度だけ記録します。キャンセルは例外なしとして扱われます。
    pub fn wrap_task<F>(&self, future: F, name: impl Into<String>) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let name = name.into();
        self.ensure_initialized();
        self.log_task_created(&name);

        let tracer = self.clone();
        let start = Instant::now();
        let task_name = name.clone();
        tokio::spawn(async move {
            let mut guard = TaskGuard::new(tracer.clone(), task_name.clone(), start);
            let output = tracer.trace_coroutine(future, task_name).await;
            guard.complete(None);
            output
        })
    }

    /// 失敗しうるコルーチンをトレース付きのタスクとして並行実行する
    ///
    /// タスクの `Err` 終了は完了レコードに例外として記録されます。
    pub fn try_wrap_task<T, E, F>(
        &self,
        future: F,
        name: impl Into<String>,
    ) -> JoinHandle<std::result::Result<T, E>>
    where
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let name = name.into();
        self.ensure_initialized();
        self.log_task_created(&name);

        let tracer = self.clone();
        let start = Instant::now();
        let task_name = name.clone();
        tokio::spawn(async move {
            let mut guard = TaskGuard::new(tracer.clone(), task_name.clone(), start);
            let output = tracer.try_trace_coroutine(future, task_name).await;
            guard.complete(output.as_ref().err().map(format_error));
            output
        })
    }

    /// 複数のコルーチンを並行実行し、入力順の結果リストを返す
    ///
    /// 各入力は `trace_coroutine` でラップされます。`Result` を返す
    /// コルーチンに対して使うと、失敗したメンバーの結果も要素として
    /// そのまま並びます（インライン例外）。
    pub fn gather<F: Future>(
        &self,
        futures: Vec<F>,
    ) -> impl Future<Output = Vec<F::Output>> {
        let traced: Vec<_> = futures
            .into_iter()
            .enumerate()
            .map(|(i, f)| self.trace_coroutine(f, format!("gather_task_{i}")))
            .collect();
        futures::future::join_all(traced)
    }

    /// 複数の失敗しうるコルーチンを並行実行する
    ///
    /// 最初の `Err` で join を中断し、そのエラーを伝播します。
    pub fn try_gather<T, E, F>(
        &self,
        futures: Vec<F>,
    ) -> impl Future<Output = std::result::Result<Vec<T>, E>>
    where
        E: fmt::Display,
        F: Future<Output = std::result::Result<T, E>>,
    {
        let traced: Vec<_> = futures
            .into_iter()
            .enumerate()
            .map(|(i, f)| self.try_trace_coroutine(f, format!("gather_task_{i}")))
            .collect();
        futures::future::try_join_all(traced)
    }

    /// コルーチンの開始を記録する（ラッパーの最初の poll から呼ばれる）
    pub(crate) fn begin_coroutine(&self, name: String) -> Arc<Mutex<CoroutineRecord>> {
        self.ensure_initialized();
        self.register_coroutine(name, false)
    }

    fn register_coroutine(&self, name: String, detected: bool) -> Arc<Mutex<CoroutineRecord>> {
        let id = NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(Mutex::new(CoroutineRecord::new(id, name, detected)));

        {
            let mut state = self.lock_state();
            if !detected {
                state.active.insert(id, Arc::clone(&record));
            }
            state.coro_stack.push(Arc::clone(&record));
        }

        self.log_coro_start(&record);
        record
    }

    /// コルーチンの完了を記録する
    ///
    /// 完了記録・レジストリからの削除・スタックの巻き戻しを行います。
    /// 2 回目以降の呼び出しは何もしません。
    pub(crate) fn finish_coroutine(
        &self,
        record: &Arc<Mutex<CoroutineRecord>>,
        error: Option<String>,
    ) {
        {
            let mut rec = record.lock().unwrap_or_else(|e| e.into_inner());
            if rec.is_completed() {
                return;
            }
            rec.complete(error);
        }

        self.log_coro_end(record);

        let mut state = self.lock_state();
        let id = record.lock().unwrap_or_else(|e| e.into_inner()).id;
        state.active.remove(&id);
        remove_from_stack(&mut state.coro_stack, record);
    }

    /// await の開始を記録する（ラッパーの最初の poll から呼ばれる）
    pub(crate) fn begin_await(&self, expr: String, location: Location) -> Arc<Mutex<AwaitPoint>> {
        self.ensure_initialized();

        let coro_name = {
            let state = self.lock_state();
            state
                .coro_stack
                .last()
                .map(|r| r.lock().unwrap_or_else(|e| e.into_inner()).name.clone())
                .unwrap_or_else(|| "<unknown>".to_string())
        };

        let point = Arc::new(Mutex::new(AwaitPoint::new(
            coro_name,
            location.file,
            location.line,
            expr,
        )));

        {
            let mut state = self.lock_state();
            state.await_stack.push(Arc::clone(&point));
            if let Some(coro) = state.coro_stack.last() {
                coro.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_await(Arc::clone(&point));
            }
        }

        self.log_await_start(&point);
        point
    }

    /// await の完了を記録する
    ///
    /// 終了レコードは経過時間が閾値未満なら抑制されますが、スタックの
    /// 巻き戻しは結果に関わらず必ず行われます。
    pub(crate) fn finish_await(
        &self,
        point: &Arc<Mutex<AwaitPoint>>,
        error: Option<String>,
        rendered: Option<String>,
    ) {
        {
            let mut p = point.lock().unwrap_or_else(|e| e.into_inner());
            if p.is_completed() {
                return;
            }
            p.complete(error, rendered);
        }

        self.log_await_end(point);

        let mut state = self.lock_state();
        remove_from_stack(&mut state.await_stack, point);
    }

    /// 非同期レコードを 1 ステップとして出力する
    fn log_async(&self, message: &str, label: &str) {
        if self.base.log_level() >= LogLevel::Silent {
            return;
        }

        let step = {
            let mut state = self.lock_state();
            state.async_step += 1;
            state.async_step
        };

        let elapsed = self.base.elapsed_ms();
        let text = format!(
            "--------------------- Async Step {step} ---------------------\n\
             Time: {elapsed:.4} ms | {label}\n\
             {message}\n"
        );
        self.base.write_record(&text);
    }

    fn log_coro_start(&self, record: &Arc<Mutex<CoroutineRecord>>) {
        if self.base.log_level() >= LogLevel::Silent {
            return;
        }
        let name = record.lock().unwrap_or_else(|e| e.into_inner()).name.clone();
        let msg = format!("🚀 COROUTINE START: {name}\n");
        self.log_async(&msg, "CORO");
    }

    fn log_coro_end(&self, record: &Arc<Mutex<CoroutineRecord>>) {
        if self.base.log_level() >= LogLevel::Silent {
            return;
        }

        let rec = record.lock().unwrap_or_else(|e| e.into_inner());
        let status = if rec.error().is_none() { "✓" } else { "✗" };
        let mut msg = format!("🏁 COROUTINE END: {} {status}\n", rec.name);
        msg.push_str(&format!("   Total duration: {:.4} ms\n", rec.duration_ms()));
        msg.push_str(&format!("   Await points: {}\n", rec.await_count()));

        if rec.await_count() > 0 {
            msg.push_str(&format!(
                "   Total await time: {:.4} ms\n",
                rec.total_await_ms()
            ));
        }

        if let Some(error) = rec.error() {
            msg.push_str(&format!("   Exception: {error}\n"));
        }
        drop(rec);

        self.log_async(&msg, "CORO");
    }

    fn log_await_start(&self, point: &Arc<Mutex<AwaitPoint>>) {
        if self.base.log_level() >= LogLevel::Silent {
            return;
        }

        let p = point.lock().unwrap_or_else(|e| e.into_inner());
        let mut msg = format!("⏳ AWAIT START: {}\n", p.coro_name);
        msg.push_str(&format!("   File: {}:{}\n", p.file, p.line));
        if !p.awaited_expr.is_empty() {
            msg.push_str(&format!("   Expression: {}\n", p.awaited_expr));
        }
        drop(p);

        self.log_async(&msg, "AWAIT");
    }

    fn log_await_end(&self, point: &Arc<Mutex<AwaitPoint>>) {
        if self.base.log_level() >= LogLevel::Silent {
            return;
        }

        let p = point.lock().unwrap_or_else(|e| e.into_inner());

        // 閾値未満の await は記録しない（0 で無効）
        if p.duration_ms() < self.await_threshold_ms {
            return;
        }

        let status = if p.error().is_none() { "✓" } else { "✗" };
        let mut msg = format!("⌛ AWAIT END: {} {status}\n", p.coro_name);
        msg.push_str(&format!("   File: {}:{}\n", p.file, p.line));
        msg.push_str(&format!("   Duration: {:.4} ms\n", p.duration_ms()));

        if let Some(error) = p.error() {
            msg.push_str(&format!("   Exception: {error}\n"));
        } else if let Some(result) = p.rendered_result() {
            msg.push_str(&format!("   Result: {result}\n"));
        }
        drop(p);

        self.log_async(&msg, "AWAIT");
    }

    fn log_task_created(&self, name: &str) {
        if self.base.log_level() >= LogLevel::Silent || !self.trace_tasks {
            return;
        }
        let msg = format!("📋 TASK CREATED: {name}\n");
        self.log_async(&msg, "TASK");
    }

    fn log_task_done(&self, name: &str, duration_ms: f64, error: Option<&str>) {
        if self.base.log_level() >= LogLevel::Silent || !self.trace_tasks {
            return;
        }

        let status = if error.is_none() { "✓" } else { "✗" };
        let mut msg = format!("📋 TASK DONE: {name} {status}\n");
        msg.push_str(&format!("   Duration: {duration_ms:.4} ms\n"));
        if let Some(error) = error {
            msg.push_str(&format!("   Exception: {error}\n"));
        }

        self.log_async(&msg, "TASK");
    }

    fn lock_state(&self) -> MutexGuard<'_, AsyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TraceHook for AsyncTracer {
    fn on_line(&self, location: &Location, globals: VariableSnapshot, locals: VariableSnapshot) {
        self.base.on_line(location, globals, locals);
    }

    fn on_call(&self, location: &Location, function: &'static str, is_coroutine: bool) {
        self.base.on_call(location, function, is_coroutine);

        // ベストエフォートのコルーチン検出（DEBUG のみ）
        if is_coroutine && self.base.log_level() <= LogLevel::Debug {
            self.register_coroutine(function.to_string(), true);
        }
    }

    fn on_return(&self, location: &Location, function: &'static str, is_coroutine: bool) {
        self.base.on_return(location, function, is_coroutine);

        if is_coroutine {
            // 検出パスで積まれた記録だけを巻き戻す
            let record = {
                let mut state = self.lock_state();
                let top_is_detected = state
                    .coro_stack
                    .last()
                    .map(|top| top.lock().unwrap_or_else(|e| e.into_inner()).is_detected())
                    .unwrap_or(false);
                if top_is_detected {
                    state.coro_stack.pop()
                } else {
                    None
                }
            };

            if let Some(record) = record {
                {
                    let mut rec = record.lock().unwrap_or_else(|e| e.into_inner());
                    if rec.is_completed() {
                        return;
                    }
                    rec.complete(None);
                }
                self.log_coro_end(&record);
            }
        }
    }
}

/// タスク完了記録のガード
///
/// drop 時（正常完了・キャンセルのいずれでも）に完了レコードを
/// ちょうど一度だけ出します。
struct TaskGuard {
    tracer: AsyncTracer,
    name: String,
    start: Instant,
    error: Option<String>,
}

impl TaskGuard {
    fn new(tracer: AsyncTracer, name: String, start: Instant) -> Self {
        Self {
            tracer,
            name,
            start,
            error: None,
        }
    }

    fn complete(&mut self, error: Option<String>) {
        self.error = error;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.tracer
            .log_task_done(&self.name, duration_ms, self.error.as_deref());
    }
}

/// スタックから記録を取り除く（通常は最上位、崩れていれば一致位置）
fn remove_from_stack<T>(stack: &mut Vec<Arc<T>>, target: &Arc<T>) {
    if let Some(top) = stack.last() {
        if Arc::ptr_eq(top, target) {
            stack.pop();
            return;
        }
    }
    if let Some(pos) = stack.iter().position(|item| Arc::ptr_eq(item, target)) {
        stack.remove(pos);
        tracing::debug!("async record stack was not unwound in LIFO order");
    }
}

/// エラー値を `型名: メッセージ` 形式に整形する
fn format_error<E: fmt::Display>(error: &E) -> String {
    format!(
        "{}: {error}",
        short_type_name(std::any::type_name::<E>())
    )
}

/// 結果表現を上限文字数で切り詰める
fn truncate_repr(repr: String) -> String {
    if repr.chars().count() <= RESULT_REPR_LIMIT {
        return repr;
    }
    let truncated: String = repr.chars().take(RESULT_REPR_LIMIT).collect();
    format!("{truncated}...")
}

/// トレース付きの sleep
///
/// `tokio::time::sleep` を await ポイントとして記録します。
pub fn traced_sleep(tracer: &AsyncTracer, duration: Duration) -> TracedAwait<tokio::time::Sleep> {
    tracer.trace_await(
        tokio::time::sleep(duration),
        format!("sleep({duration:?})"),
        Location::new(file!(), line!(), module_path!()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(format_error(&error), "Error: missing");
    }

    #[test]
    fn test_truncate_repr() {
        let short = "abc".to_string();
        assert_eq!(truncate_repr(short), "abc");

        let long = "x".repeat(150);
        let truncated = truncate_repr(long);
        assert_eq!(truncated.chars().count(), RESULT_REPR_LIMIT + 3);
        assert!(truncated.ends_with("..."));
    }
}

//! コルーチンと await ポイントの記録
//!
//! トレース中の非同期呼び出し 1 件（コルーチン）と、その本体で発生した
//! サスペンション境界 1 箇所（await ポイント）の帳簿オブジェクトです。
//! 終了時刻は一度だけ設定され、await リストはコルーチンがアクティブな
//! 間のみ伸びます。

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// await ポイント 1 箇所の記録
#[derive(Debug)]
pub struct AwaitPoint {
    /// 所属するコルーチン名
    pub coro_name: String,
    /// await が発生したソースファイル
    pub file: &'static str,
    /// await が発生した行番号
    pub line: u32,
    /// await された式の説明
    pub awaited_expr: String,
    start: Instant,
    end: Option<Instant>,
    error: Option<String>,
    rendered_result: Option<String>,
}

impl AwaitPoint {
    /// 新しい await ポイントを作成する（開始時刻は現在時刻）
    pub fn new(
        coro_name: impl Into<String>,
        file: &'static str,
        line: u32,
        awaited_expr: impl Into<String>,
    ) -> Self {
        Self {
            coro_name: coro_name.into(),
            file,
            line,
            awaited_expr: awaited_expr.into(),
            start: Instant::now(),
            end: None,
            error: None,
            rendered_result: None,
        }
    }

    /// 経過時間をミリ秒で返す
    ///
    /// 未完了の間は現在時刻までの経過時間を返します。
    pub fn duration_ms(&self) -> f64 {
        let end = self.end.unwrap_or_else(Instant::now);
        end.duration_since(self.start).as_secs_f64() * 1000.0
    }

    /// await を完了としてマークする
    ///
    /// 終了時刻は最初の呼び出しでのみ設定されます。
    pub fn complete(&mut self, error: Option<String>, rendered_result: Option<String>) {
        if self.end.is_some() {
            return;
        }
        self.end = Some(Instant::now());
        self.error = error;
        self.rendered_result = rendered_result;
    }

    /// 完了済みかどうか
    pub fn is_completed(&self) -> bool {
        self.end.is_some()
    }

    /// 例外相当の結果
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 結果の文字列表現（DEBUG 時のみ記録される）
    pub fn rendered_result(&self) -> Option<&str> {
        self.rendered_result.as_deref()
    }
}

/// トレース中のコルーチン 1 件の記録
#[derive(Debug)]
pub struct CoroutineRecord {
    /// コルーチン ID
    pub id: u64,
    /// コルーチン名
    pub name: String,
    start: Instant,
    end: Option<Instant>,
    await_points: Vec<Arc<Mutex<AwaitPoint>>>,
    error: Option<String>,
    detected: bool,
}

impl CoroutineRecord {
    /// 新しいコルーチン記録を作成する
    ///
    /// `detected` はベストエフォートのコルーチン検出パスで作られた
    /// ことを示します（明示的なラップで作られた記録と混ざらないように
    /// するため）。
    pub fn new(id: u64, name: impl Into<String>, detected: bool) -> Self {
        Self {
            id,
            name: name.into(),
            start: Instant::now(),
            end: None,
            await_points: Vec::new(),
            error: None,
            detected,
        }
    }

    /// 総経過時間をミリ秒で返す
    pub fn duration_ms(&self) -> f64 {
        let end = self.end.unwrap_or_else(Instant::now);
        end.duration_since(self.start).as_secs_f64() * 1000.0
    }

    /// コルーチンを完了としてマークする
    ///
    /// 終了時刻は最初の呼び出しでのみ設定されます。
    pub fn complete(&mut self, error: Option<String>) {
        if self.end.is_some() {
            return;
        }
        self.end = Some(Instant::now());
        self.error = error;
    }

    /// 完了済みかどうか
    pub fn is_completed(&self) -> bool {
        self.end.is_some()
    }

    /// await ポイントを追加する
    ///
    /// 完了後の記録には追加されません。
    pub fn push_await(&mut self, point: Arc<Mutex<AwaitPoint>>) {
        if self.end.is_none() {
            self.await_points.push(point);
        }
    }

    /// 観測した await ポイント数
    pub fn await_count(&self) -> usize {
        self.await_points.len()
    }

    /// await に費やした合計時間をミリ秒で返す
    pub fn total_await_ms(&self) -> f64 {
        self.await_points
            .iter()
            .map(|p| p.lock().unwrap_or_else(|e| e.into_inner()).duration_ms())
            .sum()
    }

    /// 例外相当の結果
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// ベストエフォート検出で作られた記録かどうか
    pub fn is_detected(&self) -> bool {
        self.detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_await_point_completes_once() {
        let mut point = AwaitPoint::new("worker", "src/lib.rs", 10, "fetch()");
        assert!(!point.is_completed());

        point.complete(None, Some("42".to_string()));
        assert!(point.is_completed());
        let first_duration = point.duration_ms();

        // 2 回目の complete は無視される
        point.complete(Some("late error".to_string()), None);
        assert!(point.error().is_none());
        assert_eq!(point.rendered_result(), Some("42"));
        assert!((point.duration_ms() - first_duration).abs() < 1.0);
    }

    #[test]
    fn test_await_list_grows_only_while_active() {
        let mut record = CoroutineRecord::new(1, "worker", false);
        record.push_await(Arc::new(Mutex::new(AwaitPoint::new(
            "worker", "a.rs", 1, "x",
        ))));
        assert_eq!(record.await_count(), 1);

        record.complete(None);
        record.push_await(Arc::new(Mutex::new(AwaitPoint::new(
            "worker", "a.rs", 2, "y",
        ))));
        assert_eq!(record.await_count(), 1, "Await list must not grow after completion");
    }

    #[test]
    fn test_coroutine_error_attribution() {
        let mut record = CoroutineRecord::new(2, "failing", false);
        record.complete(Some("Error: out of range".to_string()));
        assert_eq!(record.error(), Some("Error: out of range"));
    }
}

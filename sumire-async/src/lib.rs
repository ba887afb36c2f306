//! Sumire 非同期トレース機能
//!
//! このクレートは、同期トレーサを拡張してコルーチンと await ポイントを
//! 追跡する機能を提供します。コルーチンの開始・終了、await の開始・終了と
//! 所要時間、タスクの生成・完了の記録、および await 所要時間の閾値
//! フィルタリングを行います。

pub mod future;
pub mod record;
pub mod tracer;

pub use future::{Outcome, TracedAwait, TracedCoroutine};
pub use record::{AwaitPoint, CoroutineRecord};
pub use tracer::{traced_sleep, AsyncSettings, AsyncTracer};

// マクロ展開から使用するために再エクスポート
pub use sumire_core::Location;

/// 非同期トレース機能の結果型
pub type Result<T> = anyhow::Result<T>;

/// await ポイントをトレースする
///
/// await された式の文字列と呼び出し位置を自動で埋め込みます。
///
/// ```ignore
/// let data = trace_await!(tracer, fetch_data("first")).await;
/// ```
#[macro_export]
macro_rules! trace_await {
    ($tracer:expr, $future:expr) => {
        $tracer.trace_await(
            $future,
            stringify!($future),
            $crate::Location::new(file!(), line!(), module_path!()),
        )
    };
}

/// 失敗しうる await ポイントをトレースする
///
/// `Err` は例外相当の結果として終了レコードに記録され、呼び出し元へ
/// そのまま返されます。
#[macro_export]
macro_rules! try_trace_await {
    ($tracer:expr, $future:expr) => {
        $tracer.try_trace_await(
            $future,
            stringify!($future),
            $crate::Location::new(file!(), line!(), module_path!()),
        )
    };
}

//! 計装マクロ
//!
//! トレース対象のプログラムが自分自身に埋め込む計装ポイントです。
//! インタプリタの行フックを持たない Rust では、行レベルイベントと
//! スコープの出入りを明示的にマークします。
//!
//! ```ignore
//! fn calculate(a: i32, b: i32) -> i32 {
//!     let _scope = sumire_core::scope!("calculate");
//!     let result = a + b;
//!     sumire_core::step!(result);
//!     result
//! }
//! ```

use crate::hook;
use crate::location::Location;

/// 現在のソース位置を埋め込む
#[macro_export]
macro_rules! location {
    () => {
        $crate::Location::new(file!(), line!(), module_path!())
    };
}

/// 行レベルイベントを 1 つ発火する
///
/// 列挙したローカル変数がスナップショットとしてキャプチャされます。
/// `globals:` / `locals:` 形式では両スコープを別々に指定できます。
/// フックがインストールされていなければキャプチャは行われません。
#[macro_export]
macro_rules! step {
    () => {{
        if $crate::hook::active() {
            $crate::hook::on_line(
                &$crate::location!(),
                $crate::VariableSnapshot::new(),
                $crate::VariableSnapshot::new(),
            );
        }
    }};
    (globals: [$($global:ident),* $(,)?], locals: [$($local:ident),* $(,)?]) => {{
        if $crate::hook::active() {
            let mut globals = $crate::VariableSnapshot::new();
            $( globals.insert(stringify!($global), $crate::ValueRecord::capture(&$global)); )*
            let mut locals = $crate::VariableSnapshot::new();
            $( locals.insert(stringify!($local), $crate::ValueRecord::capture(&$local)); )*
            $crate::hook::on_line(&$crate::location!(), globals, locals);
        }
    }};
    ($($local:ident),+ $(,)?) => {{
        if $crate::hook::active() {
            let mut locals = $crate::VariableSnapshot::new();
            $( locals.insert(stringify!($local), $crate::ValueRecord::capture(&$local)); )+
            $crate::hook::on_line(
                &$crate::location!(),
                $crate::VariableSnapshot::new(),
                locals,
            );
        }
    }};
}

/// 関数スコープをマークする
///
/// 返されたガードを束縛している間、コールパスにフレームが積まれます。
/// ガードの drop（panic 時を含む）でフレームが取り除かれます。
#[macro_export]
macro_rules! scope {
    ($name:expr) => {
        $crate::ScopeGuard::enter(&$crate::location!(), $name, false)
    };
}

/// コルーチン本体のスコープをマークする
///
/// `scope!` と同様ですが、フレームをコルーチン本体として報告します。
/// 非同期トレーサはこれをベストエフォートのコルーチン検出に利用します。
#[macro_export]
macro_rules! coro_scope {
    ($name:expr) => {
        $crate::ScopeGuard::enter(&$crate::location!(), $name, true)
    };
}

/// スコープマーカーの RAII ガード
///
/// 作成時に進入イベント、drop 時に脱出イベントを発火します。
#[must_use]
pub struct ScopeGuard {
    location: Location,
    function: &'static str,
    is_coroutine: bool,
}

impl ScopeGuard {
    /// スコープへ入る（通常は `scope!` / `coro_scope!` マクロ経由で呼び出す）
    pub fn enter(location: &Location, function: &'static str, is_coroutine: bool) -> Self {
        hook::on_call(location, function, is_coroutine);
        Self {
            location: *location,
            function,
            is_coroutine,
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        hook::on_return(&self.location, self.function, self.is_coroutine);
    }
}

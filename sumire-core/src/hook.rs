//! 計装フックのレジストリ
//!
//! ステップイベントを受け取るフックを、セッションの寿命に合わせて
//! push/pop するスレッドローカルなスタックで管理します。セッションガードの
//! drop が直前のフックを無条件に復元するため、ネストしたセッションは
//! 厳密な LIFO で巻き戻ります。
//!
//! フック内部で発生した panic はトレース対象のプログラムへ伝播させず、
//! 診断ストリームへ報告してトレースを継続します。

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::location::Location;
use crate::snapshot::VariableSnapshot;

/// ステップイベントを受け取るフック
///
/// 計装マクロから発火するイベントが、インストール中の最上位フックへ
/// 配送されます。
pub trait TraceHook {
    /// 行レベルイベント
    fn on_line(&self, location: &Location, globals: VariableSnapshot, locals: VariableSnapshot);

    /// 関数（スコープ）への進入イベント
    fn on_call(&self, location: &Location, function: &'static str, is_coroutine: bool);

    /// 関数（スコープ）からの脱出イベント
    fn on_return(&self, location: &Location, function: &'static str, is_coroutine: bool);
}

thread_local! {
    static HOOK_STACK: RefCell<Vec<Arc<dyn TraceHook>>> = RefCell::new(Vec::new());
}

/// フックをインストールする
///
/// 返されたガードが drop されるまでこのフックが最上位になります。
/// drop 時に pop され、直前のフックが復元されます。
pub fn install(hook: Arc<dyn TraceHook>) -> HookGuard {
    HOOK_STACK.with(|stack| {
        stack.borrow_mut().push(Arc::clone(&hook));
    });
    HookGuard { hook }
}

/// フックがインストールされているかどうか
///
/// 計装マクロはスナップショットを構築する前にこれを確認し、
/// 非アクティブ時のコストを避けます。
pub fn active() -> bool {
    HOOK_STACK.with(|stack| !stack.borrow().is_empty())
}

/// 最上位のフックを取得する
fn current() -> Option<Arc<dyn TraceHook>> {
    HOOK_STACK.with(|stack| stack.borrow().last().cloned())
}

/// 行レベルイベントを配送する
pub fn on_line(location: &Location, globals: VariableSnapshot, locals: VariableSnapshot) {
    if let Some(hook) = current() {
        guarded(|| hook.on_line(location, globals, locals));
    }
}

/// スコープ進入イベントを配送する
pub fn on_call(location: &Location, function: &'static str, is_coroutine: bool) {
    if let Some(hook) = current() {
        guarded(|| hook.on_call(location, function, is_coroutine));
    }
}

/// スコープ脱出イベントを配送する
pub fn on_return(location: &Location, function: &'static str, is_coroutine: bool) {
    if let Some(hook) = current() {
        guarded(|| hook.on_return(location, function, is_coroutine));
    }
}

/// フック内の panic を遮断して実行する
fn guarded(f: impl FnOnce()) {
    if let Err(e) = panic::catch_unwind(AssertUnwindSafe(f)) {
        let message = panic_message(&e);
        tracing::warn!("trace hook panicked: {message}");
    }
}

/// panic ペイロードからメッセージを取り出す
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// インストール済みフックの RAII ガード
///
/// drop 時にスタックから自分自身を取り除き、直前のフックを復元します。
/// panic による巻き戻し中でも drop は実行されます。
pub struct HookGuard {
    hook: Arc<dyn TraceHook>,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        HOOK_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            // 通常は LIFO で最上位が自分自身
            if let Some(top) = stack.last() {
                if Arc::ptr_eq(top, &self.hook) {
                    stack.pop();
                    return;
                }
            }
            // 順序が崩れていた場合も自分だけを取り除く
            if let Some(pos) = stack.iter().position(|h| Arc::ptr_eq(h, &self.hook)) {
                stack.remove(pos);
                tracing::warn!("trace sessions were not unwound in LIFO order");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingHook {
        label: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl TraceHook for RecordingHook {
        fn on_line(&self, _location: &Location, _globals: VariableSnapshot, _locals: VariableSnapshot) {
            self.events.lock().unwrap().push(format!("{}:line", self.label));
        }

        fn on_call(&self, _location: &Location, function: &'static str, _is_coroutine: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:call:{}", self.label, function));
        }

        fn on_return(&self, _location: &Location, function: &'static str, _is_coroutine: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:return:{}", self.label, function));
        }
    }

    const LOC: Location = Location::new("src/lib.rs", 1, "test");

    #[test]
    fn test_nested_sessions_restore_lifo() {
        let events = Arc::new(Mutex::new(Vec::new()));

        let outer = Arc::new(RecordingHook {
            label: "outer",
            events: Arc::clone(&events),
        });
        let inner = Arc::new(RecordingHook {
            label: "inner",
            events: Arc::clone(&events),
        });

        assert!(!active());
        {
            let _outer_guard = install(outer);
            on_call(&LOC, "f", false);
            {
                let _inner_guard = install(inner);
                on_call(&LOC, "g", false);
            }
            // 内側のセッション終了後は外側のフックが復元される
            on_return(&LOC, "f", false);
        }
        assert!(!active());

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["outer:call:f", "inner:call:g", "outer:return:f"]
        );
    }

    #[test]
    fn test_hook_panic_does_not_propagate() {
        struct PanickingHook;
        impl TraceHook for PanickingHook {
            fn on_line(&self, _: &Location, _: VariableSnapshot, _: VariableSnapshot) {
                panic!("hook failure");
            }
            fn on_call(&self, _: &Location, _: &'static str, _: bool) {}
            fn on_return(&self, _: &Location, _: &'static str, _: bool) {}
        }

        let _guard = install(Arc::new(PanickingHook));
        // panic はここで吸収され、呼び出し側には届かない
        on_line(&LOC, VariableSnapshot::new(), VariableSnapshot::new());
    }
}

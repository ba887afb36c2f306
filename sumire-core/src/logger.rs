//! ステップレコードの整形
//!
//! 1 ステップ分のログテキストを組み立てる純粋関数群です。状態は持たず、
//! 呼び出し側（トレースコントローラ）がスナップショット履歴を管理します。

use crate::level::VariableMode;
use crate::location::Frame;
use crate::snapshot::{DiffEntry, VariableSnapshot};

/// ステップレコードのヘッダ行を整形する
pub fn format_step_header(step: u64) -> String {
    format!("--------------------- Step {step} ---------------------\n")
}

/// 経過時間行を整形する
pub fn format_runtime(elapsed_ms: f64) -> String {
    format!("Runtime: {elapsed_ms:.4} ms\n")
}

/// コールパスを整形する
///
/// 最外のフレームから現在のフレームまでを 1 行ずつ
/// `file::function -- line N` の形式で並べます。フレームが 1 つもない場合は
/// 現在位置をモジュールパスを関数名の代わりにして 1 行だけ出力します。
pub fn format_call_path(
    frames: &[Frame],
    current_file: &str,
    current_module: &str,
    current_line: u32,
) -> String {
    let mut text = String::new();

    if frames.is_empty() {
        text.push_str(&format!(
            "{current_file}::{current_module} -- line {current_line}\n"
        ));
        return text;
    }

    for frame in &frames[..frames.len() - 1] {
        text.push_str(&format!(
            "{}::{} -- line {}\n",
            frame.file, frame.function, frame.line
        ));
    }

    // 現在のフレームは最新の行番号で出力する
    let last = &frames[frames.len() - 1];
    text.push_str(&format!(
        "{}::{} -- line {}\n",
        last.file, last.function, current_line
    ));

    text
}

/// 変数セクションを整形する
///
/// ALL モードでは全変数、CHANGED モードでは差分のみを出力します。
/// 空のセクションは丸ごと省略されます。NONE モードでは空文字列を返します。
pub fn format_variables(
    mode: VariableMode,
    globals: &VariableSnapshot,
    locals: &VariableSnapshot,
    previous_globals: &VariableSnapshot,
    previous_locals: &VariableSnapshot,
) -> String {
    let mut text = String::new();

    match mode {
        VariableMode::None => {}
        VariableMode::Changed => {
            let global_changes = format_diff_entries(globals, previous_globals);
            let local_changes = format_diff_entries(locals, previous_locals);

            if !global_changes.is_empty() {
                text.push_str("------> Global variable changes <------\n");
                text.push_str(&global_changes);
                text.push('\n');
            }
            if !local_changes.is_empty() {
                text.push_str("------> Local variable changes <------\n");
                text.push_str(&local_changes);
                text.push('\n');
            }
        }
        VariableMode::All => {
            let global_vars = format_snapshot_entries(globals);
            let local_vars = format_snapshot_entries(locals);

            if !global_vars.is_empty() {
                text.push_str("------> Global variables <------\n");
                text.push_str(&global_vars);
                text.push('\n');
            }
            if !local_vars.is_empty() {
                text.push_str("------> Local variables <------\n");
                text.push_str(&local_vars);
                text.push('\n');
            }
        }
    }

    text
}

/// スナップショットの全エントリを `name: type :: value` 形式で整形する
fn format_snapshot_entries(snapshot: &VariableSnapshot) -> String {
    let mut text = String::new();
    for (name, value) in snapshot.iter() {
        text.push_str(&format!("{name}: {} :: {}\n", value.type_name, value.repr));
    }
    text
}

/// 差分エントリを `[NEW]` / `[CHANGED]` / `[DELETED]` 付きで整形する
fn format_diff_entries(current: &VariableSnapshot, previous: &VariableSnapshot) -> String {
    let mut text = String::new();
    for entry in current.diff(previous).entries() {
        match entry {
            DiffEntry::New { name, value } => {
                text.push_str(&format!(
                    "[NEW] {name}: {} :: {}\n",
                    value.type_name, value.repr
                ));
            }
            DiffEntry::Changed { name, old, new } => {
                text.push_str(&format!(
                    "[CHANGED] {name}: {} :: {} -> {}\n",
                    new.type_name, old.repr, new.repr
                ));
            }
            DiffEntry::Deleted { name } => {
                text.push_str(&format!("[DELETED] {name}\n"));
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use crate::value::ValueRecord;

    #[test]
    fn test_step_header() {
        assert_eq!(
            format_step_header(3),
            "--------------------- Step 3 ---------------------\n"
        );
    }

    #[test]
    fn test_runtime_has_four_decimals() {
        assert_eq!(format_runtime(1.5), "Runtime: 1.5000 ms\n");
        assert_eq!(format_runtime(0.12345), "Runtime: 0.1235 ms\n");
    }

    #[test]
    fn test_call_path_outermost_first() {
        let outer_loc = Location::new("src/main.rs", 10, "app");
        let inner_loc = Location::new("src/calc.rs", 3, "app::calc");
        let frames = vec![
            Frame::new(&outer_loc, "main", false),
            Frame::new(&inner_loc, "calculate", false),
        ];

        let text = format_call_path(&frames, "src/calc.rs", "app::calc", 5);
        assert_eq!(
            text,
            "src/main.rs::main -- line 10\nsrc/calc.rs::calculate -- line 5\n"
        );
    }

    #[test]
    fn test_call_path_without_frames_uses_module() {
        let text = format_call_path(&[], "src/main.rs", "app", 7);
        assert_eq!(text, "src/main.rs::app -- line 7\n");
    }

    #[test]
    fn test_all_mode_sections() {
        let mut locals = VariableSnapshot::new();
        locals.insert("x", ValueRecord::new("i32", "30"));
        let empty = VariableSnapshot::new();

        let text = format_variables(VariableMode::All, &empty, &locals, &empty, &empty);
        assert_eq!(
            text,
            "------> Local variables <------\nx: i32 :: 30\n\n"
        );
    }

    #[test]
    fn test_changed_mode_markup() {
        let mut previous = VariableSnapshot::new();
        previous.insert("a", ValueRecord::new("i32", "1"));
        previous.insert("gone", ValueRecord::new("i32", "2"));

        let mut locals = VariableSnapshot::new();
        locals.insert("a", ValueRecord::new("i32", "5"));
        locals.insert("b", ValueRecord::new("i32", "9"));

        let empty = VariableSnapshot::new();
        let text = format_variables(VariableMode::Changed, &empty, &locals, &empty, &previous);
        assert_eq!(
            text,
            "------> Local variable changes <------\n\
             [CHANGED] a: i32 :: 1 -> 5\n\
             [NEW] b: i32 :: 9\n\
             [DELETED] gone\n\n"
        );
    }

    #[test]
    fn test_none_mode_is_empty() {
        let mut locals = VariableSnapshot::new();
        locals.insert("x", ValueRecord::new("i32", "1"));
        let empty = VariableSnapshot::new();
        let text = format_variables(VariableMode::None, &empty, &locals, &empty, &empty);
        assert!(text.is_empty());
    }
}

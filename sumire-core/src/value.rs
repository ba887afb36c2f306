//! 変数値のキャプチャ
//!
//! トレース対象の値を (型名, 文字列表現) の組として安全に記録します。
//! 表現の生成が失敗してもトレース対象のプログラムへ伝播させてはならないため、
//! フォーマット中の panic は捕捉して代替表現に退化させます。

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// 表現を生成できなかった値の代替表現
pub const UNREPRESENTABLE: &str = "<unrepresentable>";

/// キャプチャされた変数値
///
/// スナップショット間の比較は、このレコード同士の比較として行います。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    /// 完全修飾の型パス（フィルタ判定に使用）
    pub type_path: String,
    /// 短縮済みの型名（例: `Vec<i32>`、表示に使用）
    pub type_name: String,
    /// `Debug` 表現（生成に失敗した場合は代替表現）
    pub repr: String,
}

impl ValueRecord {
    /// 値をキャプチャする
    ///
    /// `Debug` フォーマットが panic した場合でも外へは伝播せず、
    /// 代替表現へ退化します。
    pub fn capture<T: fmt::Debug>(value: &T) -> Self {
        Self::new(std::any::type_name::<T>(), safe_repr(value))
    }

    /// 型パスと表現から直接レコードを作る
    pub fn new(type_path: impl Into<String>, repr: impl Into<String>) -> Self {
        let type_path = type_path.into();
        let type_name = short_type_name(&type_path);
        Self {
            type_path,
            type_name,
            repr: repr.into(),
        }
    }
}

/// 値の `Debug` 表現を安全に取得する
pub fn safe_repr<T: fmt::Debug>(value: &T) -> String {
    panic::catch_unwind(AssertUnwindSafe(|| format!("{:?}", value)))
        .unwrap_or_else(|_| UNREPRESENTABLE.to_string())
}

/// 2 つのレコードが同じ値を表すかどうか
///
/// 型パスと表現の両方が一致した場合のみ等しいとみなします。
pub fn values_equal(a: &ValueRecord, b: &ValueRecord) -> bool {
    a.type_path == b.type_path && a.repr == b.repr
}

/// 完全修飾型名からモジュールパスを取り除く
///
/// ジェネリクスの内側も再帰的に短縮します。
/// `alloc::vec::Vec<alloc::string::String>` -> `Vec<String>`
pub fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();

    for ch in full.chars() {
        match ch {
            // セグメント区切り: 直前までのパスを破棄する
            ':' => segment.clear(),
            // 型の境界: 最後のセグメントを確定して区切り文字を出力する
            '<' | '>' | ',' | '(' | ')' | '[' | ']' | ';' | ' ' | '&' | '*' => {
                out.push_str(&segment);
                segment.clear();
                out.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    out.push_str(&segment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("i32"), "i32");
        assert_eq!(short_type_name("alloc::string::String"), "String");
        assert_eq!(short_type_name("alloc::vec::Vec<i32>"), "Vec<i32>");
        assert_eq!(
            short_type_name("core::option::Option<alloc::string::String>"),
            "Option<String>"
        );
        assert_eq!(
            short_type_name("core::result::Result<i32, alloc::string::String>"),
            "Result<i32, String>"
        );
        assert_eq!(short_type_name("&str"), "&str");
        assert_eq!(
            short_type_name("std::collections::hash::map::HashMap<i32, i32>"),
            "HashMap<i32, i32>"
        );
    }

    #[test]
    fn test_capture() {
        let x = 30;
        let record = ValueRecord::capture(&x);
        assert_eq!(record.type_name, "i32");
        assert_eq!(record.repr, "30");

        let s = String::from("hello");
        let record = ValueRecord::capture(&s);
        assert_eq!(record.type_name, "String");
        assert_eq!(record.repr, "\"hello\"");
    }

    #[test]
    fn test_capture_never_panics() {
        struct Hostile;
        impl fmt::Debug for Hostile {
            fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
                panic!("refusing to format");
            }
        }

        let record = ValueRecord::capture(&Hostile);
        assert_eq!(record.repr, UNREPRESENTABLE);
    }

    #[test]
    fn test_values_equal() {
        let a = ValueRecord::new("i32", "1");
        let b = ValueRecord::new("i32", "1");
        let c = ValueRecord::new("i32", "2");
        let d = ValueRecord::new("u32", "1");
        assert!(values_equal(&a, &b));
        assert!(!values_equal(&a, &c));
        assert!(!values_equal(&a, &d));
    }
}

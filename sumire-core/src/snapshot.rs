//! 変数スナップショットと差分計算
//!
//! あるステップ時点で観測された変数の集合を保持し、直前のスナップショットとの
//! 差分 (NEW / CHANGED / DELETED) を計算します。挿入順を保持するため
//! IndexMap を使用します。

use indexmap::IndexMap;

use crate::value::{values_equal, ValueRecord};

/// 変数名からキャプチャ済みの値へのマッピング
///
/// 反復順は挿入順です。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSnapshot {
    entries: IndexMap<String, ValueRecord>,
}

impl VariableSnapshot {
    /// 空のスナップショットを作成する
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// 変数を追加する
    pub fn insert(&mut self, name: impl Into<String>, value: ValueRecord) {
        self.entries.insert(name.into(), value);
    }

    /// 変数を取得する
    pub fn get(&self, name: &str) -> Option<&ValueRecord> {
        self.entries.get(name)
    }

    /// 変数名が含まれるかどうか
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 挿入順で全エントリを反復する
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueRecord)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// エントリ数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// トレース可能な変数のみを残したスナップショットを返す
    ///
    /// 以下を除外します：
    /// - ダンダー規約の名前（`__` で始まり `__` で終わる）
    /// - トレーサ自身の内部型（型パスが自クレート配下のもの）
    pub fn filtered(&self) -> Self {
        let mut filtered = Self::new();
        for (name, value) in self.iter() {
            if name.starts_with("__") && name.ends_with("__") {
                continue;
            }
            if is_tracer_internal(&value.type_path) {
                continue;
            }
            filtered.insert(name, value.clone());
        }
        filtered
    }

    /// 直前のスナップショットとの差分を計算する
    ///
    /// current（self）にのみ存在する名前は NEW、両方に存在して値が異なる名前は
    /// CHANGED、previous にのみ存在する名前は DELETED になります。
    /// NEW / CHANGED は current の挿入順、DELETED は previous の挿入順です。
    pub fn diff(&self, previous: &VariableSnapshot) -> SnapshotDiff {
        let mut entries = Vec::new();

        for (name, value) in self.iter() {
            match previous.get(name) {
                None => entries.push(DiffEntry::New {
                    name: name.to_string(),
                    value: value.clone(),
                }),
                Some(old) => {
                    if !values_equal(value, old) {
                        entries.push(DiffEntry::Changed {
                            name: name.to_string(),
                            old: old.clone(),
                            new: value.clone(),
                        });
                    }
                }
            }
        }

        for (name, _) in previous.iter() {
            if !self.contains(name) {
                entries.push(DiffEntry::Deleted {
                    name: name.to_string(),
                });
            }
        }

        SnapshotDiff { entries }
    }
}

/// トレーサ内部の型かどうか
///
/// セッションオブジェクト等が変数としてキャプチャされても出力に
/// 混入しないようにします。
fn is_tracer_internal(type_path: &str) -> bool {
    type_path.starts_with("sumire_core::")
        || type_path.starts_with("sumire_async::")
        || type_path.contains("::sumire_core::")
        || type_path.contains("::sumire_async::")
}

/// 差分の 1 エントリ
#[derive(Debug, Clone, PartialEq)]
pub enum DiffEntry {
    /// current にのみ存在する変数
    New { name: String, value: ValueRecord },
    /// 値が変化した変数
    Changed {
        name: String,
        old: ValueRecord,
        new: ValueRecord,
    },
    /// previous にのみ存在する変数
    Deleted { name: String },
}

/// 2 つのスナップショットの差分
///
/// エントリは出力順（NEW / CHANGED が current の挿入順で交互に並び、
/// その後に DELETED が previous の挿入順で続く）に保持されます。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDiff {
    entries: Vec<DiffEntry>,
}

impl SnapshotDiff {
    /// 出力順で全エントリを反復する
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    /// NEW エントリのみ反復する
    pub fn added(&self) -> impl Iterator<Item = (&str, &ValueRecord)> {
        self.entries.iter().filter_map(|e| match e {
            DiffEntry::New { name, value } => Some((name.as_str(), value)),
            _ => None,
        })
    }

    /// CHANGED エントリのみ反復する
    pub fn changed(&self) -> impl Iterator<Item = (&str, &ValueRecord, &ValueRecord)> {
        self.entries.iter().filter_map(|e| match e {
            DiffEntry::Changed { name, old, new } => Some((name.as_str(), old, new)),
            _ => None,
        })
    }

    /// DELETED エントリのみ反復する
    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            DiffEntry::Deleted { name } => Some(name.as_str()),
            _ => None,
        })
    }

    /// 差分が空かどうか
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(type_name: &str, repr: &str) -> ValueRecord {
        ValueRecord::new(type_name, repr)
    }

    #[test]
    fn test_diff_new_changed_deleted() {
        let mut previous = VariableSnapshot::new();
        previous.insert("a", record("i32", "1"));
        previous.insert("b", record("i32", "2"));
        previous.insert("gone", record("i32", "9"));

        let mut current = VariableSnapshot::new();
        current.insert("a", record("i32", "1"));
        current.insert("b", record("i32", "5"));
        current.insert("c", record("i32", "3"));

        let diff = current.diff(&previous);

        let added: Vec<_> = diff.added().map(|(n, _)| n).collect();
        assert_eq!(added, vec!["c"]);

        let changed: Vec<_> = diff
            .changed()
            .map(|(n, old, new)| (n, old.repr.clone(), new.repr.clone()))
            .collect();
        assert_eq!(changed, vec![("b", "2".to_string(), "5".to_string())]);

        let deleted: Vec<_> = diff.deleted().collect();
        assert_eq!(deleted, vec!["gone"]);
    }

    #[test]
    fn test_diff_equal_values_do_not_appear() {
        let mut previous = VariableSnapshot::new();
        previous.insert("x", record("i32", "30"));
        let mut current = VariableSnapshot::new();
        current.insert("x", record("i32", "30"));

        assert!(current.diff(&previous).is_empty());
    }

    #[test]
    fn test_diff_order_follows_insertion() {
        let mut previous = VariableSnapshot::new();
        previous.insert("p1", record("i32", "1"));
        previous.insert("p2", record("i32", "2"));

        let mut current = VariableSnapshot::new();
        current.insert("n1", record("i32", "1"));
        current.insert("p1", record("i32", "10"));
        current.insert("n2", record("i32", "2"));

        let kinds: Vec<_> = current
            .diff(&previous)
            .entries()
            .iter()
            .map(|e| match e {
                DiffEntry::New { name, .. } => format!("new:{name}"),
                DiffEntry::Changed { name, .. } => format!("changed:{name}"),
                DiffEntry::Deleted { name } => format!("deleted:{name}"),
            })
            .collect();

        // NEW/CHANGED は current の挿入順、DELETED は最後に previous の挿入順
        assert_eq!(kinds, vec!["new:n1", "changed:p1", "new:n2", "deleted:p2"]);
    }

    #[test]
    fn test_filter_dunder_and_internal() {
        let mut snapshot = VariableSnapshot::new();
        snapshot.insert("x", record("i32", "1"));
        snapshot.insert("__doc__", record("&str", "\"...\""));
        snapshot.insert("session", record("sumire_core::tracer::Tracer", "…"));

        let filtered = snapshot.filtered();
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains("x"));
    }

    #[test]
    fn test_type_change_is_changed() {
        let mut previous = VariableSnapshot::new();
        previous.insert("v", record("i32", "1"));
        let mut current = VariableSnapshot::new();
        current.insert("v", record("i64", "1"));

        let diff = current.diff(&previous);
        assert_eq!(diff.changed().count(), 1);
    }
}

//! ログレベルと出力先の定義
//!
//! トレース出力の冗長度、出力先、変数記録モードを表す列挙型を提供します。
//! 文字列からのパースは失敗せず、未知の値は既定値にフォールバックします。

/// ログレベル（冗長度制御）
///
/// 数値が大きいほど抑制が強くなります。INFO と WARNING は同じ冗長度で、
/// ラベルだけが異なります（意図的な仕様）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// 最も詳細（コールスタックを含む全情報）
    Debug = 10,
    /// 標準（ステップ情報と変数）
    Info = 20,
    /// INFO と同等（ステップ情報と変数）
    Warning = 30,
    /// エラーのみ
    Error = 40,
    /// 出力なし
    Silent = 50,
}

impl LogLevel {
    /// 文字列からログレベルをパースする
    ///
    /// 未知の値は INFO にフォールバックします。
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARNING" => LogLevel::Warning,
            "ERROR" => LogLevel::Error,
            "SILENT" => LogLevel::Silent,
            _ => LogLevel::Info,
        }
    }

    /// ステップの詳細（時間・位置・変数）を出力するレベルかどうか
    pub fn shows_step_detail(self) -> bool {
        self <= LogLevel::Warning
    }
}

/// ログの出力先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// ファイルのみ
    File,
    /// 標準出力のみ
    Stdout,
    /// 標準エラー出力のみ
    Stderr,
    /// ファイルと標準出力の両方
    FileStdout,
    /// ファイルと標準エラー出力の両方
    FileStderr,
}

impl LogOutput {
    /// 文字列から出力先をパースする
    ///
    /// 未知の値は FILE にフォールバックします。
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "FILE" => LogOutput::File,
            "STDOUT" => LogOutput::Stdout,
            "STDERR" => LogOutput::Stderr,
            "FILE_STDOUT" => LogOutput::FileStdout,
            "FILE_STDERR" => LogOutput::FileStderr,
            _ => LogOutput::File,
        }
    }

    /// ファイルへ書き込む出力先かどうか
    pub fn uses_file(self) -> bool {
        matches!(
            self,
            LogOutput::File | LogOutput::FileStdout | LogOutput::FileStderr
        )
    }

    /// 標準出力へ書き込む出力先かどうか
    pub fn uses_stdout(self) -> bool {
        matches!(self, LogOutput::Stdout | LogOutput::FileStdout)
    }

    /// 標準エラー出力へ書き込む出力先かどうか
    pub fn uses_stderr(self) -> bool {
        matches!(self, LogOutput::Stderr | LogOutput::FileStderr)
    }
}

/// 変数記録モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableMode {
    /// 毎ステップ全変数を記録
    All,
    /// 変化した変数のみ記録
    Changed,
    /// 変数を記録しない
    None,
}

impl VariableMode {
    /// 文字列から変数記録モードをパースする
    ///
    /// 未知の値は ALL にフォールバックします。
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "ALL" => VariableMode::All,
            "CHANGED" => VariableMode::Changed,
            "NONE" => VariableMode::None,
            _ => VariableMode::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("silent"), LogLevel::Silent);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warning);
        // 未知の値は INFO
        assert_eq!(LogLevel::parse("VERBOSE"), LogLevel::Info);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Silent);

        assert!(LogLevel::Debug.shows_step_detail());
        assert!(LogLevel::Warning.shows_step_detail());
        assert!(!LogLevel::Error.shows_step_detail());
    }

    #[test]
    fn test_parse_log_output() {
        assert_eq!(LogOutput::parse("FILE_STDOUT"), LogOutput::FileStdout);
        assert_eq!(LogOutput::parse("stderr"), LogOutput::Stderr);
        // 未知の値は FILE
        assert_eq!(LogOutput::parse("SYSLOG"), LogOutput::File);

        assert!(LogOutput::FileStderr.uses_file());
        assert!(LogOutput::FileStderr.uses_stderr());
        assert!(!LogOutput::FileStderr.uses_stdout());
    }

    #[test]
    fn test_parse_variable_mode() {
        assert_eq!(VariableMode::parse("CHANGED"), VariableMode::Changed);
        assert_eq!(VariableMode::parse("none"), VariableMode::None);
        // 未知の値は ALL
        assert_eq!(VariableMode::parse("SOME"), VariableMode::All);
    }
}

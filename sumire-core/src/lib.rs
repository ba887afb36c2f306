//! Sumire 実行トレーサのコア機能
//!
//! このクレートは、実行中のプログラムをステップ単位で観測するための
//! 中核ロジックを提供します。ログレベルと出力先のポリシー、変数スナップ
//! ショットと差分計算、ステップレコードの整形、そして計装フックを駆動する
//! 同期トレースコントローラを統合します。

pub mod hook;
pub mod level;
pub mod location;
pub mod logger;
pub mod macros;
pub mod output;
pub(crate) mod session;
pub mod snapshot;
pub mod tracer;
pub mod value;

pub use level::{LogLevel, LogOutput, VariableMode};
pub use location::{Frame, Location};
pub use macros::ScopeGuard;
pub use output::CaptureBuffer;
pub use snapshot::{DiffEntry, SnapshotDiff, VariableSnapshot};
pub use tracer::{TraceSettings, TraceSession, Tracer};
pub use value::ValueRecord;

/// トレーサの結果型
pub type Result<T> = anyhow::Result<T>;

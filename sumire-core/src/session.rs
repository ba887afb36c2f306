//! セッション状態
//!
//! 1 回のトレースセッションが持つ可変状態です。セッション開始時に
//! リセットされ、観測イベントごとに更新されます。

use std::time::Instant;

use crate::location::Frame;
use crate::snapshot::VariableSnapshot;

/// セッションごとの可変状態
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    /// ステップカウンタ
    pub step: u64,
    /// 直前に観測したイベントの時刻
    pub timer: Option<Instant>,
    /// 直前のグローバルスコープのスナップショット（CHANGED モード用）
    pub previous_globals: VariableSnapshot,
    /// 直前のローカルスコープのスナップショット（CHANGED モード用）
    pub previous_locals: VariableSnapshot,
    /// スコープマーカーが積んだフレームスタック
    pub frames: Vec<Frame>,
}

impl SessionState {
    /// セッション開始時の状態へリセットする
    pub fn reset(&mut self) {
        self.step = 0;
        self.timer = Some(Instant::now());
        self.previous_globals = VariableSnapshot::new();
        self.previous_locals = VariableSnapshot::new();
        self.frames.clear();
    }

    /// 直前のイベントからの経過時間をミリ秒で返す
    pub fn elapsed_ms(&self) -> f64 {
        self.timer
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

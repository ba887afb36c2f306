//! 計装済み Future ラッパー
//!
//! コルーチンと await ポイントを包む Future です。最初の poll で開始を
//! 記録し、Ready で完了を記録します。完了前に drop された場合
//! （キャンセル）でも、drop パスが完了記録をちょうど一度だけ出します。

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use pin_project::{pin_project, pinned_drop};
use sumire_core::Location;

use crate::record::{AwaitPoint, CoroutineRecord};
use crate::tracer::AsyncTracer;

/// Future の結果から導出する完了属性
#[derive(Debug, Default)]
pub struct Outcome {
    /// 例外相当の結果（`型名: メッセージ`）
    pub error: Option<String>,
    /// 結果の文字列表現（DEBUG 時の await 終了レコード用）
    pub rendered: Option<String>,
}

/// 結果の検査クロージャ
pub(crate) type OutcomeProbe<T> = Box<dyn FnOnce(&T) -> Outcome + Send>;

/// トレース対象のコルーチンを包む Future
///
/// 包んだコルーチンと同じ結果を返します。
#[pin_project(PinnedDrop)]
pub struct TracedCoroutine<F: Future> {
    #[pin]
    future: F,
    tracer: AsyncTracer,
    name: String,
    probe: Option<OutcomeProbe<F::Output>>,
    record: Option<Arc<Mutex<CoroutineRecord>>>,
    finished: bool,
}

impl<F: Future> TracedCoroutine<F> {
    pub(crate) fn new(
        tracer: AsyncTracer,
        future: F,
        name: String,
        probe: OutcomeProbe<F::Output>,
    ) -> Self {
        Self {
            future,
            tracer,
            name,
            probe: Some(probe),
            record: None,
            finished: false,
        }
    }
}

impl<F: Future> Future for TracedCoroutine<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        // 実行開始（最初の poll）で記録を作る
        if this.record.is_none() {
            *this.record = Some(this.tracer.begin_coroutine(this.name.clone()));
        }

        match this.future.poll(cx) {
            Poll::Ready(output) => {
                let outcome = match this.probe.take() {
                    Some(probe) => probe(&output),
                    None => Outcome::default(),
                };
                if let Some(record) = this.record.take() {
                    this.tracer.finish_coroutine(&record, outcome.error);
                }
                *this.finished = true;
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[pinned_drop]
impl<F: Future> PinnedDrop for TracedCoroutine<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if !*this.finished {
            // キャンセル: 完了記録は例外なしの結果として一度だけ出す
            if let Some(record) = this.record.take() {
                this.tracer.finish_coroutine(&record, None);
            }
        }
    }
}

/// トレース対象の await ポイントを包む Future
///
/// 包んだ awaitable と同じ結果を返します。
#[pin_project(PinnedDrop)]
pub struct TracedAwait<F: Future> {
    #[pin]
    future: F,
    tracer: AsyncTracer,
    expr: String,
    location: Location,
    probe: Option<OutcomeProbe<F::Output>>,
    point: Option<Arc<Mutex<AwaitPoint>>>,
    finished: bool,
}

impl<F: Future> TracedAwait<F> {
    pub(crate) fn new(
        tracer: AsyncTracer,
        future: F,
        expr: String,
        location: Location,
        probe: OutcomeProbe<F::Output>,
    ) -> Self {
        Self {
            future,
            tracer,
            expr,
            location,
            probe: Some(probe),
            point: None,
            finished: false,
        }
    }
}

impl<F: Future> Future for TracedAwait<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.point.is_none() {
            *this.point = Some(this.tracer.begin_await(this.expr.clone(), *this.location));
        }

        match this.future.poll(cx) {
            Poll::Ready(output) => {
                let outcome = match this.probe.take() {
                    Some(probe) => probe(&output),
                    None => Outcome::default(),
                };
                if let Some(point) = this.point.take() {
                    this.tracer
                        .finish_await(&point, outcome.error, outcome.rendered);
                }
                *this.finished = true;
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[pinned_drop]
impl<F: Future> PinnedDrop for TracedAwait<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if !*this.finished {
            if let Some(point) = this.point.take() {
                this.tracer.finish_await(&point, None, None);
            }
        }
    }
}

//! 同梱シナリオ
//!
//! トレースの動作を確認するための計装済みサンプルプログラムです。
//! `sumire run <scenario>` から実行されます。

use std::time::Duration;

use anyhow::Result;
use sumire_async::{trace_await, AsyncTracer};
use sumire_core::{coro_scope, scope, step};

/// 利用可能なシナリオ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// 同期の計算パイプライン
    Simple,
    /// 非同期のフェッチ・加工パイプライン
    Async,
}

impl Scenario {
    /// シナリオ名をパースする
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "simple" => Some(Scenario::Simple),
            "async" => Some(Scenario::Async),
            _ => None,
        }
    }

    /// シナリオの一覧（名前と説明）
    pub fn list() -> &'static [(&'static str, &'static str)] {
        &[
            ("simple", "Synchronous calculation pipeline"),
            ("async", "Async fetch/process pipeline with gather"),
        ]
    }

    /// 非同期ランタイムを必要とするシナリオかどうか
    pub fn is_async(self) -> bool {
        matches!(self, Scenario::Async)
    }
}

/// 計算を行う
fn calculate(a: i64, b: i64) -> i64 {
    let _scope = scope!("calculate");
    let result = a + b;
    step!(a, b, result);
    let squared = result * result;
    step!(result, squared);
    squared
}

/// リストの各要素を処理する
fn process_list(items: &[i64]) -> i64 {
    let _scope = scope!("process_list");
    let mut total = 0;
    for item in items.iter().copied() {
        total += calculate(item, 1);
        step!(item, total);
    }
    total
}

/// 同期シナリオを実行する
pub fn run_simple() -> Result<()> {
    println!("Simple scenario starting...");

    let _scope = scope!("run_simple");

    let x = 10;
    let y = 20;
    let z = calculate(x, y);
    step!(x, y, z);
    println!("calculate({x}, {y}) = {z}");

    let items = vec![1, 2, 3, 4, 5];
    let result = process_list(&items);
    step!(items, result);
    println!("process_list({items:?}) = {result}");

    println!("Simple scenario done!");
    Ok(())
}

/// 非同期のデータ取得を模擬する
async fn fetch_data(name: &str, delay_ms: u64) -> String {
    let _scope = coro_scope!("fetch_data");
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    format!("data-{name}")
}

/// データを非同期に加工する
async fn process_data(data: String) -> String {
    let _scope = coro_scope!("process_data");
    tokio::time::sleep(Duration::from_millis(50)).await;
    data.to_uppercase()
}

/// 非同期シナリオを実行する
pub async fn run_async_pipeline(tracer: AsyncTracer) -> Result<()> {
    println!("Async scenario starting...");

    // 逐次フェッチ
    let data1 = trace_await!(tracer, fetch_data("first", 100)).await;
    let data2 = trace_await!(tracer, fetch_data("second", 50)).await;

    // 逐次加工
    let result1 = trace_await!(tracer, process_data(data1)).await;
    let result2 = trace_await!(tracer, process_data(data2)).await;
    println!("Results: {result1}, {result2}");

    // 並行フェッチ
    let results = tracer
        .gather(vec![
            fetch_data("a", 50),
            fetch_data("b", 80),
            fetch_data("c", 30),
        ])
        .await;
    println!("Gathered: {results:?}");

    println!("Async scenario done!");
    Ok(())
}

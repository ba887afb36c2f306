//! 計装済みの簡単なサンプルプログラム
//!
//! sumire の計装マクロと非同期トレースを一通り使うデモです。
//! ステップレコードは標準出力へ流します。

use std::time::Duration;

use anyhow::Result;
use sumire_async::{trace_await, AsyncSettings, AsyncTracer};
use sumire_core::{coro_scope, scope, step, LogOutput, TraceSettings};

/// 非同期関数1: 数値を2倍にする
async fn double(x: i32) -> i32 {
    let _scope = coro_scope!("double");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = x * 2;
    step!(x, result);
    result
}

/// 非同期関数2: 2つの値を加算する
async fn add(a: i32, b: i32) -> i32 {
    let _scope = coro_scope!("add");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = a + b;
    step!(a, b, result);
    result
}

/// 非同期関数3: 複数の非同期関数を組み合わせる
async fn compute(tracer: AsyncTracer, x: i32, y: i32) -> i32 {
    let _scope = coro_scope!("compute");

    // x を2倍にする
    let doubled_x = trace_await!(tracer, double(x)).await;

    // y を2倍にする
    let doubled_y = trace_await!(tracer, double(y)).await;

    // 結果を加算する
    let sum = trace_await!(tracer, add(doubled_x, doubled_y)).await;

    step!(doubled_x, doubled_y, sum);
    sum
}

/// 変数表示テスト用の関数（同期版）
fn show_variables() {
    let _scope = scope!("show_variables");

    let message = String::from("Hello, Sumire!");
    let numbers = vec![1, 2, 3, 4, 5];
    let maybe_value = Some(42);
    let result_value: Result<i32, String> = Ok(100);

    step!(message, numbers, maybe_value, result_value);
}

async fn heavy() {
    let mut acc = 0u64;
    for i in 0..10_000u64 {
        acc = acc.wrapping_add(i * i);
    }
    let _ = acc;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    println!("=== Sumire Simple Trace Example ===");
    println!();

    let tracer = AsyncTracer::new(
        TraceSettings {
            log_output: LogOutput::Stdout,
            ..TraceSettings::default()
        },
        AsyncSettings::default(),
    )?;

    let body = {
        let tracer = tracer.clone();
        async move {
            show_variables();

            let result = trace_await!(tracer, compute(tracer.clone(), 5, 10)).await;

            // 並行タスク
            let mut handles = Vec::new();
            for i in 0..4 {
                handles.push(tracer.wrap_task(heavy(), format!("heavy_{i}")));
            }
            for handle in handles {
                let _ = handle.await;
            }

            println!("Final result: {result}");
            println!("Expected: (5*2) + (10*2) = 10 + 20 = 30");
            result
        }
    };

    let result = tracer.run_async(body, "main").await;
    assert_eq!(result, 30);
    Ok(())
}

//! 同期トレーサの統合テスト

use std::sync::{Arc, Mutex};

use sumire_core::{
    scope, step, CaptureBuffer, LogLevel, LogOutput, TraceSettings, Tracer, VariableMode,
};

/// キャプチャバッファ付きのトレーサを作成するヘルパー
fn capturing_tracer(settings: TraceSettings) -> (Tracer, CaptureBuffer) {
    let tracer = Tracer::new(settings).expect("Failed to create tracer");
    let buffer: CaptureBuffer = Arc::new(Mutex::new(Vec::new()));
    tracer.capture_stream(Arc::clone(&buffer));
    (tracer, buffer)
}

fn captured_text(buffer: &CaptureBuffer) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).expect("Trace output should be UTF-8")
}

fn step_count(text: &str) -> usize {
    text.matches("--------------------- Step ").count()
}

/// トレース対象のサンプル関数
fn calculate(a: i32, b: i32) -> i32 {
    let _scope = scope!("calculate");
    step!(a, b);
    let x = a + b;
    step!(a, b, x);
    x
}

#[test]
fn test_info_all_scenario_yields_steps_and_final_value() {
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        log_level: LogLevel::Info,
        variable_mode: VariableMode::All,
        ..TraceSettings::default()
    });

    let result = tracer.trace(|| calculate(10, 20));
    assert_eq!(result, 30, "Tracing must not alter the return value");

    let text = captured_text(&buffer);
    assert!(step_count(&text) >= 2, "Expected at least 2 steps:\n{text}");

    // 最後のステップに計算結果が含まれる
    let last_step = text
        .rsplit("--------------------- Step ")
        .next()
        .expect("Should have a last step");
    assert!(
        last_step.contains("x: i32 :: 30"),
        "Last step should contain the final value:\n{last_step}"
    );
    assert!(last_step.contains("------> Local variables <------"));
    assert!(last_step.contains("::calculate -- line "));
}

#[test]
fn test_silent_writes_zero_bytes_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::FileStdout,
        log_level: LogLevel::Silent,
        log_dir: dir.path().to_path_buf(),
        ..TraceSettings::default()
    });

    let result = tracer.trace(|| calculate(1, 2));
    assert_eq!(result, 3, "SILENT must not alter the traced program");

    assert!(buffer.lock().unwrap().is_empty(), "SILENT wrote to the stream");
    let file_bytes = std::fs::read(tracer.log_path().unwrap()).unwrap();
    assert!(file_bytes.is_empty(), "SILENT wrote to the file");
}

#[test]
fn test_file_and_stream_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::FileStderr,
        log_dir: dir.path().to_path_buf(),
        ..TraceSettings::default()
    });

    tracer.trace(|| calculate(2, 3));

    let file_bytes = std::fs::read(tracer.log_path().unwrap()).unwrap();
    let stream_bytes = buffer.lock().unwrap().clone();
    assert!(!file_bytes.is_empty());
    assert_eq!(file_bytes, stream_bytes, "File and stream must match byte-for-byte");
}

#[test]
fn test_changed_mode_reports_each_change_once() {
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        variable_mode: VariableMode::Changed,
        ..TraceSettings::default()
    });

    tracer.trace(|| {
        let _scope = scope!("mutate");
        let mut counter = 1;
        step!(counter);
        // 値が変わらないステップ
        step!(counter);
        counter += 1;
        step!(counter);
        // counter をスコープから外したステップ
        step!();
    });

    let text = captured_text(&buffer);
    assert_eq!(step_count(&text), 4);

    assert_eq!(
        text.matches("[NEW] counter: i32 :: 1").count(),
        1,
        "counter should be NEW exactly once:\n{text}"
    );
    assert_eq!(
        text.matches("[CHANGED] counter: i32 :: 1 -> 2").count(),
        1,
        "counter should be CHANGED exactly once:\n{text}"
    );
    assert_eq!(
        text.matches("[DELETED] counter").count(),
        1,
        "counter should be DELETED exactly once:\n{text}"
    );

    // 変化のなかったステップには変数セクションが無い
    let steps: Vec<&str> = text.split("--------------------- Step ").skip(1).collect();
    assert!(
        !steps[1].contains("counter"),
        "An unchanged variable must not appear:\n{}",
        steps[1]
    );
}

#[test]
fn test_all_mode_repeats_variables_while_in_scope() {
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        variable_mode: VariableMode::All,
        ..TraceSettings::default()
    });

    tracer.trace(|| {
        let _scope = scope!("repeat");
        let value = 7;
        step!(value);
        step!(value);
        step!(value);
    });

    let text = captured_text(&buffer);
    assert_eq!(
        text.matches("value: i32 :: 7").count(),
        3,
        "ALL mode should repeat the variable in every step:\n{text}"
    );
}

#[test]
fn test_none_mode_keeps_header_and_location() {
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        variable_mode: VariableMode::None,
        ..TraceSettings::default()
    });

    tracer.trace(|| calculate(4, 5));

    let text = captured_text(&buffer);
    assert!(step_count(&text) >= 2);
    assert!(text.contains("Runtime: "));
    assert!(text.contains("::calculate -- line "));
    assert!(!text.contains("variables"), "NONE mode must not render variables");
}

#[test]
fn test_error_level_suppresses_step_detail() {
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        log_level: LogLevel::Error,
        ..TraceSettings::default()
    });

    tracer.trace(|| calculate(1, 1));

    let text = captured_text(&buffer);
    assert!(step_count(&text) >= 1);
    assert!(!text.contains("Runtime: "));
    assert!(!text.contains("variables"));
}

#[test]
fn test_sequential_sessions_use_incremented_files() {
    let dir = tempfile::tempdir().unwrap();

    for expected in ["trace.log", "trace_1.log", "trace_2.log"] {
        let tracer = Tracer::new(TraceSettings {
            log_dir: dir.path().to_path_buf(),
            ..TraceSettings::default()
        })
        .unwrap();

        assert_eq!(tracer.log_path().unwrap(), dir.path().join(expected));
        tracer.trace(|| calculate(1, 2));

        let content = std::fs::read_to_string(tracer.log_path().unwrap()).unwrap();
        // 各セッションはステップカウンタを 1 から数え直す
        assert!(
            content.contains("--------------------- Step 1 ---------------------"),
            "Each session should restart its step counter:\n{content}"
        );
    }
}

#[test]
fn test_function_allowlist_filters_steps() {
    fn helper() {
        let _scope = scope!("helper");
        let y = 1;
        step!(y);
    }

    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        traceable_functions: Some(vec!["calculate".to_string()]),
        ..TraceSettings::default()
    });

    tracer.trace(|| {
        helper();
        calculate(1, 2)
    });

    let text = captured_text(&buffer);
    assert!(text.contains("x: i32 :: 3"));
    assert!(
        !text.contains("y: i32 :: 1"),
        "Steps outside the allow-list must be filtered:\n{text}"
    );
}

#[test]
fn test_panic_in_traced_body_restores_hook() {
    let (tracer, _buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        ..TraceSettings::default()
    });

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        tracer.trace(|| {
            let _scope = scope!("exploding");
            panic!("boom");
        })
    }));
    assert!(result.is_err(), "The panic must propagate unchanged");

    // セッションは panic 時でも巻き戻っている
    assert!(!sumire_core::hook::active());
}

#[test]
fn test_runtime_line_has_four_decimals() {
    let (tracer, buffer) = capturing_tracer(TraceSettings {
        log_output: LogOutput::Stdout,
        ..TraceSettings::default()
    });

    tracer.trace(|| calculate(1, 2));

    let text = captured_text(&buffer);
    let runtime_line = text
        .lines()
        .find(|l| l.starts_with("Runtime: "))
        .expect("Should have a Runtime line");
    let ms = runtime_line
        .trim_start_matches("Runtime: ")
        .trim_end_matches(" ms");
    let decimals = ms.split('.').nth(1).expect("Should have a decimal part");
    assert_eq!(decimals.len(), 4, "Unexpected format: {runtime_line}");
}

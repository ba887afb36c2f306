//! 出力先の管理
//!
//! 設定された出力先（ファイル / 標準出力 / 標準エラー出力、およびその組合せ）へ
//! レコードを書き込みます。複数の出力先へ書かれるレコードはバイト単位で
//! 同一でなければなりません。
//!
//! ファイル出力では `trace.log`, `trace_1.log`, `trace_2.log`, ... と連番で
//! ファイル名を採番し、並行・連続するセッションが互いのログを上書きしない
//! ようにします。採番は `create_new` による排他的作成で確定します。

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::level::LogOutput;

/// ログファイルのベース名
const LOG_FILE_STEM: &str = "trace";

/// テスト用のインメモリキャプチャ
///
/// 設定するとストリーム出力（stdout / stderr）の代わりにバッファへ書き込み、
/// 出力内容をバイト単位で検査できるようにします。ファイル出力は影響を
/// 受けません。
pub type CaptureBuffer = Arc<Mutex<Vec<u8>>>;

/// 出力ポリシーに従うライター
pub struct OutputWriter {
    output: LogOutput,
    log_path: Option<PathBuf>,
    capture: Option<CaptureBuffer>,
}

impl OutputWriter {
    /// 新しいライターを作成する
    ///
    /// ファイルを使う出力先の場合、ログディレクトリを作成し、連番の
    /// ファイル名を排他的に確保します。
    pub fn new(output: LogOutput, log_dir: &Path) -> io::Result<Self> {
        let log_path = if output.uses_file() {
            Some(claim_log_path(log_dir)?)
        } else {
            None
        };

        Ok(Self {
            output,
            log_path,
            capture: None,
        })
    }

    /// 確保したログファイルのパスを取得する
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// ストリーム出力をインメモリバッファへ差し替える
    pub fn capture_stream(&mut self, buffer: CaptureBuffer) {
        self.capture = Some(buffer);
    }

    /// レコードを設定された全出力先へ書き込む
    ///
    /// すべての出力先が同一のバイト列を受け取ります。
    pub fn write_record(&self, text: &str) -> io::Result<()> {
        if let Some(path) = &self.log_path {
            let mut file = OpenOptions::new().append(true).open(path)?;
            file.write_all(text.as_bytes())?;
        }

        if self.output.uses_stdout() {
            self.write_stream(text, &mut io::stdout())?;
        }
        if self.output.uses_stderr() {
            self.write_stream(text, &mut io::stderr())?;
        }

        Ok(())
    }

    fn write_stream(&self, text: &str, fallback: &mut dyn Write) -> io::Result<()> {
        match &self.capture {
            Some(buffer) => {
                let mut buffer = buffer.lock().unwrap_or_else(|e| e.into_inner());
                buffer.extend_from_slice(text.as_bytes());
                Ok(())
            }
            None => {
                fallback.write_all(text.as_bytes())?;
                fallback.flush()
            }
        }
    }
}

/// ログディレクトリに連番のファイル名を確保する
///
/// `trace.log` が空いていなければ `trace_1.log`, `trace_2.log`, ... を試し、
/// 最初に排他的作成に成功したパスを返します。
fn claim_log_path(log_dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;

    let mut counter = 0u32;
    loop {
        let name = if counter == 0 {
            format!("{LOG_FILE_STEM}.log")
        } else {
            format!("{LOG_FILE_STEM}_{counter}.log")
        };
        let candidate = log_dir.join(name);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e),
        }
    }
}

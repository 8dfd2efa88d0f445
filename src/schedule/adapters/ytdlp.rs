use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ExecutionAdapter, ExecutionRequest};
use crate::error::AdapterError;
use crate::schedule::types::FormatParams;

const OUTPUT_TEMPLATE: &str = "%(title).180s.%(ext)s";
const STDERR_TAIL_LINES: usize = 8;

/// Runs jobs through the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpAdapter {
    binary: PathBuf,
}

impl YtDlpAdapter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    pub fn build_args(request: &ExecutionRequest) -> Vec<String> {
        let mut args = vec![
            "--no-simulate".to_string(),
            "--dump-single-json".to_string(),
            "--no-progress".to_string(),
            "-o".to_string(),
            request.target_dir.join(OUTPUT_TEMPLATE).display().to_string(),
        ];

        match &request.params {
            FormatParams::Video { format } => {
                args.push("-f".into());
                args.push(format.clone());
            }
            FormatParams::Audio { audio_format, audio_quality } => {
                args.extend(["-f", "bestaudio/best", "-x", "--audio-format"].map(String::from));
                args.push(audio_format.clone());
                if let Some(quality) = audio_quality {
                    args.push("--audio-quality".into());
                    args.push(quality.clone());
                }
            }
            FormatParams::Subtitles { languages, write_manual, write_automatic, convert_to } => {
                args.push("--skip-download".into());
                args.push("--sub-langs".into());
                args.push(languages.join(","));
                if *write_manual {
                    args.push("--write-subs".into());
                }
                if *write_automatic {
                    args.push("--write-auto-subs".into());
                }
                if let Some(conv) = convert_to {
                    args.push("--convert-subs".into());
                    args.push(conv.clone());
                }
            }
        }

        args.push("--".into());
        args.push(request.url.clone());
        args
    }
}

fn failure_message(stderr: &str, status: std::process::ExitStatus) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if let Some(error_line) = lines.iter().rev().find(|l| l.starts_with("ERROR:")) {
        return error_line.to_string();
    }
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    if tail.is_empty() {
        format!("yt-dlp exited with {}", status)
    } else {
        format!("yt-dlp exited with {}: {}", status, tail)
    }
}

#[async_trait]
impl ExecutionAdapter for YtDlpAdapter {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<Value, AdapterError> {
        let args = Self::build_args(request);
        info!(task_id = %request.task_id, kind = %request.kind, url = %request.url, "yt-dlp start");
        debug!(task_id = %request.task_id, ?args, "yt-dlp arguments");
        let start = Instant::now();

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AdapterError::new(format!("failed to launch {}: {}", self.binary.display(), e)))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = failure_message(&stderr, output.status);
            warn!(task_id = %request.task_id, elapsed_ms, "yt-dlp failed: {}", message);
            return Err(AdapterError::new(message));
        }

        info!(task_id = %request.task_id, elapsed_ms, "yt-dlp done");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let json_line = stdout.lines().rev().find(|l| l.trim_start().starts_with('{'));
        match json_line.map(serde_json::from_str::<Value>) {
            Some(Ok(info)) => Ok(info),
            _ => {
                warn!(task_id = %request.task_id, "yt-dlp produced no info json");
                Ok(serde_json::json!({ "extractor": self.name(), "info_json": false }))
            }
        }
    }
}

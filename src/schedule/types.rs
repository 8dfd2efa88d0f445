use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::str::FromStr;

use crate::error::TaskError;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Video,
    Audio,
    Subtitles,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Video => "video",
            JobKind::Audio => "audio",
            JobKind::Subtitles => "subtitles",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(JobKind::Video),
            "audio" => Ok(JobKind::Audio),
            "subtitles" => Ok(JobKind::Subtitles),
            _ => Err(format!("Invalid job kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Uploading,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether a task in this state may move to `next`.
    ///
    /// Everything moves forward, except the explicit retry edge
    /// `failed -> pending`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Running)
                    | (Pending, Failed)
                    | (Running, Uploading)
                    | (Running, Completed)
                    | (Running, Failed)
                    | (Uploading, Completed)
                    | (Uploading, Failed)
                    | (Failed, Pending)
            )
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Uploading)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "uploading" => Ok(TaskStatus::Uploading),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

fn default_video_format() -> String {
    "bestvideo+bestaudio/best".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string(), "en.*".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_convert_to() -> Option<String> {
    Some("srt".to_string())
}

/// Kind-specific download parameters. They feed both the adapter and the
/// dedup signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FormatParams {
    Video {
        #[serde(default = "default_video_format")]
        format: String,
    },
    Audio {
        #[serde(default = "default_audio_format")]
        audio_format: String,
        #[serde(default)]
        audio_quality: Option<String>,
    },
    Subtitles {
        #[serde(default = "default_languages")]
        languages: Vec<String>,
        #[serde(default = "default_true")]
        write_manual: bool,
        #[serde(default = "default_true")]
        write_automatic: bool,
        #[serde(default = "default_convert_to")]
        convert_to: Option<String>,
    },
}

impl FormatParams {
    pub fn kind(&self) -> JobKind {
        match self {
            FormatParams::Video { .. } => JobKind::Video,
            FormatParams::Audio { .. } => JobKind::Audio,
            FormatParams::Subtitles { .. } => JobKind::Subtitles,
        }
    }

    /// Canonical string for the parameters, stored as `format_signature`.
    pub fn format_key(&self) -> String {
        match self {
            FormatParams::Video { format } => format.clone(),
            FormatParams::Audio { audio_format, audio_quality } => format!(
                "audio:{}:q={}",
                audio_format,
                audio_quality.as_deref().unwrap_or("None")
            ),
            FormatParams::Subtitles { languages, write_manual, write_automatic, convert_to } => format!(
                "subs:{}:manual={}:auto={}:conv={}",
                languages.join(","),
                write_manual,
                write_automatic,
                convert_to.as_deref().unwrap_or("None")
            ),
        }
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        match self {
            FormatParams::Video { format } => {
                if format.trim().is_empty() {
                    return Err(TaskError::invalid("format must not be empty"));
                }
            }
            FormatParams::Audio { audio_format, audio_quality } => {
                if !is_plain_token(audio_format) {
                    return Err(TaskError::invalid(format!("unsupported audio_format: {:?}", audio_format)));
                }
                if let Some(q) = audio_quality {
                    if !is_plain_token(q) {
                        return Err(TaskError::invalid(format!("unsupported audio_quality: {:?}", q)));
                    }
                }
            }
            FormatParams::Subtitles { languages, write_manual, write_automatic, convert_to } => {
                if languages.is_empty() || languages.iter().any(|l| l.trim().is_empty() || l.contains(',')) {
                    return Err(TaskError::invalid("languages must be a non-empty list of language codes"));
                }
                if !write_manual && !write_automatic {
                    return Err(TaskError::invalid("at least one of write_manual / write_automatic is required"));
                }
                if let Some(conv) = convert_to {
                    if !is_plain_token(conv) {
                        return Err(TaskError::invalid(format!("unsupported convert_to: {:?}", conv)));
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_plain_token(value: &str) -> bool {
    !value.is_empty() && value.len() <= 32 && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Key identifying equivalent requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn new(kind: JobKind, url: &str, base_output_path: &Path, format_signature: &str) -> Self {
        Self(format!("{}|{}|{}|{}", kind, url, base_output_path.display(), format_signature))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub kind: JobKind,
    pub url: String,
    pub base_output_path: PathBuf,
    pub task_output_path: PathBuf,
    pub params: FormatParams,
    pub format_signature: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_artifact_ref: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn signature(&self) -> Signature {
        Signature::new(self.kind, &self.url, &self.base_output_path, &self.format_signature)
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
    }

    pub fn mark_completed(&mut self, result: serde_json::Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.result = None;
        self.error = Some(error.into());
    }

    /// Back to pending for a client retry. Identity and attempt count are kept.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.result = None;
        self.error = None;
        self.external_artifact_ref = None;
    }
}

/// Client-facing status view.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: String,
    pub kind: JobKind,
    pub url: String,
    pub status: TaskStatus,
    pub base_output_path: String,
    pub task_output_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_artifact_ref: Option<String>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        let completed = task.status == TaskStatus::Completed;
        let failed = task.status == TaskStatus::Failed;
        Self {
            id: task.id.clone(),
            kind: task.kind,
            url: task.url.clone(),
            status: task.status,
            base_output_path: task.base_output_path.display().to_string(),
            task_output_path: task.task_output_path.display().to_string(),
            result: task.result.clone().filter(|_| completed),
            error: task.error.clone().filter(|_| failed),
            external_artifact_ref: task.external_artifact_ref.clone().filter(|_| completed),
        }
    }
}

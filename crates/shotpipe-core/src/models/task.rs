use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TaskId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Capture,
    FileUpload,
    TextUpload,
    ShortenUrl,
    ShareUrl,
    Download,
    DownloadUpload,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Capture => "capture",
            JobKind::FileUpload => "file_upload",
            JobKind::TextUpload => "text_upload",
            JobKind::ShortenUrl => "shorten_url",
            JobKind::ShareUrl => "share_url",
            JobKind::Download => "download",
            JobKind::DownloadUpload => "download_upload",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "capture" => Some(JobKind::Capture),
            "file_upload" => Some(JobKind::FileUpload),
            "text_upload" => Some(JobKind::TextUpload),
            "shorten_url" => Some(JobKind::ShortenUrl),
            "share_url" => Some(JobKind::ShareUrl),
            "download" => Some(JobKind::Download),
            "download_upload" => Some(JobKind::DownloadUpload),
            _ => None,
        }
    }

    /// Whether the job starts by fetching its payload from a URL.
    pub fn downloads(self) -> bool {
        matches!(self, JobKind::Download | JobKind::DownloadUpload)
    }

    /// Whether the job sends a payload to an upload destination.
    pub fn uploads(self) -> bool {
        matches!(
            self,
            JobKind::Capture | JobKind::FileUpload | JobKind::TextUpload | JobKind::DownloadUpload
        )
    }

    /// Whether the job operates on an existing URL instead of a payload.
    pub fn rewrites_url(self) -> bool {
        matches!(self, JobKind::ShortenUrl | JobKind::ShareUrl)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Image,
    Text,
    File,
    Url,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Image => "image",
            DataType::Text => "text",
            DataType::File => "file",
            DataType::Url => "url",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "image" => Some(DataType::Image),
            "text" => Some(DataType::Text),
            "file" => Some(DataType::File),
            "url" => Some(DataType::Url),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            return DataType::File;
        };

        match extension.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "ico" => {
                DataType::Image
            }
            "txt" | "log" | "md" | "json" | "xml" | "toml" | "yaml" | "yml" | "csv" | "ini"
            | "cs" | "rs" | "c" | "cpp" | "h" | "java" | "py" | "js" | "ts" | "html" | "css" => {
                DataType::Text
            }
            _ => DataType::File,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskState {
    InQueue,
    Preparing,
    Working,
    Stopping,
    Stopped,
    Failed,
    Completed,
    History,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Stopped | TaskState::Failed | TaskState::Completed | TaskState::History
        )
    }

    /// A task counts against the scheduler's upload limit while in any of
    /// these states.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            TaskState::Preparing | TaskState::Working | TaskState::Stopping
        )
    }
}

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::models::{DataType, JobKind};

/// One completed task, as kept in recent and persistent history. Created on
/// the terminal transition and never mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub job: JobKind,
    pub data_type: DataType,
    pub file_name: String,
    pub file_path: Option<PathBuf>,
    pub source_url: Option<String>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub deletion_url: Option<String>,
    pub shortened_url: Option<String>,
    pub completed_at: SystemTime,
}

impl TaskRecord {
    pub fn has_url(&self) -> bool {
        non_empty(self.url.as_deref()) || non_empty(self.shortened_url.as_deref())
    }

    /// Preferred URL for clipboard/menu use: shortened first, then the
    /// direct result URL.
    pub fn primary_url(&self) -> Option<&str> {
        self.shortened_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .or_else(|| self.url.as_deref().filter(|url| !url.is_empty()))
    }

    /// Falls back result URL -> source URL -> file name.
    pub fn display_name(&self) -> &str {
        if let Some(url) = self.url.as_deref()
            && !url.is_empty()
        {
            return url;
        }
        if let Some(url) = self.source_url.as_deref()
            && !url.is_empty()
        {
            return url;
        }
        &self.file_name
    }

    /// Timestamp-prefixed label truncated for menu rendering.
    pub fn menu_label(&self, max_len: usize) -> String {
        let mut name: String = self.display_name().chars().take(max_len).collect();
        if self.display_name().chars().count() > max_len {
            name.push('…');
        }
        format!("{} - {}", clock_label(self.completed_at), name)
    }
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|text| !text.is_empty())
}

fn clock_label(timestamp: SystemTime) -> String {
    let seconds = timestamp
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let seconds_of_day = seconds % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        seconds_of_day / 3_600,
        seconds_of_day % 3_600 / 60,
        seconds_of_day % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: Option<&str>, source_url: Option<&str>) -> TaskRecord {
        TaskRecord {
            job: JobKind::Capture,
            data_type: DataType::Image,
            file_name: "shot.png".to_string(),
            file_path: None,
            source_url: source_url.map(str::to_string),
            url: url.map(str::to_string),
            thumbnail_url: None,
            deletion_url: None,
            shortened_url: None,
            completed_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn display_name_prefers_result_url() {
        let record = record(Some("https://img.example/a.png"), Some("https://src"));
        assert_eq!(record.display_name(), "https://img.example/a.png");
    }

    #[test]
    fn display_name_falls_back_to_source_url_then_file_name() {
        assert_eq!(
            record(None, Some("https://src")).display_name(),
            "https://src"
        );
        assert_eq!(record(Some(""), None).display_name(), "shot.png");
    }

    #[test]
    fn menu_label_truncates_and_prefixes_timestamp() {
        let label = record(Some("https://img.example/abcdef.png"), None).menu_label(10);
        assert_eq!(label, "00:00:00 - https://im…");
    }
}

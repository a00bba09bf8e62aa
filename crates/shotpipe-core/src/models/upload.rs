use crate::models::TaskError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub transferred: u64,
    pub total: Option<u64>,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> Option<u8> {
        let total = self.total.filter(|total| *total > 0)?;
        Some((self.transferred.min(total) * 100 / total) as u8)
    }
}

/// What a single uploader attempt reports back. The uploader may fail either
/// by returning an error or by reporting errors inside the outcome.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UploadOutcome {
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub deletion_url: Option<String>,
    pub errors: Vec<String>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Cumulative result of one task. Errors are appended across attempts and
/// pipeline steps, never replaced.
#[derive(Clone, Debug)]
pub struct UploadResult {
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub deletion_url: Option<String>,
    pub shortened_url: Option<String>,
    pub ocr_text: Option<String>,
    pub is_url_expected: bool,
    pub errors: Vec<TaskError>,
}

impl UploadResult {
    pub fn new() -> Self {
        Self {
            url: None,
            thumbnail_url: None,
            deletion_url: None,
            shortened_url: None,
            ocr_text: None,
            is_url_expected: true,
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, error: TaskError) {
        self.errors.push(error);
    }

    pub fn has_url(&self) -> bool {
        self.url.as_deref().is_some_and(|url| !url.is_empty())
            || self.shortened_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && (self.has_url() || !self.is_url_expected)
    }

    /// Preferred URL for clipboard use: shortened first, then the direct
    /// result URL.
    pub fn primary_url(&self) -> Option<&str> {
        self.shortened_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .or_else(|| self.url.as_deref().filter(|url| !url.is_empty()))
    }

    pub fn absorb_outcome(&mut self, outcome: UploadOutcome) {
        self.url = outcome.url;
        self.thumbnail_url = outcome.thumbnail_url;
        self.deletion_url = outcome.deletion_url;
    }
}

impl Default for UploadResult {
    fn default() -> Self {
        Self::new()
    }
}

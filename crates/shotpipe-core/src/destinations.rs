use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collaborators::Uploader;
use crate::models::{DataType, TaskError, TaskErrorKind, TaskResult};

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DestinationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for DestinationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Redirects matching file names to a different destination before the
/// primary is tried. Patterns support `*` and `?`, case-insensitive.
#[derive(Clone, Debug)]
pub struct FileNameFilter {
    pub pattern: String,
    pub destination: DestinationId,
}

pub struct ResolvedDestination {
    pub id: DestinationId,
    pub uploader: Arc<dyn Uploader>,
}

/// Configured upload destinations: one primary per data type, ordered
/// failover lists, file-name pre-filters, and the uploader instances behind
/// the ids. Built once and shared read-only by every task.
#[derive(Default)]
pub struct DestinationRegistry {
    uploaders: HashMap<DestinationId, Arc<dyn Uploader>>,
    primaries: HashMap<DataType, DestinationId>,
    secondaries: HashMap<DataType, Vec<DestinationId>>,
    filters: Vec<FileNameFilter>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, id: impl Into<String>, uploader: Arc<dyn Uploader>) -> Self {
        self.uploaders.insert(DestinationId(id.into()), uploader);
        self
    }

    pub fn primary(mut self, data_type: DataType, id: impl Into<String>) -> Self {
        self.primaries.insert(data_type, DestinationId(id.into()));
        self
    }

    pub fn secondaries(
        mut self,
        data_type: DataType,
        ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.secondaries.insert(
            data_type,
            ids.into_iter().map(|id| DestinationId(id.into())).collect(),
        );
        self
    }

    pub fn filter(mut self, pattern: impl Into<String>, destination: impl Into<String>) -> Self {
        self.filters.push(FileNameFilter {
            pattern: pattern.into(),
            destination: DestinationId(destination.into()),
        });
        self
    }

    pub fn has_secondaries(&self, data_type: DataType) -> bool {
        self.secondaries
            .get(&data_type)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Destination for the given retry attempt. Attempt 0 consults the
    /// file-name filters and falls back to the primary; attempt N >= 1 with
    /// failover enabled picks the Nth secondary (clamped to the last entry).
    /// Missing configuration short-circuits with a Configuration error; no
    /// network call is made for it.
    pub fn resolve_for_attempt(
        &self,
        data_type: DataType,
        file_name: &str,
        attempt: u32,
        use_secondary: bool,
    ) -> TaskResult<ResolvedDestination> {
        if attempt >= 1
            && use_secondary
            && let Some(ids) = self.secondaries.get(&data_type).filter(|ids| !ids.is_empty())
        {
            let index = ((attempt - 1) as usize).min(ids.len() - 1);
            return self.lookup(data_type, &ids[index]);
        }

        let filtered = self
            .filters
            .iter()
            .find(|filter| wildcard_match(&filter.pattern, file_name))
            .map(|filter| &filter.destination);

        let id = match filtered.or_else(|| self.primaries.get(&data_type)) {
            Some(id) => id,
            None => {
                return Err(configuration_error(
                    data_type,
                    format!(
                        "no upload destination is configured for {} uploads",
                        data_type.as_str()
                    ),
                ));
            }
        };

        self.lookup(data_type, id)
    }

    fn lookup(&self, data_type: DataType, id: &DestinationId) -> TaskResult<ResolvedDestination> {
        match self.uploaders.get(id) {
            Some(uploader) => Ok(ResolvedDestination {
                id: id.clone(),
                uploader: uploader.clone(),
            }),
            None => Err(configuration_error(
                data_type,
                format!("destination '{id}' is configured but has no uploader registered"),
            )),
        }
    }
}

fn configuration_error(data_type: DataType, message: String) -> TaskError {
    TaskError {
        job: None,
        data_type: Some(data_type),
        kind: TaskErrorKind::Configuration,
        message,
    }
}

/// Case-insensitive glob over `*` (any run) and `?` (any one character).
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let name: Vec<char> = name.to_ascii_lowercase().chars().collect();

    let mut p = 0;
    let mut n = 0;
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}

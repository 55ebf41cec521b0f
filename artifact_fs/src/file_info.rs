//! File metadata returned by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FsError, FsResult};

/// Metadata about a file or directory on a backend.
///
/// `full_path` is relative to the adapter that produced it and can always be
/// handed back to that adapter's `stat`/`read`, which is what makes glob
/// results addressable outside the listing that found them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Base name (last path segment).
    pub name: String,

    /// Size in bytes. Zero for directories.
    pub size: u64,

    /// Last modification time; the unix epoch when the backend doesn't report one.
    pub mod_time: DateTime<Utc>,

    pub is_dir: bool,

    /// Backend-relative path.
    pub full_path: String,
}

impl FileInfo {
    pub fn file(full_path: impl Into<String>, size: u64, mod_time: DateTime<Utc>) -> Self {
        let full_path = full_path.into();
        Self {
            name: base_name(&full_path).to_string(),
            size,
            mod_time,
            is_dir: false,
            full_path,
        }
    }

    pub fn dir(full_path: impl Into<String>, mod_time: DateTime<Utc>) -> Self {
        let full_path = full_path.into();
        Self {
            name: base_name(&full_path).to_string(),
            size: 0,
            mod_time,
            is_dir: true,
            full_path,
        }
    }

    /// Build from local filesystem metadata.
    pub fn from_metadata(full_path: impl Into<String>, metadata: &std::fs::Metadata) -> Self {
        let mod_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if metadata.is_dir() {
            Self::dir(full_path, mod_time)
        } else {
            Self::file(full_path, metadata.len(), mod_time)
        }
    }

    /// Number of path segments in `full_path`.
    pub fn depth(&self) -> usize {
        segment_count(&self.full_path)
    }
}

/// The result of a `read_dir`.
///
/// `truncated` is set when a list items cap stopped enumeration while more
/// entries were still available. Truncation is not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub entries: Vec<FileInfo>,
    pub truncated: bool,
}

impl Listing {
    pub fn complete(entries: Vec<FileInfo>) -> Self {
        Self {
            entries,
            truncated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.full_path.as_str()).collect()
    }
}

impl IntoIterator for Listing {
    type Item = FileInfo;
    type IntoIter = std::vec::IntoIter<FileInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

pub(crate) fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

pub(crate) fn segment_count(path: &str) -> usize {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        0
    } else {
        trimmed.split('/').count()
    }
}

/// Join a directory and a child name with a single `/`.
/// Split a backend-relative path into its segments, dropping empty and `.`
/// segments. `..` is rejected so adapters can't be walked out of their root.
pub(crate) fn relative_segments(path: &str) -> FsResult<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(FsError::InvalidPath {
                    path: path.to_string(),
                    reason: "parent directory segments are not allowed".to_string(),
                })
            }
            segment => segments.push(segment),
        }
    }
    Ok(segments)
}

pub(crate) fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_and_depth() {
        let info = FileInfo::file("logs/a/b.json", 3, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(info.name, "b.json");
        assert_eq!(info.depth(), 3);

        let dir = FileInfo::dir("logs/a/", DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(dir.name, "a");
        assert_eq!(dir.depth(), 2);
        assert_eq!(segment_count(""), 0);
    }

    #[test]
    fn test_relative_segments() {
        assert_eq!(relative_segments("/a//./b/").unwrap(), vec!["a", "b"]);
        assert!(relative_segments("").unwrap().is_empty());
        assert!(matches!(
            relative_segments("a/../b").unwrap_err(),
            FsError::InvalidPath { .. }
        ));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a.txt"), "a.txt");
        assert_eq!(join_path("logs/", "a.txt"), "logs/a.txt");
        assert_eq!(join_path("/srv", "a.txt"), "/srv/a.txt");
    }
}

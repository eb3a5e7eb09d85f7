//! Storage layout for captured media.
//!
//! Everything lives under one root, partitioned as
//! `{root}/{category}/{YYYY-MM-DD}/{session}/`. Frames are named
//! `{date}_{index}.jpg` and a session's video is `{date}.mp4`.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Top-level media category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Still frames captured during a run
    Capture,
    /// Recorded run videos
    Video,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Capture => "capture",
            Category::Video => "video",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar day that scopes session numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateBucket(NaiveDate);

impl DateBucket {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for DateBucket {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, DATE_FORMAT).map(Self)
    }
}

impl Serialize for DateBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Session (sub-folder) identifier within a date bucket.
///
/// Always positive; rendered as its decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u32);

impl SessionId {
    pub const FIRST: SessionId = SessionId(1);

    /// Returns `None` for zero.
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// `None` once the id space is exhausted.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Parse a directory name; anything that is not a positive decimal is rejected.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse().ok().and_then(Self::new)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Source of "today"
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn today(&self) -> DateBucket;
}

/// Local wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> DateBucket {
        DateBucket(Local::now().date_naive())
    }
}

/// Maps (category, date, session) onto directories under the storage root.
///
/// Never touches the filesystem.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn date_dir(&self, category: Category, date: DateBucket) -> PathBuf {
        self.root.join(category.as_str()).join(date.to_string())
    }

    pub fn session_dir(&self, category: Category, date: DateBucket, session: SessionId) -> PathBuf {
        self.date_dir(category, date).join(session.to_string())
    }

    /// Path relative to the root, with forward slashes, for building URLs
    pub fn web_path(
        &self,
        category: Category,
        date: DateBucket,
        session: SessionId,
        filename: &str,
    ) -> String {
        format!("{}/{}/{}/{}", category, date, session, filename)
    }
}

pub fn frame_filename(date: DateBucket, index: u64) -> String {
    format!("{}_{}.jpg", date, index)
}

pub fn video_filename(date: DateBucket) -> String {
    format!("{}.mp4", date)
}

#[cfg(test)]
pub(crate) fn bucket(s: &str) -> DateBucket {
    s.parse().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_dir_layout() {
        let resolver = PathResolver::new("/srv/results");
        assert_eq!(
            resolver.date_dir(Category::Capture, bucket("2024-01-05")),
            PathBuf::from("/srv/results/capture/2024-01-05")
        );
        assert_eq!(
            resolver.session_dir(Category::Video, bucket("2024-01-05"), SessionId(3)),
            PathBuf::from("/srv/results/video/2024-01-05/3")
        );
    }

    #[test]
    fn test_filenames() {
        let date = bucket("2024-12-31");
        assert_eq!(frame_filename(date, 7), "2024-12-31_7.jpg");
        assert_eq!(video_filename(date), "2024-12-31.mp4");
    }

    #[test]
    fn test_web_path() {
        let resolver = PathResolver::new("ignored");
        assert_eq!(
            resolver.web_path(Category::Capture, bucket("2024-01-01"), SessionId(2), "a.jpg"),
            "capture/2024-01-01/2/a.jpg"
        );
    }

    #[test]
    fn test_session_id_from_dir_name() {
        assert_eq!(SessionId::from_dir_name("12"), Some(SessionId(12)));
        assert_eq!(SessionId::from_dir_name("0"), None);
        assert_eq!(SessionId::from_dir_name("-1"), None);
        assert_eq!(SessionId::from_dir_name("+4"), None);
        assert_eq!(SessionId::from_dir_name("backup"), None);
        assert_eq!(SessionId::from_dir_name(""), None);
    }

    #[test]
    fn test_session_id_next_stops_at_ceiling() {
        assert_eq!(SessionId(7).next(), Some(SessionId(8)));
        assert_eq!(SessionId(u32::MAX).next(), None);
    }

    #[test]
    fn test_serialization_as_strings() {
        assert_eq!(serde_json::to_string(&SessionId(4)).unwrap(), "\"4\"");
        assert_eq!(
            serde_json::to_string(&bucket("2024-01-01")).unwrap(),
            "\"2024-01-01\""
        );
        assert_eq!(serde_json::to_string(&Category::Video).unwrap(), "\"video\"");
    }

    #[test]
    fn test_date_bucket_rejects_garbage() {
        assert!("2024/01/01".parse::<DateBucket>().is_err());
        assert!("yesterday".parse::<DateBucket>().is_err());
    }
}

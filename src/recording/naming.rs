//! Segment path naming.
//!
//! Paths combine the local wall-clock time a segment was opened with a
//! per-writer index (and, for motion recordings, a per-run session number),
//! so two segments of the same stream never share a path within a run even
//! when they open in the same second.

use chrono::Local;
use std::path::{Path, PathBuf};

/// Timestamp layout embedded in segment names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// File-name prefix of motion recordings.
pub const MOTION_PREFIX: &str = "motion_";

/// Derives segment paths for one writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    dir: PathBuf,
    prefix: String,
    tag: Option<String>,
    extension: String,
}

impl PathTemplate {
    /// Template for the continuous archive: `<dir>/<stamp>_<index>.<ext>`.
    pub fn archive(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: String::new(),
            tag: None,
            extension: extension.to_string(),
        }
    }

    /// Template for a motion session:
    /// `<dir>/motion_<stamp>_<session>_<index>.<ext>`.
    pub fn motion(dir: impl Into<PathBuf>, session: u64, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: MOTION_PREFIX.to_string(),
            tag: Some(session.to_string()),
            extension: extension.to_string(),
        }
    }

    /// Directory segments are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for segment `index`, stamped with the current local time.
    pub fn path(&self, index: u32) -> PathBuf {
        self.path_with_stamp(&Local::now().format(TIMESTAMP_FORMAT).to_string(), index)
    }

    /// Path for segment `index` with an explicit timestamp string.
    pub fn path_with_stamp(&self, stamp: &str, index: u32) -> PathBuf {
        let name = match &self.tag {
            Some(tag) => format!("{}{stamp}_{tag}_{index}.{}", self.prefix, self.extension),
            None => format!("{}{stamp}_{index}.{}", self.prefix, self.extension),
        };
        self.dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_names() {
        let template = PathTemplate::archive("out", "y4m");
        assert_eq!(
            template.path_with_stamp("2024-01-02_03-04-05", 3),
            PathBuf::from("out/2024-01-02_03-04-05_3.y4m")
        );
    }

    #[test]
    fn test_motion_names_carry_session() {
        let template = PathTemplate::motion("motion-detected", 7, "y4m");
        assert_eq!(
            template.path_with_stamp("2024-01-02_03-04-05", 0),
            PathBuf::from("motion-detected/motion_2024-01-02_03-04-05_7_0.y4m")
        );
    }

    #[test]
    fn test_same_second_different_index() {
        let template = PathTemplate::archive("out", "y4m");
        assert_ne!(template.path(0), template.path(1));
    }
}

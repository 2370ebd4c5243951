use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Still-image extensions accepted by default.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tiff"];

/// Video and animation extensions accepted by default.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "gif", "webm"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters that control which files the enumerator yields.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    /// When false, only the direct children of a directory root are visited.
    pub recursive: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            image_extensions: to_owned_list(IMAGE_EXTENSIONS),
            video_extensions: to_owned_list(VIDEO_EXTENSIONS),
            recursive: true,
        }
    }
}

impl ScanConfig {
    pub fn with_recursive(mut self, enabled: bool) -> Self {
        self.recursive = enabled;
        self
    }

    /// Classifies `path` by its lowercase extension against the allow-lists.
    pub fn kind_of(&self, path: &Path) -> Option<MediaKind> {
        if has_extension(path, &self.image_extensions) {
            Some(MediaKind::Image)
        } else if has_extension(path, &self.video_extensions) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// Classifies `path` using the default allow-lists.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let lower = lowercase_extension(path)?;
    if IMAGE_EXTENSIONS.contains(&lower.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&lower.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// A file that passed the extension filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: MediaKind,
}

impl Candidate {
    /// Base name used as the dedup key in the output CSV.
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("input path does not exist: {}", .0.display())]
    InvalidPath(PathBuf),
}

/// Lazy sequence of candidate media files under a root.
pub struct MediaPaths {
    source: Source,
}

enum Source {
    Single(Option<Candidate>),
    Walk {
        entries: walkdir::IntoIter,
        config: ScanConfig,
    },
}

impl Iterator for MediaPaths {
    type Item = Candidate;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Single(candidate) => candidate.take(),
            Source::Walk { entries, config } => loop {
                let entry = match entries.next()? {
                    Ok(entry) => entry,
                    Err(error) => {
                        warn!(%error, "skipping unreadable directory entry");
                        continue;
                    }
                };
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match config.kind_of(path) {
                    Some(kind) => {
                        return Some(Candidate {
                            path: entry.into_path(),
                            kind,
                        })
                    }
                    None => debug!(path = %path.display(), "skipping unsupported file"),
                }
            },
        }
    }
}

/// Lists supported media files under `root`.
///
/// A file root yields at most itself. Directory walks are sorted by file name
/// so repeated runs visit files in the same order.
pub fn enumerate(root: &Path, config: &ScanConfig) -> Result<MediaPaths, ScanError> {
    if !root.exists() {
        return Err(ScanError::InvalidPath(root.to_path_buf()));
    }

    if root.is_file() {
        let candidate = match config.kind_of(root) {
            Some(kind) => Some(Candidate {
                path: root.to_path_buf(),
                kind,
            }),
            None => {
                warn!(
                    path = %root.display(),
                    extension = %lowercase_extension(root).unwrap_or_default(),
                    "unsupported file type"
                );
                None
            }
        };
        return Ok(MediaPaths {
            source: Source::Single(candidate),
        });
    }

    let mut walker = WalkDir::new(root).sort_by_file_name();
    if !config.recursive {
        walker = walker.max_depth(1);
    }
    Ok(MediaPaths {
        source: Source::Walk {
            entries: walker.into_iter(),
            config: config.clone(),
        },
    })
}

/// Counts candidates up front so progress can be reported against a total.
pub fn count_candidates(root: &Path, config: &ScanConfig) -> Result<u64, ScanError> {
    Ok(enumerate(root, config)?.count() as u64)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    lowercase_extension(path)
        .map(|lower| extensions.iter().any(|candidate| candidate == &lower))
        .unwrap_or(false)
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

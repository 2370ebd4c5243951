//! Decoding of images and representative video frames into RGB buffers.

use crate::scanner::{file_name, MediaKind};
use opencv::core::{AlgorithmHint, Mat};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// A decoded RGB8 pixel buffer, row-major, three bytes per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Source frame number inside a video; 0 for still images.
    pub index: u64,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn from_rgb(
        width: u32,
        height: u32,
        index: u64,
        pixels: Vec<u8>,
    ) -> Result<Self, MediaError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(MediaError::InvalidBuffer {
                width,
                height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            index,
            pixels,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some([
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ])
    }
}

/// Which frames of a video stand in for its content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FrameSampling {
    First,
    #[default]
    Middle,
    /// A fixed frame number, clamped to the last frame.
    Index(u64),
    /// Up to this many evenly spaced frames, captioned separately.
    Spread(u32),
}

impl FromStr for FrameSampling {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "first" => return Ok(Self::First),
            "middle" => return Ok(Self::Middle),
            _ => {}
        }
        if let Some(index) = value.strip_prefix("index:") {
            return index
                .parse()
                .map(Self::Index)
                .map_err(|_| format!("invalid frame index: {}", index));
        }
        if let Some(count) = value.strip_prefix("spread:") {
            return match count.parse::<u32>() {
                Ok(count) if count > 0 => Ok(Self::Spread(count)),
                _ => Err(format!("spread count must be a positive integer: {}", count)),
            };
        }
        Err(format!(
            "unknown frame sampling '{}' (expected first, middle, index:N or spread:K)",
            value
        ))
    }
}

impl Display for FrameSampling {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Middle => write!(f, "middle"),
            Self::Index(index) => write!(f, "index:{}", index),
            Self::Spread(count) => write!(f, "spread:{}", count),
        }
    }
}

impl TryFrom<String> for FrameSampling {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrameSampling> for String {
    fn from(value: FrameSampling) -> Self {
        value.to_string()
    }
}

/// Frame numbers to decode from a video with `total` frames.
pub fn frame_indices(policy: FrameSampling, total: u64) -> Vec<u64> {
    if total == 0 {
        return Vec::new();
    }
    match policy {
        FrameSampling::First => vec![0],
        FrameSampling::Middle => vec![total / 2],
        FrameSampling::Index(index) => vec![index.min(total - 1)],
        FrameSampling::Spread(count) => {
            let count = u64::from(count.max(1));
            if total <= count {
                (0..total).collect()
            } else {
                let step = total / count;
                (0..count).map(|i| i * step).collect()
            }
        }
    }
}

/// A media file while it is being processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaItem {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size_bytes: u64,
    /// Pixel dimensions of the first decoded frame.
    pub dimensions: Option<(u32, u32)>,
}

impl MediaItem {
    pub fn inspect(path: &Path, kind: MediaKind) -> Result<Self, MediaError> {
        let metadata = std::fs::metadata(path).map_err(|source| MediaError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            size_bytes: metadata.len(),
            dimensions: None,
        })
    }

    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    /// Lowercase extension with its leading dot, e.g. `.jpg`.
    pub fn file_type(&self) -> String {
        file_type(&self.path)
    }
}

pub fn file_type(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Decodes a media file into one or more frames.
pub trait MediaLoader {
    fn load(&self, path: &Path, kind: MediaKind) -> Result<Vec<Frame>, MediaError>;
}

/// OpenCV-backed loader for still images and video containers.
#[derive(Clone, Debug, Default)]
pub struct OpenCvMediaLoader {
    sampling: FrameSampling,
}

impl OpenCvMediaLoader {
    pub fn new(sampling: FrameSampling) -> Self {
        Self { sampling }
    }

    pub fn sampling(&self) -> FrameSampling {
        self.sampling
    }

    pub fn load_image(&self, path: &Path) -> Result<Frame, MediaError> {
        let path_str = utf8_path(path)?;
        let image = imgcodecs::imread(path_str, imgcodecs::IMREAD_COLOR).map_err(|error| {
            MediaError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: error.to_string(),
            }
        })?;
        if image.empty() {
            return Err(MediaError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: String::from("decoder returned no pixels"),
            });
        }
        bgr_to_frame(&image, 0)
    }

    pub fn load_video(&self, path: &Path) -> Result<Vec<Frame>, MediaError> {
        let path_str = utf8_path(path)?;
        let video_error = |reason: String| MediaError::VideoRead {
            path: path.to_path_buf(),
            reason,
        };

        let mut capture = VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .map_err(|error| video_error(error.to_string()))?;
        if !capture
            .is_opened()
            .map_err(|error| video_error(error.to_string()))?
        {
            return Err(video_error(String::from("could not open container")));
        }

        let reported = capture
            .get(videoio::CAP_PROP_FRAME_COUNT)
            .map_err(|error| video_error(error.to_string()))?;
        let total = if reported.is_finite() && reported > 0.0 {
            reported as u64
        } else {
            0
        };
        let indices = frame_indices(self.sampling, total);
        if indices.is_empty() {
            return Err(video_error(String::from("container reports no frames")));
        }

        let mut frames = Vec::with_capacity(indices.len());
        for index in indices {
            capture
                .set(videoio::CAP_PROP_POS_FRAMES, index as f64)
                .map_err(|error| video_error(error.to_string()))?;
            let mut decoded = Mat::default();
            let grabbed = capture
                .read(&mut decoded)
                .map_err(|error| video_error(error.to_string()))?;
            if grabbed && !decoded.empty() {
                frames.push(bgr_to_frame(&decoded, index)?);
            } else {
                debug!(path = %path.display(), frame = index, "frame could not be decoded");
            }
        }

        if frames.is_empty() {
            return Err(video_error(String::from("no decodable frames")));
        }
        Ok(frames)
    }
}

impl MediaLoader for OpenCvMediaLoader {
    fn load(&self, path: &Path, kind: MediaKind) -> Result<Vec<Frame>, MediaError> {
        match kind {
            MediaKind::Image => self.load_image(path).map(|frame| vec![frame]),
            MediaKind::Video => self.load_video(path),
        }
    }
}

fn utf8_path(path: &Path) -> Result<&str, MediaError> {
    path.to_str()
        .ok_or_else(|| MediaError::InvalidPath(path.to_path_buf()))
}

fn bgr_to_frame(image: &Mat, index: u64) -> Result<Frame, MediaError> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(
        image,
        &mut rgb,
        imgproc::COLOR_BGR2RGB,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    let width = u32::try_from(rgb.cols()).unwrap_or(0);
    let height = u32::try_from(rgb.rows()).unwrap_or(0);
    let pixels = rgb.data_bytes()?.to_vec();
    Frame::from_rgb(width, height, index, pixels)
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),
    #[error("unsupported or corrupt image {}: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },
    #[error("unable to read video {}: {reason}", path.display())]
    VideoRead { path: PathBuf, reason: String },
    #[error("pixel buffer of {actual} bytes does not match {width}x{height} RGB")]
    InvalidBuffer { width: u32, height: u32, actual: usize },
    #[error("io error for {}: {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{self, Scalar, Vector};
    use std::fs;
    use tempfile::tempdir;

    fn write_image(path: &Path, rows: i32, cols: i32, bgr: (f64, f64, f64)) {
        let image = Mat::new_rows_cols_with_default(
            rows,
            cols,
            core::CV_8UC3,
            Scalar::from((bgr.0, bgr.1, bgr.2, 0.0)),
        )
        .unwrap();
        let params = Vector::<i32>::new();
        imgcodecs::imwrite(path.to_string_lossy().as_ref(), &image, &params).unwrap();
    }

    #[test]
    fn decodes_red_png_to_rgb() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("red.png");
        write_image(&path, 10, 10, (0.0, 0.0, 255.0));

        let frames = OpenCvMediaLoader::default()
            .load(&path, MediaKind::Image)
            .unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.dimensions(), (10, 10));
        assert_eq!(frame.index, 0);
        assert_eq!(frame.pixels.len(), 300);
        assert_eq!(frame.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(frame.pixel(9, 9), Some([255, 0, 0]));
        assert_eq!(frame.pixel(10, 0), None);
    }

    #[test]
    fn keeps_non_square_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.bmp");
        write_image(&path, 20, 40, (10.0, 20.0, 30.0));

        let frame = OpenCvMediaLoader::default().load_image(&path).unwrap();
        assert_eq!(frame.dimensions(), (40, 20));
        assert_eq!(frame.pixel(3, 3), Some([30, 20, 10]));
    }

    #[test]
    fn truncated_image_is_unsupported_format() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.png");
        write_image(&good, 32, 32, (0.0, 255.0, 0.0));
        let bytes = fs::read(&good).unwrap();
        let broken = dir.path().join("broken.png");
        fs::write(&broken, &bytes[..16]).unwrap();

        let result = OpenCvMediaLoader::default().load(&broken, MediaKind::Image);
        assert!(matches!(result, Err(MediaError::UnsupportedFormat { .. })));
    }

    #[test]
    fn unreadable_video_is_video_read_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"definitely not a container").unwrap();

        let result = OpenCvMediaLoader::default().load(&path, MediaKind::Video);
        assert!(matches!(result, Err(MediaError::VideoRead { .. })));
    }

    /// Ten 32x24 frames, frame `i` filled with grey level `i * 25`.
    fn write_video(path: &Path) {
        let fourcc = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer = videoio::VideoWriter::new(
            path.to_string_lossy().as_ref(),
            fourcc,
            10.0,
            core::Size::new(32, 24),
            true,
        )
        .unwrap();
        assert!(writer.is_opened().unwrap());
        for i in 0..10 {
            let level = f64::from(i * 25);
            let frame = Mat::new_rows_cols_with_default(
                24,
                32,
                core::CV_8UC3,
                Scalar::from((level, level, level, 0.0)),
            )
            .unwrap();
            writer.write(&frame).unwrap();
        }
        drop(writer);
    }

    fn grey_level(frame: &Frame) -> i32 {
        let [r, g, b] = frame.pixel(16, 12).unwrap();
        (i32::from(r) + i32::from(g) + i32::from(b)) / 3
    }

    #[test]
    fn middle_frame_of_video() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        write_video(&path);

        let frames = OpenCvMediaLoader::new(FrameSampling::Middle)
            .load(&path, MediaKind::Video)
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].index, 5);
        assert_eq!(frames[0].dimensions(), (32, 24));
        assert!((grey_level(&frames[0]) - 125).abs() <= 10);
    }

    #[test]
    fn spread_frames_of_video() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        write_video(&path);

        let frames = OpenCvMediaLoader::new(FrameSampling::Spread(3))
            .load_video(&path)
            .unwrap();
        let indices: Vec<u64> = frames.iter().map(|frame| frame.index).collect();
        assert_eq!(indices, vec![0, 3, 6]);
        for frame in &frames {
            assert_eq!(frame.dimensions(), (32, 24));
            let expected = frame.index as i32 * 25;
            assert!((grey_level(frame) - expected).abs() <= 10);
        }
    }

    #[test]
    fn frame_indices_follow_policy() {
        assert!(frame_indices(FrameSampling::Middle, 0).is_empty());
        assert_eq!(frame_indices(FrameSampling::Middle, 1), vec![0]);
        assert_eq!(frame_indices(FrameSampling::Middle, 101), vec![50]);
        assert_eq!(frame_indices(FrameSampling::First, 40), vec![0]);
        assert_eq!(frame_indices(FrameSampling::Index(7), 40), vec![7]);
        assert_eq!(frame_indices(FrameSampling::Index(99), 40), vec![39]);
        assert_eq!(frame_indices(FrameSampling::Spread(5), 3), vec![0, 1, 2]);
        assert_eq!(
            frame_indices(FrameSampling::Spread(5), 100),
            vec![0, 20, 40, 60, 80]
        );
    }

    #[test]
    fn frame_sampling_parses_and_displays() {
        for text in ["first", "middle", "index:12", "spread:5"] {
            let policy: FrameSampling = text.parse().unwrap();
            assert_eq!(policy.to_string(), text);
        }
        assert_eq!("MIDDLE".parse::<FrameSampling>(), Ok(FrameSampling::Middle));
        assert!("spread:0".parse::<FrameSampling>().is_err());
        assert!("index:-1".parse::<FrameSampling>().is_err());
        assert!("last".parse::<FrameSampling>().is_err());
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(2, 2, 0, vec![0; 12]).is_ok());
        assert!(matches!(
            Frame::from_rgb(2, 2, 0, vec![0; 11]),
            Err(MediaError::InvalidBuffer { actual: 11, .. })
        ));
        assert!(Frame::from_rgb(0, 2, 0, Vec::new()).is_err());
    }

    #[test]
    fn media_item_reports_size_and_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Photo.JPG");
        fs::write(&path, vec![0u8; 2048]).unwrap();

        let item = MediaItem::inspect(&path, MediaKind::Image).unwrap();
        assert_eq!(item.size_bytes, 2048);
        assert_eq!(item.file_name(), "Photo.JPG");
        assert_eq!(item.file_type(), ".jpg");
        assert_eq!(item.dimensions, None);
    }
}

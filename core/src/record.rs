//! Output rows and their CSV column layout.

use crate::media::MediaItem;
use crate::scanner::Candidate;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use time::macros::format_description;
use time::OffsetDateTime;

/// Caption written for items that failed when failures are recorded.
pub const FAILED_CAPTION: &str = "ERROR";

/// Dimensions written when no frame was decoded.
pub const UNKNOWN_DIMENSIONS: &str = "unknown";

const DETAILED_HEADERS: [&str; 6] = [
    "filename",
    "caption",
    "size_kb",
    "dimensions",
    "file_type",
    "date_processed",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Detailed,
    Basic,
}

impl OutputFormat {
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            Self::Detailed => &DETAILED_HEADERS,
            Self::Basic => &DETAILED_HEADERS[..2],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detailed => "detailed",
            Self::Basic => "basic",
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detailed" => Ok(Self::Detailed),
            "basic" => Ok(Self::Basic),
            other => Err(format!(
                "unknown output format '{}', expected 'detailed' or 'basic'",
                other
            )),
        }
    }
}

/// One row of the output CSV.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptionRecord {
    pub filename: String,
    pub caption: String,
    pub size_kb: f64,
    pub dimensions: String,
    pub file_type: String,
    pub date_processed: String,
}

impl CaptionRecord {
    /// Field values in header order for `format`.
    pub fn fields(&self, format: OutputFormat) -> Vec<String> {
        match format {
            OutputFormat::Basic => vec![self.filename.clone(), self.caption.clone()],
            OutputFormat::Detailed => vec![
                self.filename.clone(),
                self.caption.clone(),
                format!("{:.1}", self.size_kb),
                self.dimensions.clone(),
                self.file_type.clone(),
                self.date_processed.clone(),
            ],
        }
    }

    pub fn is_failure(&self) -> bool {
        self.caption == FAILED_CAPTION
    }
}

/// Builds records, stamping each with the processing time.
#[derive(Clone, Copy, Debug)]
pub struct RecordBuilder {
    clock: fn() -> String,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self {
            clock: local_timestamp,
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(clock: fn() -> String) -> Self {
        Self { clock }
    }

    pub fn build(&self, item: &MediaItem, caption: impl Into<String>) -> CaptionRecord {
        CaptionRecord {
            filename: item.file_name(),
            caption: caption.into(),
            size_kb: round_kb(item.size_bytes),
            dimensions: item
                .dimensions
                .map(|(width, height)| format!("{}x{}", width, height))
                .unwrap_or_else(|| UNKNOWN_DIMENSIONS.to_string()),
            file_type: item.file_type(),
            date_processed: (self.clock)(),
        }
    }

    pub fn failed(&self, candidate: &Candidate) -> CaptionRecord {
        CaptionRecord {
            filename: candidate.file_name(),
            caption: FAILED_CAPTION.to_string(),
            size_kb: 0.0,
            dimensions: UNKNOWN_DIMENSIONS.to_string(),
            file_type: crate::media::file_type(&candidate.path),
            date_processed: (self.clock)(),
        }
    }
}

fn round_kb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 * 10.0).round() / 10.0
}

/// Current local time as `YYYY-MM-DD HH:MM:SS`, UTC when the offset is unknown.
pub fn local_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

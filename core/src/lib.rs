//! Core captioning engine for captag.
//!
//! This crate walks a directory for images and videos, decodes them into RGB
//! frames, captions each frame with an encoder/decoder ONNX model and appends
//! the results to a CSV file. Files whose name is already in the CSV are left
//! alone, so repeated runs only caption what is new.

pub mod captioner;
pub mod media;
pub mod pipeline;
pub mod processed;
pub mod progress;
pub mod record;
pub mod reporting;
pub mod scanner;
pub mod writer;

pub use captioner::{
    default_ort_dylib_path, init_ort_runtime, CaptionError, Captioner, CaptionerConfig, Device,
    OnnxCaptioner,
};
pub use media::{
    frame_indices, Frame, FrameSampling, MediaError, MediaItem, MediaLoader, OpenCvMediaLoader,
};
pub use pipeline::{
    describe, execute, plan, run, ItemError, RunError, RunOptions, RunPlan,
    FRAME_CAPTION_SEPARATOR,
};
pub use processed::ProcessedSet;
pub use record::{CaptionRecord, OutputFormat, RecordBuilder, FAILED_CAPTION};
pub use reporting::{print_summary, RunReport};
pub use scanner::{
    count_candidates, enumerate, media_kind, Candidate, MediaKind, MediaPaths, ScanConfig,
    ScanError, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS,
};
pub use writer::{CsvSink, OutputError, SaveMode};

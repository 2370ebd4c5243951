//! The captioning run: enumerate, filter, caption, record.
//!
//! Items are handled one at a time. A file that cannot be decoded or
//! captioned is logged and left out (or recorded as `ERROR` when failures
//! are recorded); only scan and output errors end the run early.

use crate::captioner::{CaptionError, Captioner};
use crate::media::{Frame, MediaError, MediaItem, MediaLoader};
use crate::processed::ProcessedSet;
use crate::progress::captioning_message;
use crate::record::{CaptionRecord, OutputFormat, RecordBuilder};
use crate::reporting::RunReport;
use crate::scanner::{enumerate, Candidate, ScanConfig, ScanError};
use crate::writer::{CsvSink, OutputError, SaveMode};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Separator between captions of several frames from one video.
pub const FRAME_CAPTION_SEPARATOR: &str = " | ";

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub scan: ScanConfig,
    pub output: PathBuf,
    pub format: OutputFormat,
    /// Skip files whose name is already in the output.
    pub skip_existing: bool,
    pub save_mode: SaveMode,
    /// Write an `ERROR` row for items that fail.
    pub record_failures: bool,
}

impl RunOptions {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            scan: ScanConfig::default(),
            output: output.into(),
            format: OutputFormat::Detailed,
            skip_existing: true,
            save_mode: SaveMode::Continuous,
            record_failures: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Why a single item was not captioned.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Caption(#[from] CaptionError),
}

/// Files selected for captioning, with the scan counters filled in.
#[derive(Clone, Debug, Default)]
pub struct RunPlan {
    pub pending: Vec<Candidate>,
    pub report: RunReport,
}

impl RunPlan {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Enumerate `root` and drop files already recorded in `options.output`.
///
/// Nothing is decoded and no model is needed, so callers can skip loading
/// the captioner when the plan is empty.
pub fn plan(root: &Path, options: &RunOptions) -> Result<RunPlan, RunError> {
    let mut plan = RunPlan::default();

    let mut processed = if options.skip_existing {
        ProcessedSet::load(&options.output)
    } else {
        ProcessedSet::default()
    };

    for candidate in enumerate(root, &options.scan)? {
        plan.report.discovered += 1;
        if options.skip_existing && !processed.insert(candidate.file_name()) {
            debug!(path = %candidate.path.display(), "already recorded, skipping");
            plan.report.skipped += 1;
            continue;
        }
        plan.pending.push(candidate);
    }

    info!(
        found = plan.report.discovered,
        skipped = plan.report.skipped,
        pending = plan.pending.len(),
        "scan complete"
    );
    Ok(plan)
}

/// Caption the files of `plan` and append the rows to `options.output`.
///
/// The output file is not touched when the plan is empty.
pub fn execute(
    plan: RunPlan,
    options: &RunOptions,
    loader: &dyn MediaLoader,
    captioner: &mut dyn Captioner,
    progress: &ProgressBar,
) -> Result<RunReport, RunError> {
    let RunPlan {
        pending,
        mut report,
    } = plan;
    if pending.is_empty() {
        return Ok(report);
    }

    let mut sink = CsvSink::open(&options.output, options.format, options.save_mode)?;
    let builder = RecordBuilder::new();
    progress.set_length(pending.len() as u64);

    for candidate in &pending {
        progress.set_message(captioning_message(&candidate.file_name()));

        match caption_item(candidate, loader, captioner, &builder) {
            Ok(record) => {
                debug!(file = %record.filename, caption = %record.caption, "captioned");
                sink.write(record)?;
                report.captioned += 1;
            }
            Err(error) => {
                progress.suspend(|| {
                    warn!(path = %candidate.path.display(), %error, "skipping file");
                });
                report.failed += 1;
                if options.record_failures {
                    sink.write(builder.failed(candidate))?;
                }
            }
        }
        progress.inc(1);
    }

    report.recorded = sink.finish()?;
    info!(
        captioned = report.captioned,
        failed = report.failed,
        output = %options.output.display(),
        "run complete"
    );
    Ok(report)
}

/// Caption every new media file under `root`: [`plan`] then [`execute`].
pub fn run(
    root: &Path,
    options: &RunOptions,
    loader: &dyn MediaLoader,
    captioner: &mut dyn Captioner,
    progress: &ProgressBar,
) -> Result<RunReport, RunError> {
    let plan = plan(root, options)?;
    execute(plan, options, loader, captioner, progress)
}

fn caption_item(
    candidate: &Candidate,
    loader: &dyn MediaLoader,
    captioner: &mut dyn Captioner,
    builder: &RecordBuilder,
) -> Result<CaptionRecord, ItemError> {
    let mut item = MediaItem::inspect(&candidate.path, candidate.kind)?;
    let frames = loader.load(&candidate.path, candidate.kind)?;
    item.dimensions = frames.first().map(Frame::dimensions);

    let caption = describe(captioner, &frames)?;
    Ok(builder.build(&item, caption))
}

/// Caption all frames of one item and join the results.
pub fn describe(captioner: &mut dyn Captioner, frames: &[Frame]) -> Result<String, CaptionError> {
    let captions = match frames {
        [] => return Err(CaptionError::Processing(String::from("no frames to caption"))),
        [frame] => vec![captioner.caption(frame)?],
        _ => captioner.caption_batch(frames)?,
    };
    for (frame, caption) in frames.iter().zip(&captions) {
        debug!(frame = frame.index, %caption, "frame caption");
    }
    Ok(captions.join(FRAME_CAPTION_SEPARATOR))
}

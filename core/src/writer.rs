//! Appending CSV sink for caption records.

use crate::record::{CaptionRecord, OutputFormat};
use csv::{ReaderBuilder, Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// When rows reach the destination file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaveMode {
    /// Each row is written and flushed as soon as its item completes.
    #[default]
    Continuous,
    /// Rows are held in memory and written when the sink is finished.
    Deferred,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode CSV row for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

pub struct CsvSink {
    path: PathBuf,
    format: OutputFormat,
    mode: SaveMode,
    writer: Writer<File>,
    pending: Vec<CaptionRecord>,
    written: usize,
}

impl CsvSink {
    /// Open `path` for appending, writing the header if the file is new or
    /// empty.
    pub fn open(path: &Path, format: OutputFormat, mode: SaveMode) -> Result<Self, OutputError> {
        let write_error = |source| OutputError::Write {
            path: path.to_path_buf(),
            source,
        };

        let has_content = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len() > 0,
            Err(_) => false,
        };
        if has_content {
            check_existing_header(path, format);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(write_error)?;
        // A hand-edited file may lack the final line terminator.
        if has_content && !ends_with_newline(path).map_err(write_error)? {
            file.write_all(b"\n").map_err(write_error)?;
        }

        let mut sink = Self {
            path: path.to_path_buf(),
            format,
            mode,
            writer: WriterBuilder::new().has_headers(false).from_writer(file),
            pending: Vec::new(),
            written: 0,
        };

        if !has_content {
            sink.write_fields(format.headers().iter().copied())?;
            sink.flush()?;
            debug!(path = %path.display(), %format, "created output CSV");
        }
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Record one row. In continuous mode the row is on disk when this returns.
    pub fn write(&mut self, record: CaptionRecord) -> Result<(), OutputError> {
        match self.mode {
            SaveMode::Continuous => {
                self.write_fields(record.fields(self.format))?;
                self.flush()?;
                self.written += 1;
            }
            SaveMode::Deferred => self.pending.push(record),
        }
        Ok(())
    }

    /// Write any held rows and flush. Returns the number of rows written.
    pub fn finish(mut self) -> Result<usize, OutputError> {
        let pending = std::mem::take(&mut self.pending);
        for record in pending {
            self.write_fields(record.fields(self.format))?;
            self.written += 1;
        }
        self.flush()?;
        Ok(self.written)
    }

    fn write_fields<I, T>(&mut self, fields: I) -> Result<(), OutputError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .map_err(|source| OutputError::Encode {
                path: self.path.clone(),
                source,
            })
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush().map_err(|source| OutputError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn check_existing_header(path: &Path, format: OutputFormat) {
    let reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path);
    let first = reader
        .ok()
        .and_then(|mut reader| reader.records().next())
        .and_then(Result::ok);
    if let Some(header) = first {
        let expected = format.headers().len();
        if header.len() != expected {
            warn!(
                path = %path.display(),
                found = header.len(),
                expected,
                "existing CSV has a different column count"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordBuilder;
    use crate::media::MediaItem;
    use crate::scanner::MediaKind;
    use std::fs;
    use tempfile::tempdir;

    fn record(name: &str) -> CaptionRecord {
        let item = MediaItem {
            path: PathBuf::from(name),
            kind: MediaKind::Image,
            size_bytes: 1024,
            dimensions: Some((2, 2)),
        };
        RecordBuilder::with_clock(|| String::from("2024-01-01 00:00:00")).build(&item, "a cat")
    }

    #[test]
    fn header_written_once_across_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = CsvSink::open(&path, OutputFormat::Detailed, SaveMode::Continuous).unwrap();
        sink.write(record("a.jpg")).unwrap();
        assert_eq!(sink.finish().unwrap(), 1);

        let mut sink = CsvSink::open(&path, OutputFormat::Detailed, SaveMode::Continuous).unwrap();
        sink.write(record("b.jpg")).unwrap();
        sink.finish().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "filename,caption,size_kb,dimensions,file_type,date_processed"
        );
        assert_eq!(lines[1], "a.jpg,a cat,1.0,2x2,.jpg,2024-01-01 00:00:00");
        assert!(lines[2].starts_with("b.jpg,"));
    }

    #[test]
    fn basic_format_has_two_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("basic.csv");
        let mut sink = CsvSink::open(&path, OutputFormat::Basic, SaveMode::Continuous).unwrap();
        sink.write(record("x.png")).unwrap();
        sink.finish().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "filename,caption\nx.png,a cat\n");
    }

    #[test]
    fn continuous_rows_are_on_disk_before_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.csv");
        let mut sink = CsvSink::open(&path, OutputFormat::Basic, SaveMode::Continuous).unwrap();
        sink.write(record("x.png")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
        sink.finish().unwrap();
    }

    #[test]
    fn deferred_rows_wait_for_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("later.csv");
        let mut sink = CsvSink::open(&path, OutputFormat::Basic, SaveMode::Deferred).unwrap();
        sink.write(record("x.png")).unwrap();
        sink.write(record("y.png")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
        assert_eq!(sink.finish().unwrap(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn captions_with_commas_are_quoted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quoted.csv");
        let mut sink = CsvSink::open(&path, OutputFormat::Basic, SaveMode::Continuous).unwrap();
        let mut row = record("x.png");
        row.caption = String::from("a dog, running");
        sink.write(row).unwrap();
        sink.finish().unwrap();
        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("x.png,\"a dog, running\""));
    }

    #[test]
    fn missing_final_newline_is_repaired_before_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edited.csv");
        fs::write(&path, "filename,caption\na.png,a cat").unwrap();

        let mut sink = CsvSink::open(&path, OutputFormat::Basic, SaveMode::Continuous).unwrap();
        sink.write(record("b.png")).unwrap();
        sink.finish().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "filename,caption\na.png,a cat\nb.png,a cat\n"
        );
        let processed = crate::processed::ProcessedSet::load(&path);
        assert!(processed.contains("a.png"));
        assert!(processed.contains("b.png"));
    }

    #[test]
    fn unwritable_destination_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");
        assert!(matches!(
            CsvSink::open(&path, OutputFormat::Basic, SaveMode::Continuous),
            Err(OutputError::Write { .. })
        ));
    }
}

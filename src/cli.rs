use captag_core::{FrameSampling, OutputFormat, RunOptions, SaveMode, ScanConfig};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

/// Caption images and videos and record the results in a CSV file.
#[derive(Parser, Debug, PartialEq)]
#[command(name = "captag", version, about)]
pub struct CliConfig {
    /// Image, video or directory to caption.
    pub root: PathBuf,

    /// Use all available cores for model inference.
    #[arg(long)]
    pub batch: bool,

    /// Destination CSV file.
    #[arg(short, long, default_value = "captions.csv")]
    pub output: PathBuf,

    /// Output columns: detailed or basic.
    #[arg(long, default_value = "detailed")]
    pub format: OutputFormat,

    /// Log debug details, including every caption.
    #[arg(short, long)]
    pub verbose: bool,

    /// Caption files even if their name is already in the output.
    #[arg(long)]
    pub no_skip: bool,

    /// Write all rows at the end of the run instead of after each file.
    #[arg(long)]
    pub no_continuous: bool,

    /// Record failed files with an ERROR caption so later runs skip them.
    #[arg(long)]
    pub record_failures: bool,

    /// Only look at the top level of the directory.
    #[arg(long)]
    pub no_recursive: bool,

    /// Video frames to caption: middle, first, index:N or spread:K.
    #[arg(long)]
    pub frames: Option<FrameSampling>,

    /// Model configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl CliConfig {
    pub fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    /// Parse arguments, excluding the program name.
    pub fn from_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let program = std::iter::once(OsString::from("captag"));
        Self::try_parse_from(program.chain(args.into_iter().map(Into::into)))
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            scan: ScanConfig::default().with_recursive(!self.no_recursive),
            output: self.output.clone(),
            format: self.format,
            skip_existing: !self.no_skip,
            save_mode: if self.no_continuous {
                SaveMode::Deferred
            } else {
                SaveMode::Continuous
            },
            record_failures: self.record_failures,
        }
    }
}

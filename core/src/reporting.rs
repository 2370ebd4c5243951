use std::fmt::{Display, Formatter};
use std::path::Path;

/// Counters for one captioning run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Supported files found under the root.
    pub discovered: usize,
    /// Files left out because their name is already in the output.
    pub skipped: usize,
    pub captioned: usize,
    pub failed: usize,
    /// Rows appended to the output, failure rows included.
    pub recorded: usize,
}

impl RunReport {
    pub fn pending(&self) -> usize {
        self.discovered - self.skipped
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} found, {} skipped, {} captioned, {} failed",
            self.discovered, self.skipped, self.captioned, self.failed
        )
    }
}

pub fn print_summary(report: &RunReport, output: &Path) {
    if report.discovered == 0 {
        println!("No supported files found");
        return;
    }
    if report.pending() == 0 {
        println!("All files already processed!");
        return;
    }
    println!("{}", report);
    if report.failed > 0 {
        println!("{} file(s) could not be captioned, see the log for details", report.failed);
    }
    println!("Done! Check {}", output.display());
}

use std::fmt;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clamstream_core::ScanResult;
use serde_json::{json, Value};

use crate::OutputFormat;

/// Outcome of scanning one file
pub type Outcome = clamstream_core::Result<ScanResult>;

/// Render one file's outcome as a single line
pub fn format_outcome(path: &Path, outcome: &Outcome, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Plain => Ok(match outcome {
            Ok(result) => format!("{}: {}", path.display(), result),
            Err(e) => format!("{}: {}", path.display(), e),
        }),
        OutputFormat::Json => {
            let mut value = match outcome {
                Ok(result) => serde_json::to_value(result)?,
                Err(e) => json!({ "status": "error", "error": e.to_string() }),
            };
            value["path"] = Value::from(path.display().to_string());
            Ok(value.to_string())
        }
    }
}

/// Running tally over a scan run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub clean: usize,
    pub infected: usize,
    pub errors: usize,
}

impl Summary {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Ok(ScanResult::Clean) => self.clean += 1,
            Ok(ScanResult::Infected { .. }) => self.infected += 1,
            Err(_) => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.clean + self.infected + self.errors
    }

    /// 1 if anything was infected, else 2 if anything failed, else 0
    fn status(&self) -> u8 {
        if self.infected > 0 {
            1
        } else if self.errors > 0 {
            2
        } else {
            0
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scanned {} files: {} clean, {} infected, {} errors",
            self.total(),
            self.clean,
            self.infected,
            self.errors
        )
    }
}

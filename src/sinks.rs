//! Downstream sink traits: tabular export, plotting, interactive prompts.
//!
//! The sinks are collaborators, not part of the pipeline: implementations
//! live with the embedding application (a spreadsheet writer, a plot window,
//! a terminal UI). The pipeline only depends on these seams, which also keeps
//! the loops testable against in-memory doubles.

use std::fmt;
use std::io::{BufRead, Write};

use crate::measurement::{Aggregation, MeasurementRecord, Mode};
use crate::session::Run;

/// A sink write failed. Logged by the pipeline and otherwise ignored;
/// ingestion must survive a wedged spreadsheet or plot window.
#[derive(Debug, thiserror::Error)]
#[error("sink failure: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// One typed spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v:.2}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

/// Persistent tabular storage with a column block per run.
///
/// Rows are appended at the run's cursor inside its column block starting at
/// `run.start_col`; `set_cell` addresses a cell absolutely (used for the
/// calibration-impedance header the device announces after the run opened).
pub trait ExportSink {
    fn new_run(&mut self, run: &Run, headers: &[&str]) -> Result<(), SinkError>;
    fn append_row(&mut self, run: &Run, values: &[CellValue]) -> Result<(), SinkError>;
    fn set_cell(&mut self, run: &Run, row: u32, col: u32, value: CellValue)
        -> Result<(), SinkError>;
}

/// Visualization sink receiving one finished record set at a time.
pub trait PlotSink {
    fn plot(
        &mut self,
        records: &[MeasurementRecord],
        mode: Mode,
        aggregation: Aggregation,
    ) -> Result<(), SinkError>;
}

/// Blocking solicitation channel to the operator.
pub trait PromptSink {
    fn solicit(&mut self, solicitation: &str) -> Result<String, SinkError>;
}

/// Prompt sink over stdin/stdout, the default for terminal sessions.
pub struct StdioPrompt;

impl PromptSink for StdioPrompt {
    fn solicit(&mut self, solicitation: &str) -> Result<String, SinkError> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{solicitation} ").map_err(|e| SinkError::new(e.to_string()))?;
        stdout.flush().map_err(|e| SinkError::new(e.to_string()))?;

        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .map_err(|e| SinkError::new(e.to_string()))?;
        Ok(answer.trim().to_string())
    }
}

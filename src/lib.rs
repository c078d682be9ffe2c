//! # bioimp-rs
//!
//! Host-side ingestion library for AD5933-based biosensor impedance
//! analyzers speaking a line-oriented serial protocol.
//!
//! The firmware streams a stateful mix of interactive prompts, status
//! banners, calibration points, and frequency-sweep measurements. This crate
//! classifies every line, tracks the session (current run, measurement mode,
//! electrode coordinate), validates counted range sweeps with an
//! acknowledge/retry handshake, and routes finished record sets to
//! caller-provided sinks.
//!
//! ## Features
//!
//! - **Ordered line classification**: every protocol line maps to exactly one
//!   tagged event, with a fixed priority when categories overlap
//! - **Session tracking**: runs bound to spreadsheet column blocks,
//!   coordinate propagation with an explicit unknown sentinel, mode routing
//! - **Counted sweep handshake**: point-count validation with `STORE_OK`
//!   acknowledgement and silent device-side retry on mismatch
//! - **Overflow fidelity**: `ovf` readings carry a flag end to end instead of
//!   collapsing into zeros
//! - **DataFrame output**: uses `polars` to hand plot consumers columnar and
//!   averaged views
//! - **Race-free by construction**: the two loops share nothing; all state
//!   crosses threads as owned values over channels
//!
//! ## Running a session
//!
//! ```rust,no_run
//! use bioimp_rs::{AnalyzerHost, SerialLink, StdioPrompt};
//! # use bioimp_rs::{CellValue, ExportSink, MeasurementRecord, Mode, Aggregation,
//! #     PlotSink, Run, SinkError};
//! # struct MyExport; struct MyPlot;
//! # impl ExportSink for MyExport {
//! #     fn new_run(&mut self, _: &Run, _: &[&str]) -> Result<(), SinkError> { Ok(()) }
//! #     fn append_row(&mut self, _: &Run, _: &[CellValue]) -> Result<(), SinkError> { Ok(()) }
//! #     fn set_cell(&mut self, _: &Run, _: u32, _: u32, _: CellValue) -> Result<(), SinkError> { Ok(()) }
//! # }
//! # impl PlotSink for MyPlot {
//! #     fn plot(&mut self, _: &[MeasurementRecord], _: Mode, _: Aggregation) -> Result<(), SinkError> { Ok(()) }
//! # }
//!
//! let host = AnalyzerHost::open(
//!     "/dev/ttyUSB0",
//!     SerialLink::DEFAULT_BAUD,
//!     MyExport,
//!     StdioPrompt,
//!     MyPlot,
//! )?;
//! host.wait();
//! # Ok::<(), bioimp_rs::HostError>(())
//! ```
//!
//! ## Classifying lines directly
//!
//! ```rust
//! use bioimp_rs::protocol::{classify, LineEvent};
//!
//! let event = classify(
//!     "50.00kHz: R=5440/I=-8309 |Z|=200000.00 Phase=0.00 degrees \
//!      Resistance=200000.00 Reactance=0.00",
//! );
//! let LineEvent::Measurement(record) = event else { unreachable!() };
//! assert_eq!(record.frequency_hz, 50_000);
//! ```

pub mod frame;
pub mod host;
pub mod ingest;
pub mod interact;
pub mod measurement;
pub mod protocol;
pub mod serial_link;
pub mod session;
pub mod sinks;
pub mod sweep;

// Re-export the main types for convenience
pub use host::{AnalyzerHost, HostError};

pub use ingest::{HostCommand, HostEvent, IngestLoop};

pub use interact::InteractLoop;

pub use measurement::{
    Aggregation, CalibrationRecord, Coordinate, MeasurementRecord, Mode, RawValue, Reading,
};

pub use protocol::{classify, LineEvent, StatusEvent};

pub use serial_link::{LineSink, LineSource, LinkError, SerialLink};

pub use session::{Run, SessionState, COLUMN_STRIDE};

pub use sinks::{CellValue, ExportSink, PlotSink, PromptSink, SinkError, StdioPrompt};

pub use sweep::{SweepTracker, SweepVerdict};

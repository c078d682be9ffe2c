//! Ingestion loop: reads the transport, classifies, dispatches.
//!
//! Runs on its own thread and exclusively owns the session state, the sweep
//! tracker, and the record buffers. Everything the interaction thread needs
//! crosses over as owned values on the event channel; everything it decides
//! comes back as [`HostCommand`] messages drained between reads. That split
//! is what keeps the pipeline free of shared mutable state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::measurement::{Coordinate, MeasurementRecord, Mode};
use crate::protocol::{self, LineEvent, StatusEvent};
use crate::serial_link::{LineSink, LineSource};
use crate::session::SessionState;
use crate::sinks::{CellValue, ExportSink};
use crate::sweep::{SweepTracker, SweepVerdict};

/// Messages from the ingestion thread to the interaction thread.
///
/// One FIFO channel carries prompts and completion signals alike, so the
/// consumer observes them in exact arrival order and each completion is
/// consumed exactly once. Buffers move by value; the producer never appends
/// into a buffer the consumer is flushing.
#[derive(Debug)]
pub enum HostEvent {
    /// A solicitation awaiting an operator response.
    Prompt(String),
    /// A single-point sweep finished; plot and drop these records.
    SingleSweepComplete {
        records: Vec<MeasurementRecord>,
        mode: Mode,
    },
    /// A range sweep session finished; ask for the aggregation view, then
    /// plot and drop these records.
    RangeSweepComplete {
        records: Vec<MeasurementRecord>,
        mode: Mode,
    },
    /// The transport is gone (or shutdown was requested); the interaction
    /// loop should drain and exit.
    Disconnected,
}

/// Messages from the interaction thread back to the ingestion thread,
/// derived from the semantic meaning of prompt answers.
#[derive(Debug)]
pub enum HostCommand {
    /// The operator answered the mode-selection prompt.
    ModeSelected(Mode),
    /// The operator answered the measurement-count prompt with this many
    /// increments; arms the sweep handshake.
    ArmSweep(u32),
}

/// Pause before retrying after a transient (non-disconnection) read error.
const RETRY_PAUSE: Duration = Duration::from_millis(20);

pub struct IngestLoop<R, A, E> {
    reader: R,
    /// Writer reserved for protocol acknowledgements.
    ack: A,
    export: E,
    session: SessionState,
    sweep: SweepTracker,
    /// Buffer for single-point modes, flushed on the sweep-complete banner.
    single_buf: Vec<MeasurementRecord>,
    /// Accepted range-sweep records, flushed on the range-complete banner.
    range_buf: Vec<MeasurementRecord>,
    events: Sender<HostEvent>,
    commands: Receiver<HostCommand>,
    shutdown: Arc<AtomicBool>,
}

impl<R, A, E> IngestLoop<R, A, E>
where
    R: LineSource,
    A: LineSink,
    E: ExportSink,
{
    pub fn new(
        reader: R,
        ack: A,
        export: E,
        events: Sender<HostEvent>,
        commands: Receiver<HostCommand>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reader,
            ack,
            export,
            session: SessionState::new(),
            sweep: SweepTracker::new(),
            single_buf: Vec::new(),
            range_buf: Vec::new(),
            events,
            commands,
            shutdown,
        }
    }

    /// Run until the transport disconnects or shutdown is requested, then
    /// hand leftover buffers to the consumer for a final flush.
    pub fn run(mut self) {
        self.session.open_initial_run(&mut self.export);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                log::info!("shutdown requested, stopping ingestion");
                break;
            }
            self.drain_commands();

            match self.reader.read_line() {
                Ok(None) => {}
                Ok(Some(line)) => {
                    if self.dispatch(&line).is_err() {
                        break;
                    }
                }
                Err(e) if e.is_disconnection() => {
                    log::info!("transport disconnected, stopping ingestion: {e}");
                    break;
                }
                Err(e) => {
                    log::error!("transport read failed, retrying: {e}");
                    std::thread::sleep(RETRY_PAUSE);
                }
            }
        }

        self.finish();
    }

    /// Apply commands the interaction thread derived from prompt answers.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                HostCommand::ModeSelected(mode) => self.session.set_mode(mode),
                HostCommand::ArmSweep(increments) => {
                    self.sweep.arm(increments);
                }
            }
        }
    }

    /// Route one classified line. `Err` means the consumer is gone or the
    /// acknowledgement write hit a dead transport; both end the loop.
    fn dispatch(&mut self, line: &str) -> Result<(), ()> {
        match protocol::classify(line) {
            LineEvent::CalibrationStarting => {
                log::info!("calibration starting, opening a new run");
                self.abandon_sweep();
                self.session.start_run(&mut self.export);
            }
            LineEvent::DeviceReset => {
                log::info!("device reset detected, opening a new run");
                self.abandon_sweep();
                self.session.start_run(&mut self.export);
            }
            LineEvent::Prompt(prompt) => {
                self.emit(HostEvent::Prompt(prompt))?;
            }
            LineEvent::SweepStart => {
                if self.session.mode().is_range() {
                    self.sweep.on_sweep_start();
                } else {
                    log::debug!("sweep start token outside a range mode, ignored");
                }
            }
            LineEvent::SweepDone => {
                if self.session.mode().is_range() {
                    self.resolve_sweep()?;
                } else {
                    log::debug!("sweep done token outside a range mode, ignored");
                }
            }
            LineEvent::Status(status) => self.on_status(status)?,
            LineEvent::Calibration(record) => {
                self.session.append_calibration(&mut self.export, record);
            }
            LineEvent::Measurement(record) => self.on_measurement(record),
            LineEvent::Unrecognized => {
                log::debug!("unclassified line: {line:?}");
            }
        }
        Ok(())
    }

    fn on_status(&mut self, status: StatusEvent) -> Result<(), ()> {
        match status {
            StatusEvent::CalibrationImpedance(value) => {
                self.session
                    .note_calibration_impedance(&mut self.export, &value);
            }
            StatusEvent::AddressSet { x, y } => {
                self.session.append_row(
                    &mut self.export,
                    &[
                        CellValue::from("Set Coordinates"),
                        CellValue::from(format!("X={x}")),
                        CellValue::from(format!("Y={y}")),
                    ],
                );
                // Single-point modes take their coordinate straight from the
                // address configuration; range modes get dedicated lines.
                if self.session.mode().is_single_point() {
                    self.session.set_coordinate(Coordinate::At { x, y });
                }
            }
            StatusEvent::GroupSelected(group) => {
                self.session
                    .append_banner(&mut self.export, &format!("Group {group} selected"));
                self.session.append_measurement_headers(&mut self.export);
            }
            StatusEvent::CheckingRcal => {
                self.session
                    .append_banner(&mut self.export, "Checking impedance at Rcal position.");
                self.session.set_mode(Mode::Rcal);
                self.session.append_measurement_headers(&mut self.export);
            }
            StatusEvent::CheckingCob => {
                self.session
                    .append_banner(&mut self.export, "Checking impedance of COB.");
                self.session.set_mode(Mode::Cob);
            }
            StatusEvent::RangeSweepStarting => {
                self.session
                    .append_banner(&mut self.export, "Starting COB Range Sweep (7-bit input).");
                self.session.set_mode(Mode::CobRange);
            }
            StatusEvent::RangeStepSweepStarting => {
                self.session.append_banner(
                    &mut self.export,
                    "Starting COB Range Step Sweep (X/Y increment setting).",
                );
                self.session.set_mode(Mode::CobRangeStep);
            }
            StatusEvent::CoordinateUpdate { x, y } => {
                self.session.append_row(
                    &mut self.export,
                    &[
                        CellValue::from("Current Coordinates"),
                        CellValue::from(format!("X={x}")),
                        CellValue::from(format!("Y={y}")),
                    ],
                );
                self.session.set_coordinate(Coordinate::At { x, y });
            }
            StatusEvent::SingleSweepComplete => {
                let mode = self.session.mode();
                if mode.is_single_point() {
                    let records = std::mem::take(&mut self.single_buf);
                    self.session.clear_coordinate();
                    self.emit(HostEvent::SingleSweepComplete { records, mode })?;
                } else {
                    log::debug!("sweep-complete banner in {} mode, ignored", mode.label());
                }
            }
            StatusEvent::RangeSweepComplete => {
                let mode = self.session.mode();
                if mode.is_range() {
                    let records = std::mem::take(&mut self.range_buf);
                    self.session.clear_coordinate();
                    self.emit(HostEvent::RangeSweepComplete { records, mode })?;
                } else {
                    log::debug!(
                        "range-complete banner in {} mode, ignored",
                        mode.label()
                    );
                }
            }
        }
        Ok(())
    }

    /// Stamp the live coordinate and route the record by mode. Unknown-mode
    /// records are discarded, not buffered.
    fn on_measurement(&mut self, mut record: MeasurementRecord) {
        record.coord = self.session.coordinate();
        let mode = self.session.mode();

        if mode.is_single_point() {
            self.session.append_measurement(&mut self.export, &record);
            self.single_buf.push(record);
        } else if mode.is_range() {
            if !self.sweep.on_record(record) {
                log::debug!("measurement outside a sweep window, dropped");
            }
        } else {
            log::debug!("measurement in {} mode, discarded", mode.label());
        }
    }

    /// Resolve the handshake on a done token: commit and acknowledge on an
    /// exact count match, stay silent otherwise (the silence triggers the
    /// device-side retry).
    fn resolve_sweep(&mut self) -> Result<(), ()> {
        match self.sweep.on_sweep_done() {
            Some(SweepVerdict::Accepted(records)) => {
                log::info!("sweep accepted with {} points", records.len());
                for record in &records {
                    self.session.append_measurement(&mut self.export, record);
                }
                self.range_buf.extend(records);

                if let Err(e) = self.ack.write_line(protocol::STORE_OK) {
                    log::error!("failed to acknowledge sweep: {e}");
                    if e.is_disconnection() {
                        return Err(());
                    }
                }
            }
            Some(SweepVerdict::Rejected { expected, received }) => {
                log::warn!(
                    "sweep rejected: got {received} points, expected {expected:?}; awaiting re-transmission"
                );
            }
            None => log::debug!("done token with no open sweep, ignored"),
        }
        Ok(())
    }

    fn abandon_sweep(&mut self) {
        let dropped = self.sweep.discard();
        if dropped > 0 {
            log::warn!("discarding {dropped} staged points from an interrupted sweep");
        }
    }

    fn emit(&self, event: HostEvent) -> Result<(), ()> {
        self.events.send(event).map_err(|_| {
            log::error!("interaction loop is gone, stopping ingestion");
        })
    }

    /// Final flush: leftover buffers go to the consumer so nothing measured
    /// is lost on shutdown, then the shutdown event closes the channel's
    /// logical stream.
    fn finish(mut self) {
        self.abandon_sweep();

        if !self.single_buf.is_empty() {
            let records = std::mem::take(&mut self.single_buf);
            let mode = self.session.mode();
            let _ = self.events.send(HostEvent::SingleSweepComplete { records, mode });
        }
        if !self.range_buf.is_empty() {
            let records = std::mem::take(&mut self.range_buf);
            let mode = self.session.mode();
            let _ = self.events.send(HostEvent::RangeSweepComplete { records, mode });
        }
        let _ = self.events.send(HostEvent::Disconnected);
    }
}

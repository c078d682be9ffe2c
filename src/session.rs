//! Session bookkeeping: the current run, live coordinate, active mode.
//!
//! Owned exclusively by the ingestion thread; the interaction thread only
//! influences it through command messages. Export failures are logged and
//! swallowed here so a wedged sink can never stall ingestion.

use crate::measurement::{CalibrationRecord, Coordinate, MeasurementRecord, Mode};
use crate::sinks::{CellValue, ExportSink};

/// Column width of one run's block in the export sheet.
pub const COLUMN_STRIDE: u32 = 8;

/// First data row of a run's block (rows 1 and 2 hold the run banner and the
/// calibration headers).
const FIRST_DATA_ROW: u32 = 3;

/// Headers of the calibration block written when a run opens.
pub const CALIBRATION_HEADERS: &[&str] = &["Cal Point", "R / I", "|Z|", "System Phase"];

/// Headers of a measurement block within a run.
pub const MEASUREMENT_HEADERS: &[&str] = &[
    "Freq (Hz)",
    "R / I",
    "|Z|",
    "Phase (Degrees)",
    "Resistance",
    "Reactance",
    "X",
    "Y",
];

/// One calibration/measurement session, bound to a fixed column block.
///
/// Runs are never destroyed, only superseded; the export sink keeps earlier
/// blocks addressable while live state tracks the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub index: u32,
    /// Leftmost column of this run's block.
    pub start_col: u32,
    /// Next writable row inside the block.
    pub cursor: u32,
}

impl Run {
    fn with_index(index: u32) -> Self {
        Self {
            index,
            start_col: 1 + COLUMN_STRIDE * index,
            cursor: FIRST_DATA_ROW,
        }
    }
}

pub struct SessionState {
    run: Run,
    coord: Coordinate,
    mode: Mode,
    calibration_log: Vec<CalibrationRecord>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            run: Run::with_index(0),
            coord: Coordinate::Unknown,
            mode: Mode::Unknown,
            calibration_log: Vec::new(),
        }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coord
    }

    pub fn set_coordinate(&mut self, coord: Coordinate) {
        self.coord = coord;
    }

    pub fn clear_coordinate(&mut self) {
        self.coord = Coordinate::Unknown;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            log::info!("measurement mode: {}", mode.label());
        }
        self.mode = mode;
    }

    /// Calibration points in arrival order. Append-only across runs; the
    /// per-run view lives in the export sheet's column blocks.
    pub fn calibration_log(&self) -> &[CalibrationRecord] {
        &self.calibration_log
    }

    /// Announce run 0 to the export sink. Called once at startup; the device
    /// has not opened a run of its own yet, but the sheet needs its first
    /// column block.
    pub fn open_initial_run(&mut self, export: &mut dyn ExportSink) {
        self.announce_run(export);
    }

    /// Start the next run: bump the index, claim a fresh column block, drop
    /// run-scoped state. Triggered by a calibration banner or device reset.
    pub fn start_run(&mut self, export: &mut dyn ExportSink) {
        self.run = Run::with_index(self.run.index + 1);
        self.coord = Coordinate::Unknown;
        self.announce_run(export);
    }

    fn announce_run(&mut self, export: &mut dyn ExportSink) {
        log::info!(
            "run {} opened at column {}",
            self.run.index,
            self.run.start_col
        );
        if let Err(e) = export.new_run(&self.run, CALIBRATION_HEADERS) {
            log::error!("export sink rejected run {}: {e}", self.run.index);
        }
    }

    /// Append one row inside the current run's column block.
    pub fn append_row(&mut self, export: &mut dyn ExportSink, values: &[CellValue]) {
        match export.append_row(&self.run, values) {
            Ok(()) => self.run.cursor += 1,
            Err(e) => log::error!("export sink dropped a row: {e}"),
        }
    }

    /// Append a single-cell status row (the device's banners are echoed into
    /// the sheet so a run reads as a narrative).
    pub fn append_banner(&mut self, export: &mut dyn ExportSink, text: &str) {
        self.append_row(export, &[CellValue::from(text)]);
    }

    pub fn append_measurement_headers(&mut self, export: &mut dyn ExportSink) {
        let headers: Vec<CellValue> = MEASUREMENT_HEADERS
            .iter()
            .map(|h| CellValue::from(*h))
            .collect();
        self.append_row(export, &headers);
    }

    /// Rewrite the run's title cell once the calibration impedance is known.
    pub fn note_calibration_impedance(&mut self, export: &mut dyn ExportSink, value: &str) {
        let cell = CellValue::from(format!("Set Calibration Impedance: {value} ohm"));
        if let Err(e) = export.set_cell(&self.run, 1, self.run.start_col, cell) {
            log::error!("export sink dropped the impedance cell: {e}");
        }
    }

    /// Append a full measurement row. Overflowed fields export as `ovf` text
    /// cells so saturation stays distinguishable from a measured zero.
    pub fn append_measurement(&mut self, export: &mut dyn ExportSink, record: &MeasurementRecord) {
        let row = measurement_row(record);
        self.append_row(export, &row);
    }

    /// Log and export one calibration point. The log is append-only.
    pub fn append_calibration(&mut self, export: &mut dyn ExportSink, record: CalibrationRecord) {
        let row = [
            CellValue::from(format!("Cal Point {}", record.point)),
            CellValue::from(format!("R={} / I={}", record.real, record.imag)),
            CellValue::Float(record.magnitude),
            CellValue::from(format!("{} degrees", record.system_phase_deg)),
        ];
        self.append_row(export, &row);
        self.calibration_log.push(record);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Export cells for one measurement record, in header order.
pub fn measurement_row(record: &MeasurementRecord) -> Vec<CellValue> {
    let reading_cell = |r: crate::measurement::Reading| {
        if r.overflow {
            CellValue::from("ovf")
        } else {
            CellValue::Float(r.value)
        }
    };

    vec![
        CellValue::Int(record.frequency_hz as i64),
        CellValue::from(record.raw_pair_label()),
        reading_cell(record.magnitude),
        CellValue::Float(record.phase_deg),
        reading_cell(record.resistance),
        reading_cell(record.reactance),
        CellValue::from(record.coord.x_label()),
        CellValue::from(record.coord.y_label()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{RawValue, Reading};
    use crate::sinks::SinkError;

    #[derive(Default)]
    struct RecordingExport {
        runs: Vec<(u32, u32)>,
        rows: Vec<(u32, Vec<CellValue>)>,
        cells: Vec<(u32, u32, u32, CellValue)>,
    }

    impl ExportSink for RecordingExport {
        fn new_run(&mut self, run: &Run, _headers: &[&str]) -> Result<(), SinkError> {
            self.runs.push((run.index, run.start_col));
            Ok(())
        }

        fn append_row(&mut self, run: &Run, values: &[CellValue]) -> Result<(), SinkError> {
            self.rows.push((run.index, values.to_vec()));
            Ok(())
        }

        fn set_cell(
            &mut self,
            run: &Run,
            row: u32,
            col: u32,
            value: CellValue,
        ) -> Result<(), SinkError> {
            self.cells.push((run.index, row, col, value));
            Ok(())
        }
    }

    fn sample_record() -> MeasurementRecord {
        MeasurementRecord {
            frequency_hz: 50_000,
            real: RawValue::measured(5440),
            imag: RawValue::measured(-8309),
            magnitude: Reading::measured(200_000.0),
            phase_deg: 0.0,
            resistance: Reading::overflowed(),
            reactance: Reading::measured(0.0),
            coord: Coordinate::Unknown,
        }
    }

    #[test]
    fn run_offsets_never_overlap() {
        let mut export = RecordingExport::default();
        let mut session = SessionState::new();
        session.open_initial_run(&mut export);
        session.start_run(&mut export);
        session.start_run(&mut export);

        assert_eq!(export.runs, vec![(0, 1), (1, 9), (2, 17)]);
    }

    #[test]
    fn new_run_clears_coordinate_but_keeps_the_log() {
        let mut export = RecordingExport::default();
        let mut session = SessionState::new();
        session.set_coordinate(Coordinate::At { x: 3, y: 4 });
        session.append_calibration(
            &mut export,
            CalibrationRecord {
                point: 0,
                real: 1,
                imag: 2,
                magnitude: 3.0,
                system_phase_deg: 4.0,
            },
        );

        session.start_run(&mut export);
        assert_eq!(session.coordinate(), Coordinate::Unknown);
        assert_eq!(session.calibration_log().len(), 1);
    }

    #[test]
    fn cursor_advances_per_row() {
        let mut export = RecordingExport::default();
        let mut session = SessionState::new();
        let start = session.run().cursor;

        session.append_banner(&mut export, "Checking impedance of COB.");
        session.append_measurement_headers(&mut export);
        assert_eq!(session.run().cursor, start + 2);
    }

    #[test]
    fn overflow_exports_as_text_cell() {
        let row = measurement_row(&sample_record());
        assert_eq!(row[0], CellValue::Int(50_000));
        assert_eq!(row[4], CellValue::from("ovf"));
        assert_eq!(row[5], CellValue::Float(0.0));
        assert_eq!(row[6], CellValue::from("N/A"));
    }

    #[test]
    fn impedance_note_targets_title_cell() {
        let mut export = RecordingExport::default();
        let mut session = SessionState::new();
        session.note_calibration_impedance(&mut export, "200000");

        assert_eq!(export.cells.len(), 1);
        let (run, row, col, ref value) = export.cells[0];
        assert_eq!((run, row, col), (0, 1, 1));
        assert_eq!(
            value,
            &CellValue::from("Set Calibration Impedance: 200000 ohm")
        );
    }
}

//! End-to-end sessions over an in-memory transport.
//!
//! A scripted device feeds both worker threads exactly the way the firmware
//! does: lines stream until a solicitation, then the device blocks until the
//! host writes a response (a prompt answer or a sweep acknowledgement).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bioimp_rs::{
    Aggregation, AnalyzerHost, CellValue, Coordinate, ExportSink, LineSink, LineSource, LinkError,
    MeasurementRecord, Mode, PlotSink, PromptSink, Run, SinkError,
};

enum Step {
    /// A line the device sends.
    Line(String),
    /// The device blocks until the host writes something back.
    AwaitResponse,
}

struct DeviceState {
    steps: VecDeque<Step>,
    written: Vec<String>,
}

/// One scripted device; reader and both writer handles share its state, the
/// way the split halves of a serial port share the wire.
#[derive(Clone)]
struct ScriptedDevice(Arc<Mutex<DeviceState>>);

impl ScriptedDevice {
    fn new(steps: Vec<Step>) -> Self {
        Self(Arc::new(Mutex::new(DeviceState {
            steps: steps.into_iter().collect(),
            written: Vec::new(),
        })))
    }

    fn written(&self) -> Vec<String> {
        self.0.lock().unwrap().written.clone()
    }
}

impl LineSource for ScriptedDevice {
    fn read_line(&mut self) -> Result<Option<String>, LinkError> {
        let mut device = self.0.lock().unwrap();
        match device.steps.front() {
            Some(Step::Line(_)) => {
                let Some(Step::Line(line)) = device.steps.pop_front() else {
                    unreachable!()
                };
                Ok(Some(line))
            }
            Some(Step::AwaitResponse) => {
                drop(device);
                std::thread::sleep(Duration::from_millis(1));
                Ok(None)
            }
            None => Err(LinkError::Disconnected),
        }
    }
}

impl LineSink for ScriptedDevice {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        let mut device = self.0.lock().unwrap();
        device.written.push(line.to_string());
        if matches!(device.steps.front(), Some(Step::AwaitResponse)) {
            device.steps.pop_front();
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedPrompt(Arc<Mutex<PromptState>>);

#[derive(Default)]
struct PromptState {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl SharedPrompt {
    fn with_answers(answers: &[&str]) -> Self {
        let prompt = Self::default();
        prompt.0.lock().unwrap().answers = answers.iter().map(|a| (*a).to_string()).collect();
        prompt
    }

    fn asked(&self) -> Vec<String> {
        self.0.lock().unwrap().asked.clone()
    }
}

impl PromptSink for SharedPrompt {
    fn solicit(&mut self, solicitation: &str) -> Result<String, SinkError> {
        let mut state = self.0.lock().unwrap();
        state.asked.push(solicitation.to_string());
        state
            .answers
            .pop_front()
            .ok_or_else(|| SinkError::new("prompt script exhausted"))
    }
}

#[derive(Clone, Default)]
struct SharedPlot(Arc<Mutex<Vec<(Vec<MeasurementRecord>, Mode, Aggregation)>>>);

impl SharedPlot {
    fn calls(&self) -> Vec<(Vec<MeasurementRecord>, Mode, Aggregation)> {
        self.0.lock().unwrap().clone()
    }
}

impl PlotSink for SharedPlot {
    fn plot(
        &mut self,
        records: &[MeasurementRecord],
        mode: Mode,
        aggregation: Aggregation,
    ) -> Result<(), SinkError> {
        self.0
            .lock()
            .unwrap()
            .push((records.to_vec(), mode, aggregation));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedExport(Arc<Mutex<ExportState>>);

#[derive(Default)]
struct ExportState {
    runs: Vec<(u32, u32)>,
    rows: Vec<(u32, Vec<String>)>,
}

impl SharedExport {
    fn runs(&self) -> Vec<(u32, u32)> {
        self.0.lock().unwrap().runs.clone()
    }

    fn rows_for_run(&self, index: u32) -> Vec<Vec<String>> {
        self.0
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|(run, _)| *run == index)
            .map(|(_, values)| values.clone())
            .collect()
    }
}

impl ExportSink for SharedExport {
    fn new_run(&mut self, run: &Run, _headers: &[&str]) -> Result<(), SinkError> {
        self.0.lock().unwrap().runs.push((run.index, run.start_col));
        Ok(())
    }

    fn append_row(&mut self, run: &Run, values: &[CellValue]) -> Result<(), SinkError> {
        self.0
            .lock()
            .unwrap()
            .rows
            .push((run.index, values.iter().map(CellValue::to_string).collect()));
        Ok(())
    }

    fn set_cell(
        &mut self,
        _run: &Run,
        _row: u32,
        _col: u32,
        _value: CellValue,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}

fn line(text: &str) -> Step {
    Step::Line(text.to_string())
}

fn measurement(freq_khz: u32) -> Step {
    line(&format!(
        "{freq_khz}.00kHz: R=100/I=-200 |Z|=150.00 Phase=0.50 degrees Resistance=150.00 Reactance=1.00"
    ))
}

fn run_session(
    steps: Vec<Step>,
    answers: &[&str],
) -> (ScriptedDevice, SharedPrompt, SharedPlot, SharedExport) {
    let device = ScriptedDevice::new(steps);
    let prompt = SharedPrompt::with_answers(answers);
    let plot = SharedPlot::default();
    let export = SharedExport::default();

    let host = AnalyzerHost::spawn(
        device.clone(),
        device.clone(),
        device.clone(),
        export.clone(),
        prompt.clone(),
        plot.clone(),
    )
    .expect("spawn worker threads");
    host.wait();

    (device, prompt, plot, export)
}

#[test]
fn range_sweep_session_with_device_retry() {
    let mut steps = vec![
        line("Starting Calibration."),
        line("Cal Point 0: R=123 / I=-456 |Z|=1999.50 System Phase=-1.25 degrees"),
        line("Set AD5933 Mode (0-5):"),
        Step::AwaitResponse,
        line("Starting COB Range Sweep (7-bit input)."),
        line("Enter the number of measurements (1-100):"),
        Step::AwaitResponse,
        line("[INFO] Group 3 selected"),
        // First point: a clean 11-point sweep.
        line("Current_Coord->X=2,Y=5"),
        line("SWEEP_START"),
    ];
    steps.extend((0..11).map(|i| measurement(10 + i)));
    steps.push(line("SWEEP_DONE"));
    steps.push(Step::AwaitResponse); // STORE_OK

    // Second point: a dropped line forces the silent-reject path, then the
    // device re-transmits the full sweep.
    steps.push(line("Current_Coord->X=2,Y=6"));
    steps.push(line("SWEEP_START"));
    steps.extend((0..10).map(|i| measurement(10 + i)));
    steps.push(line("SWEEP_DONE"));
    steps.push(line("SWEEP_START"));
    steps.extend((0..11).map(|i| measurement(10 + i)));
    steps.push(line("SWEEP_DONE"));
    steps.push(Step::AwaitResponse); // STORE_OK

    steps.push(line("[INFO] COB range sweep complete"));

    let (device, prompt, plot, export) = run_session(steps, &["4", "10", "avg"]);

    // Mode answer, count answer, and exactly two acknowledgements, none for
    // the short sweep.
    assert_eq!(device.written(), vec!["4", "10", "STORE_OK", "STORE_OK"]);

    // The aggregation choice was solicited after the completion banner.
    let asked = prompt.asked();
    assert_eq!(asked.len(), 3);
    assert!(asked[2].contains("avg/ind"));

    // One plot of 22 committed points under the averaged view; the rejected
    // sweep contributed nothing.
    let calls = plot.calls();
    assert_eq!(calls.len(), 1);
    let (records, mode, aggregation) = &calls[0];
    assert_eq!(records.len(), 22);
    assert_eq!(*mode, Mode::CobRange);
    assert_eq!(*aggregation, Aggregation::Averaged);
    assert!(records[..11]
        .iter()
        .all(|r| r.coord == Coordinate::At { x: 2, y: 5 }));
    assert!(records[11..]
        .iter()
        .all(|r| r.coord == Coordinate::At { x: 2, y: 6 }));

    // Run 0 opened at column 1, the calibration banner opened run 1 at 9.
    assert_eq!(export.runs(), vec![(0, 1), (1, 9)]);

    // Exactly the 22 accepted measurement rows landed in run 1's block.
    let measurement_rows: Vec<_> = export
        .rows_for_run(1)
        .into_iter()
        .filter(|row| row.len() == 8 && row[0].chars().all(|c| c.is_ascii_digit()))
        .collect();
    assert_eq!(measurement_rows.len(), 22);
}

#[test]
fn single_sweep_session_and_reset_recovery() {
    let steps = vec![
        line("Checking impedance of COB."),
        line("[INFO] Set X-axis Address: 3, Y-axis Address: 4"),
        measurement(50),
        measurement(60),
        line("Frequency sweep complete!"),
        // Mid-session reset: a fresh run, and the coordinate must not leak.
        line("ESP-ROM:esp32s3-20210327"),
        measurement(70),
    ];

    let (device, _prompt, plot, export) = run_session(steps, &[]);

    assert!(device.written().is_empty());

    let calls = plot.calls();
    assert_eq!(calls.len(), 2);

    // The completed sweep carries the synchronously-set coordinate.
    let (records, mode, aggregation) = &calls[0];
    assert_eq!(*mode, Mode::Cob);
    assert_eq!(*aggregation, Aggregation::Raw);
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.coord == Coordinate::At { x: 3, y: 4 }));

    // The record after the reset was flushed on disconnect and carries the
    // explicit unknown sentinel, not the previous run's coordinate.
    let (records, _, _) = &calls[1];
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].coord, Coordinate::Unknown);

    // The reset opened run 1; its block holds the post-reset measurement.
    assert_eq!(export.runs(), vec![(0, 1), (1, 9)]);
    assert_eq!(
        export
            .rows_for_run(1)
            .iter()
            .filter(|row| row.len() == 8)
            .count(),
        1
    );
}

#[test]
fn overflow_readings_survive_to_the_export_rows() {
    let steps = vec![
        line("Checking impedance at Rcal position."),
        line("50.00kHz: R=100/I=-200 |Z|=ovf Phase=0.50 degrees Resistance=150.00 Reactance=ovf"),
        line("Frequency sweep complete!"),
    ];

    let (_device, _prompt, plot, export) = run_session(steps, &[]);

    let rows = export.rows_for_run(0);
    let row = rows
        .iter()
        .find(|row| row.len() == 8 && row[0] == "50000")
        .expect("measurement row");
    assert_eq!(row[2], "ovf");
    assert_eq!(row[5], "ovf");
    assert_eq!(row[4], "150.00");

    let calls = plot.calls();
    let (records, mode, _) = &calls[0];
    assert_eq!(*mode, Mode::Rcal);
    assert!(records[0].magnitude.overflow);
    assert!(records[0].reactance.overflow);
    assert!(!records[0].resistance.overflow);
}

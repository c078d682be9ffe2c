// Live monitoring session against a connected analyzer.
//
// Opens the serial port, answers the firmware's prompts from stdin, exports
// every run into a CSV grid, and prints finished sweeps as polars tables.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;

use bioimp_rs::frame;
use bioimp_rs::{
    Aggregation, AnalyzerHost, CellValue, ExportSink, MeasurementRecord, Mode, PlotSink, Run,
    SerialLink, SinkError, StdioPrompt,
};

#[derive(Parser)]
#[command(about = "Stream measurements from an impedance analyzer")]
struct Args {
    /// Serial port the analyzer is connected to, e.g. /dev/ttyUSB0
    port: String,

    /// Baud rate
    #[arg(long, default_value_t = SerialLink::DEFAULT_BAUD)]
    baud: u32,

    /// CSV file the measurement grid is written to
    #[arg(long, default_value = "measurement_data.csv")]
    out: PathBuf,
}

/// Sparse cell grid rewritten to a CSV file after every change, so the sheet
/// survives a yanked cable.
struct CsvGridExport {
    path: PathBuf,
    cells: BTreeMap<(u32, u32), String>,
}

impl CsvGridExport {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            cells: BTreeMap::new(),
        }
    }

    fn save(&self) -> Result<(), SinkError> {
        let max_row = self.cells.keys().map(|(r, _)| *r).max().unwrap_or(0);
        let max_col = self.cells.keys().map(|(_, c)| *c).max().unwrap_or(0);

        let mut out = String::new();
        for row in 1..=max_row {
            let line: Vec<&str> = (1..=max_col)
                .map(|col| self.cells.get(&(row, col)).map_or("", String::as_str))
                .collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        std::fs::write(&self.path, out).map_err(|e| SinkError::new(e.to_string()))
    }
}

impl ExportSink for CsvGridExport {
    fn new_run(&mut self, run: &Run, headers: &[&str]) -> Result<(), SinkError> {
        self.cells
            .insert((1, run.start_col), "Set Calibration Impedance:".to_string());
        for (i, header) in headers.iter().enumerate() {
            self.cells
                .insert((2, run.start_col + i as u32), (*header).to_string());
        }
        self.save()
    }

    fn append_row(&mut self, run: &Run, values: &[CellValue]) -> Result<(), SinkError> {
        for (i, value) in values.iter().enumerate() {
            self.cells
                .insert((run.cursor, run.start_col + i as u32), value.to_string());
        }
        self.save()
    }

    fn set_cell(
        &mut self,
        _run: &Run,
        row: u32,
        col: u32,
        value: CellValue,
    ) -> Result<(), SinkError> {
        self.cells.insert((row, col), value.to_string());
        self.save()
    }
}

/// Prints finished sweeps as tables instead of opening a plot window.
struct TerminalPlot;

impl PlotSink for TerminalPlot {
    fn plot(
        &mut self,
        records: &[MeasurementRecord],
        mode: Mode,
        aggregation: Aggregation,
    ) -> Result<(), SinkError> {
        if records.is_empty() {
            println!("No data to plot.");
            return Ok(());
        }

        let df = match aggregation {
            Aggregation::Raw => frame::to_dataframe(records),
            Aggregation::Averaged => frame::averaged_view(records),
        }
        .map_err(|e| SinkError::new(e.to_string()))?;

        println!("\n{} results ({} points):\n{df}", mode.label(), records.len());
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let host = AnalyzerHost::open(
        &args.port,
        args.baud,
        CsvGridExport::new(args.out.clone()),
        StdioPrompt,
        TerminalPlot,
    )?;
    println!("Connected to {} at {} baud", args.port, args.baud);
    println!("Exporting to {}", args.out.display());

    // First Ctrl-C flushes buffered records through the normal shutdown path.
    let shutdown = host.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    })?;

    host.wait();
    println!("Session closed.");
    Ok(())
}

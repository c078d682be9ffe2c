//! Line classifier for the instrument's text protocol.
//!
//! Every decoded, trimmed line maps to exactly one [`LineEvent`]. Matching is
//! totally ordered: run-lifecycle markers first, then interactive prompts,
//! sweep boundary tokens, labeled status lines, calibration records,
//! measurement records, and finally the unrecognized fallback. A line that
//! hits a category's trigger but fails its detailed grammar is logged and
//! routed as unrecognized; ingestion continues.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::measurement::{CalibrationRecord, Coordinate, MeasurementRecord, RawValue, Reading};

/// Full-line token opening a counted range sweep.
pub const SWEEP_START: &str = "SWEEP_START";
/// Full-line token closing a counted range sweep.
pub const SWEEP_DONE: &str = "SWEEP_DONE";
/// Acknowledgement written back when a sweep's point count matches.
pub const STORE_OK: &str = "STORE_OK";
/// Boot-banner substring emitted after a device reset.
pub const RESET_MARKER: &str = "ESP-ROM";
/// Banner announcing the start of a gain-factor calibration.
pub const CALIBRATION_MARKER: &str = "Starting Calibration.";
/// Prompt substring whose answer selects the measurement mode.
pub const MODE_PROMPT: &str = "Set AD5933 Mode";
/// Prompt substring whose answer determines the expected sweep point count.
pub const COUNT_PROMPT: &str = "Enter the number of measurements";

/// Solicitations the firmware blocks on. Prefix-matched against the trimmed
/// line; must stay in sync with the firmware's prompt strings.
const PROMPT_PREFIXES: &[&str] = &[
    "Enter the start frequency",
    "Enter the frequency increment",
    "Enter the number of measurements",
    "Enter Settling Time Cycles",
    "Select Output Excitation Range",
    "Select PGA Gain",
    "Enter Calibration Impedance",
    "Select MUX group",
    "X Axis Address",
    "Y Axis Address",
    "Set AD5933 Mode",
    "Bit",
    "Is this range correct? (Y/N)",
    "Enter X-axis increment unit",
    "Enter Y-axis increment unit",
];

static MEASUREMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d+\.\d+)kHz:\s+R=(-?\d+|ovf)/I=(-?\d+|ovf)\s+\|Z\|=([-+]?\d+\.\d+|ovf)\s+Phase=([-+]?\d+\.\d+)\s+degrees\s+Resistance=([-+]?\d+\.\d+|ovf)\s+Reactance=([-+]?\d+\.\d+|ovf)",
    )
    .expect("measurement grammar")
});

static MEASUREMENT_TRIGGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+kHz:").expect("measurement trigger"));

static CALIBRATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^Cal Point (\d+):\s+R=(-?\d+) / I=(-?\d+)\s+\|Z\|=([\d.]+)\s+System Phase=([-+]?[\d.]+) degrees",
    )
    .expect("calibration grammar")
});

static COORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Current_Coord->X=(\d+),Y=(\d+)").expect("coordinate grammar"));

static GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Group\s+(\d+)\s+selected").expect("group grammar"));

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Set X-axis Address:\s*(\d+)\s*,\s*Y-axis Address:\s*(\d+)")
        .expect("address grammar")
});

/// Labeled status line recognized by category (4) of the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// `[INFO] Set Calibration Impedance: <value> ohm`
    CalibrationImpedance(String),
    /// `[INFO] Set X-axis Address: <x>, Y-axis Address: <y>`, the
    /// synchronous coordinate path used by single-point modes.
    AddressSet { x: u32, y: u32 },
    /// `[INFO] Group <n> selected`
    GroupSelected(u32),
    /// Banner announcing a single-point check at the Rcal position.
    CheckingRcal,
    /// Banner announcing a single-point check of the chip-on-board.
    CheckingCob,
    /// Banner announcing a range sweep.
    RangeSweepStarting,
    /// Banner announcing a range step sweep.
    RangeStepSweepStarting,
    /// `Current_Coord->X=<x>,Y=<y>`, the asynchronous coordinate path used
    /// by range modes.
    CoordinateUpdate { x: u32, y: u32 },
    /// `Frequency sweep complete!`
    SingleSweepComplete,
    /// Range / range-step completion banners.
    RangeSweepComplete,
}

/// One classified protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// Calibration-start banner; opens a new run.
    CalibrationStarting,
    /// Device reset marker; opens a new run.
    DeviceReset,
    /// Interactive solicitation to forward to the prompt queue.
    Prompt(String),
    SweepStart,
    SweepDone,
    Status(StatusEvent),
    Calibration(CalibrationRecord),
    /// Parsed measurement line. The coordinate is stamped by the ingestion
    /// loop at append time; the classifier always emits `Unknown`.
    Measurement(MeasurementRecord),
    Unrecognized,
}

fn is_prompt_line(line: &str) -> bool {
    PROMPT_PREFIXES.iter().any(|p| line.starts_with(p))
}

fn parse_raw_component(token: &str) -> RawValue {
    if token == "ovf" {
        RawValue::overflowed()
    } else {
        // Guarded by the grammar; anything else would not have matched.
        token.parse().map_or_else(|_| RawValue::overflowed(), RawValue::measured)
    }
}

fn parse_reading(token: &str) -> Reading {
    if token == "ovf" {
        Reading::overflowed()
    } else {
        token.parse().map_or_else(|_| Reading::overflowed(), Reading::measured)
    }
}

/// Parse a measurement-record line.
///
/// Returns `None` when the grammar does not match. Frequency arrives in kHz
/// and is converted to integer Hz by multiplying by 1000 and truncating.
pub fn parse_measurement_line(line: &str) -> Option<MeasurementRecord> {
    let caps = MEASUREMENT_RE.captures(line)?;

    let freq_khz: f64 = caps[1].parse().ok()?;
    let phase_deg: f64 = caps[5].parse().ok()?;

    Some(MeasurementRecord {
        frequency_hz: (freq_khz * 1000.0) as u64,
        real: parse_raw_component(&caps[2]),
        imag: parse_raw_component(&caps[3]),
        magnitude: parse_reading(&caps[4]),
        phase_deg,
        resistance: parse_reading(&caps[6]),
        reactance: parse_reading(&caps[7]),
        coord: Coordinate::Unknown,
    })
}

/// Parse a calibration-record line (`Cal Point <n>: ...`).
pub fn parse_calibration_line(line: &str) -> Option<CalibrationRecord> {
    let caps = CALIBRATION_RE.captures(line)?;

    Some(CalibrationRecord {
        point: caps[1].parse().ok()?,
        real: caps[2].parse().ok()?,
        imag: caps[3].parse().ok()?,
        magnitude: caps[4].parse().ok()?,
        system_phase_deg: caps[5].parse().ok()?,
    })
}

fn classify_status(line: &str) -> Option<StatusEvent> {
    if line.contains("[INFO] Set Calibration Impedance") {
        let value = line
            .split(':')
            .nth(1)
            .map(|v| v.trim().split(' ').next().unwrap_or("").to_string())
            .unwrap_or_default();
        return Some(StatusEvent::CalibrationImpedance(value));
    }

    if line.contains("Set X-axis Address") && line.contains("Y-axis Address") {
        let parsed = ADDRESS_RE
            .captures(line)
            .and_then(|caps| Some((caps[1].parse().ok()?, caps[2].parse().ok()?)));
        return match parsed {
            Some((x, y)) => Some(StatusEvent::AddressSet { x, y }),
            None => {
                log::warn!("malformed address line: {line:?}");
                None
            }
        };
    }

    if line.contains("Checking impedance at Rcal position.") {
        return Some(StatusEvent::CheckingRcal);
    }
    if line.contains("Checking impedance of COB.") {
        return Some(StatusEvent::CheckingCob);
    }
    if line.contains("Starting COB Range Step Sweep") {
        return Some(StatusEvent::RangeStepSweepStarting);
    }
    if line.contains("Starting COB Range Sweep") {
        return Some(StatusEvent::RangeSweepStarting);
    }

    if line.contains("[INFO] Group") && line.contains("selected") {
        let parsed = GROUP_RE.captures(line).and_then(|caps| caps[1].parse().ok());
        return match parsed {
            Some(group) => Some(StatusEvent::GroupSelected(group)),
            None => {
                log::warn!("malformed group line: {line:?}");
                None
            }
        };
    }

    if line.contains("Current_Coord->") {
        let parsed = COORD_RE
            .captures(line)
            .and_then(|caps| Some((caps[1].parse().ok()?, caps[2].parse().ok()?)));
        return match parsed {
            Some((x, y)) => Some(StatusEvent::CoordinateUpdate { x, y }),
            None => {
                log::warn!("malformed coordinate line: {line:?}");
                None
            }
        };
    }

    if line.contains("Frequency sweep complete!") {
        return Some(StatusEvent::SingleSweepComplete);
    }
    if line.contains("[INFO] COB range sweep complete")
        || line.contains("[INFO] COB range step sweep complete")
    {
        return Some(StatusEvent::RangeSweepComplete);
    }

    None
}

/// Classify one trimmed protocol line into exactly one event.
pub fn classify(line: &str) -> LineEvent {
    // (1) run lifecycle
    if line.contains(CALIBRATION_MARKER) {
        return LineEvent::CalibrationStarting;
    }
    if line.contains(RESET_MARKER) {
        return LineEvent::DeviceReset;
    }

    // (2) interactive prompts win over everything data-shaped below
    if is_prompt_line(line) {
        return LineEvent::Prompt(line.to_string());
    }

    // (3) sweep boundary tokens, exact full-line matches
    if line == SWEEP_START {
        return LineEvent::SweepStart;
    }
    if line == SWEEP_DONE {
        return LineEvent::SweepDone;
    }

    // (4) labeled status lines
    if let Some(status) = classify_status(line) {
        return LineEvent::Status(status);
    }

    // (5) calibration records
    if line.starts_with("Cal Point") {
        return match parse_calibration_line(line) {
            Some(record) => LineEvent::Calibration(record),
            None => {
                log::warn!("malformed calibration line: {line:?}");
                LineEvent::Unrecognized
            }
        };
    }

    // (6) measurement records
    if MEASUREMENT_TRIGGER_RE.is_match(line) {
        return match parse_measurement_line(line) {
            Some(record) => LineEvent::Measurement(record),
            None => {
                log::warn!("malformed measurement line: {line:?}");
                LineEvent::Unrecognized
            }
        };
    }

    // (7) fallback
    LineEvent::Unrecognized
}

//! Record types produced by the protocol classifier.

use std::fmt;

/// Numeric stand-in stored for a field the instrument reported as overflowed.
///
/// The value alone is ambiguous (a real measurement can be 0.0), which is why
/// every overflowable field carries its `overflow` flag alongside.
pub const OVERFLOW_PLACEHOLDER: f64 = 0.0;

/// The (X, Y) instrument address a measurement belongs to.
///
/// `Unknown` is an explicit sentinel, distinct from any numeric pair: records
/// received before the device announced a coordinate are stamped `Unknown`,
/// never with a stale coordinate from an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coordinate {
    #[default]
    Unknown,
    At {
        x: u32,
        y: u32,
    },
}

impl Coordinate {
    pub fn is_known(&self) -> bool {
        matches!(self, Coordinate::At { .. })
    }

    /// Cell text for the X column, `N/A` when unknown.
    pub fn x_label(&self) -> String {
        match self {
            Coordinate::Unknown => "N/A".to_string(),
            Coordinate::At { x, .. } => x.to_string(),
        }
    }

    /// Cell text for the Y column, `N/A` when unknown.
    pub fn y_label(&self) -> String {
        match self {
            Coordinate::Unknown => "N/A".to_string(),
            Coordinate::At { y, .. } => y.to_string(),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinate::Unknown => write!(f, "X=N/A,Y=N/A"),
            Coordinate::At { x, y } => write!(f, "X={x},Y={y}"),
        }
    }
}

/// A floating-point field that may have been reported as `ovf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub overflow: bool,
}

impl Reading {
    pub fn measured(value: f64) -> Self {
        Self {
            value,
            overflow: false,
        }
    }

    pub fn overflowed() -> Self {
        Self {
            value: OVERFLOW_PLACEHOLDER,
            overflow: true,
        }
    }

    /// The value if actually measured, `None` when the instrument saturated.
    pub fn measured_value(&self) -> Option<f64> {
        (!self.overflow).then_some(self.value)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.overflow {
            write!(f, "ovf")
        } else {
            write!(f, "{:.2}", self.value)
        }
    }
}

/// A raw DFT component (signed integer) that may have been reported as `ovf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawValue {
    pub value: i32,
    pub overflow: bool,
}

impl RawValue {
    pub fn measured(value: i32) -> Self {
        Self {
            value,
            overflow: false,
        }
    }

    pub fn overflowed() -> Self {
        Self {
            value: 0,
            overflow: true,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.overflow {
            write!(f, "ovf")
        } else {
            write!(f, "{}", self.value)
        }
    }
}

/// One frequency-domain sample from a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    /// Frequency in Hz (the wire carries kHz; converted by ×1000, truncated).
    pub frequency_hz: u64,
    /// Raw in-phase DFT component.
    pub real: RawValue,
    /// Raw quadrature DFT component.
    pub imag: RawValue,
    /// Impedance magnitude |Z| in ohm.
    pub magnitude: Reading,
    /// Phase in signed degrees. The instrument never overflows this field.
    pub phase_deg: f64,
    pub resistance: Reading,
    pub reactance: Reading,
    /// Coordinate in effect when the record was appended.
    pub coord: Coordinate,
}

impl MeasurementRecord {
    /// Combined `R=<r> / I=<i>` cell text as it appears in the export sheet.
    pub fn raw_pair_label(&self) -> String {
        format!("R={} / I={}", self.real, self.imag)
    }
}

/// One calibration point from the gain-factor sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    pub point: u32,
    pub real: i32,
    pub imag: i32,
    pub magnitude: f64,
    pub system_phase_deg: f64,
}

/// Active measurement mode, selected by the numeric answer to the AD5933 mode
/// prompt or announced by the device's own status banners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Single-point sweep at the chip-on-board position.
    Cob,
    /// Single-point sweep at the calibration resistor position.
    Rcal,
    /// Single-point sweep across the array diagonal.
    CobDiagonal,
    /// Multi-point range sweep over the electrode array.
    CobRange,
    /// Range sweep with explicit X/Y step increments.
    CobRangeStep,
    /// Gain-factor calibration pass.
    Calibration,
    #[default]
    Unknown,
}

impl Mode {
    /// Map a mode-menu answer to a mode. Unrecognized answers map to
    /// `Unknown`, whose records are discarded rather than buffered.
    pub fn from_menu_answer(answer: &str) -> Self {
        match answer.trim() {
            "0" => Mode::Calibration,
            "1" => Mode::Cob,
            "2" => Mode::Rcal,
            "3" => Mode::CobDiagonal,
            "4" => Mode::CobRange,
            "5" => Mode::CobRangeStep,
            _ => Mode::Unknown,
        }
    }

    pub fn is_single_point(&self) -> bool {
        matches!(self, Mode::Cob | Mode::Rcal | Mode::CobDiagonal)
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Mode::CobRange | Mode::CobRangeStep)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Cob => "COB",
            Mode::Rcal => "Rcal",
            Mode::CobDiagonal => "COB diagonal",
            Mode::CobRange => "COB range sweep",
            Mode::CobRangeStep => "COB range step sweep",
            Mode::Calibration => "calibration",
            Mode::Unknown => "unknown",
        }
    }
}

/// How a record set should be presented by the plot sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Every record individually, grouped by coordinate.
    Raw,
    /// Mean per frequency across coordinates.
    Averaged,
}

impl Aggregation {
    /// Parse the interactive `avg`/`ind` choice.
    pub fn from_answer(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "avg" => Some(Aggregation::Averaged),
            "ind" => Some(Aggregation::Raw),
            _ => None,
        }
    }
}

//! DataFrame views over record sets for plotting consumers.
//!
//! The pipeline buffers [`MeasurementRecord`]s; plot sinks usually want a
//! columnar view instead. Overflowed readings become nulls with a companion
//! `*_ovf` flag column, so aggregate means are computed over measured values
//! only, so saturation never biases an average toward zero.

use polars::prelude::*;

use crate::measurement::MeasurementRecord;

/// Columnar view of a record set.
///
/// Columns: `freq_hz`, `r`, `i`, `magnitude`, `phase_deg`, `resistance`,
/// `reactance` (overflowed values null, flags in `r_ovf`, `i_ovf`,
/// `magnitude_ovf`, `resistance_ovf`, `reactance_ovf`) and `coord` (the
/// `X=..,Y=..` grouping key, `X=N/A,Y=N/A` for the unknown sentinel).
pub fn to_dataframe(records: &[MeasurementRecord]) -> PolarsResult<DataFrame> {
    let freq: Vec<i64> = records.iter().map(|r| r.frequency_hz as i64).collect();
    let real: Vec<Option<i32>> = records
        .iter()
        .map(|r| (!r.real.overflow).then_some(r.real.value))
        .collect();
    let imag: Vec<Option<i32>> = records
        .iter()
        .map(|r| (!r.imag.overflow).then_some(r.imag.value))
        .collect();
    let magnitude: Vec<Option<f64>> = records
        .iter()
        .map(|r| r.magnitude.measured_value())
        .collect();
    let phase: Vec<f64> = records.iter().map(|r| r.phase_deg).collect();
    let resistance: Vec<Option<f64>> = records
        .iter()
        .map(|r| r.resistance.measured_value())
        .collect();
    let reactance: Vec<Option<f64>> = records
        .iter()
        .map(|r| r.reactance.measured_value())
        .collect();
    let coord: Vec<String> = records.iter().map(|r| r.coord.to_string()).collect();

    let real_ovf: Vec<bool> = records.iter().map(|r| r.real.overflow).collect();
    let imag_ovf: Vec<bool> = records.iter().map(|r| r.imag.overflow).collect();
    let magnitude_ovf: Vec<bool> = records.iter().map(|r| r.magnitude.overflow).collect();
    let resistance_ovf: Vec<bool> = records.iter().map(|r| r.resistance.overflow).collect();
    let reactance_ovf: Vec<bool> = records.iter().map(|r| r.reactance.overflow).collect();

    DataFrame::new(vec![
        Series::new("freq_hz".into(), freq).into(),
        Series::new("r".into(), real).into(),
        Series::new("i".into(), imag).into(),
        Series::new("magnitude".into(), magnitude).into(),
        Series::new("phase_deg".into(), phase).into(),
        Series::new("resistance".into(), resistance).into(),
        Series::new("reactance".into(), reactance).into(),
        Series::new("coord".into(), coord).into(),
        Series::new("r_ovf".into(), real_ovf).into(),
        Series::new("i_ovf".into(), imag_ovf).into(),
        Series::new("magnitude_ovf".into(), magnitude_ovf).into(),
        Series::new("resistance_ovf".into(), resistance_ovf).into(),
        Series::new("reactance_ovf".into(), reactance_ovf).into(),
    ])
}

/// Mean of `|Z|`, phase, resistance and reactance per frequency, across all
/// coordinates, sorted by frequency. Nulls (overflowed readings) are skipped
/// by the mean, not treated as zero.
pub fn average_by_frequency(df: DataFrame) -> PolarsResult<DataFrame> {
    df.lazy()
        .group_by([col("freq_hz")])
        .agg([
            col("magnitude").mean(),
            col("phase_deg").mean(),
            col("resistance").mean(),
            col("reactance").mean(),
        ])
        .sort(["freq_hz"], SortMultipleOptions::default())
        .collect()
}

/// Convenience: records straight to the averaged view.
pub fn averaged_view(records: &[MeasurementRecord]) -> PolarsResult<DataFrame> {
    average_by_frequency(to_dataframe(records)?)
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::io::outcar;

/// Raw pressures are reported multiplied by this factor.
pub const PRESSURE_REPORT_SCALE: f64 = 1000.0;

/// File the sampler reads when handed a calculation directory.
pub const PRESSURE_FILE: &str = "OUTCAR";

/// A single scalar pressure estimate. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureSample {
    pub value: f64,
    pub averaging_fraction: f64,
    pub samples_used: usize,
}

impl PressureSample {
    /// The mean in reported units (`value * 1000`). Thresholds, target
    /// pressures and the rescaler all work in these units.
    pub fn reported(&self) -> f64 {
        self.value * PRESSURE_REPORT_SCALE
    }

    pub fn report(&self) -> PressureReport {
        PressureReport {
            avg_pres: self.reported(),
        }
    }
}

/// Record stored by the pressure-parsing step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureReport {
    pub avg_pres: f64,
}

/// Reduces a pressure time series to the mean of its trailing portion.
#[derive(Debug, Clone, Copy)]
pub struct PressureSampler {
    averaging_fraction: f64,
}

impl PressureSampler {
    pub fn new(averaging_fraction: f64) -> Result<Self> {
        if !(averaging_fraction > 0.0 && averaging_fraction <= 1.0) {
            return Err(WorkflowError::config(format!(
                "averaging_fraction must lie in (0, 1], got {}",
                averaging_fraction
            )));
        }
        Ok(Self { averaging_fraction })
    }

    pub fn averaging_fraction(&self) -> f64 {
        self.averaging_fraction
    }

    /// Samples a pressure file, or the `OUTCAR` inside a calculation directory.
    pub fn sample(&self, output: &Path) -> Result<PressureSample> {
        let path = resolve_output(output);
        let series = outcar::read_pressure_series(&path)?;
        self.sample_series(&series)
            .ok_or_else(|| WorkflowError::missing_output(&path, "no pressure samples recorded"))
    }

    /// Mean over the last `ceil(n * averaging_fraction)` samples; the
    /// equilibration head of the series is discarded.
    pub fn sample_series(&self, series: &[f64]) -> Option<PressureSample> {
        let n = series.len();
        if n == 0 {
            return None;
        }
        let keep = ((n as f64 * self.averaging_fraction).ceil() as usize).clamp(1, n);
        let tail = &series[n - keep..];
        let value = tail.iter().sum::<f64>() / keep as f64;
        Some(PressureSample {
            value,
            averaging_fraction: self.averaging_fraction,
            samples_used: keep,
        })
    }
}

fn resolve_output(output: &Path) -> PathBuf {
    if output.is_dir() {
        output.join(PRESSURE_FILE)
    } else {
        output.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_trailing_half() {
        let s = PressureSampler::new(0.5).unwrap();
        let out = s.sample_series(&[100.0, 100.0, 2.0, 4.0]).unwrap();
        assert_eq!(out.value, 3.0);
        assert_eq!(out.samples_used, 2);
    }

    #[test]
    fn odd_lengths_round_up() {
        let s = PressureSampler::new(0.5).unwrap();
        let out = s.sample_series(&[9.0, 1.0, 2.0]).unwrap();
        assert_eq!(out.samples_used, 2);
        assert_eq!(out.value, 1.5);
    }

    #[test]
    fn full_fraction_uses_everything() {
        let s = PressureSampler::new(1.0).unwrap();
        assert_eq!(s.sample_series(&[1.0, 2.0, 3.0]).unwrap().value, 2.0);
    }

    #[test]
    fn empty_series_has_no_sample() {
        let s = PressureSampler::new(0.5).unwrap();
        assert!(s.sample_series(&[]).is_none());
    }

    #[test]
    fn fraction_must_be_in_range() {
        assert!(PressureSampler::new(0.0).is_err());
        assert!(PressureSampler::new(1.5).is_err());
        assert!(PressureSampler::new(f64::NAN).is_err());
    }

    #[test]
    fn report_scales_by_thousand() {
        let s = PressureSample { value: 1.25, averaging_fraction: 0.5, samples_used: 1 };
        assert_eq!(s.report().avg_pres, 1250.0);
    }
}

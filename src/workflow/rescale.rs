use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::domain::Structure;
use crate::error::{Result, WorkflowError};
use crate::io::poscar;
use crate::workflow::state::{CycleState, DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_TARGET_PRESSURE};

/// Thermodynamic inputs of one volume correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RescaleParams {
    pub initial_temperature: f64,
    pub target_temperature: f64,
    pub initial_pressure: f64,
    pub target_pressure: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl RescaleParams {
    /// Constant-temperature correction from `initial_pressure` towards zero.
    pub fn new(initial_temperature: f64, initial_pressure: f64) -> Self {
        Self {
            initial_temperature,
            target_temperature: initial_temperature,
            initial_pressure,
            target_pressure: DEFAULT_TARGET_PRESSURE,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
        }
    }

    /// Parameters for the cycle after `state`, given the pressure just measured.
    pub fn from_state(state: &CycleState, measured_pressure: f64) -> Self {
        Self {
            initial_temperature: state.initial_temperature,
            target_temperature: state.target_temperature,
            initial_pressure: measured_pressure,
            target_pressure: state.target_pressure,
            alpha: state.alpha,
            beta: state.beta,
        }
    }
}

/// Outcome of one rescale; consumed by the next simulation.
#[derive(Debug, Clone)]
pub struct RescaleResult {
    pub corrected_geometry: Structure,
    pub volume_before: f64,
    pub volume_after: f64,
}

/// Two-term linear volume correction: thermal expansion, then compressibility.
#[derive(Debug, Clone, Copy)]
pub struct VolumeRescaler {
    params: RescaleParams,
}

impl VolumeRescaler {
    pub fn new(params: RescaleParams) -> Self {
        Self { params }
    }

    /// `1 + alpha * dT`; exactly 1 when the temperatures agree.
    pub fn thermal_factor(&self) -> f64 {
        let p = &self.params;
        if p.target_temperature == p.initial_temperature {
            return 1.0;
        }
        1.0 + p.alpha * (p.target_temperature - p.initial_temperature)
    }

    /// `1 - beta * dP`; exactly 1 when the pressures agree.
    pub fn pressure_factor(&self) -> f64 {
        let p = &self.params;
        if p.target_pressure == p.initial_pressure {
            return 1.0;
        }
        1.0 - p.beta * (p.target_pressure - p.initial_pressure)
    }

    /// Applies the thermal step and then the pressure step to the running volume.
    pub fn corrected_volume(&self, volume: f64) -> f64 {
        let after_thermal = volume * self.thermal_factor();
        after_thermal * self.pressure_factor()
    }

    pub fn rescale(&self, mut geometry: Structure) -> Result<RescaleResult> {
        let volume_before = geometry.volume();
        if !(volume_before > 0.0) || !volume_before.is_finite() {
            return Err(WorkflowError::invalid_geometry(
                geometry.label.as_str(),
                format!("non-positive cell volume {}", volume_before),
            ));
        }

        let volume_after = self.corrected_volume(volume_before);
        if !(volume_after > 0.0) || !volume_after.is_finite() {
            return Err(WorkflowError::invalid_geometry(
                geometry.label.as_str(),
                format!("correction collapses the cell ({} -> {})", volume_before, volume_after),
            ));
        }

        if volume_after != volume_before {
            geometry.scale_to_volume(volume_after).ok_or_else(|| {
                WorkflowError::invalid_geometry(geometry.label.as_str(), "lattice became singular")
            })?;
        }
        debug!(
            "Rescaled volume {:.4} -> {:.4} (thermal x{:.6}, pressure x{:.6})",
            volume_before,
            volume_after,
            self.thermal_factor(),
            self.pressure_factor()
        );

        Ok(RescaleResult {
            corrected_geometry: geometry,
            volume_before,
            volume_after,
        })
    }

    /// Reads a geometry file and rescales it. Persisting the result is the
    /// caller's responsibility.
    pub fn rescale_file(&self, path: &Path) -> Result<RescaleResult> {
        let geometry = poscar::read_poscar(path)?;
        self.rescale(geometry).map_err(|e| match e {
            WorkflowError::InvalidGeometry { reason, .. } => WorkflowError::invalid_geometry(path, reason),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Lattice;
    use nalgebra::Point3;

    fn cube(edge: f64) -> Structure {
        let mut s = Structure::new("cube", vec!["Si".into()], Lattice::cubic(edge).unwrap());
        s.push_fractional(0, Point3::new(0.25, 0.5, 0.75));
        s
    }

    #[test]
    fn thermal_then_pressure() {
        let params = RescaleParams {
            initial_temperature: 1000.0,
            target_temperature: 2000.0,
            initial_pressure: 500.0,
            target_pressure: 0.0,
            alpha: 1e-5,
            beta: 1e-6,
        };
        let r = VolumeRescaler::new(params);
        let v = r.corrected_volume(100.0);
        let expected = 100.0 * (1.0 + 1e-5 * 1000.0) * (1.0 + 1e-6 * 500.0);
        assert!((v - expected).abs() < 1e-9);
    }

    #[test]
    fn fractional_coordinates_are_preserved() {
        let r = VolumeRescaler::new(RescaleParams::new(300.0, 10_000.0));
        let out = r.rescale(cube(10.0)).unwrap();
        assert!((out.volume_after - 1010.0).abs() < 1e-9);
        assert!((out.corrected_geometry.volume() - 1010.0).abs() < 1e-9);
        let f = out.corrected_geometry.fractional_coords()[0];
        assert!((f.x - 0.25).abs() < 1e-12);
        assert!((f.y - 0.5).abs() < 1e-12);
        assert!((f.z - 0.75).abs() < 1e-12);
    }

    #[test]
    fn equal_states_are_identity() {
        let mut params = RescaleParams::new(300.0, 0.0);
        params.target_pressure = 0.0;
        let out = VolumeRescaler::new(params).rescale(cube(7.0)).unwrap();
        assert_eq!(out.volume_before, out.volume_after);
        assert_eq!(out.corrected_geometry.lattice, cube(7.0).lattice);
    }

    #[test]
    fn collapse_is_invalid_geometry() {
        let mut params = RescaleParams::new(300.0, -2e6);
        params.beta = 1e-6;
        let err = VolumeRescaler::new(params).rescale(cube(5.0)).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidGeometry { .. }));
    }
}

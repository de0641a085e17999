use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 5.0;
pub const DEFAULT_MAX_SPAWNS: u32 = 6;
pub const DEFAULT_TARGET_PRESSURE: f64 = 0.0;
pub const DEFAULT_ALPHA: f64 = 1e-5;
pub const DEFAULT_BETA: f64 = 1e-6;
pub const DEFAULT_AVERAGING_FRACTION: f64 = 0.5;
pub const DEFAULT_WALL_TIME: u64 = 19200;
pub const DEFAULT_NSTEPS: u64 = 2000;
pub const DEFAULT_SIMULATION_COMMAND: &str = "vasp_std";

/// Engine settings carried through a chain untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Per-run wall time (seconds), enforced by the external executor.
    pub wall_time: u64,
    pub simulation_command: String,
    /// JSON-lines results store; `None` disables persistence.
    pub result_sink_ref: Option<PathBuf>,
    /// MD steps per cycle.
    pub nsteps: u64,
    /// Mirror of every cycle directory when copy-to-home is requested.
    pub calc_home: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            wall_time: DEFAULT_WALL_TIME,
            simulation_command: DEFAULT_SIMULATION_COMMAND.to_string(),
            result_sink_ref: None,
            nsteps: DEFAULT_NSTEPS,
            calc_home: None,
        }
    }
}

/// The explicit, serializable state threaded from one cycle to the next.
///
/// A cycle never mutates the state it was given; the controller builds the
/// successor with [`CycleState::next`]. All pressures are in reported units
/// (averaged kB x 1000).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleState {
    pub pressure_threshold: f64,
    pub spawn_count: u32,
    pub max_spawns: u32,
    pub initial_temperature: f64,
    pub target_temperature: f64,
    pub initial_pressure: f64,
    pub target_pressure: f64,
    pub alpha: f64,
    pub beta: f64,
    pub averaging_fraction: f64,
    #[serde(flatten)]
    pub settings: RunSettings,
}

impl CycleState {
    /// State of a fresh chain at constant temperature (`spawn_count = 0`).
    pub fn new(temperature: f64) -> Self {
        Self {
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            spawn_count: 0,
            max_spawns: DEFAULT_MAX_SPAWNS,
            initial_temperature: temperature,
            target_temperature: temperature,
            initial_pressure: 0.0,
            target_pressure: DEFAULT_TARGET_PRESSURE,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            averaging_fraction: DEFAULT_AVERAGING_FRACTION,
            settings: RunSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pressure_threshold > 0.0) {
            return Err(WorkflowError::config(format!(
                "pressure_threshold must be positive, got {}",
                self.pressure_threshold
            )));
        }
        if self.spawn_count > self.max_spawns {
            return Err(WorkflowError::config(format!(
                "spawn_count {} exceeds max_spawns {}",
                self.spawn_count, self.max_spawns
            )));
        }
        if !(self.averaging_fraction > 0.0 && self.averaging_fraction <= 1.0) {
            return Err(WorkflowError::config(format!(
                "averaging_fraction must lie in (0, 1], got {}",
                self.averaging_fraction
            )));
        }
        let finite = [
            self.initial_temperature,
            self.target_temperature,
            self.initial_pressure,
            self.target_pressure,
            self.alpha,
            self.beta,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(WorkflowError::config("thermodynamic parameters must be finite"));
        }
        Ok(())
    }

    pub fn budget_exhausted(&self) -> bool {
        self.spawn_count >= self.max_spawns
    }

    /// Successor state for the next cycle: the measured pressure becomes the
    /// working pressure and the spawn counter advances by one. Everything else
    /// is copied forward unchanged.
    pub fn next(&self, measured_pressure: f64) -> Self {
        Self {
            spawn_count: self.spawn_count + 1,
            initial_pressure: measured_pressure,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_only_touches_counter_and_pressure() {
        let mut s = CycleState::new(1500.0);
        s.settings.wall_time = 3600;
        let n = s.next(42.0);
        assert_eq!(n.spawn_count, 1);
        assert_eq!(n.initial_pressure, 42.0);
        assert_eq!(n.settings, s.settings);
        assert_eq!(n.initial_temperature, s.initial_temperature);
        assert_eq!(n.max_spawns, s.max_spawns);
        assert_eq!(s.spawn_count, 0);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut s = CycleState::new(300.0);
        assert!(s.validate().is_ok());
        s.pressure_threshold = 0.0;
        assert!(s.validate().is_err());
        s.pressure_threshold = 1.0;
        s.spawn_count = 7;
        assert!(s.validate().is_err());
        s.spawn_count = 0;
        s.averaging_fraction = 0.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn payload_is_flat() {
        let s = CycleState::new(300.0);
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("wall_time").is_some());
        assert!(v.get("simulation_command").is_some());
        let back: CycleState = serde_json::from_value(v).unwrap();
        assert_eq!(back, s);
    }
}

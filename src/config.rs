use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::domain::Composition;
use crate::engine::packing::AmorphousParams;
use crate::error::{Result, WorkflowError};
use crate::workflow::state::{
    CycleState, RunSettings, DEFAULT_ALPHA, DEFAULT_AVERAGING_FRACTION, DEFAULT_BETA,
    DEFAULT_MAX_SPAWNS, DEFAULT_NSTEPS, DEFAULT_PRESSURE_THRESHOLD, DEFAULT_SIMULATION_COMMAND,
    DEFAULT_TARGET_PRESSURE, DEFAULT_WALL_TIME,
};

pub const DEFAULT_NAME: &str = "density_finder";
pub const DEFAULT_CALC_HOME: &str = "~/wflows";

/// Every recognised option of a density-finding run.
///
/// Loaded from JSON; absent fields take their defaults. Nothing here is
/// trusted until [`DensityConfig::validate`] has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DensityConfig {
    /// MD temperature (K). Required.
    pub temperature: Option<f64>,
    /// Tolerance on `|P - target_pressure|`. Pressures here and in
    /// `target_pressure` are in reported units: the averaged kB value x 1000.
    pub pressure_threshold: f64,
    pub max_spawns: u32,
    pub nsteps: u64,
    /// Seconds per engine run.
    pub wall_time: u64,
    pub simulation_command: String,
    /// JSON-lines file receiving one record per stored result.
    pub result_sink: Option<PathBuf>,
    pub name: String,
    pub averaging_fraction: f64,
    /// Reported units, like `pressure_threshold`.
    pub target_pressure: f64,
    pub alpha: f64,
    pub beta: f64,
    /// Mirror every cycle directory into `calc_home/name`.
    pub copy_calcs: bool,
    pub calc_home: PathBuf,

    /// Pre-built starting structure (POSCAR).
    pub structure: Option<PathBuf>,
    /// Element -> atom count, packed randomly with `amorphous`.
    pub composition: Option<Composition>,
    pub amorphous: Option<AmorphousParams>,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            max_spawns: DEFAULT_MAX_SPAWNS,
            nsteps: DEFAULT_NSTEPS,
            wall_time: DEFAULT_WALL_TIME,
            simulation_command: DEFAULT_SIMULATION_COMMAND.to_string(),
            result_sink: None,
            name: DEFAULT_NAME.to_string(),
            averaging_fraction: DEFAULT_AVERAGING_FRACTION,
            target_pressure: DEFAULT_TARGET_PRESSURE,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            copy_calcs: false,
            calc_home: PathBuf::from(DEFAULT_CALC_HOME),
            structure: None,
            composition: None,
            amorphous: None,
        }
    }
}

/// Where the first cycle's geometry comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Seed {
    Structure(PathBuf),
    Composition {
        composition: Composition,
        params: AmorphousParams,
    },
}

impl Seed {
    /// Exactly one of a structure or a composition (with packing parameters).
    pub fn from_parts(
        structure: Option<&Path>,
        composition: Option<&Composition>,
        params: Option<&AmorphousParams>,
    ) -> Result<Self> {
        match (structure, composition) {
            (Some(_), Some(_)) => Err(WorkflowError::config(
                "both a structure and a composition were supplied; give exactly one",
            )),
            (None, None) => Err(WorkflowError::config(
                "neither a structure nor a composition was supplied",
            )),
            (Some(path), None) => Ok(Seed::Structure(path.to_path_buf())),
            (None, Some(comp)) => {
                let params = params.ok_or_else(|| {
                    WorkflowError::config("composition seeding requires 'amorphous' parameters (box_scale)")
                })?;
                if comp.is_empty() || comp.values().all(|&n| n == 0) {
                    return Err(WorkflowError::config("composition has no atoms"));
                }
                if !(params.box_scale > 0.0) {
                    return Err(WorkflowError::config(format!(
                        "box_scale must be positive, got {}",
                        params.box_scale
                    )));
                }
                if !(params.tol > 0.0) {
                    return Err(WorkflowError::config(format!(
                        "tol must be positive, got {}",
                        params.tol
                    )));
                }
                Ok(Seed::Composition {
                    composition: comp.clone(),
                    params: params.clone(),
                })
            }
        }
    }
}

impl DensityConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| WorkflowError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn temperature(&self) -> Result<f64> {
        self.temperature
            .ok_or_else(|| WorkflowError::config("'temperature' is required"))
    }

    pub fn seed(&self) -> Result<Seed> {
        Seed::from_parts(
            self.structure.as_deref(),
            self.composition.as_ref(),
            self.amorphous.as_ref(),
        )
    }

    /// `calc_home` with a leading `~` expanded.
    pub fn calc_home_root(&self) -> PathBuf {
        expand_home(&self.calc_home)
    }

    /// Directory receiving the mirrored cycles, when enabled.
    pub fn calc_home_dir(&self) -> Option<PathBuf> {
        self.copy_calcs.then(|| self.calc_home_root().join(&self.name))
    }

    /// Checks every option. Performs no writes.
    pub fn validate(&self) -> Result<()> {
        let temperature = self.temperature()?;
        if !(temperature > 0.0) || !temperature.is_finite() {
            return Err(WorkflowError::config(format!(
                "temperature must be positive, got {}",
                temperature
            )));
        }
        if self.name.trim().is_empty() {
            return Err(WorkflowError::config("name must not be empty"));
        }
        if self.nsteps == 0 {
            return Err(WorkflowError::config("nsteps must be at least 1"));
        }
        if self.simulation_command.trim().is_empty() {
            return Err(WorkflowError::config("simulation_command must not be empty"));
        }
        self.seed()?;
        self.initial_state()?.validate()?;

        if self.copy_calcs {
            let root = self.calc_home_root();
            if !root.is_dir() {
                return Err(WorkflowError::config(format!(
                    "calc_home {} does not exist",
                    root.display()
                )));
            }
            let dest = root.join(&self.name);
            if dest.exists() {
                return Err(WorkflowError::config(format!(
                    "{} already exists; choose another workflow name",
                    dest.display()
                )));
            }
        }
        Ok(())
    }

    /// State of the chain before its first decision.
    pub fn initial_state(&self) -> Result<CycleState> {
        let mut state = CycleState::new(self.temperature()?);
        state.pressure_threshold = self.pressure_threshold;
        state.max_spawns = self.max_spawns;
        state.target_pressure = self.target_pressure;
        state.alpha = self.alpha;
        state.beta = self.beta;
        state.averaging_fraction = self.averaging_fraction;
        state.settings = self.run_settings();
        Ok(state)
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            wall_time: self.wall_time,
            simulation_command: self.simulation_command.clone(),
            result_sink_ref: self.result_sink.clone(),
            nsteps: self.nsteps,
            calc_home: self.calc_home_dir(),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

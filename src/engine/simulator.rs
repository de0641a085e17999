use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::workflow::state::RunSettings;

/// What the engine is asked to do with the structure in `POSCAR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulationKind {
    /// NVT molecular dynamics ramped from `start_temp` to `end_temp`.
    MolecularDynamics { start_temp: f64, end_temp: f64, nsteps: u64 },
    /// Full geometry optimization.
    Optimize,
    /// Single-point evaluation.
    Static,
}

impl SimulationKind {
    pub fn label(&self) -> &'static str {
        match self {
            SimulationKind::MolecularDynamics { .. } => "md",
            SimulationKind::Optimize => "structure optimization",
            SimulationKind::Static => "static",
        }
    }

    /// INCAR tags that select this kind of run. MD keeps the cell fixed
    /// (`ISIF = 1`) and skips the wavefunction dump.
    pub fn incar_tags(&self) -> Vec<(&'static str, String)> {
        match self {
            SimulationKind::MolecularDynamics { start_temp, end_temp, nsteps } => vec![
                ("IBRION", "0".into()),
                ("NSW", nsteps.to_string()),
                ("TEBEG", start_temp.to_string()),
                ("TEEND", end_temp.to_string()),
                ("ISIF", "1".into()),
                ("LWAVE", ".FALSE.".into()),
            ],
            SimulationKind::Optimize => vec![
                ("IBRION", "2".into()),
                ("ISIF", "3".into()),
                ("NSW", "99".into()),
            ],
            SimulationKind::Static => vec![("IBRION", "-1".into()), ("NSW", "0".into())],
        }
    }
}

/// One engine invocation. `workdir` already holds the input geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub workdir: PathBuf,
    pub kind: SimulationKind,
    pub settings: RunSettings,
}

/// Paths of the outputs a completed run leaves behind.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    /// Pressure/energy log (OUTCAR).
    pub outcar: PathBuf,
    /// Final geometry (CONTCAR).
    pub contcar: PathBuf,
}

/// A generic interface for simulation engines.
/// Implementations must be Thread-Safe (Sync); independent chains share one.
pub trait MdSimulator: Send + Sync {
    /// Runs the request to completion. Blocks until the engine exits.
    fn run(&self, request: &SimulationRequest) -> Result<SimulationOutput>;

    /// Returns the name of the engine (e.g., "VASP (external)").
    fn name(&self) -> &str;
}

//! Per-cycle convergence decision.
//!
//! The controller is run once per completed simulation cycle. It samples the
//! cycle's pressure, then either terminates the chain or rescales the final
//! geometry and hands back a [`SpawnRequest`] describing the next cycle. It
//! never schedules anything itself; the orchestrator materializes the request
//! through [`crate::workflow::graph::JobGraphExtender`].
//!
//! The tolerance check runs before the budget check, so a converged result is
//! never reported as budget exhaustion.
//!
//! Decisions are taken on the reported pressure (raw mean x 1000), the same
//! unit as `target_pressure`, `pressure_threshold` and the rescaler's
//! `initial_pressure`.

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::io::poscar;
use crate::workflow::pressure::{PressureSample, PressureSampler};
use crate::workflow::rescale::{RescaleParams, VolumeRescaler};
use crate::workflow::state::CycleState;

/// Final structure written by the simulation engine.
pub const FINAL_GEOMETRY_FILE: &str = "CONTCAR";
/// Input structure of a calculation.
pub const INPUT_GEOMETRY_FILE: &str = "POSCAR";
/// Corrected geometry persisted for the next cycle.
pub const RESCALED_GEOMETRY_FILE: &str = "POSCAR.rescaled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    AwaitingSample,
    Deciding,
    Spawning,
    TerminalConverged,
    TerminalBudgetExhausted,
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalConverged | Self::TerminalBudgetExhausted)
    }
}

/// Result record emitted at a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    /// Reported pressure (raw mean x 1000).
    pub pressure: f64,
    pub density_calculated: bool,
}

/// Pure outcome of comparing a sample against the carried state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Converged,
    BudgetExhausted,
    Continue,
}

/// Everything the next cycle needs, as a serializable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub state: CycleState,
    pub seed_geometry: PathBuf,
    pub measured: PressureSample,
    pub volume_before: f64,
    pub volume_after: f64,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Converged(FinalResult),
    BudgetExhausted(FinalResult),
    Spawn(Box<SpawnRequest>),
}

impl Decision {
    pub fn controller_state(&self) -> ControllerState {
        match self {
            Decision::Converged(_) => ControllerState::TerminalConverged,
            Decision::BudgetExhausted(_) => ControllerState::TerminalBudgetExhausted,
            Decision::Spawn(_) => ControllerState::Spawning,
        }
    }

    pub fn final_result(&self) -> Option<FinalResult> {
        match self {
            Decision::Converged(r) | Decision::BudgetExhausted(r) => Some(*r),
            Decision::Spawn(_) => None,
        }
    }
}

/// `|measured - target| <= threshold`, inclusive on both sides.
pub fn within_tolerance(measured: f64, state: &CycleState) -> bool {
    (measured - state.target_pressure).abs() <= state.pressure_threshold
}

/// Tolerance first, then budget.
pub fn evaluate(measured: f64, state: &CycleState) -> Verdict {
    if within_tolerance(measured, state) {
        Verdict::Converged
    } else if state.budget_exhausted() {
        Verdict::BudgetExhausted
    } else {
        Verdict::Continue
    }
}

pub struct ConvergenceController {
    sampler: PressureSampler,
    state: ControllerState,
}

impl ConvergenceController {
    pub fn new(averaging_fraction: f64) -> Result<Self> {
        Ok(Self {
            sampler: PressureSampler::new(averaging_fraction)?,
            state: ControllerState::AwaitingSample,
        })
    }

    pub fn for_state(state: &CycleState) -> Result<Self> {
        Self::new(state.averaging_fraction)
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Runs one decision over a completed calculation directory.
    ///
    /// On continue, the final geometry of `output_dir` is rescaled with the
    /// measured pressure as the working pressure and written to
    /// `output_dir/POSCAR.rescaled`.
    pub fn run_cycle(&mut self, output_dir: &Path, prior: &CycleState) -> Result<Decision> {
        prior.validate()?;
        self.state = ControllerState::AwaitingSample;
        let sample = self.sampler.sample(output_dir)?;
        self.decide(sample, output_dir, prior)
    }

    /// Decision step given an already computed sample.
    pub fn decide(
        &mut self,
        sample: PressureSample,
        output_dir: &Path,
        prior: &CycleState,
    ) -> Result<Decision> {
        self.state = ControllerState::Deciding;
        let measured = sample.reported();

        let decision = match evaluate(measured, prior) {
            Verdict::Converged => {
                info!(
                    "Converged at spawn {}: P = {:.3} (target {:.3} +/- {:.3})",
                    prior.spawn_count, measured, prior.target_pressure, prior.pressure_threshold
                );
                Decision::Converged(FinalResult {
                    pressure: measured,
                    density_calculated: true,
                })
            }
            Verdict::BudgetExhausted => {
                info!(
                    "Spawn budget exhausted ({}/{}) with P = {:.3}",
                    prior.spawn_count, prior.max_spawns, measured
                );
                Decision::BudgetExhausted(FinalResult {
                    pressure: measured,
                    density_calculated: false,
                })
            }
            Verdict::Continue => {
                let source = geometry_source(output_dir);
                let rescaler = VolumeRescaler::new(RescaleParams::from_state(prior, measured));
                let result = rescaler.rescale_file(&source)?;

                let seed_geometry = output_dir.join(RESCALED_GEOMETRY_FILE);
                poscar::write_poscar(&result.corrected_geometry, &seed_geometry)?;

                let next = prior.next(measured);
                info!(
                    "P = {:.3} outside tolerance; volume {:.3} -> {:.3}, spawning cycle {}",
                    measured, result.volume_before, result.volume_after, next.spawn_count
                );
                Decision::Spawn(Box::new(SpawnRequest {
                    state: next,
                    seed_geometry,
                    measured: sample,
                    volume_before: result.volume_before,
                    volume_after: result.volume_after,
                }))
            }
        };

        self.state = decision.controller_state();
        Ok(decision)
    }
}

/// The engine's final structure if present, else the input structure.
pub fn geometry_source(dir: &Path) -> PathBuf {
    let contcar = dir.join(FINAL_GEOMETRY_FILE);
    if contcar.exists() {
        contcar
    } else {
        dir.join(INPUT_GEOMETRY_FILE)
    }
}

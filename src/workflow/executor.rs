//! In-process execution of job graphs.
//!
//! Units of one graph run one after another in dependency order; a cycle
//! never starts before its parent has completed. Independent graphs run in
//! parallel on the rayon pool and share nothing but the simulator and the
//! result sink.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::simulator::{MdSimulator, SimulationRequest};
use crate::error::{Result, WorkflowError};
use crate::io::poscar;
use crate::workflow::controller::{geometry_source, ConvergenceController, Decision, FinalResult};
use crate::workflow::graph::{FileCopy, JobGraph, JobGraphExtender, Task, UnitId, UnitStatus};
use crate::workflow::pressure::{PressureSample, PressureSampler, PRESSURE_REPORT_SCALE};
use crate::workflow::sink::{write_history, CycleRecord, ResultRecord, ResultSink};
use crate::workflow::state::CycleState;
use crate::workflow::ChainEvent;

/// Name of the per-chain convergence history written next to its units.
pub const HISTORY_FILE: &str = "history.csv";

/// How a graph ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainOutcome {
    Converged(FinalResult),
    BudgetExhausted(FinalResult),
    /// Every unit completed and none of them took a decision.
    Completed,
    /// A unit failed; `last_state` is the last successfully computed state.
    Failed {
        unit: String,
        last_state: Option<CycleState>,
        reason: String,
    },
}

impl ChainOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainOutcome::Converged(_) | ChainOutcome::BudgetExhausted(_))
    }

    pub fn final_result(&self) -> Option<FinalResult> {
        match self {
            ChainOutcome::Converged(r) | ChainOutcome::BudgetExhausted(r) => Some(*r),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChainOutcome::Converged(_) => "converged",
            ChainOutcome::BudgetExhausted(_) => "budget exhausted",
            ChainOutcome::Completed => "completed",
            ChainOutcome::Failed { .. } => "failed",
        }
    }
}

/// Everything a finished graph leaves behind.
#[derive(Debug, Clone)]
pub struct GraphReport {
    pub name: String,
    pub outcome: ChainOutcome,
    pub cycles: Vec<CycleRecord>,
    /// The graph as executed, spawned cycles included.
    pub graph: JobGraph,
    pub units_run: usize,
    pub duration_secs: f64,
}

impl GraphReport {
    /// Number of units that ran an MD cycle and took a decision.
    pub fn decisions(&self) -> usize {
        self.cycles.len()
    }
}

/// Mutable bookkeeping of one graph run.
struct RunContext {
    root: PathBuf,
    cycles: Vec<CycleRecord>,
    terminal: Option<ChainOutcome>,
    last_state: Option<CycleState>,
}

pub struct LocalExecutor {
    simulator: Arc<dyn MdSimulator>,
    sink: Option<Arc<dyn ResultSink>>,
    workdir: PathBuf,
    events: Option<Sender<ChainEvent>>,
}

impl LocalExecutor {
    pub fn new(simulator: Arc<dyn MdSimulator>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            simulator,
            sink: None,
            workdir: workdir.into(),
            events: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_events(mut self, tx: Sender<ChainEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Runs independent graphs in parallel. Reports keep the input order.
    pub fn run_all(&self, graphs: Vec<JobGraph>) -> Vec<GraphReport> {
        graphs.into_par_iter().map(|g| self.run(g)).collect()
    }

    /// Runs one graph until no unit is left waiting.
    pub fn run(&self, mut graph: JobGraph) -> GraphReport {
        let start = Instant::now();
        let chain = graph.name.clone();
        let mut ctx = RunContext {
            root: self.workdir.join(&chain),
            cycles: Vec::new(),
            terminal: None,
            last_state: graph.units().iter().find_map(|u| u.cycle_state()).cloned(),
        };
        let mut failure: Option<ChainOutcome> = None;
        let mut units_run = 0;

        self.emit(ChainEvent::GraphStarted { chain: chain.clone(), units: graph.len() });
        info!("[{}] starting with {} units", chain, graph.len());

        loop {
            let ready = graph.ready_units();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                let unit_name = match graph.unit(id) {
                    Some(u) => u.name.clone(),
                    None => continue,
                };
                graph.set_status(id, UnitStatus::Running);
                self.emit(ChainEvent::UnitStarted { chain: chain.clone(), unit: unit_name.clone() });
                units_run += 1;

                let status = match self.run_unit(&mut graph, id, &mut ctx) {
                    Ok(()) => UnitStatus::Completed,
                    Err(e) => {
                        warn!("[{}] unit '{}' failed: {}", chain, unit_name, e);
                        self.emit(ChainEvent::Log(format!("{}: {}", unit_name, e)));
                        failure.get_or_insert(ChainOutcome::Failed {
                            unit: unit_name.clone(),
                            last_state: ctx.last_state.clone(),
                            reason: e.to_string(),
                        });
                        UnitStatus::Failed
                    }
                };
                graph.set_status(id, status);
                if status == UnitStatus::Failed {
                    graph.skip_descendants(id);
                }
                self.emit(ChainEvent::UnitFinished { chain: chain.clone(), unit: unit_name, status });
            }
        }

        debug_assert!(graph.is_settled());
        let outcome = failure.or(ctx.terminal.take()).unwrap_or(ChainOutcome::Completed);

        if !ctx.cycles.is_empty() {
            let path = ctx.root.join(HISTORY_FILE);
            if let Err(e) = write_history(&path, &ctx.cycles) {
                warn!("[{}] could not write history: {}", chain, e);
            }
        }

        info!("[{}] finished: {}", chain, outcome.label());
        self.emit(ChainEvent::Finished { chain: chain.clone(), outcome: outcome.clone() });

        GraphReport {
            name: chain,
            outcome,
            cycles: ctx.cycles,
            graph,
            units_run,
            duration_secs: start.elapsed().as_secs_f64(),
        }
    }

    fn run_unit(&self, graph: &mut JobGraph, id: UnitId, ctx: &mut RunContext) -> Result<()> {
        let unit = graph
            .unit(id)
            .cloned()
            .ok_or_else(|| WorkflowError::config(format!("unknown unit {}", id)))?;
        let dir = ctx.root.join(&unit.name);
        fs::create_dir_all(&dir).map_err(|e| WorkflowError::io(&dir, e))?;
        let parent_dir = unit
            .parents
            .first()
            .and_then(|p| graph.unit(*p))
            .map(|p| ctx.root.join(&p.name));

        let mut sample: Option<PressureSample> = None;

        for task in &unit.tasks {
            debug!("[{}] {} -> {}", graph.name, unit.name, task.name());
            match task {
                Task::WriteStructure { structure } => {
                    poscar::write_poscar(structure, &dir.join("POSCAR"))?;
                }
                Task::CopyOutputs { files } => {
                    let from = parent_dir.as_deref().ok_or_else(|| {
                        WorkflowError::config(format!("unit '{}' copies outputs but has no parent", unit.name))
                    })?;
                    copy_outputs(from, &dir, files)?;
                }
                Task::CopyToHome { calc_home, run_name } => {
                    let dest = calc_home.join(run_name);
                    mirror_dir(&dir, &dest)?;
                }
                Task::RunSimulation { kind } => {
                    let request = SimulationRequest {
                        workdir: dir.clone(),
                        kind: kind.clone(),
                        settings: graph.settings_for(id).clone(),
                    };
                    info!("[{}] {}: running {} with {}", graph.name, unit.name, kind.label(), self.simulator.name());
                    let output = self.simulator.run(&request)?;
                    for path in [&output.outcar, &output.contcar] {
                        if !path.exists() {
                            return Err(WorkflowError::missing_output(
                                path,
                                "engine finished without writing it",
                            ));
                        }
                    }
                }
                Task::StoreResult { label } => {
                    let mut record = ResultRecord::new(unit.id, &unit.name, label);
                    if let Ok(s) = poscar::read_poscar(&geometry_source(&dir)) {
                        record.volume = Some(s.volume());
                        record.density = s.density();
                    }
                    self.store(record)?;
                }
                Task::GetPressure { averaging_fraction } => {
                    let measured = PressureSampler::new(*averaging_fraction)?.sample(&dir)?;
                    let mut record = ResultRecord::new(unit.id, &unit.name, "pressure");
                    record.pressure = Some(measured.value);
                    record.avg_pres = Some(measured.report().avg_pres);
                    self.store(record)?;
                    self.emit(ChainEvent::PressureSampled {
                        chain: graph.name.clone(),
                        unit: unit.name.clone(),
                        pressure: measured.reported(),
                    });
                    sample = Some(measured);
                }
                Task::SpawnCycle { state } => {
                    self.spawn_cycle(graph, id, &unit.name, &dir, state, sample, ctx)?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_cycle(
        &self,
        graph: &mut JobGraph,
        id: UnitId,
        unit_name: &str,
        dir: &Path,
        state: &CycleState,
        sample: Option<PressureSample>,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let mut controller = ConvergenceController::for_state(state)?;
        let decision = match sample {
            Some(s) => {
                state.validate()?;
                controller.decide(s, dir, state)?
            }
            None => controller.run_cycle(dir, state)?,
        };

        let mut row = CycleRecord {
            chain: graph.name.clone(),
            unit: unit_name.to_string(),
            spawn_count: state.spawn_count,
            pressure: 0.0,
            avg_pres: 0.0,
            volume_before: None,
            volume_after: None,
            decision: String::new(),
        };

        match decision {
            Decision::Spawn(request) => {
                row.pressure = request.measured.value;
                row.avg_pres = request.measured.report().avg_pres;
                row.volume_before = Some(request.volume_before);
                row.volume_after = Some(request.volume_after);
                row.decision = format!("spawn run{}", request.state.spawn_count);
                let child = JobGraphExtender::extend(graph, id, &request)?;
                debug!("[{}] appended unit {}", graph.name, child);
                ctx.last_state = Some(request.state.clone());
            }
            Decision::Converged(result) => {
                self.finish_chain(ChainOutcome::Converged(result), &mut row, id, unit_name, dir)?;
                ctx.last_state = Some(state.clone());
                ctx.terminal = Some(ChainOutcome::Converged(result));
            }
            Decision::BudgetExhausted(result) => {
                self.finish_chain(ChainOutcome::BudgetExhausted(result), &mut row, id, unit_name, dir)?;
                ctx.last_state = Some(state.clone());
                ctx.terminal = Some(ChainOutcome::BudgetExhausted(result));
            }
        }

        self.emit(ChainEvent::Decision(row.clone()));
        ctx.cycles.push(row);
        Ok(())
    }

    /// Fills the history row and stores the final record of a chain.
    fn finish_chain(
        &self,
        outcome: ChainOutcome,
        row: &mut CycleRecord,
        id: UnitId,
        unit_name: &str,
        dir: &Path,
    ) -> Result<()> {
        let Some(result) = outcome.final_result() else {
            return Ok(());
        };
        row.pressure = result.pressure / PRESSURE_REPORT_SCALE;
        row.avg_pres = result.pressure;
        row.decision = outcome.label().to_string();

        let mut record = ResultRecord::new(id, unit_name, "final");
        record.pressure = Some(result.pressure / PRESSURE_REPORT_SCALE);
        record.avg_pres = Some(result.pressure);
        record.density_calculated = Some(result.density_calculated);
        if let Ok(s) = poscar::read_poscar(&geometry_source(dir)) {
            record.volume = Some(s.volume());
            record.density = s.density();
        }
        self.store(record)
    }

    fn store(&self, record: ResultRecord) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.store(&record),
            None => Ok(()),
        }
    }

    fn emit(&self, event: ChainEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn copy_outputs(from: &Path, to: &Path, files: &[FileCopy]) -> Result<()> {
    for file in files {
        let src = from.join(&file.from);
        if !src.exists() {
            if file.required {
                return Err(WorkflowError::missing_output(&src, "required by the dependent unit"));
            }
            continue;
        }
        let dst = to.join(&file.to);
        fs::copy(&src, &dst).map_err(|e| WorkflowError::io(&dst, e))?;
    }
    Ok(())
}

/// Copies the regular files of `src` into `dest`.
fn mirror_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| WorkflowError::io(dest, e))?;
    let entries = fs::read_dir(src).map_err(|e| WorkflowError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| WorkflowError::io(src, e))?;
        let path = entry.path();
        if path.is_file() {
            let target = dest.join(entry.file_name());
            fs::copy(&path, &target).map_err(|e| WorkflowError::io(&target, e))?;
        }
    }
    Ok(())
}

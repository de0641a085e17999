//! Execution graph of units of work.
//!
//! A unit owns an ordered task list and depends on its parents. Units are
//! only ever appended, and a unit may only name parents that already exist,
//! so the graph is acyclic by construction. The graph is a plain value that
//! serializes in full, spawned cycles included.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::domain::Structure;
use crate::engine::simulator::SimulationKind;
use crate::error::{Result, WorkflowError};
use crate::workflow::controller::{FINAL_GEOMETRY_FILE, INPUT_GEOMETRY_FILE, RESCALED_GEOMETRY_FILE, SpawnRequest};
use crate::workflow::state::{CycleState, RunSettings};

pub type UnitId = Uuid;

/// Label stored with the results of every spawned cycle.
pub const CYCLE_LABEL: &str = "density_adjustment";

/// One file carried from the parent's calculation directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCopy {
    pub from: String,
    pub to: String,
    pub required: bool,
}

impl FileCopy {
    pub fn required(from: &str, to: &str) -> Self {
        Self { from: from.into(), to: to.into(), required: true }
    }

    pub fn optional(name: &str) -> Self {
        Self { from: name.into(), to: name.into(), required: false }
    }
}

/// A single step inside a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Writes the given structure as the unit's input geometry.
    WriteStructure { structure: Box<Structure> },
    /// Copies files from the parent unit's directory.
    CopyOutputs { files: Vec<FileCopy> },
    /// Mirrors the unit directory into `calc_home/run_name`.
    CopyToHome { calc_home: PathBuf, run_name: String },
    RunSimulation { kind: SimulationKind },
    /// Samples the pressure series and stores `{avg_pres}`.
    GetPressure { averaging_fraction: f64 },
    /// Persists a result record for the unit.
    StoreResult { label: String },
    /// Runs the convergence controller with the carried state.
    SpawnCycle { state: CycleState },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::WriteStructure { .. } => "write_structure",
            Task::CopyOutputs { .. } => "copy_outputs",
            Task::CopyToHome { .. } => "copy_to_home",
            Task::RunSimulation { .. } => "run_simulation",
            Task::GetPressure { .. } => "get_pressure",
            Task::StoreResult { .. } => "store_result",
            Task::SpawnCycle { .. } => "spawn_cycle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Waiting,
    Running,
    Completed,
    Failed,
    /// Never ran because an ancestor failed.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUnit {
    pub id: UnitId,
    pub name: String,
    pub parents: Vec<UnitId>,
    pub tasks: Vec<Task>,
    pub status: UnitStatus,
}

impl JobUnit {
    pub fn new(name: impl Into<String>, parents: Vec<UnitId>, tasks: Vec<Task>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parents,
            tasks,
            status: UnitStatus::Waiting,
        }
    }

    /// The cycle state this unit carries, if it ends in a decision.
    pub fn cycle_state(&self) -> Option<&CycleState> {
        self.tasks.iter().find_map(|t| match t {
            Task::SpawnCycle { state } => Some(state),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobGraph {
    pub name: String,
    /// Engine settings for units that carry no cycle state of their own.
    #[serde(default)]
    pub settings: RunSettings,
    units: Vec<JobUnit>,
    #[serde(skip)]
    index: HashMap<UnitId, usize>,
}

impl JobGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: RunSettings::default(),
            units: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Settings a unit runs with: its carried cycle state's, else the graph's.
    pub fn settings_for(&self, id: UnitId) -> &RunSettings {
        self.unit(id)
            .and_then(|u| u.cycle_state())
            .map(|s| &s.settings)
            .unwrap_or(&self.settings)
    }

    /// Appends a unit. Every parent must already be part of the graph.
    pub fn add_unit(&mut self, unit: JobUnit) -> Result<UnitId> {
        if self.index.contains_key(&unit.id) {
            return Err(WorkflowError::config(format!("duplicate unit id {}", unit.id)));
        }
        if let Some(missing) = unit.parents.iter().find(|p| !self.index.contains_key(p)) {
            return Err(WorkflowError::config(format!(
                "unit '{}' depends on unknown unit {}",
                unit.name, missing
            )));
        }
        let id = unit.id;
        self.index.insert(id, self.units.len());
        self.units.push(unit);
        Ok(id)
    }

    /// Rebuilds the id index after deserialization.
    pub fn reindex(&mut self) {
        self.index = self.units.iter().enumerate().map(|(i, u)| (u.id, i)).collect();
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[JobUnit] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Option<&JobUnit> {
        self.index.get(&id).map(|&i| &self.units[i])
    }

    pub fn set_status(&mut self, id: UnitId, status: UnitStatus) {
        if let Some(&i) = self.index.get(&id) {
            self.units[i].status = status;
        }
    }

    pub fn children_of(&self, id: UnitId) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| u.parents.contains(&id))
            .map(|u| u.id)
            .collect()
    }

    /// Waiting units whose parents have all completed, in insertion order.
    pub fn ready_units(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Waiting)
            .filter(|u| {
                u.parents
                    .iter()
                    .all(|p| self.unit(*p).map(|pu| pu.status) == Some(UnitStatus::Completed))
            })
            .map(|u| u.id)
            .collect()
    }

    /// Marks every descendant of a failed unit as skipped.
    pub fn skip_descendants(&mut self, id: UnitId) {
        let mut stack = self.children_of(id);
        while let Some(child) = stack.pop() {
            if self.unit(child).map(|u| u.status) == Some(UnitStatus::Waiting) {
                self.set_status(child, UnitStatus::Skipped);
                stack.extend(self.children_of(child));
            }
        }
    }

    /// No unit is waiting or running.
    pub fn is_settled(&self) -> bool {
        self.units
            .iter()
            .all(|u| !matches!(u.status, UnitStatus::Waiting | UnitStatus::Running))
    }

    /// Longest parent chain ending at `id` (roots have depth 0).
    pub fn depth(&self, id: UnitId) -> usize {
        self.unit(id)
            .map(|u| u.parents.iter().map(|p| self.depth(*p) + 1).max().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Appends spawned cycles to a running graph.
pub struct JobGraphExtender;

impl JobGraphExtender {
    /// The task list shared by every spawned cycle:
    /// copy the rescaled geometry in, simulate, store, sample, decide.
    pub fn cycle_tasks(state: &CycleState) -> Vec<Task> {
        let mut tasks = vec![
            Task::CopyOutputs {
                files: vec![
                    FileCopy::required(RESCALED_GEOMETRY_FILE, INPUT_GEOMETRY_FILE),
                    FileCopy::optional("CHGCAR"),
                ],
            },
            Task::RunSimulation {
                kind: SimulationKind::MolecularDynamics {
                    start_temp: state.target_temperature,
                    end_temp: state.target_temperature,
                    nsteps: state.settings.nsteps,
                },
            },
            Task::StoreResult { label: CYCLE_LABEL.to_string() },
            Task::GetPressure { averaging_fraction: state.averaging_fraction },
        ];
        if let Some(home) = &state.settings.calc_home {
            tasks.push(Task::CopyToHome {
                calc_home: home.clone(),
                run_name: format!("run{}", state.spawn_count),
            });
        }
        tasks.push(Task::SpawnCycle { state: state.clone() });
        tasks
    }

    /// Appends the cycle described by `request` as a child of `current`.
    pub fn extend(graph: &mut JobGraph, current: UnitId, request: &SpawnRequest) -> Result<UnitId> {
        let parent = graph
            .unit(current)
            .ok_or_else(|| WorkflowError::config(format!("unknown parent unit {}", current)))?;
        if request.state.spawn_count > request.state.max_spawns {
            return Err(WorkflowError::config(format!(
                "spawn_count {} exceeds max_spawns {}",
                request.state.spawn_count, request.state.max_spawns
            )));
        }
        let name = format!("{}_run{}", graph.name, request.state.spawn_count);
        let unit = JobUnit::new(name, vec![parent.id], Self::cycle_tasks(&request.state));
        graph.add_unit(unit)
    }
}

/// Files handed from a finished MD run to the unit that evaluates it.
pub fn md_output_files() -> Vec<FileCopy> {
    vec![
        FileCopy::required("OUTCAR", "OUTCAR"),
        FileCopy::required(FINAL_GEOMETRY_FILE, FINAL_GEOMETRY_FILE),
        FileCopy::required(FINAL_GEOMETRY_FILE, INPUT_GEOMETRY_FILE),
        FileCopy::optional("XDATCAR"),
        FileCopy::optional("OSZICAR"),
        FileCopy::optional("DOSCAR"),
    ]
}

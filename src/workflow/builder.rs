//! Construction of job graphs from validated inputs.
//!
//! Builders either return a complete graph or an error; no partial graph is
//! ever handed out.

use std::fs;

use log::info;

use crate::config::{DensityConfig, Seed};
use crate::core::domain::Structure;
use crate::engine::packing::StructureGenerator;
use crate::engine::simulator::SimulationKind;
use crate::error::{Result, WorkflowError};
use crate::io::poscar;
use crate::workflow::controller::{FINAL_GEOMETRY_FILE, INPUT_GEOMETRY_FILE};
use crate::workflow::graph::{md_output_files, FileCopy, JobGraph, JobUnit, Task};
use crate::workflow::state::RunSettings;

/// Label of the results stored by the first MD run.
pub const INITIAL_RUN_LABEL: &str = "initial_md";

/// Resolves the starting structure of a density chain.
pub fn seed_structure(seed: &Seed, generator: &dyn StructureGenerator) -> Result<Structure> {
    match seed {
        Seed::Structure(path) => poscar::read_poscar(path),
        Seed::Composition { composition, params } => generator
            .generate(composition, params)
            .map_err(|e| WorkflowError::config(format!("amorphous packing failed: {:#}", e))),
    }
}

/// Builds the density-finding chain: an initial MD run followed by a unit
/// that samples its pressure and takes the first decision.
///
/// With `copy_calcs` set, `calc_home/name` is created here so that a second
/// build under the same name fails validation.
pub fn density_workflow(config: &DensityConfig, generator: &dyn StructureGenerator) -> Result<JobGraph> {
    config.validate()?;
    let structure = seed_structure(&config.seed()?, generator)?;
    if !(structure.volume() > 0.0) {
        return Err(WorkflowError::config(format!(
            "starting structure '{}' has non-positive volume",
            structure.label
        )));
    }
    let state = config.initial_state()?;

    if let Some(dir) = config.calc_home_dir() {
        fs::create_dir_all(&dir).map_err(|e| WorkflowError::io(&dir, e))?;
    }

    let mut graph = JobGraph::new(&config.name).with_settings(config.run_settings());
    let temperature = state.initial_temperature;

    let run0 = graph.add_unit(JobUnit::new(
        "run0",
        vec![],
        vec![
            Task::WriteStructure { structure: Box::new(structure) },
            Task::RunSimulation {
                kind: SimulationKind::MolecularDynamics {
                    start_temp: temperature,
                    end_temp: temperature,
                    nsteps: config.nsteps,
                },
            },
            Task::StoreResult { label: INITIAL_RUN_LABEL.to_string() },
        ],
    ))?;

    let mut tasks = vec![Task::CopyOutputs { files: md_output_files() }];
    if let Some(home) = &state.settings.calc_home {
        tasks.push(Task::CopyToHome {
            calc_home: home.clone(),
            run_name: "run0".to_string(),
        });
    }
    tasks.push(Task::GetPressure { averaging_fraction: state.averaging_fraction });
    tasks.push(Task::SpawnCycle { state });
    graph.add_unit(JobUnit::new(format!("{}_initial_spawn", config.name), vec![run0], tasks))?;

    info!("Built density workflow '{}' ({} units)", graph.name, graph.len());
    Ok(graph)
}

/// Optimize, then evaluate statically from the optimized geometry.
pub fn relax_static_workflow(structure: Structure, name: &str, settings: &RunSettings) -> Result<JobGraph> {
    let mut graph = JobGraph::new(name).with_settings(settings.clone());
    let opt = graph.add_unit(JobUnit::new(
        "optimize",
        vec![],
        vec![
            Task::WriteStructure { structure: Box::new(structure) },
            Task::RunSimulation { kind: SimulationKind::Optimize },
            Task::StoreResult { label: SimulationKind::Optimize.label().to_string() },
        ],
    ))?;
    graph.add_unit(JobUnit::new(
        "static",
        vec![opt],
        vec![
            Task::CopyOutputs {
                files: vec![
                    FileCopy::required(FINAL_GEOMETRY_FILE, INPUT_GEOMETRY_FILE),
                    FileCopy::optional("CHGCAR"),
                ],
            },
            Task::RunSimulation { kind: SimulationKind::Static },
            Task::StoreResult { label: SimulationKind::Static.label().to_string() },
        ],
    ))?;
    Ok(graph)
}

/// One independent relax/static graph per structure, named
/// `<name><reduced formula>_<index>`.
pub fn relax_static_workflows(structures: Vec<Structure>, name: &str, settings: &RunSettings) -> Result<Vec<JobGraph>> {
    structures
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let graph_name = format!("{}{}_{}", name, s.reduced_formula(), i);
            relax_static_workflow(s, &graph_name, settings)
        })
        .collect()
}

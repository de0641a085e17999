#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use nalgebra::Point3;

use density_finder::config::DensityConfig;
use density_finder::core::domain::{Lattice, Structure};
use density_finder::engine::simulator::{MdSimulator, SimulationKind, SimulationOutput, SimulationRequest};
use density_finder::io::poscar;

/// Stand-in engine with an equation of state `P(V) = bulk * (v0 - V) / v0`.
///
/// Copies `POSCAR` to `CONTCAR` unchanged and writes an OUTCAR whose first
/// half sits far from the equilibrium value, so only the trailing average
/// reports `P(V)` exactly.
pub struct MockSimulator {
    pub v0: f64,
    pub bulk: f64,
    pub steps: usize,
    pub calls: AtomicUsize,
}

impl MockSimulator {
    pub fn new(v0: f64, bulk: f64) -> Self {
        Self { v0, bulk, steps: 10, calls: AtomicUsize::new(0) }
    }

    pub fn pressure_at(&self, volume: f64) -> f64 {
        self.bulk * (self.v0 - volume) / self.v0
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MdSimulator for MockSimulator {
    fn run(&self, request: &SimulationRequest) -> Result<SimulationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let structure = poscar::read_poscar(&request.workdir.join("POSCAR"))?;
        let p = match request.kind {
            SimulationKind::MolecularDynamics { .. } => self.pressure_at(structure.volume()),
            _ => 0.0,
        };
        let head = self.steps / 2;
        let series: Vec<f64> = (0..self.steps)
            .map(|i| if i < head { p + 1000.0 } else { p })
            .collect();
        write_outcar(&request.workdir, &series);
        poscar::write_poscar(&structure, &request.workdir.join("CONTCAR"))?;
        fs::write(request.workdir.join("XDATCAR"), "")?;
        Ok(SimulationOutput {
            outcar: request.workdir.join("OUTCAR"),
            contcar: request.workdir.join("CONTCAR"),
        })
    }

    fn name(&self) -> &str {
        "Mock Simulator"
    }
}

/// Always fails, like an engine that crashed.
pub struct FailingSimulator;

impl MdSimulator for FailingSimulator {
    fn run(&self, _request: &SimulationRequest) -> Result<SimulationOutput> {
        bail!("engine exited with status 137")
    }

    fn name(&self) -> &str {
        "Failing Simulator"
    }
}

/// Exits cleanly but leaves no output behind.
pub struct SilentSimulator;

impl MdSimulator for SilentSimulator {
    fn run(&self, request: &SimulationRequest) -> Result<SimulationOutput> {
        Ok(SimulationOutput {
            outcar: request.workdir.join("OUTCAR"),
            contcar: request.workdir.join("CONTCAR"),
        })
    }

    fn name(&self) -> &str {
        "Silent Simulator"
    }
}

/// Li2O in a cube of the given edge (Å).
pub fn li2o_cube(edge: f64) -> Structure {
    let lattice = Lattice::cubic(edge).unwrap();
    let mut s = Structure::new("Li2O", vec!["Li".into(), "O".into()], lattice);
    s.push_fractional(0, Point3::new(0.25, 0.25, 0.25));
    s.push_fractional(0, Point3::new(0.75, 0.75, 0.75));
    s.push_fractional(1, Point3::new(0.0, 0.0, 0.0));
    s
}

pub fn write_seed(dir: &Path, edge: f64) -> PathBuf {
    let path = dir.join("seed.POSCAR");
    poscar::write_poscar(&li2o_cube(edge), &path).unwrap();
    path
}

pub fn write_outcar(dir: &Path, series: &[f64]) {
    let mut text = String::from(" vasp.6 mock\n");
    for p in series {
        text.push_str(&format!(
            "  external pressure = {:14.6} kB  Pullay stress =        0.00 kB\n",
            p
        ));
    }
    fs::write(dir.join("OUTCAR"), text).unwrap();
}

/// Config seeded from a structure file; everything else at its default.
pub fn base_config(seed: &Path) -> DensityConfig {
    DensityConfig {
        temperature: Some(300.0),
        structure: Some(seed.to_path_buf()),
        name: "chain".into(),
        ..Default::default()
    }
}

use std::path::Path;

use log::info;

use crate::core::domain::Structure;
use crate::error::{Result, WorkflowError};
use crate::io::xdatcar::{self, Trajectory};
use crate::workflow::builder::relax_static_workflows;
use crate::workflow::graph::JobGraph;
use crate::workflow::state::RunSettings;

pub const DEFAULT_SAMPLE_COUNT: usize = 10;
pub const DEFAULT_STEPS_SKIP_FIRST: usize = 1000;

/// Picks evenly spaced frames from the equilibrated part of a trajectory.
#[derive(Debug, Clone, Copy)]
pub struct StructureSampler {
    pub n: usize,
    pub steps_skip_first: usize,
}

impl Default for StructureSampler {
    fn default() -> Self {
        Self {
            n: DEFAULT_SAMPLE_COUNT,
            steps_skip_first: DEFAULT_STEPS_SKIP_FIRST,
        }
    }
}

impl StructureSampler {
    pub fn new(n: usize, steps_skip_first: usize) -> Self {
        Self { n, steps_skip_first }
    }

    /// Frame indices `skip + i * ((total - skip) / n)` for `i in 0..n`.
    pub fn sample_indices(&self, total: usize) -> Result<Vec<usize>> {
        if self.n == 0 {
            return Err(WorkflowError::config("sample count must be at least 1"));
        }
        if self.steps_skip_first >= total {
            return Err(WorkflowError::config(format!(
                "cannot skip {} of {} frames",
                self.steps_skip_first, total
            )));
        }
        let remaining = total - self.steps_skip_first;
        if remaining < self.n {
            return Err(WorkflowError::config(format!(
                "only {} frames remain after skipping; {} requested",
                remaining, self.n
            )));
        }
        let interval = remaining / self.n;
        Ok((0..self.n).map(|i| self.steps_skip_first + i * interval).collect())
    }

    pub fn sample(&self, trajectory: &Trajectory) -> Result<Vec<Structure>> {
        self.sample_indices(trajectory.len())?
            .into_iter()
            .map(|i| {
                trajectory.structure_at(i).ok_or_else(|| {
                    WorkflowError::invalid_geometry("XDATCAR", format!("frame {} is incomplete", i))
                })
            })
            .collect()
    }
}

/// Reads a trajectory and builds one independent optimize/static graph per
/// sampled frame.
pub fn structure_sampler_workflows(
    trajectory: &Path,
    sampler: StructureSampler,
    name: &str,
    settings: &RunSettings,
) -> Result<Vec<JobGraph>> {
    let traj = xdatcar::read_xdatcar(trajectory)?;
    let structures = sampler.sample(&traj)?;
    info!(
        "Sampled {} structures from {:?} ({} frames, skipping {})",
        structures.len(),
        trajectory,
        traj.len(),
        sampler.steps_skip_first
    );
    relax_static_workflows(structures, name, settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evenly_spaced_after_skip() {
        let idx = StructureSampler::new(10, 1000).sample_indices(5000).unwrap();
        assert_eq!(idx.len(), 10);
        assert_eq!(idx[0], 1000);
        assert_eq!(idx[1], 1400);
        assert_eq!(idx[9], 4600);
    }

    #[test]
    fn too_short_trajectories_fail() {
        assert!(StructureSampler::new(10, 1000).sample_indices(1000).is_err());
        assert!(StructureSampler::new(10, 995).sample_indices(1000).is_err());
        assert!(StructureSampler::new(0, 0).sample_indices(10).is_err());
    }
}

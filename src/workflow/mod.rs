use crate::workflow::executor::ChainOutcome;
use crate::workflow::graph::UnitStatus;
use crate::workflow::sink::CycleRecord;

/// Progress events streamed from executor threads to the main thread.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// Diagnostic log message.
    Log(String),

    /// A graph has been picked up by a worker.
    GraphStarted { chain: String, units: usize },

    UnitStarted { chain: String, unit: String },

    UnitFinished { chain: String, unit: String, status: UnitStatus },

    /// A pressure estimate became available (reported units).
    PressureSampled { chain: String, unit: String, pressure: f64 },

    /// The controller took a decision; one row of the convergence history.
    Decision(CycleRecord),

    /// The graph has settled.
    Finished { chain: String, outcome: ChainOutcome },
}

pub mod builder;
pub mod controller;
pub mod executor;
pub mod graph;
pub mod pressure;
pub mod rescale;
pub mod sampler;
pub mod sink;
pub mod state;

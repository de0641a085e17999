//! Density convergence for MD-driven structure generation.
//!
//! A chain runs molecular dynamics on a periodic cell, measures the average
//! pressure and dilates the cell until the pressure sits within a tolerance
//! of the target, appending one cycle to its own job graph per correction.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod interface;
pub mod io;
pub mod workflow;

//! Readers and writers for the engine's file formats.

pub mod outcar;
pub mod poscar;
pub mod xdatcar;

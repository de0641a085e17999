pub mod vasp;

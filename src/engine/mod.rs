pub mod external;
pub mod packing;
pub mod simulator;

pub mod logging;
pub mod state;
pub mod ui;

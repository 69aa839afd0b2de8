//! Application wiring

pub mod build;
pub mod options;
pub mod run;
pub mod state;

//! Build execution and deployment status

pub mod command;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod job;
pub mod log;

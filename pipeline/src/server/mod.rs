//! Dispatch HTTP API and shared server plumbing

pub mod handlers;
pub mod serve;
pub mod state;

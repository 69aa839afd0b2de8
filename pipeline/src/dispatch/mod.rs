//! Deployment dispatch

pub mod runner;
pub mod service;

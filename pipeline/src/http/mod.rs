//! Outbound HTTP clients

pub mod client;
pub mod tasks;

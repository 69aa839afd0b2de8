//! Background workers

pub mod relay;
pub mod status;

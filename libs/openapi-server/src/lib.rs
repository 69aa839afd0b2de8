//! Dispatch API models

pub mod models;

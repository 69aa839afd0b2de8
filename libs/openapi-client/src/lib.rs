//! Task runner API models

pub mod models;

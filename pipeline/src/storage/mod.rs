//! Settings, local records and artifact storage

pub mod blob;
pub mod layout;
pub mod records;
pub mod settings;

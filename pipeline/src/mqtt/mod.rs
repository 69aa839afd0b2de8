//! MQTT transport of the log bus

pub mod client;

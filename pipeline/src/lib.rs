//! shipit
//!
//! Deploy-from-source pipeline: dispatch builds, relay their logs in real
//! time and serve the produced assets by subdomain.

pub mod app;
pub mod bus;
pub mod deploy;
pub mod dispatch;
pub mod errors;
pub mod filesys;
pub mod gateway;
pub mod http;
pub mod ids;
pub mod logs;
pub mod models;
pub mod mqtt;
pub mod router;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;

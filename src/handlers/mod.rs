//! HTTP handlers

pub mod health;
pub mod telemetry;
pub mod export;
pub mod maintenance;

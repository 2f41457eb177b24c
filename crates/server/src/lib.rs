//! HTTP surface and wiring for the provisioning worker.

pub mod api;
pub mod metrics;
pub mod state;

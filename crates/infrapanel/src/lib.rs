//! Infrapanel daemon: wires configuration, logging, the lifecycle core and
//! the HTTP API together.

pub mod api;
pub mod cli;
pub mod panel;
pub mod telemetry;

pub use panel::Infrapanel;

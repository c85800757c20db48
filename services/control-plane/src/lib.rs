//! berth control plane library.
//!
//! The crate ships the `control-plane` binary; the library surface exists so
//! integration tests can assemble the service around test doubles.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod exec;
pub mod logs;
pub mod orchestrator;
pub mod reconciler;
pub mod runtime;
pub mod state;

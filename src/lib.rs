//! Per-device orchestration of scan, print and upload processes.
//!
//! [`Orchestrator`] is the entry point: it keeps at most one external
//! process per (device, operation kind), drives multi-page batch scans from
//! a shared timer, and publishes every outcome as a [`DeviceEvent`].

pub mod batch;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod print;
pub mod process;
pub mod simulation;
pub mod ui;
pub mod upload;

pub use config::DocflowConfig;
pub use error::{DocflowError, Result};
pub use events::DeviceEvent;
pub use orchestrator::Orchestrator;

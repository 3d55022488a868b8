//! Multi-page batch scanning: one session per device, advanced one page at
//! a time.

mod catalog;
mod controller;
mod session;

pub use catalog::{StaticTaskCatalog, TaskCatalog};
pub use controller::{BatchController, PageOutcome, Transition};
pub use session::{BatchId, BatchLabels, BatchReport, BatchSession, BatchStatus, PageRequest, slug};

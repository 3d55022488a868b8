//! Device-scoped events published by the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::batch::BatchId;
use crate::device::DeviceKind;
use crate::error::DocflowError;
use crate::print::QueuedJob;

/// Error payload shared between all subscribers of one event.
pub type SharedError = Arc<DocflowError>;

fn error_text<S: Serializer>(err: &SharedError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&err.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    DeviceDiscovered {
        device: String,
        kind: DeviceKind,
    },
    ScanStarted {
        device: String,
        /// Set for batch scans.
        batch: Option<BatchId>,
        total: u32,
    },
    ScanProgress {
        device: String,
        batch: BatchId,
        current: u32,
        total: u32,
        path: PathBuf,
    },
    ScanCompleted {
        device: String,
        path: PathBuf,
    },
    ScanError {
        device: String,
        batch: Option<BatchId>,
        #[serde(serialize_with = "error_text")]
        error: SharedError,
    },
    BatchScanCompleted {
        device: String,
        batch: BatchId,
        paths: Vec<PathBuf>,
    },
    PrintStarted {
        device: String,
        job_name: String,
    },
    PrintCompleted {
        device: String,
        job_name: String,
        job_id: Option<u32>,
    },
    /// Print and queue command failures; `job_name` is unset for queue
    /// commands.
    PrintError {
        device: String,
        job_name: Option<String>,
        #[serde(serialize_with = "error_text")]
        error: SharedError,
    },
    PrintJobsReceived {
        device: String,
        jobs: Vec<QueuedJob>,
    },
    PrintJobCancelled {
        device: String,
        job_id: u32,
    },
    PrinterPaused {
        device: String,
    },
    PrinterResumed {
        device: String,
    },
    UploadStarted {
        device: String,
        path: PathBuf,
    },
    UploadCompleted {
        device: String,
        path: PathBuf,
        url: String,
    },
    UploadError {
        device: String,
        path: PathBuf,
        #[serde(serialize_with = "error_text")]
        error: SharedError,
    },
}

impl DeviceEvent {
    pub fn device(&self) -> &str {
        match self {
            DeviceEvent::DeviceDiscovered { device, .. }
            | DeviceEvent::ScanStarted { device, .. }
            | DeviceEvent::ScanProgress { device, .. }
            | DeviceEvent::ScanCompleted { device, .. }
            | DeviceEvent::ScanError { device, .. }
            | DeviceEvent::BatchScanCompleted { device, .. }
            | DeviceEvent::PrintStarted { device, .. }
            | DeviceEvent::PrintCompleted { device, .. }
            | DeviceEvent::PrintError { device, .. }
            | DeviceEvent::PrintJobsReceived { device, .. }
            | DeviceEvent::PrintJobCancelled { device, .. }
            | DeviceEvent::PrinterPaused { device }
            | DeviceEvent::PrinterResumed { device }
            | DeviceEvent::UploadStarted { device, .. }
            | DeviceEvent::UploadCompleted { device, .. }
            | DeviceEvent::UploadError { device, .. } => device,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DeviceEvent::ScanError { .. } | DeviceEvent::PrintError { .. } | DeviceEvent::UploadError { .. }
        )
    }

    /// The error carried by an error event.
    pub fn error(&self) -> Option<&DocflowError> {
        match self {
            DeviceEvent::ScanError { error, .. }
            | DeviceEvent::PrintError { error, .. }
            | DeviceEvent::UploadError { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }
}

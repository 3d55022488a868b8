//! Translation of device settings into external command lines.
//!
//! Nothing here touches the filesystem or spawns anything; the output is an
//! [`Invocation`] the process pool hands to an executor.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::{MediaSize, PrintSettings, ScanSettings};
use crate::error::Result;
use crate::print::QueueAction;
use crate::process::OperationKind;

/// Fixed A4 scan area in millimetres.
const A4_WIDTH_MM: u32 = 210;
const A4_HEIGHT_MM: u32 = 297;

pub const UPLOAD_PATH: &str = "/system/file/upload";

/// CUPS queue administration programs.
pub const LIST_JOBS_PROGRAM: &str = "lpstat";
pub const CANCEL_JOB_PROGRAM: &str = "cancel";
pub const PAUSE_PROGRAM: &str = "cupsdisable";
pub const RESUME_PROGRAM: &str = "cupsenable";

/// A fully built external command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub kind: OperationKind,
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(kind: OperationKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
        }
    }

    /// Value following `flag`, if present.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Arguments for one `scanimage` capture into `output`.
pub fn build_scan_args(settings: &ScanSettings, device: &str, output: &Path) -> Result<Vec<String>> {
    settings.validate()?;
    let source = if settings.duplex { "ADF Duplex" } else { "ADF" };
    Ok(vec![
        "-d".into(),
        device.into(),
        "--mode".into(),
        settings.color_mode.to_string(),
        "-l".into(),
        "0".into(),
        "-t".into(),
        "0".into(),
        "-x".into(),
        A4_WIDTH_MM.to_string(),
        "-y".into(),
        A4_HEIGHT_MM.to_string(),
        "--resolution".into(),
        settings.dpi.to_string(),
        format!("--format={}", settings.format),
        "--source".into(),
        source.into(),
        "-o".into(),
        output.display().to_string(),
    ])
}

/// Arguments for one `lp` job sending `file` to `destination`.
pub fn build_print_args(
    settings: &PrintSettings,
    destination: &str,
    file: &Path,
) -> Result<Vec<String>> {
    settings.validate()?;
    let mut args = vec!["-d".to_string(), destination.to_string()];
    if settings.copies > 1 {
        args.push("-n".into());
        args.push(settings.copies.to_string());
    }
    args.push("-o".into());
    args.push(format!("media={}", settings.media));
    args.push("-o".into());
    args.push(format!("sides={}", settings.sides));
    // A3 only.
    if settings.media == MediaSize::A3 {
        args.push("-o".into());
        args.push("fit-to-page".into());
        args.push("-o".into());
        args.push("scaling=100".into());
    }
    args.push(file.display().to_string());
    Ok(args)
}

/// Queue command for `destination`. Cancellation names the job as
/// `<destination>-<id>` so it cannot hit another destination's job.
pub fn build_queue_invocation(action: QueueAction, destination: &str) -> Invocation {
    let (program, args) = match action {
        QueueAction::ListJobs => (LIST_JOBS_PROGRAM, vec!["-o".to_string(), destination.to_string()]),
        QueueAction::CancelJob(id) => (CANCEL_JOB_PROGRAM, vec![format!("{destination}-{id}")]),
        QueueAction::Pause => (PAUSE_PROGRAM, vec![destination.to_string()]),
        QueueAction::Resume => (RESUME_PROGRAM, vec![destination.to_string()]),
    };
    Invocation::new(OperationKind::Queue, program, args)
}

pub fn upload_endpoint(server: &str) -> String {
    format!("{}{UPLOAD_PATH}", server.trim_end_matches('/'))
}

/// Arguments for a multipart POST of `file` via curl.
pub fn build_upload_args(server: &str, file: &Path, parent: &str) -> Vec<String> {
    vec![
        "-sS".into(),
        "--fail".into(),
        "-X".into(),
        "POST".into(),
        "-F".into(),
        format!("parentPath={parent}"),
        "-F".into(),
        format!("file=@{}", file.display()),
        upload_endpoint(server),
    ]
}

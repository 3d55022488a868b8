//! External process lifecycle: one handle per (device, operation kind).

mod executor;
mod pool;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DocflowError;

pub use executor::{Executor, ProcessExecutor, terminate};
pub use pool::{Detached, ProcessPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Scan,
    Print,
    Upload,
    /// Print-queue administration: job listing, cancellation, pause and
    /// resume. Runs beside an in-flight print job.
    Queue,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Scan,
        OperationKind::Print,
        OperationKind::Upload,
        OperationKind::Queue,
    ];
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Scan => write!(f, "scan"),
            OperationKind::Print => write!(f, "print"),
            OperationKind::Upload => write!(f, "upload"),
            OperationKind::Queue => write!(f, "print queue"),
        }
    }
}

/// Identity of one registered handle. A released and re-acquired key gets a
/// new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    Idle,
    Running,
    Finished(Option<i32>),
    Errored(String),
}

impl HandleState {
    pub fn is_running(&self) -> bool {
        matches!(self, HandleState::Running)
    }
}

/// What an executor observed for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Exit notification for one launched operation. `tag` is whatever the
/// launcher attached, returned untouched.
#[derive(Debug)]
pub struct ProcessExit<T> {
    pub device: String,
    pub kind: OperationKind,
    pub handle: HandleId,
    pub program: String,
    pub tag: T,
    pub outcome: Result<ProcessOutput, DocflowError>,
}

impl<T> ProcessExit<T> {
    /// Collapses a non-zero exit into [`DocflowError::TransportError`].
    pub fn into_result(self) -> (T, Result<ProcessOutput, DocflowError>) {
        let program = self.program;
        let result = self.outcome.and_then(|out| {
            if out.is_success() {
                Ok(out)
            } else {
                Err(DocflowError::TransportError {
                    program,
                    code: out.exit_code,
                    stderr: out.stderr.trim().to_string(),
                })
            }
        });
        (self.tag, result)
    }
}

use std::path::PathBuf;

use thiserror::Error;

use crate::process::OperationKind;

pub type Result<T, E = DocflowError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DocflowError {
    #[error("{kind} already active on device {device}")]
    AlreadyActive { device: String, kind: OperationKind },

    #[error("upload already in flight on device {0}")]
    Busy(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("device {device} does not support {capability}")]
    Unsupported { device: String, capability: String },

    #[error("{program} exited with status {code:?}: {stderr}")]
    TransportError {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse response: {0}")]
    ParseError(String),

    #[error("process {pid} did not terminate within {grace_ms}ms")]
    Timeout { pid: u32, grace_ms: u64 },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("page {page} failed: {source}")]
    PageFailed {
        page: u32,
        #[source]
        source: Box<DocflowError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

// io::Error is not Clone; a clone keeps its kind and message.
impl Clone for DocflowError {
    fn clone(&self) -> Self {
        match self {
            Self::AlreadyActive { device, kind } => Self::AlreadyActive {
                device: device.clone(),
                kind: *kind,
            },
            Self::Busy(device) => Self::Busy(device.clone()),
            Self::FileNotFound(path) => Self::FileNotFound(path.clone()),
            Self::InvalidSettings(msg) => Self::InvalidSettings(msg.clone()),
            Self::Unsupported { device, capability } => Self::Unsupported {
                device: device.clone(),
                capability: capability.clone(),
            },
            Self::TransportError {
                program,
                code,
                stderr,
            } => Self::TransportError {
                program: program.clone(),
                code: *code,
                stderr: stderr.clone(),
            },
            Self::ParseError(msg) => Self::ParseError(msg.clone()),
            Self::Timeout { pid, grace_ms } => Self::Timeout {
                pid: *pid,
                grace_ms: *grace_ms,
            },
            Self::Launch { program, source } => Self::Launch {
                program: program.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::PageFailed { page, source } => Self::PageFailed {
                page: *page,
                source: source.clone(),
            },
            Self::Cancelled => Self::Cancelled,
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Toml(e) => Self::Toml(e.clone()),
        }
    }
}

impl DocflowError {
    /// True for errors raised before any external process was started.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DocflowError::AlreadyActive { .. }
                | DocflowError::Busy(_)
                | DocflowError::FileNotFound(_)
                | DocflowError::InvalidSettings(_)
                | DocflowError::Unsupported { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_active_display() {
        let err = DocflowError::AlreadyActive {
            device: "dev1".into(),
            kind: OperationKind::Scan,
        };
        assert_eq!(err.to_string(), "scan already active on device dev1");
    }

    #[test]
    fn transport_error_display() {
        let err = DocflowError::TransportError {
            program: "curl".into(),
            code: Some(7),
            stderr: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "curl exited with status Some(7): connection refused"
        );
    }

    #[test]
    fn page_failure_names_the_page() {
        let err = DocflowError::PageFailed {
            page: 2,
            source: Box::new(DocflowError::Cancelled),
        };
        assert_eq!(err.to_string(), "page 2 failed: operation cancelled");
        assert!(!err.is_rejection());
    }

    #[test]
    fn rejections_are_classified() {
        assert!(DocflowError::Busy("dev1".into()).is_rejection());
        assert!(DocflowError::FileNotFound("/tmp/x".into()).is_rejection());
        assert!(!DocflowError::Cancelled.is_rejection());
        assert!(!DocflowError::ParseError("no url".into()).is_rejection());
    }

    #[test]
    fn clone_keeps_io_message() {
        let err = DocflowError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let copy = err.clone();
        assert_eq!(copy.to_string(), err.to_string());
        assert!(matches!(copy, DocflowError::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DocflowError>();
    }
}

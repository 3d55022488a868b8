use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::ScanFormat;
use crate::error::{DocflowError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(String);

impl BatchId {
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(id[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a batch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Idle,
    Capturing,
    Completed,
    Failed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Idle => write!(f, "IDLE"),
            BatchStatus::Capturing => write!(f, "CAPTURING"),
            BatchStatus::Completed => write!(f, "COMPLETED"),
            BatchStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Exam/class/subject a batch belongs to; used to name its directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLabels {
    pub exam_type: String,
    pub class_name: String,
    pub subject: String,
}

impl BatchLabels {
    pub fn new(
        exam_type: impl Into<String>,
        class_name: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            exam_type: exam_type.into(),
            class_name: class_name.into(),
            subject: subject.into(),
        }
    }
}

/// One page the controller wants captured next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub device: String,
    pub batch: BatchId,
    pub page: u32,
    pub total: u32,
    pub path: PathBuf,
}

/// In-progress state of a multi-page scan on one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSession {
    pub id: BatchId,
    pub device: String,
    pub total_pages: u32,
    pub current_page: u32,
    pub collected_paths: Vec<PathBuf>,
    pub status: BatchStatus,
    pub labels: Option<BatchLabels>,
    pub output_dir: PathBuf,
    pub format: ScanFormat,
    /// Page whose capture has been launched and not yet reported.
    pub in_flight: Option<u32>,
    pub started_at: DateTime<Utc>,
}

impl BatchSession {
    /// New idle session. Its directory is private to this (device, batch)
    /// pair: `<root>/<device>/<labels>_<id>`.
    pub fn new(
        device: &str,
        total_pages: u32,
        labels: Option<BatchLabels>,
        root: &Path,
        format: ScanFormat,
    ) -> Result<Self> {
        if total_pages == 0 {
            return Err(DocflowError::InvalidSettings(
                "batch page count must be at least 1".into(),
            ));
        }
        let id = BatchId::new();
        let leaf = match &labels {
            Some(l) => format!(
                "{}_{}_{}_{id}",
                slug(&l.exam_type),
                slug(&l.class_name),
                slug(&l.subject)
            ),
            None => format!("batch_{id}"),
        };
        Ok(Self {
            output_dir: root.join(slug(device)).join(leaf),
            id,
            device: device.to_string(),
            total_pages,
            current_page: 0,
            collected_paths: Vec::new(),
            status: BatchStatus::Idle,
            labels,
            format,
            in_flight: None,
            started_at: Utc::now(),
        })
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.output_dir
            .join(format!("scan_{stamp}_page{page:03}.{}", self.format))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// `collected_paths.len() == current_page <= total_pages`.
    pub fn invariant_holds(&self) -> bool {
        self.current_page <= self.total_pages
            && (self.status != BatchStatus::Capturing
                || self.collected_paths.len() == self.current_page as usize)
    }
}

/// Summary produced when a batch finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub device: String,
    pub labels: Option<BatchLabels>,
    pub status: BatchStatus,
    pub pages: u32,
    pub paths: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl BatchReport {
    pub fn from_session(session: &BatchSession) -> Self {
        let now = Utc::now();
        Self {
            batch_id: session.id.clone(),
            device: session.device.clone(),
            labels: session.labels.clone(),
            status: session.status,
            pages: session.current_page,
            paths: session.collected_paths.clone(),
            output_dir: session.output_dir.clone(),
            started_at: session.started_at,
            completed_at: now,
            duration_ms: (now - session.started_at).num_milliseconds(),
        }
    }
}

/// Filesystem-safe rendering of a device name or label.
pub fn slug(s: &str) -> String {
    let out: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // "." and ".." would resolve outside the parent directory.
    if out.chars().all(|c| c == '.') {
        "_".repeat(out.len().max(1))
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_creation_defaults() {
        let s = BatchSession::new("dev1", 3, None, Path::new("/scans"), ScanFormat::Jpeg).unwrap();
        assert_eq!(s.status, BatchStatus::Idle);
        assert_eq!(s.current_page, 0);
        assert!(s.collected_paths.is_empty());
        assert!(s.in_flight.is_none());
        assert!(s.invariant_holds());
        assert_eq!(
            s.output_dir,
            PathBuf::from(format!("/scans/dev1/batch_{}", s.id))
        );
    }

    #[test]
    fn zero_pages_rejected() {
        let err = BatchSession::new("dev1", 0, None, Path::new("/scans"), ScanFormat::Jpeg)
            .unwrap_err();
        assert!(matches!(err, DocflowError::InvalidSettings(_)));
    }

    #[test]
    fn labelled_directory_is_per_device_and_batch() {
        let labels = BatchLabels::new("Midterm", "Class 3", "Math");
        let a = BatchSession::new("brother4:net1;dev0", 2, Some(labels.clone()), Path::new("out"), ScanFormat::Png)
            .unwrap();
        let b = BatchSession::new("other", 2, Some(labels), Path::new("out"), ScanFormat::Png).unwrap();

        assert_eq!(
            a.output_dir,
            PathBuf::from(format!("out/brother4_net1_dev0/Midterm_Class_3_Math_{}", a.id))
        );
        assert_ne!(a.output_dir, b.output_dir);
    }

    #[test]
    fn page_paths_are_numbered() {
        let s = BatchSession::new("dev1", 12, None, Path::new("/scans"), ScanFormat::Pdf).unwrap();
        let name = s.page_path(7).file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("scan_"));
        assert!(name.ends_with("_page007.pdf"));
    }

    #[test]
    fn batch_ids_are_short_and_distinct() {
        let a = BatchId::new();
        let b = BatchId::new();
        assert_eq!(a.as_str().len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn slug_replaces_separators() {
        assert_eq!(slug("a/b c:d"), "a_b_c_d");
        assert_eq!(slug(""), "_");
        assert_eq!(slug("."), "_");
        assert_eq!(slug(".."), "__");
        assert_eq!(slug("../x"), ".._x");
        assert_eq!(slug("mfc.local"), "mfc.local");
    }

    #[test]
    fn dot_device_names_stay_under_the_root() {
        let root = Path::new("/scans");
        for name in [".", ".."] {
            let s = BatchSession::new(name, 1, None, root, ScanFormat::Jpeg).unwrap();
            assert_eq!(s.output_dir.parent().unwrap().parent().unwrap(), root);
            assert!(s.output_dir.components().all(|c| c != std::path::Component::ParentDir));
        }
    }

    #[test]
    fn report_from_session() {
        let mut s = BatchSession::new("dev1", 1, None, Path::new("/scans"), ScanFormat::Jpeg).unwrap();
        s.current_page = 1;
        s.collected_paths.push(PathBuf::from("/scans/p1.jpeg"));
        s.status = BatchStatus::Completed;

        let report = BatchReport::from_session(&s);
        assert_eq!(report.batch_id, s.id);
        assert_eq!(report.pages, 1);
        assert_eq!(report.paths, vec![PathBuf::from("/scans/p1.jpeg")]);
        assert_eq!(report.status, BatchStatus::Completed);
        assert!(report.duration_ms >= 0);
    }
}

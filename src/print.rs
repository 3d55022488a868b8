use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::command::{Invocation, build_print_args};
use crate::device::PrintSettings;
use crate::error::{DocflowError, Result};
use crate::process::OperationKind;

// `lp` acknowledges with e.g. "request id is MFC-J3940DW-123 (1 file(s))".
static REQUEST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"request id is .+-(\d+)").expect("valid regex"));

/// Numeric job id from an `lp` acknowledgment.
pub fn parse_job_id(output: &str) -> Option<u32> {
    REQUEST_ID
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// `lpstat -o` lists one job per line: "<dest>-<id> <user> <size> <date>".
static QUEUE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)-(\d+)\s+(\S+)\s*(.*?)\s*$").expect("valid regex"));

/// A job waiting in a print queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedJob {
    pub id: u32,
    pub destination: String,
    pub user: String,
    /// Size and submission time, as the queue reports them.
    pub details: String,
}

/// Jobs listed by `lpstat -o`; lines that are not job entries are skipped.
pub fn parse_job_list(output: &str) -> Vec<QueuedJob> {
    output
        .lines()
        .filter_map(|line| {
            let caps = QUEUE_LINE.captures(line.trim())?;
            Some(QueuedJob {
                id: caps[2].parse().ok()?,
                destination: caps[1].to_string(),
                user: caps[3].to_string(),
                details: caps[4].to_string(),
            })
        })
        .collect()
}

/// Administrative command on one print destination's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    ListJobs,
    CancelJob(u32),
    Pause,
    Resume,
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueAction::ListJobs => write!(f, "list jobs"),
            QueueAction::CancelJob(id) => write!(f, "cancel job {id}"),
            QueueAction::Pause => write!(f, "pause"),
            QueueAction::Resume => write!(f, "resume"),
        }
    }
}

/// One print request on its way to the print program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub file: PathBuf,
    pub job_name: String,
}

impl PrintJob {
    /// Validates the request and builds its invocation.
    ///
    /// The job name defaults to the file name.
    pub fn prepare(
        program: &str,
        settings: &PrintSettings,
        destination: &str,
        file: &Path,
        job_name: Option<&str>,
    ) -> Result<(Self, Invocation)> {
        if !file.exists() {
            return Err(DocflowError::FileNotFound(file.to_path_buf()));
        }
        let args = build_print_args(settings, destination, file)?;
        let job_name = job_name
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            });
        let job = Self {
            file: file.to_path_buf(),
            job_name,
        };
        Ok((job, Invocation::new(OperationKind::Print, program, args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_from_lp_output() {
        assert_eq!(
            parse_job_id("request id is MFC-J3940DW-123 (1 file(s))\n"),
            Some(123)
        );
        assert_eq!(parse_job_id("request id is office-laser-7"), Some(7));
    }

    #[test]
    fn job_id_absent_when_output_has_none() {
        assert_eq!(parse_job_id(""), None);
        assert_eq!(parse_job_id("lp: Error - no default destination"), None);
    }

    #[test]
    fn job_list_from_lpstat_output() {
        let output = "MFC-J3940DW-12          alice            1024   Sat 17 Oct 2026 09:12:01\n\
                      MFC-J3940DW-13          bob              2048   Sat 17 Oct 2026 09:12:40\n";
        let jobs = parse_job_list(output);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, 12);
        assert_eq!(jobs[0].destination, "MFC-J3940DW");
        assert_eq!(jobs[0].user, "alice");
        assert_eq!(jobs[0].details, "1024   Sat 17 Oct 2026 09:12:01");
        assert_eq!(jobs[1].id, 13);
        assert_eq!(jobs[1].user, "bob");
    }

    #[test]
    fn job_list_skips_noise() {
        assert!(parse_job_list("").is_empty());
        assert!(parse_job_list("lpstat: No destinations added.\n").is_empty());
        let jobs = parse_job_list("\n  office-7 carol\n");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].destination, "office");
        assert_eq!(jobs[0].details, "");
    }

    #[test]
    fn prepare_requires_existing_file() {
        let err = PrintJob::prepare(
            "lp",
            &PrintSettings::default(),
            "mfc",
            Path::new("/definitely/not/here.pdf"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DocflowError::FileNotFound(_)));
    }

    #[test]
    fn prepare_defaults_job_name_to_file_name() {
        let file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        let (job, inv) =
            PrintJob::prepare("lp", &PrintSettings::default(), "mfc", file.path(), None).unwrap();
        let expected = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(job.job_name, expected);
        assert_eq!(inv.program, "lp");
        assert_eq!(inv.kind, OperationKind::Print);
        assert_eq!(inv.last_arg().unwrap(), file.path().display().to_string());

        let (named, _) =
            PrintJob::prepare("lp", &PrintSettings::default(), "mfc", file.path(), Some("answer sheets"))
                .unwrap();
        assert_eq!(named.job_name, "answer sheets");
    }
}

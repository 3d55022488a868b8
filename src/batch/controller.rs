use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::session::{BatchId, BatchLabels, BatchReport, BatchSession, BatchStatus, PageRequest};
use crate::device::ScanFormat;
use crate::error::{DocflowError, Result};
use crate::process::OperationKind;

/// What happened to one page capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Captured(PathBuf),
    Failed(String),
}

/// The result of recording a page outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Page stored; the session stays `Capturing` and waits for the next tick.
    Progress {
        batch: BatchId,
        current: u32,
        total: u32,
        path: PathBuf,
    },
    /// Last page stored; the session has been removed.
    Completed(BatchReport),
    /// A page failed; the session has been removed with its partial results.
    Failed {
        page: u32,
        reason: String,
        report: BatchReport,
    },
}

/// Drives one [`BatchSession`] per device.
///
/// - `start` creates a session, moves it to `Capturing` and hands back the
///   request for page 1.
/// - `next_request` hands out the following page once the previous one was
///   recorded, never two at once for a device.
/// - `record` applies a page outcome: success appends the path and either
///   stays `Capturing` or completes; failure ends the session.
#[derive(Debug, Default)]
pub struct BatchController {
    sessions: HashMap<String, BatchSession>,
}

impl BatchController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        device: &str,
        total_pages: u32,
        labels: Option<BatchLabels>,
        root: &Path,
        format: ScanFormat,
    ) -> Result<PageRequest> {
        if self.sessions.contains_key(device) {
            return Err(DocflowError::AlreadyActive {
                device: device.to_string(),
                kind: OperationKind::Scan,
            });
        }
        let mut session = BatchSession::new(device, total_pages, labels, root, format)?;
        session.status = BatchStatus::Capturing;
        let request = Self::issue(&mut session);
        self.sessions.insert(device.to_string(), session);
        Ok(request)
    }

    /// Request for the next page of `device`, if one is due.
    pub fn next_request(&mut self, device: &str) -> Option<PageRequest> {
        let session = self.sessions.get_mut(device)?;
        Self::is_due(session).then(|| Self::issue(session))
    }

    /// Devices whose session is waiting for its next page.
    pub fn due_devices(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| Self::is_due(s))
            .map(|s| s.device.clone())
            .collect()
    }

    /// Applies the outcome of `page` of `batch`.
    ///
    /// Returns `None` when the outcome belongs to a session that no longer
    /// exists (cancelled, or replaced by a newer batch) or to a page that was
    /// not in flight.
    pub fn record(
        &mut self,
        device: &str,
        batch: &BatchId,
        page: u32,
        outcome: PageOutcome,
    ) -> Option<Transition> {
        let session = self.sessions.get_mut(device)?;
        if &session.id != batch || session.in_flight != Some(page) {
            return None;
        }
        session.in_flight = None;

        let transition = match outcome {
            PageOutcome::Captured(path) => {
                session.collected_paths.push(path.clone());
                session.current_page += 1;
                if session.current_page == session.total_pages {
                    session.status = BatchStatus::Completed;
                    Transition::Completed(BatchReport::from_session(session))
                } else {
                    Transition::Progress {
                        batch: session.id.clone(),
                        current: session.current_page,
                        total: session.total_pages,
                        path,
                    }
                }
            }
            PageOutcome::Failed(reason) => {
                session.status = BatchStatus::Failed;
                Transition::Failed {
                    page,
                    reason,
                    report: BatchReport::from_session(session),
                }
            }
        };
        debug_assert!(session.invariant_holds());

        if session.is_terminal() {
            self.sessions.remove(device);
        }
        Some(transition)
    }

    /// Discards the session of `device` without completing it. Returns
    /// `None` if there was none.
    pub fn cancel(&mut self, device: &str) -> Option<BatchSession> {
        self.sessions.remove(device)
    }

    pub fn cancel_all(&mut self) -> Vec<BatchSession> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn session(&self, device: &str) -> Option<&BatchSession> {
        self.sessions.get(device)
    }

    pub fn is_active(&self, device: &str) -> bool {
        self.sessions.contains_key(device)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_due(session: &BatchSession) -> bool {
        session.status == BatchStatus::Capturing
            && session.in_flight.is_none()
            && session.current_page < session.total_pages
    }

    fn issue(session: &mut BatchSession) -> PageRequest {
        let page = session.current_page + 1;
        session.in_flight = Some(page);
        PageRequest {
            device: session.device.clone(),
            batch: session.id.clone(),
            page,
            total: session.total_pages,
            path: session.page_path(page),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(ctl: &mut BatchController, device: &str, pages: u32) -> PageRequest {
        ctl.start(device, pages, None, Path::new("/scans"), ScanFormat::Jpeg)
            .unwrap()
    }

    fn capture(ctl: &mut BatchController, req: &PageRequest) -> Transition {
        ctl.record(
            &req.device,
            &req.batch,
            req.page,
            PageOutcome::Captured(req.path.clone()),
        )
        .unwrap()
    }

    #[test]
    fn happy_path_walks_all_pages() {
        let mut ctl = BatchController::new();
        let first = start(&mut ctl, "dev1", 3);
        assert_eq!(first.page, 1);
        assert_eq!(ctl.session("dev1").unwrap().status, BatchStatus::Capturing);

        // Page 1 is in flight; nothing else is due yet.
        assert!(ctl.next_request("dev1").is_none());
        assert!(ctl.due_devices().is_empty());

        let mut seen = Vec::new();
        let mut req = first;
        loop {
            match capture(&mut ctl, &req) {
                Transition::Progress { current, total, .. } => {
                    seen.push((current, total));
                    let s = ctl.session("dev1").unwrap();
                    assert!(s.invariant_holds());
                    assert_eq!(ctl.due_devices(), vec!["dev1".to_string()]);
                    req = ctl.next_request("dev1").unwrap();
                }
                Transition::Completed(report) => {
                    assert_eq!(report.pages, 3);
                    assert_eq!(report.paths.len(), 3);
                    assert_eq!(report.status, BatchStatus::Completed);
                    break;
                }
                other => panic!("unexpected transition {other:?}"),
            }
        }
        assert_eq!(seen, vec![(1, 3), (2, 3)]);
        assert!(ctl.is_empty());
    }

    #[test]
    fn paths_are_kept_in_page_order() {
        let mut ctl = BatchController::new();
        let r1 = start(&mut ctl, "dev1", 2);
        capture(&mut ctl, &r1);
        let r2 = ctl.next_request("dev1").unwrap();
        let Transition::Completed(report) = capture(&mut ctl, &r2) else {
            panic!("expected completion");
        };
        assert_eq!(report.paths, vec![r1.path, r2.path]);
    }

    #[test]
    fn second_start_is_rejected() {
        let mut ctl = BatchController::new();
        start(&mut ctl, "dev1", 2);
        let err = ctl
            .start("dev1", 5, None, Path::new("/scans"), ScanFormat::Jpeg)
            .unwrap_err();
        assert!(matches!(err, DocflowError::AlreadyActive { kind: OperationKind::Scan, .. }));
        assert_eq!(ctl.session("dev1").unwrap().total_pages, 2);
    }

    #[test]
    fn page_failure_fails_the_batch() {
        let mut ctl = BatchController::new();
        let r1 = start(&mut ctl, "dev1", 3);
        capture(&mut ctl, &r1);
        let r2 = ctl.next_request("dev1").unwrap();

        let t = ctl
            .record("dev1", &r2.batch, 2, PageOutcome::Failed("paper jam".into()))
            .unwrap();
        match t {
            Transition::Failed { page, reason, report } => {
                assert_eq!(page, 2);
                assert_eq!(reason, "paper jam");
                assert_eq!(report.status, BatchStatus::Failed);
                assert_eq!(report.paths, vec![r1.path]);
            }
            other => panic!("unexpected transition {other:?}"),
        }
        assert!(!ctl.is_active("dev1"));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut ctl = BatchController::new();
        start(&mut ctl, "dev1", 3);
        assert!(ctl.cancel("dev1").is_some());
        assert!(ctl.cancel("dev1").is_none());
        assert!(ctl.cancel("never-started").is_none());
    }

    #[test]
    fn stale_outcomes_are_ignored() {
        let mut ctl = BatchController::new();
        let old = start(&mut ctl, "dev1", 2);
        ctl.cancel("dev1");
        let fresh = start(&mut ctl, "dev1", 2);

        assert!(ctl
            .record("dev1", &old.batch, 1, PageOutcome::Captured(old.path.clone()))
            .is_none());
        // Wrong page for the live batch.
        assert!(ctl
            .record("dev1", &fresh.batch, 2, PageOutcome::Captured(fresh.path.clone()))
            .is_none());
        assert_eq!(ctl.session("dev1").unwrap().current_page, 0);
    }

    #[test]
    fn devices_progress_independently() {
        let mut ctl = BatchController::new();
        let a = start(&mut ctl, "dev1", 2);
        let b = start(&mut ctl, "dev2", 2);
        assert_ne!(
            ctl.session("dev1").unwrap().output_dir,
            ctl.session("dev2").unwrap().output_dir
        );

        capture(&mut ctl, &a);
        assert_eq!(ctl.due_devices(), vec!["dev1".to_string()]);
        ctl.record("dev2", &b.batch, 1, PageOutcome::Failed("offline".into()));
        assert!(ctl.is_active("dev1"));
        assert!(!ctl.is_active("dev2"));
    }

    #[test]
    fn single_page_batch_completes_on_first_capture() {
        let mut ctl = BatchController::new();
        let r = start(&mut ctl, "dev1", 1);
        assert!(matches!(capture(&mut ctl, &r), Transition::Completed(_)));
    }

    #[test]
    fn cancel_all_drains_everything() {
        let mut ctl = BatchController::new();
        start(&mut ctl, "dev1", 2);
        start(&mut ctl, "dev2", 2);
        assert_eq!(ctl.cancel_all().len(), 2);
        assert_eq!(ctl.active_count(), 0);
    }
}

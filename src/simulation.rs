//! Delay-based stand-in for the external scan, print and upload programs.
//!
//! [`SimulatedExecutor`] answers an [`Invocation`] with the same artifacts
//! the real program would leave behind (an image file on disk, an `lp`
//! acknowledgment, an `lpstat -o` listing, an upload response body), so
//! everything downstream of the executor runs unchanged. [`ExecutorSet`]
//! picks real or simulated execution per operation kind.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{
    CANCEL_JOB_PROGRAM, Invocation, LIST_JOBS_PROGRAM, PAUSE_PROGRAM, RESUME_PROGRAM, UPLOAD_PATH,
};
use crate::config::SimulationConfig;
use crate::error::{DocflowError, Result};
use crate::process::{Executor, OperationKind, ProcessExecutor, ProcessOutput};

const PLACEHOLDER_PAGE: &[u8] = b"docflow simulated page\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePlan {
    Never,
    /// 1-based call number that fails.
    OnCall(usize),
    Always,
}

/// Jobs held by paused destinations. Jobs sent to an active destination
/// print at once and never show up in a listing.
#[derive(Debug, Default)]
struct SimulatedQueue {
    held: BTreeMap<u32, String>,
    paused: HashSet<String>,
}

#[derive(Debug)]
pub struct SimulatedExecutor {
    delay: Duration,
    failure: FailurePlan,
    calls: AtomicUsize,
    next_job: AtomicU32,
    queue: Mutex<SimulatedQueue>,
}

impl SimulatedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failure: FailurePlan::Never,
            calls: AtomicUsize::new(0),
            next_job: AtomicU32::new(1000),
            queue: Mutex::new(SimulatedQueue::default()),
        }
    }

    /// Makes the `n`-th invocation (1-based) exit non-zero.
    pub fn fail_on_call(mut self, n: usize) -> Self {
        self.failure = FailurePlan::OnCall(n);
        self
    }

    pub fn always_fail(mut self) -> Self {
        self.failure = FailurePlan::Always;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fails(&self, call: usize) -> bool {
        match self.failure {
            FailurePlan::Never => false,
            FailurePlan::OnCall(n) => n == call,
            FailurePlan::Always => true,
        }
    }

    async fn scan(&self, invocation: &Invocation) -> ProcessOutput {
        let Some(output) = invocation.arg_after("-o") else {
            return ProcessOutput::failure(1, "scanimage: no output file given");
        };
        let path = Path::new(output);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ProcessOutput::failure(1, format!("scanimage: {e}"));
        }
        match tokio::fs::write(path, PLACEHOLDER_PAGE).await {
            Ok(()) => ProcessOutput::success(""),
            Err(e) => ProcessOutput::failure(1, format!("scanimage: {e}")),
        }
    }

    fn print(&self, invocation: &Invocation) -> ProcessOutput {
        let destination = invocation.arg_after("-d").unwrap_or("printer");
        let job = self.next_job.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.paused.contains(destination) {
            queue.held.insert(job, destination.to_string());
        }
        ProcessOutput::success(format!("request id is {destination}-{job} (1 file(s))\n"))
    }

    fn queue(&self, invocation: &Invocation) -> ProcessOutput {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let target = invocation.last_arg().unwrap_or_default().to_string();
        match invocation.program.as_str() {
            LIST_JOBS_PROGRAM => {
                let listing: String = queue
                    .held
                    .iter()
                    .filter(|(_, dest)| **dest == target)
                    .map(|(id, dest)| format!("{dest}-{id}  docflow  1024  held\n"))
                    .collect();
                ProcessOutput::success(listing)
            }
            CANCEL_JOB_PROGRAM => {
                let job = target
                    .rsplit_once('-')
                    .and_then(|(dest, id)| Some((dest, id.parse::<u32>().ok()?)));
                match job {
                    Some((dest, id)) if queue.held.get(&id).is_some_and(|d| d == dest) => {
                        queue.held.remove(&id);
                        ProcessOutput::success("")
                    }
                    _ => ProcessOutput::failure(1, format!("cancel: {target} does not exist")),
                }
            }
            PAUSE_PROGRAM => {
                queue.paused.insert(target);
                ProcessOutput::success("")
            }
            RESUME_PROGRAM => {
                queue.held.retain(|_, dest| *dest != target);
                queue.paused.remove(&target);
                ProcessOutput::success("")
            }
            other => ProcessOutput::failure(127, format!("{other}: command not found")),
        }
    }

    fn upload(&self, invocation: &Invocation) -> ProcessOutput {
        let name = invocation
            .args
            .iter()
            .find_map(|a| a.strip_prefix("file=@"))
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let server = invocation
            .last_arg()
            .and_then(|url| url.strip_suffix(UPLOAD_PATH))
            .unwrap_or("http://localhost");
        ProcessOutput::success(format!(
            r#"{{"code":200,"msg":"ok","data":{{"url":"{server}/files/{name}"}}}}"#
        ))
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn run(&self, invocation: &Invocation, cancel: CancellationToken) -> Result<ProcessOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(call, command = %invocation, "simulating");

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return Err(DocflowError::Cancelled),
        }

        if self.fails(call) {
            return Ok(ProcessOutput::failure(
                1,
                format!("simulated {} failure on call {call}", invocation.kind),
            ));
        }

        Ok(match invocation.kind {
            OperationKind::Scan => self.scan(invocation).await,
            OperationKind::Print => self.print(invocation),
            OperationKind::Upload => self.upload(invocation),
            OperationKind::Queue => self.queue(invocation),
        })
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// One executor per operation kind, chosen at construction.
#[derive(Clone)]
pub struct ExecutorSet {
    scan: Arc<dyn Executor>,
    print: Arc<dyn Executor>,
    upload: Arc<dyn Executor>,
    queue: Arc<dyn Executor>,
}

impl ExecutorSet {
    pub fn real(grace: Duration) -> Self {
        let exec: Arc<dyn Executor> = Arc::new(ProcessExecutor::new(grace));
        Self {
            scan: Arc::clone(&exec),
            print: Arc::clone(&exec),
            upload: Arc::clone(&exec),
            queue: exec,
        }
    }

    pub fn simulated(delay: Duration) -> Self {
        Self::real(Duration::ZERO)
            .with(OperationKind::Scan, Arc::new(SimulatedExecutor::new(delay)))
            .with(OperationKind::Upload, Arc::new(SimulatedExecutor::new(delay)))
            .with_printer(Arc::new(SimulatedExecutor::new(delay)))
    }

    /// Real executors except where `toggles` asks for simulation.
    pub fn from_config(toggles: &SimulationConfig, grace: Duration) -> Self {
        let delay = Duration::from_millis(toggles.delay_ms);
        let mut set = Self::real(grace);
        for kind in [OperationKind::Scan, OperationKind::Upload] {
            if toggles.enabled(kind) {
                set = set.with(kind, Arc::new(SimulatedExecutor::new(delay)));
            }
        }
        if toggles.enabled(OperationKind::Print) {
            set = set.with_printer(Arc::new(SimulatedExecutor::new(delay)));
        }
        set
    }

    pub fn with(mut self, kind: OperationKind, executor: Arc<dyn Executor>) -> Self {
        match kind {
            OperationKind::Scan => self.scan = executor,
            OperationKind::Print => self.print = executor,
            OperationKind::Upload => self.upload = executor,
            OperationKind::Queue => self.queue = executor,
        }
        self
    }

    /// Uses `executor` for both job submission and queue commands, so the
    /// queue sees the jobs it accepted.
    pub fn with_printer(self, executor: Arc<dyn Executor>) -> Self {
        self.with(OperationKind::Print, Arc::clone(&executor))
            .with(OperationKind::Queue, executor)
    }

    pub fn for_kind(&self, kind: OperationKind) -> Arc<dyn Executor> {
        match kind {
            OperationKind::Scan => Arc::clone(&self.scan),
            OperationKind::Print => Arc::clone(&self.print),
            OperationKind::Upload => Arc::clone(&self.upload),
            OperationKind::Queue => Arc::clone(&self.queue),
        }
    }

    pub fn is_simulated(&self, kind: OperationKind) -> bool {
        self.for_kind(kind).is_simulated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{build_queue_invocation, build_upload_args};
    use crate::print::{QueueAction, parse_job_id, parse_job_list};
    use crate::upload::parse_url;
    use std::path::PathBuf;

    fn quick() -> SimulatedExecutor {
        SimulatedExecutor::new(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn simulated_scan_writes_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("page001.jpeg");
        let inv = Invocation::new(
            OperationKind::Scan,
            "scanimage",
            vec!["-o".into(), out.display().to_string()],
        );

        let result = quick().run(&inv, CancellationToken::new()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(std::fs::read(&out).unwrap(), PLACEHOLDER_PAGE);
    }

    #[tokio::test]
    async fn simulated_print_acknowledgment_parses() {
        let inv = Invocation::new(
            OperationKind::Print,
            "lp",
            vec!["-d".into(), "mfc".into(), "/tmp/a.pdf".into()],
        );
        let exec = quick();
        let first = exec.run(&inv, CancellationToken::new()).await.unwrap();
        let second = exec.run(&inv, CancellationToken::new()).await.unwrap();
        assert_eq!(parse_job_id(&first.stdout), Some(1000));
        assert_eq!(parse_job_id(&second.stdout), Some(1001));
    }

    #[tokio::test]
    async fn simulated_upload_response_carries_url() {
        let args = build_upload_args("http://files.test", &PathBuf::from("/tmp/x.jpg"), "/exam/");
        let inv = Invocation::new(OperationKind::Upload, "curl", args);
        let out = quick().run(&inv, CancellationToken::new()).await.unwrap();
        assert_eq!(parse_url(&out.stdout).unwrap(), "http://files.test/files/x.jpg");
    }

    #[tokio::test]
    async fn failure_injection_hits_only_the_chosen_call() {
        let exec = quick().fail_on_call(2);
        let inv = Invocation::new(OperationKind::Print, "lp", vec![]);
        let results: Vec<bool> = {
            let mut v = Vec::new();
            for _ in 0..3 {
                v.push(exec.run(&inv, CancellationToken::new()).await.unwrap().is_success());
            }
            v
        };
        assert_eq!(results, vec![true, false, true]);
        assert_eq!(exec.calls(), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_delay() {
        let exec = SimulatedExecutor::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let inv = Invocation::new(OperationKind::Scan, "scanimage", vec![]);
        let err = exec.run(&inv, cancel).await.unwrap_err();
        assert!(matches!(err, DocflowError::Cancelled));
    }

    #[test]
    fn executor_set_toggles_per_kind() {
        let toggles = SimulationConfig {
            scan: true,
            print: false,
            upload: true,
            delay_ms: 5,
        };
        let set = ExecutorSet::from_config(&toggles, Duration::from_secs(1));
        assert!(set.is_simulated(OperationKind::Scan));
        assert!(!set.is_simulated(OperationKind::Print));
        assert!(!set.is_simulated(OperationKind::Queue));
        assert!(set.is_simulated(OperationKind::Upload));

        let printing = SimulationConfig {
            print: true,
            ..SimulationConfig::default()
        };
        let set = ExecutorSet::from_config(&printing, Duration::from_secs(1));
        assert!(set.is_simulated(OperationKind::Queue));
    }

    async fn queue_cmd(exec: &SimulatedExecutor, action: QueueAction, dest: &str) -> ProcessOutput {
        let inv = build_queue_invocation(action, dest);
        exec.run(&inv, CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn paused_destination_holds_jobs_until_cancelled() {
        let exec = quick();
        let print = Invocation::new(
            OperationKind::Print,
            "lp",
            vec!["-d".into(), "mfc".into(), "/tmp/a.pdf".into()],
        );

        // Printed straight away while the destination is active.
        exec.run(&print, CancellationToken::new()).await.unwrap();
        assert!(parse_job_list(&queue_cmd(&exec, QueueAction::ListJobs, "mfc").await.stdout).is_empty());

        assert!(queue_cmd(&exec, QueueAction::Pause, "mfc").await.is_success());
        let ack = exec.run(&print, CancellationToken::new()).await.unwrap();
        let id = parse_job_id(&ack.stdout).unwrap();
        let jobs = parse_job_list(&queue_cmd(&exec, QueueAction::ListJobs, "mfc").await.stdout);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert!(parse_job_list(&queue_cmd(&exec, QueueAction::ListJobs, "other").await.stdout).is_empty());

        assert!(!queue_cmd(&exec, QueueAction::CancelJob(id), "other").await.is_success());
        assert!(queue_cmd(&exec, QueueAction::CancelJob(id), "mfc").await.is_success());
        assert!(!queue_cmd(&exec, QueueAction::CancelJob(id), "mfc").await.is_success());
        assert!(parse_job_list(&queue_cmd(&exec, QueueAction::ListJobs, "mfc").await.stdout).is_empty());
        assert!(queue_cmd(&exec, QueueAction::Resume, "mfc").await.is_success());
    }
}

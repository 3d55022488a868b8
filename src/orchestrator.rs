//! Facade that owns every per-device table and routes requests to the
//! process pool, the batch controller and the upload pipeline.
//!
//! All device state (registry, settings, batch sessions, the batch timer)
//! lives in one table behind one async mutex. Process exits come back on a
//! single dispatcher task, which takes the same lock before publishing, so
//! a request's "started" event always precedes its completion.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Local;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{
    BatchController, BatchId, BatchLabels, BatchSession, PageOutcome, PageRequest, TaskCatalog,
    Transition, slug,
};
use crate::command::{Invocation, build_queue_invocation, build_scan_args};
use crate::config::{DocflowConfig, ProgramConfig};
use crate::device::{
    Capability, DetectedDevice, DeviceCatalog, DeviceInfo, DeviceRegistry, DeviceSettings,
    DeviceStatus, ListingParser, PrintSettings, ScanSettings,
};
use crate::error::{DocflowError, Result};
use crate::events::{DeviceEvent, SharedError};
use crate::print::{PrintJob, QueueAction, parse_job_id, parse_job_list};
use crate::process::{HandleId, HandleState, OperationKind, ProcessExit, ProcessPool};
use crate::simulation::ExecutorSet;
use crate::upload::{UploadPipeline, UploadRecord};

/// Context carried by each launched process back to the dispatcher.
#[derive(Debug)]
enum Pending {
    Scan { path: PathBuf },
    BatchPage(PageRequest),
    Print(PrintJob),
    Queue(QueueAction),
    Upload(UploadRecord),
}

#[derive(Default)]
struct DeviceTable {
    registry: DeviceRegistry,
    settings: HashMap<String, DeviceSettings>,
    batches: BatchController,
    /// Shared batch timer; present only while some batch is active.
    ticker: Option<JoinHandle<()>>,
}

impl DeviceTable {
    fn settings_for(&self, device: &str) -> DeviceSettings {
        self.settings.get(device).cloned().unwrap_or_default()
    }
}

struct Inner {
    table: Mutex<DeviceTable>,
    pool: ProcessPool<Pending>,
    executors: ExecutorSet,
    programs: ProgramConfig,
    uploads: UploadPipeline,
    output_dir: PathBuf,
    batch_tick: Duration,
    events: broadcast::Sender<DeviceEvent>,
    stop: CancellationToken,
}

/// Entry point for every scan, print and upload request.
///
/// Cheap to clone; all clones drive the same devices. Must be created
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Real or simulated executors per kind, as `config.simulation` says.
    pub fn new(config: &DocflowConfig) -> Self {
        let executors = ExecutorSet::from_config(&config.simulation, config.terminate_grace());
        Self::with_executors(config, executors)
    }

    pub fn with_executors(config: &DocflowConfig, executors: ExecutorSet) -> Self {
        let (pool, exits) = ProcessPool::new(config.terminate_grace());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(Inner {
            table: Mutex::new(DeviceTable::default()),
            pool,
            executors,
            programs: config.programs.clone(),
            uploads: UploadPipeline::new(&config.programs.upload, &config.upload_server),
            output_dir: config.output_dir.clone(),
            batch_tick: config.batch_tick(),
            events,
            stop: CancellationToken::new(),
        });
        tokio::spawn(dispatch(Arc::downgrade(&inner), exits, inner.stop.clone()));
        Self { inner }
    }

    /// One receiver for every device's events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub fn upload_server(&self) -> &str {
        self.inner.uploads.server()
    }

    pub fn is_simulated(&self, kind: OperationKind) -> bool {
        self.inner.executors.is_simulated(kind)
    }

    // --- devices and settings ---

    /// Adds `info` to the registry. Emits `DeviceDiscovered` and returns
    /// `true` the first time a name is seen.
    pub async fn register_device(&self, info: DeviceInfo) -> bool {
        let mut table = self.inner.table.lock().await;
        let (device, kind) = (info.name.clone(), info.kind);
        let added = table.registry.register(info);
        if added {
            info!(%device, %kind, "device registered");
            self.inner.emit(DeviceEvent::DeviceDiscovered { device, kind });
        }
        added
    }

    /// Registers every device `parser` finds in `listing`; returns the
    /// newly registered ones.
    pub async fn ingest_listing(
        &self,
        parser: &dyn ListingParser,
        listing: &str,
    ) -> Vec<DetectedDevice> {
        let mut added = Vec::new();
        for detected in parser.parse(listing) {
            debug!(device = %detected.name, confidence = ?detected.confidence, "listing entry");
            if self.register_device(detected.clone().into_info()).await {
                added.push(detected);
            }
        }
        added
    }

    pub async fn devices(&self) -> Vec<DeviceInfo> {
        let table = self.inner.table.lock().await;
        table.registry.iter().cloned().collect()
    }

    /// `Busy` while any process runs on the device, else what the registry
    /// knows.
    pub async fn device_status(&self, device: &str) -> DeviceStatus {
        let table = self.inner.table.lock().await;
        if self.inner.pool.device_busy(device).await {
            DeviceStatus::Busy
        } else {
            table.registry.status_of(device)
        }
    }

    pub async fn handle_state(&self, device: &str, kind: OperationKind) -> Option<HandleState> {
        self.inner.pool.state(device, kind).await
    }

    pub async fn settings(&self, device: &str) -> DeviceSettings {
        self.inner.table.lock().await.settings_for(device)
    }

    pub async fn configure_scan(&self, device: &str, settings: ScanSettings) -> Result<()> {
        settings.validate()?;
        let mut table = self.inner.table.lock().await;
        table.settings.entry(device.to_string()).or_default().scan = settings;
        Ok(())
    }

    pub async fn configure_print(&self, device: &str, settings: PrintSettings) -> Result<()> {
        settings.validate()?;
        let mut table = self.inner.table.lock().await;
        table.settings.entry(device.to_string()).or_default().print = settings;
        Ok(())
    }

    /// Applies flat `scan_*`/`print_*` keys; nothing changes on error.
    pub async fn apply_settings_map(
        &self,
        device: &str,
        map: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut table = self.inner.table.lock().await;
        let mut settings = table.settings_for(device);
        settings.apply_map(map)?;
        table.settings.insert(device.to_string(), settings);
        Ok(())
    }

    // --- scanning ---

    /// Captures one page. Returns the path the page will be written to;
    /// completion arrives as `ScanCompleted` or `ScanError`.
    pub async fn start_scan(&self, device: &str, output: Option<PathBuf>) -> Result<PathBuf> {
        let inner = &self.inner;
        let scan_error = |error: SharedError| DeviceEvent::ScanError {
            device: device.to_string(),
            batch: None,
            error,
        };

        let table = inner.table.lock().await;
        if let Err(e) = check_capability(&table.registry, device, Capability::Scan) {
            return inner.fail(e, scan_error);
        }
        if table.batches.is_active(device) {
            let e = DocflowError::AlreadyActive {
                device: device.to_string(),
                kind: OperationKind::Scan,
            };
            return inner.fail(e, scan_error);
        }

        let settings = table.settings_for(device).scan;
        let path = output.unwrap_or_else(|| inner.single_scan_path(device, &settings));
        let tag = Pending::Scan { path: path.clone() };
        match inner.launch_scan(device, &settings, &path, tag).await {
            Ok(handle) => {
                info!(device = %device, %handle, path = %path.display(), "scan started");
                inner.emit(DeviceEvent::ScanStarted {
                    device: device.to_string(),
                    batch: None,
                    total: 1,
                });
                Ok(path)
            }
            Err(e) => inner.fail(e, scan_error),
        }
    }

    /// Starts a `pages`-page batch on `device`. Page 1 is requested
    /// immediately; each later page is requested by the shared batch timer
    /// once the previous one has been captured.
    pub async fn start_batch_scan(
        &self,
        device: &str,
        pages: u32,
        labels: Option<BatchLabels>,
    ) -> Result<BatchId> {
        let inner = &self.inner;
        let scan_error = |error: SharedError| DeviceEvent::ScanError {
            device: device.to_string(),
            batch: None,
            error,
        };

        let mut table = inner.table.lock().await;
        if let Err(e) = check_capability(&table.registry, device, Capability::Scan) {
            return inner.fail(e, scan_error);
        }
        if inner.stop.is_cancelled() {
            return inner.fail(DocflowError::Cancelled, scan_error);
        }
        if inner.pool.is_running(device, OperationKind::Scan).await {
            let e = DocflowError::AlreadyActive {
                device: device.to_string(),
                kind: OperationKind::Scan,
            };
            return inner.fail(e, scan_error);
        }
        let settings = table.settings_for(device).scan;
        if let Err(e) = settings.validate() {
            return inner.fail(e, scan_error);
        }
        let request =
            match table
                .batches
                .start(device, pages, labels, &inner.output_dir, settings.format)
            {
                Ok(request) => request,
                Err(e) => return inner.fail(e, scan_error),
            };

        let batch = request.batch.clone();
        info!(device = %device, %batch, pages, "batch scan started");
        inner.emit(DeviceEvent::ScanStarted {
            device: device.to_string(),
            batch: Some(batch.clone()),
            total: pages,
        });
        Inner::ensure_ticker(inner, &mut table);
        inner.launch_page(&mut table, &settings, request).await;
        Ok(batch)
    }

    /// Resolves `task_id` to its labels and starts a batch for it.
    pub async fn start_batch_scan_for_task(
        &self,
        device: &str,
        catalog: &dyn TaskCatalog,
        task_id: &str,
        pages: u32,
    ) -> Result<BatchId> {
        match catalog.labels_for(task_id) {
            Some(labels) => self.start_batch_scan(device, pages, Some(labels)).await,
            None => {
                let e = DocflowError::InvalidSettings(format!("unknown task {task_id}"));
                self.inner.fail(e, |error| DeviceEvent::ScanError {
                    device: device.to_string(),
                    batch: None,
                    error,
                })
            }
        }
    }

    /// Abandons the batch on `device` and stops its capture. Returns `false`
    /// if no batch was active.
    pub async fn cancel_batch(&self, device: &str) -> bool {
        let (session, capture) = {
            let mut table = self.inner.table.lock().await;
            let Some(session) = table.batches.cancel(device) else {
                return false;
            };
            // A batch started after the lock is dropped gets a fresh handle.
            let capture = self.inner.pool.detach(device, OperationKind::Scan).await;
            (session, capture)
        };
        if let Some(capture) = capture {
            capture.stop().await;
        }
        info!(device = %device, batch = %session.id, captured = session.current_page, "batch scan cancelled");
        true
    }

    /// Stops the `kind` operation on `device`; stopping scans also abandons
    /// an active batch. The stopped process reports nothing. Returns `false`
    /// if nothing was running.
    pub async fn stop(&self, device: &str, kind: OperationKind) -> bool {
        let (session, process) = {
            let mut table = self.inner.table.lock().await;
            let session = match kind {
                OperationKind::Scan => table.batches.cancel(device),
                _ => None,
            };
            (session, self.inner.pool.detach(device, kind).await)
        };
        let was_running = process.as_ref().is_some_and(|p| p.was_running());
        if let Some(process) = process {
            process.stop().await;
        }
        if let Some(session) = &session {
            info!(device = %device, batch = %session.id, captured = session.current_page, "batch scan cancelled");
        }
        if was_running {
            info!(device = %device, %kind, "stopped");
        }
        was_running || session.is_some()
    }

    pub async fn batch_session(&self, device: &str) -> Option<BatchSession> {
        let table = self.inner.table.lock().await;
        table.batches.session(device).cloned()
    }

    // --- printing and uploading ---

    /// Sends `file` to the print destination named `device`. Returns the
    /// job name used.
    pub async fn print_file(
        &self,
        device: &str,
        file: &Path,
        job_name: Option<&str>,
    ) -> Result<String> {
        let inner = &self.inner;
        let print_error = |error: SharedError| DeviceEvent::PrintError {
            device: device.to_string(),
            job_name: job_name.map(str::to_string),
            error,
        };

        let table = inner.table.lock().await;
        if let Err(e) = check_capability(&table.registry, device, Capability::Print) {
            return inner.fail(e, print_error);
        }
        let settings = table.settings_for(device).print;
        let (job, invocation) =
            match PrintJob::prepare(&inner.programs.print, &settings, device, file, job_name) {
                Ok(prepared) => prepared,
                Err(e) => return inner.fail(e, print_error),
            };

        let name = job.job_name.clone();
        match inner.launch(device, invocation, Pending::Print(job)).await {
            Ok(handle) => {
                info!(device = %device, %handle, job = %name, "print started");
                inner.emit(DeviceEvent::PrintStarted {
                    device: device.to_string(),
                    job_name: name.clone(),
                });
                Ok(name)
            }
            Err(e) => inner.fail(e, print_error),
        }
    }

    /// Lists the jobs queued on the print destination `device`; the result
    /// arrives as `PrintJobsReceived`.
    pub async fn list_print_jobs(&self, device: &str) -> Result<()> {
        self.queue_command(device, QueueAction::ListJobs).await
    }

    /// Removes job `job_id` from `device`'s queue; `PrintJobCancelled`
    /// follows.
    pub async fn cancel_print_job(&self, device: &str, job_id: u32) -> Result<()> {
        self.queue_command(device, QueueAction::CancelJob(job_id)).await
    }

    /// Holds new jobs on `device` until resumed.
    pub async fn pause_printer(&self, device: &str) -> Result<()> {
        self.queue_command(device, QueueAction::Pause).await
    }

    pub async fn resume_printer(&self, device: &str) -> Result<()> {
        self.queue_command(device, QueueAction::Resume).await
    }

    async fn queue_command(&self, device: &str, action: QueueAction) -> Result<()> {
        let inner = &self.inner;
        let print_error = |error: SharedError| DeviceEvent::PrintError {
            device: device.to_string(),
            job_name: None,
            error,
        };

        let table = inner.table.lock().await;
        if let Err(e) = check_capability(&table.registry, device, Capability::Print) {
            return inner.fail(e, print_error);
        }
        let invocation = build_queue_invocation(action, device);
        match inner.launch(device, invocation, Pending::Queue(action)).await {
            Ok(handle) => {
                debug!(device = %device, %handle, %action, "print queue command started");
                Ok(())
            }
            Err(e) => inner.fail(e, print_error),
        }
    }

    /// Uploads `file` under `parent` on the remote store. A second upload
    /// on the same device while one is in flight fails with `Busy`.
    pub async fn upload_file(&self, device: &str, file: &Path, parent: &str) -> Result<()> {
        let inner = &self.inner;
        let upload_error = |error: SharedError| DeviceEvent::UploadError {
            device: device.to_string(),
            path: file.to_path_buf(),
            error,
        };

        let _table = inner.table.lock().await;
        let (record, invocation) = match inner.uploads.prepare(file, parent) {
            Ok(prepared) => prepared,
            Err(e) => return inner.fail(e, upload_error),
        };
        match inner.launch(device, invocation, Pending::Upload(record)).await {
            Ok(handle) => {
                info!(device = %device, %handle, file = %file.display(), parent, "upload started");
                inner.emit(DeviceEvent::UploadStarted {
                    device: device.to_string(),
                    path: file.to_path_buf(),
                });
                Ok(())
            }
            Err(DocflowError::AlreadyActive { .. }) => {
                inner.fail(DocflowError::Busy(device.to_string()), upload_error)
            }
            Err(e) => inner.fail(e, upload_error),
        }
    }

    // --- teardown ---

    /// Cancels every batch, releases every process handle and stops the
    /// timer and dispatcher. Later calls do nothing.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.stop.is_cancelled() {
            return;
        }
        inner.stop.cancel();

        let (cancelled, ticker) = {
            let mut table = inner.table.lock().await;
            (table.batches.cancel_all(), table.ticker.take())
        };
        if let Some(ticker) = ticker {
            ticker.abort();
        }
        let released = inner.pool.release_all().await;
        info!(batches = cancelled.len(), handles = released, "orchestrator shut down");
    }
}

impl Inner {
    fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Publishes a request-time error on the device and returns it.
    fn fail<T>(
        &self,
        error: DocflowError,
        event: impl FnOnce(SharedError) -> DeviceEvent,
    ) -> Result<T> {
        if error.is_rejection() {
            info!(error = %error, "request rejected");
        } else {
            warn!(error = %error, "request failed");
        }
        self.emit(event(Arc::new(error.clone())));
        Err(error)
    }

    async fn launch(&self, device: &str, invocation: Invocation, tag: Pending) -> Result<HandleId> {
        if self.stop.is_cancelled() {
            return Err(DocflowError::Cancelled);
        }
        let kind = invocation.kind;
        let executor = self.executors.for_kind(kind);
        self.pool.launch(device, kind, invocation, executor, tag).await
    }

    async fn launch_scan(
        &self,
        device: &str,
        settings: &ScanSettings,
        path: &Path,
        tag: Pending,
    ) -> Result<HandleId> {
        let args = build_scan_args(settings, device, path)?;
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let invocation = Invocation::new(OperationKind::Scan, &self.programs.scan, args);
        self.launch(device, invocation, tag).await
    }

    fn single_scan_path(&self, device: &str, settings: &ScanSettings) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        self.output_dir
            .join(slug(device))
            .join(format!("scan_{stamp}.{}", settings.format))
    }

    fn ensure_ticker(self: &Arc<Self>, table: &mut DeviceTable) {
        if table.ticker.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        debug!(period_ms = self.batch_tick.as_millis() as u64, "batch timer started");
        table.ticker = Some(tokio::spawn(run_ticker(Arc::downgrade(self), self.batch_tick)));
    }

    /// Requests the next page of `device`'s batch, if one is due.
    async fn advance_batch(&self, device: &str) {
        let mut table = self.table.lock().await;
        let Some(request) = table.batches.next_request(device) else {
            return;
        };
        let mut settings = table.settings_for(device).scan;
        if let Some(session) = table.batches.session(device) {
            settings.format = session.format;
        }
        debug!(device = %device, page = request.page, total = request.total, "capturing page");
        self.launch_page(&mut table, &settings, request).await;
    }

    async fn launch_page(&self, table: &mut DeviceTable, settings: &ScanSettings, request: PageRequest) {
        let tag = Pending::BatchPage(request.clone());
        if let Err(e) = self.launch_scan(&request.device, settings, &request.path, tag).await {
            warn!(device = %request.device, page = request.page, error = %e, "page launch failed");
            self.page_failed(table, &request, e);
        }
    }

    fn page_captured(&self, table: &mut DeviceTable, request: &PageRequest) {
        let outcome = PageOutcome::Captured(request.path.clone());
        match table.batches.record(&request.device, &request.batch, request.page, outcome) {
            Some(Transition::Progress {
                batch,
                current,
                total,
                path,
            }) => {
                debug!(device = %request.device, %batch, current, total, "page captured");
                self.emit(DeviceEvent::ScanProgress {
                    device: request.device.clone(),
                    batch,
                    current,
                    total,
                    path,
                });
            }
            Some(Transition::Completed(report)) => {
                self.emit(DeviceEvent::ScanProgress {
                    device: request.device.clone(),
                    batch: report.batch_id.clone(),
                    current: report.pages,
                    total: report.pages,
                    path: request.path.clone(),
                });
                info!(
                    device = %report.device,
                    batch = %report.batch_id,
                    pages = report.pages,
                    dir = %report.output_dir.display(),
                    duration_ms = report.duration_ms,
                    "batch scan completed"
                );
                self.emit(DeviceEvent::BatchScanCompleted {
                    device: report.device,
                    batch: report.batch_id,
                    paths: report.paths,
                });
            }
            _ => debug!(device = %request.device, batch = %request.batch, page = request.page, "stale page result dropped"),
        }
    }

    fn page_failed(&self, table: &mut DeviceTable, request: &PageRequest, error: DocflowError) {
        let outcome = PageOutcome::Failed(error.to_string());
        match table.batches.record(&request.device, &request.batch, request.page, outcome) {
            Some(Transition::Failed { page, report, .. }) => {
                warn!(
                    device = %report.device,
                    batch = %report.batch_id,
                    page,
                    captured = report.pages,
                    error = %error,
                    "batch scan failed"
                );
                self.emit(DeviceEvent::ScanError {
                    device: report.device,
                    batch: Some(report.batch_id),
                    error: Arc::new(DocflowError::PageFailed {
                        page,
                        source: Box::new(error),
                    }),
                });
            }
            _ => debug!(device = %request.device, batch = %request.batch, page = request.page, "stale page failure dropped"),
        }
    }

    async fn handle_exit(&self, exit: ProcessExit<Pending>) {
        let device = exit.device.clone();
        let (tag, result) = exit.into_result();
        let mut table = self.table.lock().await;

        match tag {
            Pending::Scan { path } => match result {
                Ok(_) => {
                    info!(device = %device, path = %path.display(), "scan completed");
                    self.emit(DeviceEvent::ScanCompleted { device, path });
                }
                Err(e) => {
                    warn!(device = %device, error = %e, "scan failed");
                    self.emit(DeviceEvent::ScanError {
                        device,
                        batch: None,
                        error: Arc::new(e),
                    });
                }
            },
            Pending::BatchPage(request) => match result {
                Ok(_) => self.page_captured(&mut table, &request),
                Err(e) => self.page_failed(&mut table, &request, e),
            },
            Pending::Print(job) => match result {
                Ok(output) => {
                    let job_id = parse_job_id(&output.stdout);
                    info!(device = %device, job = %job.job_name, ?job_id, "print completed");
                    self.emit(DeviceEvent::PrintCompleted {
                        device,
                        job_name: job.job_name,
                        job_id,
                    });
                }
                Err(e) => {
                    warn!(device = %device, job = %job.job_name, error = %e, "print failed");
                    self.emit(DeviceEvent::PrintError {
                        device,
                        job_name: Some(job.job_name),
                        error: Arc::new(e),
                    });
                }
            },
            Pending::Queue(action) => match result {
                Ok(output) => {
                    info!(device = %device, %action, "print queue command completed");
                    self.emit(match action {
                        QueueAction::ListJobs => DeviceEvent::PrintJobsReceived {
                            device,
                            jobs: parse_job_list(&output.stdout),
                        },
                        QueueAction::CancelJob(job_id) => DeviceEvent::PrintJobCancelled { device, job_id },
                        QueueAction::Pause => DeviceEvent::PrinterPaused { device },
                        QueueAction::Resume => DeviceEvent::PrinterResumed { device },
                    });
                }
                Err(e) => {
                    warn!(device = %device, %action, error = %e, "print queue command failed");
                    self.emit(DeviceEvent::PrintError {
                        device,
                        job_name: None,
                        error: Arc::new(e),
                    });
                }
            },
            Pending::Upload(record) => {
                let path = record.source_path.clone();
                match result.and_then(|output| self.uploads.complete(record, &output)) {
                    Ok(done) => {
                        let url = done.result_url.unwrap_or_default();
                        info!(device = %device, file = %path.display(), %url, "upload completed");
                        self.emit(DeviceEvent::UploadCompleted { device, path, url });
                    }
                    Err(e) => {
                        warn!(device = %device, file = %path.display(), error = %e, "upload failed");
                        self.emit(DeviceEvent::UploadError {
                            device,
                            path,
                            error: Arc::new(e),
                        });
                    }
                }
            }
        }
    }
}

/// Rejects devices the catalog knows to lack `capability`. Unknown devices
/// pass.
fn check_capability(catalog: &dyn DeviceCatalog, device: &str, capability: Capability) -> Result<()> {
    match catalog.lookup(device) {
        Some(info) if !info.capabilities.contains(&capability) => Err(DocflowError::Unsupported {
            device: device.to_string(),
            capability: capability.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Consumes process exits in arrival order.
async fn dispatch(
    inner: Weak<Inner>,
    mut exits: mpsc::UnboundedReceiver<ProcessExit<Pending>>,
    stop: CancellationToken,
) {
    loop {
        let exit = tokio::select! {
            _ = stop.cancelled() => break,
            exit = exits.recv() => match exit {
                Some(exit) => exit,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_exit(exit).await;
    }
    debug!("exit dispatcher stopped");
}

/// Shared batch timer. Each tick hands every due device to its own task so
/// a slow device never holds up the others; the timer ends itself once no
/// batch is active.
async fn run_ticker(inner: Weak<Inner>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let due = {
            let mut table = inner.table.lock().await;
            if table.batches.is_empty() {
                table.ticker = None;
                debug!("no active batches; batch timer stopped");
                return;
            }
            table.batches.due_devices()
        };
        for device in due {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move { inner.advance_batch(&device).await });
        }
    }
}

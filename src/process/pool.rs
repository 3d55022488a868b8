use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Executor, HandleId, HandleState, OperationKind, ProcessExit};
use crate::command::Invocation;
use crate::error::{DocflowError, Result};

type HandleKey = (String, OperationKind);

struct Entry {
    id: HandleId,
    state: HandleState,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Entry {
    fn idle(id: HandleId) -> Self {
        Self {
            id,
            state: HandleState::Idle,
            cancel: None,
            task: None,
        }
    }
}

/// Owns at most one live handle per (device, operation kind).
///
/// All map mutations go through one async mutex. Exits are reported on the
/// channel returned by [`ProcessPool::new`], once per launch, unless the
/// handle was released first.
pub struct ProcessPool<T> {
    handles: Arc<Mutex<HashMap<HandleKey, Entry>>>,
    next_id: AtomicU64,
    exits: mpsc::UnboundedSender<ProcessExit<T>>,
    grace: Duration,
}

impl<T: Send + 'static> ProcessPool<T> {
    /// Creates an empty pool and the receiving end of its exit channel.
    /// `grace` bounds how long a release waits for the executor to stop.
    pub fn new(grace: Duration) -> (Self, mpsc::UnboundedReceiver<ProcessExit<T>>) {
        let (exits, rx) = mpsc::unbounded_channel();
        let pool = Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            exits,
            grace,
        };
        (pool, rx)
    }

    /// Returns the handle for `(device, kind)`, registering an idle one if
    /// none exists.
    pub async fn acquire(&self, device: &str, kind: OperationKind) -> HandleId {
        let mut handles = self.handles.lock().await;
        handles
            .entry((device.to_string(), kind))
            .or_insert_with(|| Entry::idle(self.fresh_id()))
            .id
    }

    /// Current state, or `None` if the handle was never acquired or has
    /// been released.
    pub async fn state(&self, device: &str, kind: OperationKind) -> Option<HandleState> {
        let handles = self.handles.lock().await;
        handles
            .get(&(device.to_string(), kind))
            .map(|e| e.state.clone())
    }

    pub async fn is_running(&self, device: &str, kind: OperationKind) -> bool {
        self.state(device, kind)
            .await
            .is_some_and(|s| s.is_running())
    }

    /// True if any operation kind is running on `device`.
    pub async fn device_busy(&self, device: &str) -> bool {
        let handles = self.handles.lock().await;
        handles
            .iter()
            .any(|((d, _), e)| d == device && e.state.is_running())
    }

    /// Number of registered handles, idle or not.
    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Starts `invocation` on the handle for `(device, kind)`.
    ///
    /// Fails with [`DocflowError::AlreadyActive`] while that handle is
    /// running; the running process is left untouched.
    pub async fn launch(
        &self,
        device: &str,
        kind: OperationKind,
        invocation: Invocation,
        executor: Arc<dyn Executor>,
        tag: T,
    ) -> Result<HandleId> {
        let key = (device.to_string(), kind);
        let mut handles = self.handles.lock().await;
        let entry = handles
            .entry(key.clone())
            .or_insert_with(|| Entry::idle(self.fresh_id()));

        if entry.state.is_running() {
            return Err(DocflowError::AlreadyActive {
                device: device.to_string(),
                kind,
            });
        }

        let id = entry.id;
        let cancel = CancellationToken::new();
        entry.state = HandleState::Running;
        entry.cancel = Some(cancel.clone());
        debug!(device, %kind, handle = %id, command = %invocation, "launching");

        let task = tokio::spawn(run_to_exit(
            Arc::clone(&self.handles),
            self.exits.clone(),
            key,
            id,
            invocation,
            executor,
            cancel,
            tag,
        ));
        entry.task = Some(task);
        Ok(id)
    }

    /// Terminates and removes the handle for `(device, kind)`.
    ///
    /// Safe from any state; returns `false` if there was nothing to release.
    pub async fn release(&self, device: &str, kind: OperationKind) -> bool {
        match self.detach(device, kind).await {
            Some(detached) => {
                detached.stop().await;
                true
            }
            None => false,
        }
    }

    /// Removes the handle for `(device, kind)` without waiting for its
    /// process. The process can no longer report and a later launch gets a
    /// fresh handle; call [`Detached::stop`] to terminate it.
    pub async fn detach(&self, device: &str, kind: OperationKind) -> Option<Detached> {
        let entry = self.handles.lock().await.remove(&(device.to_string(), kind))?;
        Some(Detached {
            device: device.to_string(),
            kind,
            entry,
            bound: self.teardown_bound(),
        })
    }

    /// Releases every handle belonging to `device`.
    pub async fn release_device(&self, device: &str) -> usize {
        let entries: Vec<_> = {
            let mut handles = self.handles.lock().await;
            let keys: Vec<_> = handles.keys().filter(|(d, _)| d == device).cloned().collect();
            keys.into_iter()
                .filter_map(|k| handles.remove(&k).map(|e| (k, e)))
                .collect()
        };
        let count = entries.len();
        for ((d, kind), entry) in entries {
            teardown(&d, kind, entry, self.teardown_bound()).await;
        }
        count
    }

    /// Releases every handle in the pool.
    pub async fn release_all(&self) -> usize {
        let entries: Vec<_> = {
            let mut handles = self.handles.lock().await;
            handles.drain().collect()
        };
        let count = entries.len();
        for ((device, kind), entry) in entries {
            teardown(&device, kind, entry, self.teardown_bound()).await;
        }
        count
    }

    // The executor has its own grace period; allow it to finish that.
    fn teardown_bound(&self) -> Duration {
        self.grace + Duration::from_secs(1)
    }

    fn fresh_id(&self) -> HandleId {
        HandleId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// A handle already removed from its pool whose process may still be
/// running.
#[must_use = "the process keeps running until stopped"]
pub struct Detached {
    device: String,
    kind: OperationKind,
    entry: Entry,
    bound: Duration,
}

impl Detached {
    pub fn id(&self) -> HandleId {
        self.entry.id
    }

    /// Whether a process was still running when the handle was detached.
    pub fn was_running(&self) -> bool {
        self.entry.state.is_running()
    }

    /// Cancels the process and waits, bounded, for its task to end.
    pub async fn stop(self) {
        teardown(&self.device, self.kind, self.entry, self.bound).await;
    }
}

// Teardown never fails from the caller's point of view.
async fn teardown(device: &str, kind: OperationKind, entry: Entry, bound: Duration) {
    if let Some(cancel) = entry.cancel {
        cancel.cancel();
    }
    let Some(mut task) = entry.task else {
        return;
    };
    match tokio::time::timeout(bound, &mut task).await {
        Ok(Ok(())) => debug!(device, %kind, handle = %entry.id, "released"),
        Ok(Err(e)) => warn!(device, %kind, error = %e, "process task failed during release"),
        Err(_) => {
            warn!(device, %kind, handle = %entry.id, "process did not stop in time; aborting");
            task.abort();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_to_exit<T>(
    handles: Arc<Mutex<HashMap<HandleKey, Entry>>>,
    exits: mpsc::UnboundedSender<ProcessExit<T>>,
    key: HandleKey,
    id: HandleId,
    invocation: Invocation,
    executor: Arc<dyn Executor>,
    cancel: CancellationToken,
    tag: T,
) {
    let outcome = executor.run(&invocation, cancel).await;

    {
        let mut map = handles.lock().await;
        match map.get_mut(&key) {
            Some(entry) if entry.id == id => {
                entry.state = match &outcome {
                    Ok(out) => HandleState::Finished(out.exit_code),
                    Err(e) => HandleState::Errored(e.to_string()),
                };
                entry.cancel = None;
                entry.task = None;
            }
            _ => {
                debug!(device = %key.0, kind = %key.1, handle = %id, "exit after release; dropped");
                return;
            }
        }
    }

    let (device, kind) = key;
    let _ = exits.send(ProcessExit {
        device,
        kind,
        handle: id,
        program: invocation.program,
        tag,
        outcome,
    });
}

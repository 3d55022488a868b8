use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProcessOutput;
use crate::command::Invocation;
use crate::error::{DocflowError, Result};

/// Runs one invocation to completion.
///
/// Implementations must return promptly with [`DocflowError::Cancelled`]
/// once `cancel` fires, after tearing down whatever they started.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, invocation: &Invocation, cancel: CancellationToken) -> Result<ProcessOutput>;

    fn is_simulated(&self) -> bool {
        false
    }
}

/// Spawns real child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    grace: Duration,
}

impl ProcessExecutor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, invocation: &Invocation, cancel: CancellationToken) -> Result<ProcessOutput> {
        debug!(command = %invocation, "spawning");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DocflowError::Launch {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                if let Err(e) = terminate(&mut child, self.grace).await {
                    warn!(program = %invocation.program, error = %e, "forced kill");
                }
                return Err(DocflowError::Cancelled);
            }
        };

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
        })
    }
}

async fn read_all<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Asks `child` to exit, then kills it if it is still alive after `grace`.
///
/// Returns [`DocflowError::Timeout`] when the forced kill was needed; the
/// child is dead either way.
pub async fn terminate(child: &mut Child, grace: Duration) -> Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    request_exit(child, pid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => Ok(()),
        Err(_) => {
            child.kill().await?;
            Err(DocflowError::Timeout {
                pid,
                grace_ms: grace.as_millis() as u64,
            })
        }
    }
}

#[cfg(unix)]
fn request_exit(_child: &mut Child, pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child, _pid: u32) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::OperationKind;
    use std::time::Instant;

    fn sh(script: &str) -> Invocation {
        Invocation::new(
            OperationKind::Scan,
            "sh",
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let exec = ProcessExecutor::new(Duration::from_secs(1));
        let out = exec
            .run(&sh("echo hi; echo oops >&2; exit 3"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let exec = ProcessExecutor::new(Duration::from_secs(1));
        let inv = Invocation::new(OperationKind::Print, "docflow-no-such-program", vec![]);
        let err = exec.run(&inv, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DocflowError::Launch { .. }));
    }

    #[tokio::test]
    async fn cancellation_terminates_child() {
        let exec = ProcessExecutor::new(Duration::from_secs(2));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = exec.run(&sh("sleep 10"), cancel).await.unwrap_err();
        assert!(matches!(err, DocflowError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stubborn_child_is_killed_after_grace() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 5"])
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let result = terminate(&mut child, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(DocflowError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

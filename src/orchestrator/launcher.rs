//! Starting and stopping worker processes.
//!
//! The orchestrator only sees the [`WorkerLauncher`] and [`WorkerProcess`]
//! traits; [`ProcessLauncher`] is the real implementation that spawns
//! `<program> <args...> <port>` and streams its output line by line.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::WorkerConfig;
use crate::error::OrchestratorError;

/// One line of worker output, tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutput {
    Stdout(String),
    Stderr(String),
}

/// Handle to a running worker.
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// OS process id, if there is one.
    fn id(&self) -> Option<u32>;

    /// Stop the worker and wait until it has exited.
    async fn terminate(&mut self) -> Result<(), OrchestratorError>;
}

/// A freshly started worker and its output stream.
pub struct LaunchedWorker {
    pub process: Box<dyn WorkerProcess>,
    /// Closes once both stdout and stderr reach EOF.
    pub output: mpsc::UnboundedReceiver<WorkerOutput>,
}

/// Starts workers on a given port.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, port: u16) -> Result<LaunchedWorker, OrchestratorError>;
}

/// Spawns workers as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.program.clone(),
            vec![config.script.display().to_string()],
        )
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, port: u16) -> Result<LaunchedWorker, OrchestratorError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| OrchestratorError::SpawnFailed {
            port,
            reason: format!("failed to spawn {}: {}", self.program, e),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestratorError::SpawnFailed {
                port,
                reason: "failed to capture worker stdout".to_string(),
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| OrchestratorError::SpawnFailed {
                port,
                reason: "failed to capture worker stderr".to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, tx.clone(), WorkerOutput::Stdout));
        tokio::spawn(forward_lines(stderr, tx, WorkerOutput::Stderr));

        tracing::info!(port, pid = ?child.id(), program = %self.program, "Spawned worker");

        Ok(LaunchedWorker {
            process: Box::new(ChildProcess { child, port }),
            output: rx,
        })
    }
}

async fn forward_lines<R>(
    stream: R,
    tx: mpsc::UnboundedSender<WorkerOutput>,
    wrap: fn(String) -> WorkerOutput,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(wrap(line)).is_err() {
            break;
        }
    }
}

/// A worker running as a child of this process.
struct ChildProcess {
    child: Child,
    port: u16,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<(), OrchestratorError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!(port = self.port, %status, "Worker already exited");
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| OrchestratorError::TerminateFailed {
                reason: format!("worker on port {}: {}", self.port, e),
            })?;
        tracing::info!(port = self.port, "Worker exited");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn collect(rx: &mut mpsc::UnboundedReceiver<WorkerOutput>, n: usize) -> Vec<WorkerOutput> {
        let mut out = Vec::new();
        while out.len() < n {
            let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("worker output timed out");
            match next {
                Some(line) => out.push(line),
                None => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn passes_port_and_separates_streams() {
        let launcher = ProcessLauncher::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo \"listening on $1\"; echo 'SERVER READY'; echo boom >&2; sleep 30"
                    .to_string(),
                "worker".to_string(),
            ],
        );
        let mut worker = launcher.launch(9123).await.unwrap();
        assert!(worker.process.id().is_some());

        let lines = collect(&mut worker.output, 3).await;
        assert!(lines.contains(&WorkerOutput::Stdout("listening on 9123".into())));
        assert!(lines.contains(&WorkerOutput::Stdout("SERVER READY".into())));
        assert!(lines.contains(&WorkerOutput::Stderr("boom".into())));

        tokio::time::timeout(Duration::from_secs(5), worker.process.terminate())
            .await
            .expect("terminate hung")
            .unwrap();
    }

    #[tokio::test]
    async fn terminate_after_exit_is_ok() {
        let launcher = ProcessLauncher::new("sh", vec!["-c".into(), "exit 0".into()]);
        let mut worker = launcher.launch(9124).await.unwrap();
        // Output closes once the process is gone.
        assert!(collect(&mut worker.output, 1).await.is_empty());
        worker.process.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let launcher = ProcessLauncher::new("/definitely/not/a/worker", vec![]);
        let err = launcher.launch(9125).await.err().unwrap();
        assert!(matches!(err, OrchestratorError::SpawnFailed { port: 9125, .. }));
    }
}

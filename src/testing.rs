//! Test doubles for driving the orchestrator without real worker processes.
//!
//! [`ScriptedLauncher`] hands every launched worker to the test as a
//! [`FakeWorker`], which the test then uses to print output lines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::content::ContentWrite;
use crate::error::{OrchestratorError, WriteError};
use crate::orchestrator::{LaunchedWorker, WorkerLauncher, WorkerOutput, WorkerProcess};

/// Launcher whose workers are controlled by the test.
pub struct ScriptedLauncher {
    launched: mpsc::UnboundedSender<FakeWorker>,
    fail_next: AtomicBool,
}

impl ScriptedLauncher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeWorker>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(Self {
            launched: tx,
            fail_next: AtomicBool::new(false),
        });
        (launcher, rx)
    }

    /// Make the next `launch` call fail as if the program were missing.
    pub fn fail_next_launch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn launch(&self, port: u16) -> Result<LaunchedWorker, OrchestratorError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(OrchestratorError::SpawnFailed {
                port,
                reason: "scripted launch failure".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));
        let worker = FakeWorker {
            port,
            output: tx,
            terminated: Arc::clone(&terminated),
        };
        let _ = self.launched.send(worker);

        Ok(LaunchedWorker {
            process: Box::new(FakeProcess { terminated }),
            output: rx,
        })
    }
}

/// The test's side of a launched fake worker.
#[derive(Clone)]
pub struct FakeWorker {
    pub port: u16,
    output: mpsc::UnboundedSender<WorkerOutput>,
    terminated: Arc<AtomicBool>,
}

impl FakeWorker {
    pub fn stdout(&self, line: &str) {
        self.emit(WorkerOutput::Stdout(line.to_string()));
    }

    pub fn stderr(&self, line: &str) {
        self.emit(WorkerOutput::Stderr(line.to_string()));
    }

    pub fn ready(&self) {
        self.stdout("SERVER READY");
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn emit(&self, line: WorkerOutput) {
        // A dead process prints nothing.
        if !self.is_terminated() {
            let _ = self.output.send(line);
        }
    }
}

struct FakeProcess {
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self) -> Result<(), OrchestratorError> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared record of the order in which writes ran.
#[derive(Clone, Default)]
pub struct WriteLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl WriteLog {
    pub fn write(&self, label: impl Into<String>) -> RecordingWrite {
        RecordingWrite {
            label: label.into(),
            log: self.clone(),
            fail: None,
        }
    }

    pub fn failing_write(&self, label: impl Into<String>, message: &str) -> RecordingWrite {
        RecordingWrite {
            label: label.into(),
            log: self.clone(),
            fail: Some(message.to_string()),
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

/// A write that records its label and optionally fails.
pub struct RecordingWrite {
    label: String,
    log: WriteLog,
    fail: Option<String>,
}

#[async_trait]
impl ContentWrite for RecordingWrite {
    async fn apply(&self) -> Result<(), WriteError> {
        if let Ok(mut entries) = self.log.entries.lock() {
            entries.push(self.label.clone());
        }
        match self.fail {
            Some(ref message) => Err(WriteError::Write {
                path: self.label.clone().into(),
                source: std::io::Error::other(message.clone()),
            }),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        format!("record {}", self.label)
    }
}

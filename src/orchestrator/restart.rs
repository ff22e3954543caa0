//! The restart cycle state machine.
//!
//! ```text
//! Idle -> ApplyingWrites -> Spawning -> AwaitingSignal -> Swapping -> Idle
//!                                            |
//!                                            +-> Aborted -> Idle   (stderr / spawn failure)
//! ```
//!
//! All state lives in one event loop task. A cycle's side effects (writes,
//! terminating the previous process, spawning, reading output) run in a
//! per-cycle driver task that reports back as events tagged with the cycle
//! number. Events from a cycle that is no longer current are ignored.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::content::ContentWrite;
use crate::error::OrchestratorError;
use crate::orchestrator::job::{Completion, JobTarget, RestartJob};
use crate::orchestrator::launcher::{LaunchedWorker, WorkerLauncher, WorkerOutput, WorkerProcess};
use crate::orchestrator::pool::WorkerPool;
use crate::orchestrator::queue::RestartQueue;
use crate::orchestrator::signal::WorkerSignal;
use crate::registry::ArtifactRegistry;

/// Phase of the restart state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    ApplyingWrites,
    Spawning,
    AwaitingSignal,
    Swapping,
    Aborted,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ApplyingWrites => "applying_writes",
            Self::Spawning => "spawning",
            Self::AwaitingSignal => "awaiting_signal",
            Self::Swapping => "swapping",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Snapshot published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub state: CycleState,
    pub busy: bool,
    /// Jobs waiting for the next cycle.
    pub queued: usize,
    /// Number of the current (or most recent) cycle; 0 before the first.
    pub cycle: u64,
    pub active_port: u16,
}

enum Command {
    Submit {
        job: RestartJob,
        ack: oneshot::Sender<()>,
    },
    Subscribe(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
    Cycle {
        cycle: u64,
        event: CycleEvent,
    },
}

enum CycleEvent {
    WriteDone { index: usize, error: Option<String> },
    WritesApplied,
    PreviousExited,
    Spawned(Box<dyn WorkerProcess>),
    SpawnFailed(String),
    Output(WorkerOutput),
}

/// Handle to the orchestrator. Cheap to clone; every request handler gets one.
#[derive(Clone)]
pub struct RestartOrchestrator {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<OrchestratorStatus>,
    pool: Arc<WorkerPool>,
    registry: ArtifactRegistry,
}

impl RestartOrchestrator {
    /// Start the event loop on the current tokio runtime.
    pub fn start(
        pool: Arc<WorkerPool>,
        registry: ArtifactRegistry,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(OrchestratorStatus {
            state: CycleState::Idle,
            busy: false,
            queued: 0,
            cycle: 0,
            active_port: pool.active().port,
        });

        let machine = CycleMachine {
            pool: Arc::clone(&pool),
            registry: registry.clone(),
            launcher,
            events: tx.downgrade(),
            status: status_tx,
            state: CycleState::Idle,
            busy: false,
            queue: RestartQueue::default(),
            current: None,
            last_cycle: 0,
            subscribers: Vec::new(),
        };
        tokio::spawn(machine.run(rx));

        Self {
            tx,
            status: status_rx,
            pool,
            registry,
        }
    }

    /// Submit a job. The target is marked pending before this returns; the
    /// cycle outcome is only visible later through the registry.
    pub async fn submit(&self, job: RestartJob) -> Result<(), OrchestratorError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Submit { job, ack })
            .map_err(|_| OrchestratorError::Stopped)?;
        done.await.map_err(|_| OrchestratorError::Stopped)
    }

    /// Receive one notification when the next cycle completes successfully.
    pub fn subscribe(&self) -> Result<oneshot::Receiver<()>, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe(tx))
            .map_err(|_| OrchestratorError::Stopped)?;
        Ok(rx)
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<OrchestratorStatus> {
        self.status.clone()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Stop both workers and the event loop.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(tx))
            .map_err(|_| OrchestratorError::Stopped)?;
        rx.await.map_err(|_| OrchestratorError::Stopped)
    }
}

/// A batch of jobs being applied to the inactive worker.
struct Cycle {
    id: u64,
    slot: usize,
    port: u16,
    completions: Vec<Completion>,
    /// Worker-reported artifact errors, applied only if the cycle succeeds.
    deferred_errors: Vec<(JobTarget, String)>,
}

struct CycleMachine {
    pool: Arc<WorkerPool>,
    registry: ArtifactRegistry,
    launcher: Arc<dyn WorkerLauncher>,
    events: mpsc::WeakUnboundedSender<Command>,
    status: watch::Sender<OrchestratorStatus>,
    state: CycleState,
    busy: bool,
    queue: RestartQueue,
    current: Option<Cycle>,
    last_cycle: u64,
    subscribers: Vec<oneshot::Sender<()>>,
}

impl CycleMachine {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Submit { job, ack } => {
                    self.submit(job).await;
                    self.publish();
                    let _ = ack.send(());
                }
                Command::Subscribe(tx) => self.subscribers.push(tx),
                Command::Cycle { cycle, event } => {
                    self.on_cycle_event(cycle, event).await;
                    self.publish();
                }
                Command::Shutdown(done) => {
                    self.shutdown().await;
                    let _ = done.send(());
                    break;
                }
            }
        }
        tracing::debug!("Restart orchestrator stopped");
    }

    fn publish(&self) {
        self.status.send_replace(OrchestratorStatus {
            state: self.state,
            busy: self.busy,
            queued: self.queue.len(),
            cycle: self.last_cycle,
            active_port: self.pool.active().port,
        });
    }

    fn enter(&mut self, state: CycleState) {
        self.state = state;
        self.publish();
    }

    async fn submit(&mut self, job: RestartJob) {
        if let Some(ref target) = job.target {
            self.registry.mark_pending(target).await;
        }
        if self.busy {
            tracing::debug!(artifact = ?job.target, queued = self.queue.len() + 1, "Cycle running, queueing job");
            self.queue.push(job);
        } else {
            self.start_cycle(vec![job]).await;
        }
    }

    async fn start_cycle(&mut self, jobs: Vec<RestartJob>) {
        let Some(events) = self.events.upgrade() else {
            return;
        };

        self.busy = true;
        self.last_cycle += 1;
        let id = self.last_cycle;
        let target = self.pool.inactive();
        let previous = self.pool.take_process(target.slot).await;

        let (writes, completions): (Vec<_>, Vec<_>) = jobs.into_iter().map(RestartJob::split).unzip();
        tracing::info!(
            cycle = id,
            port = target.port,
            jobs = completions.len(),
            "Restarting inactive worker"
        );

        self.current = Some(Cycle {
            id,
            slot: target.slot,
            port: target.port,
            completions,
            deferred_errors: Vec::new(),
        });
        self.enter(CycleState::ApplyingWrites);

        tokio::spawn(drive_cycle(
            id,
            target.port,
            writes,
            previous,
            Arc::clone(&self.launcher),
            events,
        ));
    }

    async fn on_cycle_event(&mut self, id: u64, event: CycleEvent) {
        let Some(cycle) = self.current.as_mut().filter(|c| c.id == id) else {
            match event {
                CycleEvent::Spawned(mut process) => {
                    // Only reachable if the machine moved on before the
                    // spawn landed; never leave the process orphaned.
                    tokio::spawn(async move {
                        let _ = process.terminate().await;
                    });
                }
                CycleEvent::Output(line) => {
                    tracing::trace!(cycle = id, ?line, "Ignoring output from retired cycle");
                }
                _ => {}
            }
            return;
        };

        match event {
            CycleEvent::WriteDone { index, error } => {
                if let Some(message) = error {
                    let target = cycle.completions.get(index).and_then(|c| c.target.clone());
                    tracing::warn!(cycle = id, artifact = ?target, "Content write failed: {}", message);
                    if let Some(completion) = cycle.completions.get_mut(index) {
                        completion.fail(message);
                    }
                }
            }
            CycleEvent::WritesApplied => self.enter(CycleState::Spawning),
            CycleEvent::PreviousExited => {
                tracing::debug!(cycle = id, port = cycle.port, "Previous worker exited");
            }
            CycleEvent::Spawned(process) => {
                let slot = cycle.slot;
                if let Some(mut stray) = self.pool.install_process(slot, process).await {
                    let _ = stray.terminate().await;
                }
                self.enter(CycleState::AwaitingSignal);
            }
            CycleEvent::SpawnFailed(reason) => self.abort(&reason),
            CycleEvent::Output(WorkerOutput::Stderr(line)) => self.abort(&line),
            CycleEvent::Output(WorkerOutput::Stdout(line)) => match WorkerSignal::parse(&line) {
                WorkerSignal::Ready => self.complete().await,
                WorkerSignal::ArtifactError { target, message } => {
                    tracing::warn!(cycle = id, artifact = %target, "Worker reported error: {}", message);
                    if self.queue.targets(&target) {
                        tracing::debug!(artifact = %target, "Newer job queued, dropping stale error");
                    } else {
                        cycle.deferred_errors.push((target, message));
                    }
                }
                WorkerSignal::Log(line) => {
                    tracing::debug!(cycle = id, "worker: {}", line);
                }
            },
        }
    }

    async fn complete(&mut self) {
        let Some(cycle) = self.current.take() else {
            return;
        };
        self.enter(CycleState::Swapping);

        let Cycle {
            id,
            completions,
            deferred_errors,
            ..
        } = cycle;
        self.registry
            .apply(|set| {
                for completion in completions {
                    completion.resolve(set);
                }
                for (target, message) in deferred_errors {
                    set.mark_error(&target, message);
                }
            })
            .await;

        let active = self.pool.swap();
        tracing::info!(cycle = id, port = active.port, "Worker ready, traffic switched");

        for subscriber in self.subscribers.drain(..) {
            let _ = subscriber.send(());
        }

        self.busy = false;
        self.enter(CycleState::Idle);

        if !self.queue.is_empty() {
            let jobs = self.queue.drain();
            self.start_cycle(jobs).await;
        }
    }

    fn abort(&mut self, reason: &str) {
        let Some(cycle) = self.current.take() else {
            return;
        };
        tracing::error!(
            cycle = cycle.id,
            port = cycle.port,
            dropped_jobs = cycle.completions.len(),
            queued = self.queue.len(),
            "Worker failed to start, aborting cycle: {}",
            reason
        );
        self.enter(CycleState::Aborted);
        self.busy = false;
        self.enter(CycleState::Idle);
    }

    async fn shutdown(&mut self) {
        self.current = None;
        for slot in 0..2 {
            if let Some(mut process) = self.pool.take_process(slot).await
                && let Err(e) = process.terminate().await
            {
                tracing::warn!(slot, "Failed to stop worker on shutdown: {}", e);
            }
        }
        self.busy = false;
        self.enter(CycleState::Idle);
    }
}

/// Side effects of one cycle, reported back to the event loop in order.
async fn drive_cycle(
    cycle: u64,
    port: u16,
    writes: Vec<Box<dyn ContentWrite>>,
    previous: Option<Box<dyn WorkerProcess>>,
    launcher: Arc<dyn WorkerLauncher>,
    events: mpsc::UnboundedSender<Command>,
) {
    let emit = |event: CycleEvent| events.send(Command::Cycle { cycle, event }).is_ok();

    for (index, write) in writes.into_iter().enumerate() {
        tracing::debug!(cycle, write = %write.describe(), "Applying write");
        let error = write.apply().await.err().map(|e| e.to_string());
        if !emit(CycleEvent::WriteDone { index, error }) {
            return;
        }
    }
    if !emit(CycleEvent::WritesApplied) {
        return;
    }

    if let Some(mut previous) = previous {
        if let Err(e) = previous.terminate().await {
            tracing::warn!(cycle, port, "Failed to stop previous worker: {}", e);
        }
        if !emit(CycleEvent::PreviousExited) {
            return;
        }
    }

    match launcher.launch(port).await {
        Ok(LaunchedWorker { process, mut output }) => {
            if !emit(CycleEvent::Spawned(process)) {
                return;
            }
            while let Some(line) = output.recv().await {
                if !emit(CycleEvent::Output(line)) {
                    break;
                }
            }
        }
        Err(e) => {
            emit(CycleEvent::SpawnFailed(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::orchestrator::StateChange;
    use crate::registry::{Artifact, ArtifactStatus};
    use crate::testing::{FakeWorker, ScriptedLauncher, WriteLog};

    const WAIT: Duration = Duration::from_secs(5);

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    struct Harness {
        orch: RestartOrchestrator,
        launcher: Arc<ScriptedLauncher>,
        launches: mpsc::UnboundedReceiver<FakeWorker>,
        log: WriteLog,
    }

    impl Harness {
        fn new(artifacts: Vec<Artifact>) -> Self {
            let (launcher, launches) = ScriptedLauncher::new();
            let pool = Arc::new(WorkerPool::new([8001, 8002], 1));
            let orch = RestartOrchestrator::start(
                pool,
                ArtifactRegistry::new(artifacts),
                launcher.clone(),
            );
            Self {
                orch,
                launcher,
                launches,
                log: WriteLog::default(),
            }
        }

        fn job(&self, target: JobTarget) -> RestartJob {
            let label = target.id().to_string();
            RestartJob::new(target, self.log.write(label), StateChange::Unchanged)
        }

        async fn next_launch(&mut self) -> FakeWorker {
            tokio::time::timeout(WAIT, self.launches.recv())
                .await
                .expect("no worker launched")
                .expect("launcher dropped")
        }

        async fn ready(&self, worker: &FakeWorker) {
            let done = self.orch.subscribe().unwrap();
            worker.ready();
            tokio::time::timeout(WAIT, done)
                .await
                .expect("cycle did not complete")
                .unwrap();
        }

        async fn wait_idle(&self) {
            let mut rx = self.orch.watch_status();
            tokio::time::timeout(WAIT, rx.wait_for(|s| !s.busy))
                .await
                .expect("orchestrator stayed busy")
                .unwrap();
        }

        async fn status_of(&self, target: &JobTarget) -> Option<ArtifactStatus> {
            self.orch.registry().find_by_id(target).await.map(|a| a.status)
        }
    }

    fn p(id: &str) -> JobTarget {
        JobTarget::Plot(id.to_string())
    }

    fn d(name: &str) -> JobTarget {
        JobTarget::Dataset(name.to_string())
    }

    fn ready_plot(id: &str) -> Artifact {
        let mut a = Artifact::plot(id, "code", day());
        a.status = ArtifactStatus::Ready;
        a
    }

    #[tokio::test]
    async fn single_job_swaps_worker_and_marks_ready() {
        let mut h = Harness::new(vec![ready_plot("p1")]);
        assert_eq!(h.orch.pool().active().port, 8002);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Pending));
        assert!(h.orch.status().busy);

        let worker = h.next_launch().await;
        assert_eq!(worker.port, 8001);
        // Traffic stays on the old worker until the new one is ready.
        assert_eq!(h.orch.pool().active().port, 8002);

        h.ready(&worker).await;
        assert_eq!(h.orch.pool().active().port, 8001);
        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Ready));
        assert_eq!(h.log.entries(), ["p1"]);

        let status = h.orch.status();
        assert!(!status.busy);
        assert_eq!(status.state, CycleState::Idle);
        assert_eq!(status.cycle, 1);
    }

    #[tokio::test]
    async fn jobs_submitted_during_a_cycle_form_the_next_batch() {
        let mut h = Harness::new(vec![
            ready_plot("p1"),
            ready_plot("p2"),
            Artifact::dataset("d1", day()),
        ]);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let first = h.next_launch().await;
        assert_eq!(h.log.entries(), ["p1"]);

        h.orch.submit(h.job(p("p2"))).await.unwrap();
        h.orch.submit(h.job(d("d1"))).await.unwrap();
        assert_eq!(h.orch.status().queued, 2);
        assert_eq!(h.status_of(&p("p2")).await, Some(ArtifactStatus::Pending));
        assert_eq!(h.log.entries(), ["p1"]);

        h.ready(&first).await;
        assert_eq!(h.orch.pool().active().port, 8001);

        let second = h.next_launch().await;
        assert_eq!(second.port, 8002);
        assert_eq!(h.log.entries(), ["p1", "p2", "d1"]);
        assert_eq!(h.orch.status().queued, 0);

        h.ready(&second).await;
        assert_eq!(h.orch.pool().active().port, 8002);
        assert_eq!(h.status_of(&p("p2")).await, Some(ArtifactStatus::Ready));
        assert_eq!(h.status_of(&d("d1")).await, Some(ArtifactStatus::Ready));
        assert_eq!(h.orch.status().cycle, 2);
    }

    #[tokio::test]
    async fn third_cycle_replaces_the_first_process() {
        let mut h = Harness::new(vec![ready_plot("p1")]);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let first = h.next_launch().await;
        h.ready(&first).await;

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let second = h.next_launch().await;
        h.ready(&second).await;
        assert!(!first.is_terminated());

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let third = h.next_launch().await;
        assert_eq!(third.port, 8001);
        assert!(first.is_terminated());
        assert!(!second.is_terminated());
    }

    #[tokio::test]
    async fn worker_reported_error_is_applied_on_ready() {
        let mut h = Harness::new(vec![ready_plot("p1")]);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let worker = h.next_launch().await;
        worker.stdout("Importing module with id p1");
        worker.stdout("ERROR PLOT p1 bad syntax");
        h.ready(&worker).await;

        let plot = h.orch.registry().find_by_id(&p("p1")).await.unwrap();
        assert_eq!(plot.status, ArtifactStatus::Error);
        assert_eq!(plot.error_message.as_deref(), Some("bad syntax"));
        assert_eq!(h.orch.pool().active().port, 8001);
    }

    #[tokio::test]
    async fn error_for_artifact_with_queued_job_is_dropped() {
        let mut h = Harness::new(vec![ready_plot("p1")]);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let first = h.next_launch().await;
        h.orch.submit(h.job(p("p1"))).await.unwrap();

        first.stdout("ERROR PLOT p1 stale failure");
        h.ready(&first).await;
        assert_ne!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Error));

        let second = h.next_launch().await;
        h.ready(&second).await;
        let plot = h.orch.registry().find_by_id(&p("p1")).await.unwrap();
        assert_eq!(plot.status, ArtifactStatus::Ready);
        assert!(plot.error_message.is_none());
    }

    #[tokio::test]
    async fn failed_write_does_not_stop_the_cycle() {
        let mut h = Harness::new(vec![ready_plot("p1"), ready_plot("p2")]);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let first = h.next_launch().await;
        h.orch
            .submit(RestartJob::new(
                p("p2"),
                h.log.failing_write("p2", "disk full"),
                StateChange::Unchanged,
            ))
            .await
            .unwrap();
        h.orch.submit(h.job(p("p1"))).await.unwrap();
        h.ready(&first).await;

        let second = h.next_launch().await;
        assert_eq!(h.log.entries(), ["p1", "p2", "p1"]);
        h.ready(&second).await;

        let p2 = h.orch.registry().find_by_id(&p("p2")).await.unwrap();
        assert_eq!(p2.status, ArtifactStatus::Error);
        assert!(p2.error_message.unwrap().contains("disk full"));
        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Ready));
        assert_eq!(h.orch.pool().active().port, 8002);
    }

    #[tokio::test]
    async fn stderr_aborts_and_leaves_queue_pending() {
        let mut h = Harness::new(vec![ready_plot("p1"), ready_plot("p2"), ready_plot("p3")]);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let first = h.next_launch().await;
        h.orch.submit(h.job(p("p2"))).await.unwrap();

        first.stderr("Traceback (most recent call last):");
        h.wait_idle().await;
        let status = h.orch.status();
        assert_eq!(status.state, CycleState::Idle);
        assert_eq!(status.queued, 1);
        assert_eq!(h.orch.pool().active().port, 8002);
        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Pending));

        // A late ready from the aborted worker must not resolve anything.
        first.ready();
        h.orch.submit(h.job(p("p3"))).await.unwrap();
        let retry = h.next_launch().await;
        assert_eq!(retry.port, 8001);
        assert!(first.is_terminated());
        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Pending));
        assert_eq!(h.orch.status().queued, 1);

        h.ready(&retry).await;
        assert_eq!(h.status_of(&p("p3")).await, Some(ArtifactStatus::Ready));

        // The job stuck behind the aborted cycle drains now.
        let drained = h.next_launch().await;
        assert_eq!(drained.port, 8002);
        h.ready(&drained).await;
        assert_eq!(h.status_of(&p("p2")).await, Some(ArtifactStatus::Ready));
        // p1's job was dropped with the aborted cycle.
        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Pending));
    }

    #[tokio::test]
    async fn spawn_failure_aborts_cycle() {
        let mut h = Harness::new(vec![ready_plot("p1")]);
        h.launcher.fail_next_launch();

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        h.wait_idle().await;
        assert_eq!(h.orch.status().cycle, 1);
        assert_eq!(h.orch.pool().active().port, 8002);

        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let worker = h.next_launch().await;
        h.ready(&worker).await;
        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Ready));
    }

    #[tokio::test]
    async fn repeated_ready_resolves_callbacks_once() {
        let mut h = Harness::new(vec![ready_plot("p1")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        h.orch
            .submit(RestartJob::new(
                p("p1"),
                h.log.write("p1"),
                StateChange::Update(Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            ))
            .await
            .unwrap();
        let worker = h.next_launch().await;
        let done = h.orch.subscribe().unwrap();
        worker.ready();
        worker.ready();
        worker.stdout("SERVER READY");
        tokio::time::timeout(WAIT, done).await.unwrap().unwrap();

        // Run another full cycle so the duplicate lines have been consumed.
        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let next = h.next_launch().await;
        h.ready(&next).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.orch.status().cycle, 2);
        assert_eq!(h.orch.pool().active().port, 8002);
    }

    #[tokio::test]
    async fn subscribers_fire_once_per_successful_cycle() {
        let mut h = Harness::new(vec![ready_plot("p1")]);
        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let worker = h.next_launch().await;

        let a = h.orch.subscribe().unwrap();
        let b = h.orch.subscribe().unwrap();
        worker.ready();
        tokio::time::timeout(WAIT, a).await.unwrap().unwrap();
        tokio::time::timeout(WAIT, b).await.unwrap().unwrap();

        let mut late = h.orch.subscribe().unwrap();
        h.wait_idle().await;
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_job_readies_everything() {
        let mut h = Harness::new(vec![
            Artifact::plot("p1", "code", day()),
            Artifact::dataset("d1", day()),
        ]);
        h.orch
            .submit(RestartJob::refresh_all(crate::content::NoopWrite))
            .await
            .unwrap();
        let worker = h.next_launch().await;
        worker.stdout("ERROR DATASET d1 unreadable header");
        h.ready(&worker).await;

        assert_eq!(h.status_of(&p("p1")).await, Some(ArtifactStatus::Ready));
        assert_eq!(h.status_of(&d("d1")).await, Some(ArtifactStatus::Error));
    }

    #[tokio::test]
    async fn shutdown_stops_live_workers() {
        let mut h = Harness::new(vec![ready_plot("p1")]);
        h.orch.submit(h.job(p("p1"))).await.unwrap();
        let worker = h.next_launch().await;
        h.ready(&worker).await;

        h.orch.shutdown().await.unwrap();
        assert!(worker.is_terminated());
        assert!(matches!(
            h.orch.submit(h.job(p("p1"))).await,
            Err(OrchestratorError::Stopped)
        ));
    }
}

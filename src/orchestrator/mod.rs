//! Blue/green restarts for the two rendering workers.
//!
//! Every content mutation becomes a [`RestartJob`]. Jobs are applied to the
//! inactive worker, which is then restarted; traffic only moves over once the
//! new process prints its readiness line.
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                RestartOrchestrator                │
//! │                                                   │
//! │  submit(job) ──► busy? ──yes──► RestartQueue      │
//! │                    │ no            │ (drained on  │
//! │                    ▼               │  next READY) │
//! │  Cycle: writes -> kill old -> spawn -> await READY│
//! │                    │                              │
//! │                    ▼                              │
//! │  resolve completions, apply deferred errors,      │
//! │  WorkerPool::swap(), notify subscribers           │
//! │                                                   │
//! │  WorkerPool                                       │
//! │    slot 0 :8001   slot 1 :8002   (one active)     │
//! └───────────────────────────────────────────────────┘
//! ```

pub mod job;
pub mod launcher;
pub mod pool;
pub mod queue;
pub mod restart;
pub mod signal;

pub use job::{ArtifactUpdate, JobTarget, RestartJob, StateChange};
pub use launcher::{LaunchedWorker, ProcessLauncher, WorkerLauncher, WorkerOutput, WorkerProcess};
pub use pool::{Worker, WorkerPool};
pub use queue::RestartQueue;
pub use restart::{CycleState, OrchestratorStatus, RestartOrchestrator};
pub use signal::WorkerSignal;

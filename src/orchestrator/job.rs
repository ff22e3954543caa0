//! Restart jobs and the completion records a cycle resolves them into.

use crate::content::ContentWrite;
use crate::registry::{Artifact, ArtifactKind, ArtifactSet, ArtifactStatus};

/// The artifact a job changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobTarget {
    Plot(String),
    Dataset(String),
}

impl JobTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Plot(id) | Self::Dataset(id) => id,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Plot(_) => ArtifactKind::Plot,
            Self::Dataset(_) => ArtifactKind::Dataset,
        }
    }

    pub fn matches(&self, artifact: &Artifact) -> bool {
        artifact.kind == self.kind() && artifact.id == self.id()
    }
}

impl std::fmt::Display for JobTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plot(id) => write!(f, "plot {id}"),
            Self::Dataset(name) => write!(f, "dataset {name}"),
        }
    }
}

/// Edit applied to an existing artifact once its change is live.
pub type ArtifactUpdate = Box<dyn FnOnce(&mut Artifact) + Send>;

/// Registry change a job makes when its cycle reaches readiness.
pub enum StateChange {
    /// Content changed on disk only; the artifact just becomes ready.
    Unchanged,
    Update(ArtifactUpdate),
    /// A new artifact appears.
    Insert(Artifact),
    Remove,
}

impl std::fmt::Debug for StateChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "Unchanged"),
            Self::Update(_) => write!(f, "Update(..)"),
            Self::Insert(a) => f.debug_tuple("Insert").field(&a.id).finish(),
            Self::Remove => write!(f, "Remove"),
        }
    }
}

/// One mutation request: a content write plus the registry change it implies.
pub struct RestartJob {
    /// `None` for a full refresh that covers every artifact.
    pub target: Option<JobTarget>,
    pub write: Box<dyn ContentWrite>,
    pub change: StateChange,
}

impl RestartJob {
    pub fn new(target: JobTarget, write: impl ContentWrite + 'static, change: StateChange) -> Self {
        Self {
            target: Some(target),
            write: Box::new(write),
            change,
        }
    }

    /// A job that reloads all content and marks every artifact ready.
    pub fn refresh_all(write: impl ContentWrite + 'static) -> Self {
        Self {
            target: None,
            write: Box::new(write),
            change: StateChange::Unchanged,
        }
    }

    pub(crate) fn split(self) -> (Box<dyn ContentWrite>, Completion) {
        (
            self.write,
            Completion {
                target: self.target,
                change: self.change,
                failure: None,
            },
        )
    }
}

impl std::fmt::Debug for RestartJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartJob")
            .field("target", &self.target)
            .field("write", &self.write.describe())
            .field("change", &self.change)
            .finish()
    }
}

/// Outcome record owned by a cycle, consumed exactly once when it resolves.
#[derive(Debug)]
pub(crate) struct Completion {
    pub target: Option<JobTarget>,
    pub change: StateChange,
    /// Set when the write failed; the failure action then replaces the
    /// success action for the rest of the cycle.
    pub failure: Option<String>,
}

impl Completion {
    pub fn fail(&mut self, message: String) {
        self.failure = Some(message);
    }

    pub fn resolve(self, set: &mut ArtifactSet) {
        match (self.failure, self.target) {
            (Some(message), target) => match self.change {
                StateChange::Insert(mut artifact) => {
                    artifact.status = ArtifactStatus::Error;
                    artifact.error_message = Some(message);
                    set.insert(artifact);
                }
                _ => {
                    if let Some(target) = target {
                        set.mark_error(&target, message);
                    }
                }
            },
            (None, None) => set.mark_all_ready(),
            (None, Some(target)) => match self.change {
                StateChange::Unchanged => set.mark_ready(&target),
                StateChange::Update(update) => {
                    if let Some(artifact) = set.find_mut(&target) {
                        update(artifact);
                    }
                    set.mark_ready(&target);
                }
                StateChange::Insert(mut artifact) => {
                    artifact.status = ArtifactStatus::Ready;
                    artifact.error_message = None;
                    set.insert(artifact);
                }
                StateChange::Remove => {
                    set.remove(&target);
                }
            },
        }
    }
}

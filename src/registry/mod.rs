//! In-memory registry of plots and datasets with their lifecycle status.
//!
//! Request handlers only read from the registry. Every status write goes
//! through the restart orchestrator, which applies a whole batch of
//! mutations under a single write lock when a cycle resolves.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::orchestrator::JobTarget;

/// What kind of artifact an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Plot,
    Dataset,
}

/// Lifecycle status of an artifact as seen by the live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// A change was submitted and the worker carrying it is not live yet.
    Pending,
    Ready,
    Error,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A tracked plot or dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Plot id (8 hex chars) or dataset file name.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub date: NaiveDate,
    pub status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Artifact {
    /// A plot descriptor in `Pending` state.
    pub fn plot(id: impl Into<String>, code: impl Into<String>, date: NaiveDate) -> Self {
        let code = code.into();
        Self {
            kind: ArtifactKind::Plot,
            id: id.into(),
            title: plot_title(&code),
            code: Some(code),
            date,
            status: ArtifactStatus::Pending,
            error_message: None,
        }
    }

    /// A dataset descriptor in `Pending` state.
    pub fn dataset(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            kind: ArtifactKind::Dataset,
            id: name.into(),
            title: None,
            code: None,
            date,
            status: ArtifactStatus::Pending,
            error_message: None,
        }
    }

    pub fn target(&self) -> JobTarget {
        match self.kind {
            ArtifactKind::Plot => JobTarget::Plot(self.id.clone()),
            ArtifactKind::Dataset => JobTarget::Dataset(self.id.clone()),
        }
    }

    /// Replace the plot source, refreshing title and date.
    pub fn set_code(&mut self, code: impl Into<String>, date: NaiveDate) {
        let code = code.into();
        self.title = plot_title(&code);
        self.code = Some(code);
        self.date = date;
    }
}

/// Title declared on the first line of a plot as `#! Title`.
pub fn plot_title(code: &str) -> Option<String> {
    let first = code.lines().next()?;
    first
        .strip_prefix("#!")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// The guarded set of artifacts. Mutators are crate-private: only the
/// orchestrator's completion step calls them.
#[derive(Debug, Default)]
pub struct ArtifactSet {
    entries: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn list(&self) -> &[Artifact] {
        &self.entries
    }

    pub fn find(&self, target: &JobTarget) -> Option<&Artifact> {
        self.entries.iter().find(|a| target.matches(a))
    }

    pub(crate) fn find_mut(&mut self, target: &JobTarget) -> Option<&mut Artifact> {
        self.entries.iter_mut().find(|a| target.matches(a))
    }

    pub(crate) fn mark_pending(&mut self, target: &JobTarget) {
        if let Some(a) = self.find_mut(target) {
            a.status = ArtifactStatus::Pending;
        }
    }

    pub(crate) fn mark_ready(&mut self, target: &JobTarget) {
        if let Some(a) = self.find_mut(target) {
            a.status = ArtifactStatus::Ready;
            a.error_message = None;
        }
    }

    pub(crate) fn mark_error(&mut self, target: &JobTarget, message: impl Into<String>) {
        if let Some(a) = self.find_mut(target) {
            a.status = ArtifactStatus::Error;
            a.error_message = Some(message.into());
        }
    }

    /// Mark everything ready; used when a full content refresh succeeds.
    pub(crate) fn mark_all_ready(&mut self) {
        for a in &mut self.entries {
            a.status = ArtifactStatus::Ready;
            a.error_message = None;
        }
    }

    /// Insert an artifact, replacing any entry with the same identity.
    pub(crate) fn insert(&mut self, artifact: Artifact) {
        let target = artifact.target();
        match self.find_mut(&target) {
            Some(existing) => *existing = artifact,
            None => self.entries.push(artifact),
        }
    }

    pub(crate) fn remove(&mut self, target: &JobTarget) -> Option<Artifact> {
        let pos = self.entries.iter().position(|a| target.matches(a))?;
        Some(self.entries.remove(pos))
    }
}

/// Shared handle to the artifact registry.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    inner: Arc<RwLock<ArtifactSet>>,
}

impl ArtifactRegistry {
    pub fn new(entries: Vec<Artifact>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ArtifactSet { entries })),
        }
    }

    /// Snapshot of every artifact.
    pub async fn list(&self) -> Vec<Artifact> {
        self.inner.read().await.list().to_vec()
    }

    /// Snapshot of every artifact of one kind.
    pub async fn list_kind(&self, kind: ArtifactKind) -> Vec<Artifact> {
        self.inner
            .read()
            .await
            .list()
            .iter()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn find_by_id(&self, target: &JobTarget) -> Option<Artifact> {
        self.inner.read().await.find(target).cloned()
    }

    pub(crate) async fn mark_pending(&self, target: &JobTarget) {
        self.inner.write().await.mark_pending(target);
    }

    /// Run a batch of mutations under one write lock.
    pub(crate) async fn apply<R>(&self, f: impl FnOnce(&mut ArtifactSet) -> R) -> R {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}

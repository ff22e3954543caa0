//! Plot and dataset files on disk, and the writes jobs apply to them.
//!
//! Both workers read the same directories, so a write only becomes visible
//! to traffic once the restarted worker has loaded it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;

use crate::config::ContentConfig;
use crate::error::{ContentError, WriteError};
use crate::gate::TokenStore;
use crate::registry::Artifact;

const PLOT_PREFIX: &str = "plot_";
const PLOT_SUFFIX: &str = ".py";
const PLOT_ID_LEN: usize = 8;

/// A mutation of the shared content directories, run once by a restart cycle.
#[async_trait]
pub trait ContentWrite: Send + Sync {
    async fn apply(&self) -> Result<(), WriteError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct WriteFile {
    pub path: PathBuf,
    pub contents: String,
}

#[async_trait]
impl ContentWrite for WriteFile {
    async fn apply(&self) -> Result<(), WriteError> {
        tokio::fs::write(&self.path, &self.contents)
            .await
            .map_err(|source| WriteError::Write {
                path: self.path.clone(),
                source,
            })
    }

    fn describe(&self) -> String {
        format!("write {}", self.path.display())
    }
}

#[derive(Debug, Clone)]
pub struct RemoveFile {
    pub path: PathBuf,
}

#[async_trait]
impl ContentWrite for RemoveFile {
    async fn apply(&self) -> Result<(), WriteError> {
        tokio::fs::remove_file(&self.path)
            .await
            .map_err(|source| WriteError::Remove {
                path: self.path.clone(),
                source,
            })
    }

    fn describe(&self) -> String {
        format!("remove {}", self.path.display())
    }
}

/// Removes a plot's source file and revokes all of its tokens.
#[derive(Debug, Clone)]
pub struct DeletePlot {
    pub id: String,
    pub file: PathBuf,
    pub tokens: TokenStore,
}

#[async_trait]
impl ContentWrite for DeletePlot {
    async fn apply(&self) -> Result<(), WriteError> {
        let removed = RemoveFile {
            path: self.file.clone(),
        }
        .apply()
        .await;
        // Tokens go even if the file was already missing.
        self.tokens.remove_artifact(&self.id).await?;
        removed
    }

    fn describe(&self) -> String {
        format!("delete plot {}", self.id)
    }
}

/// Changes nothing; used for the startup cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWrite;

#[async_trait]
impl ContentWrite for NoopWrite {
    async fn apply(&self) -> Result<(), WriteError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "noop".to_string()
    }
}

/// Layout of the content directories.
#[derive(Debug, Clone)]
pub struct ContentStore {
    plot_dir: PathBuf,
    data_dir: PathBuf,
}

impl ContentStore {
    pub fn new(plot_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            plot_dir: plot_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn from_config(config: &ContentConfig) -> Self {
        Self::new(config.plot_dir.clone(), config.data_dir.clone())
    }

    pub fn plot_path(&self, id: &str) -> PathBuf {
        self.plot_dir
            .join(format!("{PLOT_PREFIX}{id}{PLOT_SUFFIX}"))
    }

    /// Path of a dataset file, or `None` if the name would escape the
    /// data directory.
    pub fn dataset_path(&self, name: &str) -> Option<PathBuf> {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\']);
        plain.then(|| self.data_dir.join(name))
    }

    /// Read both directories into `Pending` artifacts, plots first.
    pub async fn scan(&self) -> Result<Vec<Artifact>, ContentError> {
        let mut plots = Vec::new();
        for (name, path) in list_files(&self.plot_dir).await? {
            let Some(id) = plot_id_from_file(&name) else {
                continue;
            };
            let code = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ContentError::Scan {
                    path: path.clone(),
                    source,
                })?;
            let date = modified_date(&path).await;
            plots.push(Artifact::plot(id, code, date));
        }

        let mut datasets = Vec::new();
        for (name, path) in list_files(&self.data_dir).await? {
            if name.starts_with('.') {
                continue;
            }
            let date = modified_date(&path).await;
            datasets.push(Artifact::dataset(name, date));
        }

        plots.sort_by(|a, b| a.id.cmp(&b.id));
        datasets.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(
            plots = plots.len(),
            datasets = datasets.len(),
            "Scanned content directories"
        );
        plots.extend(datasets);
        Ok(plots)
    }
}

/// Random 8-character hex id for a new plot.
pub fn new_plot_id() -> String {
    let mut rng = rand::thread_rng();
    (0..PLOT_ID_LEN)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// Whether `id` can name a plot file.
pub fn is_plot_id(id: &str) -> bool {
    id.len() == PLOT_ID_LEN && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn plot_id_from_file(name: &str) -> Option<&str> {
    name.strip_prefix(PLOT_PREFIX)?
        .strip_suffix(PLOT_SUFFIX)
        .filter(|id| id.chars().count() == PLOT_ID_LEN)
}

async fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, ContentError> {
    let scan_err = |source| ContentError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(scan_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push((name.to_string(), entry.path()));
        }
    }
    Ok(files)
}

async fn modified_date(path: &Path) -> NaiveDate {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t).date_naive())
        .unwrap_or_else(|_| today())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ArtifactKind, ArtifactStatus};

    fn store(dir: &Path) -> ContentStore {
        let plots = dir.join("plots");
        let data = dir.join("datasets");
        std::fs::create_dir_all(&plots).unwrap();
        std::fs::create_dir_all(&data).unwrap();
        ContentStore::new(plots, data)
    }

    #[tokio::test]
    async fn scan_finds_plots_and_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let content = store(dir.path());
        std::fs::write(content.plot_path("abcd1234"), "#! Sales\nplot()\n").unwrap();
        std::fs::write(content.plot_dir.join("plot_short.py"), "x").unwrap();
        std::fs::write(content.plot_dir.join("notes.txt"), "x").unwrap();
        std::fs::write(content.data_dir.join("sales.csv"), "a,b\n").unwrap();
        std::fs::write(content.data_dir.join(".gitkeep"), "").unwrap();

        let artifacts = content.scan().await.unwrap();
        assert_eq!(artifacts.len(), 2);

        let plot = &artifacts[0];
        assert_eq!(plot.kind, ArtifactKind::Plot);
        assert_eq!(plot.id, "abcd1234");
        assert_eq!(plot.title.as_deref(), Some("Sales"));
        assert_eq!(plot.status, ArtifactStatus::Pending);

        let dataset = &artifacts[1];
        assert_eq!(dataset.kind, ArtifactKind::Dataset);
        assert_eq!(dataset.id, "sales.csv");
    }

    #[tokio::test]
    async fn scan_of_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let content = ContentStore::new(dir.path().join("nope"), dir.path());
        assert!(matches!(
            content.scan().await,
            Err(ContentError::Scan { .. })
        ));
    }

    #[tokio::test]
    async fn write_and_remove_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot_abcd1234.py");

        let write = WriteFile {
            path: path.clone(),
            contents: "print(1)".into(),
        };
        write.apply().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print(1)");

        RemoveFile { path: path.clone() }.apply().await.unwrap();
        assert!(!path.exists());

        let err = RemoveFile { path }.apply().await.unwrap_err();
        assert!(matches!(err, WriteError::Remove { .. }));
    }

    #[tokio::test]
    async fn delete_plot_revokes_tokens_even_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = TokenStore::load(dir.path().join("tokens.json")).await.unwrap();
        tokens.create("abcd1234", "alice").await.unwrap();

        let delete = DeletePlot {
            id: "abcd1234".into(),
            file: dir.path().join("plot_abcd1234.py"),
            tokens: tokens.clone(),
        };
        assert!(delete.apply().await.is_err());
        assert!(tokens.list("abcd1234").await.is_empty());
    }

    #[test]
    fn dataset_names_cannot_escape() {
        let content = ContentStore::new("/p", "/d");
        assert_eq!(
            content.dataset_path("sales.csv"),
            Some(PathBuf::from("/d/sales.csv"))
        );
        assert!(content.dataset_path("../etc/passwd").is_none());
        assert!(content.dataset_path("a/b.csv").is_none());
        assert!(content.dataset_path("").is_none());
    }

    #[test]
    fn plot_ids() {
        let id = new_plot_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(is_plot_id(&id));
        assert!(!is_plot_id("short"));
        assert!(!is_plot_id("../../x/"));
        assert_eq!(plot_id_from_file("plot_abcd1234.py"), Some("abcd1234"));
        assert_eq!(plot_id_from_file("plot_abc.py"), None);
    }
}

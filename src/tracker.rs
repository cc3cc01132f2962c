//! Detects what a write-mode agent run changed in the cloned repository.
//!
//! The baseline is the clone's HEAD recorded before the agent starts; after
//! it exits we diff tree-to-workdir (including untracked files) and report
//! the touched paths. Best-effort: failures here degrade to an empty
//! artifact list, never to a failed task.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, Repository};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ChangeSummary {
    pub files: Vec<ChangedFile>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|f| f.path.to_string_lossy().into_owned())
            .collect()
    }
}

pub struct ChangeTracker {
    repo: Repository,
    baseline: Option<String>,
}

impl ChangeTracker {
    /// Open the repository and record its current HEAD as the baseline.
    /// `None` baseline means an unborn branch (empty clone).
    pub fn open(workdir: &Path) -> Result<Self> {
        let repo = Repository::open(workdir).context("Failed to open git repository")?;
        let baseline = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .map(|c| c.id().to_string());
        Ok(Self { repo, baseline })
    }

    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    /// Diff the working directory against the baseline tree.
    pub fn compute_changes(&self) -> Result<ChangeSummary> {
        let baseline_tree = match &self.baseline {
            Some(sha) => {
                let oid = git2::Oid::from_str(sha)?;
                Some(self.repo.find_commit(oid)?.tree()?)
            }
            None => None,
        };

        let mut opts = DiffOptions::new();
        opts.include_untracked(true);

        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(baseline_tree.as_ref(), Some(&mut opts))?;

        let mut summary = ChangeSummary::default();
        diff.foreach(
            &mut |delta, _progress| {
                if let Some(path) = delta.new_file().path() {
                    let kind = match delta.status() {
                        Delta::Added | Delta::Untracked => Some(ChangeKind::Added),
                        Delta::Modified => Some(ChangeKind::Modified),
                        Delta::Deleted => Some(ChangeKind::Deleted),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        summary.files.push(ChangedFile {
                            path: path.to_path_buf(),
                            kind,
                        });
                    }
                }
                true
            },
            None,
            None,
            None,
        )?;

        Ok(summary)
    }
}

//! The repository metadata manifest.
//!
//! A manifest captures a repository's identity, file tree, and commit
//! provenance at a point in time. It is generated fresh on every anchoring
//! cycle, serialized to JSON, pinned to the content store, and its content
//! id anchored on the ledger. Field names are part of the interchange
//! format.

use serde::{Deserialize, Serialize};

use crate::repo::Repo;
use crate::{GitError, GitResult};

/// Commit marker used when a repository has no history yet.
pub const REPO_CREATED_MARKER: &str = "repository created";

/// One file of the repository tree with its last-touching commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    /// Object-store hash of the file content; replaced by the pin's content
    /// id when files are pinned individually.
    pub hash: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub timestamp: i64,
    /// File content, carried only while the manifest is being assembled.
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoManifest {
    pub name: String,
    pub external_url: String,
    pub description: String,
    #[serde(rename = "content")]
    pub tree: Vec<FileRecord>,
    /// Head commit id, or [`REPO_CREATED_MARKER`] for an empty repository.
    pub commit: String,
    pub timestamp: i64,
    pub commits_count: usize,
}

impl RepoManifest {
    /// Build the manifest skeleton from the repository's identity and head
    /// commit. An empty repository still yields a manifest, carrying the
    /// created marker and an empty file list.
    pub fn generate(repo: &Repo, base_url: &str) -> GitResult<Self> {
        let mut manifest = Self {
            name: repo.name.clone(),
            external_url: format!("{base_url}{}", repo.name),
            description: repo.description.clone(),
            tree: Vec::new(),
            commit: REPO_CREATED_MARKER.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            commits_count: 0,
        };

        let Some((head_id, head)) = repo.last_commit()? else {
            return Ok(manifest);
        };

        manifest.commit = head_id.to_hex();
        manifest.timestamp = head.author.when;
        manifest.commits_count = repo.commits_count()?;
        Ok(manifest)
    }

    /// Fill the file list from the head commit's tree, carrying each file's
    /// content and object-store hash.
    pub fn fill_content(&mut self, repo: &Repo) -> GitResult<()> {
        let Some(head) = repo.head()? else {
            return Ok(());
        };
        for file in repo.tree_files(&head.id)? {
            let content = repo.blob(&file.id)?;
            self.tree.push(FileRecord {
                name: file.path,
                hash: file.id.to_hex(),
                author: String::new(),
                commit: String::new(),
                timestamp: 0,
                content,
            });
        }
        Ok(())
    }

    /// Pair every file record with its most recent modifying commit. Files
    /// with no history yet are left untouched rather than treated as
    /// failures.
    pub fn fill_commits(&mut self, repo: &Repo) -> GitResult<()> {
        for record in &mut self.tree {
            let Some((commit_id, commit)) = repo.file_last_commit(&record.name)? else {
                continue;
            };
            record.author = commit.author.name.clone();
            record.commit = commit_id.to_hex();
            record.timestamp = commit.author.when;
        }
        Ok(())
    }

    /// Serialize to the interchange JSON.
    pub fn to_json(&self) -> GitResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(GitError::Serialization)
    }
}

//! The in-memory repository registry.
//!
//! A process-wide map from repository name to its descriptor, populated by
//! the anchoring pipeline and consulted on every inbound request. The map is
//! shared mutable state and all access goes through the mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::repo::Repo;
use crate::{GitError, GitResult};

#[derive(Default)]
pub struct RepoRegistry {
    repos: Mutex<HashMap<String, Arc<Repo>>>,
}

impl RepoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository. Names are registered at most once; a second
    /// insert for the same name is rejected.
    pub fn insert(&self, repo: Arc<Repo>) -> GitResult<()> {
        let mut repos = self.repos.lock().unwrap();
        if repos.contains_key(&repo.name) {
            return Err(GitError::RepoAlreadyExists(repo.name.clone()));
        }
        repos.insert(repo.name.clone(), repo);
        Ok(())
    }

    pub fn get(&self, name: &str) -> GitResult<Arc<Repo>> {
        self.repos
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| GitError::RepoNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.repos.lock().unwrap().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.repos.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repos.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{OwnerAddress, RepoId, RepoSpec};
    use anchorgit_vfs::{Fs, MemoryStore, Vfs};

    fn repo(name: &str) -> Arc<Repo> {
        let fs: Arc<dyn Fs> = Arc::new(Vfs::new(Arc::new(MemoryStore::new())));
        Arc::new(
            Repo::new(
                RepoSpec {
                    id: RepoId(7),
                    name: name.to_string(),
                    description: String::new(),
                    owner: OwnerAddress::new("0x1"),
                    fork_from: None,
                },
                fs,
                "/",
            )
            .unwrap(),
        )
    }

    #[test]
    fn insert_then_get() {
        let registry = RepoRegistry::new();
        registry.insert(repo("demo")).unwrap();
        assert!(registry.contains("demo"));
        assert_eq!(registry.get("demo").unwrap().name, "demo");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = RepoRegistry::new();
        registry.insert(repo("demo")).unwrap();
        assert!(matches!(
            registry.insert(repo("demo")),
            Err(GitError::RepoAlreadyExists(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_names_are_not_found() {
        let registry = RepoRegistry::new();
        assert!(matches!(
            registry.get("absent"),
            Err(GitError::RepoNotFound(_))
        ));
    }

    #[test]
    fn names_are_sorted() {
        let registry = RepoRegistry::new();
        registry.insert(repo("zeta")).unwrap();
        registry.insert(repo("alpha")).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}

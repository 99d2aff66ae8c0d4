//! Core configuration shared by the pipeline and its binaries.

use std::time::Duration;

/// Defaults mirror the service's conventional deployment: repositories at
/// the root of the virtual filesystem, a one-second pause between
/// subscription retries.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Prefix for manifests' external locator, e.g. `https://host/`.
    pub base_url: String,
    /// Directory on the virtual filesystem under which repositories live.
    pub repo_root: String,
    /// Pause between ledger resubscription attempts.
    pub resubscribe_delay: Duration,
}

impl CoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            ..Self::default()
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            repo_root: "/".to_string(),
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_always_ends_with_a_slash() {
        assert_eq!(CoreConfig::new("https://x.test").base_url, "https://x.test/");
        assert_eq!(CoreConfig::new("https://x.test/").base_url, "https://x.test/");
    }
}

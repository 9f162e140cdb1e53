//! Document fetching.
//!
//! HTTP(S) URLs go through a ureq agent on tokio's blocking pool; anything
//! else is read from the configured root directory, so the same references
//! work against a dev server and a checked-out tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{LoaderError, Result};

/// Retrieves the text behind a URL.
#[async_trait(?Send)]
pub trait Fetcher {
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[async_trait(?Send)]
impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    async fn fetch(&self, url: &str) -> Result<String> {
        (**self).fetch(url).await
    }
}

pub fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP + FILESYSTEM
// ═══════════════════════════════════════════════════════════════════════════════

/// Default fetcher: ureq for HTTP(S), the filesystem for everything else.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    root: PathBuf,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
        }
    }

    /// Map a non-HTTP URL onto a file under the root. `..` segments may
    /// climb back out of directories the URL entered, never above the root.
    fn local_path(&self, url: &str) -> Result<PathBuf> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let mut segments = Vec::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(segment) => segments.push(segment),
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return Err(LoaderError::OutsideRoot {
                            url: url.to_string(),
                        });
                    }
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        Ok(segments.into_iter().fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    async fn fetch_http(&self, url: &str) -> Result<String> {
        let timeout = self.timeout;
        let target = url.to_string();
        tokio::task::spawn_blocking(move || fetch_blocking(&target, timeout))
            .await
            .map_err(|e| LoaderError::Transport {
                url: url.to_string(),
                message: format!("fetch task failed: {e}"),
            })?
    }

    async fn fetch_file(&self, url: &str) -> Result<String> {
        let path = self.local_path(url)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LoaderError::Network {
                url: url.to_string(),
                status: 404,
            }),
            Err(e) => Err(LoaderError::Io(e)),
        }
    }
}

fn fetch_blocking(url: &str, timeout: Duration) -> Result<String> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .build();

    match agent.get(url).call() {
        Ok(response) if (200..300).contains(&response.status()) => {
            response.into_string().map_err(|e| LoaderError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })
        }
        Ok(response) => Err(LoaderError::Network {
            url: url.to_string(),
            status: response.status(),
        }),
        Err(ureq::Error::Status(status, _)) => Err(LoaderError::Network {
            url: url.to_string(),
            status,
        }),
        Err(ureq::Error::Transport(err)) => Err(LoaderError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }),
    }
}

#[async_trait(?Send)]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "Fetching");
        if is_http(url) {
            self.fetch_http(url).await
        } else {
            self.fetch_file(url).await
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<String, String>,
    statuses: HashMap<String, u16>,
    requests: Vec<String>,
}

/// Serves documents from memory. Clones share state, so a test can keep a
/// handle while the loader owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, url: &str, text: &str) -> Self {
        self.insert(url, text);
        self
    }

    /// Answer `url` with a failing status.
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.state
            .borrow_mut()
            .statuses
            .insert(url.to_string(), status);
        self
    }

    pub fn insert(&self, url: &str, text: &str) {
        self.state
            .borrow_mut()
            .documents
            .insert(url.to_string(), text.to_string());
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state.borrow().requests.clone()
    }
}

#[async_trait(?Send)]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.state.borrow_mut().requests.push(url.to_string());
        tokio::task::yield_now().await;

        let state = self.state.borrow();
        if let Some(&status) = state.statuses.get(url) {
            return Err(LoaderError::Network {
                url: url.to_string(),
                status,
            });
        }
        state
            .documents
            .get(url)
            .cloned()
            .ok_or_else(|| LoaderError::Network {
                url: url.to_string(),
                status: 404,
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PER-URL MEMO
// ═══════════════════════════════════════════════════════════════════════════════

/// Wraps a fetcher and keeps successful responses per URL.
pub struct CachedFetcher<F> {
    inner: F,
    entries: RefCell<HashMap<String, String>>,
}

impl<F: Fetcher> CachedFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            entries: RefCell::new(HashMap::new()),
        }
    }
}

#[async_trait(?Send)]
impl<F: Fetcher> Fetcher for CachedFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String> {
        if let Some(text) = self.entries.borrow().get(url) {
            tracing::trace!(url, "Fetch served from memo");
            return Ok(text.clone());
        }
        let text = self.inner.fetch(url).await?;
        self.entries
            .borrow_mut()
            .insert(url.to_string(), text.clone());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fetcher_serves_and_records() {
        let fetcher = MemoryFetcher::new().with_document("a.sfc", "<template></template>");
        assert_eq!(fetcher.fetch("a.sfc").await.unwrap(), "<template></template>");
        assert_eq!(fetcher.requests(), vec!["a.sfc".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_fetcher_statuses() {
        let fetcher = MemoryFetcher::new().with_status("gone.sfc", 410);
        assert_eq!(fetcher.fetch("gone.sfc").await.unwrap_err().status(), Some(410));
        assert_eq!(fetcher.fetch("missing.sfc").await.unwrap_err().status(), Some(404));
    }

    #[tokio::test]
    async fn test_cached_fetcher_fetches_once() {
        let memory = MemoryFetcher::new().with_document("a.sfc", "x");
        let cached = CachedFetcher::new(memory.clone());
        assert_eq!(cached.fetch("a.sfc").await.unwrap(), "x");
        assert_eq!(cached.fetch("a.sfc").await.unwrap(), "x");
        assert_eq!(memory.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cached_fetcher_does_not_keep_failures() {
        let memory = MemoryFetcher::new();
        let cached = CachedFetcher::new(memory.clone());
        assert!(cached.fetch("a.sfc").await.is_err());
        memory.insert("a.sfc", "late");
        assert_eq!(cached.fetch("a.sfc").await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_http_fetcher_reads_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ui")).unwrap();
        std::fs::write(dir.path().join("ui/card.sfc"), "<template>c</template>").unwrap();

        let fetcher = HttpFetcher::new(dir.path(), Duration::from_secs(1));
        assert_eq!(
            fetcher.fetch("/ui/card.sfc?v=1").await.unwrap(),
            "<template>c</template>"
        );
        assert_eq!(
            fetcher.fetch("ui/none.sfc").await.unwrap_err().status(),
            Some(404)
        );
    }

    #[tokio::test]
    async fn test_http_fetcher_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("site");
        std::fs::create_dir_all(root.join("ui")).unwrap();
        std::fs::write(root.join("ui/card.sfc"), "card").unwrap();
        std::fs::write(dir.path().join("secret.sfc"), "secret").unwrap();

        let fetcher = HttpFetcher::new(&root, Duration::from_secs(1));
        assert_eq!(fetcher.fetch("ui/./x/../card.sfc").await.unwrap(), "card");
        assert!(matches!(
            fetcher.fetch("../secret.sfc").await.unwrap_err(),
            LoaderError::OutsideRoot { .. }
        ));
        assert!(matches!(
            fetcher.fetch("/ui/../../secret.sfc").await.unwrap_err(),
            LoaderError::OutsideRoot { .. }
        ));
    }
}

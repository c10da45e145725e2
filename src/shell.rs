//! The application shell: registers the offline cache proxy and routes
//! requests through it.

use std::sync::Arc;

use color_eyre::Result;
use tracing::warn;

use crate::cache::{
  CacheProxy, GenerationStore, Method, ProxyPhase, ResourceRequest, Served, SqliteStore,
};
use crate::config::Config;
use crate::net::HttpClient;

/// Status of one stored cache generation.
#[derive(Debug)]
pub struct GenerationStatus {
  pub name: String,
  pub entries: u64,
  pub current: bool,
}

/// Client used by the CLI: an HTTP client with transparent offline
/// caching when registration succeeded.
pub struct ShellClient {
  http: HttpClient,
  /// `None` means registration failed: no offline support, every request
  /// goes straight to the network.
  proxy: Option<CacheProxy>,
  store: Option<Arc<dyn GenerationStore>>,
}

impl ShellClient {
  /// Register the offline cache proxy and return a ready client.
  ///
  /// Registration failures are swallowed: the returned client still works,
  /// just without offline support, and surfaces network errors directly.
  pub async fn register(config: &Config) -> Result<Self> {
    let http = HttpClient::new(config)?;

    let store: Arc<dyn GenerationStore> = match SqliteStore::open() {
      Ok(store) => Arc::new(store),
      Err(e) => {
        warn!("offline cache unavailable, continuing without it: {}", e);
        return Ok(Self {
          http,
          proxy: None,
          store: None,
        });
      }
    };

    let mut proxy = CacheProxy::new(
      Arc::clone(&store),
      &config.cache.version,
      config.cache.precache.clone(),
    );

    let precache_http = http.clone();
    let install = proxy
      .install(move |request| {
        let http = precache_http.clone();
        async move { http.send(request).await }
      })
      .await;

    match install {
      Ok(()) => proxy.activate(),
      Err(e) => {
        warn!("cache install failed: {}", e);
        if !proxy.resume_previous() {
          warn!("no previous cache generation, continuing without offline support");
          return Ok(Self {
            http,
            proxy: None,
            store: Some(store),
          });
        }
      }
    }

    Ok(Self {
      http,
      proxy: Some(proxy),
      store: Some(store),
    })
  }

  /// Fetch a resource, served through the cache proxy when available.
  pub async fn fetch(&self, method: Method, path: &str) -> Result<Served> {
    let request = ResourceRequest {
      method,
      path: path.to_string(),
      headers: Vec::new(),
    };

    match &self.proxy {
      Some(proxy) => {
        let http = self.http.clone();
        proxy
          .handle(request, move |request| async move { http.send(request).await })
          .await
      }
      None => {
        let response = self.http.send(request).await?;
        Ok(Served::Passthrough(response))
      }
    }
  }

  /// Whether offline support is active for this session.
  pub fn offline_ready(&self) -> bool {
    self
      .proxy
      .as_ref()
      .map(|proxy| proxy.phase() == ProxyPhase::Active)
      .unwrap_or(false)
  }

  /// Version of the generation currently being served from, if any.
  pub fn current_version(&self) -> Option<&str> {
    self.proxy.as_ref().map(|proxy| proxy.version())
  }

  /// Stored generations and their entry counts.
  pub fn status(&self) -> Result<Vec<GenerationStatus>> {
    let store = match &self.store {
      Some(store) => store,
      None => return Ok(Vec::new()),
    };

    let current = self.current_version().map(str::to_string);
    let mut generations = Vec::new();
    for name in store.list_generations()? {
      let entries = store.entry_count(&name)?;
      let is_current = current.as_deref() == Some(name.as_str());
      generations.push(GenerationStatus {
        current: is_current,
        name,
        entries,
      });
    }

    Ok(generations)
  }
}

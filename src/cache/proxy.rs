//! The offline cache proxy: lifecycle and per-request serve policy.
//!
//! The proxy sits between the shell's outgoing requests and the network.
//! GET requests are answered cache-first: a stored response is returned
//! immediately while the network result refreshes the store in the
//! background; on a miss the caller waits for the network and gets an
//! unavailable outcome if it fails. Non-GET requests pass through
//! untouched.

use std::future::Future;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};

use super::key::ResourceRequest;
use super::response::{CachedResponse, Served};
use super::store::GenerationStore;

/// Lifecycle phase of the proxy.
///
/// Set once per registration and advanced through install and activate;
/// request handling only happens after `Active` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyPhase {
  /// Precache set being fetched into a fresh generation.
  Installing,
  /// Precache set fully stored; generation not yet current.
  Installed,
  /// Stale generations being pruned.
  Activating,
  /// Steady state: requests are being intercepted.
  Active,
}

/// Request-intercepting cache layer over a persistent generation store.
pub struct CacheProxy {
  store: Arc<dyn GenerationStore>,
  version: String,
  precache: Vec<String>,
  phase: ProxyPhase,
}

impl CacheProxy {
  pub fn new(store: Arc<dyn GenerationStore>, version: &str, precache: Vec<String>) -> Self {
    Self {
      store,
      version: version.to_string(),
      precache,
      phase: ProxyPhase::Installing,
    }
  }

  /// Version string of the generation this proxy serves from.
  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn phase(&self) -> ProxyPhase {
    self.phase
  }

  /// Install phase: fetch every precache path and store the results as a
  /// new generation.
  ///
  /// All-or-nothing: if any fetch fails or returns a non-2xx status, no
  /// generation is created and the error is returned. A generation that
  /// already exists for this version was fully stored by an earlier
  /// registration, so its fetches are skipped. The fetches run
  /// concurrently.
  pub async fn install<F, Fut>(&mut self, fetch: F) -> Result<()>
  where
    F: Fn(ResourceRequest) -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    self.phase = ProxyPhase::Installing;

    let already_stored = self
      .store
      .list_generations()
      .unwrap_or_default()
      .iter()
      .any(|name| name == &self.version);
    if already_stored {
      self.phase = ProxyPhase::Installed;
      return Ok(());
    }

    let fetches = self.precache.iter().map(|path| {
      let request = ResourceRequest::get(path);
      let pending = fetch(request.clone());
      async move {
        let response = pending
          .await
          .map_err(|e| eyre!("Precache fetch for {} failed: {}", request.path, e))?;
        if !response.is_success() {
          return Err(eyre!(
            "Precache fetch for {} returned status {}",
            request.path,
            response.status
          ));
        }
        Ok((request.key(), response))
      }
    });

    let entries = futures::future::try_join_all(fetches).await?;

    self
      .store
      .put_all(&self.version, &entries)
      .map_err(|e| eyre!("Failed to store precached responses: {}", e))?;

    debug!(
      version = %self.version,
      entries = entries.len(),
      "cache generation installed"
    );
    self.phase = ProxyPhase::Installed;

    Ok(())
  }

  /// Activate phase: prune every generation other than the current one.
  ///
  /// Idempotent and safe to run repeatedly. Pruning is best-effort: a
  /// failed deletion is logged and the remaining generations are still
  /// attempted.
  pub fn activate(&mut self) {
    self.phase = ProxyPhase::Activating;

    match self.store.list_generations() {
      Ok(names) => {
        for name in names.iter().filter(|name| name.as_str() != self.version) {
          if let Err(e) = self.store.delete_generation(name) {
            warn!(generation = %name, "failed to delete stale cache generation: {}", e);
          }
        }
      }
      Err(e) => warn!("could not enumerate cache generations, skipping pruning: {}", e),
    }

    self.phase = ProxyPhase::Active;
  }

  /// After a failed install, keep serving from the most recent generation
  /// already in the store — the one the previous registration activated.
  ///
  /// Returns false when there is nothing to resume from. Never prunes.
  pub fn resume_previous(&mut self) -> bool {
    match self.store.latest_generation() {
      Ok(Some(previous)) => {
        debug!(generation = %previous, "resuming previously active cache generation");
        self.version = previous;
        self.phase = ProxyPhase::Active;
        true
      }
      Ok(None) => false,
      Err(e) => {
        warn!("could not look up previous cache generation: {}", e);
        false
      }
    }
  }

  /// Handle one intercepted request.
  ///
  /// Only GET requests are intercepted; anything else is forwarded to the
  /// network and its outcome, including failure, surfaces unchanged.
  ///
  /// For GET, the network fetch and write-back run as a task detached
  /// from the response path: a cache hit returns without waiting for it,
  /// and a write-back failure never affects the response already chosen.
  pub async fn handle<F, Fut>(&self, request: ResourceRequest, fetch: F) -> Result<Served>
  where
    F: FnOnce(ResourceRequest) -> Fut,
    Fut: Future<Output = Result<CachedResponse>> + Send + 'static,
  {
    if !request.method.is_get() {
      let response = fetch(request).await?;
      return Ok(Served::Passthrough(response));
    }

    let key = request.key();

    // Revalidation: network fetch plus write-back, awaited only on a miss.
    let pending = fetch(request);
    let store = Arc::clone(&self.store);
    let generation = self.version.clone();
    let write_key = key.clone();
    let revalidate = tokio::spawn(async move {
      let response = match pending.await {
        Ok(response) => response,
        Err(e) => {
          debug!(request = %write_key, "network fetch failed: {}", e);
          return None;
        }
      };
      if response.is_success() {
        if let Err(e) = store.put(&generation, &write_key, &response) {
          warn!(request = %write_key, "cache write-back failed: {}", e);
        }
      }
      Some(response)
    });

    let cached = match self.store.get(&self.version, &key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(request = %key, "cache lookup failed, treating as miss: {}", e);
        None
      }
    };

    if let Some(entry) = cached {
      return Ok(Served::Cache {
        response: entry.response,
        cached_at: entry.cached_at,
      });
    }

    match revalidate.await {
      Ok(Some(response)) => Ok(Served::Network(response)),
      Ok(None) => Ok(Served::Unavailable),
      Err(e) => {
        debug!("revalidation task aborted: {}", e);
        Ok(Served::Unavailable)
      }
    }
  }
}

//! Offline response caching: request interception backed by a persistent,
//! generation-versioned entry store.
//!
//! This module provides the offline cache proxy and its storage:
//! - GET requests are served cache-first, with the network result written
//!   back in the background (stale-while-revalidate)
//! - Cached responses live in named generations; bumping the configured
//!   version string invalidates every previously stored entry on the next
//!   activation
//! - The precache set is fetched and stored atomically at install

mod key;
mod proxy;
mod response;
mod store;

pub use key::{Method, RequestKey, ResourceRequest};
pub use proxy::{CacheProxy, ProxyPhase};
pub use response::{CachedEntry, CachedResponse, Served};
pub use store::{GenerationStore, SqliteStore};

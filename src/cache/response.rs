//! Captured responses and serve outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A captured HTTP response: everything needed to replay it to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  /// Whether this response may be written into the entry store.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A stored entry together with its storage timestamp.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: CachedResponse,
  pub cached_at: DateTime<Utc>,
}

/// What the proxy handed back to the caller, and where it came from.
#[derive(Debug)]
pub enum Served {
  /// Entry store hit, returned without waiting for the network.
  Cache {
    response: CachedResponse,
    cached_at: DateTime<Utc>,
  },
  /// Entry store miss, answered by the network.
  Network(CachedResponse),
  /// Non-GET request forwarded without interception.
  Passthrough(CachedResponse),
  /// Entry store miss and the network failed; nothing to fall back to.
  Unavailable,
}

impl Served {
  pub fn response(&self) -> Option<&CachedResponse> {
    match self {
      Served::Cache { response, .. } => Some(response),
      Served::Network(response) | Served::Passthrough(response) => Some(response),
      Served::Unavailable => None,
    }
  }

  pub fn is_unavailable(&self) -> bool {
    matches!(self, Served::Unavailable)
  }
}

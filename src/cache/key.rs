//! Request identity for cache lookups.

use std::fmt;
use std::str::FromStr;

use color_eyre::{eyre::eyre, Report};
use sha2::{Digest, Sha256};

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }

  /// Only GET responses are ever cached; everything else passes through.
  pub fn is_get(&self) -> bool {
    matches!(self, Method::Get)
  }
}

impl FromStr for Method {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "get" => Ok(Method::Get),
      "head" => Ok(Method::Head),
      "post" => Ok(Method::Post),
      "put" => Ok(Method::Put),
      "patch" => Ok(Method::Patch),
      "delete" => Ok(Method::Delete),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An outgoing request as seen by the proxy: method, root-relative path,
/// and any extra headers to forward.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
  pub method: Method,
  pub path: String,
  pub headers: Vec<(String, String)>,
}

impl ResourceRequest {
  /// A plain GET for a root-relative path.
  pub fn get(path: &str) -> Self {
    Self {
      method: Method::Get,
      path: path.to_string(),
      headers: Vec::new(),
    }
  }

  /// Identity of this request in the entry store.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(self.method, &self.path)
  }
}

/// Identity of a request in the entry store: method plus normalized path.
///
/// Two requests with the same key address the same entry; the stored hash
/// is what the persistent store indexes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  method: Method,
  path: String,
}

impl RequestKey {
  pub fn new(method: Method, path: &str) -> Self {
    Self {
      method,
      path: normalize_path(path),
    }
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.path.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn method(&self) -> Method {
    self.method
  }

  pub fn path(&self) -> &str {
    &self.path
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.path)
  }
}

/// Normalize a path for consistent keying: trim whitespace, drop any
/// fragment, and ensure a leading slash. Query strings are significant
/// and kept as-is.
fn normalize_path(path: &str) -> String {
  let path = path.trim();
  let path = path.split('#').next().unwrap_or(path);
  if path.starts_with('/') {
    path.to_string()
  } else {
    format!("/{}", path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_stability() {
    let a = RequestKey::new(Method::Get, "/index.html").hash();
    let b = RequestKey::new(Method::Get, "/index.html").hash();
    assert_eq!(a, b);
  }

  #[test]
  fn test_hash_differs_by_path() {
    let root = RequestKey::new(Method::Get, "/").hash();
    let index = RequestKey::new(Method::Get, "/index.html").hash();
    assert_ne!(root, index);
  }

  #[test]
  fn test_hash_differs_by_method() {
    let get = RequestKey::new(Method::Get, "/api/records").hash();
    let post = RequestKey::new(Method::Post, "/api/records").hash();
    assert_ne!(get, post);
  }

  #[test]
  fn test_hash_format() {
    let hash = RequestKey::new(Method::Get, "/").hash();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_normalization_adds_leading_slash() {
    assert_eq!(
      RequestKey::new(Method::Get, "index.html"),
      RequestKey::new(Method::Get, "/index.html")
    );
  }

  #[test]
  fn test_normalization_drops_fragment_keeps_query() {
    assert_eq!(
      RequestKey::new(Method::Get, "/page#section"),
      RequestKey::new(Method::Get, "/page")
    );
    assert_ne!(
      RequestKey::new(Method::Get, "/page?tab=1"),
      RequestKey::new(Method::Get, "/page")
    );
  }

  #[test]
  fn test_method_parsing() {
    assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
    assert_eq!("POST".parse::<Method>().unwrap(), Method::Post);
    assert!("brew".parse::<Method>().is_err());
  }
}

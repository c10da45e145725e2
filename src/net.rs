//! HTTP client for the configured origin.

use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::cache::{CachedResponse, Method, ResourceRequest};
use crate::config::Config;

/// Thin wrapper over reqwest, bound to the configured origin.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  origin: Url,
}

impl HttpClient {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin URL {}: {}", config.origin, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  /// Send a request for a root-relative path and capture the response.
  ///
  /// Transport failures are errors; any HTTP status, success or not, is a
  /// captured response.
  pub async fn send(&self, request: ResourceRequest) -> Result<CachedResponse> {
    let url = self
      .origin
      .join(&request.path)
      .map_err(|e| eyre!("Invalid resource path {}: {}", request.path, e))?;

    let mut outgoing = self.client.request(method_for(request.method), url.clone());
    for (name, value) in &request.headers {
      outgoing = outgoing.header(name.as_str(), value.as_str());
    }

    let response = outgoing
      .send()
      .await
      .map_err(|e| eyre!("Request for {} failed: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
      .to_vec();

    Ok(CachedResponse {
      status,
      headers,
      body,
    })
  }
}

fn method_for(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

//! HTTP client shared by download jobs, with runtime proxy switching driven
//! by the `useProxy`/`proxy` app store keys.

use anyhow::Context;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone)]
pub struct Transport {
  direct: reqwest::Client,
  proxied: Arc<RwLock<Option<reqwest::Client>>>,
}

impl Transport {
  pub fn new() -> anyhow::Result<Self> {
    Ok(Self {
      direct: build_client(None)?,
      proxied: Arc::new(RwLock::new(None)),
    })
  }

  /// Applies or clears the global proxy. An invalid proxy url is an error
  /// and leaves the previous configuration in place.
  pub fn set_proxy(&self, enabled: bool, proxy_url: &str) -> anyhow::Result<()> {
    if !enabled || proxy_url.trim().is_empty() {
      *self.proxied.write() = None;
      return Ok(());
    }
    let client = build_client(Some(proxy_url))?;
    *self.proxied.write() = Some(client);
    Ok(())
  }

  pub fn proxy_enabled(&self) -> bool {
    self.proxied.read().is_some()
  }

  pub fn client(&self) -> reqwest::Client {
    self
      .proxied
      .read()
      .clone()
      .unwrap_or_else(|| self.direct.clone())
  }
}

fn build_client(proxy_url: Option<&str>) -> anyhow::Result<reqwest::Client> {
  let mut b = reqwest::Client::builder()
    .user_agent("MediaDock/0.1")
    .redirect(reqwest::redirect::Policy::limited(10))
    .connect_timeout(std::time::Duration::from_secs(15));
  if let Some(p) = proxy_url {
    let proxy = reqwest::Proxy::all(p).context("invalid proxy url")?;
    b = b.proxy(proxy);
  }
  b.build().context("failed to build reqwest client")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn enabling_a_proxy_switches_the_client() {
    let t = Transport::new().unwrap();
    assert!(!t.proxy_enabled());

    t.set_proxy(true, "http://127.0.0.1:1080").unwrap();
    assert!(t.proxy_enabled());

    t.set_proxy(false, "http://127.0.0.1:1080").unwrap();
    assert!(!t.proxy_enabled());
  }

  #[test]
  fn empty_proxy_url_clears_instead_of_failing() {
    let t = Transport::new().unwrap();
    t.set_proxy(true, "http://127.0.0.1:1080").unwrap();
    t.set_proxy(true, "  ").unwrap();
    assert!(!t.proxy_enabled());
  }

  #[test]
  fn invalid_proxy_url_keeps_previous_config() {
    let t = Transport::new().unwrap();
    t.set_proxy(true, "http://127.0.0.1:1080").unwrap();
    assert!(t.set_proxy(true, "http://[not a url").is_err());
    assert!(t.proxy_enabled());
  }
}

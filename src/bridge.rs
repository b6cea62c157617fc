//! Bridge lifecycle and caller-facing API
use crate::endpoint::SessionEndpoint;
use crate::errors::{Error, Result};
use crate::headers::HeaderTable;
use crate::interceptor::Interceptor;
use crate::port::{wait_for_port, DEFAULT_PORT_RETRIES, DEFAULT_PORT_RETRY_INTERVAL};
use crate::process::{describe_exit, spawn_proxy, ProxyProcess};
use crate::stash::{Stash, StashFilter, StashedItem};
use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Port the bridge listens on; the proxy addon dials back to it.
pub const BRIDGE_PORT: u16 = 8765;
/// Port the external proxy accepts client traffic on. Used for the readiness
/// probe and the pass-through fetch.
pub const PROXY_PORT: u16 = 8080;

/// Options controlling how the external proxy is launched.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
  /// HTTP paths to intercept entirely, without hitting the server.
  pub intercept_paths: Vec<String>,
  /// Suppress startup messages and run mitmdump with `-q`.
  pub quiet: bool,
  /// Only intercept text files (JavaScript/HTML/CSS/etc.), passing media
  /// files through untouched.
  pub only_intercept_text_files: bool,
  /// Host pattern mitmproxy should ignore entirely.
  pub ignore_hosts: Option<String>,
  /// Path to the mitmproxy addon script shipped with this crate.
  pub script_path: PathBuf,
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      intercept_paths: Vec::new(),
      quiet: true,
      only_intercept_text_files: false,
      ignore_hosts: None,
      script_path: PathBuf::from("scripts/proxy.py"),
    }
  }
}

/// Result of a pass-through fetch routed via the running proxy.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  /// The numerical status code.
  pub status_code: u16,
  /// Response header fields.
  pub headers: HeaderTable,
  /// Response body bytes.
  pub body: Bytes,
}

/// The bridge: launches (or adopts) the external proxy process and runs the
/// interception pipeline.
///
/// A value of this type only exists once startup fully completed — the proxy
/// port reachable *and* the proxy dialed back into the bridge — so every
/// method runs against a ready bridge by construction.
pub struct MitmBridge {
  endpoint: SessionEndpoint,
  process: Option<ProxyProcess>,
  stash: Arc<Mutex<Stash>>,
  client: reqwest::Client,
}

impl MitmBridge {
  /// Start the bridge: listen for the proxy's dial-back, reuse an already
  /// running proxy or spawn mitmdump, and wait until both the proxy port is
  /// reachable and the proxy has connected back.
  ///
  /// On any startup failure the listening socket is closed before the error
  /// propagates, so no partial state survives a failed `create`.
  pub async fn create(interceptor: Arc<dyn Interceptor>, config: BridgeConfig) -> Result<Self> {
    let stash = Arc::new(Mutex::new(Stash::default()));
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, BRIDGE_PORT));
    let endpoint = SessionEndpoint::bind(addr, interceptor, stash.clone()).await?;

    let startup = async {
      let process = Self::start_proxy(&config, &endpoint).await?;
      let client = Self::build_client()?;
      Ok::<_, Error>((process, client))
    }
    .await;

    match startup {
      Ok((process, client)) => Ok(Self {
        endpoint,
        process,
        stash,
        client,
      }),
      Err(e) => {
        endpoint.close();
        Err(e)
      }
    }
  }

  /// Probe for an existing proxy; spawn one when nothing is listening, then
  /// race its exit against the port opening. Completes only after the first
  /// dial-back connection arrives.
  async fn start_proxy(
    config: &BridgeConfig,
    endpoint: &SessionEndpoint,
  ) -> Result<Option<ProxyProcess>> {
    let process = match wait_for_port(PROXY_PORT, 1, DEFAULT_PORT_RETRY_INTERVAL).await {
      Ok(()) => {
        if !config.quiet {
          tracing::info!("[bridge] mitmproxy already running");
        }
        None
      }
      Err(_) => {
        if !config.quiet {
          tracing::info!("[bridge] mitmproxy not running; starting up mitmdump");
        }
        let mut process = spawn_proxy(config)?;
        tokio::select! {
          status = process.wait() => {
            return Err(Error::ExitedEarly(describe_exit(status)));
          }
          ready = wait_for_port(PROXY_PORT, DEFAULT_PORT_RETRIES, DEFAULT_PORT_RETRY_INTERVAL) => {
            ready?;
          }
        }
        Some(process)
      }
    };

    // Port reachability alone does not prove the proxy is using this bridge;
    // readiness additionally requires the dial-back connection.
    endpoint.proxy_connected().await;
    Ok(process)
  }

  fn build_client() -> Result<reqwest::Client> {
    let proxy = reqwest::Proxy::all(format!("http://127.0.0.1:{PROXY_PORT}"))?;
    let client = reqwest::Client::builder()
      .proxy(proxy)
      // The proxy terminates TLS with its own generated certificates.
      .danger_accept_invalid_certs(true)
      .build()?;
    Ok(client)
  }

  fn stash_guard(&self) -> MutexGuard<'_, Stash> {
    match self.stash.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// Whether rewritten response bodies are being stashed.
  pub fn stash_enabled(&self) -> bool {
    self.stash_guard().enabled()
  }

  /// Toggle stashing. Disabling clears the stash immediately.
  pub fn set_stash_enabled(&self, enabled: bool) {
    self.stash_guard().set_enabled(enabled);
  }

  /// The current stash acceptance filter.
  pub fn stash_filter(&self) -> StashFilter {
    self.stash_guard().filter()
  }

  /// Replace the stash acceptance filter. [`StashFilter::Default`] restores
  /// the built-in HTML-or-JavaScript predicate.
  pub fn set_stash_filter(&self, filter: StashFilter) {
    self.stash_guard().set_filter(filter);
  }

  /// Retrieve the stashed item for the given request URL, if any.
  pub fn get_from_stash(&self, url: &str) -> Option<StashedItem> {
    self.stash_guard().get(url)
  }

  /// Visit every stashed item as `(item, url)`.
  pub fn for_each_stash_item(&self, f: impl FnMut(&StashedItem, &str)) {
    self.stash_guard().for_each(f);
  }

  /// Fetch the given URL with a GET request routed through the running
  /// proxy, so the response passes through the interceptor like any other.
  pub async fn proxy_get(&self, url: &str) -> Result<HttpResponse> {
    let response = self.client.get(url).send().await?;
    let status_code = response.status().as_u16();
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
    let body = response.bytes().await?;
    Ok(HttpResponse {
      status_code,
      headers,
      body,
    })
  }

  /// Shut the bridge down: gracefully terminate a spawned proxy process
  /// (waiting for its exit) and then close the listening socket. When no
  /// live process is owned, the socket is closed immediately.
  pub async fn shutdown(mut self) -> Result<()> {
    if let Some(mut process) = self.process.take() {
      process.terminate().await?;
    }
    self.endpoint.close();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_matches_original_defaults() {
    let config = BridgeConfig::default();
    assert!(config.intercept_paths.is_empty());
    assert!(config.quiet);
    assert!(!config.only_intercept_text_files);
    assert!(config.ignore_hosts.is_none());
    assert_eq!(config.script_path, PathBuf::from("scripts/proxy.py"));
  }

  #[test]
  fn well_known_ports() {
    assert_eq!(BRIDGE_PORT, 8765);
    assert_eq!(PROXY_PORT, 8080);
  }
}

//! bridge error
use thiserror::Error as ThisError;

/// A `Result` alias where the `Err` case is `mitm_bridge::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// The errors that may occur when driving the bridge.
#[derive(ThisError, Debug)]
pub enum Error {
  /// Malformed length fields or a truncated buffer while decoding a frame.
  /// Fatal for the connection it occurred on, not for the endpoint.
  #[error("framing error: {0}")]
  Framing(String),
  /// The watched port never became reachable within the retry budget.
  #[error("out of retries waiting for port {0}")]
  OutOfRetries(u16),
  /// The mitmdump executable could not be found.
  #[error(
    "mitmdump, which is an executable that ships with mitmproxy, is not on your PATH. \
     Please ensure that you can run mitmdump --version successfully from your command line."
  )]
  MitmdumpNotFound,
  /// mitmdump was found but failed to launch.
  #[error("unable to start mitmproxy: {0}")]
  Spawn(std::io::Error),
  /// The spawned proxy process exited before it became ready.
  #[error("mitmproxy exited before becoming ready: {0}")]
  ExitedEarly(String),
  /// IO error
  #[error(transparent)]
  Io(#[from] std::io::Error),
  /// Wire metadata serialization/deserialization error
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  /// Pass-through HTTP client error
  #[error(transparent)]
  Client(#[from] reqwest::Error),
}

//! TCP port watcher with bounded retries
use crate::errors::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Default number of connection attempts before giving up.
pub const DEFAULT_PORT_RETRIES: u32 = 10;
/// Default pause between attempts, also the bound on a single connect.
pub const DEFAULT_PORT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Wait for the given local port to accept a TCP connection.
///
/// Each attempt is a connect to `127.0.0.1:port` bounded by `interval`; the
/// probe socket is dropped as soon as the connect succeeds. Failed attempts
/// are separated by an `interval` pause. Attempts run strictly one at a time,
/// so no probe or timer outlives the call. When `retries` attempts have all
/// failed the result is [`Error::OutOfRetries`].
///
/// `retries = 1` doubles as a cheap one-shot "is anything listening" probe.
pub async fn wait_for_port(port: u16, retries: u32, interval: Duration) -> Result<()> {
  for attempt in 1..=retries {
    match timeout(interval, TcpStream::connect(("127.0.0.1", port))).await {
      Ok(Ok(probe)) => {
        drop(probe);
        return Ok(());
      }
      // Refused, or the connect ran out its time slice.
      Ok(Err(_)) | Err(_) => {
        if attempt < retries {
          sleep(interval).await;
        }
      }
    }
  }
  Err(Error::OutOfRetries(port))
}

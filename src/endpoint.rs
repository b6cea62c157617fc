//! Listening endpoint the external proxy dials back into
use crate::errors::{Error, Result};
use crate::interceptor::Interceptor;
use crate::message::{frame_sections, InterceptedMessage};
use crate::stash::{Stash, StashedItem};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Owns the listening socket the proxy connects back to, and the pipeline
/// that runs the interceptor over every framed message.
pub(crate) struct SessionEndpoint {
  accept_task: JoinHandle<()>,
  first_connection: Arc<Notify>,
  local_addr: SocketAddr,
}

impl SessionEndpoint {
  /// Bind the listener and start accepting proxy connections.
  pub(crate) async fn bind(
    addr: SocketAddr,
    interceptor: Arc<dyn Interceptor>,
    stash: Arc<Mutex<Stash>>,
  ) -> Result<Self> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let first_connection = Arc::new(Notify::new());
    let notify = first_connection.clone();
    let accept_task = tokio::spawn(accept_loop(listener, interceptor, stash, notify));
    Ok(Self {
      accept_task,
      first_connection,
      local_addr,
    })
  }

  /// Resolve once the proxy has dialed in at least once. The permit is
  /// stored, so a connection that arrived before this call still counts.
  pub(crate) async fn proxy_connected(&self) {
    self.first_connection.notified().await;
  }

  /// Address the endpoint is actually listening on.
  pub(crate) fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Stop accepting and drop the listening socket. In-flight connections are
  /// not torn down; a slow interceptor finishes its message.
  pub(crate) fn close(&self) {
    self.accept_task.abort();
  }
}

async fn accept_loop(
  listener: TcpListener,
  interceptor: Arc<dyn Interceptor>,
  stash: Arc<Mutex<Stash>>,
  first_connection: Arc<Notify>,
) {
  loop {
    match listener.accept().await {
      Ok((stream, peer_addr)) => {
        tracing::debug!("[bridge] proxy connected from {}", peer_addr);
        first_connection.notify_one();
        let interceptor = interceptor.clone();
        let stash = stash.clone();
        tokio::spawn(async move {
          if let Err(e) = handle_connection(stream, interceptor, stash).await {
            match &e {
              // Abrupt proxy-side closes are expected, not noteworthy.
              Error::Io(io) if io.kind() == ErrorKind::ConnectionReset => {}
              _ => tracing::warn!("[bridge] connection {} failed: {}", peer_addr, e),
            }
          }
        });
      }
      Err(e) => {
        tracing::error!("[bridge] failed to accept connection: {}", e);
      }
    }
  }
}

/// Process framed messages from one proxy connection, strictly in receipt
/// order: the next frame is not read until the previous reply was written.
async fn handle_connection(
  mut stream: TcpStream,
  interceptor: Arc<dyn Interceptor>,
  stash: Arc<Mutex<Stash>>,
) -> Result<()> {
  loop {
    let mut header = [0u8; 12];
    match stream.read_exact(&mut header).await {
      Ok(_) => {}
      // Clean close between frames.
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
      Err(e) => return Err(e.into()),
    }
    let (metadata_size, request_size, response_size) = frame_sections(&header)?;

    let mut frame = vec![0u8; 12 + metadata_size + request_size + response_size];
    frame[..12].copy_from_slice(&header);
    stream.read_exact(&mut frame[12..]).await?;

    let mut message = InterceptedMessage::from_frame(&frame)?;
    interceptor.intercept(&mut message).await;

    offer_to_stash(&stash, &message);

    let reply = message.to_frame()?;
    stream.write_all(&reply).await?;
    stream.flush().await?;
  }
}

/// Stash the possibly-rewritten response, keyed by the request URL. The
/// content type is read *after* interception so a rewritten header counts.
fn offer_to_stash(stash: &Mutex<Stash>, message: &InterceptedMessage) {
  let mut guard = match stash.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  };
  if guard.enabled() {
    let item = StashedItem::new(
      message.request().raw_url(),
      message.response().headers().get("content-type"),
      message.response_body().clone(),
    );
    guard.offer(item);
  }
}

#![deny(missing_docs)]

//! # mitm-bridge
//!
//! The `mitm-bridge` crate drives an external [mitmproxy](https://mitmproxy.org)
//! process and lets caller-supplied logic inspect or rewrite every intercepted
//! HTTP response before it reaches the client.
//!
//! The bridge owns a listening socket the proxy dials back into. Each
//! intercepted request/response pair arrives as one length-prefixed binary
//! frame, is decoded into an [`InterceptedMessage`], handed to the caller's
//! [`Interceptor`], re-encoded and written back on the same connection. TLS
//! termination, certificate generation and HTTP de-chunking/decoding all stay
//! inside mitmproxy; this crate only speaks the framing protocol and
//! supervises the process.
//!
//! # Example
//!
//! ```no_run
//! use mitm_bridge::{BridgeConfig, InterceptedMessage, Interceptor, MitmBridge};
//! use std::sync::Arc;
//!
//! struct Upcase;
//!
//! #[async_trait::async_trait]
//! impl Interceptor for Upcase {
//!   async fn intercept(&self, message: &mut InterceptedMessage) {
//!     let body = message.response_body().to_ascii_uppercase();
//!     message.set_response_body(body);
//!   }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let bridge = MitmBridge::create(Arc::new(Upcase), BridgeConfig::default()).await?;
//!   let response = bridge.proxy_get("http://example.com/").await?;
//!   println!("{}", response.status_code);
//!   bridge.shutdown().await?;
//!   Ok(())
//! }
//! ```

mod bridge;
mod endpoint;
mod errors;
mod headers;
mod interceptor;
mod message;
mod port;
mod process;
mod stash;

pub use bridge::{BridgeConfig, HttpResponse, MitmBridge, BRIDGE_PORT, PROXY_PORT};
pub use errors::{Error, Result};
pub use headers::HeaderTable;
pub use interceptor::{Interceptor, LoggingInterceptor, NopInterceptor};
pub use message::{InterceptedMessage, InterceptedRequest, InterceptedResponse, RequestMetadata, ResponseMetadata};
pub use port::{wait_for_port, DEFAULT_PORT_RETRIES, DEFAULT_PORT_RETRY_INTERVAL};
pub use stash::{StashFilter, StashedItem};

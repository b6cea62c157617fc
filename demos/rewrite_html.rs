//! Launch the bridge and rewrite every HTML response body.
//!
//! Run with mitmproxy installed, then point a client at the proxy:
//!   cargo run --example rewrite_html
//!   curl -x http://127.0.0.1:8080 http://example.com/

use bytes::Bytes;
use mitm_bridge::{BridgeConfig, InterceptedMessage, Interceptor, MitmBridge};
use std::sync::Arc;

struct BannerInterceptor;

#[async_trait::async_trait]
impl Interceptor for BannerInterceptor {
  async fn intercept(&self, message: &mut InterceptedMessage) {
    if message.response().headers().get("content-type").starts_with("text/html") {
      let mut body = b"<h1>intercepted</h1>".to_vec();
      body.extend_from_slice(message.response_body());
      message.set_response_body(Bytes::from(body));
    }
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt::init();

  let config = BridgeConfig {
    quiet: false,
    ..Default::default()
  };
  let bridge = MitmBridge::create(Arc::new(BannerInterceptor), config).await?;
  bridge.set_stash_enabled(true);

  let response = bridge.proxy_get("http://example.com/").await?;
  println!("status: {}", response.status_code);
  println!("body: {} bytes", response.body.len());

  bridge.for_each_stash_item(|item, url| {
    println!("stashed {} ({})", url, item.short_mime_type());
  });

  bridge.shutdown().await?;
  Ok(())
}

//! Integration tests for mitm-bridge

use bytes::Bytes;
use mitm_bridge::{
  wait_for_port, Error, HeaderTable, InterceptedMessage, Interceptor, NopInterceptor,
  ResponseMetadata, StashFilter, StashedItem,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Build an inbound frame the way the mitmproxy addon does.
fn inbound_frame(metadata: &serde_json::Value, request_body: &[u8], response_body: &[u8]) -> Vec<u8> {
  let metadata = serde_json::to_vec(metadata).unwrap();
  let mut frame = Vec::new();
  frame.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
  frame.extend_from_slice(&(request_body.len() as i32).to_le_bytes());
  frame.extend_from_slice(&(response_body.len() as i32).to_le_bytes());
  frame.extend_from_slice(&metadata);
  frame.extend_from_slice(request_body);
  frame.extend_from_slice(response_body);
  frame
}

/// Split a reply frame into parsed metadata and body bytes.
fn parse_reply(frame: &[u8]) -> (ResponseMetadata, Vec<u8>) {
  let metadata_size = i32::from_le_bytes(frame[0..4].try_into().unwrap()) as usize;
  let body_size = i32::from_le_bytes(frame[4..8].try_into().unwrap()) as usize;
  assert_eq!(frame.len(), 8 + metadata_size + body_size, "frame has trailing bytes");
  let metadata = serde_json::from_slice(&frame[8..8 + metadata_size]).unwrap();
  (metadata, frame[8 + metadata_size..].to_vec())
}

struct BodyRewriter(&'static [u8]);

#[async_trait::async_trait]
impl Interceptor for BodyRewriter {
  async fn intercept(&self, message: &mut InterceptedMessage) {
    // Suspend before rewriting; the pipeline must await this.
    tokio::time::sleep(Duration::from_millis(10)).await;
    message.set_response_body(Bytes::from_static(self.0));
  }
}

#[tokio::test]
async fn frame_pipeline_end_to_end() {
  let metadata = serde_json::json!({
    "request": {"method": "GET", "url": "http://x/y", "headers": [["Host", "x"]]},
    "response": {"status_code": 200, "headers": [["content-type", "text/html"]]}
  });
  let frame = inbound_frame(&metadata, b"", b"<h1>hi</h1>");

  let mut message = InterceptedMessage::from_frame(&frame).expect("valid frame");
  assert_eq!(message.request().method(), "get");
  assert_eq!(message.request().raw_url(), "http://x/y");

  let interceptor: Arc<dyn Interceptor> = Arc::new(BodyRewriter(b"<h1>bye</h1>"));
  interceptor.intercept(&mut message).await;

  let (reply, body) = parse_reply(&message.to_frame().unwrap());
  assert_eq!(reply.status_code, 200);
  assert_eq!(body, b"<h1>bye</h1>");
  assert_eq!(
    reply.headers.get("content-length"),
    body.len().to_string(),
    "content-length must track the rewritten body"
  );
  assert_eq!(reply.headers.get("content-type"), "text/html");
}

#[tokio::test]
async fn nop_interceptor_round_trips_the_response() {
  let metadata = serde_json::json!({
    "request": {"method": "POST", "url": "http://host/path?q=1", "headers": []},
    "response": {
      "status_code": 302,
      "headers": [["location", "/next"], ["set-cookie", "a=1"], ["set-cookie", "b=2"]]
    }
  });
  let frame = inbound_frame(&metadata, b"payload", b"redirecting");

  let mut message = InterceptedMessage::from_frame(&frame).unwrap();
  NopInterceptor.intercept(&mut message).await;

  let (reply, body) = parse_reply(&message.to_frame().unwrap());
  assert_eq!(reply.status_code, 302);
  assert_eq!(body, b"redirecting");
  // Repeated fields survive the trip in order.
  let cookies: Vec<&str> = reply
    .headers
    .iter()
    .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
    .map(|(_, v)| v)
    .collect();
  assert_eq!(cookies, vec!["a=1", "b=2"]);
}

#[test]
fn header_table_contract() {
  let mut headers = HeaderTable::new();
  headers.set("Content-Type", "x");
  assert_eq!(headers.get("content-type"), "x");
  headers.remove("CONTENT-TYPE");
  assert_eq!(headers.get("Content-Type"), "");
  assert_eq!(headers.get("never-set"), "");
}

#[test]
fn default_stash_filter_acceptance_set() {
  let filter = StashFilter::default();
  let accepted: Vec<bool> = ["text/html", "text/javascript", "image/png"]
    .iter()
    .map(|mime| {
      filter.accepts(
        "http://x/",
        &StashedItem::new("http://x/", *mime, Bytes::new()),
      )
    })
    .collect();
  assert_eq!(accepted, vec![true, true, false]);
}

#[tokio::test]
async fn port_watcher_fails_within_bounds() {
  // Bind-then-drop gives a local port with nothing listening.
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  drop(listener);

  let started = Instant::now();
  let err = wait_for_port(port, 1, Duration::from_millis(1)).await.unwrap_err();
  assert!(matches!(err, Error::OutOfRetries(p) if p == port));
  assert!(
    started.elapsed() < Duration::from_secs(2),
    "one-shot probe took too long"
  );
}

#[test]
fn framing_errors_are_reported_as_such() {
  // Truncated buffer.
  assert!(matches!(
    InterceptedMessage::from_frame(b"too short"),
    Err(Error::Framing(_))
  ));

  // Declared sections longer than the buffer.
  let mut frame = Vec::new();
  frame.extend_from_slice(&(1000i32).to_le_bytes());
  frame.extend_from_slice(&(0i32).to_le_bytes());
  frame.extend_from_slice(&(0i32).to_le_bytes());
  frame.extend_from_slice(b"{}");
  assert!(matches!(
    InterceptedMessage::from_frame(&frame),
    Err(Error::Framing(_))
  ));
}

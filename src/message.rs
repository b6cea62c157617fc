//! Intercepted request/response views and the binary frame codec
use crate::errors::{Error, Result};
use crate::headers::HeaderTable;
use bytes::Bytes;
use http::Uri;
use serde::{Deserialize, Serialize};

/// Response headers that are stripped unconditionally when a response view is
/// built. The upstream proxy has already de-chunked and decoded the body, so
/// these fields would no longer describe the bytes the interceptor sees, and
/// the CSP family would block the rewrites this bridge exists for.
const STRIPPED_RESPONSE_HEADERS: [&str; 5] = [
  "transfer-encoding",
  "content-encoding",
  "content-security-policy",
  "x-webkit-csp",
  "x-content-security-policy",
];

/// Request half of the wire metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
  /// HTTP method (GET/DELETE/etc.)
  pub method: String,
  /// Target URL of the request.
  pub url: String,
  /// Header fields as key/value pairs; names may repeat.
  pub headers: HeaderTable,
}

/// Response half of the wire metadata record. Also the shape of the metadata
/// in reply frames sent back to the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
  /// The numerical status code.
  pub status_code: u16,
  /// Header fields as key/value pairs; names may repeat.
  pub headers: HeaderTable,
}

#[derive(Debug, Deserialize)]
struct MessageMetadata {
  request: RequestMetadata,
  response: ResponseMetadata,
}

/// An intercepted HTTP request from a client.
///
/// Read-only from the pipeline's perspective; the wire protocol only carries
/// response rewrites back to the proxy.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
  method: String,
  raw_url: String,
  url: Option<Uri>,
  headers: HeaderTable,
}

impl InterceptedRequest {
  fn new(metadata: RequestMetadata) -> Self {
    let url = metadata.url.parse::<Uri>().ok();
    Self {
      method: metadata.method.to_lowercase(),
      raw_url: metadata.url,
      url,
      headers: metadata.headers,
    }
  }

  /// HTTP method, normalized to lower-case.
  pub fn method(&self) -> &str {
    &self.method
  }

  /// The URL exactly as it appeared on the wire.
  pub fn raw_url(&self) -> &str {
    &self.raw_url
  }

  /// Parsed URL components, when the raw URL was parseable.
  pub fn url(&self) -> Option<&Uri> {
    self.url.as_ref()
  }

  /// Request header fields.
  pub fn headers(&self) -> &HeaderTable {
    &self.headers
  }
}

/// An intercepted HTTP response from a server.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
  status_code: u16,
  headers: HeaderTable,
}

impl InterceptedResponse {
  fn new(metadata: ResponseMetadata) -> Self {
    let mut headers = metadata.headers;
    for name in STRIPPED_RESPONSE_HEADERS {
      headers.remove(name);
    }
    Self {
      status_code: metadata.status_code,
      headers,
    }
  }

  /// The numerical status code.
  pub fn status_code(&self) -> u16 {
    self.status_code
  }

  /// Response header fields.
  pub fn headers(&self) -> &HeaderTable {
    &self.headers
  }

  /// Mutable access to the response header fields.
  pub fn headers_mut(&mut self) -> &mut HeaderTable {
    &mut self.headers
  }

  fn metadata(&self) -> ResponseMetadata {
    ResponseMetadata {
      status_code: self.status_code,
      headers: self.headers.clone(),
    }
  }
}

/// An intercepted HTTP request/response pair plus both bodies.
///
/// Created once per inbound frame, handed to the interceptor by mutable
/// reference, re-serialized exactly once and then discarded.
#[derive(Debug, Clone)]
pub struct InterceptedMessage {
  request: InterceptedRequest,
  response: InterceptedResponse,
  request_body: Bytes,
  response_body: Bytes,
}

impl InterceptedMessage {
  /// Decode an inbound frame received from the proxy.
  ///
  /// Layout: `[metadataSize:i32][requestSize:i32][responseSize:i32]` (all
  /// little-endian) followed by the metadata JSON, the request body and the
  /// response body. Any length that would read past the end of `buf` is a
  /// framing error; header semantics are not validated here.
  pub fn from_frame(buf: &[u8]) -> Result<Self> {
    let metadata_size = frame_len(buf, 0, "metadata")?;
    let request_size = frame_len(buf, 4, "request body")?;
    let response_size = frame_len(buf, 8, "response body")?;

    let metadata_end = 12 + metadata_size;
    let request_end = metadata_end + request_size;
    let response_end = request_end + response_size;
    if response_end > buf.len() {
      return Err(Error::Framing(format!(
        "frame of {} bytes is shorter than its declared sections ({} metadata, {} request, {} response)",
        buf.len(),
        metadata_size,
        request_size,
        response_size
      )));
    }

    let metadata: MessageMetadata = serde_json::from_slice(&buf[12..metadata_end])
      .map_err(|e| Error::Framing(format!("invalid metadata: {e}")))?;

    Ok(Self {
      request: InterceptedRequest::new(metadata.request),
      response: InterceptedResponse::new(metadata.response),
      request_body: Bytes::copy_from_slice(&buf[metadata_end..request_end]),
      response_body: Bytes::copy_from_slice(&buf[request_end..response_end]),
    })
  }

  /// Encode the (possibly rewritten) response half into a reply frame for
  /// transmission back to the proxy.
  ///
  /// Layout: `[metadataSize:i32][bodySize:i32]` (little-endian) followed by
  /// the response metadata JSON and the current response body.
  pub fn to_frame(&self) -> Result<Vec<u8>> {
    let metadata = serde_json::to_vec(&self.response.metadata())?;
    let mut frame = Vec::with_capacity(8 + metadata.len() + self.response_body.len());
    frame.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    frame.extend_from_slice(&(self.response_body.len() as i32).to_le_bytes());
    frame.extend_from_slice(&metadata);
    frame.extend_from_slice(&self.response_body);
    Ok(frame)
  }

  /// The intercepted request.
  pub fn request(&self) -> &InterceptedRequest {
    &self.request
  }

  /// The intercepted response.
  pub fn response(&self) -> &InterceptedResponse {
    &self.response
  }

  /// The body of the HTTP request.
  pub fn request_body(&self) -> &Bytes {
    &self.request_body
  }

  /// The current body of the HTTP response. Change it via
  /// [`set_response_body`](Self::set_response_body) so that `content-length`
  /// stays accurate.
  pub fn response_body(&self) -> &Bytes {
    &self.response_body
  }

  /// Replace the response body and rewrite `content-length` to match.
  pub fn set_response_body(&mut self, body: impl Into<Bytes>) {
    self.response_body = body.into();
    let len = self.response_body.len().to_string();
    self.response.headers.set("content-length", &len);
  }

  /// Change the status code of the response.
  pub fn set_status_code(&mut self, code: u16) {
    self.response.status_code = code;
  }

  /// Set the value of a response header field.
  pub fn set_response_header(&mut self, name: &str, value: &str) {
    self.response.headers.set(name, value);
  }
}

/// Split an inbound frame header into its three section lengths
/// (metadata, request body, response body). Negative lengths are framing
/// errors; so is a total that overflows.
pub(crate) fn frame_sections(header: &[u8; 12]) -> Result<(usize, usize, usize)> {
  let metadata = frame_len(header, 0, "metadata")?;
  let request = frame_len(header, 4, "request body")?;
  let response = frame_len(header, 8, "response body")?;
  metadata
    .checked_add(request)
    .and_then(|n| n.checked_add(response))
    .ok_or_else(|| Error::Framing("frame section lengths overflow".to_string()))?;
  Ok((metadata, request, response))
}

/// Read one little-endian i32 section length out of a frame header.
fn frame_len(buf: &[u8], at: usize, what: &str) -> Result<usize> {
  let bytes: [u8; 4] = match buf.get(at..at + 4).and_then(|s| s.try_into().ok()) {
    Some(b) => b,
    None => {
      return Err(Error::Framing(format!(
        "frame of {} bytes is too short for its header",
        buf.len()
      )))
    }
  };
  let len = i32::from_le_bytes(bytes);
  usize::try_from(len).map_err(|_| Error::Framing(format!("negative {what} length {len}")))
}

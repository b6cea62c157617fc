//! Optional keyed store of post-rewrite response bodies
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A response body captured after interception, keyed by the request URL.
#[derive(Debug, Clone)]
pub struct StashedItem {
  /// The request URL exactly as it appeared on the wire.
  pub raw_url: String,
  /// The response `content-type`, as sent by the server.
  pub mime_type: String,
  /// The (possibly rewritten) response body.
  pub data: Bytes,
}

impl StashedItem {
  /// Create an item from a request URL, content type and body.
  pub fn new(raw_url: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
    Self {
      raw_url: raw_url.into(),
      mime_type: mime_type.into(),
      data,
    }
  }

  /// The MIME type lower-cased and with any trailing `;...` parameter
  /// segment removed, e.g. `text/html; charset=utf-8` becomes `text/html`.
  pub fn short_mime_type(&self) -> String {
    let mime = self.mime_type.to_lowercase();
    match mime.find(';') {
      Some(i) => mime[..i].to_string(),
      None => mime,
    }
  }

  /// Whether the item is an HTML document.
  pub fn is_html(&self) -> bool {
    self.short_mime_type() == "text/html"
  }

  /// Whether the item is JavaScript, under any of its MIME aliases.
  pub fn is_javascript(&self) -> bool {
    matches!(
      self.short_mime_type().as_str(),
      "text/javascript" | "application/javascript" | "text/x-javascript" | "application/x-javascript"
    )
  }
}

/// Predicate deciding which items are stored in the stash.
///
/// `Default` accepts HTML and JavaScript items. Anything that is not a
/// predicate cannot be assigned; the choice is closed at the type level.
#[derive(Clone, Default)]
pub enum StashFilter {
  /// Accept items whose short MIME type is HTML or a JavaScript alias.
  #[default]
  Default,
  /// Caller-supplied predicate over `(request URL, item)`.
  Custom(Arc<dyn Fn(&str, &StashedItem) -> bool + Send + Sync>),
}

impl StashFilter {
  /// Build a custom filter from a predicate.
  pub fn custom<F>(predicate: F) -> Self
  where
    F: Fn(&str, &StashedItem) -> bool + Send + Sync + 'static,
  {
    StashFilter::Custom(Arc::new(predicate))
  }

  /// Whether the filter accepts the given item.
  pub fn accepts(&self, url: &str, item: &StashedItem) -> bool {
    match self {
      StashFilter::Default => item.is_javascript() || item.is_html(),
      StashFilter::Custom(predicate) => predicate(url, item),
    }
  }
}

impl fmt::Debug for StashFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StashFilter::Default => f.write_str("StashFilter::Default"),
      StashFilter::Custom(_) => f.write_str("StashFilter::Custom(..)"),
    }
  }
}

/// The stash itself: a URL-keyed map, populated once per processed message
/// when enabled and the filter accepts. Owned by a single bridge instance.
#[derive(Debug, Default)]
pub(crate) struct Stash {
  enabled: bool,
  filter: StashFilter,
  items: HashMap<String, StashedItem>,
}

impl Stash {
  pub(crate) fn enabled(&self) -> bool {
    self.enabled
  }

  /// Disabling clears all entries immediately; nothing is lazily evicted.
  pub(crate) fn set_enabled(&mut self, enabled: bool) {
    if !enabled {
      self.items.clear();
    }
    self.enabled = enabled;
  }

  pub(crate) fn filter(&self) -> StashFilter {
    self.filter.clone()
  }

  pub(crate) fn set_filter(&mut self, filter: StashFilter) {
    self.filter = filter;
  }

  /// Offer an item for storage. Last write for a URL wins.
  pub(crate) fn offer(&mut self, item: StashedItem) {
    if self.enabled && self.filter.accepts(&item.raw_url, &item) {
      self.items.insert(item.raw_url.clone(), item);
    }
  }

  pub(crate) fn get(&self, url: &str) -> Option<StashedItem> {
    self.items.get(url).cloned()
  }

  pub(crate) fn for_each(&self, mut f: impl FnMut(&StashedItem, &str)) {
    for (url, item) in &self.items {
      f(item, url);
    }
  }
}

//! Ordered header table shared by the request and response views
use serde::{Deserialize, Serialize};

/// An ordered list of header fields with case-insensitive lookup.
///
/// Header fields may be repeated, so the same name can appear multiple times.
/// `get`, `set` and `remove` operate on the *first* field with a matching
/// name; insertion order is preserved except where a field is removed or
/// replaced in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderTable {
  entries: Vec<(String, String)>,
}

impl HeaderTable {
  /// Create an empty table.
  pub fn new() -> Self {
    Self::default()
  }

  fn index_of(&self, name: &str) -> Option<usize> {
    self
      .entries
      .iter()
      .position(|(k, _)| k.eq_ignore_ascii_case(name))
  }

  /// Value of the first field with the given name, or `""` when absent.
  ///
  /// Absence is not an error; the empty string is the miss contract.
  pub fn get(&self, name: &str) -> &str {
    match self.index_of(name) {
      Some(i) => &self.entries[i].1,
      None => "",
    }
  }

  /// Replace the value of the first field with the given name, or append a
  /// new field when none exists. The original field name's casing is kept on
  /// replacement.
  pub fn set(&mut self, name: &str, value: &str) {
    match self.index_of(name) {
      Some(i) => self.entries[i].1 = value.to_string(),
      None => self.entries.push((name.to_string(), value.to_string())),
    }
  }

  /// Remove the first field with the given name. Does nothing when absent.
  pub fn remove(&mut self, name: &str) {
    if let Some(i) = self.index_of(name) {
      self.entries.remove(i);
    }
  }

  /// Remove all fields.
  pub fn clear(&mut self) {
    self.entries.clear();
  }

  /// The live backing sequence of `(name, value)` pairs.
  pub fn entries(&self) -> &[(String, String)] {
    &self.entries
  }

  /// Iterate over all fields in order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Number of fields.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether the table holds no fields.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl From<Vec<(String, String)>> for HeaderTable {
  fn from(entries: Vec<(String, String)>) -> Self {
    Self { entries }
  }
}

impl FromIterator<(String, String)> for HeaderTable {
  fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
    Self {
      entries: iter.into_iter().collect(),
    }
  }
}

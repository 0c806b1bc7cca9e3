//! Message header fields.

/// Well-known header names.
pub mod names {
    /// Message kind tag.
    pub const TYPE: &str = "type";
    /// Protocol version, e.g. `v1`.
    pub const PROTOCOL: &str = "protocol";
    /// Client identification string.
    pub const CLIENT: &str = "client";
    /// Account organization.
    pub const ORG: &str = "org";
    /// Account user name.
    pub const USER: &str = "user";
    /// Account key (a UUID).
    pub const KEY: &str = "key";
    /// Synchronization cursor.
    pub const CURSOR: &str = "cursor";
    /// Response status (`ok` or `rejected`).
    pub const STATUS: &str = "status";
    /// Rejection reason.
    pub const REASON: &str = "reason";
    /// Numeric taskd status code.
    pub const CODE: &str = "code";
    /// Server identification string.
    pub const SERVER: &str = "server";
}

/// Ordered header fields with case-insensitive key lookup.
///
/// Insertion order is preserved on the wire. Inserting a key that is
/// already present (ignoring ASCII case) replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Returns the value for `key`, ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.entries[i].1.as_str())
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Sets a header, returning the previous value if one was replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Iterates over `(key, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of header fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no header fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

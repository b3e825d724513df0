use std::slice;

use bytes::Bytes;

use crate::http::header::{HeaderField, HeaderParseError};

use super::{HeaderName, HeaderValue};

/// An insertion-ordered multimap of header fields.
///
/// Lookups are case-insensitive. Applications hand headers back in the order they want them
/// written, so the order of first insertion is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(size),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.as_str().eq_ignore_ascii_case(name))
    }

    pub fn entry(&mut self, name: HeaderName) -> &mut HeaderValue {
        let idx = match self.position(name.as_str()) {
            Some(idx) => idx,
            None => {
                self.entries.push((name, HeaderValue::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    /// Adds a value, keeping any values already present for the name
    pub fn append(&mut self, name: impl Into<HeaderName>, value: impl Into<Bytes>) {
        self.entry(name.into()).push(value.into());
    }

    /// Replaces all values for the name, keeping its original position
    pub fn insert(&mut self, name: impl Into<HeaderName>, value: impl Into<Bytes>) {
        let value_ref = self.entry(name.into());
        *value_ref = HeaderValue::default();
        value_ref.push(value.into());
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<&HeaderValue> {
        self.position(name.as_ref()).map(|idx| &self.entries[idx].1)
    }

    /// The values for `name` combined into one, see [`HeaderValue::combined`]
    pub fn get_combined(&self, name: impl AsRef<str>) -> Option<Bytes> {
        self.get(name).map(HeaderValue::combined)
    }

    /// The combined value as a string, `None` if absent or not UTF-8
    pub fn get_str(&self, name: impl AsRef<str>) -> Option<String> {
        self.get(name).and_then(HeaderValue::to_str)
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.position(name.as_ref()).is_some()
    }

    pub fn remove(&mut self, name: impl AsRef<str>) -> Option<HeaderValue> {
        let idx = self.position(name.as_ref())?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get_header<T: HeaderField>(&self) -> Result<Option<T::Output>, HeaderParseError> {
        let val = match self.get(&T::NAME) {
            None => return Ok(None),
            Some(val) => val,
        };
        T::parse(val).map(Some)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct Iter<'a> {
    inner: slice::Iter<'a, (HeaderName, HeaderValue)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a HeaderName, &'a HeaderValue);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(name, value)| (name, value))
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a HeaderName, &'a HeaderValue);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderMap
where
    N: Into<HeaderName>,
    V: Into<Bytes>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

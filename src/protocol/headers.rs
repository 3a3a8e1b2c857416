use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Ordered, case-insensitive header storage.
///
/// Every value is kept in arrival order together with the name spelling it
/// arrived with, so requests serialize exactly as built while lookups ignore
/// case. Duplicate names are merged only when read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMultiMap {
    entries: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    key: String,
    value: String,
}

impl HeaderMultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any values already stored under `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        self.entries.push(HeaderEntry {
            name,
            key,
            value: value.into(),
        });
    }

    /// Replace every value stored under `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.append(name, value);
    }

    /// Remove all values under `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.key.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.key.eq_ignore_ascii_case(name))
    }

    /// All values for `name` in arrival order.
    pub fn get_all(&self, name: &str) -> SmallVec<[&str; 2]> {
        self.entries
            .iter()
            .filter(|entry| entry.key.eq_ignore_ascii_case(name))
            .map(|entry| entry.value.as_str())
            .collect()
    }

    /// Merged value for `name`: duplicates joined with `", "`.
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Comma-separated tokens of `name`, compared case-insensitively.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|value| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    }

    /// Lower-cased name to merged value.
    pub fn to_merged_view(&self) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for entry in &self.entries {
            merged
                .entry(entry.key.clone())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&entry.value);
                })
                .or_insert_with(|| entry.value.clone());
        }
        merged
    }

    /// Headers in arrival order with their original spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderMultiMap
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = HeaderMultiMap::new();
        headers.extend(iter);
        headers
    }
}

impl<N, V> Extend<(N, V)> for HeaderMultiMap
where
    N: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (N, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.append(name, value);
        }
    }
}

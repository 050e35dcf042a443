use std::fmt::Display;
use url::form_urlencoded;

/// Ordered request parameters.
///
/// Optional arguments are stored as `None` and never encoded, so an unset
/// argument is omitted from the request instead of being sent empty.
/// `encode` is the one place parameters become bytes: whatever gets
/// signed is exactly what gets sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, Option<String>)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Params::set`].
    pub fn with(mut self, key: &str, value: impl Display) -> Self {
        self.set(key, value);
        self
    }

    /// Builder form of [`Params::set_opt`].
    pub fn with_opt<V: Display>(mut self, key: &str, value: Option<V>) -> Self {
        self.set_opt(key, value);
        self
    }

    /// Set a value, replacing an earlier one with the same key in place.
    pub fn set(&mut self, key: &str, value: impl Display) {
        self.put(key, Some(value.to_string()));
    }

    pub fn set_opt<V: Display>(&mut self, key: &str, value: Option<V>) {
        self.put(key, value.map(|v| v.to_string()));
    }

    fn put(&mut self, key: &str, value: Option<String>) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    /// The value of a key, if it is present and set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Remove a key and return its value if it was set.
    pub fn take(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        self.entries.remove(idx).1
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set entries, in insertion order.
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    /// `application/x-www-form-urlencoded` encoding of the set entries.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.present() {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

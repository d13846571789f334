// Evhub Property Map
// Flat string key/value configuration attached to a device

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

/// Ordered `key = value` properties such as `keyboard.builtIn` or
/// `touch.deviceType`. Values are stored as text and converted on read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    properties: IndexMap<String, String>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// `true`/`false`, or an integer where non-zero is true.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let value = self.get_string(key)?.trim();
        match value {
            "true" => Some(true),
            "false" => Some(false),
            other => other.parse::<i64>().ok().map(|n| n != 0),
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.parse(key)
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.parse(key)
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get_string(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries of `other` win.
    pub fn merge(&mut self, other: &PropertyMap) {
        for (key, value) in other.iter() {
            self.add_property(key, value);
        }
    }
}

impl fmt::Display for PropertyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{} = {}", key, value)?;
        }
        Ok(())
    }
}

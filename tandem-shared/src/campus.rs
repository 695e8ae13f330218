use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A destination campus, normalized to lowercase.
///
/// Upstream data mixes casings ("Burnaby" vs "burnaby"); normalizing at
/// construction lets equality filters and the one-active rule key on a
/// single canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Campus(String);

impl Campus {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Campus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Campus {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Serialize for Campus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Campus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Campus::new(&raw))
    }
}

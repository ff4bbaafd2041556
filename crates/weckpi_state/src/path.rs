//! Field addressing.
//!
//! A field is addressed by a sequence of segments. Two textual forms are
//! accepted: dotted (`music.volume`) and JSON pointer (`/music/volume`).
//! Both parse to the same `FieldPath`.

use crate::error::{StateError, StateResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The address of a field in the state tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses a dotted or JSON-pointer path.
    pub fn parse(raw: &str) -> StateResult<Self> {
        if raw.is_empty() {
            return Err(StateError::invalid_path(raw, "path is empty"));
        }

        let segments: Vec<String> = if let Some(pointer) = raw.strip_prefix('/') {
            pointer
                .split('/')
                .map(|s| s.replace("~1", "/").replace("~0", "~"))
                .collect()
        } else {
            raw.split('.').map(str::to_owned).collect()
        };

        if segments.iter().any(String::is_empty) {
            return Err(StateError::invalid_path(raw, "path contains an empty segment"));
        }

        Ok(Self { segments })
    }

    /// Builds a path from already separated segments.
    pub fn from_segments<I, S>(segments: I) -> StateResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(StateError::invalid_path(
                segments.join("."),
                "path needs at least one non-empty segment",
            ));
        }
        Ok(Self { segments })
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Returns true if `prefix` is a strict ancestor of this path.
    pub fn is_descendant_of(&self, prefix: &FieldPath) -> bool {
        self.segments.len() > prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Renders the path in dotted form.
    pub fn to_dotted(&self) -> String {
        self.segments.join(".")
    }

    /// Renders the path as a JSON pointer.
    pub fn to_pointer(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("/{}", s.replace('~', "~0").replace('/', "~1")))
            .collect()
    }

    /// Looks up the value at this path inside a nested JSON object.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |node, segment| node.as_object()?.get(segment))
    }

    /// Writes `value` at this path inside a nested JSON object, creating
    /// intermediate objects as needed. Non-object intermediates are
    /// overwritten.
    pub fn insert_into(&self, root: &mut Value, value: Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };

        let mut node = root;
        for segment in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(map) => map
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Object(Map::new())),
                _ => return,
            };
        }

        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            map.insert(last.clone(), value);
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dotted())
    }
}

impl FromStr for FieldPath {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_dotted())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Object transfer request accepted on `/transfer`.
///
/// The logical `path` doubles as the pool key and the ownership key on the
/// hash ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub bucket: String,
    pub path: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ObjectRequest {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ObjectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{bucket: '{}', path: '{}'}}", self.bucket, self.path)
    }
}

/// Provenance record produced after a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRequest {
    pub bucket: String,
    pub path: String,
    pub content_hash: String,
}

impl fmt::Display for DatabaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{bucket: '{}', path: '{}', md5: '{}'}}",
            self.bucket, self.path, self.content_hash
        )
    }
}

/// A peer bot as published on its `/info` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetMember {
    pub name: String,
    pub address: String,
}

impl fmt::Display for FleetMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{name: '{}', address: '{}'}}", self.name, self.address)
    }
}

/// Physical location of an object inside a named storage source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub source: String,
    pub bucket: String,
    pub path: String,
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.source, self.bucket, self.path)
    }
}

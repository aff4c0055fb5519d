//! The tool server descriptor file.
//!
//! A JSON document in the widely used shape:
//!
//! ```json
//! { "mcpServers": { "weather": { "command": "python3", "args": ["weather.py"], "env": {} } } }
//! ```
//!
//! `servers` is accepted in place of `mcpServers`. Entries are visited in name order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One named server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The parsed descriptor document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptorFile {
    #[serde(rename = "mcpServers", alias = "servers", default)]
    pub servers: serde_json::Map<String, serde_json::Value>,
}

impl DescriptorFile {
    /// Parse a descriptor document from text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read a descriptor file. A missing file is an empty descriptor.
    pub fn read(path: &Path) -> Result<Self, DescriptorError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| DescriptorError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|e| DescriptorError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode every entry. Entries that fail to decode are returned as errors
    /// alongside the good ones so one bad entry doesn't hide the rest.
    pub fn entries(&self) -> Vec<(String, Result<ServerEntry, String>)> {
        self.servers
            .iter()
            .map(|(name, value)| {
                let entry = serde_json::from_value::<ServerEntry>(value.clone())
                    .map_err(|e| e.to_string());
                (name.clone(), entry)
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Failed to read descriptor file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse descriptor file {path}: {reason}")]
    Parse { path: String, reason: String },
}

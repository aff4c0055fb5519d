//! Descriptor discovery.
//!
//! Two sources are merged: the descriptor file (named servers) and a scan of
//! the discovery directory, where every subdirectory holding a recognized
//! entry file is a server named after the directory. Named servers win on a
//! name clash. Discovery only reads the filesystem; it never starts anything.

use crate::descriptor::{ServerDescriptor, ServerOrigin};
use helmsman_config::{DescriptorFile, ServersConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where to look for tool servers.
#[derive(Debug, Clone)]
pub struct DiscoverySources {
    pub descriptor_file: Option<PathBuf>,
    pub discovery_dir: Option<PathBuf>,
    pub entry_files: Vec<String>,
}

impl DiscoverySources {
    /// Sources that find nothing; servers can still be added by tests or embedders.
    pub fn none() -> Self {
        Self {
            descriptor_file: None,
            discovery_dir: None,
            entry_files: Vec::new(),
        }
    }

    /// Resolve the configured paths against `root`.
    pub fn from_config(config: &ServersConfig, root: &Path) -> Self {
        Self {
            descriptor_file: Some(root.join(&config.descriptor_file)),
            discovery_dir: Some(root.join(&config.discovery_dir)),
            entry_files: config.entry_files.clone(),
        }
    }

    /// Read both sources and merge them. Errors are logged and skipped.
    pub fn discover(&self) -> BTreeMap<String, ServerDescriptor> {
        let configured = self
            .descriptor_file
            .as_deref()
            .map(read_configured)
            .unwrap_or_default();
        let scanned = self
            .discovery_dir
            .as_deref()
            .map(|dir| scan_directory(dir, &self.entry_files))
            .unwrap_or_default();
        merge(configured, scanned)
    }
}

/// Named servers from the descriptor file.
pub fn read_configured(path: &Path) -> Vec<ServerDescriptor> {
    let file = match DescriptorFile::read(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "Skipping descriptor file");
            return Vec::new();
        }
    };

    file.entries()
        .into_iter()
        .filter_map(|(name, entry)| match entry {
            Ok(entry) => Some(
                ServerDescriptor::new(name, entry.command, ServerOrigin::Configured)
                    .with_args(entry.args)
                    .with_env(entry.env),
            ),
            Err(reason) => {
                warn!(server = %name, %reason, "Skipping malformed descriptor entry");
                None
            }
        })
        .collect()
}

/// Servers found by the directory convention.
pub fn scan_directory(dir: &Path, entry_files: &[String]) -> Vec<ServerDescriptor> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "Discovery directory not present");
        return Vec::new();
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read discovery directory");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let Some(entry_file) = entry_files
            .iter()
            .map(|f| path.join(f))
            .find(|candidate| candidate.is_file())
        else {
            continue;
        };

        let (command, args) = launch_command(&entry_file);
        found.push(
            ServerDescriptor::new(name, command, ServerOrigin::AutoDiscovered).with_args(args),
        );
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    found
}

/// Infer how to run an entry file from its extension.
pub fn launch_command(entry_file: &Path) -> (String, Vec<String>) {
    let file = entry_file.display().to_string();
    match entry_file.extension().and_then(|e| e.to_str()) {
        Some("py") => ("python3".into(), vec![file]),
        Some("js") | Some("mjs") | Some("cjs") => ("node".into(), vec![file]),
        Some("ts") => ("npx".into(), vec!["tsx".into(), file]),
        _ => (file, Vec::new()),
    }
}

/// Merge the two sources. Configured entries take priority.
pub fn merge(
    configured: Vec<ServerDescriptor>,
    scanned: Vec<ServerDescriptor>,
) -> BTreeMap<String, ServerDescriptor> {
    let mut arena: BTreeMap<String, ServerDescriptor> = configured
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect();

    for descriptor in scanned {
        if arena.contains_key(&descriptor.name) {
            debug!(server = %descriptor.name, "Auto-discovered server shadowed by configured entry");
            continue;
        }
        arena.insert(descriptor.name.clone(), descriptor);
    }
    arena
}

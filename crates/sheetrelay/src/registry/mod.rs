//! Destination group registry.
//!
//! A [`GroupRegistry`] is an immutable, validated snapshot of the destination
//! groups and the region names known to the resolver. Processing cycles take a
//! snapshot from a [`RegistryHandle`] once and share it across every job in the
//! cycle; reloads publish a whole new snapshot instead of mutating the old one.

pub mod regions;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::normalize_region;

pub use regions::DEFAULT_KNOWN_REGIONS;

/// Errors from loading or validating the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read groups file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse groups JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid group '{id}': {reason}")]
    InvalidGroup { id: String, reason: String },

    #[error("Duplicate group id: {0}")]
    DuplicateId(String),

    #[error("Registry contains no groups")]
    Empty,
}

/// A named routing target.
///
/// Required fields are checked in [`DestinationGroup::new`]; region keys are
/// stored normalized, deduplicated, in their configured order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationGroup {
    id: String,
    display_name: String,
    destination_address: String,
    region_keys: Vec<String>,
}

impl DestinationGroup {
    pub fn new<I, S>(
        id: &str,
        display_name: &str,
        destination_address: &str,
        region_keys: I,
    ) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.trim();
        if id.is_empty() {
            return Err(RegistryError::InvalidGroup {
                id: String::new(),
                reason: "id is empty".to_string(),
            });
        }

        let destination_address = destination_address.trim();
        if destination_address.is_empty() || !destination_address.contains('@') {
            return Err(RegistryError::InvalidGroup {
                id: id.to_string(),
                reason: format!("invalid destination address '{}'", destination_address),
            });
        }

        let mut seen = HashSet::new();
        let keys: Vec<String> = region_keys
            .into_iter()
            .map(|k| normalize_region(k.as_ref()))
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .collect();
        if keys.is_empty() {
            return Err(RegistryError::InvalidGroup {
                id: id.to_string(),
                reason: "no region keys".to_string(),
            });
        }

        let display_name = match display_name.trim() {
            "" => id,
            name => name,
        };

        Ok(Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            destination_address: destination_address.to_string(),
            region_keys: keys,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn destination_address(&self) -> &str {
        &self.destination_address
    }

    /// Normalized region keys in configured order.
    pub fn region_keys(&self) -> &[String] {
        &self.region_keys
    }
}

/// One record of the groups file.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub destination_address: String,
    pub region_keys: RegionKeys,
}

/// Region keys as either a JSON list or a single comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegionKeys {
    List(Vec<String>),
    Joined(String),
}

impl RegionKeys {
    fn into_vec(self) -> Vec<String> {
        match self {
            RegionKeys::List(keys) => keys,
            RegionKeys::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        }
    }
}

/// Immutable snapshot of all destination groups.
#[derive(Debug)]
pub struct GroupRegistry {
    groups: Vec<DestinationGroup>,
    /// Normalized region key -> index of the first group that lists it.
    key_owner: HashMap<String, usize>,
    known_regions: Vec<String>,
    known_lookup: HashSet<String>,
}

impl GroupRegistry {
    /// Builds a registry from validated groups plus the configured known region
    /// names. Every group key is also treated as a known region.
    pub fn new<I, S>(groups: Vec<DestinationGroup>, known_regions: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if groups.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut ids = HashSet::new();
        for group in &groups {
            if !ids.insert(group.id.as_str()) {
                return Err(RegistryError::DuplicateId(group.id.clone()));
            }
        }

        let mut key_owner: HashMap<String, usize> = HashMap::new();
        for (idx, group) in groups.iter().enumerate() {
            for key in &group.region_keys {
                match key_owner.get(key) {
                    Some(&owner) => {
                        tracing::warn!(
                            region = %key,
                            kept = %groups[owner].id,
                            ignored = %group.id,
                            "Region key listed by more than one group, first group wins"
                        );
                    }
                    None => {
                        key_owner.insert(key.clone(), idx);
                    }
                }
            }
        }

        let mut known_lookup = HashSet::new();
        let mut known: Vec<String> = Vec::new();
        let configured = known_regions
            .into_iter()
            .map(|r| normalize_region(r.as_ref()))
            .collect::<Vec<_>>();
        let group_keys = groups.iter().flat_map(|g| g.region_keys.iter().cloned());
        for region in configured.into_iter().chain(group_keys) {
            if !region.is_empty() && known_lookup.insert(region.clone()) {
                known.push(region);
            }
        }

        Ok(Self {
            groups,
            key_owner,
            known_regions: known,
            known_lookup,
        })
    }

    /// Parses the groups file contents.
    pub fn from_json<I, S>(json: &str, known_regions: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let records: Vec<GroupRecord> = serde_json::from_str(json)?;
        let groups = records
            .into_iter()
            .map(|r| {
                DestinationGroup::new(
                    &r.id,
                    &r.display_name,
                    &r.destination_address,
                    r.region_keys.into_vec(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(groups, known_regions)
    }

    /// Loads the groups file at `path`.
    pub fn load(path: &Path, known_regions: &[String]) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let registry = Self::from_json(&content, known_regions)?;
        tracing::info!(
            groups = registry.groups.len(),
            regions = registry.known_regions.len(),
            "Group registry loaded"
        );
        Ok(registry)
    }

    /// Groups in registry order.
    pub fn groups(&self) -> &[DestinationGroup] {
        &self.groups
    }

    pub fn get(&self, id: &str) -> Option<&DestinationGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Returns the registry index of the group owning a normalized region.
    pub fn group_index_for(&self, normalized_region: &str) -> Option<usize> {
        self.key_owner.get(normalized_region).copied()
    }

    pub fn is_known_region(&self, normalized: &str) -> bool {
        self.known_lookup.contains(normalized)
    }

    /// Normalized known region names.
    pub fn known_regions(&self) -> &[String] {
        &self.known_regions
    }
}

/// Shared, swappable reference to the current registry snapshot.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    current: Arc<RwLock<Arc<GroupRegistry>>>,
}

impl RegistryHandle {
    pub fn new(registry: GroupRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Returns the current snapshot. Later publishes do not affect it.
    pub fn snapshot(&self) -> Arc<GroupRegistry> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically replaces the current snapshot.
    pub fn publish(&self, registry: GroupRegistry) {
        let next = Arc::new(registry);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

//! Source registry for managing configured providers

use super::traits::Source;
use crate::config::SourceConfig;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// Which sources a call should reach
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceSelection {
    /// Every registered source, in registration order
    #[default]
    All,
    /// These sources, in this order
    Named(Vec<String>),
}

impl SourceSelection {
    /// A comma-separated list of sources, or every source for `"all"`.
    ///
    /// Repeated names are kept once, at their first position.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("all") {
            return Self::All;
        }

        let mut names: Vec<String> = Vec::new();
        for name in value.split(',').map(|s| s.trim().to_lowercase()) {
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        Self::Named(names)
    }
}

impl Serialize for SourceSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Named(names) => serializer.serialize_str(&names.join(",")),
        }
    }
}

impl<'de> Deserialize<'de> for SourceSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// A selected name and the source behind it, if registered
pub type Resolved = (String, Option<Arc<dyn Source>>);

/// Registry of all available sources
pub struct SourceRegistry {
    /// Sources by name
    sources: HashMap<String, Arc<dyn Source>>,
    /// Registration order
    order: Vec<String>,
    /// Source configurations
    configs: HashMap<String, SourceConfig>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            order: Vec::new(),
            configs: HashMap::new(),
        }
    }

    /// Register a source; re-registering a name replaces it in place
    pub fn register(&mut self, source: Arc<dyn Source>, config: SourceConfig) {
        let name = source.name().to_string();
        if !self.sources.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.sources.insert(name.clone(), source);
        self.configs.insert(name, config);
    }

    /// Get a source by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(name)
    }

    /// Get source config
    pub fn get_config(&self, name: &str) -> Option<&SourceConfig> {
        self.configs.get(name)
    }

    /// All source names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Check if a source exists
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Expand a selection into names, keeping unknown names with no source
    pub fn resolve(&self, selection: &SourceSelection) -> Vec<Resolved> {
        match selection {
            SourceSelection::All => self
                .order
                .iter()
                .map(|name| (name.clone(), self.sources.get(name).cloned()))
                .collect(),
            SourceSelection::Named(names) => {
                let mut resolved: Vec<Resolved> = Vec::with_capacity(names.len());
                for name in names {
                    if resolved.iter().all(|(seen, _)| seen != name) {
                        resolved.push((name.clone(), self.sources.get(name).cloned()));
                    }
                }
                resolved
            }
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

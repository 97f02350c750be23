//! State file
//!
//! The CLI keeps what the browser would hold in a single JSON document:
//! the dynamic rules and the `storage.local` values.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sb_core::host::{MemoryRuleEngine, MemoryStore};
use sb_core::{DnrRule, Settings};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub rules: Vec<DnrRule>,
    #[serde(default)]
    pub storage: BTreeMap<String, Value>,
}

impl StateFile {
    /// Read the state at `path`. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("Invalid state file '{}': {}", path.display(), e))
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize state: {}", e))?;
        fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
    }

    pub fn into_hosts(self) -> (MemoryRuleEngine, MemoryStore) {
        (
            MemoryRuleEngine::with_rules(self.rules),
            MemoryStore::with_values(self.storage),
        )
    }

    pub fn from_hosts(engine: &MemoryRuleEngine, store: &MemoryStore) -> Self {
        Self {
            rules: engine.rules().cloned().collect(),
            storage: store.values().clone(),
        }
    }
}

/// Settings from a JSON file, or the defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, String> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid config '{}': {}", path.display(), e))
}

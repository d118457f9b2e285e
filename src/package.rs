use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// One package as listed by an upstream registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub platform_id: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl PackageRecord {
    pub fn new(platform_id: Platform, repository: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            platform_id,
            repository: repository.map(str::to_string),
            name: name.into(),
            version: String::new(),
            description: String::new(),
            is_active: true,
            last_seen_at: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Identity of the record inside the store
    pub fn key(&self) -> PackageKey {
        PackageKey {
            platform_id: self.platform_id,
            repository: self.repository.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageKey {
    pub platform_id: Platform,
    pub repository: Option<String>,
    pub name: String,
}

/// A record as held by a store, with its row id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPackage {
    pub id: i64,
    #[serde(flatten)]
    pub record: PackageRecord,
}

/// Editable fields of a stored package. The identity fields stay fixed so an
/// edit cannot collide with another record's key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PackageUpdate {
    pub version: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl PackageUpdate {
    pub fn apply_to(&self, record: &mut PackageRecord) {
        if let Some(version) = &self.version {
            record.version = version.clone();
        }
        if let Some(description) = &self.description {
            record.description = description.clone();
        }
        if let Some(is_active) = self.is_active {
            record.is_active = is_active;
        }
    }
}

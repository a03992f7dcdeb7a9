use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Field the sorted roster view is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    /// Display name, case-insensitive.
    #[default]
    Name,
    /// External agent id, byte-wise.
    Id,
}

/// Ordering of the sorted roster view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortConfig {
    pub field: SortField,
    pub ascending: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            field: SortField::Name,
            ascending: true,
        }
    }
}

/// Controls registry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Initial ordering of the sorted view.
    pub sort: SortConfig,
    /// The sorted view is recomputed at least this often. Default: 500ms.
    pub resort_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sort: SortConfig::default(),
            resort_interval: Duration::from_millis(500),
        }
    }
}

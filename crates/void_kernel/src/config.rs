//! Database configuration

use serde::{Deserialize, Serialize};

/// Configuration for a [`Database`](crate::Database)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Entities reserved up front in each location table
    pub entity_capacity: usize,
    /// Maximum undo depth; `None` keeps every step
    pub undo_limit: Option<usize>,
    /// Log every applied envelope at trace level
    pub trace_envelopes: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 1024,
            undo_limit: Some(256),
            trace_envelopes: false,
        }
    }
}

impl DatabaseConfig {
    /// Create config for development (verbose, unbounded undo)
    pub fn development() -> Self {
        Self {
            entity_capacity: 256,
            undo_limit: None,
            trace_envelopes: true,
        }
    }

    /// Create config for testing (small, bounded)
    pub fn testing() -> Self {
        Self {
            entity_capacity: 16,
            undo_limit: Some(16),
            trace_envelopes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: DatabaseConfig = serde_json::from_str(r#"{ "undo_limit": 4 }"#).unwrap();
        assert_eq!(config.undo_limit, Some(4));
        assert_eq!(config.entity_capacity, DatabaseConfig::default().entity_capacity);
        assert!(!config.trace_envelopes);
    }
}

//! Tunables for importing, clustering and querying

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration of a layer service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub import: ImportConfig,
    pub cluster: ClusterConfig,
    pub query: QueryDefaults,
}

/// Import pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Directory that import file names are resolved against
    pub source_dir: PathBuf,
    /// File imported when no name is given
    pub default_file_name: String,
    /// Number of features committed per store write
    pub batch_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("data"),
            default_file_name: "sample.geojson".to_string(),
            batch_size: 100,
        }
    }
}

/// Clustering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// At or above this zoom level, features are never clustered
    pub bypass_zoom: f64,
    /// Feature sets of at most this size are never clustered
    pub bypass_max_features: usize,
    /// Radius used when the caller gives none
    pub default_radius_meters: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bypass_zoom: 12.0,
            bypass_max_features: 100,
            default_radius_meters: 50.0,
        }
    }
}

/// Defaults applied to feature queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub page_size: usize,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AtlasConfig::default();
        assert_eq!(config.import.batch_size, 100);
        assert_eq!(config.import.default_file_name, "sample.geojson");
        assert_eq!(config.cluster.bypass_zoom, 12.0);
        assert_eq!(config.cluster.bypass_max_features, 100);
        assert_eq!(config.cluster.default_radius_meters, 50.0);
        assert_eq!(config.query.page_size, 100);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AtlasConfig =
            serde_json::from_str(r#"{"cluster": {"bypass_max_features": 2}}"#).unwrap();
        assert_eq!(config.cluster.bypass_max_features, 2);
        assert_eq!(config.cluster.bypass_zoom, 12.0);
        assert_eq!(config.import, ImportConfig::default());
    }
}

//! Command execution against a [`LayerService`]

use crate::settings::{Command, Settings};
use crate::snapshot::{SnapshotError, SnapshotFile};

use layer_atlas_lib::{
    AtlasConfig, AtlasError, ClusterQuery, CreateFeatureRequest, ExportRequest, FeatureQuery,
    FeatureStore, ImportRequest, LayerService, NewLayer,
};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Atlas(#[from] AtlasError),

    #[error("Failed to read configuration {}: {source}", .path.display())]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Geometry is not valid JSON: {0}")]
    GeometryJson(serde_json::Error),

    #[error("Failed to write export {}: {source}", .path.display())]
    ExportIo {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result of one command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// Printed to stdout
    pub value: Value,
    /// Store contents changed and must be saved
    pub modified: bool,
    pub success: bool,
}

impl CommandOutput {
    fn read(value: Value) -> Self {
        Self {
            value,
            modified: false,
            success: true,
        }
    }

    fn write(value: Value) -> Self {
        Self {
            value,
            modified: true,
            success: true,
        }
    }
}

/// Configuration file (or defaults) with command-line overrides applied
pub fn load_config(path: Option<&Path>, import_dir: Option<PathBuf>) -> Result<AtlasConfig, CliError> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|source| CliError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|source| CliError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => AtlasConfig::default(),
    };

    if let Some(dir) = import_dir {
        config.import.source_dir = dir;
    }
    Ok(config)
}

/// Load the store, run the command and save the store if it changed
pub fn run(settings: Settings) -> Result<CommandOutput, CliError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("cli::run");

    let config = load_config(settings.config.as_deref(), settings.import_dir)?;
    let snapshot = SnapshotFile::new(settings.store);
    tracing::debug!("Using store {}", snapshot.path().display());
    let service = LayerService::new(Arc::new(snapshot.load()?), config);

    let output = execute(&service, settings.command)?;
    if output.modified {
        snapshot.save(service.store())?;
    }
    Ok(output)
}

pub fn execute<S: FeatureStore>(
    service: &LayerService<S>,
    command: Command,
) -> Result<CommandOutput, CliError> {
    let output = match command {
        Command::Layers => {
            let layers = service.list_layers()?;
            CommandOutput::read(json!({ "layers": layers }))
        }

        Command::CreateLayer { name, kind, srid } => {
            let mut layer = NewLayer::named(name).with_kind(kind);
            layer.srid = srid;
            CommandOutput::write(json!(service.create_layer(layer)?))
        }

        Command::DeleteLayer { layer_id } => {
            let removed = service.delete_layer(layer_id)?;
            CommandOutput::write(json!({ "layerId": layer_id, "deletedFeatures": removed }))
        }

        Command::AddFeature {
            layer_id,
            geometry,
            properties,
            valid_from,
            valid_to,
        } => {
            // Anything that is not a JSON object is handed over as WKT
            let geometry = if geometry.trim_start().starts_with('{') {
                serde_json::from_str(&geometry).map_err(CliError::GeometryJson)?
            } else {
                Value::String(geometry)
            };
            let id = service.create_feature(CreateFeatureRequest {
                layer_id,
                geometry,
                properties_json: properties,
                valid_from,
                valid_to,
            })?;
            CommandOutput::write(json!({ "id": id, "layerId": layer_id }))
        }

        Command::Import {
            file_name,
            layer_id,
            layer_name,
        } => {
            let outcome = service.import_features(ImportRequest {
                layer_id,
                layer_name,
                file_name,
            });
            // Batches committed before a failure stay in the store
            CommandOutput {
                value: json!(outcome),
                modified: true,
                success: outcome.success,
            }
        }

        Command::Query {
            selection,
            page,
            page_size,
        } => {
            let response = service.query_features(&FeatureQuery {
                selection: selection.into(),
                page,
                page_size,
            })?;
            CommandOutput::read(response.to_value())
        }

        Command::Clusters {
            layer_id,
            zoom,
            bbox,
            radius,
        } => {
            let response = service.query_clusters(&ClusterQuery {
                layer_id,
                zoom,
                bbox,
                cluster_radius_meters: radius,
            })?;
            CommandOutput::read(response.to_value())
        }

        Command::Export {
            selection,
            format,
            output_dir,
        } => {
            let file = service.export_features(&ExportRequest {
                selection: selection.into(),
                format,
            })?;

            let path = output_dir.join(&file.file_name);
            let io_error = |source| CliError::ExportIo {
                path: path.clone(),
                source,
            };
            fs::create_dir_all(&output_dir).map_err(io_error)?;
            fs::write(&path, &file.bytes).map_err(io_error)?;
            tracing::info!(
                "Exported {} features to {}",
                file.feature_count,
                path.display()
            );

            CommandOutput::read(json!({
                "fileName": file.file_name,
                "path": path.display().to_string(),
                "contentType": file.content_type,
                "featureCount": file.feature_count,
            }))
        }

        Command::Stats { selection } => {
            let stats = service.layer_stats(&selection.into())?;
            CommandOutput::read(json!(stats))
        }
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SelectionArgs;
    use layer_atlas_lib::{ExportFormat, GeometryKind, MemoryStore, StoreError};

    fn service(import_dir: &Path) -> LayerService<MemoryStore> {
        let config = load_config(None, Some(import_dir.to_path_buf())).unwrap();
        LayerService::new(Arc::new(MemoryStore::new()), config)
    }

    fn selection(layer_id: u64) -> SelectionArgs {
        SelectionArgs {
            layer_id,
            bbox: None,
            operation: None,
            buffer: None,
            valid_from: None,
            valid_to: None,
        }
    }

    fn add_point(service: &LayerService<MemoryStore>, layer_id: u64, lon: f64, lat: f64) {
        execute(
            service,
            Command::AddFeature {
                layer_id,
                geometry: json!({"type": "Point", "coordinates": [lon, lat]}).to_string(),
                properties: Some(r#"{"name":"stop"}"#.to_string()),
                valid_from: None,
                valid_to: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_create_add_query() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let created = execute(
            &service,
            Command::CreateLayer {
                name: "Stops".to_string(),
                kind: GeometryKind::Point,
                srid: 4326,
            },
        )
        .unwrap();
        assert!(created.modified);
        let layer_id = created.value["id"].as_u64().unwrap();
        assert_eq!(created.value["geometryKind"], "Point");

        add_point(&service, layer_id, 2.35, 48.85);
        add_point(&service, layer_id, 2.36, 48.86);

        let query = execute(
            &service,
            Command::Query {
                selection: SelectionArgs {
                    bbox: Some("2.3,48.8,2.355,48.855".to_string()),
                    ..selection(layer_id)
                },
                page: None,
                page_size: None,
            },
        )
        .unwrap();
        assert!(!query.modified);
        assert_eq!(query.value["totalCount"], 1);

        let layers = execute(&service, Command::Layers).unwrap();
        assert_eq!(layers.value["layers"][0]["featureCount"], 2);
        assert_eq!(layers.value["layers"][0]["name"], "Stops");
    }

    #[test]
    fn test_invalid_geometry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let layer = service.create_layer(NewLayer::named("L")).unwrap();

        let err = execute(
            &service,
            Command::AddFeature {
                layer_id: layer.id,
                geometry: "{oops".to_string(),
                properties: None,
                valid_from: None,
                valid_to: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CliError::GeometryJson(_)));
    }

    #[test]
    fn test_add_feature_from_wkt() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let layer = service.create_layer(NewLayer::named("L")).unwrap();
        let add = |geometry: &str| {
            execute(
                &service,
                Command::AddFeature {
                    layer_id: layer.id,
                    geometry: geometry.to_string(),
                    properties: None,
                    valid_from: None,
                    valid_to: None,
                },
            )
        };

        let added = add("LINESTRING(0 0, 1 1)").unwrap();
        assert!(added.modified);
        assert_eq!(added.value["layerId"], layer.id);

        let err = add("LINESTRING(0 0").unwrap_err();
        assert!(matches!(
            err,
            CliError::Atlas(AtlasError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_missing_layer_reported() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let err = execute(&service, Command::DeleteLayer { layer_id: 42 }).unwrap_err();
        assert!(matches!(
            err,
            CliError::Atlas(AtlasError::Store(StoreError::LayerNotFound(42)))
        ));
        assert_eq!(err.to_string(), "Layer with ID 42 not found");
    }

    #[test]
    fn test_import_and_export_files() {
        let dir = tempfile::tempdir().unwrap();
        let document = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}, "properties": {"name": "a"}},
                {"type": "Feature", "geometry": null, "properties": {}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.5, 1.5]}, "properties": {"name": "b"}}
            ]
        });
        fs::write(dir.path().join("points.geojson"), document.to_string()).unwrap();
        let service = service(dir.path());

        let import = execute(
            &service,
            Command::Import {
                file_name: Some("points.geojson".to_string()),
                layer_id: None,
                layer_name: Some("Points".to_string()),
            },
        )
        .unwrap();
        assert!(import.success);
        assert_eq!(import.value["report"]["importedCount"], 2);
        assert_eq!(import.value["report"]["skippedCount"], 1);
        let layer_id = import.value["report"]["layerId"].as_u64().unwrap();

        let out_dir = dir.path().join("out");
        let export = execute(
            &service,
            Command::Export {
                selection: selection(layer_id),
                format: ExportFormat::Csv,
                output_dir: out_dir.clone(),
            },
        )
        .unwrap();
        assert_eq!(export.value["featureCount"], 2);

        let file_name = export.value["fileName"].as_str().unwrap();
        assert!(file_name.starts_with(&format!("export_layer_{}_", layer_id)));
        let csv = fs::read_to_string(out_dir.join(file_name)).unwrap();
        assert_eq!(csv.lines().count(), 3);

        let stats = execute(&service, Command::Stats { selection: selection(layer_id) }).unwrap();
        assert_eq!(stats.value["count"], 2);
        assert_eq!(stats.value["totalAreaSqMeters"], 0.0);
    }

    #[test]
    fn test_failed_import_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let output = execute(
            &service,
            Command::Import {
                file_name: Some("missing.geojson".to_string()),
                layer_id: None,
                layer_name: None,
            },
        )
        .unwrap();
        assert!(!output.success);
        assert_eq!(output.value["success"], false);
    }

    #[test]
    fn test_run_persists_between_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("state").join("store.json");
        let settings = |command| Settings {
            store: Some(store.clone()),
            config: None,
            import_dir: Some(dir.path().to_path_buf()),
            command,
        };

        let created = run(settings(Command::CreateLayer {
            name: "Trees".to_string(),
            kind: GeometryKind::Point,
            srid: 4326,
        }))
        .unwrap();
        let layer_id = created.value["id"].as_u64().unwrap();
        assert!(store.exists());

        let clusters = run(settings(Command::Clusters {
            layer_id,
            zoom: Some(3.0),
            bbox: None,
            radius: None,
        }))
        .unwrap();
        assert_eq!(clusters.value["type"], "FeatureCollection");
        assert_eq!(clusters.value["metadata"]["totalFeatures"], 0);

        let layers = run(settings(Command::Layers)).unwrap();
        assert_eq!(layers.value["layers"][0]["id"], layer_id);
    }

    #[test]
    fn test_config_file_with_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas.json");
        fs::write(&path, r#"{"import": {"batch_size": 5}, "cluster": {"bypass_zoom": 10.0}}"#).unwrap();

        let config = load_config(Some(&path), Some(PathBuf::from("/data/geo"))).unwrap();
        assert_eq!(config.import.batch_size, 5);
        assert_eq!(config.import.source_dir, PathBuf::from("/data/geo"));
        assert_eq!(config.cluster.bypass_zoom, 10.0);

        fs::write(&path, r#"{"import": 5}"#).unwrap();
        assert!(matches!(
            load_config(Some(&path), None),
            Err(CliError::ConfigParse { .. })
        ));
    }
}

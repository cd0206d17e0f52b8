//! GeoJSON ingestion
//!
//! The importer turns parsed source features into stored features:
//!
//! 1. Resolve the target layer, creating one when no id is given
//! 2. Normalize each feature's coordinate reference to WGS84
//! 3. Derive the validity window from well-known attributes
//! 4. Commit features in fixed-size batches
//!
//! Features that cannot be used are logged and skipped. A failing batch write
//! stops the import; batches committed before it stay in the store.

use crate::config::ImportConfig;
use crate::geojson::{self, FeatureParseError, GeoJsonError, ParsedCollection, SourceFeature};
use crate::model::{GeometryKind, Layer, LayerId, NewFeature, NewLayer, UNSET_SRID, WGS84_SRID};
use crate::store::{FeatureStore, StoreError};
use crate::utils;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use geo::{CoordsIter, Geometry, MapCoords};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

/// References that are Web Mercator under another name
const WEB_MERCATOR_SRIDS: [u32; 4] = [3857, 900913, 102100, 102113];

/// Errors that stop an import
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Invalid import file name '{0}'")]
    InvalidFileName(String),

    #[error("Failed to read GeoJSON file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse GeoJSON: {0}")]
    Document(#[from] GeoJsonError),

    #[error("Batch write to layer {layer_id} failed after {committed} committed features: {source}")]
    BatchFailed {
        layer_id: LayerId,
        committed: usize,
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where imported features go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTarget {
    /// Existing layer to append to
    pub layer_id: Option<LayerId>,
    /// Name of the layer to create when `layer_id` is absent
    pub layer_name: Option<String>,
}

impl ImportTarget {
    pub fn existing(layer_id: LayerId) -> Self {
        Self {
            layer_id: Some(layer_id),
            layer_name: None,
        }
    }

    pub fn new_layer(name: impl Into<String>) -> Self {
        Self {
            layer_id: None,
            layer_name: Some(name.into()),
        }
    }
}

/// Summary of a completed import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub layer_id: LayerId,
    pub layer_name: String,
    pub created_layer: bool,
    pub imported_count: usize,
    pub skipped_count: usize,
    pub elapsed_ms: u64,
}

impl ImportReport {
    pub fn message(&self) -> String {
        format!(
            "Successfully imported {} features to layer '{}' (ID: {}) in {}ms",
            self.imported_count, self.layer_name, self.layer_id, self.elapsed_ms
        )
    }
}

/// Writes source features into a store
pub struct GeoImporter<'a, S: FeatureStore + ?Sized> {
    store: &'a S,
    config: &'a ImportConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'a, S: FeatureStore + ?Sized> GeoImporter<'a, S> {
    pub fn new(store: &'a S, config: &'a ImportConfig) -> Self {
        Self { store, config }
    }

    /// Path of an import file inside the configured source directory
    ///
    /// A blank name selects the default file. Names that would leave the source
    /// directory are rejected.
    pub fn resolve_path(&self, file_name: Option<&str>) -> Result<PathBuf, ImportError> {
        let name = file_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.config.default_file_name);

        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ImportError::InvalidFileName(name.to_string()));
        }

        Ok(self.config.source_dir.join(relative))
    }

    /// Read and import a file from the source directory
    pub fn import_file(
        &self,
        target: ImportTarget,
        file_name: Option<&str>,
    ) -> Result<ImportReport, ImportError> {
        let path = self.resolve_path(file_name)?;
        tracing::info!("Starting GeoJSON import from {}", path.display());

        let text = std::fs::read_to_string(&path).map_err(|source| ImportError::Io {
            path: path.clone(),
            source,
        })?;

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.import_str(target, &label, &text)
    }

    /// Parse and import a GeoJSON document
    pub fn import_str(
        &self,
        target: ImportTarget,
        file_name: &str,
        text: &str,
    ) -> Result<ImportReport, ImportError> {
        let parsed = geojson::parse_feature_collection(text).inspect_err(|e| {
            tracing::error!("Failed to parse GeoJSON from {}: {}", file_name, e);
        })?;
        self.import(target, file_name, parsed)
    }

    /// Import already-parsed source features
    pub fn import(
        &self,
        target: ImportTarget,
        file_name: &str,
        parsed: ParsedCollection,
    ) -> Result<ImportReport, ImportError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("importer::import");

        let started = Instant::now();
        let now = Utc::now();

        let (layer, created_layer) = self.resolve_layer(target, file_name, now)?;
        let batch_size = self.config.batch_size.max(1);

        let mut batch = Vec::with_capacity(batch_size);
        let mut committed = 0usize;
        let mut skipped = 0usize;

        for (index, entry) in parsed.features.into_iter().enumerate() {
            let ordinal = index + 1;
            match entry.and_then(|source| to_new_feature(source, now)) {
                Ok(feature) => batch.push(feature),
                Err(e) => {
                    tracing::warn!(
                        "Skipping feature #{} of {} (layer {}): {}",
                        ordinal,
                        file_name,
                        layer.id,
                        e
                    );
                    skipped += 1;
                    continue;
                }
            }

            if batch.len() >= batch_size {
                committed += self.commit(layer.id, &mut batch, committed)?;
            }
        }

        if !batch.is_empty() {
            committed += self.commit(layer.id, &mut batch, committed)?;
        }

        if let Err(e) = self.store.rebuild_spatial_index() {
            tracing::warn!("Failed to rebuild spatial index: {}", e);
        }
        if let Err(e) = self.store.touch_layer(layer.id, Utc::now()) {
            tracing::warn!("Failed to update timestamp of layer {}: {}", layer.id, e);
        }

        let report = ImportReport {
            layer_id: layer.id,
            layer_name: layer.name,
            created_layer,
            imported_count: committed,
            skipped_count: skipped,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!("{}", report.message());

        Ok(report)
    }

    fn resolve_layer(
        &self,
        target: ImportTarget,
        file_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(Layer, bool), ImportError> {
        if let Some(layer_id) = target.layer_id {
            let layer = self
                .store
                .get_layer(layer_id)?
                .ok_or(StoreError::LayerNotFound(layer_id))?;
            return Ok((layer, false));
        }

        let name = target
            .layer_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Import_{}", now.format("%Y%m%d_%H%M%S")));

        let layer = self.store.create_layer(
            NewLayer::named(name)
                .with_kind(GeometryKind::Geometry)
                .with_metadata(json!({
                    "source": "GeoJSON Import",
                    "importDate": now,
                    "fileName": file_name,
                })),
        )?;
        Ok((layer, true))
    }

    fn commit(
        &self,
        layer_id: LayerId,
        batch: &mut Vec<NewFeature>,
        committed: usize,
    ) -> Result<usize, ImportError> {
        let count = batch.len();
        self.store
            .insert_batch(layer_id, std::mem::take(batch))
            .map_err(|source| {
                tracing::error!(
                    "Batch write to layer {} failed after {} committed features: {}",
                    layer_id,
                    committed,
                    source
                );
                ImportError::BatchFailed {
                    layer_id,
                    committed,
                    source,
                }
            })?;

        tracing::info!("Imported batch of {} features", count);
        Ok(count)
    }
}

/// Georeference a source feature and derive its validity
fn to_new_feature(
    source: SourceFeature,
    now: DateTime<Utc>,
) -> Result<NewFeature, FeatureParseError> {
    let geometry = normalize_reference(source.geometry, source.srid)?;

    let properties: Map<String, Value> = source
        .properties
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect();

    let valid_from = derive_valid_from(&properties).unwrap_or(now);
    let valid_to = derive_valid_to(&properties);

    Ok(NewFeature {
        geometry,
        srid: WGS84_SRID,
        properties_json: Some(Value::Object(properties).to_string()),
        valid_from,
        valid_to,
    })
}

/// Bring a geometry into WGS84
///
/// Web Mercator coordinates are converted. Any other declared reference is
/// only retagged, leaving coordinates untouched.
pub fn normalize_reference(
    geometry: Geometry<f64>,
    srid: u32,
) -> Result<Geometry<f64>, FeatureParseError> {
    match srid {
        UNSET_SRID | WGS84_SRID => Ok(geometry),
        s if WEB_MERCATOR_SRIDS.contains(&s) => {
            if !geometry.coords_iter().all(utils::is_valid_mercator) {
                return Err(FeatureParseError::InvalidGeometry(
                    "coordinates outside Web Mercator bounds".to_string(),
                ));
            }
            Ok(geometry.map_coords(|c| utils::mercator_to_wgs84(c.x, c.y)))
        }
        other => {
            tracing::warn!(
                "Feature has SRID {}, tagging as {} without transforming coordinates",
                other,
                WGS84_SRID
            );
            Ok(geometry)
        }
    }
}

/// `validFrom`, else January 1st of `year`
pub fn derive_valid_from(properties: &Map<String, Value>) -> Option<DateTime<Utc>> {
    properties
        .get("validFrom")
        .and_then(parse_timestamp)
        .or_else(|| {
            let year = properties.get("year").and_then(parse_year)?;
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()
        })
}

/// `validTo`, else the last second of `endYear`
pub fn derive_valid_to(properties: &Map<String, Value>) -> Option<DateTime<Utc>> {
    properties
        .get("validTo")
        .and_then(parse_timestamp)
        .or_else(|| {
            let year = properties.get("endYear").and_then(parse_year)?;
            Utc.with_ymd_and_hms(year, 12, 31, 23, 59, 59).single()
        })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(parse_timestamp_str)
}

/// Accepts RFC 3339 and zone-less date-times or dates, the latter read as UTC
pub fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Integer years, given as a JSON integer, a whole float or a numeric string
fn parse_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).ok()
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() <= i32::MAX as f64)
                    .map(|f| f as i32)
            }
        }
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

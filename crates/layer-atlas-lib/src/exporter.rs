//! GeoJSON and CSV serialization of feature sets
//!
//! Both formats carry the feature id, layer id, layer name, validity window and
//! attributes. Attributes are flattened into GeoJSON properties; CSV keeps the
//! raw attribute blob in a single quoted column and adds centroid, geometry type
//! and area.

use crate::geojson;
use crate::model::{Feature, FeatureId, LayerId};
use crate::utils;

use chrono::{DateTime, SecondsFormat, Utc};
use geo::{Area, Centroid};
use rayon::prelude::*;
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Row count above which table rows are computed in parallel
const PARALLEL_ROWS_THRESHOLD: usize = 1024;

/// Header of the CSV export
pub const CSV_HEADER: &str =
    "id,layerId,layerName,centroidLat,centroidLon,geometryType,area,validFromUtc,validToUtc,properties";

/// Property names written by the exporter; attributes never overwrite them
const RESERVED_KEYS: [&str; 5] = ["id", "layerId", "layerName", "validFromUtc", "validToUtc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    GeoJson,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::GeoJson => "geojson",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::GeoJson => "application/geo+json",
            Self::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geojson" | "json" => Ok(Self::GeoJson),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unsupported export format '{}'", other)),
        }
    }
}

/// A finished export, ready to be written or sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub feature_count: usize,
}

/// ISO-8601 UTC text for a timestamp
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// `export_layer_<id>_<yyyyMMdd_HHmmss>.<ext>`
pub fn export_file_name(layer_id: LayerId, format: ExportFormat, at: DateTime<Utc>) -> String {
    format!(
        "export_layer_{}_{}.{}",
        layer_id,
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// GeoJSON Feature with id, layer, validity and flattened attributes
///
/// `layerName` is only written when a name is given.
pub fn feature_to_value(feature: &Feature, layer_name: Option<&str>) -> Value {
    let mut properties = Map::new();
    properties.insert("id".to_string(), json!(feature.id));
    properties.insert("layerId".to_string(), json!(feature.layer_id));
    if let Some(name) = layer_name {
        properties.insert("layerName".to_string(), json!(name));
    }
    properties.insert(
        "validFromUtc".to_string(),
        json!(format_timestamp(&feature.valid_from)),
    );
    properties.insert(
        "validToUtc".to_string(),
        json!(feature.valid_to.as_ref().map(format_timestamp)),
    );

    for (key, value) in feature.properties() {
        if !RESERVED_KEYS.contains(&key.as_str()) {
            properties.insert(key, value);
        }
    }

    geojson::feature_value(&feature.geometry, properties)
}

/// FeatureCollection of the given features, in order
pub fn to_exchange_format(features: &[Arc<Feature>], layer_name: &str) -> Value {
    geojson::feature_collection(
        features
            .iter()
            .map(|feature| feature_to_value(feature, Some(layer_name)))
            .collect(),
    )
}

/// One CSV row
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub id: FeatureId,
    pub layer_id: LayerId,
    pub layer_name: String,
    /// `None` for geometries without a centroid
    pub centroid_lat: Option<f64>,
    pub centroid_lon: Option<f64>,
    pub geometry_type: &'static str,
    /// Planar area converted to square meters with the linear approximation
    pub area_sq_meters: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub properties_json: Option<String>,
}

impl TableRow {
    pub fn from_feature(feature: &Feature, layer_name: &str) -> Self {
        let centroid = feature.geometry.centroid();
        Self {
            id: feature.id,
            layer_id: feature.layer_id,
            layer_name: layer_name.to_string(),
            centroid_lat: centroid.map(|c| c.y()),
            centroid_lon: centroid.map(|c| c.x()),
            geometry_type: feature.geometry_type(),
            area_sq_meters: utils::square_degrees_to_square_meters(
                feature.geometry.unsigned_area(),
            ),
            valid_from: feature.valid_from,
            valid_to: feature.valid_to,
            properties_json: feature.properties_json.clone(),
        }
    }

    /// Serialize as one CSV line without the trailing newline
    pub fn to_csv_line(&self) -> String {
        let fixed = |value: Option<f64>, decimals: usize| {
            value.map_or_else(String::new, |v| format!("{:.*}", decimals, v))
        };
        [
            self.id.to_string(),
            self.layer_id.to_string(),
            quote(&self.layer_name),
            fixed(self.centroid_lat, 6),
            fixed(self.centroid_lon, 6),
            self.geometry_type.to_string(),
            format!("{:.2}", self.area_sq_meters),
            format_timestamp(&self.valid_from),
            self.valid_to.as_ref().map(format_timestamp).unwrap_or_default(),
            quote(self.properties_json.as_deref().unwrap_or("")),
        ]
        .join(",")
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Table rows for the given features, in order
pub fn to_table(features: &[Arc<Feature>], layer_name: &str) -> Vec<TableRow> {
    #[cfg(feature = "profiling")]
    profiling::scope!("exporter::to_table");

    if features.len() >= PARALLEL_ROWS_THRESHOLD {
        features
            .par_iter()
            .map(|feature| TableRow::from_feature(feature, layer_name))
            .collect()
    } else {
        features
            .iter()
            .map(|feature| TableRow::from_feature(feature, layer_name))
            .collect()
    }
}

/// CSV document with header
pub fn write_csv(rows: &[TableRow]) -> String {
    let mut csv = String::with_capacity(CSV_HEADER.len() + rows.len() * 128);
    csv.push_str(CSV_HEADER);
    csv.push('\n');
    for row in rows {
        csv.push_str(&row.to_csv_line());
        csv.push('\n');
    }
    csv
}

/// Serialize features in the requested format
pub fn export(
    features: &[Arc<Feature>],
    layer_id: LayerId,
    layer_name: &str,
    format: ExportFormat,
    at: DateTime<Utc>,
) -> Result<ExportFile, serde_json::Error> {
    let bytes = match format {
        ExportFormat::GeoJson => serde_json::to_vec(&to_exchange_format(features, layer_name))?,
        ExportFormat::Csv => write_csv(&to_table(features, layer_name)).into_bytes(),
    };

    tracing::info!(
        "Exported {} features of layer {} to {}",
        features.len(),
        layer_id,
        format
    );

    Ok(ExportFile {
        file_name: export_file_name(layer_id, format, at),
        content_type: format.content_type(),
        bytes,
        feature_count: features.len(),
    })
}

//! LayerService - the operations exposed to front ends
//!
//! Composes the store, spatial filter, clustering engine, importer and
//! exporters into request/response operations: feature queries, cluster
//! queries, imports, exports, statistics and layer management.

use crate::cluster::{ClusterEngine, ClusterResult};
use crate::config::AtlasConfig;
use crate::exporter::{self, ExportFile, ExportFormat};
use crate::geojson;
use crate::importer::{GeoImporter, ImportReport, ImportTarget};
use crate::model::{
    Feature, FeatureId, GeometryKind, Layer, LayerId, LayerSummary, NewFeature, NewLayer,
    WGS84_SRID,
};
use crate::spatial::SpatialFilter;
use crate::store::{FeatureFilter, FeatureStore, PageRequest, StoreError, ValidityFilter};
use crate::{AtlasError, Result, utils};

use chrono::{DateTime, Utc};
use geo::Area;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;

/// Filters shared by queries, statistics and exports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSelection {
    pub layer_id: LayerId,
    /// `minX,minY,maxX,maxY`; malformed values disable spatial filtering
    pub bbox: Option<String>,
    /// `within`, anything else intersects
    pub operation: Option<String>,
    pub buffer_meters: Option<f64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl FeatureSelection {
    pub fn layer(layer_id: LayerId) -> Self {
        Self {
            layer_id,
            ..Self::default()
        }
    }

    pub fn to_filter(&self) -> FeatureFilter {
        FeatureFilter::layer(self.layer_id)
            .with_validity(ValidityFilter::new(self.valid_from, self.valid_to))
            .with_spatial(SpatialFilter::from_params(
                self.bbox.as_deref(),
                self.operation.as_deref(),
                self.buffer_meters,
            ))
    }
}

/// Paginated feature query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureQuery {
    pub selection: FeatureSelection,
    /// One-based, defaults to 1
    pub page: Option<usize>,
    /// Defaults to the configured page size
    pub page_size: Option<usize>,
}

impl FeatureQuery {
    pub fn layer(layer_id: LayerId) -> Self {
        Self {
            selection: FeatureSelection::layer(layer_id),
            ..Self::default()
        }
    }
}

/// One page of features plus paging metadata
#[derive(Debug, Clone)]
pub struct FeatureQueryResponse {
    pub features: Vec<Arc<Feature>>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub query_time_ms: u64,
}

impl FeatureQueryResponse {
    /// FeatureCollection with paging members
    pub fn to_value(&self) -> Value {
        let features: Vec<Value> = self
            .features
            .iter()
            .map(|feature| exporter::feature_to_value(feature, None))
            .collect();
        json!({
            "type": "FeatureCollection",
            "features": features,
            "totalCount": self.total_count,
            "page": self.page,
            "pageSize": self.page_size,
            "totalPages": self.total_pages,
            "queryTimeMs": self.query_time_ms,
        })
    }
}

/// Display items for a map viewport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterQuery {
    pub layer_id: LayerId,
    pub zoom: Option<f64>,
    /// Viewport, matched with intersects and no buffer
    pub bbox: Option<String>,
    /// Defaults to the configured radius
    pub cluster_radius_meters: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResponse {
    pub result: ClusterResult,
    pub query_time_ms: u64,
}

impl ClusterResponse {
    pub fn to_value(&self) -> Value {
        self.result.to_feature_collection()
    }
}

/// Aggregates over a selection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStats {
    pub count: usize,
    /// Polygon and MultiPolygon features only
    pub total_area_sq_meters: f64,
    pub total_area_hectares: f64,
    pub query_time_ms: u64,
}

/// Import of a file from the configured source directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRequest {
    pub layer_id: Option<LayerId>,
    pub layer_name: Option<String>,
    /// Defaults to the configured file name
    pub file_name: Option<String>,
}

/// Import result as reported to callers; failures are folded in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success: bool,
    pub message: String,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ImportReport>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportRequest {
    pub selection: FeatureSelection,
    pub format: ExportFormat,
}

/// Direct creation of a single feature
#[derive(Debug, Clone, PartialEq)]
pub struct CreateFeatureRequest {
    pub layer_id: LayerId,
    /// GeoJSON geometry object, or a string holding Well-Known Text
    pub geometry: Value,
    /// JSON object text
    pub properties_json: Option<String>,
    /// Defaults to now
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Request/response facade over a [`FeatureStore`]
pub struct LayerService<S: FeatureStore> {
    store: Arc<S>,
    config: AtlasConfig,
    clusters: ClusterEngine,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<S: FeatureStore> LayerService<S> {
    pub fn new(store: Arc<S>, config: AtlasConfig) -> Self {
        let clusters = ClusterEngine::new(config.cluster.clone());
        Self {
            store,
            config,
            clusters,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn create_layer(&self, layer: NewLayer) -> Result<Layer> {
        Ok(self.store.create_layer(layer)?)
    }

    pub fn get_layer(&self, layer_id: LayerId) -> Result<Layer> {
        self.store
            .get_layer(layer_id)?
            .ok_or_else(|| StoreError::LayerNotFound(layer_id).into())
    }

    pub fn list_layers(&self) -> Result<Vec<LayerSummary>> {
        Ok(self.store.list_layers()?)
    }

    /// Remove a layer and its features, returning how many features went with it
    pub fn delete_layer(&self, layer_id: LayerId) -> Result<usize> {
        Ok(self.store.delete_layer(layer_id)?)
    }

    /// Insert one feature given as a GeoJSON or WKT geometry
    pub fn create_feature(&self, request: CreateFeatureRequest) -> Result<FeatureId> {
        let geometry = match &request.geometry {
            Value::String(text) => geojson::parse_wkt(text)?,
            other => geojson::parse_geometry(other)?,
        };

        let valid_blob = request
            .properties_json
            .as_deref()
            .is_none_or(|blob| serde_json::from_str::<Map<String, Value>>(blob).is_ok());
        if !valid_blob {
            return Err(StoreError::InvalidParameter {
                name: "propertiesJson",
                reason: "must be a JSON object".to_string(),
            }
            .into());
        }

        let feature = NewFeature {
            geometry,
            srid: WGS84_SRID,
            properties_json: request.properties_json,
            valid_from: request.valid_from.unwrap_or_else(Utc::now),
            valid_to: request.valid_to,
        };
        let id = self.store.create_feature(request.layer_id, feature)?;
        tracing::info!("Created feature {} in layer {}", id, request.layer_id);
        Ok(id)
    }

    /// Filtered, paginated features
    pub fn query_features(&self, query: &FeatureQuery) -> Result<FeatureQueryResponse> {
        #[cfg(feature = "profiling")]
        profiling::scope!("service::query_features");

        let started = Instant::now();
        let page = PageRequest::new(
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(self.config.query.page_size),
        )?;

        let result = self.store.query(&query.selection.to_filter(), page)?;
        let query_time_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Retrieved {} features from layer {} in {}ms (Total: {}, Page: {})",
            result.features.len(),
            query.selection.layer_id,
            query_time_ms,
            result.total_count,
            page.page
        );

        Ok(FeatureQueryResponse {
            total_pages: page.total_pages(result.total_count),
            total_count: result.total_count,
            features: result.features,
            page: page.page,
            page_size: page.page_size,
            query_time_ms,
        })
    }

    /// Count and polygonal area of a selection
    pub fn layer_stats(&self, selection: &FeatureSelection) -> Result<LayerStats> {
        let started = Instant::now();
        let features = self.store.scan(&selection.to_filter())?;

        let square_degrees: f64 = features
            .iter()
            .filter(|f| {
                matches!(
                    GeometryKind::of(&f.geometry),
                    GeometryKind::Polygon | GeometryKind::MultiPolygon
                )
            })
            .map(|f| f.geometry.unsigned_area())
            .sum();
        let total_area_sq_meters = utils::square_degrees_to_square_meters(square_degrees);
        let query_time_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Calculated stats for layer {} in {}ms",
            selection.layer_id,
            query_time_ms
        );

        Ok(LayerStats {
            count: features.len(),
            total_area_sq_meters,
            total_area_hectares: total_area_sq_meters / 10_000.0,
            query_time_ms,
        })
    }

    /// Clustered display items for a viewport
    pub fn query_clusters(&self, query: &ClusterQuery) -> Result<ClusterResponse> {
        #[cfg(feature = "profiling")]
        profiling::scope!("service::query_clusters");

        let started = Instant::now();
        let filter = FeatureFilter::layer(query.layer_id).with_spatial(
            SpatialFilter::from_params(query.bbox.as_deref(), None, None),
        );
        let features = self.store.scan(&filter)?;
        let result = self
            .clusters
            .cluster(&features, query.zoom, query.cluster_radius_meters);

        Ok(ClusterResponse {
            result,
            query_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Import a file from the configured directory, reporting failures in the outcome
    pub fn import_features(&self, request: ImportRequest) -> ImportOutcome {
        let started = Instant::now();
        let importer = GeoImporter::new(self.store.as_ref(), &self.config.import);
        let target = ImportTarget {
            layer_id: request.layer_id,
            layer_name: request.layer_name,
        };

        match importer.import_file(target, request.file_name.as_deref()) {
            Ok(report) => ImportOutcome {
                success: true,
                message: report.message(),
                elapsed_ms: report.elapsed_ms,
                report: Some(report),
            },
            Err(e) => {
                tracing::error!("Import failed: {}", e);
                ImportOutcome {
                    success: false,
                    message: e.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    report: None,
                }
            }
        }
    }

    /// Serialize a selection; an unknown layer exports nothing
    pub fn export_features(&self, request: &ExportRequest) -> Result<ExportFile> {
        #[cfg(feature = "profiling")]
        profiling::scope!("service::export_features");

        let layer_id = request.selection.layer_id;
        let layer_name = self
            .store
            .get_layer(layer_id)?
            .map(|layer| layer.name)
            .unwrap_or_default();
        let features = self.store.scan(&request.selection.to_filter())?;

        exporter::export(&features, layer_id, &layer_name, request.format, Utc::now())
            .map_err(AtlasError::from)
    }
}

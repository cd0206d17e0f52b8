//! Layer Atlas Library - Feature Layers, Spatial Queries and Clustering
//!
//! This library manages named collections ("layers") of geometric features tagged
//! with free-form attributes and a temporal validity window, and answers spatially
//! and temporally filtered queries against them at map-pan/zoom latency.
//!
//! # Architecture
//!
//! - **[`MemoryStore`]**: Owns layers and features, implements [`FeatureStore`]
//! - **[`SpatialFilter`]**: Bounding box + buffer filter polygon with intersects/within
//! - **[`ClusterEngine`]**: Greedy, order-sensitive point clustering for map display
//! - **[`GeoImporter`]**: GeoJSON ingestion with batched writes and validity derivation
//! - **[`exporter`]**: GeoJSON and CSV serialization of query results
//! - **[`LayerService`]**: The query/cluster/import/export operation groups
//!
//! # Performance Characteristics
//!
//! - **Query Time**: O(N) linear scan per layer with an envelope prefilter
//! - **Clustering**: O(N²) worst case, single greedy pass
//! - **Import**: O(N), committed in fixed-size batches

pub mod cluster;
pub mod config;
pub mod exporter;
pub mod geojson;
pub mod importer;
pub mod model;
pub mod service;
pub mod spatial;
pub mod store;
pub mod utils;

// Public API exports
pub use cluster::{ClusterEngine, ClusterMarker, ClusterResult, DisplayItem, abbreviate_count};
pub use config::{AtlasConfig, ClusterConfig, ImportConfig, QueryDefaults};
pub use exporter::{ExportFile, ExportFormat, TableRow};
pub use geojson::{FeatureParseError, GeoJsonError, ParsedCollection, SourceFeature};
pub use importer::{GeoImporter, ImportError, ImportReport, ImportTarget};
pub use model::{
    Feature, FeatureId, GeometryKind, Layer, LayerId, LayerSummary, NewFeature, NewLayer,
    WGS84_SRID,
};
pub use service::{
    ClusterQuery, ClusterResponse, CreateFeatureRequest, ExportRequest, FeatureQuery,
    FeatureQueryResponse, FeatureSelection, ImportOutcome, ImportRequest, LayerService,
    LayerStats,
};
pub use spatial::{BoundingBox, SpatialFilter, SpatialOperation};
pub use store::{
    FeatureFilter, FeatureStore, MemoryStore, PageRequest, QueryPage, StoreError, StoreSnapshot,
    ValidityFilter,
};

/// Error types surfaced by the library's operation groups
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(#[from] FeatureParseError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AtlasError>;

//! FeatureStore - ownership of layers and features, filtered retrieval
//!
//! This module provides the [`FeatureStore`] contract used by the importer, the
//! clustering path and the exporters, and [`MemoryStore`], its in-memory
//! implementation. Retrieval is a linear scan over one layer's features with a
//! cached-envelope prefilter; results are always ordered by feature id.

use crate::model::{Feature, FeatureId, Layer, LayerId, LayerSummary, NewFeature, NewLayer};
use crate::spatial::SpatialFilter;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Layers at least this large are scanned in parallel
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

/// Errors raised by a feature store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Layer with ID {0} not found")]
    LayerNotFound(LayerId),

    #[error("A layer named '{0}' already exists")]
    DuplicateLayerName(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Temporal filter on the validity window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidityFilter {
    /// Keep features with `valid_from >= valid_from`
    pub valid_from: Option<DateTime<Utc>>,
    /// Keep open-ended features and features with `valid_to <= valid_to`
    pub valid_to: Option<DateTime<Utc>>,
}

impl ValidityFilter {
    pub fn new(valid_from: Option<DateTime<Utc>>, valid_to: Option<DateTime<Utc>>) -> Self {
        Self {
            valid_from,
            valid_to,
        }
    }

    #[inline]
    pub fn matches(&self, feature: &Feature) -> bool {
        if self.valid_from.is_some_and(|from| feature.valid_from < from) {
            return false;
        }
        match (self.valid_to, feature.valid_to) {
            (Some(to), Some(feature_to)) => feature_to <= to,
            _ => true,
        }
    }
}

/// Everything a store scan filters on
#[derive(Debug, Clone, Default)]
pub struct FeatureFilter {
    pub layer_id: LayerId,
    pub validity: ValidityFilter,
    /// `None` means no spatial filtering
    pub spatial: Option<SpatialFilter>,
}

impl FeatureFilter {
    /// All features of a layer
    pub fn layer(layer_id: LayerId) -> Self {
        Self {
            layer_id,
            ..Self::default()
        }
    }

    pub fn with_validity(mut self, validity: ValidityFilter) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_spatial(mut self, spatial: Option<SpatialFilter>) -> Self {
        self.spatial = spatial;
        self
    }

    /// Validity and spatial terms, in that order (layer equality is handled by the scan)
    #[inline]
    pub fn matches(&self, feature: &Feature) -> bool {
        self.validity.matches(feature)
            && self
                .spatial
                .as_ref()
                .is_none_or(|spatial| spatial.matches(feature))
    }
}

/// One-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    /// Validate and build a page request
    pub fn new(page: usize, page_size: usize) -> Result<Self, StoreError> {
        if page < 1 {
            return Err(StoreError::InvalidParameter {
                name: "page",
                reason: "must be at least 1".to_string(),
            });
        }
        if page_size < 1 {
            return Err(StoreError::InvalidParameter {
                name: "pageSize",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self { page, page_size })
    }

    /// Number of filtered features skipped before this page
    #[inline]
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Number of pages needed for `total` features
    #[inline]
    pub fn total_pages(&self, total: usize) -> usize {
        total.div_ceil(self.page_size)
    }
}

/// A page of query results
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub features: Vec<Arc<Feature>>,
    /// Count over the filtered, unpaginated set
    pub total_count: usize,
    pub page: PageRequest,
}

/// Storage contract for layers and features
///
/// Implementations must be safe to share between threads: reads may run in
/// parallel, and every mutation is all-or-nothing from the caller's view.
pub trait FeatureStore: Send + Sync {
    /// Create a layer; names are unique
    fn create_layer(&self, layer: NewLayer) -> Result<Layer, StoreError>;

    fn get_layer(&self, layer_id: LayerId) -> Result<Option<Layer>, StoreError>;

    /// All layers with their feature counts, ordered by id
    fn list_layers(&self) -> Result<Vec<LayerSummary>, StoreError>;

    /// Set the layer's updated timestamp
    fn touch_layer(&self, layer_id: LayerId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Remove a layer and all its features; returns the number of features removed
    fn delete_layer(&self, layer_id: LayerId) -> Result<usize, StoreError>;

    /// Insert a batch of features into one layer, assigning identifiers
    fn insert_batch(
        &self,
        layer_id: LayerId,
        batch: Vec<NewFeature>,
    ) -> Result<Vec<FeatureId>, StoreError>;

    /// All features matching the filter, ordered by id ascending
    ///
    /// An unknown layer yields an empty result.
    fn scan(&self, filter: &FeatureFilter) -> Result<Vec<Arc<Feature>>, StoreError>;

    /// Rebuild whatever spatial acceleration the store keeps
    fn rebuild_spatial_index(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Insert a single feature
    fn create_feature(&self, layer_id: LayerId, feature: NewFeature) -> Result<FeatureId, StoreError> {
        let ids = self.insert_batch(layer_id, vec![feature])?;
        ids.first()
            .copied()
            .ok_or_else(|| StoreError::Persistence("insert returned no identifier".to_string()))
    }

    /// Filtered, ordered, paginated retrieval
    fn query(&self, filter: &FeatureFilter, page: PageRequest) -> Result<QueryPage, StoreError> {
        let matched = self.scan(filter)?;
        let total_count = matched.len();
        let features = matched
            .into_iter()
            .skip(page.offset())
            .take(page.page_size)
            .collect();

        Ok(QueryPage {
            features,
            total_count,
            page,
        })
    }
}

/// Serializable image of a [`MemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub layers: Vec<Layer>,
    pub features: Vec<Feature>,
    #[serde(default)]
    pub next_layer_id: LayerId,
    #[serde(default)]
    pub next_feature_id: FeatureId,
}

/// Mutable state behind the store lock
#[derive(Debug)]
struct StoreState {
    layers: BTreeMap<LayerId, Layer>,
    /// Features per layer, kept in ascending id order
    features: BTreeMap<LayerId, Vec<Arc<Feature>>>,
    next_layer_id: LayerId,
    next_feature_id: FeatureId,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            layers: BTreeMap::new(),
            features: BTreeMap::new(),
            next_layer_id: 1,
            next_feature_id: 1,
        }
    }
}

/// In-memory feature store guarded by a read/write lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot
    ///
    /// Features whose layer is missing are dropped. Envelopes are rebuilt.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut state = StoreState::default();

        for layer in snapshot.layers {
            state.next_layer_id = state.next_layer_id.max(layer.id + 1);
            state.features.entry(layer.id).or_default();
            state.layers.insert(layer.id, layer);
        }

        let mut orphans = 0usize;
        for mut feature in snapshot.features {
            state.next_feature_id = state.next_feature_id.max(feature.id + 1);
            match state.features.get_mut(&feature.layer_id) {
                Some(features) => {
                    feature.refresh_envelope();
                    features.push(Arc::new(feature));
                }
                None => orphans += 1,
            }
        }
        if orphans > 0 {
            tracing::warn!("Dropped {} features without an owning layer", orphans);
        }

        for features in state.features.values_mut() {
            features.sort_by_key(|f| f.id);
        }

        state.next_layer_id = state.next_layer_id.max(snapshot.next_layer_id);
        state.next_feature_id = state.next_feature_id.max(snapshot.next_feature_id);

        Self {
            state: RwLock::new(state),
        }
    }

    /// Capture the full store contents
    pub fn to_snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let state = self.read()?;
        Ok(StoreSnapshot {
            layers: state.layers.values().cloned().collect(),
            features: state
                .features
                .values()
                .flat_map(|features| features.iter().map(|f| Feature::clone(f)))
                .collect(),
            next_layer_id: state.next_layer_id,
            next_feature_id: state.next_feature_id,
        })
    }

    /// Total number of features across all layers
    pub fn feature_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.features.values().map(Vec::len).sum())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Persistence(format!("store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Persistence(format!("store lock poisoned: {}", e)))
    }
}

impl FeatureStore for MemoryStore {
    fn create_layer(&self, layer: NewLayer) -> Result<Layer, StoreError> {
        let mut state = self.write()?;

        if state.layers.values().any(|l| l.name == layer.name) {
            return Err(StoreError::DuplicateLayerName(layer.name));
        }

        let now = Utc::now();
        let id = state.next_layer_id;
        state.next_layer_id += 1;

        let created = Layer {
            id,
            name: layer.name,
            srid: layer.srid,
            geometry_kind: layer.geometry_kind,
            created_utc: now,
            updated_utc: now,
            metadata: layer.metadata,
        };
        state.layers.insert(id, created.clone());
        state.features.insert(id, Vec::new());

        tracing::info!("Created layer '{}' with ID {}", created.name, id);
        Ok(created)
    }

    fn get_layer(&self, layer_id: LayerId) -> Result<Option<Layer>, StoreError> {
        Ok(self.read()?.layers.get(&layer_id).cloned())
    }

    fn list_layers(&self) -> Result<Vec<LayerSummary>, StoreError> {
        let state = self.read()?;
        Ok(state
            .layers
            .values()
            .map(|layer| LayerSummary {
                layer: layer.clone(),
                feature_count: state.features.get(&layer.id).map_or(0, Vec::len),
            })
            .collect())
    }

    fn touch_layer(&self, layer_id: LayerId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let layer = state
            .layers
            .get_mut(&layer_id)
            .ok_or(StoreError::LayerNotFound(layer_id))?;
        layer.updated_utc = at;
        Ok(())
    }

    fn delete_layer(&self, layer_id: LayerId) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let layer = state
            .layers
            .remove(&layer_id)
            .ok_or(StoreError::LayerNotFound(layer_id))?;
        let removed = state.features.remove(&layer_id).map_or(0, |f| f.len());

        tracing::info!(
            "Deleted layer '{}' (ID: {}) and {} features",
            layer.name,
            layer_id,
            removed
        );
        Ok(removed)
    }

    fn insert_batch(
        &self,
        layer_id: LayerId,
        batch: Vec<NewFeature>,
    ) -> Result<Vec<FeatureId>, StoreError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("store::insert_batch");

        let mut state = self.write()?;
        if !state.layers.contains_key(&layer_id) {
            return Err(StoreError::LayerNotFound(layer_id));
        }

        let first_id = state.next_feature_id;
        let count = batch.len() as FeatureId;
        state.next_feature_id += count;

        let features = state.features.entry(layer_id).or_default();
        features.reserve(batch.len());
        let ids: Vec<FeatureId> = batch
            .into_iter()
            .zip(first_id..)
            .map(|(new, id)| {
                features.push(Arc::new(Feature::from_new(id, layer_id, new)));
                id
            })
            .collect();

        Ok(ids)
    }

    fn scan(&self, filter: &FeatureFilter) -> Result<Vec<Arc<Feature>>, StoreError> {
        #[cfg(feature = "profiling")]
        profiling::scope!("store::scan");

        let state = self.read()?;
        let Some(features) = state.features.get(&filter.layer_id) else {
            return Ok(Vec::new());
        };

        // Both branches preserve the id order of the layer
        let matched = if features.len() >= PARALLEL_SCAN_THRESHOLD {
            features
                .par_iter()
                .filter(|f| filter.matches(f))
                .cloned()
                .collect()
        } else {
            features
                .iter()
                .filter(|f| filter.matches(f))
                .cloned()
                .collect()
        };

        Ok(matched)
    }

    fn rebuild_spatial_index(&self) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let mut refreshed = 0usize;
        for features in state.features.values_mut() {
            for feature in features.iter_mut() {
                Arc::make_mut(feature).refresh_envelope();
                refreshed += 1;
            }
        }
        tracing::debug!("Rebuilt envelopes for {} features", refreshed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{BoundingBox, SpatialOperation};
    use chrono::TimeZone;
    use geo::point;

    fn at_year(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    fn grid_features(n: usize) -> Vec<NewFeature> {
        (0..n)
            .map(|i| {
                NewFeature::new(
                    point!(x: 7.0 + i as f64 * 0.01, y: 48.0 + i as f64 * 0.01),
                    at_year(2000 + i as i32),
                )
            })
            .collect()
    }

    fn store_with_layer(n: usize) -> (MemoryStore, LayerId) {
        let store = MemoryStore::new();
        let layer = store.create_layer(NewLayer::named("Stations")).unwrap();
        store.insert_batch(layer.id, grid_features(n)).unwrap();
        (store, layer.id)
    }

    #[test]
    fn test_store_creation() {
        let store = MemoryStore::new();
        assert!(store.list_layers().unwrap().is_empty());
        assert_eq!(store.feature_count().unwrap(), 0);
    }

    #[test]
    fn test_create_layer_assigns_ids_and_timestamps() {
        let store = MemoryStore::new();
        let a = store.create_layer(NewLayer::named("A")).unwrap();
        let b = store.create_layer(NewLayer::named("B")).unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.created_utc, a.updated_utc);
        assert_eq!(store.get_layer(2).unwrap().unwrap().name, "B");
        assert!(store.get_layer(3).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_layer_name_rejected() {
        let store = MemoryStore::new();
        store.create_layer(NewLayer::named("Rivers")).unwrap();
        let result = store.create_layer(NewLayer::named("Rivers"));
        assert!(matches!(result, Err(StoreError::DuplicateLayerName(name)) if name == "Rivers"));
    }

    #[test]
    fn test_insert_batch_unknown_layer() {
        let store = MemoryStore::new();
        let result = store.insert_batch(42, grid_features(3));
        assert!(matches!(result, Err(StoreError::LayerNotFound(42))));
        assert_eq!(store.feature_count().unwrap(), 0);
    }

    #[test]
    fn test_query_without_filters_returns_layer_in_id_order() {
        let (store, layer_id) = store_with_layer(25);
        let other = store.create_layer(NewLayer::named("Other")).unwrap();
        store.insert_batch(other.id, grid_features(5)).unwrap();
        // Interleave more features into the first layer
        store.insert_batch(layer_id, grid_features(5)).unwrap();

        for page_size in [1, 7, 30, 100] {
            let mut collected = Vec::new();
            let mut page = 1;
            loop {
                let request = PageRequest::new(page, page_size).unwrap();
                let result = store.query(&FeatureFilter::layer(layer_id), request).unwrap();
                assert_eq!(result.total_count, 30);
                if result.features.is_empty() {
                    break;
                }
                collected.extend(result.features.iter().map(|f| (f.id, f.layer_id)));
                page += 1;
            }

            assert_eq!(collected.len(), 30);
            assert!(collected.iter().all(|(_, l)| *l == layer_id));
            assert!(collected.windows(2).all(|w| w[0].0 < w[1].0));
        }
    }

    #[test]
    fn test_query_unknown_layer_is_empty() {
        let (store, _) = store_with_layer(3);
        let page = PageRequest::new(1, 100).unwrap();
        let result = store.query(&FeatureFilter::layer(99), page).unwrap();
        assert_eq!(result.total_count, 0);
        assert!(result.features.is_empty());
    }

    #[test]
    fn test_page_request_validation() {
        assert!(PageRequest::new(0, 10).is_err());
        assert!(PageRequest::new(1, 0).is_err());

        let page = PageRequest::new(3, 10).unwrap();
        assert_eq!(page.offset(), 20);
        assert_eq!(page.total_pages(21), 3);
        assert_eq!(page.total_pages(0), 0);
    }

    #[test]
    fn test_validity_filter() {
        let store = MemoryStore::new();
        let layer = store.create_layer(NewLayer::named("Bridges")).unwrap();
        store
            .insert_batch(
                layer.id,
                vec![
                    NewFeature::new(point!(x: 0.0, y: 0.0), at_year(1900)),
                    NewFeature::new(point!(x: 0.0, y: 0.0), at_year(1950))
                        .with_valid_to(at_year(1990)),
                    NewFeature::new(point!(x: 0.0, y: 0.0), at_year(1960))
                        .with_valid_to(at_year(2020)),
                    NewFeature::new(point!(x: 0.0, y: 0.0), at_year(2001)),
                ],
            )
            .unwrap();

        let since_1950 = FeatureFilter::layer(layer.id)
            .with_validity(ValidityFilter::new(Some(at_year(1950)), None));
        assert_eq!(store.scan(&since_1950).unwrap().len(), 3);

        let until_2000 = FeatureFilter::layer(layer.id)
            .with_validity(ValidityFilter::new(None, Some(at_year(2000))));
        let ids: Vec<_> = store.scan(&until_2000).unwrap().iter().map(|f| f.id).collect();
        // Open-ended features always pass the upper bound
        assert_eq!(ids, vec![1, 2, 4]);

        let both = FeatureFilter::layer(layer.id)
            .with_validity(ValidityFilter::new(Some(at_year(1950)), Some(at_year(2000))));
        let ids: Vec<_> = store.scan(&both).unwrap().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_spatial_filter_in_scan() {
        let (store, layer_id) = store_with_layer(10);
        let spatial = SpatialFilter::new(
            BoundingBox::new(7.0, 48.0, 7.035, 48.035),
            SpatialOperation::Intersects,
            None,
        );
        let filter = FeatureFilter::layer(layer_id).with_spatial(Some(spatial));
        let ids: Vec<_> = store.scan(&filter).unwrap().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_parallel_scan_preserves_order() {
        let (store, layer_id) = store_with_layer(PARALLEL_SCAN_THRESHOLD + 10);
        let features = store.scan(&FeatureFilter::layer(layer_id)).unwrap();
        assert_eq!(features.len(), PARALLEL_SCAN_THRESHOLD + 10);
        assert!(features.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_delete_layer_cascades() {
        let (store, layer_id) = store_with_layer(12);
        let keep = store.create_layer(NewLayer::named("Keep")).unwrap();
        store.insert_batch(keep.id, grid_features(2)).unwrap();

        assert_eq!(store.delete_layer(layer_id).unwrap(), 12);
        assert!(store.get_layer(layer_id).unwrap().is_none());
        assert!(store.scan(&FeatureFilter::layer(layer_id)).unwrap().is_empty());
        assert_eq!(store.feature_count().unwrap(), 2);

        assert!(matches!(
            store.delete_layer(layer_id),
            Err(StoreError::LayerNotFound(_))
        ));
    }

    #[test]
    fn test_list_layers_counts_features() {
        let (store, layer_id) = store_with_layer(4);
        store.create_layer(NewLayer::named("Empty")).unwrap();

        let layers = store.list_layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].layer.id, layer_id);
        assert_eq!(layers[0].feature_count, 4);
        assert_eq!(layers[1].feature_count, 0);
    }

    #[test]
    fn test_touch_layer() {
        let (store, layer_id) = store_with_layer(1);
        let later = Utc::now() + chrono::Duration::hours(1);
        store.touch_layer(layer_id, later).unwrap();
        assert_eq!(store.get_layer(layer_id).unwrap().unwrap().updated_utc, later);
        assert!(store.touch_layer(99, later).is_err());
    }

    #[test]
    fn test_create_feature() {
        let (store, layer_id) = store_with_layer(2);
        let id = store
            .create_feature(layer_id, NewFeature::new(point!(x: 1.0, y: 1.0), at_year(2024)))
            .unwrap();
        assert_eq!(id, 3);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let (store, layer_id) = store_with_layer(6);
        let snapshot = store.to_snapshot().unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();

        let restored = MemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());
        let features = restored.scan(&FeatureFilter::layer(layer_id)).unwrap();
        assert_eq!(features.len(), 6);
        assert!(features.iter().all(|f| f.envelope().is_some()));

        // Identifiers keep increasing after a restore
        let layer = restored.create_layer(NewLayer::named("Next")).unwrap();
        assert_eq!(layer.id, layer_id + 1);
        let ids = restored.insert_batch(layer.id, grid_features(1)).unwrap();
        assert_eq!(ids, vec![7]);
    }

    #[test]
    fn test_rebuild_spatial_index() {
        let (store, layer_id) = store_with_layer(3);
        store.rebuild_spatial_index().unwrap();
        let features = store.scan(&FeatureFilter::layer(layer_id)).unwrap();
        assert!(features.iter().all(|f| f.envelope().is_some()));
    }
}

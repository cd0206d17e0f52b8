//! Greedy point clustering for map display
//!
//! Features are visited in the order given. The first unconsumed point seeds a
//! group and absorbs every later unconsumed point within the radius of the
//! seed. The result depends on input order, which callers rely on: the same
//! ordered input always produces the same markers.

use crate::config::ClusterConfig;
use crate::geojson;
use crate::model::{Feature, FeatureId};
use crate::utils;

use geo::{Coord, Geometry, Point};
use serde_json::{Map, Value, json};
use smallvec::SmallVec;
use std::sync::Arc;

/// Aggregate marker standing in for several nearby points
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMarker {
    /// Arithmetic mean of the member coordinates
    pub centroid: Point<f64>,
    pub point_count: usize,
    /// Member feature ids, seed first
    pub member_ids: SmallVec<[FeatureId; 8]>,
}

impl ClusterMarker {
    pub fn abbreviated_count(&self) -> String {
        abbreviate_count(self.point_count)
    }
}

/// One entry of a clustered result
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayItem {
    /// A feature shown as itself
    Feature(Arc<Feature>),
    Cluster(ClusterMarker),
}

impl DisplayItem {
    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Cluster(_))
    }

    /// GeoJSON Feature for this item
    ///
    /// Clusters carry `{cluster, point_count, point_count_abbreviated}`;
    /// plain features carry `{id, cluster, properties}`.
    pub fn to_value(&self) -> Value {
        let mut properties = Map::new();
        match self {
            Self::Feature(feature) => {
                properties.insert("id".to_string(), json!(feature.id));
                properties.insert("cluster".to_string(), json!(false));
                properties.insert("properties".to_string(), Value::Object(feature.properties()));
                geojson::feature_value(&feature.geometry, properties)
            }
            Self::Cluster(marker) => {
                properties.insert("cluster".to_string(), json!(true));
                properties.insert("point_count".to_string(), json!(marker.point_count));
                properties.insert(
                    "point_count_abbreviated".to_string(),
                    json!(marker.abbreviated_count()),
                );
                geojson::feature_value(&Geometry::Point(marker.centroid), properties)
            }
        }
    }
}

/// Outcome of a clustering pass
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    pub items: Vec<DisplayItem>,
    /// Number of input features
    pub total_features: usize,
    /// Number of cluster items in `items`
    pub clusters_created: usize,
    pub zoom: Option<f64>,
}

impl ClusterResult {
    /// FeatureCollection with a `metadata` member
    pub fn to_feature_collection(&self) -> Value {
        let mut collection =
            geojson::feature_collection(self.items.iter().map(DisplayItem::to_value).collect());
        collection["metadata"] = json!({
            "totalFeatures": self.total_features,
            "clustersCreated": self.clusters_created,
            "zoom": self.zoom,
        });
        collection
    }
}

/// Clusters feature sets according to a [`ClusterConfig`]
#[derive(Debug, Clone, Default)]
pub struct ClusterEngine {
    config: ClusterConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ClusterEngine {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Whether a set of `count` features at `zoom` is returned unclustered
    pub fn bypasses(&self, count: usize, zoom: Option<f64>) -> bool {
        zoom.is_some_and(|z| z >= self.config.bypass_zoom)
            || count <= self.config.bypass_max_features
    }

    /// Cluster an ordered feature set
    ///
    /// `radius_meters` falls back to the configured default when absent.
    pub fn cluster(
        &self,
        features: &[Arc<Feature>],
        zoom: Option<f64>,
        radius_meters: Option<f64>,
    ) -> ClusterResult {
        #[cfg(feature = "profiling")]
        profiling::scope!("cluster::cluster");

        let total_features = features.len();

        if self.bypasses(total_features, zoom) {
            return ClusterResult {
                items: features.iter().cloned().map(DisplayItem::Feature).collect(),
                total_features,
                clusters_created: 0,
                zoom,
            };
        }

        let radius = radius_meters.unwrap_or(self.config.default_radius_meters);
        let items = greedy_cluster(features, utils::meters_to_degrees(radius));
        let clusters_created = items.iter().filter(|item| item.is_cluster()).count();

        tracing::info!(
            "Clustered {} features into {} items ({} clusters)",
            total_features,
            items.len(),
            clusters_created
        );

        ClusterResult {
            items,
            total_features,
            clusters_created,
            zoom,
        }
    }
}

/// Single greedy pass with a planar distance threshold in degrees
pub fn greedy_cluster(features: &[Arc<Feature>], threshold: f64) -> Vec<DisplayItem> {
    let mut consumed = vec![false; features.len()];
    let mut items = Vec::new();

    for (i, seed) in features.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        consumed[i] = true;

        let Some(seed_point) = seed.as_point() else {
            items.push(DisplayItem::Feature(Arc::clone(seed)));
            continue;
        };

        let mut member_ids: SmallVec<[FeatureId; 8]> = SmallVec::new();
        member_ids.push(seed.id);
        let mut sum = seed_point.0;

        for (j, candidate) in features.iter().enumerate().skip(i + 1) {
            if consumed[j] {
                continue;
            }
            let Some(point) = candidate.as_point() else {
                continue;
            };
            if utils::planar_distance(seed_point.0, point.0) <= threshold {
                consumed[j] = true;
                member_ids.push(candidate.id);
                sum = sum + point.0;
            }
        }

        if member_ids.len() > 1 {
            let n = member_ids.len() as f64;
            items.push(DisplayItem::Cluster(ClusterMarker {
                centroid: Point(Coord {
                    x: sum.x / n,
                    y: sum.y / n,
                }),
                point_count: member_ids.len(),
                member_ids,
            }));
        } else {
            items.push(DisplayItem::Feature(Arc::clone(seed)));
        }
    }

    items
}

/// Short label for a cluster size: `950`, `1.5k`, `12k`
pub fn abbreviate_count(count: usize) -> String {
    if count < 1000 {
        count.to_string()
    } else if count < 10_000 {
        // Tenths rounded half away from zero
        let tenths = (count + 50) / 100;
        format!("{}.{}k", tenths / 10, tenths % 10)
    } else {
        format!("{}k", count / 1000)
    }
}

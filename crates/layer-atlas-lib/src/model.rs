//! Layer and feature records
//!
//! A [`Layer`] exclusively owns its [`Feature`]s. Features are immutable once
//! stored; they carry a precomputed envelope so spatial filters can reject
//! them without touching the full geometry.

use chrono::{DateTime, Utc};
use geo::{BoundingRect, Geometry, Point, Rect};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Identifier of a layer, unique within a store
pub type LayerId = u64;

/// Identifier of a feature, unique within a store and increasing with insertion order
pub type FeatureId = u64;

/// Canonical coordinate reference: geographic WGS84
pub const WGS84_SRID: u32 = 4326;

/// Sentinel for "no coordinate reference declared"
pub const UNSET_SRID: u32 = 0;

/// Declared geometry kind of a layer (informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GeometryKind {
    /// Heterogeneous layer
    #[default]
    Geometry,
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryKind {
    /// Classify a geometry value
    pub fn of(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) => Self::Point,
            Geometry::MultiPoint(_) => Self::MultiPoint,
            Geometry::Line(_) | Geometry::LineString(_) => Self::LineString,
            Geometry::MultiLineString(_) => Self::MultiLineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => Self::Polygon,
            Geometry::MultiPolygon(_) => Self::MultiPolygon,
            Geometry::GeometryCollection(_) => Self::GeometryCollection,
        }
    }

    /// Name used in exchange formats and tabular output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Geometry => "Geometry",
            Self::Point => "Point",
            Self::MultiPoint => "MultiPoint",
            Self::LineString => "LineString",
            Self::MultiLineString => "MultiLineString",
            Self::Polygon => "Polygon",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeometryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "Geometry" => Self::Geometry,
            "Point" => Self::Point,
            "MultiPoint" => Self::MultiPoint,
            "LineString" => Self::LineString,
            "MultiLineString" => Self::MultiLineString,
            "Polygon" => Self::Polygon,
            "MultiPolygon" => Self::MultiPolygon,
            "GeometryCollection" => Self::GeometryCollection,
            other => return Err(format!("unknown geometry kind '{}'", other)),
        };
        Ok(kind)
    }
}

/// A named, independently managed collection of features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub srid: u32,
    pub geometry_kind: GeometryKind,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    /// Opaque metadata, never interpreted by the library
    pub metadata: Option<Value>,
}

/// Request to create a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLayer {
    pub name: String,
    #[serde(default = "default_srid")]
    pub srid: u32,
    #[serde(default)]
    pub geometry_kind: GeometryKind,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_srid() -> u32 {
    WGS84_SRID
}

impl NewLayer {
    /// A WGS84 layer with heterogeneous geometry kind and no metadata
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            srid: WGS84_SRID,
            geometry_kind: GeometryKind::Geometry,
            metadata: None,
        }
    }

    pub fn with_kind(mut self, kind: GeometryKind) -> Self {
        self.geometry_kind = kind;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A layer together with the number of features it currently owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    #[serde(flatten)]
    pub layer: Layer,
    pub feature_count: usize,
}

/// One geometric record with attributes and a validity window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: FeatureId,
    pub layer_id: LayerId,
    pub geometry: Geometry<f64>,
    /// Coordinate reference the geometry is expressed in
    pub srid: u32,
    /// Attribute map serialized as a single JSON object
    pub properties_json: Option<String>,
    pub valid_from: DateTime<Utc>,
    /// `None` means "still valid"
    pub valid_to: Option<DateTime<Utc>>,
    /// Cached bounding rectangle, rebuilt after deserialization
    #[serde(skip)]
    envelope: Option<Rect<f64>>,
}

impl Feature {
    pub(crate) fn from_new(id: FeatureId, layer_id: LayerId, new: NewFeature) -> Self {
        let envelope = new.geometry.bounding_rect();
        Self {
            id,
            layer_id,
            geometry: new.geometry,
            srid: new.srid,
            properties_json: new.properties_json,
            valid_from: new.valid_from,
            valid_to: new.valid_to,
            envelope,
        }
    }

    /// Bounding rectangle of the geometry (`None` for empty geometries)
    #[inline]
    pub fn envelope(&self) -> Option<Rect<f64>> {
        self.envelope
    }

    /// Recompute the cached envelope
    pub(crate) fn refresh_envelope(&mut self) {
        self.envelope = self.geometry.bounding_rect();
    }

    /// Geometry type name ("Point", "Polygon", ...)
    #[inline]
    pub fn geometry_type(&self) -> &'static str {
        GeometryKind::of(&self.geometry).as_str()
    }

    /// The point value when the geometry is a single point
    #[inline]
    pub fn as_point(&self) -> Option<Point<f64>> {
        match self.geometry {
            Geometry::Point(p) => Some(p),
            _ => None,
        }
    }

    /// Attribute map decoded from the stored blob
    ///
    /// A missing or unparsable blob yields an empty map.
    pub fn properties(&self) -> Map<String, Value> {
        self.properties_json
            .as_deref()
            .and_then(|blob| serde_json::from_str::<Map<String, Value>>(blob).ok())
            .unwrap_or_default()
    }
}

/// A feature that has not been assigned an identifier yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeature {
    pub geometry: Geometry<f64>,
    #[serde(default = "default_srid")]
    pub srid: u32,
    #[serde(default)]
    pub properties_json: Option<String>,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl NewFeature {
    /// A WGS84 feature without attributes, open-ended from `valid_from`
    pub fn new(geometry: impl Into<Geometry<f64>>, valid_from: DateTime<Utc>) -> Self {
        Self {
            geometry: geometry.into(),
            srid: WGS84_SRID,
            properties_json: None,
            valid_from,
            valid_to: None,
        }
    }

    pub fn with_properties(mut self, properties: &Map<String, Value>) -> Self {
        self.properties_json = Some(Value::Object(properties.clone()).to_string());
        self
    }

    pub fn with_valid_to(mut self, valid_to: DateTime<Utc>) -> Self {
        self.valid_to = Some(valid_to);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon, point};
    use serde_json::json;

    #[test]
    fn test_geometry_kind_of() {
        let p: Geometry<f64> = point!(x: 1.0, y: 2.0).into();
        assert_eq!(GeometryKind::of(&p), GeometryKind::Point);

        let poly: Geometry<f64> = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        )
        .into();
        assert_eq!(GeometryKind::of(&poly).as_str(), "Polygon");
    }

    #[test]
    fn test_geometry_kind_from_str() {
        assert_eq!(
            "MultiPolygon".parse::<GeometryKind>(),
            Ok(GeometryKind::MultiPolygon)
        );
        assert!("Circle".parse::<GeometryKind>().is_err());
    }

    #[test]
    fn test_feature_envelope_is_precomputed() {
        let new = NewFeature::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 3.0)]),
            Utc::now(),
        );
        let feature = Feature::from_new(1, 1, new);

        let envelope = feature.envelope().unwrap();
        assert_eq!(envelope.min().x, 0.0);
        assert_eq!(envelope.max().y, 3.0);
        assert_eq!(feature.geometry_type(), "LineString");
        assert!(feature.as_point().is_none());
    }

    #[test]
    fn test_feature_properties_roundtrip() {
        let props = json!({"name": "Pont Neuf", "year": 1607});
        let new = NewFeature::new(point!(x: 2.34, y: 48.85), Utc::now())
            .with_properties(props.as_object().unwrap());
        let feature = Feature::from_new(3, 1, new);

        let decoded = feature.properties();
        assert_eq!(decoded.get("name"), Some(&json!("Pont Neuf")));
        assert_eq!(decoded.get("year"), Some(&json!(1607)));
    }

    #[test]
    fn test_unparsable_properties_degrade_to_empty() {
        let mut new = NewFeature::new(point!(x: 0.0, y: 0.0), Utc::now());
        new.properties_json = Some("{not json".to_string());
        let feature = Feature::from_new(1, 1, new);
        assert!(feature.properties().is_empty());
    }

    #[test]
    fn test_new_layer_defaults() {
        let layer = NewLayer::named("Rivers");
        assert_eq!(layer.srid, WGS84_SRID);
        assert_eq!(layer.geometry_kind, GeometryKind::Geometry);
        assert!(layer.metadata.is_none());
    }
}

//! GeoJSON codec
//!
//! Reading is tolerant at the feature level: a document that is a
//! FeatureCollection always parses, and each member feature yields either a
//! [`SourceFeature`] or the [`FeatureParseError`] explaining why it cannot be
//! used. Writing produces plain `serde_json` values.

use crate::model::{GeometryKind, UNSET_SRID, WGS84_SRID};
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use wkt::TryFromWkt;

/// A position: longitude, latitude and any number of ignored extra ordinates
pub type Position = Vec<f64>;

/// GeoJSON geometry object, tagged by its `type` member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<GeoJsonGeometry> },
}

/// Document-level failures; the whole import stops on these
#[derive(Debug, thiserror::Error)]
pub enum GeoJsonError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a FeatureCollection, found {0}")]
    NotAFeatureCollection(String),

    #[error("FeatureCollection has no 'features' array")]
    MissingFeatures,
}

/// Why a single source feature was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureParseError {
    #[error("feature is not a GeoJSON Feature object")]
    NotAFeature,

    #[error("feature has no geometry")]
    MissingGeometry,

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("coordinate is not a finite number")]
    NonFiniteCoordinate,

    #[error("unsupported coordinate reference '{0}'")]
    UnsupportedCrs(String),
}

/// A feature read from a document, not yet georeferenced to the canonical system
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    pub geometry: Geometry<f64>,
    /// Declared coordinate reference ([`UNSET_SRID`] when the document declares none)
    pub srid: u32,
    pub properties: Map<String, Value>,
}

impl SourceFeature {
    /// A feature with no declared coordinate reference
    pub fn new(geometry: impl Into<Geometry<f64>>, properties: Map<String, Value>) -> Self {
        Self {
            geometry: geometry.into(),
            srid: UNSET_SRID,
            properties,
        }
    }
}

/// Result of reading a FeatureCollection
#[derive(Debug, Clone, Default)]
pub struct ParsedCollection {
    /// One entry per member feature, in document order
    pub features: Vec<Result<SourceFeature, FeatureParseError>>,
}

/// Parse a GeoJSON FeatureCollection document
pub fn parse_feature_collection(text: &str) -> Result<ParsedCollection, GeoJsonError> {
    let document: Value = serde_json::from_str(text)?;

    let kind = document.get("type").and_then(Value::as_str).unwrap_or("");
    if kind != "FeatureCollection" {
        let found = if kind.is_empty() { "an untyped document" } else { kind };
        return Err(GeoJsonError::NotAFeatureCollection(found.to_string()));
    }

    let members = document
        .get("features")
        .and_then(Value::as_array)
        .ok_or(GeoJsonError::MissingFeatures)?;

    let collection_srid = match document.get("crs") {
        Some(crs) if !crs.is_null() => parse_crs(crs),
        _ => Ok(UNSET_SRID),
    };

    let features = members
        .iter()
        .map(|member| parse_feature(member, &collection_srid))
        .collect();

    Ok(ParsedCollection { features })
}

fn parse_feature(
    member: &Value,
    collection_srid: &Result<u32, FeatureParseError>,
) -> Result<SourceFeature, FeatureParseError> {
    let object = member.as_object().ok_or(FeatureParseError::NotAFeature)?;
    if object.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err(FeatureParseError::NotAFeature);
    }

    let srid = match object.get("crs") {
        Some(crs) if !crs.is_null() => parse_crs(crs)?,
        _ => collection_srid.clone()?,
    };

    let geometry = match object.get("geometry") {
        None | Some(Value::Null) => return Err(FeatureParseError::MissingGeometry),
        Some(value) => parse_geometry(value)?,
    };

    let properties = match object.get("properties") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    Ok(SourceFeature {
        geometry,
        srid,
        properties,
    })
}

/// Parse and validate a GeoJSON geometry object
pub fn parse_geometry(value: &Value) -> Result<Geometry<f64>, FeatureParseError> {
    let parsed: GeoJsonGeometry = serde_json::from_value(value.clone())
        .map_err(|e| FeatureParseError::InvalidGeometry(e.to_string()))?;
    parsed.try_into()
}

/// Parse and validate a Well-Known Text geometry
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>, FeatureParseError> {
    let geometry = Geometry::<f64>::try_from_wkt_str(text.trim())
        .map_err(|e| FeatureParseError::InvalidGeometry(e.to_string()))?;
    if !geometry.is_valid() {
        return Err(FeatureParseError::InvalidGeometry(format!(
            "invalid {} geometry",
            GeometryKind::of(&geometry)
        )));
    }
    Ok(geometry)
}

/// Extract a numeric reference from a GeoJSON `crs` member
///
/// Named references (`EPSG:n`, `urn:ogc:def:crs:EPSG::n`, CRS84) and the older
/// `{"type": "EPSG", "properties": {"code": n}}` form are recognised.
fn parse_crs(crs: &Value) -> Result<u32, FeatureParseError> {
    let properties = crs.get("properties");

    if let Some(code) = properties.and_then(|p| p.get("code")).and_then(Value::as_u64) {
        return u32::try_from(code).map_err(|_| FeatureParseError::UnsupportedCrs(code.to_string()));
    }

    let name = properties
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| FeatureParseError::UnsupportedCrs(crs.to_string()))?;

    parse_crs_name(name).ok_or_else(|| FeatureParseError::UnsupportedCrs(name.to_string()))
}

fn parse_crs_name(name: &str) -> Option<u32> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.ends_with("CRS84") {
        return Some(WGS84_SRID);
    }
    if !upper.contains("EPSG") {
        return None;
    }
    upper.rsplit(':').next()?.parse().ok()
}

fn to_coord(position: &[f64]) -> Result<Coord<f64>, FeatureParseError> {
    match position {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        [_, _, ..] => Err(FeatureParseError::NonFiniteCoordinate),
        _ => Err(FeatureParseError::InvalidGeometry(format!(
            "position needs at least 2 ordinates, found {}",
            position.len()
        ))),
    }
}

fn to_line_string(positions: &[Position]) -> Result<LineString<f64>, FeatureParseError> {
    if positions.len() < 2 {
        return Err(FeatureParseError::InvalidGeometry(
            "line string needs at least 2 positions".to_string(),
        ));
    }
    positions
        .iter()
        .map(|p| to_coord(p))
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

fn to_ring(positions: &[Position]) -> Result<LineString<f64>, FeatureParseError> {
    if positions.len() < 4 {
        return Err(FeatureParseError::InvalidGeometry(
            "polygon ring needs at least 4 positions".to_string(),
        ));
    }
    let ring = to_line_string(positions)?;
    if !ring.is_closed() {
        return Err(FeatureParseError::InvalidGeometry(
            "polygon ring is not closed".to_string(),
        ));
    }
    Ok(ring)
}

fn to_polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>, FeatureParseError> {
    let (exterior, interiors) = rings.split_first().ok_or_else(|| {
        FeatureParseError::InvalidGeometry("polygon has no rings".to_string())
    })?;
    let interiors = interiors
        .iter()
        .map(|r| to_ring(r))
        .collect::<Result<Vec<_>, _>>()?;
    let polygon = Polygon::new(to_ring(exterior)?, interiors);
    if !polygon.is_valid() {
        return Err(FeatureParseError::InvalidGeometry(
            "polygon is self-intersecting or has misplaced holes".to_string(),
        ));
    }
    Ok(polygon)
}

fn non_empty<T>(items: &[T], kind: &str) -> Result<(), FeatureParseError> {
    if items.is_empty() {
        Err(FeatureParseError::InvalidGeometry(format!("empty {}", kind)))
    } else {
        Ok(())
    }
}

impl TryFrom<GeoJsonGeometry> for Geometry<f64> {
    type Error = FeatureParseError;

    fn try_from(value: GeoJsonGeometry) -> Result<Self, Self::Error> {
        let geometry = match value {
            GeoJsonGeometry::Point { coordinates } => Point::from(to_coord(&coordinates)?).into(),
            GeoJsonGeometry::MultiPoint { coordinates } => {
                non_empty(&coordinates, "MultiPoint")?;
                let points = coordinates
                    .iter()
                    .map(|p| to_coord(p).map(Point::from))
                    .collect::<Result<Vec<_>, _>>()?;
                MultiPoint::new(points).into()
            }
            GeoJsonGeometry::LineString { coordinates } => to_line_string(&coordinates)?.into(),
            GeoJsonGeometry::MultiLineString { coordinates } => {
                non_empty(&coordinates, "MultiLineString")?;
                let lines = coordinates
                    .iter()
                    .map(|l| to_line_string(l))
                    .collect::<Result<Vec<_>, _>>()?;
                MultiLineString::new(lines).into()
            }
            GeoJsonGeometry::Polygon { coordinates } => to_polygon(&coordinates)?.into(),
            GeoJsonGeometry::MultiPolygon { coordinates } => {
                non_empty(&coordinates, "MultiPolygon")?;
                let polygons = coordinates
                    .iter()
                    .map(|p| to_polygon(p))
                    .collect::<Result<Vec<_>, _>>()?;
                MultiPolygon::new(polygons).into()
            }
            GeoJsonGeometry::GeometryCollection { geometries } => {
                non_empty(&geometries, "GeometryCollection")?;
                let members = geometries
                    .into_iter()
                    .map(Geometry::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Geometry::GeometryCollection(GeometryCollection::new_from(members))
            }
        };
        Ok(geometry)
    }
}

fn position(coord: Coord<f64>) -> Position {
    vec![coord.x, coord.y]
}

fn positions(line: &LineString<f64>) -> Vec<Position> {
    line.coords().copied().map(position).collect()
}

fn rings(polygon: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(positions)
        .collect()
}

impl From<&Geometry<f64>> for GeoJsonGeometry {
    fn from(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(p) => Self::Point {
                coordinates: position(p.0),
            },
            Geometry::MultiPoint(mp) => Self::MultiPoint {
                coordinates: mp.iter().map(|p| position(p.0)).collect(),
            },
            Geometry::Line(line) => Self::LineString {
                coordinates: vec![position(line.start), position(line.end)],
            },
            Geometry::LineString(ls) => Self::LineString {
                coordinates: positions(ls),
            },
            Geometry::MultiLineString(mls) => Self::MultiLineString {
                coordinates: mls.iter().map(positions).collect(),
            },
            Geometry::Polygon(polygon) => Self::Polygon {
                coordinates: rings(polygon),
            },
            Geometry::Rect(rect) => Self::Polygon {
                coordinates: rings(&rect.to_polygon()),
            },
            Geometry::Triangle(triangle) => Self::Polygon {
                coordinates: rings(&triangle.to_polygon()),
            },
            Geometry::MultiPolygon(mp) => Self::MultiPolygon {
                coordinates: mp.iter().map(rings).collect(),
            },
            Geometry::GeometryCollection(gc) => Self::GeometryCollection {
                geometries: gc.iter().map(Self::from).collect(),
            },
        }
    }
}

/// GeoJSON geometry object for a geometry value
pub fn geometry_to_value(geometry: &Geometry<f64>) -> Value {
    serde_json::to_value(GeoJsonGeometry::from(geometry)).unwrap_or(Value::Null)
}

/// A GeoJSON Feature object
pub fn feature_value(geometry: &Geometry<f64>, properties: Map<String, Value>) -> Value {
    json!({
        "type": "Feature",
        "geometry": geometry_to_value(geometry),
        "properties": properties,
    })
}

/// A GeoJSON FeatureCollection object
pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

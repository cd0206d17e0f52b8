//! Spatial filter construction and predicate evaluation
//!
//! A query bounding box becomes a closed rectangular polygon, optionally inflated
//! by a buffer distance, and features are tested against it with either the
//! "intersects" or the "within" predicate.
//!
//! A missing or malformed bounding box never produces an error. It produces no
//! filter at all (`None`), so the query passes every feature through.

use crate::model::Feature;
use crate::utils;
use geo::{Coord, Geometry, Intersects, LineString, Polygon, Rect, Relate};
use std::str::FromStr;

/// Side expansion applied to a zero-area (single point) bounding box, in degrees (about 11 m)
pub const POINT_QUERY_EPSILON: f64 = 0.0001;

/// Number of segments used to approximate a quarter circle of a buffered corner
const QUADRANT_SEGMENTS: usize = 8;

/// Axis-aligned rectangle `(min_x, min_y, max_x, max_y)` in geographic degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse `"minX,minY,maxX,maxY"`
    ///
    /// Returns `None` on a wrong field count, a non-numeric field or a non-finite value.
    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() != 4 {
            return None;
        }

        let mut values = [0.0_f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            let value = part.trim().parse::<f64>().ok()?;
            if !value.is_finite() {
                return None;
            }
            *slot = value;
        }

        Some(Self::new(values[0], values[1], values[2], values[3]))
    }

    /// Whether the box collapses to a single point
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.min_x == self.max_x && self.min_y == self.max_y
    }

    /// The box itself, or the epsilon-expanded box for a point query
    pub fn effective_rect(&self) -> Rect<f64> {
        let (min_x, min_y, max_x, max_y) = if self.is_degenerate() {
            (
                self.min_x - POINT_QUERY_EPSILON,
                self.min_y - POINT_QUERY_EPSILON,
                self.max_x + POINT_QUERY_EPSILON,
                self.max_y + POINT_QUERY_EPSILON,
            )
        } else {
            (self.min_x, self.min_y, self.max_x, self.max_y)
        };
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }
}

/// Spatial predicate applied between a feature and the filter polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialOperation {
    /// Any shared point, boundary touching included
    #[default]
    Intersects,
    /// Feature geometry wholly contained in the filter polygon
    Within,
}

impl SpatialOperation {
    /// Interpret a query parameter: `"within"` selects [`Within`](Self::Within), anything else intersects
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("within") => Self::Within,
            _ => Self::Intersects,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intersects => "intersects",
            Self::Within => "within",
        }
    }
}

impl FromStr for SpatialOperation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_param(Some(s)))
    }
}

/// A filter polygon plus the predicate to evaluate against it
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFilter {
    /// Filter polygon, kept as a geometry so predicates can take it directly
    geometry: Geometry<f64>,
    /// Bounding rectangle of the filter polygon, used as a cheap prefilter
    bounds: Rect<f64>,
    operation: SpatialOperation,
}

impl SpatialFilter {
    /// Build a filter from a parsed bounding box
    ///
    /// A positive `buffer_meters` inflates the rectangle outward by the linear
    /// degree approximation of that distance, with rounded corners.
    pub fn new(bbox: BoundingBox, operation: SpatialOperation, buffer_meters: Option<f64>) -> Self {
        let rect = bbox.effective_rect();

        let (polygon, bounds) = match buffer_meters {
            Some(meters) if meters > 0.0 && meters.is_finite() => {
                let distance = utils::meters_to_degrees(meters);
                let bounds = Rect::new(
                    Coord {
                        x: rect.min().x - distance,
                        y: rect.min().y - distance,
                    },
                    Coord {
                        x: rect.max().x + distance,
                        y: rect.max().y + distance,
                    },
                );
                (buffered_rectangle(rect, distance), bounds)
            }
            _ => (rect.to_polygon(), rect),
        };

        Self {
            geometry: Geometry::Polygon(polygon),
            bounds,
            operation,
        }
    }

    /// Build a filter from raw query parameters
    ///
    /// Returns `None` (no spatial filtering) when the bounding box is absent or malformed.
    pub fn from_params(
        bbox: Option<&str>,
        operation: Option<&str>,
        buffer_meters: Option<f64>,
    ) -> Option<Self> {
        let text = bbox.filter(|s| !s.is_empty())?;
        match BoundingBox::parse(text) {
            Some(parsed) => Some(Self::new(
                parsed,
                SpatialOperation::from_param(operation),
                buffer_meters,
            )),
            None => {
                tracing::debug!("Ignoring malformed bbox filter: {:?}", text);
                None
            }
        }
    }

    #[inline]
    pub fn operation(&self) -> SpatialOperation {
        self.operation
    }

    /// The filter polygon
    #[inline]
    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    /// Bounding rectangle of the filter polygon
    #[inline]
    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    /// Evaluate the predicate against a geometry
    pub fn matches_geometry(&self, geometry: &Geometry<f64>) -> bool {
        match self.operation {
            SpatialOperation::Intersects => geometry.intersects(&self.geometry),
            SpatialOperation::Within => geometry.relate(&self.geometry).is_within(),
        }
    }

    /// Evaluate the predicate against a stored feature, using its cached envelope first
    pub fn matches(&self, feature: &Feature) -> bool {
        match feature.envelope() {
            Some(envelope) if !envelope.intersects(&self.bounds) => false,
            Some(_) => self.matches_geometry(&feature.geometry),
            // Empty geometries share no point with anything
            None => false,
        }
    }
}

/// Outward buffer of a rectangle: straight sides pushed out by `distance`,
/// corners replaced by quarter-circle arcs.
fn buffered_rectangle(rect: Rect<f64>, distance: f64) -> Polygon<f64> {
    let min = rect.min();
    let max = rect.max();

    // Counter-clockwise, starting below the bottom-right corner
    let corners = [
        (max.x, min.y, -90.0_f64),
        (max.x, max.y, 0.0),
        (min.x, max.y, 90.0),
        (min.x, min.y, 180.0),
    ];

    let step = 90.0 / QUADRANT_SEGMENTS as f64;
    let mut ring = Vec::with_capacity(corners.len() * (QUADRANT_SEGMENTS + 1) + 1);
    for (cx, cy, start) in corners {
        for i in 0..=QUADRANT_SEGMENTS {
            let angle = (start + step * i as f64).to_radians();
            ring.push(Coord {
                x: cx + distance * angle.cos(),
                y: cy + distance * angle.sin(),
            });
        }
    }

    // Polygon::new closes the ring
    Polygon::new(LineString::from(ring), vec![])
}

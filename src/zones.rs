//! Zone Index: static polygon zones loaded from a GeoJSON FeatureCollection.
//!
//! Zones are immutable once loaded. Each carries a precomputed bounding box so
//! membership tests can reject most points without touching the polygon.
//!
//! Containment is half-open: a point lying exactly on a ring edge or vertex is
//! outside. Two zones sharing an edge therefore never both claim a point on it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LoadError;
use crate::mapper::IntensityRange;

/// A geographic position, `x = lng`, `y = lat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lng: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lng: f64, lat: f64) -> Self {
        Point { lng, lat }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    fn of_ring(ring: &[[f64; 2]]) -> Self {
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for &[x, y] in ring {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }

    fn union(self, other: BoundingBox) -> Self {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Inclusive containment; a point outside the box is outside the zone.
    pub fn contains(&self, p: Point) -> bool {
        !(p.lng < self.min_x || p.lng > self.max_x || p.lat < self.min_y || p.lat > self.max_y)
    }
}

/// One polygon: an exterior ring and zero or more holes. Rings are stored
/// open (the closing vertex of a GeoJSON ring is dropped).
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<[f64; 2]>,
    pub holes: Vec<Vec<[f64; 2]>>,
}

impl Polygon {
    pub fn new(exterior: Vec<[f64; 2]>, holes: Vec<Vec<[f64; 2]>>) -> Self {
        Polygon { exterior, holes }
    }

    fn contains(&self, p: Point) -> bool {
        match ring_position(&self.exterior, p) {
            RingPosition::Inside => self
                .holes
                .iter()
                .all(|hole| ring_position(hole, p) == RingPosition::Outside),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingPosition {
    Inside,
    Boundary,
    Outside,
}

/// Even-odd ray cast with an explicit on-edge check in front of it.
fn ring_position(ring: &[[f64; 2]], p: Point) -> RingPosition {
    let (x, y) = (p.lng, p.lat);
    let n = ring.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];

        let cross = (xj - xi) * (y - yi) - (yj - yi) * (x - xi);
        if cross == 0.0
            && x >= xi.min(xj)
            && x <= xi.max(xj)
            && y >= yi.min(yj)
            && y <= yi.max(yj)
        {
            return RingPosition::Boundary;
        }

        if (yi > y) != (yj > y) {
            let x_cross = xi + (y - yi) * (xj - xi) / (yj - yi);
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    if inside {
        RingPosition::Inside
    } else {
        RingPosition::Outside
    }
}

/// A loaded zone. Immutable for the lifetime of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: usize,
    pub polygons: Vec<Polygon>,
    pub bbox: BoundingBox,
    pub intensity: f64,
}

impl Zone {
    /// Bounding-box rejection followed by the exact polygon test.
    pub fn contains(&self, p: Point) -> bool {
        self.bbox.contains(p) && self.contains_exact(p)
    }

    /// Polygon test alone, without the bounding-box shortcut.
    pub fn contains_exact(&self, p: Point) -> bool {
        self.polygons.iter().any(|poly| poly.contains(p))
    }
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    geometry: Option<RawGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

#[derive(Debug, Clone)]
pub struct ZoneIndex {
    zones: Vec<Zone>,
    range: IntensityRange,
}

impl ZoneIndex {
    /// Parse a GeoJSON FeatureCollection of `Polygon`/`MultiPolygon` features.
    ///
    /// `property` names the numeric intensity attribute. The intensity range
    /// is the min/max over zones carrying it, or `fallback` when none do;
    /// zones without the attribute take the midpoint of that range.
    pub fn load(
        geojson: &str,
        property: &str,
        fallback: IntensityRange,
    ) -> Result<ZoneIndex, LoadError> {
        let raw: RawCollection =
            serde_json::from_str(geojson).map_err(|e| LoadError::Json(e.to_string()))?;
        if raw.features.is_empty() {
            return Err(LoadError::EmptyCollection);
        }

        let mut shapes = Vec::with_capacity(raw.features.len());
        for (idx, feature) in raw.features.iter().enumerate() {
            let polygons = parse_geometry(idx, feature.geometry.as_ref())?;
            let intensity = feature
                .properties
                .as_ref()
                .and_then(|props| props.get(property))
                .and_then(intensity_value);
            shapes.push((polygons, intensity));
        }

        Self::from_shapes(shapes, fallback)
    }

    /// Build an index from already-parsed polygons, validating them the same
    /// way [`ZoneIndex::load`] does.
    pub fn from_shapes(
        shapes: Vec<(Vec<Polygon>, Option<f64>)>,
        fallback: IntensityRange,
    ) -> Result<ZoneIndex, LoadError> {
        if shapes.is_empty() {
            return Err(LoadError::EmptyCollection);
        }
        for (idx, (polygons, _)) in shapes.iter().enumerate() {
            validate_polygons(idx, polygons)?;
        }

        let range = IntensityRange::from_values(shapes.iter().filter_map(|(_, i)| *i))
            .unwrap_or(fallback);

        let zones = shapes
            .into_iter()
            .enumerate()
            .map(|(id, (polygons, intensity))| {
                let bbox = polygons
                    .iter()
                    .map(|p| BoundingBox::of_ring(&p.exterior))
                    .reduce(BoundingBox::union)
                    .unwrap_or(BoundingBox::of_ring(&[]));
                Zone {
                    id,
                    polygons,
                    bbox,
                    intensity: intensity
                        .filter(|v| v.is_finite())
                        .unwrap_or_else(|| range.midpoint()),
                }
            })
            .collect();

        Ok(ZoneIndex { zones, range })
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub fn get(&self, id: usize) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn bounding_box_of(&self, id: usize) -> Option<BoundingBox> {
        self.zones.get(id).map(|z| z.bbox)
    }

    pub fn intensity_range(&self) -> IntensityRange {
        self.range
    }
}

fn intensity_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn parse_geometry(feature: usize, geometry: Option<&RawGeometry>) -> Result<Vec<Polygon>, LoadError> {
    let Some(geometry) = geometry else {
        return Err(LoadError::UnsupportedGeometry {
            feature,
            kind: "null".to_string(),
        });
    };
    match geometry.kind.as_str() {
        "Polygon" => {
            let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(geometry.coordinates.clone())
                .map_err(|e| LoadError::Json(format!("feature {feature}: {e}")))?;
            Ok(vec![polygon_from_rings(feature, rings)?])
        }
        "MultiPolygon" => {
            let polys: Vec<Vec<Vec<Vec<f64>>>> =
                serde_json::from_value(geometry.coordinates.clone())
                    .map_err(|e| LoadError::Json(format!("feature {feature}: {e}")))?;
            if polys.is_empty() {
                return Err(LoadError::DegeneratePolygon { feature });
            }
            polys
                .into_iter()
                .map(|rings| polygon_from_rings(feature, rings))
                .collect()
        }
        other => Err(LoadError::UnsupportedGeometry {
            feature,
            kind: other.to_string(),
        }),
    }
}

fn polygon_from_rings(feature: usize, rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon, LoadError> {
    let mut rings = rings
        .into_iter()
        .map(|ring| ring_from_positions(feature, ring))
        .collect::<Result<Vec<_>, _>>()?;
    if rings.is_empty() {
        return Err(LoadError::DegeneratePolygon { feature });
    }
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

fn ring_from_positions(feature: usize, positions: Vec<Vec<f64>>) -> Result<Vec<[f64; 2]>, LoadError> {
    let mut ring = Vec::with_capacity(positions.len());
    for pos in positions {
        if pos.len() < 2 {
            return Err(LoadError::DegeneratePolygon { feature });
        }
        ring.push([pos[0], pos[1]]);
    }
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    Ok(ring)
}

fn validate_polygons(feature: usize, polygons: &[Polygon]) -> Result<(), LoadError> {
    if polygons.is_empty() {
        return Err(LoadError::DegeneratePolygon { feature });
    }
    for poly in polygons {
        for ring in std::iter::once(&poly.exterior).chain(poly.holes.iter()) {
            if ring.iter().flatten().any(|c| !c.is_finite()) {
                return Err(LoadError::NonFiniteCoordinate { feature });
            }
            if ring.len() < 3 || signed_area(ring) == 0.0 {
                return Err(LoadError::DegeneratePolygon { feature });
            }
        }
    }
    Ok(())
}

fn signed_area(ring: &[[f64; 2]]) -> f64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let [x0, y0] = ring[i];
            let [x1, y1] = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum::<f64>()
        / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_feature(x0: f64, y0: f64, size: f64, dn: Option<f64>) -> String {
        let props = match dn {
            Some(v) => format!(r#"{{"DN": {v}}}"#),
            None => "{}".to_string(),
        };
        format!(
            r#"{{"type":"Feature","properties":{props},"geometry":{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}}}"#,
            x1 = x0 + size,
            y1 = y0 + size,
        )
    }

    fn collection(features: &[String]) -> String {
        format!(
            r#"{{"type":"FeatureCollection","features":[{}]}}"#,
            features.join(",")
        )
    }

    fn load(features: &[String]) -> Result<ZoneIndex, LoadError> {
        ZoneIndex::load(&collection(features), "DN", IntensityRange::new(0.0, 1.0))
    }

    #[test]
    fn loads_polygons_with_bbox_and_range() {
        let index = load(&[
            square_feature(0.0, 0.0, 1.0, Some(-1.0)),
            square_feature(2.0, 0.0, 1.0, Some(-11.0)),
        ])
        .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.intensity_range(), IntensityRange { min: -11.0, max: -1.0 });
        let bbox = index.bounding_box_of(1).unwrap();
        assert_eq!((bbox.min_x, bbox.max_x), (2.0, 3.0));
        assert!(index.bounding_box_of(2).is_none());
    }

    #[test]
    fn closing_vertex_is_dropped() {
        let index = load(&[square_feature(0.0, 0.0, 1.0, Some(1.0))]).unwrap();
        assert_eq!(index.get(0).unwrap().polygons[0].exterior.len(), 4);
    }

    #[test]
    fn empty_collection_is_rejected() {
        assert!(matches!(load(&[]), Err(LoadError::EmptyCollection)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = ZoneIndex::load("{ nope", "DN", IntensityRange::new(0.0, 1.0)).unwrap_err();
        assert!(matches!(err, LoadError::Json(_)), "got {err:?}");
    }

    #[test]
    fn degenerate_ring_is_rejected() {
        let line = r#"{"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[0,0],[1,1],[2,2],[0,0]]]}}"#;
        let err = load(&[line.to_string()]).unwrap_err();
        assert!(matches!(err, LoadError::DegeneratePolygon { feature: 0 }), "got {err:?}");
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let poly = Polygon::new(vec![[0.0, 0.0], [f64::NAN, 0.0], [1.0, 1.0]], vec![]);
        let err = ZoneIndex::from_shapes(vec![(vec![poly], None)], IntensityRange::new(0.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, LoadError::NonFiniteCoordinate { feature: 0 }));
    }

    #[test]
    fn unsupported_geometry_is_rejected() {
        let pt = r#"{"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[0,0]}}"#;
        let err = load(&[pt.to_string()]).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedGeometry { feature: 0, .. }));
    }

    #[test]
    fn missing_intensity_uses_fallback_range() {
        let index = load(&[square_feature(0.0, 0.0, 1.0, None)]).unwrap();
        assert_eq!(index.intensity_range(), IntensityRange::new(0.0, 1.0));
        assert!((index.get(0).unwrap().intensity - 0.5).abs() < 1e-12);
    }

    #[test]
    fn string_intensity_is_accepted() {
        let f = r#"{"type":"Feature","properties":{"DN":"3"},"geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}"#;
        let index = load(&[f.to_string()]).unwrap();
        assert_eq!(index.get(0).unwrap().intensity, 3.0);
    }

    #[test]
    fn interior_point_is_inside() {
        let index = load(&[square_feature(0.0, 0.0, 1.0, Some(1.0))]).unwrap();
        assert!(index.get(0).unwrap().contains(Point::new(0.5, 0.5)));
        assert!(!index.get(0).unwrap().contains(Point::new(1.5, 0.5)));
    }

    #[test]
    fn boundary_points_are_outside() {
        let index = load(&[square_feature(0.0, 0.0, 1.0, Some(1.0))]).unwrap();
        let zone = index.get(0).unwrap();
        assert!(!zone.contains(Point::new(1.0, 0.5)), "edge must be outside");
        assert!(!zone.contains(Point::new(0.0, 0.0)), "vertex must be outside");
        assert!(!zone.contains(Point::new(0.5, 1.0)), "top edge must be outside");
    }

    #[test]
    fn shared_edge_claims_neither_zone() {
        let index = load(&[
            square_feature(0.0, 0.0, 1.0, Some(1.0)),
            square_feature(1.0, 0.0, 1.0, Some(2.0)),
        ])
        .unwrap();
        let p = Point::new(1.0, 0.25);
        assert!(index.iter().all(|z| !z.contains(p)));
    }

    #[test]
    fn holes_are_excluded() {
        let f = r#"{"type":"Feature","properties":{"DN":1},"geometry":{"type":"Polygon","coordinates":[
            [[0,0],[10,0],[10,10],[0,10],[0,0]],
            [[4,4],[6,4],[6,6],[4,6],[4,4]]]}}"#;
        let index = load(&[f.to_string()]).unwrap();
        let zone = index.get(0).unwrap();
        assert!(zone.contains(Point::new(2.0, 2.0)));
        assert!(!zone.contains(Point::new(5.0, 5.0)));
        assert!(!zone.contains(Point::new(4.0, 5.0)), "hole edge is a boundary");
    }

    #[test]
    fn multipolygon_parts_all_count() {
        let f = r#"{"type":"Feature","properties":{"DN":1},"geometry":{"type":"MultiPolygon","coordinates":[
            [[[0,0],[1,0],[1,1],[0,1],[0,0]]],
            [[[5,5],[6,5],[6,6],[5,6],[5,5]]]]}}"#;
        let index = load(&[f.to_string()]).unwrap();
        let zone = index.get(0).unwrap();
        assert!(zone.contains(Point::new(0.5, 0.5)));
        assert!(zone.contains(Point::new(5.5, 5.5)));
        assert!(!zone.contains(Point::new(3.0, 3.0)));
        assert_eq!(zone.bbox.max_x, 6.0);
    }

    #[test]
    fn bbox_prefilter_agrees_with_exact_test() {
        let concave = r#"{"type":"Feature","properties":{"DN":1},"geometry":{"type":"Polygon","coordinates":[
            [[0,0],[4,0],[4,4],[2,1],[0,4],[0,0]]]}}"#;
        let index = load(&[
            concave.to_string(),
            square_feature(3.0, 3.0, 2.0, Some(2.0)),
        ])
        .unwrap();
        let mut y = -1.0;
        while y <= 6.0 {
            let mut x = -1.0;
            while x <= 6.0 {
                let p = Point::new(x, y);
                for zone in index.iter() {
                    assert_eq!(zone.contains(p), zone.contains_exact(p), "mismatch at {p:?}");
                }
                x += 0.25;
            }
            y += 0.25;
        }
    }
}

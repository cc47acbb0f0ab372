use serde::{Deserialize, Serialize};

/// A raster/vector background for badge placement (§3, §4.8): either a
/// standalone SVG or a PDF page embedded as the floorplan's background.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Floorplan {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub source_path: String,
}

/// A named area on a floorplan; devices assigned to the `Location` inherit
/// membership in this polygon.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Location {
    pub id: String,
    pub network_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// An ordered list of 2-D points on a floorplan, bound to a `Location`
/// (§3). The point order is the polygon's winding order, not load-bearing
/// beyond rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationPolygon {
    pub id: String,
    pub floorplan_id: String,
    pub location_id: String,
    pub points: Vec<Point>,
}

impl LocationPolygon {
    /// Arithmetic mean of the vertex coordinates (§GLOSSARY: Centroid).
    pub fn centroid(&self) -> Point {
        let n = self.points.len().max(1) as f64;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point {
            x: sx / n,
            y: sy / n,
        }
    }

    /// Axis-aligned bounding box as `(min, max)`.
    pub fn bounding_box(&self) -> (Point, Point) {
        let mut min = Point {
            x: f64::INFINITY,
            y: f64::INFINITY,
        };
        let mut max = Point {
            x: f64::NEG_INFINITY,
            y: f64::NEG_INFINITY,
        };
        for p in &self.points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        (min, max)
    }

    /// Axis-aligned bounding box as `(min_x, min_y, max_x, max_y)`, the
    /// scalar form the badge placer's label sizing wants (§4.8 step 1).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let (min, max) = self.bounding_box();
        (min.x, min.y, max.x, max.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> LocationPolygon {
        LocationPolygon {
            id: "poly-1".into(),
            floorplan_id: "fp-1".into(),
            location_id: "loc-1".into(),
            points: vec![
                Point { x: 0.0, y: 0.0 },
                Point { x: 10.0, y: 0.0 },
                Point { x: 10.0, y: 10.0 },
                Point { x: 0.0, y: 10.0 },
            ],
        }
    }

    #[test]
    fn test_centroid() {
        let c = square().centroid();
        assert!((c.x - 5.0).abs() < 1e-9);
        assert!((c.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_box() {
        let (min, max) = square().bounding_box();
        assert_eq!(min, Point { x: 0.0, y: 0.0 });
        assert_eq!(max, Point { x: 10.0, y: 10.0 });
    }
}

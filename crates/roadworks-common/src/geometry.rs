//! Polygon footprints and the geometry contract consumed by the core.
//!
//! The core never computes topology itself; it asks a [`GeometryValidator`].
//! [`PlanarGeometry`] is a straightforward implementation for projected
//! (metric) coordinates with a single exterior ring and no holes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Exterior ring of a footprint. The closing coordinate may be repeated or
/// omitted; [`Polygon::ring`] normalises both forms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub coordinates: Vec<Coordinate>,
}

impl Polygon {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self { coordinates }
    }

    /// Build a polygon from `(x, y)` pairs.
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        Self::new(points.iter().map(|&(x, y)| Coordinate::new(x, y)).collect())
    }

    /// Axis-aligned rectangle, handy for fixtures and management areas.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::from_points(&[(min_x, min_y), (max_x, min_y), (max_x, max_y), (min_x, max_y)])
    }

    /// Vertices without the repeated closing coordinate.
    pub fn ring(&self) -> &[Coordinate] {
        match self.coordinates.as_slice() {
            [first, .., last] if first == last => {
                &self.coordinates[..self.coordinates.len() - 1]
            }
            all => all,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.ring().len()
    }

    /// Vertex average; good enough to look up the nearest address.
    pub fn centroid(&self) -> Option<Coordinate> {
        let ring = self.ring();
        if ring.is_empty() {
            return None;
        }
        let n = ring.len() as f64;
        let (sx, sy) = ring.iter().fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
        Some(Coordinate::new(sx / n, sy / n))
    }

    fn edges(&self) -> impl Iterator<Item = (Coordinate, Coordinate)> + '_ {
        let ring = self.ring();
        (0..ring.len()).map(move |i| (ring[i], ring[(i + 1) % ring.len()]))
    }

    fn bounds(&self) -> Option<(Coordinate, Coordinate)> {
        let ring = self.ring();
        let first = *ring.first()?;
        Some(ring.iter().fold((first, first), |(lo, hi), c| {
            (
                Coordinate::new(lo.x.min(c.x), lo.y.min(c.y)),
                Coordinate::new(hi.x.max(c.x), hi.y.max(c.y)),
            )
        }))
    }
}

/// Geometry library contract: simplicity, validity, area and intersection.
pub trait GeometryValidator: Send + Sync {
    /// True when no edge crosses or touches a non-adjacent edge.
    fn is_simple(&self, polygon: &Polygon) -> bool;

    /// True when the polygon encloses a non-degenerate area.
    fn is_valid(&self, polygon: &Polygon) -> bool;

    /// Enclosed area in square units of the coordinate system.
    fn area(&self, polygon: &Polygon) -> f64;

    /// True when the two polygons share at least one point.
    fn intersects(&self, a: &Polygon, b: &Polygon) -> bool;
}

/// Planar geometry over projected coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarGeometry;

impl GeometryValidator for PlanarGeometry {
    fn is_simple(&self, polygon: &Polygon) -> bool {
        let ring = polygon.ring();
        if ring.len() < 3 {
            return false;
        }
        for i in 0..ring.len() {
            for j in (i + 1)..ring.len() {
                if ring[i] == ring[j] {
                    return false;
                }
            }
        }
        let edges: Vec<_> = polygon.edges().collect();
        let n = edges.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let adjacent = j == i + 1 || (i == 0 && j == n - 1);
                if adjacent {
                    continue;
                }
                if segments_intersect(edges[i].0, edges[i].1, edges[j].0, edges[j].1) {
                    return false;
                }
            }
        }
        true
    }

    fn is_valid(&self, polygon: &Polygon) -> bool {
        let ring = polygon.ring();
        ring.len() >= 3
            && ring.iter().all(|c| c.x.is_finite() && c.y.is_finite())
            && self.area(polygon) > 0.0
    }

    fn area(&self, polygon: &Polygon) -> f64 {
        let twice: f64 = polygon
            .edges()
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum();
        twice.abs() / 2.0
    }

    fn intersects(&self, a: &Polygon, b: &Polygon) -> bool {
        let (Some((a_lo, a_hi)), Some((b_lo, b_hi))) = (a.bounds(), b.bounds()) else {
            return false;
        };
        if a_hi.x < b_lo.x || b_hi.x < a_lo.x || a_hi.y < b_lo.y || b_hi.y < a_lo.y {
            return false;
        }
        for (p1, p2) in a.edges() {
            for (q1, q2) in b.edges() {
                if segments_intersect(p1, p2, q1, q2) {
                    return true;
                }
            }
        }
        // No crossing edges: either disjoint or one contains the other.
        a.ring().first().is_some_and(|c| contains_point(b, *c))
            || b.ring().first().is_some_and(|c| contains_point(a, *c))
    }
}

fn orientation(p: Coordinate, q: Coordinate, r: Coordinate) -> f64 {
    (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
}

fn on_segment(p: Coordinate, q: Coordinate, r: Coordinate) -> bool {
    r.x >= p.x.min(q.x) && r.x <= p.x.max(q.x) && r.y >= p.y.min(q.y) && r.y <= p.y.max(q.y)
}

fn segments_intersect(p1: Coordinate, p2: Coordinate, q1: Coordinate, q2: Coordinate) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// Even-odd ray casting.
fn contains_point(polygon: &Polygon, point: Coordinate) -> bool {
    let mut inside = false;
    for (a, b) in polygon.edges() {
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if point.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_area_is_half_the_box() {
        let triangle = Polygon::from_points(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        assert_eq!(PlanarGeometry.area(&triangle), 50.0);
        assert!(PlanarGeometry.is_simple(&triangle));
        assert!(PlanarGeometry.is_valid(&triangle));
    }

    #[test]
    fn closing_coordinate_is_ignored() {
        let open = Polygon::rectangle(0.0, 0.0, 4.0, 5.0);
        let mut closed = open.clone();
        closed.coordinates.push(closed.coordinates[0]);
        assert_eq!(closed.vertex_count(), 4);
        assert_eq!(PlanarGeometry.area(&closed), 20.0);
        assert_eq!(PlanarGeometry.area(&open), 20.0);
    }

    #[test]
    fn bowtie_is_not_simple() {
        let bowtie = Polygon::from_points(&[(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0)]);
        assert!(!PlanarGeometry.is_simple(&bowtie));
    }

    #[test]
    fn collinear_ring_is_simple_but_not_valid() {
        let line = Polygon::from_points(&[(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)]);
        assert!(!PlanarGeometry.is_valid(&line));
        assert_eq!(PlanarGeometry.area(&line), 0.0);
    }

    #[test]
    fn repeated_vertex_is_not_simple() {
        let spike = Polygon::from_points(&[(0.0, 0.0), (10.0, 0.0), (0.0, 0.0), (0.0, 10.0)]);
        assert!(!PlanarGeometry.is_simple(&spike));
    }

    #[test]
    fn intersects_detects_overlap_containment_and_disjoint() {
        let big = Polygon::rectangle(0.0, 0.0, 100.0, 100.0);
        let inner = Polygon::rectangle(10.0, 10.0, 20.0, 20.0);
        let overlapping = Polygon::rectangle(90.0, 90.0, 150.0, 150.0);
        let far = Polygon::rectangle(200.0, 200.0, 210.0, 210.0);

        assert!(PlanarGeometry.intersects(&big, &inner));
        assert!(PlanarGeometry.intersects(&inner, &big));
        assert!(PlanarGeometry.intersects(&big, &overlapping));
        assert!(!PlanarGeometry.intersects(&big, &far));
        assert!(!PlanarGeometry.intersects(&inner, &overlapping));
    }

    #[test]
    fn centroid_of_rectangle() {
        let rect = Polygon::rectangle(0.0, 0.0, 10.0, 20.0);
        assert_eq!(rect.centroid(), Some(Coordinate::new(5.0, 10.0)));
        assert_eq!(Polygon::default().centroid(), None);
    }
}

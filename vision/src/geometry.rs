use serde::{Deserialize, Serialize};

const ON_EDGE_EPSILON: f64 = 1e-9;

/// Largest accepted zone coordinate magnitude. Keeps vertex differences and
/// products well inside integer range when zones are drawn.
pub const MAX_COORDINATE: i32 = 1 << 16;

/// A point in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn in_range(&self) -> bool {
        self.x.abs() <= MAX_COORDINATE && self.y.abs() <= MAX_COORDINATE
    }
}

/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    /// Where a standing subject touches the ground.
    pub fn bottom_center(&self) -> (f64, f64) {
        ((self.x1 as f64 + self.x2 as f64) / 2.0, self.y2 as f64)
    }
}

/// Axis-aligned rectangle with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl Rect {
    /// Corners may be given in any order.
    pub fn new(x_a: i32, y_a: i32, x_b: i32, y_b: i32) -> Self {
        Self {
            x_min: x_a.min(x_b),
            y_min: y_a.min(y_b),
            x_max: x_a.max(x_b),
            y_max: y_a.max(y_b),
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min as f64
            && x <= self.x_max as f64
            && y >= self.y_min as f64
            && y <= self.y_max as f64
    }
}

/// Simple polygon with at least three vertices enclosing a non-zero area.
/// The closing edge from the last vertex back to the first is implicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    /// Repeated vertices are collapsed, including any trailing copies of the
    /// first vertex. `None` when a vertex is out of range or what remains
    /// has fewer than three vertices or no area.
    pub fn new(mut points: Vec<Point>) -> Option<Self> {
        if !points.iter().all(Point::in_range) {
            return None;
        }
        points.dedup();
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return None;
        }
        let polygon = Self { points };
        (polygon.doubled_area() != 0).then_some(polygon)
    }

    /// Shoelace sum, twice the signed area.
    fn doubled_area(&self) -> i64 {
        self.edges()
            .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
            .sum()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    /// Even-odd ray casting; points on an edge or vertex count as inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            let (ax, ay) = (a.x as f64, a.y as f64);
            let (bx, by) = (b.x as f64, b.y as f64);
            if on_segment(ax, ay, bx, by, x, y) {
                return true;
            }
            if (ay > y) != (by > y) {
                let x_cross = ax + (y - ay) * (bx - ax) / (by - ay);
                if x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }
}

fn on_segment(ax: f64, ay: f64, bx: f64, by: f64, x: f64, y: f64) -> bool {
    let cross = (bx - ax) * (y - ay) - (by - ay) * (x - ax);
    if cross.abs() > ON_EDGE_EPSILON {
        return false;
    }
    x >= ax.min(bx) && x <= ax.max(bx) && y >= ay.min(by) && y <= ay.max(by)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::new(vec![
            Point::new(0, 0),
            Point::new(100, 0),
            Point::new(100, 100),
            Point::new(0, 100),
        ])
        .unwrap()
    }

    #[test]
    fn polygon_needs_three_points() {
        assert!(Polygon::new(vec![]).is_none());
        assert!(Polygon::new(vec![Point::new(0, 0), Point::new(1, 1)]).is_none());
        // A closed triangle with only two distinct vertices is not a polygon
        assert!(
            Polygon::new(vec![Point::new(0, 0), Point::new(5, 5), Point::new(0, 0)]).is_none()
        );
    }

    #[test]
    fn repeated_closing_vertices_are_collapsed() {
        let poly = Polygon::new(vec![
            Point::new(0, 0),
            Point::new(100, 0),
            Point::new(50, 80),
            Point::new(0, 0),
            Point::new(0, 0),
        ])
        .unwrap();
        assert_eq!(
            poly.points(),
            &[Point::new(0, 0), Point::new(100, 0), Point::new(50, 80)]
        );
    }

    #[test]
    fn consecutive_duplicates_are_collapsed() {
        let poly = Polygon::new(vec![
            Point::new(0, 0),
            Point::new(100, 0),
            Point::new(100, 0),
            Point::new(50, 80),
        ])
        .unwrap();
        assert_eq!(poly.points().len(), 3);

        // Only two distinct vertices once duplicates go
        assert!(Polygon::new(vec![
            Point::new(0, 0),
            Point::new(0, 0),
            Point::new(9, 9),
            Point::new(9, 9),
        ])
        .is_none());
    }

    #[test]
    fn collinear_polygon_is_rejected() {
        let line = vec![Point::new(0, 0), Point::new(5, 5), Point::new(10, 10)];
        assert!(Polygon::new(line).is_none());
    }

    #[test]
    fn out_of_range_vertex_is_rejected() {
        assert!(Polygon::new(vec![
            Point::new(0, 0),
            Point::new(i32::MAX, 0),
            Point::new(0, 100),
        ])
        .is_none());
        assert!(Polygon::new(vec![
            Point::new(-MAX_COORDINATE, 0),
            Point::new(MAX_COORDINATE, 0),
            Point::new(0, MAX_COORDINATE),
        ])
        .is_some());
    }

    #[test]
    fn explicit_closing_vertex_is_dropped() {
        let poly = Polygon::new(vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(0, 10),
            Point::new(0, 0),
        ])
        .unwrap();
        assert_eq!(poly.points().len(), 3);
    }

    #[test]
    fn point_in_polygon() {
        let poly = square();
        assert!(poly.contains(50.0, 50.0));
        assert!(!poly.contains(150.0, 50.0));
        assert!(!poly.contains(-0.5, 50.0));
    }

    #[test]
    fn boundary_counts_as_inside() {
        let poly = square();
        assert!(poly.contains(0.0, 50.0));
        assert!(poly.contains(100.0, 100.0));
        assert!(poly.contains(50.0, 100.0));
        assert!(poly.contains(100.0, 0.0));
    }

    #[test]
    fn concave_polygon() {
        // U shape open at the top
        let poly = Polygon::new(vec![
            Point::new(0, 0),
            Point::new(30, 0),
            Point::new(30, 60),
            Point::new(70, 60),
            Point::new(70, 0),
            Point::new(100, 0),
            Point::new(100, 100),
            Point::new(0, 100),
        ])
        .unwrap();
        assert!(!poly.contains(50.0, 30.0));
        assert!(poly.contains(15.0, 30.0));
        assert!(poly.contains(50.0, 80.0));
    }

    #[test]
    fn rect_is_inclusive_and_normalized() {
        let rect = Rect::new(320, 180, 160, 90);
        assert_eq!(rect.x_min, 160);
        assert_eq!(rect.y_max, 180);
        assert!(rect.contains(160.0, 90.0));
        assert!(rect.contains(320.0, 180.0));
        assert!(!rect.contains(320.5, 100.0));
    }

    #[test]
    fn box_test_points() {
        let bbox = BoundingBox::new(10, 20, 31, 60);
        assert_eq!(bbox.center(), (20.5, 40.0));
        assert_eq!(bbox.bottom_center(), (20.5, 60.0));
        assert_eq!(bbox.width(), 21);
        assert_eq!(bbox.height(), 40);
    }

    #[test]
    fn extreme_box_extent_saturates() {
        let bbox = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(bbox.width(), i32::MAX);
        assert_eq!(bbox.height(), i32::MAX);
    }
}

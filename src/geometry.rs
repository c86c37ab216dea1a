//! Planar geometry for scan paths and AOI shapes

use std::f64::consts::PI;

use crate::types::Point;

/// Ray casting point-in-polygon test. An empty polygon contains nothing.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n == 0 {
        return false;
    }
    let (x, y) = point;
    let mut inside = false;
    let (mut p1x, mut p1y) = polygon[0];
    for i in 1..=n {
        let (p2x, p2y) = polygon[i % n];
        if y > p1y.min(p2y) && y <= p1y.max(p2y) && x <= p1x.max(p2x) {
            // a horizontal edge never reaches the crossing test
            let crosses = p1x == p2x || x <= (y - p1y) * (p2x - p1x) / (p2y - p1y) + p1x;
            if crosses {
                inside = !inside;
            }
        }
        p1x = p2x;
        p1y = p2y;
    }
    inside
}

pub fn euclidean_distance(a: Point, b: Point) -> f64 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

/// Length and signed direction (radians, `(-pi, pi]`) of the vector `a -> b`.
/// A null vector has angle 0.
pub fn vector_difference(a: Point, b: Point) -> (f64, f64) {
    let distance = euclidean_distance(a, b);
    if distance == 0.0 {
        return (0.0, 0.0);
    }
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    if dy == 0.0 {
        return (distance, 0.0);
    }
    let theta = if dx == 0.0 {
        PI / 2.0
    } else {
        (dy.abs() / dx.abs()).atan()
    };
    let angle = match (dx > 0.0, dy > 0.0) {
        (true, true) => theta,
        (true, false) => -theta,
        (false, true) => PI - theta,
        (false, false) => theta - PI,
    };
    (distance, angle)
}

fn dot(a: Point, b: Point) -> f64 {
    a.0 * b.0 + a.1 * b.1
}

/// Distances between consecutive points
pub fn path_distances(points: &[Point]) -> Vec<f64> {
    points
        .windows(2)
        .map(|pair| euclidean_distance(pair[0], pair[1]))
        .collect()
}

/// Absolute angle of each step with the horizontal axis
pub fn absolute_angles(points: &[Point]) -> Vec<f64> {
    points
        .windows(2)
        .map(|pair| vector_difference(pair[0], pair[1]).1.abs())
        .collect()
}

/// Angle at each interior point between the incoming and outgoing steps.
/// A repeated point yields 0.
pub fn relative_angles(points: &[Point]) -> Vec<f64> {
    points
        .windows(3)
        .map(|triple| {
            let (prev, cur, next) = (triple[0], triple[1], triple[2]);
            let v1 = (prev.0 - cur.0, prev.1 - cur.1);
            let v2 = (next.0 - cur.0, next.1 - cur.1);
            let n1 = dot(v1, v1).sqrt();
            let n2 = dot(v2, v2).sqrt();
            if n1 == 0.0 || n2 == 0.0 {
                return 0.0;
            }
            let cos = dot((v1.0 / n1, v1.1 / n1), (v2.0 / n2, v2.1 / n2));
            cos.clamp(-1.0, 1.0).acos()
        })
        .collect()
}

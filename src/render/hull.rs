//! Incremental 3D convex hull.

use glam::Vec3;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
struct Face {
    v: [usize; 3],
    normal: Vec3,
    offset: f32,
}

impl Face {
    fn new(points: &[Vec3], v: [usize; 3]) -> Self {
        let [a, b, c] = v.map(|i| points[i]);
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self {
            v,
            normal,
            offset: normal.dot(a),
        }
    }

    fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.offset
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.v;
        [(a, b), (b, c), (c, a)]
    }
}

/// Triangles of the convex hull of `points`, wound counter-clockwise when
/// seen from outside. Returns `None` for fewer than four points or a flat
/// (collinear or coplanar) point set.
pub fn convex_hull(points: &[Vec3]) -> Option<Vec<[Vec3; 3]>> {
    if points.len() < 4 || points.iter().any(|p| !p.is_finite()) {
        return None;
    }
    let max_abs = points
        .iter()
        .fold(Vec3::ZERO, |acc, p| acc.max(p.abs()));
    let eps = 3.0 * f32::EPSILON * (max_abs.x + max_abs.y + max_abs.z);

    let [a, b, c, d] = initial_simplex(points, eps)?;
    let mut faces = if Face::new(points, [a, b, c]).distance(points[d]) > 0.0 {
        vec![[a, c, b], [a, b, d], [b, c, d], [c, a, d]]
    } else {
        vec![[a, b, c], [a, d, b], [b, d, c], [c, d, a]]
    }
    .into_iter()
    .map(|v| Face::new(points, v))
    .collect::<Vec<_>>();

    for (index, &point) in points.iter().enumerate() {
        if [a, b, c, d].contains(&index) {
            continue;
        }
        let (visible, kept): (Vec<Face>, Vec<Face>) =
            faces.into_iter().partition(|f| f.distance(point) > eps);
        faces = kept;
        if visible.is_empty() {
            continue;
        }
        let edges: HashSet<(usize, usize)> = visible.iter().flat_map(|f| f.edges()).collect();
        for &(from, to) in &edges {
            if !edges.contains(&(to, from)) {
                faces.push(Face::new(points, [from, to, index]));
            }
        }
    }

    Some(
        faces
            .iter()
            .map(|f| f.v.map(|i| points[i]))
            .collect(),
    )
}

fn initial_simplex(points: &[Vec3], eps: f32) -> Option<[usize; 4]> {
    // Widest axis-aligned extreme pair.
    let mut best = (0, 0, -1.0f32);
    for axis in 0..3 {
        let mut min = 0;
        let mut max = 0;
        for (i, p) in points.iter().enumerate() {
            if p[axis] < points[min][axis] {
                min = i;
            }
            if p[axis] > points[max][axis] {
                max = i;
            }
        }
        let spread = points[max][axis] - points[min][axis];
        if spread > best.2 {
            best = (min, max, spread);
        }
    }
    let (a, b, spread) = best;
    if spread <= eps {
        return None;
    }

    let line = (points[b] - points[a]).normalize();
    let (c, line_distance) = farthest(points, |p| {
        let rel = p - points[a];
        (rel - line * rel.dot(line)).length()
    });
    if line_distance <= eps {
        return None;
    }

    let plane = Face::new(points, [a, b, c]);
    let (d, plane_distance) = farthest(points, |p| plane.distance(p).abs());
    if plane_distance <= eps {
        return None;
    }
    Some([a, b, c, d])
}

fn farthest(points: &[Vec3], metric: impl Fn(Vec3) -> f32) -> (usize, f32) {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, metric(*p)))
        .fold((0, f32::MIN), |best, item| if item.1 > best.1 { item } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_points() -> Vec<Vec3> {
        let mut points = Vec::new();
        for x in [-1.0, 1.0] {
            for y in [-1.0, 1.0] {
                for z in [-1.0, 1.0] {
                    points.push(Vec3::new(x, y, z));
                }
            }
        }
        points
    }

    #[test]
    fn hull_of_cube_drops_interior_points() {
        let mut points = cube_points();
        points.push(Vec3::ZERO);
        points.push(Vec3::new(0.5, -0.25, 0.1));
        let hull = convex_hull(&points).unwrap();

        let mut unique: Vec<Vec3> = Vec::new();
        for p in hull.iter().flatten() {
            if !unique.contains(p) {
                unique.push(*p);
            }
        }
        assert_eq!(unique.len(), 8);
        assert_eq!(hull.len(), 12);
    }

    #[test]
    fn hull_faces_point_outward() {
        let hull = convex_hull(&cube_points()).unwrap();
        for [a, b, c] in hull {
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0);
        }
    }

    #[test]
    fn flat_input_has_no_hull() {
        let points = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        assert!(convex_hull(&points).is_none());
        assert!(convex_hull(&points[..3]).is_none());
    }
}

//! Polygon helpers shared by terrain and vehicle construction.
//!
//! Outline tracing walks the boundary of an alpha mask with marching squares,
//! simplification uses Douglas-Peucker, and concave polygons are decomposed
//! into triangles by ear clipping.

use bevy::prelude::*;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Triangles at or below this area (world units squared) are dropped.
pub const DEGENERATE_TRIANGLE_AREA: f32 = 0.001;

pub type Triangle = [Vec2; 3];

pub fn scale_to_world(points: &[Vec2], world_scale: f32) -> Vec<Vec2> {
    points.iter().map(|point| *point / world_scale).collect()
}

/// Shoelace area; positive for counter-clockwise winding.
pub fn signed_area(points: &[Vec2]) -> f32 {
    let count = points.len();
    if count < 3 {
        return 0.0;
    }

    let mut twice_area = 0.0;
    for index in 0..count {
        let a = points[index];
        let b = points[(index + 1) % count];
        twice_area += a.perp_dot(b);
    }
    twice_area * 0.5
}

pub fn triangle_area(triangle: &Triangle) -> f32 {
    ((triangle[1] - triangle[0]).perp_dot(triangle[2] - triangle[0]) * 0.5).abs()
}

/// Area-weighted centroid. Falls back to the vertex mean for zero-area input.
pub fn polygon_centroid(points: &[Vec2]) -> Vec2 {
    if points.is_empty() {
        return Vec2::ZERO;
    }

    let area = signed_area(points);
    if area.abs() <= f32::EPSILON {
        return points.iter().copied().sum::<Vec2>() / points.len() as f32;
    }

    let count = points.len();
    let mut accum = Vec2::ZERO;
    for index in 0..count {
        let a = points[index];
        let b = points[(index + 1) % count];
        accum += (a + b) * a.perp_dot(b);
    }
    accum / (6.0 * area)
}

/// Ear-clipping triangulation of a simple polygon in either winding.
///
/// Output triangles are counter-clockwise and every one of them has an area
/// above [`DEGENERATE_TRIANGLE_AREA`].
pub fn triangulate(points: &[Vec2]) -> Vec<Triangle> {
    let mut polygon = points.to_vec();
    polygon.dedup();
    if polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() < 3 {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..polygon.len()).collect();
    if signed_area(&polygon) < 0.0 {
        indices.reverse();
    }

    let mut triangles = Vec::with_capacity(polygon.len() - 2);
    while indices.len() > 3 {
        match find_ear(&polygon, &indices) {
            Some(ear) => {
                let count = indices.len();
                let prev = indices[(ear + count - 1) % count];
                let next = indices[(ear + 1) % count];
                triangles.push([polygon[prev], polygon[indices[ear]], polygon[next]]);
                indices.remove(ear);
            }
            None => {
                // Only collinear or self-touching vertices remain; drop the flattest one.
                let flattest = flattest_vertex(&polygon, &indices);
                indices.remove(flattest);
            }
        }
    }
    triangles.push([
        polygon[indices[0]],
        polygon[indices[1]],
        polygon[indices[2]],
    ]);

    triangles.retain(|triangle| triangle_area(triangle) > DEGENERATE_TRIANGLE_AREA);
    triangles
}

fn find_ear(polygon: &[Vec2], indices: &[usize]) -> Option<usize> {
    let count = indices.len();
    (0..count).find(|&position| {
        let prev = indices[(position + count - 1) % count];
        let curr = indices[position];
        let next = indices[(position + 1) % count];
        let (a, b, c) = (polygon[prev], polygon[curr], polygon[next]);

        if (b - a).perp_dot(c - b) <= 0.0 {
            return false;
        }

        !indices.iter().any(|&other| {
            if other == prev || other == curr || other == next {
                return false;
            }
            let point = polygon[other];
            point != a && point != b && point != c && point_in_triangle(point, a, b, c)
        })
    })
}

fn flattest_vertex(polygon: &[Vec2], indices: &[usize]) -> usize {
    let count = indices.len();
    let mut best = 0;
    let mut best_turn = f32::INFINITY;
    for position in 0..count {
        let a = polygon[indices[(position + count - 1) % count]];
        let b = polygon[indices[position]];
        let c = polygon[indices[(position + 1) % count]];
        let turn = (b - a).perp_dot(c - b).abs();
        if turn < best_turn {
            best_turn = turn;
            best = position;
        }
    }
    best
}

fn point_in_triangle(point: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    (b - a).perp_dot(point - a) >= 0.0
        && (c - b).perp_dot(point - b) >= 0.0
        && (a - c).perp_dot(point - c) >= 0.0
}

/// Douglas-Peucker simplification of an open polyline. Endpoints are kept.
pub fn douglas_peucker(points: &[Vec2], tolerance: f32) -> Vec<Vec2> {
    let count = points.len();
    if count < 3 {
        return points.to_vec();
    }

    let mut keep = vec![false; count];
    keep[0] = true;
    keep[count - 1] = true;

    let mut stack = vec![(0, count - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }

        let mut max_distance = 0.0;
        let mut split = start;
        for index in (start + 1)..end {
            let distance = perpendicular_distance(points[index], points[start], points[end]);
            if distance > max_distance {
                max_distance = distance;
                split = index;
            }
        }

        if max_distance > tolerance {
            keep[split] = true;
            stack.push((start, split));
            stack.push((split, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(point, kept)| kept.then_some(*point))
        .collect()
}

/// Simplifies a closed outline by splitting it at the vertex farthest from the first one.
pub fn simplify_closed_outline(points: &[Vec2], tolerance: f32) -> Vec<Vec2> {
    if points.len() <= 3 || tolerance <= 0.0 {
        return points.to_vec();
    }

    let origin = points[0];
    let far_index = points
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.distance_squared(origin).total_cmp(&b.distance_squared(origin)))
        .map(|(index, _)| index)
        .unwrap_or(0);
    if far_index == 0 {
        return points.to_vec();
    }

    let mut outbound = douglas_peucker(&points[..=far_index], tolerance);
    let mut inbound_source = points[far_index..].to_vec();
    inbound_source.push(origin);
    let inbound = douglas_peucker(&inbound_source, tolerance);

    outbound.pop();
    outbound.extend(inbound);
    outbound.pop();

    if outbound.len() < 3 {
        return points.to_vec();
    }
    outbound
}

fn perpendicular_distance(point: Vec2, start: Vec2, end: Vec2) -> f32 {
    let segment = end - start;
    let length = segment.length();
    if length <= f32::EPSILON {
        return point.distance(start);
    }
    segment.perp_dot(point - start).abs() / length
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineError {
    NoOpaquePixels,
    Degenerate { vertex_count: usize },
}

impl Display for OutlineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOpaquePixels => write!(f, "sprite has no opaque pixels to trace"),
            Self::Degenerate { vertex_count } => {
                write!(f, "traced outline is degenerate ({vertex_count} vertices)")
            }
        }
    }
}

impl Error for OutlineError {}

/// Row-major opacity grid, row 0 at the top of the image.
#[derive(Debug, Clone)]
pub struct AlphaMask {
    width: u32,
    height: u32,
    solid: Vec<bool>,
}

impl AlphaMask {
    pub fn from_fn(width: u32, height: u32, mut is_solid: impl FnMut(u32, u32) -> bool) -> Self {
        let mut solid = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                solid.push(is_solid(x, y));
            }
        }
        Self {
            width,
            height,
            solid,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn is_solid(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.solid[(y as u64 * self.width as u64 + x as u64) as usize]
    }

    fn first_solid(&self) -> Option<(i64, i64)> {
        let index = self.solid.iter().position(|solid| *solid)?;
        let width = self.width as usize;
        Some(((index % width) as i64, (index / width) as i64))
    }
}

/// Traces the outer boundary of the first opaque blob (row-major scan order).
///
/// Returned vertices are pixel-grid corners with y pointing up (the image's
/// bottom row sits at y = 0). Only corners where the walk turns are emitted.
pub fn trace_outline(mask: &AlphaMask) -> Result<Vec<Vec2>, OutlineError> {
    let (start_x, start_y) = mask.first_solid().ok_or(OutlineError::NoOpaquePixels)?;

    const UP: (i64, i64) = (0, -1);
    const DOWN: (i64, i64) = (0, 1);
    const LEFT: (i64, i64) = (-1, 0);
    const RIGHT: (i64, i64) = (1, 0);

    let max_steps = 4 * (mask.width as usize + 1) * (mask.height as usize + 1);
    let mut corners = Vec::new();
    let (mut x, mut y) = (start_x, start_y);
    let mut previous: Option<(i64, i64)> = None;

    for _ in 0..max_steps {
        let mut state = 0_u8;
        if mask.is_solid(x - 1, y - 1) {
            state |= 1;
        }
        if mask.is_solid(x, y - 1) {
            state |= 2;
        }
        if mask.is_solid(x - 1, y) {
            state |= 4;
        }
        if mask.is_solid(x, y) {
            state |= 8;
        }

        let step = match state {
            1 | 5 | 13 => UP,
            8 | 10 | 11 => DOWN,
            4 | 12 | 14 => LEFT,
            2 | 3 | 7 => RIGHT,
            6 => {
                if previous == Some(UP) {
                    LEFT
                } else {
                    RIGHT
                }
            }
            9 => {
                if previous == Some(RIGHT) {
                    UP
                } else {
                    DOWN
                }
            }
            _ => break,
        };

        if previous != Some(step) {
            corners.push(Vec2::new(x as f32, (mask.height as i64 - y) as f32));
        }
        previous = Some(step);
        x += step.0;
        y += step.1;

        if (x, y) == (start_x, start_y) {
            break;
        }
    }

    if corners.len() < 3 {
        return Err(OutlineError::Degenerate {
            vertex_count: corners.len(),
        });
    }
    Ok(corners)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_area(triangles: &[Triangle]) -> f32 {
        triangles.iter().map(triangle_area).sum()
    }

    fn mask_from_rows(rows: &[&str]) -> AlphaMask {
        let height = rows.len() as u32;
        let width = rows.first().map(|row| row.len()).unwrap_or(0) as u32;
        AlphaMask::from_fn(width, height, |x, y| {
            rows[y as usize].as_bytes()[x as usize] == b'#'
        })
    }

    #[test]
    fn square_triangulates_into_two_triangles() {
        let square = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];

        let triangles = triangulate(&square);
        assert_eq!(triangles.len(), 2);
        assert!((total_area(&triangles) - 4.0).abs() < 1e-4);
    }

    #[test]
    fn concave_polygon_area_is_preserved_in_either_winding() {
        let l_shape = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 3.0),
            Vec2::new(0.0, 3.0),
        ];
        let mut clockwise = l_shape.clone();
        clockwise.reverse();

        for polygon in [l_shape, clockwise] {
            let triangles = triangulate(&polygon);
            assert_eq!(triangles.len(), 4);
            assert!((total_area(&triangles) - 6.0).abs() < 1e-4);
            assert!(triangles
                .iter()
                .all(|triangle| triangle_area(triangle) > DEGENERATE_TRIANGLE_AREA));
        }
    }

    #[test]
    fn hill_profile_keeps_its_area() {
        let hill = [
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 1.5),
            Vec2::new(8.0, 2.5),
            Vec2::new(6.5, 1.0),
            Vec2::new(5.0, 3.5),
            Vec2::new(3.0, 2.0),
            Vec2::new(1.0, 2.2),
            Vec2::new(0.0, 1.0),
        ];

        let triangles = triangulate(&hill);
        assert!((total_area(&triangles) - signed_area(&hill).abs()).abs() < 1e-3);
    }

    #[test]
    fn collinear_edge_vertices_do_not_produce_slivers() {
        let polygon = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];

        let triangles = triangulate(&polygon);
        assert!((total_area(&triangles) - 4.0).abs() < 1e-4);
        assert!(triangles
            .iter()
            .all(|triangle| triangle_area(triangle) > DEGENERATE_TRIANGLE_AREA));
    }

    #[test]
    fn tiny_polygons_are_discarded() {
        let sliver = [
            Vec2::new(0.0, 0.0),
            Vec2::new(0.01, 0.0),
            Vec2::new(0.0, 0.01),
        ];

        assert!(triangulate(&sliver).is_empty());
    }

    #[test]
    fn centroid_of_rectangle_is_its_center() {
        let rectangle = [
            Vec2::new(2.0, 1.0),
            Vec2::new(6.0, 1.0),
            Vec2::new(6.0, 3.0),
            Vec2::new(2.0, 3.0),
        ];

        assert!(polygon_centroid(&rectangle).distance(Vec2::new(4.0, 2.0)) < 1e-5);
    }

    #[test]
    fn douglas_peucker_removes_points_within_tolerance() {
        let mut outline = Vec::new();
        for step in 0..10 {
            outline.push(Vec2::new(step as f32, 0.0));
        }
        for step in 0..10 {
            outline.push(Vec2::new(10.0, step as f32 + if step % 2 == 0 { 0.1 } else { 0.0 }));
        }
        outline.push(Vec2::new(10.0, 10.0));
        outline.push(Vec2::new(0.0, 10.0));

        let simplified = simplify_closed_outline(&outline, 0.5);
        assert_eq!(simplified.len(), 4);
        assert!((signed_area(&simplified).abs() - 100.0).abs() < 1.0);
    }

    #[test]
    fn trace_outline_follows_rectangle_corners() {
        let mask = mask_from_rows(&["####", "####", "####"]);

        let outline = trace_outline(&mask).expect("rectangle should trace");
        assert_eq!(outline.len(), 4);
        assert!((signed_area(&outline).abs() - 12.0).abs() < 1e-4);
        assert!(outline.contains(&Vec2::new(0.0, 0.0)));
        assert!(outline.contains(&Vec2::new(4.0, 3.0)));
    }

    #[test]
    fn trace_outline_handles_concave_blob() {
        let mask = mask_from_rows(&["##..", "##..", "####"]);

        let outline = trace_outline(&mask).expect("blob should trace");
        assert_eq!(outline.len(), 6);
        assert!((signed_area(&outline).abs() - 8.0).abs() < 1e-4);
    }

    #[test]
    fn trace_outline_rejects_transparent_mask() {
        let mask = mask_from_rows(&["....", "...."]);

        assert_eq!(trace_outline(&mask), Err(OutlineError::NoOpaquePixels));
    }
}

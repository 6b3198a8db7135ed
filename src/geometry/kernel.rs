//! Planar clipping primitives for convex polygons.
//!
//! Everything here works on flat 2-D coordinate arrays and knows nothing
//! about meshes. Both inputs of a clip are convex and counter-clockwise, so
//! the intersection point cloud is itself the vertex set of a convex polygon:
//! an angular sort around the centroid plus a tolerance merge is enough to
//! order it, no general hull algorithm is needed.

use crate::mesh_error::MeshIntxError;
use arrayvec::ArrayVec;

/// Maximum number of sides of any input cell.
pub const MAX_EDGES: usize = 10;

/// Capacity of a raw intersection point cloud: every edge pair plus every
/// vertex of both polygons.
pub const MAX_INTX_POINTS: usize = MAX_EDGES * MAX_EDGES + 2 * MAX_EDGES;

pub type Point2 = [f64; 2];

/// Vertices of one cell in plane coordinates.
pub type PolyBuf = ArrayVec<Point2, MAX_EDGES>;

/// Raw or ordered intersection points of one cell pair.
pub type PointCloud = ArrayVec<Point2, MAX_INTX_POINTS>;

/// Per-edge hit flags; edge `i` runs from vertex `i` to vertex `i + 1`.
pub type EdgeMarks = [bool; MAX_EDGES];

/// Absolute positional tolerance and the derived area tolerance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Tolerance {
    pub epsilon: f64,
    pub epsilon_area: f64,
}

impl Tolerance {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            epsilon_area: 0.5 * epsilon * epsilon,
        }
    }
}

/// Signed area of triangle `abc`; positive for counter-clockwise.
#[inline]
pub fn signed_area(a: Point2, b: Point2, c: Point2) -> f64 {
    0.5 * ((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]))
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(poly: &[Point2]) -> f64 {
    let n = poly.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let p = poly[i];
            let q = poly[(i + 1) % n];
            p[0] * q[1] - q[0] * p[1]
        })
        .sum();
    0.5 * twice
}

/// Area centroid of a polygon; falls back to the vertex mean when the
/// polygon has no area.
pub fn polygon_centroid(poly: &[Point2]) -> Point2 {
    let n = poly.len();
    if n == 0 {
        return [0.0, 0.0];
    }
    let p0 = poly[0];
    let mut area = 0.0;
    let mut acc = [0.0, 0.0];
    for k in 1..n.saturating_sub(1) {
        let a = signed_area(p0, poly[k], poly[k + 1]);
        area += a;
        acc[0] += a * (p0[0] + poly[k][0] + poly[k + 1][0]) / 3.0;
        acc[1] += a * (p0[1] + poly[k][1] + poly[k + 1][1]) / 3.0;
    }
    if area.abs() > 0.0 {
        [acc[0] / area, acc[1] / area]
    } else {
        let inv = 1.0 / n as f64;
        let sx: f64 = poly.iter().map(|p| p[0]).sum();
        let sy: f64 = poly.iter().map(|p| p[1]).sum();
        [sx * inv, sy * inv]
    }
}

#[inline]
fn cross2(a: Point2, b: Point2) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

#[inline]
fn dist2(a: Point2, b: Point2) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

fn push_point(out: &mut PointCloud, p: Point2) -> Result<(), MeshIntxError> {
    out.try_push(p)
        .map_err(|_| MeshIntxError::PointBufferOverflow(MAX_INTX_POINTS))
}

/// Appends one point per intersecting edge pair of `a` and `b` to `out`.
///
/// Parallel and degenerate edge pairs produce nothing; collinear overlaps
/// are recovered by [`interior_vertices_of`]. Edges that produced a point
/// are flagged in `mark_a` / `mark_b`. Returns the number of points added.
pub fn segment_intersections(
    a: &[Point2],
    b: &[Point2],
    out: &mut PointCloud,
    mark_a: &mut [bool],
    mark_b: &mut [bool],
) -> Result<usize, MeshIntxError> {
    let (na, nb) = (a.len(), b.len());
    let before = out.len();
    for i in 0..na {
        let a0 = a[i];
        let d1 = [a[(i + 1) % na][0] - a0[0], a[(i + 1) % na][1] - a0[1]];
        for j in 0..nb {
            let b0 = b[j];
            let d2 = [b[(j + 1) % nb][0] - b0[0], b[(j + 1) % nb][1] - b0[1]];
            let det = cross2(d1, d2);
            let scale = (dist2(d1, [0.0, 0.0]) * dist2(d2, [0.0, 0.0])).sqrt();
            if !(det.abs() > 1e-14 * scale) {
                continue;
            }
            let w = [b0[0] - a0[0], b0[1] - a0[1]];
            let t = cross2(w, d2) / det;
            let u = cross2(w, d1) / det;
            if !(0.0..=1.0).contains(&t) || !(0.0..=1.0).contains(&u) {
                continue;
            }
            push_point(out, [a0[0] + t * d1[0], a0[1] + t * d1[1]])?;
            mark_a[i] = true;
            mark_b[j] = true;
        }
    }
    Ok(out.len() - before)
}

/// Boundary-inclusive containment in a counter-clockwise convex polygon.
pub fn point_in_convex_polygon(poly: &[Point2], pt: Point2, epsilon_area: f64) -> bool {
    let n = poly.len();
    (0..n).all(|j| signed_area(poly[j], poly[(j + 1) % n], pt) >= -epsilon_area)
}

/// Appends every vertex of `src` lying inside convex `dst` to `out` and sets
/// `side[k]` for each such vertex `k`. Returns the number of points added.
pub fn interior_vertices_of(
    src: &[Point2],
    dst: &[Point2],
    epsilon_area: f64,
    out: &mut PointCloud,
    side: &mut [bool],
) -> Result<usize, MeshIntxError> {
    let mut added = 0;
    for (k, p) in src.iter().enumerate() {
        side[k] = point_in_convex_polygon(dst, *p, epsilon_area);
        if side[k] {
            push_point(out, *p)?;
            added += 1;
        }
    }
    Ok(added)
}

/// Orders `points` counter-clockwise around their centroid and merges
/// neighbours closer than `epsilon`, including the last/first pair.
pub fn dedup_and_order(points: &mut PointCloud, epsilon: f64) {
    if points.len() < 2 {
        return;
    }
    let inv = 1.0 / points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() * inv;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() * inv;
    points.sort_by(|p, q| {
        let ap = (p[1] - cy).atan2(p[0] - cx);
        let aq = (q[1] - cy).atan2(q[0] - cx);
        ap.total_cmp(&aq)
    });

    let eps2 = epsilon * epsilon;
    let mut kept = PointCloud::new();
    for p in points.iter() {
        match kept.last() {
            Some(last) if dist2(*last, *p) <= eps2 => {}
            _ => kept.push(*p),
        }
    }
    while kept.len() > 1 && dist2(kept[0], kept[kept.len() - 1]) <= eps2 {
        kept.pop();
    }
    *points = kept;
}

/// Result of clipping one blue polygon against one red polygon.
#[derive(Clone, Debug)]
pub struct ConvexClip {
    /// Ordered, deduplicated vertices of the intersection polygon.
    pub points: PointCloud,
    /// Planar area of the intersection polygon.
    pub area: f64,
    /// Blue edges that touch the intersection.
    pub mark_blue: EdgeMarks,
    /// Red edges that touch the intersection.
    pub mark_red: EdgeMarks,
}

impl ConvexClip {
    #[inline]
    pub fn has_area(&self, tol: &Tolerance) -> bool {
        self.points.len() >= 3 && self.area > tol.epsilon_area
    }
}

/// Intersects two convex counter-clockwise polygons.
///
/// A blue vertex inside red flags both blue edges meeting there, and the
/// same for red vertices inside blue, so the advancing front can walk to
/// the neighbours across those edges even when no edge crossing occurs.
pub fn clip_convex(
    blue: &[Point2],
    red: &[Point2],
    tol: &Tolerance,
) -> Result<ConvexClip, MeshIntxError> {
    let (nb, nr) = (blue.len(), red.len());
    let mut points = PointCloud::new();
    let mut mark_blue = [false; MAX_EDGES];
    let mut mark_red = [false; MAX_EDGES];
    segment_intersections(blue, red, &mut points, &mut mark_blue, &mut mark_red)?;

    let mut side = [false; MAX_EDGES];
    if interior_vertices_of(blue, red, tol.epsilon_area, &mut points, &mut side)? > 0 {
        for k in (0..nb).filter(|&k| side[k]) {
            mark_blue[k] = true;
            mark_blue[(k + nb - 1) % nb] = true;
        }
    }
    let mut side = [false; MAX_EDGES];
    if interior_vertices_of(red, blue, tol.epsilon_area, &mut points, &mut side)? > 0 {
        for k in (0..nr).filter(|&k| side[k]) {
            mark_red[k] = true;
            mark_red[(k + nr - 1) % nr] = true;
        }
    }

    dedup_and_order(&mut points, tol.epsilon);
    let area = if points.len() >= 3 {
        polygon_area(&points)
    } else {
        0.0
    };
    Ok(ConvexClip {
        points,
        area,
        mark_blue,
        mark_red,
    })
}

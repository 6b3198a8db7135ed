//! Vector helpers and spherical-polygon measures.
//!
//! Areas of polygons on the sphere are accumulated over a triangle fan, each
//! triangle measured with l'Huilier's theorem from its three arc lengths.
//! That formula stays accurate for thin slivers where Girard's angle-excess
//! form loses every significant digit.

use std::f64::consts::PI;

pub type Vec3 = [f64; 3];

#[inline]
pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

#[inline]
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
pub fn distance(a: Vec3, b: Vec3) -> f64 {
    norm(sub(a, b))
}

/// Rescales `p` onto the sphere of radius `radius`. The zero vector is
/// returned unchanged.
#[inline]
pub fn to_radius(p: Vec3, radius: f64) -> Vec3 {
    let n = norm(p);
    if n == 0.0 { p } else { scale(p, radius / n) }
}

/// Arithmetic mean of a point set (not renormalised).
pub fn centroid(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return [0.0; 3];
    }
    let sum = points.iter().fold([0.0; 3], |acc, p| add(acc, *p));
    scale(sum, 1.0 / points.len() as f64)
}

/// Longitude in `[0, 2π)` and latitude in `[-π/2, π/2]` of a point.
pub fn cartesian_to_lonlat(p: Vec3) -> (f64, f64) {
    let r = norm(p);
    if r == 0.0 {
        return (0.0, 0.0);
    }
    let lat = (p[2] / r).clamp(-1.0, 1.0).asin();
    let mut lon = p[1].atan2(p[0]);
    if lon < 0.0 {
        lon += 2.0 * PI;
    }
    (lon, lat)
}

pub fn lonlat_to_cartesian(lon: f64, lat: f64, radius: f64) -> Vec3 {
    [
        radius * lat.cos() * lon.cos(),
        radius * lat.cos() * lon.sin(),
        radius * lat.sin(),
    ]
}

/// Central angle between two points, robust for nearly coincident and
/// nearly antipodal pairs.
#[inline]
pub fn great_circle_angle(a: Vec3, b: Vec3) -> f64 {
    norm(cross(a, b)).atan2(dot(a, b))
}

/// Signed area of the geodesic triangle `abc` by l'Huilier's theorem.
///
/// Positive when `a, b, c` run counter-clockwise seen from outside.
pub fn spherical_triangle_area(a: Vec3, b: Vec3, c: Vec3, radius: f64) -> f64 {
    let side_a = great_circle_angle(b, c);
    let side_b = great_circle_angle(c, a);
    let side_c = great_circle_angle(a, b);
    let s = 0.5 * (side_a + side_b + side_c);
    let t = (0.5 * s).tan()
        * (0.5 * (s - side_a)).tan()
        * (0.5 * (s - side_b)).tan()
        * (0.5 * (s - side_c)).tan();
    let excess = 4.0 * t.max(0.0).sqrt().atan();
    let area = excess * radius * radius;
    if dot(a, cross(b, c)) < 0.0 { -area } else { area }
}

/// Signed area of a geodesic polygon, fan-triangulated from its first vertex.
pub fn spherical_polygon_area(points: &[Vec3], radius: f64) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let p0 = points[0];
    points
        .windows(2)
        .skip(1)
        .map(|w| spherical_triangle_area(p0, w[0], w[1], radius))
        .sum()
}

//! Gnomonic (central) projection onto the six faces of the circumscribed cube.
//!
//! Each face carries a right-handed frame `(u, v, n)` with `n` the outward
//! face normal, so a polygon that runs counter-clockwise seen from outside
//! the sphere also runs counter-clockwise in plane coordinates. Great-circle
//! arcs map to straight segments, which is what lets the planar clipping
//! kernel intersect spherical cells exactly.

use crate::geometry::spherical::{Vec3, add, dot, norm, scale, to_radius};
use serde::{Deserialize, Serialize};

/// One of the six cube-face planes, numbered 1..=6 as
/// `+X, +Y, -X, -Y, -Z, +Z`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GnomonicPlane {
    PosX = 1,
    PosY = 2,
    NegX = 3,
    NegY = 4,
    NegZ = 5,
    PosZ = 6,
}

impl GnomonicPlane {
    pub const ALL: [GnomonicPlane; 6] = [
        GnomonicPlane::PosX,
        GnomonicPlane::PosY,
        GnomonicPlane::NegX,
        GnomonicPlane::NegY,
        GnomonicPlane::NegZ,
        GnomonicPlane::PosZ,
    ];

    #[inline]
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get((n as usize).wrapping_sub(1)).copied()
    }

    /// `(u, v, n)`: in-plane axes and outward normal, with `u × v = n`.
    pub fn frame(self) -> (Vec3, Vec3, Vec3) {
        match self {
            GnomonicPlane::PosX => ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            GnomonicPlane::PosY => ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            GnomonicPlane::NegX => ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [-1.0, 0.0, 0.0]),
            GnomonicPlane::NegY => ([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, -1.0, 0.0]),
            GnomonicPlane::NegZ => ([0.0, -1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            GnomonicPlane::PosZ => ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        }
    }

    #[inline]
    pub fn normal(self) -> Vec3 {
        self.frame().2
    }
}

/// Picks the face whose normal is best aligned with `centroid`.
///
/// Call once per cell (never per vertex) so every vertex of the cell, and of
/// the cell it is clipped against, lands on the same plane.
pub fn choose_plane(centroid: Vec3) -> GnomonicPlane {
    let [x, y, z] = centroid;
    if x.abs() < y.abs() {
        if y.abs() < z.abs() {
            if z < 0.0 { GnomonicPlane::NegZ } else { GnomonicPlane::PosZ }
        } else if y < 0.0 {
            GnomonicPlane::NegY
        } else {
            GnomonicPlane::PosY
        }
    } else if x.abs() < z.abs() {
        if z < 0.0 { GnomonicPlane::NegZ } else { GnomonicPlane::PosZ }
    } else if x < 0.0 {
        GnomonicPlane::NegX
    } else {
        GnomonicPlane::PosX
    }
}

/// Projects `p` onto the plane tangent to the sphere of radius `radius`.
///
/// Returns `None` when `p` is on or behind the plane's hemisphere boundary
/// (its component along the normal is not positive).
pub fn project(p: Vec3, radius: f64, plane: GnomonicPlane) -> Option<[f64; 2]> {
    let (u, v, n) = plane.frame();
    let d = dot(p, n);
    if !(d > f64::EPSILON * norm(p)) {
        return None;
    }
    Some([radius * dot(p, u) / d, radius * dot(p, v) / d])
}

/// Inverse of [`project`]; the result lies on the sphere of radius `radius`.
pub fn unproject(q: [f64; 2], radius: f64, plane: GnomonicPlane) -> Vec3 {
    let (u, v, n) = plane.frame();
    let on_plane = add(add(scale(n, radius), scale(u, q[0])), scale(v, q[1]));
    to_radius(on_plane, radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::spherical::{cross, distance, lonlat_to_cartesian};
    use proptest::prelude::*;

    #[test]
    fn frames_are_right_handed() {
        for plane in GnomonicPlane::ALL {
            let (u, v, n) = plane.frame();
            assert_eq!(cross(u, v), n, "{plane:?}");
            assert_eq!(GnomonicPlane::from_number(plane.number()), Some(plane));
        }
        assert_eq!(GnomonicPlane::from_number(0), None);
        assert_eq!(GnomonicPlane::from_number(7), None);
    }

    #[test]
    fn axis_points_choose_their_face() {
        for plane in GnomonicPlane::ALL {
            assert_eq!(choose_plane(plane.normal()), plane);
            let q = project(plane.normal(), 1.0, plane).unwrap();
            assert_eq!(q, [0.0, 0.0]);
        }
        assert_eq!(choose_plane([0.2, -0.9, 0.3]), GnomonicPlane::NegY);
        assert_eq!(choose_plane([0.5, 0.1, -0.6]), GnomonicPlane::NegZ);
    }

    #[test]
    fn points_behind_the_plane_fail() {
        assert!(project([-1.0, 0.0, 0.0], 1.0, GnomonicPlane::PosX).is_none());
        assert!(project([0.0, 1.0, 0.0], 1.0, GnomonicPlane::PosX).is_none());
    }

    #[test]
    fn orientation_is_preserved() {
        // counter-clockwise around +Z seen from outside
        let tri = [
            lonlat_to_cartesian(0.0, 1.2, 1.0),
            lonlat_to_cartesian(2.0, 1.2, 1.0),
            lonlat_to_cartesian(4.0, 1.2, 1.0),
        ];
        let plane = choose_plane(tri[0]);
        assert_eq!(plane, GnomonicPlane::PosZ);
        let q: Vec<_> = tri.iter().map(|p| project(*p, 1.0, plane).unwrap()).collect();
        let area = (q[1][0] - q[0][0]) * (q[2][1] - q[0][1])
            - (q[1][1] - q[0][1]) * (q[2][0] - q[0][0]);
        assert!(area > 0.0);
    }

    proptest! {
        #[test]
        fn project_unproject_roundtrip(
            lon in 0.0f64..std::f64::consts::TAU,
            lat in -1.5f64..1.5,
            radius in 0.5f64..10.0,
        ) {
            let p = lonlat_to_cartesian(lon, lat, radius);
            for plane in GnomonicPlane::ALL {
                // stay well inside the hemisphere of the face
                if dot(p, plane.normal()) < 0.2 * radius {
                    continue;
                }
                let q = project(p, radius, plane).unwrap();
                let back = unproject(q, radius, plane);
                prop_assert!(distance(back, p) <= 1e-12 * radius);
            }
        }
    }
}

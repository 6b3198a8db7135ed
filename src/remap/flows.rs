//! Prescribed velocity fields and initial tracer distributions for
//! transport on the sphere.
//!
//! The deformational flows and tracers are the standard test cases of
//! Nair & Lauritzen (2010) and Lauritzen et al. (2012). Velocities are
//! expressed on the unit sphere; departure points are traced backward in
//! Cartesian form and scaled to the mesh radius.

use crate::geometry::spherical::{
    Vec3, add, cartesian_to_lonlat, cross, dot, great_circle_angle, lonlat_to_cartesian, norm,
    scale, to_radius,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Period of the deformational test cases.
pub const DEFAULT_PERIOD: f64 = 5.0;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum VelocityField {
    /// Rigid rotation about `axis` at `angular_speed` radians per unit time.
    SolidBody { axis: Vec3, angular_speed: f64 },
    /// Nair–Lauritzen case 1 (two vortices, reversing at `period / 2`).
    CaseOne { period: f64 },
    /// Nair–Lauritzen case 2 (deformation, reversing).
    CaseTwo { period: f64 },
    /// Nair–Lauritzen case 4 (deformation plus background rotation).
    CaseFour { period: f64 },
}

impl VelocityField {
    /// One full revolution about the polar axis per `period`.
    pub fn solid_body(period: f64) -> Self {
        VelocityField::SolidBody {
            axis: [0.0, 0.0, 1.0],
            angular_speed: TAU / period,
        }
    }

    /// Velocity at `p` (on the unit sphere) and time `t`.
    pub fn velocity(&self, p: Vec3, t: f64) -> Vec3 {
        match *self {
            VelocityField::SolidBody { axis, angular_speed } => {
                scale(cross(axis, p), angular_speed / norm(axis))
            }
            VelocityField::CaseOne { period } => {
                let (lon, lat) = cartesian_to_lonlat(p);
                let k = 2.4;
                let ct = (PI * t / period).cos();
                let u = k * (lon / 2.0).sin().powi(2) * (2.0 * lat).sin() * ct;
                let v = k / 2.0 * lon.sin() * lat.cos() * ct;
                tangent(lon, lat, u, v)
            }
            VelocityField::CaseTwo { period } => {
                let (lon, lat) = cartesian_to_lonlat(p);
                let k = 2.0;
                let ct = (PI * t / period).cos();
                let u = k * lon.sin().powi(2) * (2.0 * lat).sin() * ct;
                let v = k * (2.0 * lon).sin() * lat.cos() * ct;
                tangent(lon, lat, u, v)
            }
            VelocityField::CaseFour { period } => {
                let (lon, lat) = cartesian_to_lonlat(p);
                let k = 2.0;
                let ct = (PI * t / period).cos();
                let shifted = lon - TAU * t / period;
                let u = k * shifted.sin().powi(2) * (2.0 * lat).sin() * ct + TAU * lat.cos() / period;
                let v = k * (2.0 * shifted).sin() * lat.cos() * ct;
                tangent(lon, lat, u, v)
            }
        }
    }

    /// Position at `t_arrival - dt` of the particle found at `arrival` at
    /// `t_arrival`, on the sphere of `radius`.
    pub fn departure_point(&self, arrival: Vec3, t_arrival: f64, dt: f64, radius: f64) -> Vec3 {
        let p = to_radius(arrival, 1.0);
        let back = match *self {
            VelocityField::SolidBody { axis, angular_speed } => {
                rotate(p, to_radius(axis, 1.0), -angular_speed * dt)
            }
            _ => {
                // classical RK4 with a negative step, renormalised per stage
                let h = -dt;
                let f = |x: Vec3, t: f64| self.velocity(to_radius(x, 1.0), t);
                let k1 = f(p, t_arrival);
                let k2 = f(add(p, scale(k1, 0.5 * h)), t_arrival + 0.5 * h);
                let k3 = f(add(p, scale(k2, 0.5 * h)), t_arrival + 0.5 * h);
                let k4 = f(add(p, scale(k3, h)), t_arrival + h);
                let incr = add(add(k1, scale(k2, 2.0)), add(scale(k3, 2.0), k4));
                add(p, scale(incr, h / 6.0))
            }
        };
        to_radius(back, radius)
    }
}

/// `u ê_λ + v ê_θ` in Cartesian components.
fn tangent(lon: f64, lat: f64, u: f64, v: f64) -> Vec3 {
    let (sl, cl) = lon.sin_cos();
    let (st, ct) = lat.sin_cos();
    let e_lon = [-sl, cl, 0.0];
    let e_lat = [-st * cl, -st * sl, ct];
    add(scale(e_lon, u), scale(e_lat, v))
}

/// Rodrigues rotation of `p` by `angle` about unit `axis`.
fn rotate(p: Vec3, axis: Vec3, angle: f64) -> Vec3 {
    let (s, c) = angle.sin_cos();
    add(
        add(scale(p, c), scale(cross(axis, p), s)),
        scale(axis, dot(axis, p) * (1.0 - c)),
    )
}

/// Initial tracer distributions.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TracerField {
    Constant(f64),
    GaussianHills,
    CosineBells,
    SlottedCylinders,
}

const HILL_CENTERS: [(f64, f64); 2] = [(5.0 * PI / 6.0, 0.0), (7.0 * PI / 6.0, 0.0)];

impl TracerField {
    /// Value at `p`, any radius.
    pub fn value(&self, p: Vec3) -> f64 {
        let p = to_radius(p, 1.0);
        match *self {
            TracerField::Constant(c) => c,
            TracerField::GaussianHills => {
                let (h_max, b) = (0.95, 5.0);
                HILL_CENTERS
                    .iter()
                    .map(|&(lon, lat)| {
                        let c = lonlat_to_cartesian(lon, lat, 1.0);
                        let d = add(p, scale(c, -1.0));
                        h_max * (-b * dot(d, d)).exp()
                    })
                    .sum()
            }
            TracerField::CosineBells => {
                let (r, h_max, b, c) = (0.5, 1.0, 0.1, 0.9);
                let bump: f64 = HILL_CENTERS
                    .iter()
                    .map(|&(lon, lat)| {
                        let ri = great_circle_angle(p, lonlat_to_cartesian(lon, lat, 1.0));
                        if ri < r { 0.5 * h_max * (1.0 + (PI * ri / r).cos()) } else { 0.0 }
                    })
                    .sum();
                b + c * bump
            }
            TracerField::SlottedCylinders => {
                let (r, b, c) = (0.5, 0.1, 1.0);
                let (lon, lat) = cartesian_to_lonlat(p);
                for (i, &(li, ti)) in HILL_CENTERS.iter().enumerate() {
                    let ri = great_circle_angle(p, lonlat_to_cartesian(li, ti, 1.0));
                    if ri > r {
                        continue;
                    }
                    let outside_slot = (lon - li).abs() >= r / 6.0;
                    let below = i == 0 && lat - ti < -5.0 * r / 12.0;
                    let above = i == 1 && lat - ti > 5.0 * r / 12.0;
                    if outside_slot || below || above {
                        return c;
                    }
                }
                b
            }
        }
    }
}

//! Geometry utilities for mesh-intx.
//!
//! Pure functions with no mesh access: the convex clipping kernel, the
//! gnomonic cube-face projection, spherical measures and bounding boxes.

pub mod bbox;
pub mod gnomonic;
pub mod kernel;
pub mod spherical;

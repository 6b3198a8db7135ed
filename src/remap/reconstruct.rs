//! Limited linear reconstruction of cell averages.
//!
//! The gradient of a cell is fitted by least squares to the averages of its
//! edge neighbours, in the cell's own clipping plane, then scaled down with
//! the Barth–Jespersen limiter so no vertex value leaves the range spanned
//! by the cell and its neighbours.

use crate::geometry::kernel::{self, Point2, PolyBuf};
use crate::geometry::spherical::Vec3;
use crate::intx::adapter::{CellAdapter, Projection};
use crate::mesh_error::MeshIntxError;
use crate::topology::point::PointId;
use crate::topology::store::{MeshSet, MeshStore, MeshStoreExt};

/// `value + gradient · (x - center)` in one clipping plane.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinearReconstruction {
    projection: Projection,
    center: Point2,
    value: f64,
    gradient: [f64; 2],
}

impl LinearReconstruction {
    /// Reconstruction with zero gradient.
    pub fn constant(value: f64) -> Self {
        Self {
            projection: Projection::Identity,
            center: [0.0, 0.0],
            value,
            gradient: [0.0, 0.0],
        }
    }

    /// Fits and limits the gradient of `cell`, reading averages from
    /// `tag` on the cell and its neighbours in `set`.
    pub fn build<S: MeshStore + ?Sized>(
        store: &S,
        adapter: &CellAdapter,
        set: MeshSet,
        cell: PointId,
        tag: &str,
    ) -> Result<Self, MeshIntxError> {
        let setup = adapter.setup(store, cell)?;
        let value = store.real_tag(tag, cell)?;
        let center = kernel::polygon_centroid(&setup.plane_coords);

        let mut samples: Vec<(Point2, f64)> = Vec::new();
        for nb in adapter
            .ordered_neighbors(store, set, cell)?
            .into_iter()
            .flatten()
        {
            let nv = store.real_tag(tag, nb)?;
            let Some(nc) = adapter.try_project(setup.projection, adapter.cell_center(store, nb)?)
            else {
                continue;
            };
            samples.push(([nc[0] - center[0], nc[1] - center[1]], nv - value));
        }

        let gradient = least_squares_gradient(&samples);
        let (lo, hi) = samples
            .iter()
            .fold((value, value), |(lo, hi), (_, du)| {
                (lo.min(value + du), hi.max(value + du))
            });
        let phi = barth_jespersen(&setup.plane_coords, center, value, gradient, lo, hi);
        Ok(Self {
            projection: setup.projection,
            center,
            value,
            gradient: [phi * gradient[0], phi * gradient[1]],
        })
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn gradient(&self) -> [f64; 2] {
        self.gradient
    }

    pub fn evaluate(&self, adapter: &CellAdapter, p: Vec3) -> f64 {
        match adapter.try_project(self.projection, p) {
            Some(q) => self.at(q),
            None => self.value,
        }
    }

    /// Mean of the reconstruction over a polygon: its value at the
    /// polygon's planar centroid.
    pub fn average_over(&self, adapter: &CellAdapter, coords: &[Vec3]) -> f64 {
        if self.gradient == [0.0, 0.0] {
            return self.value;
        }
        let mut plane = Vec::with_capacity(coords.len());
        for p in coords {
            match adapter.try_project(self.projection, *p) {
                Some(q) => plane.push(q),
                None => return self.value,
            }
        }
        self.at(kernel::polygon_centroid(&plane))
    }

    #[inline]
    fn at(&self, q: Point2) -> f64 {
        self.value
            + self.gradient[0] * (q[0] - self.center[0])
            + self.gradient[1] * (q[1] - self.center[1])
    }
}

fn least_squares_gradient(samples: &[(Point2, f64)]) -> [f64; 2] {
    let (mut a11, mut a12, mut a22, mut b1, mut b2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (d, du) in samples {
        a11 += d[0] * d[0];
        a12 += d[0] * d[1];
        a22 += d[1] * d[1];
        b1 += d[0] * du;
        b2 += d[1] * du;
    }
    let det = a11 * a22 - a12 * a12;
    if !(det.abs() > 1e-12 * (a11 * a22).max(f64::MIN_POSITIVE)) {
        return [0.0, 0.0];
    }
    [(a22 * b1 - a12 * b2) / det, (a11 * b2 - a12 * b1) / det]
}

/// Largest `φ ≤ 1` keeping `value + φ g·(v - center)` within `[lo, hi]` at
/// every vertex `v`.
fn barth_jespersen(
    vertices: &PolyBuf,
    center: Point2,
    value: f64,
    g: [f64; 2],
    lo: f64,
    hi: f64,
) -> f64 {
    vertices.iter().fold(1.0f64, |phi, v| {
        let delta = g[0] * (v[0] - center[0]) + g[1] * (v[1] - center[1]);
        let limit = if delta > 0.0 {
            ((hi - value) / delta).min(1.0)
        } else if delta < 0.0 {
            ((lo - value) / delta).min(1.0)
        } else {
            1.0
        };
        phi.min(limit.max(0.0))
    })
}

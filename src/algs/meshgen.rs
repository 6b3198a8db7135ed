//! Mesh generators: equiangular cubed spheres, structured planar grids and
//! departure meshes traced back from an arrival mesh.

use crate::geometry::gnomonic::{self, GnomonicPlane};
use crate::geometry::spherical::Vec3;
use crate::mesh_error::MeshIntxError;
use crate::topology::point::PointId;
use crate::topology::store::{
    CORRESPONDING_CELL_TAG, EntityDim, GLOBAL_ID_TAG, MeshSet, MeshStore, TagValue,
};
use std::collections::HashMap;
use std::f64::consts::FRAC_PI_4;

/// Cell-type choices for structured planar grids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuredCellType {
    Triangle,
    Quadrilateral,
}

fn invalid(message: impl Into<String>) -> MeshIntxError {
    MeshIntxError::InvalidConfig(message.into())
}

/// Equiangular cubed sphere with `n × n` quadrilaterals per face.
///
/// Vertices shared by neighbouring faces are merged, every cell runs
/// counter-clockwise seen from outside, and vertices and cells carry
/// 1-based `GLOBAL_ID` tags in creation order.
pub fn cubed_sphere<S: MeshStore + ?Sized>(
    store: &mut S,
    n: usize,
    radius: f64,
) -> Result<MeshSet, MeshIntxError> {
    if n == 0 {
        return Err(invalid("cubed sphere needs at least one cell per face edge"));
    }
    if !(radius.is_finite() && radius > 0.0) {
        return Err(invalid(format!("radius must be positive, got {radius}")));
    }
    let set = store.create_set();
    let step = 2.0 * FRAC_PI_4 / n as f64;
    let quantum = 1e-9 * radius;
    let mut merged: HashMap<[i64; 3], PointId> = HashMap::new();
    let mut next_vertex_gid = 1i64;
    let mut next_cell_gid = 1i64;

    for plane in GnomonicPlane::ALL {
        let mut grid = Vec::with_capacity((n + 1) * (n + 1));
        for j in 0..=n {
            let beta = -FRAC_PI_4 + j as f64 * step;
            for i in 0..=n {
                let alpha = -FRAC_PI_4 + i as f64 * step;
                let q = [radius * alpha.tan(), radius * beta.tan()];
                let p = gnomonic::unproject(q, radius, plane);
                let key = p.map(|c| (c / quantum).round() as i64);
                let v = match merged.get(&key) {
                    Some(v) => *v,
                    None => {
                        let v = store.create_vertex(p);
                        store.set_tag(GLOBAL_ID_TAG, v, TagValue::Int(next_vertex_gid))?;
                        next_vertex_gid += 1;
                        merged.insert(key, v);
                        v
                    }
                };
                grid.push(v);
            }
        }
        for j in 0..n {
            for i in 0..n {
                let k = j * (n + 1) + i;
                let cell =
                    store.create_polygon(&[grid[k], grid[k + 1], grid[k + n + 2], grid[k + n + 1]])?;
                store.set_tag(GLOBAL_ID_TAG, cell, TagValue::Int(next_cell_gid))?;
                next_cell_gid += 1;
                store.add_to_set(set, cell)?;
            }
        }
    }
    Ok(set)
}

/// Structured grid of `nx × ny` cells over `[x0, x1] × [y0, y1]` at `z = 0`.
///
/// Triangles split each quadrilateral along its lower-left to upper-right
/// diagonal.
pub fn planar_grid<S: MeshStore + ?Sized>(
    store: &mut S,
    nx: usize,
    ny: usize,
    min: [f64; 2],
    max: [f64; 2],
    cell_type: StructuredCellType,
) -> Result<MeshSet, MeshIntxError> {
    if nx == 0 || ny == 0 {
        return Err(invalid("nx and ny must be positive"));
    }
    if !(max[0] > min[0] && max[1] > min[1]) {
        return Err(invalid("max must be strictly greater than min"));
    }
    let set = store.create_set();
    let dx = (max[0] - min[0]) / nx as f64;
    let dy = (max[1] - min[1]) / ny as f64;
    let mut ids = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            let v = store.create_vertex([min[0] + i as f64 * dx, min[1] + j as f64 * dy, 0.0]);
            store.set_tag(GLOBAL_ID_TAG, v, TagValue::Int(ids.len() as i64 + 1))?;
            ids.push(v);
        }
    }
    let mut gid = 1i64;
    let mut add = |store: &mut S, ring: &[PointId]| -> Result<(), MeshIntxError> {
        let cell = store.create_polygon(ring)?;
        store.set_tag(GLOBAL_ID_TAG, cell, TagValue::Int(gid))?;
        gid += 1;
        store.add_to_set(set, cell)
    };
    for j in 0..ny {
        for i in 0..nx {
            let v0 = ids[j * (nx + 1) + i];
            let v1 = ids[j * (nx + 1) + i + 1];
            let v2 = ids[(j + 1) * (nx + 1) + i + 1];
            let v3 = ids[(j + 1) * (nx + 1) + i];
            match cell_type {
                StructuredCellType::Quadrilateral => add(store, &[v0, v1, v2, v3])?,
                StructuredCellType::Triangle => {
                    add(store, &[v0, v1, v2])?;
                    add(store, &[v0, v2, v3])?;
                }
            }
        }
    }
    Ok(set)
}

/// Copies the cells of `arrival` with every vertex moved by `trace`, the
/// map from an arrival point to its departure point.
///
/// Each departure cell gets a [`CORRESPONDING_CELL_TAG`] handle to the
/// arrival cell it came from; `GLOBAL_ID` tags are copied when present.
pub fn departure_mesh<S, F>(store: &mut S, arrival: MeshSet, trace: F) -> Result<MeshSet, MeshIntxError>
where
    S: MeshStore + ?Sized,
    F: Fn(Vec3) -> Vec3,
{
    Ok(DepartureMesh::build(store, arrival, trace)?.set())
}

/// A departure copy of an arrival set that remembers which arrival vertex
/// each of its vertices follows, so later steps can move it in place.
#[derive(Clone, Debug)]
pub struct DepartureMesh {
    arrival: MeshSet,
    set: MeshSet,
    /// (arrival vertex, departure vertex)
    vertices: Vec<(PointId, PointId)>,
    cells: Vec<PointId>,
}

impl DepartureMesh {
    /// See [`departure_mesh`].
    pub fn build<S, F>(store: &mut S, arrival: MeshSet, trace: F) -> Result<Self, MeshIntxError>
    where
        S: MeshStore + ?Sized,
        F: Fn(Vec3) -> Vec3,
    {
        let set = store.create_set();
        let mut vertices = Vec::new();
        let mut moved: HashMap<PointId, PointId> = HashMap::new();
        for v in store.entities(arrival, EntityDim::Vertex)? {
            let p = trace(store.coords(v)?);
            let d = store.create_vertex(p);
            if let Some(gid) = store.tag(GLOBAL_ID_TAG, v) {
                store.set_tag(GLOBAL_ID_TAG, d, gid)?;
            }
            moved.insert(v, d);
            vertices.push((v, d));
        }
        let mut cells = Vec::new();
        for cell in store.entities(arrival, EntityDim::Polygon)? {
            let ring: Vec<PointId> = store
                .connectivity(cell)?
                .iter()
                .map(|v| moved.get(v).copied().ok_or(MeshIntxError::MissingEntity(*v)))
                .collect::<Result<_, _>>()?;
            let d = store.create_polygon(&ring)?;
            if let Some(gid) = store.tag(GLOBAL_ID_TAG, cell) {
                store.set_tag(GLOBAL_ID_TAG, d, gid)?;
            }
            store.set_tag(CORRESPONDING_CELL_TAG, d, TagValue::Handle(cell))?;
            store.add_to_set(set, d)?;
            cells.push(d);
        }
        Ok(Self {
            arrival,
            set,
            vertices,
            cells,
        })
    }

    #[inline]
    pub fn arrival(&self) -> MeshSet {
        self.arrival
    }

    #[inline]
    pub fn set(&self) -> MeshSet {
        self.set
    }

    /// Moves every departure vertex to `trace` of its arrival vertex's
    /// current position.
    pub fn retrace<S, F>(&self, store: &mut S, trace: F) -> Result<(), MeshIntxError>
    where
        S: MeshStore + ?Sized,
        F: Fn(Vec3) -> Vec3,
    {
        for &(a, d) in &self.vertices {
            let p = trace(store.coords(a)?);
            store.set_coords(d, p)?;
        }
        Ok(())
    }

    /// Removes the departure cells, their vertices and the set.
    pub fn delete<S: MeshStore + ?Sized>(self, store: &mut S) -> Result<(), MeshIntxError> {
        let mut doomed = self.cells;
        doomed.extend(self.vertices.iter().map(|&(_, d)| d));
        store.delete_entities(&doomed)?;
        store.delete_set(self.set)
    }
}

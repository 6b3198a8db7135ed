//! Per-red-edge cache of intersection vertices.
//!
//! Two red cells that share an edge see the same crossing points on it. The
//! first one to resolve a point creates the vertex; the second finds it here,
//! so neighbouring output polygons share vertex handles and the output mesh
//! is conforming.

use crate::geometry::spherical::{Vec3, distance};
use crate::intx::adapter::collapse_padding;
use crate::mesh_error::MeshIntxError;
use crate::topology::point::PointId;
use crate::topology::store::MeshStore;
use std::collections::HashMap;

/// Unordered red edge, stored with the smaller handle first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey(PointId, PointId);

impl EdgeKey {
    #[inline]
    pub fn new(a: PointId, b: PointId) -> Self {
        if a <= b { EdgeKey(a, b) } else { EdgeKey(b, a) }
    }

    #[inline]
    pub fn endpoints(self) -> (PointId, PointId) {
        (self.0, self.1)
    }
}

#[derive(Clone, Debug, Default)]
pub struct EdgeVertexCache {
    edges: HashMap<EdgeKey, Vec<PointId>>,
    created: Vec<PointId>,
}

impl EdgeVertexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every edge of the given cells with an empty vertex list.
    pub fn for_cells<S: MeshStore + ?Sized>(
        store: &S,
        cells: &[PointId],
    ) -> Result<Self, MeshIntxError> {
        let mut cache = Self::new();
        for &cell in cells {
            let ring = collapse_padding(cell, store.connectivity(cell)?)?;
            let n = ring.len();
            for j in 0..n {
                cache
                    .edges
                    .entry(EdgeKey::new(ring[j], ring[(j + 1) % n]))
                    .or_default();
            }
        }
        Ok(cache)
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Vertices created by this cache so far.
    #[inline]
    pub fn created(&self) -> usize {
        self.created.len()
    }

    /// Handles of the vertices this cache created, in creation order.
    #[inline]
    pub fn created_vertices(&self) -> &[PointId] {
        &self.created
    }

    pub fn vertices_on(&self, key: EdgeKey) -> &[PointId] {
        self.edges.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (EdgeKey, &[PointId])> + '_ {
        self.edges.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Returns the vertex on edge `key` within `epsilon` of `position`,
    /// creating it when none exists. The flag is `true` for a new vertex.
    pub fn find_or_create<S: MeshStore + ?Sized>(
        &mut self,
        store: &mut S,
        key: EdgeKey,
        position: Vec3,
        epsilon: f64,
    ) -> Result<(PointId, bool), MeshIntxError> {
        let list = self.edges.entry(key).or_default();
        for &v in list.iter() {
            if distance(store.coords(v)?, position) <= epsilon {
                return Ok((v, false));
            }
        }
        let v = store.create_vertex(position);
        list.push(v);
        self.created.push(v);
        Ok((v, true))
    }
}

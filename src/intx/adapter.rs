//! Cell adapters: the geometry-specific half of the intersection engine.
//!
//! The advancing front is written once against [`CellAdapter`]. The planar
//! variant reads cells straight off their `x, y` coordinates; the spherical
//! variant projects both cells of a pair onto the gnomonic plane chosen from
//! the red cell's centroid, clips there, and measures areas on the sphere.

use crate::geometry::gnomonic::{self, GnomonicPlane};
use crate::geometry::kernel::{self, MAX_EDGES, Point2, PolyBuf};
use crate::geometry::spherical::{self, Vec3};
use crate::mesh_error::MeshIntxError;
use crate::topology::point::PointId;
use crate::topology::store::{MeshSet, MeshStore};
use arrayvec::ArrayVec;

/// How 3-D positions of one pair map into the clipping plane.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Planar meshes: drop `z`.
    Identity,
    Gnomonic(GnomonicPlane),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CellAdapter {
    Planar,
    Spherical { radius: f64 },
}

/// One cell prepared for clipping: padding removed, coordinates fetched
/// and projected.
#[derive(Clone, Debug)]
pub struct CellSetup {
    pub cell: PointId,
    pub vertices: ArrayVec<PointId, MAX_EDGES>,
    pub coords: ArrayVec<Vec3, MAX_EDGES>,
    pub plane_coords: PolyBuf,
    pub projection: Projection,
    /// Planar area in the clipping plane.
    pub area: f64,
}

impl CellSetup {
    #[inline]
    pub fn sides(&self) -> usize {
        self.vertices.len()
    }

    /// Vertex handles of edge `j`, in ring order.
    #[inline]
    pub fn edge(&self, j: usize) -> (PointId, PointId) {
        let n = self.vertices.len();
        (self.vertices[j], self.vertices[(j + 1) % n])
    }
}

/// Ring of a cell with padding repeats (and a repeated closing vertex)
/// removed.
pub fn collapse_padding(
    cell: PointId,
    conn: &[PointId],
) -> Result<ArrayVec<PointId, MAX_EDGES>, MeshIntxError> {
    let mut ring = ArrayVec::<PointId, MAX_EDGES>::new();
    let mut sides = 0usize;
    for &v in conn {
        if ring.last() == Some(&v) {
            continue;
        }
        sides += 1;
        if ring.len() < MAX_EDGES {
            ring.push(v);
        }
    }
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
        sides -= 1;
    }
    if sides > MAX_EDGES {
        return Err(MeshIntxError::TooManyEdges {
            cell,
            sides,
            max: MAX_EDGES,
        });
    }
    if ring.len() < 3 {
        return Err(MeshIntxError::DegenerateCell(cell));
    }
    Ok(ring)
}

impl CellAdapter {
    pub fn radius(&self) -> f64 {
        match self {
            CellAdapter::Planar => 1.0,
            CellAdapter::Spherical { radius } => *radius,
        }
    }

    /// Projection used for pairs whose red cell has these vertices.
    pub fn projection_for(&self, coords: &[Vec3]) -> Projection {
        match self {
            CellAdapter::Planar => Projection::Identity,
            CellAdapter::Spherical { .. } => {
                Projection::Gnomonic(gnomonic::choose_plane(spherical::centroid(coords)))
            }
        }
    }

    /// `None` when the point falls on or behind the gnomonic plane.
    #[inline]
    pub fn try_project(&self, projection: Projection, p: Vec3) -> Option<Point2> {
        match projection {
            Projection::Identity => Some([p[0], p[1]]),
            Projection::Gnomonic(plane) => gnomonic::project(p, self.radius(), plane),
        }
    }

    /// Lifts a plane point back to the mesh surface.
    #[inline]
    pub fn unproject(&self, projection: Projection, q: Point2) -> Vec3 {
        match projection {
            Projection::Identity => [q[0], q[1], 0.0],
            Projection::Gnomonic(plane) => gnomonic::unproject(q, self.radius(), plane),
        }
    }

    /// Fetches the collapsed ring of a cell and its vertex coordinates.
    pub fn fetch<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        cell: PointId,
    ) -> Result<(ArrayVec<PointId, MAX_EDGES>, ArrayVec<Vec3, MAX_EDGES>), MeshIntxError> {
        let ring = collapse_padding(cell, store.connectivity(cell)?)?;
        let mut coords = ArrayVec::new();
        for &v in &ring {
            coords.push(store.coords(v)?);
        }
        Ok((ring, coords))
    }

    /// Prepares a red cell, choosing its projection.
    ///
    /// A red cell that cannot be projected onto the plane of its own
    /// centroid is malformed, so failure here is fatal.
    pub fn setup<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        cell: PointId,
    ) -> Result<CellSetup, MeshIntxError> {
        let (vertices, coords) = self.fetch(store, cell)?;
        let projection = self.projection_for(&coords);
        self.setup_from(cell, vertices, coords, projection)?
            .ok_or_else(|| match projection {
                Projection::Gnomonic(plane) => MeshIntxError::DegenerateProjection { cell, plane },
                Projection::Identity => MeshIntxError::DegenerateCell(cell),
            })
    }

    /// Prepares a cell in a projection chosen by another cell; `Ok(None)`
    /// when some vertex lies behind that plane, meaning the cell cannot
    /// overlap the one that chose it.
    pub fn setup_in<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        cell: PointId,
        projection: Projection,
    ) -> Result<Option<CellSetup>, MeshIntxError> {
        let (vertices, coords) = self.fetch(store, cell)?;
        self.setup_from(cell, vertices, coords, projection)
    }

    pub fn setup_from(
        &self,
        cell: PointId,
        vertices: ArrayVec<PointId, MAX_EDGES>,
        coords: ArrayVec<Vec3, MAX_EDGES>,
        projection: Projection,
    ) -> Result<Option<CellSetup>, MeshIntxError> {
        let mut plane_coords = PolyBuf::new();
        for p in &coords {
            match self.try_project(projection, *p) {
                Some(q) => plane_coords.push(q),
                None => return Ok(None),
            }
        }
        let area = kernel::polygon_area(&plane_coords);
        Ok(Some(CellSetup {
            cell,
            vertices,
            coords,
            plane_coords,
            projection,
            area,
        }))
    }

    /// Neighbour across each edge of `cell` within `set`, edge `j` running
    /// from vertex `j` to `j + 1`. `None` marks a boundary edge.
    pub fn ordered_neighbors<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        set: MeshSet,
        cell: PointId,
    ) -> Result<ArrayVec<Option<PointId>, MAX_EDGES>, MeshIntxError> {
        let ring = collapse_padding(cell, store.connectivity(cell)?)?;
        neighbors_of(store, set, cell, &ring)
    }

    /// Boundary-inclusive point-in-cell test, done in the cell's own plane.
    pub fn is_inside<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        point: Vec3,
        cell: PointId,
        epsilon_area: f64,
    ) -> Result<bool, MeshIntxError> {
        let setup = self.setup(store, cell)?;
        Ok(match self.try_project(setup.projection, point) {
            Some(q) => kernel::point_in_convex_polygon(&setup.plane_coords, q, epsilon_area),
            None => false,
        })
    }

    /// Area of a polygon given by its vertex positions: the shoelace area
    /// for planar meshes, the geodesic area on the sphere.
    pub fn polygon_area(&self, coords: &[Vec3]) -> f64 {
        match self {
            CellAdapter::Planar => {
                let flat: Vec<Point2> = coords.iter().map(|p| [p[0], p[1]]).collect();
                kernel::polygon_area(&flat)
            }
            CellAdapter::Spherical { radius } => spherical::spherical_polygon_area(coords, *radius),
        }
    }

    /// [`Self::polygon_area`] of a stored cell.
    pub fn cell_area<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        cell: PointId,
    ) -> Result<f64, MeshIntxError> {
        let (_, coords) = self.fetch(store, cell)?;
        Ok(self.polygon_area(&coords))
    }

    /// Representative point of a cell: vertex mean, lifted to the sphere
    /// for the spherical adapter.
    pub fn cell_center<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        cell: PointId,
    ) -> Result<Vec3, MeshIntxError> {
        let (_, coords) = self.fetch(store, cell)?;
        let c = spherical::centroid(&coords);
        Ok(match self {
            CellAdapter::Planar => c,
            CellAdapter::Spherical { radius } => spherical::to_radius(c, *radius),
        })
    }
}

pub(crate) fn neighbors_of<S: MeshStore + ?Sized>(
    store: &S,
    set: MeshSet,
    cell: PointId,
    ring: &[PointId],
) -> Result<ArrayVec<Option<PointId>, MAX_EDGES>, MeshIntxError> {
    let n = ring.len();
    let mut out = ArrayVec::new();
    for j in 0..n {
        let (a, b) = (ring[j], ring[(j + 1) % n]);
        let sharing: Vec<PointId> = store
            .adjacent_cells(a, b)
            .into_iter()
            .filter(|c| store.contains(set, *c))
            .collect();
        let others: Vec<PointId> = sharing.iter().copied().filter(|c| *c != cell).collect();
        if sharing.len() > 2 || others.len() > 1 {
            return Err(MeshIntxError::NonManifoldEdge {
                cell,
                a,
                b,
                count: sharing.len().max(others.len() + 1),
            });
        }
        out.push(others.first().copied());
    }
    Ok(out)
}

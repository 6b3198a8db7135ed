//! Mesh store: the entity/connectivity/tag collaborator the remap core runs on.
//!
//! The intersection engine never owns mesh data. It asks a [`MeshStore`] for
//! cells, vertices, coordinates and edge adjacency, and writes new vertices,
//! output polygons and tags back through the same interface.
//! [`InMemoryMesh`] is the bundled implementation.

use crate::mesh_error::MeshIntxError;
use crate::topology::point::PointId;
use std::collections::{HashMap, HashSet};

/// Integer tag holding the global ID of vertices and cells.
pub const GLOBAL_ID_TAG: &str = "GLOBAL_ID";
/// Integer tag on output polygons: index of the red parent in the red range.
pub const RED_PARENT_TAG: &str = "RedParent";
/// Integer tag on output polygons: index of the blue parent in the blue range.
pub const BLUE_PARENT_TAG: &str = "BlueParent";
/// Handle tag linking a departure cell to the arrival cell it maps onto.
pub const CORRESPONDING_CELL_TAG: &str = "CorrespondingCell";

/// Handle of an entity set inside a store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshSet(usize);

impl MeshSet {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Topological dimension selector for [`MeshStore::entities`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntityDim {
    Vertex,
    Polygon,
}

/// Value stored under a tag name.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TagValue {
    Int(i64),
    Real(f64),
    Handle(PointId),
}

/// The interface the remap core needs from a mesh database.
pub trait MeshStore {
    /// Entities of dimension `dim` in `set`, in insertion order.
    ///
    /// For [`EntityDim::Vertex`] this is every vertex added to the set
    /// explicitly plus every vertex of a polygon in the set, deduplicated.
    fn entities(&self, set: MeshSet, dim: EntityDim) -> Result<Vec<PointId>, MeshIntxError>;

    /// Ordered vertex handles of a polygon (may contain trailing padding).
    fn connectivity(&self, cell: PointId) -> Result<&[PointId], MeshIntxError>;

    fn coords(&self, vertex: PointId) -> Result<[f64; 3], MeshIntxError>;

    fn set_coords(&mut self, vertex: PointId, position: [f64; 3]) -> Result<(), MeshIntxError>;

    fn create_vertex(&mut self, position: [f64; 3]) -> PointId;

    fn create_polygon(&mut self, vertices: &[PointId]) -> Result<PointId, MeshIntxError>;

    fn create_set(&mut self) -> MeshSet;

    fn add_to_set(&mut self, set: MeshSet, entity: PointId) -> Result<(), MeshIntxError>;

    fn contains(&self, set: MeshSet, entity: PointId) -> bool;

    /// Polygons (of any set) that have the edge `a`–`b`.
    fn adjacent_cells(&self, a: PointId, b: PointId) -> Vec<PointId>;

    fn set_tag(&mut self, name: &str, entity: PointId, value: TagValue)
    -> Result<(), MeshIntxError>;

    fn tag(&self, name: &str, entity: PointId) -> Option<TagValue>;

    /// Removes a tag and all of its values.
    fn delete_tag(&mut self, name: &str);

    /// Removes polygons and vertices together with their set memberships
    /// and tag values. A vertex still used by a polygon that is not removed
    /// in the same call is refused, and the store is left unchanged.
    fn delete_entities(&mut self, entities: &[PointId]) -> Result<(), MeshIntxError>;

    /// Removes a set; its members stay in the store. The handle may be
    /// reused by a later [`create_set`](Self::create_set).
    fn delete_set(&mut self, set: MeshSet) -> Result<(), MeshIntxError>;
}

/// Typed tag accessors for every [`MeshStore`].
pub trait MeshStoreExt: MeshStore {
    fn int_tag(&self, name: &str, entity: PointId) -> Result<i64, MeshIntxError> {
        match self.tag(name, entity) {
            Some(TagValue::Int(v)) => Ok(v),
            Some(_) => Err(MeshIntxError::TagKindMismatch {
                tag: name.to_string(),
                entity,
            }),
            None => Err(MeshIntxError::MissingTag {
                tag: name.to_string(),
                entity,
            }),
        }
    }

    fn real_tag(&self, name: &str, entity: PointId) -> Result<f64, MeshIntxError> {
        match self.tag(name, entity) {
            Some(TagValue::Real(v)) => Ok(v),
            Some(_) => Err(MeshIntxError::TagKindMismatch {
                tag: name.to_string(),
                entity,
            }),
            None => Err(MeshIntxError::MissingTag {
                tag: name.to_string(),
                entity,
            }),
        }
    }

    fn handle_tag(&self, name: &str, entity: PointId) -> Result<PointId, MeshIntxError> {
        match self.tag(name, entity) {
            Some(TagValue::Handle(v)) => Ok(v),
            Some(_) => Err(MeshIntxError::TagKindMismatch {
                tag: name.to_string(),
                entity,
            }),
            None => Err(MeshIntxError::MissingTag {
                tag: name.to_string(),
                entity,
            }),
        }
    }
}

impl<T: MeshStore + ?Sized> MeshStoreExt for T {}

/// True if `a`–`b` is an edge of the ring `conn`, ignoring repeated padding.
pub fn ring_has_edge(conn: &[PointId], a: PointId, b: PointId) -> bool {
    let n = conn.len();
    (0..n).any(|i| {
        let p = conn[i];
        let q = conn[(i + 1) % n];
        p != q && ((p == a && q == b) || (p == b && q == a))
    })
}

#[derive(Clone, Debug, Default)]
struct EntitySet {
    members: Vec<PointId>,
    index: HashSet<PointId>,
}

/// In-memory mesh store with vertex→cell upward adjacency.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMesh {
    next_id: u64,
    vertices: HashMap<PointId, [f64; 3]>,
    cells: HashMap<PointId, Vec<PointId>>,
    vertex_cells: HashMap<PointId, Vec<PointId>>,
    sets: Vec<Option<EntitySet>>,
    free_sets: Vec<usize>,
    tags: HashMap<String, HashMap<PointId, TagValue>>,
}

impl InMemoryMesh {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn num_polygons(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_vertex(&self, entity: PointId) -> bool {
        self.vertices.contains_key(&entity)
    }

    #[inline]
    pub fn is_polygon(&self, entity: PointId) -> bool {
        self.cells.contains_key(&entity)
    }

    /// Number of live sets.
    pub fn num_sets(&self) -> usize {
        self.sets.iter().flatten().count()
    }

    /// Number of entities (of any dimension) in a set.
    pub fn set_len(&self, set: MeshSet) -> Result<usize, MeshIntxError> {
        Ok(self.set_ref(set)?.members.len())
    }

    fn allocate(&mut self) -> PointId {
        let id = PointId::from_index(self.next_id);
        self.next_id += 1;
        id
    }

    fn set_ref(&self, set: MeshSet) -> Result<&EntitySet, MeshIntxError> {
        self.sets
            .get(set.0)
            .and_then(Option::as_ref)
            .ok_or(MeshIntxError::MissingSet(set.0))
    }
}

impl MeshStore for InMemoryMesh {
    fn entities(&self, set: MeshSet, dim: EntityDim) -> Result<Vec<PointId>, MeshIntxError> {
        let data = self.set_ref(set)?;
        match dim {
            EntityDim::Polygon => Ok(data
                .members
                .iter()
                .copied()
                .filter(|e| self.cells.contains_key(e))
                .collect()),
            EntityDim::Vertex => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for e in &data.members {
                    if self.vertices.contains_key(e) {
                        if seen.insert(*e) {
                            out.push(*e);
                        }
                    } else if let Some(conn) = self.cells.get(e) {
                        for v in conn {
                            if seen.insert(*v) {
                                out.push(*v);
                            }
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    fn connectivity(&self, cell: PointId) -> Result<&[PointId], MeshIntxError> {
        self.cells
            .get(&cell)
            .map(Vec::as_slice)
            .ok_or(MeshIntxError::MissingEntity(cell))
    }

    fn coords(&self, vertex: PointId) -> Result<[f64; 3], MeshIntxError> {
        self.vertices
            .get(&vertex)
            .copied()
            .ok_or(MeshIntxError::MissingEntity(vertex))
    }

    fn set_coords(&mut self, vertex: PointId, position: [f64; 3]) -> Result<(), MeshIntxError> {
        let slot = self
            .vertices
            .get_mut(&vertex)
            .ok_or(MeshIntxError::MissingEntity(vertex))?;
        *slot = position;
        Ok(())
    }

    fn create_vertex(&mut self, position: [f64; 3]) -> PointId {
        let id = self.allocate();
        self.vertices.insert(id, position);
        id
    }

    fn create_polygon(&mut self, vertices: &[PointId]) -> Result<PointId, MeshIntxError> {
        if let Some(missing) = vertices.iter().find(|v| !self.vertices.contains_key(v)) {
            return Err(MeshIntxError::MissingEntity(*missing));
        }
        let id = self.allocate();
        let mut distinct = HashSet::new();
        for v in vertices {
            if distinct.insert(*v) {
                self.vertex_cells.entry(*v).or_default().push(id);
            }
        }
        self.cells.insert(id, vertices.to_vec());
        Ok(id)
    }

    fn create_set(&mut self) -> MeshSet {
        if let Some(slot) = self.free_sets.pop() {
            self.sets[slot] = Some(EntitySet::default());
            return MeshSet(slot);
        }
        self.sets.push(Some(EntitySet::default()));
        MeshSet(self.sets.len() - 1)
    }

    fn add_to_set(&mut self, set: MeshSet, entity: PointId) -> Result<(), MeshIntxError> {
        if !self.vertices.contains_key(&entity) && !self.cells.contains_key(&entity) {
            return Err(MeshIntxError::MissingEntity(entity));
        }
        let data = self
            .sets
            .get_mut(set.0)
            .and_then(Option::as_mut)
            .ok_or(MeshIntxError::MissingSet(set.0))?;
        if data.index.insert(entity) {
            data.members.push(entity);
        }
        Ok(())
    }

    fn contains(&self, set: MeshSet, entity: PointId) -> bool {
        self.sets
            .get(set.0)
            .and_then(Option::as_ref)
            .is_some_and(|s| s.index.contains(&entity))
    }

    fn adjacent_cells(&self, a: PointId, b: PointId) -> Vec<PointId> {
        let Some(around_a) = self.vertex_cells.get(&a) else {
            return Vec::new();
        };
        around_a
            .iter()
            .copied()
            .filter(|c| {
                self.cells
                    .get(c)
                    .is_some_and(|conn| ring_has_edge(conn, a, b))
            })
            .collect()
    }

    fn set_tag(
        &mut self,
        name: &str,
        entity: PointId,
        value: TagValue,
    ) -> Result<(), MeshIntxError> {
        if !self.vertices.contains_key(&entity) && !self.cells.contains_key(&entity) {
            return Err(MeshIntxError::MissingEntity(entity));
        }
        self.tags
            .entry(name.to_string())
            .or_default()
            .insert(entity, value);
        Ok(())
    }

    fn tag(&self, name: &str, entity: PointId) -> Option<TagValue> {
        self.tags.get(name).and_then(|t| t.get(&entity)).copied()
    }

    fn delete_tag(&mut self, name: &str) {
        self.tags.remove(name);
    }

    fn delete_entities(&mut self, entities: &[PointId]) -> Result<(), MeshIntxError> {
        let doomed: HashSet<PointId> = entities.iter().copied().collect();
        for &e in &doomed {
            if self.cells.contains_key(&e) {
                continue;
            }
            if !self.vertices.contains_key(&e) {
                return Err(MeshIntxError::MissingEntity(e));
            }
            let user = self
                .vertex_cells
                .get(&e)
                .and_then(|users| users.iter().find(|c| !doomed.contains(c)));
            if let Some(&user) = user {
                return Err(MeshIntxError::EntityInUse { entity: e, user });
            }
        }

        for &e in &doomed {
            let Some(conn) = self.cells.remove(&e) else {
                continue;
            };
            for v in conn {
                let emptied = self.vertex_cells.get_mut(&v).is_some_and(|users| {
                    users.retain(|c| *c != e);
                    users.is_empty()
                });
                if emptied {
                    self.vertex_cells.remove(&v);
                }
            }
        }
        for e in &doomed {
            self.vertices.remove(e);
        }
        for set in self.sets.iter_mut().flatten() {
            if doomed.iter().any(|e| set.index.contains(e)) {
                set.members.retain(|e| !doomed.contains(e));
                set.index.retain(|e| !doomed.contains(e));
            }
        }
        for values in self.tags.values_mut() {
            for e in &doomed {
                values.remove(e);
            }
        }
        Ok(())
    }

    fn delete_set(&mut self, set: MeshSet) -> Result<(), MeshIntxError> {
        self.sets
            .get_mut(set.0)
            .and_then(Option::take)
            .ok_or(MeshIntxError::MissingSet(set.0))?;
        self.free_sets.push(set.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(store: &mut InMemoryMesh) -> (MeshSet, Vec<PointId>, PointId) {
        let set = store.create_set();
        let v: Vec<_> = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]]
            .into_iter()
            .map(|p| store.create_vertex(p))
            .collect();
        let cell = store.create_polygon(&v).unwrap();
        store.add_to_set(set, cell).unwrap();
        (set, v, cell)
    }

    #[test]
    fn entities_by_dimension() {
        let mut store = InMemoryMesh::new();
        let (set, v, cell) = square(&mut store);
        assert_eq!(store.entities(set, EntityDim::Polygon).unwrap(), vec![cell]);
        assert_eq!(store.entities(set, EntityDim::Vertex).unwrap(), v);
        assert_eq!(store.set_len(set).unwrap(), 1);
    }

    #[test]
    fn edge_adjacency_ignores_diagonals_and_padding() {
        let mut store = InMemoryMesh::new();
        let (_set, v, cell) = square(&mut store);
        assert_eq!(store.adjacent_cells(v[0], v[1]), vec![cell]);
        assert!(store.adjacent_cells(v[0], v[2]).is_empty());

        let extra = store.create_vertex([2.0, 0.0, 0.0]);
        let padded = store.create_polygon(&[v[1], extra, v[2], v[2]]).unwrap();
        assert_eq!(store.adjacent_cells(v[2], v[1]), vec![cell, padded]);
        assert!(!ring_has_edge(store.connectivity(padded).unwrap(), v[2], v[2]));
    }

    #[test]
    fn typed_tags() {
        let mut store = InMemoryMesh::new();
        let (_set, v, cell) = square(&mut store);
        store.set_tag(GLOBAL_ID_TAG, cell, TagValue::Int(7)).unwrap();
        store
            .set_tag(CORRESPONDING_CELL_TAG, cell, TagValue::Handle(v[0]))
            .unwrap();
        assert_eq!(store.int_tag(GLOBAL_ID_TAG, cell).unwrap(), 7);
        assert_eq!(store.handle_tag(CORRESPONDING_CELL_TAG, cell).unwrap(), v[0]);
        assert!(matches!(
            store.real_tag(GLOBAL_ID_TAG, cell),
            Err(MeshIntxError::TagKindMismatch { .. })
        ));
        store.delete_tag(GLOBAL_ID_TAG);
        assert!(matches!(
            store.int_tag(GLOBAL_ID_TAG, cell),
            Err(MeshIntxError::MissingTag { .. })
        ));
    }

    #[test]
    fn deleting_cells_releases_their_vertices() {
        let mut store = InMemoryMesh::new();
        let (set, v, cell) = square(&mut store);
        let other = store.create_set();
        store.add_to_set(other, v[0]).unwrap();
        store.set_tag(GLOBAL_ID_TAG, cell, TagValue::Int(1)).unwrap();

        assert_eq!(
            store.delete_entities(&[v[0]]),
            Err(MeshIntxError::EntityInUse { entity: v[0], user: cell })
        );
        assert_eq!(store.num_vertices(), 4);

        store.delete_entities(&[cell, v[0], v[1]]).unwrap();
        assert_eq!(store.num_polygons(), 0);
        assert_eq!(store.num_vertices(), 2);
        assert!(store.entities(set, EntityDim::Polygon).unwrap().is_empty());
        assert!(!store.contains(other, v[0]));
        assert!(store.tag(GLOBAL_ID_TAG, cell).is_none());
        assert!(store.adjacent_cells(v[2], v[3]).is_empty());
        store.delete_entities(&[v[2], v[3]]).unwrap();
        assert_eq!(store.num_vertices(), 0);
    }

    #[test]
    fn deleted_set_slots_are_reused() {
        let mut store = InMemoryMesh::new();
        let (set, _v, cell) = square(&mut store);
        let spare = store.create_set();
        store.delete_set(set).unwrap();
        assert!(store.entities(set, EntityDim::Polygon).is_err());
        assert!(store.is_polygon(cell));
        assert_eq!(store.delete_set(set), Err(MeshIntxError::MissingSet(set.index())));
        assert_eq!(store.num_sets(), 1);
        let again = store.create_set();
        assert_eq!(again, set);
        assert!(store.entities(again, EntityDim::Polygon).unwrap().is_empty());
        assert_ne!(again, spare);
    }

    #[test]
    fn missing_entities_are_errors() {
        let mut store = InMemoryMesh::new();
        let bogus = PointId::new(99).unwrap();
        assert_eq!(
            store.create_polygon(&[bogus]),
            Err(MeshIntxError::MissingEntity(bogus))
        );
        let set = store.create_set();
        assert!(store.add_to_set(set, bogus).is_err());
        assert!(store.entities(MeshSet(5), EntityDim::Vertex).is_err());
    }
}

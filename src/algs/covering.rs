//! Distributed covering exchange.
//!
//! Before a process can intersect its arrival cells it needs every departure
//! cell that may overlap them, wherever that cell lives. Processes publish
//! the bounding box of their arrival vertices; each departure cell is sent,
//! with its vertices, to every process whose box it overlaps. Received cells
//! remember where they came from so that remapped quantities can be
//! returned to the cell's owner afterwards. Intersection points found on
//! seam edges are finally reconciled across processes.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::tuple_list::{TupleList, crystal_route};
use crate::algs::wire::{WireBox, cast_slice};
use crate::config::IntxConfig;
use crate::geometry::bbox::BoundingBox;
use crate::geometry::spherical::{Vec3, distance};
use crate::intx::adapter::collapse_padding;
use crate::intx::edge_cache::{EdgeKey, EdgeVertexCache};
use crate::mesh_error::MeshIntxError;
use crate::topology::point::PointId;
use crate::topology::store::{
    CORRESPONDING_CELL_TAG, EntityDim, GLOBAL_ID_TAG, MeshSet, MeshStore, MeshStoreExt, TagValue,
};
use std::collections::{BTreeMap, HashMap, HashSet};

const TAG_BOXES: CommTag = CommTag::new(100);
const TAG_VERTICES: CommTag = CommTag::new(110);
const TAG_CELLS: CommTag = CommTag::new(120);
const TAG_RETURN: CommTag = CommTag::new(130);
const TAG_SEAM: CommTag = CommTag::new(140);
const TAG_SUM: CommTag = CommTag::new(150);

/// Bounding box of every process's arrival vertices, plus the largest
/// departure cell size over all processes.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessBoxes {
    boxes: Vec<BoundingBox>,
    max_edges: usize,
}

impl ProcessBoxes {
    pub fn from_boxes(boxes: Vec<BoundingBox>, max_edges: usize) -> Self {
        Self { boxes, max_edges }
    }

    /// Collective: every process contributes its local boxes and cell size.
    pub fn gather<S, C>(
        comm: &C,
        store: &S,
        arrival: MeshSet,
        departure: MeshSet,
    ) -> Result<Self, MeshIntxError>
    where
        S: MeshStore + ?Sized,
        C: Communicator,
    {
        let mut local = BoundingBox::empty();
        for v in store.entities(arrival, EntityDim::Vertex)? {
            local.include(store.coords(v)?);
        }
        let mut max_edges = 0;
        for cell in store.entities(departure, EntityDim::Polygon)? {
            max_edges = max_edges.max(store.connectivity(cell)?.len());
        }
        let wire = WireBox::new(local.to_array(), max_edges);
        let gathered = comm.all_gather_bytes(TAG_BOXES, cast_slice(std::slice::from_ref(&wire)))?;
        let mut boxes = Vec::with_capacity(gathered.len());
        let mut global_max = 0;
        for bytes in &gathered {
            let b = WireBox::decode(bytes)?;
            boxes.push(BoundingBox::from_array(b.bounds()));
            global_max = global_max.max(b.max_edges());
        }
        log::debug!("gathered {} process boxes, max cell size {global_max}", boxes.len());
        Ok(Self {
            boxes,
            max_edges: global_max,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, rank: usize) -> Option<&BoundingBox> {
        self.boxes.get(rank)
    }

    #[inline]
    pub fn max_edges(&self) -> usize {
        self.max_edges
    }

    pub fn ranks_overlapping(&self, b: &BoundingBox, slack: f64) -> Vec<usize> {
        (0..self.boxes.len())
            .filter(|&r| self.boxes[r].overlaps(b, slack))
            .collect()
    }

    pub fn ranks_containing(&self, p: Vec3, slack: f64) -> Vec<usize> {
        (0..self.boxes.len())
            .filter(|&r| self.boxes[r].contains(p, slack))
            .collect()
    }
}

/// A covering cell received from another process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCell {
    pub origin: usize,
    pub global_id: i64,
    /// Arrival cell on `origin` that this departure cell maps onto.
    pub back_ref: PointId,
    /// Handle of the local copy.
    pub local: PointId,
}

/// Received covering cells, sorted by global ID.
#[derive(Clone, Debug, Default)]
pub struct RemoteCellTable {
    cells: Vec<RemoteCell>,
    by_local: HashMap<PointId, usize>,
}

impl RemoteCellTable {
    fn from_cells(mut cells: Vec<RemoteCell>) -> Self {
        cells.sort_by_key(|c| (c.global_id, c.origin));
        let by_local = cells.iter().enumerate().map(|(i, c)| (c.local, i)).collect();
        Self { cells, by_local }
    }

    pub fn get(&self, local: PointId) -> Option<&RemoteCell> {
        self.by_local.get(&local).map(|&i| &self.cells[i])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteCell> {
        self.cells.iter()
    }
}

/// Departure cells to send to each rank (the local rank included).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Coverage {
    targets: Vec<Vec<PointId>>,
}

impl Coverage {
    pub fn cells_for(&self, rank: usize) -> &[PointId] {
        self.targets.get(rank).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.targets.iter().map(Vec::len).sum()
    }
}

/// A remapped quantity returned to the owner of a departure cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReturnedContribution {
    pub arrival: PointId,
    pub global_id: i64,
    pub value: f64,
}

/// Per-run state of the covering exchange.
pub struct MeshExchange<'c, C: Communicator> {
    comm: &'c C,
    slack: f64,
    boxes: Option<ProcessBoxes>,
    remote: RemoteCellTable,
    /// Cells and vertices created by the last transfer.
    received: Vec<PointId>,
}

impl<'c, C: Communicator> MeshExchange<'c, C> {
    pub fn new(comm: &'c C, config: &IntxConfig) -> Self {
        Self {
            comm,
            slack: config.box_slack,
            boxes: None,
            remote: RemoteCellTable::default(),
            received: Vec::new(),
        }
    }

    #[inline]
    pub fn comm(&self) -> &'c C {
        self.comm
    }

    #[inline]
    pub fn boxes(&self) -> Option<&ProcessBoxes> {
        self.boxes.as_ref()
    }

    #[inline]
    pub fn remote_cells(&self) -> &RemoteCellTable {
        &self.remote
    }

    /// Collective; see [`ProcessBoxes::gather`].
    pub fn build_process_boxes<S: MeshStore + ?Sized>(
        &mut self,
        store: &S,
        arrival: MeshSet,
        departure: MeshSet,
    ) -> Result<&ProcessBoxes, MeshIntxError> {
        let boxes = ProcessBoxes::gather(self.comm, store, arrival, departure)?;
        Ok(self.boxes.insert(boxes))
    }

    /// Ranks whose (slackened) box each departure cell overlaps.
    pub fn compute_coverage<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        departure: MeshSet,
    ) -> Result<Coverage, MeshIntxError> {
        let boxes = self.boxes.as_ref().ok_or(MeshIntxError::MissingProcessBoxes)?;
        let mut targets = vec![Vec::new(); boxes.len()];
        for cell in store.entities(departure, EntityDim::Polygon)? {
            let mut b = BoundingBox::empty();
            for v in store.connectivity(cell)? {
                b.include(store.coords(*v)?);
            }
            for r in boxes.ranks_overlapping(&b, self.slack) {
                targets[r].push(cell);
            }
        }
        Ok(Coverage { targets })
    }

    /// Collective: ships covering cells and their vertices, and returns the
    /// local covering set.
    ///
    /// Local departure cells are added to the set as they are; received
    /// vertices and cells are deduplicated by global ID.
    pub fn transfer<S: MeshStore + ?Sized>(
        &mut self,
        store: &mut S,
        departure: MeshSet,
        coverage: &Coverage,
    ) -> Result<MeshSet, MeshIntxError> {
        let boxes = self.boxes.as_ref().ok_or(MeshIntxError::MissingProcessBoxes)?;
        let (me, n) = (self.comm.rank(), self.comm.size());
        let width = boxes.max_edges();
        let covering = store.create_set();
        for &cell in coverage.cells_for(me) {
            store.add_to_set(covering, cell)?;
        }

        let mut vertices = TupleList::new(2, 0, 3);
        let mut cells = TupleList::new(4 + width, 1, 0);
        for dest in (0..n).filter(|&r| r != me) {
            let mut sent: HashSet<PointId> = HashSet::new();
            for &cell in coverage.cells_for(dest) {
                let conn = store.connectivity(cell)?.to_vec();
                let mut ints = vec![0i64; 4 + width];
                ints[0] = dest as i64;
                ints[1] = store.int_tag(GLOBAL_ID_TAG, cell)?;
                ints[2] = me as i64;
                ints[3] = conn.len() as i64;
                for (k, v) in conn.iter().enumerate() {
                    let gid = store.int_tag(GLOBAL_ID_TAG, *v)?;
                    ints[4 + k] = gid;
                    if sent.insert(*v) {
                        vertices.push(&[dest as i64, gid], &[], &store.coords(*v)?)?;
                    }
                }
                let back_ref = store.handle_tag(CORRESPONDING_CELL_TAG, cell)?;
                cells.push(&ints, &[back_ref.get()], &[])?;
            }
        }

        let vertices = crystal_route(self.comm, TAG_VERTICES, &vertices, 0)?;
        let cells = crystal_route(self.comm, TAG_CELLS, &cells, 0)?;

        let mut vertex_by_gid: HashMap<i64, PointId> = HashMap::new();
        for v in store.entities(departure, EntityDim::Vertex)? {
            vertex_by_gid.insert(store.int_tag(GLOBAL_ID_TAG, v)?, v);
        }
        let mut received = Vec::new();
        for t in vertices.iter() {
            let gid = t.ints[1];
            if vertex_by_gid.contains_key(&gid) {
                continue;
            }
            let v = store.create_vertex([t.reals[0], t.reals[1], t.reals[2]]);
            store.set_tag(GLOBAL_ID_TAG, v, TagValue::Int(gid))?;
            vertex_by_gid.insert(gid, v);
            received.push(v);
        }
        let new_vertices = received.len();

        let mut cell_by_gid: HashMap<i64, PointId> = HashMap::new();
        for c in store.entities(departure, EntityDim::Polygon)? {
            cell_by_gid.insert(store.int_tag(GLOBAL_ID_TAG, c)?, c);
        }
        let mut remote = Vec::new();
        for t in cells.iter() {
            let (src, gid, nverts) = (t.ints[0] as usize, t.ints[1], t.ints[3] as usize);
            if cell_by_gid.contains_key(&gid) {
                continue;
            }
            if nverts > width {
                return Err(MeshIntxError::Wire(format!(
                    "cell {gid} from rank {src} has {nverts} vertices, record width is {width}"
                )));
            }
            let ring: Vec<PointId> = t.ints[4..4 + nverts]
                .iter()
                .map(|g| {
                    vertex_by_gid.get(g).copied().ok_or_else(|| {
                        MeshIntxError::Wire(format!("vertex {g} of cell {gid} was not received"))
                    })
                })
                .collect::<Result<_, _>>()?;
            let local = store.create_polygon(&ring)?;
            store.set_tag(GLOBAL_ID_TAG, local, TagValue::Int(gid))?;
            store.add_to_set(covering, local)?;
            cell_by_gid.insert(gid, local);
            received.push(local);
            let back_ref = PointId::from_wire(t.longs[0])
                .ok_or_else(|| MeshIntxError::Wire(format!("null back reference on cell {gid}")))?;
            remote.push(RemoteCell {
                origin: src,
                global_id: gid,
                back_ref,
                local,
            });
        }
        log::debug!(
            "rank {me}: covering has {} local and {} received cells ({new_vertices} new vertices)",
            coverage.cells_for(me).len(),
            remote.len()
        );
        self.remote = RemoteCellTable::from_cells(remote);
        self.received = received;
        Ok(covering)
    }

    /// Deletes what the last [`transfer`](Self::transfer) created: the
    /// received cells, their new vertices and the covering set. Local
    /// departure cells stay.
    pub fn release_covering<S: MeshStore + ?Sized>(
        &mut self,
        store: &mut S,
        covering: MeshSet,
    ) -> Result<(), MeshIntxError> {
        let received = std::mem::take(&mut self.received);
        store.delete_entities(&received)?;
        store.delete_set(covering)
    }

    /// Collective: sends per-cell totals accumulated on received covering
    /// cells back to the processes owning them, and forgets the remote
    /// table. The result is what other processes sent here, sorted by
    /// global ID.
    pub fn return_contributions(
        &mut self,
        pending: &BTreeMap<PointId, f64>,
    ) -> Result<Vec<ReturnedContribution>, MeshIntxError> {
        let mut out = TupleList::new(2, 1, 1);
        for (&local, &value) in pending {
            let cell = self.remote.get(local).ok_or(MeshIntxError::MissingEntity(local))?;
            out.push(
                &[cell.origin as i64, cell.global_id],
                &[cell.back_ref.get()],
                &[value],
            )?;
        }
        let mut routed = crystal_route(self.comm, TAG_RETURN, &out, 0)?;
        routed.sort_by_int(1);
        self.remote = RemoteCellTable::default();
        routed
            .iter()
            .map(|t| {
                Ok(ReturnedContribution {
                    arrival: PointId::from_wire(t.longs[0]).ok_or_else(|| {
                        MeshIntxError::Wire(format!("null arrival handle for cell {}", t.ints[1]))
                    })?,
                    global_id: t.ints[1],
                    value: t.reals[0],
                })
            })
            .collect()
    }

    /// Collective sum, identical on every rank.
    pub fn global_sum(&self, value: f64) -> Result<f64, MeshIntxError> {
        global_sum(self.comm, value)
    }
}

/// Collective sum in rank order, so every rank gets bit-identical results.
pub fn global_sum<C: Communicator>(comm: &C, value: f64) -> Result<f64, MeshIntxError> {
    let gathered = comm.all_gather_bytes(TAG_SUM, &value.to_le_bytes())?;
    gathered
        .iter()
        .map(|b| {
            <[u8; 8]>::try_from(b.as_slice())
                .map(f64::from_le_bytes)
                .map_err(|_| MeshIntxError::Wire(format!("expected 8 bytes for a sum, got {}", b.len())))
        })
        .sum()
}

/// Collective: moves intersection vertices on seam edges onto the copy
/// computed by the lowest-ranked process that has the same edge.
///
/// A seam edge is a red edge with exactly one adjacent local red cell. Its
/// cached points are sent to every other process whose box contains them;
/// a local point within `snap_tolerance` of a point received from a lower
/// rank takes that point's coordinates. Returns the number of points moved.
pub fn reconcile_shared_points<S, C>(
    comm: &C,
    store: &mut S,
    cache: &EdgeVertexCache,
    red_set: MeshSet,
    boxes: &ProcessBoxes,
    config: &IntxConfig,
) -> Result<usize, MeshIntxError>
where
    S: MeshStore + ?Sized,
    C: Communicator,
{
    let me = comm.rank();
    let mut gid_of: HashMap<PointId, i64> = HashMap::new();
    let mut by_gid: HashMap<i64, PointId> = HashMap::new();
    for cell in store.entities(red_set, EntityDim::Polygon)? {
        for &v in &collapse_padding(cell, store.connectivity(cell)?)? {
            if let Some(TagValue::Int(g)) = store.tag(GLOBAL_ID_TAG, v) {
                gid_of.insert(v, g);
                by_gid.insert(g, v);
            }
        }
    }

    let mut edges: Vec<(EdgeKey, &[PointId])> = cache.iter().filter(|(_, vs)| !vs.is_empty()).collect();
    edges.sort_by_key(|(k, _)| *k);
    let mut outgoing = TupleList::new(3, 0, 3);
    for (key, points) in edges {
        let (a, b) = key.endpoints();
        let local_cells = store
            .adjacent_cells(a, b)
            .into_iter()
            .filter(|c| store.contains(red_set, *c))
            .count();
        if local_cells != 1 {
            continue;
        }
        let (Some(&ga), Some(&gb)) = (gid_of.get(&a), gid_of.get(&b)) else {
            continue;
        };
        let (g0, g1) = (ga.min(gb), ga.max(gb));
        for &v in points {
            let p = store.coords(v)?;
            for dest in boxes.ranks_containing(p, config.box_slack) {
                if dest != me {
                    outgoing.push(&[dest as i64, g0, g1], &[], &p)?;
                }
            }
        }
    }

    let incoming = crystal_route(comm, TAG_SEAM, &outgoing, 0)?;
    let mut snapped = 0;
    for t in incoming.iter() {
        if t.ints[0] as usize >= me {
            continue;
        }
        let (Some(&a), Some(&b)) = (by_gid.get(&t.ints[1]), by_gid.get(&t.ints[2])) else {
            continue;
        };
        let q = [t.reals[0], t.reals[1], t.reals[2]];
        let mut best: Option<(PointId, f64)> = None;
        for &v in cache.vertices_on(EdgeKey::new(a, b)) {
            let d = distance(store.coords(v)?, q);
            if d <= config.snap_tolerance && best.is_none_or(|(_, bd)| d < bd) {
                best = Some((v, d));
            }
        }
        if let Some((v, d)) = best {
            if d > 0.0 {
                store.set_coords(v, q)?;
                snapped += 1;
            }
        }
    }
    if snapped > 0 {
        log::debug!("rank {me}: snapped {snapped} seam points");
    }
    Ok(snapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::meshgen::{StructuredCellType, departure_mesh, planar_grid};
    use crate::topology::store::InMemoryMesh;

    #[test]
    fn boxes_answer_overlap_queries() {
        let boxes = ProcessBoxes::from_boxes(
            vec![
                BoundingBox::from_points(&[[0.0, 0.0, 0.0], [1.0, 1.0, 0.0]]),
                BoundingBox::from_points(&[[1.0, 0.0, 0.0], [2.0, 1.0, 0.0]]),
            ],
            4,
        );
        assert_eq!(boxes.ranks_containing([1.0, 0.5, 0.0], 0.0), vec![0, 1]);
        assert_eq!(boxes.ranks_containing([0.2, 0.5, 0.0], 0.0), vec![0]);
        let query = BoundingBox::from_points(&[[1.5, 0.2, 0.0], [1.6, 0.3, 0.0]]);
        assert_eq!(boxes.ranks_overlapping(&query, 0.0), vec![1]);
        assert_eq!(boxes.ranks_overlapping(&query, 0.6), vec![0, 1]);
    }

    #[test]
    fn serial_exchange_keeps_local_cells() {
        let mut store = InMemoryMesh::new();
        let arrival = planar_grid(
            &mut store,
            2,
            2,
            [0.0, 0.0],
            [1.0, 1.0],
            StructuredCellType::Quadrilateral,
        )
        .unwrap();
        let departure = departure_mesh(&mut store, arrival, |p| [p[0] + 0.05, p[1], p[2]]).unwrap();
        let config = IntxConfig::default();
        let mut exchange = MeshExchange::new(&NoComm, &config);
        assert!(matches!(
            exchange.compute_coverage(&store, departure),
            Err(MeshIntxError::MissingProcessBoxes)
        ));
        let boxes = exchange.build_process_boxes(&store, arrival, departure).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes.max_edges(), 4);
        let coverage = exchange.compute_coverage(&store, departure).unwrap();
        assert_eq!(coverage.total(), 4);
        let covering = exchange.transfer(&mut store, departure, &coverage).unwrap();
        assert_eq!(store.entities(covering, EntityDim::Polygon).unwrap().len(), 4);
        assert!(exchange.remote_cells().is_empty());
        assert!(exchange.return_contributions(&BTreeMap::new()).unwrap().is_empty());
        assert_eq!(exchange.global_sum(2.5).unwrap(), 2.5);

        let polygons = store.num_polygons();
        exchange.release_covering(&mut store, covering).unwrap();
        assert_eq!(store.num_polygons(), polygons);
        assert!(store.entities(covering, EntityDim::Polygon).is_err());
        assert_eq!(store.entities(departure, EntityDim::Polygon).unwrap().len(), 4);
    }
}

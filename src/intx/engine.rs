//! Advancing-front intersection of a blue (departure) mesh with a red
//! (arrival) mesh.
//!
//! Instead of testing every blue cell against every red cell, the engine
//! seeds one overlapping pair, then walks both meshes by adjacency: for each
//! red cell a breadth-first search over blue cells finds all overlaps, and
//! every red edge crossed by an overlap hands its blue cell to the red
//! neighbour across that edge as the starting point of the next search.
//! Crossing points on red edges are shared through an [`EdgeVertexCache`],
//! so the output polygons form a conforming mesh.

use crate::algs::communicator::Communicator;
use crate::algs::covering::{self, ProcessBoxes};
use crate::config::IntxConfig;
use crate::geometry::bbox::BoundingBox;
use crate::geometry::kernel::{self, ConvexClip, MAX_EDGES, MAX_INTX_POINTS, Point2, Tolerance};
use crate::intx::adapter::{self, CellAdapter, CellSetup};
use crate::intx::edge_cache::{EdgeKey, EdgeVertexCache};
use crate::mesh_error::MeshIntxError;
use crate::topology::point::PointId;
use crate::topology::store::{
    BLUE_PARENT_TAG, EntityDim, MeshSet, MeshStore, RED_PARENT_TAG, TagValue,
};
use arrayvec::ArrayVec;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// One output polygon and the pair of cells it came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IntxPolygon {
    pub handle: PointId,
    pub red: PointId,
    pub blue: PointId,
    /// Index of `red` in [`IntxOutput::red_cells`].
    pub red_index: usize,
    /// Index of `blue` in [`IntxOutput::blue_cells`].
    pub blue_index: usize,
}

/// Red cell whose overlaps do not add up to its own area.
#[derive(Clone, Debug, PartialEq)]
pub struct AreaMismatch {
    pub red: PointId,
    pub expected: f64,
    pub recovered: f64,
    pub relative_error: f64,
}

/// Diagnostics of one intersection run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntxReport {
    /// Advancing fronts started (one per connected component reached).
    pub seeds: usize,
    pub pairs_tested: usize,
    pub polygons: usize,
    pub new_vertices: usize,
    /// Overlaps that collapsed below three distinct vertices.
    pub dropped_slivers: usize,
    /// Red cells no blue cell overlaps.
    pub unreached_red: Vec<PointId>,
    pub area_mismatches: Vec<AreaMismatch>,
    /// Seam points moved onto another process's copy.
    pub snapped_points: usize,
}

#[derive(Clone, Debug)]
pub struct IntxOutput {
    pub red_set: MeshSet,
    pub blue_set: MeshSet,
    pub output_set: MeshSet,
    /// Red cells in the order parent indices refer to.
    pub red_cells: Vec<PointId>,
    /// Blue cells in the order parent indices refer to.
    pub blue_cells: Vec<PointId>,
    pub polygons: Vec<IntxPolygon>,
    /// Vertices created on red edges during the run.
    pub created_vertices: Vec<PointId>,
    pub report: IntxReport,
}

/// Overlap of one blue cell with a prepared red cell.
#[derive(Clone, Debug)]
pub struct PairClip {
    pub blue: CellSetup,
    pub clip: ConvexClip,
}

/// The intersection engine.
#[derive(Clone, Debug)]
pub struct Intersector {
    adapter: CellAdapter,
    config: IntxConfig,
    tol: Tolerance,
    polygons_created: usize,
}

impl Intersector {
    pub fn new(adapter: CellAdapter, config: IntxConfig) -> Result<Self, MeshIntxError> {
        config.validate()?;
        let tol = Tolerance::new(config.epsilon);
        Ok(Self {
            adapter,
            config,
            tol,
            polygons_created: 0,
        })
    }

    /// Engine on the sphere of `config.radius`.
    pub fn spherical(config: IntxConfig) -> Result<Self, MeshIntxError> {
        let radius = config.radius;
        Self::new(CellAdapter::Spherical { radius }, config)
    }

    pub fn planar(config: IntxConfig) -> Result<Self, MeshIntxError> {
        Self::new(CellAdapter::Planar, config)
    }

    #[inline]
    pub fn adapter(&self) -> &CellAdapter {
        &self.adapter
    }

    #[inline]
    pub fn config(&self) -> &IntxConfig {
        &self.config
    }

    #[inline]
    pub fn tolerance(&self) -> Tolerance {
        self.tol
    }

    /// Output polygons created over the lifetime of this engine.
    #[inline]
    pub fn polygons_created(&self) -> usize {
        self.polygons_created
    }

    /// Clips `blue` against a prepared red cell. `Ok(None)` when the pair
    /// does not overlap with positive area.
    pub fn pair_clip<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        red: &CellSetup,
        blue: PointId,
        box_check: bool,
    ) -> Result<Option<PairClip>, MeshIntxError> {
        let Some(blue) = self.adapter.setup_in(store, blue, red.projection)? else {
            return Ok(None);
        };
        if box_check {
            let rb = BoundingBox::from_points(&red.coords);
            let bb = BoundingBox::from_points(&blue.coords);
            if !rb.overlaps(&bb, self.config.box_slack) {
                return Ok(None);
            }
        }
        let clip = kernel::clip_convex(&blue.plane_coords, &red.plane_coords, &self.tol)?;
        Ok(clip.has_area(&self.tol).then_some(PairClip { blue, clip }))
    }

    /// Resolves the overlap of one red/blue pair to vertex handles, creating
    /// edge vertices through `cache`. `Ok(None)` when the cells do not
    /// overlap or the overlap degenerates.
    pub fn resolve_pair<S: MeshStore + ?Sized>(
        &self,
        store: &mut S,
        cache: &mut EdgeVertexCache,
        red: PointId,
        blue: PointId,
    ) -> Result<Option<Vec<PointId>>, MeshIntxError> {
        let red = self.adapter.setup(store, red)?;
        let Some(pair) = self.pair_clip(store, &red, blue, false)? else {
            return Ok(None);
        };
        let mut scratch = IntxReport::default();
        let ring = self.resolve_points(store, cache, &red, &pair, &mut scratch)?;
        Ok((ring.len() >= 3).then(|| ring.to_vec()))
    }

    /// Intersects every cell of `blue_set` with every cell of `red_set`,
    /// placing output polygons in `out_set`.
    pub fn intersect_meshes<S: MeshStore + ?Sized>(
        &mut self,
        store: &mut S,
        blue_set: MeshSet,
        red_set: MeshSet,
        out_set: MeshSet,
    ) -> Result<IntxOutput, MeshIntxError> {
        let (output, _cache) = self.run_fronts(store, blue_set, red_set, out_set)?;
        Ok(output)
    }

    /// Distributed variant: `blue_set` is this process's covering set and
    /// `red_set` its local arrival cells. After the local fronts finish,
    /// intersection points on seam edges are reconciled with the processes
    /// whose boxes contain them.
    pub fn intersect_meshes_distributed<S, C>(
        &mut self,
        store: &mut S,
        comm: &C,
        boxes: &ProcessBoxes,
        blue_set: MeshSet,
        red_set: MeshSet,
        out_set: MeshSet,
    ) -> Result<IntxOutput, MeshIntxError>
    where
        S: MeshStore + ?Sized,
        C: Communicator,
    {
        let (mut output, cache) = self.run_fronts(store, blue_set, red_set, out_set)?;
        match covering::reconcile_shared_points(comm, store, &cache, red_set, boxes, &self.config) {
            Ok(snapped) => output.report.snapped_points = snapped,
            Err(e) => {
                self.roll_back(store, &output);
                return Err(e);
            }
        }
        Ok(output)
    }

    /// Removes the polygons of `output` and the vertices created for them,
    /// with their parent tags. The output set itself is left to the caller.
    pub fn discard_output<S: MeshStore + ?Sized>(
        &self,
        store: &mut S,
        output: &IntxOutput,
    ) -> Result<(), MeshIntxError> {
        let mut doomed: Vec<PointId> = output.polygons.iter().map(|p| p.handle).collect();
        doomed.extend_from_slice(&output.created_vertices);
        store.delete_entities(&doomed)
    }

    fn roll_back<S: MeshStore + ?Sized>(&mut self, store: &mut S, output: &IntxOutput) {
        match self.discard_output(store, output) {
            Ok(()) => {
                self.polygons_created = self.polygons_created.saturating_sub(output.polygons.len());
            }
            Err(e) => log::warn!("could not remove partial intersection output: {e}"),
        }
    }

    fn run_fronts<S: MeshStore + ?Sized>(
        &mut self,
        store: &mut S,
        blue_set: MeshSet,
        red_set: MeshSet,
        out_set: MeshSet,
    ) -> Result<(IntxOutput, EdgeVertexCache), MeshIntxError> {
        let red_cells = store.entities(red_set, EntityDim::Polygon)?;
        let blue_cells = store.entities(blue_set, EntityDim::Polygon)?;
        let red_index: HashMap<PointId, usize> =
            red_cells.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        let blue_index: HashMap<PointId, usize> =
            blue_cells.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        store.delete_tag(RED_PARENT_TAG);
        store.delete_tag(BLUE_PARENT_TAG);
        let mut cache = EdgeVertexCache::for_cells(store, &red_cells)?;

        let mut output = IntxOutput {
            red_set,
            blue_set,
            output_set: out_set,
            red_cells,
            blue_cells,
            polygons: Vec::new(),
            created_vertices: Vec::new(),
            report: IntxReport::default(),
        };
        log::debug!(
            "intersecting {} blue cells with {} red cells",
            output.blue_cells.len(),
            output.red_cells.len()
        );

        let advanced = self.advance(store, &mut output, &mut cache, &red_index, &blue_index);
        output.created_vertices = cache.created_vertices().to_vec();
        if let Err(e) = advanced {
            self.roll_back(store, &output);
            return Err(e);
        }

        output.report.polygons = output.polygons.len();
        log::debug!(
            "intersection produced {} polygons, {} new vertices, {} seeds",
            output.report.polygons,
            output.report.new_vertices,
            output.report.seeds
        );
        Ok((output, cache))
    }

    /// Runs fronts until every red cell is processed or no seed remains.
    fn advance<S: MeshStore + ?Sized>(
        &mut self,
        store: &mut S,
        output: &mut IntxOutput,
        cache: &mut EdgeVertexCache,
        red_index: &HashMap<PointId, usize>,
        blue_index: &HashMap<PointId, usize>,
    ) -> Result<(), MeshIntxError> {
        let (red_set, blue_set) = (output.red_set, output.blue_set);

        let mut used = vec![false; output.red_cells.len()];
        let mut remaining: BTreeSet<usize> = (0..output.red_cells.len()).collect();
        let mut red_queue: VecDeque<usize> = VecDeque::new();
        let mut blue_queue: VecDeque<PointId> = VecDeque::new();

        while !remaining.is_empty() {
            let Some((seed_red, seed_blue)) = self.find_seed(store, output, &remaining)? else {
                output.report.unreached_red =
                    remaining.iter().map(|&r| output.red_cells[r]).collect();
                log::warn!(
                    "{} red cells are not overlapped by any blue cell",
                    output.report.unreached_red.len()
                );
                break;
            };
            output.report.seeds += 1;
            used[seed_red] = true;
            red_queue.push_back(seed_red);
            blue_queue.push_back(seed_blue);

            while let Some(r) = red_queue.pop_front() {
                let Some(start) = blue_queue.pop_front() else {
                    break;
                };
                let red_cell = output.red_cells[r];
                let red = self.adapter.setup(store, red_cell)?;
                let sides = red.sides();

                let mut neighbors = adapter::neighbors_of(store, red_set, red_cell, &red.vertices)?;
                for nb in neighbors.iter_mut() {
                    if nb.is_some_and(|c| red_index.get(&c).is_none_or(|&i| used[i])) {
                        *nb = None;
                    }
                }
                let mut handoff: [Vec<PointId>; MAX_EDGES] = Default::default();

                let mut visited: HashSet<PointId> = HashSet::from([start]);
                let mut local: VecDeque<PointId> = VecDeque::from([start]);
                let mut recovered = 0.0;
                while let Some(b) = local.pop_front() {
                    output.report.pairs_tested += 1;
                    let Some(pair) = self.pair_clip(store, &red, b, false)? else {
                        log::trace!("red {red_cell} / blue {b}: no overlap");
                        continue;
                    };
                    log::trace!("red {red_cell} / blue {b}: area {:e}", pair.clip.area);
                    let blue_neighbors =
                        adapter::neighbors_of(store, blue_set, b, &pair.blue.vertices)?;
                    for (i, nb) in blue_neighbors.iter().enumerate() {
                        if let Some(c) = nb {
                            if pair.clip.mark_blue[i] && visited.insert(*c) {
                                local.push_back(*c);
                            }
                        }
                    }
                    for j in 0..sides {
                        if pair.clip.mark_red[j] && neighbors[j].is_some() && !handoff[j].contains(&b)
                        {
                            handoff[j].push(b);
                        }
                    }
                    recovered += pair.clip.area;

                    let ring = self.resolve_points(store, cache, &red, &pair, &mut output.report)?;
                    if ring.len() < 3 {
                        output.report.dropped_slivers += 1;
                        continue;
                    }
                    let blue_idx = blue_index
                        .get(&b)
                        .copied()
                        .ok_or(MeshIntxError::MissingEntity(b))?;
                    self.emit_polygon(store, &ring, r, blue_idx, output)?;
                }

                if red.area > 0.0 {
                    let relative_error = (recovered - red.area).abs() / red.area;
                    if relative_error > self.config.area_tolerance {
                        log::warn!(
                            "red cell {red_cell}: recovered area {recovered:e} vs {:e} (relative error {relative_error:e})",
                            red.area
                        );
                        output.report.area_mismatches.push(AreaMismatch {
                            red: red_cell,
                            expected: red.area,
                            recovered,
                            relative_error,
                        });
                    }
                }
                remaining.remove(&r);

                for j in 0..sides {
                    let Some(next) = neighbors[j] else {
                        continue;
                    };
                    let Some(&ni) = red_index.get(&next) else {
                        continue;
                    };
                    if used[ni] || handoff[j].is_empty() {
                        continue;
                    }
                    let next_red = self.adapter.setup(store, next)?;
                    if let Some(cand) =
                        self.hand_off(store, &next_red, &handoff[j], blue_set, &mut output.report)?
                    {
                        used[ni] = true;
                        red_queue.push_back(ni);
                        blue_queue.push_back(cand);
                    }
                }
            }
        }
        Ok(())
    }

    /// First of `candidates` overlapping `red`, else the first blue cell
    /// across a candidate's edge that does. The second pass catches blue
    /// cells that only touch the red edge they were recorded on, as happens
    /// when the two meshes coincide.
    fn hand_off<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        red: &CellSetup,
        candidates: &[PointId],
        blue_set: MeshSet,
        report: &mut IntxReport,
    ) -> Result<Option<PointId>, MeshIntxError> {
        for &cand in candidates {
            report.pairs_tested += 1;
            if self.pair_clip(store, red, cand, false)?.is_some() {
                return Ok(Some(cand));
            }
        }
        let mut tried: HashSet<PointId> = candidates.iter().copied().collect();
        for &cand in candidates {
            let ring = adapter::collapse_padding(cand, store.connectivity(cand)?)?;
            for nb in adapter::neighbors_of(store, blue_set, cand, &ring)?.into_iter().flatten() {
                if !tried.insert(nb) {
                    continue;
                }
                report.pairs_tested += 1;
                if self.pair_clip(store, red, nb, true)?.is_some() {
                    return Ok(Some(nb));
                }
            }
        }
        Ok(None)
    }

    /// First overlapping pair in blue-major order among red cells not yet
    /// processed.
    fn find_seed<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        output: &IntxOutput,
        remaining: &BTreeSet<usize>,
    ) -> Result<Option<(usize, PointId)>, MeshIntxError> {
        let mut prepared: HashMap<usize, CellSetup> = HashMap::new();
        for &b in &output.blue_cells {
            for &r in remaining {
                if !prepared.contains_key(&r) {
                    let s = self.adapter.setup(store, output.red_cells[r])?;
                    prepared.insert(r, s);
                }
                let red = &prepared[&r];
                if self
                    .pair_clip(store, red, b, self.config.seed_box_check)?
                    .is_some()
                {
                    return Ok(Some((r, b)));
                }
            }
        }
        Ok(None)
    }

    /// Maps every clip point to a vertex handle: an existing red vertex,
    /// then an existing blue vertex, then a point on a red edge shared
    /// through `cache`.
    fn resolve_points<S: MeshStore + ?Sized>(
        &self,
        store: &mut S,
        cache: &mut EdgeVertexCache,
        red: &CellSetup,
        pair: &PairClip,
        report: &mut IntxReport,
    ) -> Result<ArrayVec<PointId, MAX_INTX_POINTS>, MeshIntxError> {
        let eps = self.tol.epsilon;
        let eps2 = eps * eps;
        let blue = &pair.blue;
        let mut ring = ArrayVec::<PointId, MAX_INTX_POINTS>::new();
        for &q in &pair.clip.points {
            let handle = if let Some(k) = nearest_within(&red.plane_coords, q, eps2) {
                red.vertices[k]
            } else if let Some(k) = nearest_within(&blue.plane_coords, q, eps2) {
                blue.vertices[k]
            } else {
                let n = red.sides();
                let Some(j) = (0..n).find(|&j| {
                    on_segment(red.plane_coords[j], red.plane_coords[(j + 1) % n], q, eps)
                }) else {
                    return Err(MeshIntxError::UnresolvedIntersectionPoint {
                        red: red.cell,
                        blue: blue.cell,
                        x: q[0],
                        y: q[1],
                    });
                };
                let (a, b) = red.edge(j);
                let position = self.adapter.unproject(red.projection, q);
                let (v, created) = cache.find_or_create(store, EdgeKey::new(a, b), position, eps)?;
                if created {
                    report.new_vertices += 1;
                }
                v
            };
            if ring.last() != Some(&handle) {
                ring.push(handle);
            }
        }
        while ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        Ok(ring)
    }

    fn emit_polygon<S: MeshStore + ?Sized>(
        &mut self,
        store: &mut S,
        ring: &[PointId],
        red_index: usize,
        blue_index: usize,
        output: &mut IntxOutput,
    ) -> Result<(), MeshIntxError> {
        let handle = store.create_polygon(ring)?;
        store.add_to_set(output.output_set, handle)?;
        store.set_tag(RED_PARENT_TAG, handle, TagValue::Int(red_index as i64))?;
        store.set_tag(BLUE_PARENT_TAG, handle, TagValue::Int(blue_index as i64))?;
        output.polygons.push(IntxPolygon {
            handle,
            red: output.red_cells[red_index],
            blue: output.blue_cells[blue_index],
            red_index,
            blue_index,
        });
        self.polygons_created += 1;
        Ok(())
    }
}

fn nearest_within(points: &[Point2], q: Point2, eps2: f64) -> Option<usize> {
    points
        .iter()
        .map(|p| (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2))
        .enumerate()
        .filter(|(_, d2)| *d2 <= eps2)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, _)| k)
}

/// True if `q` is within `eps` of the segment `a`–`b`.
fn on_segment(a: Point2, b: Point2, q: Point2, eps: f64) -> bool {
    let d = [b[0] - a[0], b[1] - a[1]];
    let len2 = d[0] * d[0] + d[1] * d[1];
    if len2 == 0.0 {
        return false;
    }
    let w = [q[0] - a[0], q[1] - a[1]];
    let len = len2.sqrt();
    let along = (w[0] * d[0] + w[1] * d[1]) / len;
    let across = (w[0] * d[1] - w[1] * d[0]).abs() / len;
    across <= eps && along >= -eps && along <= len + eps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::store::{InMemoryMesh, MeshStoreExt};
    use approx::assert_relative_eq;

    fn quad_mesh(store: &mut InMemoryMesh, x0: f64, y0: f64, n: usize, h: f64) -> MeshSet {
        let set = store.create_set();
        let mut ids = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                ids.push(store.create_vertex([x0 + i as f64 * h, y0 + j as f64 * h, 0.0]));
            }
        }
        for j in 0..n {
            for i in 0..n {
                let k = j * (n + 1) + i;
                let c = store
                    .create_polygon(&[ids[k], ids[k + 1], ids[k + n + 2], ids[k + n + 1]])
                    .unwrap();
                store.add_to_set(set, c).unwrap();
            }
        }
        set
    }

    #[test]
    fn segment_tolerance() {
        assert!(on_segment([0.0, 0.0], [1.0, 0.0], [0.5, 1e-12], 1e-10));
        assert!(!on_segment([0.0, 0.0], [1.0, 0.0], [0.5, 1e-6], 1e-10));
        assert!(!on_segment([0.0, 0.0], [1.0, 0.0], [1.5, 0.0], 1e-10));
        assert!(!on_segment([0.0, 0.0], [0.0, 0.0], [0.0, 0.0], 1e-10));
    }

    #[test]
    fn shifted_grid_tiles_the_overlap() {
        let mut store = InMemoryMesh::new();
        let red = quad_mesh(&mut store, 0.0, 0.0, 3, 1.0 / 3.0);
        let blue = quad_mesh(&mut store, 0.1, 0.05, 3, 1.0 / 3.0);
        let out = store.create_set();
        let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
        let result = engine.intersect_meshes(&mut store, blue, red, out).unwrap();

        let adapter = CellAdapter::Planar;
        let total: f64 = result
            .polygons
            .iter()
            .map(|p| adapter.cell_area(&store, p.handle).unwrap())
            .sum();
        assert_relative_eq!(total, 0.9 * 0.95, max_relative = 1e-12);
        assert_eq!(result.report.seeds, 1);
        assert!(result.report.unreached_red.is_empty());
        for p in &result.polygons {
            assert_eq!(store.int_tag(RED_PARENT_TAG, p.handle).unwrap(), p.red_index as i64);
            assert_eq!(result.red_cells[p.red_index], p.red);
        }
        assert_eq!(engine.polygons_created(), result.polygons.len());
    }

    #[test]
    fn coincident_grids_need_one_seed() {
        let mut store = InMemoryMesh::new();
        let red = quad_mesh(&mut store, 0.0, 0.0, 6, 1.0 / 6.0);
        let blue = quad_mesh(&mut store, 0.0, 0.0, 6, 1.0 / 6.0);
        let out = store.create_set();
        let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
        let result = engine.intersect_meshes(&mut store, blue, red, out).unwrap();
        assert_eq!(result.report.seeds, 1);
        assert_eq!(result.polygons.len(), 36);
        assert!(result.created_vertices.is_empty());
        assert!(result.report.unreached_red.is_empty());
        for p in &result.polygons {
            assert_eq!(p.red_index, p.blue_index);
        }
    }

    #[test]
    fn discarded_output_leaves_the_inputs() {
        let mut store = InMemoryMesh::new();
        let red = quad_mesh(&mut store, 0.0, 0.0, 3, 1.0 / 3.0);
        let blue = quad_mesh(&mut store, 0.1, 0.05, 3, 1.0 / 3.0);
        let (polygons, vertices) = (store.num_polygons(), store.num_vertices());
        let out = store.create_set();
        let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
        let result = engine.intersect_meshes(&mut store, blue, red, out).unwrap();
        assert_eq!(result.created_vertices.len(), result.report.new_vertices);
        assert!(store.num_vertices() > vertices);

        engine.discard_output(&mut store, &result).unwrap();
        assert_eq!(store.num_polygons(), polygons);
        assert_eq!(store.num_vertices(), vertices);
        assert!(store.entities(out, EntityDim::Polygon).unwrap().is_empty());
        assert!(store.tag(RED_PARENT_TAG, result.polygons[0].handle).is_none());
    }
}

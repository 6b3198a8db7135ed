use approx::assert_relative_eq;
use mesh_intx::algs::communicator::{Communicator, ThreadComm};
use mesh_intx::algs::covering::{MeshExchange, ProcessBoxes, reconcile_shared_points};
use mesh_intx::algs::meshgen::cubed_sphere;
use mesh_intx::config::IntxConfig;
use mesh_intx::geometry::bbox::BoundingBox;
use mesh_intx::intx::{CellAdapter, EdgeKey, EdgeVertexCache, Intersector};
use mesh_intx::remap::flows::DEFAULT_PERIOD;
use mesh_intx::remap::{SemiLagrangian, TracerField, VelocityField, initialize_tracer};
use mesh_intx::topology::store::{
    EntityDim, GLOBAL_ID_TAG, InMemoryMesh, MeshSet, MeshStore, MeshStoreExt, TagValue,
};
use std::collections::BTreeMap;

const N: usize = 4;
const TRACER: &str = "tracer";
const STEPS: usize = 2;

fn rotation() -> VelocityField {
    VelocityField::SolidBody {
        axis: [0.4, 0.1, 1.0],
        angular_speed: std::f64::consts::TAU / DEFAULT_PERIOD,
    }
}

fn time_step() -> f64 {
    DEFAULT_PERIOD / 24.0
}

/// Full sphere in `store`, with the cells of `part` (by global ID, in
/// `parts` contiguous blocks) collected into the returned set.
fn partitioned_sphere(store: &mut InMemoryMesh, part: usize, parts: usize) -> MeshSet {
    let all = cubed_sphere(store, N, 1.0).unwrap();
    let cells = store.entities(all, EntityDim::Polygon).unwrap();
    let per = cells.len().div_ceil(parts);
    let set = store.create_set();
    for c in cells {
        let gid = store.int_tag(GLOBAL_ID_TAG, c).unwrap() as usize;
        if (gid - 1) / per == part {
            store.add_to_set(set, c).unwrap();
        }
    }
    set
}

fn values_by_gid(store: &InMemoryMesh, set: MeshSet) -> BTreeMap<i64, f64> {
    store
        .entities(set, EntityDim::Polygon)
        .unwrap()
        .into_iter()
        .map(|c| {
            (
                store.int_tag(GLOBAL_ID_TAG, c).unwrap(),
                store.real_tag(TRACER, c).unwrap(),
            )
        })
        .collect()
}

fn serial_run() -> (Vec<(f64, f64)>, BTreeMap<i64, f64>) {
    let mut store = InMemoryMesh::new();
    let set = partitioned_sphere(&mut store, 0, 1);
    let adapter = CellAdapter::Spherical { radius: 1.0 };
    initialize_tracer(&mut store, &adapter, set, TracerField::CosineBells, TRACER).unwrap();
    let mut sl = SemiLagrangian::new(Intersector::spherical(IntxConfig::for_radius(1.0)).unwrap(), TRACER);
    let (flow, dt) = (rotation(), time_step());
    let masses = (0..STEPS)
        .map(|s| {
            let t = (s + 1) as f64 * dt;
            let r = sl.step(&mut store, set, |p| flow.departure_point(p, t, dt, 1.0)).unwrap();
            (r.mass_before, r.mass_after)
        })
        .collect();
    (masses, values_by_gid(&store, set))
}

#[test]
fn two_ranks_match_the_serial_step() {
    let (serial_masses, serial_values) = serial_run();
    let comms = ThreadComm::universe(2);
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let config = IntxConfig::for_radius(1.0);
                    let mut store = InMemoryMesh::new();
                    let set = partitioned_sphere(&mut store, comm.rank(), comm.size());
                    let adapter = CellAdapter::Spherical { radius: 1.0 };
                    initialize_tracer(&mut store, &adapter, set, TracerField::CosineBells, TRACER)
                        .unwrap();
                    let mut exchange = MeshExchange::new(comm, &config);
                    let mut sl = SemiLagrangian::new(Intersector::spherical(config).unwrap(), TRACER);
                    let (flow, dt) = (rotation(), time_step());
                    let mut masses = Vec::new();
                    for step in 0..STEPS {
                        let t = (step + 1) as f64 * dt;
                        let r = sl
                            .step_distributed(&mut store, &mut exchange, set, |p| {
                                flow.departure_point(p, t, dt, 1.0)
                            })
                            .unwrap();
                        assert!(r.intx.unreached_red.is_empty());
                        masses.push((r.mass_before, r.mass_after));
                    }
                    (masses, values_by_gid(&store, set))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut merged = BTreeMap::new();
    for (masses, values) in &results {
        for ((before, after), (serial_before, serial_after)) in masses.iter().zip(&serial_masses) {
            assert_relative_eq!(*before, *serial_before, max_relative = 1e-10);
            assert_relative_eq!(*after, *serial_after, max_relative = 1e-10);
            assert_relative_eq!(*after, *before, max_relative = 1e-10);
        }
        merged.extend(values.iter().map(|(g, v)| (*g, *v)));
    }
    assert_eq!(merged.len(), 6 * N * N);
    for (gid, value) in &serial_values {
        assert_relative_eq!(merged[gid], *value, epsilon = 1e-10, max_relative = 1e-9);
    }
}

/// Unit square of rank `rank` along x, counterclockwise. Both ranks give
/// the seam vertices (1,0) and (1,1) global IDs 2 and 3.
fn seam_square(store: &mut InMemoryMesh, rank: usize) -> (MeshSet, EdgeKey) {
    let corners: [([f64; 3], i64); 4] = if rank == 0 {
        [([0.0, 0.0, 0.0], 1), ([1.0, 0.0, 0.0], 2), ([1.0, 1.0, 0.0], 3), ([0.0, 1.0, 0.0], 4)]
    } else {
        [([1.0, 0.0, 0.0], 2), ([2.0, 0.0, 0.0], 5), ([2.0, 1.0, 0.0], 6), ([1.0, 1.0, 0.0], 3)]
    };
    let mut seam = Vec::new();
    let mut ring = Vec::new();
    for (p, gid) in corners {
        let v = store.create_vertex(p);
        store.set_tag(GLOBAL_ID_TAG, v, TagValue::Int(gid)).unwrap();
        if gid == 2 || gid == 3 {
            seam.push(v);
        }
        ring.push(v);
    }
    let cell = store.create_polygon(&ring).unwrap();
    let set = store.create_set();
    store.add_to_set(set, cell).unwrap();
    (set, EdgeKey::new(seam[0], seam[1]))
}

#[test]
fn seam_points_snap_to_the_lower_rank() {
    let comms = ThreadComm::universe(2);
    let boxes = ProcessBoxes::from_boxes(
        vec![
            BoundingBox::from_points(&[[0.0, 0.0, 0.0], [1.0, 1.0, 0.0]]),
            BoundingBox::from_points(&[[1.0, 0.0, 0.0], [2.0, 1.0, 0.0]]),
        ],
        4,
    );
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                let boxes = &boxes;
                s.spawn(move || {
                    let config = IntxConfig::default();
                    let mut store = InMemoryMesh::new();
                    let (set, seam) = seam_square(&mut store, comm.rank());
                    let cells = store.entities(set, EntityDim::Polygon).unwrap();
                    let mut cache = EdgeVertexCache::for_cells(&store, &cells).unwrap();
                    let nudge = if comm.rank() == 0 { 0.0 } else { 1e-9 };
                    let (v, _) = cache
                        .find_or_create(&mut store, seam, [1.0, 0.5 + nudge, 0.0], 1e-12)
                        .unwrap();
                    let snapped =
                        reconcile_shared_points(comm, &mut store, &cache, set, boxes, &config).unwrap();
                    (snapped, store.coords(v).unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results[0].0, 0);
    assert_eq!(results[1].0, 1);
    assert_eq!(results[0].1, [1.0, 0.5, 0.0]);
    for (a, b) in results[0].1.iter().zip(&results[1].1) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

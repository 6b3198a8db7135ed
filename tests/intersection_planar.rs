use approx::assert_relative_eq;
use mesh_intx::algs::meshgen::{StructuredCellType, planar_grid};
use mesh_intx::config::IntxConfig;
use mesh_intx::intx::{CellAdapter, EdgeVertexCache, Intersector};
use mesh_intx::mesh_error::MeshIntxError;
use mesh_intx::topology::store::{
    EntityDim, InMemoryMesh, MeshSet, MeshStore, MeshStoreExt, RED_PARENT_TAG,
};

fn unit_square(store: &mut InMemoryMesh, x0: f64, y0: f64) -> MeshSet {
    planar_grid(
        store,
        1,
        1,
        [x0, y0],
        [x0 + 1.0, y0 + 1.0],
        StructuredCellType::Quadrilateral,
    )
    .unwrap()
}

fn output_area(store: &InMemoryMesh, set: MeshSet) -> f64 {
    store
        .entities(set, EntityDim::Polygon)
        .unwrap()
        .iter()
        .map(|c| CellAdapter::Planar.cell_area(store, *c).unwrap())
        .sum()
}

#[test]
fn offset_squares_overlap_in_a_quarter() {
    let mut store = InMemoryMesh::new();
    let red = unit_square(&mut store, 0.0, 0.0);
    let blue = unit_square(&mut store, 0.5, 0.5);
    let out = store.create_set();
    let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
    let output = engine.intersect_meshes(&mut store, blue, red, out).unwrap();

    assert_eq!(output.polygons.len(), 1);
    assert_eq!(output.report.seeds, 1);
    // (1, 0.5) and (0.5, 1) lie on red edges; the other two corners are
    // existing vertices
    assert_eq!(output.report.new_vertices, 2);
    assert_eq!(store.connectivity(output.polygons[0].handle).unwrap().len(), 4);
    assert_relative_eq!(output_area(&store, out), 0.25, max_relative = 1e-14);
}

#[test]
fn triangles_over_quads_tile_the_square() {
    let mut store = InMemoryMesh::new();
    let red = planar_grid(&mut store, 5, 4, [0.0, 0.0], [1.0, 1.0], StructuredCellType::Quadrilateral)
        .unwrap();
    let blue = planar_grid(&mut store, 7, 6, [-0.07, -0.03], [1.06, 1.09], StructuredCellType::Triangle)
        .unwrap();
    let out = store.create_set();
    let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
    let output = engine.intersect_meshes(&mut store, blue, red, out).unwrap();

    assert!(output.report.unreached_red.is_empty());
    assert!(output.report.area_mismatches.is_empty());
    assert_eq!(output.report.seeds, 1);
    assert_relative_eq!(output_area(&store, out), 1.0, max_relative = 1e-12);

    for poly in &output.polygons {
        let tagged = store.int_tag(RED_PARENT_TAG, poly.handle).unwrap();
        assert_eq!(output.red_cells[tagged as usize], poly.red);
    }
    let mut per_red = vec![0.0; output.red_cells.len()];
    for poly in &output.polygons {
        per_red[poly.red_index] += CellAdapter::Planar.cell_area(&store, poly.handle).unwrap();
    }
    for area in per_red {
        assert_relative_eq!(area, 0.05, max_relative = 1e-12);
    }
}

#[test]
fn uncovered_red_cells_are_reported() {
    let mut store = InMemoryMesh::new();
    let red = planar_grid(&mut store, 4, 1, [0.0, 0.0], [4.0, 1.0], StructuredCellType::Quadrilateral)
        .unwrap();
    let blue = planar_grid(&mut store, 1, 1, [0.0, -0.5], [1.5, 1.5], StructuredCellType::Quadrilateral)
        .unwrap();
    let out = store.create_set();
    let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
    let output = engine.intersect_meshes(&mut store, blue, red, out).unwrap();

    assert_eq!(output.polygons.len(), 2);
    assert_eq!(output.report.unreached_red, output.red_cells[2..].to_vec());
    assert_eq!(output.report.area_mismatches.len(), 1);
    let mismatch = &output.report.area_mismatches[0];
    assert_eq!(mismatch.red, output.red_cells[1]);
    assert_relative_eq!(mismatch.recovered, 0.5, max_relative = 1e-14);
}

#[test]
fn resolving_a_pair_twice_reuses_vertices() {
    let mut store = InMemoryMesh::new();
    let red = unit_square(&mut store, 0.0, 0.0);
    let blue = unit_square(&mut store, 0.25, -0.5);
    let r = store.entities(red, EntityDim::Polygon).unwrap()[0];
    let b = store.entities(blue, EntityDim::Polygon).unwrap()[0];
    let engine = Intersector::planar(IntxConfig::default()).unwrap();
    let mut cache = EdgeVertexCache::for_cells(&store, &[r]).unwrap();

    let first = engine.resolve_pair(&mut store, &mut cache, r, b).unwrap().unwrap();
    let vertices = store.num_vertices();
    let second = engine.resolve_pair(&mut store, &mut cache, r, b).unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(store.num_vertices(), vertices);
    assert_eq!(cache.created(), 2);
}

#[test]
fn disjoint_pair_resolves_to_nothing() {
    let mut store = InMemoryMesh::new();
    let red = unit_square(&mut store, 0.0, 0.0);
    let blue = unit_square(&mut store, 3.0, 0.0);
    let r = store.entities(red, EntityDim::Polygon).unwrap()[0];
    let b = store.entities(blue, EntityDim::Polygon).unwrap()[0];
    let engine = Intersector::planar(IntxConfig::default()).unwrap();
    let mut cache = EdgeVertexCache::new();
    assert_eq!(engine.resolve_pair(&mut store, &mut cache, r, b).unwrap(), None);
}

#[test]
fn three_cells_on_one_edge_are_rejected() {
    let mut store = InMemoryMesh::new();
    let a = store.create_vertex([0.0, 0.0, 0.0]);
    let b = store.create_vertex([1.0, 0.0, 0.0]);
    let above = store.create_vertex([0.5, 1.0, 0.0]);
    let below = store.create_vertex([0.5, -1.0, 0.0]);
    let inner = store.create_vertex([0.5, 0.5, 0.0]);
    let red = store.create_set();
    for ring in [[a, b, above], [b, a, below], [a, b, inner]] {
        let c = store.create_polygon(&ring).unwrap();
        store.add_to_set(red, c).unwrap();
    }
    let blue = planar_grid(&mut store, 1, 1, [-1.0, -2.0], [2.0, 2.0], StructuredCellType::Quadrilateral)
        .unwrap();
    let out = store.create_set();
    let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
    let err = engine.intersect_meshes(&mut store, blue, red, out).unwrap_err();
    assert!(matches!(err, MeshIntxError::NonManifoldEdge { count: 3, .. }), "{err:?}");
}

#[test]
fn failed_run_leaves_no_partial_output() {
    let mut store = InMemoryMesh::new();
    let red = planar_grid(&mut store, 3, 3, [0.0, 0.0], [3.0, 3.0], StructuredCellType::Quadrilateral)
        .unwrap();
    let corner = |store: &InMemoryMesh, x: f64, y: f64| {
        store
            .entities(red, EntityDim::Vertex)
            .unwrap()
            .into_iter()
            .find(|v| {
                let p = store.coords(*v).unwrap();
                (p[0] - x).abs() < 1e-12 && (p[1] - y).abs() < 1e-12
            })
            .unwrap()
    };
    let (left, right) = (corner(&store, 2.0, 3.0), corner(&store, 3.0, 3.0));
    // two triangles stacked on the top edge of the last grid cell
    for apex in [[2.5, 3.5, 0.0], [2.5, 3.8, 0.0]] {
        let tip = store.create_vertex(apex);
        let c = store.create_polygon(&[left, right, tip]).unwrap();
        store.add_to_set(red, c).unwrap();
    }
    let blue = planar_grid(&mut store, 1, 1, [-1.0, -1.0], [4.0, 5.0], StructuredCellType::Quadrilateral)
        .unwrap();
    let (polygons, vertices) = (store.num_polygons(), store.num_vertices());

    let out = store.create_set();
    let mut engine = Intersector::planar(IntxConfig::default()).unwrap();
    let err = engine.intersect_meshes(&mut store, blue, red, out).unwrap_err();
    assert!(matches!(err, MeshIntxError::NonManifoldEdge { count: 3, .. }), "{err:?}");
    assert!(store.entities(out, EntityDim::Polygon).unwrap().is_empty());
    assert_eq!(store.num_polygons(), polygons);
    assert_eq!(store.num_vertices(), vertices);
    assert_eq!(engine.polygons_created(), 0);
}

#[test]
fn invalid_epsilon_is_rejected() {
    let config = IntxConfig {
        epsilon: 0.0,
        ..IntxConfig::default()
    };
    assert!(matches!(
        Intersector::planar(config),
        Err(MeshIntxError::InvalidConfig(_))
    ));
}

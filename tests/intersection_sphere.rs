use approx::assert_relative_eq;
use mesh_intx::algs::meshgen::cubed_sphere;
use mesh_intx::config::IntxConfig;
use mesh_intx::geometry::spherical::{Vec3, add, cross, dot, norm, scale, to_radius};
use mesh_intx::intx::{CellAdapter, Intersector};
use mesh_intx::topology::store::{EntityDim, InMemoryMesh, MeshSet, MeshStore};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

fn rotate(p: Vec3, axis: Vec3, angle: f64) -> Vec3 {
    let k = to_radius(axis, 1.0);
    let (s, c) = angle.sin_cos();
    add(add(scale(p, c), scale(cross(k, p), s)), scale(k, dot(k, p) * (1.0 - c)))
}

fn rotate_set(store: &mut InMemoryMesh, set: MeshSet, axis: Vec3, angle: f64) {
    for v in store.entities(set, EntityDim::Vertex).unwrap() {
        let p = store.coords(v).unwrap();
        store.set_coords(v, rotate(p, axis, angle)).unwrap();
    }
}

#[test]
fn rotated_cubed_spheres_tile_the_sphere() {
    let radius = 2.0;
    let mut store = InMemoryMesh::new();
    let red = cubed_sphere(&mut store, 6, radius).unwrap();
    let blue = cubed_sphere(&mut store, 5, radius).unwrap();
    rotate_set(&mut store, blue, [0.3, -0.5, 0.8], 0.37);
    let out = store.create_set();

    let mut engine = Intersector::spherical(IntxConfig::for_radius(radius)).unwrap();
    let output = engine.intersect_meshes(&mut store, blue, red, out).unwrap();

    assert!(output.report.unreached_red.is_empty());
    assert!(output.report.area_mismatches.is_empty(), "{:?}", output.report.area_mismatches);
    assert_eq!(output.report.seeds, 1);
    assert!(output.polygons.len() >= 216);

    let adapter = CellAdapter::Spherical { radius };
    let mut total = 0.0;
    for poly in &output.polygons {
        for v in store.connectivity(poly.handle).unwrap() {
            assert_relative_eq!(norm(store.coords(*v).unwrap()), radius, max_relative = 1e-12);
        }
        total += adapter.cell_area(&store, poly.handle).unwrap();
    }
    assert_relative_eq!(total, 4.0 * PI * radius * radius, max_relative = 1e-9);
}

#[test]
fn every_blue_cell_is_fully_distributed() {
    let mut rng = SmallRng::seed_from_u64(7);
    let adapter = CellAdapter::Spherical { radius: 1.0 };
    for _ in 0..3 {
        let mut store = InMemoryMesh::new();
        let red = cubed_sphere(&mut store, 4, 1.0).unwrap();
        let blue = cubed_sphere(&mut store, 3, 1.0).unwrap();
        let axis = [
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(0.2..1.0),
        ];
        rotate_set(&mut store, blue, axis, rng.gen_range(0.05..0.6));
        let out = store.create_set();
        let mut engine = Intersector::spherical(IntxConfig::for_radius(1.0)).unwrap();
        let output = engine.intersect_meshes(&mut store, blue, red, out).unwrap();

        let mut per_blue = vec![0.0; output.blue_cells.len()];
        for poly in &output.polygons {
            per_blue[poly.blue_index] += adapter.cell_area(&store, poly.handle).unwrap();
        }
        for (b, area) in output.blue_cells.iter().zip(per_blue) {
            assert_relative_eq!(area, adapter.cell_area(&store, *b).unwrap(), max_relative = 1e-9);
        }
    }
}

use mesh_intx::algs::meshgen::cubed_sphere;
use mesh_intx::config::IntxConfig;
use mesh_intx::intx::{CellAdapter, Intersector};
use mesh_intx::remap::flows::DEFAULT_PERIOD;
use mesh_intx::remap::{
    Reconstruction, SemiLagrangian, TracerField, VelocityField, initialize_tracer,
};
use mesh_intx::topology::store::{EntityDim, InMemoryMesh, MeshSet, MeshStore, MeshStoreExt};
use std::f64::consts::TAU;

const TRACER: &str = "tracer";

fn setup(n: usize, radius: f64, field: TracerField) -> (InMemoryMesh, MeshSet, SemiLagrangian) {
    let mut store = InMemoryMesh::new();
    let set = cubed_sphere(&mut store, n, radius).unwrap();
    let adapter = CellAdapter::Spherical { radius };
    initialize_tracer(&mut store, &adapter, set, field, TRACER).unwrap();
    let engine = Intersector::spherical(IntxConfig::for_radius(radius)).unwrap();
    (store, set, SemiLagrangian::new(engine, TRACER))
}

#[test]
fn solid_body_rotation_conserves_mass_and_bounds() {
    let radius = 1.0;
    let (mut store, set, mut sl) = setup(6, radius, TracerField::CosineBells);
    let flow = VelocityField::SolidBody {
        axis: [0.2, -0.3, 1.0],
        angular_speed: TAU / DEFAULT_PERIOD,
    };
    let dt = DEFAULT_PERIOD / 30.0;
    let mut bounds = None;
    for step in 0..3 {
        let t = (step + 1) as f64 * dt;
        let report = sl
            .step(&mut store, set, |p| flow.departure_point(p, t, dt, radius))
            .unwrap();
        assert!(report.intx.unreached_red.is_empty());
        assert!(
            report.relative_mass_change() < 1e-10,
            "step {step}: {} -> {}",
            report.mass_before,
            report.mass_after
        );
        let (lo, hi) = *bounds.get_or_insert(report.range_before);
        assert!(report.range_after.0 >= lo - 1e-12, "{:?}", report.range_after);
        assert!(report.range_after.1 <= hi + 1e-12, "{:?}", report.range_after);
    }
}

#[test]
fn deformational_flow_conserves_mass() {
    let radius = 1.0;
    let (mut store, set, mut sl) = setup(6, radius, TracerField::GaussianHills);
    let flow = VelocityField::CaseOne { period: DEFAULT_PERIOD };
    let dt = DEFAULT_PERIOD / 40.0;
    for step in 0..2 {
        let t = (step + 1) as f64 * dt;
        let report = sl
            .step(&mut store, set, |p| flow.departure_point(p, t, dt, radius))
            .unwrap();
        assert!(report.relative_mass_change() < 1e-10, "{report:?}");
        assert!(report.intx.area_mismatches.is_empty());
    }
}

#[test]
fn linear_reconstruction_conserves_mass() {
    let radius = 1.0;
    let (mut store, set, sl) = setup(6, radius, TracerField::CosineBells);
    let mut sl = sl.with_reconstruction(Reconstruction::PiecewiseLinear);
    let flow = VelocityField::solid_body(DEFAULT_PERIOD);
    let dt = DEFAULT_PERIOD / 30.0;
    for step in 0..3 {
        let t = (step + 1) as f64 * dt;
        let report = sl
            .step(&mut store, set, |p| flow.departure_point(p, t, dt, radius))
            .unwrap();
        assert!(report.mass_after.is_finite());
        assert!(report.relative_mass_change() < 1e-11, "step {step}: {report:?}");
    }
}

fn l1_distance(store: &InMemoryMesh, set: MeshSet, reference: &[f64]) -> f64 {
    let adapter = CellAdapter::Spherical { radius: 1.0 };
    let cells = store.entities(set, EntityDim::Polygon).unwrap();
    let (mut diff, mut norm) = (0.0, 0.0);
    for (c, q0) in cells.iter().zip(reference) {
        let area = adapter.cell_area(store, *c).unwrap();
        diff += (store.real_tag(TRACER, *c).unwrap() - q0).abs() * area;
        norm += q0.abs() * area;
    }
    diff / norm
}

/// Runs the reversing deformational flow for one period in `steps` steps on
/// a cubed sphere of `n` cells per edge, checking mass at every step.
/// Returns the relative L1 distance from the initial field at half time and
/// at the end.
fn reversal_errors(n: usize, steps: usize) -> (f64, f64) {
    let radius = 1.0;
    let (mut store, set, mut sl) = setup(n, radius, TracerField::GaussianHills);
    let initial: Vec<f64> = store
        .entities(set, EntityDim::Polygon)
        .unwrap()
        .iter()
        .map(|c| store.real_tag(TRACER, *c).unwrap())
        .collect();
    let flow = VelocityField::CaseOne { period: DEFAULT_PERIOD };
    let dt = DEFAULT_PERIOD / steps as f64;
    let mut halfway = 0.0;
    for step in 0..steps {
        let t = (step + 1) as f64 * dt;
        let report = sl
            .step(&mut store, set, |p| flow.departure_point(p, t, dt, radius))
            .unwrap();
        assert!(
            report.relative_mass_change() < 1e-10,
            "n {n}, step {step}: {report:?}"
        );
        if step + 1 == steps / 2 {
            halfway = l1_distance(&store, set, &initial);
        }
    }
    (halfway, l1_distance(&store, set, &initial))
}

#[test]
fn reversing_flow_error_shrinks_under_refinement() {
    // mesh and step refined together, so the Courant number stays fixed
    let (_, coarse) = reversal_errors(6, 20);
    let (fine_half, fine) = reversal_errors(12, 40);
    assert!(fine < fine_half, "fine: returned {fine} vs halfway {fine_half}");
    assert!(fine < coarse, "return error {fine} on the fine run vs {coarse} on the coarse run");
}

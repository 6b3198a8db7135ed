//! Semi-Lagrangian transport step built on the intersection engine.
//!
//! The arrival mesh is fixed and holds the tracer. Each step traces the
//! arrival vertices back to their departure positions, intersects the
//! departure mesh (blue) with the arrival mesh (red), and delivers the mass
//! of every overlap to the arrival cell its departure parent came from.
//!
//! The departure mesh is built on the first step and moved in place after
//! that; intersection output and received covering cells are deleted at
//! the end of every step, so the store does not grow over a run.

use crate::algs::communicator::Communicator;
use crate::algs::covering::MeshExchange;
use crate::algs::meshgen::DepartureMesh;
use crate::geometry::spherical::Vec3;
use crate::intx::adapter::CellAdapter;
use crate::intx::engine::{Intersector, IntxReport};
use crate::mesh_error::MeshIntxError;
use crate::remap::conservative::{
    ConservativeRemap, Reconstruction, TransferDirection, total_mass,
};
use crate::remap::flows::TracerField;
use crate::topology::point::PointId;
use crate::topology::store::{EntityDim, MeshSet, MeshStore, MeshStoreExt, TagValue};
use itertools::{Itertools, MinMaxResult};

/// Outcome of one transport step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepReport {
    pub intx: IntxReport,
    /// Global tracer mass before the step.
    pub mass_before: f64,
    /// Global tracer mass after the step.
    pub mass_after: f64,
    /// Local tracer range before the step.
    pub range_before: (f64, f64),
    /// Local tracer range after the step.
    pub range_after: (f64, f64),
}

impl StepReport {
    pub fn relative_mass_change(&self) -> f64 {
        if self.mass_before == 0.0 {
            (self.mass_after - self.mass_before).abs()
        } else {
            ((self.mass_after - self.mass_before) / self.mass_before).abs()
        }
    }
}

pub struct SemiLagrangian {
    engine: Intersector,
    reconstruction: Reconstruction,
    tracer_tag: String,
    departure: Option<DepartureMesh>,
}

impl SemiLagrangian {
    pub fn new(engine: Intersector, tracer_tag: impl Into<String>) -> Self {
        Self {
            engine,
            reconstruction: Reconstruction::PiecewiseConstant,
            tracer_tag: tracer_tag.into(),
            departure: None,
        }
    }

    pub fn with_reconstruction(mut self, reconstruction: Reconstruction) -> Self {
        self.reconstruction = reconstruction;
        self
    }

    #[inline]
    pub fn engine(&self) -> &Intersector {
        &self.engine
    }

    #[inline]
    pub fn tracer_tag(&self) -> &str {
        &self.tracer_tag
    }

    /// Departure set of `arrival`, if a step has built one.
    pub fn departure_set(&self, arrival: MeshSet) -> Option<MeshSet> {
        self.departure
            .as_ref()
            .filter(|d| d.arrival() == arrival)
            .map(DepartureMesh::set)
    }

    /// Deletes the departure mesh kept between steps.
    pub fn release<S: MeshStore + ?Sized>(&mut self, store: &mut S) -> Result<(), MeshIntxError> {
        match self.departure.take() {
            Some(d) => d.delete(store),
            None => Ok(()),
        }
    }

    /// Moves the departure mesh of `arrival` to the traced positions,
    /// building it the first time.
    fn trace_departure<S, F>(
        &mut self,
        store: &mut S,
        arrival: MeshSet,
        trace: F,
    ) -> Result<MeshSet, MeshIntxError>
    where
        S: MeshStore + ?Sized,
        F: Fn(Vec3) -> Vec3,
    {
        if let Some(d) = self.departure.as_ref().filter(|d| d.arrival() == arrival) {
            d.retrace(store, trace)?;
            return Ok(d.set());
        }
        self.release(store)?;
        let d = DepartureMesh::build(store, arrival, trace)?;
        let set = d.set();
        self.departure = Some(d);
        Ok(set)
    }

    fn remapper(&self) -> ConservativeRemap {
        ConservativeRemap::new(*self.engine.adapter(), TransferDirection::RedToDeparture)
            .with_reconstruction(self.reconstruction)
    }

    /// Advances the tracer on `arrival` by one step. `trace` maps an
    /// arrival point to its departure point.
    pub fn step<S, F>(
        &mut self,
        store: &mut S,
        arrival: MeshSet,
        trace: F,
    ) -> Result<StepReport, MeshIntxError>
    where
        S: MeshStore + ?Sized,
        F: Fn(Vec3) -> Vec3,
    {
        let adapter = *self.engine.adapter();
        let cells = store.entities(arrival, EntityDim::Polygon)?;
        let mass_before = total_mass(store, &adapter, &cells, &self.tracer_tag)?;
        let range_before = tracer_range(store, &cells, &self.tracer_tag)?;

        let departure = self.trace_departure(store, arrival, trace)?;
        let out = store.create_set();
        let output = match self.engine.intersect_meshes(store, departure, arrival, out) {
            Ok(output) => output,
            Err(e) => {
                store.delete_set(out)?;
                return Err(e);
            }
        };

        let remap = self.remapper();
        let acc = remap.accumulate(store, &output, &self.tracer_tag, None)?;
        let mass_after = remap.finalize(store, &cells, &acc, &self.tracer_tag)?;
        let range_after = tracer_range(store, &cells, &self.tracer_tag)?;
        self.engine.discard_output(store, &output)?;
        store.delete_set(out)?;
        log::debug!(
            "step: {} polygons, mass {mass_before:e} -> {mass_after:e}",
            output.polygons.len()
        );
        Ok(StepReport {
            intx: output.report,
            mass_before,
            mass_after,
            range_before,
            range_after,
        })
    }

    /// Collective variant of [`step`](Self::step): `arrival` holds this
    /// process's cells. Departure cells are exchanged so every process sees
    /// the cells covering its arrival region, and mass landing on cells
    /// owned elsewhere is sent back to the owner. Masses in the report are
    /// global; ranges are local.
    pub fn step_distributed<S, C, F>(
        &mut self,
        store: &mut S,
        exchange: &mut MeshExchange<'_, C>,
        arrival: MeshSet,
        trace: F,
    ) -> Result<StepReport, MeshIntxError>
    where
        S: MeshStore + ?Sized,
        C: Communicator,
        F: Fn(Vec3) -> Vec3,
    {
        let adapter = *self.engine.adapter();
        let cells = store.entities(arrival, EntityDim::Polygon)?;
        let local_before = total_mass(store, &adapter, &cells, &self.tracer_tag)?;
        let range_before = tracer_range(store, &cells, &self.tracer_tag)?;

        let departure = self.trace_departure(store, arrival, trace)?;
        if exchange.boxes().is_none() {
            exchange.build_process_boxes(store, arrival, departure)?;
        }
        let coverage = exchange.compute_coverage(store, departure)?;
        let covering = exchange.transfer(store, departure, &coverage)?;
        let boxes = exchange
            .boxes()
            .cloned()
            .ok_or(MeshIntxError::MissingProcessBoxes)?;

        let out = store.create_set();
        let output = match self.engine.intersect_meshes_distributed(
            store,
            exchange.comm(),
            &boxes,
            covering,
            arrival,
            out,
        ) {
            Ok(output) => output,
            Err(e) => {
                store.delete_set(out)?;
                exchange.release_covering(store, covering)?;
                return Err(e);
            }
        };

        let remap = self.remapper();
        let mut acc = remap.accumulate(
            store,
            &output,
            &self.tracer_tag,
            Some(exchange.remote_cells()),
        )?;
        let returned = exchange.return_contributions(&acc.remote)?;
        acc.add_returned(&returned);
        let local_after = remap.finalize(store, &cells, &acc, &self.tracer_tag)?;
        let range_after = tracer_range(store, &cells, &self.tracer_tag)?;
        self.engine.discard_output(store, &output)?;
        store.delete_set(out)?;
        exchange.release_covering(store, covering)?;

        let mass_before = exchange.global_sum(local_before)?;
        let mass_after = exchange.global_sum(local_after)?;
        log::debug!(
            "rank {}: {} polygons, {} returned contributions",
            exchange.comm().rank(),
            output.polygons.len(),
            returned.len()
        );
        Ok(StepReport {
            intx: output.report,
            mass_before,
            mass_after,
            range_before,
            range_after,
        })
    }
}

/// Writes `field` evaluated at each cell center of `set` into `tag`.
pub fn initialize_tracer<S: MeshStore + ?Sized>(
    store: &mut S,
    adapter: &CellAdapter,
    set: MeshSet,
    field: TracerField,
    tag: &str,
) -> Result<(), MeshIntxError> {
    for cell in store.entities(set, EntityDim::Polygon)? {
        let value = field.value(adapter.cell_center(store, cell)?);
        store.set_tag(tag, cell, TagValue::Real(value))?;
    }
    Ok(())
}

fn tracer_range<S: MeshStore + ?Sized>(
    store: &S,
    cells: &[PointId],
    tag: &str,
) -> Result<(f64, f64), MeshIntxError> {
    let values: Vec<f64> = cells
        .iter()
        .map(|c| store.real_tag(tag, *c))
        .collect::<Result<_, _>>()?;
    Ok(match values.into_iter().minmax_by(f64::total_cmp) {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    })
}

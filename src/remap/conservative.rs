//! Conservative transfer of cell averages through intersection polygons.
//!
//! Each output polygon carries the mass `value × area` of its source parent
//! to its destination cell; dividing the accumulated mass by the
//! destination area gives the new average. With piecewise-constant values
//! the total is conserved to roundoff, because the polygons tile the
//! overlap of the two meshes.

use crate::algs::covering::{RemoteCellTable, ReturnedContribution};
use crate::geometry::spherical::Vec3;
use crate::intx::adapter::CellAdapter;
use crate::intx::engine::{IntxOutput, IntxPolygon};
use crate::mesh_error::MeshIntxError;
use crate::remap::reconstruct::LinearReconstruction;
use crate::topology::point::PointId;
use crate::topology::store::{CORRESPONDING_CELL_TAG, MeshStore, MeshStoreExt, TagValue};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Shape of the source field inside each cell.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reconstruction {
    #[default]
    PiecewiseConstant,
    /// Limited linear; conserves mass only approximately on the sphere.
    PiecewiseLinear,
}

/// Which side of an intersection holds the field and which receives it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Field on blue cells, remapped onto their red parents.
    BlueToRed,
    /// Field on red cells, delivered to the arrival cell each blue
    /// (departure) parent corresponds to.
    RedToDeparture,
}

/// Mass gathered per destination cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MassAccumulator {
    /// Destination cells on this process.
    pub local: HashMap<PointId, f64>,
    /// Received covering cells, by local handle, owned elsewhere.
    pub remote: BTreeMap<PointId, f64>,
}

impl MassAccumulator {
    pub fn local_total(&self) -> f64 {
        self.local.values().sum()
    }

    pub fn add_returned(&mut self, returned: &[ReturnedContribution]) {
        for r in returned {
            *self.local.entry(r.arrival).or_insert(0.0) += r.value;
        }
    }
}

/// Source and destination mass of one remap.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RemapReport {
    pub source_mass: f64,
    pub target_mass: f64,
}

impl RemapReport {
    pub fn relative_error(&self) -> f64 {
        if self.source_mass == 0.0 {
            (self.target_mass - self.source_mass).abs()
        } else {
            ((self.target_mass - self.source_mass) / self.source_mass).abs()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConservativeRemap {
    adapter: CellAdapter,
    direction: TransferDirection,
    reconstruction: Reconstruction,
}

impl ConservativeRemap {
    pub fn new(adapter: CellAdapter, direction: TransferDirection) -> Self {
        Self {
            adapter,
            direction,
            reconstruction: Reconstruction::PiecewiseConstant,
        }
    }

    pub fn with_reconstruction(mut self, reconstruction: Reconstruction) -> Self {
        self.reconstruction = reconstruction;
        self
    }

    #[inline]
    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Areas of the output polygons, in `output.polygons` order.
    pub fn polygon_areas<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        output: &IntxOutput,
    ) -> Result<Vec<f64>, MeshIntxError> {
        let rings = polygon_coords(store, output)?;
        let adapter = self.adapter;
        #[cfg(feature = "rayon")]
        let areas = rings.par_iter().map(|r| adapter.polygon_area(r)).collect();
        #[cfg(not(feature = "rayon"))]
        let areas = rings.iter().map(|r| adapter.polygon_area(r)).collect();
        Ok(areas)
    }

    /// Gathers `value × area` of every output polygon onto its destination.
    ///
    /// `remote` resolves blue parents received from other processes when
    /// delivering to departure cells; such contributions land in
    /// [`MassAccumulator::remote`].
    pub fn accumulate<S: MeshStore + ?Sized>(
        &self,
        store: &S,
        output: &IntxOutput,
        source_tag: &str,
        remote: Option<&RemoteCellTable>,
    ) -> Result<MassAccumulator, MeshIntxError> {
        let rings = polygon_coords(store, output)?;
        let areas = self.polygon_areas(store, output)?;
        let source_set = match self.direction {
            TransferDirection::BlueToRed => output.blue_set,
            TransferDirection::RedToDeparture => output.red_set,
        };
        let mut fits: HashMap<PointId, LinearReconstruction> = HashMap::new();
        let mut values = Vec::with_capacity(output.polygons.len());
        for (poly, ring) in output.polygons.iter().zip(&rings) {
            let source = self.source_of(poly);
            let value = match self.reconstruction {
                Reconstruction::PiecewiseConstant => store.real_tag(source_tag, source)?,
                Reconstruction::PiecewiseLinear => {
                    if !fits.contains_key(&source) {
                        let fit = LinearReconstruction::build(
                            store,
                            &self.adapter,
                            source_set,
                            source,
                            source_tag,
                        )?;
                        fits.insert(source, fit);
                    }
                    fits[&source].average_over(&self.adapter, ring)
                }
            };
            values.push(value);
        }
        if self.reconstruction == Reconstruction::PiecewiseLinear {
            self.restore_means(output, &areas, &fits, &mut values);
        }

        let mut acc = MassAccumulator::default();
        for ((poly, area), value) in output.polygons.iter().zip(areas).zip(values) {
            let mass = value * area;
            match self.direction {
                TransferDirection::BlueToRed => {
                    *acc.local.entry(poly.red).or_insert(0.0) += mass;
                }
                TransferDirection::RedToDeparture => match store.tag(CORRESPONDING_CELL_TAG, poly.blue) {
                    Some(TagValue::Handle(arrival)) => {
                        *acc.local.entry(arrival).or_insert(0.0) += mass;
                    }
                    Some(_) => {
                        return Err(MeshIntxError::TagKindMismatch {
                            tag: CORRESPONDING_CELL_TAG.to_string(),
                            entity: poly.blue,
                        });
                    }
                    None if remote.is_some_and(|t| t.get(poly.blue).is_some()) => {
                        *acc.remote.entry(poly.blue).or_insert(0.0) += mass;
                    }
                    None => {
                        return Err(MeshIntxError::MissingTag {
                            tag: CORRESPONDING_CELL_TAG.to_string(),
                            entity: poly.blue,
                        });
                    }
                },
            }
        }
        Ok(acc)
    }

    #[inline]
    fn source_of(&self, poly: &IntxPolygon) -> PointId {
        match self.direction {
            TransferDirection::BlueToRed => poly.blue,
            TransferDirection::RedToDeparture => poly.red,
        }
    }

    /// Shifts the polygon values of each source cell by one constant so
    /// that they carry exactly `mean × covered area`, the mass the
    /// piecewise-constant transfer would move. Centroid values measured in
    /// a gnomonic plane do not do this on their own on the sphere.
    fn restore_means(
        &self,
        output: &IntxOutput,
        areas: &[f64],
        fits: &HashMap<PointId, LinearReconstruction>,
        values: &mut [f64],
    ) {
        let mut sums: HashMap<PointId, (f64, f64)> = HashMap::new();
        for ((poly, area), value) in output.polygons.iter().zip(areas).zip(values.iter()) {
            let entry = sums.entry(self.source_of(poly)).or_insert((0.0, 0.0));
            entry.0 += value * area;
            entry.1 += area;
        }
        let shifts: HashMap<PointId, f64> = sums
            .into_iter()
            .filter(|(_, (_, covered))| *covered > 0.0)
            .filter_map(|(source, (mass, covered))| {
                fits.get(&source)
                    .map(|fit| (source, fit.value() - mass / covered))
            })
            .collect();
        for (poly, value) in output.polygons.iter().zip(values.iter_mut()) {
            if let Some(shift) = shifts.get(&self.source_of(poly)) {
                *value += shift;
            }
        }
    }

    /// Writes `mass / area` to `target_tag` on every cell of `cells` (zero
    /// where nothing arrived) and returns the mass written.
    pub fn finalize<S: MeshStore + ?Sized>(
        &self,
        store: &mut S,
        cells: &[PointId],
        acc: &MassAccumulator,
        target_tag: &str,
    ) -> Result<f64, MeshIntxError> {
        let mut total = 0.0;
        for &cell in cells {
            let area = self.adapter.cell_area(store, cell)?;
            let mass = acc.local.get(&cell).copied().unwrap_or(0.0);
            let value = if area > 0.0 { mass / area } else { 0.0 };
            store.set_tag(target_tag, cell, TagValue::Real(value))?;
            total += value * area;
        }
        Ok(total)
    }

    /// Serial remap of `source_tag` to `target_tag` through `output`.
    pub fn remap<S: MeshStore + ?Sized>(
        &self,
        store: &mut S,
        output: &IntxOutput,
        source_tag: &str,
        target_tag: &str,
    ) -> Result<RemapReport, MeshIntxError> {
        let (sources, targets) = match self.direction {
            TransferDirection::BlueToRed => (output.blue_cells.clone(), output.red_cells.clone()),
            TransferDirection::RedToDeparture => {
                let mut targets = Vec::with_capacity(output.blue_cells.len());
                for &b in &output.blue_cells {
                    targets.push(store.handle_tag(CORRESPONDING_CELL_TAG, b)?);
                }
                (output.red_cells.clone(), targets)
            }
        };
        let source_mass = total_mass(store, &self.adapter, &sources, source_tag)?;
        let acc = self.accumulate(store, output, source_tag, None)?;
        let target_mass = self.finalize(store, &targets, &acc, target_tag)?;
        Ok(RemapReport {
            source_mass,
            target_mass,
        })
    }
}

/// `Σ value × area` of a real tag over `cells`.
pub fn total_mass<S: MeshStore + ?Sized>(
    store: &S,
    adapter: &CellAdapter,
    cells: &[PointId],
    tag: &str,
) -> Result<f64, MeshIntxError> {
    let mut total = 0.0;
    for &cell in cells {
        total += store.real_tag(tag, cell)? * adapter.cell_area(store, cell)?;
    }
    Ok(total)
}

fn polygon_coords<S: MeshStore + ?Sized>(
    store: &S,
    output: &IntxOutput,
) -> Result<Vec<Vec<Vec3>>, MeshIntxError> {
    output
        .polygons
        .iter()
        .map(|p| -> Result<Vec<Vec3>, MeshIntxError> {
            store
                .connectivity(p.handle)?
                .iter()
                .map(|v| store.coords(*v))
                .collect()
        })
        .collect()
}

#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-intx
//!
//! mesh-intx computes the exact overlap of two polygonal meshes covering the
//! same region, in the plane or on a sphere, and uses the overlap polygons
//! to move cell-averaged fields between the meshes without losing mass.
//!
//! ## Features
//! - Advancing-front intersection: overlaps are found by walking both meshes
//!   from a seed pair instead of testing every pair of cells
//! - Gnomonic cube-face projection, so spherical cells are clipped as planar
//!   convex polygons
//! - An edge-vertex cache keeping intersection points on shared red edges
//!   unique, which makes the output a watertight mesh
//! - Conservative remapping (piecewise constant or limited linear) and a
//!   semi-Lagrangian transport step
//! - Covering exchange between processes over a pluggable communicator
//!   (serial, threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-intx = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```no_run
//! use mesh_intx::prelude::*;
//!
//! # fn main() -> Result<(), MeshIntxError> {
//! let mut store = InMemoryMesh::new();
//! let red = cubed_sphere(&mut store, 8, 1.0)?;
//! let blue = cubed_sphere(&mut store, 6, 1.0)?;
//! let out = store.create_set();
//! let mut engine = Intersector::spherical(IntxConfig::for_radius(1.0))?;
//! let output = engine.intersect_meshes(&mut store, blue, red, out)?;
//! println!("{} polygons", output.polygons.len());
//! # Ok(())
//! # }
//! ```

pub mod algs;
pub mod config;
pub mod geometry;
pub mod intx;
pub mod mesh_error;
pub mod remap;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    pub use crate::algs::covering::MeshExchange;
    pub use crate::algs::meshgen::{
        DepartureMesh, StructuredCellType, cubed_sphere, departure_mesh, planar_grid,
    };
    pub use crate::config::IntxConfig;
    pub use crate::intx::{CellAdapter, Intersector, IntxOutput, IntxReport};
    pub use crate::mesh_error::MeshIntxError;
    pub use crate::remap::{
        ConservativeRemap, Reconstruction, SemiLagrangian, TracerField, TransferDirection,
        VelocityField, initialize_tracer,
    };
    pub use crate::topology::point::PointId;
    pub use crate::topology::store::{
        EntityDim, InMemoryMesh, MeshSet, MeshStore, MeshStoreExt, TagValue,
    };
}

//! Conservative remapping and semi-Lagrangian transport on top of the
//! intersection engine.

pub mod advection;
pub mod conservative;
pub mod flows;
pub mod reconstruct;

pub use advection::{SemiLagrangian, StepReport, initialize_tracer};
pub use conservative::{
    ConservativeRemap, MassAccumulator, Reconstruction, RemapReport, TransferDirection, total_mass,
};
pub use flows::{TracerField, VelocityField};
pub use reconstruct::LinearReconstruction;

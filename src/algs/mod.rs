//! Communication, covering exchange and mesh generators.

pub mod communicator;
pub mod covering;
pub mod meshgen;
pub mod tuple_list;
pub mod wire;

pub use covering::{MeshExchange, global_sum};
pub use meshgen::{DepartureMesh, StructuredCellType, cubed_sphere, departure_mesh, planar_grid};

//! Mesh entity handles and the mesh-store interface.
//!
//! The remap core never owns a mesh database. It talks to one through
//! [`store::MeshStore`]: entity sets, polygon connectivity, vertex
//! coordinates and named per-entity tags. [`store::InMemoryMesh`] is the
//! bundled implementation used by the generators and tests.

pub mod point;
pub mod store;

pub use point::PointId;
pub use store::{EntityDim, InMemoryMesh, MeshSet, MeshStore, MeshStoreExt, TagValue};

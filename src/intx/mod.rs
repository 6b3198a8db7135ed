//! Mesh-mesh intersection: cell adapters, the shared edge-vertex cache and
//! the advancing-front engine.

pub mod adapter;
pub mod edge_cache;
pub mod engine;

pub use adapter::{CellAdapter, CellSetup, Projection};
pub use edge_cache::{EdgeKey, EdgeVertexCache};
pub use engine::{AreaMismatch, Intersector, IntxOutput, IntxPolygon, IntxReport, PairClip};

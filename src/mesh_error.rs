//! MeshIntxError: Unified error type for mesh-intx public APIs
//!
//! Geometry, adapter and engine routines return this error so the
//! advancing front can tell a fatal mesh defect from ordinary control flow
//! (a pair that simply does not overlap is `Ok(None)`, never an error).

use crate::geometry::gnomonic::GnomonicPlane;
use crate::topology::point::PointId;
use thiserror::Error;

/// Unified error type for mesh-intx operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshIntxError {
    /// Attempted to construct a PointId with a zero value (invalid).
    #[error("PointId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidPointId,
    /// Handle does not name an entity of the expected kind in the store.
    #[error("entity {0} not found in mesh store")]
    MissingEntity(PointId),
    /// Vertex cannot be removed while a polygon still uses it.
    #[error("vertex {entity} is still used by polygon {user}")]
    EntityInUse { entity: PointId, user: PointId },
    /// Set handle does not exist in the store.
    #[error("mesh set {0} not found")]
    MissingSet(usize),
    /// A required tag value is absent on an entity.
    #[error("tag `{tag}` missing on entity {entity}")]
    MissingTag { tag: String, entity: PointId },
    /// Tag exists with a different value kind than requested.
    #[error("tag `{tag}` on entity {entity} has unexpected kind")]
    TagKindMismatch { tag: String, entity: PointId },
    /// Polygon has more sides than the fixed-capacity buffers allow.
    #[error("cell {cell} has {sides} sides, maximum is {max}")]
    TooManyEdges {
        cell: PointId,
        sides: usize,
        max: usize,
    },
    /// Polygon collapses to fewer than three distinct vertices.
    #[error("cell {0} has fewer than 3 distinct vertices")]
    DegenerateCell(PointId),
    /// More than two cells of the search set share one edge.
    #[error("non-manifold mesh: edge ({a}, {b}) of cell {cell} is shared by {count} cells")]
    NonManifoldEdge {
        cell: PointId,
        a: PointId,
        b: PointId,
        count: usize,
    },
    /// A point lies on or behind the plane it should be projected onto.
    #[error("degenerate gnomonic projection of cell {cell} onto plane {plane:?}")]
    DegenerateProjection { cell: PointId, plane: GnomonicPlane },
    /// An intersection point matched neither a vertex nor a red edge.
    #[error("intersection point ({x}, {y}) of red {red} / blue {blue} is on no vertex or red edge")]
    UnresolvedIntersectionPoint {
        red: PointId,
        blue: PointId,
        x: f64,
        y: f64,
    },
    /// Fixed-capacity point buffer exhausted during clipping.
    #[error("intersection point buffer overflow (capacity {0})")]
    PointBufferOverflow(usize),
    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Field storage does not match the cells it describes.
    #[error("field length mismatch: expected {expected}, found {found}")]
    FieldLengthMismatch { expected: usize, found: usize },
    /// A distributed step was requested before process boxes were built.
    #[error("process boxes have not been built")]
    MissingProcessBoxes,
    /// Communication failure with a given neighbor rank.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// Malformed wire buffer.
    #[error("wire format error: {0}")]
    Wire(String),
}

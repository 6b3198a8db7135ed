//! `PointId`: a strong, zero-cost handle for mesh entities
//!
//! Every vertex, polygon and output intersection polygon held by a mesh
//! store is named by a `PointId`. It wraps a nonzero `u64` so that 0 stays
//! free as the "no entity" sentinel used on the wire (zero-padded vertex
//! lists, null back-references).
//!
//! This module provides:
//! - A transparent `PointId` newtype around `NonZeroU64` for zero-cost
//!   layout guarantees.
//! - Constructors and accessors with safety checks.
//! - Implementations of common traits (`Debug`, `Display`, ordering,
//!   hashing) so `PointId` can be used in maps, sets, and printed easily.

use crate::mesh_error::MeshIntxError;
use std::{fmt, num::NonZeroU64};

/// Opaque handle of an entity in a mesh store.
///
/// # Memory layout
/// This type is `repr(transparent)`, meaning it has the same ABI and
/// alignment as its single field (`NonZeroU64`); `Option<PointId>` is
/// therefore the size of a `u64` as well.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PointId(NonZeroU64);

impl PointId {
    /// Creates a new `PointId` from a raw `u64` value.
    ///
    /// Returns [`MeshIntxError::InvalidPointId`] if `raw == 0`.
    #[inline]
    pub fn new(raw: u64) -> Result<Self, MeshIntxError> {
        NonZeroU64::new(raw)
            .map(PointId)
            .ok_or(MeshIntxError::InvalidPointId)
    }

    /// Decodes a wire value where 0 means "no entity".
    #[inline]
    pub fn from_wire(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(PointId)
    }

    /// Handle for the zero-based allocation slot `index` (slot 0 is id 1).
    #[inline]
    pub const fn from_index(index: u64) -> Self {
        PointId(NonZeroU64::MIN.saturating_add(index))
    }

    /// Returns the inner `u64` value of this `PointId`.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

// -----------------------------------------------------------------------------
// Formatting traits
// -----------------------------------------------------------------------------

impl fmt::Debug for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PointId").field(&self.get()).finish()
    }
}

/// Prints the numeric ID without any wrapper text.
impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

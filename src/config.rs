//! Run configuration for the intersection engine and the remap layer.

use crate::mesh_error::MeshIntxError;
use serde::{Deserialize, Serialize};

/// Tolerances and geometry parameters of an intersection run.
///
/// All lengths are absolute and expressed in the units of the mesh
/// coordinates (gnomonic plane units scale with `radius`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntxConfig {
    /// Sphere radius; ignored by the planar adapter.
    pub radius: f64,
    /// Positional tolerance ε used for point merging and vertex matching.
    pub epsilon: f64,
    /// Relative tolerance for the per-red-cell recovered-area diagnostic.
    pub area_tolerance: f64,
    /// Slack added to boxes in pair rejection and process coverage tests.
    pub box_slack: f64,
    /// Distance under which seam points from another process are snapped.
    pub snap_tolerance: f64,
    /// Reject candidate pairs by bounding box before clipping.
    pub seed_box_check: bool,
}

impl Default for IntxConfig {
    fn default() -> Self {
        Self {
            radius: 1.0,
            epsilon: 1e-10,
            area_tolerance: 1e-6,
            box_slack: 0.1,
            snap_tolerance: 1e-7,
            seed_box_check: true,
        }
    }
}

impl IntxConfig {
    /// Configuration for a sphere of the given radius, with defaults scaled.
    pub fn for_radius(radius: f64) -> Self {
        let base = Self::default();
        Self {
            radius,
            epsilon: base.epsilon * radius,
            box_slack: base.box_slack * radius,
            snap_tolerance: base.snap_tolerance * radius,
            ..base
        }
    }

    /// Area tolerance ε²/2: area errors scale quadratically with position.
    #[inline]
    pub fn epsilon_area(&self) -> f64 {
        0.5 * self.epsilon * self.epsilon
    }

    pub fn validate(&self) -> Result<(), MeshIntxError> {
        let positive = [
            ("radius", self.radius),
            ("epsilon", self.epsilon),
            ("area_tolerance", self.area_tolerance),
            ("snap_tolerance", self.snap_tolerance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MeshIntxError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !(self.box_slack.is_finite() && self.box_slack >= 0.0) {
            return Err(MeshIntxError::InvalidConfig(format!(
                "box_slack must be non-negative, got {}",
                self.box_slack
            )));
        }
        Ok(())
    }
}

//! Lifecycle stage machine (spec §3, §4.5): the monotonic
//! planning→beta→stable→deprecated→sunset progression and the rollout
//! patch semantics that can override it explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use studio_core::model::LifecycleStage;

/// Stage ordinal used for the monotonic-transition check. Higher is later
/// in the rollout; not exposed beyond this module.
fn rank(stage: LifecycleStage) -> u8 {
    match stage {
        LifecycleStage::Planning => 0,
        LifecycleStage::Beta => 1,
        LifecycleStage::Stable => 2,
        LifecycleStage::Deprecated => 3,
        LifecycleStage::Sunset => 4,
    }
}

/// Whether `from -> to` is an automatic, non-admin-overridden transition
/// (spec §3: "stage transitions monotonic ... except explicit admin
/// override"). An admin PATCH that names `lifecycleStage` explicitly is
/// always allowed regardless of this check; this function exists for
/// validating derived transitions (e.g. the `isBeta` flag toggle).
pub fn is_monotonic_transition(from: LifecycleStage, to: LifecycleStage) -> bool {
    from == to || rank(to) == rank(from) + 1
}

/// An admin rollout patch (spec §4.5 `admin.patchRollout`). All fields are
/// optional; absent fields leave the descriptor's current value unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutPatch {
    pub semantic_version: Option<String>,
    pub lifecycle_stage: Option<LifecycleStage>,
    pub is_beta: Option<bool>,
    pub beta_start_at: Option<DateTime<Utc>>,
    pub beta_end_at: Option<DateTime<Utc>>,
    pub deprecation_start_at: Option<DateTime<Utc>>,
    pub sunset_at: Option<DateTime<Utc>>,
}

impl RolloutPatch {
    /// A patch with every field absent is a no-op and must round-trip the
    /// descriptor unchanged (spec §8: "Admin PATCH of rollout is idempotent
    /// when the payload equals the current state").
    pub fn is_empty(&self) -> bool {
        self.semantic_version.is_none()
            && self.lifecycle_stage.is_none()
            && self.is_beta.is_none()
            && self.beta_start_at.is_none()
            && self.beta_end_at.is_none()
            && self.deprecation_start_at.is_none()
            && self.sunset_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_transition_allows_single_step_forward() {
        assert!(is_monotonic_transition(LifecycleStage::Planning, LifecycleStage::Beta));
        assert!(is_monotonic_transition(LifecycleStage::Beta, LifecycleStage::Stable));
        assert!(is_monotonic_transition(LifecycleStage::Deprecated, LifecycleStage::Sunset));
    }

    #[test]
    fn monotonic_transition_rejects_skip_or_backward() {
        assert!(!is_monotonic_transition(LifecycleStage::Planning, LifecycleStage::Stable));
        assert!(!is_monotonic_transition(LifecycleStage::Stable, LifecycleStage::Beta));
        assert!(!is_monotonic_transition(LifecycleStage::Sunset, LifecycleStage::Stable));
    }

    #[test]
    fn same_stage_is_a_monotonic_no_op() {
        assert!(is_monotonic_transition(LifecycleStage::Stable, LifecycleStage::Stable));
    }

    #[test]
    fn empty_patch_is_empty() {
        assert!(RolloutPatch::default().is_empty());
    }
}

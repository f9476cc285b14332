//! Connector Registry (spec §4.5, C3): the catalog of connectors with
//! lifecycle stage, rollout dates, and operation descriptors, gating what
//! is listed and what is executable.

use std::collections::HashMap;
use std::sync::RwLock;

use studio_core::model::{ConnectorDescriptor, LifecycleStage, Organization};
use studio_core::{StudioError, StudioResult};

use crate::lifecycle::RolloutPatch;

/// Filter applied by [`ConnectorRegistry::list`]. `None` means "no filter
/// on this axis."
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub lifecycle_stage: Option<LifecycleStage>,
    /// When `true`, apply the marketplace visibility rule (spec §4.5:
    /// excludes `planning` and connectors past their `sunsetAt`) in
    /// addition to `lifecycle_stage`.
    pub marketplace_only: bool,
}

struct Entry {
    descriptor: ConnectorDescriptor,
    /// Stage the connector held before it last entered `beta` via the
    /// `isBeta` flag, so turning the flag back off can restore it (spec
    /// §4.5: "falls back to stable (or the prior non-beta stage when
    /// preserved)").
    prior_non_beta_stage: Option<LifecycleStage>,
}

/// In-memory catalog. Not `Store`-backed: registry reads happen on the hot
/// path of every node execution (spec §4.2), so this crate intentionally
/// has no I/O dependency -- `studio-cli` is responsible for seeding it at
/// startup and persisting admin patches through whatever boundary it
/// chooses.
#[derive(Default)]
pub struct ConnectorRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connector descriptor, replacing any existing entry for
    /// the same slug.
    pub fn register(&self, descriptor: ConnectorDescriptor) -> StudioResult<()> {
        descriptor.validate_dates().map_err(StudioError::BadInput)?;
        let prior_non_beta_stage =
            if descriptor.lifecycle_stage == LifecycleStage::Beta { None } else { Some(descriptor.lifecycle_stage) };
        self.entries
            .write()
            .unwrap()
            .insert(descriptor.slug.clone(), Entry { descriptor, prior_non_beta_stage });
        Ok(())
    }

    pub fn get(&self, slug: &str) -> StudioResult<ConnectorDescriptor> {
        self.entries
            .read()
            .unwrap()
            .get(slug)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| StudioError::NotFound(format!("connector '{slug}'")))
    }

    pub fn list(&self, filter: &ListFilter) -> Vec<ConnectorDescriptor> {
        let now = chrono::Utc::now();
        self.entries
            .read()
            .unwrap()
            .values()
            .map(|e| &e.descriptor)
            .filter(|d| filter.lifecycle_stage.map(|s| d.lifecycle_stage == s).unwrap_or(true))
            .filter(|d| !filter.marketplace_only || is_marketplace_visible(d, now))
            .cloned()
            .collect()
    }

    /// Marketplace listing convenience: excludes `planning` and
    /// post-`sunsetAt` `sunset` connectors (spec §4.5).
    pub fn marketplace_listing(&self) -> Vec<ConnectorDescriptor> {
        self.list(&ListFilter { lifecycle_stage: None, marketplace_only: true })
    }

    /// Applies an admin rollout patch (spec §4.5). Idempotent when `patch`
    /// reproduces the descriptor's current values (spec §8).
    pub fn patch_rollout(&self, slug: &str, patch: &RolloutPatch) -> StudioResult<ConnectorDescriptor> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.get_mut(slug).ok_or_else(|| StudioError::NotFound(format!("connector '{slug}'")))?;

        if let Some(v) = &patch.semantic_version {
            entry.descriptor.semantic_version = v.clone();
        }
        if let Some(v) = patch.beta_start_at {
            entry.descriptor.beta_start_at = Some(v);
        }
        if let Some(v) = patch.beta_end_at {
            entry.descriptor.beta_end_at = Some(v);
        }
        if let Some(v) = patch.deprecation_start_at {
            entry.descriptor.deprecation_start_at = Some(v);
        }
        if let Some(v) = patch.sunset_at {
            entry.descriptor.sunset_at = Some(v);
        }

        // isBeta is the authoritative signal over a directly-named
        // lifecycleStage when both are present (spec §4.5 invariant).
        if let Some(is_beta) = patch.is_beta {
            if is_beta {
                if entry.descriptor.lifecycle_stage != LifecycleStage::Beta {
                    entry.prior_non_beta_stage = Some(entry.descriptor.lifecycle_stage);
                }
                entry.descriptor.lifecycle_stage = LifecycleStage::Beta;
            } else if entry.descriptor.lifecycle_stage == LifecycleStage::Beta {
                entry.descriptor.lifecycle_stage = entry.prior_non_beta_stage.unwrap_or(LifecycleStage::Stable);
            }
        } else if let Some(stage) = patch.lifecycle_stage {
            // Explicit admin override (spec §3): bypasses the monotonic
            // check that would otherwise gate automatic transitions.
            if stage != LifecycleStage::Beta {
                entry.prior_non_beta_stage = Some(stage);
            }
            entry.descriptor.lifecycle_stage = stage;
        }

        entry.descriptor.validate_dates().map_err(StudioError::BadInput)?;
        Ok(entry.descriptor.clone())
    }

    /// Enforces the visibility/execution rules from spec §4.5 for a single
    /// operation invocation: refuses `sunset` connectors outright, refuses
    /// `beta` connectors the organization hasn't opted into, and logs (but
    /// does not fail) a warning for `deprecated` connectors.
    pub fn check_executable(&self, slug: &str, org: &Organization) -> StudioResult<ConnectorDescriptor> {
        let descriptor = self.get(slug)?;
        let now = chrono::Utc::now();

        if descriptor.lifecycle_stage == LifecycleStage::Sunset
            || descriptor.sunset_at.map(|at| now >= at).unwrap_or(false)
        {
            return Err(StudioError::ConnectorSunset(slug.to_string()));
        }

        if descriptor.lifecycle_stage == LifecycleStage::Beta && !org.beta_opt_ins.iter().any(|s| s == slug) {
            return Err(StudioError::BetaNotEnabled(slug.to_string()));
        }

        if descriptor.lifecycle_stage == LifecycleStage::Deprecated {
            tracing::warn!(connector = slug, org_id = %org.id, "executing deprecated connector");
        }

        Ok(descriptor)
    }
}

fn is_marketplace_visible(descriptor: &ConnectorDescriptor, now: chrono::DateTime<chrono::Utc>) -> bool {
    if descriptor.lifecycle_stage == LifecycleStage::Planning {
        return false;
    }
    if descriptor.lifecycle_stage == LifecycleStage::Sunset {
        return false;
    }
    if let Some(sunset_at) = descriptor.sunset_at {
        if now >= sunset_at {
            return false;
        }
    }
    true
}

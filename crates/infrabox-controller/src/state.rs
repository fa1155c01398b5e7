//! Explicit reconciliation state machine
//!
//! A sync pass first triages the custom resource on its own fields, then,
//! for live resources, converges on the observed primary dependent. Both
//! steps are pure so the ordering rules can be tested without a store.

use infrabox_core::SyncStatus;
use std::fmt;

/// Where a custom resource stands in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// No primary dependent exists
    Absent,
    /// Dependents exist, readiness is still being polled
    Converging,
    Ready,
    /// Sticky until someone resets the status
    Error,
    /// Deletion requested, dependents being torn down
    Deleting,
    /// The resource no longer exists
    Gone,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceState::Absent => "absent",
            ResourceState::Converging => "converging",
            ResourceState::Ready => "ready",
            ResourceState::Error => "error",
            ResourceState::Deleting => "deleting",
            ResourceState::Gone => "gone",
        };
        f.write_str(s)
    }
}

/// What the custom resource itself says before anything external is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    pub status: SyncStatus,
    pub deletion_requested: bool,
}

/// First decision of a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triage {
    /// Not found; nothing to do
    Gone,
    /// Run the deletion path
    Delete,
    /// In error; leave it and its dependents alone
    Hold,
    /// Converge on the primary dependent
    Live,
}

/// Deletion wins over error stickiness so a failed resource can still be removed.
pub fn triage(observed: Option<Observed>) -> Triage {
    match observed {
        None => Triage::Gone,
        Some(o) if o.deletion_requested => Triage::Delete,
        Some(o) if o.status == SyncStatus::Error => Triage::Hold,
        Some(_) => Triage::Live,
    }
}

/// How a kind treats an existing primary dependent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnPresent {
    /// Existence is final; the dependent runs its own course
    Terminal,
    /// Re-poll the dependent and mirror its status
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Refresh,
    None,
}

/// Second decision of a sync pass, for live resources
pub fn converge(primary_present: bool, on_present: OnPresent) -> (ResourceState, Action) {
    match (primary_present, on_present) {
        (false, _) => (ResourceState::Absent, Action::Create),
        (true, OnPresent::Refresh) => (ResourceState::Converging, Action::Refresh),
        (true, OnPresent::Terminal) => (ResourceState::Ready, Action::None),
    }
}

//! Pure leader-selection logic: a small decision tree over observed pod
//! state with no I/O, independently table-tested.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use leaderslice_shared::k8s::pod::{is_ready, is_terminating, matches_selector, pod_ip, ready_duration};
use std::collections::BTreeMap;
use std::time::Duration;

/// Why a failover away from the previous leader happened, for the
/// `leaderslice_failover_total{reason=...}` metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailoverReason {
    Terminating,
    NotReady,
    NoIp,
    NoneReady,
}

/// Outcome of a selection pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Kept (or chose) this pod.
    Leader(String),
    /// No eligible candidate.
    None,
}

pub struct SelectionInput<'a> {
    pub candidates: &'a [Pod],
    pub selector: &'a BTreeMap<String, String>,
    pub current_endpoint_slice: Option<&'a EndpointSlice>,
    pub sticky: bool,
    pub bypass_sticky: bool,
    pub min_ready_duration: Duration,
    pub now: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionOutcome {
    pub selection: Selection,
    pub sticky_hit: bool,
}

/// Find the UID the current endpoint slice's single endpoint (if any)
/// targets.
pub(crate) fn current_endpoint_target_uid(slice: &EndpointSlice) -> Option<&str> {
    slice
        .endpoints
        .first()?
        .target_ref
        .as_ref()?
        .uid
        .as_deref()
}

fn find_by_uid<'a>(candidates: &'a [Pod], uid: &str) -> Option<&'a Pod> {
    candidates
        .iter()
        .find(|p| p.metadata.uid.as_deref() == Some(uid))
}

fn pod_uid(pod: &Pod) -> String {
    pod.metadata.uid.clone().unwrap_or_default()
}

/// Runs the selection algorithm described in the leader-selector component:
/// try to stay with the sticky leader if eligible, else pick the
/// longest-matured Ready candidate, breaking ties by name.
pub fn select_leader(input: &SelectionInput) -> SelectionOutcome {
    if input.sticky && !input.bypass_sticky {
        if let Some(slice) = input.current_endpoint_slice {
            if let Some(uid) = current_endpoint_target_uid(slice) {
                if let Some(pod) = find_by_uid(input.candidates, uid) {
                    if matches_selector(pod, input.selector) && is_ready(pod) {
                        return SelectionOutcome {
                            selection: Selection::Leader(pod_uid(pod)),
                            sticky_hit: true,
                        };
                    }
                }
            }
        }
    }

    let mut eligible: Vec<&Pod> = input
        .candidates
        .iter()
        .filter(|p| matches_selector(p, input.selector))
        .filter(|p| is_ready(p))
        .filter(|p| {
            if input.min_ready_duration.is_zero() {
                return true;
            }
            ready_duration(p, input.now)
                .map(|d| d >= chrono::Duration::from_std(input.min_ready_duration).unwrap_or_default())
                .unwrap_or(false)
        })
        .collect();

    if eligible.is_empty() {
        return SelectionOutcome {
            selection: Selection::None,
            sticky_hit: false,
        };
    }

    eligible.sort_by(|a, b| {
        let a_time = a.metadata.creation_timestamp.as_ref().map(|t| t.0);
        let b_time = b.metadata.creation_timestamp.as_ref().map(|t| t.0);
        a_time
            .cmp(&b_time)
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });

    SelectionOutcome {
        selection: Selection::Leader(pod_uid(eligible[0])),
        sticky_hit: false,
    }
}

/// Determines why a previously recorded leader pod should be bypassed, if
/// at all, implementing the reconciler's leader-fast-path (step 6).
pub fn fast_path_bypass_reason(leader_pod: Option<&Pod>) -> Option<FailoverReason> {
    let pod = leader_pod?;
    if is_terminating(pod) {
        return Some(FailoverReason::Terminating);
    }
    if !is_ready(pod) {
        return Some(FailoverReason::NotReady);
    }
    if pod_ip(pod).is_none() {
        return Some(FailoverReason::NoIp);
    }
    None
}

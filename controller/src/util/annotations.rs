//! Parsing of the opt-in/override annotations a user writes on a source
//! Service. Pure string-in, typed-out functions that degrade safely on
//! nonsense input rather than erroring.

use k8s_openapi::api::core::v1::Service;
use leaderslice_shared::system::{
    ANNOTATION_ENABLED, ANNOTATION_LEADER_SERVICE_NAME, ANNOTATION_MIN_READY_DURATION,
    ANNOTATION_STICKY, DEFAULT_LEADER_SERVICE_SUFFIX,
};
use std::time::Duration;

fn annotation<'a>(source: &'a Service, key: &str) -> Option<&'a str> {
    source
        .metadata
        .annotations
        .as_ref()?
        .get(key)
        .map(|s| s.as_str())
}

/// Whether the source Service has opted in. Only the literal string
/// `"true"` counts; anything else (including case variants) opts out.
pub fn is_enabled(source: &Service) -> bool {
    annotation(source, ANNOTATION_ENABLED) == Some("true")
}

/// The leader Service name: the override annotation if present and
/// non-empty, else `<source>-leader`.
pub fn leader_service_name(source: &Service) -> String {
    match annotation(source, ANNOTATION_LEADER_SERVICE_NAME) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!(
            "{}{}",
            source.metadata.name.as_deref().unwrap_or_default(),
            DEFAULT_LEADER_SERVICE_SUFFIX
        ),
    }
}

/// Sticky policy: true unless explicitly disabled with `"false"`.
pub fn sticky(source: &Service) -> bool {
    annotation(source, ANNOTATION_STICKY) != Some("false")
}

/// Minimum continuous-Ready duration before a pod is eligible for fresh
/// selection. Invalid or absent values silently degrade to zero, per the
/// flap-damping contract.
pub fn min_ready_duration(source: &Service) -> Duration {
    annotation(source, ANNOTATION_MIN_READY_DURATION)
        .and_then(parse_duration)
        .unwrap_or(Duration::ZERO)
}

/// Parses a small subset of Go-style duration strings (`"30s"`, `"5m"`,
/// `"1h"`, `"500ms"`, or a bare integer meaning seconds). Unrecognized
/// input returns `None`.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split_at = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split_at);
    if digits.is_empty() {
        return None;
    }
    let value: u64 = digits.parse().ok()?;
    match unit {
        "" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

//! Per-service scaling decision with downscale hysteresis.

use std::time::Duration;

use serde::Serialize;

/// A scaling decision for a single service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScaleDecision {
    /// Add replicas.
    ScaleUp { from: u32, to: u32 },
    /// Drop to a single replica; demand is fully zero.
    ScaleDown { from: u32, to: u32 },
    /// Would scale down, but the last scale-up is too recent.
    Stabilizing { current: u32, remaining_secs: u64 },
    /// No change needed.
    NoChange,
}

impl ScaleDecision {
    /// Replica count to apply, if any.
    pub fn target(&self) -> Option<u32> {
        match self {
            ScaleDecision::ScaleUp { to, .. } | ScaleDecision::ScaleDown { to, .. } => Some(*to),
            ScaleDecision::Stabilizing { .. } | ScaleDecision::NoChange => None,
        }
    }
}

/// Compare current and required replicas.
///
/// `since_last_scale_up` is `None` when the service has never been scaled
/// up, which never blocks a scale-down. Excess capacity above a non-zero
/// requirement is kept.
///
/// Unmet demand always yields a `ScaleUp` to `min(required, max_replicas)`,
/// even when that is not above `current`. Applying it refreshes the
/// service's last scale-up time.
pub fn decide(
    current: u32,
    required: u32,
    max_replicas: u32,
    since_last_scale_up: Option<Duration>,
    stabilization: Duration,
) -> ScaleDecision {
    if current > 1 && required == 0 {
        return match since_last_scale_up {
            Some(elapsed) if elapsed < stabilization => ScaleDecision::Stabilizing {
                current,
                remaining_secs: (stabilization - elapsed).as_secs(),
            },
            _ => ScaleDecision::ScaleDown { from: current, to: 1 },
        };
    }

    if current < required {
        return ScaleDecision::ScaleUp {
            from: current,
            to: required.min(max_replicas),
        };
    }

    ScaleDecision::NoChange
}

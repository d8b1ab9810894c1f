use std::time::{Duration, SystemTime};

use crate::models::StagePlan;

/// Weighted completion for a task sitting in `stage` with `current` of
/// `total` units done. Earlier stages count in full; only the current stage's
/// counters matter. Overshoot is clamped to the stage's own weight and the
/// result to `[0, 100]`.
pub fn weighted_percentage(plan: &StagePlan, stage: &str, current: u64, total: u64) -> f64 {
    let completed_weight = plan.completed_weight(stage);
    let stage_weight = plan.weight(stage).unwrap_or(0.0);
    let stage_contribution = if total > 0 {
        (current as f64 / total as f64).min(1.0) * stage_weight
    } else {
        0.0
    };

    ((completed_weight + stage_contribution) * 100.0).clamp(0.0, 100.0)
}

/// Linear extrapolation: time per percent so far, times the percent left.
/// `None` when nothing has been done yet.
pub fn estimate_completion(
    start_time: SystemTime,
    now: SystemTime,
    percentage: f64,
) -> Option<SystemTime> {
    if percentage.is_nan() || percentage <= 0.0 {
        return None;
    }

    let elapsed_ms = now
        .duration_since(start_time)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
        * 1000.0;
    let remaining_ms = (elapsed_ms / percentage) * (100.0 - percentage);
    let remaining = Duration::try_from_secs_f64(remaining_ms.max(0.0) / 1000.0).ok()?;
    now.checked_add(remaining)
}

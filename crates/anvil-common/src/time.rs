//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Shared primitives and utilities for the agent runtime."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::time::Duration;

/// Convert a duration into milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(1_000)
        .saturating_add(u64::from(duration.subsec_millis()))
}

/// Scale a duration by a floating point factor, clamping negatives to zero.
pub fn scale_duration(duration: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(duration.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_conversion_carries_subseconds() {
        assert_eq!(duration_to_millis(Duration::from_millis(1_502)), 1_502);
    }

    #[test]
    fn scaling_clamps_negative_factors() {
        assert_eq!(scale_duration(Duration::from_secs(10), -1.0), Duration::ZERO);
        assert_eq!(
            scale_duration(Duration::from_secs(10), 0.5),
            Duration::from_secs(5)
        );
    }
}

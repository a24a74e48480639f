//! Threshold gate
//!
//! A fixed set of milestone percentages, each with a fired flag. Observing a
//! progress value fires every unfired milestone at or below it, once, in
//! ascending order. Flags only go back to unfired through [`ThresholdGate::reset`].
//!
//! The gate holds no reference to a sink: it reports which milestones fired and
//! the owning tracker emits the matching records. Mutation takes `&mut self`, so
//! one observation is one indivisible step for the subject that owns the gate.

use serde::{Deserialize, Serialize};

/// Milestones used by scroll and video tracking unless configured otherwise
pub const DEFAULT_MILESTONES: [u8; 4] = [25, 50, 75, 100];

/// One milestone and whether it has fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub value: u8,
    pub fired: bool,
}

/// Fire-once milestone tracker for a single subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdGate {
    milestones: Vec<Milestone>,
}

impl Default for ThresholdGate {
    fn default() -> Self {
        Self::new(DEFAULT_MILESTONES)
    }
}

impl ThresholdGate {
    /// Gate over `milestones`; values are sorted and deduplicated, and values
    /// above 100 are dropped since progress never exceeds 100
    pub fn new(milestones: impl IntoIterator<Item = u8>) -> Self {
        let mut values: Vec<u8> = milestones.into_iter().filter(|m| *m <= 100).collect();
        values.sort_unstable();
        values.dedup();

        Self {
            milestones: values
                .into_iter()
                .map(|value| Milestone { value, fired: false })
                .collect(),
        }
    }

    /// Record a progress observation and return the milestones it fired, in
    /// ascending order. Non-finite progress is ignored.
    pub fn observe(&mut self, progress: f64) -> Vec<u8> {
        if !progress.is_finite() {
            return Vec::new();
        }

        let mut fired = Vec::new();
        for milestone in self.milestones.iter_mut() {
            if !milestone.fired && progress >= f64::from(milestone.value) {
                milestone.fired = true;
                fired.push(milestone.value);
            }
        }
        fired
    }

    /// Clear every fired flag. Emits nothing.
    pub fn reset(&mut self) {
        for milestone in self.milestones.iter_mut() {
            milestone.fired = false;
        }
    }

    /// Milestone values in ascending order
    pub fn milestones(&self) -> Vec<u8> {
        self.milestones.iter().map(|m| m.value).collect()
    }

    /// Milestones fired so far, ascending
    pub fn fired(&self) -> Vec<u8> {
        self.milestones
            .iter()
            .filter(|m| m.fired)
            .map(|m| m.value)
            .collect()
    }

    pub fn is_fired(&self, value: u8) -> bool {
        self.milestones.iter().any(|m| m.value == value && m.fired)
    }

    /// Whether every milestone has fired
    pub fn is_complete(&self) -> bool {
        self.milestones.iter().all(|m| m.fired)
    }
}

/// Whole-number percentage of `numerator / denominator`, clamped to [0, 100].
///
/// Returns `None` when the denominator is zero, negative or not finite, or the
/// numerator is not finite; callers skip the observation in that case.
pub fn progress_percent(numerator: f64, denominator: f64) -> Option<f64> {
    if !numerator.is_finite() || !denominator.is_finite() || denominator <= 0.0 {
        return None;
    }
    Some(((numerator / denominator) * 100.0).round().clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_to_end_fires_all_in_order() {
        let mut gate = ThresholdGate::default();
        assert_eq!(gate.observe(0.0), Vec::<u8>::new());
        assert_eq!(gate.observe(100.0), vec![25, 50, 75, 100]);
        assert!(gate.is_complete());
        assert_eq!(gate.observe(100.0), Vec::<u8>::new());
    }

    #[test]
    fn test_each_milestone_fires_once() {
        let mut gate = ThresholdGate::default();
        let mut fired = Vec::new();
        for p in [10.0, 26.0, 26.0, 49.0, 51.0, 30.0, 74.0, 76.0, 80.0] {
            fired.extend(gate.observe(p));
        }
        assert_eq!(fired, vec![25, 50, 75]);
        assert!(!gate.is_fired(100));
    }

    #[test]
    fn test_backwards_signal_does_not_unfire() {
        let mut gate = ThresholdGate::default();
        gate.observe(60.0);
        gate.observe(5.0);
        assert_eq!(gate.fired(), vec![25, 50]);
    }

    #[test]
    fn test_reset_allows_refire() {
        let mut gate = ThresholdGate::default();
        assert_eq!(gate.observe(25.0), vec![25]);
        gate.reset();
        assert!(gate.fired().is_empty());
        assert_eq!(gate.observe(30.0), vec![25]);
    }

    #[test]
    fn test_non_finite_progress_ignored() {
        let mut gate = ThresholdGate::default();
        assert!(gate.observe(f64::NAN).is_empty());
        assert!(gate.observe(f64::INFINITY).is_empty());
        assert!(gate.fired().is_empty());
    }

    #[test]
    fn test_custom_milestones_sorted_and_deduplicated() {
        let gate = ThresholdGate::new([90, 10, 10, 150, 50]);
        assert_eq!(gate.milestones(), vec![10, 50, 90]);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(250.0, 1000.0), Some(25.0));
        assert_eq!(progress_percent(246.0, 1000.0), Some(25.0));
        assert_eq!(progress_percent(1200.0, 1000.0), Some(100.0));
        assert_eq!(progress_percent(-40.0, 1000.0), Some(0.0));
        assert_eq!(progress_percent(10.0, 0.0), None);
        assert_eq!(progress_percent(10.0, f64::NAN), None);
        assert_eq!(progress_percent(f64::NAN, 10.0), None);
    }
}

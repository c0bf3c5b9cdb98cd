// src/threshold.rs
//! Current-vs-required amount tracking with change notifications

use ethers::types::U256;
use std::fmt;
use tracing::warn;

/// How a value change affected a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementStatus {
    NowSatisfied,
    NoLongerSatisfied,
    StillSatisfied,
    StillNotSatisfied,
}

impl RequirementStatus {
    /// Pick the outcome from the satisfaction state before and after a write.
    pub fn classify(was_satisfied: bool, is_satisfied: bool) -> Self {
        match (was_satisfied, is_satisfied) {
            (false, true) => Self::NowSatisfied,
            (true, false) => Self::NoLongerSatisfied,
            (true, true) => Self::StillSatisfied,
            (false, false) => Self::StillNotSatisfied,
        }
    }

    /// True when satisfaction flipped.
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::NowSatisfied | Self::NoLongerSatisfied)
    }
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NowSatisfied => "now",
            Self::NoLongerSatisfied => "no longer",
            Self::StillSatisfied => "still",
            Self::StillNotSatisfied => "still not",
        };
        f.write_str(text)
    }
}

/// Notification produced whenever a requirement's raw value changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementChange {
    pub name: String,
    pub status: RequirementStatus,
    pub current: U256,
    pub required: U256,
}

pub type RequirementListener = Box<dyn Fn(&RequirementChange) + Send + Sync>;

/// A named amount that must reach a required value.
pub struct ThresholdRequirement {
    name: String,
    current: U256,
    required: U256,
    listener: Option<RequirementListener>,
}

impl ThresholdRequirement {
    pub fn new(name: impl Into<String>, required: U256) -> Self {
        Self {
            name: name.into(),
            current: U256::zero(),
            required,
            listener: None,
        }
    }

    /// Register an observer invoked on every value change.
    pub fn with_listener(mut self, listener: RequirementListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> U256 {
        self.current
    }

    pub fn required(&self) -> U256 {
        self.required
    }

    pub fn is_satisfied(&self) -> bool {
        self.current >= self.required
    }

    /// Returns the change when the value actually moved.
    pub fn set_current(&mut self, value: U256) -> Option<RequirementChange> {
        if self.current == value {
            return None;
        }
        let was_satisfied = self.is_satisfied();
        self.current = value;
        Some(self.on_change(was_satisfied))
    }

    /// Returns the change when the value actually moved.
    pub fn set_required(&mut self, value: U256) -> Option<RequirementChange> {
        if self.required == value {
            return None;
        }
        let was_satisfied = self.is_satisfied();
        self.required = value;
        Some(self.on_change(was_satisfied))
    }

    fn on_change(&self, was_satisfied: bool) -> RequirementChange {
        let change = RequirementChange {
            name: self.name.clone(),
            status: RequirementStatus::classify(was_satisfied, self.is_satisfied()),
            current: self.current,
            required: self.required,
        };

        warn!(
            "{} requirement is {} satisfied\n{}",
            self.name,
            change.status,
            self.description()
        );

        if let Some(listener) = &self.listener {
            listener(&change);
        }

        change
    }

    /// One status-table row: name, good/wrong, actual and required amounts.
    pub fn description(&self) -> String {
        format!(
            "{:<14} | {} | actual: {:>12} | required: {:>12}",
            self.name,
            bool_string(self.is_satisfied()),
            format_amount(self.current),
            format_amount(self.required),
        )
    }
}

impl fmt::Debug for ThresholdRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdRequirement")
            .field("name", &self.name)
            .field("current", &self.current)
            .field("required", &self.required)
            .finish()
    }
}

/// Fixed-width good/wrong marker used in status tables.
pub fn bool_string(value: bool) -> String {
    format!("{:<14}", if value { "good" } else { "wrong" })
}

/// Ether units with four decimals.
pub fn format_amount(value: U256) -> String {
    format!("{:.4}", to_ether(value))
}

/// Lossy conversion for display and gauges.
pub fn to_ether(value: U256) -> f64 {
    ethers::utils::format_ether(value).parse().unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(name: &str, required: u64) -> (ThresholdRequirement, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let requirement = ThresholdRequirement::new(name, U256::from(required)).with_listener(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (requirement, calls)
    }

    #[test]
    fn test_classify() {
        assert_eq!(RequirementStatus::classify(false, true), RequirementStatus::NowSatisfied);
        assert_eq!(RequirementStatus::classify(true, false), RequirementStatus::NoLongerSatisfied);
        assert_eq!(RequirementStatus::classify(true, true), RequirementStatus::StillSatisfied);
        assert_eq!(RequirementStatus::classify(false, false), RequirementStatus::StillNotSatisfied);
        assert!(RequirementStatus::NowSatisfied.is_transition());
        assert!(!RequirementStatus::StillNotSatisfied.is_transition());
    }

    #[test]
    fn test_transitions() {
        let (mut stake, calls) = counting("Stake", 100);
        assert!(!stake.is_satisfied());

        let change = stake.set_current(U256::from(50)).unwrap();
        assert_eq!(change.status, RequirementStatus::StillNotSatisfied);

        let change = stake.set_current(U256::from(100)).unwrap();
        assert_eq!(change.status, RequirementStatus::NowSatisfied);

        let change = stake.set_current(U256::from(150)).unwrap();
        assert_eq!(change.status, RequirementStatus::StillSatisfied);

        let change = stake.set_required(U256::from(200)).unwrap();
        assert_eq!(change.status, RequirementStatus::NoLongerSatisfied);
        assert_eq!(change.current, U256::from(150));
        assert_eq!(change.required, U256::from(200));

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unchanged_value_does_not_notify() {
        let (mut balance, calls) = counting("Balance", 10);

        assert!(balance.set_current(U256::from(20)).is_some());
        assert!(balance.set_current(U256::from(20)).is_none());
        assert!(balance.set_required(U256::from(10)).is_none());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_satisfied_matches_comparison_for_any_sequence() {
        let (mut requirement, calls) = counting("Balance", 0);
        let writes: [(bool, u64); 10] = [
            (true, 5),
            (false, 5),
            (false, 7),
            (true, 7),
            (true, 3),
            (false, 0),
            (true, 0),
            (false, 1),
            (true, 1),
            (true, 9),
        ];

        let mut expected_calls = 0;
        for (is_current, value) in writes {
            let value = U256::from(value);
            let before = if is_current {
                requirement.current()
            } else {
                requirement.required()
            };
            let change = if is_current {
                requirement.set_current(value)
            } else {
                requirement.set_required(value)
            };
            if before != value {
                expected_calls += 1;
            }
            assert_eq!(change.is_some(), before != value);
            assert_eq!(
                requirement.is_satisfied(),
                requirement.current() >= requirement.required()
            );
        }

        assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
    }

    #[test]
    fn test_description() {
        let mut stake = ThresholdRequirement::new("Stake", U256::exp10(18));
        stake.set_current(U256::exp10(18) * 2);

        let description = stake.description();
        assert!(description.starts_with("Stake          | good"));
        assert!(description.contains("actual:       2.0000"));
        assert!(description.contains("required:       1.0000"));
    }
}

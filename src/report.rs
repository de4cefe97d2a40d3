//! Per-unit outcome tracking for batch runs.
//!
//! Batch loops (grading a session, aggregating insights, ingesting several
//! lectures) tolerate per-unit failures. Instead of logging and forgetting,
//! each unit's fate is collected into a report the caller can inspect.

use std::fmt;

/// What happened to one unit of work in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Unit finished; `detail` carries a short result description
    Completed { unit: String, detail: String },
    /// Unit had nothing to do
    Skipped { unit: String, reason: String },
    /// Unit failed; the batch carried on
    Failed { unit: String, reason: String },
}

impl UnitOutcome {
    pub fn completed(unit: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Completed {
            unit: unit.into(),
            detail: detail.into(),
        }
    }

    pub fn skipped(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Skipped {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn unit(&self) -> &str {
        match self {
            Self::Completed { unit, .. } | Self::Skipped { unit, .. } | Self::Failed { unit, .. } => {
                unit
            }
        }
    }
}

/// Outcomes collected across one batch run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: UnitOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Completed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(o)).count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} skipped, {} failed",
            self.completed(),
            self.skipped(),
            self.failed()
        )
    }
}

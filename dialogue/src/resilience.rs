//! Resilience: degraded outcomes for completion calls
//!
//! A failed completion never aborts a turn. Instead the call site receives a
//! sentinel value wrapped as degraded, so callers and tests can tell an
//! answer the service actually gave from one substituted after a failure.
//!
//! # Design
//!
//! ```text
//! Completion call
//!   ├─ Ok(value)  → ServiceOutcome::Success(value)
//!   └─ Err(error) → ServiceOutcome::Degraded { sentinel, reason }
//! ```
//!
//! Per-kind health counters accumulate across the run and are reported with
//! the experiment summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persona::{PromptKind, ServiceError};

/// Value returned by a completion call, or the sentinel that replaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOutcome<T> {
    /// The service answered.
    Success(T),
    /// The service failed; `sentinel` stands in for the answer.
    Degraded { sentinel: T, reason: String },
}

impl<T> ServiceOutcome<T> {
    /// Wrap a call result, building the sentinel only on failure.
    pub fn from_result<F>(result: Result<T, ServiceError>, sentinel: F) -> Self
    where
        F: FnOnce() -> T,
    {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Degraded {
                sentinel: sentinel(),
                reason: err.to_string(),
            },
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Success(value) => value,
            Self::Degraded { sentinel, .. } => sentinel,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Success(value) => value,
            Self::Degraded { sentinel, .. } => sentinel,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Failure reason, if degraded.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }
}

/// Record of one completion call made during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub kind: PromptKind,
    /// Failure reason when the call degraded.
    pub failure: Option<String>,
}

impl ServiceCall {
    pub fn observe<T>(kind: PromptKind, outcome: &ServiceOutcome<T>) -> Self {
        Self {
            kind,
            failure: outcome.reason().map(str::to_string),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// How much of a service is currently working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DegradationLevel {
    /// Answering normally.
    Full,
    /// Recent failures, still answering some calls.
    Partial,
    /// Three or more consecutive failures.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Health of one prompt kind, tracked over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub kind: PromptKind,
    pub level: DegradationLevel,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
}

impl ServiceHealth {
    pub fn new(kind: PromptKind) -> Self {
        Self {
            kind,
            level: DegradationLevel::Full,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_calls: 0,
            total_failures: 0,
            last_error: None,
            last_change: Utc::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.total_calls += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;

        // Recover after 3 consecutive successes
        if self.level != DegradationLevel::Full && self.consecutive_successes >= 3 {
            self.level = DegradationLevel::Full;
            self.last_change = Utc::now();
            self.last_error = None;
        }
    }

    pub fn record_failure(&mut self, error: &str) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.last_error = Some(error.to_string());

        let new_level = if self.consecutive_failures >= 3 {
            DegradationLevel::Unavailable
        } else {
            DegradationLevel::Partial
        };

        if new_level != self.level {
            self.level = new_level;
            self.last_change = Utc::now();
        }
    }

    /// Failure rate as a fraction (0.0–1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_calls as f64
        }
    }
}

/// Health of every prompt kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthBoard {
    services: BTreeMap<PromptKind, ServiceHealth>,
}

impl Default for HealthBoard {
    fn default() -> Self {
        Self {
            services: PromptKind::ALL
                .iter()
                .map(|kind| (*kind, ServiceHealth::new(*kind)))
                .collect(),
        }
    }
}

impl HealthBoard {
    pub fn record(&mut self, call: &ServiceCall) {
        let health = self
            .services
            .entry(call.kind)
            .or_insert_with(|| ServiceHealth::new(call.kind));
        match &call.failure {
            None => health.record_success(),
            Some(reason) => health.record_failure(reason),
        }
    }

    pub fn record_all<'a>(&mut self, calls: impl IntoIterator<Item = &'a ServiceCall>) {
        for call in calls {
            self.record(call);
        }
    }

    pub fn get(&self, kind: PromptKind) -> Option<&ServiceHealth> {
        self.services.get(&kind)
    }

    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        self.services.values().cloned().collect()
    }

    pub fn total_failures(&self) -> u64 {
        self.services.values().map(|h| h.total_failures).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> ServiceError {
        ServiceError::Timeout {
            kind: PromptKind::UnderstandNovlang,
            seconds: 5,
        }
    }

    #[test]
    fn test_outcome_success() {
        let outcome = ServiceOutcome::from_result(Ok(7), || 0);
        assert!(!outcome.is_degraded());
        assert_eq!(*outcome.value(), 7);
        assert!(outcome.reason().is_none());
    }

    #[test]
    fn test_outcome_degraded_uses_sentinel() {
        let outcome: ServiceOutcome<String> =
            ServiceOutcome::from_result(Err(timeout()), || "(could not interpret)".to_string());
        assert!(outcome.is_degraded());
        assert_eq!(outcome.value(), "(could not interpret)");
        assert!(outcome.reason().unwrap().contains("timed out"));
        assert_eq!(outcome.into_value(), "(could not interpret)");
    }

    #[test]
    fn test_service_call_observe() {
        let ok = ServiceOutcome::from_result(Ok(()), || ());
        let call = ServiceCall::observe(PromptKind::GenerateChat, &ok);
        assert!(call.succeeded());

        let bad: ServiceOutcome<()> = ServiceOutcome::from_result(Err(timeout()), || ());
        let call = ServiceCall::observe(PromptKind::UnderstandNovlang, &bad);
        assert!(!call.succeeded());
    }

    #[test]
    fn test_health_degrades_and_recovers() {
        let mut health = ServiceHealth::new(PromptKind::VerifyUnderstanding);
        health.record_failure("timeout");
        assert_eq!(health.level, DegradationLevel::Partial);
        health.record_failure("timeout");
        health.record_failure("timeout");
        assert_eq!(health.level, DegradationLevel::Unavailable);

        health.record_success();
        health.record_success();
        assert_eq!(health.level, DegradationLevel::Unavailable);
        health.record_success();
        assert_eq!(health.level, DegradationLevel::Full);
        assert!(health.last_error.is_none());
        assert_eq!(health.total_calls, 6);
        assert!((health.failure_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_health_board_records_calls() {
        let mut board = HealthBoard::default();
        board.record_all(&[
            ServiceCall {
                kind: PromptKind::GenerateChat,
                failure: None,
            },
            ServiceCall {
                kind: PromptKind::VerifyUnderstanding,
                failure: Some("boom".into()),
            },
        ]);
        assert_eq!(board.get(PromptKind::GenerateChat).unwrap().total_calls, 1);
        assert_eq!(board.total_failures(), 1);
        assert_eq!(board.snapshot().len(), 3);
    }
}

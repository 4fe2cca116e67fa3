//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Retry orchestration.
//!
//! Every dispatch failure is first classified into a [`RetryReason`]; the
//! orchestrator then decides from a fixed table whether another attempt is
//! allowed, and schedules it with capped exponential backoff plus jitter.
//! There is no dynamic dispatch anywhere in the decision path — reason and
//! idempotency fully determine the outcome, and the operation deadline is
//! the only budget.

use rand::Rng;
use std::time::{Duration, Instant};

/// Why a dispatch attempt did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The target session is not in the ready state yet.
    NotReady,
    /// The server said the partition lives elsewhere.
    NotMyVbucket,
    /// The document is locked.
    Locked,
    /// The server reported a temporary failure.
    TemporaryFailure,
    /// The connection dropped while the command was in flight.
    SocketClosedInFlight,
    /// No node currently advertises the required service.
    ServiceNotAvailable,
    /// Authentication on the session has not finished.
    AuthPending,
    /// The collection id cache was invalidated or the server did not
    /// recognize the collection.
    CollectionUnknown,
    /// A newer config was promised but has not arrived yet.
    ConfigNotUpdated,
}

impl RetryReason {
    /// Returns `true` when the failure class is retryable at all.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        // Every classified reason is retryable by definition; unclassifiable
        // failures never make it into a RetryReason.
        match self {
            Self::NotReady
            | Self::NotMyVbucket
            | Self::Locked
            | Self::TemporaryFailure
            | Self::SocketClosedInFlight
            | Self::ServiceNotAvailable
            | Self::AuthPending
            | Self::CollectionUnknown
            | Self::ConfigNotUpdated => true,
        }
    }

    /// Returns `true` when a non-idempotent operation may also be retried
    /// for this reason.
    ///
    /// The only reason that forbids it is a socket closing with the command
    /// in flight: the server may have applied the mutation before the drop,
    /// and re-dispatching could apply it twice.
    #[must_use]
    pub const fn allows_non_idempotent(self) -> bool {
        !matches!(self, Self::SocketClosedInFlight)
    }
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotReady => "not_ready",
            Self::NotMyVbucket => "not_my_vbucket",
            Self::Locked => "locked",
            Self::TemporaryFailure => "temporary_failure",
            Self::SocketClosedInFlight => "socket_closed_in_flight",
            Self::ServiceNotAvailable => "service_not_available",
            Self::AuthPending => "auth_pending",
            Self::CollectionUnknown => "collection_unknown",
            Self::ConfigNotUpdated => "config_not_updated",
        };
        f.write_str(name)
    }
}

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling on any single delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1),
            max: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempts` (0-based):
    /// `min(max, base * 2^attempts) + jitter`, jitter uniform in `[0, base)`.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponential = self
            .base
            .saturating_mul(2u32.saturating_pow(attempts.min(16)));
        let capped = exponential.min(self.max);
        let jitter_ns = rand::thread_rng().gen_range(0..self.base.as_nanos().max(1)) as u64;
        capped + Duration::from_nanos(jitter_ns)
    }
}

/// Mutable state of one logical operation across its dispatch attempts.
#[derive(Debug)]
pub struct RetryContext {
    /// Absolute deadline for the whole operation.
    pub deadline: Instant,
    /// When the operation started, for error reporting.
    pub started: Instant,
    /// Attempts made so far.
    pub attempts: u32,
    /// Reasons observed, oldest first.
    pub reasons: Vec<RetryReason>,
}

impl RetryContext {
    /// Starts a context with the given total timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            deadline: now + timeout,
            started: now,
            attempts: 0,
            reasons: Vec::new(),
        }
    }

    /// Time spent since the first attempt.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Remaining budget until the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// The verdict for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then dispatch again.
    RetryAfter(Duration),
    /// Stop; surface the underlying error to the caller.
    GiveUp,
}

/// Decides, for every failure, whether to retry and after how long.
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    policy: BackoffPolicy,
}

impl RetryOrchestrator {
    /// Creates an orchestrator with an explicit backoff policy.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    /// Records the failure in the context and decides the next step.
    ///
    /// A retry is scheduled when the reason permits it for this operation's
    /// idempotency and the computed delay still fits inside the deadline;
    /// otherwise the caller surfaces the last underlying error together with
    /// the accumulated reason trace.
    pub fn plan(
        &self,
        ctx: &mut RetryContext,
        reason: RetryReason,
        idempotent: bool,
    ) -> RetryDecision {
        self.plan_with(ctx, reason, idempotent, None)
    }

    /// Like [`plan`](Self::plan), with an optional server-dictated delay.
    ///
    /// The error map may attach a retry strategy to a status; when the
    /// caller resolved one, it overrides the local backoff policy. The
    /// deadline check applies either way.
    pub fn plan_with(
        &self,
        ctx: &mut RetryContext,
        reason: RetryReason,
        idempotent: bool,
        server_delay: Option<Duration>,
    ) -> RetryDecision {
        ctx.reasons.push(reason);
        if !reason.is_retryable() || (!idempotent && !reason.allows_non_idempotent()) {
            return RetryDecision::GiveUp;
        }
        let delay = server_delay.unwrap_or_else(|| self.policy.delay(ctx.attempts));
        if Instant::now() + delay >= ctx.deadline {
            return RetryDecision::GiveUp;
        }
        ctx.attempts += 1;
        RetryDecision::RetryAfter(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_table() {
        assert!(RetryReason::NotMyVbucket.is_retryable());
        assert!(RetryReason::NotMyVbucket.allows_non_idempotent());
        assert!(RetryReason::SocketClosedInFlight.is_retryable());
        assert!(!RetryReason::SocketClosedInFlight.allows_non_idempotent());
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(100),
        };
        // Jitter adds at most `base`, so bounds are easy to pin down.
        for attempts in 0..10u32 {
            let delay = policy.delay(attempts);
            let exponential = Duration::from_millis(1 << attempts.min(16));
            let expected = exponential.min(Duration::from_millis(100));
            assert!(delay >= expected);
            assert!(delay < expected + Duration::from_millis(2));
        }
        // Far past the cap.
        assert!(policy.delay(30) <= Duration::from_millis(102));
    }

    #[test]
    fn test_plan_retries_idempotent() {
        let orchestrator = RetryOrchestrator::default();
        let mut ctx = RetryContext::new(Duration::from_secs(10));
        match orchestrator.plan(&mut ctx, RetryReason::TemporaryFailure, true) {
            RetryDecision::RetryAfter(_) => {}
            RetryDecision::GiveUp => panic!("expected retry"),
        }
        assert_eq!(ctx.attempts, 1);
        assert_eq!(ctx.reasons, vec![RetryReason::TemporaryFailure]);
    }

    #[test]
    fn test_plan_protects_non_idempotent_in_flight() {
        let orchestrator = RetryOrchestrator::default();
        let mut ctx = RetryContext::new(Duration::from_secs(10));
        let decision = orchestrator.plan(&mut ctx, RetryReason::SocketClosedInFlight, false);
        assert_eq!(decision, RetryDecision::GiveUp);

        // The same reason is fine for an idempotent read.
        let decision = orchestrator.plan(&mut ctx, RetryReason::SocketClosedInFlight, true);
        assert!(matches!(decision, RetryDecision::RetryAfter(_)));
    }

    #[test]
    fn test_plan_respects_deadline() {
        let orchestrator = RetryOrchestrator::new(BackoffPolicy {
            base: Duration::from_millis(50),
            max: Duration::from_secs(1),
        });
        let mut ctx = RetryContext::new(Duration::from_millis(1));
        let decision = orchestrator.plan(&mut ctx, RetryReason::TemporaryFailure, true);
        assert_eq!(decision, RetryDecision::GiveUp);
    }

    #[test]
    fn test_server_delay_overrides_policy() {
        let orchestrator = RetryOrchestrator::new(BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
        });
        let mut ctx = RetryContext::new(Duration::from_secs(10));
        let decision = orchestrator.plan_with(
            &mut ctx,
            RetryReason::TemporaryFailure,
            true,
            Some(Duration::from_millis(123)),
        );
        assert_eq!(
            decision,
            RetryDecision::RetryAfter(Duration::from_millis(123))
        );
    }

    #[test]
    fn test_reason_trace_accumulates() {
        let orchestrator = RetryOrchestrator::default();
        let mut ctx = RetryContext::new(Duration::from_secs(10));
        orchestrator.plan(&mut ctx, RetryReason::NotReady, true);
        orchestrator.plan(&mut ctx, RetryReason::NotMyVbucket, true);
        assert_eq!(
            ctx.reasons,
            vec![RetryReason::NotReady, RetryReason::NotMyVbucket]
        );
        assert_eq!(ctx.attempts, 2);
    }
}

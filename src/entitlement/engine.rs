//! Entitlement decision logic
//!
//! Pure functions over a record snapshot: given what the store returned and
//! the current instant, compute the decision and the record to write back.
//! No I/O happens here; `EntitlementService` owns reads, writes and locking.

use chrono::{DateTime, NaiveDate, Utc};

use super::types::{CreditsRemaining, Decision, EntitlementRecord, EntitlementStatus};

/// Result of running the engine against one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation<T> {
    pub outcome: T,
    /// Record to persist, or `None` when the snapshot is already current
    pub write: Option<EntitlementRecord>,
}

/// Daily-credit engine parameterised by the free allowance
#[derive(Debug, Clone, Copy)]
pub struct EntitlementEngine {
    daily_allowance: u32,
}

impl EntitlementEngine {
    pub fn new(daily_allowance: u32) -> Self {
        Self { daily_allowance }
    }

    pub fn daily_allowance(&self) -> u32 {
        self.daily_allowance
    }

    /// Decide a metered action, consuming one credit when allowed.
    pub fn evaluate(
        &self,
        snapshot: Option<&EntitlementRecord>,
        now: DateTime<Utc>,
    ) -> Evaluation<Decision> {
        let today = now.date_naive();
        let mut next = self.current(snapshot, now);

        if next.has_active_unlimited(now) {
            return finish(snapshot, next, Decision::unlimited());
        }

        self.reset_if_new_day(&mut next, today);

        if next.credits == 0 {
            return finish(snapshot, next, Decision::exhausted());
        }

        next.credits -= 1;
        let remaining = next.credits;
        finish(snapshot, next, Decision::allow(remaining))
    }

    /// Report the current entitlement without consuming anything.
    ///
    /// Lazy corrections (creation, expiry, daily reset) are still returned
    /// as a write.
    pub fn status(
        &self,
        snapshot: Option<&EntitlementRecord>,
        now: DateTime<Utc>,
    ) -> Evaluation<EntitlementStatus> {
        let mut next = self.current(snapshot, now);

        let credits_remaining = if next.has_active_unlimited(now) {
            CreditsRemaining::Unlimited
        } else {
            self.reset_if_new_day(&mut next, now.date_naive());
            CreditsRemaining::Limited(next.credits)
        };

        let status = EntitlementStatus {
            credits_remaining,
            unlimited: next.unlimited,
            subscription_plan: next.subscription_plan,
            valid_until: next.valid_until.filter(|_| next.unlimited),
        };

        finish(snapshot, next, status)
    }

    /// Materialise the snapshot and drop a stale unlimited grant
    fn current(&self, snapshot: Option<&EntitlementRecord>, now: DateTime<Utc>) -> EntitlementRecord {
        let mut record = match snapshot {
            Some(record) => record.clone(),
            None => EntitlementRecord::fresh(now.date_naive(), self.daily_allowance),
        };

        if record.is_stale_unlimited(now) {
            tracing::info!(valid_until = ?record.valid_until, "Subscription expired, unlimited revoked");
            record.unlimited = false;
        }

        record
    }

    fn reset_if_new_day(&self, record: &mut EntitlementRecord, today: NaiveDate) {
        if record.last_reset_date != today {
            record.credits = self.daily_allowance;
            record.last_reset_date = today;
        }
    }
}

fn finish<T>(
    snapshot: Option<&EntitlementRecord>,
    next: EntitlementRecord,
    outcome: T,
) -> Evaluation<T> {
    let write = match snapshot {
        Some(previous) if *previous == next => None,
        _ => Some(next),
    };
    Evaluation { outcome, write }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::types::{DenyReason, SubscriptionPlan};
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    /// Run `evaluate` and fold the write back into the stored snapshot
    fn step(
        engine: &EntitlementEngine,
        stored: &mut Option<EntitlementRecord>,
        now: DateTime<Utc>,
    ) -> Decision {
        let eval = engine.evaluate(stored.as_ref(), now);
        if let Some(write) = eval.write {
            *stored = Some(write);
        }
        eval.outcome
    }

    #[test]
    fn test_fresh_user_scenario() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 1, 9);
        let mut stored = None;

        let first = step(&engine, &mut stored, now);
        assert!(first.allowed);
        assert_eq!(first.credits_remaining, CreditsRemaining::Limited(1));

        let second = step(&engine, &mut stored, now + Duration::hours(1));
        assert!(second.allowed);
        assert_eq!(second.credits_remaining, CreditsRemaining::Limited(0));

        let third = step(&engine, &mut stored, now + Duration::hours(2));
        assert!(!third.allowed);
        assert_eq!(third.reason, Some(DenyReason::Exhausted));
    }

    #[test]
    fn test_deny_leaves_record_unchanged() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 1, 9);
        let record = EntitlementRecord {
            credits: 0,
            last_reset_date: now.date_naive(),
            ..Default::default()
        };

        let eval = engine.evaluate(Some(&record), now);
        assert!(!eval.outcome.allowed);
        assert!(eval.write.is_none());
    }

    #[test]
    fn test_single_reset_per_day() {
        let engine = EntitlementEngine::new(3);
        let day_one = at(2024, 5, 1, 23);
        let mut stored = Some(EntitlementRecord {
            credits: 0,
            last_reset_date: day_one.date_naive(),
            ..Default::default()
        });

        assert!(!step(&engine, &mut stored, day_one).allowed);

        // Next day: exactly `allowance` allowed calls, then denial
        let day_two = at(2024, 5, 2, 0);
        for expected in [2, 1, 0] {
            let decision = step(&engine, &mut stored, day_two);
            assert_eq!(decision.credits_remaining, CreditsRemaining::Limited(expected));
        }
        assert!(!step(&engine, &mut stored, day_two + Duration::hours(20)).allowed);
        assert_eq!(stored.as_ref().unwrap().last_reset_date, day_two.date_naive());
    }

    #[test]
    fn test_credits_never_negative() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 1, 9);
        let mut stored = None;

        for i in 0..50 {
            step(&engine, &mut stored, now + Duration::minutes(i * 90));
            // u32 storage makes negativity unrepresentable; check the bound
            assert!(stored.as_ref().unwrap().credits <= engine.daily_allowance());
        }
    }

    #[test]
    fn test_active_unlimited_consumes_nothing() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 1, 9);
        let record = EntitlementRecord {
            credits: 0,
            last_reset_date: now.date_naive(),
            unlimited: true,
            subscription_plan: SubscriptionPlan::Monthly,
            valid_until: Some(now + Duration::days(10)),
            email: None,
        };

        let eval = engine.evaluate(Some(&record), now);
        assert_eq!(eval.outcome, Decision::unlimited());
        assert!(eval.write.is_none());
    }

    #[test]
    fn test_expired_unlimited_falls_back_to_credits() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 3, 9);
        let record = EntitlementRecord {
            credits: 0,
            last_reset_date: at(2024, 5, 1, 9).date_naive(),
            unlimited: true,
            subscription_plan: SubscriptionPlan::Monthly,
            valid_until: Some(now - Duration::hours(1)),
            email: None,
        };

        let eval = engine.evaluate(Some(&record), now);
        assert!(eval.outcome.allowed);
        assert!(!eval.outcome.unlimited);
        assert_eq!(eval.outcome.credits_remaining, CreditsRemaining::Limited(1));

        let written = eval.write.unwrap();
        assert!(!written.unlimited);
        assert_eq!(written.last_reset_date, now.date_naive());
    }

    #[test]
    fn test_expired_unlimited_correction_persists_on_deny() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 3, 9);
        let record = EntitlementRecord {
            credits: 0,
            last_reset_date: now.date_naive(),
            unlimited: true,
            subscription_plan: SubscriptionPlan::Yearly,
            valid_until: Some(now - Duration::days(1)),
            email: None,
        };

        let eval = engine.evaluate(Some(&record), now);
        assert!(!eval.outcome.allowed);
        assert!(!eval.write.unwrap().unlimited);
    }

    #[test]
    fn test_zero_allowance_denies_fresh_user() {
        let engine = EntitlementEngine::new(0);
        let now = at(2024, 5, 1, 9);

        let eval = engine.evaluate(None, now);
        assert!(!eval.outcome.allowed);
        // The record is still created
        assert!(eval.write.is_some());
    }

    #[test]
    fn test_status_does_not_consume() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 1, 9);
        let record = EntitlementRecord {
            credits: 1,
            last_reset_date: now.date_naive(),
            ..Default::default()
        };

        let eval = engine.status(Some(&record), now);
        assert_eq!(eval.outcome.credits_remaining, CreditsRemaining::Limited(1));
        assert!(eval.write.is_none());
    }

    #[test]
    fn test_status_reports_reset_for_new_day() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 2, 9);
        let record = EntitlementRecord {
            credits: 0,
            last_reset_date: at(2024, 5, 1, 9).date_naive(),
            ..Default::default()
        };

        let eval = engine.status(Some(&record), now);
        assert_eq!(eval.outcome.credits_remaining, CreditsRemaining::Limited(2));
        assert_eq!(eval.write.unwrap().credits, 2);
    }

    #[test]
    fn test_status_for_unlimited_user() {
        let engine = EntitlementEngine::new(2);
        let now = at(2024, 5, 2, 9);
        let until = now + Duration::days(30);
        let record = EntitlementRecord {
            unlimited: true,
            subscription_plan: SubscriptionPlan::Monthly,
            valid_until: Some(until),
            ..Default::default()
        };

        let eval = engine.status(Some(&record), now);
        assert_eq!(eval.outcome.credits_remaining, CreditsRemaining::Unlimited);
        assert_eq!(eval.outcome.valid_until, Some(until));
        assert!(eval.write.is_none());
    }
}

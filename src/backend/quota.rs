// src/backend/quota.rs — Per-backend usage ledger
//
// Token counters roll over on UTC-date epochs; request rates use a
// fixed per-minute window that resets at minute boundaries. The limit
// checks are pure functions of the counters and the supplied clock —
// no I/O. Persistence happens by the scheduler folding `snapshot()`
// into the engine state before each checkpoint.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable usage counters for one backend, checkpointed with the
/// engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUsage {
    pub tokens_consumed: u64,
    pub requests_issued: u64,
    /// UTC date of the epoch the counters belong to.
    pub epoch_day: NaiveDate,
}

impl Default for BackendUsage {
    fn default() -> Self {
        Self {
            tokens_consumed: 0,
            requests_issued: 0,
            epoch_day: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
        }
    }
}

/// Configured ceilings for one backend.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub daily_token_limit: u64,
    pub rpm_limit: u32,
}

/// Requests seen in the current fixed minute window. Not durable —
/// rebuilt from zero on boot, which only ever under-counts.
#[derive(Debug, Clone, Copy, Default)]
struct MinuteWindow {
    minute: i64,
    requests: u32,
}

pub struct QuotaLedger {
    limits: BTreeMap<String, QuotaLimits>,
    usage: BTreeMap<String, BackendUsage>,
    windows: BTreeMap<String, MinuteWindow>,
}

impl QuotaLedger {
    pub fn new(limits: BTreeMap<String, QuotaLimits>) -> Self {
        Self {
            limits,
            usage: BTreeMap::new(),
            windows: BTreeMap::new(),
        }
    }

    /// Resume counters from a checkpointed snapshot.
    pub fn with_usage(mut self, usage: BTreeMap<String, BackendUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// Record a completed call. Rolls the epoch first if the UTC date
    /// has changed since the last record.
    pub fn record_usage(&mut self, backend: &str, tokens: u64, now: DateTime<Utc>) {
        let today = now.date_naive();
        let entry = self.usage.entry(backend.to_string()).or_default();
        if entry.epoch_day != today {
            entry.tokens_consumed = 0;
            entry.requests_issued = 0;
            entry.epoch_day = today;
        }
        entry.tokens_consumed += tokens;
        entry.requests_issued += 1;

        let minute = now.timestamp() / 60;
        let window = self.windows.entry(backend.to_string()).or_default();
        if window.minute != minute {
            window.minute = minute;
            window.requests = 0;
        }
        window.requests += 1;
    }

    /// Tokens consumed by `backend` within the current epoch. Counters
    /// from a previous epoch count as zero.
    fn tokens_this_epoch(&self, backend: &str, now: DateTime<Utc>) -> u64 {
        match self.usage.get(backend) {
            Some(u) if u.epoch_day == now.date_naive() => u.tokens_consumed,
            _ => 0,
        }
    }

    /// Requests in the current minute window.
    fn requests_this_minute(&self, backend: &str, now: DateTime<Utc>) -> u32 {
        match self.windows.get(backend) {
            Some(w) if w.minute == now.timestamp() / 60 => w.requests,
            _ => 0,
        }
    }

    /// Whether `backend` is below both its daily token ceiling and its
    /// per-minute request ceiling. Backends without configured limits
    /// (local fallbacks) are always within limit.
    pub fn within_limit(&self, backend: &str, now: DateTime<Utc>) -> bool {
        let Some(limits) = self.limits.get(backend) else {
            return true;
        };
        self.tokens_this_epoch(backend, now) < limits.daily_token_limit
            && self.requests_this_minute(backend, now) < limits.rpm_limit
    }

    /// Tokens left in the current epoch. Unlimited backends report
    /// `u64::MAX`.
    pub fn remaining(&self, backend: &str, now: DateTime<Utc>) -> u64 {
        let Some(limits) = self.limits.get(backend) else {
            return u64::MAX;
        };
        limits
            .daily_token_limit
            .saturating_sub(self.tokens_this_epoch(backend, now))
    }

    /// Durable counters, for folding back into the engine state.
    pub fn snapshot(&self) -> BTreeMap<String, BackendUsage> {
        self.usage.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limits(daily: u64, rpm: u32) -> BTreeMap<String, QuotaLimits> {
        let mut m = BTreeMap::new();
        m.insert(
            "gpt".to_string(),
            QuotaLimits {
                daily_token_limit: daily,
                rpm_limit: rpm,
            },
        );
        m
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 26, h, m, s).unwrap()
    }

    #[test]
    fn test_remaining_decreases_by_recorded_tokens() {
        let mut ledger = QuotaLedger::new(limits(1000, 60));
        let now = at(10, 0, 0);
        assert_eq!(ledger.remaining("gpt", now), 1000);
        ledger.record_usage("gpt", 250, now);
        assert_eq!(ledger.remaining("gpt", now), 750);
        ledger.record_usage("gpt", 250, now);
        assert_eq!(ledger.remaining("gpt", now), 500);
    }

    #[test]
    fn test_within_limit_flips_at_daily_ceiling() {
        let mut ledger = QuotaLedger::new(limits(300, 60));
        let now = at(9, 0, 0);
        assert!(ledger.within_limit("gpt", now));
        ledger.record_usage("gpt", 300, now);
        assert!(!ledger.within_limit("gpt", now));
    }

    #[test]
    fn test_epoch_rollover_restores_full_limit() {
        let mut ledger = QuotaLedger::new(limits(300, 60));
        let today = at(23, 59, 0);
        ledger.record_usage("gpt", 300, today);
        assert!(!ledger.within_limit("gpt", today));

        let tomorrow = Utc.with_ymd_and_hms(2026, 8, 27, 0, 1, 0).unwrap();
        // Pure query after rollover: old counters count as zero
        assert!(ledger.within_limit("gpt", tomorrow));
        assert_eq!(ledger.remaining("gpt", tomorrow), 300);

        // Recording in the new epoch resets the durable counters
        ledger.record_usage("gpt", 10, tomorrow);
        assert_eq!(ledger.snapshot()["gpt"].tokens_consumed, 10);
        assert_eq!(ledger.snapshot()["gpt"].requests_issued, 1);
    }

    #[test]
    fn test_rpm_window_resets_at_minute_boundary() {
        let mut ledger = QuotaLedger::new(limits(u64::MAX, 2));
        let t0 = at(10, 5, 10);
        ledger.record_usage("gpt", 1, t0);
        ledger.record_usage("gpt", 1, at(10, 5, 40));
        assert!(!ledger.within_limit("gpt", at(10, 5, 59)));
        // Deterministic reset at the minute boundary, not on first use
        assert!(ledger.within_limit("gpt", at(10, 6, 0)));
    }

    #[test]
    fn test_unknown_backend_is_unlimited() {
        let ledger = QuotaLedger::new(limits(100, 1));
        let now = at(12, 0, 0);
        assert!(ledger.within_limit("ollama", now));
        assert_eq!(ledger.remaining("ollama", now), u64::MAX);
    }

    #[test]
    fn test_tokens_monotone_within_epoch() {
        let mut ledger = QuotaLedger::new(limits(u64::MAX, 1000));
        let now = at(8, 0, 0);
        let mut last = 0;
        for t in [5u64, 0, 17, 3] {
            ledger.record_usage("gpt", t, now);
            let consumed = ledger.snapshot()["gpt"].tokens_consumed;
            assert!(consumed >= last);
            last = consumed;
        }
    }

    #[test]
    fn test_resume_from_snapshot() {
        let mut ledger = QuotaLedger::new(limits(1000, 60));
        let now = at(10, 0, 0);
        ledger.record_usage("gpt", 400, now);
        let snap = ledger.snapshot();

        let resumed = QuotaLedger::new(limits(1000, 60)).with_usage(snap);
        assert_eq!(resumed.remaining("gpt", now), 600);
    }
}

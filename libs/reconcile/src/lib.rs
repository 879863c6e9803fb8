//! Roster reconciliation primitives.
//!
//! This library holds the pure parts of the corpwatch poll loop:
//!
//! - **Roster**: the set of corporations in an alliance at one observation.
//! - **Diff**: turning two rosters into an ordered list of membership events.
//! - **Retry policy**: bounded exponential backoff shared by every call site
//!   that talks to the outside world.
//!
//! # Invariants
//!
//! - A roster never contains the same corporation twice
//! - `diff` is deterministic given the same inputs and performs no I/O
//! - Diffing against "no previous roster" yields nothing (baseline)

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use corpwatch_id::CorporationId;
use rand::Rng;
use serde::{Deserialize, Serialize};

// =============================================================================
// Roster
// =============================================================================

/// The corporations belonging to an alliance at one observation instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(BTreeSet<CorporationId>);

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a corporation. Returns false if it was already present.
    pub fn insert(&mut self, corporation_id: CorporationId) -> bool {
        self.0.insert(corporation_id)
    }

    pub fn contains(&self, corporation_id: CorporationId) -> bool {
        self.0.contains(&corporation_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate members in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = CorporationId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<CorporationId> for Roster {
    fn from_iter<I: IntoIterator<Item = CorporationId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<CorporationId>> for Roster {
    fn from(ids: Vec<CorporationId>) -> Self {
        ids.into_iter().collect()
    }
}

// =============================================================================
// Membership Events
// =============================================================================

/// Direction of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Corporation appeared in the roster.
    Joined,

    /// Corporation disappeared from the roster.
    Left,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Left => "left",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One corporation transition observed by a poll cycle.
///
/// `observed_at` is the timestamp of the cycle that noticed the change, not
/// the moment it happened in game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipEvent {
    pub corporation_id: CorporationId,
    pub kind: EventKind,
    pub observed_at: DateTime<Utc>,
}

impl MembershipEvent {
    pub fn joined(corporation_id: CorporationId, observed_at: DateTime<Utc>) -> Self {
        Self {
            corporation_id,
            kind: EventKind::Joined,
            observed_at,
        }
    }

    pub fn left(corporation_id: CorporationId, observed_at: DateTime<Utc>) -> Self {
        Self {
            corporation_id,
            kind: EventKind::Left,
            observed_at,
        }
    }
}

// =============================================================================
// Diff
// =============================================================================

/// Compute the membership events between two rosters.
///
/// Returns nothing when `old` is `None`: the first observation establishes
/// the baseline. Otherwise every `Left` event comes before every `Joined`
/// event, each group in ascending corporation id order.
pub fn diff(
    old: Option<&Roster>,
    new: &Roster,
    observed_at: DateTime<Utc>,
) -> Vec<MembershipEvent> {
    let Some(old) = old else {
        return Vec::new();
    };

    let left = old
        .0
        .difference(&new.0)
        .map(|&id| MembershipEvent::left(id, observed_at));
    let joined = new
        .0
        .difference(&old.0)
        .map(|&id| MembershipEvent::joined(id, observed_at));

    left.chain(joined).collect()
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded exponential backoff.
///
/// Attempt numbers are 1-based: attempt 1 is the first call, and
/// `delay_after(n)` is the wait between attempt `n` failing and attempt
/// `n + 1` starting.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Upper bound on a single delay (before jitter).
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0), applied symmetrically.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Returns true if another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Delay to wait after `attempt` failed, without jitter.
    pub fn base_delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = self.base_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let delay = delay.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay as u64)
    }

    /// Delay to wait after `attempt` failed, with jitter applied.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_after(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }

        let range = delay.as_millis() as f64 * jitter;
        let offset = rand::rng().random_range(-range..=range);
        Duration::from_millis((delay.as_millis() as f64 + offset).max(0.0) as u64)
    }
}

/// Default attempts per call site.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn roster(ids: &[i64]) -> Roster {
        ids.iter().map(|&id| CorporationId::new(id)).collect()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn summarize(events: &[MembershipEvent]) -> Vec<(EventKind, i64)> {
        events
            .iter()
            .map(|e| (e.kind, e.corporation_id.value()))
            .collect()
    }

    #[test]
    fn test_roster_deduplicates() {
        let r = Roster::from(vec![
            CorporationId::new(3),
            CorporationId::new(1),
            CorporationId::new(3),
        ]);
        assert_eq!(r.len(), 2);
        assert_eq!(r.iter().map(|c| c.value()).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_roster_serializes_as_sorted_array() {
        let json = serde_json::to_string(&roster(&[30, 10, 20])).unwrap();
        assert_eq!(json, "[10,20,30]");
    }

    #[test]
    fn test_diff_baseline_is_silent() {
        let events = diff(None, &roster(&[1, 2, 3, 4, 5]), now());
        assert!(events.is_empty());
    }

    #[test]
    fn test_diff_left_before_joined() {
        let events = diff(Some(&roster(&[1, 2, 3])), &roster(&[2, 3, 4]), now());
        assert_eq!(
            summarize(&events),
            vec![(EventKind::Left, 1), (EventKind::Joined, 4)]
        );
        assert!(events.iter().all(|e| e.observed_at == now()));
    }

    #[rstest]
    #[case(&[], &[], &[])]
    #[case(&[], &[5, 1], &[(EventKind::Joined, 1), (EventKind::Joined, 5)])]
    #[case(&[9, 2], &[], &[(EventKind::Left, 2), (EventKind::Left, 9)])]
    #[case(
        &[10, 20, 30],
        &[20, 30, 40, 50],
        &[(EventKind::Left, 10), (EventKind::Joined, 40), (EventKind::Joined, 50)]
    )]
    #[case(&[7, 8], &[8, 7], &[])]
    fn test_diff_cases(
        #[case] old: &[i64],
        #[case] new: &[i64],
        #[case] expected: &[(EventKind, i64)],
    ) {
        let events = diff(Some(&roster(old)), &roster(new), now());
        assert_eq!(summarize(&events), expected.to_vec());
    }

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&EventKind::Joined).unwrap(),
            "\"joined\""
        );
        assert_eq!(EventKind::Left.to_string(), "left");
    }

    #[test]
    fn test_retry_policy_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(1000),
            jitter: 0.0,
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(50), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_policy_attempt_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(!RetryPolicy::no_retry().should_retry(1));

        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!zero.should_retry(1));
    }

    #[test]
    fn test_retry_policy_jitter_bounds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
        };

        for _ in 0..100 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_millis(750));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    fn id_set() -> impl Strategy<Value = BTreeSet<i64>> {
        proptest::collection::btree_set(1i64..500, 0..40)
    }

    proptest! {
        #[test]
        fn prop_unchanged_roster_yields_nothing(ids in id_set()) {
            let r: Roster = ids.into_iter().map(CorporationId::new).collect();
            prop_assert!(diff(Some(&r), &r, now()).is_empty());
        }

        #[test]
        fn prop_baseline_yields_nothing(ids in id_set()) {
            let r: Roster = ids.into_iter().map(CorporationId::new).collect();
            prop_assert!(diff(None, &r, now()).is_empty());
        }

        #[test]
        fn prop_disjoint_rosters(a in id_set(), b in id_set()) {
            let b: BTreeSet<i64> = b.difference(&a).copied().collect();
            let old: Roster = a.iter().copied().map(CorporationId::new).collect();
            let new: Roster = b.iter().copied().map(CorporationId::new).collect();

            let events = diff(Some(&old), &new, now());
            let left = events.iter().filter(|e| e.kind == EventKind::Left).count();
            let joined = events.iter().filter(|e| e.kind == EventKind::Joined).count();

            prop_assert_eq!(left, a.len());
            prop_assert_eq!(joined, b.len());
            prop_assert_eq!(events.len(), a.len() + b.len());
        }

        #[test]
        fn prop_events_are_ordered(a in id_set(), b in id_set()) {
            let old: Roster = a.into_iter().map(CorporationId::new).collect();
            let new: Roster = b.into_iter().map(CorporationId::new).collect();

            let events = diff(Some(&old), &new, now());
            let keys: Vec<(u8, i64)> = events
                .iter()
                .map(|e| (if e.kind == EventKind::Left { 0 } else { 1 }, e.corporation_id.value()))
                .collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);

            // No corporation appears in both groups.
            for e in &events {
                match e.kind {
                    EventKind::Left => prop_assert!(!new.contains(e.corporation_id)),
                    EventKind::Joined => prop_assert!(!old.contains(e.corporation_id)),
                }
            }
        }
    }
}

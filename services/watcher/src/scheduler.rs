//! Poll loop for detecting alliance membership changes.
//!
//! Each cycle:
//! - Fetches the current roster from the roster source
//! - Diffs it against the last known roster
//! - Persists the new roster as a snapshot
//! - Notifies every derived event, in diff order
//!
//! At most one cycle runs at a time. The last known roster is loaded once
//! at startup and afterwards lives only here; it is replaced only after the
//! snapshot holding it has been saved.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use corpwatch_id::AllianceId;
use corpwatch_reconcile::{diff, MembershipEvent, RetryPolicy, Roster};
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::notifier::{Notifier, NotifyError};
use crate::retry::{shutdown_requested, Interrupt, RetryError, Retrier};
use crate::source::{FetchError, RosterSource};
use crate::state::{Snapshot, SnapshotStore, StoreError};

/// Poll loop configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Interval between cycle starts.
    pub poll_interval: Duration,

    /// Timeout for each fetch, persist and notify call.
    pub call_timeout: Duration,

    /// Backoff shared by all call sites.
    pub retry: RetryPolicy,

    /// Max notifications in flight within one cycle.
    pub notify_concurrency: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: corpwatch_reconcile::DEFAULT_POLL_INTERVAL,
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            notify_concurrency: 1,
        }
    }
}

impl From<&Config> for WatcherConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            call_timeout: config.call_timeout,
            retry: config.retry.clone(),
            notify_concurrency: config.notify_concurrency,
        }
    }
}

/// Errors that stop the watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to load snapshot: {0}")]
    Load(#[source] StoreError),

    #[error("snapshot belongs to alliance {found}, but alliance {expected} is configured; move or delete the snapshot to start over")]
    AllianceMismatch {
        expected: AllianceId,
        found: AllianceId,
    },

    #[error("roster fetch failed permanently: {0}")]
    Fetch(#[source] FetchError),

    #[error("could not persist snapshot after {attempts} attempt(s): {source}")]
    Persist {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// Result of one poll cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The roster was fetched, persisted and its events dispatched.
    Completed(CycleReport),

    /// The roster could not be fetched; nothing changed.
    Skipped { attempts: u32, error: FetchError },

    /// Shutdown was requested before anything was persisted.
    Interrupted,
}

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cycle number, as persisted in the snapshot.
    pub cycle: u64,
    /// Timestamp stamped on the snapshot and every event.
    pub observed_at: DateTime<Utc>,
    /// True if there was no previous roster to compare against.
    pub baseline: bool,
    /// Corporations in the fetched roster.
    pub corporation_count: usize,
    /// Events derived by the diff, in dispatch order.
    pub events: Vec<MembershipEvent>,
    /// Events the notifier accepted.
    pub delivered: usize,
    /// Events dropped after exhausting their retries.
    pub dropped: usize,
    /// Events not attempted or cut short because of shutdown.
    pub abandoned: usize,
}

enum Delivery {
    Delivered,
    Dropped,
    Abandoned,
}

/// Alliance membership watcher.
pub struct Watcher {
    alliance_id: AllianceId,
    source: Arc<dyn RosterSource>,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    config: WatcherConfig,
    retrier: Retrier,
    shutdown: watch::Receiver<bool>,

    /// Last persisted roster; `None` until the first cycle completes.
    last_known: Option<Roster>,

    /// Cycle number of the last persisted snapshot.
    cycle: u64,
}

impl Watcher {
    /// Create a watcher, seeding the last known roster from the store.
    ///
    /// Fails if the stored snapshot is corrupt, has an unknown format, or
    /// belongs to a different alliance.
    pub fn new(
        alliance_id: AllianceId,
        source: Arc<dyn RosterSource>,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        config: WatcherConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, WatcherError> {
        let snapshot = store.load().map_err(WatcherError::Load)?;

        let (last_known, cycle) = match snapshot {
            Some(snapshot) if snapshot.alliance_id != alliance_id => {
                return Err(WatcherError::AllianceMismatch {
                    expected: alliance_id,
                    found: snapshot.alliance_id,
                });
            }
            Some(snapshot) => {
                info!(
                    alliance_id = %alliance_id,
                    cycle = snapshot.cycle,
                    observed_at = %snapshot.observed_at,
                    corporation_count = snapshot.corporations.len(),
                    "Resuming from snapshot"
                );
                (Some(snapshot.corporations), snapshot.cycle)
            }
            None => {
                info!(
                    alliance_id = %alliance_id,
                    "No snapshot, first cycle will establish the baseline"
                );
                (None, 0)
            }
        };

        let retrier = Retrier::new(config.retry.clone(), shutdown.clone());

        Ok(Self {
            alliance_id,
            source,
            store,
            notifier,
            config,
            retrier,
            shutdown,
            last_known,
            cycle,
        })
    }

    /// The roster the next cycle will diff against.
    pub fn last_known(&self) -> Option<&Roster> {
        self.last_known.as_ref()
    }

    /// Cycle number of the last persisted snapshot.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Run poll cycles until shutdown.
    pub async fn run(mut self) -> Result<(), WatcherError> {
        info!(
            alliance_id = %self.alliance_id,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            call_timeout_secs = self.config.call_timeout.as_secs(),
            max_attempts = self.config.retry.max_attempts,
            "Starting watcher"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        // A slow cycle pushes the schedule back instead of causing a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(self.shutdown.clone()) => {
                    info!("Watcher shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            match self.run_cycle().await? {
                CycleOutcome::Completed(report) => {
                    if report.abandoned > 0 {
                        warn!(
                            cycle = report.cycle,
                            abandoned = report.abandoned,
                            "Notifications abandoned at shutdown"
                        );
                    }
                }
                CycleOutcome::Skipped { .. } => {}
                CycleOutcome::Interrupted => {
                    info!("Cycle interrupted, watcher shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run one fetch, diff, persist, notify cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, WatcherError> {
        let cycle = self.cycle + 1;
        debug!(cycle, "Starting cycle");

        // Fetching
        let roster = match self.fetch_roster().await {
            Ok(roster) => roster,
            Err(RetryError::Cancelled) => return Ok(CycleOutcome::Interrupted),
            Err(RetryError::Fatal { attempts, error: e }) => {
                error!(attempts, error = %e, "Roster fetch failed permanently");
                return Err(WatcherError::Fetch(e));
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(
                    cycle,
                    attempts,
                    error = %last,
                    "Roster fetch failed, skipping cycle"
                );
                return Ok(CycleOutcome::Skipped {
                    attempts,
                    error: last,
                });
            }
        };
        let observed_at = Utc::now();

        // Diffing
        let baseline = self.last_known.is_none();
        let events = diff(self.last_known.as_ref(), &roster, observed_at);

        // Persisting
        let snapshot = Snapshot {
            alliance_id: self.alliance_id,
            cycle,
            observed_at,
            corporations: roster,
        };
        match self.persist(&snapshot).await {
            Ok(()) => {}
            Err(RetryError::Cancelled) => return Ok(CycleOutcome::Interrupted),
            Err(RetryError::Fatal {
                attempts,
                error: source,
            }) => return Err(WatcherError::Persist { attempts, source }),
            Err(RetryError::Exhausted { attempts, last }) => {
                return Err(WatcherError::Persist {
                    attempts,
                    source: last,
                })
            }
        }

        let corporation_count = snapshot.corporations.len();
        self.last_known = Some(snapshot.corporations);
        self.cycle = cycle;

        // Notifying. This only happens after the snapshot is durable: a crash
        // from here on can lose these notifications but a restart can never
        // derive and send them a second time.
        let (delivered, dropped, abandoned) = self.dispatch(&events).await;

        if baseline {
            info!(
                cycle,
                corporation_count,
                "Baseline roster established"
            );
        } else {
            info!(
                cycle,
                corporation_count,
                events = events.len(),
                delivered,
                dropped,
                "Cycle complete"
            );
        }

        Ok(CycleOutcome::Completed(CycleReport {
            cycle,
            observed_at,
            baseline,
            corporation_count,
            events,
            delivered,
            dropped,
            abandoned,
        }))
    }

    async fn fetch_roster(&self) -> Result<Roster, RetryError<FetchError>> {
        let source = &self.source;
        let timeout = self.config.call_timeout;

        self.retrier
            .run(
                "fetch_roster",
                Interrupt::Anytime,
                FetchError::is_retryable,
                move |_| async move {
                    match tokio::time::timeout(timeout, source.fetch()).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout(timeout)),
                    }
                },
            )
            .await
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), RetryError<StoreError>> {
        let store = &self.store;
        let timeout = self.config.call_timeout;

        // A save that has started is allowed to finish; it is atomic, so
        // there is nothing partial to abort.
        self.retrier
            .run(
                "persist_snapshot",
                Interrupt::BetweenAttempts,
                |e: &StoreError| {
                    matches!(
                        e,
                        StoreError::Io { .. } | StoreError::Timeout(_) | StoreError::Task(_)
                    )
                },
                move |attempt| {
                    let store = Arc::clone(store);
                    let snapshot = snapshot.clone();
                    async move {
                        let mut task =
                            tokio::task::spawn_blocking(move || store.save(&snapshot));
                        match tokio::time::timeout(timeout, &mut task).await {
                            Ok(Ok(result)) => result,
                            Ok(Err(join_error)) => Err(StoreError::Task(join_error.to_string())),
                            Err(_) => {
                                // The blocking save cannot be cancelled. Wait it out so the
                                // next attempt is never a second writer.
                                warn!(
                                    attempt,
                                    timeout_ms = timeout.as_millis() as u64,
                                    "Snapshot save timed out, waiting for it to finish"
                                );
                                if let Err(join_error) = task.await {
                                    warn!(error = %join_error, "Timed out save task failed");
                                }
                                Err(StoreError::Timeout(timeout))
                            }
                        }
                    }
                },
            )
            .await
    }

    /// Deliver events with bounded parallelism. Returns counts of
    /// (delivered, dropped, abandoned).
    async fn dispatch(&self, events: &[MembershipEvent]) -> (usize, usize, usize) {
        let concurrency = self.config.notify_concurrency.max(1);

        let results: Vec<Delivery> = stream::iter(events.iter().cloned())
            .map(|event| self.deliver(event))
            .buffered(concurrency)
            .collect()
            .await;

        results
            .iter()
            .fold((0, 0, 0), |(ok, dropped, abandoned), delivery| match delivery {
                Delivery::Delivered => (ok + 1, dropped, abandoned),
                Delivery::Dropped => (ok, dropped + 1, abandoned),
                Delivery::Abandoned => (ok, dropped, abandoned + 1),
            })
    }

    async fn deliver(&self, event: MembershipEvent) -> Delivery {
        let event = &event;
        let notifier = &self.notifier;
        let timeout = self.config.call_timeout;

        let result = self
            .retrier
            .run(
                "notify",
                Interrupt::Anytime,
                |_: &NotifyError| true,
                move |_| async move {
                    match tokio::time::timeout(timeout, notifier.notify(event)).await {
                        Ok(result) => result,
                        Err(_) => Err(NotifyError::Timeout(timeout)),
                    }
                },
            )
            .await;

        match result {
            Ok(()) => {
                debug!(
                    corporation_id = %event.corporation_id,
                    kind = %event.kind,
                    "Event delivered"
                );
                Delivery::Delivered
            }
            Err(RetryError::Cancelled) => {
                warn!(
                    corporation_id = %event.corporation_id,
                    kind = %event.kind,
                    "Event abandoned at shutdown"
                );
                Delivery::Abandoned
            }
            Err(RetryError::Fatal { error: e, .. }) | Err(RetryError::Exhausted { last: e, .. }) => {
                error!(
                    corporation_id = %event.corporation_id,
                    kind = %event.kind,
                    error = %e,
                    "Dropping event after failed delivery"
                );
                Delivery::Dropped
            }
        }
    }
}

//! Ranking Poll Loop
//!
//! Polls the fluctuation ranking during market hours and hands each
//! non-empty result to the change detector.
//!
//! The loop never stops on its own. Failures are logged and followed by a
//! short backoff; only cancellation ends it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ChangeDetector, RankingSource};
use crate::infrastructure::config::RankingSettings;
use crate::infrastructure::metrics::{self, PollOutcome};

// =============================================================================
// Market Window
// =============================================================================

/// Weekday trading session in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketWindow {
    open: NaiveTime,
    close: NaiveTime,
    offset: FixedOffset,
}

impl MarketWindow {
    /// Session from `open` to `close` inclusive, in `offset` local time.
    #[must_use]
    pub const fn new(open: NaiveTime, close: NaiveTime, offset: FixedOffset) -> Self {
        Self {
            open,
            close,
            offset,
        }
    }

    /// Window described by the ranking settings.
    #[must_use]
    pub const fn from_settings(settings: &RankingSettings) -> Self {
        Self::new(
            settings.market_open,
            settings.market_close,
            settings.market_offset,
        )
    }

    /// Whether `at` falls inside the session.
    #[must_use]
    pub fn contains<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let local = at.with_timezone(&self.offset);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        self.open <= time && time <= self.close
    }
}

// =============================================================================
// Poll Loop
// =============================================================================

/// Sleep durations between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Target time between cycle starts.
    pub cadence: Duration,
    /// Floor on the sleep after a completed cycle.
    pub min_interval: Duration,
    /// Sleep after a failed cycle.
    pub error_backoff: Duration,
    /// Sleep between window checks outside market hours.
    pub off_hours_sleep: Duration,
}

impl PollTiming {
    /// Timing from the ranking settings.
    #[must_use]
    pub const fn from_settings(settings: &RankingSettings) -> Self {
        Self {
            cadence: settings.cadence,
            min_interval: settings.min_interval,
            error_backoff: settings.error_backoff,
            off_hours_sleep: settings.off_hours_sleep,
        }
    }

    /// Sleep after a cycle that took `elapsed`.
    #[must_use]
    pub fn after_cycle(&self, elapsed: Duration) -> Duration {
        self.cadence.saturating_sub(elapsed).max(self.min_interval)
    }
}

/// Scheduled ranking poller.
pub struct RankingPollLoop {
    source: Arc<dyn RankingSource>,
    detector: Arc<dyn ChangeDetector>,
    window: MarketWindow,
    timing: PollTiming,
    cancel: CancellationToken,
}

impl RankingPollLoop {
    /// Create a poll loop.
    #[must_use]
    pub fn new(
        source: Arc<dyn RankingSource>,
        detector: Arc<dyn ChangeDetector>,
        window: MarketWindow,
        timing: PollTiming,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            detector,
            window,
            timing,
            cancel,
        }
    }

    /// Create a poll loop from the ranking settings.
    #[must_use]
    pub fn from_settings(
        source: Arc<dyn RankingSource>,
        detector: Arc<dyn ChangeDetector>,
        settings: &RankingSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            source,
            detector,
            MarketWindow::from_settings(settings),
            PollTiming::from_settings(settings),
            cancel,
        )
    }

    /// Run one cycle as of `now` and return how long to sleep before the next.
    pub async fn tick(&self, now: DateTime<Utc>) -> Duration {
        if !self.window.contains(&now) {
            tracing::debug!(now = %now, "Outside market hours, ranking poll idle");
            return self.timing.off_hours_sleep;
        }

        let started = Instant::now();
        match self.poll_once().await {
            Ok(Some(new_entrants)) => {
                metrics::record_ranking_poll(PollOutcome::Processed);
                tracing::info!(new_entrants, "Ranking cycle processed");
                self.timing.after_cycle(started.elapsed())
            }
            Ok(None) => {
                metrics::record_ranking_poll(PollOutcome::Empty);
                tracing::warn!("Fluctuation ranking empty");
                self.timing.after_cycle(started.elapsed())
            }
            Err(e) => {
                metrics::record_ranking_poll(PollOutcome::Failed);
                tracing::warn!(error = %format!("{e:#}"), "Ranking cycle failed");
                self.timing.error_backoff
            }
        }
    }

    async fn poll_once(&self) -> anyhow::Result<Option<usize>> {
        match self.source.fluctuation_rank().await? {
            Some(entries) if !entries.is_empty() => {
                tracing::debug!(count = entries.len(), "Fluctuation ranking fetched");
                let changes = self.detector.detect_and_process_changes(&entries).await?;
                Ok(Some(changes))
            }
            Some(_) | None => Ok(None),
        }
    }

    /// Poll until cancelled.
    pub async fn run(self) {
        tracing::info!("Ranking poll loop started");

        loop {
            let sleep = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                sleep = self.tick(Utc::now()) => sleep,
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(sleep) => {}
            }
        }

        tracing::info!("Ranking poll loop stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

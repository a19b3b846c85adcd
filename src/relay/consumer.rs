//! Subscription relay
//!
//! Applies subscription-change events from the queue to usage records, one
//! event at a time. Malformed events are dropped and acknowledged; store
//! failures are retried in place so nothing is acknowledged before it has
//! been written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::AppResult,
    queue::{Delivery, EventSource},
    quota::QuotaPolicy,
    routes::metrics,
    usage::UsageStore,
};

use super::event::{parse_event, DropReason};

/// Result of handling a single event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Processed,
    Dropped(DropReason),
}

/// Counters accumulated over a relay run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub processed: u64,
    pub dropped: u64,
    pub retries: u64,
}

impl RelayStats {
    fn record(&mut self, outcome: &RelayOutcome) {
        match outcome {
            RelayOutcome::Processed => self.processed += 1,
            RelayOutcome::Dropped(_) => self.dropped += 1,
        }
    }
}

/// Relay from the subscription queue into the usage store
pub struct SubscriptionRelay {
    store: Arc<dyn UsageStore>,
    policy: QuotaPolicy,
    retry_backoff: Duration,
}

impl SubscriptionRelay {
    pub fn new(store: Arc<dyn UsageStore>, policy: QuotaPolicy, retry_backoff: Duration) -> Self {
        Self {
            store,
            policy,
            retry_backoff,
        }
    }

    /// Validate one payload and apply it
    ///
    /// `Ok(Dropped)` means the event is permanently rejected; `Err` means
    /// the store failed and the event should be tried again.
    #[instrument(skip(self, payload, now), fields(bytes = payload.len()))]
    pub async fn handle(&self, payload: &[u8], now: DateTime<Utc>) -> AppResult<RelayOutcome> {
        let change = match parse_event(payload) {
            Ok(change) => change,
            Err(reason) => return Ok(RelayOutcome::Dropped(reason)),
        };

        let daily_limit = change.plan_type.daily_limit(self.policy.free_daily_limit);
        let defaults = self.policy.default_record(&change.user_id, now);

        self.store
            .upsert_subscription(&change, daily_limit, now, defaults)
            .await?;

        info!(
            user_id = %change.user_id,
            plan_type = %change.plan_type,
            plan_id = %change.plan_id,
            end_date = %change.end_date,
            "Applied subscription change"
        );
        Ok(RelayOutcome::Processed)
    }

    /// Run the poll loop until `shutdown` flips to true
    ///
    /// Returns `Err` only when the event source fails, which the caller
    /// should treat as fatal.
    pub async fn run<S: EventSource>(
        &self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> AppResult<RelayStats> {
        let mut stats = RelayStats::default();
        info!("Subscription relay started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = tokio::select! {
                polled = source.poll() => match polled {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, "Event source failed, stopping relay");
                        return Err(e);
                    }
                },
                _ = shutdown.changed() => break,
            };

            for delivery in batch {
                let Some(outcome) = self.handle_until_applied(&delivery, &mut shutdown, &mut stats).await
                else {
                    info!(stats = ?stats, "Subscription relay stopped mid-retry");
                    return Ok(stats);
                };

                match &outcome {
                    RelayOutcome::Processed => {
                        metrics::record_relay_event("processed", "ok");
                    }
                    RelayOutcome::Dropped(reason) => {
                        warn!(delivery_id = %delivery.id, reason = %reason, "Dropped subscription event");
                        metrics::record_relay_event("dropped", reason.label());
                    }
                }
                stats.record(&outcome);

                if let Err(e) = source.ack(&delivery.id).await {
                    error!(error = %e, delivery_id = %delivery.id, "Failed to acknowledge event, stopping relay");
                    return Err(e);
                }
                debug!(delivery_id = %delivery.id, "Acknowledged event");
            }
        }

        info!(stats = ?stats, "Subscription relay stopped");
        Ok(stats)
    }

    /// Retry a store failure until it succeeds; `None` if shut down first
    async fn handle_until_applied(
        &self,
        delivery: &Delivery,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut RelayStats,
    ) -> Option<RelayOutcome> {
        loop {
            match self.handle(&delivery.payload, Utc::now()).await {
                Ok(outcome) => return Some(outcome),
                Err(e) => {
                    stats.retries += 1;
                    warn!(
                        error = %e,
                        delivery_id = %delivery.id,
                        backoff_ms = self.retry_backoff.as_millis() as u64,
                        "Failed to apply subscription event, retrying"
                    );
                    metrics::record_relay_event("retry", "store_error");

                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                        _ = shutdown.changed() => return None,
                    }
                    if *shutdown.borrow() {
                        return None;
                    }
                }
            }
        }
    }
}

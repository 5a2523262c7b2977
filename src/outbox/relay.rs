use super::{Broker, EventId, OutboxEvent, OutboxStore};
use crate::event::{DomainEvent, EventEnvelope, EventType};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Relay configuration
#[derive(Clone, Debug, Deserialize)]
pub struct RelayConfig {
    /// Run the relay loop at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between relay cycles
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Rows fetched per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    5
}

fn default_page_size() -> usize {
    100
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_seconds: default_interval_seconds(),
            page_size: default_page_size(),
        }
    }
}

/// Outcome of one relay pass over a single page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Rows read from the outbox
    pub fetched: usize,
    /// Rows published and marked sent
    pub published: usize,
    /// Rows whose publish failed (retried next cycle)
    pub failed: usize,
    /// Rows left unsent because their type or body is unrecognized
    pub skipped: usize,
    /// Rows held back behind an earlier unsent row of the same aggregate
    pub deferred: usize,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.fetched += other.fetched;
        self.published += other.published;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
    }
}

/// Publishes unsent outbox rows and marks them sent.
///
/// Each instance runs its own relay with no coordination. Its only state is
/// the page cursor (last row id visited in the current cycle) and the
/// aggregates held back in that cycle.
///
/// Events of one aggregate reach the broker in id order: once a row fails or
/// is left unsent, later rows of its aggregate wait for the next cycle.
pub struct OutboxRelay {
    store: OutboxStore,
    broker: Arc<dyn Broker>,
    page_size: usize,
    cursor: EventId,
    held: HashSet<String>,
}

impl OutboxRelay {
    pub fn new(store: OutboxStore, broker: Arc<dyn Broker>, page_size: usize) -> Self {
        Self {
            store,
            broker,
            page_size: page_size.max(1),
            cursor: 0,
            held: HashSet::new(),
        }
    }

    /// Publishes one page of unsent rows after the cursor.
    ///
    /// Every row in the page gets its own publish attempt; a failure on one
    /// never stops the rest. Successful rows are marked sent in one batch
    /// after the page. Failed and unrecognized rows stay unsent; the cursor
    /// still moves past them so other aggregates are not starved, while later
    /// rows of the same aggregate are deferred.
    pub async fn run_relay_pass(&mut self) -> Result<PassReport> {
        let page = self
            .store
            .fetch_unsent(self.cursor, self.page_size)
            .context("Failed to fetch unsent outbox page")?;

        let mut report = PassReport {
            fetched: page.len(),
            ..Default::default()
        };
        if page.is_empty() {
            return Ok(report);
        }

        let mut staged: Vec<EventId> = Vec::with_capacity(page.len());

        for row in &page {
            self.cursor = self.cursor.max(row.id);

            if self.held.contains(&row.aggregate_id) {
                debug!(
                    outbox_id = row.id,
                    key = %row.aggregate_id,
                    "Deferring outbox event behind an unsent one of the same aggregate"
                );
                report.deferred += 1;
                continue;
            }

            let envelope = match Self::envelope(row) {
                Some(envelope) => envelope,
                None => {
                    self.held.insert(row.aggregate_id.clone());
                    report.skipped += 1;
                    continue;
                }
            };

            let payload = match serde_json::to_vec(&envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(outbox_id = row.id, error = %e, "Failed to encode outbox envelope");
                    self.held.insert(row.aggregate_id.clone());
                    report.skipped += 1;
                    continue;
                }
            };

            let topic = envelope.event_type().topic();
            match self.broker.publish(topic, &row.aggregate_id, payload).await {
                Ok(()) => {
                    debug!(
                        outbox_id = row.id,
                        topic = %topic,
                        key = %row.aggregate_id,
                        "Published outbox event"
                    );
                    staged.push(row.id);
                }
                Err(e) => {
                    warn!(
                        outbox_id = row.id,
                        topic = %topic,
                        error = %e,
                        "Failed to publish outbox event, will retry next cycle"
                    );
                    self.held.insert(row.aggregate_id.clone());
                    report.failed += 1;
                }
            }
        }

        if !staged.is_empty() {
            // A failure here republishes the staged rows next cycle (at-least-once)
            self.store
                .mark_sent(&staged)
                .context("Failed to mark published outbox events sent")?;
        }
        report.published = staged.len();

        Ok(report)
    }

    /// Runs passes from the start of the table until a page comes back empty.
    pub async fn run_cycle(&mut self) -> Result<PassReport> {
        self.cursor = 0;
        self.held.clear();
        let mut total = PassReport::default();

        loop {
            let report = self.run_relay_pass().await?;
            if report.fetched == 0 {
                break;
            }
            total.absorb(report);
        }

        Ok(total)
    }

    /// Run background relay loop
    ///
    /// Runs one cycle per tick; errors are logged and the next tick retries.
    /// This function runs indefinitely until the task is cancelled.
    pub async fn run_relay_loop(mut self, every: Duration) {
        info!(
            interval_ms = every.as_millis() as u64,
            page_size = self.page_size,
            "Starting outbox relay"
        );

        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            match self.run_cycle().await {
                Ok(report) if report.fetched > 0 => info!(
                    fetched = report.fetched,
                    published = report.published,
                    failed = report.failed,
                    skipped = report.skipped,
                    deferred = report.deferred,
                    "Outbox relay cycle complete"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Outbox relay cycle failed"),
            }
        }
    }

    /// Builds the wire envelope, or `None` when the row cannot be understood.
    fn envelope(row: &OutboxEvent) -> Option<EventEnvelope> {
        let event_type: EventType = match row.event_type.parse() {
            Ok(t) => t,
            Err(e) => {
                warn!(
                    outbox_id = row.id,
                    event_type = %row.event_type,
                    error = %e,
                    "Unrecognized outbox event type, leaving unsent"
                );
                return None;
            }
        };

        let event = match DomainEvent::decode(event_type, &row.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    outbox_id = row.id,
                    event_type = %event_type,
                    error = %e,
                    "Outbox payload does not match its event type, leaving unsent"
                );
                return None;
            }
        };

        Some(EventEnvelope {
            id: row.id,
            aggregate_type: event_type.aggregate_type(),
            aggregate_id: row.aggregate_id.clone(),
            created_at: row.created_at,
            event,
        })
    }
}

//! Notification dispatcher.
//!
//! One pass drains each delivery table in turn:
//! 1. Claim the next due row (locked for the transaction)
//! 2. Email the recipient, then confirm to the sender
//! 3. Mark the row `sent`, or `error` with the failure detail
//!
//! Rows are handled sequentially. A failed delivery or status update never
//! stops the pass; only a database failure while claiming does. Rows tried
//! once are not claimed again in the same pass.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use keepla_common::error::AppError;
use keepla_common::types::{DeliveryChannel, DeliverySource, DueDelivery, RunSummary};

use crate::email::{EmailError, EmailSender};
use crate::{store, templates};

/// Why a single delivery failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("recipient email failed: {0}")]
    Recipient(EmailError),

    #[error("sender confirmation failed: {0}")]
    SenderConfirmation(EmailError),
}

/// Scans due deliveries and dispatches their emails.
pub struct Notifier<S> {
    pool: PgPool,
    sender: S,
    from: String,
    batch_size: u32,
}

impl<S: EmailSender> Notifier<S> {
    pub fn new(pool: PgPool, sender: S, from: impl Into<String>, batch_size: u32) -> Self {
        Self {
            pool,
            sender,
            from: from.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Run a single pass over both delivery tables.
    pub async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();

        for source in DeliverySource::ALL {
            let drained = self.drain(source, now).await?;
            if drained.scanned > 0 {
                tracing::info!(
                    source = %source,
                    scanned = drained.scanned,
                    sent = drained.sent,
                    failed = drained.failed,
                    "Drained due deliveries"
                );
            }
            summary.merge(drained);
        }

        Ok(summary)
    }

    /// Run passes on a fixed interval until the future is dropped.
    ///
    /// Pass failures are logged and retried on the next tick.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval_secs = interval.as_secs(), "Notifier loop started");

        loop {
            ticker.tick().await;
            match self.run_once(Utc::now()).await {
                Ok(summary) => {
                    if summary.scanned > 0 {
                        tracing::info!(
                            scanned = summary.scanned,
                            sent = summary.sent,
                            failed = summary.failed,
                            "Notifier pass complete"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "Notifier pass failed"),
            }
        }
    }

    async fn drain(&self, source: DeliverySource, now: DateTime<Utc>) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut attempted: Vec<Uuid> = Vec::new();

        while summary.scanned < self.batch_size {
            let mut tx = self.pool.begin().await?;

            let Some(delivery) = store::claim_next_due(&mut tx, source, now, &attempted).await?
            else {
                tx.rollback().await?;
                break;
            };
            summary.scanned += 1;
            attempted.push(delivery.id);

            match deliver(&self.sender, &self.from, &delivery).await {
                Ok(()) => match commit_sent(tx, source, delivery.id).await {
                    Ok(()) => {
                        summary.sent += 1;
                        tracing::info!(source = %source, id = %delivery.id, "Delivery sent");
                    }
                    Err(e) => {
                        tracing::error!(source = %source, id = %delivery.id, error = %e, "Failed to mark delivery sent");
                        let detail = format!("status update failed: {}", e);
                        self.record_error(source, delivery.id, &detail).await;
                        summary.failed += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(source = %source, id = %delivery.id, error = %e, "Delivery failed");
                    let detail = e.to_string();
                    if let Err(db_err) = commit_error(tx, source, delivery.id, &detail).await {
                        tracing::error!(source = %source, id = %delivery.id, error = %db_err, "Failed to mark delivery errored");
                        self.record_error(source, delivery.id, &detail).await;
                    }
                    summary.failed += 1;
                }
            }
        }

        if summary.scanned == self.batch_size {
            tracing::debug!(source = %source, batch_size = self.batch_size, "Batch limit reached");
        }

        Ok(summary)
    }

    /// Record `error` outside the claim transaction. Failures are logged only.
    async fn record_error(&self, source: DeliverySource, id: Uuid, detail: &str) {
        let result: Result<bool, AppError> = async {
            let mut conn = self.pool.acquire().await?;
            store::mark_error(&mut conn, source, id, detail).await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(source = %source, id = %id, error = %e, "Failed to record delivery error");
        }
    }
}

/// Dropping the transaction on failure rolls it back.
async fn commit_sent(
    mut tx: Transaction<'static, Postgres>,
    source: DeliverySource,
    id: Uuid,
) -> Result<(), AppError> {
    store::mark_sent(&mut tx, source, id, Utc::now()).await?;
    tx.commit().await?;
    Ok(())
}

async fn commit_error(
    mut tx: Transaction<'static, Postgres>,
    source: DeliverySource,
    id: Uuid,
    detail: &str,
) -> Result<(), AppError> {
    store::mark_error(&mut tx, source, id, detail).await?;
    tx.commit().await?;
    Ok(())
}

/// Send the emails for one delivery.
///
/// The recipient goes first. Physical keepsakes ship out of band, so only the
/// sender is emailed.
pub async fn deliver<S: EmailSender>(
    sender: &S,
    from: &str,
    delivery: &DueDelivery,
) -> Result<(), DeliveryError> {
    if delivery.channel == DeliveryChannel::Email {
        let message = templates::recipient_delivery(delivery, from);
        let id = sender.send(&message).await.map_err(DeliveryError::Recipient)?;
        tracing::debug!(id = %delivery.id, provider_id = %id, "Recipient email accepted");
    }

    let message = templates::sender_confirmation(delivery, from);
    let id = sender
        .send(&message)
        .await
        .map_err(DeliveryError::SenderConfirmation)?;
    tracing::debug!(id = %delivery.id, provider_id = %id, "Sender confirmation accepted");

    Ok(())
}

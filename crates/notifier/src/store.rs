//! Delivery store: claims due rows and writes terminal statuses.
//!
//! Claims run inside a caller-owned transaction with `FOR UPDATE SKIP LOCKED`,
//! so two notifier processes never hold the same row. Status updates are
//! conditional on the row still awaiting delivery.
//!
//! `scheduled_notifications` rows linked to a keepsake are delivered through
//! the keepsake and only have their status mirrored; the scanner claims
//! standalone rows (`keepsake_id IS NULL`) from that table.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use keepla_common::error::AppError;
use keepla_common::types::{
    DeliverySource, DueDelivery, Keepsake, KeepsakeStatus, NotificationStatus,
    ScheduledNotification,
};

/// Claim the oldest due row from `source`, locking it for the transaction.
///
/// Rows listed in `skip` are passed over.
pub async fn claim_next_due(
    conn: &mut PgConnection,
    source: DeliverySource,
    now: DateTime<Utc>,
    skip: &[Uuid],
) -> Result<Option<DueDelivery>, AppError> {
    let due = match source {
        DeliverySource::Keepsakes => sqlx::query_as::<_, Keepsake>(
            r#"
            SELECT * FROM keepsakes
            WHERE status IN ('pending', 'scheduled') AND delivery_date <= $1
              AND NOT (id = ANY($2))
            ORDER BY delivery_date, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(skip)
        .fetch_optional(&mut *conn)
        .await?
        .map(DueDelivery::from),

        DeliverySource::ScheduledNotifications => sqlx::query_as::<_, ScheduledNotification>(
            r#"
            SELECT * FROM scheduled_notifications
            WHERE status = 'pending' AND delivery_date <= $1 AND keepsake_id IS NULL
              AND NOT (id = ANY($2))
            ORDER BY delivery_date, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(skip)
        .fetch_optional(&mut *conn)
        .await?
        .map(DueDelivery::from),
    };

    Ok(due)
}

/// Mark a claimed row as sent. Returns `false` if it was no longer awaiting delivery.
pub async fn mark_sent(
    conn: &mut PgConnection,
    source: DeliverySource,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool, AppError> {
    let updated = match source {
        DeliverySource::Keepsakes => {
            let result = sqlx::query(
                r#"
                UPDATE keepsakes
                SET status = $2, sent_at = $3, error_detail = NULL, updated_at = NOW()
                WHERE id = $1 AND status IN ('pending', 'scheduled')
                "#,
            )
            .bind(id)
            .bind(KeepsakeStatus::Sent.to_string())
            .bind(at)
            .execute(&mut *conn)
            .await?;
            let updated = result.rows_affected() > 0;
            if updated {
                mirror_status(conn, id, NotificationStatus::Sent, Some(at), None).await?;
            }
            updated
        }
        DeliverySource::ScheduledNotifications => {
            let result = sqlx::query(
                r#"
                UPDATE scheduled_notifications
                SET status = $2, sent_at = $3, error_detail = NULL
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(id)
            .bind(NotificationStatus::Sent.to_string())
            .bind(at)
            .execute(&mut *conn)
            .await?;
            result.rows_affected() > 0
        }
    };

    Ok(updated)
}

/// Mark a row as errored with a detail message.
pub async fn mark_error(
    conn: &mut PgConnection,
    source: DeliverySource,
    id: Uuid,
    detail: &str,
) -> Result<bool, AppError> {
    let updated = match source {
        DeliverySource::Keepsakes => {
            let result = sqlx::query(
                r#"
                UPDATE keepsakes
                SET status = $2, error_detail = $3, updated_at = NOW()
                WHERE id = $1 AND status IN ('pending', 'scheduled')
                "#,
            )
            .bind(id)
            .bind(KeepsakeStatus::Error.to_string())
            .bind(detail)
            .execute(&mut *conn)
            .await?;
            let updated = result.rows_affected() > 0;
            if updated {
                mirror_status(conn, id, NotificationStatus::Error, None, Some(detail)).await?;
            }
            updated
        }
        DeliverySource::ScheduledNotifications => {
            let result = sqlx::query(
                r#"
                UPDATE scheduled_notifications
                SET status = $2, error_detail = $3
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(id)
            .bind(NotificationStatus::Error.to_string())
            .bind(detail)
            .execute(&mut *conn)
            .await?;
            result.rows_affected() > 0
        }
    };

    Ok(updated)
}

/// Copy a keepsake's terminal status onto its pending mirror row, if any.
async fn mirror_status(
    conn: &mut PgConnection,
    keepsake_id: Uuid,
    status: NotificationStatus,
    sent_at: Option<DateTime<Utc>>,
    detail: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE scheduled_notifications
        SET status = $2, sent_at = $3, error_detail = $4
        WHERE keepsake_id = $1 AND status = 'pending'
        "#,
    )
    .bind(keepsake_id)
    .bind(status.to_string())
    .bind(sent_at)
    .bind(detail)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Cancel a keepsake on behalf of its owner.
///
/// Only keepsakes still awaiting delivery can be cancelled. The pending
/// mirror row in `scheduled_notifications` is removed with it.
pub async fn cancel_keepsake(pool: &PgPool, user_id: Uuid, id: Uuid) -> Result<Keepsake, AppError> {
    let mut tx = pool.begin().await?;

    let cancelled: Option<Keepsake> = sqlx::query_as(
        r#"
        UPDATE keepsakes
        SET status = $3, updated_at = NOW()
        WHERE id = $1 AND user_id = $2 AND status IN ('pending', 'scheduled')
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(KeepsakeStatus::Cancelled.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(keepsake) = cancelled else {
        let status: Option<(KeepsakeStatus,)> =
            sqlx::query_as("SELECT status FROM keepsakes WHERE id = $1 AND user_id = $2")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        return Err(match status {
            None => AppError::NotFound(format!("Keepsake {} not found", id)),
            Some((status,)) => AppError::Validation(format!(
                "Keepsake {} cannot be cancelled from status '{}'",
                id, status
            )),
        });
    };

    sqlx::query("DELETE FROM scheduled_notifications WHERE keepsake_id = $1 AND status = 'pending'")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(keepsake_id = %id, user_id = %user_id, "Keepsake cancelled");
    Ok(keepsake)
}

/// Mirror a keepsake's delivery fields into `scheduled_notifications`.
///
/// Idempotent per keepsake: a second call returns the existing row.
pub async fn schedule_notification(
    pool: &PgPool,
    keepsake: &Keepsake,
) -> Result<ScheduledNotification, AppError> {
    if !keepsake.status.is_awaiting_delivery() {
        return Err(AppError::Validation(format!(
            "Keepsake {} is '{}' and cannot be scheduled",
            keepsake.id, keepsake.status
        )));
    }

    let inserted: Option<ScheduledNotification> = sqlx::query_as(
        r#"
        INSERT INTO scheduled_notifications (id, keepsake_id, user_email, recipient_email, message, delivery_date, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (keepsake_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(keepsake.id)
    .bind(&keepsake.sender_email)
    .bind(&keepsake.recipient_email)
    .bind(&keepsake.message_content)
    .bind(keepsake.delivery_date)
    .bind(NotificationStatus::Pending.to_string())
    .fetch_optional(pool)
    .await?;

    if let Some(row) = inserted {
        return Ok(row);
    }

    let existing: ScheduledNotification =
        sqlx::query_as("SELECT * FROM scheduled_notifications WHERE keepsake_id = $1")
        .bind(keepsake.id)
        .fetch_one(pool)
        .await?;
    Ok(existing)
}

/// Number of rows the scanner would pick up at `now`, across both tables.
pub async fn count_due(pool: &PgPool, now: DateTime<Utc>) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM keepsakes
             WHERE status IN ('pending', 'scheduled') AND delivery_date <= $1)
          + (SELECT COUNT(*) FROM scheduled_notifications
             WHERE status = 'pending' AND delivery_date <= $1 AND keepsake_id IS NULL)
        "#,
    )
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

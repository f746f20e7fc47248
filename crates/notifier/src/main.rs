use std::time::Duration;

use chrono::Utc;

use keepla_common::config::AppConfig;
use keepla_common::db;
use keepla_notifier::dispatcher::Notifier;
use keepla_notifier::email::{ResendClient, default_retry_policy};
use keepla_notifier::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keepla_notifier=info,keepla_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Keepla notifier starting...");

    let config = AppConfig::from_env()?;
    let api_key = config
        .resend_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("RESEND_API_KEY environment variable is required"))?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let sender = ResendClient::new(
        api_key,
        &config.resend_api_url,
        default_retry_policy(config.notifier_max_retries),
    )?;
    let notifier = Notifier::new(
        pool.clone(),
        sender,
        config.email_from.clone(),
        config.notifier_batch_size,
    );

    let Some(interval_secs) = config.notifier_poll_interval_secs else {
        let now = Utc::now();
        let due = store::count_due(&pool, now).await?;
        tracing::info!(due, "Running single notifier pass");

        let summary = notifier.run_once(now).await.inspect_err(|e| {
            tracing::error!(error = %e, "Notifier pass aborted");
        })?;
        tracing::info!(
            scanned = summary.scanned,
            sent = summary.sent,
            failed = summary.failed,
            "Notifier pass complete"
        );
        return Ok(());
    };

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        _ = notifier.run(Duration::from_secs(interval_secs.max(1))) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Keepla notifier stopped.");
    Ok(())
}

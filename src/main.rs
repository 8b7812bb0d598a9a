use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fx_normalizer::config::FxConfig;
use fx_normalizer::jobs::fx_normalization::{start_fx_normalization_job, FxNormalizationJob};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match FxConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };

    tracing::info!(
        "Source: {} | Destination: {} | Rates: {} | Target: {}",
        config.source_table,
        config.destination_table,
        config.rate_table,
        config.target_currency
    );

    let job = FxNormalizationJob::connect(&config).await?;

    match config.sync_interval {
        Some(every) => {
            tracing::info!("Running every {}s", every.as_secs());
            start_fx_normalization_job(Arc::new(job), every).await?;
        }
        None => {
            let report = job.run().await.inspect_err(|e| {
                tracing::error!("FX normalization failed: {}", e);
            })?;
            tracing::info!("Run report: {}", serde_json::to_string(&report)?);
        }
    }

    Ok(())
}

use casewright_core::Result;
use casewright_runner::{
    config::RunnerConfig,
    dispatch::{LogDispatch, LogHandler},
    error::RunnerError,
    seed::Seed,
};
use casewright_runtime::Automation;
use casewright_workflow::StaticHandlerRegistry;
use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), RunnerError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RunnerConfig::from_env().map_err(RunnerError::from)?;
    tracing::info!(?config, "Loaded configuration");

    let handlers = StaticHandlerRegistry::new().with_handler("log", Arc::new(LogHandler));
    let automation = Automation::new(
        config.automation.clone(),
        Arc::new(handlers),
        Arc::new(LogDispatch),
    );

    if let Some(path) = &config.seed_path {
        let seed = Seed::load(path).map_err(RunnerError::from)?;
        let summary = seed.install(&automation).await;
        tracing::info!(
            workflows = summary.workflows,
            reminders = summary.reminders,
            rejected = summary.rejected,
            "Installed seed data"
        );
    }

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        config.automation.tick_interval_seconds.max(1),
    ));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = automation.tick(Utc::now()).await {
                    tracing::warn!(error = %e, "Tick failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }
    Ok(())
}

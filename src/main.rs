mod analysis;
mod app;
mod auth;
mod config;
mod db;
mod error;
mod logs;
mod nutrition;
mod settings;
mod state;
mod storage;
#[cfg(test)]
mod testing;

use std::time::Duration;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "mealsync=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let state = AppState::init().await?;
    let addr = state.config.addr()?;
    let logs = state.logs.clone();

    app::serve(app::build_app(state), addr).await?;

    // give queued remote writes a chance before exit
    if tokio::time::timeout(Duration::from_secs(10), logs.flush_remote())
        .await
        .is_err()
    {
        tracing::warn!("remote writes still pending at exit");
    }
    tracing::info!("shut down");
    Ok(())
}

use anyhow::{Context, Result};

use irrigation_pn::web::{self, AppState};
use irrigation_pn::{Controller, Engine, EngineConfig, Session};

#[tokio::main]
async fn main() -> Result<()> {
    irrigation_pn::init_logger();

    let config_path = std::env::var("IRRIGATE_CONFIG").unwrap_or_else(|_| "irrigate.toml".into());
    let config = EngineConfig::load_from_file(&config_path)?;
    let controller = Controller::new(config.controller_tank)?;
    let (session, task) = Session::spawn(Engine::new(config)?);

    let app = web::router(AppState::new(session.clone(), controller));

    let addr = std::env::var("IRRIGATE_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    log::info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    session.shutdown().await?;
    let engine = task.await.context("session task failed")?;
    log::info!("stopped at revision {}", engine.revision());
    Ok(())
}

//! Reflection Coach · evaluation backend for historical-character chat games
//!
//! - Axum HTTP + WebSocket API (streamed evaluations over `/ws`)
//! - Gemini integration (via environment variables)
//! - Labeled-output parsing with a fallback summary when the model skips the free text
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   GEMINI_API_KEY      : enables Gemini; without it every evaluation reports an error
//!   GEMINI_MODEL        : default "gemini-2.0-flash-001"
//!   GEMINI_BASE_URL     : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_TIMEOUT_SECS : request timeout, default 60
//!   EVAL_CONFIG_PATH    : path to TOML config (localized prompts + evaluation settings)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod transport;
mod gemini;
mod prompt;
mod parser;
mod fallback;
mod evaluator;
mod personas;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let state = Arc::new(AppState::new());
  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "reflection_coach", %addr, transport = %state.transport().name(), "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "reflection_coach", error = %e, "Failed to listen for shutdown signal");
  }
  info!(target: "reflection_coach", "Shutdown signal received");
}

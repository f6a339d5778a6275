// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Only `/health` is public; everything
// else requires a valid Bearer token via the `AuthBearer` extractor. CORS is
// permissive.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::TradingMode;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/state/portfolio", get(portfolio))
        .route("/api/v1/feature-flags", get(get_feature_flags))
        .route("/api/v1/feature-flags", post(set_feature_flags))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.snapshot().await)
}

async fn portfolio(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.trading.snapshot().await)
}

#[derive(Serialize)]
struct FeatureFlags {
    enable_security_provider: bool,
    enable_market_provider: bool,
    enable_holders_provider: bool,
    enable_creator_provider: bool,
    enable_flow_provider: bool,
    enable_momentum_provider: bool,
}

impl From<&crate::runtime_config::RuntimeConfig> for FeatureFlags {
    fn from(cfg: &crate::runtime_config::RuntimeConfig) -> Self {
        Self {
            enable_security_provider: cfg.enable_security_provider,
            enable_market_provider: cfg.enable_market_provider,
            enable_holders_provider: cfg.enable_holders_provider,
            enable_creator_provider: cfg.enable_creator_provider,
            enable_flow_provider: cfg.enable_flow_provider,
            enable_momentum_provider: cfg.enable_momentum_provider,
        }
    }
}

async fn get_feature_flags(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cfg = state.runtime_config.read();
    Json(FeatureFlags::from(&*cfg))
}

#[derive(Deserialize, Default)]
struct FeatureFlagUpdate {
    #[serde(default)]
    enable_security_provider: Option<bool>,
    #[serde(default)]
    enable_market_provider: Option<bool>,
    #[serde(default)]
    enable_holders_provider: Option<bool>,
    #[serde(default)]
    enable_creator_provider: Option<bool>,
    #[serde(default)]
    enable_flow_provider: Option<bool>,
    #[serde(default)]
    enable_momentum_provider: Option<bool>,
}

async fn set_feature_flags(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(update): Json<FeatureFlagUpdate>,
) -> impl IntoResponse {
    let mut cfg = state.runtime_config.write();

    macro_rules! apply {
        ($field:ident) => {
            if let Some(val) = update.$field {
                cfg.$field = val;
            }
        };
    }
    apply!(enable_security_provider);
    apply!(enable_market_provider);
    apply!(enable_holders_provider);
    apply!(enable_creator_provider);
    apply!(enable_flow_provider);
    apply!(enable_momentum_provider);

    let snapshot = FeatureFlags::from(&*cfg);
    let cfg_clone = cfg.clone();
    drop(cfg);

    if let Err(e) = cfg_clone.save("runtime_config.json") {
        warn!(error = %e, "failed to persist feature flag change");
    }
    info!("feature flags updated via API");

    Json(snapshot)
}

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime_config.write().trading_mode = TradingMode::Paused;
    info!("trading paused via API");
    Json(ControlResponse {
        trading_mode: TradingMode::Paused.to_string(),
    })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime_config.write().trading_mode = TradingMode::Live;
    info!("trading resumed via API");
    Json(ControlResponse {
        trading_mode: TradingMode::Live.to_string(),
    })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime_config.write().trading_mode = TradingMode::Killed;
    warn!("trading killed via API — triggering graceful shutdown, manual restart required");
    state.request_shutdown();
    Json(ControlResponse {
        trading_mode: TradingMode::Killed.to_string(),
    })
}

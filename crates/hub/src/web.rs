use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use time::{OffsetDateTime, UtcOffset};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{Db, PlotReading};
use crate::format::{format_hub_status, format_observation, Snapshot};
use crate::notify::{Notifier, Update};
use crate::packet::Packet;
use crate::solar::sun_times_hhmm;
use crate::state::Store;
use crate::timeparse::parse_since;

const INDEX_HTML: &str = include_str!("ui/index.html");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub db: Option<Db>,
    pub notifier: Notifier,
    pub shutdown: Arc<watch::Sender<bool>>,
}

/// Wall clock in the server's local offset, UTC when it cannot be found.
fn local_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match UtcOffset::current_local_offset() {
        Ok(offset) => now.to_offset(offset),
        Err(_) => now,
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/api/snapshot", get(api_snapshot))
        .route("/api/status", get(api_status))
        .route("/now", get(now))
        .route("/ws", get(live));

    if state.db.is_some() {
        app = app.route("/since", get(since));
    }
    if state.config.shutdown_token.is_some() {
        app = app.route("/quit", get(quit));
    }

    app.with_state(state)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

/// Station name and today's sun times, shared by page loads and hub updates.
fn station_fields(state: &AppState, now: OffsetDateTime) -> Snapshot {
    let (sunrise, sunset) = sun_times_hhmm(state.config.location.as_ref(), now);
    let mut snap = Snapshot::default();
    snap.insert("station", state.config.station.as_str());
    snap.insert("sunrise", sunrise);
    snap.insert("sunset", sunset);
    snap
}

/// Everything the dashboard renders on load.
pub async fn page_data(state: &AppState, now: OffsetDateTime) -> Snapshot {
    let obs = state.store.observation().await;
    let hub = state.store.hub_status().await;
    let units = state.config.units;

    let mut snap = format_observation(&obs, units, now);
    snap.extend(format_hub_status(&hub));
    snap.extend(station_fields(state, now));
    snap.insert("temp_unit", units.temperature.label());
    snap.insert("wind_unit", units.wind.label());
    snap.insert("chartIcon", if state.db.is_some() { "show" } else { "hide" });
    snap
}

async fn api_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(page_data(&state, local_now()).await)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.status().await)
}

/// The raw latest observation, unformatted.
async fn now(State(state): State<AppState>) -> impl IntoResponse {
    let obs = state.store.observation().await;
    Json(Packet::Observation(obs.as_ref().clone()))
}

#[derive(Deserialize)]
struct SinceParams {
    ts: Option<String>,
}

async fn since(State(state): State<AppState>, Query(params): Query<SinceParams>) -> Response {
    let bad_request = || (StatusCode::BAD_REQUEST, Json(Vec::<PlotReading>::new())).into_response();

    let Some(db) = &state.db else {
        return bad_request();
    };
    let ts = params.ts.unwrap_or_default();
    let since = match parse_since(&ts) {
        Ok(t) => t,
        Err(e) => {
            warn!("since: {e}");
            return bad_request();
        }
    };
    match db.query_after(since).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!("since: {e:#}");
            bad_request()
        }
    }
}

#[derive(Deserialize)]
struct QuitParams {
    token: Option<String>,
}

async fn quit(State(state): State<AppState>, Query(params): Query<QuitParams>) -> Response {
    let expected = state.config.shutdown_token.as_deref();
    if expected.is_some() && params.token.as_deref() == expected {
        info!("shutdown requested over http");
        state.shutdown.send_replace(true);
        (StatusCode::OK, "shutting down").into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

// ---------------------------------------------------------------------------
// Live updates
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct LiveFrame {
    pub event: &'static str,
    pub data: Snapshot,
}

/// The snapshot pushed to viewers for one update.
pub fn live_frame(state: &AppState, update: &Update, now: OffsetDateTime) -> LiveFrame {
    let data = match update {
        Update::Reading(obs) => format_observation(obs, state.config.units, now),
        Update::Hub(hub) => {
            let mut snap = format_hub_status(hub);
            snap.extend(station_fields(state, now));
            snap
        }
    };
    LiveFrame {
        event: update.event(),
        data,
    }
}

async fn live(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_updates(socket, state))
}

async fn push_updates(mut socket: WebSocket, state: AppState) {
    let mut rx = state.notifier.subscribe();
    loop {
        let update = match rx.recv().await {
            Ok(u) => u,
            Err(RecvError::Lagged(n)) => {
                debug!(skipped = n, "live viewer lagging");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let frame = live_frame(&state, &update, local_now());
        let text = match serde_json::to_string(&frame) {
            Ok(t) => t,
            Err(e) => {
                warn!("live frame encode failed: {e}");
                continue;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    debug!("live viewer disconnected");
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.web_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {addr}"))?;

    info!("web ui listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

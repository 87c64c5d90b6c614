use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chill_monitor::{AlertEvent, AlertFilter, MonitorError, Severity, StatusFilter, Summary};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::info;

use crate::db::Db;
use crate::error::{ApiError, ApiResult};
use crate::state::{SharedState, ZoneView};

const INDEX_HTML: &str = include_str!("ui/index.html");

/// Request header naming the operator who acknowledges an alert.
pub const ACK_BY_HEADER: &str = "x-acknowledged-by";

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/zones", get(api_zones))
        .route("/api/summary", get(api_summary))
        .route("/api/alerts", get(api_alerts))
        .route("/api/alerts/export.csv", get(api_export_csv))
        .route("/api/alerts/{id}/ack", post(api_acknowledge))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

#[derive(Debug, Default, Deserialize)]
struct ZoneQuery {
    status: Option<String>,
}

async fn api_zones(
    State(state): State<AppState>,
    Query(q): Query<ZoneQuery>,
) -> ApiResult<Json<Vec<ZoneView>>> {
    let filter = match q.status.as_deref() {
        None | Some("") => StatusFilter::All,
        Some(s) => s.parse::<StatusFilter>().map_err(ApiError::BadRequest)?,
    };

    let st = state.shared.read().await;
    let zones = st
        .monitor
        .filter_by_status(filter)
        .into_iter()
        .map(ZoneView::from)
        .collect();
    Ok(Json(zones))
}

async fn api_summary(State(state): State<AppState>) -> Json<Summary> {
    let st = state.shared.read().await;
    Json(st.monitor.summary())
}

#[derive(Debug, Default, Deserialize)]
struct AlertQuery {
    severity: Option<String>,
    #[serde(default)]
    active_only: bool,
    #[serde(default)]
    acknowledged_only: bool,
    zone: Option<String>,
}

impl AlertQuery {
    fn to_filter(&self) -> ApiResult<AlertFilter> {
        let severity = match self.severity.as_deref() {
            None | Some("") | Some("all") => None,
            Some(s) => Some(s.parse::<Severity>().map_err(ApiError::BadRequest)?),
        };
        Ok(AlertFilter {
            severity,
            acknowledged_only: self.acknowledged_only,
            active_only: self.active_only,
            zone_id: self.zone.clone().filter(|z| !z.is_empty()),
        })
    }
}

async fn api_alerts(
    State(state): State<AppState>,
    Query(q): Query<AlertQuery>,
) -> ApiResult<Json<Vec<AlertEvent>>> {
    let filter = q.to_filter()?;
    let st = state.shared.read().await;
    let alerts = st.monitor.alerts(&filter).into_iter().cloned().collect();
    Ok(Json(alerts))
}

/// Operator name from the acknowledgement header, if present and readable.
fn acknowledged_by(headers: &HeaderMap) -> Option<String> {
    let by = headers.get(ACK_BY_HEADER)?.to_str().ok()?.trim();
    (!by.is_empty()).then(|| by.to_string())
}

/// Acknowledge an alert. The store is written first; memory only changes once
/// the write succeeded.
async fn api_acknowledge(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<AlertEvent>> {
    let snapshot = {
        let st = state.shared.read().await;
        match st.monitor.alert(&alert_id) {
            None => return Err(MonitorError::alert_not_found(&alert_id).into()),
            Some(a) if a.acknowledged => return Ok(Json(a.clone())),
            Some(a) => a.clone(),
        }
    };

    let by = acknowledged_by(&headers);
    let now = OffsetDateTime::now_utc();
    state
        .db
        .acknowledge_alert(&snapshot, now, by.as_deref())
        .await
        .map_err(ApiError::backend)?;

    let mut st = state.shared.write().await;
    st.monitor.acknowledge_at(&alert_id, by.as_deref(), now)?;
    match &by {
        Some(by) => st.record_system(format!("{alert_id} acknowledged by {by}")),
        None => st.record_system(format!("{alert_id} acknowledged")),
    }
    let alert = st
        .monitor
        .alert(&alert_id)
        .cloned()
        .ok_or_else(|| MonitorError::alert_not_found(&alert_id))?;
    info!(alert = %alert_id, by = by.as_deref().unwrap_or("-"), "alert acknowledged");
    Ok(Json(alert))
}

async fn api_export_csv(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.shared.read().await.monitor.export_csv();
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"temperature-alerts.csv\"",
            ),
        ],
        body,
    )
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    #[cfg(feature = "tls")]
    {
        if let (Ok(cert), Ok(key)) = (env::var("TLS_CERT"), env::var("TLS_KEY")) {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key).await?;
            info!("web ui listening on https://{addr}");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await?;
            return Ok(());
        }
    }

    let listener = TcpListener::bind(addr).await?;
    info!("web ui listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

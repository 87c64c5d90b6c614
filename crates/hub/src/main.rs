mod config;
mod db;
mod error;
mod mqtt;
mod state;
mod web;

use anyhow::Result;
use chill_monitor::{drift, DriftSimulator, Monitor};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use mqtt::{extract_zone_id, reading_time, ReadingMsg, TELEMETRY_TOPIC};
use state::{SharedState, SystemState};
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:chill.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (seed zones) ─────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    // Zone config from the DB is the source of truth.
    let zones = db.load_zones().await?;
    if zones.is_empty() {
        warn!("no zones configured in the database");
    }

    let last_seq = db.max_alert_seq().await?;
    let mut monitor = Monitor::new(cfg.monitor.policy()).with_alert_sequence(last_seq);
    for spec in zones {
        let zone_id = spec.id.clone();
        if let Err(e) = monitor.register_zone(spec) {
            warn!(zone = %zone_id, "zone not registered: {e}");
        }
    }
    info!(
        zones = monitor.zones().len(),
        next_alert = last_seq + 1,
        "monitor ready"
    );

    // ── Shared state (ephemeral, for the web UI) ────────────────────
    let shared: SharedState = Arc::new(RwLock::new(SystemState::new(monitor)));
    shared.write().await.record_system("hub started".to_string());

    // ── Web server ──────────────────────────────────────────────────
    let app_state = AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app_state).await {
            error!("web server error: {e:#}");
        }
    });

    // ── Drift feed (no live sensors) ────────────────────────────────
    let _drift = if cfg.monitor.drift_enabled {
        let sim = DriftSimulator::new(cfg.monitor.scenario());
        shared
            .write()
            .await
            .record_system(format!("drift feed started ({})", sim.scenario()));
        Some(drift::spawn(
            Arc::clone(&shared),
            cfg.monitor.drift_interval(),
            sim,
        ))
    } else {
        None
    };

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("chill-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    client.subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce).await?;
    info!("hub subscribed to {TELEMETRY_TOPIC}");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let Some(zone_id) = extract_zone_id(&p.topic) else {
                    debug!(topic = %p.topic, "unhandled topic");
                    continue;
                };
                match serde_json::from_slice::<ReadingMsg>(&p.payload) {
                    Ok(msg) => handle_reading(&shared, &db, zone_id, msg).await,
                    Err(e) => {
                        warn!(topic = %p.topic, "bad telemetry json: {e}");
                        shared
                            .write()
                            .await
                            .record_error(format!("bad telemetry json on {}: {e}", p.topic));
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Apply one telemetry reading, then persist what it changed (best-effort).
async fn handle_reading(shared: &SharedState, db: &Db, zone_id: &str, msg: ReadingMsg) {
    let ts = reading_time(msg.ts, OffsetDateTime::now_utc());

    let (outcome, zone) = {
        let mut st = shared.write().await;
        match st.monitor.update_reading_at(zone_id, msg.temp, msg.online, ts) {
            Ok(outcome) => {
                st.record_reading(&outcome);
                let zone = st.monitor.zone(zone_id).cloned();
                (outcome, zone)
            }
            Err(e) => {
                warn!(zone = %zone_id, "reading dropped: {e}");
                st.record_error(format!("reading for {zone_id} dropped: {e}"));
                return;
            }
        }
    };

    debug!(zone = %zone_id, temp = msg.temp, status = %outcome.status, "telemetry");

    if let Some(zone) = zone {
        if let Err(e) = db.persist_outcome(&zone, &outcome).await {
            error!(zone = %zone_id, "db: persist failed: {e:#}");
        }
    }
}

use anyhow::{bail, Context, Result};
use chill_monitor::{DriftSimulator, Scenario};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct ReadingMsg {
    ts: i64,
    temp: f64,
    online: bool,
}

/// One simulated probe: the zone it reports for and its last reading.
#[derive(Debug, Clone, PartialEq)]
struct ProbeZone {
    zone_id: String,
    target: f64,
    current: f64,
}

/// Parse `PROBE_ZONES`, e.g. `ZONE-001:-18,ZONE-002:4`.
fn parse_zones(raw: &str) -> Result<Vec<ProbeZone>> {
    let mut zones = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((id, target)) = entry.rsplit_once(':') else {
            bail!("zone entry '{entry}' is not <zone_id>:<target>");
        };
        let id = id.trim();
        if id.is_empty() {
            bail!("zone entry '{entry}' has an empty zone id");
        }
        let target: f64 = target
            .trim()
            .parse()
            .with_context(|| format!("zone entry '{entry}' has a bad target"))?;
        if !target.is_finite() {
            bail!("zone entry '{entry}' has a non-finite target");
        }
        zones.push(ProbeZone {
            zone_id: id.to_string(),
            target,
            current: target,
        });
    }
    if zones.is_empty() {
        bail!("no zones configured");
    }
    Ok(zones)
}

fn topic_for(zone_id: &str) -> String {
    format!("tele/{zone_id}/temp")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let raw_zones = env::var("PROBE_ZONES").unwrap_or_else(|_| "ZONE-001:-18".to_string());

    let mut zones = parse_zones(&raw_zones).context("invalid PROBE_ZONES")?;
    let mut sim = DriftSimulator::new(scenario);

    let mut mqttoptions = MqttOptions::new(format!("chill-probe-{}", std::process::id()), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // Publish only; the eventloop still has to run to keep the connection.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("probe connected to mqtt"),
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    info!(zones = zones.len(), %scenario, every_s = sample_every_s, "probe started");

    loop {
        for z in zones.iter_mut() {
            let (temp, online) = sim.sample(&z.zone_id, z.current, z.target);
            z.current = temp;

            let msg = ReadingMsg {
                ts: OffsetDateTime::now_utc().unix_timestamp(),
                temp,
                online,
            };
            let payload = serde_json::to_vec(&msg)?;

            if let Err(e) = client
                .publish(topic_for(&z.zone_id), QoS::AtLeastOnce, false, payload)
                .await
            {
                warn!(zone = %z.zone_id, "publish error: {e}");
            } else {
                info!(zone = %z.zone_id, temp, online, "published reading");
            }
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_zones_with_negative_targets() {
        let zones = parse_zones("ZONE-001:-18, ZONE-003:4.5").unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].zone_id, "ZONE-001");
        assert_eq!(zones[0].target, -18.0);
        assert_eq!(zones[0].current, -18.0);
        assert_eq!(zones[1].target, 4.5);
    }

    #[test]
    fn parse_zones_skips_empty_entries() {
        let zones = parse_zones("ZONE-001:-18,,").unwrap();
        assert_eq!(zones.len(), 1);
    }

    #[test]
    fn parse_zones_rejects_bad_entries() {
        assert!(parse_zones("ZONE-001").is_err());
        assert!(parse_zones(":-18").is_err());
        assert!(parse_zones("ZONE-001:cold").is_err());
        assert!(parse_zones("ZONE-001:inf").is_err());
        assert!(parse_zones("").is_err());
    }

    #[test]
    fn topic_matches_hub_subscription() {
        assert_eq!(topic_for("ZONE-002"), "tele/ZONE-002/temp");
    }

    #[test]
    fn reading_msg_serializes_to_valid_json() {
        let msg = ReadingMsg {
            ts: 1_700_000_000,
            temp: -17.9,
            online: true,
        };
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["ts"], 1_700_000_000);
        assert_eq!(json["temp"], -17.9);
        assert_eq!(json["online"], true);
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn simulated_readings_stay_near_target() {
        let mut zones = parse_zones("ZONE-001:-18").unwrap();
        let mut sim = DriftSimulator::with_seed(Scenario::Stable, 7);
        for _ in 0..200 {
            let z = &mut zones[0];
            let (temp, _) = sim.sample(&z.zone_id, z.current, z.target);
            z.current = temp;
        }
        assert!((zones[0].current - -18.0).abs() < 5.0, "drifted to {}", zones[0].current);
    }
}

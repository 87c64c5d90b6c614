use anyhow::{Context, Result};
use chill_monitor::{AlertEvent, ReadingOutcome, TemperatureZone, ZoneSpec};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, FromRow)]
struct ZoneRow {
    zone_id: String,
    name: String,
    location: String,
    sensor_id: String,
    min_threshold: f64,
    target_temp: f64,
    max_threshold: f64,
    current_temp: Option<f64>,
}

/// Numeric part of an `ALT-<n>` alert id.
pub fn alert_seq(alert_id: &str) -> Option<i64> {
    alert_id.strip_prefix("ALT-")?.parse().ok()
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/chill/chill.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Every connection to an in-memory database is a separate database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Zone config
    // ----------------------------

    /// Insert or update a zone's configuration and mark it active. `position`
    /// is its index in the config file and fixes display order.
    pub async fn upsert_zone(&self, z: &ZoneSpec, position: i64) -> Result<()> {
        bind_zone(sqlx::query(UPSERT_ZONE), z, position)
            .execute(&self.pool)
            .await
            .context("upsert_zone failed")?;
        Ok(())
    }

    /// Make `zones` the complete active set: every other stored zone is
    /// deactivated. Runs in one transaction.
    pub async fn sync_zones(&self, zones: &[(i64, ZoneSpec)]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("sync_zones: begin failed")?;

        sqlx::query("UPDATE temperature_zones SET is_active = 0")
            .execute(&mut *tx)
            .await
            .context("sync_zones: deactivate failed")?;

        for (position, z) in zones {
            bind_zone(sqlx::query(UPSERT_ZONE), z, *position)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("sync_zones: upsert failed for {}", z.id))?;
        }

        tx.commit().await.context("sync_zones: commit failed")?;
        Ok(())
    }

    /// Active zones in configuration order. The last stored reading, if any, becomes
    /// the zone's starting temperature.
    pub async fn load_zones(&self) -> Result<Vec<ZoneSpec>> {
        let rows: Vec<ZoneRow> = sqlx::query_as(
            r#"
            SELECT zone_id, name, location, sensor_id,
                   min_threshold, target_temp, max_threshold, current_temp
            FROM temperature_zones
            WHERE is_active = 1
            ORDER BY position, zone_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_zones failed")?;

        Ok(rows
            .into_iter()
            .map(|r| ZoneSpec {
                id: r.zone_id,
                name: r.name,
                location: r.location,
                sensor_id: r.sensor_id,
                min_threshold: r.min_threshold,
                target_temp: r.target_temp,
                max_threshold: r.max_threshold,
                initial_temp: r.current_temp,
            })
            .collect())
    }

    pub async fn update_zone_reading(&self, z: &TemperatureZone) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE temperature_zones
            SET current_temp = ?, status = ?, is_online = ?, last_reading_at = ?
            WHERE zone_id = ?
            "#,
        )
        .bind(z.current_temp)
        .bind(z.status.as_str())
        .bind(z.is_online)
        .bind(z.last_update.unix_timestamp())
        .bind(&z.id)
        .execute(&self.pool)
        .await
        .context("update_zone_reading failed")?;
        Ok(())
    }

    // ----------------------------
    // Alerts
    // ----------------------------

    /// Store a new alert. A row that already exists is left alone, so a
    /// late write never undoes an acknowledgement.
    pub async fn insert_alert(&self, a: &AlertEvent) -> Result<()> {
        bind_alert(sqlx::query(INSERT_ALERT), a)
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert_alert failed for {}", a.id))?;
        Ok(())
    }

    /// Mark an alert acknowledged by `by` at `at`, writing the whole row if
    /// the reading that raised it has not been persisted yet. Already
    /// acknowledged rows keep their original time and operator.
    pub async fn acknowledge_alert(
        &self,
        a: &AlertEvent,
        at: OffsetDateTime,
        by: Option<&str>,
    ) -> Result<()> {
        let acked = AlertEvent {
            acknowledged: true,
            acknowledged_at: Some(a.acknowledged_at.unwrap_or(at)),
            acknowledged_by: a.acknowledged_by.clone().or_else(|| by.map(str::to_string)),
            ..a.clone()
        };
        bind_alert(sqlx::query(ACKNOWLEDGE_ALERT), &acked)
            .execute(&self.pool)
            .await
            .with_context(|| format!("acknowledge_alert failed for {}", a.id))?;
        Ok(())
    }

    pub async fn mark_auto_resolved(&self, alert_id: &str) -> Result<()> {
        sqlx::query("UPDATE temperature_alerts SET auto_resolved = 1 WHERE alert_id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("mark_auto_resolved failed for {alert_id}"))?;
        Ok(())
    }

    /// Highest alert sequence number stored, 0 when there are none.
    pub async fn max_alert_seq(&self) -> Result<u64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM temperature_alerts")
            .fetch_one(&self.pool)
            .await
            .context("max_alert_seq failed")?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    /// Write everything a reading changed: the zone row, a new alert and an
    /// auto-resolution flag.
    pub async fn persist_outcome(
        &self,
        zone: &TemperatureZone,
        outcome: &ReadingOutcome,
    ) -> Result<()> {
        self.update_zone_reading(zone).await?;
        if let Some(alert) = &outcome.alert {
            self.insert_alert(alert).await?;
        }
        if let Some(id) = &outcome.auto_resolved {
            self.mark_auto_resolved(id).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

type Query<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

const UPSERT_ZONE: &str = r#"
    INSERT INTO temperature_zones (
      zone_id, position, name, location, sensor_id,
      min_threshold, target_temp, max_threshold, is_active
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
    ON CONFLICT(zone_id) DO UPDATE SET
      position=excluded.position,
      name=excluded.name,
      location=excluded.location,
      sensor_id=excluded.sensor_id,
      min_threshold=excluded.min_threshold,
      target_temp=excluded.target_temp,
      max_threshold=excluded.max_threshold,
      is_active=1
"#;

const INSERT_ALERT: &str = r#"
    INSERT INTO temperature_alerts (
      alert_id, seq, zone_id, alert_type, severity,
      temperature, threshold, message, created_at,
      acknowledged, acknowledged_at, acknowledged_by, auto_resolved
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(alert_id) DO NOTHING
"#;

const ACKNOWLEDGE_ALERT: &str = r#"
    INSERT INTO temperature_alerts (
      alert_id, seq, zone_id, alert_type, severity,
      temperature, threshold, message, created_at,
      acknowledged, acknowledged_at, acknowledged_by, auto_resolved
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(alert_id) DO UPDATE SET
      acknowledged = 1,
      acknowledged_at = CASE WHEN temperature_alerts.acknowledged = 1
                             THEN temperature_alerts.acknowledged_at
                             ELSE excluded.acknowledged_at END,
      acknowledged_by = CASE WHEN temperature_alerts.acknowledged = 1
                             THEN temperature_alerts.acknowledged_by
                             ELSE excluded.acknowledged_by END
"#;

fn bind_zone<'q>(q: Query<'q>, z: &'q ZoneSpec, position: i64) -> Query<'q> {
    q.bind(&z.id)
        .bind(position)
        .bind(&z.name)
        .bind(&z.location)
        .bind(&z.sensor_id)
        .bind(z.min_threshold)
        .bind(z.target_temp)
        .bind(z.max_threshold)
}

fn bind_alert<'q>(q: Query<'q>, a: &'q AlertEvent) -> Query<'q> {
    q.bind(&a.id)
        .bind(alert_seq(&a.id).unwrap_or(0))
        .bind(&a.zone_id)
        .bind(a.alert_type.as_str())
        .bind(a.severity.as_str())
        .bind(a.temperature)
        .bind(a.threshold)
        .bind(&a.message)
        .bind(a.timestamp.unix_timestamp())
        .bind(a.acknowledged)
        .bind(a.acknowledged_at.map(|t| t.unix_timestamp()))
        .bind(&a.acknowledged_by)
        .bind(a.auto_resolved)
}

// ===========================================================================
// Tests
// ===========================================================================

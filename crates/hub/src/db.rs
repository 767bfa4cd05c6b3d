use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::format::format_timestamp;
use crate::packet::{Observation, OBS_ST};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
    /// Last arrival timestamp handed out, Unix microseconds.
    last_ts: Arc<AtomicI64>,
}

/// One row of the range query: five channels of a stored observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotReading {
    /// Sample time (not arrival time), `YYYY-MM-DD HH:MM:SS` UTC.
    pub timestamp: String,
    pub temp: f64,
    pub humid: f64,
    pub lumos: i64,
    pub press: f64,
}

pub fn unix_micros(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000) as i64
}

/// Extract the plotted channels from a stored `obs_st` payload.
fn project(payload: &[u8]) -> Result<PlotReading> {
    let obs: Observation =
        serde_json::from_slice(payload).context("stored reading is not an observation")?;
    let s = obs.first().context("stored observation has no samples")?;
    let sampled = OffsetDateTime::from_unix_timestamp(s.epoch_secs())
        .with_context(|| format!("sample epoch {} out of range", s.epoch))?;
    Ok(PlotReading {
        timestamp: format_timestamp(sampled),
        temp: s.temperature,
        humid: s.humidity,
        lumos: s.illuminance as i64,
        press: s.pressure,
    })
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/wx/readings.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?;
        Self::connect_with(options, db_url).await
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options, path).await
    }

    async fn connect_with(options: SqliteConnectOptions, what: &str) -> Result<Self> {
        let options = options.journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {what}"))?;

        Ok(Self {
            pool,
            last_ts: Arc::new(AtomicI64::new(i64::MIN)),
        })
    }

    /// Runs SQLx migrations from ./migrations. Creating the table is
    /// idempotent, so this runs on every startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ----------------------------
    // Append
    // ----------------------------

    /// Arrival time for the next record: wall clock, forced strictly
    /// increasing within this process.
    fn next_timestamp(&self) -> i64 {
        let now = unix_micros(OffsetDateTime::now_utc());
        let prev = self
            .last_ts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(prev.saturating_add(1))
    }

    /// Store a raw datagram stamped with its arrival time. Returns the
    /// timestamp used as its key.
    pub async fn append(&self, record_type: &str, payload: &[u8]) -> Result<i64> {
        let ts = self.next_timestamp();
        self.append_at(ts, record_type, payload).await?;
        Ok(ts)
    }

    /// Store a raw datagram under an explicit arrival timestamp. An existing
    /// row with the same timestamp is never overwritten; the insert fails.
    pub async fn append_at(&self, ts: i64, record_type: &str, payload: &[u8]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("append: begin failed")?;
        sqlx::query("INSERT INTO readings (timestamp, record_type, reading) VALUES (?, ?, ?)")
            .bind(ts)
            .bind(record_type)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("append failed ts={ts} type={record_type}"))?;
        tx.commit().await.context("append: commit failed")?;
        Ok(())
    }

    // ----------------------------
    // Range query
    // ----------------------------

    /// All stored observations that arrived at or after `since`, oldest
    /// first. Rows whose payload cannot be projected are skipped.
    pub async fn query_after(&self, since: OffsetDateTime) -> Result<Vec<PlotReading>> {
        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT timestamp, reading
            FROM readings
            WHERE record_type = ? AND timestamp >= ?
            ORDER BY timestamp
            "#,
        )
        .bind(OBS_ST)
        .bind(unix_micros(since))
        .fetch_all(&self.pool)
        .await
        .context("query_after failed")?;

        let mut readings = Vec::with_capacity(rows.len());
        for (ts, payload) in rows {
            match project(&payload) {
                Ok(r) => readings.push(r),
                Err(e) => tracing::warn!(ts, "skipping stored reading: {e:#}"),
            }
        }
        Ok(readings)
    }

    /// Number of stored records of any type.
    pub async fn count(&self) -> Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM readings")
            .fetch_one(&self.pool)
            .await
            .context("count failed")?;
        Ok(n)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn obs_payload(epoch: i64, temp: f64, humid: f64, lux: f64, press: f64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "serial_number": "ST-1",
            "type": "obs_st",
            "hub_sn": "HB-1",
            "obs": [[epoch, 0.1, 0.2, 0.3, 90, 3, press, temp, humid, lux, 1.5, 80, 0, 0, 0, 0, 2.6, 1]],
            "firmware_revision": 129
        }))
        .unwrap()
    }

    fn micros(t: OffsetDateTime) -> i64 {
        unix_micros(t)
    }

    // -- Schema ---------------------------------------------------------

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = test_db().await;
        db.migrate().await.unwrap();
        assert_eq!(db.count().await.unwrap(), 0);
    }

    // -- Append ---------------------------------------------------------

    #[tokio::test]
    async fn append_stores_raw_payload() {
        let db = test_db().await;
        let payload = obs_payload(1_700_000_000, 20.0, 50.0, 1000.0, 1010.0);
        let ts = db.append(OBS_ST, &payload).await.unwrap();

        let (kind, stored): (String, Vec<u8>) =
            sqlx::query_as("SELECT record_type, reading FROM readings WHERE timestamp = ?")
                .bind(ts)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(kind, OBS_ST);
        assert_eq!(stored, payload);
    }

    #[tokio::test]
    async fn rapid_appends_get_distinct_increasing_timestamps() {
        let db = test_db().await;
        let payload = obs_payload(1_700_000_000, 20.0, 50.0, 1000.0, 1010.0);
        let mut last = i64::MIN;
        for _ in 0..50 {
            let ts = db.append(OBS_ST, &payload).await.unwrap();
            assert!(ts > last);
            last = ts;
        }
        assert_eq!(db.count().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn colliding_timestamp_is_rejected() {
        let db = test_db().await;
        let first = obs_payload(1_700_000_000, 20.0, 50.0, 1000.0, 1010.0);
        let second = obs_payload(1_700_000_060, 99.0, 99.0, 9.0, 999.0);
        db.append_at(42, OBS_ST, &first).await.unwrap();

        let err = db.append_at(42, OBS_ST, &second).await.unwrap_err();
        assert!(format!("{err:#}").contains("append failed ts=42"), "{err:#}");

        // original row untouched
        let rows = db.query_after(datetime!(1970-01-01 00:00:00 UTC)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].temp, 20.0);
    }

    // -- Range query ----------------------------------------------------

    #[tokio::test]
    async fn query_empty_db_returns_empty() {
        let db = test_db().await;
        let rows = db.query_after(datetime!(2024-01-01 00:00:00 UTC)).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn round_trip_projects_five_fields() {
        let db = test_db().await;
        let arrival = datetime!(2024-05-08 12:00:00 UTC);
        db.append_at(
            micros(arrival),
            OBS_ST,
            &obs_payload(1_715_169_600, 18.25, 61.5, 24_500.0, 1012.3),
        )
        .await
        .unwrap();

        let rows = db.query_after(arrival).await.unwrap();
        assert_eq!(
            rows,
            vec![PlotReading {
                timestamp: "2024-05-08 12:00:00".into(),
                temp: 18.25,
                humid: 61.5,
                lumos: 24_500,
                press: 1012.3,
            }]
        );

        let earlier = db.query_after(datetime!(2024-05-08 11:00:00 UTC)).await.unwrap();
        assert_eq!(earlier.len(), 1);

        let later = db.query_after(datetime!(2024-05-08 12:00:01 UTC)).await.unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn query_orders_by_arrival_time() {
        let db = test_db().await;
        let base = datetime!(2024-05-08 12:00:00 UTC);
        // inserted out of order; sample epochs deliberately disagree with arrival
        for (offset_s, temp, epoch) in [(120, 3.0, 1), (0, 1.0, 3), (60, 2.0, 2)] {
            let ts = micros(base + time::Duration::seconds(offset_s));
            db.append_at(ts, OBS_ST, &obs_payload(1_715_169_600 + epoch, temp, 50.0, 0.0, 1000.0))
                .await
                .unwrap();
        }

        let temps: Vec<f64> = db
            .query_after(base)
            .await
            .unwrap()
            .iter()
            .map(|r| r.temp)
            .collect();
        assert_eq!(temps, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn query_ignores_other_record_types() {
        let db = test_db().await;
        let base = datetime!(2024-05-08 12:00:00 UTC);
        db.append_at(micros(base), "hub_status", br#"{"type":"hub_status"}"#)
            .await
            .unwrap();
        db.append_at(micros(base) + 1, OBS_ST, &obs_payload(1_715_169_600, 5.0, 50.0, 0.0, 1000.0))
            .await
            .unwrap();

        let rows = db.query_after(base).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].temp, 5.0);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let db = test_db().await;
        let base = datetime!(2024-05-08 12:00:00 UTC);
        let good = |temp| obs_payload(1_715_169_600, temp, 50.0, 0.0, 1000.0);

        db.append_at(micros(base), OBS_ST, &good(1.0)).await.unwrap();
        db.append_at(micros(base) + 1, OBS_ST, b"not json").await.unwrap();
        db.append_at(
            micros(base) + 2,
            OBS_ST,
            br#"{"type":"obs_st","serial_number":"ST-1","obs":[],"firmware_revision":1}"#,
        )
        .await
        .unwrap();
        db.append_at(micros(base) + 3, OBS_ST, &good(4.0)).await.unwrap();

        let temps: Vec<f64> = db
            .query_after(base)
            .await
            .unwrap()
            .iter()
            .map(|r| r.temp)
            .collect();
        assert_eq!(temps, vec![1.0, 4.0]);
    }

    #[tokio::test]
    async fn count_on_closed_pool_is_an_error() {
        let db = test_db().await;
        db.close().await;
        let err = db.count().await.unwrap_err();
        assert!(format!("{err:#}").contains("count failed"), "{err:#}");
    }

    #[test]
    fn plot_reading_json_shape() {
        let r = project(&obs_payload(1_715_169_600, 18.0, 60.0, 123.9, 1001.5)).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["timestamp"], "2024-05-08 12:00:00");
        assert_eq!(json["temp"], 18.0);
        assert_eq!(json["humid"], 60.0);
        assert_eq!(json["lumos"], 123);
        assert_eq!(json["press"], 1001.5);
        assert_eq!(json.as_object().unwrap().len(), 5);
    }
}

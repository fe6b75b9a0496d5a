use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{
    Alert, Device, DeviceStatus, NewAlert, NewReading, Reading, RegisterDevice, Summary,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u32 = 5;

const READING_COLUMNS: &str = "id, device_id, value, unit, ts AS timestamp";

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Runs `op`, retrying transient database failures with exponential backoff.
pub async fn retry_transient<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(Error::Database(db_err))
                if attempts < MAX_ATTEMPTS && is_transient_error(&db_err) =>
            {
                let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    what, attempts, MAX_ATTEMPTS, wait_ms, db_err
                );
                DB_FAILURES_TOTAL.inc();
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
            Err(e) => {
                error!("{} failed after {} attempts: {}", what, attempts, e);
                return Err(e);
            }
        }
    }
}

pub fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}

// Devices

pub async fn list_devices(pool: &PgPool) -> Result<Vec<Device>> {
    let devices = sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY device_id")
        .fetch_all(pool)
        .await?;
    Ok(devices)
}

pub async fn get_device(pool: &PgPool, device_id: &str) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = $1")
        .bind(device_id)
        .fetch_optional(pool)
        .await?;
    Ok(device)
}

/// Inserts or refreshes a device; a registering device is online as of `now`.
pub async fn upsert_device(
    pool: &PgPool,
    device: &RegisterDevice,
    now: DateTime<Utc>,
) -> Result<Device> {
    let device = sqlx::query_as::<_, Device>(
        r#"
        INSERT INTO devices (device_id, name, device_type, location, status, last_seen, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 'online', $5, $5, $5)
        ON CONFLICT (device_id) DO UPDATE SET
            name = EXCLUDED.name,
            device_type = EXCLUDED.device_type,
            location = EXCLUDED.location,
            status = EXCLUDED.status,
            last_seen = EXCLUDED.last_seen,
            updated_at = EXCLUDED.updated_at
        RETURNING *
        "#,
    )
    .bind(&device.device_id)
    .bind(&device.name)
    .bind(device.device_type)
    .bind(&device.location)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(device)
}

/// Reads a device and holds its row lock until the transaction ends.
pub async fn lock_device<'e>(
    executor: impl PgExecutor<'e>,
    device_id: &str,
) -> Result<Option<Device>> {
    let device =
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = $1 FOR UPDATE")
            .bind(device_id)
            .fetch_optional(executor)
            .await?;
    Ok(device)
}

pub async fn update_device_status<'e>(
    executor: impl PgExecutor<'e>,
    device_id: &str,
    status: DeviceStatus,
) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        "UPDATE devices SET status = $2, updated_at = now() WHERE device_id = $1 RETURNING *",
    )
    .bind(device_id)
    .bind(status)
    .fetch_optional(executor)
    .await?;
    Ok(device)
}

/// Records that a device was heard from: bumps `last_seen` and marks it online.
pub async fn touch_device(
    pool: &PgPool,
    device_id: &str,
    seen_at: DateTime<Utc>,
) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        r#"
        UPDATE devices
        SET last_seen = GREATEST(COALESCE(last_seen, $2), $2), status = 'online', updated_at = now()
        WHERE device_id = $1
        RETURNING *
        "#,
    )
    .bind(device_id)
    .bind(seen_at)
    .fetch_optional(pool)
    .await?;
    Ok(device)
}

/// Marks a device offline if it is not already and has not been heard from
/// since `cutoff`. Returns whether it changed.
pub async fn mark_offline<'e>(
    executor: impl PgExecutor<'e>,
    device_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE devices SET status = 'offline', updated_at = now()
        WHERE device_id = $1
          AND status <> 'offline'
          AND (last_seen IS NULL OR last_seen < $2)
        "#,
    )
    .bind(device_id)
    .bind(cutoff)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

// Readings

pub async fn insert_reading(pool: &PgPool, reading: &NewReading) -> Result<Reading> {
    let query = format!(
        "INSERT INTO readings (device_id, value, unit, ts) VALUES ($1, $2, $3, $4) RETURNING {}",
        READING_COLUMNS
    );
    let stored = sqlx::query_as::<_, Reading>(&query)
        .bind(&reading.device_id)
        .bind(&reading.value)
        .bind(&reading.unit)
        .bind(reading.timestamp)
        .fetch_one(pool)
        .await?;
    Ok(stored)
}

/// Inserts a batch of readings in one statement, retrying transient failures.
pub async fn insert_readings(pool: &PgPool, batch: &[NewReading]) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }
    retry_transient("Reading batch insert", || insert_readings_inner(pool, batch)).await
}

async fn insert_readings_inner(pool: &PgPool, batch: &[NewReading]) -> Result<u64> {
    let device_ids: Vec<&str> = batch.iter().map(|r| r.device_id.as_str()).collect();
    let values: Vec<&str> = batch.iter().map(|r| r.value.as_str()).collect();
    let units: Vec<Option<&str>> = batch.iter().map(|r| r.unit.as_deref()).collect();
    let timestamps: Vec<DateTime<Utc>> = batch.iter().map(|r| r.timestamp).collect();

    let query = r#"
        INSERT INTO readings (device_id, value, unit, ts)
        SELECT * FROM UNNEST($1::varchar[], $2::varchar[], $3::varchar[], $4::timestamptz[])
        "#;

    let result = sqlx::query(query)
        .bind(&device_ids)
        .bind(&values)
        .bind(&units)
        .bind(&timestamps)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Newest readings first.
pub async fn recent_readings(pool: &PgPool, device_id: &str, limit: i64) -> Result<Vec<Reading>> {
    let query = format!(
        "SELECT {} FROM readings WHERE device_id = $1 ORDER BY ts DESC, id DESC LIMIT $2",
        READING_COLUMNS
    );
    let readings = sqlx::query_as::<_, Reading>(&query)
        .bind(device_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(readings)
}

/// Readings newer than `since`, oldest first. All devices when `device_id` is `None`.
pub async fn readings_since(
    pool: &PgPool,
    device_id: Option<&str>,
    since: DateTime<Utc>,
) -> Result<Vec<Reading>> {
    let query = format!(
        "SELECT {} FROM readings WHERE ts >= $1 AND ($2::varchar IS NULL OR device_id = $2) ORDER BY ts, id",
        READING_COLUMNS
    );
    let readings = sqlx::query_as::<_, Reading>(&query)
        .bind(since)
        .bind(device_id)
        .fetch_all(pool)
        .await?;
    Ok(readings)
}

// Alerts

pub async fn insert_alert<'e>(executor: impl PgExecutor<'e>, alert: &NewAlert) -> Result<Alert> {
    let stored = sqlx::query_as::<_, Alert>(
        r#"
        INSERT INTO alerts (device_id, alert_type, message, severity)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&alert.device_id)
    .bind(alert.alert_type)
    .bind(&alert.message)
    .bind(alert.severity)
    .fetch_one(executor)
    .await?;
    Ok(stored)
}

pub async fn unresolved_alerts(pool: &PgPool) -> Result<Vec<Alert>> {
    let alerts = sqlx::query_as::<_, Alert>(
        "SELECT * FROM alerts WHERE NOT resolved ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(alerts)
}

pub async fn all_alerts(pool: &PgPool) -> Result<Vec<Alert>> {
    let alerts = sqlx::query_as::<_, Alert>("SELECT * FROM alerts ORDER BY created_at DESC, id DESC")
        .fetch_all(pool)
        .await?;
    Ok(alerts)
}

/// Resolves an alert. An already resolved alert keeps its first resolution time.
pub async fn resolve_alert(
    pool: &PgPool,
    alert_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<Alert>> {
    let alert = sqlx::query_as::<_, Alert>(
        r#"
        UPDATE alerts
        SET resolved = TRUE, resolved_at = COALESCE(resolved_at, $2)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(alert_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(alert)
}

pub async fn summary(pool: &PgPool) -> Result<Summary> {
    let (total_devices, online, offline, error): (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE status = 'online'),
            COUNT(*) FILTER (WHERE status = 'offline'),
            COUNT(*) FILTER (WHERE status = 'error')
        FROM devices
        "#,
    )
    .fetch_one(pool)
    .await?;

    let (unresolved_alerts,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM alerts WHERE NOT resolved")
            .fetch_one(pool)
            .await?;

    Ok(Summary {
        total_devices,
        online,
        offline,
        error,
        unresolved_alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertType, DeviceType, Severity};
    use crate::testing;
    use chrono::TimeZone;

    #[tokio::test]
    #[ignore]
    async fn test_resolve_twice_keeps_first_time() {
        let pool = testing::pool().await;
        let device = testing::register(&pool, DeviceType::Temperature, Utc::now()).await;
        let alert = insert_alert(
            &pool,
            &NewAlert {
                device_id: device.device_id.clone(),
                alert_type: AlertType::Threshold,
                message: "Temperature too low: 12°C".to_string(),
                severity: Severity::Medium,
            },
        )
        .await
        .unwrap();
        assert!(!alert.resolved);

        let first = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        let resolved = resolve_alert(&pool, alert.id, first).await.unwrap().unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolved_at, Some(first));

        let again = resolve_alert(&pool, alert.id, later).await.unwrap().unwrap();
        assert_eq!(again.resolved_at, Some(first));
    }

    #[tokio::test]
    #[ignore]
    async fn test_resolve_unknown_alert() {
        let pool = testing::pool().await;
        assert!(resolve_alert(&pool, i64::MAX, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_mark_offline_respects_cutoff() {
        let pool = testing::pool().await;
        let seen = Utc::now();
        let device = testing::register(&pool, DeviceType::Occupancy, seen).await;

        let before_seen = seen - chrono::Duration::seconds(1);
        assert!(!mark_offline(&pool, &device.device_id, before_seen).await.unwrap());

        let after_seen = seen + chrono::Duration::seconds(1);
        assert!(mark_offline(&pool, &device.device_id, after_seen).await.unwrap());
        assert!(!mark_offline(&pool, &device.device_id, after_seen).await.unwrap());
    }
}

//! Reading submission pipeline shared by the HTTP and MQTT paths.

use crate::db;
use crate::errors::{Error, Result};
use crate::metrics::{ALERTS_RAISED_TOTAL, DB_FAILURES_TOTAL, READINGS_STORED_TOTAL};
use crate::model::{Alert, Device, NewAlert, NewReading, Reading, SubmitReading};
use crate::thresholds;
use crate::validate::validate_reading;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use std::future::Future;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
pub struct SubmitOutcome {
    pub success: bool,
    pub reading: Reading,
    pub alert: Option<Alert>,
}

/// Validates, stores and post-processes a single reading.
pub async fn submit(pool: &PgPool, submit: SubmitReading) -> Result<SubmitOutcome> {
    validate_reading(&submit)?;

    let reading = NewReading::received(submit, Utc::now());
    let stored = db::insert_reading(pool, &reading).await?;
    READINGS_STORED_TOTAL.inc();

    let alert = after_store(pool, &reading).await?;

    Ok(SubmitOutcome {
        success: true,
        reading: stored,
        alert,
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub stored: usize,
    pub rejected: usize,
    pub alerts: usize,
    pub post_failures: usize,
}

/// Stores a batch of readings, then updates device state and thresholds
/// for each stored one.
///
/// The batch goes in as one statement. If that fails for a reason other
/// than a lost connection, the rows are retried one by one so a single bad
/// row only costs itself. A failure while post-processing one reading is
/// logged and counted; the rest of the batch is still processed.
pub async fn ingest_batch(pool: &PgPool, batch: &[NewReading]) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();

    let stored: Vec<&NewReading> = match db::insert_readings(pool, batch).await {
        Ok(inserted) => {
            outcome.stored = inserted as usize;
            batch.iter().collect()
        }
        Err(Error::Database(e)) if batch.len() > 1 && !db::is_transient_error(&e) => {
            warn!(
                "Batch insert of {} readings failed, storing row by row: {}",
                batch.len(),
                e
            );
            let mut stored = Vec::with_capacity(batch.len());
            for reading in batch {
                match db::insert_reading(pool, reading).await {
                    Ok(_) => stored.push(reading),
                    Err(e) => {
                        warn!(
                            "Rejected reading {:?} from {}: {}",
                            reading.value, reading.device_id, e
                        );
                        outcome.rejected += 1;
                    }
                }
            }
            outcome.stored = stored.len();
            stored
        }
        Err(e) => return Err(e),
    };
    READINGS_STORED_TOTAL.inc_by(outcome.stored as f64);

    let (alerts, post_failures) = post_process(&stored, |r| after_store(pool, r)).await;
    outcome.alerts = alerts;
    outcome.post_failures = post_failures;
    Ok(outcome)
}

/// Runs `step` for every stored reading, carrying on past failures.
/// Returns (alerts raised, failures).
async fn post_process<'a, F, Fut>(stored: &[&'a NewReading], mut step: F) -> (usize, usize)
where
    F: FnMut(&'a NewReading) -> Fut,
    Fut: Future<Output = Result<Option<Alert>>>,
{
    let mut alerts = 0;
    let mut failures = 0;
    for &reading in stored {
        match step(reading).await {
            Ok(Some(_)) => alerts += 1,
            Ok(None) => {}
            Err(e) => {
                error!(
                    "Post-processing reading from {} failed: {}",
                    reading.device_id, e
                );
                DB_FAILURES_TOTAL.inc();
                failures += 1;
            }
        }
    }
    (alerts, failures)
}

/// Marks the device online and raises a threshold alert when warranted.
async fn after_store(pool: &PgPool, reading: &NewReading) -> Result<Option<Alert>> {
    let Some(device) = db::touch_device(pool, &reading.device_id, reading.timestamp).await? else {
        warn!(
            "Reading stored for unregistered device {}",
            reading.device_id
        );
        return Ok(None);
    };

    match threshold_alert(&device, reading) {
        Some(new_alert) => raise(pool, &new_alert).await.map(Some),
        None => Ok(None),
    }
}

fn threshold_alert(device: &Device, reading: &NewReading) -> Option<NewAlert> {
    let Some(value) = crate::model::parse_numeric(&reading.value) else {
        debug!(
            "Reading {:?} from {} is not numeric, skipping thresholds",
            reading.value, device.device_id
        );
        return None;
    };
    thresholds::evaluate(&device.device_id, device.device_type, value)
}

/// Stores an alert and counts it.
pub async fn raise(pool: &PgPool, alert: &NewAlert) -> Result<Alert> {
    let stored = db::insert_alert(pool, alert).await?;
    announce(&stored);
    Ok(stored)
}

/// Counts and logs an alert once it is committed.
pub fn announce(alert: &Alert) {
    ALERTS_RAISED_TOTAL
        .with_label_values(&[alert.alert_type.as_str()])
        .inc();
    info!(
        "Raised {} {} alert for {}: {}",
        alert.severity, alert.alert_type, alert.device_id, alert.message
    );
}

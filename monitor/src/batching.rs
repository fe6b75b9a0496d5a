use crate::ingest::{ingest_batch, BatchOutcome};
use crate::metrics::{BATCH_SIZE, INGEST_LATENCY_SECONDS};
use crate::model::NewReading;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Collects readings from the MQTT side and writes them in batches, either
/// when `max_batch` readings are buffered or every `max_wait_ms`.
pub async fn run_batcher(
    mut rx: mpsc::Receiver<NewReading>,
    pool: PgPool,
    max_batch: usize,
    max_wait_ms: u64,
) {
    info!(
        "Starting batcher with max_batch={}, max_wait_ms={}",
        max_batch, max_wait_ms
    );

    let mut buffer: Vec<NewReading> = Vec::with_capacity(max_batch);
    let mut ticker = interval(Duration::from_millis(max_wait_ms));

    loop {
        tokio::select! {
            // Validated readings from the MQTT subscriber
            reading = rx.recv() => {
                let Some(reading) = reading else {
                    // Subscriber gone, write what is left and stop
                    info!("Channel closed, flushing remaining batch");
                    flush_batch(&pool, &mut buffer).await;
                    break;
                };

                buffer.push(reading);
                if buffer.len() >= max_batch {
                    flush_batch(&pool, &mut buffer).await;
                }
            }

            // Keeps a quiet device's readings from sitting in the buffer
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_batch(&pool, &mut buffer).await;
                }
            }
        }
    }

    info!("Batcher stopped");
}

/// Writes the buffered readings and empties the buffer either way.
/// Transient database errors are retried inside `ingest_batch`; a batch
/// that still fails is dropped so the channel keeps draining.
async fn flush_batch(pool: &PgPool, buffer: &mut Vec<NewReading>) {
    let batch_len = buffer.len();
    if batch_len == 0 {
        return;
    }

    debug!("Flushing batch of {} readings", batch_len);
    BATCH_SIZE.set(batch_len as f64);

    let start = Instant::now();

    match ingest_batch(pool, buffer).await {
        Ok(outcome) => {
            let elapsed = start.elapsed().as_secs_f64();
            INGEST_LATENCY_SECONDS.observe(elapsed);
            report(&outcome, elapsed);
        }
        Err(e) => {
            // Nothing from this batch reached the readings table
            error!("Failed to ingest batch: {}", e);
            error!(
                "CRITICAL: {} readings dropped due to persistent DB failure",
                batch_len
            );
        }
    }

    buffer.clear();
    BATCH_SIZE.set(0.0);
}

fn report(outcome: &BatchOutcome, elapsed: f64) {
    if outcome.rejected > 0 {
        warn!(
            "{} reading(s) rejected by the database, {} stored",
            outcome.rejected, outcome.stored
        );
    }
    if outcome.post_failures > 0 {
        // Stored, but device state and thresholds were not updated
        warn!(
            "{} stored reading(s) could not be post-processed",
            outcome.post_failures
        );
    }
    debug!(
        "Batch of {} readings stored in {:.3}s, {} alert(s) raised",
        outcome.stored, elapsed, outcome.alerts
    );
}

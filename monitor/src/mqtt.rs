use crate::errors::{Error, Result};
use crate::metrics::{CHANNEL_FULL_TOTAL, INVALID_READINGS_TOTAL, READINGS_RECEIVED_TOTAL};
use crate::model::{NewReading, SubmitReading};
use crate::validate::validate_reading;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const READINGS_TOPIC: &str = "readings/#";

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    tx: mpsc::Sender<NewReading>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    // One topic per device under readings/, QoS 1
    client
        .subscribe(READINGS_TOPIC, QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", READINGS_TOPIC);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    READINGS_RECEIVED_TOTAL.with_label_values(&["mqtt"]).inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    // A bad payload is counted and skipped, never fatal
                    if let Err(e) = process_message(&publish.payload, &tx).await {
                        warn!("Dropping message from {}: {}", publish.topic, e);
                        INVALID_READINGS_TOTAL.inc();
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Parses and validates one payload and hands it to the batch writer.
async fn process_message(payload: &[u8], tx: &mpsc::Sender<NewReading>) -> Result<()> {
    let submit = serde_json::from_slice::<SubmitReading>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    // Anything that passes here must be storable, or it would fail the batch
    validate_reading(&submit)?;
    let reading = NewReading::received(submit, Utc::now());

    // Fast path first; when the batcher lags, wait instead of dropping
    match tx.try_send(reading) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(reading)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Channel full, waiting for the batcher");
            tx.send(reading).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Channel closed, cannot forward reading");
            Err(Error::ChannelSend)
        }
    }
}

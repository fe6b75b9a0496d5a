mod telemetry;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::time::Duration;
use telemetry::{DeviceType, SubmitReading};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Http,
    Mqtt,
}

/// Simulates campus IoT devices reporting to the monitor
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Base URL of the monitor API
    #[arg(long, env = "MONITOR_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Unique device identifier; suffixed with an index when --count > 1
    #[arg(long)]
    device_id: String,

    /// Device name
    #[arg(long)]
    name: String,

    #[arg(long = "type", value_enum)]
    device_type: DeviceType,

    /// Device location
    #[arg(long)]
    location: String,

    /// Seconds between readings
    #[arg(long, default_value_t = 10)]
    interval: u64,

    /// Number of devices to simulate
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// How readings are delivered; registration always uses HTTP
    #[arg(long, value_enum, default_value_t = Transport::Http)]
    transport: Transport,

    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,
}

#[derive(Debug, Clone)]
struct SimDevice {
    device_id: String,
    name: String,
}

#[derive(Clone)]
enum Sender {
    Http,
    Mqtt(AsyncClient),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simulator=info".into()),
        )
        .init();

    let args = Args::parse();
    if args.interval == 0 || args.count == 0 {
        bail!("--interval and --count must be positive");
    }

    let devices = sim_devices(&args);
    info!(
        "Starting {} {:?} simulator(s) at {}, interval {}s, transport {:?}",
        devices.len(),
        args.device_type,
        args.location,
        args.interval,
        args.transport
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    for device in &devices {
        register(&http, &args, device)
            .await
            .with_context(|| format!("failed to register {}", device.device_id))?;
        info!("Device {} registered", device.device_id);
    }

    let sender = match args.transport {
        Transport::Http => Sender::Http,
        Transport::Mqtt => Sender::Mqtt(connect_mqtt(&args)),
    };

    let outcome = tokio::select! {
        result = run(&http, &args, &devices, &sender) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down simulator...");
            Ok(())
        }
    };

    let final_status = if outcome.is_ok() { "offline" } else { "error" };
    for device in &devices {
        if let Err(e) = update_status(&http, &args.url, &device.device_id, final_status).await {
            warn!("Failed to set {} {}: {}", device.device_id, final_status, e);
        }
    }

    outcome
}

fn sim_devices(args: &Args) -> Vec<SimDevice> {
    if args.count == 1 {
        return vec![SimDevice {
            device_id: args.device_id.clone(),
            name: args.name.clone(),
        }];
    }
    (1..=args.count)
        .map(|i| SimDevice {
            device_id: format!("{}-{}", args.device_id, i),
            name: format!("{} {}", args.name, i),
        })
        .collect()
}

fn connect_mqtt(args: &Args) -> AsyncClient {
    let client_id = format!("sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.mqtt_broker, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    client
}

async fn register(http: &reqwest::Client, args: &Args, device: &SimDevice) -> anyhow::Result<()> {
    http.post(format!("{}/api/v1/devices", args.url))
        .json(&json!({
            "device_id": device.device_id,
            "name": device.name,
            "type": args.device_type,
            "location": args.location,
        }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

async fn update_status(
    http: &reqwest::Client,
    url: &str,
    device_id: &str,
    status: &str,
) -> anyhow::Result<()> {
    http.put(format!("{}/api/v1/devices/{}/status", url, device_id))
        .json(&json!({ "status": status }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

const MAX_FAILED_ROUNDS: u32 = 10;

/// Publishes one reading per device every interval. Send failures are
/// logged; the loop gives up after `MAX_FAILED_ROUNDS` rounds in a row where
/// nothing got through.
async fn run(
    http: &reqwest::Client,
    args: &Args,
    devices: &[SimDevice],
    sender: &Sender,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval));
    let mut rng = rand::thread_rng();
    let mut sent = 0u64;
    let mut failed_rounds = 0;

    loop {
        ticker.tick().await;
        let now = chrono::Local::now();
        let mut delivered = 0;

        for device in devices {
            let (value, unit) = telemetry::generate(&mut rng, args.device_type, now);
            let reading = SubmitReading {
                device_id: device.device_id.clone(),
                value,
                unit: Some(unit.to_string()),
            };

            match send(http, &args.url, sender, &reading).await {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        "{}: {}{}",
                        device.name,
                        reading.value,
                        reading.unit.as_deref().unwrap_or("")
                    );
                }
                Err(e) => warn!("Failed to send reading for {}: {}", device.device_id, e),
            }
        }

        if delivered == 0 {
            failed_rounds += 1;
            if failed_rounds >= MAX_FAILED_ROUNDS {
                bail!("no reading delivered in {} rounds", failed_rounds);
            }
        } else {
            failed_rounds = 0;
        }

        let before = sent;
        sent += delivered;
        if sent / 100 > before / 100 {
            info!("Published {} readings", sent);
        }

        // Jitter keeps many simulated devices from reporting in lockstep
        let jitter = rng.gen_range(0..=args.interval.min(2) * 100);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
    }
}

async fn send(
    http: &reqwest::Client,
    url: &str,
    sender: &Sender,
    reading: &SubmitReading,
) -> anyhow::Result<()> {
    match sender {
        Sender::Http => {
            http.post(format!("{}/api/v1/readings", url))
                .json(reading)
                .send()
                .await?
                .error_for_status()?;
        }
        Sender::Mqtt(client) => {
            let payload = serde_json::to_vec(reading)?;
            client
                .publish(
                    format!("readings/{}", reading.device_id),
                    QoS::AtLeastOnce,
                    false,
                    payload,
                )
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "simulator",
            "--device-id",
            "temp-lab",
            "--name",
            "Lab thermometer",
            "--type",
            "temperature",
            "--location",
            "Building B",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let args = args(&[]);
        assert_eq!(args.interval, 10);
        assert_eq!(args.count, 1);
        assert_eq!(args.transport, Transport::Http);
        assert_eq!(args.device_type, DeviceType::Temperature);
    }

    #[test]
    fn test_single_device_keeps_id() {
        let devices = sim_devices(&args(&[]));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "temp-lab");
    }

    #[test]
    fn test_fleet_ids_are_suffixed() {
        let devices = sim_devices(&args(&["--count", "3", "--transport", "mqtt"]));
        let ids: Vec<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["temp-lab-1", "temp-lab-2", "temp-lab-3"]);
        assert_eq!(devices[2].name, "Lab thermometer 3");
    }
}

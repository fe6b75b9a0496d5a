use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Temperature,
    Humidity,
    Occupancy,
    Lighting,
}

/// The three-valued device status flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Threshold,
    Offline,
    Error,
}

/// Alert severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "alert_severity", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Threshold => "threshold",
            AlertType::Offline => "offline",
            AlertType::Error => "error",
        }
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered device
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub device_id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub location: String,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored sensor reading
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub id: i64,
    pub device_id: String,
    pub value: String,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn numeric_value(&self) -> Option<f64> {
        parse_numeric(&self.value)
    }
}

/// Interprets a reading value as a number.
///
/// Plain numbers parse directly. Composite values such as the lighting
/// `"on,80"` format yield their last comma-separated field.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return v.is_finite().then_some(v);
    }
    let last = trimmed.rsplit(',').next()?;
    if last.len() == trimmed.len() {
        return None;
    }
    last.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub id: i64,
    pub device_id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub severity: Severity,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// An alert that has been decided on but not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub device_id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub severity: Severity,
}

/// Device registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub device_id: String,
    pub name: String,
    #[serde(rename = "type", alias = "device_type")]
    pub device_type: DeviceType,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub status: DeviceStatus,
}

/// Reading submission payload, shared by the HTTP and MQTT ingest paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReading {
    pub device_id: String,
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
}

/// A reading accepted for storage, stamped with its arrival time.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub device_id: String,
    pub value: String,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewReading {
    pub fn received(submit: SubmitReading, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: submit.device_id,
            value: submit.value,
            unit: submit.unit.filter(|u| !u.is_empty()),
            timestamp,
        }
    }
}

/// Device counts shown on the dashboard
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub total_devices: i64,
    pub online: i64,
    pub offline: i64,
    pub error: i64,
    pub unresolved_alerts: i64,
}

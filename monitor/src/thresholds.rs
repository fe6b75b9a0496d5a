//! Fixed threshold rules applied to incoming readings.
//!
//! Only temperature and humidity devices carry thresholds. Bounds are
//! exclusive: a reading exactly on a bound does not alert.

use crate::model::{AlertType, DeviceType, NewAlert, Severity};

const TEMP_HIGH: f64 = 30.0;
const TEMP_CRITICAL: f64 = 35.0;
const TEMP_LOW: f64 = 15.0;
const HUMIDITY_HIGH: f64 = 70.0;
const HUMIDITY_LOW: f64 = 30.0;

/// Returns the alert a numeric reading should raise, if any.
pub fn evaluate(device_id: &str, device_type: DeviceType, value: f64) -> Option<NewAlert> {
    let (message, severity) = match device_type {
        DeviceType::Temperature if value > TEMP_HIGH => {
            let severity = if value > TEMP_CRITICAL {
                Severity::Critical
            } else {
                Severity::High
            };
            (format!("Temperature too high: {}°C", value), severity)
        }
        DeviceType::Temperature if value < TEMP_LOW => {
            (format!("Temperature too low: {}°C", value), Severity::Medium)
        }
        DeviceType::Humidity if value > HUMIDITY_HIGH => {
            (format!("Humidity too high: {}%", value), Severity::High)
        }
        DeviceType::Humidity if value < HUMIDITY_LOW => {
            (format!("Humidity too low: {}%", value), Severity::Medium)
        }
        _ => return None,
    };

    Some(NewAlert {
        device_id: device_id.to_string(),
        alert_type: AlertType::Threshold,
        message,
        severity,
    })
}

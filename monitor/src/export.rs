//! CSV export of readings and alerts.

use crate::errors::{Error, Result};
use crate::model::{Alert, Reading};
use chrono::{DateTime, SecondsFormat, Utc};

pub fn readings_csv(readings: &[Reading]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["id", "device_id", "value", "unit", "timestamp"])?;

    for r in readings {
        writer.write_record([
            r.id.to_string().as_str(),
            r.device_id.as_str(),
            r.value.as_str(),
            r.unit.as_deref().unwrap_or(""),
            rfc3339(r.timestamp).as_str(),
        ])?;
    }

    finish(writer)
}

pub fn alerts_csv(alerts: &[Alert]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "id",
        "device_id",
        "alert_type",
        "severity",
        "message",
        "resolved",
        "created_at",
        "resolved_at",
    ])?;

    for a in alerts {
        writer.write_record([
            a.id.to_string().as_str(),
            a.device_id.as_str(),
            a.alert_type.as_str(),
            a.severity.as_str(),
            a.message.as_str(),
            if a.resolved { "true" } else { "false" },
            rfc3339(a.created_at).as_str(),
            a.resolved_at.map(rfc3339).unwrap_or_default().as_str(),
        ])?;
    }

    finish(writer)
}

pub fn readings_filename(today: DateTime<Utc>) -> String {
    format!("sensor_readings_{}.csv", today.format("%Y-%m-%d"))
}

pub fn alerts_filename(today: DateTime<Utc>) -> String {
    format!("device_alerts_{}.csv", today.format("%Y-%m-%d"))
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertType, Severity};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    #[test]
    fn test_readings_csv() {
        let readings = vec![
            Reading {
                id: 1,
                device_id: "t-1".to_string(),
                value: "21.5".to_string(),
                unit: Some("°C".to_string()),
                timestamp: at(9, 0),
            },
            Reading {
                id: 2,
                device_id: "l-1".to_string(),
                value: "on,80".to_string(),
                unit: None,
                timestamp: at(9, 5),
            },
        ];

        let csv = readings_csv(&readings).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "id,device_id,value,unit,timestamp");
        assert_eq!(lines[1], "1,t-1,21.5,°C,2024-03-05T09:00:00Z");
        assert_eq!(lines[2], "2,l-1,\"on,80\",,2024-03-05T09:05:00Z");
    }

    #[test]
    fn test_empty_export_has_header() {
        let csv = alerts_csv(&[]).unwrap();
        assert_eq!(
            csv.trim_end(),
            "id,device_id,alert_type,severity,message,resolved,created_at,resolved_at"
        );
    }

    #[test]
    fn test_alerts_csv() {
        let alerts = vec![Alert {
            id: 7,
            device_id: "h-1".to_string(),
            alert_type: AlertType::Threshold,
            message: "Humidity too high: 80%".to_string(),
            severity: Severity::High,
            resolved: true,
            created_at: at(10, 0),
            resolved_at: Some(at(10, 30)),
        }];

        let csv = alerts_csv(&alerts).unwrap();
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(
            row,
            "7,h-1,threshold,high,Humidity too high: 80%,true,2024-03-05T10:00:00Z,2024-03-05T10:30:00Z"
        );
    }

    #[test]
    fn test_filenames() {
        assert_eq!(readings_filename(at(0, 0)), "sensor_readings_2024-03-05.csv");
        assert_eq!(alerts_filename(at(0, 0)), "device_alerts_2024-03-05.csv");
    }
}

use chrono::{DateTime, Local, Timelike};
use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Temperature,
    Humidity,
    Occupancy,
    Lighting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReading {
    pub device_id: String,
    pub value: String,
    pub unit: Option<String>,
}

/// Generates a plausible reading for the device type at local time `now`.
pub fn generate(rng: &mut impl Rng, device_type: DeviceType, now: DateTime<Local>) -> (String, &'static str) {
    let hour = now.hour();
    match device_type {
        DeviceType::Temperature => {
            // Daily curve peaking at 14:00
            let base = 20.0 + 5.0 * (1.0 - (hour as f64 - 14.0).abs() / 14.0);
            let temp = base + rng.gen_range(-2.0..2.0);
            (format!("{:.1}", temp), "°C")
        }
        DeviceType::Humidity => (format!("{:.1}", rng.gen_range(35.0..75.0)), "%"),
        DeviceType::Occupancy => {
            let people = if (8..=18).contains(&hour) {
                rng.gen_range(20..=100)
            } else {
                rng.gen_range(0..=20)
            };
            (people.to_string(), "people")
        }
        DeviceType::Lighting => {
            if (7..=22).contains(&hour) {
                (format!("on,{}", rng.gen_range(50..=100)), "%")
            } else {
                ("off,0".to_string(), "%")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_temperature_range() {
        let mut rng = rand::thread_rng();
        for hour in 0..24 {
            let (value, unit) = generate(&mut rng, DeviceType::Temperature, at(hour));
            let v: f64 = value.parse().unwrap();
            assert!((15.0..=27.0).contains(&v), "{} at {}h", v, hour);
            assert_eq!(unit, "°C");
        }
    }

    #[test]
    fn test_occupancy_by_hour() {
        let mut rng = rand::thread_rng();
        let (day, _) = generate(&mut rng, DeviceType::Occupancy, at(10));
        let (night, _) = generate(&mut rng, DeviceType::Occupancy, at(2));
        assert!(day.parse::<u32>().unwrap() >= 20);
        assert!(night.parse::<u32>().unwrap() <= 20);
    }

    #[test]
    fn test_lighting_off_at_night() {
        let mut rng = rand::thread_rng();
        let (value, _) = generate(&mut rng, DeviceType::Lighting, at(3));
        assert_eq!(value, "off,0");

        let (value, _) = generate(&mut rng, DeviceType::Lighting, at(12));
        assert!(value.starts_with("on,"));
    }
}

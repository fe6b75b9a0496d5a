use crate::errors::{Error, Result};
use crate::model::{RegisterDevice, SubmitReading};

const DEVICE_ID_MAX: usize = 64;
const NAME_MAX: usize = 255;
const LOCATION_MAX: usize = 255;
const VALUE_MAX: usize = 255;
const UNIT_MAX: usize = 50;

/// Validates a device identifier as used in paths and payloads
pub fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty() {
        return Err(Error::Validation("Device ID cannot be empty".to_string()));
    }

    if device_id.chars().count() > DEVICE_ID_MAX {
        return Err(Error::Validation(format!(
            "Device ID longer than {} characters",
            DEVICE_ID_MAX
        )));
    }

    if device_id.chars().any(char::is_whitespace) {
        return Err(Error::Validation(
            "Device ID cannot contain whitespace".to_string(),
        ));
    }

    reject_nul("Device ID", device_id)
}

/// Validates a device registration
pub fn validate_registration(device: &RegisterDevice) -> Result<()> {
    validate_device_id(&device.device_id)?;
    require_text("Name", &device.name, NAME_MAX)?;
    require_text("Location", &device.location, LOCATION_MAX)?;
    Ok(())
}

/// Validates a submitted reading
pub fn validate_reading(reading: &SubmitReading) -> Result<()> {
    validate_device_id(&reading.device_id)?;
    require_text("Value", &reading.value, VALUE_MAX)?;

    if let Some(unit) = &reading.unit {
        if unit.chars().count() > UNIT_MAX {
            return Err(Error::Validation(format!(
                "Unit longer than {} characters",
                UNIT_MAX
            )));
        }
        reject_nul("Unit", unit)?;
    }

    Ok(())
}

fn require_text(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} cannot be empty", field)));
    }
    if value.chars().count() > max {
        return Err(Error::Validation(format!(
            "{} longer than {} characters",
            field, max
        )));
    }
    reject_nul(field, value)
}

// Postgres text columns cannot hold NUL
fn reject_nul(field: &str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(Error::Validation(format!(
            "{} cannot contain NUL characters",
            field
        )));
    }
    Ok(())
}

//! Manual device status changes.

use crate::db;
use crate::errors::Result;
use crate::ingest;
use crate::model::{Alert, AlertType, Device, DeviceStatus, NewAlert, Severity};
use sqlx::PgPool;

#[derive(Debug)]
pub struct StatusChange {
    pub device: Device,
    pub alert: Option<Alert>,
}

/// Sets a device's status. Entering `error` raises one `high` alert; a
/// device already in `error` gets none. The row stays locked from read to
/// commit so concurrent changes see each other's result.
pub async fn change_status(
    pool: &PgPool,
    device_id: &str,
    status: DeviceStatus,
) -> Result<Option<StatusChange>> {
    let mut tx = pool.begin().await?;

    let Some(previous) = db::lock_device(&mut *tx, device_id).await? else {
        return Ok(None);
    };
    let Some(device) = db::update_device_status(&mut *tx, device_id, status).await? else {
        return Ok(None);
    };

    let alert = if status == DeviceStatus::Error && previous.status != DeviceStatus::Error {
        Some(db::insert_alert(&mut *tx, &error_alert(&device)).await?)
    } else {
        None
    };

    tx.commit().await?;

    if let Some(alert) = &alert {
        ingest::announce(alert);
    }
    Ok(Some(StatusChange { device, alert }))
}

fn error_alert(device: &Device) -> NewAlert {
    NewAlert {
        device_id: device.device_id.clone(),
        alert_type: AlertType::Error,
        message: format!("Device {} reported an error", device.name),
        severity: Severity::High,
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel send error")]
    ChannelSend,
}

impl Error {
    pub fn device_not_found(device_id: impl Into<String>) -> Self {
        Error::NotFound {
            entity: "Device",
            id: device_id.into(),
        }
    }

    pub fn alert_not_found(alert_id: i64) -> Self {
        Error::NotFound {
            entity: "Alert",
            id: alert_id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

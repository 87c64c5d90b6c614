/// Errors surfaced by the monitoring core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MonitorError {
    /// Unknown zone or alert id.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Rejected zone configuration (threshold band, duplicate id, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The external backing store could not be read or written.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl MonitorError {
    pub fn zone_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "zone",
            id: id.to_string(),
        }
    }

    pub fn alert_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "alert",
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

// Command service - Use case for user-initiated saves and device actions
use crate::application::device_api::DeviceApi;
use crate::domain::error::CommandError;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct CommandService {
    api: Arc<dyn DeviceApi>,
}

impl CommandService {
    pub fn new(api: Arc<dyn DeviceApi>) -> Self {
        Self { api }
    }

    /// Store a configuration object. `failure_message` prefixes the
    /// device's error text if the save is refused.
    pub async fn save(&self, key: &str, payload: &Value, failure_message: &str) -> Result<(), CommandError> {
        self.api.save(key, payload).await.map_err(|e| {
            tracing::warn!("Saving {} failed: {:#}", key, e);
            CommandError::new(failure_message, format!("{e:#}"))
        })
    }

    /// Trigger an action such as `soc/manual_request`.
    pub async fn call(&self, key: &str, payload: &Value, failure_message: &str) -> Result<(), CommandError> {
        self.api.call(key, payload).await.map_err(|e| {
            tracing::warn!("Calling {} failed: {:#}", key, e);
            CommandError::new(failure_message, format!("{e:#}"))
        })
    }
}

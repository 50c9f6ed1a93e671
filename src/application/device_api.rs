// Device API seam consumed by the feeds and the command service
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Latest value of a state or config object, e.g. `soc/state`
    async fn get_state(&self, key: &str) -> anyhow::Result<Value>;

    /// Raw body of a bootstrap endpoint, e.g. `soc/live`
    async fn fetch_bootstrap(&self, path: &str) -> anyhow::Result<String>;

    /// Store a configuration object (`<key>_update`)
    async fn save(&self, key: &str, payload: &Value) -> anyhow::Result<()>;

    /// Trigger a device action, e.g. `soc/manual_request`
    async fn call(&self, key: &str, payload: &Value) -> anyhow::Result<()>;
}

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::client::HubClient;
use crate::protocol::{schedule_payload, schedule_topic, valid_device_name};
use crate::types::{HvacMode, Week};

const MAX_PUBLISH_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Policy layer between the orchestrator and the hub: knows how a desired
/// HVAC behaviour or weekly schedule becomes concrete service calls, and
/// wraps the fire-and-forget schedule publish in a bounded retry.
///
/// Every operation returns a plain bool so callers can aggregate many of
/// them with partial-failure tolerance.
pub struct DeviceCommandDispatcher {
    client: HubClient,
    device_names: HashMap<String, String>,
    topic_namespace: String,
    settle_delay: Duration,
    retry_base: Duration,
}

impl DeviceCommandDispatcher {
    /// `device_names` maps thermostat entity ids to the device names used in
    /// the downstream publish topic.
    pub fn new(client: HubClient, device_names: HashMap<String, String>) -> Self {
        Self {
            client,
            device_names,
            topic_namespace: "zigbee2mqtt".to_string(),
            settle_delay: SETTLE_DELAY,
            retry_base: RETRY_BASE,
        }
    }

    pub fn topic_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.topic_namespace = namespace.into();
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub async fn set_device_mode(&self, entity_id: &str, mode: HvacMode) -> bool {
        self.client.set_thermostat_mode(entity_id, mode).await
    }

    /// Put the thermostat on auto and push the expanded weekly schedule.
    /// The mode set always precedes the publish; commands are fire-and-forget
    /// so the device gets a short settle window between the two.
    pub async fn apply_schedule(&self, entity_id: &str, week: &Week) -> bool {
        if !self.set_device_mode(entity_id, HvacMode::Auto).await {
            warn!(entity_id, "auto mode set failed, pushing schedule anyway");
        }
        tokio::time::sleep(self.settle_delay).await;
        self.publish_schedule(entity_id, week).await
    }

    pub async fn publish_schedule(&self, entity_id: &str, week: &Week) -> bool {
        let Some(device) = self.device_names.get(entity_id) else {
            warn!(entity_id, "no device name mapped, skipping schedule push");
            return false;
        };
        if !valid_device_name(device) {
            error!(entity_id, device, "device name outside allowed character class");
            return false;
        }

        let topic = schedule_topic(&self.topic_namespace, device);
        let payload = schedule_payload(week).to_string();

        for attempt in 0..MAX_PUBLISH_ATTEMPTS {
            if attempt > 0 {
                let wait = self.retry_base * 2u32.pow(attempt - 1);
                warn!(
                    entity_id,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "retrying schedule publish"
                );
                tokio::time::sleep(wait).await;
            }
            let data = json!({"topic": topic, "payload": payload});
            if self
                .client
                .call_service("mqtt", "publish", None, Some(data))
                .await
            {
                info!(entity_id, device, "published weekly schedule");
                return true;
            }
        }

        error!(
            entity_id,
            device,
            attempts = MAX_PUBLISH_ATTEMPTS,
            "schedule publish failed"
        );
        false
    }
}

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::types::{
    EntityState, HvacMode, SelectState, SensorState, ThermostatState, Week,
};

pub(crate) fn auth_message(access_token: &str) -> Value {
    json!({
        "type": "auth",
        "access_token": access_token,
    })
}

pub(crate) fn get_states_message(id: u64) -> Value {
    json!({
        "id": id,
        "type": "get_states",
    })
}

pub(crate) fn subscribe_events_message(id: u64) -> Value {
    json!({
        "id": id,
        "type": "subscribe_events",
        "event_type": "state_changed",
    })
}

/// Some services (`mqtt.publish`) take no entity_id; it is merged into
/// `service_data` only when present.
pub(crate) fn call_service_message(
    id: u64,
    domain: &str,
    service: &str,
    entity_id: Option<&str>,
    data: Option<Value>,
) -> Value {
    let mut service_data = Map::new();
    if let Some(entity_id) = entity_id {
        service_data.insert("entity_id".to_string(), Value::String(entity_id.to_string()));
    }
    if let Some(Value::Object(extra)) = data {
        service_data.extend(extra);
    }
    json!({
        "id": id,
        "type": "call_service",
        "domain": domain,
        "service": service,
        "service_data": service_data,
    })
}

/// Extract `(entity_id, new_state)` from a `state_changed` push. Returns
/// `None` for every other message shape, including removal events where
/// `new_state` is null.
pub(crate) fn parse_state_changed(msg: &Value) -> Option<(&str, &Value)> {
    if msg.get("type")?.as_str()? != "event" {
        return None;
    }
    let event = msg.get("event")?;
    if event.get("event_type")?.as_str()? != "state_changed" {
        return None;
    }
    let data = event.get("data")?;
    let entity_id = data.get("entity_id")?.as_str()?;
    let new_state = data.get("new_state")?;
    if new_state.is_null() {
        return None;
    }
    Some((entity_id, new_state))
}

/// Decide the typed entity variant once, from the entity-id category.
/// Entities outside the four known categories are not cached.
pub(crate) fn parse_entity(state: &Value) -> Option<EntityState> {
    let entity_id = state.get("entity_id")?.as_str()?;
    let value = state.get("state").and_then(|v| v.as_str()).unwrap_or("");
    let available = value != "unavailable";
    let last_updated = parse_timestamp(state);
    let attrs = state.get("attributes").cloned().unwrap_or_else(|| json!({}));
    let friendly_name = attrs
        .get("friendly_name")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if entity_id.starts_with("climate.") {
        Some(EntityState::Thermostat(ThermostatState {
            entity_id: entity_id.to_string(),
            friendly_name,
            current_temperature: attrs.get("current_temperature").and_then(|v| v.as_f64()),
            target_temperature: attrs.get("temperature").and_then(|v| v.as_f64()),
            mode: HvacMode::from_wire_str(value),
            preset_mode: attrs
                .get("preset_mode")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            battery: attrs.get("battery").and_then(|v| v.as_i64()),
            available,
            last_updated,
        }))
    } else if entity_id.starts_with("sensor.") {
        let lowered = entity_id.to_ascii_lowercase();
        let reading = if available { value.parse::<f64>().ok() } else { None };
        let unit = attrs
            .get("unit_of_measurement")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let sensor = |fallback_unit: &str| SensorState {
            entity_id: entity_id.to_string(),
            friendly_name: friendly_name.clone(),
            reading,
            unit: unit.clone().or_else(|| Some(fallback_unit.to_string())),
            available,
            last_updated,
        };
        if lowered.contains("temp") {
            Some(EntityState::TemperatureSensor(sensor("\u{00b0}C")))
        } else if lowered.contains("humid") {
            Some(EntityState::HumiditySensor(sensor("%")))
        } else {
            None
        }
    } else if entity_id.starts_with("input_select.") {
        let options = attrs
            .get("options")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Some(EntityState::Select(SelectState {
            entity_id: entity_id.to_string(),
            friendly_name,
            value: available.then(|| value.to_string()),
            options,
            available,
            last_updated,
        }))
    } else {
        None
    }
}

fn parse_timestamp(state: &Value) -> DateTime<Utc> {
    state
        .get("last_updated")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Device names are interpolated into MQTT topics; anything outside the
/// `[a-z0-9()\s]` class is refused before a frame is written.
pub(crate) fn valid_device_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_ascii_whitespace() || c == '(' || c == ')'
        })
}

pub(crate) fn schedule_topic(namespace: &str, device: &str) -> String {
    format!("{namespace}/{device}/set")
}

pub(crate) fn schedule_payload(week: &Week) -> Value {
    json!({ "weekly_schedule": week })
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::types::{StateCache, ThermostatState, Zone};

/// Zones loaded from configuration. Read-mostly: the orchestrator treats a
/// zone as immutable within one transition; only the assigned schedule is
/// updated after a successful application.
pub struct ZoneDirectory {
    zones: Mutex<BTreeMap<String, Zone>>,
}

impl ZoneDirectory {
    pub fn new() -> Self {
        Self {
            zones: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load zones from a JSON file holding either a map of id to zone or a
    /// plain list of zones. A missing file yields an empty directory.
    pub fn load(path: &Path) -> Self {
        let directory = Self::new();
        let data = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "zones file unreadable, starting empty");
                return directory;
            }
        };
        let parsed: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                error!(path = %path.display(), error = %e, "zones file invalid, starting empty");
                return directory;
            }
        };

        let entries: Vec<Value> = match parsed {
            Value::Object(map) => map.into_values().collect(),
            Value::Array(list) => list,
            _ => {
                error!(path = %path.display(), "zones file is neither map nor list");
                return directory;
            }
        };
        for entry in entries {
            match serde_json::from_value::<Zone>(entry) {
                Ok(zone) => directory.insert(zone),
                Err(e) => error!(error = %e, "skipping bad zone entry"),
            }
        }
        info!(count = directory.zones.lock().expect("zones lock poisoned").len(), "loaded zones");
        directory
    }

    pub fn insert(&self, zone: Zone) {
        self.zones
            .lock()
            .expect("zones lock poisoned")
            .insert(zone.id.clone(), zone);
    }

    pub fn all_zones(&self) -> Vec<Zone> {
        self.zones
            .lock()
            .expect("zones lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn enabled_zones(&self) -> Vec<Zone> {
        self.zones
            .lock()
            .expect("zones lock poisoned")
            .values()
            .filter(|z| z.enabled)
            .cloned()
            .collect()
    }

    pub fn zone(&self, id: &str) -> Option<Zone> {
        self.zones.lock().expect("zones lock poisoned").get(id).cloned()
    }

    pub fn assign_schedule(&self, zone_id: &str, schedule_id: &str) -> bool {
        let mut zones = self.zones.lock().expect("zones lock poisoned");
        match zones.get_mut(zone_id) {
            Some(zone) => {
                zone.active_schedule = Some(schedule_id.to_string());
                true
            }
            None => {
                warn!(zone_id, "cannot assign schedule, zone unknown");
                false
            }
        }
    }

    /// Zone detail with sensor aggregates, computed over a cache snapshot.
    pub fn zone_status(&self, zone_id: &str, cache: &StateCache) -> Option<ZoneStatus> {
        let zone = self.zone(zone_id)?;

        let thermostats: Vec<ThermostatState> = zone
            .thermostats
            .iter()
            .filter_map(|id| cache.thermostats.get(id).cloned())
            .collect();

        let temps: Vec<f64> = zone
            .temperature_sensors
            .iter()
            .filter_map(|id| cache.temperature_sensors.get(id))
            .filter_map(|s| s.reading)
            .collect();
        let humidities: Vec<f64> = zone
            .humidity_sensors
            .iter()
            .filter_map(|id| cache.humidity_sensors.get(id))
            .filter_map(|s| s.reading)
            .collect();

        Some(ZoneStatus {
            zone,
            thermostats,
            average_temperature: round_average(&temps),
            average_humidity: round_average(&humidities),
        })
    }
}

impl Default for ZoneDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ZoneStatus {
    pub zone: Zone,
    pub thermostats: Vec<ThermostatState>,
    pub average_temperature: Option<f64>,
    pub average_humidity: Option<f64>,
}

fn round_average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some((avg * 10.0).round() / 10.0)
}

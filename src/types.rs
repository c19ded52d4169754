use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Device-level operating mode of a single TRV thermostat.
/// Distinct from [`SystemMode`], the supervisor-level regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Off,
    Heat,
    Auto,
}

impl HvacMode {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Heat => "heat",
            HvacMode::Auto => "auto",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "off" => Some(HvacMode::Off),
            "heat" => Some(HvacMode::Heat),
            "auto" => Some(HvacMode::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Supervisor-level operating regime. Exactly one value is current at any
/// instant for the whole controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    Default,
    StayHome,
    Eco,
    Timer,
    Ventilation,
    Manual,
    Off,
}

impl SystemMode {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            SystemMode::Default => "default",
            SystemMode::StayHome => "stay_home",
            SystemMode::Eco => "eco",
            SystemMode::Timer => "timer",
            SystemMode::Ventilation => "ventilation",
            SystemMode::Manual => "manual",
            SystemMode::Off => "off",
        }
    }

    /// Parse a persisted selector value. `holiday` is the legacy spelling of
    /// the eco regime and still appears in older hub installations.
    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "default" => Some(SystemMode::Default),
            "stay_home" => Some(SystemMode::StayHome),
            "eco" | "holiday" => Some(SystemMode::Eco),
            "timer" => Some(SystemMode::Timer),
            "ventilation" => Some(SystemMode::Ventilation),
            "manual" => Some(SystemMode::Manual),
            "off" => Some(SystemMode::Off),
            _ => None,
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// One mode-transition request. Per-mode parameters are carried in the
/// variant, so a timer without a restore instant cannot be constructed.
#[derive(Debug, Clone)]
pub enum ModeRequest {
    Default,
    StayHome { active_zones: Option<Vec<String>> },
    Eco,
    Timer { restore_at: DateTime<Local> },
    Ventilation { duration: Duration },
    Manual,
    Off,
}

impl ModeRequest {
    pub fn mode(&self) -> SystemMode {
        match self {
            ModeRequest::Default => SystemMode::Default,
            ModeRequest::StayHome { .. } => SystemMode::StayHome,
            ModeRequest::Eco => SystemMode::Eco,
            ModeRequest::Timer { .. } => SystemMode::Timer,
            ModeRequest::Ventilation { .. } => SystemMode::Ventilation,
            ModeRequest::Manual => SystemMode::Manual,
            ModeRequest::Off => SystemMode::Off,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThermostatState {
    pub entity_id: String,
    pub friendly_name: Option<String>,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub mode: Option<HvacMode>,
    pub preset_mode: Option<String>,
    pub battery: Option<i64>,
    pub available: bool,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SensorState {
    pub entity_id: String,
    pub friendly_name: Option<String>,
    pub reading: Option<f64>,
    pub unit: Option<String>,
    pub available: bool,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SelectState {
    pub entity_id: String,
    pub friendly_name: Option<String>,
    pub value: Option<String>,
    pub options: Vec<String>,
    pub available: bool,
    pub last_updated: DateTime<Utc>,
}

/// Typed entity variant, decided once at ingestion from the entity-id
/// category. Consumers never sniff id prefixes themselves.
#[derive(Debug, Clone)]
pub enum EntityState {
    Thermostat(ThermostatState),
    TemperatureSensor(SensorState),
    HumiditySensor(SensorState),
    Select(SelectState),
}

impl EntityState {
    pub fn entity_id(&self) -> &str {
        match self {
            EntityState::Thermostat(t) => &t.entity_id,
            EntityState::TemperatureSensor(s) | EntityState::HumiditySensor(s) => &s.entity_id,
            EntityState::Select(s) => &s.entity_id,
        }
    }
}

/// Point-in-time view of all monitored entities. Entries are immutable value
/// objects replaced wholesale; readers clone the whole cache and never see a
/// half-updated entity.
#[derive(Debug, Clone, Default)]
pub struct StateCache {
    pub thermostats: HashMap<String, ThermostatState>,
    pub temperature_sensors: HashMap<String, SensorState>,
    pub humidity_sensors: HashMap<String, SensorState>,
    pub selects: HashMap<String, SelectState>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StateCache {
    pub(crate) fn insert(&mut self, entity: EntityState) {
        match entity {
            EntityState::Thermostat(t) => {
                self.thermostats.insert(t.entity_id.clone(), t);
            }
            EntityState::TemperatureSensor(s) => {
                self.temperature_sensors.insert(s.entity_id.clone(), s);
            }
            EntityState::HumiditySensor(s) => {
                self.humidity_sensors.insert(s.entity_id.clone(), s);
            }
            EntityState::Select(s) => {
                self.selects.insert(s.entity_id.clone(), s);
            }
        }
        self.last_updated = Some(Utc::now());
    }

    pub fn select_value(&self, entity_id: &str) -> Option<&str> {
        self.selects.get(entity_id).and_then(|s| s.value.as_deref())
    }
}

/// A named grouping of thermostats and sensors controlled as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub thermostats: Vec<String>,
    #[serde(default)]
    pub temperature_sensors: Vec<String>,
    #[serde(default)]
    pub humidity_sensors: Vec<String>,
    #[serde(default)]
    pub active_schedule: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Seven day slots, `monday` through `sunday`. Used both as a week plan
/// (day-type ids) and as the expanded wire schedule (`HH:MM/temp` strings);
/// the field names match the device's `weekly_schedule` payload keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Week {
    pub monday: String,
    pub tuesday: String,
    pub wednesday: String,
    pub thursday: String,
    pub friday: String,
    pub saturday: String,
    pub sunday: String,
}

impl Week {
    pub fn uniform(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            monday: value.clone(),
            tuesday: value.clone(),
            wednesday: value.clone(),
            thursday: value.clone(),
            friday: value.clone(),
            saturday: value.clone(),
            sunday: value,
        }
    }

    pub fn day(&self, day: Weekday) -> &str {
        match day {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    pub fn set_day(&mut self, day: Weekday, value: impl Into<String>) {
        let slot = match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        };
        *slot = value.into();
    }

    pub fn map(&self, mut f: impl FnMut(&str) -> String) -> Week {
        Week {
            monday: f(&self.monday),
            tuesday: f(&self.tuesday),
            wednesday: f(&self.wednesday),
            thursday: f(&self.thursday),
            friday: f(&self.friday),
            saturday: f(&self.saturday),
            sunday: f(&self.sunday),
        }
    }
}

/// Heating schedule: a week of day-type references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub week: Week,
}

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::Weekday;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::types::{Schedule, Week};
use crate::{Error, Result};

pub const DEFAULT_SCHEDULE_ID: &str = "default";
pub const ECO_SCHEDULE_ID: &str = "eco";
/// Day type substituted for the current day when stay-home is active.
pub const WEEKEND_DAY_TYPE: &str = "weekend_day";
const ECO_DAY_TYPE: &str = "eco_day";

fn builtin_day_types() -> HashMap<String, String> {
    [
        ("workday", "00:00/17 06:30/19 07:00/21 09:00/17 16:00/21 23:00/17"),
        ("weekend_day", "00:00/17 07:00/21 12:00/21 18:00/21 22:00/21 23:00/17"),
        ("eco_day", "00:00/16 06:00/17 08:00/18 16:00/18 20:00/17 23:00/16"),
    ]
    .into_iter()
    .map(|(id, schedule)| (id.to_string(), schedule.to_string()))
    .collect()
}

/// Day-type templates plus named schedules composed from them. Resolves a
/// schedule id to its week plan and expands plans into the wire format the
/// devices accept: six `HH:MM/temp` tokens per day, first token `00:00/...`.
pub struct ScheduleCatalog {
    day_types: HashMap<String, String>,
    schedules: HashMap<String, Schedule>,
}

impl ScheduleCatalog {
    /// Built-in day types, no schedules.
    pub fn new() -> Self {
        Self {
            day_types: builtin_day_types(),
            schedules: HashMap::new(),
        }
    }

    /// Load day types and schedules from disk. Missing or malformed files
    /// fall back to the built-in day types and an empty schedule set; the
    /// catalog itself never fails to construct.
    pub fn load(day_types_path: &Path, schedules_dir: &Path) -> Self {
        let mut catalog = Self::new();
        catalog.load_day_types(day_types_path);
        catalog.load_schedules(schedules_dir);
        catalog
    }

    fn load_day_types(&mut self, path: &Path) {
        let data = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "day types file unreadable, using built-ins");
                return;
            }
        };
        let parsed: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                error!(path = %path.display(), error = %e, "day types file invalid, using built-ins");
                return;
            }
        };
        // Accept both {"day_types": {...}} and the flat {id: {...}} layout.
        let entries = parsed.get("day_types").unwrap_or(&parsed);
        let Some(map) = entries.as_object() else {
            error!(path = %path.display(), "day types are not an object, using built-ins");
            return;
        };

        let mut loaded = HashMap::new();
        for (id, entry) in map {
            let schedule = entry
                .get("schedule")
                .and_then(|v| v.as_str())
                .or_else(|| entry.as_str());
            match schedule {
                Some(s) => {
                    check_template(id, s);
                    loaded.insert(id.clone(), s.to_string());
                }
                None => warn!(day_type = %id, "day type entry has no schedule string"),
            }
        }
        if loaded.is_empty() {
            warn!(path = %path.display(), "no usable day types in file, using built-ins");
            return;
        }
        info!(count = loaded.len(), "loaded day types");
        self.day_types = loaded;
    }

    fn load_schedules(&mut self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "schedules directory unreadable");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Schedule>(&text).map_err(|e| e.to_string()))
            {
                Ok(schedule) => {
                    self.schedules.insert(schedule.id.clone(), schedule);
                }
                Err(e) => error!(path = %path.display(), error = %e, "skipping bad schedule file"),
            }
        }
        info!(count = self.schedules.len(), "loaded schedules");
    }

    pub fn insert_schedule(&mut self, schedule: Schedule) {
        self.schedules.insert(schedule.id.clone(), schedule);
    }

    pub fn schedule(&self, id: &str) -> Option<&Schedule> {
        self.schedules.get(id)
    }

    /// Resolve a schedule id for application. Missing ids and disabled
    /// schedules are both preconditions the caller must fail on.
    pub fn resolve(&self, id: &str) -> Result<&Schedule> {
        let schedule = self
            .schedules
            .get(id)
            .ok_or_else(|| Error::UnknownSchedule(id.to_string()))?;
        if !schedule.enabled {
            return Err(Error::InvalidRequest(format!("schedule {id} is disabled")));
        }
        Ok(schedule)
    }

    /// The wire string for one day type.
    pub fn day_schedule(&self, day_type_id: &str) -> Result<&str> {
        self.day_types
            .get(day_type_id)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownSchedule(day_type_id.to_string()))
    }

    /// Expand a week plan of day-type ids into wire strings. Expansion is
    /// total: an unknown day type falls back to the eco day pattern.
    pub fn expand(&self, plan: &Week) -> Week {
        plan.map(|day_type| match self.day_types.get(day_type) {
            Some(schedule) => schedule.clone(),
            None => {
                error!(day_type, "unknown day type, falling back to eco pattern");
                self.day_types
                    .get(ECO_DAY_TYPE)
                    .cloned()
                    .unwrap_or_else(|| "00:00/16".to_string())
            }
        })
    }

    /// Week plan for stay-home: the given day's pattern swapped to the
    /// weekend day type, every other day untouched.
    pub fn stay_home_plan(&self, base: &Week, swap_day: Weekday) -> Week {
        let mut plan = base.clone();
        plan.set_day(swap_day, WEEKEND_DAY_TYPE);
        plan
    }
}

impl Default for ScheduleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn check_template(id: &str, schedule: &str) {
    let tokens = schedule.split_whitespace().count();
    if tokens != 6 {
        warn!(day_type = %id, tokens, "day type does not have 6 time/temp tokens");
    }
    if !schedule.starts_with("00:00/") {
        warn!(day_type = %id, "day type does not start at 00:00");
    }
}

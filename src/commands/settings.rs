use crate::analysis::window::{
    WindowPolicy, WindowZone, ANCHOR_STANDARD_OFFSET_HOURS, ANCHOR_TIMEZONE,
};
use crate::models::completed_task::Team;
use chrono::{Duration, Weekday};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: i64 = 1;
pub const TOKEN_ENV: &str = "TRACKER_TOKEN";

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyTrigger {
    pub name: String,
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
    pub teams: Vec<Team>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub window: WindowPolicy,
    pub tracker_base_url: String,
    pub http_timeout_secs: u64,
    pub spaces: HashMap<Team, String>,
    pub schedules: Vec<WeeklyTrigger>,
}

impl PipelineSettings {
    pub fn space(&self, team: Team) -> Option<&str> {
        self.spaces
            .get(&team)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        resolve_settings(&default_settings())
    }
}

pub async fn get_settings(data_dir: String) -> Result<Value, String> {
    load_settings_from_disk(&data_dir)
}

pub async fn save_settings(data_dir: String, settings: Value) -> Result<Value, String> {
    save_settings_to_disk(&data_dir, settings)
}

pub fn load_pipeline_settings(data_dir: &str) -> Result<PipelineSettings, String> {
    let settings = load_settings_from_disk(data_dir)?;
    let mut resolved = resolve_settings(&settings);

    for team in Team::ALL {
        let var = format!("TRACKER_SPACE_{}", team.key().to_uppercase());
        if let Ok(id) = std::env::var(&var) {
            if !id.trim().is_empty() {
                resolved.spaces.insert(team, id.trim().to_string());
            }
        }
    }

    Ok(resolved)
}

/// Typed view of an already sanitised settings document.
pub fn resolve_settings(settings: &Value) -> PipelineSettings {
    let timezone = settings
        .get("timezone")
        .and_then(Value::as_str)
        .unwrap_or(ANCHOR_TIMEZONE);
    let offset_hours = settings
        .get("fallbackUtcOffsetHours")
        .and_then(Value::as_i64)
        .unwrap_or(ANCHOR_STANDARD_OFFSET_HOURS as i64) as i32;
    let anchor = settings
        .get("anchorWeekday")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<Weekday>().ok())
        .unwrap_or(Weekday::Tue);
    let min_elapsed_days = settings
        .get("minElapsedDays")
        .and_then(Value::as_i64)
        .unwrap_or(5);

    let mut spaces = HashMap::new();
    if let Some(obj) = settings.get("spaces").and_then(Value::as_object) {
        for team in Team::ALL {
            if let Some(id) = obj.get(team.key()).and_then(Value::as_str) {
                spaces.insert(team, id.to_string());
            }
        }
    }

    let schedules = settings
        .get("schedules")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(parse_trigger).collect())
        .unwrap_or_default();

    PipelineSettings {
        window: WindowPolicy {
            anchor,
            min_elapsed: Duration::days(min_elapsed_days),
            zone: WindowZone::resolve(timezone, offset_hours),
        },
        tracker_base_url: settings
            .get("trackerBaseUrl")
            .and_then(Value::as_str)
            .unwrap_or("https://api.clickup.com/api/v2")
            .trim_end_matches('/')
            .to_string(),
        http_timeout_secs: settings
            .get("httpTimeoutSecs")
            .and_then(Value::as_u64)
            .unwrap_or(30),
        spaces,
        schedules,
    }
}

fn parse_trigger(entry: &Value) -> Option<WeeklyTrigger> {
    let weekday = entry.get("weekday")?.as_str()?.parse::<Weekday>().ok()?;
    let teams: Vec<Team> = entry
        .get("teams")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|team| team.parse().ok())
        .collect();
    if teams.is_empty() {
        return None;
    }

    Some(WeeklyTrigger {
        name: entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("weekly")
            .to_string(),
        weekday,
        hour: entry.get("hour").and_then(Value::as_u64).unwrap_or(0).min(23) as u32,
        minute: entry.get("minute").and_then(Value::as_u64).unwrap_or(0).min(59) as u32,
        teams,
    })
}

pub fn load_settings_from_disk(data_dir: &str) -> Result<Value, String> {
    let path = settings_path(data_dir);
    ensure_state_dir(data_dir)?;

    let original = if path.exists() {
        let raw = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read settings.json: {e}"))?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| json!({}))
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(&path, &migrated)?;
    }

    Ok(migrated)
}

pub fn save_settings_to_disk(data_dir: &str, settings: Value) -> Result<Value, String> {
    let path = settings_path(data_dir);
    ensure_state_dir(data_dir)?;

    let mut merged = load_settings_from_disk(data_dir).unwrap_or_else(|_| default_settings());
    merge_settings(&mut merged, &settings);

    let migrated = migrate_settings(merged);
    write_settings_file(&path, &migrated)?;
    Ok(migrated)
}

pub(crate) fn state_dir(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join(".quotasync")
}

fn settings_path(data_dir: &str) -> PathBuf {
    state_dir(data_dir).join("settings.json")
}

pub(crate) fn ensure_state_dir(data_dir: &str) -> Result<(), String> {
    fs::create_dir_all(state_dir(data_dir))
        .map_err(|e| format!("Failed to create .quotasync directory: {e}"))
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {e}"))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write settings.json: {e}"))
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    deep_merge_defaults(&mut out, &defaults);
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "timezone": ANCHOR_TIMEZONE,
        "fallbackUtcOffsetHours": ANCHOR_STANDARD_OFFSET_HOURS,
        "anchorWeekday": "tue",
        "minElapsedDays": 5,
        "trackerBaseUrl": "https://api.clickup.com/api/v2",
        "httpTimeoutSecs": 30,
        "spaces": {
            "concept": "",
            "playable": "",
            "art": "",
            "video": ""
        },
        "schedules": [
            {
                "name": "concept-art",
                "weekday": "mon", "hour": 23, "minute": 59,
                "teams": ["concept", "art"]
            },
            {
                "name": "playable-video",
                "weekday": "mon", "hour": 23, "minute": 59,
                "teams": ["playable", "video"]
            }
        ]
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object())
    else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    clamp_i64(obj, "fallbackUtcOffsetHours", -12, 14, ANCHOR_STANDARD_OFFSET_HOURS as i64);
    clamp_i64(obj, "minElapsedDays", 0, 6, 5);
    clamp_i64(obj, "httpTimeoutSecs", 5, 300, 30);

    sanitize_enum(
        obj,
        "anchorWeekday",
        &["mon", "tue", "wed", "thu", "fri", "sat", "sun"],
        "tue",
    );

    if !obj.get("timezone").is_some_and(Value::is_string) {
        obj.insert("timezone".to_string(), json!(ANCHOR_TIMEZONE));
    }

    if let Some(spaces) = obj.get_mut("spaces").and_then(Value::as_object_mut) {
        for value in spaces.values_mut() {
            if !value.is_string() {
                *value = json!("");
            }
        }
    }

    if !obj.get("schedules").is_some_and(Value::is_array) {
        obj.insert("schedules".to_string(), default_settings()["schedules"].clone());
    }
}

fn clamp_i64(map: &mut Map<String, Value>, key: &str, min: i64, max: i64, default: i64) {
    let raw = map.get(key).and_then(Value::as_i64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn sanitize_enum(map: &mut Map<String, Value>, key: &str, allowed: &[&str], default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .filter(|value| allowed.contains(&value.as_str()))
        .unwrap_or_else(|| default.to_string());
    map.insert(key.to_string(), json!(valid));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_anchor_policy() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.window.anchor, Weekday::Tue);
        assert_eq!(settings.window.min_elapsed, Duration::days(5));
        assert!(matches!(settings.window.zone, WindowZone::Named(_)));
        assert_eq!(settings.schedules.len(), 2);
        assert_eq!(settings.schedules[0].teams, vec![Team::Concept, Team::Art]);
        assert!(settings.space(Team::Art).is_none());
    }

    #[test]
    fn sanitizes_out_of_range_and_unknown_values() {
        let migrated = migrate_settings(json!({
            "anchorWeekday": "someday",
            "minElapsedDays": 40,
            "httpTimeoutSecs": 1,
            "spaces": { "art": 12 }
        }));

        assert_eq!(migrated["anchorWeekday"], json!("tue"));
        assert_eq!(migrated["minElapsedDays"], json!(6));
        assert_eq!(migrated["httpTimeoutSecs"], json!(5));
        assert_eq!(migrated["spaces"]["art"], json!(""));
        assert_eq!(migrated["spaces"]["video"], json!(""));
        assert_eq!(migrated["schema_version"], json!(SETTINGS_SCHEMA_VERSION));
    }

    #[test]
    fn merges_partial_settings_without_losing_existing_values() {
        let mut existing = default_settings();
        merge_settings(&mut existing, &json!({ "spaces": { "art": "9001" } }));
        let migrated = migrate_settings(existing);

        assert_eq!(migrated["spaces"]["art"], json!("9001"));
        assert_eq!(migrated["spaces"]["concept"], json!(""));
        assert_eq!(migrated["timezone"], json!(ANCHOR_TIMEZONE));

        let resolved = resolve_settings(&migrated);
        assert_eq!(resolved.space(Team::Art), Some("9001"));
    }

    #[test]
    fn triggers_without_known_teams_are_dropped() {
        let resolved = resolve_settings(&migrate_settings(json!({
            "schedules": [
                { "weekday": "fri", "hour": 30, "minute": 5, "teams": ["video"] },
                { "weekday": "fri", "teams": ["sound"] }
            ]
        })));

        assert_eq!(resolved.schedules.len(), 1);
        assert_eq!(resolved.schedules[0].weekday, Weekday::Fri);
        assert_eq!(resolved.schedules[0].hour, 23);
        assert_eq!(resolved.schedules[0].teams, vec![Team::Video]);
    }
}

//! User settings, persisted as one flat JSON object.
//!
//! Loading is forgiving: unknown keys are ignored, and a key that is missing
//! or holds the wrong type falls back to its default without affecting the
//! other keys.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme: String,
    pub language: String,
    pub editor_font_size: u32,
    pub auto_save: bool,
    pub auto_save_interval_secs: u64,
    pub ai_model: String,
    pub ai_temperature: f32,
    pub ai_max_tokens: u32,
    pub stream_responses: bool,
    /// Sync the chapter automatically when it is saved.
    pub auto_sync_on_save: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            language: "en".to_string(),
            editor_font_size: 16,
            auto_save: true,
            auto_save_interval_secs: 30,
            ai_model: "default".to_string(),
            ai_temperature: 0.8,
            ai_max_tokens: 2048,
            stream_responses: true,
            auto_sync_on_save: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(Self::from_json(&contents))
    }

    /// Parse a settings object, back-filling defaults key by key.
    ///
    /// Anything that is not a JSON object yields the defaults.
    pub fn from_json(contents: &str) -> Self {
        let stored = match serde_json::from_str::<Value>(contents) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!("settings are not a JSON object, using defaults");
                return Self::default();
            }
        };

        let mut merged = Self::default_map();
        for (key, value) in stored {
            if !merged.contains_key(&key) {
                continue;
            }
            let mut candidate = merged.clone();
            candidate.insert(key.clone(), value);
            if Self::deserialize(&Value::Object(candidate.clone())).is_ok() {
                merged = candidate;
            } else {
                tracing::warn!(%key, "ignoring ill-typed setting");
            }
        }

        Self::deserialize(&Value::Object(merged)).unwrap_or_default()
    }

    /// Write settings atomically (temp file, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn default_map() -> Map<String, Value> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

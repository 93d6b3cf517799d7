use serde::{Deserialize, Serialize};
use smartloop::{LooperConfig, SmartRecConfig};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub host_name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
    pub input_latency_compensation_ms: f32,
    /// Tracks created at startup, numbered from 1.
    pub num_tracks: usize,
    pub smart_rec: SmartRecConfig,
    pub looper: LooperConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host_name: None,
            input_device: None,
            output_device: None,
            sample_rate: None,
            buffer_size: None,
            input_latency_compensation_ms: 5.0, // Default to 5ms safety buffer
            num_tracks: 4,
            smart_rec: SmartRecConfig::default(),
            looper: LooperConfig::default(),
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let app_settings_dir = exe_dir.join("AppSettings");
            if !app_settings_dir.exists() {
                if let Err(e) = fs::create_dir_all(&app_settings_dir) {
                    log::warn!(
                        "Failed to create directory at {}: {}",
                        app_settings_dir.display(),
                        e
                    );
                    return None;
                }
            }
            return Some(app_settings_dir);
        }
    }
    log::warn!("Could not determine application directory.");
    None
}

pub fn save_settings(settings: &AppSettings) {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        match serde_json::to_string_pretty(settings) {
            Ok(json_string) => {
                if let Err(e) = fs::write(&path, json_string) {
                    log::warn!("Failed to write settings to {}: {}", path.display(), e);
                } else {
                    log::debug!("Saved settings to {}", path.display());
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize settings: {}", e);
            }
        }
    }
}

/// Missing fields take their defaults; a malformed file yields all defaults.
pub fn parse_settings(json_string: &str) -> AppSettings {
    match serde_json::from_str(json_string) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Failed to parse settings file, using defaults. Error: {}", e);
            AppSettings::default()
        }
    }
}

pub fn load_settings() -> AppSettings {
    if let Some(dir) = get_config_dir() {
        let path = dir.join("settings.json");
        if path.exists() {
            return match fs::read_to_string(&path) {
                Ok(json_string) => parse_settings(&json_string),
                Err(e) => {
                    log::warn!("Failed to read settings file, using defaults. Error: {}", e);
                    AppSettings::default()
                }
            };
        }
    }
    AppSettings::default()
}

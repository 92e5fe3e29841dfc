use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Persisted recorder settings.
///
/// The core only reads and writes these fields; the presentation layer owns
/// when to load and save them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub selected_input_device_id: Option<String>,
    pub selected_output_device_id: Option<String>,

    pub follow_default_input: bool,
    pub follow_default_output: bool,

    pub auto_start_recording: bool,

    pub buffer_duration_secs: u32,
    pub sample_rate: u32,

    pub mic_gain: f32,
    pub sound_gain: f32,
    pub separate_tracks: bool,

    pub mic_capture_enabled: bool,
    pub sound_capture_enabled: bool,
    /// Keep a silence-fed playback stream open while loopback-capturing so
    /// the capture clock keeps ticking.
    pub play_silence: bool,

    pub recording_folder: String,
    pub file_name_template: String,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            selected_input_device_id: None,
            selected_output_device_id: None,
            follow_default_input: true,
            follow_default_output: true,
            auto_start_recording: true,
            buffer_duration_secs: 20,
            sample_rate: 32_000,
            mic_gain: 1.0,
            sound_gain: 1.0,
            separate_tracks: false,
            mic_capture_enabled: true,
            sound_capture_enabled: true,
            play_silence: true,
            recording_folder: String::new(),
            file_name_template: "Sound_{Timestamp}".into(),
        }
    }
}

impl RecorderSettings {
    /// Load settings from a JSON file. Missing or unreadable files yield
    /// `None`; the caller falls back to defaults.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("Could not read settings from {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(settings) => Some(settings),
            Err(e) => {
                log::error!("Could not parse settings from {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Save settings as JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    /// Render the snapshot file name from the template, substituting the
    /// `{Timestamp}` placeholder (case-insensitive) with the current local
    /// time and appending the `.wav` extension.
    pub fn render_file_name(&self) -> String {
        let stamp = chrono::Local::now().format("%y_%m_%d_%H_%M_%S").to_string();
        let mut name = self.file_name_template.clone();
        for needle in ["{Timestamp}", "{timestamp}"] {
            if name.contains(needle) {
                name = name.replace(needle, &stamp);
            }
        }
        format!("{name}.wav")
    }
}

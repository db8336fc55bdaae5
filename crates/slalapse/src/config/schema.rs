use serde::{Deserialize, Serialize};

/// On-disk configuration. Keys are camelCase; every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_true")]
    pub enabled: bool,

    // Sensor
    #[serde(default = "default_sensor_pin")]
    pub sensor_pin: u32,
    /// Overrides the sysfs value file derived from `sensor_pin`.
    #[serde(default)]
    pub sensor_value_path: Option<String>,
    #[serde(default)]
    pub dark_level: DarkLevel,
    #[serde(default = "default_sensor_poll_millis")]
    pub sensor_poll_millis: u64,
    #[serde(default = "default_debounce_millis")]
    pub debounce_millis: u64,

    // Triggering
    #[serde(default = "default_capture_delay")]
    pub capture_delay_seconds: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_seconds: u64,
    #[serde(default)]
    pub ignore_trigger_count: u32,

    // Capture
    #[serde(default = "default_snapshot_folder")]
    pub snapshot_folder: String,
    #[serde(default = "default_snapshot_url")]
    pub snapshot_url: String,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_seconds: u64,

    // Finalization
    #[serde(default = "default_true")]
    pub video_on_finalize: bool,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_encoder_binary")]
    pub encoder_binary: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_video_extension")]
    pub video_extension: String,
    #[serde(default = "default_encoder_timeout")]
    pub encoder_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub archive_on_finalize: bool,
    #[serde(default)]
    pub delete_folder_after_archive: bool,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

/// Which raw sensor level means "the platform is blocking the light".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DarkLevel {
    #[default]
    High,
    Low,
}

fn default_true() -> bool {
    true
}

fn default_sensor_pin() -> u32 {
    21
}

fn default_sensor_poll_millis() -> u64 {
    20
}

fn default_debounce_millis() -> u64 {
    300
}

fn default_capture_delay() -> u64 {
    5
}

fn default_inactivity_timeout() -> u64 {
    240
}

fn default_snapshot_folder() -> String {
    "~/timelapse".to_string()
}

fn default_snapshot_url() -> String {
    "http://localhost:8080/?action=snapshot".to_string()
}

fn default_snapshot_timeout() -> u64 {
    15
}

fn default_frame_rate() -> u32 {
    60
}

fn default_encoder_binary() -> String {
    "ffmpeg".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_video_extension() -> String {
    "mp4".to_string()
}

fn default_encoder_timeout() -> u64 {
    600
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            sensor_pin: default_sensor_pin(),
            sensor_value_path: None,
            dark_level: DarkLevel::default(),
            sensor_poll_millis: default_sensor_poll_millis(),
            debounce_millis: default_debounce_millis(),
            capture_delay_seconds: default_capture_delay(),
            inactivity_timeout_seconds: default_inactivity_timeout(),
            ignore_trigger_count: 0,
            snapshot_folder: default_snapshot_folder(),
            snapshot_url: default_snapshot_url(),
            snapshot_timeout_seconds: default_snapshot_timeout(),
            video_on_finalize: true,
            frame_rate: default_frame_rate(),
            encoder_binary: default_encoder_binary(),
            video_codec: default_video_codec(),
            video_extension: default_video_extension(),
            encoder_timeout_seconds: default_encoder_timeout(),
            archive_on_finalize: true,
            delete_folder_after_archive: false,
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

impl Config {
    /// The sysfs GPIO value file for the configured pin, unless overridden.
    pub fn sensor_value_path(&self) -> String {
        self.sensor_value_path
            .clone()
            .unwrap_or_else(|| format!("/sys/class/gpio/gpio{}/value", self.sensor_pin))
    }
}

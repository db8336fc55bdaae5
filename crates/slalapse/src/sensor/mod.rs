//! Light sensor ingress: raw levels, debouncing, and leading-edge filtering.

pub mod debounce;
pub mod ignore;
pub mod source;

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{Config, DarkLevel};
use crate::error::SensorError;

pub use debounce::EdgeDebouncer;
pub use ignore::TriggerIgnoreFilter;
pub use source::{ChannelSensor, RawLevelSender, SensorSource, ValueFileSensor};

/// Logical light level at the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// The build platform is blocking the light.
    Dark,
    Light,
}

impl Level {
    /// Maps a raw pin level (`true` = high) through the configured polarity.
    pub fn from_raw(high: bool, dark_level: DarkLevel) -> Self {
        match (high, dark_level) {
            (true, DarkLevel::High) | (false, DarkLevel::Low) => Level::Dark,
            _ => Level::Light,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Dark => write!(f, "dark"),
            Level::Light => write!(f, "light"),
        }
    }
}

/// A clean, debounced level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub level: Level,
    pub at: Instant,
}

impl TriggerEvent {
    pub fn new(level: Level, at: Instant) -> Self {
        Self { level, at }
    }

    pub fn dark() -> Self {
        Self::new(Level::Dark, Instant::now())
    }

    pub fn light() -> Self {
        Self::new(Level::Light, Instant::now())
    }

    pub fn is_dark(&self) -> bool {
        self.level == Level::Dark
    }
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub dark_level: DarkLevel,
    pub debounce: Duration,
    pub poll_interval: Duration,
}

impl SensorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dark_level: config.dark_level,
            debounce: Duration::from_millis(config.debounce_millis),
            poll_interval: Duration::from_millis(config.sensor_poll_millis),
        }
    }
}

/// A subscribed sensor feeding debounced edges into a channel.
pub struct SensorPipeline {
    source: Box<dyn SensorSource>,
    task: JoinHandle<()>,
}

impl SensorPipeline {
    /// Subscribes to `source` and starts debouncing into `edges`.
    pub fn start(
        mut source: Box<dyn SensorSource>,
        config: &SensorConfig,
        edges: mpsc::Sender<TriggerEvent>,
    ) -> Result<Self, SensorError> {
        let initial = source.current_level()?;
        let raw_rx = source.subscribe()?;

        let initial_level = Level::from_raw(initial, config.dark_level);
        log::info!("Sensor subscribed, current level: {}", initial_level);

        let debouncer = EdgeDebouncer::new(config.debounce, initial_level);
        let task = tokio::spawn(debouncer.run(raw_rx, config.dark_level, edges));

        Ok(Self { source, task })
    }

    /// Stops debouncing and releases the sensor subscription.
    pub fn release(mut self) {
        self.task.abort();
        self.source.release();
        log::info!("Sensor subscription released");
    }
}

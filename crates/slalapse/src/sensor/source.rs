//! Raw sensor sources.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SensorError;

const RAW_CHANNEL_CAPACITY: usize = 64;

/// A binary level sensor. `true` means the pin reads high.
pub trait SensorSource: Send {
    /// Synchronously reads the current raw level.
    fn current_level(&self) -> Result<bool, SensorError>;

    /// Starts delivering raw level changes. May only be called once.
    fn subscribe(&mut self) -> Result<mpsc::Receiver<bool>, SensorError>;

    /// Stops delivering changes and frees the underlying resource.
    fn release(&mut self);
}

/// Polls a sysfs-style GPIO `value` file (`0` / `1`).
pub struct ValueFileSensor {
    path: PathBuf,
    poll_interval: Duration,
    poller: Option<JoinHandle<()>>,
}

impl ValueFileSensor {
    pub fn new<P: AsRef<Path>>(path: P, poll_interval: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            poll_interval,
            poller: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_value(path: &Path, content: &str) -> Result<bool, SensorError> {
    match content.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(SensorError::InvalidValue {
            path: path.to_path_buf(),
            value: other.to_string(),
        }),
    }
}

fn read_value(path: &Path) -> Result<bool, SensorError> {
    let content = std::fs::read_to_string(path).map_err(|e| SensorError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_value(path, &content)
}

impl SensorSource for ValueFileSensor {
    fn current_level(&self) -> Result<bool, SensorError> {
        read_value(&self.path)
    }

    fn subscribe(&mut self) -> Result<mpsc::Receiver<bool>, SensorError> {
        if self.poller.is_some() {
            return Err(SensorError::AlreadySubscribed);
        }

        let mut last = read_value(&self.path)?;
        let (tx, rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let path = self.path.clone();
        let poll_interval = self.poll_interval;

        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut read_failing = false;

            loop {
                ticker.tick().await;

                let level = match tokio::fs::read_to_string(&path).await {
                    Ok(content) => match parse_value(&path, &content) {
                        Ok(level) => level,
                        Err(e) => {
                            log::warn!("{}", e);
                            continue;
                        }
                    },
                    Err(e) => {
                        if !read_failing {
                            log::error!("Failed to read sensor '{}': {}", path.display(), e);
                            read_failing = true;
                        }
                        continue;
                    }
                };
                read_failing = false;

                if level != last {
                    last = level;
                    if tx.send(level).await.is_err() {
                        break;
                    }
                }
            }
        });

        self.poller = Some(poller);
        log::info!(
            "Polling sensor '{}' every {:?}",
            self.path.display(),
            self.poll_interval
        );
        Ok(rx)
    }

    fn release(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

impl Drop for ValueFileSensor {
    fn drop(&mut self) {
        self.release();
    }
}

/// A sensor driven programmatically through a [`RawLevelSender`]. Useful
/// for embedding behind another driver and for tests.
pub struct ChannelSensor {
    level: Arc<AtomicBool>,
    receiver: Option<mpsc::Receiver<bool>>,
    subscribed: bool,
}

/// Producer side of a [`ChannelSensor`].
#[derive(Clone)]
pub struct RawLevelSender {
    level: Arc<AtomicBool>,
    sender: mpsc::Sender<bool>,
}

impl ChannelSensor {
    pub fn new(initial: bool) -> (Self, RawLevelSender) {
        let level = Arc::new(AtomicBool::new(initial));
        let (sender, receiver) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let sensor = Self {
            level: Arc::clone(&level),
            receiver: Some(receiver),
            subscribed: false,
        };
        (sensor, RawLevelSender { level, sender })
    }
}

impl SensorSource for ChannelSensor {
    fn current_level(&self) -> Result<bool, SensorError> {
        Ok(self.level.load(Ordering::Acquire))
    }

    fn subscribe(&mut self) -> Result<mpsc::Receiver<bool>, SensorError> {
        if self.subscribed {
            return Err(SensorError::AlreadySubscribed);
        }
        let receiver = self.receiver.take().ok_or(SensorError::Disconnected)?;
        self.subscribed = true;
        Ok(receiver)
    }

    fn release(&mut self) {
        self.receiver = None;
    }
}

impl RawLevelSender {
    /// Records a new raw level and notifies the subscriber, if any.
    pub fn set(&self, high: bool) {
        self.level.store(high, Ordering::Release);
        if let Err(e) = self.sender.try_send(high) {
            log::warn!("Dropping raw sensor level: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_value() {
        let path = Path::new("value");
        assert!(parse_value(path, "1\n").unwrap());
        assert!(!parse_value(path, "0").unwrap());
        assert!(matches!(
            parse_value(path, "x"),
            Err(SensorError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_value_file_missing_is_setup_error() {
        let sensor = ValueFileSensor::new("/nonexistent/gpio21/value", Duration::from_millis(20));
        assert!(matches!(
            sensor.current_level(),
            Err(SensorError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn test_value_file_reports_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "0\n").unwrap();

        let mut sensor = ValueFileSensor::new(&path, Duration::from_millis(5));
        assert!(!sensor.current_level().unwrap());

        let mut rx = sensor.subscribe().unwrap();
        assert!(matches!(
            sensor.subscribe(),
            Err(SensorError::AlreadySubscribed)
        ));

        std::fs::write(&path, "1\n").unwrap();
        let level = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no level change observed");
        assert_eq!(level, Some(true));

        sensor.release();
    }

    #[test]
    fn test_channel_sensor_single_subscription() {
        let (mut sensor, sender) = ChannelSensor::new(true);
        assert!(sensor.current_level().unwrap());

        sender.set(false);
        assert!(!sensor.current_level().unwrap());

        let mut rx = sensor.subscribe().unwrap();
        assert!(!rx.try_recv().unwrap());
        assert!(matches!(
            sensor.subscribe(),
            Err(SensorError::AlreadySubscribed)
        ));
    }
}

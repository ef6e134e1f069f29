//! Digital trigger inputs

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::TriggerError;

/// Root of the sysfs GPIO interface
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// How long udev may take to expose a freshly exported pin
const EXPORT_SETTLE: Duration = Duration::from_millis(500);

/// Logic level of a discrete input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Source of the crash signal, sampled from the detector thread
pub trait TriggerInput: Send {
    fn read(&mut self) -> Result<Level, TriggerError>;

    /// Give the input back to the system
    fn release(&mut self) {}

    fn name(&self) -> String;
}

/// Input pin driven through the sysfs GPIO interface (BCM numbering)
///
/// Pull-down resistors cannot be configured through sysfs; the line must be
/// pulled down externally or in the device tree.
#[derive(Debug)]
pub struct SysfsGpio {
    pin: u32,
    root: PathBuf,
    value: PathBuf,
    exported: bool,
}

impl SysfsGpio {
    pub fn open(pin: u32) -> Result<Self, TriggerError> {
        Self::open_at(SYSFS_GPIO_ROOT, pin)
    }

    /// Open a pin under an alternative sysfs root
    pub fn open_at(root: impl AsRef<Path>, pin: u32) -> Result<Self, TriggerError> {
        let root = root.as_ref().to_path_buf();
        let unavailable = |reason: String| TriggerError::Unavailable { pin, reason };

        if !root.exists() {
            return Err(unavailable(format!("{} does not exist", root.display())));
        }

        let pin_dir = root.join(format!("gpio{}", pin));
        let mut exported = false;
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string())
                .map_err(|e| unavailable(format!("export failed: {}", e)))?;
            exported = true;

            let deadline = Instant::now() + EXPORT_SETTLE;
            while !pin_dir.join("direction").exists() {
                if Instant::now() >= deadline {
                    return Err(unavailable("pin did not appear after export".to_string()));
                }
                thread::sleep(Duration::from_millis(10));
            }
        }

        fs::write(pin_dir.join("direction"), "in")
            .map_err(|e| unavailable(format!("cannot set direction: {}", e)))?;

        info!(target: "crash_detector", "GPIO {} configured as input", pin);
        Ok(Self {
            pin,
            value: pin_dir.join("value"),
            root,
            exported,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl TriggerInput for SysfsGpio {
    fn read(&mut self) -> Result<Level, TriggerError> {
        let raw = fs::read_to_string(&self.value)?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(TriggerError::InvalidLevel(other.to_string())),
        }
    }

    fn release(&mut self) {
        if !self.exported {
            return;
        }
        if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
            warn!(target: "crash_detector", "Failed to unexport GPIO {}: {}", self.pin, e);
        } else {
            debug!(target: "crash_detector", "GPIO {} released", self.pin);
        }
        self.exported = false;
    }

    fn name(&self) -> String {
        format!("gpio{}", self.pin)
    }
}

/// Level shared with the caller; clones observe the same input
#[derive(Debug, Clone, Default)]
pub struct ManualTrigger {
    level: Arc<AtomicBool>,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: Level) {
        self.level.store(level.is_high(), Ordering::SeqCst);
    }

    pub fn level(&self) -> Level {
        Level::from(self.level.load(Ordering::SeqCst))
    }
}

impl TriggerInput for ManualTrigger {
    fn read(&mut self) -> Result<Level, TriggerError> {
        Ok(self.level())
    }

    fn name(&self) -> String {
        "manual".to_string()
    }
}

/// Replays a fixed sequence of samples, then holds the last one
#[derive(Debug, Clone)]
pub struct ScriptedTrigger {
    samples: VecDeque<Level>,
    last: Level,
}

impl ScriptedTrigger {
    pub fn new(samples: impl IntoIterator<Item = Level>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            last: Level::Low,
        }
    }

    /// Samples not yet read
    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl TriggerInput for ScriptedTrigger {
    fn read(&mut self) -> Result<Level, TriggerError> {
        if let Some(level) = self.samples.pop_front() {
            self.last = level;
        }
        Ok(self.last)
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

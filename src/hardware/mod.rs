pub mod actuator;
pub mod gpio;
pub mod registry;
pub mod sysfs;

pub use actuator::Actuator;
pub use gpio::{GpioBackend, SimulatedGpio};
pub use registry::HardwareChannelRegistry;
pub use sysfs::SysfsGpio;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Logical locker number as printed on the cabinet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockerId(pub u8);

impl LockerId {
    /// Parses the locker number the remote service hands back (`"3"`, `" 3 "`).
    pub fn parse(label: &str) -> Option<Self> {
        label.trim().parse::<u8>().ok().map(LockerId)
    }
}

impl fmt::Display for LockerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// BCM-numbered output line driving one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pin(pub u8);

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Which electrical level energizes a relay. Some board revisions are active-low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polarity {
    pub active: Level,
}

impl Polarity {
    pub fn new(active: Level) -> Self {
        Self { active }
    }

    pub fn idle(&self) -> Level {
        self.active.inverted()
    }
}

impl Default for Polarity {
    fn default() -> Self {
        Self::new(Level::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAssignment {
    pub locker_id: LockerId,
    pub lock_pin: Pin,
    pub uv_pin: Pin,
}

/// Request to hold `channel` at `active_level` for `duration`, then drive it back idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSpec {
    pub channel: Pin,
    pub active_level: Level,
    pub duration: Duration,
}

impl PulseSpec {
    pub fn new(channel: Pin, active_level: Level, duration: Duration) -> Self {
        Self {
            channel,
            active_level,
            duration,
        }
    }

    pub fn idle_level(&self) -> Level {
        self.active_level.inverted()
    }
}

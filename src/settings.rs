use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::hardware::{ChannelAssignment, Level, LockerId, Pin, Polarity};

pub const SETTINGS_PATH_ENV: &str = "KIOSK_SETTINGS";
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/locker-kiosk/settings.json";

// Highest global GPIO number the kernel hands out.
const MAX_SYSFS_LINE: u32 = 4095;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockerChannels {
    pub id: u8,
    pub lock_pin: u8,
    pub uv_pin: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KioskSettings {
    pub api_base_url: String,
    pub exit_code: String,
    pub active_level: Level,
    pub lockers: Vec<LockerChannels>,
    pub lock_hold_ms: u64,
    pub uv_duration_ms: u64,
    pub poll_interval_ms: u64,
    pub settle_ms: u64,
    pub request_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub reachability_url: String,
    pub wireless_interface: String,
    pub wpa_supplicant_path: PathBuf,
    pub gpio_sysfs_root: PathBuf,
    /// Global number of BCM line 0 under sysfs.
    pub gpio_chip_base: u32,
    pub status_clear_ms: u64,
    pub fatal_notice_ms: u64,
    /// The reference deployment talks to a backend behind a self-signed certificate.
    pub accept_invalid_certs: bool,
    pub simulate_hardware: bool,
}

impl Default for KioskSettings {
    fn default() -> Self {
        let lock_pins = [17, 27, 22, 23, 24, 25, 4];
        let uv_pins = [5, 6, 12, 13, 16, 19, 20];
        let lockers = lock_pins
            .iter()
            .zip(uv_pins.iter())
            .enumerate()
            .map(|(index, (&lock_pin, &uv_pin))| LockerChannels {
                id: index as u8 + 1,
                lock_pin,
                uv_pin,
            })
            .collect();

        Self {
            api_base_url: "https://smartpalms.vercel.app/api".into(),
            exit_code: "9999EXIT".into(),
            active_level: Level::High,
            lockers,
            lock_hold_ms: 10_000,
            uv_duration_ms: 30_000,
            poll_interval_ms: 30_000,
            settle_ms: 5_000,
            request_timeout_ms: 5_000,
            probe_timeout_ms: 3_000,
            reachability_url: "http://8.8.8.8".into(),
            wireless_interface: "wlan0".into(),
            wpa_supplicant_path: PathBuf::from("/etc/wpa_supplicant/wpa_supplicant.conf"),
            gpio_sysfs_root: PathBuf::from("/sys/class/gpio"),
            gpio_chip_base: 0,
            status_clear_ms: 2_000,
            fatal_notice_ms: 10_000,
            accept_invalid_certs: false,
            simulate_hardware: false,
        }
    }
}

impl KioskSettings {
    /// Reads settings from `path`; a missing file means defaults. Environment overrides are
    /// applied on top and the result is validated.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Malformed settings in {}", path.display()))?
        } else {
            log::info!("No settings at {}; using defaults", path.display());
            KioskSettings::default()
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from_env() -> Result<Self> {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_PATH));
        Self::load(&path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("KIOSK_API_BASE_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(value) = std::env::var("KIOSK_SIMULATE_HARDWARE") {
            self.simulate_hardware = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lockers.is_empty() {
            bail!("at least one locker must be configured");
        }
        if self.exit_code.trim().is_empty() {
            bail!("exitCode must not be empty");
        }

        let mut ids = HashSet::new();
        let mut pins = HashSet::new();
        for locker in &self.lockers {
            if !ids.insert(locker.id) {
                bail!("locker {} is configured twice", locker.id);
            }
            for pin in [locker.lock_pin, locker.uv_pin] {
                if !pins.insert(pin) {
                    bail!("GPIO{pin} is assigned to more than one channel");
                }
            }
        }

        let highest_pin = pins.iter().copied().max().unwrap_or(0);
        if self.gpio_chip_base.saturating_add(u32::from(highest_pin)) > MAX_SYSFS_LINE {
            bail!(
                "gpioChipBase {} puts GPIO{highest_pin} beyond line {MAX_SYSFS_LINE}",
                self.gpio_chip_base
            );
        }

        let durations = [
            ("lockHoldMs", self.lock_hold_ms),
            ("uvDurationMs", self.uv_duration_ms),
            ("pollIntervalMs", self.poll_interval_ms),
            ("settleMs", self.settle_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
            ("probeTimeoutMs", self.probe_timeout_ms),
            ("statusClearMs", self.status_clear_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }

        Ok(())
    }

    pub fn channel_assignments(&self) -> Vec<ChannelAssignment> {
        self.lockers
            .iter()
            .map(|locker| ChannelAssignment {
                locker_id: LockerId(locker.id),
                lock_pin: Pin(locker.lock_pin),
                uv_pin: Pin(locker.uv_pin),
            })
            .collect()
    }

    pub fn polarity(&self) -> Polarity {
        Polarity::new(self.active_level)
    }

    pub fn lock_hold(&self) -> Duration {
        Duration::from_millis(self.lock_hold_ms)
    }

    pub fn uv_duration(&self) -> Duration {
        Duration::from_millis(self.uv_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn status_clear(&self) -> Duration {
        Duration::from_millis(self.status_clear_ms)
    }

    pub fn fatal_notice(&self) -> Duration {
        Duration::from_millis(self.fatal_notice_ms)
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::HardwareError;

use super::gpio::GpioBackend;
use super::{Level, Pin};

// udev may take a moment to create and chmod the pin directory after export.
const EXPORT_POLL_ATTEMPTS: u32 = 20;
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Linux sysfs GPIO (`/sys/class/gpio`).
///
/// Pins are BCM offsets on one gpiochip; sysfs numbers lines globally, so every pin is shifted
/// by the chip's base (512 on Raspberry Pi kernels from 6.6).
pub struct SysfsGpio {
    root: PathBuf,
    chip_base: u32,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chip_base: 0,
        }
    }

    pub fn with_chip_base(mut self, chip_base: u32) -> Self {
        self.chip_base = chip_base;
        self
    }

    fn line_number(&self, pin: Pin) -> u32 {
        self.chip_base + u32::from(pin.0)
    }

    fn pin_dir(&self, pin: Pin) -> PathBuf {
        self.root.join(format!("gpio{}", self.line_number(pin)))
    }

    fn export(&self, pin: Pin) -> Result<(), HardwareError> {
        let dir = self.pin_dir(pin);
        if dir.exists() {
            return Ok(());
        }

        write_file(&self.root.join("export"), &self.line_number(pin).to_string())
            .map_err(|err| HardwareError::fault(pin, format!("export failed: {err}")))?;

        for _ in 0..EXPORT_POLL_ATTEMPTS {
            if dir.join("direction").exists() {
                return Ok(());
            }
            thread::sleep(EXPORT_POLL_INTERVAL);
        }

        Err(HardwareError::fault(
            pin,
            format!("{} did not appear after export", dir.display()),
        ))
    }
}

fn write_file(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents.as_bytes())
}

fn level_value(level: Level) -> &'static str {
    match level {
        Level::Low => "0",
        Level::High => "1",
    }
}

impl GpioBackend for SysfsGpio {
    fn configure_output(&self, pin: Pin, initial: Level) -> Result<(), HardwareError> {
        self.export(pin)?;

        // "low"/"high" sets output mode and the initial level in one step, so the line never
        // drives the opposite level in between.
        let direction = match initial {
            Level::Low => "low",
            Level::High => "high",
        };
        write_file(&self.pin_dir(pin).join("direction"), direction)
            .map_err(|err| HardwareError::fault(pin, format!("set direction failed: {err}")))?;

        debug!("{pin} configured as output, initial level {initial:?}");
        Ok(())
    }

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError> {
        write_file(&self.pin_dir(pin).join("value"), level_value(level))
            .map_err(|err| HardwareError::fault(pin, format!("write failed: {err}")))
    }

    fn read(&self, pin: Pin) -> Result<Level, HardwareError> {
        let raw = fs::read_to_string(self.pin_dir(pin).join("value"))
            .map_err(|err| HardwareError::fault(pin, format!("read failed: {err}")))?;

        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(HardwareError::fault(
                pin,
                format!("unexpected value {other:?}"),
            )),
        }
    }

    fn release(&self, pin: Pin) -> Result<(), HardwareError> {
        if !self.pin_dir(pin).exists() {
            return Ok(());
        }
        write_file(&self.root.join("unexport"), &self.line_number(pin).to_string())
            .map_err(|err| HardwareError::fault(pin, format!("unexport failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs_with_pin(pin: u32) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(format!("gpio{pin}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
        fs::write(dir.join("value"), "1").unwrap();
        root
    }

    #[test]
    fn configure_writes_initial_level_into_direction() {
        let root = fake_sysfs_with_pin(17);
        let gpio = SysfsGpio::new(root.path());

        gpio.configure_output(Pin(17), Level::Low).unwrap();

        let direction = fs::read_to_string(root.path().join("gpio17/direction")).unwrap();
        assert_eq!(direction, "low");
    }

    #[test]
    fn write_and_read_round_through_value_file() {
        let root = fake_sysfs_with_pin(22);
        let gpio = SysfsGpio::new(root.path());

        gpio.write(Pin(22), Level::Low).unwrap();
        assert_eq!(gpio.read(Pin(22)).unwrap(), Level::Low);
        gpio.write(Pin(22), Level::High).unwrap();
        assert_eq!(gpio.read(Pin(22)).unwrap(), Level::High);
    }

    #[test]
    fn garbage_value_is_a_fault() {
        let root = fake_sysfs_with_pin(5);
        fs::write(root.path().join("gpio5/value"), "x\n").unwrap();
        let gpio = SysfsGpio::new(root.path());

        assert!(matches!(
            gpio.read(Pin(5)),
            Err(HardwareError::Fault { pin: Pin(5), .. })
        ));
    }

    #[test]
    fn export_is_written_for_missing_pins() {
        let root = tempfile::tempdir().unwrap();
        let gpio = SysfsGpio::new(root.path());

        // Nothing creates the pin directory here, so the export times out.
        let result = gpio.configure_output(Pin(4), Level::Low);

        assert!(result.is_err());
        let exported = fs::read_to_string(root.path().join("export")).unwrap();
        assert_eq!(exported, "4");
    }

    #[test]
    fn chip_base_offsets_every_line() {
        let root = fake_sysfs_with_pin(529);
        let gpio = SysfsGpio::new(root.path()).with_chip_base(512);

        gpio.configure_output(Pin(17), Level::Low).unwrap();
        gpio.write(Pin(17), Level::High).unwrap();

        assert_eq!(
            fs::read_to_string(root.path().join("gpio529/direction")).unwrap(),
            "low"
        );
        assert_eq!(gpio.read(Pin(17)).unwrap(), Level::High);
        assert!(!root.path().join("gpio17").exists());

        gpio.release(Pin(17)).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("unexport")).unwrap(),
            "529"
        );
    }

    #[test]
    fn export_writes_offset_line_number() {
        let root = tempfile::tempdir().unwrap();
        let gpio = SysfsGpio::new(root.path()).with_chip_base(512);

        assert!(gpio.configure_output(Pin(4), Level::Low).is_err());
        assert_eq!(
            fs::read_to_string(root.path().join("export")).unwrap(),
            "516"
        );
    }

    #[test]
    fn release_unexports_present_pins() {
        let root = fake_sysfs_with_pin(27);
        let gpio = SysfsGpio::new(root.path());

        gpio.release(Pin(27)).unwrap();
        gpio.release(Pin(9)).unwrap();

        let unexported = fs::read_to_string(root.path().join("unexport")).unwrap();
        assert_eq!(unexported, "27");
    }
}

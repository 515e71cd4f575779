use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::HardwareError;

use super::gpio::GpioBackend;
use super::registry::HardwareChannelRegistry;
use super::{Level, Pin, PulseSpec};

/// Drives timed pulses. Pulses on the same channel queue behind each other; different
/// channels pulse concurrently.
pub struct Actuator {
    registry: Arc<HardwareChannelRegistry>,
    lanes: HashMap<Pin, Arc<Mutex<()>>>,
}

impl Actuator {
    pub fn new(registry: Arc<HardwareChannelRegistry>) -> Self {
        let lanes = registry
            .channels()
            .into_iter()
            .map(|pin| (pin, Arc::new(Mutex::new(()))))
            .collect();

        Self { registry, lanes }
    }

    pub fn registry(&self) -> &Arc<HardwareChannelRegistry> {
        &self.registry
    }

    /// Runs the full pulse. Not cancellable: a lock relay always completes its hold.
    pub async fn pulse(&self, spec: PulseSpec) -> Result<(), HardwareError> {
        self.run_pulse(spec, None).await
    }

    /// Like [`Actuator::pulse`], but the hold ends early (still returning idle) once `cancel` fires.
    pub async fn pulse_until(
        &self,
        spec: PulseSpec,
        cancel: &CancellationToken,
    ) -> Result<(), HardwareError> {
        self.run_pulse(spec, Some(cancel)).await
    }

    async fn run_pulse(
        &self,
        spec: PulseSpec,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), HardwareError> {
        let lane = self
            .lanes
            .get(&spec.channel)
            .ok_or(HardwareError::UnknownChannel(spec.channel))?;
        let _lane = lane.lock().await;

        let engaged = EngagedChannel::engage(self.registry.backend().as_ref(), spec)?;

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(spec.duration) => {}
                    _ = token.cancelled() => {
                        debug!("Pulse on {} cut short by cancellation", spec.channel);
                    }
                }
            }
            None => tokio::time::sleep(spec.duration).await,
        }

        // The relay must still be held when the hold ends; a failed or wrong read-back means
        // the line was disturbed during the wait.
        let held = engaged.read_back();
        let released = engaged.release();

        match (held, released) {
            (Ok(level), Ok(())) if level == spec.active_level => Ok(()),
            (Ok(level), Ok(())) => Err(HardwareError::fault(
                spec.channel,
                format!("dropped to {level:?} during hold"),
            )),
            (Err(err), _) | (Ok(_), Err(err)) => Err(err),
        }
    }
}

/// A channel held at its active level. Dropping it without `release` still drives it idle,
/// so cancellation and panics cannot leave a relay energized.
struct EngagedChannel<'a> {
    backend: &'a dyn GpioBackend,
    pin: Pin,
    idle: Level,
    released: bool,
}

impl<'a> EngagedChannel<'a> {
    fn engage(backend: &'a dyn GpioBackend, spec: PulseSpec) -> Result<Self, HardwareError> {
        let engaged = Self {
            backend,
            pin: spec.channel,
            idle: spec.idle_level(),
            released: false,
        };

        if let Err(err) = backend.write(spec.channel, spec.active_level) {
            // Dropping `engaged` drives the line idle.
            error!("Failed to energize {}: {err}", spec.channel);
            return Err(err);
        }

        debug!("{} energized for {:?}", spec.channel, spec.duration);
        Ok(engaged)
    }

    fn read_back(&self) -> Result<Level, HardwareError> {
        self.backend.read(self.pin)
    }

    fn release(mut self) -> Result<(), HardwareError> {
        self.released = true;
        self.drive_idle()
    }

    fn drive_idle(&self) -> Result<(), HardwareError> {
        self.backend.write(self.pin, self.idle).or_else(|first| {
            warn!("Idle write to {} failed ({first}), retrying", self.pin);
            self.backend.write(self.pin, self.idle)
        })
    }
}

impl Drop for EngagedChannel<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.drive_idle() {
            error!("Could not return {} to idle: {err}", self.pin);
        } else {
            debug!("{} returned to idle on early exit", self.pin);
        }
    }
}

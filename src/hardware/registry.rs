use std::collections::BTreeMap;
use std::sync::Arc;

use log::{error, info, warn};

use crate::error::HardwareError;

use super::gpio::GpioBackend;
use super::{ChannelAssignment, LockerId, Pin, Polarity};

/// Fixed locker → (lock relay, UV relay) table. Built once at boot; every channel is driven
/// idle before the registry is handed to anyone else.
pub struct HardwareChannelRegistry {
    assignments: BTreeMap<LockerId, ChannelAssignment>,
    polarity: Polarity,
    backend: Arc<dyn GpioBackend>,
}

impl std::fmt::Debug for HardwareChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareChannelRegistry")
            .field("assignments", &self.assignments)
            .field("polarity", &self.polarity)
            .finish_non_exhaustive()
    }
}

impl HardwareChannelRegistry {
    /// Claims every channel and drives it idle. Any failure is fatal: channels configured so
    /// far are released again and the error is returned.
    pub fn initialize(
        assignments: impl IntoIterator<Item = ChannelAssignment>,
        polarity: Polarity,
        backend: Arc<dyn GpioBackend>,
    ) -> Result<Self, HardwareError> {
        let assignments: BTreeMap<LockerId, ChannelAssignment> = assignments
            .into_iter()
            .map(|assignment| (assignment.locker_id, assignment))
            .collect();

        let mut configured: Vec<Pin> = Vec::new();
        for assignment in assignments.values() {
            for pin in [assignment.lock_pin, assignment.uv_pin] {
                if let Err(err) = backend.configure_output(pin, polarity.idle()) {
                    error!(
                        "Failed to configure {pin} for locker {}: {err}",
                        assignment.locker_id
                    );
                    for done in configured {
                        if let Err(release_err) = backend.release(done) {
                            warn!("Failed to release {done} after init failure: {release_err}");
                        }
                    }
                    return Err(err);
                }
                configured.push(pin);
            }
        }

        info!(
            "Hardware registry initialised: {} lockers, {} channels idle at {:?}",
            assignments.len(),
            configured.len(),
            polarity.idle()
        );

        Ok(Self {
            assignments,
            polarity,
            backend,
        })
    }

    pub fn resolve(&self, locker_id: LockerId) -> Result<ChannelAssignment, HardwareError> {
        self.assignments
            .get(&locker_id)
            .copied()
            .ok_or(HardwareError::NotFound(locker_id))
    }

    /// Resolves a locker number as received from the remote service.
    pub fn resolve_label(&self, label: &str) -> Option<ChannelAssignment> {
        LockerId::parse(label).and_then(|id| self.resolve(id).ok())
    }

    pub fn lockers(&self) -> impl Iterator<Item = &ChannelAssignment> {
        self.assignments.values()
    }

    pub fn channels(&self) -> Vec<Pin> {
        self.assignments
            .values()
            .flat_map(|a| [a.lock_pin, a.uv_pin])
            .collect()
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn backend(&self) -> &Arc<dyn GpioBackend> {
        &self.backend
    }

    /// Drives `pin` idle, retrying once.
    pub fn force_idle(&self, pin: Pin) -> Result<(), HardwareError> {
        let idle = self.polarity.idle();
        self.backend.write(pin, idle).or_else(|first| {
            warn!("Idle write to {pin} failed ({first}), retrying");
            self.backend.write(pin, idle)
        })
    }

    /// Forces every channel idle, confirms it by read-back, then releases it. Keeps going past
    /// failures so one bad line does not leave the others claimed; reports the first failure.
    pub fn release_all(&self) -> Result<(), HardwareError> {
        let idle = self.polarity.idle();
        let mut first_failure = None;

        for pin in self.channels() {
            let confirmed = self
                .force_idle(pin)
                .and_then(|_| self.backend.read(pin))
                .and_then(|level| {
                    if level == idle {
                        Ok(())
                    } else {
                        Err(HardwareError::fault(pin, format!("reads {level:?} after idle write")))
                    }
                });

            let outcome = confirmed.and_then(|_| self.backend.release(pin));
            if let Err(err) = outcome {
                error!("Release of {pin} failed: {err}");
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                info!("All channels confirmed idle and released");
                Ok(())
            }
        }
    }
}

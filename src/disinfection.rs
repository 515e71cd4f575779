use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::HardwareError;
use crate::hardware::{Actuator, LockerId, PulseSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UvSession {
    pub id: String,
    pub locker_id: LockerId,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub is_running: bool,
    #[serde(skip)]
    anchor: Instant,
}

impl UvSession {
    pub fn remaining(&self) -> Duration {
        if !self.is_running {
            return Duration::ZERO;
        }
        self.duration.saturating_sub(self.anchor.elapsed())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

struct SessionHandle {
    session: UvSession,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    actuator: Arc<Actuator>,
    duration: Duration,
    sessions: Mutex<HashMap<LockerId, SessionHandle>>,
}

impl SchedulerInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<LockerId, SessionHandle>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One UV cycle per locker, each on its own timeline. Re-triggering a running locker is a no-op.
#[derive(Clone)]
pub struct DisinfectionScheduler {
    inner: Arc<SchedulerInner>,
}

impl DisinfectionScheduler {
    pub fn new(actuator: Arc<Actuator>, duration: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                actuator,
                duration,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn trigger(&self, locker_id: LockerId) -> Result<TriggerOutcome, HardwareError> {
        let assignment = self.inner.actuator.registry().resolve(locker_id)?;
        let active = self.inner.actuator.registry().polarity().active;

        let mut sessions = self.inner.sessions();
        if let Some(existing) = sessions.get(&locker_id) {
            if existing.session.is_running {
                info!(
                    "UV session {} already running for locker {locker_id}; ignoring trigger",
                    existing.session.id
                );
                return Ok(TriggerOutcome::AlreadyRunning);
            }
        }

        let session = UvSession {
            id: Uuid::new_v4().to_string(),
            locker_id,
            started_at: Utc::now(),
            duration: self.inner.duration,
            is_running: true,
            anchor: Instant::now(),
        };
        let session_id = session.id.clone();
        let cancel_token = CancellationToken::new();
        let spec = PulseSpec::new(assignment.uv_pin, active, self.inner.duration);

        let inner = self.inner.clone();
        let token = cancel_token.clone();
        let task_session_id = session_id.clone();
        let handle = tokio::spawn(async move {
            match inner.actuator.pulse_until(spec, &token).await {
                Ok(()) => info!("UV session {task_session_id} for locker {locker_id} finished"),
                Err(err) => error!(
                    "UV session {task_session_id} for locker {locker_id} faulted: {err}"
                ),
            }

            let mut sessions = inner.sessions();
            if let Some(entry) = sessions.get_mut(&locker_id) {
                if entry.session.id == task_session_id {
                    entry.session.is_running = false;
                    entry.handle = None;
                }
            }
        });

        info!(
            "UV session {session_id} started for locker {locker_id} ({:?})",
            self.inner.duration
        );
        sessions.insert(
            locker_id,
            SessionHandle {
                session,
                cancel_token,
                handle: Some(handle),
            },
        );

        Ok(TriggerOutcome::Started)
    }

    pub fn session(&self, locker_id: LockerId) -> Option<UvSession> {
        self.inner
            .sessions()
            .get(&locker_id)
            .map(|entry| entry.session.clone())
    }

    pub fn is_running(&self, locker_id: LockerId) -> bool {
        self.session(locker_id)
            .map(|session| session.is_running)
            .unwrap_or(false)
    }

    pub fn remaining(&self, locker_id: LockerId) -> Option<Duration> {
        self.session(locker_id)
            .filter(|session| session.is_running)
            .map(|session| session.remaining())
    }

    /// Cuts every running cycle short and waits for each UV channel to be back at idle.
    pub async fn shutdown(&self) {
        let handles: Vec<(LockerId, JoinHandle<()>)> = {
            let mut sessions = self.inner.sessions();
            sessions
                .iter_mut()
                .filter_map(|(locker_id, entry)| {
                    entry.cancel_token.cancel();
                    entry.handle.take().map(|handle| (*locker_id, handle))
                })
                .collect()
        };

        for (locker_id, handle) in handles {
            if let Err(err) = handle.await {
                warn!("UV task for locker {locker_id} failed to join: {err}");
            }
        }

        let registry = self.inner.actuator.registry();
        for assignment in registry.lockers() {
            if let Err(err) = registry.force_idle(assignment.uv_pin) {
                error!(
                    "UV channel for locker {} not confirmed idle at shutdown: {err}",
                    assignment.locker_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{
        ChannelAssignment, HardwareChannelRegistry, Level, Pin, Polarity, SimulatedGpio,
    };

    const UV: Duration = Duration::from_secs(30);

    fn scheduler() -> (Arc<SimulatedGpio>, DisinfectionScheduler) {
        let gpio = Arc::new(SimulatedGpio::new());
        let registry = HardwareChannelRegistry::initialize(
            [
                ChannelAssignment {
                    locker_id: LockerId(1),
                    lock_pin: Pin(17),
                    uv_pin: Pin(5),
                },
                ChannelAssignment {
                    locker_id: LockerId(2),
                    lock_pin: Pin(27),
                    uv_pin: Pin(6),
                },
            ],
            Polarity::default(),
            gpio.clone(),
        )
        .unwrap();
        gpio.reset_history();
        let actuator = Arc::new(Actuator::new(Arc::new(registry)));
        (gpio, DisinfectionScheduler::new(actuator, UV))
    }

    #[tokio::test(start_paused = true)]
    async fn session_activates_then_deactivates_after_duration() {
        let (gpio, scheduler) = scheduler();

        assert_eq!(scheduler.trigger(LockerId(1)), Ok(TriggerOutcome::Started));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gpio.level(Pin(5)), Some(Level::High));
        assert!(scheduler.is_running(LockerId(1)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gpio.level(Pin(5)), Some(Level::Low));
        assert!(!scheduler.is_running(LockerId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn retrigger_while_running_is_a_no_op() {
        let (gpio, scheduler) = scheduler();

        scheduler.trigger(LockerId(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        let first_id = scheduler.session(LockerId(1)).unwrap().id;

        assert_eq!(
            scheduler.trigger(LockerId(1)),
            Ok(TriggerOutcome::AlreadyRunning)
        );
        assert_eq!(scheduler.session(LockerId(1)).unwrap().id, first_id);
        assert_eq!(scheduler.remaining(LockerId(1)), Some(Duration::from_secs(20)));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(gpio.levels_driven(Pin(5)), vec![Level::High, Level::Low]);
    }

    #[tokio::test(start_paused = true)]
    async fn lockers_run_on_independent_timelines() {
        let (gpio, scheduler) = scheduler();

        scheduler.trigger(LockerId(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        let before = scheduler.remaining(LockerId(1));
        scheduler.trigger(LockerId(2)).unwrap();
        assert_eq!(scheduler.remaining(LockerId(1)), before);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(gpio.level(Pin(5)), Some(Level::Low));
        assert_eq!(gpio.level(Pin(6)), Some(Level::High));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gpio.level(Pin(6)), Some(Level::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_session_can_be_started_again() {
        let (_gpio, scheduler) = scheduler();

        scheduler.trigger(LockerId(2)).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(scheduler.trigger(LockerId(2)), Ok(TriggerOutcome::Started));
    }

    #[tokio::test(start_paused = true)]
    async fn fault_is_logged_not_propagated() {
        let (gpio, scheduler) = scheduler();
        gpio.fail_writes(Pin(6), Level::High);

        assert_eq!(scheduler.trigger(LockerId(2)), Ok(TriggerOutcome::Started));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(gpio.level(Pin(6)), Some(Level::Low));
        assert!(!scheduler.is_running(LockerId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn faulted_deactivation_still_ends_idle() {
        let (gpio, scheduler) = scheduler();
        gpio.fail_next_write(Pin(5), Level::Low);

        assert_eq!(scheduler.trigger(LockerId(1)), Ok(TriggerOutcome::Started));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gpio.level(Pin(5)), Some(Level::High));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gpio.level(Pin(5)), Some(Level::Low));
        assert!(!scheduler.is_running(LockerId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_locker_is_rejected() {
        let (gpio, scheduler) = scheduler();

        assert_eq!(
            scheduler.trigger(LockerId(7)),
            Err(HardwareError::NotFound(LockerId(7)))
        );
        assert!(gpio.transitions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_forces_running_sessions_idle() {
        let (gpio, scheduler) = scheduler();
        scheduler.trigger(LockerId(1)).unwrap();
        scheduler.trigger(LockerId(2)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let started = Instant::now();
        scheduler.shutdown().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(gpio.level(Pin(5)), Some(Level::Low));
        assert_eq!(gpio.level(Pin(6)), Some(Level::Low));
        assert!(!scheduler.is_running(LockerId(1)));
    }
}

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;
use uuid::Uuid;

use crate::connectivity::ConnectivityState;
use crate::disinfection::{DisinfectionScheduler, TriggerOutcome};
use crate::error::{InputError, KioskError, INVALID_CODE_MESSAGE};
use crate::hardware::{Actuator, PulseSpec};
use crate::remote::{LockerService, Redemption};
use crate::utils::logging::mask_code;

use super::state::{RedemptionOutcome, RedemptionStatus};

/// Turns one submitted code into at most one locker opening.
pub struct RedemptionWorkflow {
    service: Arc<dyn LockerService>,
    actuator: Arc<Actuator>,
    disinfection: DisinfectionScheduler,
    connectivity: watch::Receiver<ConnectivityState>,
    exit_code: String,
    lock_hold: Duration,
    status_tx: watch::Sender<RedemptionStatus>,
}

impl RedemptionWorkflow {
    pub fn new(
        service: Arc<dyn LockerService>,
        actuator: Arc<Actuator>,
        disinfection: DisinfectionScheduler,
        connectivity: watch::Receiver<ConnectivityState>,
        exit_code: impl Into<String>,
        lock_hold: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(RedemptionStatus::Idle);
        Self {
            service,
            actuator,
            disinfection,
            connectivity,
            exit_code: exit_code.into(),
            lock_hold,
            status_tx,
        }
    }

    pub fn status(&self) -> RedemptionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RedemptionStatus> {
        self.status_tx.subscribe()
    }

    pub async fn submit(&self, input: &str) -> RedemptionOutcome {
        let code = input.trim();

        // The exit code bypasses everything, including an in-flight redemption.
        if code == self.exit_code {
            info!("Exit code entered; requesting shutdown");
            return RedemptionOutcome::ShutdownRequested;
        }

        let Some(flight) = InFlight::begin(&self.status_tx) else {
            warn!("Submission rejected: a redemption is already in flight");
            return RedemptionOutcome::Busy;
        };

        if code.is_empty() {
            return RedemptionOutcome::Failed(KioskError::Input(InputError::EmptyCode));
        }

        let redemption_id = Uuid::new_v4();
        let masked = mask_code(code);

        let connectivity = *self.connectivity.borrow();
        if let Some(blocked) = connectivity.blocking_error() {
            warn!("[{redemption_id}] code {masked} not sent: kiosk is {connectivity:?}");
            return RedemptionOutcome::Failed(KioskError::Connectivity(blocked));
        }

        flight.advance(RedemptionStatus::Validating);
        info!("[{redemption_id}] validating code {masked}");

        let locker_number = match self.service.redeem(code).await {
            Ok(Redemption::Accepted { locker_number }) => locker_number,
            Ok(Redemption::Rejected { message }) => {
                info!("[{redemption_id}] code {masked} rejected: {message:?}");
                return RedemptionOutcome::Failed(KioskError::RemoteRejection(
                    message.unwrap_or_else(|| INVALID_CODE_MESSAGE.to_string()),
                ));
            }
            Err(err) => {
                warn!("[{redemption_id}] redeem call for {masked} failed: {err}");
                return RedemptionOutcome::Failed(err.into());
            }
        };

        let Some(assignment) = self.actuator.registry().resolve_label(&locker_number) else {
            error!("[{redemption_id}] service returned unknown locker {locker_number:?}");
            return RedemptionOutcome::Failed(KioskError::InvalidLocker(locker_number));
        };
        let locker_id = assignment.locker_id;

        flight.advance(RedemptionStatus::Actuating { locker_id });
        info!("[{redemption_id}] opening locker {locker_id}");

        let active = self.actuator.registry().polarity().active;
        let pulse = self
            .actuator
            .pulse(PulseSpec::new(assignment.lock_pin, active, self.lock_hold))
            .await;

        // Disinfection follows every opening attempt, whatever the lock pulse reported.
        match self.disinfection.trigger(locker_id) {
            Ok(TriggerOutcome::Started) => {}
            Ok(TriggerOutcome::AlreadyRunning) => {
                info!("[{redemption_id}] locker {locker_id} already disinfecting")
            }
            Err(err) => error!("[{redemption_id}] could not start UV for locker {locker_id}: {err}"),
        }

        match pulse {
            Ok(()) => {
                self.spawn_invalidate(redemption_id, code.to_string());
                RedemptionOutcome::Opened { locker_id }
            }
            Err(err) => {
                error!("[{redemption_id}] lock pulse for locker {locker_id} failed: {err}");
                RedemptionOutcome::Failed(err.into())
            }
        }
    }

    fn spawn_invalidate(&self, redemption_id: Uuid, code: String) {
        let service = self.service.clone();
        tokio::spawn(async move {
            let masked = mask_code(&code);
            match service.invalidate(&code).await {
                Ok(()) => info!("[{redemption_id}] code {masked} invalidated"),
                Err(err) => warn!("[{redemption_id}] invalidating code {masked} failed: {err}"),
            }
        });
    }
}

/// Holds the single-flight slot. Every exit path, early returns included, settles the status
/// back to `Idle`.
struct InFlight<'a> {
    status_tx: &'a watch::Sender<RedemptionStatus>,
}

impl<'a> InFlight<'a> {
    fn begin(status_tx: &'a watch::Sender<RedemptionStatus>) -> Option<Self> {
        let claimed = status_tx.send_if_modified(|status| {
            if status.is_idle() {
                *status = RedemptionStatus::Submitted;
                true
            } else {
                false
            }
        });
        claimed.then_some(Self { status_tx })
    }

    fn advance(&self, status: RedemptionStatus) {
        self.status_tx.send_replace(status);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.status_tx.send_replace(RedemptionStatus::Idle);
    }
}

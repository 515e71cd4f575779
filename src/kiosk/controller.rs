use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::disinfection::DisinfectionScheduler;
use crate::error::KioskError;
use crate::hardware::{HardwareChannelRegistry, LockerId};
use crate::provisioning::{ProvisioningFlow, ProvisioningOutcome};
use crate::redemption::state::opening_message;
use crate::redemption::{RedemptionOutcome, RedemptionStatus, RedemptionWorkflow, StatusTone};

use super::screen::{KioskCommand, KioskEvent, Screen, StatusLine};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

pub const CONNECTED_MESSAGE: &str = "WiFi connected.";

/// Everything the controller drives. Built at boot, after the registry has claimed the hardware.
pub struct KioskParts {
    pub workflow: Arc<RedemptionWorkflow>,
    pub provisioning: Arc<ProvisioningFlow>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub disinfection: DisinfectionScheduler,
    pub registry: Arc<HardwareChannelRegistry>,
    pub status_clear: Duration,
}

/// Front-end side of the controller: commands in, events out.
#[derive(Clone)]
pub struct KioskHandle {
    commands: mpsc::Sender<KioskCommand>,
    events: broadcast::Sender<KioskEvent>,
}

impl KioskHandle {
    pub async fn send(&self, command: KioskCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("kiosk controller has stopped"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KioskEvent> {
        self.events.subscribe()
    }
}

/// Results of background work, delivered back onto the interaction loop.
enum Internal {
    StatusExpired(u64),
    Scanned(Vec<String>),
    Provisioned(ProvisioningOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The interaction loop. Sole owner of the screen and status line; workers report back through
/// channels and never touch either directly.
pub struct KioskController {
    workflow: Arc<RedemptionWorkflow>,
    provisioning: Arc<ProvisioningFlow>,
    monitor: Arc<ConnectivityMonitor>,
    disinfection: DisinfectionScheduler,
    registry: Arc<HardwareChannelRegistry>,
    status_clear: Duration,
    commands: mpsc::Receiver<KioskCommand>,
    events: broadcast::Sender<KioskEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    redemptions: JoinSet<RedemptionOutcome>,
    screen: Screen,
    status: Option<StatusLine>,
    generation: u64,
    connectivity: Option<ConnectivityState>,
    announced: Option<LockerId>,
}

impl KioskController {
    pub fn new(parts: KioskParts) -> (Self, KioskHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let handle = KioskHandle {
            commands: commands_tx,
            events: events.clone(),
        };

        let controller = Self {
            workflow: parts.workflow,
            provisioning: parts.provisioning,
            monitor: parts.monitor,
            disinfection: parts.disinfection,
            registry: parts.registry,
            status_clear: parts.status_clear,
            commands,
            events,
            internal_tx,
            internal_rx,
            redemptions: JoinSet::new(),
            screen: Screen::Main,
            status: None,
            generation: 0,
            connectivity: None,
            announced: None,
        };

        (controller, handle)
    }

    /// Runs until the exit code, a `Shutdown` command, `shutdown` firing or every handle being
    /// dropped; then releases the hardware.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let monitor_token = CancellationToken::new();
        let monitor_task = tokio::spawn(self.monitor.clone().run(monitor_token.clone()));
        let mut connectivity = self.monitor.subscribe();
        let mut redemption_status = self.workflow.subscribe();

        self.emit(KioskEvent::ScreenChanged {
            screen: self.screen,
        });
        info!("Kiosk ready");

        loop {
            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All kiosk handles dropped");
                        Flow::Stop
                    }
                },
                Some(message) = self.internal_rx.recv() => {
                    self.handle_internal(message);
                    Flow::Continue
                }
                Some(joined) = self.redemptions.join_next() => match joined {
                    Ok(outcome) => self.finish_redemption(outcome),
                    Err(err) => {
                        error!("Redemption task failed: {err}");
                        self.emit(KioskEvent::InputReset);
                        Flow::Continue
                    }
                },
                Ok(()) = connectivity.changed() => {
                    let state = *connectivity.borrow_and_update();
                    self.on_connectivity(state);
                    Flow::Continue
                }
                Ok(()) = redemption_status.changed() => {
                    let status = *redemption_status.borrow_and_update();
                    if let RedemptionStatus::Actuating { locker_id } = status {
                        self.announce_opening(locker_id);
                    }
                    Flow::Continue
                }
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    Flow::Stop
                }
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.shut_down(monitor_token, monitor_task).await
    }

    fn handle_command(&mut self, command: KioskCommand) -> Flow {
        debug!("Command: {command:?}");
        match command {
            KioskCommand::Submit(code) => {
                if self.screen != Screen::Main {
                    warn!("Ignoring code submitted on the {:?} screen", self.screen);
                    return Flow::Continue;
                }
                // A new submission clears whatever the previous one left behind.
                self.clear_status();
                let workflow = self.workflow.clone();
                self.redemptions
                    .spawn(async move { workflow.submit(&code).await });
            }
            KioskCommand::ScanNetworks => {
                if self.screen == Screen::Provisioning {
                    self.spawn_scan();
                }
            }
            KioskCommand::Connect(credential) => {
                if self.screen != Screen::Provisioning {
                    warn!("Ignoring network credentials outside provisioning");
                    return Flow::Continue;
                }
                self.show_status(
                    format!("Connecting to {}...", credential.ssid),
                    StatusTone::Info,
                    false,
                );
                let provisioning = self.provisioning.clone();
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let outcome = provisioning.connect(credential).await;
                    let _ = internal_tx.send(Internal::Provisioned(outcome));
                });
            }
            KioskCommand::DismissProvisioning => {
                if self.screen == Screen::Provisioning {
                    self.set_screen(Screen::Main);
                }
            }
            KioskCommand::Shutdown => {
                info!("Shutdown requested");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::StatusExpired(generation) => {
                if self.status.as_ref().map(|line| line.generation) == Some(generation) {
                    self.clear_status();
                }
            }
            Internal::Scanned(networks) => {
                if self.screen == Screen::Provisioning {
                    self.emit(KioskEvent::NetworksFound { networks });
                }
            }
            Internal::Provisioned(outcome) => {
                self.emit(KioskEvent::ProvisioningResult {
                    outcome: outcome.clone(),
                });
                match outcome {
                    ProvisioningOutcome::Connected => {
                        self.set_screen(Screen::Main);
                        self.show_status(CONNECTED_MESSAGE.to_string(), StatusTone::Success, false);
                    }
                    ProvisioningOutcome::Failed(reason) => {
                        self.show_status(
                            format!("Could not connect: {reason}"),
                            StatusTone::Error,
                            false,
                        );
                    }
                }
            }
        }
    }

    fn finish_redemption(&mut self, outcome: RedemptionOutcome) -> Flow {
        debug!("Redemption finished: {outcome:?}");
        if outcome == RedemptionOutcome::ShutdownRequested {
            return Flow::Stop;
        }

        // Busy never held the slot, so the announcement still belongs to the running redemption.
        let announced = if outcome.resets_input() {
            self.announced.take()
        } else {
            None
        };
        let already_shown = matches!(
            outcome,
            RedemptionOutcome::Opened { locker_id } if announced == Some(locker_id)
        );
        if !already_shown {
            if let Some((text, tone)) = outcome.status_line() {
                self.show_status(text, tone, false);
            }
        }

        if outcome.resets_input() {
            self.emit(KioskEvent::InputReset);
        }
        Flow::Continue
    }

    fn announce_opening(&mut self, locker_id: LockerId) {
        self.announced = Some(locker_id);
        self.show_status(opening_message(locker_id), StatusTone::Success, false);
    }

    fn on_connectivity(&mut self, state: ConnectivityState) {
        if self.connectivity.replace(state) != Some(state) {
            self.emit(KioskEvent::Connectivity { state });
        }

        match state.blocking_error() {
            Some(blocked) => {
                let advisory = KioskError::Connectivity(blocked).to_string();
                let showing = self
                    .status
                    .as_ref()
                    .is_some_and(|line| line.advisory && line.text == advisory);
                if !showing {
                    self.show_status(advisory, StatusTone::Error, true);
                }
            }
            None => {
                if self.status.as_ref().is_some_and(|line| line.advisory) {
                    self.clear_status();
                }
            }
        }

        if state == ConnectivityState::OfflineLink {
            self.present_provisioning();
        } else if self.screen == Screen::Provisioning && !self.provisioning.is_in_flight() {
            self.set_screen(Screen::Main);
        }
    }

    fn present_provisioning(&mut self) {
        if self.screen != Screen::Main {
            return;
        }
        info!("Link is down; presenting network setup");
        self.set_screen(Screen::Provisioning);
        self.spawn_scan();
    }

    fn spawn_scan(&self) {
        let provisioning = self.provisioning.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let networks = provisioning.scan().await;
            let _ = internal_tx.send(Internal::Scanned(networks));
        });
    }

    fn set_screen(&mut self, screen: Screen) {
        if self.screen == screen {
            return;
        }
        self.screen = screen;
        self.emit(KioskEvent::ScreenChanged { screen });
    }

    fn show_status(&mut self, text: String, tone: StatusTone, advisory: bool) {
        self.generation += 1;
        let line = StatusLine {
            text,
            tone,
            generation: self.generation,
            advisory,
        };
        self.emit((&line).into());

        if tone == StatusTone::Success {
            let generation = line.generation;
            let delay = self.status_clear;
            let internal_tx = self.internal_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = internal_tx.send(Internal::StatusExpired(generation));
            });
        }
        self.status = Some(line);
    }

    fn clear_status(&mut self) {
        if let Some(line) = self.status.take() {
            self.emit(KioskEvent::StatusCleared {
                generation: line.generation,
            });
        }
    }

    fn emit(&self, event: KioskEvent) {
        // No subscribers is fine; the loop never waits on the display.
        let _ = self.events.send(event);
    }

    async fn shut_down(
        &mut self,
        monitor_token: CancellationToken,
        monitor_task: JoinHandle<()>,
    ) -> Result<()> {
        self.set_screen(Screen::ShuttingDown);

        monitor_token.cancel();
        if let Err(err) = monitor_task.await {
            warn!("Connectivity monitor failed to join: {err}");
        }

        // Lock pulses are never cut short; let any in-flight opening finish first.
        while let Some(joined) = self.redemptions.join_next().await {
            match joined {
                Ok(outcome) => debug!("Redemption drained at shutdown: {outcome:?}"),
                Err(err) => warn!("Redemption task failed during shutdown: {err}"),
            }
        }

        self.disinfection.shutdown().await;
        self.registry
            .release_all()
            .context("hardware was not fully released at shutdown")?;

        info!("Kiosk stopped");
        Ok(())
    }
}

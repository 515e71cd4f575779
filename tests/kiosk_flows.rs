//! End-to-end kiosk flows: commands in, events and relay levels out, on simulated hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use locker_kiosk_lib::connectivity::{
    ConnectivityMonitor, ConnectivityState, LinkLayer, NetworkCredential, UpstreamProbe,
};
use locker_kiosk_lib::disinfection::DisinfectionScheduler;
use locker_kiosk_lib::error::{ProvisioningError, RemoteError};
use locker_kiosk_lib::hardware::{
    Actuator, GpioBackend, HardwareChannelRegistry, Level, Pin, SimulatedGpio,
};
use locker_kiosk_lib::kiosk::{KioskCommand, KioskController, KioskEvent, KioskHandle, KioskParts, Screen};
use locker_kiosk_lib::provisioning::{ProvisioningFlow, ProvisioningOutcome};
use locker_kiosk_lib::redemption::{RedemptionWorkflow, StatusTone};
use locker_kiosk_lib::remote::{LockerService, Redemption};
use locker_kiosk_lib::settings::KioskSettings;

const LOCK_3: Pin = Pin(22);
const UV_3: Pin = Pin(12);

#[derive(Default)]
struct FakeService {
    answers: Mutex<HashMap<String, Result<Redemption, RemoteError>>>,
    redeemed: Mutex<Vec<String>>,
    invalidated: Mutex<Vec<String>>,
}

impl FakeService {
    fn answer(&self, code: &str, answer: Result<Redemption, RemoteError>) {
        self.answers.lock().unwrap().insert(code.to_string(), answer);
    }

    fn redeemed(&self) -> Vec<String> {
        self.redeemed.lock().unwrap().clone()
    }

    fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl LockerService for FakeService {
    async fn redeem(&self, code: &str) -> Result<Redemption, RemoteError> {
        self.redeemed.lock().unwrap().push(code.to_string());
        self.answers
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .unwrap_or(Err(RemoteError::NotFound))
    }

    async fn invalidate(&self, code: &str) -> Result<(), RemoteError> {
        self.invalidated.lock().unwrap().push(code.to_string());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct FakeLink {
    associated: AtomicBool,
}

#[async_trait]
impl LinkLayer for FakeLink {
    async fn is_associated(&self) -> bool {
        self.associated.load(Ordering::SeqCst)
    }

    async fn scan_networks(&self) -> Result<Vec<String>> {
        Ok(vec!["Palms".to_string()])
    }

    async fn apply_credential(&self, credential: NetworkCredential) -> Result<(), ProvisioningError> {
        credential.validate()?;
        self.associated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct AlwaysReachable;

#[async_trait]
impl UpstreamProbe for AlwaysReachable {
    async fn reachable(&self) -> bool {
        true
    }
}

struct Kiosk {
    handle: KioskHandle,
    events: broadcast::Receiver<KioskEvent>,
    gpio: Arc<SimulatedGpio>,
    service: Arc<FakeService>,
    task: JoinHandle<Result<()>>,
}

impl Kiosk {
    fn start(associated: bool) -> Self {
        let settings = KioskSettings::default();
        let gpio = Arc::new(SimulatedGpio::new());
        let backend: Arc<dyn GpioBackend> = gpio.clone();
        let registry = Arc::new(
            HardwareChannelRegistry::initialize(
                settings.channel_assignments(),
                settings.polarity(),
                backend,
            )
            .unwrap(),
        );
        gpio.reset_history();

        let service = Arc::new(FakeService::default());
        let link: Arc<dyn LinkLayer> = Arc::new(FakeLink {
            associated: AtomicBool::new(associated),
        });
        let actuator = Arc::new(Actuator::new(registry.clone()));
        let disinfection = DisinfectionScheduler::new(actuator.clone(), settings.uv_duration());
        let monitor = Arc::new(ConnectivityMonitor::new(
            link.clone(),
            Arc::new(AlwaysReachable),
            service.clone(),
            settings.poll_interval(),
        ));
        let workflow = Arc::new(RedemptionWorkflow::new(
            service.clone(),
            actuator,
            disinfection.clone(),
            monitor.subscribe(),
            settings.exit_code.clone(),
            settings.lock_hold(),
        ));
        let provisioning = Arc::new(ProvisioningFlow::new(link, monitor.clone(), settings.settle()));

        let (controller, handle) = KioskController::new(KioskParts {
            workflow,
            provisioning,
            monitor,
            disinfection,
            registry,
            status_clear: settings.status_clear(),
        });
        let events = handle.subscribe();
        let task = tokio::spawn(controller.run(CancellationToken::new()));

        Self {
            handle,
            events,
            gpio,
            service,
            task,
        }
    }

    async fn send(&self, command: KioskCommand) {
        self.handle.send(command).await.unwrap();
    }

    async fn wait_for(&mut self, wanted: impl Fn(&KioskEvent) -> bool) -> KioskEvent {
        timeout(Duration::from_secs(120), async {
            loop {
                let event = self.events.recv().await.unwrap();
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not observed")
    }

    async fn wait_online(&mut self) {
        self.wait_for(|e| {
            *e == KioskEvent::Connectivity {
                state: ConnectivityState::Online,
            }
        })
        .await;
    }

    async fn status(&mut self) -> (String, StatusTone) {
        match self.wait_for(|e| matches!(e, KioskEvent::Status { .. })).await {
            KioskEvent::Status { text, tone, .. } => (text, tone),
            _ => unreachable!(),
        }
    }

    async fn stop(self) {
        self.handle.send(KioskCommand::Shutdown).await.unwrap();
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn valid_code_opens_locker_and_disinfects() {
    let mut kiosk = Kiosk::start(true);
    kiosk.service.answer(
        "1234",
        Ok(Redemption::Accepted {
            locker_number: "3".into(),
        }),
    );
    kiosk.wait_online().await;

    kiosk.send(KioskCommand::Submit("1234".into())).await;
    let started = Instant::now();
    assert_eq!(
        kiosk.status().await,
        ("Opening locker 3!".to_string(), StatusTone::Success)
    );
    kiosk
        .wait_for(|e| matches!(e, KioskEvent::StatusCleared { .. }))
        .await;
    kiosk.wait_for(|e| *e == KioskEvent::InputReset).await;

    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(kiosk.gpio.levels_driven(LOCK_3), vec![Level::High, Level::Low]);
    assert_eq!(kiosk.gpio.level(UV_3), Some(Level::High));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(kiosk.gpio.level(UV_3), Some(Level::Low));
    assert_eq!(kiosk.service.invalidated(), vec!["1234".to_string()]);

    kiosk.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_code_reports_invalid_and_touches_nothing() {
    let mut kiosk = Kiosk::start(true);
    kiosk.wait_online().await;

    kiosk.send(KioskCommand::Submit("0000".into())).await;

    assert_eq!(
        kiosk.status().await,
        ("Invalid OTP code".to_string(), StatusTone::Error)
    );
    kiosk.wait_for(|e| *e == KioskEvent::InputReset).await;
    assert!(kiosk.gpio.transitions().is_empty());
    assert!(kiosk.service.invalidated().is_empty());

    kiosk.stop().await;
}

#[tokio::test(start_paused = true)]
async fn exit_code_idles_and_releases_everything() {
    let mut kiosk = Kiosk::start(true);
    kiosk.wait_online().await;

    kiosk.send(KioskCommand::Submit("9999EXIT".into())).await;
    kiosk
        .wait_for(|e| {
            *e == KioskEvent::ScreenChanged {
                screen: Screen::ShuttingDown,
            }
        })
        .await;
    kiosk.task.await.unwrap().unwrap();

    for assignment in KioskSettings::default().channel_assignments() {
        for pin in [assignment.lock_pin, assignment.uv_pin] {
            assert_eq!(kiosk.gpio.level(pin), Some(Level::Low), "{pin} not idle");
            assert!(kiosk.gpio.is_released(pin), "{pin} still claimed");
        }
    }
    assert!(kiosk.service.redeemed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exit_code_cuts_disinfection_short() {
    let mut kiosk = Kiosk::start(true);
    kiosk.service.answer(
        "1234",
        Ok(Redemption::Accepted {
            locker_number: "3".into(),
        }),
    );
    kiosk.wait_online().await;
    kiosk.send(KioskCommand::Submit("1234".into())).await;
    kiosk.wait_for(|e| *e == KioskEvent::InputReset).await;
    assert_eq!(kiosk.gpio.level(UV_3), Some(Level::High));

    kiosk.send(KioskCommand::Submit("9999EXIT".into())).await;
    kiosk.task.await.unwrap().unwrap();

    assert_eq!(kiosk.gpio.level(UV_3), Some(Level::Low));
    assert!(kiosk.gpio.is_released(UV_3));
}

#[tokio::test(start_paused = true)]
async fn no_network_blocks_redemption_without_server_call() {
    let mut kiosk = Kiosk::start(false);
    kiosk
        .wait_for(|e| {
            *e == KioskEvent::ScreenChanged {
                screen: Screen::Provisioning,
            }
        })
        .await;

    kiosk.send(KioskCommand::DismissProvisioning).await;
    kiosk.send(KioskCommand::Submit("1234".into())).await;

    let (text, tone) = kiosk.status().await;
    assert_eq!(text, "No internet connection. Please check your WiFi settings.");
    assert_eq!(tone, StatusTone::Error);
    kiosk.wait_for(|e| *e == KioskEvent::InputReset).await;
    assert!(kiosk.service.redeemed().is_empty());

    kiosk.stop().await;
}

#[tokio::test(start_paused = true)]
async fn provisioning_restores_service() {
    let mut kiosk = Kiosk::start(false);
    let found = kiosk
        .wait_for(|e| matches!(e, KioskEvent::NetworksFound { .. }))
        .await;
    assert_eq!(
        found,
        KioskEvent::NetworksFound {
            networks: vec!["Palms".to_string()]
        }
    );

    kiosk
        .send(KioskCommand::Connect(NetworkCredential::new("Palms", "short")))
        .await;
    let failed = kiosk
        .wait_for(|e| matches!(e, KioskEvent::ProvisioningResult { .. }))
        .await;
    assert!(matches!(
        failed,
        KioskEvent::ProvisioningResult {
            outcome: ProvisioningOutcome::Failed(_)
        }
    ));

    kiosk
        .send(KioskCommand::Connect(NetworkCredential::new("Palms", "longenough")))
        .await;
    // The flow's result and the monitor's re-check reach the loop in either order.
    let (mut back_on_main, mut back_online) = (false, false);
    while !(back_on_main && back_online) {
        match kiosk.wait_for(|_| true).await {
            KioskEvent::ScreenChanged { screen } => back_on_main = screen == Screen::Main,
            KioskEvent::Connectivity { state } => back_online = state == ConnectivityState::Online,
            _ => {}
        }
    }

    kiosk.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fault_during_lock_hold_is_surfaced_and_line_ends_idle() {
    let mut kiosk = Kiosk::start(true);
    kiosk.service.answer(
        "1234",
        Ok(Redemption::Accepted {
            locker_number: "3".into(),
        }),
    );
    kiosk.gpio.fail_reads(LOCK_3);
    kiosk.wait_online().await;

    kiosk.send(KioskCommand::Submit("1234".into())).await;

    let failure = kiosk
        .wait_for(|e| {
            matches!(
                e,
                KioskEvent::Status {
                    tone: StatusTone::Error,
                    ..
                }
            )
        })
        .await;
    let KioskEvent::Status { text, .. } = failure else {
        unreachable!()
    };
    assert_eq!(text, "Failed to operate locker. Please try again.");
    assert_eq!(kiosk.gpio.level(LOCK_3), Some(Level::Low));
    assert!(kiosk.service.invalidated().is_empty());

    kiosk.gpio.clear_faults();
    kiosk.stop().await;
}

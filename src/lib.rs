pub mod connectivity;
pub mod console;
pub mod disinfection;
pub mod error;
pub mod hardware;
pub mod kiosk;
pub mod provisioning;
pub mod redemption;
pub mod remote;
pub mod settings;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use connectivity::{ConnectivityMonitor, HttpUpstreamProbe, LinkLayer, WpaSupplicantLink};
use disinfection::DisinfectionScheduler;
use hardware::{Actuator, GpioBackend, HardwareChannelRegistry, SimulatedGpio, SysfsGpio};
use kiosk::{KioskController, KioskHandle, KioskParts};
use provisioning::ProvisioningFlow;
use redemption::RedemptionWorkflow;
use remote::{HttpLockerService, LockerService};
use settings::KioskSettings;

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

pub fn run() {
    utils::logging::init();
    info!("Locker kiosk starting up...");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(boot());
    // A console still blocked on stdin must not hold the process open.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    if let Err(err) = result {
        error!("Locker kiosk exiting: {err:#}");
        std::process::exit(1);
    }
    info!("Locker kiosk exited cleanly");
}

async fn boot() -> Result<()> {
    let settings = KioskSettings::load_from_env().context("failed to load settings")?;

    let backend: Arc<dyn GpioBackend> = if settings.simulate_hardware {
        warn!("Hardware simulation enabled; no relay will move");
        Arc::new(SimulatedGpio::new())
    } else {
        Arc::new(
            SysfsGpio::new(settings.gpio_sysfs_root.clone())
                .with_chip_base(settings.gpio_chip_base),
        )
    };

    let registry = match initialize_registry(&settings, backend).await {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!("Hardware initialisation failed: {err:#}");
            console::show_fatal(&format!(
                "Hardware initialization failed ({err}). The kiosk will now exit."
            ));
            tokio::time::sleep(settings.fatal_notice()).await;
            return Err(err.context("hardware initialisation failed"));
        }
    };

    let (controller, handle) = match assemble(&settings, registry.clone()) {
        Ok(wired) => wired,
        Err(err) => {
            if let Err(release_err) = registry.release_all() {
                error!("Release after failed start-up incomplete: {release_err}");
            }
            return Err(err);
        }
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                signal_token.cancel();
            }
            Err(err) => warn!("Could not listen for interrupts: {err}"),
        }
    });

    let console_token = CancellationToken::new();
    let console_task = tokio::spawn(console::run(handle.clone(), console_token.clone()));

    let result = controller.run(shutdown).await;

    console_token.cancel();
    match console_task.await {
        Ok(Err(err)) => warn!("Console stopped with an error: {err:#}"),
        Err(err) => warn!("Console task failed: {err}"),
        Ok(Ok(())) => {}
    }
    result
}

/// Claims every channel on a blocking thread; exporting sysfs lines polls with blocking sleeps.
async fn initialize_registry(
    settings: &KioskSettings,
    backend: Arc<dyn GpioBackend>,
) -> Result<HardwareChannelRegistry> {
    let assignments = settings.channel_assignments();
    let polarity = settings.polarity();
    let registry = tokio::task::spawn_blocking(move || {
        HardwareChannelRegistry::initialize(assignments, polarity, backend)
    })
    .await
    .context("hardware initialisation task failed")??;
    Ok(registry)
}

/// Wires every component on top of an initialised registry.
fn assemble(
    settings: &KioskSettings,
    registry: Arc<HardwareChannelRegistry>,
) -> Result<(KioskController, KioskHandle)> {
    let actuator = Arc::new(Actuator::new(registry.clone()));
    let disinfection = DisinfectionScheduler::new(actuator.clone(), settings.uv_duration());

    let service: Arc<dyn LockerService> = Arc::new(HttpLockerService::new(
        &settings.api_base_url,
        settings.request_timeout(),
        settings.probe_timeout(),
        settings.accept_invalid_certs,
    )?);
    let upstream = Arc::new(HttpUpstreamProbe::new(
        settings.reachability_url.clone(),
        settings.probe_timeout(),
    )?);
    let link: Arc<dyn LinkLayer> = Arc::new(WpaSupplicantLink::new(
        settings.wireless_interface.clone(),
        settings.wpa_supplicant_path.clone(),
    ));

    let monitor = Arc::new(ConnectivityMonitor::new(
        link.clone(),
        upstream,
        service.clone(),
        settings.poll_interval(),
    ));
    let workflow = Arc::new(RedemptionWorkflow::new(
        service,
        actuator,
        disinfection.clone(),
        monitor.subscribe(),
        settings.exit_code.clone(),
        settings.lock_hold(),
    ));
    let provisioning = Arc::new(ProvisioningFlow::new(link, monitor.clone(), settings.settle()));

    Ok(KioskController::new(KioskParts {
        workflow,
        provisioning,
        monitor,
        disinfection,
        registry,
        status_clear: settings.status_clear(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::{Level, Pin};

    #[tokio::test(flavor = "current_thread")]
    async fn registry_initialises_on_a_blocking_thread() {
        let settings = KioskSettings::default();
        let gpio = Arc::new(SimulatedGpio::new());

        let registry = initialize_registry(&settings, gpio.clone()).await.unwrap();

        assert!(registry.resolve_label("3").is_some());
        assert_eq!(gpio.level(Pin(22)), Some(Level::Low));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn registry_failure_surfaces_the_hardware_error() {
        let settings = KioskSettings::default();
        let gpio = Arc::new(SimulatedGpio::new());
        gpio.fail_configure(Pin(22));

        let err = initialize_registry(&settings, gpio.clone()).await.unwrap_err();

        assert!(err.downcast_ref::<error::HardwareError>().is_some());
        assert!(gpio.is_released(Pin(17)));
    }
}

//! Minimal terminal front end: stdin lines become commands, events are printed.
//!
//! On the code screen every line is submitted as a code. On the network setup screen the first
//! line names the network and the second is its passphrase (empty for an open network);
//! `:rescan` and `:cancel` are available there as well.

use anyhow::Result;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::connectivity::{ConnectivityState, NetworkCredential};
use crate::kiosk::{KioskCommand, KioskEvent, KioskHandle, Screen};
use crate::provisioning::ProvisioningOutcome;
use crate::redemption::StatusTone;

const RESCAN: &str = ":rescan";
const CANCEL: &str = ":cancel";

/// Shown when boot cannot continue. Printed to stderr so it survives a redirected stdout.
pub fn show_fatal(message: &str) {
    eprintln!();
    eprintln!("!!! {message}");
    eprintln!("!!! Please contact the operator.");
}

pub async fn run(handle: KioskHandle, shutdown: CancellationToken) -> Result<()> {
    let (screen_tx, screen_rx) = watch::channel(Screen::Main);
    let printer = tokio::spawn(print_events(handle.subscribe(), screen_tx));

    let result = read_commands(&handle, screen_rx, &shutdown).await;
    printer.abort();
    result
}

async fn print_events(
    mut events: broadcast::Receiver<KioskEvent>,
    screen_tx: watch::Sender<Screen>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let KioskEvent::ScreenChanged { screen } = &event {
                    screen_tx.send_replace(*screen);
                }
                if let Some(line) = render(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Console fell behind; {missed} events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn read_commands(
    handle: &KioskHandle,
    screen_rx: watch::Receiver<Screen>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_ssid: Option<String> = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.cancelled() => return Ok(()),
        };

        let Some(line) = line else {
            // Headless without a terminal: keep the kiosk running until it is told to stop.
            debug!("Console input closed");
            shutdown.cancelled().await;
            return Ok(());
        };

        let screen = *screen_rx.borrow();
        if screen != Screen::Provisioning {
            pending_ssid = None;
        }

        let command = match screen {
            Screen::Main => Some(KioskCommand::Submit(line)),
            Screen::Provisioning => provisioning_command(line, &mut pending_ssid),
            Screen::ShuttingDown => None,
        };

        if let Some(command) = command {
            if handle.send(command).await.is_err() {
                return Ok(());
            }
        }
    }
}

fn provisioning_command(line: String, pending_ssid: &mut Option<String>) -> Option<KioskCommand> {
    match line.trim() {
        RESCAN => {
            *pending_ssid = None;
            return Some(KioskCommand::ScanNetworks);
        }
        CANCEL => {
            *pending_ssid = None;
            return Some(KioskCommand::DismissProvisioning);
        }
        _ => {}
    }

    match pending_ssid.take() {
        Some(ssid) => Some(KioskCommand::Connect(NetworkCredential::new(ssid, line))),
        None => {
            let ssid = line.trim().to_string();
            if ssid.is_empty() {
                return None;
            }
            println!("Passphrase for {ssid} (leave empty for an open network):");
            *pending_ssid = Some(ssid);
            None
        }
    }
}

fn render(event: &KioskEvent) -> Option<String> {
    match event {
        KioskEvent::ScreenChanged { screen } => Some(match screen {
            Screen::Main => "Enter your code:".to_string(),
            Screen::Provisioning => format!(
                "WiFi setup. Type a network name ({RESCAN} to scan again, {CANCEL} to go back):"
            ),
            Screen::ShuttingDown => "Shutting down...".to_string(),
        }),
        KioskEvent::Status { text, tone, .. } => {
            let tag = match tone {
                StatusTone::Success => "ok",
                StatusTone::Error => "error",
                StatusTone::Info => "info",
            };
            Some(format!("[{tag}] {text}"))
        }
        KioskEvent::StatusCleared { .. } => None,
        KioskEvent::InputReset => Some("Enter your code:".to_string()),
        KioskEvent::NetworksFound { networks } if networks.is_empty() => {
            Some("No networks found.".to_string())
        }
        KioskEvent::NetworksFound { networks } => {
            let mut listing = String::from("Networks nearby:");
            for name in networks {
                listing.push_str("\n  ");
                listing.push_str(name);
            }
            Some(listing)
        }
        KioskEvent::ProvisioningResult { outcome } => match outcome {
            ProvisioningOutcome::Connected => None,
            ProvisioningOutcome::Failed(_) => Some("Type a network name to try again:".to_string()),
        },
        KioskEvent::Connectivity { state } => Some(
            match state {
                ConnectivityState::Online => "Connectivity: online",
                ConnectivityState::OfflineLink => "Connectivity: no network",
                ConnectivityState::OfflineService => "Connectivity: server unreachable",
            }
            .to_string(),
        ),
    }
}

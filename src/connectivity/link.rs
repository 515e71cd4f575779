use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use crate::error::ProvisioningError;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_SSID_BYTES: usize = 32;

/// Operator-entered network credentials. Consumed by a single connection attempt.
pub struct NetworkCredential {
    pub ssid: String,
    passphrase: String,
}

impl NetworkCredential {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }

    /// SSID must be 1..=32 bytes; the passphrase empty (open network) or 8..=63 printable ASCII.
    pub fn validate(&self) -> Result<(), ProvisioningError> {
        if self.ssid.is_empty() || self.ssid.len() > MAX_SSID_BYTES {
            return Err(ProvisioningError::InvalidCredential(format!(
                "network name must be 1-{MAX_SSID_BYTES} bytes"
            )));
        }
        if self.is_open() {
            return Ok(());
        }

        let printable = self.passphrase.bytes().all(|b| (0x20..=0x7e).contains(&b));
        if !printable || !(8..=63).contains(&self.passphrase.len()) {
            return Err(ProvisioningError::InvalidCredential(
                "passphrase must be 8-63 printable characters".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for NetworkCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredential")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// The wireless link as seen from the kiosk.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkLayer: Send + Sync {
    async fn is_associated(&self) -> bool;

    /// Names of nearby networks, deduplicated, in no particular order. May be empty.
    async fn scan_networks(&self) -> Result<Vec<String>>;

    /// Rewrites the link configuration for `credential` and asks the link to reassociate.
    async fn apply_credential(&self, credential: NetworkCredential)
        -> Result<(), ProvisioningError>;
}

#[derive(Debug, Clone)]
pub struct LinkTools {
    pub iwconfig: String,
    pub iwlist: String,
    pub wpa_cli: String,
}

impl Default for LinkTools {
    fn default() -> Self {
        Self {
            iwconfig: "iwconfig".into(),
            iwlist: "iwlist".into(),
            wpa_cli: "wpa_cli".into(),
        }
    }
}

/// wpa_supplicant-managed interface driven through the wireless-tools CLIs.
pub struct WpaSupplicantLink {
    interface: String,
    config_path: PathBuf,
    tools: LinkTools,
}

impl WpaSupplicantLink {
    pub fn new(interface: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self::with_tools(interface, config_path, LinkTools::default())
    }

    pub fn with_tools(
        interface: impl Into<String>,
        config_path: impl Into<PathBuf>,
        tools: LinkTools,
    ) -> Self {
        Self {
            interface: interface.into(),
            config_path: config_path.into(),
            tools,
        }
    }

    async fn write_config(&self, contents: String) -> Result<()> {
        let tmp_path = self.config_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.config_path)
            .await
            .with_context(|| format!("failed to replace {}", self.config_path.display()))
    }
}

async fn run_command(program: &str, args: &[&str]) -> Result<Output> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    tokio::time::timeout(COMMAND_TIMEOUT, command.output())
        .await
        .map_err(|_| anyhow!("{program} timed out after {COMMAND_TIMEOUT:?}"))?
        .with_context(|| format!("failed to run {program}"))
}

#[async_trait]
impl LinkLayer for WpaSupplicantLink {
    async fn is_associated(&self) -> bool {
        match run_command(&self.tools.iwconfig, &[&self.interface]).await {
            Ok(output) if output.status.success() => {
                is_associated_output(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(
                    "{} {} exited with {}; treating link as down",
                    self.tools.iwconfig, self.interface, output.status
                );
                false
            }
            Err(err) => {
                debug!("link check failed: {err:#}");
                false
            }
        }
    }

    async fn scan_networks(&self) -> Result<Vec<String>> {
        let output = run_command(&self.tools.iwlist, &[&self.interface, "scan"]).await?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} scan exited with {}: {}",
                self.tools.iwlist,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(parse_scan_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn apply_credential(
        &self,
        credential: NetworkCredential,
    ) -> Result<(), ProvisioningError> {
        credential.validate()?;
        let ssid = credential.ssid.clone();
        let contents = render_wpa_config(&credential);
        drop(credential);

        self.write_config(contents)
            .await
            .map_err(|err| ProvisioningError::Apply(format!("{err:#}")))?;

        let output = run_command(&self.tools.wpa_cli, &["-i", &self.interface, "reconfigure"])
            .await
            .map_err(|err| ProvisioningError::Apply(format!("{err:#}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || stdout.contains("FAIL") {
            return Err(ProvisioningError::Apply(format!(
                "reconfigure rejected: {}",
                stdout.trim()
            )));
        }

        info!("Link reconfigured for network {ssid:?} on {}", self.interface);
        Ok(())
    }
}

fn is_associated_output(output: &str) -> bool {
    !(output.contains("ESSID:off/any") || output.contains("Not-Associated"))
}

/// Extracts network names from `iwlist scan` output. Hidden networks are skipped.
pub fn parse_scan_output(output: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ESSID:"))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty() && !name.starts_with("\\x00"))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn needs_hex(ssid: &str) -> bool {
    ssid.bytes().any(|b| b == b'"' || !(0x20..=0x7e).contains(&b))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn render_wpa_config(credential: &NetworkCredential) -> String {
    let ssid_line = if needs_hex(&credential.ssid) {
        format!("ssid={}", hex(credential.ssid.as_bytes()))
    } else {
        format!("ssid=\"{}\"", credential.ssid)
    };
    let key_line = if credential.is_open() {
        "key_mgmt=NONE".to_string()
    } else {
        format!("psk=\"{}\"", credential.passphrase())
    };

    format!(
        "ctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\n\
         update_config=1\n\
         \n\
         network={{\n    {ssid_line}\n    {key_line}\n}}\n"
    )
}

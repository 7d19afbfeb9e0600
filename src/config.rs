//! Relay configuration: TOML file + CLI overrides.
//!
//! The CLI flags (`-l`, `-r`, `-p`) always win over the config file. Every
//! value must be present from one of the two sources; anything missing or
//! malformed is a [`RelayError::Config`] reported before any listener starts.

use crate::error::{RelayError, RelayResult};
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub relay: RelaySection,
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelaySection {
    /// Local address to bind and receive inbound traffic.
    pub local: Option<String>,
    /// Remote peer address the traffic is forwarded to.
    pub remote: Option<String>,
    /// Ports to forward, each relayed to the same port on the remote peer.
    pub ports: Option<Vec<u16>>,
}

/// Resolved relay configuration (CLI overrides applied, everything parsed).
///
/// Immutable after startup; the supervisor and listeners only read it.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    local: IpAddr,
    remote: IpAddr,
    ports: Vec<u16>,
}

impl RelayConfig {
    /// Load config from an optional TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_local: Option<&str>,
        cli_remote: Option<&str>,
        cli_ports: Option<&str>,
    ) -> RelayResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
            } else {
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let local_str = cli_local
            .map(|s| s.to_string())
            .or(file_config.relay.local)
            .ok_or_else(|| RelayError::Config("no local address given".to_string()))?;
        let remote_str = cli_remote
            .map(|s| s.to_string())
            .or(file_config.relay.remote)
            .ok_or_else(|| RelayError::Config("no remote address given".to_string()))?;

        let ports = match cli_ports {
            Some(list) => parse_ports(list)?,
            None => file_config
                .relay
                .ports
                .ok_or_else(|| RelayError::Config("no ports given".to_string()))?,
        };
        if ports.is_empty() {
            return Err(RelayError::Config("no ports to forward".to_string()));
        }

        Ok(Self {
            local: parse_addr(&local_str)?,
            remote: parse_addr(&remote_str)?,
            ports,
        })
    }

    /// Local address inbound traffic arrives on.
    pub fn local(&self) -> IpAddr {
        self.local
    }

    /// Remote peer address traffic is forwarded to.
    pub fn remote(&self) -> IpAddr {
        self.remote
    }

    /// Forwarded ports, in the order they were configured.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

impl fmt::Display for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} -> {} for ports {:?}}}",
            self.local, self.remote, self.ports
        )
    }
}

fn parse_addr(s: &str) -> RelayResult<IpAddr> {
    IpAddr::from_str(s.trim())
        .map_err(|e| RelayError::Config(format!("{s:?} is not a valid ip address: {e}")))
}

/// Parse a comma-separated port list, e.g. `"1010,1080,443"`.
fn parse_ports(list: &str) -> RelayResult<Vec<u16>> {
    list.split(',')
        .map(|p| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| RelayError::Config(format!("{p:?} is not a valid port")))
        })
        .collect()
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s.as_ref())
}

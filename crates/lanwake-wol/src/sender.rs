//! Wake-signal transmission.
//!
//! - `socket`   : UDP broadcast of the magic packet (layer 3/4, cross-platform)
//! - `etherwake`: raw Ethernet frame via the `etherwake` utility (layer 2, Linux)
//! - `auto`     : one, then the other on failure. With an explicit interface
//!   etherwake goes first; without one it tends to pick the wrong NIC, so the
//!   socket goes first.

use async_trait::async_trait;
use lanwake_core::config::{WolConfig, WolMethod};
use lanwake_core::error::{LanWakeError, Result};
use serde::Serialize;
use std::ffi::OsStr;
use std::time::Duration;

use crate::magic::WakeSignal;

const ETHERWAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can put a wake signal on the wire.
#[async_trait]
pub trait WakeSender: Send + Sync {
    async fn send(&self, signal: &WakeSignal) -> Result<()>;
}

/// Diagnostics for `/api/system/info`.
#[derive(Debug, Clone, Serialize)]
pub struct WolInfo {
    pub method: String,
    pub interface: String,
    pub etherwake_available: bool,
    pub platform: String,
}

/// The production sender.
#[derive(Debug, Clone, Default)]
pub struct WolSender {
    method: WolMethod,
    interface: String,
}

impl WolSender {
    pub fn new(method: WolMethod, interface: &str) -> Self {
        Self {
            method,
            interface: interface.trim().to_string(),
        }
    }

    pub fn from_config(config: &WolConfig) -> Self {
        Self::new(config.method, &config.interface)
    }

    pub fn info(&self) -> WolInfo {
        WolInfo {
            method: self.method.to_string(),
            interface: if self.interface.is_empty() {
                "(default)".into()
            } else {
                self.interface.clone()
            },
            etherwake_available: etherwake_available(),
            platform: std::env::consts::OS.into(),
        }
    }

    async fn send_auto(&self, signal: &WakeSignal) -> Result<()> {
        let etherwake = etherwake_available();
        if etherwake && !self.interface.is_empty() {
            match send_via_etherwake(signal, &self.interface).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::warn!("⚠️ etherwake failed ({e}), falling back to socket");
                    send_via_socket(signal).await
                }
            }
        } else {
            match send_via_socket(signal).await {
                Ok(()) => Ok(()),
                Err(e) if etherwake => {
                    tracing::warn!("⚠️ socket send failed ({e}), falling back to etherwake");
                    send_via_etherwake(signal, &self.interface).await
                }
                Err(e) => Err(e),
            }
        }
    }
}

#[async_trait]
impl WakeSender for WolSender {
    async fn send(&self, signal: &WakeSignal) -> Result<()> {
        match self.method {
            WolMethod::Socket => send_via_socket(signal).await,
            WolMethod::Etherwake => {
                if !etherwake_available() {
                    return Err(LanWakeError::SignalSend(
                        "etherwake not found on PATH; install it or set WOL method to 'auto'".into(),
                    ));
                }
                if self.interface.is_empty() {
                    tracing::warn!(
                        "etherwake without an interface may use the wrong NIC; set wol.interface (e.g. eth0)"
                    );
                }
                send_via_etherwake(signal, &self.interface).await
            }
            WolMethod::Auto => self.send_auto(signal).await,
        }
    }
}

async fn send_via_socket(signal: &WakeSignal) -> Result<()> {
    let socket = tokio::net::UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(|e| LanWakeError::SignalSend(format!("bind: {e}")))?;
    socket
        .set_broadcast(true)
        .map_err(|e| LanWakeError::SignalSend(format!("SO_BROADCAST: {e}")))?;
    socket
        .send_to(&signal.payload(), (signal.broadcast, signal.port))
        .await
        .map_err(|e| {
            LanWakeError::SignalSend(format!("send to {}:{}: {e}", signal.broadcast, signal.port))
        })?;
    tracing::info!(
        "📡 [socket] WOL packet sent to {} via {}:{}",
        signal.mac,
        signal.broadcast,
        signal.port
    );
    Ok(())
}

async fn send_via_etherwake(signal: &WakeSignal, interface: &str) -> Result<()> {
    let mut cmd = tokio::process::Command::new("etherwake");
    if !interface.is_empty() {
        cmd.arg("-i").arg(interface);
    }
    cmd.arg(signal.mac.to_string()).kill_on_drop(true);

    let output = tokio::time::timeout(ETHERWAKE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| LanWakeError::SignalSend("etherwake timed out".into()))?
        .map_err(|e| LanWakeError::SignalSend(format!("etherwake spawn: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LanWakeError::SignalSend(format!(
            "etherwake failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    tracing::info!(
        "📡 [etherwake] WOL packet sent to {}{}",
        signal.mac,
        if interface.is_empty() { String::new() } else { format!(" via interface {interface}") }
    );
    Ok(())
}

/// Is an executable `etherwake` on PATH?
fn etherwake_available() -> bool {
    std::env::var_os("PATH").is_some_and(etherwake_in)
}

fn etherwake_in<P: AsRef<OsStr>>(paths: P) -> bool {
    which::which_in("etherwake", Some(paths), ".").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socket_send_to_loopback() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let signal = WakeSignal::parse("aa:bb:cc:dd:ee:ff", "127.0.0.1", port).unwrap();
        WolSender::new(WolMethod::Socket, "").send(&signal).await.unwrap();

        let mut buf = [0u8; 256];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(n, 102);
        assert_eq!(&buf[..n], &signal.payload()[..]);
    }

    #[cfg(unix)]
    #[test]
    fn test_etherwake_lookup_needs_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("lanwake-etherwake-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bin = dir.join("etherwake");
        std::fs::write(&bin, "#!/bin/sh\nexit 0\n").unwrap();

        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!etherwake_in(&dir));

        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(etherwake_in(&dir));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_info_defaults() {
        let info = WolSender::new(WolMethod::Auto, "  ").info();
        assert_eq!(info.method, "auto");
        assert_eq!(info.interface, "(default)");
        assert_eq!(info.platform, std::env::consts::OS);
    }
}

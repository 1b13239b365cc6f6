//! Reachability probe: one ICMP echo via the system `ping`.

use async_trait::async_trait;
use lanwake_core::error::{LanWakeError, Result};
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

/// A single reachability check.
///
/// Returns `Ok(false)` for unreachable hosts; errors only on invalid input.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn probe(&self, ip: &str) -> Result<bool>;
}

/// `ping -c 1 -W <timeout>` (or the Windows equivalent).
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: timeout.max(Duration::from_secs(1)),
        }
    }

    fn command(&self, ip: IpAddr) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w", &self.timeout.as_millis().to_string()]);
        } else {
            cmd.args(["-c", "1", "-W", &self.timeout.as_secs().to_string()]);
        }
        cmd.arg(ip.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Reachability for PingProbe {
    async fn probe(&self, ip: &str) -> Result<bool> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| LanWakeError::validation(format!("Invalid IP address: '{ip}'")))?;

        let mut child = match self.command(addr).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("⚠️ Could not run ping for {addr}: {e}");
                return Ok(false);
            }
        };

        // Grace period on top of ping's own deadline
        let waited = tokio::time::timeout(self.timeout + Duration::from_secs(2), child.wait()).await;
        match waited {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(e)) => {
                tracing::debug!("ping {addr} wait failed: {e}");
                Ok(false)
            }
            Err(_) => {
                child.kill().await.ok();
                Ok(false)
            }
        }
    }
}

//! Magic packet construction.
//! Layout: 6 × 0xFF followed by the target MAC repeated 16 times (102 bytes).

use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::types::{MacAddress, Machine};
use std::net::Ipv4Addr;

pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// Everything needed to put one wake signal on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSignal {
    pub mac: MacAddress,
    pub broadcast: Ipv4Addr,
    pub port: u16,
}

impl WakeSignal {
    /// Parse and validate raw address fields.
    pub fn parse(mac: &str, broadcast: &str, port: u16) -> Result<Self> {
        let mac = mac.parse::<MacAddress>()?;
        let broadcast = broadcast.trim().parse::<Ipv4Addr>().map_err(|_| {
            LanWakeError::validation(format!("Invalid broadcast address: '{broadcast}'"))
        })?;
        if port == 0 {
            return Err(LanWakeError::validation("WOL port must be non-zero"));
        }
        Ok(Self { mac, broadcast, port })
    }

    pub fn for_machine(machine: &Machine) -> Result<Self> {
        Self::parse(&machine.mac_address, &machine.broadcast_address, machine.port)
    }

    pub fn payload(&self) -> [u8; MAGIC_PACKET_LEN] {
        let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
        let mac = self.mac.octets();
        for chunk in packet[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&mac);
        }
        packet
    }
}

//! Data model: machines, groups, scheduled tasks, wake history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{LanWakeError, Result};

pub const DEFAULT_BROADCAST: &str = "255.255.255.255";
pub const DEFAULT_WOL_PORT: u16 = 9;

// ─── MAC address ─────────────────────────────────────────

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl std::str::FromStr for MacAddress {
    type Err = LanWakeError;

    /// Accepts any separator (`:`, `-`, `.`, spaces) or none at all.
    fn from_str(s: &str) -> Result<Self> {
        let hex: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        let stripped_len = s.chars().filter(|c| c.is_ascii_alphanumeric()).count();
        if hex.len() != 12 || stripped_len != 12 {
            return Err(LanWakeError::validation(format!("Invalid MAC address: '{s}'")));
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| LanWakeError::validation(format!("Invalid MAC address: '{s}'")))?;
        }
        Ok(MacAddress(bytes))
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Normalise a MAC string to `AA:BB:CC:DD:EE:FF`.
pub fn normalize_mac(s: &str) -> Result<String> {
    Ok(s.parse::<MacAddress>()?.to_string())
}

fn validate_ip(ip: &str) -> Result<()> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| LanWakeError::validation(format!("Invalid IP address: '{ip}'")))
}

fn validate_broadcast(addr: &str) -> Result<()> {
    addr.trim()
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| LanWakeError::validation(format!("Invalid broadcast address: '{addr}'")))
}

/// Distinguishes "field absent" (`None`) from "field set to null" (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ─── Machine ─────────────────────────────────────────────

/// A wakeable machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    pub mac_address: String,
    pub ip_address: Option<String>,
    pub broadcast_address: String,
    pub port: u16,
    pub group_id: Option<i64>,
    /// Joined from `groups` when listing.
    #[serde(default)]
    pub group_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Machine {
    /// IP to probe after a wake, if one is configured.
    pub fn probe_ip(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

/// Input for creating a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMachine {
    pub name: String,
    pub mac_address: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default = "default_broadcast")]
    pub broadcast_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub group_id: Option<i64>,
}

fn default_broadcast() -> String { DEFAULT_BROADCAST.into() }
fn default_port() -> u16 { DEFAULT_WOL_PORT }

impl NewMachine {
    pub fn new(name: &str, mac_address: &str) -> Self {
        Self {
            name: name.to_string(),
            mac_address: mac_address.to_string(),
            ip_address: None,
            broadcast_address: default_broadcast(),
            port: default_port(),
            group_id: None,
        }
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip_address = Some(ip.to_string());
        self
    }

    pub fn in_group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Check and normalise every field. Returns the cleaned-up copy.
    pub fn validated(&self) -> Result<Self> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(LanWakeError::validation("Machine name must not be empty"));
        }
        let ip_address = non_empty(self.ip_address.clone());
        if let Some(ip) = &ip_address {
            validate_ip(ip)?;
        }
        validate_broadcast(&self.broadcast_address)?;
        Ok(Self {
            name: name.to_string(),
            mac_address: normalize_mac(&self.mac_address)?,
            ip_address,
            broadcast_address: self.broadcast_address.trim().to_string(),
            port: self.port,
            group_id: self.group_id,
        })
    }
}

/// Partial machine update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    /// `Some("")` clears the IP.
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub broadcast_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// `Some(None)` unassigns the machine from its group.
    #[serde(default, deserialize_with = "double_option")]
    pub group_id: Option<Option<i64>>,
}

impl MachineUpdate {
    /// Merge into an existing machine, validating the result.
    pub fn apply(&self, current: &Machine) -> Result<NewMachine> {
        let merged = NewMachine {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            mac_address: self
                .mac_address
                .clone()
                .unwrap_or_else(|| current.mac_address.clone()),
            ip_address: match &self.ip_address {
                Some(ip) => Some(ip.clone()),
                None => current.ip_address.clone(),
            },
            broadcast_address: self
                .broadcast_address
                .clone()
                .unwrap_or_else(|| current.broadcast_address.clone()),
            port: self.port.unwrap_or(current.port),
            group_id: self.group_id.unwrap_or(current.group_id),
        };
        merged.validated()
    }
}

// ─── Group ───────────────────────────────────────────────

/// A named set of machines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub machine_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NewGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
        }
    }

    pub fn validated(&self) -> Result<Self> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(LanWakeError::validation("Group name must not be empty"));
        }
        Ok(Self {
            name: name.to_string(),
            description: self.description.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl GroupUpdate {
    pub fn apply(&self, current: &Group) -> Result<NewGroup> {
        NewGroup {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| current.description.clone()),
        }
        .validated()
    }
}

// ─── Scheduled tasks ─────────────────────────────────────

/// What a scheduled task (or a wake request) points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Machine,
    Group,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Machine => "machine",
            TargetType::Group => "group",
        }
    }
}

impl std::str::FromStr for TargetType {
    type Err = LanWakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "machine" => Ok(TargetType::Machine),
            "group" => Ok(TargetType::Group),
            other => Err(LanWakeError::validation(format!(
                "Invalid target type '{other}' (expected 'machine' or 'group')"
            ))),
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine or group reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskTarget {
    pub target_type: TargetType,
    pub target_id: i64,
}

impl TaskTarget {
    pub fn machine(id: i64) -> Self {
        Self { target_type: TargetType::Machine, target_id: id }
    }

    pub fn group(id: i64) -> Self {
        Self { target_type: TargetType::Group, target_id: id }
    }
}

impl std::fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.target_type, self.target_id)
    }
}

/// When a task fires. Exactly one of cron / one-off by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// 5-field cron expression, matched at minute granularity.
    Cron(String),
    /// Single-shot at the given instant.
    Once(DateTime<Utc>),
}

impl Schedule {
    pub fn cron_expression(&self) -> Option<&str> {
        match self {
            Schedule::Cron(expr) => Some(expr),
            Schedule::Once(_) => None,
        }
    }

    pub fn scheduled_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(_) => None,
            Schedule::Once(at) => Some(*at),
        }
    }
}

/// A persisted scheduled wake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub target: TaskTarget,
    pub schedule: Schedule,
    /// Cron: the minute last fired. One-off: the instant it fired.
    pub last_fired: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated task definition ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledTask {
    pub name: String,
    pub enabled: bool,
    pub target: TaskTarget,
    pub schedule: Schedule,
}

// ─── Wake history ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
        }
    }
}

/// One wake attempt outcome. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub machine_id: Option<i64>,
    pub machine_name: String,
    pub mac_address: String,
    pub status: HistoryStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub machine_id: Option<i64>,
    pub machine_name: String,
    pub mac_address: String,
    pub status: HistoryStatus,
    pub message: String,
}

impl NewHistoryEntry {
    pub fn success(machine: &Machine, message: impl Into<String>) -> Self {
        Self {
            machine_id: Some(machine.id),
            machine_name: machine.name.clone(),
            mac_address: machine.mac_address.clone(),
            status: HistoryStatus::Success,
            message: message.into(),
        }
    }

    pub fn failure(machine: &Machine, message: impl Into<String>) -> Self {
        Self {
            machine_id: Some(machine.id),
            machine_name: machine.name.clone(),
            mac_address: machine.mac_address.clone(),
            status: HistoryStatus::Failed,
            message: message.into(),
        }
    }

    /// Failure for a target that no longer resolves to a machine.
    pub fn unresolved(target: &TaskTarget, message: impl Into<String>) -> Self {
        Self {
            machine_id: None,
            machine_name: format!("{} #{}", target.target_type, target.target_id),
            mac_address: String::new(),
            status: HistoryStatus::Failed,
            message: message.into(),
        }
    }
}

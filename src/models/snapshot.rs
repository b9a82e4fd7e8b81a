// Raw runtime stats and the immutable per-cycle resource snapshot

use serde::{Deserialize, Serialize};

/// How a deployment is hosted; serializes to lowercase JSON (e.g. "acp").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    Acp,
    Function,
    Persistent,
}

impl DeploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentType::Acp => "acp",
            DeploymentType::Function => "function",
            DeploymentType::Persistent => "persistent",
        }
    }

    /// Parse from a stored column or API string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "acp" => Some(DeploymentType::Acp),
            "function" => Some(DeploymentType::Function),
            "persistent" => Some(DeploymentType::Persistent),
            _ => None,
        }
    }

    pub const ALL: [DeploymentType; 3] = [
        DeploymentType::Acp,
        DeploymentType::Function,
        DeploymentType::Persistent,
    ];
}

/// Observed container status at sampling time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Suspended,
    Stopped,
}

impl DeploymentStatus {
    /// Map a Docker API state string (e.g. "running", "paused", "exited").
    pub fn from_docker(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "running" | "restarting" => DeploymentStatus::Running,
            "paused" => DeploymentStatus::Suspended,
            _ => DeploymentStatus::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Running => "running",
            DeploymentStatus::Suspended => "suspended",
            DeploymentStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(DeploymentStatus::Running),
            "suspended" => Some(DeploymentStatus::Suspended),
            "stopped" => Some(DeploymentStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DeploymentStatus::Running)
    }
}

/// One raw stats read from the container runtime. Network and block
/// counters are cumulative since container start; the collector turns
/// them into per-interval deltas before a snapshot is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
    pub status: DeploymentStatus,
}

/// One metering sample: what a deployment consumed over one sampling
/// interval. Immutable once recorded; network/block fields are already
/// per-interval deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    /// Sample time, epoch millis.
    pub timestamp: i64,
    pub deployment_id: String,
    pub user_id: String,
    pub deployment_type: DeploymentType,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
    pub status: DeploymentStatus,
    /// Seconds of wall time this sample covers (the sampling interval
    /// in force when it was taken).
    pub elapsed_seconds: u32,
}

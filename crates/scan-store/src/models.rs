use serde::{Deserialize, Serialize};

pub type SessionId = i64;

/// Metadata for a new scan session. Sessions are immutable once
/// inserted; only deletion is allowed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub timestamp: String,
    pub scan_type: String,
    pub source_path: Option<String>,
    pub log_path: Option<String>,
    pub log_text: Option<String>,
}

/// One scan_results row: a (host, port) observation, or the sentinel
/// no-open-ports entry when `port` is None.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultRow {
    pub ip: String,
    pub hostname: String,
    pub mac_addr: Option<String>,
    pub vendor: Option<String>,
    pub protocol: String,
    pub port: Option<u16>,
    pub state: String,
    pub service: String,
    pub product: String,
    pub version: String,
    pub os: String,
    pub cpe: String,
    pub uptime: String,
    pub last_boot: String,
    pub script: String,
    pub risk_score: u32,
}

/// Session listing entry (id, timestamp, scan_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub timestamp: String,
    pub scan_type: String,
}

/// Aggregate counters for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_hosts: i64,
    pub total_ports: i64,
    pub open_ports: i64,
    pub unique_services: i64,
    pub top_ports: Vec<(Option<u16>, i64)>,
    pub top_services: Vec<(String, i64)>,
}

/// Which tag field an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Device,
    Service,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Device => "device",
            TagKind::Service => "service",
        }
    }
}

impl std::str::FromStr for TagKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "device" => Ok(TagKind::Device),
            "service" => Ok(TagKind::Service),
            other => Err(format!("unknown tag type: {other}")),
        }
    }
}

/// Confirmed cross-session labels for one (ip, mac) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalTag {
    pub device: String,
    pub service: String,
}

/// Global plus session-suggested labels for one host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostTags {
    pub global: GlobalTag,
    pub suggested: GlobalTag,
}

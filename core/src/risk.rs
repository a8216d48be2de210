//! Risk scoring for discovered ports and services.
//!
//! Explicit weight tables for commonly targeted ports and service
//! names; everything unknown weighs 0. A row's score is always
//! `1 + port_weight + service_weight`, so no open port scores below 1.

/// Weights for commonly targeted ports.
const PORT_WEIGHTS: &[(u16, u32)] = &[
    (21, 3),   // FTP
    (22, 2),   // SSH
    (23, 5),   // Telnet
    (25, 2),   // SMTP
    (53, 1),   // DNS
    (80, 1),   // HTTP
    (139, 3),  // NetBIOS
    (445, 3),  // SMB
    (1433, 4), // MSSQL
    (3306, 3), // MySQL
    (3389, 4), // RDP
];

/// Weights for commonly targeted service names (post-normalization).
const SERVICE_WEIGHTS: &[(&str, u32)] = &[
    ("ssh", 2),
    ("http", 1),
    ("ftp", 3),
    ("telnet", 5),
    ("rdp", 4),
    ("smb", 3),
    ("smtp", 2),
    ("dns", 1),
    ("mysql", 3),
    ("postgresql", 3),
];

fn port_weight(port: Option<u16>) -> u32 {
    match port {
        Some(p) => PORT_WEIGHTS
            .iter()
            .find(|(k, _)| *k == p)
            .map(|(_, w)| *w)
            .unwrap_or(0),
        None => 0,
    }
}

fn service_weight(service: &str) -> u32 {
    SERVICE_WEIGHTS
        .iter()
        .find(|(k, _)| *k == service)
        .map(|(_, w)| *w)
        .unwrap_or(0)
}

/// Compute the risk score for one port/service pair.
///
/// Deterministic and total: a missing port weighs 0, unknown services
/// weigh 0, and the base score of 1 is always included.
pub fn score(port: Option<u16>, service: &str) -> u32 {
    let service = service.trim().to_lowercase();
    1 + port_weight(port) + service_weight(&service)
}

/// One line of justification for a host's cumulative score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreReason {
    pub port: Option<u16>,
    pub service: String,
    pub points: u32,
}

impl ScoreReason {
    pub fn describe(&self) -> String {
        let service = self.service.trim().to_lowercase();
        let port_part = match self.port {
            Some(p) => format!("Port {} (+{})", p, port_weight(Some(p))),
            None => "Port - (+0)".to_string(),
        };
        format!(
            "{}, Service '{}' (+{})",
            port_part,
            service,
            service_weight(&service)
        )
    }
}

/// Fold a host's open (port, service) rows into a cumulative score
/// plus per-row reason strings.
pub fn host_risk(rows: &[(Option<u16>, String)]) -> (u32, Vec<ScoreReason>) {
    let mut total = 0;
    let mut reasons = Vec::with_capacity(rows.len());
    for (port, service) in rows {
        let points = score(*port, service);
        total += points;
        reasons.push(ScoreReason {
            port: *port,
            service: service.clone(),
            points,
        });
    }
    (total, reasons)
}

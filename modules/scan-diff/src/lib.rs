//! Structural comparison of two scan sessions: host-level adds and
//! removals plus field-level changes per surviving port. Read-only.

use std::collections::BTreeMap;

use scan_store::{get_global_tag, Db, ResultRow, SessionId, StoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rendered in place of an absent value.
pub const PLACEHOLDER: &str = "—";

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything recorded about one port in one session, trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub state: String,
    pub service: String,
    pub version: String,
    pub product: String,
    pub os: String,
    pub cpe: String,
    pub uptime: String,
    pub last_boot: String,
    pub script: String,
}

impl PortSnapshot {
    fn from_row(row: &ResultRow) -> Self {
        PortSnapshot {
            state: row.state.trim().to_string(),
            service: row.service.trim().to_string(),
            version: row.version.trim().to_string(),
            product: row.product.trim().to_string(),
            os: row.os.trim().to_string(),
            cpe: row.cpe.trim().to_string(),
            uptime: row.uptime.trim().to_string(),
            last_boot: row.last_boot.trim().to_string(),
            script: row.script.trim().to_string(),
        }
    }

    /// Service and version joined for the composite field.
    fn svc_ver(&self) -> String {
        let joined = format!("{} {}", self.service, self.version);
        joined.trim().to_string()
    }
}

/// One field that differs between the two sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

/// One port with at least one changed field, plus full snapshots of
/// both sides for drill-down rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDelta {
    pub port: u16,
    pub changes: Vec<FieldChange>,
    pub full_old: Option<PortSnapshot>,
    pub full_new: Option<PortSnapshot>,
}

/// All changed ports for one host, with identity attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostChange {
    pub ip: String,
    pub hostname: String,
    pub mac: String,
    pub tags: Vec<String>,
    pub ports: Vec<PortDelta>,
}

/// Differences between two sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDiff {
    pub old_id: SessionId,
    pub new_id: SessionId,
    pub added_hosts: Vec<String>,
    pub removed_hosts: Vec<String>,
    pub changes: Vec<HostChange>,
}

fn eq_ci(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn present(s: &str) -> String {
    if s.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        s.to_string()
    }
}

fn push_change(changes: &mut Vec<FieldChange>, field: &str, old: &str, new: &str) {
    changes.push(FieldChange {
        field: field.to_string(),
        old: present(old),
        new: present(new),
    });
}

/// Port -> snapshot map for one (session, ip). Sentinel rows (NULL
/// port) are excluded: "no open ports" is not a comparable port.
fn port_map(
    db: &Db,
    session_id: SessionId,
    ip: &str,
) -> Result<BTreeMap<u16, PortSnapshot>, DiffError> {
    let mut map = BTreeMap::new();
    for row in db.results_for_host(session_id, ip)? {
        if let Some(port) = row.port {
            map.insert(port, PortSnapshot::from_row(&row));
        }
    }
    Ok(map)
}

fn compare_port(
    port: u16,
    old: Option<&PortSnapshot>,
    new: Option<&PortSnapshot>,
) -> Option<PortDelta> {
    let empty = PortSnapshot::default();
    let o = old.unwrap_or(&empty);
    let n = new.unwrap_or(&empty);

    let mut changes = Vec::new();
    if !eq_ci(&o.state, &n.state) {
        push_change(&mut changes, "state", &o.state, &n.state);
    }
    // Service and version report jointly: a change in either flags
    // the composite field with both halves.
    if !eq_ci(&o.service, &n.service) || !eq_ci(&o.version, &n.version) {
        push_change(&mut changes, "svc_ver", &o.svc_ver(), &n.svc_ver());
    }
    if !eq_ci(&o.product, &n.product) {
        push_change(&mut changes, "product", &o.product, &n.product);
    }
    if !eq_ci(&o.os, &n.os) {
        push_change(&mut changes, "os", &o.os, &n.os);
    }
    if !eq_ci(&o.cpe, &n.cpe) {
        push_change(&mut changes, "cpe", &o.cpe, &n.cpe);
    }
    if o.uptime != n.uptime {
        push_change(&mut changes, "uptime", &o.uptime, &n.uptime);
    }
    if o.last_boot != n.last_boot {
        push_change(&mut changes, "last_boot", &o.last_boot, &n.last_boot);
    }
    if !eq_ci(&o.script, &n.script) {
        push_change(&mut changes, "script", &o.script, &n.script);
    }

    if changes.is_empty() {
        return None;
    }
    Some(PortDelta {
        port,
        changes,
        full_old: old.cloned(),
        full_new: new.cloned(),
    })
}

/// Compare two sessions. Fails with `NotFound` only when a session id
/// does not exist; an existing session with no results is a valid
/// (all-added or all-removed) side.
pub fn diff(db: &Db, old_id: SessionId, new_id: SessionId) -> Result<SessionDiff, DiffError> {
    for id in [old_id, new_id] {
        if !db.session_exists(id)? {
            return Err(DiffError::NotFound(id));
        }
    }

    let old_hosts = db.distinct_ips(old_id)?;
    let new_hosts = db.distinct_ips(new_id)?;

    let added_hosts: Vec<String> = new_hosts.difference(&old_hosts).cloned().collect();
    let removed_hosts: Vec<String> = old_hosts.difference(&new_hosts).cloned().collect();

    let mut changes = Vec::new();
    for ip in old_hosts.union(&new_hosts) {
        let old_map = port_map(db, old_id, ip)?;
        let new_map = port_map(db, new_id, ip)?;

        let mut deltas = Vec::new();
        let mut ports: Vec<u16> = old_map.keys().chain(new_map.keys()).copied().collect();
        ports.sort_unstable();
        ports.dedup();
        for port in ports {
            if let Some(delta) = compare_port(port, old_map.get(&port), new_map.get(&port)) {
                deltas.push(delta);
            }
        }
        if deltas.is_empty() {
            continue;
        }

        // Identity from the new session when present, else the old.
        let (hostname, mac) = match db.host_header(new_id, ip)? {
            Some(header) => header,
            None => db.host_header(old_id, ip)?.unwrap_or_default(),
        };
        let mut tags = Vec::new();
        if let Some(t) = get_global_tag(&db.conn, ip)? {
            if !t.device.is_empty() {
                tags.push(format!("Device: {}", t.device));
            }
            if !t.service.is_empty() {
                tags.push(format!("Service: {}", t.service));
            }
        }

        changes.push(HostChange {
            ip: ip.clone(),
            hostname,
            mac,
            tags,
            ports: deltas,
        });
    }

    debug!(
        old_id,
        new_id,
        added = added_hosts.len(),
        removed = removed_hosts.len(),
        changed = changes.len(),
        "computed session diff"
    );
    Ok(SessionDiff {
        old_id,
        new_id,
        added_hosts,
        removed_hosts,
        changes,
    })
}

/// Full old/new rows for one ip/port pair across the two sessions.
pub fn port_detail(
    db: &Db,
    old_id: SessionId,
    new_id: SessionId,
    ip: &str,
    port: u16,
) -> Result<(Option<ResultRow>, Option<ResultRow>), DiffError> {
    Ok((
        db.result_for_port(old_id, ip, port)?,
        db.result_for_port(new_id, ip, port)?,
    ))
}

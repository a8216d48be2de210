//! Scan report ingestion: parse an nmap-style XML report and persist a
//! new immutable session with per-port results, risk scores, and
//! first-seen tag suggestions, all inside one transaction.

pub mod xml;

use std::path::Path;

use netwatch_core::{risk, suggest_tags};
use quick_xml::de::from_str;
use rusqlite::Connection;
use scan_store::{
    get_global_tag, get_session_tags, insert_result, insert_session, set_tag, Db, ResultRow,
    SessionId, SessionMeta, StoreError, TagKind,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::xml::{Host, ScanReport};

/// State/service recorded on the sentinel row for a host that
/// answered but exposed no ports.
pub const SENTINEL_STATE: &str = "filtered";
pub const SENTINEL_SERVICE: &str = "All ports filtered or closed";

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("report parse error: {0}")]
    Parse(#[from] quick_xml::DeError),
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl From<rusqlite::Error> for ImportError {
    fn from(e: rusqlite::Error) -> Self {
        ImportError::Persistence(StoreError::Sqlite(e))
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .replace_millisecond(0)
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Derive (scan_type, timestamp) from the report's file name, e.g.
/// `scan_full_2026-08-01T10:00:00.xml`. Best-effort convention: any
/// name without at least three underscore-separated segments falls
/// back to "custom" and the current time.
pub fn provenance(source_path: &Path) -> (String, String) {
    let name = source_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.trim_end_matches(".xml");
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() >= 3 {
        let scan_type = parts[1].to_string();
        let timestamp = parts[parts.len() - 1].replace('T', " ");
        (scan_type, timestamp)
    } else {
        ("custom".to_string(), now_rfc3339())
    }
}

/// Import one scan report. Returns the new session id.
///
/// The session insert and every result/tag insert commit together; a
/// malformed report or a failed session insert aborts with nothing
/// visible. Unusable single rows are logged and skipped.
pub fn import_report(
    db: &mut Db,
    xml_text: &str,
    source_path: &Path,
    log_path: Option<&Path>,
    log_text: Option<String>,
) -> Result<SessionId, ImportError> {
    let report: ScanReport = from_str(xml_text)?;
    let (scan_type, timestamp) = provenance(source_path);

    let tx = db.conn.transaction()?;
    let session_id = insert_session(
        &tx,
        &SessionMeta {
            timestamp,
            scan_type,
            source_path: Some(source_path.to_string_lossy().into_owned()),
            log_path: log_path.map(|p| p.to_string_lossy().into_owned()),
            log_text,
        },
    )?;

    let mut hosts = 0usize;
    let mut rows = 0usize;
    for host in &report.hosts {
        if !host.is_up() {
            continue;
        }
        rows += import_host(&tx, session_id, host)?;
        hosts += 1;
    }

    tx.commit()?;
    info!(session_id, hosts, rows, "imported scan report");
    Ok(session_id)
}

fn import_host(
    conn: &Connection,
    session_id: SessionId,
    host: &Host,
) -> Result<usize, ImportError> {
    let ip = host.ipv4().unwrap_or("unknown").to_string();
    let mac = host.mac();
    let mac_addr = mac.map(|m| m.addr.clone());
    let vendor = mac.and_then(|m| m.vendor.clone());
    let hostname = host.first_hostname().unwrap_or_default().to_string();
    let (os_match, cpe) = host.os_info();
    let (uptime, last_boot) = match &host.uptime {
        Some(u) => (
            u.seconds.clone().unwrap_or_default(),
            u.lastboot.clone().unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };

    // Read-before-write: already-recorded suggestions or confirmed
    // global labels suppress new suggestions for the same field.
    let session_tags = get_session_tags(conn, &ip)?;
    let global_tags = get_global_tag(conn, &ip)?.unwrap_or_default();

    let mut inserted = 0usize;
    let mut tagged = false;

    if let Some(ports) = &host.ports {
        for port in &ports.ports {
            let port_num = match port.portid.as_deref() {
                Some(raw) => match raw.trim().parse::<u16>() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(ip = %ip, portid = ?port.portid, "unparseable portid, row skipped");
                        continue;
                    }
                },
                None => {
                    warn!(ip = %ip, "port without portid, row skipped");
                    continue;
                }
            };
            let state = port
                .state
                .as_ref()
                .and_then(|s| s.state.clone())
                .unwrap_or_default();
            let service = port
                .service
                .as_ref()
                .and_then(|s| s.name.clone())
                .unwrap_or_default();
            let product = port
                .service
                .as_ref()
                .and_then(|s| s.product.clone())
                .unwrap_or_default();
            let version = port
                .service
                .as_ref()
                .and_then(|s| s.version.clone())
                .unwrap_or_default();

            // Tag-once-per-host gate: only the first reported port may
            // produce suggestions within an import.
            if !tagged {
                let suggestion =
                    suggest_tags(&ip, Some(port_num), &service, vendor.as_deref(), Some(&os_match));
                if !suggestion.device.is_empty()
                    && session_tags.device.is_empty()
                    && global_tags.device.is_empty()
                {
                    set_tag(
                        conn,
                        session_id,
                        &ip,
                        mac_addr.as_deref(),
                        TagKind::Device,
                        &suggestion.device,
                    )?;
                }
                if !suggestion.service.is_empty()
                    && session_tags.service.is_empty()
                    && global_tags.service.is_empty()
                {
                    set_tag(
                        conn,
                        session_id,
                        &ip,
                        mac_addr.as_deref(),
                        TagKind::Service,
                        &suggestion.service,
                    )?;
                }
                tagged = true;
            }

            let risk_score = risk::score(Some(port_num), &service);
            debug!(ip = %ip, port = port_num, service = %service, risk_score, "scored port");

            insert_result(
                conn,
                session_id,
                &ResultRow {
                    ip: ip.clone(),
                    hostname: hostname.clone(),
                    mac_addr: mac_addr.clone(),
                    vendor: vendor.clone(),
                    protocol: port.protocol.clone().unwrap_or_default(),
                    port: Some(port_num),
                    state,
                    service,
                    product,
                    version,
                    os: os_match.clone(),
                    cpe: cpe.clone(),
                    uptime: uptime.clone(),
                    last_boot: last_boot.clone(),
                    script: port.script_output(),
                    risk_score,
                },
            )?;
            inserted += 1;
        }
    }

    // Host answered but exposed nothing usable: one sentinel row.
    if inserted == 0 {
        insert_result(
            conn,
            session_id,
            &ResultRow {
                ip: ip.clone(),
                hostname,
                mac_addr,
                vendor,
                protocol: String::new(),
                port: None,
                state: SENTINEL_STATE.to_string(),
                service: SENTINEL_SERVICE.to_string(),
                product: String::new(),
                version: String::new(),
                os: os_match,
                cpe,
                uptime,
                last_boot,
                script: String::new(),
                risk_score: risk::score(None, SENTINEL_SERVICE),
            },
        )?;
        inserted = 1;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_store::get_tags;
    use std::path::PathBuf;

    fn src() -> PathBuf {
        PathBuf::from("scan_full_2026-08-01T10:00:00.xml")
    }

    fn import(db: &mut Db, xml: &str) -> SessionId {
        import_report(db, xml, &src(), None, None).unwrap()
    }

    const NO_PORTS: &str = r#"<nmaprun>
        <host><status state="up"/>
            <address addr="10.0.0.1" addrtype="ipv4"/>
        </host>
    </nmaprun>"#;

    const TWO_HOSTS: &str = r#"<nmaprun>
        <host><status state="up"/>
            <address addr="10.0.0.5" addrtype="ipv4"/>
            <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac" vendor="Cisco Systems"/>
            <hostnames><hostname name="gw.lan"/></hostnames>
            <os><osmatch name="Linux 5.4"><cpe>cpe:/o:linux:linux_kernel:5.4</cpe></osmatch></os>
            <uptime seconds="12345" lastboot="Fri Aug  1 09:00:00 2026"/>
            <ports>
                <port protocol="tcp" portid="22">
                    <state state="open"/>
                    <service name="ssh" product="OpenSSH" version="8.9"/>
                    <script output="banner one"/>
                    <script output="banner two"/>
                </port>
                <port protocol="tcp" portid="80">
                    <state state="open"/>
                    <service name="http"/>
                </port>
            </ports>
        </host>
        <host><status state="down"/>
            <address addr="10.0.0.6" addrtype="ipv4"/>
        </host>
    </nmaprun>"#;

    #[test]
    fn host_without_ports_gets_one_sentinel_row() {
        let mut db = Db::open_in_memory().unwrap();
        let sid = import(&mut db, NO_PORTS);
        let rows = db.scan_details(sid, None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ip, "10.0.0.1");
        assert_eq!(rows[0].port, None);
        assert_eq!(rows[0].state, SENTINEL_STATE);
        assert_eq!(rows[0].service, SENTINEL_SERVICE);
        assert_eq!(rows[0].risk_score, 1);
    }

    #[test]
    fn down_hosts_are_skipped() {
        let mut db = Db::open_in_memory().unwrap();
        let sid = import(&mut db, TWO_HOSTS);
        let rows = db.scan_details(sid, None, None, None).unwrap();
        assert!(rows.iter().all(|r| r.ip == "10.0.0.5"));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn fields_are_extracted_per_port() {
        let mut db = Db::open_in_memory().unwrap();
        let sid = import(&mut db, TWO_HOSTS);
        let ssh = db
            .result_for_port(sid, "10.0.0.5", 22)
            .unwrap()
            .expect("ssh row");
        assert_eq!(ssh.hostname, "gw.lan");
        assert_eq!(ssh.mac_addr.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(ssh.vendor.as_deref(), Some("Cisco Systems"));
        assert_eq!(ssh.protocol, "tcp");
        assert_eq!(ssh.state, "open");
        assert_eq!(ssh.product, "OpenSSH");
        assert_eq!(ssh.version, "8.9");
        assert_eq!(ssh.os, "Linux 5.4");
        assert_eq!(ssh.cpe, "cpe:/o:linux:linux_kernel:5.4");
        assert_eq!(ssh.uptime, "12345");
        assert_eq!(ssh.script, "banner one; banner two");
        // ssh on 22: 1 + 2 + 2
        assert_eq!(ssh.risk_score, 5);
    }

    #[test]
    fn importing_twice_yields_two_sessions_with_equal_counts() {
        let mut db = Db::open_in_memory().unwrap();
        let a = import(&mut db, TWO_HOSTS);
        let b = import(&mut db, TWO_HOSTS);
        assert_ne!(a, b);
        let ca = db.scan_details(a, None, None, None).unwrap().len();
        let cb = db.scan_details(b, None, None, None).unwrap().len();
        assert_eq!(ca, cb);
    }

    #[test]
    fn first_port_drives_tag_suggestion() {
        let mut db = Db::open_in_memory().unwrap();
        let sid = import(&mut db, TWO_HOSTS);
        let tags = get_tags(&db.conn, "10.0.0.5", None, Some(sid)).unwrap();
        // ssh is the first port: Linux Server / Remote Access.
        assert_eq!(tags.suggested.device, "Linux Server");
        assert_eq!(tags.suggested.service, "Remote Access");
        assert_eq!(tags.global.device, "Linux Server");
    }

    #[test]
    fn existing_global_tag_suppresses_suggestion() {
        let mut db = Db::open_in_memory().unwrap();
        let seed = insert_session(
            &db.conn,
            &SessionMeta {
                timestamp: "2026-07-01 09:00:00".into(),
                scan_type: "full".into(),
                source_path: None,
                log_path: None,
                log_text: None,
            },
        )
        .unwrap();
        set_tag(&db.conn, seed, "10.0.0.5", None, TagKind::Device, "Core Switch").unwrap();
        import(&mut db, TWO_HOSTS);
        let tag = get_global_tag(&db.conn, "10.0.0.5").unwrap().unwrap();
        assert_eq!(tag.device, "Core Switch");
        // The service field had no prior label, so that one lands.
        assert_eq!(tag.service, "Remote Access");
    }

    #[test]
    fn later_ports_never_improve_the_suggestion() {
        // First port matches no rule, so the host ends the import
        // untagged even though port 22 would have matched.
        let xml = r#"<nmaprun>
            <host><status state="up"/>
                <address addr="10.0.0.7" addrtype="ipv4"/>
                <ports>
                    <port protocol="tcp" portid="49152">
                        <state state="open"/>
                    </port>
                    <port protocol="tcp" portid="22">
                        <state state="open"/>
                        <service name="ssh"/>
                    </port>
                </ports>
            </host>
        </nmaprun>"#;
        let mut db = Db::open_in_memory().unwrap();
        let sid = import(&mut db, xml);
        let tags = get_tags(&db.conn, "10.0.0.7", None, Some(sid)).unwrap();
        assert!(tags.suggested.device.is_empty());
        assert!(tags.suggested.service.is_empty());
    }

    #[test]
    fn bad_portid_skips_row_not_import() {
        let xml = r#"<nmaprun>
            <host><status state="up"/>
                <address addr="10.0.0.8" addrtype="ipv4"/>
                <ports>
                    <port protocol="tcp" portid="junk">
                        <state state="open"/>
                    </port>
                    <port protocol="tcp" portid="80">
                        <state state="open"/>
                        <service name="http"/>
                    </port>
                </ports>
            </host>
        </nmaprun>"#;
        let mut db = Db::open_in_memory().unwrap();
        let sid = import(&mut db, xml);
        let rows = db.scan_details(sid, None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].port, Some(80));
    }

    #[test]
    fn malformed_report_is_a_parse_error() {
        let mut db = Db::open_in_memory().unwrap();
        let err = import_report(&mut db, "<nmaprun><host>", &src(), None, None);
        assert!(matches!(err, Err(ImportError::Parse(_))));
        // Nothing committed.
        let sessions: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM scan_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(sessions, 0);
    }

    #[test]
    fn missing_ipv4_falls_back_to_unknown() {
        let xml = r#"<nmaprun>
            <host><status state="up"/></host>
        </nmaprun>"#;
        let mut db = Db::open_in_memory().unwrap();
        let sid = import(&mut db, xml);
        let rows = db.scan_details(sid, None, None, None).unwrap();
        assert_eq!(rows[0].ip, "unknown");
    }

    #[test]
    fn provenance_from_conforming_name() {
        let (scan_type, timestamp) =
            provenance(Path::new("/tmp/scan_full_2026-08-01T10:00:00.xml"));
        assert_eq!(scan_type, "full");
        assert_eq!(timestamp, "2026-08-01 10:00:00");
    }

    #[test]
    fn provenance_fallback_is_custom() {
        let (scan_type, timestamp) = provenance(Path::new("report.xml"));
        assert_eq!(scan_type, "custom");
        assert!(!timestamp.is_empty());
    }
}

use crate::error::StoreError;
use crate::models::{ResultRow, SessionId, SessionRow, SessionSummary};
use crate::open::Db;
use netwatch_core::normalize_mac;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};

fn row_to_result(r: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        ip: r.get(0)?,
        hostname: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        mac_addr: r.get(2)?,
        vendor: r.get(3)?,
        protocol: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
        port: r.get(5)?,
        state: r.get::<_, Option<String>>(6)?.unwrap_or_default(),
        service: r.get::<_, Option<String>>(7)?.unwrap_or_default(),
        product: r.get::<_, Option<String>>(8)?.unwrap_or_default(),
        version: r.get::<_, Option<String>>(9)?.unwrap_or_default(),
        os: r.get::<_, Option<String>>(10)?.unwrap_or_default(),
        cpe: r.get::<_, Option<String>>(11)?.unwrap_or_default(),
        uptime: r.get::<_, Option<String>>(12)?.unwrap_or_default(),
        last_boot: r.get::<_, Option<String>>(13)?.unwrap_or_default(),
        script: r.get::<_, Option<String>>(14)?.unwrap_or_default(),
        risk_score: r.get::<_, i64>(15)? as u32,
    })
}

const RESULT_COLUMNS: &str = "ip, hostname, mac_addr, vendor, protocol, port, state, service, \
     product, version, os, cpe, uptime, last_boot, script, risk_score";

impl Db {
    /// List sessions, newest first, with optional substring filters.
    pub fn session_summaries(
        &self,
        scan_type: Option<&str>,
        timestamp: Option<&str>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        let mut sql = "SELECT id, timestamp, scan_type FROM scan_sessions WHERE 1=1".to_string();
        let mut args: Vec<String> = Vec::new();
        if let Some(t) = scan_type {
            sql.push_str(" AND scan_type LIKE ?");
            args.push(format!("%{t}%"));
        }
        if let Some(ts) = timestamp {
            sql.push_str(" AND timestamp LIKE ?");
            args.push(format!("%{ts}%"));
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                timestamp: r.get(1)?,
                scan_type: r.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Timestamp and scan_type for a session, if it exists.
    pub fn session_info(&self, id: SessionId) -> Result<Option<(String, String)>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT timestamp, scan_type FROM scan_sessions WHERE id = ?",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn session_exists(&self, id: SessionId) -> Result<bool, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM scan_sessions WHERE id = ?",
            [id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Full result rows for a session, ordered by ip then port, with
    /// optional ip/port/service filters.
    pub fn scan_details(
        &self,
        session_id: SessionId,
        ip: Option<&str>,
        port: Option<u16>,
        service: Option<&str>,
    ) -> Result<Vec<ResultRow>, StoreError> {
        let mut sql = format!("SELECT {RESULT_COLUMNS} FROM scan_results WHERE session_id = ?");
        let mut args: Vec<String> = vec![session_id.to_string()];
        if let Some(ip) = ip {
            sql.push_str(" AND ip LIKE ?");
            args.push(format!("%{ip}%"));
        }
        if let Some(p) = port {
            sql.push_str(" AND port = ?");
            args.push(p.to_string());
        }
        if let Some(s) = service {
            sql.push_str(" AND service LIKE ?");
            args.push(format!("%{s}%"));
        }
        sql.push_str(" ORDER BY ip, port");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| row_to_result(r))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All result rows for one (session, ip).
    pub fn results_for_host(
        &self,
        session_id: SessionId,
        ip: &str,
    ) -> Result<Vec<ResultRow>, StoreError> {
        let sql =
            format!("SELECT {RESULT_COLUMNS} FROM scan_results WHERE session_id = ? AND ip = ?");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![session_id, ip], |r| row_to_result(r))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// One result row for an exact (session, ip, port), if present.
    pub fn result_for_port(
        &self,
        session_id: SessionId,
        ip: &str,
        port: u16,
    ) -> Result<Option<ResultRow>, StoreError> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM scan_results WHERE session_id = ? AND ip = ? AND port = ?"
        );
        let row = self
            .conn
            .query_row(&sql, params![session_id, ip, port], |r| row_to_result(r))
            .optional()?;
        Ok(row)
    }

    /// Distinct ips in a session plus an ip -> port-set map. Sentinel
    /// (NULL port) rows contribute the host but no port.
    pub fn hosts_and_ports(
        &self,
        session_id: SessionId,
    ) -> Result<(BTreeSet<String>, BTreeMap<String, BTreeSet<u16>>), StoreError> {
        let mut hosts = BTreeSet::new();
        let mut port_map: BTreeMap<String, BTreeSet<u16>> = BTreeMap::new();

        let mut stmt = self
            .conn
            .prepare("SELECT ip, port FROM scan_results WHERE session_id = ?")?;
        let rows = stmt.query_map([session_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Option<u16>>(1)?))
        })?;
        for row in rows {
            let (ip, port) = row?;
            if let Some(p) = port {
                port_map.entry(ip.clone()).or_default().insert(p);
            }
            hosts.insert(ip);
        }
        Ok((hosts, port_map))
    }

    pub fn distinct_ips(&self, session_id: SessionId) -> Result<BTreeSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT ip FROM scan_results WHERE session_id = ? AND ip != ''")?;
        let rows = stmt.query_map([session_id], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    /// Aggregate counters for one session.
    pub fn session_summary(&self, session_id: SessionId) -> Result<SessionSummary, StoreError> {
        let total_hosts: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT ip) FROM scan_results WHERE session_id = ?",
            [session_id],
            |r| r.get(0),
        )?;
        let total_ports: i64 = self.conn.query_row(
            "SELECT COUNT(port) FROM scan_results WHERE session_id = ?",
            [session_id],
            |r| r.get(0),
        )?;
        let open_ports: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scan_results WHERE session_id = ? AND state = 'open'",
            [session_id],
            |r| r.get(0),
        )?;
        let unique_services: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT service) FROM scan_results WHERE session_id = ?",
            [session_id],
            |r| r.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT port, COUNT(*) FROM scan_results WHERE session_id = ?
             GROUP BY port ORDER BY COUNT(*) DESC LIMIT 10",
        )?;
        let top_ports = stmt
            .query_map([session_id], |r| {
                Ok((r.get::<_, Option<u16>>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT service, COUNT(*) FROM scan_results WHERE session_id = ?
             GROUP BY service ORDER BY COUNT(*) DESC LIMIT 10",
        )?;
        let top_services = stmt
            .query_map([session_id], |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    r.get::<_, i64>(1)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SessionSummary {
            total_hosts,
            total_ports,
            open_ports,
            unique_services,
            top_ports,
            top_services,
        })
    }

    /// Open (port, service) rows for risk aggregation, optionally for
    /// one host.
    pub fn host_risk_rows(
        &self,
        session_id: SessionId,
        ip: Option<&str>,
    ) -> Result<Vec<(String, Option<u16>, String)>, StoreError> {
        let mut sql = "SELECT ip, port, service FROM scan_results
             WHERE session_id = ? AND state = 'open'"
            .to_string();
        let mut args: Vec<String> = vec![session_id.to_string()];
        if let Some(ip) = ip {
            sql.push_str(" AND ip = ?");
            args.push(ip.to_string());
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<u16>>(1)?,
                r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            ))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Hostname and mac for a host in a session, from any of its rows.
    pub fn host_header(
        &self,
        session_id: SessionId,
        ip: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT hostname, mac_addr FROM scan_results
                 WHERE session_id = ? AND ip = ? LIMIT 1",
                params![session_id, ip],
                |r| {
                    Ok((
                        r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Trusted-device status from the read-only user_network table,
    /// looked up by normalized MAC. Defaults to "unknown".
    pub fn trusted_status(&self, mac: &str) -> Result<String, StoreError> {
        let mac = normalize_mac(mac);
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM user_network
                 WHERE REPLACE(REPLACE(UPPER(mac_addr), ':', ''), '-', '') = ?",
                [mac],
                |r| r.get(0),
            )
            .optional()?;
        Ok(status.unwrap_or_else(|| "unknown".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultRow, SessionMeta};
    use crate::session::{insert_result, insert_session};

    fn seed(db: &Db) -> SessionId {
        let sid = insert_session(
            &db.conn,
            &SessionMeta {
                timestamp: "2026-08-01 10:00:00".into(),
                scan_type: "full".into(),
                source_path: None,
                log_path: None,
                log_text: None,
            },
        )
        .unwrap();
        for (ip, port, state, service) in [
            ("10.0.0.1", Some(80), "open", "http"),
            ("10.0.0.1", Some(22), "open", "ssh"),
            ("10.0.0.2", None, "filtered", "All ports filtered or closed"),
        ] {
            insert_result(
                &db.conn,
                sid,
                &ResultRow {
                    ip: ip.into(),
                    port,
                    state: state.into(),
                    service: service.into(),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        sid
    }

    #[test]
    fn summary_counts_sentinels_as_hosts_not_ports() {
        let db = Db::open_in_memory().unwrap();
        let sid = seed(&db);
        let s = db.session_summary(sid).unwrap();
        assert_eq!(s.total_hosts, 2);
        // COUNT(port) skips the NULL sentinel.
        assert_eq!(s.total_ports, 2);
        assert_eq!(s.open_ports, 2);
    }

    #[test]
    fn hosts_and_ports_excludes_sentinel_ports() {
        let db = Db::open_in_memory().unwrap();
        let sid = seed(&db);
        let (hosts, port_map) = db.hosts_and_ports(sid).unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(port_map.contains_key("10.0.0.1"));
        assert!(!port_map.contains_key("10.0.0.2"));
    }

    #[test]
    fn detail_filters_apply() {
        let db = Db::open_in_memory().unwrap();
        let sid = seed(&db);
        let all = db.scan_details(sid, None, None, None).unwrap();
        assert_eq!(all.len(), 3);
        let ssh = db.scan_details(sid, None, Some(22), None).unwrap();
        assert_eq!(ssh.len(), 1);
        assert_eq!(ssh[0].service, "ssh");
        let host1 = db.scan_details(sid, Some("10.0.0.1"), None, None).unwrap();
        assert_eq!(host1.len(), 2);
    }

    #[test]
    fn session_listing_filters() {
        let db = Db::open_in_memory().unwrap();
        seed(&db);
        assert_eq!(db.session_summaries(Some("full"), None).unwrap().len(), 1);
        assert_eq!(db.session_summaries(Some("quick"), None).unwrap().len(), 0);
    }

    #[test]
    fn trusted_status_defaults_unknown() {
        let db = Db::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO user_network (device_name, ip, mac_addr, status)
                 VALUES ('nas', '10.0.0.9', 'AA:BB:CC:00:11:22', 'safe')",
                [],
            )
            .unwrap();
        assert_eq!(db.trusted_status("aa-bb-cc-00-11-22").unwrap(), "safe");
        assert_eq!(db.trusted_status("ff:ff:ff:ff:ff:ff").unwrap(), "unknown");
    }
}

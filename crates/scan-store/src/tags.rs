use crate::error::StoreError;
use crate::models::{GlobalTag, HostTags, SessionId, TagKind};
use netwatch_core::normalize_mac;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

/// Upsert a tag suggestion for a host: the session-scoped row keyed by
/// (session_id, ip, tag_type) and the persistent global_tags row keyed
/// by (ip, normalized mac). The global upsert only touches the column
/// matching `kind`; the sibling column is carried forward via a
/// COALESCE subquery so it is never blanked. Idempotent.
pub fn set_tag(
    conn: &Connection,
    session_id: SessionId,
    ip: &str,
    mac: Option<&str>,
    kind: TagKind,
    value: &str,
) -> Result<(), StoreError> {
    let mac = normalize_mac(mac.unwrap_or(""));

    // A label written before the host's MAC was known lives under
    // (ip, ''). Re-key it so the host keeps a single global row; if a
    // keyed row already exists, fill only its empty columns and drop
    // the stale one.
    if !mac.is_empty() {
        let unkeyed = conn
            .query_row(
                "SELECT device_tag, service_tag FROM global_tags
                 WHERE ip = ? AND mac_addr = ''",
                [ip],
                |r| {
                    Ok(GlobalTag {
                        device: r.get(0)?,
                        service: r.get(1)?,
                    })
                },
            )
            .optional()?;
        if let Some(old) = unkeyed {
            conn.execute(
                "DELETE FROM global_tags WHERE ip = ? AND mac_addr = ''",
                [ip],
            )?;
            conn.execute(
                "INSERT INTO global_tags (ip, mac_addr, device_tag, service_tag)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(ip, mac_addr) DO UPDATE SET
                     device_tag = CASE WHEN device_tag = ''
                         THEN excluded.device_tag ELSE device_tag END,
                     service_tag = CASE WHEN service_tag = ''
                         THEN excluded.service_tag ELSE service_tag END",
                params![ip, mac, old.device, old.service],
            )?;
        }
    }

    conn.execute(
        "INSERT INTO tags (session_id, ip, tag_type, tag_value)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(session_id, ip, tag_type)
         DO UPDATE SET tag_value = excluded.tag_value",
        params![session_id, ip, kind.as_str(), value],
    )?;

    match kind {
        TagKind::Device => {
            conn.execute(
                "INSERT INTO global_tags (ip, mac_addr, device_tag, service_tag)
                 VALUES (?, ?, ?, COALESCE((
                     SELECT service_tag FROM global_tags
                     WHERE ip = ? AND mac_addr = ?
                 ), ''))
                 ON CONFLICT(ip, mac_addr)
                 DO UPDATE SET device_tag = excluded.device_tag",
                params![ip, mac, value, ip, mac],
            )?;
        }
        TagKind::Service => {
            conn.execute(
                "INSERT INTO global_tags (ip, mac_addr, device_tag, service_tag)
                 VALUES (?, ?, COALESCE((
                     SELECT device_tag FROM global_tags
                     WHERE ip = ? AND mac_addr = ?
                 ), ''), ?)
                 ON CONFLICT(ip, mac_addr)
                 DO UPDATE SET service_tag = excluded.service_tag",
                params![ip, mac, ip, mac, value],
            )?;
        }
    }
    debug!(session_id, ip, kind = kind.as_str(), value, "set tag");
    Ok(())
}

/// Suggested tags already recorded for an ip, across sessions. Used by
/// the importer as a "don't re-suggest" gate.
pub fn get_session_tags(conn: &Connection, ip: &str) -> Result<GlobalTag, StoreError> {
    let mut stmt = conn.prepare("SELECT tag_type, tag_value FROM tags WHERE ip = ?")?;
    let mut out = GlobalTag::default();
    let rows = stmt.query_map([ip], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (kind, value) = row?;
        match kind.as_str() {
            "device" => out.device = value,
            "service" => out.service = value,
            _ => {}
        }
    }
    Ok(out)
}

/// Confirmed global tags for an ip (any mac). Rows carrying a MAC win
/// over a leftover unkeyed row.
pub fn get_global_tag(conn: &Connection, ip: &str) -> Result<Option<GlobalTag>, StoreError> {
    let row = conn
        .query_row(
            "SELECT device_tag, service_tag FROM global_tags WHERE ip = ?
             ORDER BY mac_addr DESC LIMIT 1",
            [ip],
            |r| {
                Ok(GlobalTag {
                    device: r.get(0)?,
                    service: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Global and suggested tags for a host, with the original lookup
/// fallbacks: resolve a missing mac from scan_results when a session
/// is given, try (ip, mac) first, then ip alone.
pub fn get_tags(
    conn: &Connection,
    ip: &str,
    mac: Option<&str>,
    session_id: Option<SessionId>,
) -> Result<HostTags, StoreError> {
    let mut mac = mac.map(normalize_mac).unwrap_or_default();
    if mac.is_empty() {
        if let Some(sid) = session_id {
            let found: Option<String> = conn
                .query_row(
                    "SELECT mac_addr FROM scan_results
                     WHERE session_id = ? AND ip = ? AND mac_addr IS NOT NULL AND mac_addr != ''
                     ORDER BY id DESC LIMIT 1",
                    params![sid, ip],
                    |r| r.get(0),
                )
                .optional()?;
            mac = found.map(|m| normalize_mac(&m)).unwrap_or_default();
        }
    }

    let mut global: Option<GlobalTag> = None;
    if !mac.is_empty() {
        global = conn
            .query_row(
                "SELECT device_tag, service_tag FROM global_tags WHERE ip = ? AND mac_addr = ?",
                params![ip, mac],
                |r| {
                    Ok(GlobalTag {
                        device: r.get(0)?,
                        service: r.get(1)?,
                    })
                },
            )
            .optional()?;
    }
    if global.is_none() {
        global = get_global_tag(conn, ip)?;
    }

    Ok(HostTags {
        global: global.unwrap_or_default(),
        suggested: get_session_tags(conn, ip)?,
    })
}

/// Delete global tags by ip, mac, or both. MAC comparison is loose:
/// both sides are uppercased with ':' and '-' stripped, so rows stored
/// with separators still match. Returns the number of rows removed.
pub fn delete_global_tag(
    conn: &Connection,
    ip: Option<&str>,
    mac: Option<&str>,
) -> Result<usize, StoreError> {
    let mac = mac.map(normalize_mac).filter(|m| !m.is_empty());
    let ip = ip.map(str::trim).filter(|s| !s.is_empty());

    let n = match (ip, mac) {
        (Some(ip), Some(mac)) => conn.execute(
            "DELETE FROM global_tags
             WHERE ip = ?
               AND REPLACE(REPLACE(UPPER(mac_addr), ':', ''), '-', '') = ?",
            params![ip, mac],
        )?,
        (Some(ip), None) => conn.execute("DELETE FROM global_tags WHERE ip = ?", [ip])?,
        (None, Some(mac)) => conn.execute(
            "DELETE FROM global_tags
             WHERE REPLACE(REPLACE(UPPER(mac_addr), ':', ''), '-', '') = ?",
            [mac],
        )?,
        (None, None) => {
            return Err(StoreError::Other(
                "delete_global_tag needs an ip or a mac".into(),
            ))
        }
    };
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionMeta;
    use crate::open::Db;
    use crate::session::insert_session;

    const IP: &str = "10.0.0.5";
    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn session(db: &Db) -> SessionId {
        insert_session(
            &db.conn,
            &SessionMeta {
                timestamp: "2026-08-01 10:00:00".into(),
                scan_type: "full".into(),
                source_path: None,
                log_path: None,
                log_text: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn second_kind_preserves_first() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Device, "Router").unwrap();
        set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Service, "VPN").unwrap();

        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM global_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        let tag = get_global_tag(&db.conn, IP).unwrap().unwrap();
        assert_eq!(tag.device, "Router");
        assert_eq!(tag.service, "VPN");
    }

    #[test]
    fn idempotent_upsert() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        for _ in 0..3 {
            set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Device, "Router").unwrap();
        }
        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM global_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        let session_rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(session_rows, 1);
    }

    #[test]
    fn late_mac_rekeys_the_unkeyed_row() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        // Device label arrives before the MAC is known, service after.
        set_tag(&db.conn, sid, IP, None, TagKind::Device, "Router").unwrap();
        set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Service, "VPN").unwrap();

        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM global_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        let tag = get_global_tag(&db.conn, IP).unwrap().unwrap();
        assert_eq!(tag.device, "Router");
        assert_eq!(tag.service, "VPN");
    }

    #[test]
    fn rekey_fills_only_empty_columns() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Device, "Router").unwrap();
        // Simulate a stale unkeyed row left over from an older write.
        db.conn
            .execute(
                "INSERT INTO global_tags (ip, mac_addr, device_tag, service_tag)
                 VALUES (?, '', 'Printer', 'Legacy')",
                [IP],
            )
            .unwrap();
        set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Service, "VPN").unwrap();

        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM global_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        // The keyed device label wins; the upsert then lands the
        // service label over the folded-in stale value.
        let tag = get_global_tag(&db.conn, IP).unwrap().unwrap();
        assert_eq!(tag.device, "Router");
        assert_eq!(tag.service, "VPN");
    }

    #[test]
    fn session_tag_upsert_replaces_value() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        set_tag(&db.conn, sid, IP, None, TagKind::Device, "Printer").unwrap();
        set_tag(&db.conn, sid, IP, None, TagKind::Device, "Router").unwrap();
        let tags = get_session_tags(&db.conn, IP).unwrap();
        assert_eq!(tags.device, "Router");
    }

    #[test]
    fn mac_forms_normalize_to_one_row() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        set_tag(&db.conn, sid, IP, Some("aa:bb:cc:dd:ee:ff"), TagKind::Device, "Router").unwrap();
        set_tag(&db.conn, sid, IP, Some("AA-BB-CC-DD-EE-FF"), TagKind::Service, "VPN").unwrap();
        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM global_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn loose_mac_delete() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Device, "Router").unwrap();
        let n = delete_global_tag(&db.conn, None, Some("aa-bb-cc-dd-ee-ff")).unwrap();
        assert_eq!(n, 1);
        assert!(get_global_tag(&db.conn, IP).unwrap().is_none());
    }

    #[test]
    fn delete_requires_a_key() {
        let db = Db::open_in_memory().unwrap();
        assert!(delete_global_tag(&db.conn, None, None).is_err());
    }

    #[test]
    fn get_tags_falls_back_to_ip_only() {
        let db = Db::open_in_memory().unwrap();
        let sid = session(&db);
        set_tag(&db.conn, sid, IP, Some(MAC), TagKind::Device, "Router").unwrap();
        let tags = get_tags(&db.conn, IP, Some("00:00:00:00:00:00"), None).unwrap();
        assert_eq!(tags.global.device, "Router");
    }
}

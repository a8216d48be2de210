use crate::error::StoreError;
use crate::models::{ResultRow, SessionId, SessionMeta};
use rusqlite::{params, Connection};
use tracing::{debug, info};

/// Insert one scan session and return its id. Callers own the
/// transaction boundary: pass a connection with an open transaction so
/// the session row and its results become visible together.
pub fn insert_session(conn: &Connection, meta: &SessionMeta) -> Result<SessionId, StoreError> {
    conn.execute(
        "INSERT INTO scan_sessions (timestamp, scan_type, source_path, log_path, log_text)
         VALUES (?, ?, ?, ?, ?)",
        params![
            meta.timestamp,
            meta.scan_type,
            meta.source_path,
            meta.log_path,
            meta.log_text
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!(session_id = id, scan_type = %meta.scan_type, "inserted scan session");
    Ok(id)
}

/// Insert one scan_results row for a session.
pub fn insert_result(
    conn: &Connection,
    session_id: SessionId,
    row: &ResultRow,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO scan_results (
            session_id, ip, hostname, mac_addr, vendor,
            protocol, port, state, service, product,
            version, os, cpe, uptime, last_boot, script, risk_score
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            session_id,
            row.ip,
            row.hostname,
            row.mac_addr,
            row.vendor,
            row.protocol,
            row.port,
            row.state,
            row.service,
            row.product,
            row.version,
            row.os,
            row.cpe,
            row.uptime,
            row.last_boot,
            row.script,
            row.risk_score,
        ],
    )?;
    Ok(())
}

/// Delete a session. Cascades to its scan_results and session tags;
/// global_tags are untouched. Returns true if a row was deleted.
pub fn delete_session(conn: &Connection, session_id: SessionId) -> Result<bool, StoreError> {
    let n = conn.execute("DELETE FROM scan_sessions WHERE id = ?", [session_id])?;
    debug!(session_id, deleted = n, "delete session");
    Ok(n > 0)
}

/// Delete scan_results whose session no longer exists, then compact
/// the database. Returns the number of rows removed.
pub fn delete_orphaned_results(conn: &Connection) -> Result<usize, StoreError> {
    let n = conn.execute(
        "DELETE FROM scan_results WHERE session_id NOT IN (SELECT id FROM scan_sessions)",
        [],
    )?;
    conn.execute_batch("VACUUM")?;
    info!(deleted = n, "orphan cleanup");
    Ok(n)
}

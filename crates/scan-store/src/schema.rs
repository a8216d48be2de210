pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE scan_sessions (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  timestamp       TEXT NOT NULL,
  scan_type       TEXT NOT NULL,
  source_path     TEXT,
  log_path        TEXT,
  log_text        TEXT
);

-- port is nullable: a NULL-port row is the sentinel "host reachable,
-- no open ports found" entry (state 'filtered').
CREATE TABLE scan_results (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id      INTEGER NOT NULL REFERENCES scan_sessions(id) ON DELETE CASCADE,
  ip              TEXT NOT NULL,
  hostname        TEXT,
  mac_addr        TEXT,
  vendor          TEXT,
  protocol        TEXT,
  port            INTEGER,
  state           TEXT,
  service         TEXT,
  product         TEXT,
  version         TEXT,
  os              TEXT,
  cpe             TEXT,
  uptime          TEXT,
  last_boot       TEXT,
  script          TEXT,
  risk_score      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE tags (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id      INTEGER NOT NULL REFERENCES scan_sessions(id) ON DELETE CASCADE,
  ip              TEXT NOT NULL,
  tag_type        TEXT NOT NULL CHECK (tag_type IN ('device','service')),
  tag_value       TEXT NOT NULL,
  UNIQUE (session_id, ip, tag_type)
);

CREATE TABLE global_tags (
  ip              TEXT NOT NULL,
  mac_addr        TEXT NOT NULL DEFAULT '',
  device_tag      TEXT NOT NULL DEFAULT '',
  service_tag     TEXT NOT NULL DEFAULT '',
  PRIMARY KEY (ip, mac_addr)
);

CREATE TABLE user_network (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  device_name     TEXT NOT NULL,
  ip              TEXT,
  mac_addr        TEXT NOT NULL UNIQUE,
  status          TEXT NOT NULL DEFAULT 'unknown' CHECK (status IN ('safe','temporary','unknown'))
);

CREATE TABLE uploads (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  filename        TEXT,
  upload_time     TEXT,
  session_id      INTEGER REFERENCES scan_sessions(id) ON DELETE SET NULL
);

CREATE INDEX idx_results_session ON scan_results(session_id);
CREATE INDEX idx_results_session_ip ON scan_results(session_id, ip);
CREATE INDEX idx_tags_session ON tags(session_id);

COMMIT;
"#;

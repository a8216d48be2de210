use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scan_diff::SessionDiff;
use scan_store::{
    delete_global_tag, delete_orphaned_results, delete_session, set_tag, Db, SessionId, TagKind,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;

/// Printed on stdout when an import produced no session.
const NO_SESSION_SENTINEL: &str = "ERROR:NO_SESSION_ID";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "netwatch", version, about = "Network scan ingestion, scoring, and diffing")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./netwatch.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path (overrides config; default netwatch.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Import a scan report; prints the new session id
    Import {
        /// Path to the XML report
        xml: PathBuf,
        /// Companion log file. Default: log_*.txt next to the report.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Compare two sessions
    Diff {
        old_id: SessionId,
        new_id: SessionId,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List scan sessions
    Sessions {
        #[arg(long)]
        scan_type: Option<String>,
        #[arg(long)]
        timestamp: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show result rows for a session
    Results {
        session: SessionId,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        service: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Aggregate counters and per-host risk for a session
    Summary {
        session: SessionId,
    },
    /// Manage device/service tags
    Tag {
        #[command(subcommand)]
        cmd: TagCmd,
    },
    /// Delete a session and everything it owns
    DeleteSession {
        id: SessionId,
    },
    /// Remove result rows whose session no longer exists
    Cleanup,
}

#[derive(Debug, Subcommand)]
enum TagCmd {
    /// Set a tag for a host (session suggestion + global label)
    Set {
        session: SessionId,
        ip: String,
        kind: TagKind,
        value: String,
        #[arg(long)]
        mac: Option<String>,
    },
    /// Delete global tags by ip and/or mac
    Delete {
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        mac: Option<String>,
    },
}

fn open_db(path: &Path) -> Result<Db> {
    Ok(Db::open_or_create(path)?)
}

/// The single stdout token for an import: the session id on success,
/// the sentinel on any failure, opening the store included.
fn import_output(db_path: &Path, xml: &Path, log: Option<PathBuf>) -> String {
    match open_db(db_path).and_then(|mut db| run_import(&mut db, xml, log)) {
        Ok(id) => id.to_string(),
        Err(e) => {
            eprintln!("import failed: {e}");
            NO_SESSION_SENTINEL.to_string()
        }
    }
}

/// Infer the companion log path from the report name:
/// scan_full_...xml -> log_full_...txt in the same directory.
fn infer_log_path(xml: &Path) -> Option<PathBuf> {
    let name = xml.file_name()?.to_string_lossy();
    let log_name = name.replace("scan_", "log_").replace(".xml", ".txt");
    let candidate = xml.with_file_name(log_name);
    if candidate.exists() {
        Some(candidate)
    } else {
        None
    }
}

fn run_import(db: &mut Db, xml: &Path, log: Option<PathBuf>) -> Result<SessionId> {
    let xml_text = std::fs::read_to_string(xml)?;
    let log_path = log.or_else(|| infer_log_path(xml));
    let log_text = match &log_path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(path = %p.display(), error = %e, "failed to read log file");
                None
            }
        },
        None => None,
    };
    let id = report_import::import_report(db, &xml_text, xml, log_path.as_deref(), log_text)?;
    Ok(id)
}

fn print_diff_text(diff: &SessionDiff) {
    println!("Comparing session {} -> {}", diff.old_id, diff.new_id);
    println!("Added hosts:   {}", join_or_dash(&diff.added_hosts));
    println!("Removed hosts: {}", join_or_dash(&diff.removed_hosts));
    for host in &diff.changes {
        let mut header = host.ip.clone();
        if !host.hostname.is_empty() {
            header.push_str(&format!(" ({})", host.hostname));
        }
        if !host.mac.is_empty() {
            header.push_str(&format!(" [{}]", host.mac));
        }
        if !host.tags.is_empty() {
            header.push_str(&format!(" {}", host.tags.join(", ")));
        }
        println!("{header}");
        for delta in &host.ports {
            for change in &delta.changes {
                println!(
                    "  port {}: {}: {} -> {}",
                    delta.port, change.field, change.old, change.new
                );
            }
        }
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(cli.config.as_deref()).unwrap_or_default();
    let db_path = cli
        .db
        .clone()
        .or(cfg.db_path)
        .unwrap_or_else(|| PathBuf::from("netwatch.db"));

    match cli.command {
        Commands::Version => {
            println!("netwatch {}", netwatch_core::version());
        }
        Commands::Import { ref xml, ref log } => {
            let line = import_output(&db_path, xml, log.clone());
            println!("{line}");
            if line == NO_SESSION_SENTINEL {
                std::process::exit(1);
            }
        }
        Commands::Diff {
            old_id,
            new_id,
            format,
        } => {
            let db = open_db(&db_path)?;
            let diff = scan_diff::diff(&db, old_id, new_id)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&diff)?),
                OutputFormat::Text => print_diff_text(&diff),
            }
        }
        Commands::Sessions {
            ref scan_type,
            ref timestamp,
            format,
        } => {
            let db = open_db(&db_path)?;
            let sessions = db.session_summaries(scan_type.as_deref(), timestamp.as_deref())?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
                OutputFormat::Text => {
                    for s in sessions {
                        println!("{}\t{}\t{}", s.id, s.timestamp, s.scan_type);
                    }
                }
            }
        }
        Commands::Results {
            session,
            ref ip,
            port,
            ref service,
            format,
        } => {
            let db = open_db(&db_path)?;
            if db.session_info(session)?.is_none() {
                return Err(anyhow!("session {session} not found"));
            }
            let rows = db.scan_details(session, ip.as_deref(), port, service.as_deref())?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Text => {
                    for r in rows {
                        let port = r
                            .port
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "{}\t{}/{}\t{}\t{}\t{}\trisk={}",
                            r.ip, port, r.protocol, r.state, r.service, r.version, r.risk_score
                        );
                    }
                }
            }
        }
        Commands::Summary { session } => {
            let db = open_db(&db_path)?;
            if db.session_info(session)?.is_none() {
                return Err(anyhow!("session {session} not found"));
            }
            let summary = db.session_summary(session)?;
            println!("hosts: {}", summary.total_hosts);
            println!("ports: {}", summary.total_ports);
            println!("open:  {}", summary.open_ports);
            println!("distinct services: {}", summary.unique_services);

            let mut by_host: BTreeMap<String, Vec<(Option<u16>, String)>> = BTreeMap::new();
            for (ip, port, service) in db.host_risk_rows(session, None)? {
                by_host.entry(ip).or_default().push((port, service));
            }
            for (ip, rows) in by_host {
                let (total, reasons) = netwatch_core::risk::host_risk(&rows);
                println!("{ip}: risk {total}");
                for reason in reasons {
                    println!("  {}", reason.describe());
                }
            }
        }
        Commands::Tag { cmd } => {
            let db = open_db(&db_path)?;
            match cmd {
                TagCmd::Set {
                    session,
                    ip,
                    kind,
                    value,
                    mac,
                } => {
                    if db.session_info(session)?.is_none() {
                        return Err(anyhow!("session {session} not found"));
                    }
                    set_tag(&db.conn, session, &ip, mac.as_deref(), kind, &value)?;
                    println!("tagged {ip} {}={value}", kind.as_str());
                }
                TagCmd::Delete { ip, mac } => {
                    let n = delete_global_tag(&db.conn, ip.as_deref(), mac.as_deref())?;
                    println!("deleted {n} tag(s)");
                }
            }
        }
        Commands::DeleteSession { id } => {
            let db = open_db(&db_path)?;
            if delete_session(&db.conn, id)? {
                println!("deleted session {id}");
            } else {
                return Err(anyhow!("session {id} not found"));
            }
        }
        Commands::Cleanup => {
            let db = open_db(&db_path)?;
            let n = delete_orphaned_results(&db.conn)?;
            println!("removed {n} orphaned result row(s)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_emits_sentinel_when_store_cannot_open() {
        let db_path = std::env::temp_dir().join("netwatch-no-such-dir").join("x.db");
        let line = import_output(&db_path, Path::new("scan_full_t.xml"), None);
        assert_eq!(line, NO_SESSION_SENTINEL);
    }

    #[test]
    fn import_emits_sentinel_when_report_is_missing() {
        let db_path = std::env::temp_dir().join("netwatch-cli-test.db");
        let line = import_output(&db_path, Path::new("/no/such/scan_full_t.xml"), None);
        assert_eq!(line, NO_SESSION_SENTINEL);
        let _ = std::fs::remove_file(&db_path);
    }
}

fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout is reserved for command output
    // (the import contract's sole token in particular).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}

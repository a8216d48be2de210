//! Device/service tag suggestions for discovered hosts.
//!
//! Four ordered rule stages: IP suffix, port/service table, MAC vendor
//! substrings, OS fingerprint substrings. Each stage only fills a
//! field that is still empty, so earlier stages always win.

use serde::{Deserialize, Serialize};

/// A heuristic (device, service) label pair. Empty string means "no
/// suggestion for this field".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSuggestion {
    pub device: String,
    pub service: String,
}

impl TagSuggestion {
    pub fn is_empty(&self) -> bool {
        self.device.is_empty() && self.service.is_empty()
    }

    fn fill_device(&mut self, value: &str) {
        if self.device.is_empty() {
            self.device = value.to_string();
        }
    }

    fn fill_service(&mut self, value: &str) {
        if self.service.is_empty() {
            self.service = value.to_string();
        }
    }
}

/// One port/service rule: match on service name or port number, and
/// the labels it assigns (None leaves that field alone).
struct PortRule {
    services: &'static [&'static str],
    ports: &'static [u16],
    device: Option<&'static str>,
    service: Option<&'static str>,
}

const fn rule(
    services: &'static [&'static str],
    ports: &'static [u16],
    device: Option<&'static str>,
    service: Option<&'static str>,
) -> PortRule {
    PortRule {
        services,
        ports,
        device,
        service,
    }
}

/// Evaluated top to bottom; exactly the first matching rule fires.
const PORT_RULES: &[PortRule] = &[
    rule(&["printer"], &[9100], Some("Printer"), Some("Printing")),
    rule(&["http", "https"], &[80, 443], Some("Web Server"), Some("Web Service")),
    rule(&["ssh"], &[22], Some("Linux Server"), Some("Remote Access")),
    rule(&["smb"], &[445], None, Some("File Sharing")),
    rule(&["rdp", "ms-wbt-server"], &[3389], Some("Windows Server"), Some("Remote Desktop")),
    rule(&["mysql", "postgresql"], &[3306, 5432], None, Some("Database")),
    rule(&["snmp"], &[161], None, Some("Monitoring")),
];

/// MAC-vendor substring rules, most specific first. All substrings in
/// a rule must match (case-insensitive) for it to fire.
const VENDOR_RULES: &[(&[&str], &str)] = &[
    (&["hp", "printer"], "Printer"),
    (&["hp"], "HP Device"),
    (&["cisco"], "Router"),
    (&["ubiquiti"], "Access Point"),
    (&["apple"], "Apple Device"),
    (&["dell"], "Desktop"),
    (&["raspberry"], "IoT Device"),
    (&["mikrotik"], "Router"),
];

/// OS-fingerprint substring rules; any listed substring matches.
const OS_RULES: &[(&[&str], &str)] = &[
    (&["windows"], "Windows Host"),
    (&["linux", "ubuntu"], "Linux Host"),
    (&["routeros", "mikrotik"], "Router"),
    (&["nas"], "NAS Device"),
    (&["pfsense", "openbsd"], "Firewall"),
    (&["android"], "Mobile Device"),
];

/// Suggest (device, service) tags for one host observation.
///
/// Pure function, never fails; either or both fields may come back
/// empty when no rule applies.
pub fn suggest_tags(
    ip: &str,
    port: Option<u16>,
    service: &str,
    mac_vendor: Option<&str>,
    os_match: Option<&str>,
) -> TagSuggestion {
    let mut out = TagSuggestion::default();

    // Stage 1: IP suffix rules.
    if ip.ends_with(".1") {
        out.fill_device("Gateway");
    } else if ip.ends_with(".100") {
        out.fill_device("Main Host");
    }

    // Stage 2: first matching port/service rule fires, the rest are
    // skipped even if they would also match.
    let service_norm = service.trim().to_lowercase();
    for rule in PORT_RULES {
        let service_hit = rule.services.contains(&service_norm.as_str());
        let port_hit = port.map(|p| rule.ports.contains(&p)).unwrap_or(false);
        if service_hit || port_hit {
            if let Some(d) = rule.device {
                out.fill_device(d);
            }
            if let Some(s) = rule.service {
                out.fill_service(s);
            }
            break;
        }
    }

    // Stage 3: MAC vendor substrings, device only.
    if out.device.is_empty() {
        if let Some(vendor) = mac_vendor {
            let vendor = vendor.to_lowercase();
            for (needles, tag) in VENDOR_RULES {
                if needles.iter().all(|n| vendor.contains(n)) {
                    out.fill_device(tag);
                    break;
                }
            }
        }
    }

    // Stage 4: OS fingerprint substrings, device only.
    if out.device.is_empty() {
        if let Some(os) = os_match {
            let os = os.to_lowercase();
            for (needles, tag) in OS_RULES {
                if needles.iter().any(|n| os.contains(n)) {
                    out.fill_device(tag);
                    break;
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_ip_beats_port_rule() {
        // .1 suffix claims the device field before the ssh rule can.
        let s = suggest_tags("192.168.1.1", Some(22), "ssh", None, None);
        assert_eq!(s.device, "Gateway");
        assert_eq!(s.service, "Remote Access");
    }

    #[test]
    fn first_port_rule_wins() {
        // Port 9100 with service "http": printer rule is listed first
        // but only the first match fires, and "http" hits rule 2 only
        // when the printer rule does not match. Here both could match
        // (9100 port, http service); printer is evaluated first.
        let s = suggest_tags("10.0.0.7", Some(9100), "http", None, None);
        assert_eq!(s.device, "Printer");
        assert_eq!(s.service, "Printing");
    }

    #[test]
    fn web_rule_sets_both_fields() {
        let s = suggest_tags("10.0.0.7", Some(443), "https", None, None);
        assert_eq!(s.device, "Web Server");
        assert_eq!(s.service, "Web Service");
    }

    #[test]
    fn smb_leaves_device_for_later_stages() {
        let s = suggest_tags("10.0.0.7", Some(445), "smb", Some("Dell Inc."), None);
        assert_eq!(s.device, "Desktop");
        assert_eq!(s.service, "File Sharing");
    }

    #[test]
    fn vendor_stage_never_overwrites() {
        let s = suggest_tags("10.0.0.1", None, "", Some("Cisco Systems"), None);
        assert_eq!(s.device, "Gateway");
    }

    #[test]
    fn hp_printer_beats_plain_hp() {
        let s = suggest_tags("10.0.0.9", None, "", Some("HP Printer Division"), None);
        assert_eq!(s.device, "Printer");
        let s = suggest_tags("10.0.0.9", None, "", Some("HP Inc."), None);
        assert_eq!(s.device, "HP Device");
    }

    #[test]
    fn os_stage_is_last_resort() {
        let s = suggest_tags("10.0.0.9", None, "", None, Some("Microsoft Windows 10"));
        assert_eq!(s.device, "Windows Host");
        assert_eq!(s.service, "");
        // Vendor beats OS.
        let s = suggest_tags("10.0.0.9", None, "", Some("Apple"), Some("Linux 5.4"));
        assert_eq!(s.device, "Apple Device");
    }

    #[test]
    fn vendor_match_is_case_insensitive() {
        let s = suggest_tags("10.0.0.9", None, "", Some("UBIQUITI NETWORKS"), None);
        assert_eq!(s.device, "Access Point");
    }

    #[test]
    fn no_rule_yields_empty() {
        let s = suggest_tags("10.0.0.9", Some(60000), "weird", None, None);
        assert!(s.is_empty());
    }
}

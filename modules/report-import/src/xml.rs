//! Serde models for the nmap-style XML report. Intentionally partial:
//! only the elements the importer consumes are modeled.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ScanReport {
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
}

#[derive(Debug, Deserialize)]
pub struct Host {
    pub status: Option<Status>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub os: Option<Os>,
    pub uptime: Option<Uptime>,
    pub ports: Option<Ports>,
}

impl Host {
    pub fn is_up(&self) -> bool {
        // A host with no status element is assumed reachable.
        self.status.as_ref().map(|s| s.state == "up").unwrap_or(true)
    }

    pub fn ipv4(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "ipv4")
            .map(|a| a.addr.as_str())
    }

    pub fn mac(&self) -> Option<&Address> {
        self.addresses.iter().find(|a| a.addr_type == "mac")
    }

    pub fn first_hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|h| h.hostnames.first())
            .map(|h| h.name.as_str())
    }

    /// First OS match name and its first CPE, when fingerprinted.
    pub fn os_info(&self) -> (String, String) {
        match self.os.as_ref().and_then(|o| o.matches.first()) {
            Some(m) => (
                m.name.clone().unwrap_or_default(),
                m.cpes.first().cloned().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Status {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Os {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "cpe", default)]
    pub cpes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct Uptime {
    #[serde(rename = "@seconds")]
    pub seconds: Option<String>,
    #[serde(rename = "@lastboot")]
    pub lastboot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
pub struct Port {
    #[serde(rename = "@protocol")]
    pub protocol: Option<String>,
    // Kept as text so one junk portid skips a row, not the import.
    #[serde(rename = "@portid")]
    pub portid: Option<String>,
    pub state: Option<PortState>,
    pub service: Option<Service>,
    #[serde(rename = "script", default)]
    pub scripts: Vec<Script>,
}

impl Port {
    /// Script/banner outputs joined with "; ".
    pub fn script_output(&self) -> String {
        self.scripts
            .iter()
            .filter_map(|s| s.output.as_deref())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Service {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(rename = "@output")]
    pub output: Option<String>,
}

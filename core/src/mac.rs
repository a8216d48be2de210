//! MAC address normalization for tag lookups.

/// Normalize a MAC for matching: uppercase, separators stripped.
/// Two MACs that normalize equal are the same device.
pub fn normalize_mac(mac: &str) -> String {
    mac.trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

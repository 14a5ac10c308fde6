//! Parsing of the `key:value` status block returned by `INFO`

use std::collections::HashMap;

/// Status field reporting the replica's link to its master
pub const MASTER_LINK_STATUS: &str = "master_link_status";

/// Link status value of a synced replica
pub const LINK_UP: &str = "up";

/// Parse a status block into a map.
///
/// Blank lines and `#` section headers are skipped. Lines that do not hold
/// exactly one `:` are dropped.
pub fn parse_status(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Some((key.to_string(), value.to_string())),
                _ => None,
            }
        })
        .collect()
}

//! DHCP client policy and update-target parsing.

use super::{parse_c_int, ConfigError, ConfigNode};
use crate::types::UpdateTargets;
use std::net::IpAddr;
use tracing::warn;

/// Default cap on `<prefer-server>` entries.
pub const DHCP_SERVER_PREFERENCES_MAX: usize = 128;

/// Weight of a server that is always preferred.
pub const WEIGHT_ALWAYS: i32 = 100;
/// Weight of a server that must never be used.
pub const WEIGHT_NEVER: i32 = -1;

/// A preferred (or excluded) DHCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPreference {
    pub address: IpAddr,
    pub weight: i32,
}

impl ServerPreference {
    pub fn is_excluded(&self) -> bool {
        self.weight < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpConfig {
    pub vendor_class: Option<String>,
    pub lease_time: u32,
    pub ignore_servers: Vec<String>,
    pub preferred_servers: Vec<ServerPreference>,
    pub allow_update: UpdateTargets,
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            vendor_class: None,
            lease_time: 0,
            ignore_servers: Vec::new(),
            preferred_servers: Vec::new(),
            allow_update: UpdateTargets::everything(),
        }
    }
}

impl DhcpConfig {
    /// Preference entry for a server address, if configured.
    pub fn preference(&self, address: IpAddr) -> Option<&ServerPreference> {
        self.preferred_servers.iter().find(|p| p.address == address)
    }
}

/// Refines `mask` from `<all/>`, `<none/>` and named target children.
///
/// Children are applied in document order, so `<none/><hostname/>` leaves
/// exactly the hostname bit set.
pub fn parse_update_targets(mask: &mut UpdateTargets, node: &ConfigNode) {
    for child in node.children() {
        match child.name() {
            "all" => *mask = UpdateTargets::everything(),
            "none" => *mask = UpdateTargets::empty(),
            name => match UpdateTargets::from_target_name(name) {
                Some(target) => *mask |= target,
                None => warn!(target_name = %name, "ignoring unknown addrconf update target"),
            },
        }
    }
}

/// Parses the children of `<dhcp>` into `dhcp`.
pub fn parse_dhcp(
    dhcp: &mut DhcpConfig,
    node: &ConfigNode,
    max_preferred: usize,
) -> Result<(), ConfigError> {
    for child in node.children() {
        match child.name() {
            "vendor-class" => dhcp.vendor_class = child.text().map(str::to_string),
            "lease-time" => {
                if let Some(text) = child.text() {
                    dhcp.lease_time = parse_c_int(text)
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(|| ConfigError::InvalidNumber {
                            element: "lease-time".to_string(),
                            value: text.to_string(),
                        })?;
                }
            }
            "ignore-server" => {
                if let Some(ip) = child.attr("ip") {
                    dhcp.ignore_servers.push(ip.to_string());
                }
            }
            "prefer-server" => {
                let Some(ip) = child.attr("ip") else {
                    continue;
                };
                if dhcp.preferred_servers.len() >= max_preferred {
                    warn!(ip = %ip, max = max_preferred, "too many <prefer-server> elements");
                    continue;
                }
                let address = ip
                    .parse::<IpAddr>()
                    .map_err(|_| ConfigError::InvalidAddress(ip.to_string()))?;
                let weight = match child.attr("weight") {
                    None | Some("always") => WEIGHT_ALWAYS,
                    Some("never") => WEIGHT_NEVER,
                    Some(value) => parse_weight(value)?,
                };
                dhcp.preferred_servers.push(ServerPreference { address, weight });
            }
            "allow-update" => parse_update_targets(&mut dhcp.allow_update, child),
            _ => {}
        }
    }
    Ok(())
}

fn parse_weight(value: &str) -> Result<i32, ConfigError> {
    let weight = parse_c_int(value).ok_or_else(|| ConfigError::InvalidNumber {
        element: "prefer-server".to_string(),
        value: value.to_string(),
    })?;
    if weight > i64::from(WEIGHT_ALWAYS) {
        warn!(weight, "preferred dhcp server weight exceeds max, clamping to {}", WEIGHT_ALWAYS);
        return Ok(WEIGHT_ALWAYS);
    }
    i32::try_from(weight).map_err(|_| ConfigError::InvalidNumber {
        element: "prefer-server".to_string(),
        value: value.to_string(),
    })
}

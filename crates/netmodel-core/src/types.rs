//! Name mappings shared by the configuration model and the object model.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address configuration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrconfMode {
    Dhcp,
    Static,
    Autoip,
    Ibft,
}

impl AddrconfMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "dhcp" => Some(Self::Dhcp),
            "static" => Some(Self::Static),
            "autoip" => Some(Self::Autoip),
            "ibft" => Some(Self::Ibft),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dhcp => "dhcp",
            Self::Static => "static",
            Self::Autoip => "autoip",
            Self::Ibft => "ibft",
        }
    }
}

impl fmt::Display for AddrconfMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Ethernet,
    Loopback,
    Vlan,
    Bridge,
    Bond,
    Wireless,
    Infiniband,
    Tun,
    Tap,
    Dummy,
    Ppp,
}

impl LinkType {
    const ALL: [LinkType; 11] = [
        Self::Ethernet,
        Self::Loopback,
        Self::Vlan,
        Self::Bridge,
        Self::Bond,
        Self::Wireless,
        Self::Infiniband,
        Self::Tun,
        Self::Tap,
        Self::Dummy,
        Self::Ppp,
    ];

    pub fn all() -> &'static [LinkType] {
        &Self::ALL
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ethernet => "ethernet",
            Self::Loopback => "loopback",
            Self::Vlan => "vlan",
            Self::Bridge => "bridge",
            Self::Bond => "bond",
            Self::Wireless => "wireless",
            Self::Infiniband => "infiniband",
            Self::Tun => "tun",
            Self::Tap => "tap",
            Self::Dummy => "dummy",
            Self::Ppp => "ppp",
        }
    }

    /// Service name suffix, e.g. `Vlan` in `org.netmodel.Interface.Vlan`.
    pub fn service_suffix(self) -> &'static str {
        match self {
            Self::Ethernet => "Ethernet",
            Self::Loopback => "Loopback",
            Self::Vlan => "Vlan",
            Self::Bridge => "Bridge",
            Self::Bond => "Bond",
            Self::Wireless => "Wireless",
            Self::Infiniband => "Infiniband",
            Self::Tun => "Tun",
            Self::Tap => "Tap",
            Self::Dummy => "Dummy",
            Self::Ppp => "Ppp",
        }
    }

    /// Class name of objects of this link type.
    pub fn class_name(self) -> String {
        format!("netif-{}", self.as_str())
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Address families an extension applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AddressFamilies: u32 {
        const IPV4 = 1 << 0;
        const IPV6 = 1 << 1;
    }
}

impl AddressFamilies {
    /// Every bit set, including families not known yet.
    pub fn any() -> Self {
        Self::from_bits_retain(u32::MAX)
    }

    /// Maps a `family` attribute token.
    pub fn from_family_name(token: &str) -> Option<Self> {
        match token {
            "ipv4" => Some(Self::IPV4),
            "ipv6" => Some(Self::IPV6),
            _ => None,
        }
    }
}

bitflags! {
    /// Attributes an address configuration client may update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateTargets: u32 {
        const DEFAULT_ROUTE = 1 << 0;
        const HOSTNAME = 1 << 1;
        const HOSTS_FILE = 1 << 2;
        const SYSLOG = 1 << 3;
        const RESOLVER = 1 << 4;
        const NIS = 1 << 5;
        const NTP = 1 << 6;
        const NETBIOS = 1 << 7;
        const SLP = 1 << 8;
    }
}

impl UpdateTargets {
    /// Maps an `<allow-update>` child element name.
    pub fn from_target_name(name: &str) -> Option<Self> {
        match name {
            "default-route" => Some(Self::DEFAULT_ROUTE),
            "hostname" => Some(Self::HOSTNAME),
            "hosts-file" => Some(Self::HOSTS_FILE),
            "syslog" => Some(Self::SYSLOG),
            "resolver" => Some(Self::RESOLVER),
            "nis" => Some(Self::NIS),
            "ntp" => Some(Self::NTP),
            "netbios" => Some(Self::NETBIOS),
            "slp" => Some(Self::SLP),
            _ => None,
        }
    }

    /// All bits set. This is what `<all/>` selects.
    pub fn everything() -> Self {
        Self::from_bits_retain(u32::MAX)
    }

    /// Targets this build knows how to update.
    pub fn system_capabilities() -> Self {
        Self::all()
    }
}

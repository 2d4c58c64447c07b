//! Global daemon configuration.
//!
//! The configuration document is read once at startup. Loading either
//! produces a complete [`Config`] or fails with a [`ConfigError`]; nothing
//! partially parsed is ever installed.

pub mod dhcp;
pub mod expr;
pub mod node;

pub use dhcp::{DhcpConfig, ServerPreference, DHCP_SERVER_PREFERENCES_MAX};
pub use expr::{EvalContext, ExprError, FormatExpr};
pub use node::ConfigNode;

use crate::extension::{parse_extensions, Extension, ExtensionCategory, ExtensionType};
use crate::types::{AddrconfMode, AddressFamilies, LinkType, UpdateTargets};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration load errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing configuration document: {0}")]
    Document(String),

    #[error("No <config> element (found <{0}>)")]
    MissingConfigElement(String),

    #[error("{element} has no {attribute} attribute")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("Bad expression \"{expr}\": {source}")]
    BadExpression { expr: String, source: ExprError },

    #[error("Invalid number in <{element}>: \"{value}\"")]
    InvalidNumber { element: String, value: String },

    #[error("Unable to parse address \"{0}\"")]
    InvalidAddress(String),
}

/// Per address family settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfInfo {
    pub enabled: bool,
    pub forwarding: bool,
}

impl Default for AfInfo {
    fn default() -> Self {
        Self {
            enabled: true,
            forwarding: false,
        }
    }
}

/// A file-system location with permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsLocation {
    pub path: Option<PathBuf>,
    pub mode: u32,
}

impl FsLocation {
    fn with_mode(mode: u32) -> Self {
        Self { path: None, mode }
    }
}

/// Default schema location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
    pub schema: Option<String>,
    pub path: Option<PathBuf>,
}

/// Address configuration policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrconfConfig {
    pub default_allow_update: UpdateTargets,
    pub dhcp: DhcpConfig,
    pub ibft_allow_update: UpdateTargets,
    pub autoip_allow_update: UpdateTargets,
}

impl Default for AddrconfConfig {
    fn default() -> Self {
        Self {
            default_allow_update: UpdateTargets::everything(),
            dhcp: DhcpConfig::default(),
            ibft_allow_update: UpdateTargets::everything(),
            autoip_allow_update: UpdateTargets::everything(),
        }
    }
}

/// Default receive buffer size.
pub const DEFAULT_RECV_MAX: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub ipv4: AfInfo,
    pub ipv6: AfInfo,
    pub pidfile: FsLocation,
    pub socket: FsLocation,
    pub backend: BackendConfig,
    pub addrconf: AddrconfConfig,
    pub recv_max: usize,
    pub addrconf_extensions: Vec<Extension>,
    pub linktype_extensions: Vec<Extension>,
    pub api_extensions: Vec<Extension>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipv4: AfInfo::default(),
            ipv6: AfInfo::default(),
            pidfile: FsLocation::with_mode(0o644),
            socket: FsLocation::with_mode(0o600),
            backend: BackendConfig::default(),
            addrconf: AddrconfConfig::default(),
            recv_max: DEFAULT_RECV_MAX,
            addrconf_extensions: Vec::new(),
            linktype_extensions: Vec::new(),
            api_extensions: Vec::new(),
        }
    }
}

impl Config {
    /// Loads with default [`ConfigLoader`] settings.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLoader::new().load_file(path)
    }

    pub fn parse_str(text: &str) -> Result<Self, ConfigError> {
        ConfigLoader::new().parse_str(text)
    }

    /// Extension by name, searching addrconf, link-type, then API extensions.
    pub fn find_extension(&self, name: &str) -> Option<&Extension> {
        self.extensions().find(|e| e.name == name)
    }

    /// All extensions in lookup order.
    pub fn extensions(&self) -> impl Iterator<Item = &Extension> {
        self.addrconf_extensions
            .iter()
            .chain(&self.linktype_extensions)
            .chain(&self.api_extensions)
    }

    pub fn find_linktype_extension(&self, link: LinkType) -> Option<&Extension> {
        let kind = ExtensionType::LinkType(link);
        self.linktype_extensions.iter().find(|e| e.kind == kind)
    }

    /// Addrconf extension for `mode` that supports `family`, when given.
    pub fn find_addrconf_extension(
        &self,
        mode: AddrconfMode,
        family: Option<AddressFamilies>,
    ) -> Option<&Extension> {
        let kind = ExtensionType::Addrconf(mode);
        self.addrconf_extensions
            .iter()
            .filter(|e| e.kind == kind)
            .find(|e| family.map_or(true, |f| e.supports_family(f)))
    }

    pub fn find_api_extension(&self, name: &str) -> Option<&Extension> {
        self.api_extensions.iter().find(|e| e.name == name)
    }

    /// Update targets an addrconf client of the given mode may touch.
    pub fn addrconf_update_mask(&self, mode: AddrconfMode) -> UpdateTargets {
        let mask = self.addrconf.default_allow_update;
        match mode {
            AddrconfMode::Dhcp => mask & self.addrconf.dhcp.allow_update,
            _ => mask,
        }
    }
}

/// Configuration loader with tunable limits.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    max_preferred_servers: usize,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            max_preferred_servers: DHCP_SERVER_PREFERENCES_MAX,
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of `<prefer-server>` entries kept.
    pub fn max_preferred_servers(mut self, max: usize) -> Self {
        self.max_preferred_servers = max;
        self
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading config file");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = self.parse_str(&text)?;
        info!(
            path = %path.display(),
            extensions = config.extensions().count(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn parse_str(&self, text: &str) -> Result<Config, ConfigError> {
        let root = ConfigNode::parse_document(text)?;
        self.build(&root)
    }

    /// Builds a [`Config`] from a `<config>` element.
    pub fn build(&self, root: &ConfigNode) -> Result<Config, ConfigError> {
        if root.name() != "config" {
            return Err(ConfigError::MissingConfigElement(root.name().to_string()));
        }

        let mut config = Config::default();
        parse_afinfo(&mut config.ipv4, root.child("ipv4"));
        parse_afinfo(&mut config.ipv6, root.child("ipv6"));
        parse_fslocation(&mut config.pidfile, root.child("pidfile"))?;
        parse_fslocation(&mut config.socket, root.child("socket"))?;

        if let Some(backend) = root.child("backend") {
            config.backend.schema = backend.attr("schema").map(str::to_string);
            config.backend.path = backend.attr("path").map(PathBuf::from);
        }

        if let Some(addrconf) = root.child("addrconf") {
            for child in addrconf.children() {
                match child.name() {
                    "default-allow-update" => dhcp::parse_update_targets(
                        &mut config.addrconf.default_allow_update,
                        child,
                    ),
                    "dhcp" => dhcp::parse_dhcp(
                        &mut config.addrconf.dhcp,
                        child,
                        self.max_preferred_servers,
                    )?,
                    _ => {}
                }
            }
        }
        config.addrconf.default_allow_update &= UpdateTargets::system_capabilities();

        config.addrconf_extensions = parse_extensions(root, ExtensionCategory::Addrconf)?;
        config.linktype_extensions = parse_extensions(root, ExtensionCategory::LinkType)?;
        config.api_extensions = parse_extensions(root, ExtensionCategory::Api)?;

        Ok(config)
    }
}

fn parse_afinfo(info: &mut AfInfo, node: Option<&ConfigNode>) {
    let Some(node) = node else {
        return;
    };
    if node.child("enabled").is_some() {
        info.enabled = true;
    } else if node.child("disabled").is_some() {
        info.enabled = false;
    }
    if node.child("forwarding").is_some() {
        info.forwarding = true;
    }
}

fn parse_fslocation(location: &mut FsLocation, node: Option<&ConfigNode>) -> Result<(), ConfigError> {
    let Some(node) = node else {
        return Ok(());
    };
    if let Some(path) = node.attr("path") {
        location.path = Some(PathBuf::from(path));
    }
    if let Some(mode) = node.attr("mode") {
        location.mode = parse_c_int(mode)
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(|| ConfigError::InvalidNumber {
                element: node.name().to_string(),
                value: mode.to_string(),
            })?;
    }
    Ok(())
}

/// Parses an integer in C notation: decimal, `0` octal or `0x` hex, with an
/// optional sign.
pub(crate) fn parse_c_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

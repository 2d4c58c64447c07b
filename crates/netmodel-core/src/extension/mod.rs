//! Administrator-defined extensions.
//!
//! An extension maps the methods of a same-named service onto external
//! commands. Each `<action>` names a method and carries a command
//! expression; `<environment>` entries are exported to every command the
//! extension runs.
//!
//! ```xml
//! <addrconf>
//!   <extension name="org.netmodel.Addrconf.ipv4.dhcp" type="dhcp" family="ipv4">
//!     <pidfile path="/run/netmodel/dhcp4-%{name}.pid"/>
//!     <action name="requestLease" command="/usr/lib/netmodel/dhcp4 request %{name}"/>
//!     <environment putenv="DHCP_VERBOSE=1"/>
//!   </extension>
//! </addrconf>
//! ```

pub mod binder;
pub mod dispatcher;
pub mod process;

pub use binder::bind_extensions;
pub use dispatcher::{CallOutcome, DispatchError, ExtensionDispatcher, PendingCall};
pub use process::{ProcessDelegate, ProcessExecutor, ProcessExit, ShellExecutor};

use crate::config::{ConfigError, ConfigNode, EvalContext, FormatExpr};
use crate::types::{AddrconfMode, AddressFamilies, LinkType};
use std::fmt;
use tracing::{debug, warn};

/// Configuration section an extension was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionCategory {
    Addrconf,
    LinkType,
    Api,
}

impl ExtensionCategory {
    /// Element name of the section under `<config>`.
    pub fn element(self) -> &'static str {
        match self {
            Self::Addrconf => "addrconf",
            Self::LinkType => "linktype",
            Self::Api => "api",
        }
    }

    fn map_type(self, name: &str) -> Option<ExtensionType> {
        match self {
            Self::Addrconf => AddrconfMode::from_name(name).map(ExtensionType::Addrconf),
            Self::LinkType => LinkType::from_name(name).map(ExtensionType::LinkType),
            Self::Api => Some(ExtensionType::Api),
        }
    }
}

impl fmt::Display for ExtensionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element())
    }
}

/// Typed extension kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionType {
    Addrconf(AddrconfMode),
    LinkType(LinkType),
    Api,
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addrconf(mode) => write!(f, "addrconf/{mode}"),
            Self::LinkType(link) => write!(f, "linktype/{link}"),
            Self::Api => f.write_str("api"),
        }
    }
}

/// A named action. An action without a command exists but cannot be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAction {
    pub name: String,
    pub command: Option<FormatExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    pub kind: ExtensionType,
    pub supported_af: AddressFamilies,
    pub pid_file_path: Option<FormatExpr>,
    pub actions: Vec<ScriptAction>,
    pub environment: Vec<FormatExpr>,
}

impl Extension {
    pub fn new(name: impl Into<String>, kind: ExtensionType) -> Self {
        Self {
            name: name.into(),
            kind,
            supported_af: AddressFamilies::any(),
            pid_file_path: None,
            actions: Vec::new(),
            environment: Vec::new(),
        }
    }

    /// First action with the given name.
    pub fn find_action(&self, name: &str) -> Option<&ScriptAction> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Command of the first action with the given name, if it has one.
    pub fn find_script(&self, name: &str) -> Option<&FormatExpr> {
        self.find_action(name).and_then(|a| a.command.as_ref())
    }

    pub fn supports_family(&self, family: AddressFamilies) -> bool {
        self.supported_af.contains(family)
    }

    /// Evaluates the environment templates into `NAME=value` assignments.
    pub fn environment_for(&self, context: &EvalContext) -> Vec<String> {
        self.environment.iter().map(|expr| expr.evaluate(context)).collect()
    }
}

/// Parses the `<extension>` children of the category's section under
/// `config`. A missing section yields an empty list.
pub fn parse_extensions(
    config: &ConfigNode,
    category: ExtensionCategory,
) -> Result<Vec<Extension>, ConfigError> {
    let Some(section) = config.child(category.element()) else {
        return Ok(Vec::new());
    };

    let mut extensions = Vec::new();
    for node in section.children().iter().filter(|n| n.name() == "extension") {
        let name = node.attr("name").ok_or_else(|| ConfigError::MissingAttribute {
            element: format!("{category} extension"),
            attribute: "name",
        })?;

        let kind = if category == ExtensionCategory::Api {
            ExtensionType::Api
        } else {
            let type_name = node.attr("type").ok_or_else(|| ConfigError::MissingAttribute {
                element: format!("{category} extension {name}"),
                attribute: "type",
            })?;
            match category.map_type(type_name) {
                Some(kind) => kind,
                None => {
                    warn!(
                        category = %category,
                        extension = %name,
                        extension_type = %type_name,
                        "extension type not recognized (ignored)"
                    );
                    continue;
                }
            }
        };

        let mut extension = Extension::new(name, kind);
        if let Some(families) = node.attr("family") {
            extension.supported_af = parse_families(name, families);
        }

        if let Some(path) = node.child("pidfile").and_then(|n| n.attr("path")) {
            extension.pid_file_path = Some(parse_expr(path)?);
        }

        for child in node.children() {
            match child.name() {
                "action" => {
                    let action = child.attr("name").ok_or_else(|| ConfigError::MissingAttribute {
                        element: format!("action of extension {name}"),
                        attribute: "name",
                    })?;
                    let command = child.attr("command").map(parse_expr).transpose()?;
                    extension.actions.push(ScriptAction {
                        name: action.to_string(),
                        command,
                    });
                }
                "environment" => {
                    let putenv = child.attr("putenv").ok_or_else(|| ConfigError::MissingAttribute {
                        element: format!("environment of extension {name}"),
                        attribute: "putenv",
                    })?;
                    extension.environment.push(parse_expr(putenv)?);
                }
                _ => {}
            }
        }

        debug!(
            extension = %extension.name,
            kind = %extension.kind,
            actions = extension.actions.len(),
            "extension loaded"
        );
        extensions.push(extension);
    }

    Ok(extensions)
}

fn parse_families(extension: &str, value: &str) -> AddressFamilies {
    let mut mask = AddressFamilies::empty();
    for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match AddressFamilies::from_family_name(token) {
            Some(family) => mask |= family,
            None => warn!(extension = %extension, family = %token, "unknown address family ignored"),
        }
    }
    mask
}

fn parse_expr(source: &str) -> Result<FormatExpr, ConfigError> {
    FormatExpr::parse(source).map_err(|e| ConfigError::BadExpression {
        expr: source.to_string(),
        source: e,
    })
}

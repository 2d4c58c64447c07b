//! Built-in object model.
//!
//! Registers the daemon's classes and services, binds configured extensions
//! and creates the initial object hierarchy:
//!
//! ```text
//! /              org.netmodel
//! /Interface     netif-list      org.netmodel.InterfaceList
//! /Interface/X   netif-<type>    org.netmodel.Interface, org.netmodel.Interface.<Type>, ...
//! ```

use crate::config::Config;
use crate::extension::bind_extensions;
use crate::object::{
    bind_compatible_services, child_path, BindingError, ObjectInstance, ObjectTree, ObjectTreeError,
};
use crate::registry::{MethodDescriptor, Registry, RegistryError, ServiceDescriptor};
use crate::types::LinkType;
use serde_json::Value;
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NETIF_LIST_CLASS: &str = "netif-list";
pub const NETIF_CLASS: &str = "netif";

pub const ROOT_SERVICE: &str = "org.netmodel";
pub const INTERFACE_LIST_SERVICE: &str = "org.netmodel.InterfaceList";
pub const INTERFACE_SERVICE: &str = "org.netmodel.Interface";

pub const ROOT_PATH: &str = "/";
pub const INTERFACE_LIST_PATH: &str = "/Interface";

/// Addrconf services as (address family, mode) pairs.
const ADDRCONF_SERVICES: [(&str, &str); 3] = [("ipv4", "dhcp"), ("ipv4", "autoip"), ("ipv6", "dhcp")];

/// Errors building the object model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Tree(#[from] ObjectTreeError),

    #[error("Service {0} is not registered")]
    MissingService(String),

    #[error("Class {0} is not registered")]
    MissingClass(String),
}

/// Name of the per-link-type service.
pub fn link_service_name(link: LinkType) -> String {
    format!("{INTERFACE_SERVICE}.{}", link.service_suffix())
}

/// Name of an addrconf service.
pub fn addrconf_service_name(family: &str, mode: &str) -> String {
    format!("org.netmodel.Addrconf.{family}.{mode}")
}

/// Registers the built-in classes and services.
pub fn register_builtin_model(registry: &mut Registry) -> Result<(), RegistryError> {
    let netif_list = registry.register_class(NETIF_LIST_CLASS, None)?;
    let netif = registry.register_class(NETIF_CLASS, None)?;

    registry.register_service(
        ServiceDescriptor::new(ROOT_SERVICE)
            .with_method(MethodDescriptor::builtin("getVersion", "", |_, _| {
                Ok(vec![Value::from(VERSION)])
            })),
    )?;

    registry.register_service(
        ServiceDescriptor::new(INTERFACE_LIST_SERVICE)
            .compatible_with(netif_list)
            .with_method(MethodDescriptor::new("create", "sa{sv}")),
    )?;

    registry.register_service(
        ServiceDescriptor::new(INTERFACE_SERVICE)
            .compatible_with(netif)
            .with_method(MethodDescriptor::new("linkUp", "a{sv}"))
            .with_method(MethodDescriptor::new("linkDown", ""))
            .with_property("name", "s")
            .with_property("type", "u"),
    )?;

    for link in LinkType::all() {
        let class = registry.register_class(link.class_name(), Some(netif))?;
        registry.register_service(
            ServiceDescriptor::new(link_service_name(*link))
                .compatible_with(class)
                .with_method(MethodDescriptor::new("changeDevice", "a{sv}"))
                .with_method(MethodDescriptor::new("deleteDevice", "")),
        )?;
    }

    for (family, mode) in ADDRCONF_SERVICES {
        registry.register_service(
            ServiceDescriptor::new(addrconf_service_name(family, mode))
                .compatible_with(netif)
                .with_method(MethodDescriptor::new("requestLease", "a{sv}"))
                .with_method(MethodDescriptor::new("dropLease", "")),
        )?;
    }

    Ok(())
}

/// Builds a sealed registry with extensions bound.
pub fn build_registry(config: &Config) -> Result<Registry, ModelError> {
    let mut registry = Registry::new();
    register_builtin_model(&mut registry)?;
    let hooks = bind_extensions(&mut registry, config)?;
    registry.seal();

    info!(
        classes = registry.class_count(),
        services = registry.service_count(),
        extension_hooks = hooks,
        "object model registered"
    );
    Ok(registry)
}

/// Creates `/` with the root service and `/Interface` with its compatible
/// services.
pub fn create_initial_objects(registry: &Registry) -> Result<ObjectTree, ModelError> {
    let mut tree = ObjectTree::new();

    let root_service = registry
        .lookup_service_id(ROOT_SERVICE)
        .ok_or_else(|| ModelError::MissingService(ROOT_SERVICE.to_string()))?;
    let root = tree.insert(ObjectInstance::new(ROOT_PATH, None))?;
    root.attach_service(root_service);

    let list_class = registry
        .lookup_class(NETIF_LIST_CLASS)
        .ok_or_else(|| ModelError::MissingClass(NETIF_LIST_CLASS.to_string()))?;
    let list = tree.insert(ObjectInstance::new(INTERFACE_LIST_PATH, Some(list_class)))?;
    bind_compatible_services(registry, list)?;

    Ok(tree)
}

/// Creates the object for an interface and binds its services.
pub fn new_interface_object(
    registry: &Registry,
    name: &str,
    link: LinkType,
) -> Result<ObjectInstance, ModelError> {
    let class_name = link.class_name();
    let class = registry
        .lookup_class(&class_name)
        .ok_or(ModelError::MissingClass(class_name))?;

    let mut object = ObjectInstance::new(child_path(INTERFACE_LIST_PATH, name), Some(class));
    bind_compatible_services(registry, &mut object)?;
    Ok(object)
}

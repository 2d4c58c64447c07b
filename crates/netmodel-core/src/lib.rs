//! Object model and extension dispatch for the netmodel daemon.
//!
//! Network interfaces are exposed as objects in an IPC object tree. Each
//! object has a class; services compatible with that class or any of its
//! superclasses are attached to it. Methods a service declares without a
//! built-in handler can be served by administrator-configured extensions,
//! which run as external commands.

pub mod config;
pub mod extension;
pub mod ipc;
pub mod model;
pub mod object;
pub mod registry;
pub mod server;
pub mod types;

pub use config::{Config, ConfigError, ConfigLoader, ConfigNode};
pub use extension::{
    bind_extensions, CallOutcome, DispatchError, Extension, ExtensionDispatcher, PendingCall,
    ShellExecutor,
};
pub use ipc::{Connection, ErrorName, IpcError, LocalConnection, MethodCall, Reply};
pub use model::ModelError;
pub use object::{bind_compatible_services, BindingError, ObjectInstance, ObjectTree};
pub use registry::{
    ClassId, MethodBinding, MethodDescriptor, Registry, RegistryError, ServiceDescriptor, ServiceId,
};
pub use server::{CallDisposition, ObjectServer};
pub use types::{AddrconfMode, AddressFamilies, LinkType, UpdateTargets};

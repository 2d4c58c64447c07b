//! Class and service registry.
//!
//! Classes form a forest of single-parent chains used only to decide which
//! services an object is compatible with. Services bundle methods and
//! properties and name the one class they are compatible with.
//!
//! Both tables are filled during a single-threaded startup phase and sealed
//! before the serving loop starts. A superclass must be registered before
//! its subclasses, so the class graph is acyclic by construction.

use crate::ipc::{IpcError, MethodCall};
use crate::object::ObjectInstance;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maximum number of registered classes.
pub const CLASSES_MAX: usize = 1024;
/// Maximum number of registered services.
pub const SERVICES_MAX: usize = 128;

/// Handle of a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(usize);

/// Handle of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(usize);

/// Class descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    name: String,
    superclass: Option<ClassId>,
}

impl ClassDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<ClassId> {
        self.superclass
    }
}

/// Built-in, synchronous method implementation.
pub trait MethodHandler: Send + Sync {
    fn call(&self, object: &ObjectInstance, call: &MethodCall) -> Result<Vec<Value>, IpcError>;
}

impl<F> MethodHandler for F
where
    F: Fn(&ObjectInstance, &MethodCall) -> Result<Vec<Value>, IpcError> + Send + Sync,
{
    fn call(&self, object: &ObjectInstance, call: &MethodCall) -> Result<Vec<Value>, IpcError> {
        self(object, call)
    }
}

/// Extension action a method was bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHook {
    pub extension: String,
    pub action: String,
}

/// How a method is served.
#[derive(Clone)]
pub enum MethodBinding {
    /// Declared, but nothing serves it.
    Unbound,
    /// Served in-process.
    BuiltIn(Arc<dyn MethodHandler>),
    /// Served by an external extension action, asynchronously.
    Extension(ExtensionHook),
}

impl fmt::Debug for MethodBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => f.write_str("Unbound"),
            Self::BuiltIn(_) => f.write_str("BuiltIn(..)"),
            Self::Extension(hook) => f.debug_tuple("Extension").field(hook).finish(),
        }
    }
}

/// Method descriptor.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    name: String,
    signature: String,
    binding: MethodBinding,
}

impl MethodDescriptor {
    /// A method without a built-in handler.
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            binding: MethodBinding::Unbound,
        }
    }

    /// A method served by a built-in handler.
    pub fn builtin<F>(name: impl Into<String>, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ObjectInstance, &MethodCall) -> Result<Vec<Value>, IpcError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature: signature.into(),
            binding: MethodBinding::BuiltIn(Arc::new(handler)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn binding(&self) -> &MethodBinding {
        &self.binding
    }

    pub fn has_builtin_handler(&self) -> bool {
        matches!(self.binding, MethodBinding::BuiltIn(_))
    }

    pub(crate) fn set_binding(&mut self, binding: MethodBinding) {
        self.binding = binding;
    }
}

/// Property descriptor. Properties are carried for introspection only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub signature: String,
}

/// Service descriptor.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: String,
    compatible: Option<ClassId>,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compatible: None,
            methods: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn compatible_with(mut self, class: ClassId) -> Self {
        self.compatible = Some(class);
        self
    }

    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.into(),
            signature: signature.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compatible(&self) -> Option<ClassId> {
        self.compatible
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub(crate) fn methods_mut(&mut self) -> &mut [MethodDescriptor] {
        &mut self.methods
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Class name must not be empty")]
    EmptyClassName,

    #[error("Service name must not be empty")]
    EmptyServiceName,

    #[error("Class already registered: {0}")]
    DuplicateClass(String),

    #[error("Service already registered: {0}")]
    DuplicateService(String),

    #[error("Class table full ({0} entries)")]
    ClassTableFull(usize),

    #[error("Service table full ({0} entries)")]
    ServiceTableFull(usize),

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Method {method} declared twice in service {service}")]
    DuplicateMethod { service: String, method: String },

    #[error("Registry is sealed; registration is only allowed during startup")]
    Sealed,
}

/// Process-wide class and service tables.
#[derive(Debug, Default)]
pub struct Registry {
    classes: Vec<ClassDescriptor>,
    class_index: HashMap<String, ClassId>,
    services: Vec<ServiceDescriptor>,
    service_index: HashMap<String, ServiceId>,
    sealed: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class. The superclass, if any, must already be registered.
    pub fn register_class(
        &mut self,
        name: impl Into<String>,
        superclass: Option<ClassId>,
    ) -> Result<ClassId, RegistryError> {
        self.ensure_unsealed()?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyClassName);
        }
        if self.class_index.contains_key(&name) {
            return Err(RegistryError::DuplicateClass(name));
        }
        if self.classes.len() >= CLASSES_MAX {
            return Err(RegistryError::ClassTableFull(CLASSES_MAX));
        }
        if let Some(parent) = superclass {
            if parent.0 >= self.classes.len() {
                return Err(RegistryError::UnknownClass(format!("#{}", parent.0)));
            }
        }

        let id = ClassId(self.classes.len());
        self.class_index.insert(name.clone(), id);
        self.classes.push(ClassDescriptor { name, superclass });
        Ok(id)
    }

    /// Looks up a class by name.
    pub fn lookup_class(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(name).copied()
    }

    pub fn class(&self, id: ClassId) -> Option<&ClassDescriptor> {
        self.classes.get(id.0)
    }

    pub fn class_name(&self, id: ClassId) -> Option<&str> {
        self.class(id).map(ClassDescriptor::name)
    }

    /// Iterates `class`, then its superclass, and so on up to the root.
    pub fn ancestry(&self, class: ClassId) -> Ancestry<'_> {
        Ancestry {
            registry: self,
            next: self.class(class).map(|_| class),
        }
    }

    /// Whether `class` is `target` or one of its descendants.
    pub fn is_subclass_of(&self, class: ClassId, target: ClassId) -> bool {
        self.ancestry(class).any(|c| c == target)
    }

    /// Registers a service.
    pub fn register_service(
        &mut self,
        descriptor: ServiceDescriptor,
    ) -> Result<ServiceId, RegistryError> {
        self.ensure_unsealed()?;
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::EmptyServiceName);
        }
        if self.service_index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateService(descriptor.name));
        }
        if self.services.len() >= SERVICES_MAX {
            return Err(RegistryError::ServiceTableFull(SERVICES_MAX));
        }
        if let Some(class) = descriptor.compatible {
            if self.class(class).is_none() {
                return Err(RegistryError::UnknownClass(format!("#{}", class.0)));
            }
        }
        for (i, method) in descriptor.methods.iter().enumerate() {
            if descriptor.methods[..i].iter().any(|m| m.name == method.name) {
                return Err(RegistryError::DuplicateMethod {
                    service: descriptor.name.clone(),
                    method: method.name.clone(),
                });
            }
        }

        let id = ServiceId(self.services.len());
        self.service_index.insert(descriptor.name.clone(), id);
        self.services.push(descriptor);
        Ok(id)
    }

    pub fn service(&self, id: ServiceId) -> Option<&ServiceDescriptor> {
        self.services.get(id.0)
    }

    pub fn lookup_service_id(&self, name: &str) -> Option<ServiceId> {
        self.service_index.get(name).copied()
    }

    pub fn lookup_service_by_name(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.lookup_service_id(name).and_then(|id| self.service(id))
    }

    /// First registered service whose compatible class is exactly `class`.
    pub fn lookup_service_by_class(&self, class: ClassId) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.compatible == Some(class))
    }

    /// Services in registration order.
    pub fn services(&self) -> impl Iterator<Item = (ServiceId, &ServiceDescriptor)> {
        self.services
            .iter()
            .enumerate()
            .map(|(i, s)| (ServiceId(i), s))
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Ends the startup phase. Later registrations are rejected.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn ensure_unsealed(&self) -> Result<(), RegistryError> {
        if self.sealed {
            Err(RegistryError::Sealed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn service_mut(&mut self, id: ServiceId) -> Option<&mut ServiceDescriptor> {
        self.services.get_mut(id.0)
    }
}

/// Iterator over a class and its superclasses.
pub struct Ancestry<'a> {
    registry: &'a Registry,
    next: Option<ClassId>,
}

impl Iterator for Ancestry<'_> {
    type Item = ClassId;

    fn next(&mut self) -> Option<ClassId> {
        let current = self.next?;
        self.next = self
            .registry
            .class(current)
            .and_then(ClassDescriptor::superclass);
        Some(current)
    }
}

//! Runtime object tree and compatibility binding.

use crate::registry::{ClassId, Registry, ServiceId};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Binding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("object \"{0}\" without class")]
    MissingClass(String),
}

/// Object tree errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectTreeError {
    #[error("invalid object path: \"{0}\"")]
    InvalidPath(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),
}

/// A node in the IPC-exposed object tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInstance {
    path: String,
    class: Option<ClassId>,
    services: Vec<ServiceId>,
}

impl ObjectInstance {
    pub fn new(path: impl Into<String>, class: Option<ClassId>) -> Self {
        Self {
            path: path.into(),
            class,
            services: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last component of the object path.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn class(&self) -> Option<ClassId> {
        self.class
    }

    /// Attached services, in attachment order.
    pub fn services(&self) -> &[ServiceId] {
        &self.services
    }

    pub fn has_service(&self, service: ServiceId) -> bool {
        self.services.contains(&service)
    }

    /// Attaches a service. Returns `false` if it was already attached.
    pub fn attach_service(&mut self, service: ServiceId) -> bool {
        if self.has_service(service) {
            return false;
        }
        self.services.push(service);
        true
    }
}

/// Attaches every registered service compatible with the object's class or
/// any of its superclasses.
///
/// Returns the number of newly attached services. An object without a class
/// is left untouched.
pub fn bind_compatible_services(
    registry: &Registry,
    object: &mut ObjectInstance,
) -> Result<usize, BindingError> {
    let Some(class) = object.class else {
        error!(path = %object.path, "object without class");
        return Err(BindingError::MissingClass(object.path.clone()));
    };

    debug!(
        path = %object.path,
        class = registry.class_name(class).unwrap_or("?"),
        "binding compatible services"
    );

    let mut attached = 0;
    for (id, service) in registry.services() {
        let Some(target) = service.compatible() else {
            continue;
        };
        if registry.is_subclass_of(class, target) && object.attach_service(id) {
            debug!(path = %object.path, service = service.name(), "service attached");
            attached += 1;
        }
    }

    Ok(attached)
}

/// Objects keyed by path.
#[derive(Debug, Default)]
pub struct ObjectTree {
    objects: BTreeMap<String, ObjectInstance>,
}

impl ObjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object. Paths are absolute and unique.
    pub fn insert(&mut self, object: ObjectInstance) -> Result<&mut ObjectInstance, ObjectTreeError> {
        if !is_valid_path(&object.path) {
            return Err(ObjectTreeError::InvalidPath(object.path));
        }
        if self.objects.contains_key(&object.path) {
            return Err(ObjectTreeError::AlreadyExists(object.path));
        }
        let path = object.path.clone();
        Ok(self.objects.entry(path).or_insert(object))
    }

    pub fn remove(&mut self, path: &str) -> Option<ObjectInstance> {
        self.objects.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&ObjectInstance> {
        self.objects.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectInstance> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Joins a child name onto a parent path.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn is_valid_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    path.starts_with('/')
        && !path.ends_with('/')
        && path[1..].split('/').all(|component| {
            !component.is_empty()
                && component
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        })
}

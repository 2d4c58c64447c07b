//! Startup pass routing unbound methods to configured extensions.

use crate::config::Config;
use crate::registry::{ExtensionHook, MethodBinding, Registry, RegistryError, ServiceId};
use tracing::debug;

/// For every service with a same-named extension, binds each method that has
/// no handler yet to the extension's same-named action. Actions without a
/// command bind nothing.
///
/// Must run before the registry is sealed. Running it twice installs nothing
/// new. Returns the number of hooks installed.
pub fn bind_extensions(registry: &mut Registry, config: &Config) -> Result<usize, RegistryError> {
    registry.ensure_unsealed()?;

    let ids: Vec<ServiceId> = registry.services().map(|(id, _)| id).collect();
    let mut installed = 0;

    for id in ids {
        let Some(service) = registry.service_mut(id) else {
            continue;
        };
        let Some(extension) = config.find_extension(service.name()) else {
            continue;
        };

        let service_name = service.name().to_string();
        for method in service.methods_mut() {
            if !matches!(method.binding(), MethodBinding::Unbound) {
                continue;
            }
            if extension.find_script(method.name()).is_none() {
                continue;
            }

            debug!(
                service = %service_name,
                method = %method.name(),
                extension = %extension.name,
                "registering extension hook"
            );
            let hook = ExtensionHook {
                extension: extension.name.clone(),
                action: method.name().to_string(),
            };
            method.set_binding(MethodBinding::Extension(hook));
            installed += 1;
        }
    }

    Ok(installed)
}

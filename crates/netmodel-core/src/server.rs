//! Call routing over the object tree.

use crate::extension::{ExtensionDispatcher, PendingCall};
use crate::ipc::{Connection, ErrorName, IpcError, MethodCall, Reply};
use crate::model::{self, ModelError};
use crate::object::{ObjectInstance, ObjectTree};
use crate::registry::{MethodBinding, Registry};
use crate::types::LinkType;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What became of a routed call.
#[derive(Debug)]
pub enum CallDisposition {
    /// Served in-process; the reply has been sent.
    Replied,
    /// Served by an extension action that is still running.
    Pending(PendingCall),
    /// Failed before anything ran; the error reply has been sent.
    Rejected(IpcError),
}

/// Owns the sealed registry and the object tree, and routes calls to
/// built-in handlers or extension actions.
pub struct ObjectServer {
    registry: Arc<Registry>,
    objects: RwLock<ObjectTree>,
    dispatcher: ExtensionDispatcher,
}

impl ObjectServer {
    pub fn new(registry: Registry, objects: ObjectTree, dispatcher: ExtensionDispatcher) -> Self {
        Self {
            registry: Arc::new(registry),
            objects: RwLock::new(objects),
            dispatcher,
        }
    }

    /// Builds the registry from the dispatcher's configuration and creates
    /// the initial objects.
    pub fn bootstrap(dispatcher: ExtensionDispatcher) -> Result<Self, ModelError> {
        let registry = model::build_registry(dispatcher.config())?;
        let objects = model::create_initial_objects(&registry)?;
        Ok(Self::new(registry, objects, dispatcher))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn object(&self, path: &str) -> Option<ObjectInstance> {
        self.objects.read().get(path).cloned()
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.objects
            .read()
            .iter()
            .map(|o| o.path().to_string())
            .collect()
    }

    /// Creates `/Interface/<name>` for a discovered interface.
    pub fn add_interface(&self, name: &str, link: LinkType) -> Result<String, ModelError> {
        let object = model::new_interface_object(&self.registry, name, link)?;
        let mut objects = self.objects.write();
        let path = objects.insert(object)?.path().to_string();
        info!(path = %path, link_type = %link, "interface object created");
        Ok(path)
    }

    pub fn remove_object(&self, path: &str) -> Option<ObjectInstance> {
        let removed = self.objects.write().remove(path);
        if removed.is_some() {
            info!(path = %path, "object removed");
        }
        removed
    }

    /// Routes one call. Exactly one reply is sent over `conn` for it, either
    /// before this returns or when the extension action finishes.
    pub fn handle_call(&self, conn: Arc<dyn Connection>, call: MethodCall) -> CallDisposition {
        debug!(
            serial = call.serial,
            path = %call.path,
            interface = %call.interface,
            method = %call.member,
            "incoming call"
        );

        let object = match self.resolve(&call) {
            Ok(Resolved::BuiltIn(reply)) => {
                let disposition = match reply.error() {
                    Some(e) => CallDisposition::Rejected(e.clone()),
                    None => CallDisposition::Replied,
                };
                send(conn.as_ref(), reply);
                return disposition;
            }
            Ok(Resolved::Extension(object)) => object,
            Err(e) => {
                send(conn.as_ref(), call.error_reply(e.clone()));
                return CallDisposition::Rejected(e);
            }
        };

        match self.dispatcher.call(conn, &object, call) {
            Ok(pending) => CallDisposition::Pending(pending),
            Err(e) => CallDisposition::Rejected(e.to_ipc_error()),
        }
    }

    fn resolve(&self, call: &MethodCall) -> Result<Resolved, IpcError> {
        let objects = self.objects.read();
        let object = objects.get(&call.path).ok_or_else(|| {
            IpcError::new(
                ErrorName::UnknownObject,
                format!("no object at path {}", call.path),
            )
        })?;

        let service = object
            .services()
            .iter()
            .filter_map(|id| self.registry.service(*id))
            .find(|s| s.name() == call.interface)
            .ok_or_else(|| {
                IpcError::new(
                    ErrorName::UnknownInterface,
                    format!("{}: no/unknown interface {}", call.path, call.interface),
                )
            })?;

        let unknown_method = || {
            IpcError::new(
                ErrorName::UnknownMethod,
                format!("{}: no/unknown method {}", call.interface, call.member),
            )
        };
        let method = service.method(&call.member).ok_or_else(unknown_method)?;

        match method.binding() {
            MethodBinding::Unbound => Err(unknown_method()),
            MethodBinding::BuiltIn(handler) => {
                let reply = match handler.call(object, call) {
                    Ok(values) => call.method_return(values),
                    Err(e) => call.error_reply(e),
                };
                Ok(Resolved::BuiltIn(reply))
            }
            MethodBinding::Extension(_) => Ok(Resolved::Extension(object.clone())),
        }
    }
}

enum Resolved {
    BuiltIn(Reply),
    Extension(ObjectInstance),
}

fn send(conn: &dyn Connection, reply: Reply) {
    if let Err(e) = conn.send(reply) {
        error!(error = %e, "unable to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extension::{ProcessDelegate, ProcessExecutor, ProcessExit};
    use crate::ipc::LocalConnection;
    use futures::FutureExt;
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExecutor {
        spawned: AtomicUsize,
    }

    impl ProcessExecutor for CountingExecutor {
        fn spawn(&self, _delegate: &ProcessDelegate) -> io::Result<ProcessExit> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(async { Ok::<_, io::Error>(ExitStatus::from_raw(0)) }.boxed())
        }
    }

    const CONFIG: &str = r#"<config><linktype>
        <extension name="org.netmodel.Interface.Ethernet" type="ethernet">
          <action name="changeDevice" command="/usr/lib/netmodel/ethtool %{name}"/>
        </extension>
      </linktype></config>"#;

    fn server() -> (ObjectServer, Arc<CountingExecutor>) {
        let executor = Arc::new(CountingExecutor::default());
        let config = Arc::new(Config::parse_str(CONFIG).unwrap());
        let dir = std::env::temp_dir();
        let dispatcher = ExtensionDispatcher::new(config, executor.clone()).with_temp_dir(dir);
        let server = ObjectServer::bootstrap(dispatcher).unwrap();
        server.add_interface("eth0", LinkType::Ethernet).unwrap();
        (server, executor)
    }

    fn rejected_with(disposition: CallDisposition) -> ErrorName {
        match disposition {
            CallDisposition::Rejected(e) => e.name,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_builtin_method() {
        let (server, _) = server();
        let (conn, mut rx) = LocalConnection::new();

        let disposition = server.handle_call(
            Arc::new(conn),
            MethodCall::new(1, "/", model::ROOT_SERVICE, "getVersion"),
        );

        assert!(matches!(disposition, CallDisposition::Replied));
        assert_eq!(
            rx.try_recv().unwrap(),
            Reply::Return {
                reply_serial: 1,
                values: vec![model::VERSION.into()]
            }
        );
    }

    #[test]
    fn test_routing_errors() {
        let (server, executor) = server();
        let (conn, mut rx) = LocalConnection::new();
        let conn: Arc<dyn Connection> = Arc::new(conn);

        let cases = [
            (
                MethodCall::new(1, "/Interface/eth9", model::INTERFACE_SERVICE, "linkUp"),
                ErrorName::UnknownObject,
            ),
            (
                MethodCall::new(2, "/Interface/eth0", "org.netmodel.Interface.Vlan", "changeDevice"),
                ErrorName::UnknownInterface,
            ),
            (
                MethodCall::new(3, "/Interface/eth0", model::INTERFACE_SERVICE, "reboot"),
                ErrorName::UnknownMethod,
            ),
        ];
        for (call, expected) in cases {
            let serial = call.serial;
            assert_eq!(rejected_with(server.handle_call(conn.clone(), call)), expected);
            let reply = rx.try_recv().unwrap();
            assert_eq!(reply.reply_serial(), serial);
            assert_eq!(reply.error().unwrap().name, expected);
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(executor.spawned.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unbound_method_fails_without_spawning() {
        let (server, executor) = server();
        let (conn, mut rx) = LocalConnection::new();

        let disposition = server.handle_call(
            Arc::new(conn),
            MethodCall::new(4, "/Interface/eth0", "org.netmodel.Interface.Ethernet", "deleteDevice"),
        );

        assert_eq!(rejected_with(disposition), ErrorName::UnknownMethod);
        assert!(rx.try_recv().unwrap().is_error());
        assert!(rx.try_recv().is_err());
        assert_eq!(executor.spawned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extension_method_is_dispatched() {
        let (server, executor) = server();
        let (conn, mut rx) = LocalConnection::new();

        let disposition = server.handle_call(
            Arc::new(conn),
            MethodCall::new(5, "/Interface/eth0", "org.netmodel.Interface.Ethernet", "changeDevice"),
        );
        let CallDisposition::Pending(pending) = disposition else {
            panic!("expected pending call");
        };

        assert!(pending.wait().await.is_success());
        assert_eq!(executor.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), Reply::Return { reply_serial: 5, values: vec![] });
    }

    #[test]
    fn test_interface_lifecycle() {
        let (server, _) = server();
        assert!(server.object("/Interface/eth0").is_some());
        assert!(matches!(
            server.add_interface("eth0", LinkType::Ethernet),
            Err(ModelError::Tree(_))
        ));

        assert!(server.remove_object("/Interface/eth0").is_some());
        assert!(server.remove_object("/Interface/eth0").is_none());
        assert_eq!(server.object_paths(), vec!["/", "/Interface"]);
    }
}

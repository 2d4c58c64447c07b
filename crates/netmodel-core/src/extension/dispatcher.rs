//! Asynchronous extension calls.
//!
//! A call bound to an extension action is served by an external command:
//!
//! 1. the extension and its action are resolved from the call's interface
//!    and method names;
//! 2. the call is marshaled into a fresh temp file and a second, empty temp
//!    file is provisioned for the return payload;
//! 3. the command runs with both paths exported as `NETMODEL_ARGFILE` and
//!    `NETMODEL_RETFILE`;
//! 4. when the process exits, exactly one reply goes back over the
//!    connection the call arrived on and both temp files are removed.
//!
//! Steps 1 to 3 run synchronously on the caller's task. Step 4 runs in a
//! spawned task and keeps filesystem work off the async workers, so the
//! caller's loop is free as soon as the process is running.

use super::process::{
    ProcessDelegate, ProcessExecutor, ProcessExit, ARGFILE_ENV, PIDFILE_ENV, RETFILE_ENV,
};
use crate::config::{Config, EvalContext};
use crate::ipc::{Connection, ErrorName, IpcError, MethodCall};
use crate::object::ObjectInstance;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default wall-clock limit for one action.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Message of the error reply sent when an action fails.
pub const SCRIPT_FAILURE_MESSAGE: &str = "extension script returns error";

/// Errors detected before the action's process is running.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no/unknown interface {0}")]
    UnknownInterface(String),

    #[error("no/unknown extension method {0}")]
    UnknownMethod(String),

    #[error("{method} - general failure when executing method: {reason}")]
    General { method: String, reason: String },

    #[error("error executing method {method}: {source}")]
    Spawn {
        method: String,
        #[source]
        source: io::Error,
    },
}

impl DispatchError {
    /// The error reply sent to the caller.
    pub fn to_ipc_error(&self) -> IpcError {
        match self {
            Self::UnknownInterface(name) => IpcError::new(
                ErrorName::ServiceUnknown,
                format!("no/unknown interface {name}"),
            ),
            Self::UnknownMethod(name) => IpcError::new(
                ErrorName::UnknownMethod,
                format!("no/unknown extension method {name}"),
            ),
            Self::General { method, .. } => {
                IpcError::failed(format!("{method} - general failure when executing method"))
            }
            Self::Spawn { method, .. } => {
                IpcError::failed(format!("error executing method {method}"))
            }
        }
    }
}

/// How an action that was started ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Completed,
    ScriptFailed { code: Option<i32> },
    TimedOut,
    WaitFailed(String),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// An action whose process is running.
#[derive(Debug)]
pub struct PendingCall {
    execution_id: String,
    handle: JoinHandle<CallOutcome>,
}

impl PendingCall {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Waits for the process to exit and the reply to be sent.
    pub async fn wait(self) -> CallOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => CallOutcome::WaitFailed(format!("completion task failed: {e}")),
        }
    }
}

/// Runs extension actions for incoming calls.
#[derive(Clone)]
pub struct ExtensionDispatcher {
    config: Arc<Config>,
    executor: Arc<dyn ProcessExecutor>,
    timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ExtensionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionDispatcher")
            .field("timeout", &self.timeout)
            .field("temp_dir", &self.temp_dir)
            .finish_non_exhaustive()
    }
}

impl ExtensionDispatcher {
    pub fn new(config: Arc<Config>, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            config,
            executor,
            timeout: DEFAULT_ACTION_TIMEOUT,
            temp_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory for argument and return files. Defaults to the system
    /// temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts the action serving `call`.
    ///
    /// On error, the error reply has already been sent over `conn`; the
    /// caller must not reply again. Must be called from within a tokio
    /// runtime.
    pub fn call(
        &self,
        conn: Arc<dyn Connection>,
        object: &ObjectInstance,
        call: MethodCall,
    ) -> Result<PendingCall, DispatchError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        match self.start(&conn, object, &call, &execution_id) {
            Ok(started) => Ok(self.complete(conn, call, execution_id, started)),
            Err(e) => {
                warn!(
                    execution_id = %execution_id,
                    interface = %call.interface,
                    method = %call.member,
                    error = %e,
                    "extension call failed"
                );
                if let Err(send_err) = conn.send(call.error_reply(e.to_ipc_error())) {
                    error!(execution_id = %execution_id, error = %send_err, "unable to send reply");
                }
                Err(e)
            }
        }
    }

    fn start(
        &self,
        conn: &Arc<dyn Connection>,
        object: &ObjectInstance,
        call: &MethodCall,
        execution_id: &str,
    ) -> Result<Started, DispatchError> {
        let extension = self
            .config
            .find_extension(&call.interface)
            .ok_or_else(|| DispatchError::UnknownInterface(call.interface.clone()))?;
        let command = extension
            .find_script(&call.member)
            .ok_or_else(|| DispatchError::UnknownMethod(call.member.clone()))?;

        let general = |reason: String| DispatchError::General {
            method: call.member.clone(),
            reason,
        };

        let context = EvalContext::for_call(call).with("object", object.path());
        let command_line = command
            .evaluate_command(&context)
            .map_err(|e| general(e.to_string()))?;

        let blob = conn.marshal(call).map_err(|e| general(e.message))?;
        let argfile = self
            .write_tempfile("netmodel-args-", &blob)
            .map_err(|e| general(format!("unable to write argument file: {e}")))?;
        let retfile = self
            .write_tempfile("netmodel-ret-", &[])
            .map_err(|e| general(format!("unable to create return file: {e}")))?;

        let mut delegate = ProcessDelegate::new(command_line);
        for assignment in extension.environment_for(&context) {
            if !delegate.putenv(&assignment) {
                warn!(
                    execution_id = %execution_id,
                    extension = %extension.name,
                    putenv = %assignment,
                    "environment expression does not yield NAME=value, skipped"
                );
            }
        }
        if let Some(pidfile) = &extension.pid_file_path {
            delegate.setenv(PIDFILE_ENV, pidfile.evaluate(&context));
        }
        delegate.setenv(ARGFILE_ENV, argfile.to_string_lossy());
        delegate.setenv(RETFILE_ENV, retfile.to_string_lossy());

        debug!(
            execution_id = %execution_id,
            extension = %extension.name,
            command = %delegate.command(),
            "spawning extension action"
        );
        let exit = self
            .executor
            .spawn(&delegate)
            .map_err(|source| DispatchError::Spawn {
                method: call.member.clone(),
                source,
            })?;

        info!(
            execution_id = %execution_id,
            object = %object.path(),
            interface = %call.interface,
            method = %call.member,
            "extension action started"
        );
        Ok(Started {
            exit,
            argfile,
            retfile,
        })
    }

    fn complete(
        &self,
        conn: Arc<dyn Connection>,
        call: MethodCall,
        execution_id: String,
        started: Started,
    ) -> PendingCall {
        let timeout = self.timeout;
        let id = execution_id.clone();

        let handle = tokio::spawn(async move {
            let Started {
                exit,
                argfile,
                retfile,
            } = started;

            let outcome = match tokio::time::timeout(timeout, exit).await {
                Ok(Ok(status)) if status.success() => CallOutcome::Completed,
                Ok(Ok(status)) => CallOutcome::ScriptFailed {
                    code: status.code(),
                },
                Ok(Err(e)) => CallOutcome::WaitFailed(e.to_string()),
                Err(_) => CallOutcome::TimedOut,
            };

            let reply = if outcome.is_success() {
                let return_bytes = return_size(&retfile).await;
                debug!(
                    execution_id = %id,
                    return_bytes,
                    "extension action completed"
                );
                call.method_return(Vec::new())
            } else {
                warn!(
                    execution_id = %id,
                    method = %call.member,
                    outcome = ?outcome,
                    "extension action failed"
                );
                call.error_reply(IpcError::failed(SCRIPT_FAILURE_MESSAGE))
            };

            if let Err(e) = conn.send(reply) {
                error!(execution_id = %id, error = %e, "unable to send reply");
            }

            remove_tempfiles([argfile, retfile], &id).await;
            outcome
        });

        PendingCall {
            execution_id,
            handle,
        }
    }

    fn write_tempfile(&self, prefix: &str, contents: &[u8]) -> io::Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(contents)?;
        file.flush()?;
        Ok(file.into_temp_path())
    }
}

struct Started {
    exit: ProcessExit,
    argfile: TempPath,
    retfile: TempPath,
}

async fn return_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn remove_tempfiles(paths: [TempPath; 2], execution_id: &str) {
    let removal = tokio::task::spawn_blocking(move || paths.map(TempPath::close)).await;
    match removal {
        Ok(results) => {
            for e in results.into_iter().filter_map(Result::err) {
                warn!(execution_id = %execution_id, error = %e, "unable to remove temp file");
            }
        }
        Err(e) => warn!(execution_id = %execution_id, error = %e, "temp file removal task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{LocalConnection, Reply};
    use crate::registry::{ClassId, Registry};
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    struct Spawned {
        delegate: ProcessDelegate,
        argfile_contents: Option<Vec<u8>>,
        retfile_exists: bool,
    }

    /// Records each spawn and exits with a fixed code.
    struct RecordingExecutor {
        exit_code: Option<i32>,
        fail_spawn: bool,
        spawned: Mutex<Vec<Spawned>>,
    }

    impl RecordingExecutor {
        fn exiting(code: i32) -> Arc<Self> {
            Arc::new(Self {
                exit_code: Some(code),
                fail_spawn: false,
                spawned: Mutex::new(Vec::new()),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                exit_code: None,
                fail_spawn: false,
                spawned: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                exit_code: None,
                fail_spawn: true,
                spawned: Mutex::new(Vec::new()),
            })
        }
    }

    impl ProcessExecutor for RecordingExecutor {
        fn spawn(&self, delegate: &ProcessDelegate) -> io::Result<ProcessExit> {
            if self.fail_spawn {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such command"));
            }
            let argfile_contents = delegate.getenv(ARGFILE_ENV).and_then(|p| std::fs::read(p).ok());
            let retfile_exists = delegate
                .getenv(RETFILE_ENV)
                .is_some_and(|p| Path::new(p).is_file());
            self.spawned.lock().push(Spawned {
                delegate: delegate.clone(),
                argfile_contents,
                retfile_exists,
            });

            match self.exit_code {
                Some(code) => Ok(async move { Ok::<_, io::Error>(ExitStatus::from_raw(code << 8)) }.boxed()),
                None => Ok(futures::future::pending::<io::Result<ExitStatus>>().boxed()),
            }
        }
    }

    const CONFIG: &str = r#"<config><api>
        <extension name="foo">
          <pidfile path="/run/foo-%{name}.pid"/>
          <action name="bar" command="/usr/lib/foo/bar %{name} %{arg0}"/>
          <action name="nocommand"/>
          <environment putenv="FOO_MODE=%{method}"/>
          <environment putenv="NETMODEL_ARGFILE=/tmp/hijacked"/>
          <environment putenv="NOASSIGNMENT"/>
        </extension>
      </api></config>"#;

    fn dispatcher(executor: Arc<RecordingExecutor>, dir: &Path) -> ExtensionDispatcher {
        let config = Arc::new(Config::parse_str(CONFIG).unwrap());
        ExtensionDispatcher::new(config, executor).with_temp_dir(dir)
    }

    fn object() -> ObjectInstance {
        let mut registry = Registry::new();
        let class: ClassId = registry.register_class("netif", None).unwrap();
        ObjectInstance::new("/Interface/eth0", Some(class))
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_successful_action() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::exiting(0);
        let (conn, mut rx) = LocalConnection::new();
        let call = MethodCall::new(11, "/Interface/eth0", "foo", "bar").with_arg("up");

        let pending = dispatcher(executor.clone(), dir.path())
            .call(Arc::new(conn), &object(), call.clone())
            .unwrap();
        assert_eq!(pending.wait().await, CallOutcome::Completed);

        let spawned = executor.spawned.lock();
        assert_eq!(spawned.len(), 1);
        let record = &spawned[0];
        assert_eq!(record.delegate.command(), "/usr/lib/foo/bar eth0 up");

        let argfile = record.delegate.getenv(ARGFILE_ENV).unwrap();
        let retfile = record.delegate.getenv(RETFILE_ENV).unwrap();
        assert_ne!(argfile, retfile);
        assert!(Path::new(argfile).starts_with(dir.path()));
        assert!(record.retfile_exists);
        let marshaled = LocalConnection::unmarshal(record.argfile_contents.as_deref().unwrap()).unwrap();
        assert_eq!(marshaled, call);

        assert_eq!(record.delegate.getenv("FOO_MODE"), Some("bar"));
        assert_eq!(record.delegate.getenv("NOASSIGNMENT"), None);
        assert_eq!(record.delegate.getenv(PIDFILE_ENV), Some("/run/foo-eth0.pid"));

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply, Reply::Return { reply_serial: 11, values: vec![] });
        assert!(rx.try_recv().is_err());
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_arguments_stay_single_words() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::exiting(0);
        let (conn, _rx) = LocalConnection::new();
        let call = MethodCall::new(12, "/Interface/eth0", "foo", "bar").with_arg("up; reboot");

        let pending = dispatcher(executor.clone(), dir.path())
            .call(Arc::new(conn), &object(), call)
            .unwrap();
        assert!(pending.wait().await.is_success());

        let spawned = executor.spawned.lock();
        assert_eq!(
            shlex::split(spawned[0].delegate.command()).unwrap(),
            vec!["/usr/lib/foo/bar", "eth0", "up; reboot"]
        );
    }

    #[tokio::test]
    async fn test_unquotable_argument_is_general_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::exiting(0);
        let (conn, mut rx) = LocalConnection::new();
        let call = MethodCall::new(13, "/Interface/eth0", "foo", "bar").with_arg("a\0b");

        let err = dispatcher(executor.clone(), dir.path())
            .call(Arc::new(conn), &object(), call)
            .unwrap_err();

        assert!(matches!(err, DispatchError::General { .. }));
        assert_eq!(
            rx.try_recv().unwrap().error().unwrap().message,
            "bar - general failure when executing method"
        );
        assert!(executor.spawned.lock().is_empty());
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_failing_action() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::exiting(1);
        let (conn, mut rx) = LocalConnection::new();

        let pending = dispatcher(executor.clone(), dir.path())
            .call(Arc::new(conn), &object(), MethodCall::new(5, "/Interface/eth0", "foo", "bar"))
            .unwrap();
        assert_eq!(pending.wait().await, CallOutcome::ScriptFailed { code: Some(1) });

        let reply = rx.try_recv().unwrap();
        let err = reply.error().unwrap();
        assert_eq!(err.name, ErrorName::Failed);
        assert_eq!(err.message, SCRIPT_FAILURE_MESSAGE);
        assert!(rx.try_recv().is_err());
        assert_eq!(executor.spawned.lock().len(), 1);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_resolution_failures_spawn_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::exiting(0);
        let dispatcher = dispatcher(executor.clone(), dir.path());
        let (conn, mut rx) = LocalConnection::new();
        let conn: Arc<dyn Connection> = Arc::new(conn);

        let unknown_interface = dispatcher
            .call(conn.clone(), &object(), MethodCall::new(1, "/", "nope", "bar"))
            .unwrap_err();
        assert!(matches!(unknown_interface, DispatchError::UnknownInterface(_)));
        assert_eq!(
            rx.try_recv().unwrap().error().unwrap().name,
            ErrorName::ServiceUnknown
        );

        for method in ["missing", "nocommand"] {
            let err = dispatcher
                .call(conn.clone(), &object(), MethodCall::new(2, "/", "foo", method))
                .unwrap_err();
            assert!(matches!(err, DispatchError::UnknownMethod(_)));
            assert_eq!(
                rx.try_recv().unwrap().error().unwrap().name,
                ErrorName::UnknownMethod
            );
        }

        assert!(rx.try_recv().is_err());
        assert!(executor.spawned.lock().is_empty());
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_spawn_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, mut rx) = LocalConnection::new();

        let err = dispatcher(RecordingExecutor::failing(), dir.path())
            .call(Arc::new(conn), &object(), MethodCall::new(9, "/", "foo", "bar"))
            .unwrap_err();

        assert!(matches!(err, DispatchError::Spawn { .. }));
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.error().unwrap().message, "error executing method bar");
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_unwritable_temp_dir_is_general_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let executor = RecordingExecutor::exiting(0);
        let (conn, mut rx) = LocalConnection::new();

        let err = dispatcher(executor.clone(), &missing)
            .call(Arc::new(conn), &object(), MethodCall::new(4, "/", "foo", "bar"))
            .unwrap_err();

        assert!(matches!(err, DispatchError::General { .. }));
        assert_eq!(
            rx.try_recv().unwrap().error().unwrap().message,
            "bar - general failure when executing method"
        );
        assert!(executor.spawned.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let (conn, mut rx) = LocalConnection::new();

        let pending = dispatcher(RecordingExecutor::hanging(), dir.path())
            .with_timeout(Duration::from_secs(5))
            .call(Arc::new(conn), &object(), MethodCall::new(3, "/", "foo", "bar"))
            .unwrap();

        assert_eq!(pending.wait().await, CallOutcome::TimedOut);
        assert_eq!(
            rx.try_recv().unwrap().error().unwrap().message,
            SCRIPT_FAILURE_MESSAGE
        );
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::exiting(0);
        let dispatcher = dispatcher(executor.clone(), dir.path());
        let (conn, mut rx) = LocalConnection::new();
        let conn: Arc<dyn Connection> = Arc::new(conn);

        let first = dispatcher
            .call(conn.clone(), &object(), MethodCall::new(1, "/", "foo", "bar"))
            .unwrap();
        let second = dispatcher
            .call(conn.clone(), &object(), MethodCall::new(2, "/", "foo", "bar"))
            .unwrap();
        assert_ne!(first.execution_id(), second.execution_id());

        assert!(first.wait().await.is_success());
        assert!(second.wait().await.is_success());

        let mut serials = vec![
            rx.try_recv().unwrap().reply_serial(),
            rx.try_recv().unwrap().reply_serial(),
        ];
        serials.sort_unstable();
        assert_eq!(serials, vec![1, 2]);

        let spawned = executor.spawned.lock();
        assert_ne!(
            spawned[0].delegate.getenv(ARGFILE_ENV),
            spawned[1].delegate.getenv(ARGFILE_ENV)
        );
    }
}

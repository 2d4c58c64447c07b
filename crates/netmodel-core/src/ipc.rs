//! IPC call, reply and connection contracts.
//!
//! The transport itself (bus connection, wire format) lives outside this
//! crate. The object model only needs to marshal an incoming call into a
//! byte blob, and to send exactly one reply per call back over the
//! connection it arrived on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Error domain of an IPC error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorName {
    Failed,
    ServiceUnknown,
    UnknownObject,
    UnknownInterface,
    UnknownMethod,
    InvalidArgs,
}

impl ErrorName {
    /// Wire name of the error domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "org.freedesktop.DBus.Error.Failed",
            Self::ServiceUnknown => "org.freedesktop.DBus.Error.ServiceUnknown",
            Self::UnknownObject => "org.freedesktop.DBus.Error.UnknownObject",
            Self::UnknownInterface => "org.freedesktop.DBus.Error.UnknownInterface",
            Self::UnknownMethod => "org.freedesktop.DBus.Error.UnknownMethod",
            Self::InvalidArgs => "org.freedesktop.DBus.Error.InvalidArgs",
        }
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IPC error in (domain, message) shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct IpcError {
    pub name: ErrorName,
    pub message: String,
}

impl IpcError {
    pub fn new(name: ErrorName, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
        }
    }

    /// Generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Failed, message)
    }
}

/// An incoming method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Serial number assigned by the sender.
    pub serial: u32,
    /// Target object path.
    pub path: String,
    /// Service (interface) name.
    pub interface: String,
    /// Method name.
    pub member: String,
    /// Call arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(
        serial: u32,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            serial,
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Builds the success reply for this call.
    pub fn method_return(&self, values: Vec<Value>) -> Reply {
        Reply::Return {
            reply_serial: self.serial,
            values,
        }
    }

    /// Builds an error reply for this call.
    pub fn error_reply(&self, error: IpcError) -> Reply {
        Reply::Error {
            reply_serial: self.serial,
            error,
        }
    }
}

/// Reply to a method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Return { reply_serial: u32, values: Vec<Value> },
    Error { reply_serial: u32, error: IpcError },
}

impl Reply {
    pub fn reply_serial(&self) -> u32 {
        match self {
            Self::Return { reply_serial, .. } | Self::Error { reply_serial, .. } => *reply_serial,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn error(&self) -> Option<&IpcError> {
        match self {
            Self::Error { error, .. } => Some(error),
            Self::Return { .. } => None,
        }
    }
}

/// Connection a call arrived on.
///
/// Implementations must be usable from the completion task of an
/// extension call, hence `Send + Sync`.
pub trait Connection: Send + Sync {
    /// Serializes the full call with the transport's own marshaling.
    fn marshal(&self, call: &MethodCall) -> Result<Vec<u8>, IpcError>;

    /// Sends one reply.
    fn send(&self, reply: Reply) -> Result<(), IpcError>;
}

/// Receiving half of a [`LocalConnection`].
pub type ReplyReceiver = mpsc::UnboundedReceiver<Reply>;

/// In-process connection that marshals calls as JSON and delivers replies
/// over a channel. Used by the command-line front end and by tests.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    tx: mpsc::UnboundedSender<Reply>,
}

impl LocalConnection {
    pub fn new() -> (Self, ReplyReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Decodes a blob produced by [`Connection::marshal`].
    pub fn unmarshal(blob: &[u8]) -> Result<MethodCall, IpcError> {
        serde_json::from_slice(blob)
            .map_err(|e| IpcError::new(ErrorName::InvalidArgs, format!("bad call blob: {e}")))
    }
}

impl Connection for LocalConnection {
    fn marshal(&self, call: &MethodCall) -> Result<Vec<u8>, IpcError> {
        serde_json::to_vec(call)
            .map_err(|e| IpcError::failed(format!("unable to marshal call: {e}")))
    }

    fn send(&self, reply: Reply) -> Result<(), IpcError> {
        self.tx
            .send(reply)
            .map_err(|_| IpcError::failed("connection closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_name_wire_strings() {
        assert_eq!(
            ErrorName::ServiceUnknown.as_str(),
            "org.freedesktop.DBus.Error.ServiceUnknown"
        );
        let err = IpcError::failed("boom");
        assert_eq!(err.to_string(), "org.freedesktop.DBus.Error.Failed: boom");
    }

    #[test]
    fn test_local_connection_marshal_and_unmarshal() {
        let (conn, _rx) = LocalConnection::new();
        let call = MethodCall::new(7, "/Interface/eth0", "org.netmodel.Interface", "linkUp")
            .with_arg("fast")
            .with_arg(3);

        let blob = conn.marshal(&call).unwrap();
        let decoded = LocalConnection::unmarshal(&blob).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn test_local_connection_delivers_replies() {
        let (conn, mut rx) = LocalConnection::new();
        let call = MethodCall::new(1, "/", "org.netmodel", "getVersion");

        conn.send(call.method_return(vec![])).unwrap();
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.reply_serial(), 1);
        assert!(!reply.is_error());
    }

    #[test]
    fn test_send_fails_once_receiver_is_gone() {
        let (conn, rx) = LocalConnection::new();
        drop(rx);
        let call = MethodCall::new(1, "/", "org.netmodel", "getVersion");
        let err = conn.send(call.method_return(vec![])).unwrap_err();
        assert_eq!(err.name, ErrorName::Failed);
    }
}

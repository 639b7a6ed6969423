//! Error types for the ObjectStore layer.

use tether_channel::ChannelError;
use tether_wire::RawId;

use crate::value::Value;

/// Errors surfaced by store operations and proxy use.
///
/// `Thrown` and `ThrownValue` are the two renderings of a *user* error — a
/// throw during remote path evaluation — selected by
/// [`RemoteErrorPolicy`](crate::RemoteErrorPolicy). Everything else is a
/// failure of the store itself.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Malformed payload, ill-formed path, or a value that cannot cross this
    /// channel.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A request referenced an id the owner no longer (or never) knew.
    #[error("unknown id {id}")]
    UnknownId { id: RawId },

    /// A by-name request for a name that is not exposed.
    #[error("unknown exposed name {name:?}")]
    UnknownName { name: String },

    /// Remote throw, reconstructed locally (the `newError` policy). The
    /// remote thrown value rides along as `cause`.
    #[error("{name}: {message}")]
    Thrown {
        name: String,
        message: String,
        stack: Option<String>,
        cause: Value,
    },

    /// Remote throw surfaced as the remote value itself (the `remoteObject`
    /// policy).
    #[error("remote value thrown")]
    ThrownValue { value: Value },

    #[error("object store is closed")]
    Closed,

    #[error("name {name:?} is already exposed")]
    DuplicateName { name: String },

    #[error("value is already exposed as {name:?}")]
    AlreadyExposed { name: String },

    #[error("garbage collection sync is disabled")]
    GcDisabled,

    /// Reflection on a proxy that has no shape description yet. Await the
    /// proxy (`resolve`) to obtain a bound proxy first.
    #[error("cannot {operation} an unresolved proxy; await it first")]
    Unbound { operation: &'static str },

    /// The shape description exists but does not carry the requested slot
    /// under the configured prototype policy.
    #[error("shape description does not include {what}")]
    ShapeMissing { what: &'static str },

    #[error("transport error: {0}")]
    Channel(#[from] ChannelError),
}

impl StoreError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        StoreError::Protocol {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        let e = StoreError::UnknownId {
            id: RawId::Index(7),
        };
        assert_eq!(e.to_string(), "unknown id #7");

        let e = StoreError::Thrown {
            name: "Error".into(),
            message: "boom".into(),
            stack: None,
            cause: Value::Undefined,
        };
        assert_eq!(e.to_string(), "Error: boom");

        let e = StoreError::Unbound { operation: "enumerate" };
        assert!(e.to_string().contains("await it first"));
    }

    #[test]
    fn channel_error_converts() {
        let e: StoreError = ChannelError::Disconnected.into();
        assert!(matches!(e, StoreError::Channel(_)));
    }
}

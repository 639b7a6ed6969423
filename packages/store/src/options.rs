//! ObjectStore configuration.

use std::time::Duration;

/// How much prototype information ships with an object's shape description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrototypePolicy {
    /// Ship a reference to the prototype itself. Enables remote `instance_of`
    /// and full prototype-chain reflection.
    #[default]
    Full,
    /// Ship only the flattened list of keys reachable through the chain.
    /// Enables `has` but not chain walking.
    KeysOnly,
    /// Ship neither.
    None,
}

/// How a remote throw surfaces on the requesting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteErrorPolicy {
    /// Reconstruct a local error from the remote message/name/stack, with the
    /// remote value attached as the cause.
    #[default]
    NewError,
    /// Surface the remote value itself.
    RemoteObject,
}

/// Configuration recognized by an [`ObjectStore`](crate::ObjectStore).
#[derive(Debug, Clone)]
pub struct Options {
    pub remote_object_prototype: PrototypePolicy,
    pub remote_error: RemoteErrorPolicy,
    /// Suppress the `"RemoteObject"` stringification sentinel; proxy display
    /// then renders the local path form instead.
    pub no_to_string: bool,
    /// Disable the GC coordinator entirely. Described values accumulate on
    /// the owner until close.
    pub do_not_sync_gc: bool,
    /// Run a sync round periodically when releases are pending. Zero
    /// disables the timer.
    pub schedule_gc_after_time: Duration,
    /// Run a sync round once this many releases are queued. Zero disables
    /// the threshold.
    pub schedule_gc_after_object_count: usize,
    /// Expected one-way latency budget. Ids sent within this window are
    /// protected from release, and introductions within it are reported as
    /// `newItems` during sync.
    pub request_latency: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            remote_object_prototype: PrototypePolicy::default(),
            remote_error: RemoteErrorPolicy::default(),
            no_to_string: false,
            do_not_sync_gc: false,
            schedule_gc_after_time: Duration::ZERO,
            schedule_gc_after_object_count: 0,
            request_latency: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_behavior() {
        let options = Options::default();
        assert_eq!(options.remote_object_prototype, PrototypePolicy::Full);
        assert_eq!(options.remote_error, RemoteErrorPolicy::NewError);
        assert!(!options.no_to_string);
        assert!(!options.do_not_sync_gc);
        assert_eq!(options.schedule_gc_after_time, Duration::ZERO);
        assert_eq!(options.schedule_gc_after_object_count, 0);
        assert_eq!(options.request_latency, Duration::from_secs(1));
    }
}

//! Channel-level message envelopes.

use serde::{Deserialize, Serialize};

use crate::id::{RawId, TaggedId};
use crate::segment::Segment;

/// An inbound request or notification.
///
/// Responses are not messages: the multiplexer correlates them by request id,
/// and their payload is a bare [`ValueDescription`](crate::ValueDescription)
/// (for `remote`) or a [`SyncGcResponse`] (for `syncGcRequest`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Unilateral close notification; the receiver transitions to closed.
    Close,
    /// Evaluate `path` against the value identified by `root` and respond
    /// with the encoded result.
    Remote {
        root: TaggedId,
        path: Vec<Segment>,
    },
    /// Reconcile the holder's pending releases and recently-introduced ids
    /// against the owner's table.
    #[serde(rename_all = "camelCase")]
    SyncGcRequest {
        deleted_items: Vec<RawId>,
        new_items: Vec<RawId>,
    },
}

/// The owner's answer to a `syncGcRequest`: the subset of releases it
/// actually performed and the subset of introduced ids it no longer knows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncGcResponse {
    pub deleted_items: Vec<RawId>,
    pub unknown_new_items: Vec<RawId>,
}

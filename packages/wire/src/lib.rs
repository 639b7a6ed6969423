//! Wire model for the tether remote-object protocol.
//!
//! Everything that crosses the message channel is described here as plain
//! serde types:
//! - [`RawId`] / [`TaggedId`]: per-peer value identifiers with a side tag
//! - [`ValueDescription`]: the encoded form of a value (inline primitives,
//!   references, shape descriptions, errors)
//! - [`Segment`]: one step of a deferred access path
//! - [`Message`] / [`SyncGcResponse`]: the channel-level message envelopes
//!
//! This crate carries no behavior beyond validation helpers; encoding and
//! decoding live in `tether-store`.

mod description;
mod id;
mod message;
mod segment;

pub use description::{
    ErrorDescription, KeyDescription, Reference, ShapeDescription, TaggedDescription,
    ValueDescription,
};
pub use id::{RawId, Side, TaggedId};
pub use message::{Message, SyncGcResponse};
pub use segment::{validate_path, PathShapeError, Segment};

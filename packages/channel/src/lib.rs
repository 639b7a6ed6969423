//! Transport seam for the tether remote-object protocol.
//!
//! The ObjectStore does not speak to a network; it speaks to a
//! [`MessageChannel`] — a request/response multiplexer that delivers opaque
//! JSON-shaped payloads and correlates responses by request id. Anything that
//! can move JSON both ways (a websocket, a pipe, an in-process queue) can sit
//! behind this trait.
//!
//! The inverse seam is [`InboundHandler`]: the interface an ObjectStore
//! exposes to the transport for requests arriving *from* the peer.
//!
//! [`LoopbackChannel`] wires two handlers together in process, with no
//! serialization boundary beyond the payload type itself. It is the channel
//! the protocol is developed and tested against.

mod loopback;

use async_trait::async_trait;

pub use loopback::LoopbackChannel;

/// The opaque payload shuttled across a channel.
pub type Payload = serde_json::Value;

/// Transport-level failures. Anything protocol-shaped travels inside
/// payloads; these are the errors of the pipe itself.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("channel disconnected")]
    Disconnected,

    #[error("no inbound handler is connected")]
    NoHandler,

    #[error("peer produced no response payload")]
    NoResponse,

    #[error("request rejected by handler: {message}")]
    Handler { message: String },
}

/// Outbound half: what the ObjectStore consumes.
///
/// `request` must resolve with the peer's response payload or reject with a
/// transport error; correlation, timeouts and retries are the implementor's
/// business.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send a request payload and await the correlated response payload.
    async fn request(&self, payload: Payload) -> Result<Payload, ChannelError>;

    /// Send a one-way notification (no response expected).
    async fn notify(&self, payload: Payload) -> Result<(), ChannelError>;

    /// Feed an inbound frame into the multiplexer (a response to an earlier
    /// `request`). Channels that perform their own correlation, like the
    /// loopback, have no use for this and keep the default.
    async fn new_message(&self, _payload: Payload) -> Result<(), ChannelError> {
        Err(ChannelError::NoHandler)
    }
}

/// Inbound half: what an ObjectStore implements.
///
/// Returns `Some(response)` for requests, `None` for notifications. An `Err`
/// means the frame could not be served at all; the transport is responsible
/// for surfacing that to the peer.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_message(&self, payload: Payload) -> Result<Option<Payload>, ChannelError>;
}

#[async_trait]
impl<T: InboundHandler + ?Sized> InboundHandler for std::sync::Arc<T> {
    async fn handle_message(&self, payload: Payload) -> Result<Option<Payload>, ChannelError> {
        self.as_ref().handle_message(payload).await
    }
}

//! In-process channel pair.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;

use crate::{ChannelError, InboundHandler, MessageChannel, Payload};

/// One endpoint of an in-process channel pair.
///
/// Each endpoint delivers its outbound traffic directly to the *peer*
/// endpoint's connected handler. Handlers are held weakly so a channel never
/// keeps a store alive.
///
/// ```ignore
/// let (a, b) = LoopbackChannel::pair();
/// let store_a = Arc::new(ObjectStore::new(a.clone(), Options::default()));
/// let store_b = Arc::new(ObjectStore::new(b.clone(), Options::default()));
/// a.connect(store_a.clone());
/// b.connect(store_b.clone());
/// ```
pub struct LoopbackChannel {
    peer: OnceLock<Weak<LoopbackChannel>>,
    handler: OnceLock<Weak<dyn InboundHandler>>,
}

impl LoopbackChannel {
    /// Create two cross-linked endpoints.
    pub fn pair() -> (Arc<LoopbackChannel>, Arc<LoopbackChannel>) {
        let a = Arc::new(LoopbackChannel {
            peer: OnceLock::new(),
            handler: OnceLock::new(),
        });
        let b = Arc::new(LoopbackChannel {
            peer: OnceLock::new(),
            handler: OnceLock::new(),
        });
        a.peer.set(Arc::downgrade(&b)).ok();
        b.peer.set(Arc::downgrade(&a)).ok();
        (a, b)
    }

    /// Connect the local handler (the store living at this endpoint).
    /// Connecting twice is a no-op; the first handler wins.
    pub fn connect(&self, handler: Arc<dyn InboundHandler>) {
        let _ = self.handler.set(Arc::downgrade(&handler));
    }

    fn peer_handler(&self) -> Result<Arc<dyn InboundHandler>, ChannelError> {
        let peer = self
            .peer
            .get()
            .and_then(Weak::upgrade)
            .ok_or(ChannelError::Disconnected)?;
        peer.handler
            .get()
            .and_then(Weak::upgrade)
            .ok_or(ChannelError::NoHandler)
    }
}

#[async_trait]
impl MessageChannel for LoopbackChannel {
    async fn request(&self, payload: Payload) -> Result<Payload, ChannelError> {
        let handler = self.peer_handler()?;
        handler
            .handle_message(payload)
            .await?
            .ok_or(ChannelError::NoResponse)
    }

    async fn notify(&self, payload: Payload) -> Result<(), ChannelError> {
        let handler = self.peer_handler()?;
        handler.handle_message(payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl InboundHandler for Echo {
        async fn handle_message(&self, payload: Payload) -> Result<Option<Payload>, ChannelError> {
            Ok(Some(json!({"echo": payload})))
        }
    }

    struct Mute;

    #[async_trait]
    impl InboundHandler for Mute {
        async fn handle_message(&self, _payload: Payload) -> Result<Option<Payload>, ChannelError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn request_reaches_peer_handler() {
        let (a, b) = LoopbackChannel::pair();
        let echo: Arc<dyn InboundHandler> = Arc::new(Echo);
        b.connect(echo.clone());

        let response = a.request(json!(1)).await.unwrap();
        assert_eq!(response, json!({"echo": 1}));
        drop(echo);
    }

    #[tokio::test]
    async fn request_without_peer_handler_fails() {
        let (a, _b) = LoopbackChannel::pair();
        let err = a.request(json!(1)).await.unwrap_err();
        assert!(matches!(err, ChannelError::NoHandler));
    }

    #[tokio::test]
    async fn request_after_peer_dropped_fails() {
        let (a, b) = LoopbackChannel::pair();
        drop(b);
        let err = a.request(json!(1)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Disconnected));
    }

    #[tokio::test]
    async fn request_expecting_response_fails_on_notification_handler() {
        let (a, b) = LoopbackChannel::pair();
        let mute: Arc<dyn InboundHandler> = Arc::new(Mute);
        b.connect(mute.clone());

        let err = a.request(json!(1)).await.unwrap_err();
        assert!(matches!(err, ChannelError::NoResponse));
        drop(mute);
    }

    #[tokio::test]
    async fn notify_ignores_missing_response() {
        let (a, b) = LoopbackChannel::pair();
        let mute: Arc<dyn InboundHandler> = Arc::new(Mute);
        b.connect(mute.clone());

        a.notify(json!({"type": "close"})).await.unwrap();
        drop(mute);
    }

    #[tokio::test]
    async fn handler_is_held_weakly() {
        let (a, b) = LoopbackChannel::pair();
        let echo: Arc<dyn InboundHandler> = Arc::new(Echo);
        b.connect(echo.clone());
        drop(echo);

        let err = a.request(json!(1)).await.unwrap_err();
        assert!(matches!(err, ChannelError::NoHandler));
    }

    #[tokio::test]
    async fn default_new_message_is_unsupported() {
        let (a, _b) = LoopbackChannel::pair();
        let err = a.new_message(json!(1)).await.unwrap_err();
        assert!(matches!(err, ChannelError::NoHandler));
    }
}

//! The ObjectStore facade.
//!
//! One store per peer: it owns the two tables, routes inbound messages to
//! the path evaluator and the GC coordinator, sends outbound requests
//! through the message channel, and gates everything on the open/closed
//! lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;

use tether_channel::{ChannelError, InboundHandler, MessageChannel, Payload};
use tether_wire::{
    ErrorDescription, Message, RawId, Segment, Side, SyncGcResponse, TaggedDescription, TaggedId,
    ValueDescription,
};

use crate::error::StoreError;
use crate::eval::EvalError;
use crate::local_table::LocalTable;
use crate::options::Options;
use crate::proxy::Proxy;
use crate::remote_table::{CleanupQueue, RemoteTable};
use crate::value::Value;

/// Poison-recovering lock. A panic inside a table must not wedge the store:
/// the tables stay structurally consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct GcFlight {
    pub running: bool,
    pub rerun: bool,
}

pub(crate) struct StoreInner {
    options: Options,
    pub(crate) channel: Arc<dyn MessageChannel>,
    closed: AtomicBool,
    pub(crate) local: Mutex<LocalTable>,
    pub(crate) remote: Mutex<RemoteTable>,
    pub(crate) cleanup: Arc<CleanupQueue>,
    pub(crate) gc_flight: Mutex<GcFlight>,
    pub(crate) self_weak: Weak<StoreInner>,
    timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StoreInner {
    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Send a `remote` request and decode its response.
    pub(crate) async fn send_remote(
        &self,
        root: RawId,
        path: Vec<Segment>,
    ) -> Result<Value, StoreError> {
        self.ensure_open()?;
        tracing::trace!(root = %root, segments = path.len(), "sending remote request");
        let message = Message::Remote {
            root: TaggedId {
                side: Side::Remote,
                id: root,
            },
            path,
        };
        let payload = serde_json::to_value(&message)
            .map_err(|e| StoreError::protocol(format!("failed to encode request: {e}")))?;
        let response = self.channel.request(payload).await?;
        let description: ValueDescription = serde_json::from_value(response)
            .map_err(|e| StoreError::protocol(format!("malformed response: {e}")))?;
        self.decode_value(description).await
    }

    /// Inbound dispatch: `remote` to the path evaluator, `syncGcRequest` to
    /// the coordinator, `close` to the lifecycle. Malformed payloads fail
    /// locally with a protocol error and produce no response bytes.
    pub(crate) async fn handle_message(
        &self,
        payload: Payload,
    ) -> Result<Option<Payload>, StoreError> {
        let message: Message = serde_json::from_value(payload)
            .map_err(|e| StoreError::protocol(format!("malformed message: {e}")))?;
        match message {
            Message::Close => {
                self.close(false).await;
                Ok(None)
            }
            Message::Remote { root, path } => {
                let root = root.flipped();
                if root.side != Side::Local {
                    return Err(StoreError::protocol(
                        "request root is not owned by this peer",
                    ));
                }
                if self.is_closed() {
                    // Best effort: let the peer learn the state.
                    return Ok(Some(encode_payload(&store_error_description(
                        &StoreError::Closed,
                    ))?));
                }
                tracing::debug!(root = %root.id, segments = path.len(), "evaluating inbound path");
                let description = match self.evaluate_path(&root.id, &path).await {
                    Ok(value) => match self.encode_value(&value) {
                        Ok(description) => description,
                        Err(e) => store_error_description(&e),
                    },
                    Err(EvalError::Thrown(thrown)) => self.thrown_description(thrown),
                    Err(EvalError::Store(e)) => store_error_description(&e),
                };
                Ok(Some(encode_payload(&description)?))
            }
            Message::SyncGcRequest {
                deleted_items,
                new_items,
            } => {
                if self.is_closed() {
                    return Ok(Some(encode_payload(&SyncGcResponse::default())?));
                }
                let response = self.handle_sync_gc(deleted_items, new_items);
                Ok(Some(encode_payload(&response)?))
            }
        }
    }

    /// Encode a thrown value as an error description, with recoverable
    /// metadata when the throw was error-like.
    fn thrown_description(&self, thrown: Value) -> ValueDescription {
        let (name, message, stack) = thrown.error_like();
        let value = match self.encode_value(&thrown) {
            Ok(description) => description,
            Err(_) => ValueDescription::String(format!("{:?}", thrown)),
        };
        ValueDescription::Tagged(TaggedDescription::Error(ErrorDescription {
            value: Box::new(value),
            message,
            stack,
            name,
        }))
    }

    pub(crate) async fn close(&self, notify: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing object store");
        if notify {
            if let Ok(payload) = serde_json::to_value(&Message::Close) {
                let _ = self.channel.notify(payload).await;
            }
        }
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }
        self.cleanup.disable();
        lock(&self.local).clear();
        lock(&self.remote).clear();
    }

    fn spawn_gc_timer(&self) {
        let interval = self.options.schedule_gc_after_time;
        if self.options.do_not_sync_gc || interval.is_zero() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.self_weak.clone();
        let task = handle.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.is_closed() {
                    break;
                }
                if inner.cleanup.len() > 0 {
                    let _ = inner.sync_gc().await;
                }
            }
        });
        *lock(&self.timer) = Some(task);
    }
}

fn encode_payload<T: serde::Serialize>(value: &T) -> Result<Payload, StoreError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::protocol(format!("failed to encode response: {e}")))
}

/// Store-level failures answered to the peer as error descriptions, so the
/// requester can rethrow them.
fn store_error_description(error: &StoreError) -> ValueDescription {
    let name = match error {
        StoreError::UnknownId { .. } => "UnknownIdError",
        StoreError::UnknownName { .. } => "UnknownNameError",
        StoreError::Protocol { .. } => "ProtocolError",
        StoreError::Closed => "ClosedError",
        _ => "StoreError",
    };
    let message = error.to_string();
    ValueDescription::Tagged(TaggedDescription::Error(ErrorDescription {
        value: Box::new(ValueDescription::String(message.clone())),
        message: Some(message),
        stack: None,
        name: Some(name.to_string()),
    }))
}

/// One peer's end of the protocol.
///
/// Wrap it in an `Arc` and connect it to the transport as the inbound
/// handler:
///
/// ```ignore
/// let (a, b) = LoopbackChannel::pair();
/// let owner = Arc::new(ObjectStore::new(a.clone(), Options::default()));
/// a.connect(owner.clone());
/// ```
pub struct ObjectStore {
    inner: Arc<StoreInner>,
}

impl ObjectStore {
    pub fn new(channel: Arc<dyn MessageChannel>, options: Options) -> ObjectStore {
        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let cleanup = CleanupQueue::new(
                weak.clone(),
                options.schedule_gc_after_object_count,
                !options.do_not_sync_gc,
            );
            StoreInner {
                options,
                channel,
                closed: AtomicBool::new(false),
                local: Mutex::new(LocalTable::new()),
                remote: Mutex::new(RemoteTable::new()),
                cleanup,
                gc_flight: Mutex::new(GcFlight {
                    running: false,
                    rerun: false,
                }),
                self_weak: weak.clone(),
                timer: Mutex::new(None),
            }
        });
        inner.spawn_gc_timer();
        ObjectStore { inner }
    }

    /// Make `value` reachable by `name` on the remote. The binding lives
    /// until close.
    pub fn expose(&self, name: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        self.inner.ensure_open()?;
        lock(&self.inner.local).expose(name, value.into())
    }

    /// Fetch the value exposed as `name` on the peer. Objects and functions
    /// arrive as *bound* proxies; a second request for the same name yields
    /// the identical proxy while it is alive.
    pub async fn request(&self, name: &str) -> Result<Value, StoreError> {
        self.inner
            .send_remote(RawId::Name(name.to_string()), Vec::new())
            .await
    }

    /// An *unbound* proxy for `name`, synchronously. Existence of the name
    /// is not validated until the first use.
    pub fn get(&self, name: &str) -> Result<Proxy, StoreError> {
        self.inner.ensure_open()?;
        Ok(Proxy::new_root(
            self.inner.self_weak.clone(),
            RawId::Name(name.to_string()),
            None,
        ))
    }

    /// Dispatch an inbound payload from the transport.
    pub async fn handle_message(&self, payload: Payload) -> Result<Option<Payload>, StoreError> {
        self.inner.handle_message(payload).await
    }

    /// Deliver an inbound response frame to the channel's multiplexer.
    pub async fn new_message(&self, payload: Payload) -> Result<(), StoreError> {
        self.inner.ensure_open()?;
        self.inner
            .channel
            .new_message(payload)
            .await
            .map_err(Into::into)
    }

    /// Run an explicit GC sync round.
    pub async fn sync_gc(&self) -> Result<(), StoreError> {
        self.inner.sync_gc().await
    }

    /// Close the store: idempotent, notifies the peer best-effort, drops
    /// every strong hold. Subsequent operations fail with
    /// [`StoreError::Closed`].
    pub async fn close(&self) {
        self.inner.close(true).await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[async_trait]
impl InboundHandler for ObjectStore {
    async fn handle_message(&self, payload: Payload) -> Result<Option<Payload>, ChannelError> {
        self.inner
            .handle_message(payload)
            .await
            .map_err(|e| ChannelError::Handler {
                message: e.to_string(),
            })
    }
}

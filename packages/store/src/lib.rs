//! Tether ObjectStore: a transparent remote-object protocol.
//!
//! Two peers, each holding arbitrary in-process [`Value`]s, expose them to
//! each other over a bidirectional message channel. Remote code reads
//! properties, invokes functions, constructs instances and mutates fields
//! through [`Proxy`] handles that record deferred access paths; nothing
//! crosses the channel until a path is awaited or written.
//!
//! ```ignore
//! let (a, b) = LoopbackChannel::pair();
//! let owner = Arc::new(ObjectStore::new(a.clone(), Options::default()));
//! let holder = Arc::new(ObjectStore::new(b.clone(), Options::default()));
//! a.connect(owner.clone());
//! b.connect(holder.clone());
//!
//! let api = ObjectRef::new();
//! api.set("test", 10);
//! owner.expose("api", api)?;
//!
//! let proxy = holder.request("api").await?;            // bound proxy
//! let value = proxy.as_proxy().unwrap().get("test").resolve().await?;
//! assert_eq!(value, Value::from(10));
//! ```
//!
//! The layers, leaves first: the value codec and the two id tables
//! (`codec`, `local_table`, `remote_table`), the proxy engine (`proxy`), the
//! owner-side path evaluator (`eval`), the GC coordinator (`gc`), and the
//! [`ObjectStore`] facade tying them to a
//! [`MessageChannel`](tether_channel::MessageChannel).

mod codec;
mod error;
mod eval;
mod gc;
mod local_table;
mod options;
mod proxy;
mod remote_table;
mod store;
mod value;

pub use error::StoreError;
pub use options::{Options, PrototypePolicy, RemoteErrorPolicy};
pub use proxy::{PropertyDescriptor, Proxy};
pub use store::ObjectStore;
pub use value::{
    NativeFn, NativeFuture, NativeResult, ObjectRef, PropertyKey, SymbolRef, Value, WeakObjectRef,
};

// Re-export the seam crates for convenience.
pub use tether_channel as channel;
pub use tether_wire as wire;

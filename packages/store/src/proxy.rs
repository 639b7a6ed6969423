//! The proxy engine.
//!
//! A proxy stands in for a value owned by the peer. Extending it (`get`,
//! `call`, `construct`) is free and synchronous: each step only records a
//! path segment. Nothing crosses the channel until the path is materialized
//! by `resolve` (the async-completion hook) or `set` (a terminal write).
//!
//! A proxy becomes *bound* once a shape description for its root id has been
//! decoded; only bound proxies answer reflection (`own_keys`, `has`,
//! `prototype`, `instance_of`). Extending a proxy always yields an unbound
//! one — the extension's value has never been described.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use tether_wire::{RawId, Segment};

use crate::error::StoreError;
use crate::remote_table::ReleaseGuard;
use crate::store::StoreInner;
use crate::value::{ObjectRef, PropertyKey, Value};

/// One locally-recorded path step. Arguments are captured raw and encoded at
/// request time.
#[derive(Clone)]
pub(crate) enum PathStep {
    Get { key: PropertyKey },
    Call { args: Vec<Value> },
    New { args: Vec<Value> },
}

/// Prototype slot of a decoded shape.
#[derive(Clone)]
pub(crate) enum PrototypeSlot {
    /// The shape did not describe the prototype (policy).
    Unknown,
    Null,
    Value(Value),
}

/// Decoded shape of a remote object or function.
pub(crate) struct ProxyShape {
    pub own_keys: Vec<(PropertyKey, bool)>,
    pub has_keys: Vec<PropertyKey>,
    pub prototype: PrototypeSlot,
    pub function_prototype: Option<Value>,
    pub is_function: bool,
}

pub(crate) struct ProxyData {
    pub(crate) store: Weak<StoreInner>,
    pub(crate) root: RawId,
    pub(crate) segments: Vec<PathStep>,
    pub(crate) shape: OnceLock<ProxyShape>,
    /// Keeps the root id protected from release while this proxy (or any
    /// path extension of it) is alive. `None` for named roots, which are
    /// never collected.
    pub(crate) guard: Option<Arc<ReleaseGuard>>,
}

/// Own-property descriptor of a bound proxy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub configurable: bool,
    pub enumerable: bool,
}

/// A stand-in for a value owned by the peer.
#[derive(Clone)]
pub struct Proxy {
    pub(crate) data: Arc<ProxyData>,
}

impl Proxy {
    /// The tag reported by the stringification sentinel.
    pub const TO_STRING_TAG: &'static str = "RemoteObject";

    pub(crate) fn new_root(
        store: Weak<StoreInner>,
        root: RawId,
        guard: Option<Arc<ReleaseGuard>>,
    ) -> Proxy {
        Proxy {
            data: Arc::new(ProxyData {
                store,
                root,
                segments: Vec::new(),
                shape: OnceLock::new(),
                guard,
            }),
        }
    }

    fn extend(&self, step: PathStep) -> Proxy {
        let mut segments = self.data.segments.clone();
        segments.push(step);
        Proxy {
            data: Arc::new(ProxyData {
                store: self.data.store.clone(),
                root: self.data.root.clone(),
                segments,
                shape: OnceLock::new(),
                guard: self.data.guard.clone(),
            }),
        }
    }

    /// Append a property read. No round-trip happens until the result is
    /// awaited.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Proxy {
        self.extend(PathStep::Get { key: key.into() })
    }

    /// Append an invocation. The receiver is the parent of the preceding
    /// `get`, evaluated on the owner.
    pub fn call(&self, args: Vec<Value>) -> Proxy {
        self.extend(PathStep::Call { args })
    }

    /// Append a constructor invocation.
    pub fn construct(&self, args: Vec<Value>) -> Proxy {
        self.extend(PathStep::New { args })
    }

    /// Materialize the pending path: send it to the owner, await evaluation,
    /// decode the result.
    pub async fn resolve(&self) -> Result<Value, StoreError> {
        let inner = self.store()?;
        let path = inner.encode_steps(&self.data.segments)?;
        inner.send_remote(self.data.root.clone(), path).await
    }

    /// Write through the trailing `get`: `proxy.get("n").set(11)` assigns
    /// `n` on the owner. Fails with a protocol error when there is no
    /// preceding property access to collapse (a root or a call result).
    pub async fn set(&self, value: impl Into<Value>) -> Result<(), StoreError> {
        let (last, init) = match self.data.segments.split_last() {
            Some(split) => split,
            None => {
                return Err(StoreError::protocol(
                    "cannot set: no preceding property access (write to a root)",
                ))
            }
        };
        let key = match last {
            PathStep::Get { key } => key.clone(),
            _ => {
                return Err(StoreError::protocol(
                    "cannot set: no preceding property access (write to a call result)",
                ))
            }
        };
        let inner = self.store()?;
        let mut path = inner.encode_steps(init)?;
        path.push(Segment::Set {
            key: inner.encode_key(&key)?,
            value: inner.encode_value(&value.into())?,
        });
        inner
            .send_remote(self.data.root.clone(), path)
            .await
            .map(|_| ())
    }

    /// Whether a shape description has been decoded for this proxy.
    pub fn is_bound(&self) -> bool {
        self.data.shape.get().is_some()
    }

    fn shape(&self, operation: &'static str) -> Result<&ProxyShape, StoreError> {
        self.data
            .shape
            .get()
            .ok_or(StoreError::Unbound { operation })
    }

    /// Ordered own keys of the remote value, from the shape snapshot.
    pub fn own_keys(&self) -> Result<Vec<PropertyKey>, StoreError> {
        Ok(self
            .shape("enumerate")?
            .own_keys
            .iter()
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Descriptor for an own key, or `None` when the shape has no such key.
    pub fn own_property_descriptor(
        &self,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, StoreError> {
        Ok(self
            .shape("describe a property of")?
            .own_keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, enumerable)| PropertyDescriptor {
                configurable: true,
                enumerable: *enumerable,
            }))
    }

    /// Whether the key is visible on the remote value: own keys, then the
    /// flattened `hasKeys`, then the decoded prototype chain.
    pub fn has(&self, key: &PropertyKey) -> Result<bool, StoreError> {
        let shape = self.shape("check a key of")?;
        if shape.own_keys.iter().any(|(k, _)| k == key) {
            return Ok(true);
        }
        if shape.has_keys.iter().any(|k| k == key) {
            return Ok(true);
        }
        match &shape.prototype {
            PrototypeSlot::Value(value) => value_has(value, key),
            PrototypeSlot::Null | PrototypeSlot::Unknown => Ok(false),
        }
    }

    /// The decoded prototype: another proxy (or a local value that was
    /// passed to the owner), or `None` for a null prototype. Fails when the
    /// configured policy suppressed the prototype.
    pub fn prototype(&self) -> Result<Option<Value>, StoreError> {
        match &self.shape("read the prototype of")?.prototype {
            PrototypeSlot::Value(value) => Ok(Some(value.clone())),
            PrototypeSlot::Null => Ok(None),
            PrototypeSlot::Unknown => Err(StoreError::ShapeMissing {
                what: "the prototype",
            }),
        }
    }

    pub fn is_function(&self) -> Result<bool, StoreError> {
        Ok(self.shape("classify")?.is_function)
    }

    /// The remote function's `prototype` property, as shipped for
    /// `instance_of`.
    pub fn function_prototype(&self) -> Result<Option<Value>, StoreError> {
        Ok(self.shape("read the function prototype of")?
            .function_prototype
            .clone())
    }

    /// Whether this proxy's prototype chain contains the constructor's
    /// shipped function prototype.
    pub fn instance_of(&self, constructor: &Proxy) -> Result<bool, StoreError> {
        let target = constructor
            .function_prototype()?
            .ok_or(StoreError::ShapeMissing {
                what: "a function prototype",
            })?;
        let mut seen: Vec<Value> = Vec::new();
        let mut current = self.prototype()?;
        while let Some(link) = current {
            if link == target {
                return Ok(true);
            }
            if seen.iter().any(|v| *v == link) {
                return Ok(false);
            }
            seen.push(link.clone());
            current = match link {
                Value::Proxy(proxy) => proxy.prototype()?,
                Value::Object(object) => object.prototype(),
                _ => None,
            };
        }
        Ok(false)
    }

    pub(crate) fn bind(&self, shape: ProxyShape) {
        let _ = self.data.shape.set(shape);
    }

    pub(crate) fn root(&self) -> &RawId {
        &self.data.root
    }

    pub(crate) fn steps(&self) -> &[PathStep] {
        &self.data.segments
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.data) as usize
    }

    pub fn same(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    fn store(&self) -> Result<Arc<StoreInner>, StoreError> {
        self.data.store.upgrade().ok_or(StoreError::Closed)
    }

    fn sentinel_suppressed(&self) -> bool {
        self.data
            .store
            .upgrade()
            .map(|inner| inner.options().no_to_string)
            .unwrap_or(false)
    }

    fn write_path(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", Self::TO_STRING_TAG)?;
        write!(f, "{}", self.data.root)?;
        for step in &self.data.segments {
            match step {
                PathStep::Get { key } => write!(f, ".{}", key)?,
                PathStep::Call { args } => write!(f, "({} args)", args.len())?,
                PathStep::New { args } => write!(f, ".new({} args)", args.len())?,
            }
        }
        write!(f, ")")
    }
}

/// Prototype-chain membership over arbitrary values: local objects recurse
/// locally, proxies consult their shapes.
fn value_has(value: &Value, key: &PropertyKey) -> Result<bool, StoreError> {
    match value {
        Value::Object(object) => object_has(object, key),
        Value::Proxy(proxy) => proxy.has(key),
        _ => Ok(false),
    }
}

fn object_has(object: &ObjectRef, key: &PropertyKey) -> Result<bool, StoreError> {
    if object.get(key).is_some() {
        return Ok(true);
    }
    match object.prototype() {
        Some(parent) => value_has(&parent, key),
        None => Ok(false),
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Proxy) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_path(f)
    }
}

/// With the sentinel enabled (the default), stringification answers
/// synchronously with the `RemoteObject` tag, so formatting a proxy yields
/// `[object RemoteObject]` without a round-trip. Under `no_to_string` the
/// sentinel is suppressed and the local path form is rendered instead;
/// stringifying the remote value then requires an explicit awaited `get`.
impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sentinel_suppressed() {
            self.write_path(f)
        } else {
            write!(f, "[object {}]", Self::TO_STRING_TAG)
        }
    }
}

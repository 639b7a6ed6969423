//! The in-process value model.
//!
//! Peers exchange `Value`s: inline primitives, gc-tracked objects, functions
//! and symbols, and proxies standing in for values owned by the peer. This is
//! the dynamically-typed tree the protocol operates on; a host application
//! builds its exposed surface out of these.
//!
//! Objects keep their own properties in insertion order (that order is what
//! ships in shape descriptions), an optional prototype, and optional async
//! call/construct slots. Identity of objects and symbols is `Arc` identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;

use crate::proxy::Proxy;
use crate::remote_table::RemoteHook;

/// Outcome of a native invocation: `Err` carries the thrown value.
pub type NativeResult = Result<Value, Value>;

/// The future produced by a native call slot.
pub type NativeFuture = BoxFuture<'static, NativeResult>;

/// An async native function: `(this, args) -> result`.
pub type NativeFn = Arc<dyn Fn(Value, Vec<Value>) -> NativeFuture + Send + Sync>;

/// Any value the peers can exchange.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Big integer carried as decimal text.
    BigInt(String),
    String(String),
    Object(ObjectRef),
    Symbol(SymbolRef),
    /// A stand-in for a value owned by the peer.
    Proxy(Proxy),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&SymbolRef> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Value::Proxy(p) => Some(p),
            _ => None,
        }
    }

    /// The value's type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Object(o) if o.is_callable() => "function",
            Value::Object(_) => "object",
            Value::Symbol(_) => "symbol",
            Value::Proxy(_) => "remote object",
        }
    }

    /// Extract `name`/`message`/`stack` when the value looks like an error
    /// object.
    pub(crate) fn error_like(&self) -> (Option<String>, Option<String>, Option<String>) {
        let object = match self {
            Value::Object(o) => o,
            _ => return (None, None, None),
        };
        let text = |key: &str| {
            object
                .get(&PropertyKey::from(key))
                .and_then(|v| v.as_str().map(str::to_string))
        };
        (text("name"), text("message"), text("stack"))
    }
}

/// Equality is structural for primitives and identity for everything
/// gc-tracked.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.same(b),
            (Value::Symbol(a), Value::Symbol(b)) => a.same(b),
            (Value::Proxy(a), Value::Proxy(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::BigInt(s) => write!(f, "{}n", s),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(o) if o.is_callable() => write!(f, "[function]"),
            Value::Object(_) => write!(f, "[object]"),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Proxy(p) => write!(f, "{:?}", p),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl From<SymbolRef> for Value {
    fn from(v: SymbolRef) -> Self {
        Value::Symbol(v)
    }
}

impl From<Proxy> for Value {
    fn from(v: Proxy) -> Self {
        Value::Proxy(v)
    }
}

/// A property key: a string or a symbol (compared by identity).
#[derive(Clone)]
pub enum PropertyKey {
    String(String),
    Symbol(SymbolRef),
}

impl PropertyKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyKey::String(s) => Some(s),
            PropertyKey::Symbol(_) => None,
        }
    }
}

impl PartialEq for PropertyKey {
    fn eq(&self, other: &PropertyKey) -> bool {
        match (self, other) {
            (PropertyKey::String(a), PropertyKey::String(b)) => a == b,
            (PropertyKey::Symbol(a), PropertyKey::Symbol(b)) => a.same(b),
            _ => false,
        }
    }
}

impl Eq for PropertyKey {}

impl Hash for PropertyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            PropertyKey::String(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            PropertyKey::Symbol(sym) => {
                1u8.hash(state);
                sym.identity().hash(state);
            }
        }
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(s) => write!(f, "{:?}", s),
            PropertyKey::Symbol(sym) => write!(f, "{}", sym),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(s) => write!(f, "{}", s),
            PropertyKey::Symbol(sym) => write!(f, "{}", sym),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        PropertyKey::String(s)
    }
}

impl From<SymbolRef> for PropertyKey {
    fn from(s: SymbolRef) -> Self {
        PropertyKey::Symbol(s)
    }
}

struct OwnProperty {
    key: PropertyKey,
    value: Value,
    enumerable: bool,
}

struct ObjectData {
    properties: Mutex<Vec<OwnProperty>>,
    prototype: Mutex<Option<Value>>,
    call: Option<NativeFn>,
    construct: Option<NativeFn>,
}

/// A shared, mutable, dynamically-shaped object.
#[derive(Clone)]
pub struct ObjectRef {
    data: Arc<ObjectData>,
}

/// Result of an own-plus-prototype-chain lookup.
pub(crate) enum ChainLookup {
    Found(Value),
    Missing,
    /// The chain reached a proxy; the lookup must continue on the peer.
    Deferred(Proxy),
}

impl ObjectRef {
    /// A plain object with a null prototype and no properties.
    pub fn new() -> ObjectRef {
        ObjectRef {
            data: Arc::new(ObjectData {
                properties: Mutex::new(Vec::new()),
                prototype: Mutex::new(None),
                call: None,
                construct: None,
            }),
        }
    }

    /// A function: an object with a call slot.
    pub fn function<F>(f: F) -> ObjectRef
    where
        F: Fn(Value, Vec<Value>) -> NativeFuture + Send + Sync + 'static,
    {
        ObjectRef {
            data: Arc::new(ObjectData {
                properties: Mutex::new(Vec::new()),
                prototype: Mutex::new(None),
                call: Some(Arc::new(f)),
                construct: None,
            }),
        }
    }

    /// A constructor: an object with a construct slot and a fresh `prototype`
    /// property object for its instances.
    ///
    /// Construction creates an instance whose prototype is the constructor's
    /// `prototype` property, invokes `f` with the instance as receiver, and
    /// yields the instance (or `f`'s result when that result is itself
    /// gc-tracked).
    pub fn constructor<F>(f: F) -> ObjectRef
    where
        F: Fn(Value, Vec<Value>) -> NativeFuture + Send + Sync + 'static,
    {
        let ctor = ObjectRef {
            data: Arc::new(ObjectData {
                properties: Mutex::new(Vec::new()),
                prototype: Mutex::new(None),
                call: None,
                construct: Some(Arc::new(f)),
            }),
        };
        ctor.define("prototype", Value::Object(ObjectRef::new()), false);
        ctor
    }

    /// An error-like object: `name`, `message` and a synthetic `stack`, all
    /// non-enumerable the way host error objects keep them.
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> ObjectRef {
        let name = name.into();
        let message = message.into();
        let stack = format!("{}: {}\n    at <native>", name, message);
        let error = ObjectRef::new();
        error.define("name", Value::String(name), false);
        error.define("message", Value::String(message), false);
        error.define("stack", Value::String(stack), false);
        error
    }

    /// Set an enumerable property, replacing any existing one in place.
    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) {
        self.insert(key.into(), value.into(), true, false)
    }

    /// Define a property with an explicit enumerability flag.
    pub fn define(&self, key: impl Into<PropertyKey>, value: impl Into<Value>, enumerable: bool) {
        self.insert(key.into(), value.into(), enumerable, true)
    }

    fn insert(&self, key: PropertyKey, value: Value, enumerable: bool, force_flag: bool) {
        let mut properties = self.data.properties.lock().expect("object lock poisoned");
        if let Some(existing) = properties.iter_mut().find(|p| p.key == key) {
            existing.value = value;
            if force_flag {
                existing.enumerable = enumerable;
            }
            return;
        }
        properties.push(OwnProperty {
            key,
            value,
            enumerable,
        });
    }

    /// Read an own property.
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        let properties = self.data.properties.lock().expect("object lock poisoned");
        properties
            .iter()
            .find(|p| p.key == *key)
            .map(|p| p.value.clone())
    }

    /// Read a property through the prototype chain.
    pub(crate) fn get_chained(&self, key: &PropertyKey) -> ChainLookup {
        if let Some(value) = self.get(key) {
            return ChainLookup::Found(value);
        }
        match self.prototype() {
            Some(Value::Object(parent)) => parent.get_chained(key),
            Some(Value::Proxy(proxy)) => ChainLookup::Deferred(proxy),
            _ => ChainLookup::Missing,
        }
    }

    /// Own keys with enumerability flags, in insertion order.
    pub fn own_keys(&self) -> Vec<(PropertyKey, bool)> {
        let properties = self.data.properties.lock().expect("object lock poisoned");
        properties
            .iter()
            .map(|p| (p.key.clone(), p.enumerable))
            .collect()
    }

    pub fn prototype(&self) -> Option<Value> {
        self.data
            .prototype
            .lock()
            .expect("object lock poisoned")
            .clone()
    }

    pub fn set_prototype(&self, prototype: Option<Value>) {
        *self.data.prototype.lock().expect("object lock poisoned") = prototype;
    }

    pub fn with_prototype(self, prototype: Value) -> ObjectRef {
        self.set_prototype(Some(prototype));
        self
    }

    pub fn is_callable(&self) -> bool {
        self.data.call.is_some() || self.data.construct.is_some()
    }

    pub(crate) fn call_slot(&self) -> Option<NativeFn> {
        self.data.call.clone()
    }

    pub(crate) fn construct_slot(&self) -> Option<NativeFn> {
        self.data.construct.clone()
    }

    /// Identity of the backing allocation, used as the reverse-lookup key in
    /// the local table.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.data) as usize
    }

    pub fn same(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// A weak witness for this object: alive exactly as long as some strong
    /// reference to the object is.
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef {
            data: Arc::downgrade(&self.data),
        }
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        ObjectRef::new()
    }
}

/// Weak counterpart of [`ObjectRef`].
#[derive(Clone)]
pub struct WeakObjectRef {
    data: Weak<ObjectData>,
}

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.data.upgrade().map(|data| ObjectRef { data })
    }

    pub fn is_alive(&self) -> bool {
        self.data.strong_count() > 0
    }
}

pub(crate) struct SymbolData {
    description: Option<String>,
    /// Present when this symbol was decoded from the peer; re-encoding it
    /// resolves back to the owner's id.
    pub(crate) remote: Option<RemoteHook>,
}

/// An identity-only value. Usable as a property key; has no shape and no
/// operations besides identity.
#[derive(Clone)]
pub struct SymbolRef {
    pub(crate) data: Arc<SymbolData>,
}

impl SymbolRef {
    pub fn new(description: impl Into<String>) -> SymbolRef {
        SymbolRef {
            data: Arc::new(SymbolData {
                description: Some(description.into()),
                remote: None,
            }),
        }
    }

    pub fn anonymous() -> SymbolRef {
        SymbolRef {
            data: Arc::new(SymbolData {
                description: None,
                remote: None,
            }),
        }
    }

    pub(crate) fn with_remote(hook: RemoteHook) -> SymbolRef {
        SymbolRef {
            data: Arc::new(SymbolData {
                description: None,
                remote: Some(hook),
            }),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.data.description.as_deref()
    }

    pub(crate) fn remote_hook(&self) -> Option<&RemoteHook> {
        self.data.remote.as_ref()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.data) as usize
    }

    pub fn same(&self, other: &SymbolRef) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(description) => write!(f, "Symbol({})", description),
            None => write!(f, "Symbol()"),
        }
    }
}

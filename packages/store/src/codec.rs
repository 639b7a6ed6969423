//! The value codec: bidirectional mapping between in-process values and wire
//! descriptions.
//!
//! Encoding is synchronous: primitives inline, proxies collapse to their
//! underlying path descriptions, and gc-tracked values register in the local
//! table — a full shape description on first introduction, the identical
//! stored description on every resend. Decoding is asynchronous: references
//! may carry deferred paths (resolved by a sub-request to the owner, or
//! locally when the root turns out to be ours), and shape decoding installs
//! proxies through the remote table so identity is preserved.

use futures::future::BoxFuture;
use futures::FutureExt;

use tether_wire::{
    ErrorDescription, KeyDescription, RawId, Segment, ShapeDescription, Side, TaggedDescription,
    TaggedId, ValueDescription,
};

use crate::error::StoreError;
use crate::options::{PrototypePolicy, RemoteErrorPolicy};
use crate::proxy::{PathStep, Proxy, ProxyShape, PrototypeSlot};
use crate::remote_table::{ReleaseGuard, RemoteHook};
use crate::store::{lock, StoreInner};
use crate::value::{ObjectRef, PropertyKey, SymbolRef, Value};

impl StoreInner {
    // ---- encode ----------------------------------------------------------

    pub(crate) fn encode_value(&self, value: &Value) -> Result<ValueDescription, StoreError> {
        match value {
            Value::Undefined => Ok(ValueDescription::undefined()),
            Value::Null => Ok(ValueDescription::null()),
            Value::Bool(b) => Ok(ValueDescription::Bool(*b)),
            Value::Number(n) => Ok(ValueDescription::Number(*n)),
            Value::BigInt(digits) => Ok(ValueDescription::bigint(digits.clone())),
            Value::String(s) => Ok(ValueDescription::String(s.clone())),
            Value::Proxy(proxy) => self.encode_proxy(proxy),
            Value::Symbol(symbol) => self.encode_symbol(symbol),
            Value::Object(object) => self.encode_object(object),
        }
    }

    pub(crate) fn encode_key(&self, key: &PropertyKey) -> Result<ValueDescription, StoreError> {
        match key {
            PropertyKey::String(s) => Ok(ValueDescription::String(s.clone())),
            PropertyKey::Symbol(symbol) => self.encode_symbol(symbol),
        }
    }

    /// Encode locally-recorded path steps for the wire. Arguments were
    /// captured raw; they are described here, at request time.
    pub(crate) fn encode_steps(&self, steps: &[PathStep]) -> Result<Vec<Segment>, StoreError> {
        steps
            .iter()
            .map(|step| {
                Ok(match step {
                    PathStep::Get { key } => Segment::Get {
                        key: self.encode_key(key)?,
                    },
                    PathStep::Call { args } => Segment::Call {
                        args: self.encode_args(args)?,
                    },
                    PathStep::New { args } => Segment::New {
                        args: self.encode_args(args)?,
                    },
                })
            })
            .collect()
    }

    fn encode_args(&self, args: &[Value]) -> Result<Vec<ValueDescription>, StoreError> {
        args.iter().map(|arg| self.encode_value(arg)).collect()
    }

    /// A value already acting as a proxy is replaced by its underlying path
    /// description: the owner resolves it back to the original value instead
    /// of taking another round-trip.
    fn encode_proxy(&self, proxy: &Proxy) -> Result<ValueDescription, StoreError> {
        if !proxy.data.store.ptr_eq(&self.self_weak) {
            return Err(StoreError::protocol(
                "proxy belongs to a different object store",
            ));
        }
        let root = TaggedId::remote(proxy.root().clone());
        if proxy.steps().is_empty() {
            Ok(ValueDescription::reference(root))
        } else {
            Ok(ValueDescription::path(root, self.encode_steps(proxy.steps())?))
        }
    }

    fn encode_symbol(&self, symbol: &SymbolRef) -> Result<ValueDescription, StoreError> {
        if let Some(hook) = symbol.remote_hook() {
            if !hook.store.ptr_eq(&self.self_weak) {
                return Err(StoreError::protocol(
                    "symbol belongs to a different object store",
                ));
            }
            return Ok(ValueDescription::reference(TaggedId::remote(hook.id)));
        }

        let mut table = lock(&self.local);
        if let Some(id) = table.id_of(symbol.identity()) {
            table.touch(id);
            return Ok(ValueDescription::Tagged(TaggedDescription::Symbol {
                id: RawId::Index(id),
            }));
        }
        let id = table.allocate(Value::Symbol(symbol.clone()), symbol.identity());
        let description = ValueDescription::Tagged(TaggedDescription::Symbol {
            id: RawId::Index(id),
        });
        table.store_description(id, description.clone(), Vec::new());
        table.touch(id);
        Ok(description)
    }

    fn encode_object(&self, object: &ObjectRef) -> Result<ValueDescription, StoreError> {
        {
            let mut table = lock(&self.local);
            if let Some(id) = table.id_of(object.identity()) {
                let description = table.description_of(id).cloned();
                table.touch(id);
                return Ok(match description {
                    Some(description) => description,
                    // Shape still being built further up this encode: a bare
                    // reference keeps cyclic graphs finite.
                    None => ValueDescription::reference(TaggedId::local(id)),
                });
            }
        }

        let id = {
            let mut table = lock(&self.local);
            // Re-check under the lock: another task may have registered it
            // while we were unlocked.
            match table.id_of(object.identity()) {
                Some(id) => id,
                None => table.allocate(Value::Object(object.clone()), object.identity()),
            }
        };

        let description = self.build_shape(object, id)?;
        let mut embedded = Vec::new();
        collect_embedded(&description, &mut embedded);
        embedded.retain(|e| *e != id);

        let mut table = lock(&self.local);
        if table.description_of(id).is_none() {
            table.store_description(id, description.clone(), embedded);
        }
        table.touch(id);
        Ok(description)
    }

    /// Shape construction per the configured prototype policy. Nested
    /// gc-tracked values register recursively, so a first introduction
    /// carries full descriptions for everything reachable through its shape.
    fn build_shape(&self, object: &ObjectRef, id: u64) -> Result<ValueDescription, StoreError> {
        let policy = self.options().remote_object_prototype;

        let mut own_keys = Vec::new();
        for (key, enumerable) in object.own_keys() {
            own_keys.push(KeyDescription {
                key: self.encode_key(&key)?,
                enumerable,
            });
        }

        let prototype = match policy {
            PrototypePolicy::Full => Some(Box::new(match object.prototype() {
                Some(prototype) => self.encode_value(&prototype)?,
                None => ValueDescription::null(),
            })),
            PrototypePolicy::KeysOnly | PrototypePolicy::None => None,
        };

        let has_keys = match policy {
            PrototypePolicy::KeysOnly => {
                let mut keys = Vec::new();
                let mut chain = object.prototype();
                while let Some(Value::Object(parent)) = chain {
                    for (key, _) in parent.own_keys() {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                    chain = parent.prototype();
                }
                keys.iter()
                    .map(|key| self.encode_key(key))
                    .collect::<Result<Vec<_>, _>>()?
            }
            PrototypePolicy::Full | PrototypePolicy::None => Vec::new(),
        };

        // Shipped under every policy so `instance_of` keeps working even
        // when the ordinary prototype is suppressed.
        let function_prototype = if object.is_callable() {
            match object.get(&PropertyKey::from("prototype")) {
                Some(prototype) => Some(Box::new(self.encode_value(&prototype)?)),
                None => None,
            }
        } else {
            None
        };

        let shape = ShapeDescription {
            id: RawId::Index(id),
            own_keys,
            has_keys,
            prototype,
            function_prototype,
        };
        Ok(ValueDescription::Tagged(if object.is_callable() {
            TaggedDescription::Function(shape)
        } else {
            TaggedDescription::Object(shape)
        }))
    }

    // ---- decode ----------------------------------------------------------

    pub(crate) fn decode_value<'a>(
        &'a self,
        description: ValueDescription,
    ) -> BoxFuture<'a, Result<Value, StoreError>> {
        async move {
            match description {
                ValueDescription::Bool(b) => Ok(Value::Bool(b)),
                ValueDescription::Number(n) => Ok(Value::Number(n)),
                ValueDescription::String(s) => Ok(Value::String(s)),
                ValueDescription::Reference(reference) => {
                    let id = reference.tagged_id().flipped();
                    match (id.side, reference.path) {
                        // Our own value coming back: resolve to the original.
                        (Side::Local, None) => self.resolve_own(&id.id),
                        // A path rooted in our own table: evaluate here, no
                        // round-trip.
                        (Side::Local, Some(path)) => {
                            match self.evaluate_path(&id.id, &path).await {
                                Ok(value) => Ok(value),
                                Err(crate::eval::EvalError::Thrown(thrown)) => {
                                    Err(self.thrown_error(thrown))
                                }
                                Err(crate::eval::EvalError::Store(e)) => Err(e),
                            }
                        }
                        (Side::Remote, None) => self.decode_remote_reference(id.id),
                        // A lazily-computed value: ask the owner to evaluate.
                        (Side::Remote, Some(path)) => self.send_remote(id.id, path).await,
                    }
                }
                ValueDescription::Tagged(TaggedDescription::Bigint { value }) => {
                    Ok(Value::BigInt(value))
                }
                ValueDescription::Tagged(TaggedDescription::Undefined) => Ok(Value::Undefined),
                ValueDescription::Tagged(TaggedDescription::Null) => Ok(Value::Null),
                ValueDescription::Tagged(TaggedDescription::Object(shape)) => {
                    self.decode_shape(shape, false).await
                }
                ValueDescription::Tagged(TaggedDescription::Function(shape)) => {
                    self.decode_shape(shape, true).await
                }
                ValueDescription::Tagged(TaggedDescription::Symbol { id }) => {
                    self.decode_remote_symbol(&id)
                }
                ValueDescription::Tagged(TaggedDescription::Error(error)) => {
                    let cause = self.decode_value(*error.value.clone()).await?;
                    Err(self.remote_error(error, cause))
                }
            }
        }
        .boxed()
    }

    pub(crate) async fn decode_key(
        &self,
        description: ValueDescription,
    ) -> Result<PropertyKey, StoreError> {
        match description {
            ValueDescription::String(s) => Ok(PropertyKey::String(s)),
            other => match self.decode_value(other).await? {
                Value::Symbol(symbol) => Ok(PropertyKey::Symbol(symbol)),
                Value::String(s) => Ok(PropertyKey::String(s)),
                other => Err(StoreError::protocol(format!(
                    "invalid property key of type {}",
                    other.type_name()
                ))),
            },
        }
    }

    /// A reference to a value we own: look it up, it must still be live.
    fn resolve_own(&self, id: &RawId) -> Result<Value, StoreError> {
        let table = lock(&self.local);
        match id {
            RawId::Name(name) => table
                .lookup_exposed(name)
                .ok_or_else(|| StoreError::UnknownName { name: name.clone() }),
            RawId::Index(index) => {
                table
                    .lookup(*index)
                    .ok_or_else(|| StoreError::UnknownId { id: id.clone() })
            }
        }
    }

    /// A bare reference to a peer-owned id: reuse the live proxy, or install
    /// a fresh root proxy. Fresh use cancels any pending release.
    fn decode_remote_reference(&self, id: RawId) -> Result<Value, StoreError> {
        match id {
            RawId::Name(name) => {
                let mut remote = lock(&self.remote);
                if let Some(value) = remote.named(&name) {
                    return Ok(value);
                }
                let proxy =
                    Proxy::new_root(self.self_weak.clone(), RawId::Name(name.clone()), None);
                let value = Value::Proxy(proxy);
                remote.insert_named(&name, value.clone());
                Ok(value)
            }
            RawId::Index(index) => Ok(Value::Proxy(self.install_proxy(index))),
        }
    }

    /// Get-or-create the cached root proxy for a numeric id.
    fn install_proxy(&self, index: u64) -> Proxy {
        let mut remote = lock(&self.remote);
        self.cleanup.cancel(index);
        remote.record_introduction(index);
        if let Some(Value::Proxy(proxy)) = remote.get(index) {
            return proxy;
        }
        let guard = remote
            .guard(index)
            .unwrap_or_else(|| ReleaseGuard::new(index, self.cleanup.clone()));
        let proxy = Proxy::new_root(
            self.self_weak.clone(),
            RawId::Index(index),
            Some(guard.clone()),
        );
        remote.insert_proxy(index, &proxy.data, &guard);
        proxy
    }

    fn decode_remote_symbol(&self, id: &RawId) -> Result<Value, StoreError> {
        let index = id
            .as_index()
            .ok_or_else(|| StoreError::protocol("symbol description with a name id"))?;
        let mut remote = lock(&self.remote);
        self.cleanup.cancel(index);
        remote.record_introduction(index);
        if let Some(value) = remote.get(index) {
            return match value {
                Value::Symbol(_) => Ok(value),
                _ => Err(StoreError::protocol(format!(
                    "id {} is not a symbol",
                    index
                ))),
            };
        }
        let guard = remote
            .guard(index)
            .unwrap_or_else(|| ReleaseGuard::new(index, self.cleanup.clone()));
        let symbol = SymbolRef::with_remote(RemoteHook {
            id: index,
            guard: guard.clone(),
            store: self.self_weak.clone(),
        });
        remote.insert_symbol(index, &symbol.data, &guard);
        Ok(Value::Symbol(symbol))
    }

    /// Install (or find) the proxy for a shape description and bind the
    /// decoded shape to it. The proxy is cached *before* the shape decodes
    /// so cyclic shapes resolve through the cache.
    async fn decode_shape(
        &self,
        shape: ShapeDescription,
        is_function: bool,
    ) -> Result<Value, StoreError> {
        let index = shape
            .id
            .as_index()
            .ok_or_else(|| StoreError::protocol("shape description with a name id"))?;
        let proxy = self.install_proxy(index);
        if proxy.is_bound() {
            return Ok(Value::Proxy(proxy));
        }

        let mut own_keys = Vec::with_capacity(shape.own_keys.len());
        for KeyDescription { key, enumerable } in shape.own_keys {
            own_keys.push((self.decode_key(key).await?, enumerable));
        }
        let mut has_keys = Vec::with_capacity(shape.has_keys.len());
        for key in shape.has_keys {
            has_keys.push(self.decode_key(key).await?);
        }
        let prototype = match shape.prototype {
            None => PrototypeSlot::Unknown,
            Some(description) => match *description {
                ValueDescription::Tagged(TaggedDescription::Null) => PrototypeSlot::Null,
                other => PrototypeSlot::Value(self.decode_value(other).await?),
            },
        };
        let function_prototype = match shape.function_prototype {
            Some(description) => Some(self.decode_value(*description).await?),
            None => None,
        };

        proxy.bind(ProxyShape {
            own_keys,
            has_keys,
            prototype,
            function_prototype,
            is_function,
        });
        Ok(Value::Proxy(proxy))
    }

    /// Render a received error description per the configured policy.
    fn remote_error(&self, error: ErrorDescription, cause: Value) -> StoreError {
        match self.options().remote_error {
            RemoteErrorPolicy::NewError => StoreError::Thrown {
                name: error.name.unwrap_or_else(|| "Error".to_string()),
                message: error.message.unwrap_or_default(),
                stack: Some(format!(
                    "Remote Stacktrace:\n{}",
                    error.stack.unwrap_or_default()
                )),
                cause,
            },
            RemoteErrorPolicy::RemoteObject => StoreError::ThrownValue { value: cause },
        }
    }

    /// Render a locally-evaluated throw (the same-peer short circuit) the
    /// same way a remote one would surface.
    pub(crate) fn thrown_error(&self, thrown: Value) -> StoreError {
        match self.options().remote_error {
            RemoteErrorPolicy::NewError => {
                let (name, message, stack) = thrown.error_like();
                StoreError::Thrown {
                    name: name.unwrap_or_else(|| "Error".to_string()),
                    message: message.unwrap_or_default(),
                    stack: stack.map(|stack| format!("Remote Stacktrace:\n{}", stack)),
                    cause: thrown,
                }
            }
            RemoteErrorPolicy::RemoteObject => StoreError::ThrownValue { value: thrown },
        }
    }
}

/// Local ids mentioned anywhere inside a description. An entry's description
/// re-introduces these on every resend, so the table must keep them alive as
/// long as the entry itself lives.
pub(crate) fn collect_embedded(description: &ValueDescription, out: &mut Vec<u64>) {
    match description {
        ValueDescription::Reference(reference) => {
            if reference.side == Side::Local {
                if let Some(index) = reference.id.as_index() {
                    out.push(index);
                }
            }
            if let Some(path) = &reference.path {
                for segment in path {
                    collect_segment(segment, out);
                }
            }
        }
        ValueDescription::Tagged(tagged) => match tagged {
            TaggedDescription::Object(shape) | TaggedDescription::Function(shape) => {
                if let Some(index) = shape.id.as_index() {
                    out.push(index);
                }
                for key in &shape.own_keys {
                    collect_embedded(&key.key, out);
                }
                for key in &shape.has_keys {
                    collect_embedded(key, out);
                }
                if let Some(prototype) = &shape.prototype {
                    collect_embedded(prototype, out);
                }
                if let Some(function_prototype) = &shape.function_prototype {
                    collect_embedded(function_prototype, out);
                }
            }
            TaggedDescription::Symbol { id } => {
                if let Some(index) = id.as_index() {
                    out.push(index);
                }
            }
            TaggedDescription::Error(error) => collect_embedded(&error.value, out),
            _ => {}
        },
        _ => {}
    }
}

fn collect_segment(segment: &Segment, out: &mut Vec<u64>) {
    match segment {
        Segment::Get { key } => collect_embedded(key, out),
        Segment::Set { key, value } => {
            collect_embedded(key, out);
            collect_embedded(value, out);
        }
        Segment::Call { args } | Segment::New { args } => {
            for arg in args {
                collect_embedded(arg, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{dead_store, dead_store_with};
    use crate::value::NativeFuture;

    fn noop() -> NativeFuture {
        Box::pin(async { Ok(Value::Undefined) })
    }

    #[test]
    fn primitives_encode_inline() {
        let store = dead_store();
        assert_eq!(
            store.encode_value(&Value::from(10)).unwrap(),
            ValueDescription::Number(10.0)
        );
        assert_eq!(
            store.encode_value(&Value::from("hi")).unwrap(),
            ValueDescription::String("hi".into())
        );
        assert_eq!(
            store.encode_value(&Value::Undefined).unwrap(),
            ValueDescription::undefined()
        );
        assert_eq!(
            store.encode_value(&Value::BigInt("900719925474099312".into())).unwrap(),
            ValueDescription::bigint("900719925474099312")
        );
    }

    #[tokio::test]
    async fn primitives_round_trip() {
        let store = dead_store();
        for value in [
            Value::Undefined,
            Value::Null,
            Value::from(true),
            Value::from(2.5),
            Value::from("text"),
            Value::BigInt("123456789012345678901234567890".into()),
        ] {
            let description = store.encode_value(&value).unwrap();
            let decoded = store.decode_value(description).await.unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn object_first_introduction_carries_shape() {
        let store = dead_store();
        let object = ObjectRef::new();
        object.set("test", 10);

        let description = store.encode_value(&Value::Object(object)).unwrap();
        match description {
            ValueDescription::Tagged(TaggedDescription::Object(shape)) => {
                assert_eq!(shape.id, RawId::Index(0));
                assert_eq!(shape.own_keys.len(), 1);
                assert_eq!(
                    shape.own_keys[0].key,
                    ValueDescription::String("test".into())
                );
                assert!(shape.own_keys[0].enumerable);
                // Null prototype under the full policy.
                assert_eq!(
                    shape.prototype.as_deref(),
                    Some(&ValueDescription::null())
                );
            }
            other => panic!("unexpected description: {other:?}"),
        }
    }

    #[test]
    fn resend_reuses_the_stored_description() {
        let store = dead_store();
        let object = ObjectRef::new();
        object.set("a", 1);

        let first = store.encode_value(&Value::Object(object.clone())).unwrap();
        // Mutate after the first description: the shape must stay stable.
        object.set("b", 2);
        let second = store.encode_value(&Value::Object(object)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn functions_describe_as_functions_with_prototype() {
        let store = dead_store();
        let function = ObjectRef::constructor(|_, _| noop());

        let description = store.encode_value(&Value::Object(function)).unwrap();
        match description {
            ValueDescription::Tagged(TaggedDescription::Function(shape)) => {
                assert!(shape.function_prototype.is_some());
            }
            other => panic!("unexpected description: {other:?}"),
        }
    }

    #[test]
    fn function_prototype_ships_even_under_keys_only() {
        let mut options = crate::Options::default();
        options.remote_object_prototype = PrototypePolicy::KeysOnly;
        let store = dead_store_with(options);
        let function = ObjectRef::constructor(|_, _| noop());
        let description = store.encode_value(&Value::Object(function)).unwrap();
        match description {
            ValueDescription::Tagged(TaggedDescription::Function(shape)) => {
                assert!(shape.prototype.is_none());
                assert!(shape.function_prototype.is_some());
            }
            other => panic!("unexpected description: {other:?}"),
        }
    }

    #[test]
    fn keys_only_policy_flattens_chain_keys() {
        let mut options = crate::Options::default();
        options.remote_object_prototype = PrototypePolicy::KeysOnly;
        let store = dead_store_with(options);
        let base = ObjectRef::new();
        base.set("inherited", 1);
        let object = ObjectRef::new().with_prototype(Value::Object(base));
        object.set("own", 2);

        let description = store.encode_value(&Value::Object(object)).unwrap();
        match description {
            ValueDescription::Tagged(TaggedDescription::Object(shape)) => {
                assert!(shape.prototype.is_none());
                assert_eq!(
                    shape.has_keys,
                    vec![ValueDescription::String("inherited".into())]
                );
            }
            other => panic!("unexpected description: {other:?}"),
        }
    }

    #[test]
    fn cyclic_prototypes_terminate_with_bare_references() {
        let store = dead_store();
        let a = ObjectRef::new();
        let b = ObjectRef::new().with_prototype(Value::Object(a.clone()));
        a.set_prototype(Some(Value::Object(b)));

        let description = store.encode_value(&Value::Object(a)).unwrap();
        // a(#0).prototype = b(#1).prototype = bare reference back to #0.
        match description {
            ValueDescription::Tagged(TaggedDescription::Object(shape)) => {
                match shape.prototype.as_deref() {
                    Some(ValueDescription::Tagged(TaggedDescription::Object(inner))) => {
                        assert_eq!(
                            inner.prototype.as_deref(),
                            Some(&ValueDescription::reference(TaggedId::local(0)))
                        );
                    }
                    other => panic!("unexpected prototype: {other:?}"),
                }
            }
            other => panic!("unexpected description: {other:?}"),
        }
    }

    #[test]
    fn symbols_reuse_their_description_across_sends() {
        let store = dead_store();
        let symbol = SymbolRef::new("tag");
        let first = store.encode_value(&Value::Symbol(symbol.clone())).unwrap();
        let second = store.encode_value(&Value::Symbol(symbol)).unwrap();
        assert_eq!(
            first,
            ValueDescription::Tagged(TaggedDescription::Symbol {
                id: RawId::Index(0)
            })
        );
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn decoding_a_shape_installs_an_identical_proxy_per_id() {
        let store = dead_store();
        let shape = ShapeDescription {
            id: RawId::Index(5),
            own_keys: vec![KeyDescription {
                key: ValueDescription::String("test".into()),
                enumerable: true,
            }],
            has_keys: Vec::new(),
            prototype: Some(Box::new(ValueDescription::null())),
            function_prototype: None,
        };
        let description = ValueDescription::Tagged(TaggedDescription::Object(shape));

        let first = store.decode_value(description.clone()).await.unwrap();
        let second = store.decode_value(description).await.unwrap();
        let first = first.as_proxy().unwrap();
        let second = second.as_proxy().unwrap();
        assert!(first.same(second));
        assert!(first.is_bound());
        assert_eq!(first.prototype().unwrap(), None);
    }

    #[tokio::test]
    async fn bare_reference_decodes_to_cached_proxy() {
        let store = dead_store();
        let shape_description = ValueDescription::Tagged(TaggedDescription::Object(
            ShapeDescription {
                id: RawId::Index(3),
                own_keys: Vec::new(),
                has_keys: Vec::new(),
                prototype: None,
                function_prototype: None,
            },
        ));
        let installed = store.decode_value(shape_description).await.unwrap();

        // The owner re-sends the id as a bare local-side reference.
        let reference = ValueDescription::reference(TaggedId::local(3));
        let decoded = store.decode_value(reference).await.unwrap();
        assert!(installed
            .as_proxy()
            .unwrap()
            .same(decoded.as_proxy().unwrap()));
    }

    #[tokio::test]
    async fn decoding_own_value_back_restores_identity() {
        let store = dead_store();
        let object = ObjectRef::new();
        store.encode_value(&Value::Object(object.clone())).unwrap();

        // The peer passes our id back, tagged remote from its perspective.
        let reference = ValueDescription::reference(TaggedId::remote(0));
        let decoded = store.decode_value(reference).await.unwrap();
        assert!(decoded.as_object().unwrap().same(&object));
    }

    #[tokio::test]
    async fn decoding_unknown_own_id_fails() {
        let store = dead_store();
        let reference = ValueDescription::reference(TaggedId::remote(42));
        let err = store.decode_value(reference).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownId { .. }));
    }

    #[tokio::test]
    async fn error_description_reconstructs_per_new_error_policy() {
        let store = dead_store();
        let description = ValueDescription::Tagged(TaggedDescription::Error(ErrorDescription {
            value: Box::new(ValueDescription::String("boom".into())),
            message: Some("boom".into()),
            stack: Some("at origin".into()),
            name: Some("Error".into()),
        }));
        let err = store.decode_value(description).await.unwrap_err();
        match err {
            StoreError::Thrown {
                name,
                message,
                stack,
                cause,
            } => {
                assert_eq!(name, "Error");
                assert_eq!(message, "boom");
                assert!(stack.unwrap().starts_with("Remote Stacktrace:"));
                assert_eq!(cause, Value::from("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn error_description_surfaces_value_per_remote_object_policy() {
        let mut options = crate::Options::default();
        options.remote_error = RemoteErrorPolicy::RemoteObject;
        let store = dead_store_with(options);
        let description = ValueDescription::Tagged(TaggedDescription::Error(ErrorDescription {
            value: Box::new(ValueDescription::Number(7.0)),
            message: None,
            stack: None,
            name: None,
        }));
        let err = store.decode_value(description).await.unwrap_err();
        match err {
            StoreError::ThrownValue { value } => assert_eq!(value, Value::from(7)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn proxy_encodes_as_path_description_and_keys_as_strings() {
        let store = dead_store();
        let proxy = store.install_proxy(9);
        let extended = proxy.get("field").call(vec![Value::from(1)]);

        let description = store.encode_value(&Value::Proxy(extended)).unwrap();
        match description {
            ValueDescription::Reference(reference) => {
                assert_eq!(reference.side, Side::Remote);
                assert_eq!(reference.id, RawId::Index(9));
                let path = reference.path.unwrap();
                assert_eq!(path.len(), 2);
                assert!(matches!(path[0], Segment::Get { .. }));
            }
            other => panic!("unexpected description: {other:?}"),
        }

        let bare = store.encode_value(&Value::Proxy(proxy)).unwrap();
        assert_eq!(bare, ValueDescription::reference(TaggedId::remote(9)));
    }

    #[tokio::test]
    async fn foreign_store_proxy_is_rejected() {
        let store = dead_store();
        let foreign = Proxy::new_root(std::sync::Weak::new(), RawId::Index(1), None);
        let err = store.encode_value(&Value::Proxy(foreign)).unwrap_err();
        assert!(matches!(err, StoreError::Protocol { .. }));
    }

    #[test]
    fn embedded_collection_walks_shapes() {
        let description = ValueDescription::Tagged(TaggedDescription::Object(ShapeDescription {
            id: RawId::Index(1),
            own_keys: vec![KeyDescription {
                key: ValueDescription::Tagged(TaggedDescription::Symbol {
                    id: RawId::Index(2),
                }),
                enumerable: true,
            }],
            has_keys: Vec::new(),
            prototype: Some(Box::new(ValueDescription::reference(TaggedId::local(3)))),
            function_prototype: None,
        }));
        let mut out = Vec::new();
        collect_embedded(&description, &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3]);
    }
}

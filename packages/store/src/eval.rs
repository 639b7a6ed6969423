//! Owner-side path evaluation.
//!
//! A received path is applied segment by segment against its root value.
//! Properties read through `get` retain their parent so a following `call`
//! binds the right receiver; intermediate native invocations are awaited
//! before the walk continues; the value of the *terminal* segment is the
//! result. Anything thrown along the way is captured as a thrown value and
//! shipped back as an error description, never as a local panic.

use tether_wire::{validate_path, RawId, Segment};

use crate::error::StoreError;
use crate::store::StoreInner;
use crate::value::{ChainLookup, ObjectRef, Value};

/// Why an evaluation stopped: a user-level throw (a normal payload) or a
/// failure of the store itself.
pub(crate) enum EvalError {
    Thrown(Value),
    Store(StoreError),
}

/// Fold store errors coming back from nested remote hops into the evaluator
/// error space: re-thrown user errors stay thrown values, everything else is
/// a store failure.
fn from_store(error: StoreError) -> EvalError {
    match error {
        StoreError::Thrown { cause, .. } => EvalError::Thrown(cause),
        StoreError::ThrownValue { value } => EvalError::Thrown(value),
        other => EvalError::Store(other),
    }
}

fn type_error(message: String) -> EvalError {
    EvalError::Thrown(Value::Object(ObjectRef::error("TypeError", message)))
}

impl StoreInner {
    /// Resolve the root id against the local table.
    fn resolve_root(&self, root: &RawId) -> Result<Value, EvalError> {
        let table = crate::store::lock(&self.local);
        match root {
            RawId::Name(name) => {
                table
                    .lookup_exposed(name)
                    .ok_or_else(|| EvalError::Store(StoreError::UnknownName { name: name.clone() }))
            }
            RawId::Index(index) => table.lookup(*index).ok_or_else(|| {
                EvalError::Store(StoreError::UnknownId {
                    id: RawId::Index(*index),
                })
            }),
        }
    }

    async fn decode_args(&self, args: &[tether_wire::ValueDescription]) -> Result<Vec<Value>, EvalError> {
        let mut decoded = Vec::with_capacity(args.len());
        for arg in args {
            decoded.push(self.decode_value(arg.clone()).await.map_err(from_store)?);
        }
        Ok(decoded)
    }

    /// Apply `path` to the value named by `root` and produce the terminal
    /// value.
    pub(crate) async fn evaluate_path(
        &self,
        root: &RawId,
        path: &[Segment],
    ) -> Result<Value, EvalError> {
        validate_path(path)
            .map_err(|e| EvalError::Store(StoreError::protocol(e.to_string())))?;

        let mut current = self.resolve_root(root)?;
        // Receiver for a call that directly follows a property read.
        let mut retained: Option<Value> = None;
        let mut prior_was_get = false;
        // Set once the walk crossed into the peer's graph; the extension is
        // resolved remotely when the path ends.
        let mut pending_remote = false;

        for segment in path {
            match segment {
                Segment::Get { key } => {
                    let key = self.decode_key(key.clone()).await.map_err(from_store)?;
                    retained = Some(current.clone());
                    prior_was_get = true;
                    current = match &current {
                        Value::Proxy(proxy) => {
                            pending_remote = true;
                            Value::Proxy(proxy.get(key))
                        }
                        Value::Object(object) => match object.get_chained(&key) {
                            ChainLookup::Found(value) => value,
                            ChainLookup::Missing => Value::Undefined,
                            ChainLookup::Deferred(proxy) => {
                                proxy.get(key).resolve().await.map_err(from_store)?
                            }
                        },
                        Value::Undefined | Value::Null => {
                            return Err(type_error(format!(
                                "cannot read property {} of {}",
                                key,
                                current.type_name()
                            )))
                        }
                        _ => Value::Undefined,
                    };
                }
                Segment::Call { args } => {
                    let args = self.decode_args(args).await?;
                    let receiver = if prior_was_get {
                        retained.take().unwrap_or(Value::Undefined)
                    } else {
                        Value::Undefined
                    };
                    retained = None;
                    prior_was_get = false;
                    current = match &current {
                        Value::Proxy(proxy) => {
                            pending_remote = true;
                            Value::Proxy(proxy.call(args))
                        }
                        Value::Object(object) => match object.call_slot() {
                            Some(call) => call(receiver, args).await.map_err(EvalError::Thrown)?,
                            None => {
                                return Err(type_error(format!(
                                    "{} is not a function",
                                    current.type_name()
                                )))
                            }
                        },
                        other => {
                            return Err(type_error(format!(
                                "{} is not a function",
                                other.type_name()
                            )))
                        }
                    };
                }
                Segment::New { args } => {
                    let args = self.decode_args(args).await?;
                    retained = None;
                    prior_was_get = false;
                    current = match &current {
                        Value::Proxy(proxy) => {
                            pending_remote = true;
                            Value::Proxy(proxy.construct(args))
                        }
                        Value::Object(object) if object.is_callable() => {
                            self.construct(object, args).await?
                        }
                        other => {
                            return Err(type_error(format!(
                                "{} is not a constructor",
                                other.type_name()
                            )))
                        }
                    };
                }
                Segment::Set { key, value } => {
                    let key = self.decode_key(key.clone()).await.map_err(from_store)?;
                    let value = self
                        .decode_value(value.clone())
                        .await
                        .map_err(from_store)?;
                    match &current {
                        Value::Object(object) => object.set(key, value),
                        Value::Proxy(proxy) => {
                            proxy.get(key).set(value).await.map_err(from_store)?
                        }
                        other => {
                            return Err(type_error(format!(
                                "cannot assign property {} on {}",
                                key,
                                other.type_name()
                            )))
                        }
                    }
                    retained = None;
                    prior_was_get = false;
                    pending_remote = false;
                    current = Value::Undefined;
                }
            }
        }

        if pending_remote {
            if let Value::Proxy(proxy) = &current {
                current = proxy.resolve().await.map_err(from_store)?;
            }
        }
        Ok(current)
    }

    /// Constructor semantics: a fresh instance with the constructor's
    /// `prototype` property as its prototype, the construct (or call) slot
    /// invoked with the instance as receiver, and the instance as the result
    /// unless the slot returned a gc-tracked value of its own.
    async fn construct(&self, constructor: &ObjectRef, args: Vec<Value>) -> Result<Value, EvalError> {
        let slot = constructor
            .construct_slot()
            .or_else(|| constructor.call_slot())
            .expect("checked callable");
        let instance = ObjectRef::new();
        if let Some(prototype) = constructor.get(&"prototype".into()) {
            instance.set_prototype(Some(prototype));
        }
        let this = Value::Object(instance);
        let result = slot(this.clone(), args).await.map_err(EvalError::Thrown)?;
        Ok(match result {
            Value::Object(_) | Value::Proxy(_) => result,
            _ => this,
        })
    }
}

//! The encoded form of a value.
//!
//! Primitives travel inline; everything gc-tracked travels as a tagged id,
//! with a full shape description the first time an id is introduced and a
//! bare reference afterwards. A reference may additionally carry a deferred
//! path, in which case the value is computed by the owner on demand.

use serde::{Deserialize, Serialize};

use crate::id::{RawId, Side, TaggedId};
use crate::segment::Segment;

/// Wire description of a single value.
///
/// The untagged variants cover the JSON-inline primitives; everything else is
/// an object distinguished either by its `side` field (a [`Reference`]) or by
/// its `type` tag (a [`TaggedDescription`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueDescription {
    Bool(bool),
    Number(f64),
    String(String),
    Reference(Reference),
    Tagged(TaggedDescription),
}

impl ValueDescription {
    pub fn undefined() -> Self {
        ValueDescription::Tagged(TaggedDescription::Undefined)
    }

    pub fn null() -> Self {
        ValueDescription::Tagged(TaggedDescription::Null)
    }

    pub fn bigint(value: impl Into<String>) -> Self {
        ValueDescription::Tagged(TaggedDescription::Bigint {
            value: value.into(),
        })
    }

    pub fn reference(id: TaggedId) -> Self {
        ValueDescription::Reference(Reference {
            side: id.side,
            id: id.id,
            path: None,
        })
    }

    pub fn path(id: TaggedId, path: Vec<Segment>) -> Self {
        ValueDescription::Reference(Reference {
            side: id.side,
            id: id.id,
            path: Some(path),
        })
    }
}

/// A pointer to a gc-tracked value in one peer's table, optionally with a
/// deferred access path rooted at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub side: Side,
    pub id: RawId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Segment>>,
}

impl Reference {
    pub fn tagged_id(&self) -> TaggedId {
        TaggedId {
            side: self.side,
            id: self.id.clone(),
        }
    }
}

/// Descriptions distinguished by an explicit `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaggedDescription {
    /// Big integer carried as decimal text.
    Bigint { value: String },
    Undefined,
    Null,
    /// First introduction of an object id, with its shape.
    Object(ShapeDescription),
    /// First introduction of a function id, with its shape.
    Function(ShapeDescription),
    /// A symbol: identity only, no shape.
    Symbol { id: RawId },
    /// A thrown value, with recoverable error metadata when available.
    Error(ErrorDescription),
}

/// Shape snapshot sent once per object/function id and reused for the
/// lifetime of that id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeDescription {
    pub id: RawId,
    pub own_keys: Vec<KeyDescription>,
    /// Keys reachable through the prototype chain; populated only when the
    /// prototype itself is not described.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has_keys: Vec<ValueDescription>,
    /// Prototype reference, or the null marker. Absent when the configured
    /// prototype policy suppresses it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype: Option<Box<ValueDescription>>,
    /// For functions: the value of the `prototype` property, enabling remote
    /// `instanceof`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_prototype: Option<Box<ValueDescription>>,
}

/// One own key with its enumerability flag. The key is a string or a
/// referenced symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDescription {
    pub key: ValueDescription,
    pub enumerable: bool,
}

/// A thrown value. `value` references the thrown value itself; the metadata
/// fields are filled in when the throw was error-like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescription {
    pub value: Box<ValueDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives_serialize_inline() {
        assert_eq!(
            serde_json::to_value(ValueDescription::Bool(true)).unwrap(),
            json!(true)
        );
        assert_eq!(
            serde_json::to_value(ValueDescription::Number(2.5)).unwrap(),
            json!(2.5)
        );
        assert_eq!(
            serde_json::to_value(ValueDescription::String("hi".into())).unwrap(),
            json!("hi")
        );
    }

    #[test]
    fn primitives_deserialize_inline() {
        let d: ValueDescription = serde_json::from_value(json!(10)).unwrap();
        assert_eq!(d, ValueDescription::Number(10.0));

        let d: ValueDescription = serde_json::from_value(json!(false)).unwrap();
        assert_eq!(d, ValueDescription::Bool(false));
    }

    #[test]
    fn markers_carry_type_tags() {
        assert_eq!(
            serde_json::to_value(ValueDescription::undefined()).unwrap(),
            json!({"type": "undefined"})
        );
        assert_eq!(
            serde_json::to_value(ValueDescription::null()).unwrap(),
            json!({"type": "null"})
        );
    }

    #[test]
    fn bigint_is_decimal_text() {
        let d = ValueDescription::bigint("123456789012345678901234567890");
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({"type": "bigint", "value": "123456789012345678901234567890"})
        );
        let back: ValueDescription =
            serde_json::from_value(json!({"type": "bigint", "value": "7"})).unwrap();
        assert_eq!(back, ValueDescription::bigint("7"));
    }

    #[test]
    fn reference_wire_shape() {
        let d = ValueDescription::reference(TaggedId::local(4));
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({"side": "local", "id": 4})
        );
    }

    #[test]
    fn reference_with_path_round_trips() {
        let d = ValueDescription::path(
            TaggedId::remote("api"),
            vec![Segment::Get {
                key: ValueDescription::String("users".into()),
            }],
        );
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(
            json,
            json!({
                "side": "remote",
                "id": "api",
                "path": [{"type": "get", "key": "users"}]
            })
        );
        let back: ValueDescription = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn reference_and_tagged_do_not_collide() {
        // A type-tagged payload must not parse as a bare reference.
        let d: ValueDescription =
            serde_json::from_value(json!({"type": "symbol", "id": 3})).unwrap();
        assert!(matches!(
            d,
            ValueDescription::Tagged(TaggedDescription::Symbol { id: RawId::Index(3) })
        ));

        let d: ValueDescription =
            serde_json::from_value(json!({"side": "local", "id": 3})).unwrap();
        assert!(matches!(d, ValueDescription::Reference(_)));
    }

    #[test]
    fn shape_description_wire_shape() {
        let shape = ShapeDescription {
            id: RawId::Index(1),
            own_keys: vec![KeyDescription {
                key: ValueDescription::String("test".into()),
                enumerable: true,
            }],
            has_keys: Vec::new(),
            prototype: Some(Box::new(ValueDescription::null())),
            function_prototype: None,
        };
        let d = ValueDescription::Tagged(TaggedDescription::Object(shape));
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({
                "type": "object",
                "id": 1,
                "ownKeys": [{"key": "test", "enumerable": true}],
                "prototype": {"type": "null"}
            })
        );
    }

    #[test]
    fn function_shape_carries_function_prototype() {
        let shape = ShapeDescription {
            id: RawId::Index(2),
            own_keys: Vec::new(),
            has_keys: Vec::new(),
            prototype: None,
            function_prototype: Some(Box::new(ValueDescription::reference(TaggedId::local(3)))),
        };
        let json =
            serde_json::to_value(ValueDescription::Tagged(TaggedDescription::Function(shape)))
                .unwrap();
        assert_eq!(
            json,
            json!({
                "type": "function",
                "id": 2,
                "ownKeys": [],
                "functionPrototype": {"side": "local", "id": 3}
            })
        );
    }

    #[test]
    fn error_description_round_trips() {
        let d = ValueDescription::Tagged(TaggedDescription::Error(ErrorDescription {
            value: Box::new(ValueDescription::reference(TaggedId::local(8))),
            message: Some("boom".into()),
            stack: Some("at line 1".into()),
            name: Some("Error".into()),
        }));
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "error",
                "value": {"side": "local", "id": 8},
                "message": "boom",
                "stack": "at line 1",
                "name": "Error"
            })
        );
        let back: ValueDescription = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn malformed_description_is_rejected() {
        let result: Result<ValueDescription, _> =
            serde_json::from_value(json!({"type": "no-such-type"}));
        assert!(result.is_err());
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! serde `Serializer` that produces [`Value`]s.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::ser::{self, Impossible};

use super::{DURATION_TOKEN, TIME_TOKEN, WrapOptions};
use crate::collections::{DictItem, DictValue};
use crate::error::{Result, ValueError};
use crate::value::{Symbol, VALUE_TOKEN, Value};

/// Serializer whose output is a [`Value`].
#[derive(Clone, Copy)]
pub struct ValueSerializer<'a> {
    opts: &'a WrapOptions,
}

impl<'a> ValueSerializer<'a> {
    /// A serializer honouring `opts`.
    pub fn new(opts: &'a WrapOptions) -> Self {
        Self { opts }
    }

    fn wrap<T: ?Sized + Serialize>(self, value: &T) -> Result<Value> {
        value.serialize(self)
    }
}

fn float(f: f64) -> Value {
    // i64::MAX as f64 rounds up to 2^63, which is out of range.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

/// Integers outside `i64` become a Float only when the float holds them exactly.
fn unsigned(u: u128) -> Result<Value> {
    if let Ok(i) = i64::try_from(u) {
        return Ok(Value::Integer(i));
    }
    let f = u as f64;
    // The cast back saturates, so 2^128 itself must be excluded first.
    if f < 2f64.powi(128) && f as u128 == u {
        Ok(Value::Float(f))
    } else {
        Err(inexact(u))
    }
}

fn signed(i: i128) -> Result<Value> {
    if let Ok(i) = i64::try_from(i) {
        return Ok(Value::Integer(i));
    }
    let f = i as f64;
    if f < 2f64.powi(127) && f as i128 == i {
        Ok(Value::Float(f))
    } else {
        Err(inexact(i))
    }
}

fn inexact(n: impl std::fmt::Display) -> ValueError {
    ValueError::UnsupportedType(format!("integer {n} has no exact representation"))
}

fn single_entry(key: &str, value: Value) -> Result<Value> {
    Ok(Value::Dict(DictValue::new(vec![DictItem::new(
        Value::String(key.to_string()),
        value,
    )])?))
}

/// Rebuild an embedded [`Value`] from the variant serde handed us.
fn passthrough<T: ?Sized + Serialize>(variant: &str, payload: Option<&T>) -> Result<Value> {
    let json = match payload {
        Some(payload) => {
            let mut map = serde_json::Map::new();
            map.insert(variant.to_string(), serde_json::to_value(payload)?);
            serde_json::Value::Object(map)
        }
        None => serde_json::Value::String(variant.to_string()),
    };
    Ok(serde_json::from_value(json)?)
}

impl<'a> ser::Serializer for ValueSerializer<'a> {
    type Ok = Value;
    type Error = ValueError;

    type SerializeSeq = SerializeVec<'a>;
    type SerializeTuple = SerializeVec<'a>;
    type SerializeTupleStruct = SerializeVec<'a>;
    type SerializeTupleVariant = SerializeTupleVariant<'a>;
    type SerializeMap = SerializeDict<'a>;
    type SerializeStruct = SerializeRecord<'a>;
    type SerializeStructVariant = SerializeStructVariant<'a>;

    fn serialize_bool(self, v: bool) -> Result<Value> {
        Ok(Value::Boolean(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value> {
        Ok(Value::Integer(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Value> {
        Ok(Value::Integer(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Value> {
        Ok(Value::Integer(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Value> {
        Ok(Value::Integer(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value> {
        signed(v)
    }

    fn serialize_u8(self, v: u8) -> Result<Value> {
        Ok(Value::Integer(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Value> {
        Ok(Value::Integer(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Value> {
        Ok(Value::Integer(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Value> {
        unsigned(v.into())
    }

    fn serialize_u128(self, v: u128) -> Result<Value> {
        unsigned(v)
    }

    fn serialize_f32(self, v: f32) -> Result<Value> {
        Ok(float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Value> {
        Ok(float(v))
    }

    fn serialize_char(self, v: char) -> Result<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> Result<Value> {
        Ok(Value::Nothing)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Value> {
        self.wrap(value)
    }

    fn serialize_unit(self) -> Result<Value> {
        Ok(Value::Nothing)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value> {
        Ok(Value::Nothing)
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value> {
        if name == VALUE_TOKEN {
            return passthrough::<()>(variant, None);
        }
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Value> {
        match name {
            TIME_TOKEN => match self.wrap(value)? {
                Value::String(s) => DateTime::parse_from_rfc3339(&s)
                    .map(|t| Value::Time(t.with_timezone(&Utc)))
                    .map_err(|e| ValueError::invalid("time", e.to_string())),
                other => Err(ValueError::TypeMismatch {
                    expected: "RFC 3339 string".to_string(),
                    actual: other.kind(),
                }),
            },
            DURATION_TOKEN => match self.wrap(value)? {
                Value::Integer(n) if n >= 0 => Ok(Value::Duration(Duration::from_nanos(n as u64))),
                Value::Float(f) if f >= 0.0 => Ok(Value::Duration(Duration::from_nanos(f as u64))),
                other => Err(ValueError::TypeMismatch {
                    expected: "non-negative nanoseconds".to_string(),
                    actual: other.kind(),
                }),
            },
            _ => self.wrap(value),
        }
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value> {
        if name == VALUE_TOKEN {
            return passthrough(variant, Some(value));
        }
        let inner = self.wrap(value).map_err(|e| e.at_field(variant))?;
        single_entry(variant, inner)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeVec<'a>> {
        Ok(SerializeVec::new(self, len.unwrap_or(0)))
    }

    fn serialize_tuple(self, len: usize) -> Result<SerializeVec<'a>> {
        Ok(SerializeVec::new(self, len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SerializeVec<'a>> {
        Ok(SerializeVec::new(self, len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeTupleVariant<'a>> {
        Ok(SerializeTupleVariant {
            variant,
            inner: SerializeVec::new(self, len),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<SerializeDict<'a>> {
        Ok(SerializeDict {
            ser: self,
            items: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }

    fn serialize_struct(self, name: &'static str, _len: usize) -> Result<SerializeRecord<'a>> {
        Ok(SerializeRecord {
            ser: self,
            name,
            fields: BTreeMap::new(),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<SerializeStructVariant<'a>> {
        Ok(SerializeStructVariant {
            record: SerializeRecord {
                ser: self,
                name: variant,
                fields: BTreeMap::new(),
            },
        })
    }
}

/// Sequence builder. Elements that are all `u8` collapse into [`Value::Bytes`].
pub struct SerializeVec<'a> {
    ser: ValueSerializer<'a>,
    items: Vec<Value>,
    bytes: Option<Vec<u8>>,
}

impl<'a> SerializeVec<'a> {
    fn new(ser: ValueSerializer<'a>, len: usize) -> Self {
        Self {
            ser,
            items: Vec::with_capacity(len),
            bytes: Some(Vec::with_capacity(len)),
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        if let Some(bytes) = &mut self.bytes {
            if let Ok(b) = value.serialize(ByteProbe) {
                bytes.push(b);
                return Ok(());
            }
            self.items = bytes.drain(..).map(|b| Value::Integer(b.into())).collect();
            self.bytes = None;
        }
        let index = self.items.len();
        let item = self.ser.wrap(value).map_err(|e| e.at_index(index))?;
        self.items.push(item);
        Ok(())
    }

    fn finish(self) -> Value {
        match self.bytes {
            Some(bytes) if !bytes.is_empty() => Value::Bytes(bytes),
            _ => Value::List(self.items),
        }
    }
}

impl ser::SerializeSeq for SerializeVec<'_> {
    type Ok = Value;
    type Error = ValueError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SerializeVec<'_> {
    type Ok = Value;
    type Error = ValueError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SerializeVec<'_> {
    type Ok = Value;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

pub struct SerializeTupleVariant<'a> {
    variant: &'static str,
    inner: SerializeVec<'a>,
}

impl ser::SerializeTupleVariant for SerializeTupleVariant<'_> {
    type Ok = Value;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let variant = self.variant;
        self.inner.push(value).map_err(|e| e.at_field(variant))
    }

    fn end(self) -> Result<Value> {
        single_entry(self.variant, self.inner.finish())
    }
}

pub struct SerializeDict<'a> {
    ser: ValueSerializer<'a>,
    items: Vec<DictItem>,
    key: Option<Value>,
}

impl ser::SerializeMap for SerializeDict<'_> {
    type Ok = Value;
    type Error = ValueError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        let index = self.items.len();
        self.key = Some(self.ser.wrap(key).map_err(|e| e.at_index(index))?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let key = self
            .key
            .take()
            .ok_or_else(|| ValueError::Custom("map value without a key".to_string()))?;
        let index = self.items.len();
        let value = self.ser.wrap(value).map_err(|e| e.at_index(index))?;
        self.items.push(DictItem::new(key, value));
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Dict(DictValue::new(self.items)?))
    }
}

/// Record builder: a struct value, a dict, or nothing for zero-field records.
pub struct SerializeRecord<'a> {
    ser: ValueSerializer<'a>,
    name: &'static str,
    fields: BTreeMap<String, Value>,
}

impl SerializeRecord<'_> {
    fn finish(self) -> Result<Value> {
        if self.fields.is_empty() {
            return Ok(Value::Nothing);
        }
        if self.ser.opts.structs_as_dicts {
            return Value::new_string_dict(self.fields);
        }
        // Renamed records may carry names that are not identifiers.
        let ctor = if Symbol::is_valid(self.name) {
            Value::new_symbol(self.name)?
        } else {
            Value::String(self.name.to_string())
        };
        Value::new_struct(ctor, self.fields)
    }
}

impl ser::SerializeStruct for SerializeRecord<'_> {
    type Ok = Value;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<()> {
        let value = self.ser.wrap(value).map_err(|e| e.at_field(key))?;
        self.fields.insert(self.ser.opts.field_case.apply(key), value);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}

pub struct SerializeStructVariant<'a> {
    record: SerializeRecord<'a>,
}

impl ser::SerializeStructVariant for SerializeStructVariant<'_> {
    type Ok = Value;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<()> {
        ser::SerializeStruct::serialize_field(&mut self.record, key, value)
    }

    fn end(self) -> Result<Value> {
        let variant = self.record.name;
        single_entry(variant, self.record.finish()?)
    }
}

/// Accepts exactly one `u8` and rejects everything else.
struct ByteProbe;

fn not_a_byte() -> ValueError {
    ValueError::Custom("not a byte".to_string())
}

macro_rules! reject {
    ($($method:ident($($arg:ty),*) -> $ret:ty;)*) => {
        $(
            fn $method(self, $(_: $arg),*) -> Result<$ret> {
                Err(not_a_byte())
            }
        )*
    };
}

impl ser::Serializer for ByteProbe {
    type Ok = u8;
    type Error = ValueError;

    type SerializeSeq = Impossible<u8, ValueError>;
    type SerializeTuple = Impossible<u8, ValueError>;
    type SerializeTupleStruct = Impossible<u8, ValueError>;
    type SerializeTupleVariant = Impossible<u8, ValueError>;
    type SerializeMap = Impossible<u8, ValueError>;
    type SerializeStruct = Impossible<u8, ValueError>;
    type SerializeStructVariant = Impossible<u8, ValueError>;

    fn serialize_u8(self, v: u8) -> Result<u8> {
        Ok(v)
    }

    reject! {
        serialize_bool(bool) -> u8;
        serialize_i8(i8) -> u8;
        serialize_i16(i16) -> u8;
        serialize_i32(i32) -> u8;
        serialize_i64(i64) -> u8;
        serialize_u16(u16) -> u8;
        serialize_u32(u32) -> u8;
        serialize_u64(u64) -> u8;
        serialize_f32(f32) -> u8;
        serialize_f64(f64) -> u8;
        serialize_char(char) -> u8;
        serialize_str(&str) -> u8;
        serialize_bytes(&[u8]) -> u8;
        serialize_none() -> u8;
        serialize_unit() -> u8;
        serialize_unit_struct(&'static str) -> u8;
        serialize_unit_variant(&'static str, u32, &'static str) -> u8;
        serialize_seq(Option<usize>) -> Self::SerializeSeq;
        serialize_tuple(usize) -> Self::SerializeTuple;
        serialize_tuple_struct(&'static str, usize) -> Self::SerializeTupleStruct;
        serialize_tuple_variant(&'static str, u32, &'static str, usize) -> Self::SerializeTupleVariant;
        serialize_map(Option<usize>) -> Self::SerializeMap;
        serialize_struct(&'static str, usize) -> Self::SerializeStruct;
        serialize_struct_variant(&'static str, u32, &'static str, usize) -> Self::SerializeStructVariant;
    }

    fn serialize_some<T: ?Sized + Serialize>(self, _value: &T) -> Result<u8> {
        Err(not_a_byte())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _value: &T,
    ) -> Result<u8> {
        Err(not_a_byte())
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<u8> {
        Err(not_a_byte())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use serde::Serialize;

    use super::*;
    use crate::codec::{FieldCase, Wrapper, wrap};
    use crate::value::Symbol;

    #[derive(Serialize)]
    struct Order {
        order_id: i64,
        lines: Vec<String>,
        note: Option<String>,
    }

    #[derive(Serialize)]
    struct Empty {}

    #[derive(Serialize)]
    enum Event {
        Ping,
        Moved(i32),
        Resized { w: u32, h: u32 },
    }

    #[test]
    fn test_scalars() {
        assert_eq!(wrap(&true).unwrap(), Value::Boolean(true));
        assert_eq!(wrap(&7u16).unwrap(), Value::Integer(7));
        assert_eq!(wrap("x").unwrap(), Value::from("x"));
        assert_eq!(wrap(&'c').unwrap(), Value::from("c"));
        assert_eq!(wrap(&()).unwrap(), Value::Nothing);
        assert_eq!(wrap(&None::<i32>).unwrap(), Value::Nothing);
        assert_eq!(wrap(&Some(5i32)).unwrap(), Value::Integer(5));
    }

    #[test]
    fn test_integral_floats_become_integers() {
        assert_eq!(wrap(&3.0f64).unwrap(), Value::Integer(3));
        assert_eq!(wrap(&3.5f64).unwrap(), Value::Float(3.5));
        assert!(matches!(wrap(&f64::NAN).unwrap(), Value::Float(f) if f.is_nan()));
        assert_eq!(wrap(&1e300f64).unwrap(), Value::Float(1e300));
    }

    #[test]
    fn test_wide_integers_wrap_only_when_exact() {
        assert_eq!(wrap(&(i64::MAX as u64)).unwrap(), Value::Integer(i64::MAX));
        assert_eq!(wrap(&(1u64 << 63)).unwrap(), Value::Float(9223372036854775808.0));
        assert_eq!(wrap(&i128::MIN).unwrap(), Value::Float(-(2f64.powi(127))));

        for err in [
            wrap(&u64::MAX).unwrap_err(),
            wrap(&(u64::MAX - 1)).unwrap_err(),
            wrap(&u128::MAX).unwrap_err(),
            wrap(&i128::MAX).unwrap_err(),
        ] {
            assert!(matches!(err, ValueError::UnsupportedType(_)), "{err}");
        }
    }

    #[test]
    fn test_map_with_wide_keys_is_not_a_duplicate() {
        let keys = HashMap::from([(u64::MAX, "a"), (u64::MAX - 1, "b")]);
        match wrap(&keys).unwrap_err() {
            ValueError::Element { source, .. } => {
                assert!(matches!(*source, ValueError::UnsupportedType(_)), "{source}")
            }
            other => panic!("expected element error, got {other}"),
        }

        let keys = HashMap::from([(1u64 << 63, "a"), (1u64 << 62, "b")]);
        match wrap(&keys).unwrap() {
            Value::Dict(d) => assert_eq!(d.len(), 2),
            other => panic!("expected dict, got {other:?}"),
        }
    }

    #[derive(Serialize)]
    #[serde(rename = "order-line")]
    struct Renamed {
        qty: i64,
    }

    #[test]
    fn test_record_name_that_is_not_an_identifier() {
        let Value::Struct(s) = wrap(&Renamed { qty: 1 }).unwrap() else {
            panic!("expected struct");
        };
        assert_eq!(s.ctor(), &Value::from("order-line"));
        assert_eq!(s.field("qty"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_byte_sequences() {
        assert_eq!(wrap(&vec![1u8, 2, 3]).unwrap(), Value::Bytes(vec![1, 2, 3]));
        assert_eq!(wrap(&Vec::<u8>::new()).unwrap(), Value::List(vec![]));
        assert_eq!(
            wrap(&vec![1i32, 2]).unwrap(),
            Value::List(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn test_record_becomes_struct() {
        let v = wrap(&Order {
            order_id: 9,
            lines: vec!["a".into()],
            note: None,
        })
        .unwrap();

        let Value::Struct(s) = v else {
            panic!("expected struct, got {v:?}");
        };
        assert_eq!(s.ctor(), &Value::Symbol(Symbol::new("Order").unwrap()));
        assert_eq!(s.field("order_id"), Some(&Value::Integer(9)));
        assert_eq!(s.field("lines"), Some(&Value::List(vec![Value::from("a")])));
        assert_eq!(s.field("note"), Some(&Value::Nothing));
    }

    #[test]
    fn test_record_as_dict_with_field_case() {
        let w = Wrapper::with_options(WrapOptions {
            structs_as_dicts: true,
            field_case: FieldCase::Camel,
            ..Default::default()
        });
        let v = w
            .wrap(&Order {
                order_id: 1,
                lines: vec![],
                note: Some("n".into()),
            })
            .unwrap();
        let Value::Dict(d) = v else {
            panic!("expected dict, got {v:?}");
        };
        assert_eq!(d.get_str("orderId"), Some(&Value::Integer(1)));
        assert_eq!(d.get_str("note"), Some(&Value::from("n")));
    }

    #[test]
    fn test_empty_record_is_nothing() {
        assert_eq!(wrap(&Empty {}).unwrap(), Value::Nothing);
    }

    #[test]
    fn test_enum_variants() {
        assert_eq!(wrap(&Event::Ping).unwrap(), Value::from("Ping"));

        let moved = wrap(&Event::Moved(4)).unwrap();
        let Value::Dict(d) = moved else {
            panic!("expected dict");
        };
        assert_eq!(d.get_str("Moved"), Some(&Value::Integer(4)));

        let resized = wrap(&Event::Resized { w: 1, h: 2 }).unwrap();
        let Value::Dict(d) = resized else {
            panic!("expected dict");
        };
        let Some(Value::Struct(inner)) = d.get_str("Resized") else {
            panic!("expected nested struct");
        };
        assert_eq!(inner.field("w"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_maps() {
        let mut m = HashMap::new();
        m.insert("b".to_string(), 2);
        m.insert("a".to_string(), 1);
        let v = wrap(&m).unwrap();
        assert_eq!(
            v,
            Value::new_string_dict([("a", Value::Integer(1)), ("b", Value::Integer(2))]).unwrap()
        );
    }

    #[test]
    fn test_embedded_value_passes_through() {
        let set = Value::new_set([Value::Integer(2), Value::Integer(1)]).unwrap();
        let dur = Value::Duration(Duration::from_secs(1));
        assert_eq!(wrap(&set).unwrap(), set);
        assert_eq!(wrap(&dur).unwrap(), dur);
        assert_eq!(wrap(&Value::Nothing).unwrap(), Value::Nothing);
        assert_eq!(
            wrap(&vec![Value::Bytes(vec![1])]).unwrap(),
            Value::List(vec![Value::Bytes(vec![1])])
        );
    }

    #[test]
    fn test_error_carries_element_path() {
        #[derive(Serialize)]
        struct Bad {
            #[serde(serialize_with = "fail")]
            x: i32,
        }

        fn fail<S: ser::Serializer>(_: &i32, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(ser::Error::custom("nope"))
        }

        let err = wrap(&vec![Bad { x: 1 }]).unwrap_err();
        assert_eq!(err.to_string(), "element 0: field 'x': nope");
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! serde `Deserializer` over a borrowed [`Value`].

use chrono::SecondsFormat;
use serde::de::value::{MapDeserializer, StringDeserializer};
use serde::de::{self, DeserializeSeed, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

use super::{DURATION_TOKEN, TIME_TOKEN, UnwrapOptions, convert_function};
use crate::error::{Result, ValueError};
use crate::value::{VALUE_TOKEN, Value};

/// Deserializer reading from a borrowed [`Value`].
pub struct ValueDeserializer<'a> {
    value: &'a Value,
    opts: &'a UnwrapOptions,
    key: bool,
}

impl<'a> ValueDeserializer<'a> {
    /// A deserializer over `value` honouring `opts`.
    pub fn new(value: &'a Value, opts: &'a UnwrapOptions) -> Self {
        Self {
            value,
            opts,
            key: false,
        }
    }

    /// Dict keys may be scalars of any kind; string-keyed destinations get
    /// them stringified.
    fn key(value: &'a Value, opts: &'a UnwrapOptions) -> Self {
        Self {
            value,
            opts,
            key: true,
        }
    }

    fn mismatch(&self, expected: &str) -> ValueError {
        ValueError::TypeMismatch {
            expected: expected.to_string(),
            actual: self.value.kind(),
        }
    }

    fn visit_seq<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::List(items) => visit_items(items.iter(), self.opts, visitor),
            Value::Set(items) => visit_items(items.iter(), self.opts, visitor),
            Value::Bytes(bytes) => {
                let mut seq = de::value::SeqDeserializer::<_, ValueError>::new(bytes.iter().copied());
                let out = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(out)
            }
            Value::Nothing => {
                let empty: &[Value] = &[];
                visit_items(empty.iter(), self.opts, visitor)
            }
            _ => Err(self.mismatch("sequence")),
        }
    }

    /// Visit a map keyed by the value's own keys.
    fn visit_map<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let entries = match self.value {
            Value::Dict(dict) => dict
                .iter()
                .map(|item| (Key::Value(&item.key), &item.value))
                .collect(),
            Value::Struct(s) => named(s.fields()),
            Value::Module(m) => named(m.members()),
            Value::Nothing => Vec::new(),
            Value::Duration(d) => return visit_duration(*d, visitor),
            _ => return Err(self.mismatch("map")),
        };
        visitor.visit_map(MapAccess::new(entries, self.opts, false))
    }

    /// Visit a record, resolving value field names onto the declared ones.
    fn visit_record<'de, V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        let source: Vec<(&'a str, &'a Value)> = match self.value {
            Value::Struct(s) => s.fields().iter().map(|(k, v)| (k.as_str(), v)).collect(),
            Value::Module(m) => m.members().iter().map(|(k, v)| (k.as_str(), v)).collect(),
            Value::Dict(dict) => dict
                .iter()
                .map(|item| match &item.key {
                    Value::String(k) => Ok((k.as_str(), &item.value)),
                    other => Err(ValueError::TypeMismatch {
                        expected: "string field name".to_string(),
                        actual: other.kind(),
                    }),
                })
                .collect::<Result<_>>()?,
            Value::Nothing => Vec::new(),
            Value::Duration(d) => return visit_duration(*d, visitor),
            _ => return Err(self.mismatch("record")),
        };

        let mut entries = Vec::with_capacity(source.len());
        for (name, value) in source {
            let declared = fields
                .iter()
                .find(|f| self.opts.field_case.apply(f) == name);
            let key = match declared {
                Some(f) => (*f).to_string(),
                None if self.opts.deny_unknown_fields => {
                    return Err(ValueError::UnknownField(name.to_string()));
                }
                None => name.to_string(),
            };
            entries.push((Key::Name(key), value));
        }
        visitor.visit_map(MapAccess::new(entries, self.opts, true))
    }
}

fn named<'a>(
    map: &'a std::collections::BTreeMap<String, Value>,
) -> Vec<(Key<'a>, &'a Value)> {
    map.iter()
        .map(|(k, v)| (Key::Name(k.clone()), v))
        .collect()
}

fn visit_items<'a, 'de, I, V>(items: I, opts: &'a UnwrapOptions, visitor: V) -> Result<V::Value>
where
    I: ExactSizeIterator<Item = &'a Value>,
    V: Visitor<'de>,
{
    let total = items.len();
    let mut seq = SeqAccess {
        iter: items.enumerate(),
        opts,
    };
    let out = visitor.visit_seq(&mut seq)?;
    let remaining = seq.iter.len();
    if remaining > 0 {
        return Err(ValueError::LengthMismatch {
            expected: total - remaining,
            actual: total,
        });
    }
    Ok(out)
}

fn visit_duration<'de, V: Visitor<'de>>(d: std::time::Duration, visitor: V) -> Result<V::Value> {
    let mut map = MapDeserializer::<_, ValueError>::new(
        [("secs", d.as_secs()), ("nanos", u64::from(d.subsec_nanos()))].into_iter(),
    );
    let out = visitor.visit_map(&mut map)?;
    map.end()?;
    Ok(out)
}

fn sequence_len(value: &Value) -> Option<usize> {
    match value {
        Value::List(items) => Some(items.len()),
        Value::Set(items) => Some(items.len()),
        Value::Bytes(bytes) => Some(bytes.len()),
        _ => None,
    }
}

/// Wide integers are wrapped as exact floats; these read them back.
fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0
}

impl<'de> de::Deserializer<'de> for ValueDeserializer<'_> {
    type Error = ValueError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Nothing => visitor.visit_unit(),
            Value::Boolean(b) => visitor.visit_bool(*b),
            Value::String(s) => visitor.visit_str(s),
            Value::Integer(i) => visitor.visit_i64(*i),
            Value::Float(f) => visitor.visit_f64(*f),
            Value::Symbol(s) => visitor.visit_str(s.name()),
            Value::Duration(d) if self.opts.durations_as_nanos => {
                match u64::try_from(d.as_nanos()) {
                    Ok(n) => visitor.visit_u64(n),
                    Err(_) => visitor.visit_u128(d.as_nanos()),
                }
            }
            Value::Time(t) => visitor.visit_string(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Bytes(_) | Value::List(_) | Value::Set(_) => self.visit_seq(visitor),
            Value::Duration(_) | Value::Dict(_) | Value::Struct(_) | Value::Module(_) => {
                self.visit_map(visitor)
            }
            Value::Function(_) | Value::Custom(_) => {
                let json = convert_function(self.value, self.opts)?;
                Ok(de::Deserializer::deserialize_any(json, visitor)?)
            }
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        if self.key {
            match self.value {
                Value::Integer(i) => return visitor.visit_string(i.to_string()),
                Value::Boolean(b) => return visitor.visit_string(b.to_string()),
                Value::Float(f) => return visitor.visit_string(f.to_string()),
                _ => {}
            }
        }
        self.deserialize_any(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Nothing => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Nothing => visitor.visit_unit(),
            _ => Err(self.mismatch("nothing")),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        match (name, self.value) {
            (TIME_TOKEN, Value::Time(t)) => {
                visitor.visit_string(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            (TIME_TOKEN, Value::String(s)) => visitor.visit_str(s),
            (TIME_TOKEN, _) => Err(self.mismatch("time")),
            (DURATION_TOKEN, Value::Duration(d)) => u64::try_from(d.as_nanos())
                .map_err(|_| ValueError::invalid("duration", "exceeds u64 nanoseconds"))
                .and_then(|n| visitor.visit_u64(n)),
            (DURATION_TOKEN, Value::Integer(n)) => visitor.visit_i64(*n),
            (DURATION_TOKEN, _) => Err(self.mismatch("duration")),
            _ => visitor.visit_newtype_struct(self),
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.visit_seq(visitor)
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        match sequence_len(self.value) {
            Some(actual) if actual != len => Err(ValueError::LengthMismatch {
                expected: len,
                actual,
            }),
            _ => self.visit_seq(visitor),
        }
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.visit_map(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.visit_record(fields, visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        if name == VALUE_TOKEN {
            let json = serde_json::to_value(self.value)?;
            return Ok(de::Deserializer::deserialize_enum(json, name, variants, visitor)?);
        }
        let (variant, payload) = match self.value {
            Value::String(s) => (s.as_str(), None),
            Value::Symbol(s) => (s.name(), None),
            Value::Dict(dict) if dict.len() == 1 => {
                let item = dict.iter().next().ok_or_else(|| self.mismatch("enum"))?;
                match &item.key {
                    Value::String(k) => (k.as_str(), Some(&item.value)),
                    _ => return Err(self.mismatch("enum")),
                }
            }
            _ => return Err(self.mismatch("enum")),
        };
        visitor.visit_enum(EnumAccess {
            variant,
            payload,
            opts: self.opts,
        })
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Float(f) if is_integral(*f) && *f >= 0.0 && *f < 2f64.powi(64) => {
                visitor.visit_u64(*f as u64)
            }
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_u128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Float(f) if is_integral(*f) && *f >= 0.0 && *f < 2f64.powi(128) => {
                visitor.visit_u128(*f as u128)
            }
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Float(f) if is_integral(*f) && *f >= -(2f64.powi(127)) && *f < 2f64.powi(127) => {
                visitor.visit_i128(*f as i128)
            }
            _ => self.deserialize_any(visitor),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 u8 u16 u32 f32 f64 char
        bytes byte_buf ignored_any
    }
}

struct SeqAccess<'a, I> {
    iter: std::iter::Enumerate<I>,
    opts: &'a UnwrapOptions,
}

impl<'a, 'de, I> de::SeqAccess<'de> for SeqAccess<'a, I>
where
    I: ExactSizeIterator<Item = &'a Value>,
{
    type Error = ValueError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some((index, value)) => seed
                .deserialize(ValueDeserializer::new(value, self.opts))
                .map(Some)
                .map_err(|e| e.at_index(index)),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

enum Key<'a> {
    Value(&'a Value),
    Name(String),
}

struct MapAccess<'a> {
    entries: std::vec::IntoIter<(Key<'a>, &'a Value)>,
    pending: Option<(String, &'a Value)>,
    opts: &'a UnwrapOptions,
    record: bool,
}

impl<'a> MapAccess<'a> {
    fn new(entries: Vec<(Key<'a>, &'a Value)>, opts: &'a UnwrapOptions, record: bool) -> Self {
        Self {
            entries: entries.into_iter(),
            pending: None,
            opts,
            record,
        }
    }
}

impl<'de> de::MapAccess<'de> for MapAccess<'_> {
    type Error = ValueError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        let Some((key, value)) = self.entries.next() else {
            return Ok(None);
        };
        match key {
            Key::Value(k) => {
                let label = match k {
                    Value::String(s) => s.clone(),
                    other => other.kind().to_string(),
                };
                self.pending = Some((label, value));
                seed.deserialize(ValueDeserializer::key(k, self.opts)).map(Some)
            }
            Key::Name(name) => {
                let de: StringDeserializer<ValueError> = name.clone().into_deserializer();
                self.pending = Some((name, value));
                seed.deserialize(de).map(Some)
            }
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let (name, value) = self
            .pending
            .take()
            .ok_or_else(|| ValueError::Custom("map value requested before key".to_string()))?;
        let out = seed.deserialize(ValueDeserializer::new(value, self.opts));
        if self.record {
            out.map_err(|e| e.at_field(name))
        } else {
            out
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

struct EnumAccess<'a> {
    variant: &'a str,
    payload: Option<&'a Value>,
    opts: &'a UnwrapOptions,
}

impl<'de, 'a> de::EnumAccess<'de> for EnumAccess<'a> {
    type Error = ValueError;
    type Variant = VariantAccess<'a>;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, VariantAccess<'a>)> {
        let de: de::value::StrDeserializer<'_, ValueError> = self.variant.into_deserializer();
        let variant = seed.deserialize(de)?;
        Ok((
            variant,
            VariantAccess {
                payload: self.payload,
                opts: self.opts,
            },
        ))
    }
}

struct VariantAccess<'a> {
    payload: Option<&'a Value>,
    opts: &'a UnwrapOptions,
}

impl<'a> VariantAccess<'a> {
    fn payload(&self) -> Result<ValueDeserializer<'a>> {
        self.payload
            .map(|v| ValueDeserializer::new(v, self.opts))
            .ok_or_else(|| ValueError::TypeMismatch {
                expected: "variant payload".to_string(),
                actual: "string",
            })
    }
}

impl<'de> de::VariantAccess<'de> for VariantAccess<'_> {
    type Error = ValueError;

    fn unit_variant(self) -> Result<()> {
        match self.payload {
            None | Some(Value::Nothing) => Ok(()),
            Some(other) => Err(ValueError::TypeMismatch {
                expected: "unit variant".to_string(),
                actual: other.kind(),
            }),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self.payload()?)
    }

    fn tuple_variant<V: Visitor<'de>>(self, len: usize, visitor: V) -> Result<V::Value> {
        de::Deserializer::deserialize_tuple(self.payload()?, len, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.payload()?.visit_record(fields, visitor)
    }
}

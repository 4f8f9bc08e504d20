// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Composite value payloads: dicts, sets, structs and modules.
//!
//! Dicts and sets are kept in canonical order so that equality, hashing and
//! the persisted log never depend on the order entries were produced in.
//! Sets are ordered by element content hash. Dicts put string keys first, in
//! string order, then every other key by its canonical encoding. Both deserialize through their constructors, so a decoded
//! value is re-canonicalised and re-checked for uniqueness.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};
use crate::value::Value;

/// One dict entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictItem {
    /// Entry key.
    #[serde(rename = "k")]
    pub key: Value,
    /// Entry value.
    #[serde(rename = "v")]
    pub value: Value,
}

impl DictItem {
    /// Pair a key with a value.
    pub fn new(key: Value, value: Value) -> Self {
        Self { key, value }
    }
}

/// Key/value pairs with unique keys, in canonical key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DictItem>", into = "Vec<DictItem>")]
pub struct DictValue {
    items: Vec<DictItem>,
}

impl DictValue {
    /// Canonicalise `items`, failing with [`ValueError::DuplicateKey`] if two
    /// keys share a content hash.
    pub fn new(items: Vec<DictItem>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(items.len());
        let mut keyed = Vec::with_capacity(items.len());

        for item in items {
            let hash = item.key.content_hash()?;
            if !seen.insert(hash) {
                return Err(ValueError::DuplicateKey(describe_key(&item.key)));
            }
            keyed.push((DictOrder::of(&item.key)?, item));
        }

        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            items: keyed.into_iter().map(|(_, item)| item).collect(),
        })
    }

    /// Entries in canonical order.
    pub fn iter(&self) -> std::slice::Iter<'_, DictItem> {
        self.items.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the dict has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up the entry whose key is structurally equal to `key`.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| &item.key == key)
            .map(|item| &item.value)
    }

    /// Look up a string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| item.key.as_str() == Some(key))
            .map(|item| &item.value)
    }

    /// A new dict with `key` set to `value`, replacing any existing entry.
    pub fn with(&self, key: Value, value: Value) -> Result<Self> {
        let mut items: Vec<DictItem> = self
            .items
            .iter()
            .filter(|item| item.key != key)
            .cloned()
            .collect();
        items.push(DictItem::new(key, value));
        Self::new(items)
    }

    /// Consume into the ordered entries.
    pub fn into_items(self) -> Vec<DictItem> {
        self.items
    }
}

impl TryFrom<Vec<DictItem>> for DictValue {
    type Error = ValueError;

    fn try_from(items: Vec<DictItem>) -> Result<Self> {
        Self::new(items)
    }
}

impl From<DictValue> for Vec<DictItem> {
    fn from(dict: DictValue) -> Self {
        dict.items
    }
}

impl<'a> IntoIterator for &'a DictValue {
    type Item = &'a DictItem;
    type IntoIter = std::slice::Iter<'a, DictItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

fn describe_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Boolean(b) => b.to_string(),
        other => other.kind().to_string(),
    }
}

/// Sort key for dict entries.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DictOrder {
    Text(String),
    Encoded(Vec<u8>),
}

impl DictOrder {
    fn of(key: &Value) -> Result<Self> {
        Ok(match key.as_str() {
            Some(s) => Self::Text(s.to_string()),
            None => Self::Encoded(key.canonical_bytes()?),
        })
    }
}

/// Unique elements in content-hash order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<Value>")]
pub struct SetValue {
    elements: Vec<Value>,
}

impl SetValue {
    /// Canonicalise `elements`. Elements whose content hash was already seen
    /// are dropped.
    pub fn new(elements: impl IntoIterator<Item = Value>) -> Result<Self> {
        let mut hashed: Vec<(String, Value)> = Vec::new();
        let mut seen = HashSet::new();

        for element in elements {
            let hash = element.content_hash()?;
            if seen.insert(hash.clone()) {
                hashed.push((hash, element));
            }
        }

        hashed.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            elements: hashed.into_iter().map(|(_, v)| v).collect(),
        })
    }

    /// Elements in canonical order.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.elements.iter()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the set has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Whether an element structurally equal to `value` is present.
    pub fn contains(&self, value: &Value) -> bool {
        self.elements.iter().any(|e| e == value)
    }
}

impl TryFrom<Vec<Value>> for SetValue {
    type Error = ValueError;

    fn try_from(elements: Vec<Value>) -> Result<Self> {
        Self::new(elements)
    }
}

impl From<SetValue> for Vec<Value> {
    fn from(set: SetValue) -> Self {
        set.elements
    }
}

impl<'a> IntoIterator for &'a SetValue {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// A record: a constructor identity plus named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructValue {
    ctor: Box<Value>,
    fields: BTreeMap<String, Value>,
}

impl StructValue {
    /// Build a struct.
    pub fn new(ctor: Value, fields: BTreeMap<String, Value>) -> Result<Self> {
        let s = Self {
            ctor: Box::new(ctor),
            fields,
        };
        s.check(false)?;
        Ok(s)
    }

    /// The value identifying the constructor (usually a symbol naming the type).
    pub fn ctor(&self) -> &Value {
        &self.ctor
    }

    /// Fields by name.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Look up a single field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A new struct with `name` set to `value`.
    pub fn with_field(&self, name: impl Into<String>, value: Value) -> Self {
        let mut fields = self.fields.clone();
        fields.insert(name.into(), value);
        Self {
            ctor: self.ctor.clone(),
            fields,
        }
    }

    pub(crate) fn check(&self, strict: bool) -> Result<()> {
        if strict && self.ctor.is_nothing() {
            return Err(ValueError::invalid("ctor", "missing"));
        }
        self.ctor.check(strict).map_err(|e| e.within("ctor"))?;
        for (name, value) in &self.fields {
            if name.is_empty() {
                return Err(ValueError::invalid("fields", "empty field name"));
            }
            value
                .check(strict)
                .map_err(|e| e.within(&format!("fields.{name}")))?;
        }
        Ok(())
    }
}

/// A named namespace of members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleValue {
    name: String,
    members: BTreeMap<String, Value>,
}

impl ModuleValue {
    /// Build a module.
    pub fn new(name: impl Into<String>, members: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members by name.
    pub fn members(&self) -> &BTreeMap<String, Value> {
        &self.members
    }

    pub(crate) fn check(&self, strict: bool) -> Result<()> {
        if strict && self.name.is_empty() {
            return Err(ValueError::invalid("name", "missing"));
        }
        for (name, value) in &self.members {
            value
                .check(strict)
                .map_err(|e| e.within(&format!("members.{name}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_rejects_duplicate_keys() {
        let err = Value::new_dict([
            (Value::from("a"), Value::Integer(1)),
            (Value::from("a"), Value::Integer(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, ValueError::DuplicateKey(ref k) if k == "a"));
        assert!(err.to_string().contains("duplicate key"));
    }

    #[test]
    fn test_dict_keys_of_different_kinds_are_distinct() {
        let dict = Value::new_dict([
            (Value::Integer(1), Value::from("int")),
            (Value::from("1"), Value::from("str")),
        ])
        .unwrap();
        let Value::Dict(d) = dict else {
            panic!("expected dict");
        };
        assert_eq!(d.len(), 2);
        assert_eq!(d.get(&Value::Integer(1)), Some(&Value::from("int")));
        assert_eq!(d.get_str("1"), Some(&Value::from("str")));
    }

    #[test]
    fn test_dict_string_keys_sorted() {
        let Value::Dict(d) = Value::new_string_dict([
            ("zeta", Value::Nothing),
            ("alpha", Value::Nothing),
            ("mid", Value::Nothing),
        ])
        .unwrap() else {
            panic!("expected dict");
        };
        let keys: Vec<_> = d.iter().map(|i| i.key.as_str().unwrap()).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_dict_string_keys_ignore_escaping() {
        // The encoded form of "a\u{1}" escapes the control char and sorts after "a[".
        let Value::Dict(d) =
            Value::new_string_dict([("a[", Value::Nothing), ("a\u{1}", Value::Nothing)]).unwrap()
        else {
            panic!("expected dict");
        };
        let keys: Vec<_> = d.iter().map(|i| i.key.as_str().unwrap()).collect();
        assert_eq!(keys, vec!["a\u{1}", "a["]);
    }

    #[test]
    fn test_dict_string_keys_come_before_other_kinds() {
        let Value::Dict(d) = Value::new_dict([
            (Value::Integer(1), Value::Nothing),
            (Value::from("z"), Value::Nothing),
        ])
        .unwrap() else {
            panic!("expected dict");
        };
        let first = d.iter().next().unwrap();
        assert_eq!(first.key, Value::from("z"));
    }

    #[test]
    fn test_dict_with_replaces_entry() {
        let Value::Dict(d) = Value::new_string_dict([("a", Value::Integer(1))]).unwrap() else {
            panic!("expected dict");
        };
        let d2 = d.with(Value::from("a"), Value::Integer(7)).unwrap();
        assert_eq!(d.get_str("a"), Some(&Value::Integer(1)));
        assert_eq!(d2.get_str("a"), Some(&Value::Integer(7)));
        assert_eq!(d2.len(), 1);
    }

    #[test]
    fn test_set_dedups_by_hash() {
        let Value::Set(s) = Value::new_set([
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(2),
            Value::Integer(3),
        ])
        .unwrap() else {
            panic!("expected set");
        };
        assert_eq!(s.len(), 3);
        assert!(s.contains(&Value::Integer(2)));
    }

    #[test]
    fn test_set_order_is_canonical() {
        let a = Value::new_set([Value::Integer(3), Value::Integer(1), Value::from("x")]).unwrap();
        let b = Value::new_set([Value::from("x"), Value::Integer(1), Value::Integer(3)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn test_decoded_dict_with_duplicates_is_rejected() {
        let json = r#"{"dict":[{"k":{"string":"a"},"v":"nothing"},{"k":{"string":"a"},"v":"nothing"}]}"#;
        let result: std::result::Result<Value, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_struct_strict_requires_ctor() {
        let s = StructValue::new(Value::Nothing, BTreeMap::new()).unwrap();
        assert!(s.check(false).is_ok());
        assert!(s.check(true).is_err());
    }

    #[test]
    fn test_struct_with_field_is_new_value() {
        let s = StructValue::new(Value::new_symbol("Point").unwrap(), BTreeMap::new()).unwrap();
        let s2 = s.with_field("x", Value::Integer(1));
        assert!(s.field("x").is_none());
        assert_eq!(s2.field("x"), Some(&Value::Integer(1)));
    }
}

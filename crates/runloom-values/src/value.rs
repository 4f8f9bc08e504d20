// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The tagged-union [`Value`] type.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::collections::{DictItem, DictValue, ModuleValue, SetValue, StructValue};
use crate::error::{Result, ValueError};
use crate::function::{CustomValue, FunctionValue};

/// Serde container name of [`Value`]. The codec recognises it to pass
/// embedded values through untouched.
pub(crate) const VALUE_TOKEN: &str = "$runloom::Value";

/// A value crossing the session call boundary.
///
/// Exactly one variant is active at a time. Values are immutable once built;
/// composite constructors canonicalise their contents so that equal content
/// always produces equal encodings and equal hashes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "$runloom::Value", rename_all = "snake_case")]
pub enum Value {
    /// Absence of a value.
    #[default]
    Nothing,
    /// A boolean.
    Boolean(bool),
    /// A UTF-8 string.
    String(String),
    /// A signed 64-bit integer.
    Integer(i64),
    /// Raw bytes.
    Bytes(#[serde(with = "crate::wire::base64_bytes")] Vec<u8>),
    /// A 64-bit float.
    Float(#[serde(with = "crate::wire::float")] f64),
    /// An identifier-like name.
    Symbol(Symbol),
    /// A non-negative span of time.
    Duration(#[serde(with = "crate::wire::duration_nanos")] Duration),
    /// A point in time.
    Time(DateTime<Utc>),
    /// An ordered sequence.
    List(Vec<Value>),
    /// Unique elements in canonical order.
    Set(SetValue),
    /// Unique keys in canonical order.
    Dict(DictValue),
    /// A record with a constructor identity.
    Struct(StructValue),
    /// A named collection of members.
    Module(ModuleValue),
    /// A reference to executable code owned by some executor.
    Function(FunctionValue),
    /// An extension value owned by some executor.
    Custom(CustomValue),
}

impl Value {
    /// Static name of the active variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Bytes(_) => "bytes",
            Self::Float(_) => "float",
            Self::Symbol(_) => "symbol",
            Self::Duration(_) => "duration",
            Self::Time(_) => "time",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Dict(_) => "dict",
            Self::Struct(_) => "struct",
            Self::Module(_) => "module",
            Self::Function(_) => "function",
            Self::Custom(_) => "custom",
        }
    }

    /// Build a set, dropping elements whose content hash repeats.
    pub fn new_set(elements: impl IntoIterator<Item = Value>) -> Result<Self> {
        Ok(Self::Set(SetValue::new(elements)?))
    }

    /// Build a dict, rejecting keys whose content hash repeats.
    pub fn new_dict(items: impl IntoIterator<Item = (Value, Value)>) -> Result<Self> {
        let items = items
            .into_iter()
            .map(|(k, v)| DictItem::new(k, v))
            .collect::<Vec<_>>();
        Ok(Self::Dict(DictValue::new(items)?))
    }

    /// Build a dict keyed by strings.
    pub fn new_string_dict<K: Into<String>>(
        items: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Self> {
        Self::new_dict(items.into_iter().map(|(k, v)| (Self::String(k.into()), v)))
    }

    /// Build a struct value.
    pub fn new_struct(ctor: Value, fields: BTreeMap<String, Value>) -> Result<Self> {
        Ok(Self::Struct(StructValue::new(ctor, fields)?))
    }

    /// Build a symbol, validating its name.
    pub fn new_symbol(name: impl Into<String>) -> Result<Self> {
        Ok(Self::Symbol(Symbol::new(name)?))
    }

    /// Returns true for [`Value::Nothing`].
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    /// Borrow the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the function payload.
    pub fn as_function(&self) -> Option<&FunctionValue> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Canonical encoding used for hashing and key ordering.
    ///
    /// This is the JSON wire form. Composite constructors keep their contents
    /// sorted, so the encoding does not depend on construction order.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Structural content hash: hex-encoded SHA-256 of the canonical encoding.
    ///
    /// Stable across processes and releases as long as the wire form is.
    pub fn content_hash(&self) -> Result<String> {
        let digest = Sha256::digest(self.canonical_bytes()?);
        Ok(format!("{:x}", digest))
    }

    /// Lenient validation: every field that is present must be well formed.
    pub fn validate(&self) -> Result<()> {
        self.check(false)
    }

    /// Strict validation: mandatory fields must be present as well.
    ///
    /// Applied before a value is persisted or dispatched.
    pub fn strict_validate(&self) -> Result<()> {
        self.check(true)
    }

    pub(crate) fn check(&self, strict: bool) -> Result<()> {
        match self {
            Self::Nothing
            | Self::Boolean(_)
            | Self::String(_)
            | Self::Integer(_)
            | Self::Bytes(_)
            | Self::Float(_)
            | Self::Duration(_)
            | Self::Time(_) => Ok(()),
            Self::Symbol(s) => Symbol::check_name(s.name()),
            Self::List(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| v.check(strict).map_err(|e| e.within(&format!("list[{i}]")))),
            Self::Set(set) => set
                .iter()
                .try_for_each(|v| v.check(strict).map_err(|e| e.within("set"))),
            Self::Dict(dict) => dict.iter().try_for_each(|item| {
                item.key.check(strict).map_err(|e| e.within("dict.key"))?;
                item.value.check(strict).map_err(|e| e.within("dict.value"))
            }),
            Self::Struct(s) => s.check(strict).map_err(|e| e.within("struct")),
            Self::Module(m) => m.check(strict).map_err(|e| e.within("module")),
            Self::Function(f) => f.check(strict).map_err(|e| e.within("function")),
            Self::Custom(c) => c.check(strict).map_err(|e| e.within("custom")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl From<FunctionValue> for Value {
    fn from(v: FunctionValue) -> Self {
        Self::Function(v)
    }
}

/// An identifier-like name: `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Validate and wrap a name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::check_name(&name)?;
        Ok(Self(name))
    }

    /// The symbol's name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether `name` is a valid identifier.
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn check_name(name: &str) -> Result<()> {
        if Self::is_valid(name) {
            Ok(())
        } else {
            Err(ValueError::InvalidSymbol(name.to_string()))
        }
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

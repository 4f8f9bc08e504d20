// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversion between native Rust values and [`Value`].
//!
//! The codec is driven by serde rather than runtime reflection:
//!
//! - [`Wrapper::wrap`] runs any `T: Serialize` through a serializer whose
//!   output is a [`Value`]. Scalars, sequences, maps and records each have a
//!   dedicated handler.
//! - [`Unwrapper::unwrap_into`] runs a deserializer over a borrowed
//!   [`Value`], so any `T: DeserializeOwned` can be the destination shape.
//! - [`Unwrapper::unwrap`] produces a generic [`serde_json::Value`] when the
//!   destination shape is not known ahead of time.
//!
//! serde has no data model entry for times or durations. Fields of those
//! types opt in with `#[serde(with = "runloom_values::codec::time")]` or
//! `codec::duration`; without it a `DateTime` wraps as its RFC 3339 string.
//! A [`Value`] nested inside a native struct passes through unchanged.

mod de;
mod native;
mod ser;

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, ValueError};
use crate::function::FunctionValue;
use crate::registry::ValueRegistry;
use crate::value::Value;

pub use self::de::ValueDeserializer;
pub use self::ser::ValueSerializer;

pub(crate) const TIME_TOKEN: &str = "$runloom::Time";
pub(crate) const DURATION_TOKEN: &str = "$runloom::Duration";

/// Map key under which a struct's constructor identity is placed when it is
/// unwrapped into a generic map.
pub const CTOR_KEY: &str = "__ctor__";

/// How record field names are rewritten on the way in and out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldCase {
    /// Keep names as declared.
    #[default]
    AsIs,
    /// `snake_case`.
    Snake,
    /// `camelCase`.
    Camel,
    /// `PascalCase`.
    Pascal,
}

impl FieldCase {
    /// Rewrite `name` into this case.
    pub fn apply(self, name: &str) -> String {
        match self {
            Self::AsIs => name.to_string(),
            Self::Snake => words(name).join("_"),
            Self::Camel => {
                let mut out = String::with_capacity(name.len());
                for (i, word) in words(name).iter().enumerate() {
                    if i == 0 {
                        out.push_str(word);
                    } else {
                        push_capitalized(&mut out, word);
                    }
                }
                out
            }
            Self::Pascal => {
                let mut out = String::with_capacity(name.len());
                for word in words(name) {
                    push_capitalized(&mut out, &word);
                }
                out
            }
        }
    }
}

/// Split an identifier into lowercase words on underscores and lower→upper
/// case boundaries.
fn words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in name.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn push_capitalized(out: &mut String, word: &str) {
    let mut chars = word.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(chars.as_str());
    }
}

/// Options for [`Wrapper`].
#[derive(Debug, Clone, Default)]
pub struct WrapOptions {
    /// Wrap records as flat dicts keyed by field name instead of structs.
    pub structs_as_dicts: bool,
    /// Field name rewriting.
    pub field_case: FieldCase,
    /// Wrap byte streams as strings instead of bytes.
    pub readers_as_strings: bool,
    /// Do not consume byte streams; they wrap as [`Value::Nothing`].
    pub ignore_readers: bool,
}

/// Native → [`Value`] converter.
#[derive(Debug, Clone, Default)]
pub struct Wrapper {
    opts: WrapOptions,
}

impl Wrapper {
    /// A wrapper with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A wrapper with the given options.
    pub fn with_options(opts: WrapOptions) -> Self {
        Self { opts }
    }

    /// Active options.
    pub fn options(&self) -> &WrapOptions {
        &self.opts
    }

    /// Convert any serializable value.
    pub fn wrap<T: ?Sized + Serialize>(&self, value: &T) -> Result<Value> {
        value.serialize(ValueSerializer::new(&self.opts))
    }

    /// Consume a byte stream into [`Value::Bytes`] (or a string, if configured).
    pub fn wrap_reader<R: Read>(&self, mut reader: R) -> Result<Value> {
        if self.opts.ignore_readers {
            return Ok(Value::Nothing);
        }
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        if self.opts.readers_as_strings {
            String::from_utf8(buf)
                .map(Value::String)
                .map_err(|e| ValueError::invalid("reader", e.to_string()))
        } else {
            Ok(Value::Bytes(buf))
        }
    }

    /// Resolve a pre-decoded number literal: integer if it parses as one,
    /// otherwise float, otherwise left as a string.
    pub fn wrap_number(&self, literal: &str) -> Value {
        if let Ok(i) = literal.parse::<i64>() {
            Value::Integer(i)
        } else if let Ok(f) = literal.parse::<f64>() {
            Value::Float(f)
        } else {
            Value::String(literal.to_string())
        }
    }
}

/// Hook that turns a function or custom value into a native value.
pub type FunctionUnwrapFn = dyn Fn(&Value) -> Result<serde_json::Value> + Send + Sync;

/// Hook for values the generic unwrapper has no native shape for.
pub type FallbackUnwrapFn = dyn Fn(&Value) -> Result<serde_json::Value> + Send + Sync;

/// Options for [`Unwrapper`].
#[derive(Clone, Default)]
pub struct UnwrapOptions {
    /// Field name rewriting; must match what the value was wrapped with.
    pub field_case: FieldCase,
    /// Fail when a value carries fields the destination record lacks.
    pub deny_unknown_fields: bool,
    /// Only allow string, integer and boolean dict keys in [`Unwrapper::unwrap`].
    pub safe_dict_keys: bool,
    /// Emit structs as their encoded wire document instead of expanding them.
    pub structs_as_json: bool,
    /// Emit durations as raw nanosecond counts.
    pub durations_as_nanos: bool,
    /// Converts function and custom values. Without it they cannot be unwrapped.
    pub function_unwrapper: Option<Arc<FunctionUnwrapFn>>,
    /// Converts modules. Defaults to the JSON wire form.
    pub fallback: Option<Arc<FallbackUnwrapFn>>,
    /// Decoders for custom values, keyed by executor.
    pub registry: Option<Arc<ValueRegistry>>,
}

impl fmt::Debug for UnwrapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnwrapOptions")
            .field("field_case", &self.field_case)
            .field("deny_unknown_fields", &self.deny_unknown_fields)
            .field("safe_dict_keys", &self.safe_dict_keys)
            .field("structs_as_json", &self.structs_as_json)
            .field("durations_as_nanos", &self.durations_as_nanos)
            .field("function_unwrapper", &self.function_unwrapper.as_ref().map(|_| "..."))
            .field("fallback", &self.fallback.as_ref().map(|_| "..."))
            .field("registry", &self.registry)
            .finish()
    }
}

/// [`Value`] → native converter.
#[derive(Debug, Clone, Default)]
pub struct Unwrapper {
    opts: UnwrapOptions,
}

impl Unwrapper {
    /// An unwrapper with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// An unwrapper with the given options.
    pub fn with_options(opts: UnwrapOptions) -> Self {
        Self { opts }
    }

    /// Install a function unwrap hook.
    pub fn with_function_unwrapper(
        mut self,
        f: impl Fn(&Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        self.opts.function_unwrapper = Some(Arc::new(f));
        self
    }

    /// Install a custom-value registry.
    pub fn with_registry(mut self, registry: Arc<ValueRegistry>) -> Self {
        self.opts.registry = Some(registry);
        self
    }

    /// Active options.
    pub fn options(&self) -> &UnwrapOptions {
        &self.opts
    }

    /// Convert into a generic native value.
    pub fn unwrap(&self, value: &Value) -> Result<serde_json::Value> {
        native::unwrap(value, &self.opts)
    }

    /// Convert into a known destination shape.
    pub fn unwrap_into<T: DeserializeOwned>(&self, value: &Value) -> Result<T> {
        T::deserialize(ValueDeserializer::new(value, &self.opts))
    }
}

/// Apply the function hook (and registry, for custom values), or fail.
pub(crate) fn convert_function(value: &Value, opts: &UnwrapOptions) -> Result<serde_json::Value> {
    if let (Value::Custom(custom), Some(registry)) = (value, &opts.registry)
        && let Some(decoded) = registry.decode(custom)
    {
        return decoded;
    }
    match &opts.function_unwrapper {
        Some(hook) => hook(value),
        None => Err(ValueError::UnsupportedType(format!(
            "{} values cannot be unwrapped without a function unwrapper",
            value.kind()
        ))),
    }
}

/// Wrap with default options.
pub fn wrap<T: ?Sized + Serialize>(value: &T) -> Result<Value> {
    Wrapper::new().wrap(value)
}

/// Unwrap into a generic native value with default options.
pub fn unwrap(value: &Value) -> Result<serde_json::Value> {
    Unwrapper::new().unwrap(value)
}

/// Unwrap into a known shape with default options.
pub fn unwrap_into<T: DeserializeOwned>(value: &Value) -> Result<T> {
    Unwrapper::new().unwrap_into(value)
}

/// Unwrap a function value through `hook`.
pub fn unwrap_function<T>(
    value: &Value,
    hook: impl FnOnce(&FunctionValue) -> Result<T>,
) -> Result<T> {
    match value {
        Value::Function(f) => hook(f),
        other => Err(ValueError::TypeMismatch {
            expected: "function".to_string(),
            actual: other.kind(),
        }),
    }
}

/// `#[serde(with = "...")]` adapter marking a `DateTime<Utc>` field as a time.
pub mod time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    use super::TIME_TOKEN;

    /// Serialize as a time marker wrapping the RFC 3339 text.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(
            TIME_TOKEN,
            &value.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )
    }

    /// Deserialize from a time value or RFC 3339 text.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        deserializer.deserialize_newtype_struct(TIME_TOKEN, TimeVisitor)
    }

    struct TimeVisitor;

    impl<'de> Visitor<'de> for TimeVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("an RFC 3339 timestamp")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(E::custom)
        }

        fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_str(self)
        }
    }
}

/// `#[serde(with = "...")]` adapter marking a `std::time::Duration` field as a duration.
pub mod duration {
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    use super::DURATION_TOKEN;

    /// Serialize as a duration marker wrapping a nanosecond count.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos())
            .map_err(|_| serde::ser::Error::custom("duration exceeds u64 nanoseconds"))?;
        serializer.serialize_newtype_struct(DURATION_TOKEN, &nanos)
    }

    /// Deserialize from a duration value or a nanosecond count.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_newtype_struct(DURATION_TOKEN, DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a nanosecond count")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_nanos(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v)
                .map(Duration::from_nanos)
                .map_err(|_| E::custom("negative duration"))
        }

        fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_u64(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_case() {
        assert_eq!(FieldCase::Camel.apply("retry_interval_ms"), "retryIntervalMs");
        assert_eq!(FieldCase::Pascal.apply("retry_interval"), "RetryInterval");
        assert_eq!(FieldCase::Snake.apply("retryInterval"), "retry_interval");
        assert_eq!(FieldCase::Snake.apply("RetryInterval"), "retry_interval");
        assert_eq!(FieldCase::AsIs.apply("Mixed_case"), "Mixed_case");
    }

    #[test]
    fn test_wrap_number() {
        let w = Wrapper::new();
        assert_eq!(w.wrap_number("42"), Value::Integer(42));
        assert_eq!(w.wrap_number("4.5"), Value::Float(4.5));
        assert_eq!(w.wrap_number("4e400x"), Value::String("4e400x".into()));
    }

    #[test]
    fn test_wrap_reader() {
        let w = Wrapper::new();
        assert_eq!(
            w.wrap_reader(&b"abc"[..]).unwrap(),
            Value::Bytes(b"abc".to_vec())
        );

        let w = Wrapper::with_options(WrapOptions {
            readers_as_strings: true,
            ..Default::default()
        });
        assert_eq!(w.wrap_reader(&b"abc"[..]).unwrap(), Value::from("abc"));

        let w = Wrapper::with_options(WrapOptions {
            ignore_readers: true,
            ..Default::default()
        });
        assert_eq!(w.wrap_reader(&b"abc"[..]).unwrap(), Value::Nothing);
    }

    #[test]
    fn test_unwrap_function_hook() {
        use crate::function::ExecutorId;

        let f = Value::Function(FunctionValue::new(ExecutorId::new("run_1"), "go"));
        let name = unwrap_function(&f, |f| Ok(f.name().to_string())).unwrap();
        assert_eq!(name, "go");
        assert!(unwrap_function(&Value::Integer(1), |_| Ok(())).is_err());
    }
}

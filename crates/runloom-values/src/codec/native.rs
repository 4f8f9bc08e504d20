// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shape-agnostic unwrapping into [`serde_json::Value`].

use chrono::SecondsFormat;
use serde_json::{Map, Number, Value as Json, json};

use super::{CTOR_KEY, UnwrapOptions, convert_function};
use crate::collections::DictValue;
use crate::error::{Result, ValueError};
use crate::value::Value;

pub(super) fn unwrap(value: &Value, opts: &UnwrapOptions) -> Result<Json> {
    Ok(match value {
        Value::Nothing => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::String(s) => Json::String(s.clone()),
        Value::Integer(i) => Json::Number((*i).into()),
        Value::Float(f) => float(*f),
        Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::Symbol(s) => Json::String(s.name().to_string()),
        Value::Duration(d) if opts.durations_as_nanos => match u64::try_from(d.as_nanos()) {
            Ok(n) => Json::from(n),
            Err(_) => float(d.as_nanos() as f64),
        },
        Value::Duration(d) => json!({ "secs": d.as_secs(), "nanos": d.subsec_nanos() }),
        Value::Time(t) => Json::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::List(items) => sequence(items.iter(), opts)?,
        Value::Set(items) => sequence(items.iter(), opts)?,
        Value::Dict(dict) => dict_value(dict, opts)?,
        Value::Struct(_) if opts.structs_as_json => serde_json::to_value(value)?,
        Value::Struct(s) => {
            let mut map = Map::new();
            map.insert(CTOR_KEY.to_string(), unwrap(s.ctor(), opts)?);
            for (name, field) in s.fields() {
                let field = unwrap(field, opts).map_err(|e| e.at_field(name))?;
                map.insert(name.clone(), field);
            }
            Json::Object(map)
        }
        Value::Module(_) => match &opts.fallback {
            Some(fallback) => fallback(value)?,
            None => serde_json::to_value(value)?,
        },
        Value::Function(_) | Value::Custom(_) => convert_function(value, opts)?,
    })
}

/// Non-finite floats use the same spelling as the wire form.
fn float(f: f64) -> Json {
    match Number::from_f64(f) {
        Some(n) => Json::Number(n),
        None if f.is_nan() => Json::String("NaN".to_string()),
        None if f > 0.0 => Json::String("inf".to_string()),
        None => Json::String("-inf".to_string()),
    }
}

fn sequence<'a>(items: impl Iterator<Item = &'a Value>, opts: &UnwrapOptions) -> Result<Json> {
    items
        .enumerate()
        .map(|(i, item)| unwrap(item, opts).map_err(|e| e.at_index(i)))
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

fn scalar_key(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Dicts with scalar keys become objects. Anything else becomes a list of
/// `[key, value]` pairs, unless safe keys are required.
fn dict_value(dict: &DictValue, opts: &UnwrapOptions) -> Result<Json> {
    let mut map = Map::new();
    let mut as_object = true;

    for item in dict.iter() {
        let Some(key) = scalar_key(&item.key) else {
            if opts.safe_dict_keys {
                return Err(ValueError::TypeMismatch {
                    expected: "string, integer or boolean dict key".to_string(),
                    actual: item.key.kind(),
                });
            }
            as_object = false;
            break;
        };
        if map.contains_key(&key) {
            if opts.safe_dict_keys {
                return Err(ValueError::DuplicateKey(key));
            }
            as_object = false;
            break;
        }
        let value = unwrap(&item.value, opts).map_err(|e| e.at_field(key.clone()))?;
        map.insert(key, value);
    }

    if as_object {
        return Ok(Json::Object(map));
    }

    dict.iter()
        .enumerate()
        .map(|(i, item)| {
            let key = unwrap(&item.key, opts).map_err(|e| e.at_index(i))?;
            let value = unwrap(&item.value, opts).map_err(|e| e.at_index(i))?;
            Ok(Json::Array(vec![key, value]))
        })
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::codec::Unwrapper;
    use crate::collections::ModuleValue;
    use crate::function::{CustomValue, ExecutorId, FunctionValue};
    use crate::registry::ValueRegistry;

    fn plain() -> Unwrapper {
        Unwrapper::new()
    }

    #[test]
    fn test_scalars() {
        let u = plain();
        assert_eq!(u.unwrap(&Value::Nothing).unwrap(), Json::Null);
        assert_eq!(u.unwrap(&Value::Integer(-3)).unwrap(), json!(-3));
        assert_eq!(u.unwrap(&Value::Float(0.5)).unwrap(), json!(0.5));
        assert_eq!(u.unwrap(&Value::Float(f64::NAN)).unwrap(), json!("NaN"));
        assert_eq!(u.unwrap(&Value::Bytes(vec![1, 2])).unwrap(), json!([1, 2]));
        assert_eq!(u.unwrap(&Value::new_symbol("ok").unwrap()).unwrap(), json!("ok"));
    }

    #[test]
    fn test_durations() {
        let d = Value::Duration(Duration::new(2, 5));
        assert_eq!(plain().unwrap(&d).unwrap(), json!({"secs": 2, "nanos": 5}));

        let u = Unwrapper::with_options(UnwrapOptions {
            durations_as_nanos: true,
            ..Default::default()
        });
        assert_eq!(u.unwrap(&d).unwrap(), json!(2_000_000_005u64));
    }

    #[test]
    fn test_scalar_keyed_dict_is_object() {
        let d = Value::new_dict([
            (Value::Integer(1), Value::from("a")),
            (Value::Boolean(true), Value::from("b")),
        ])
        .unwrap();
        assert_eq!(plain().unwrap(&d).unwrap(), json!({"1": "a", "true": "b"}));
    }

    #[test]
    fn test_complex_keys_become_pairs() {
        let key = Value::List(vec![Value::Integer(1)]);
        let d = Value::new_dict([(key, Value::from("x"))]).unwrap();
        assert_eq!(plain().unwrap(&d).unwrap(), json!([[[1], "x"]]));
    }

    #[test]
    fn test_safe_dict_keys() {
        let safe = Unwrapper::with_options(UnwrapOptions {
            safe_dict_keys: true,
            ..Default::default()
        });

        let complex = Value::new_dict([(Value::List(vec![]), Value::Nothing)]).unwrap();
        let err = safe.unwrap(&complex).unwrap_err();
        assert!(matches!(err, ValueError::TypeMismatch { actual: "list", .. }), "{err}");

        let colliding = Value::new_dict([
            (Value::Integer(1), Value::from("int")),
            (Value::from("1"), Value::from("str")),
        ])
        .unwrap();
        let err = safe.unwrap(&colliding).unwrap_err();
        assert!(matches!(err, ValueError::DuplicateKey(ref k) if k == "1"), "{err}");
        assert!(plain().unwrap(&colliding).unwrap().is_array());
    }

    #[test]
    fn test_struct_expansion() {
        let mut fields = BTreeMap::new();
        fields.insert("qty".to_string(), Value::Integer(2));
        let s = Value::new_struct(Value::new_symbol("Line").unwrap(), fields).unwrap();

        assert_eq!(
            plain().unwrap(&s).unwrap(),
            json!({"__ctor__": "Line", "qty": 2})
        );

        let as_json = Unwrapper::with_options(UnwrapOptions {
            structs_as_json: true,
            ..Default::default()
        });
        assert_eq!(as_json.unwrap(&s).unwrap(), serde_json::to_value(&s).unwrap());
    }

    #[test]
    fn test_module_fallback() {
        let m = Value::Module(ModuleValue::new("m", BTreeMap::new()));
        assert_eq!(plain().unwrap(&m).unwrap(), serde_json::to_value(&m).unwrap());

        let u = Unwrapper::with_options(UnwrapOptions {
            fallback: Some(Arc::new(|_: &Value| -> Result<Json> { Ok(json!("module")) })),
            ..Default::default()
        });
        assert_eq!(u.unwrap(&m).unwrap(), json!("module"));
    }

    #[test]
    fn test_function_is_hard_error_without_hook() {
        let f = Value::List(vec![Value::Function(FunctionValue::new(
            ExecutorId::new("run_1"),
            "go",
        ))]);
        let err = plain().unwrap(&f).unwrap_err();
        let ValueError::Element { index: 0, source } = err else {
            panic!("expected element error, got {err}");
        };
        assert!(matches!(*source, ValueError::UnsupportedType(_)));
    }

    #[test]
    fn test_custom_through_registry() {
        let mut registry = ValueRegistry::new();
        registry.register(ExecutorId::new("money"), |custom| {
            Ok(json!({"cents": custom.data().len()}))
        });
        let c = Value::Custom(CustomValue::new(
            ExecutorId::new("money"),
            vec![0; 3],
            Value::Integer(3),
        ));
        let u = plain().with_registry(Arc::new(registry));
        assert_eq!(u.unwrap(&c).unwrap(), json!({"cents": 3}));
    }
}

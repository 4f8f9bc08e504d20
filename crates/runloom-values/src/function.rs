// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executable references and extension values.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};
use crate::value::{Symbol, Value};

/// Opaque reference to the runtime, run or integration that owns a function
/// or custom value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorId(String);

impl ExecutorId {
    /// Wrap an executor reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no executor is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.0.chars().any(char::is_whitespace) {
            return Err(ValueError::invalid("executor_id", "must not contain whitespace"));
        }
        Ok(())
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the orchestrator treats a call to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionFlag {
    /// Runs with elevated access; never exposed to untrusted callers.
    Privileged,
    /// No side effects: may run inline instead of as a durable activity.
    Pure,
    /// Completes immediately; the caller does not poll for a result.
    NoPoll,
}

/// One declared argument of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionArg {
    /// Argument name.
    pub name: String,
    /// Whether the argument may be omitted.
    #[serde(default)]
    pub optional: bool,
    /// Whether the argument may only be passed by keyword.
    #[serde(default)]
    pub kwarg: bool,
}

/// Signature and documentation of a function, for display and introspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescription {
    /// Arguments in declaration order.
    #[serde(default)]
    pub args: Vec<FunctionArg>,
    /// Free-form description of the inputs.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,
    /// Free-form description of the result.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl FunctionDescription {
    fn check(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (i, arg) in self.args.iter().enumerate() {
            if !Symbol::is_valid(&arg.name) {
                return Err(ValueError::invalid(
                    format!("args[{i}].name"),
                    format!("'{}' is not an identifier", arg.name),
                ));
            }
            if !seen.insert(arg.name.as_str()) {
                return Err(ValueError::invalid(
                    format!("args[{i}].name"),
                    format!("duplicate argument '{}'", arg.name),
                ));
            }
        }
        Ok(())
    }
}

/// A reference to a callable owned by an executor.
///
/// `data` is serialized call state the executor needs to resume the call;
/// it is opaque to everyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionValue {
    executor_id: ExecutorId,
    name: String,
    #[serde(default, with = "crate::wire::base64_bytes")]
    data: Vec<u8>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    flags: BTreeSet<FunctionFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    desc: Option<FunctionDescription>,
}

impl FunctionValue {
    /// A function with no call state, flags or description.
    pub fn new(executor_id: ExecutorId, name: impl Into<String>) -> Self {
        Self {
            executor_id,
            name: name.into(),
            data: Vec::new(),
            flags: BTreeSet::new(),
            desc: None,
        }
    }

    /// Attach serialized call state.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Add a flag.
    pub fn with_flag(mut self, flag: FunctionFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Attach a signature description.
    pub fn with_description(mut self, desc: FunctionDescription) -> Self {
        self.desc = Some(desc);
        self
    }

    /// Owning executor.
    pub fn executor_id(&self) -> &ExecutorId {
        &self.executor_id
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialized call state.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// All flags.
    pub fn flags(&self) -> &BTreeSet<FunctionFlag> {
        &self.flags
    }

    /// Signature description, if any.
    pub fn description(&self) -> Option<&FunctionDescription> {
        self.desc.as_ref()
    }

    /// Whether `flag` is set.
    pub fn has_flag(&self, flag: FunctionFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Shorthand for the `privileged` flag.
    pub fn is_privileged(&self) -> bool {
        self.has_flag(FunctionFlag::Privileged)
    }

    /// Shorthand for the `pure` flag.
    pub fn is_pure(&self) -> bool {
        self.has_flag(FunctionFlag::Pure)
    }

    /// Shorthand for the `no-poll` flag.
    pub fn is_no_poll(&self) -> bool {
        self.has_flag(FunctionFlag::NoPoll)
    }

    pub(crate) fn check(&self, strict: bool) -> Result<()> {
        if strict && self.executor_id.is_empty() {
            return Err(ValueError::invalid("executor_id", "missing"));
        }
        if strict && self.name.is_empty() {
            return Err(ValueError::invalid("name", "missing"));
        }
        self.executor_id.check()?;
        if let Some(desc) = &self.desc {
            desc.check().map_err(|e| e.within("desc"))?;
        }
        Ok(())
    }
}

/// An extension value: opaque executor-owned bytes plus a representable
/// approximation of the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomValue {
    executor_id: ExecutorId,
    #[serde(default, with = "crate::wire::base64_bytes")]
    data: Vec<u8>,
    value: Box<Value>,
}

impl CustomValue {
    /// Build a custom value.
    pub fn new(executor_id: ExecutorId, data: Vec<u8>, value: Value) -> Self {
        Self {
            executor_id,
            data,
            value: Box::new(value),
        }
    }

    /// Owning executor.
    pub fn executor_id(&self) -> &ExecutorId {
        &self.executor_id
    }

    /// Opaque payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Inner representable value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn check(&self, strict: bool) -> Result<()> {
        if strict && self.executor_id.is_empty() {
            return Err(ValueError::invalid("executor_id", "missing"));
        }
        self.executor_id.check()?;
        self.value.check(strict).map_err(|e| e.within("value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FunctionValue {
        FunctionValue::new(ExecutorId::new("run_01"), "send")
            .with_data(vec![1, 2, 3])
            .with_flag(FunctionFlag::NoPoll)
            .with_description(FunctionDescription {
                args: vec![
                    FunctionArg {
                        name: "channel".into(),
                        optional: false,
                        kwarg: false,
                    },
                    FunctionArg {
                        name: "text".into(),
                        optional: true,
                        kwarg: true,
                    },
                ],
                ..Default::default()
            })
    }

    #[test]
    fn test_flags() {
        let f = sample();
        assert!(f.is_no_poll());
        assert!(!f.is_pure());
        assert!(!f.is_privileged());
    }

    #[test]
    fn test_function_wire_form_round_trips() {
        let v = Value::Function(sample());
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains(r#""flags":["no_poll"]"#), "{json}");
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_duplicate_argument_names_rejected() {
        let f = FunctionValue::new(ExecutorId::new("x"), "f").with_description(
            FunctionDescription {
                args: vec![
                    FunctionArg {
                        name: "a".into(),
                        optional: false,
                        kwarg: false,
                    },
                    FunctionArg {
                        name: "a".into(),
                        optional: false,
                        kwarg: false,
                    },
                ],
                ..Default::default()
            },
        );
        let err = f.check(false).unwrap_err();
        assert!(err.to_string().contains("desc.args[1].name"), "{err}");
    }

    #[test]
    fn test_custom_strict_requires_executor() {
        let c = CustomValue::new(ExecutorId::default(), vec![], Value::Integer(1));
        assert!(c.check(false).is_ok());
        assert!(c.check(true).is_err());
    }

    #[test]
    fn test_executor_id_whitespace_rejected() {
        let f = FunctionValue::new(ExecutorId::new("run 1"), "f");
        assert!(f.check(false).is_err());
    }
}

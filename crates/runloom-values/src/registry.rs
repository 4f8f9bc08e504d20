// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Decoders for custom values, keyed by the executor that owns them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::function::{CustomValue, ExecutorId};

type DecodeFn = dyn Fn(&CustomValue) -> Result<serde_json::Value> + Send + Sync;

/// Maps executor ids to decoders for their [`CustomValue`]s.
#[derive(Default, Clone)]
pub struct ValueRegistry {
    decoders: HashMap<ExecutorId, Arc<DecodeFn>>,
}

impl ValueRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the decoder for `executor`.
    pub fn register(
        &mut self,
        executor: ExecutorId,
        decode: impl Fn(&CustomValue) -> Result<serde_json::Value> + Send + Sync + 'static,
    ) {
        self.decoders.insert(executor, Arc::new(decode));
    }

    /// Whether a decoder exists for `executor`.
    pub fn contains(&self, executor: &ExecutorId) -> bool {
        self.decoders.contains_key(executor)
    }

    /// Decode `value` if its executor is registered.
    pub fn decode(&self, value: &CustomValue) -> Option<Result<serde_json::Value>> {
        self.decoders
            .get(value.executor_id())
            .map(|decode| decode(value))
    }
}

impl fmt::Debug for ValueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRegistry")
            .field("executors", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_decode_only_registered() {
        let mut registry = ValueRegistry::new();
        registry.register(ExecutorId::new("geo"), |c| Ok(serde_json::json!(c.data().len())));
        assert!(registry.contains(&ExecutorId::new("geo")));

        let known = CustomValue::new(ExecutorId::new("geo"), vec![1, 2], Value::Nothing);
        let unknown = CustomValue::new(ExecutorId::new("other"), vec![], Value::Nothing);

        assert_eq!(registry.decode(&known).unwrap().unwrap(), serde_json::json!(2));
        assert!(registry.decode(&unknown).is_none());
    }
}

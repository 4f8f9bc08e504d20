// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runloom Values
//!
//! The value model that crosses the boundary between a session and the
//! runtime executing it. Every argument, result and error payload recorded
//! in a session log is a [`Value`].
//!
//! - [`Value`]: tagged union of scalars, collections, records, functions and
//!   custom extension values, with a deterministic JSON wire form and a
//!   content hash.
//! - [`codec`]: conversion between native Rust types and [`Value`], driven by
//!   serde.
//! - [`ValueRegistry`]: decoders for executor-owned custom values.

mod collections;
pub mod codec;
pub mod error;
mod function;
mod registry;
mod value;
mod wire;

pub use collections::{DictItem, DictValue, ModuleValue, SetValue, StructValue};
pub use codec::{UnwrapOptions, Unwrapper, WrapOptions, Wrapper};
pub use error::{Result, ValueError};
pub use function::{
    CustomValue, ExecutorId, FunctionArg, FunctionDescription, FunctionFlag, FunctionValue,
};
pub use registry::ValueRegistry;
pub use value::{Symbol, Value};

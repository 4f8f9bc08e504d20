// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session log, value and attempt bookkeeping behaviour against SQLite.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use common::*;
use runloom_core::values::{self, ExecutorId, FunctionValue, Value, ValueError};
use runloom_core::{
    AttemptResult, LocalRuntime, LogData, ProgramError, SessionState, SessionStateType, fold,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: i64,
    customer: String,
    lines: Vec<OrderLine>,
    note: Option<String>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderLine {
    sku: String,
    quantity: i64,
    price: f64,
}

fn function(name: &str) -> FunctionValue {
    FunctionValue::new(ExecutorId::new("run_test"), name)
}

#[test]
fn test_native_value_survives_wrap_and_unwrap() {
    let order = Order {
        id: 1001,
        customer: "ACME".into(),
        lines: vec![
            OrderLine {
                sku: "A-1".into(),
                quantity: 2,
                price: 9.5,
            },
            OrderLine {
                sku: "B-7".into(),
                quantity: 1,
                price: 120.25,
            },
        ],
        note: None,
        tags: BTreeMap::from([("channel".to_string(), "web".to_string())]),
    };

    let wrapped = values::codec::wrap(&order).unwrap();
    wrapped.strict_validate().unwrap();
    let back: Order = values::codec::unwrap_into(&wrapped).unwrap();
    assert_eq!(back, order);
}

#[test]
fn test_dict_with_repeated_key_is_rejected() {
    let err = Value::new_dict([
        (Value::from("a"), Value::Integer(1)),
        (Value::from("b"), Value::Integer(2)),
        (Value::from("a"), Value::Integer(3)),
    ])
    .unwrap_err();
    assert!(matches!(err, ValueError::DuplicateKey(_)));
}

#[test]
fn test_set_drops_repeated_elements() {
    let set = Value::new_set([1, 2, 2, 3].map(Value::Integer)).unwrap();
    match set {
        Value::Set(set) => {
            assert_eq!(set.len(), 3);
            assert!(set.contains(&Value::Integer(2)));
        }
        other => panic!("expected a set, got {}", other.kind()),
    }
}

#[tokio::test]
async fn test_attempts_are_numbered_in_start_order() {
    let ctx = TestContext::new(LocalRuntime::new(), 3).await;
    let id = ctx.start("main").await;
    let tracker = ctx.tracker();

    tracker
        .record_call_spec(&id, function("charge"), vec![], BTreeMap::new(), 0)
        .await
        .unwrap();

    assert_eq!(tracker.start_attempt(&id, 0).await.unwrap(), 0);
    // A second start while the first is still open gets the next number.
    assert_eq!(tracker.start_attempt(&id, 0).await.unwrap(), 1);
}

#[tokio::test]
async fn test_latest_attempt_result_lookup() {
    let ctx = TestContext::new(LocalRuntime::new(), 3).await;
    let id = ctx.start("main").await;
    let tracker = ctx.tracker();

    tracker
        .record_call_spec(&id, function("charge"), vec![], BTreeMap::new(), 0)
        .await
        .unwrap();

    let first = tracker.start_attempt(&id, 0).await.unwrap();
    tracker
        .complete_attempt(
            &id,
            0,
            first,
            AttemptResult::Error(ProgramError::new("gateway timeout")),
            false,
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    let second = tracker.start_attempt(&id, 0).await.unwrap();
    tracker
        .complete_attempt(
            &id,
            0,
            second,
            AttemptResult::Value(Value::from("ok")),
            true,
            None,
        )
        .await
        .unwrap();

    let service = ctx.engine.service();
    assert_eq!(
        service.get_attempt_result(&id, 0, -1).await.unwrap(),
        AttemptResult::Value(Value::from("ok"))
    );
    assert!(service.get_attempt_result(&id, 0, 0).await.unwrap().is_error());
    assert!(
        service
            .get_attempt_result(&id, 0, 2)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert_eq!(
        service
            .get_attempt_result(&id, 0, -2)
            .await
            .unwrap_err()
            .error_code(),
        "INVALID_ARGUMENT"
    );
}

#[tokio::test]
async fn test_started_attempt_has_no_result_yet() {
    let ctx = TestContext::new(LocalRuntime::new(), 3).await;
    let id = ctx.start("main").await;
    let tracker = ctx.tracker();

    tracker
        .record_call_spec(&id, function("charge"), vec![], BTreeMap::new(), 0)
        .await
        .unwrap();
    tracker.start_attempt(&id, 0).await.unwrap();

    assert!(
        tracker
            .get_attempt_result(&id, 0, 0)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        tracker
            .get_attempt_result(&id, 0, -1)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_attempt_without_call_spec_is_rejected() {
    let ctx = TestContext::new(LocalRuntime::new(), 3).await;
    let id = ctx.start("main").await;

    let err = ctx.tracker().start_attempt(&id, 4).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(ctx.log_kinds(&id).await.iter().all(|k| *k != "call_attempt_start"));
}

#[tokio::test]
async fn test_folded_state_matches_cached_state() {
    let runtime = LocalRuntime::new().entrypoint("main", |_call| async {
        Ok::<_, ProgramError>((Value::Integer(7), BTreeMap::new()))
    });
    let ctx = TestContext::new(runtime, 3).await;
    let id = ctx.start("main").await;

    let state = ctx.engine.worker().run(&id).await.unwrap();
    assert_eq!(state.state_type(), SessionStateType::Completed);

    let log = ctx.engine.service().get_log(&id).await.unwrap();
    let view = fold(&log);
    assert_eq!(
        view.state,
        Some(SessionState::completed(vec![], BTreeMap::new(), Value::Integer(7)))
    );
    assert_eq!(
        ctx.engine.service().get(&id).await.unwrap().state_type,
        SessionStateType::Completed
    );
}

#[tokio::test]
async fn test_completed_without_return_value_is_not_appended() {
    let ctx = TestContext::new(LocalRuntime::new(), 3).await;
    let id = ctx.start("main").await;
    let log = ctx.log();

    log.append(
        &id,
        LogData::State(SessionState::running(runloom_core::RunId::parse("run_a").unwrap())),
    )
    .await
    .unwrap();

    let err = log
        .append(
            &id,
            LogData::State(SessionState::Completed {
                prints: vec![],
                exports: BTreeMap::new(),
                return_value: None,
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");

    assert_eq!(ctx.log_kinds(&id).await, vec!["state", "state"]);
    assert_eq!(
        ctx.engine.service().get(&id).await.unwrap().state_type,
        SessionStateType::Running
    );
}

#[tokio::test]
async fn test_records_are_stamped_by_the_engine_clock() {
    let ctx = TestContext::new(LocalRuntime::new(), 3).await;
    let id = ctx.start("main").await;
    let created_at = ctx.engine.service().get(&id).await.unwrap().created_at;

    ctx.clock.advance(chrono::Duration::seconds(30));
    ctx.engine.service().stop(&id, "not needed", false).await.unwrap();

    let log = ctx.engine.service().get_log(&id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].t, created_at);
    assert_eq!(log[1].t, created_at + chrono::Duration::seconds(30));
    assert_eq!(log[1].process_id.as_deref(), Some("test-worker"));
}

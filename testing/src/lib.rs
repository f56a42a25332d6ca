// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for end-to-end tests: a test service contract covering
//! every marshallable return shape, plus an in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{json, Value};

use conduit_rpc::fault::ServiceError;
use conduit_rpc::{
    Fault, MethodDescription, ParamDescription, ReturnShape, ServiceDescription, ServiceExport,
    TypeShape,
};

/// Counters and captures shared between the implementation and the test
/// making assertions about it.
#[derive(Default)]
pub struct TestState {
    pub events: Mutex<Vec<String>>,
    pub shutdowns: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub session_closes: AtomicUsize,
}

impl TestState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Contract of the connection-scoped session returned by `open_session`.
pub fn session_service() -> Arc<ServiceDescription> {
    ServiceDescription::builder("SessionService")
        .method(MethodDescription::request(
            "put",
            vec![
                ParamDescription::new("key", TypeShape::Str),
                ParamDescription::new("value", TypeShape::Integer),
            ],
            ReturnShape::Unit,
        ))
        .method(MethodDescription::request(
            "get",
            vec![ParamDescription::new("key", TypeShape::Str)],
            ReturnShape::Single(TypeShape::Integer),
        ))
        .method(
            MethodDescription::request("close_session", vec![], ReturnShape::Unit).close(),
        )
        .build()
        .expect("session contract is valid")
}

/// The main test contract: one method per return shape, a failing method,
/// a fire-and-forget method, and a close operation.
pub fn test_service() -> Arc<ServiceDescription> {
    ServiceDescription::builder("TestService")
        .method(MethodDescription::request(
            "echo",
            vec![ParamDescription::new("payload", TypeShape::Structured)],
            ReturnShape::Single(TypeShape::Structured),
        ))
        .method(MethodDescription::request(
            "add",
            vec![
                ParamDescription::new("a", TypeShape::Integer),
                ParamDescription::new("b", TypeShape::Integer),
            ],
            ReturnShape::Single(TypeShape::Integer),
        ))
        .method(MethodDescription::request(
            "greeting",
            vec![ParamDescription::new("name", TypeShape::Str)],
            ReturnShape::Single(TypeShape::Str),
        ))
        .method(MethodDescription::request(
            "countdown",
            vec![ParamDescription::new("from", TypeShape::Integer)],
            ReturnShape::List(TypeShape::Integer),
        ))
        .method(MethodDescription::request(
            "tags",
            vec![],
            ReturnShape::Set(TypeShape::Str),
        ))
        .method(MethodDescription::request(
            "scores",
            vec![],
            ReturnShape::Map(TypeShape::Integer),
        ))
        .method(MethodDescription::request(
            "fail_with",
            vec![
                ParamDescription::new("code", TypeShape::Integer),
                ParamDescription::new("message", TypeShape::Str),
            ],
            ReturnShape::Single(TypeShape::Str),
        ))
        .method(MethodDescription::request(
            "blow_up",
            vec![],
            ReturnShape::Single(TypeShape::Str),
        ))
        .method(MethodDescription::request(
            "open_session",
            vec![],
            ReturnShape::Service(session_service()),
        ))
        .method(MethodDescription::fire_and_forget(
            "log_event",
            vec![ParamDescription::new("note", TypeShape::Str)],
        ))
        .method(MethodDescription::request("shutdown", vec![], ReturnShape::Unit).close())
        .build()
        .expect("test contract is valid")
}

fn session_export(state: Arc<TestState>) -> ServiceExport {
    let store: Arc<Mutex<HashMap<String, i64>>> = Arc::new(Mutex::new(HashMap::new()));

    let put_store = Arc::clone(&store);
    let get_store = Arc::clone(&store);
    let close_state = state;

    ServiceExport::new(session_service())
        .unit_handler("put", move |mut args, _ctx| {
            let store = Arc::clone(&put_store);
            async move {
                let key: String = args.take("key")?;
                let value: i64 = args.take("value")?;
                store.lock().insert(key, value);
                Ok(())
            }
        })
        .handler("get", move |mut args, _ctx| {
            let store = Arc::clone(&get_store);
            async move {
                let key: String = args.take("key")?;
                Ok(store.lock().get(&key).copied())
            }
        })
        .unit_handler("close_session", move |_args, _ctx| {
            let state = Arc::clone(&close_state);
            async move {
                state.session_closes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
}

/// The in-memory implementation of [`test_service`].
pub fn test_service_export(state: Arc<TestState>) -> ServiceExport {
    let log_state = Arc::clone(&state);
    let shutdown_state = Arc::clone(&state);
    let session_state = state;

    ServiceExport::new(test_service())
        .handler("echo", |mut args, _ctx| async move {
            let payload: Value = args.take("payload")?;
            Ok(payload)
        })
        .handler("add", |mut args, _ctx| async move {
            let a: i64 = args.take("a")?;
            let b: i64 = args.take("b")?;
            Ok(a + b)
        })
        .handler("greeting", |mut args, _ctx| async move {
            let name: String = args.take("name")?;
            Ok(format!("hello {name}"))
        })
        .handler("countdown", |mut args, _ctx| async move {
            let from: i64 = args.take("from")?;
            Ok((1..=from).rev().collect::<Vec<i64>>())
        })
        .handler("tags", |_args, _ctx| async move {
            let tags: HashSet<String> =
                ["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
                    .into_iter()
                    .collect();
            Ok(tags)
        })
        .handler("scores", |_args, _ctx| async move {
            let mut scores = HashMap::new();
            scores.insert("a".to_string(), 1i64);
            scores.insert("b".to_string(), 2i64);
            Ok(scores)
        })
        .handler("fail_with", |mut args, _ctx| async move {
            let code: i32 = args.take("code")?;
            let message: String = args.take("message")?;
            let fault = Fault::new(code, message)
                .with_debug_info(json!({"hint": "requested failure"}));
            Err::<String, ServiceError>(fault.into())
        })
        .handler("blow_up", |_args, _ctx| async move {
            Err::<String, ServiceError>(ServiceError::internal(std::io::Error::other(
                "disk on fire",
            )))
        })
        .service_handler("open_session", move |_args, _ctx| {
            let state = Arc::clone(&session_state);
            async move {
                state.sessions_opened.fetch_add(1, Ordering::SeqCst);
                Ok(session_export(state))
            }
        })
        .unit_handler("log_event", move |mut args, _ctx| {
            let state = Arc::clone(&log_state);
            async move {
                let note: String = args.take("note")?;
                state.events.lock().push(note);
                Ok(())
            }
        })
        .unit_handler("shutdown", move |_args, _ctx| {
            let state = Arc::clone(&shutdown_state);
            async move {
                state.shutdowns.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
}
